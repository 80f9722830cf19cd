use crate::state::{Record, Snapshot, World};
use crate::subscription::Hub;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state for the world HTTP API
#[derive(Clone)]
pub struct WorldAppState {
    pub world: Arc<World>,
    pub hub: Arc<Hub>,
}

impl WorldAppState {
    /// Build a world and a hub registered on it
    pub fn new(queue_capacity: usize) -> Self {
        let world = Arc::new(World::new());
        let hub = Arc::new(Hub::new(Arc::clone(&world), queue_capacity));
        Self { world, hub }
    }
}

/// Response for GET /stats
#[derive(Serialize)]
pub struct StatsResponse {
    pub entities: usize,
    pub subscribers: usize,
    pub messages_broadcast: u64,
    pub messages_dropped: u64,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create world API router
pub fn create_world_router(state: Arc<WorldAppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route(
            "/entity/:id",
            get(get_entity).post(set_entity).put(set_entity),
        )
        .route("/world", get(get_world).post(replace_world))
        .route("/clear", get(clear_world).post(clear_world))
        .route("/stats", get(stats))
        .with_state(state)
}

/// GET / - Redirect to the bundled client
async fn root() -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, "/static/index.html")],
    )
        .into_response()
}

/// GET /entity/:id - Entity record (empty for unknown ids)
async fn get_entity(
    State(state): State<Arc<WorldAppState>>,
    Path(id): Path<String>,
) -> Json<Record> {
    Json(state.world.get(&id))
}

/// POST|PUT /entity/:id - Replace an entity record
async fn set_entity(
    State(state): State<Arc<WorldAppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Record>, ApiError> {
    let record = parse_object(&body)?;
    Ok(Json(state.world.set(&id, record)))
}

/// GET /world - Full world snapshot
async fn get_world(State(state): State<Arc<WorldAppState>>) -> Json<Snapshot> {
    Json(state.world.snapshot())
}

/// POST /world - Replace the whole world
///
/// Body: { "id": { ...record }, ... }. Every entry is broadcast.
async fn replace_world(
    State(state): State<Arc<WorldAppState>>,
    body: Bytes,
) -> Result<Json<Snapshot>, ApiError> {
    let entities = parse_object(&body)?
        .into_iter()
        .map(|(id, value)| match value {
            Value::Object(record) => Ok((id, record)),
            _ => Err(ApiError::InvalidRecord(id)),
        })
        .collect::<Result<Vec<(String, Record)>, ApiError>>()?;

    info!(entities = entities.len(), "Replacing world");
    Ok(Json(state.world.replace_all(entities)))
}

/// GET|POST /clear - Drop every entity
async fn clear_world(State(state): State<Arc<WorldAppState>>) -> Json<Snapshot> {
    state.world.clear();
    Json(state.world.snapshot())
}

/// GET /stats - Entity and subscriber counters
async fn stats(State(state): State<Arc<WorldAppState>>) -> Json<StatsResponse> {
    let hub = state.hub.stats();
    Json(StatsResponse {
        entities: state.world.len(),
        subscribers: hub.subscribers,
        messages_broadcast: hub.messages_broadcast,
        messages_dropped: hub.messages_dropped,
    })
}

/// Parse a JSON object body regardless of Content-Type
fn parse_object(body: &[u8]) -> Result<Record, ApiError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::NotAnObject),
        Err(e) => {
            warn!(error = %e, "Rejecting malformed request body");
            Err(ApiError::InvalidJson(e.to_string()))
        }
    }
}

/// World API error types
#[derive(Debug)]
pub enum ApiError {
    InvalidJson(String),
    NotAnObject,
    InvalidRecord(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error = match self {
            ApiError::InvalidJson(msg) => format!("invalid JSON body: {}", msg),
            ApiError::NotAnObject => "body must be a JSON object".to_string(),
            ApiError::InvalidRecord(id) => {
                format!("record for entity '{}' must be a JSON object", id)
            }
        };

        (StatusCode::BAD_REQUEST, Json(ErrorResponse { error })).into_response()
    }
}
