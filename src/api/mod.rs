// HTTP and WebSocket APIs

pub mod websocket;
pub mod world;

pub use websocket::{create_ws_router, ws_handler, WsAppState};
pub use world::{create_world_router, ApiError, StatsResponse, WorldAppState};

use axum::Router;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

/// Assemble the full application: world API, /subscribe and /static
pub fn create_app(state: WorldAppState, static_dir: impl AsRef<Path>) -> Router {
    let ws_state = Arc::new(WsAppState {
        hub: Arc::clone(&state.hub),
    });

    create_world_router(Arc::new(state))
        .merge(create_ws_router(ws_state))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
}
