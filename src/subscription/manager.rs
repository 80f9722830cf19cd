use crate::subscription::hub::{Hub, IngestError, Ingested, SubscriberHandle};
use axum::extract::ws::{Message, WebSocket};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle of one subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Which side of the session finished first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Inbound stream ended (close frame, EOF, empty message or error)
    Reader,
    /// Outbound pump ended (queue closed or write failed)
    Pump,
}

/// Manages a single subscriber connection: an inbound reader and an outbound
/// pump running as separate tasks
pub struct ConnectionManager {
    hub: Arc<Hub>,
}

impl ConnectionManager {
    pub fn new(hub: Arc<Hub>) -> Self {
        Self { hub }
    }

    /// Handle WebSocket connection lifecycle
    pub async fn handle(self, socket: WebSocket) -> SessionEnd {
        let (sink, stream) = socket.split();
        let sink =
            sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text))));
        self.run(sink, stream).await
    }

    /// Run a session over any transport halves.
    ///
    /// Whichever task ends first aborts its sibling; the subscriber is then
    /// removed from the hub exactly once.
    pub async fn run<Si, St>(self, sink: Si, stream: St) -> SessionEnd
    where
        Si: Sink<String> + Send + 'static,
        Si::Error: std::error::Error + Send + Sync + 'static,
        St: Stream<Item = Result<Message, axum::Error>> + Send + 'static,
    {
        let mut state = SessionState::Connecting;
        let (handle, queue) = self.hub.subscribe();
        let id = handle.id();
        transition(&handle, &mut state, SessionState::Active);

        let pump_hub = Arc::clone(&self.hub);
        let mut pump_task = tokio::spawn(async move { pump_hub.pump(queue, sink).await });

        let reader_hub = Arc::clone(&self.hub);
        let reader_handle = handle.clone();
        let mut read_task = tokio::spawn(read_loop(reader_hub, reader_handle, stream));

        let end = tokio::select! {
            result = &mut pump_task => {
                match result {
                    Ok(Ok(())) => debug!(subscriber_id = %id, "Pump finished"),
                    Ok(Err(e)) => warn!(subscriber_id = %id, error = %e, "Outbound write failed"),
                    Err(e) => warn!(subscriber_id = %id, error = %e, "Pump task failed"),
                }
                read_task.abort();
                SessionEnd::Pump
            }
            result = &mut read_task => {
                if let Err(e) = result {
                    warn!(subscriber_id = %id, error = %e, "Reader task failed");
                }
                pump_task.abort();
                SessionEnd::Reader
            }
        };

        transition(&handle, &mut state, SessionState::Closing);
        self.hub.unsubscribe(&handle);
        transition(&handle, &mut state, SessionState::Closed);

        info!(subscriber_id = %id, ended_by = ?end, "Subscriber connection closed");
        end
    }
}

fn transition(handle: &SubscriberHandle, state: &mut SessionState, next: SessionState) {
    debug!(subscriber_id = %handle.id(), from = %state, to = %next, "Session state");
    *state = next;
}

/// Drain the inbound stream into the hub until the peer goes away
async fn read_loop<St>(hub: Arc<Hub>, handle: SubscriberHandle, stream: St)
where
    St: Stream<Item = Result<Message, axum::Error>>,
{
    let mut stream = std::pin::pin!(stream);

    while let Some(msg) = stream.next().await {
        let flow = match msg {
            Ok(Message::Text(text)) => ingest_text(&hub, &handle, &text).await,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => ingest_text(&hub, &handle, &text).await,
                Err(_) => {
                    warn!(subscriber_id = %handle.id(), "Ignoring non UTF-8 binary message");
                    ControlFlow::Continue(())
                }
            },
            Ok(Message::Close(_)) => {
                info!(subscriber_id = %handle.id(), "Subscriber sent close");
                ControlFlow::Break(())
            }
            // Ping/pong are answered by the transport
            Ok(_) => ControlFlow::Continue(()),
            Err(e) => {
                warn!(subscriber_id = %handle.id(), error = %e, "WebSocket error");
                ControlFlow::Break(())
            }
        };

        if flow.is_break() {
            return;
        }
    }

    debug!(subscriber_id = %handle.id(), "Inbound stream ended");
}

async fn ingest_text(hub: &Hub, handle: &SubscriberHandle, text: &str) -> ControlFlow<()> {
    match hub.ingest(handle, text).await {
        Ok(Ingested::Continue) => ControlFlow::Continue(()),
        Ok(Ingested::Close) => {
            info!(subscriber_id = %handle.id(), "Empty message, closing");
            ControlFlow::Break(())
        }
        Err(IngestError::Protocol(e)) => {
            warn!(subscriber_id = %handle.id(), error = %e, "Skipping malformed message");
            ControlFlow::Continue(())
        }
        Err(IngestError::Disconnected) => ControlFlow::Break(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::World;
    use futures::channel::mpsc as fmpsc;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::time::timeout;

    fn text(value: Value) -> Result<Message, axum::Error> {
        Ok(Message::Text(value.to_string()))
    }

    fn parse(message: &str) -> Value {
        serde_json::from_str(message).unwrap()
    }

    #[tokio::test]
    async fn test_session_echoes_and_tears_down_on_close() {
        let hub = Arc::new(Hub::new(Arc::new(World::new()), 16));
        let (out_tx, mut out_rx) = fmpsc::unbounded::<String>();
        let (in_tx, in_rx) = fmpsc::unbounded::<Result<Message, axum::Error>>();

        let session = tokio::spawn(ConnectionManager::new(Arc::clone(&hub)).run(out_tx, in_rx));

        in_tx
            .unbounded_send(text(json!({"circle1": {"x": 1, "y": 2}})))
            .unwrap();

        let echoed = timeout(Duration::from_secs(1), out_rx.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parse(&echoed), json!({"circle1": {"x": 1, "y": 2}}));
        assert_eq!(hub.subscriber_count(), 1);

        in_tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        let end = timeout(Duration::from_secs(1), session).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::Reader);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_message_keeps_connection_open() {
        let world = Arc::new(World::new());
        let hub = Arc::new(Hub::new(Arc::clone(&world), 16));
        let (out_tx, mut out_rx) = fmpsc::unbounded::<String>();
        let (in_tx, in_rx) = fmpsc::unbounded::<Result<Message, axum::Error>>();

        let session = tokio::spawn(ConnectionManager::new(Arc::clone(&hub)).run(out_tx, in_rx));

        in_tx
            .unbounded_send(Ok(Message::Text("{not json".to_string())))
            .unwrap();
        in_tx.unbounded_send(text(json!({"ok": {"v": 1}}))).unwrap();

        let echoed = timeout(Duration::from_secs(1), out_rx.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parse(&echoed), json!({"ok": {"v": 1}}));
        assert_eq!(Value::Object(world.get("ok")), json!({"v": 1}));

        drop(in_tx);
        let end = timeout(Duration::from_secs(1), session).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::Reader);
    }

    #[tokio::test]
    async fn test_empty_message_ends_session() {
        let hub = Arc::new(Hub::new(Arc::new(World::new()), 16));
        let (out_tx, _out_rx) = fmpsc::unbounded::<String>();
        let (in_tx, in_rx) = fmpsc::unbounded::<Result<Message, axum::Error>>();

        let session = tokio::spawn(ConnectionManager::new(Arc::clone(&hub)).run(out_tx, in_rx));
        in_tx.unbounded_send(Ok(Message::Text(String::new()))).unwrap();

        let end = timeout(Duration::from_secs(1), session).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::Reader);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_write_failure_ends_session() {
        let world = Arc::new(World::new());
        let hub = Arc::new(Hub::new(Arc::clone(&world), 16));
        let (out_tx, out_rx) = fmpsc::unbounded::<String>();
        let (_in_tx, in_rx) = fmpsc::unbounded::<Result<Message, axum::Error>>();

        // Peer gone: every write to the sink fails
        drop(out_rx);

        let session = tokio::spawn(ConnectionManager::new(Arc::clone(&hub)).run(out_tx, in_rx));

        // Wait for registration, then trigger a broadcast
        timeout(Duration::from_secs(1), async {
            while hub.subscriber_count() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        world.update("circle1", "x", json!(1));

        let end = timeout(Duration::from_secs(1), session).await.unwrap().unwrap();
        assert_eq!(end, SessionEnd::Pump);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
