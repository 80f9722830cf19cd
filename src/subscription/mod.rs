// Subscriber fan-out and the /subscribe wire protocol

pub mod hub;
pub mod manager;
pub mod protocol;

pub use hub::{
    Hub, HubStats, IngestError, Ingested, OutboundQueue, SubscriberHandle, SubscriberId,
    DEFAULT_QUEUE_CAPACITY,
};
pub use manager::{ConnectionManager, SessionEnd, SessionState};
pub use protocol::{InboundEntry, ProtocolError};
