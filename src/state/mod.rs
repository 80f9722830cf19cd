// World state and change notification

mod record;
mod world;

pub use record::{is_empty_value, ChangeSink, Record, Snapshot};
pub use world::World;
