use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Fields of one entity (field name -> arbitrary JSON value)
pub type Record = Map<String, Value>;

/// Full world at a point in time, ordered by entity id
pub type Snapshot = BTreeMap<String, Record>;

/// Receives every `set`/`update` applied to the world.
///
/// Sinks run synchronously inside the write, while the entity slot is still
/// locked. They must not block and must not call back into the `World`.
pub trait ChangeSink: Send + Sync {
    fn entity_changed(&self, entity_id: &str, record: &Record);
}

impl<F> ChangeSink for F
where
    F: Fn(&str, &Record) + Send + Sync,
{
    fn entity_changed(&self, entity_id: &str, record: &Record) {
        self(entity_id, record)
    }
}

/// Whether an inbound value counts as "empty" (a request for the full world).
///
/// Mirrors JSON truthiness: null, false, zero, "", [] and {} are empty.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
