use crate::state::{is_empty_value, Record, Snapshot};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// One decoded (entity id, value) pair of an inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEntry {
    /// Empty value: the client wants the full world
    SnapshotRequest { entity_id: String },
    /// Non-empty object: complete replacement record
    Set { entity_id: String, record: Record },
}

/// Inbound wire errors
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    InvalidJson(String),
    NotAnObject,
    InvalidRecord(String),
    Encode(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::InvalidJson(e) => write!(f, "invalid JSON: {}", e),
            ProtocolError::NotAnObject => write!(f, "message must be a JSON object"),
            ProtocolError::InvalidRecord(id) => {
                write!(f, "value for entity '{}' must be empty or a JSON object", id)
            }
            ProtocolError::Encode(e) => write!(f, "failed to encode outbound message: {}", e),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Decode one inbound message.
///
/// Message format:
/// {
///   "circle1": {"x": 1, "y": 2},   // replace record
///   "circle2": {}                  // request full world
/// }
///
/// The message is validated as a whole: a single bad value rejects every
/// entry, so nothing is applied from a malformed message.
pub fn parse_inbound(raw: &str) -> Result<Vec<InboundEntry>, ProtocolError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    let Value::Object(entries) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    entries
        .into_iter()
        .map(|(entity_id, value)| {
            if is_empty_value(&value) {
                return Ok(InboundEntry::SnapshotRequest { entity_id });
            }
            match value {
                Value::Object(record) => Ok(InboundEntry::Set { entity_id, record }),
                _ => Err(ProtocolError::InvalidRecord(entity_id)),
            }
        })
        .collect()
}

/// Encode a single-entity update: `{entity_id: record}`
pub fn encode_entity(entity_id: &str, record: &Record) -> Result<String, ProtocolError> {
    let msg: BTreeMap<&str, &Record> = BTreeMap::from([(entity_id, record)]);
    serde_json::to_string(&msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Encode the full world: `{id: record, ...}`
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<String, ProtocolError> {
    serde_json::to_string(snapshot).map_err(|e| ProtocolError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_set_and_snapshot_request() {
        let entries = parse_inbound(r#"{"circle2": {"x": 1}, "circle1": {}}"#).unwrap();

        let expected = match json!({"x": 1}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        // Wire order, not key order
        assert_eq!(
            entries,
            vec![
                InboundEntry::Set {
                    entity_id: "circle2".to_string(),
                    record: expected,
                },
                InboundEntry::SnapshotRequest {
                    entity_id: "circle1".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_falsy_values_request_snapshot() {
        let entries = parse_inbound(r#"{"a": null, "b": "", "c": 0, "d": false, "e": []}"#).unwrap();
        assert_eq!(entries.len(), 5);
        assert!(entries
            .iter()
            .all(|e| matches!(e, InboundEntry::SnapshotRequest { .. })));
    }

    #[test]
    fn test_rejects_invalid_json() {
        let result = parse_inbound("{not json");
        assert!(matches!(result, Err(ProtocolError::InvalidJson(_))));
    }

    #[test]
    fn test_rejects_non_object_message() {
        assert_eq!(parse_inbound("[1, 2]"), Err(ProtocolError::NotAnObject));
        assert_eq!(parse_inbound("\"hello\""), Err(ProtocolError::NotAnObject));
    }

    #[test]
    fn test_rejects_non_object_record() {
        let result = parse_inbound(r#"{"ok": {"x": 1}, "bad": 42}"#);
        assert_eq!(result, Err(ProtocolError::InvalidRecord("bad".to_string())));
    }

    #[test]
    fn test_encode_entity_single_key() {
        let record = match json!({"x": 1, "y": 2}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let encoded = encode_entity("circle1", &record).unwrap();
        let decoded: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, json!({"circle1": {"x": 1, "y": 2}}));
    }
}
