//! Wire message shapes for JSON text frames.
//!
//! Outgoing frames are the caller's fields plus the routing pair
//! `{action, response_id}`. Inbound frames correlate by `response_id`, read
//! from one of two candidate locations with fixed precedence: the top-level
//! field wins, otherwise the copy nested inside `error_data` (so well-formed
//! error replies still reach their conversation).

use serde_json::{Map, Value};

use crate::errors::LinkError;
use crate::ids::ConvoId;

/// Top-level field naming the operation an outgoing frame performs.
pub const ACTION_FIELD: &str = "action";
/// Correlation identifier field, present on outgoing and matching inbound frames.
pub const RESPONSE_ID_FIELD: &str = "response_id";
/// Error-detail object that may carry the correlation id on error replies.
pub const ERROR_DATA_FIELD: &str = "error_data";

/// Build an outgoing frame: caller fields ∪ `{action, response_id}`.
///
/// The routing pair is written last, so a caller-supplied `action` or
/// `response_id` field is overwritten rather than trusted.
pub fn envelope(fields: Value, action: &str, id: &ConvoId) -> Result<Value, LinkError> {
    let Value::Object(mut map) = fields else {
        return Err(LinkError::InvalidArgument {
            reason: format!("payload must be a JSON object, got {}", type_name(&fields)),
        });
    };
    let _ = map.insert(ACTION_FIELD.to_owned(), Value::String(action.to_owned()));
    let _ = map.insert(
        RESPONSE_ID_FIELD.to_owned(),
        Value::String(id.as_str().to_owned()),
    );
    Ok(Value::Object(map))
}

/// Extract the correlation identifier from an inbound frame.
///
/// Two-step lookup: top-level `response_id` wins; otherwise
/// `error_data.response_id`. Returns `None` for unsolicited traffic.
#[must_use]
pub fn correlation_id(message: &Value) -> Option<&str> {
    if let Some(id) = message.get(RESPONSE_ID_FIELD).and_then(Value::as_str) {
        return Some(id);
    }
    message
        .get(ERROR_DATA_FIELD)?
        .get(RESPONSE_ID_FIELD)?
        .as_str()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Convenience: an empty JSON object for field-less sends.
#[must_use]
pub fn empty_object() -> Value {
    Value::Object(Map::new())
}
