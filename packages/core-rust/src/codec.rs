//! JSON envelope codec.
//!
//! `encode` is pure structural serialization and cannot fail for an
//! [`Envelope`]. `decode` separates syntax errors from missing routing
//! fields so callers can log something useful before dropping the message.

use serde::Serialize;
use serde_json::Value;

use crate::error::DecodeError;
use crate::messages::Envelope;

/// Routing fields that must be present (as strings) on every envelope.
const REQUIRED_FIELDS: [&str; 4] = ["version", "source", "target", "intent"];

/// Serializes an envelope to JSON bytes.
#[must_use]
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    to_json_bytes(envelope)
}

/// Serializes any wire value to a single line of JSON (no trailing newline).
///
/// Used by the line-stream binding, where one object per line is the framing.
#[must_use]
pub fn encode_line<T: Serialize>(value: &T) -> String {
    // serde_json never emits raw newlines in compact mode
    String::from_utf8(to_json_bytes(value)).unwrap_or_default()
}

fn to_json_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    match serde_json::to_vec(value) {
        Ok(bytes) => bytes,
        Err(e) => {
            // Only reachable with non-string map keys, which wire types never use.
            tracing::error!(error = %e, "failed to serialize wire value");
            Vec::new()
        }
    }
}

/// Decodes JSON bytes into an envelope.
///
/// # Errors
///
/// - [`DecodeError::Syntax`] if the bytes are not valid JSON
/// - [`DecodeError::NotAnObject`] if the top-level value is not an object
/// - [`DecodeError::MissingField`] if a routing field is absent or not a string
/// - [`DecodeError::Schema`] if `meta` has an unexpected shape
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    let value: Value = serde_json::from_slice(bytes).map_err(DecodeError::Syntax)?;
    from_value(value)
}

/// Decodes a JSON text frame into an envelope. See [`decode`].
///
/// # Errors
///
/// Same as [`decode`].
pub fn decode_str(text: &str) -> Result<Envelope, DecodeError> {
    decode(text.as_bytes())
}

fn from_value(value: Value) -> Result<Envelope, DecodeError> {
    let Some(obj) = value.as_object() else {
        return Err(DecodeError::NotAnObject {
            found: json_type_name(&value),
        });
    };

    for field in REQUIRED_FIELDS {
        if !obj.get(field).is_some_and(Value::is_string) {
            return Err(DecodeError::MissingField(field));
        }
    }

    serde_json::from_value(value).map_err(DecodeError::Schema)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
