use serde_json::Value;
use tracing::debug;

use crate::message::{Message, Payload};

/// Returns `true` if the string contains at least one non-whitespace character.
pub(crate) fn has_text(s: &str) -> bool {
    !s.trim().is_empty()
}

/// Normalizes a value into the list of tag values it stands for.
///
/// `null` yields nothing. Arrays yield the string form of each element, skipping blank ones. Any other value yields
/// its string form as the single element, even when that string is blank: blank scalars are kept here and only
/// filtered out when the tag set for an increment is assembled.
pub(crate) fn to_values(value: Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().map(stringify).filter(|s| has_text(s)).collect(),
        scalar => vec![stringify(scalar)],
    }
}

fn stringify(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// Reads the named field from the message payload.
///
/// Byte payloads are decoded as a JSON document first. Mappings are read by key, objects by named property. A field
/// that cannot be found is not an error: it is logged and read as `null`.
///
/// # Errors
///
/// If the payload is a byte payload that is not a valid JSON document, an error is returned.
pub(crate) fn read_field(message: &Message, field: &str) -> Result<Value, serde_json::Error> {
    let found = match message.payload() {
        Payload::Bytes(_) | Payload::Json(_) => message.document()?.and_then(|document| lookup(document, field)),
        Payload::Object(object) => object.property(field),
        Payload::Text(_) => None,
    };

    Ok(found.unwrap_or_else(|| {
        debug!(field, "Field not present in payload.");
        Value::Null
    }))
}

fn lookup(document: &Value, field: &str) -> Option<Value> {
    document.as_object().and_then(|fields| fields.get(field)).cloned()
}
