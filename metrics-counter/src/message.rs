use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, OnceLock},
};

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

/// Named-property access for payloads that are not plain mappings.
///
/// This is how the counter reads fields out of structured objects that it otherwise knows nothing about. A property
/// that cannot be read, for whatever reason, is reported as `None`.
pub trait PropertyAccess: fmt::Debug + Send + Sync {
    /// Reads the property with the given name.
    fn property(&self, name: &str) -> Option<Value>;
}

/// Exposes the serialized form of a value as its set of named properties.
///
/// Any type implementing [`Serialize`] as a struct or map can be wrapped and handed to the counter as an object
/// payload: each top-level field becomes a readable property.
#[derive(Debug)]
pub struct Serialized<T>(pub T);

impl<T> PropertyAccess for Serialized<T>
where
    T: Serialize + fmt::Debug + Send + Sync,
{
    fn property(&self, name: &str) -> Option<Value> {
        match serde_json::to_value(&self.0).ok()? {
            Value::Object(mut fields) => fields.remove(name),
            _ => None,
        }
    }
}

/// The payload carried by a message.
#[derive(Clone, Debug)]
pub enum Payload {
    /// Plain text.
    Text(String),

    /// Raw bytes, expected to hold an encoded JSON document when fields are read from it.
    Bytes(Bytes),

    /// An already-decoded JSON document.
    Json(Value),

    /// An opaque object exposing named properties.
    Object(Arc<dyn PropertyAccess>),
}

impl Payload {
    /// Creates an object payload from anything exposing named properties.
    pub fn object<P>(properties: P) -> Self
    where
        P: PropertyAccess + 'static,
    {
        Payload::Object(Arc::new(properties))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_owned())
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(bytes))
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

/// A message flowing through the pipeline.
///
/// The counter never modifies messages: it reads the payload and headers, and hands the message back untouched.
#[derive(Clone, Debug)]
pub struct Message {
    payload: Payload,
    headers: BTreeMap<String, Value>,
    document: OnceLock<Value>,
}

impl Message {
    /// Creates a new message with the given payload and no headers.
    pub fn new<P>(payload: P) -> Self
    where
        P: Into<Payload>,
    {
        Message { payload: payload.into(), headers: BTreeMap::new(), document: OnceLock::new() }
    }

    /// Adds a header to the message.
    #[must_use]
    pub fn with_header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Returns the payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Returns all headers.
    pub fn headers(&self) -> &BTreeMap<String, Value> {
        &self.headers
    }

    /// Returns the header with the given name, if present.
    pub fn header(&self, name: &str) -> Option<&Value> {
        self.headers.get(name)
    }

    /// Returns the payload as a JSON document, decoding text and byte payloads on first use.
    ///
    /// The decoded document is kept with the message, so however many fields and expressions read it, a payload is
    /// decoded at most once. Object payloads have no document.
    ///
    /// # Errors
    ///
    /// If a text or byte payload is not a valid JSON document, an error is returned. Failures are not cached.
    pub(crate) fn document(&self) -> Result<Option<&Value>, serde_json::Error> {
        let decoded = match &self.payload {
            Payload::Json(document) => return Ok(Some(document)),
            Payload::Object(_) => return Ok(None),
            _ if self.document.get().is_some() => return Ok(self.document.get()),
            Payload::Text(text) => serde_json::from_str(text)?,
            Payload::Bytes(bytes) => serde_json::from_slice(bytes)?,
        };
        Ok(Some(self.document.get_or_init(|| decoded)))
    }

    /// Consumes the message, returning its payload and headers.
    pub fn into_parts(self) -> (Payload, BTreeMap<String, Value>) {
        (self.payload, self.headers)
    }
}
