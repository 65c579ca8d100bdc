//! Application messages.
//!
//! A [`Message`] is the unit every codec carries: a non-zero `u16` id that
//! doubles as the dispatch key, a name, and a free-form JSON payload. Its
//! JSON encoding always lists the fields as `id`, `name`, `payload`.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Caller-defined message payload.
pub type Payload = Map<String, Value>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("empty message text")]
    Empty,
    #[error("invalid message json: {0}")]
    Json(String),
    #[error("message json is not an object")]
    NotAnObject,
    #[error("missing or falsy field: {0}")]
    MissingField(&'static str),
    #[error("message id out of range: {0}")]
    IdOutOfRange(u64),
    #[error("payload is not a mapping")]
    InvalidPayload,
}

/// An immutable application message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    id: u16,
    name: String,
    payload: Payload,
}

impl Message {
    /// Create a message with an empty payload.
    ///
    /// Fails if `id` is zero or `name` is empty, the same conditions under
    /// which [`Message::decode`] rejects a message.
    pub fn new(id: u16, name: impl Into<String>) -> Result<Self, MessageError> {
        let name = name.into();
        if id == 0 {
            return Err(MessageError::MissingField("id"));
        }
        if name.is_empty() {
            return Err(MessageError::MissingField("name"));
        }
        Ok(Self {
            id,
            name,
            payload: Payload::new(),
        })
    }

    /// Replace the payload.
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Add a single payload field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Look up a string payload field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Encode as JSON text.
    pub fn encode(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(|e| MessageError::Json(e.to_string()))
    }

    /// Decode from JSON text.
    ///
    /// A missing or `null` payload decodes as an empty mapping. No other
    /// payload validation is performed.
    pub fn decode(text: &str) -> Result<Self, MessageError> {
        if text.trim().is_empty() {
            return Err(MessageError::Empty);
        }

        let value: Value =
            serde_json::from_str(text).map_err(|e| MessageError::Json(e.to_string()))?;
        let Value::Object(mut object) = value else {
            return Err(MessageError::NotAnObject);
        };

        let id = match object.get("id").and_then(Value::as_u64) {
            Some(0) | None => return Err(MessageError::MissingField("id")),
            Some(id) => u16::try_from(id).map_err(|_| MessageError::IdOutOfRange(id))?,
        };

        let name = match object.remove("name") {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => return Err(MessageError::MissingField("name")),
        };

        let payload = match object.remove("payload") {
            None | Some(Value::Null) => Payload::new(),
            Some(Value::Object(payload)) => payload,
            Some(_) => return Err(MessageError::InvalidPayload),
        };

        Ok(Self { id, name, payload })
    }
}
