use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Opaque structured metadata attached to log entries and job runs.
///
/// The payload is stored as serialized JSON text. Each log type or job name
/// documents its own shape; readers decode into that shape with [`Payload::decode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(String);

impl Payload {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_string(value).map(Self)
    }

    pub fn from_json(value: &serde_json::Value) -> Self {
        Self(value.to_string())
    }

    /// Wraps text that is already serialized JSON (e.g. a stored column).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.0)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::from_str(&self.0).unwrap_or_else(|_| serde_json::Value::String(self.0.clone()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
