//! Extracted record model and event-bus wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ids::{Endpoint, QueryKind};

/// One decoded entity plus its provenance.
///
/// Serialized form is the event-bus wire format: `id`, `type`, `deployment`,
/// `timestamp` (RFC-3339 UTC), optional `cursor`, `data`, optional
/// `meta_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: QueryKind,
    #[serde(rename = "deployment")]
    pub endpoint: Endpoint,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub data: Value,
    #[serde(rename = "meta_data", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Record {
    /// Build a record from one element of a server page.
    ///
    /// The element's string `id` becomes the record id; when it is absent or
    /// not a string, a fresh UUID v4 is synthesised so that every record
    /// carries a non-empty key.
    #[must_use]
    pub fn from_element(kind: &QueryKind, endpoint: &Endpoint, element: Value) -> Self {
        let element_id = element
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_owned);
        let id = element_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            id,
            kind: kind.clone(),
            endpoint: endpoint.clone(),
            timestamp: Utc::now(),
            cursor: element_id,
            data: element,
            meta: None,
        }
    }

    /// Attach gateway metadata (e.g. the `_meta` tree of the response).
    #[must_use]
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Serialize for the event bus.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if `data` contains a non-serializable
    /// value (cannot happen for trees decoded from JSON responses).
    pub fn to_event_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from an event-bus payload.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` when the payload is not a valid record.
    pub fn from_event_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
