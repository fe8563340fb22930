//! Decoded GraphQL response tree.
//!
//! The transport decodes every reply into [`GraphResponse`]; the engine
//! reads `data.<kind>` as an array and `data.pageInfo` as an optional
//! paging hint. No schema validation happens here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level GraphQL response: a `data` tree plus optional `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphResponse {
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphError>,
}

impl GraphResponse {
    /// `true` when the response carries no usable `data` tree.
    #[must_use]
    pub fn is_data_absent(&self) -> bool {
        self.data.is_none()
    }

    /// Parse the optional `pageInfo` object out of the data tree.
    #[must_use]
    pub fn page_info(&self) -> Option<PageInfo> {
        let info = self.data.as_ref()?.get("pageInfo")?;
        serde_json::from_value(info.clone()).ok()
    }
}

/// One error entry from a GraphQL reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<GraphErrorLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

/// Line/column position of a query error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphErrorLocation {
    pub line: u32,
    pub column: u32,
}

/// Relay-style paging hints, when the server provides them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub has_next_page: Option<bool>,
    #[serde(default)]
    pub end_cursor: Option<String>,
}

/// Server-declared rate-limit state, lifted from response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Requests allowed per window, when declared.
    pub limit: Option<u32>,
    /// Requests remaining in the current window.
    pub remaining: Option<u32>,
    /// When the window resets.
    pub reset_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_data_and_errors() {
        let raw = json!({
            "data": {"tokens": [{"id": "a"}]},
            "errors": [{"message": "indexing lag", "locations": [{"line": 1, "column": 2}]}]
        });
        let resp: GraphResponse = serde_json::from_value(raw).unwrap();
        assert!(!resp.is_data_absent());
        assert_eq!(resp.errors.len(), 1);
        assert_eq!(resp.errors[0].message, "indexing lag");
    }

    #[test]
    fn missing_data_is_flagged() {
        let resp: GraphResponse =
            serde_json::from_value(json!({"errors": [{"message": "boom"}]})).unwrap();
        assert!(resp.is_data_absent());
    }

    #[test]
    fn page_info_parsed_when_present() {
        let resp: GraphResponse = serde_json::from_value(json!({
            "data": {"tokens": [], "pageInfo": {"hasNextPage": true, "endCursor": "xyz"}}
        }))
        .unwrap();
        let info = resp.page_info().unwrap();
        assert_eq!(info.has_next_page, Some(true));
        assert_eq!(info.end_cursor.as_deref(), Some("xyz"));
    }

    #[test]
    fn page_info_absent_yields_none() {
        let resp: GraphResponse =
            serde_json::from_value(json!({"data": {"tokens": []}})).unwrap();
        assert!(resp.page_info().is_none());
    }
}
