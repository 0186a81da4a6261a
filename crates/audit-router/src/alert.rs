//! Alert payloads posted by the Splunk webhook alert action.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level fields of a Splunk webhook payload.
///
/// Used by the decoder's strict mode to reject anything else.
pub const KNOWN_FIELDS: &[&str] = &["sid", "search_name", "app", "owner", "results_link", "result"];

/// Body of a Splunk webhook alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    /// Search id of the job that fired the alert.
    pub sid: String,
    /// Name of the saved search.
    #[serde(default)]
    pub search_name: Option<String>,
    /// Splunk app the search belongs to.
    #[serde(default)]
    pub app: Option<String>,
    /// Owner of the saved search.
    #[serde(default)]
    pub owner: Option<String>,
    /// Link to the search results in Splunk.
    #[serde(default)]
    pub results_link: Option<String>,
    /// First result row of the search.
    pub result: AlertResult,
}

/// First result row of the search that fired the alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertResult {
    /// Raw event text.
    #[serde(rename = "_raw")]
    pub raw: String,
    /// User the event is attributed to.
    pub user: String,
    /// Every other field the search extracted.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl AlertPayload {
    /// Human readable name for the alert, falling back to the sid.
    pub fn display_name(&self) -> &str {
        self.search_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.sid)
    }
}
