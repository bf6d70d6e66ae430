use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

pub type RequestId = String;

/// Form fields keyed by name. Repeated names keep every value in arrival order.
pub type FormFields = IndexMap<String, Vec<String>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new<N, V>(name: N, value: V) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Header {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Classified body content. Serialized as `{"kind": ..., "data": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum BodyContent {
    Raw(String),
    Text(String),
    Json(serde_json::Value),
    Urlencoded(FormFields),
    FormData(FormFields),
}

impl BodyContent {
    pub const fn kind(&self) -> &'static str {
        match self {
            BodyContent::Raw(_) => "raw",
            BodyContent::Text(_) => "text",
            BodyContent::Json(_) => "json",
            BodyContent::Urlencoded(_) => "urlencoded",
            BodyContent::FormData(_) => "formData",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedBody {
    #[serde(flatten)]
    pub content: BodyContent,
    /// Set when the retained bytes reached the capture ceiling.
    pub truncated: bool,
}

impl DecodedBody {
    pub fn new(content: BodyContent, truncated: bool) -> Self {
        DecodedBody { content, truncated }
    }

    pub fn kind(&self) -> &'static str {
        self.content.kind()
    }
}

/// An in-flight request, assembled from lifecycle notifications until it
/// reaches a terminal state.
#[derive(Clone, Debug)]
pub struct PartialRequest {
    pub request_id: RequestId,
    pub url: String,
    pub method: String,
    pub headers: Vec<Header>,
    pub body: Option<DecodedBody>,
    pub created_at: Instant,
}

impl PartialRequest {
    pub fn new(request_id: &str, url: &str, method: &str) -> Self {
        PartialRequest {
            request_id: request_id.to_string(),
            url: url.to_string(),
            method: method.to_string(),
            headers: Vec::new(),
            body: None,
            created_at: Instant::now(),
        }
    }
}

/// A finalized request as stored in the durable log. Never mutated once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: RequestId,
    pub timestamp: String,
    pub url: String,
    pub method: String,
    pub headers: Vec<Header>,
    pub body: Option<DecodedBody>,
}

impl LogEntry {
    pub fn finalize(request: PartialRequest, timestamp: String) -> Self {
        LogEntry {
            id: request.request_id,
            timestamp,
            url: request.url,
            method: request.method,
            headers: request.headers,
            body: request.body,
        }
    }
}

/// Exported copy of the whole log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogSnapshot {
    #[serde(rename = "exportedAt")]
    pub exported_at: String,
    pub logs: Vec<LogEntry>,
}

/// Current UTC time as ISO-8601 with millisecond precision, e.g. `2026-01-01T00:00:00.000Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
