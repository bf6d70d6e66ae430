use crate::body::{RequestBody, decode_body};
use crate::config::CaptureConfig;
use crate::headers::normalize_headers;
use crate::metrics_defs::{
    BODY_TRUNCATED, REQUESTS_DISCARDED, REQUESTS_EXPIRED, REQUESTS_FINALIZED, REQUESTS_INFLIGHT,
    REQUESTS_TRACKED,
};
use crate::types::{DecodedBody, LogEntry, PartialRequest, RequestId, now_iso};
use serde_json::Value;
use shared::{counter, gauge};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Correlates lifecycle notifications into partial requests.
///
/// Each request id moves through `absent -> tracked -> headers captured` and ends
/// either finalized (turned into a [`LogEntry`]) or discarded. Both terminal states
/// remove the entry. Notifications for different ids interleave freely, and any
/// transition may arrive for an id that is not cached, so every handler tolerates
/// a missing or half populated entry.
///
/// Requests whose terminal notification never arrives are reclaimed by [`sweep`],
/// which only runs on a tracked create and when the owner calls it. There is no
/// background timer: if no further requests are created, stale entries stay
/// cached indefinitely.
///
/// [`sweep`]: RequestTracker::sweep
pub struct RequestTracker {
    requests: HashMap<RequestId, PartialRequest>,
    max_body_bytes: usize,
    ttl: Duration,
    tracked_methods: Vec<String>,
}

impl RequestTracker {
    pub fn new(config: &CaptureConfig) -> Self {
        RequestTracker {
            requests: HashMap::new(),
            max_body_bytes: config.max_body_bytes,
            ttl: config.request_ttl(),
            tracked_methods: config.tracked_methods.clone(),
        }
    }

    pub fn is_tracked_method(&self, method: &str) -> bool {
        self.tracked_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }

    pub fn on_create(
        &mut self,
        request_id: &str,
        url: &str,
        method: &str,
        body: Option<&RequestBody>,
    ) {
        if !self.is_tracked_method(method) {
            return;
        }
        self.sweep();

        let mut request = PartialRequest::new(request_id, url, method);
        // Headers are not known yet, so the content type is ignored here and the
        // body is not decoded again once they arrive.
        request.body = self.decode(body, &request);
        self.requests.insert(request_id.to_string(), request);

        counter!(REQUESTS_TRACKED).increment(1);
        self.update_inflight();
    }

    pub fn on_headers(
        &mut self,
        request_id: &str,
        url: &str,
        method: &str,
        raw_headers: &Value,
        body: Option<&RequestBody>,
    ) {
        if !self.is_tracked_method(method) {
            return;
        }

        let mut request = self
            .requests
            .remove(request_id)
            .unwrap_or_else(|| PartialRequest::new(request_id, url, method));
        request.headers = normalize_headers(raw_headers);
        if request.body.is_none() {
            request.body = self.decode(body, &request);
        }
        self.requests.insert(request_id.to_string(), request);
        self.update_inflight();
    }

    /// Removes the request and builds its log entry. Returns `None` when nothing
    /// was cached for the id (already discarded, expired or never created).
    pub fn on_complete(&mut self, request_id: &str, method: &str) -> Option<LogEntry> {
        if !self.is_tracked_method(method) {
            return None;
        }

        let request = self.requests.remove(request_id);
        self.update_inflight();
        let Some(request) = request else {
            tracing::debug!(request_id, "completion for untracked request");
            return None;
        };

        counter!(REQUESTS_FINALIZED).increment(1);
        Some(LogEntry::finalize(request, now_iso()))
    }

    /// Drops any in-flight state for the id regardless of method. Returns whether
    /// an entry was removed.
    pub fn on_error(&mut self, request_id: &str) -> bool {
        let removed = self.requests.remove(request_id).is_some();
        if removed {
            counter!(REQUESTS_DISCARDED).increment(1);
            self.update_inflight();
        }
        removed
    }

    /// Removes every request older than the TTL. Returns the number removed.
    pub fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let before = self.requests.len();
        self.requests
            .retain(|_, request| now.saturating_duration_since(request.created_at) <= ttl);

        let expired = before - self.requests.len();
        if expired > 0 {
            tracing::debug!(expired, "swept stale requests");
            counter!(REQUESTS_EXPIRED).increment(expired as u64);
            self.update_inflight();
        }
        expired
    }

    pub fn get(&self, request_id: &str) -> Option<&PartialRequest> {
        self.requests.get(request_id)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    fn decode(&self, body: Option<&RequestBody>, request: &PartialRequest) -> Option<DecodedBody> {
        let decoded = decode_body(body, &request.headers, self.max_body_bytes);
        if decoded.as_ref().is_some_and(|b| b.truncated) {
            counter!(BODY_TRUNCATED).increment(1);
        }
        decoded
    }

    fn update_inflight(&self) {
        gauge!(REQUESTS_INFLIGHT).set(self.requests.len() as f64);
    }
}
