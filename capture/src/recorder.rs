use crate::body::RequestBody;
use crate::config::CaptureConfig;
use crate::log_writer::{LogWriter, PendingWrite, WriteError};
use crate::tracker::RequestTracker;
use crate::types::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// A lifecycle notification for one request. For a given id the source delivers
/// `Created`, then `HeadersSent`, then exactly one of `Completed` or
/// `ErrorOccurred`, but notifications for different ids interleave.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    Created {
        request_id: RequestId,
        #[serde(default)]
        url: String,
        method: String,
        #[serde(default)]
        body: Option<RequestBody>,
    },
    HeadersSent {
        request_id: RequestId,
        #[serde(default)]
        url: String,
        method: String,
        #[serde(default)]
        headers: Value,
        #[serde(default)]
        body: Option<RequestBody>,
    },
    Completed {
        request_id: RequestId,
        method: String,
    },
    ErrorOccurred {
        request_id: RequestId,
    },
}

impl Notification {
    pub fn request_id(&self) -> &str {
        match self {
            Notification::Created { request_id, .. }
            | Notification::HeadersSent { request_id, .. }
            | Notification::Completed { request_id, .. }
            | Notification::ErrorOccurred { request_id } => request_id,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub notifications: usize,
    pub committed: usize,
    pub failed: usize,
    /// Requests removed by the activation sweep.
    pub expired: usize,
}

/// Drives the request tracker from a stream of notifications and hands finished
/// requests to the log writer.
///
/// Finished entries are queued on the writer in notification order, but the
/// recorder does not wait for the store before handling the next notification.
pub struct Recorder {
    tracker: RequestTracker,
    writer: LogWriter,
}

impl Recorder {
    pub fn new(config: &CaptureConfig, writer: LogWriter) -> Self {
        Recorder {
            tracker: RequestTracker::new(config),
            writer,
        }
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Applies one notification. A completed request yields the queued write for
    /// its log entry; the caller decides whether to wait for it.
    pub async fn handle(
        &mut self,
        notification: Notification,
    ) -> Result<Option<PendingWrite>, WriteError> {
        match notification {
            Notification::Created {
                request_id,
                url,
                method,
                body,
            } => {
                self.tracker
                    .on_create(&request_id, &url, &method, body.as_ref());
            }
            Notification::HeadersSent {
                request_id,
                url,
                method,
                headers,
                body,
            } => {
                self.tracker
                    .on_headers(&request_id, &url, &method, &headers, body.as_ref());
            }
            Notification::Completed { request_id, method } => {
                if let Some(entry) = self.tracker.on_complete(&request_id, &method) {
                    return self.writer.submit(entry).await.map(Some);
                }
            }
            Notification::ErrorOccurred { request_id } => {
                self.tracker.on_error(&request_id);
            }
        }
        Ok(None)
    }

    /// Handles notifications until the sender side closes, then waits for all
    /// queued writes. A failed write is logged and does not stop the loop.
    pub async fn run(mut self, mut rx: mpsc::Receiver<Notification>) -> RunSummary {
        // Activation sweep; only relevant when the tracker was fed before.
        let mut summary = RunSummary {
            expired: self.tracker.sweep(),
            ..Default::default()
        };
        let mut commits = JoinSet::new();

        while let Some(notification) = rx.recv().await {
            summary.notifications += 1;
            let request_id = notification.request_id().to_string();

            match self.handle(notification).await {
                Ok(Some(pending)) => {
                    commits.spawn(async move { (request_id, pending.committed().await) });
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::error!(request_id = %request_id, "could not queue log entry: {err}");
                    summary.failed += 1;
                }
            }

            while let Some(result) = commits.try_join_next() {
                record_commit(&mut summary, result);
            }
        }

        while let Some(result) = commits.join_next().await {
            record_commit(&mut summary, result);
        }

        tracing::info!(
            notifications = summary.notifications,
            committed = summary.committed,
            failed = summary.failed,
            expired = summary.expired,
            in_flight = self.tracker.len(),
            "notification stream closed"
        );
        summary
    }
}

fn record_commit(
    summary: &mut RunSummary,
    result: Result<(String, Result<(), WriteError>), tokio::task::JoinError>,
) {
    match result {
        Ok((_, Ok(()))) => summary.committed += 1,
        Ok((request_id, Err(err))) => {
            tracing::warn!(request_id = %request_id, "log entry not committed: {err}");
            summary.failed += 1;
        }
        Err(err) => {
            tracing::error!("commit task failed: {err}");
            summary.failed += 1;
        }
    }
}
