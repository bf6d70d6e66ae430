pub mod body;
pub mod config;
pub mod headers;
pub mod log_writer;
mod metrics_defs;
pub mod recorder;
pub mod store;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod testutils;

pub use metrics_defs::ALL_METRICS;

use config::Config;
use log_writer::LogWriter;
use recorder::{Notification, Recorder, RunSummary};
use std::sync::Arc;
use store::KeyValueStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const NOTIFICATION_QUEUE_SIZE: usize = 256;

/// A running capture pipeline: the recorder task fed by a notification queue, and
/// the log writer it hands finished requests to.
pub struct Capture {
    tx: mpsc::Sender<Notification>,
    writer: LogWriter,
    handle: JoinHandle<RunSummary>,
}

impl Capture {
    /// Spawns the log writer and the recorder. Must be called from within a tokio runtime.
    pub fn start(config: &Config, store: Arc<dyn KeyValueStore>) -> Self {
        let writer = LogWriter::spawn(store, &config.log);
        let recorder = Recorder::new(&config.capture, writer.clone());

        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE_SIZE);
        let handle = tokio::spawn(recorder.run(rx));

        Capture { tx, writer, handle }
    }

    /// Sender for the notification source. Notifications are handled in the
    /// order they are received.
    pub fn notifications(&self) -> mpsc::Sender<Notification> {
        self.tx.clone()
    }

    pub fn writer(&self) -> &LogWriter {
        &self.writer
    }

    /// Closes the notification queue, waits for every queued write and stops the
    /// writer. Notifications still held by other senders are handled first.
    pub async fn finish(self) -> RunSummary {
        let Capture { tx, writer, handle } = self;
        drop(tx);

        let summary = match handle.await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::error!("recorder task failed: {err}");
                RunSummary::default()
            }
        };
        writer.shutdown().await;
        summary
    }
}
