//! Bounded, append-only request log kept as a single value in a [`KeyValueStore`].
//!
//! The store only offers whole-value get and set, so every append is a
//! read-modify-write cycle. Two appends running side by side would both read the
//! same log and one of the writes would be lost. All cycles therefore run on a
//! single worker task that takes commands from one ordered queue: appends and
//! resets are applied one at a time, in the order they were submitted.
//!
//! The worker re-reads the stored log on every cycle and keeps nothing in memory
//! between commands, so the value may be reset or replaced by someone else at any
//! point between two appends.

use crate::config::LogConfig;
use crate::metrics_defs::{LOG_APPEND_DURATION, LOG_APPENDED, LOG_EVICTED, LOG_WRITE_FAILED};
use crate::store::{KeyValueStore, StoreError};
use crate::types::{LogEntry, LogSnapshot, now_iso};
use parking_lot::Mutex;
use serde_json::Value;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const QUEUE_SIZE: usize = 64;

#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("could not encode log entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("the log writer has shut down")]
    Closed,
}

type Reply = oneshot::Sender<Result<(), WriteError>>;

#[derive(Debug)]
enum Command {
    // Append an entry. The worker replies once the store write finished.
    Append(Box<LogEntry>, Reply),
    // Replace the log with an empty one.
    Clear(Reply),
    // Stop the worker after everything queued before this command.
    Shutdown,
}

/// A write that has been queued but not necessarily committed yet.
#[derive(Debug)]
pub struct PendingWrite {
    rx: oneshot::Receiver<Result<(), WriteError>>,
}

impl PendingWrite {
    /// Waits for the worker to apply the write.
    pub async fn committed(self) -> Result<(), WriteError> {
        self.rx.await.map_err(|_| WriteError::Closed)?
    }
}

struct LogWriterInner {
    tx: mpsc::Sender<Command>,
    store: Arc<dyn KeyValueStore>,
    key: String,
    changes: watch::Receiver<usize>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the log worker. Cheap to clone; all clones feed the same queue.
#[derive(Clone)]
pub struct LogWriter {
    inner: Arc<LogWriterInner>,
}

impl LogWriter {
    /// Spawns the worker task. Must be called from within a tokio runtime.
    pub fn spawn(store: Arc<dyn KeyValueStore>, config: &LogConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Command>(QUEUE_SIZE);
        let (changes_tx, changes) = watch::channel(0);

        let worker = Worker {
            store: store.clone(),
            key: config.key.clone(),
            max_entries: config.max_entries,
            changes: changes_tx,
        };
        let handle = tokio::spawn(worker.run(rx));

        LogWriter {
            inner: Arc::new(LogWriterInner {
                tx,
                store,
                key: config.key.clone(),
                changes,
                handle: Mutex::new(Some(handle)),
            }),
        }
    }

    /// Queues an entry for appending. The returned write is ordered after every
    /// write submitted before it, from any clone of this writer.
    pub async fn submit(&self, entry: LogEntry) -> Result<PendingWrite, WriteError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Append(Box::new(entry), reply)).await?;
        Ok(PendingWrite { rx })
    }

    /// Appends an entry as the newest element of the log and waits for the
    /// store write. On error the entry is not part of the log.
    pub async fn append(&self, entry: LogEntry) -> Result<(), WriteError> {
        self.submit(entry).await?.committed().await
    }

    /// Empties the log. Ordered with appends like any other write.
    pub async fn clear(&self) -> Result<(), WriteError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Clear(reply)).await?;
        PendingWrite { rx }.committed().await
    }

    /// Reads the whole log, oldest first. Stored values that are not valid
    /// entries are skipped.
    pub async fn entries(&self) -> Result<Vec<LogEntry>, StoreError> {
        let logs = load_log(self.inner.store.as_ref(), &self.inner.key).await?;
        let entries = logs
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    tracing::warn!("skipping malformed log entry: {err}");
                    None
                }
            })
            .collect();
        Ok(entries)
    }

    /// The whole log together with the time it was exported.
    pub async fn snapshot(&self) -> Result<LogSnapshot, StoreError> {
        Ok(LogSnapshot {
            exported_at: now_iso(),
            logs: self.entries().await?,
        })
    }

    /// Receives the log length after every committed append or reset.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.inner.changes.clone()
    }

    /// Stops the worker once every write queued so far has been applied.
    /// Writes submitted afterwards fail with [`WriteError::Closed`].
    pub async fn shutdown(&self) {
        let _ = self.inner.tx.send(Command::Shutdown).await;
        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            tracing::error!("log writer task failed: {err}");
        }
    }

    async fn send(&self, cmd: Command) -> Result<(), WriteError> {
        self.inner
            .tx
            .send(cmd)
            .await
            .map_err(|_| WriteError::Closed)
    }
}

struct Worker {
    store: Arc<dyn KeyValueStore>,
    key: String,
    max_entries: usize,
    changes: watch::Sender<usize>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Command>) {
        match load_log(self.store.as_ref(), &self.key).await {
            Ok(logs) => {
                tracing::info!(entries = logs.len(), key = %self.key, "loaded request log");
                self.changes.send_replace(logs.len());
            }
            Err(err) => tracing::warn!("could not read request log at startup: {err}"),
        }

        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::Append(entry, reply) => {
                    let result = self.append(&entry).await;
                    if let Err(err) = &result {
                        counter!(LOG_WRITE_FAILED).increment(1);
                        tracing::error!(id = %entry.id, "failed to append log entry: {err}");
                    }
                    let _ = reply.send(result);
                }
                Command::Clear(reply) => {
                    let result = self.clear().await;
                    if let Err(err) = &result {
                        counter!(LOG_WRITE_FAILED).increment(1);
                        tracing::error!("failed to clear request log: {err}");
                    }
                    let _ = reply.send(result);
                }
                Command::Shutdown => break,
            }
        }

        tracing::debug!("log writer stopped");
    }

    async fn append(&self, entry: &LogEntry) -> Result<(), WriteError> {
        let started = Instant::now();
        let value = serde_json::to_value(entry)?;

        let mut logs = load_log(self.store.as_ref(), &self.key).await?;
        logs.push(value);
        let evicted = logs.len().saturating_sub(self.max_entries);
        logs.drain(..evicted);
        let len = logs.len();

        self.store.set(&self.key, Value::Array(logs)).await?;

        counter!(LOG_APPENDED).increment(1);
        if evicted > 0 {
            counter!(LOG_EVICTED).increment(evicted as u64);
        }
        histogram!(LOG_APPEND_DURATION).record(started.elapsed().as_secs_f64());
        self.changes.send_replace(len);
        Ok(())
    }

    async fn clear(&self) -> Result<(), WriteError> {
        self.store.set(&self.key, Value::Array(Vec::new())).await?;
        tracing::info!(key = %self.key, "cleared request log");
        self.changes.send_replace(0);
        Ok(())
    }
}

/// Reads the stored log. A missing value is an empty log, and so is a value that
/// isn't a list; the next append overwrites it.
async fn load_log(store: &dyn KeyValueStore, key: &str) -> Result<Vec<Value>, StoreError> {
    match store.get(key).await? {
        Some(Value::Array(logs)) => Ok(logs),
        Some(other) => {
            tracing::warn!(key, "stored log is not a list, treating as empty: {other}");
            Ok(Vec::new())
        }
        None => Ok(Vec::new()),
    }
}
