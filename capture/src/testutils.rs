use crate::store::{KeyValueStore, MemoryStore, StoreError};
use crate::types::{BodyContent, DecodedBody, Header, LogEntry};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

pub fn entry(id: &str) -> LogEntry {
    LogEntry {
        id: id.into(),
        timestamp: "2026-01-01T00:00:00.000Z".into(),
        url: format!("https://example.com/{id}"),
        method: "POST".into(),
        headers: vec![Header::new("Content-Type", "text/plain")],
        body: Some(DecodedBody::new(BodyContent::Text(id.into()), false)),
    }
}

/// Memory store whose writes can be switched to fail.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        self.inner.set(key, value).await
    }
}

/// Memory store that yields to the scheduler around every operation, which
/// gives overlapping read-modify-write cycles a chance to interleave.
#[derive(Default)]
pub struct SlowStore {
    inner: MemoryStore,
}

impl SlowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for SlowStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        tokio::task::yield_now().await;
        let value = self.inner.get(key).await;
        tokio::task::yield_now().await;
        value
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        self.inner.set(key, value).await
    }
}
