/// Durable key-value storage for the request log. Values are always read and
/// written whole; a store offers no partial updates and no transactions.
use crate::config::{Compression, StoreConfig};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if it was never set.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    /// Replaces the value stored under `key`.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

pub fn from_config(config: &StoreConfig) -> Arc<dyn KeyValueStore> {
    match config {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Filesystem {
            base_dir,
            compression,
        } => Arc::new(FilesystemStore::new(base_dir, *compression)),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }
}

struct Codec {
    compression: Compression,
}

impl Codec {
    fn new(compression: Compression) -> Self {
        Codec { compression }
    }

    fn extension(&self) -> &'static str {
        match self.compression.zstd_level() {
            Some(_) => "json.zst",
            None => "json",
        }
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, StoreError> {
        let json = serde_json::to_vec(value)?;
        match self.compression.zstd_level() {
            Some(level) => Ok(zstd::encode_all(json.as_slice(), level)?),
            None => Ok(json),
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Value, StoreError> {
        match self.compression.zstd_level() {
            Some(_) => {
                let json = zstd::decode_all(data)?;
                Ok(serde_json::from_slice(&json)?)
            }
            None => Ok(serde_json::from_slice(data)?),
        }
    }
}

/// Stores every key in its own file under `base_dir`.
///
/// Writes go to a uniquely named temporary file that is then renamed over the
/// previous value, so a reader never observes a half written file.
pub struct FilesystemStore {
    base_dir: PathBuf,
    codec: Codec,
}

impl FilesystemStore {
    pub fn new(base_dir: impl AsRef<Path>, compression: Compression) -> Self {
        FilesystemStore {
            base_dir: base_dir.as_ref().to_path_buf(),
            codec: Codec::new(compression),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name = format!("{key}.{}", self.codec.extension());
        self.base_dir.join(file_name)
    }
}

#[async_trait]
impl KeyValueStore for FilesystemStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let data = match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        self.codec.decode(&data).map(Some)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let data = self.codec.encode(&value)?;
        let path = self.path_for(key);
        let bytes = data.len();

        tokio::fs::create_dir_all(&self.base_dir).await?;

        // Every write gets its own temp file so that concurrent writers, possibly
        // in other processes, never share one.
        let base_dir = self.base_dir.clone();
        let prefix = format!(".{key}.");
        let target = path.clone();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut tmp = tempfile::Builder::new()
                .prefix(&prefix)
                .suffix(".tmp")
                .tempfile_in(&base_dir)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&target).map_err(|err| err.error)?;
            Ok(())
        })
        .await
        .map_err(|err| StoreError::Unavailable(err.to_string()))??;

        tracing::debug!(path = %path.display(), bytes, "stored value");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!([
            {"id": "r1", "method": "POST", "body": null},
            {"id": "r2", "method": "POST", "body": {"kind": "text", "data": "hello", "truncated": false}},
        ])
    }

    #[test]
    fn test_codec() {
        for compression in [Compression::None, Compression::Zstd1, Compression::Zstd3] {
            let codec = Codec::new(compression);
            let data = sample();
            let encoded = codec.encode(&data).unwrap();
            let decoded = codec.decode(&encoded).unwrap();
            assert_eq!(data, decoded);
        }
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.get("logs").await.unwrap().is_none());

        store.set("logs", sample()).await.unwrap();
        assert_eq!(store.get("logs").await.unwrap(), Some(sample()));

        store.set("logs", json!([])).await.unwrap();
        assert_eq!(store.get("logs").await.unwrap(), Some(json!([])));
        assert!(store.get("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_filesystem_store() {
        for compression in [Compression::None, Compression::Zstd1] {
            let dir = tempfile::tempdir().unwrap();
            // base dir is created on first write
            let base = dir.path().join("nested");
            let store = FilesystemStore::new(&base, compression);

            assert!(store.get("logs").await.unwrap().is_none());

            store.set("logs", sample()).await.unwrap();
            assert_eq!(store.get("logs").await.unwrap(), Some(sample()));

            store.set("logs", json!([])).await.unwrap();
            assert_eq!(store.get("logs").await.unwrap(), Some(json!([])));

            // only the final file remains
            let files: Vec<_> = std::fs::read_dir(&base)
                .unwrap()
                .map(|e| e.unwrap().file_name().into_string().unwrap())
                .collect();
            assert_eq!(files, vec![format!("logs.{}", store.codec.extension())]);
        }
    }

    #[tokio::test]
    async fn test_filesystem_corrupt_value() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("logs.json"), b"{not json").unwrap();

        let store = FilesystemStore::new(dir.path(), Compression::None);
        assert!(matches!(store.get("logs").await, Err(StoreError::Json(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_filesystem_concurrent_writers() {
        let dir = tempfile::tempdir().unwrap();
        let values: Vec<Value> = (0..2)
            .map(|writer| json!([{"writer": writer, "padding": "x".repeat(64 * 1024)}]))
            .collect();

        // separate instances, as two processes sharing one directory would have
        let tasks: Vec<_> = values
            .iter()
            .cloned()
            .map(|value| {
                let store = FilesystemStore::new(dir.path(), Compression::None);
                tokio::spawn(async move {
                    for _ in 0..20 {
                        store.set("logs", value.clone()).await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let store = FilesystemStore::new(dir.path(), Compression::None);
        let stored = store.get("logs").await.unwrap().unwrap();
        assert!(values.contains(&stored));

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files, vec!["logs.json".to_string()]);
    }

    #[tokio::test]
    async fn test_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = from_config(&StoreConfig::Filesystem {
            base_dir: dir.path().to_str().unwrap().into(),
            compression: Compression::None,
        });
        store.set("logs", sample()).await.unwrap();
        assert!(dir.path().join("logs.json").exists());

        let store = from_config(&StoreConfig::Memory);
        assert!(store.get("logs").await.unwrap().is_none());
    }
}
