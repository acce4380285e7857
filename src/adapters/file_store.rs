//! JSON file durable store
//!
//! Keeps the whole key space in one JSON object on disk. The file is read once
//! on first access and rewritten (temp file + rename) after every change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StorageError;
use crate::ports::DurableStore;

#[derive(Debug)]
pub struct FileDurableStore {
    path: PathBuf,
    max_bytes: Option<usize>,
    data: Mutex<Option<HashMap<String, String>>>,
}

impl FileDurableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: None,
            data: Mutex::new(None),
        }
    }

    /// Caps the serialized file size; writes beyond it fail with `QuotaExceeded`.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(path: &Path) -> Result<HashMap<String, String>, StorageError> {
        match tokio::fs::read(path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Store file missing, starting empty");
                Ok(HashMap::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn flush(&self, data: &HashMap<String, String>) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(data)?;
        if let Some(max) = self.max_bytes {
            if bytes.len() > max {
                return Err(StorageError::QuotaExceeded);
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl DurableStore for FileDurableStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut guard = self.data.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load(&self.path).await?);
        }
        Ok(guard.as_ref().and_then(|data| data.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut guard = self.data.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load(&self.path).await?);
        }
        let data = guard.get_or_insert_with(HashMap::new);

        let previous = data.insert(key.to_string(), value);
        if let Err(err) = self.flush(data).await {
            match previous {
                Some(old) => data.insert(key.to_string(), old),
                None => data.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self.data.lock().await;
        if guard.is_none() {
            *guard = Some(Self::load(&self.path).await?);
        }
        let data = guard.get_or_insert_with(HashMap::new);

        if data.remove(key).is_some() {
            self.flush(data).await?;
        }
        Ok(())
    }
}
