//! Opaque ordered key/value store interface
//!
//! All values are canonical JSON strings; iteration is by prefix, ordered by
//! key. Batches apply atomically and never span an RPC await.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone)]
pub(crate) enum KvOp {
    Put { key: String, value: String },
    Delete { key: String },
}

/// A set of writes applied in one transaction
#[derive(Debug, Clone, Default)]
pub struct KvBatch {
    pub(crate) ops: Vec<KvOp>,
}

impl KvBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(KvOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn put_json<T: Serialize>(self, key: impl Into<String>, value: &T) -> Result<Self> {
        let encoded = serde_json::to_string(value)?;
        Ok(self.put(key, encoded))
    }

    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(KvOp::Delete { key: key.into() });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// All pairs whose key starts with `prefix`, ordered by key
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;
    /// Apply a batch atomically
    async fn apply(&self, batch: KvBatch) -> Result<()>;
}

pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let encoded = serde_json::to_string(value)?;
    store.put(key, &encoded).await
}

/// Smallest string strictly greater than every key with this prefix, used to
/// turn prefix scans into range scans
pub(crate) fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut bytes = prefix.as_bytes().to_vec();
    while let Some(last) = bytes.last_mut() {
        if *last < 0xFF {
            *last += 1;
            // Bumping an ASCII byte keeps the vec valid UTF-8; our key
            // alphabet is ASCII throughout
            return String::from_utf8(bytes).ok();
        }
        bytes.pop();
    }
    None
}
