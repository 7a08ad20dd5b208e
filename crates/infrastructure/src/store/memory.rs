use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::kv::{KvBatch, KvOp, KvStore};

/// BTreeMap-backed store for tests and ephemeral deployments
#[derive(Default)]
pub struct MemoryKvStore {
    inner: RwLock<BTreeMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let map = self.inner.read().await;
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn apply(&self, batch: KvBatch) -> Result<()> {
        let mut map = self.inner.write().await;
        for op in batch.ops {
            match op {
                KvOp::Put { key, value } => {
                    map.insert(key, value);
                }
                KvOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryKvStore::new();
        store.put("device:aa:state", "{}").await.unwrap();
        assert_eq!(
            store.get("device:aa:state").await.unwrap().as_deref(),
            Some("{}")
        );
        store.delete("device:aa:state").await.unwrap();
        assert!(store.get("device:aa:state").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_scan_prefix_is_ordered() {
        let store = MemoryKvStore::new();
        store.put("event:2:b", "2").await.unwrap();
        store.put("event:1:a", "1").await.unwrap();
        store.put("session:x", "s").await.unwrap();
        store.put("event:3:c", "3").await.unwrap();

        let rows = store.scan_prefix("event:").await.unwrap();
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["event:1:a", "event:2:b", "event:3:c"]);
    }

    #[tokio::test]
    async fn test_batch_applies_all_or_nothing_shape() {
        let store = MemoryKvStore::new();
        store.put("a", "old").await.unwrap();
        let batch = KvBatch::new().put("a", "new").put("b", "1").delete("missing");
        store.apply(batch).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("new"));
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("1"));
    }
}
