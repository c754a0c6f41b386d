use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Storage, StorageError, StorageResult};

/// In-memory storage, ordered by key so prefix listings come back sorted
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Create a new empty memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether the storage holds no keys
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let mut store = self.data.write().await;
        store.insert(key.to_string(), data.to_vec());
        Ok(())
    }
    
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let store = self.data.read().await;
        store.get(key)
            .cloned()
            .ok_or_else(|| StorageError::KeyNotFound(key.to_string()))
    }
    
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut store = self.data.write().await;
        store.remove(key);
        Ok(())
    }
    
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let store = self.data.read().await;
        Ok(store.contains_key(key))
    }
    
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let store = self.data.read().await;
        let keys = store
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        Ok(keys)
    }
    
    fn base_path(&self) -> Option<PathBuf> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonStorage;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        user: String,
        reputation: i64,
    }

    #[tokio::test]
    async fn test_memory_storage_basic_operations() {
        let storage = MemoryStorage::new();
        
        storage.put("reputation/users/1", b"10").await.unwrap();
        assert_eq!(storage.get("reputation/users/1").await.unwrap(), b"10");
        
        storage.put("reputation/users/1", b"11").await.unwrap();
        assert_eq!(storage.get("reputation/users/1").await.unwrap(), b"11");
        
        assert!(storage.exists("reputation/users/1").await.unwrap());
        assert!(!storage.exists("reputation/users/2").await.unwrap());
        
        storage.delete("reputation/users/1").await.unwrap();
        assert!(storage.is_empty().await);
        assert!(matches!(
            storage.get("reputation/users/1").await,
            Err(StorageError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_prefix_bounded() {
        let storage = MemoryStorage::new();
        storage.put("votes/live/b", b"2").await.unwrap();
        storage.put("votes/live/a", b"1").await.unwrap();
        storage.put("votes/undone/a", b"3").await.unwrap();
        storage.put("reputation/users/a", b"4").await.unwrap();

        let keys = storage.list("votes/live/").await.unwrap();
        assert_eq!(keys, vec!["votes/live/a".to_string(), "votes/live/b".to_string()]);
        assert_eq!(storage.len().await, 4);
    }
    
    #[tokio::test]
    async fn test_json_storage() {
        let storage = MemoryStorage::new();
        let record = Record { user: "alice".to_string(), reputation: -3 };
        
        storage.put_json("reputation/users/alice", &record).await.unwrap();
        
        let retrieved: Record = storage.get_json("reputation/users/alice").await.unwrap();
        assert_eq!(retrieved, record);
    }
}
