//! Mock storage implementation for testing
//!
//! Wraps [`MemoryStorage`] with switches that make reads or writes fail, so
//! callers can exercise their storage-failure paths.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use super::{MemoryStorage, Storage, StorageError, StorageResult};

/// A memory-backed storage whose operations can be made to fail on demand
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    inner: MemoryStorage,
    fail_writes: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl MockStorage {
    /// Create a new MockStorage
    pub fn new() -> Self {
        Self::default()
    }
    
    /// Make every subsequent put/delete fail (or succeed again)
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
    
    /// Make every subsequent get/list/exists fail (or succeed again)
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
    
    /// Number of successful writes (put or delete) so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
    
    fn check_write(&self, key: &str) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("write rejected for {}", key)));
        }
        Ok(())
    }
    
    fn check_read(&self, key: &str) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!("read rejected for {}", key)));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MockStorage {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        self.check_write(key)?;
        self.inner.put(key, data).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.check_read(key)?;
        self.inner.get(key).await
    }
    
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.check_write(key)?;
        self.inner.delete(key).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.check_read(key)?;
        self.inner.exists(key).await
    }
    
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.check_read(prefix)?;
        self.inner.list(prefix).await
    }
    
    fn base_path(&self) -> Option<PathBuf> {
        None
    }
}
