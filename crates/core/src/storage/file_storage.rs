use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use async_trait::async_trait;
use tracing::{debug, trace};

use super::{Storage, StorageError, StorageOptions, StorageResult};

/// A file-based storage implementation, one file per key
pub struct FileStorage {
    base_path: PathBuf,
    options: StorageOptions,
    cache: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl FileStorage {
    /// Open (creating if needed) a file storage rooted at `base_path`
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = base_path.into();
        fs::create_dir_all(&path).await?;
        
        Ok(Self {
            base_path: path,
            options: StorageOptions::default(),
            cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }
    
    /// Set storage options
    pub fn with_options(mut self, options: StorageOptions) -> Self {
        self.options = options;
        self
    }
    
    fn get_path(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.base_path.clone(), |path, segment| path.join(segment))
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.base_path).ok()?;
        let segments: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(segments.join("/"))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.get_path(key);
        
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        
        if self.options.sync_write {
            file.sync_all().await?;
        }
        
        if self.options.use_cache {
            let mut cache = self.cache.write().await;
            cache.insert(key.to_string(), data.to_vec());
        }
        
        debug!("Stored data at key: {}", key);
        Ok(())
    }
    
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        if self.options.use_cache {
            let cache = self.cache.read().await;
            if let Some(data) = cache.get(key) {
                trace!("Retrieved data from cache for key: {}", key);
                return Ok(data.clone());
            }
        }
        
        let path = self.get_path(key);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::KeyNotFound(key.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        
        if self.options.use_cache {
            let mut cache = self.cache.write().await;
            cache.insert(key.to_string(), data.clone());
        }
        
        trace!("Retrieved data for key: {}", key);
        Ok(data)
    }
    
    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.get_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => debug!("Deleted key: {}", key),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        
        if self.options.use_cache {
            let mut cache = self.cache.write().await;
            cache.remove(key);
        }
        
        Ok(())
    }
    
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        if self.options.use_cache && self.cache.read().await.contains_key(key) {
            return Ok(true);
        }
        
        Ok(fs::metadata(self.get_path(key)).await.is_ok())
    }
    
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let root = self.get_path(prefix);
        debug!("Listing keys with prefix: {}", prefix);
        
        let metadata = match fs::metadata(&root).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        
        if !metadata.is_dir() {
            return Err(StorageError::NotADirectory(prefix.to_string()));
        }
        
        let mut result = Vec::new();
        let mut pending = vec![root];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if let Some(key) = self.key_for(&path) {
                    result.push(key);
                }
            }
        }
        
        result.sort();
        Ok(result)
    }
    
    fn base_path(&self) -> Option<PathBuf> {
        Some(self.base_path.clone())
    }
}
