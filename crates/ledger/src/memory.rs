//! In-memory collaborators
//!
//! Simple directory and ban action implementations for embedding the ledger
//! without a host application, and for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::{
    BanAction, BanError, DirectoryError, DirectoryResult, ItemId, ItemRecord, UserDirectory,
    UserId, UserRecord,
};

/// Users and items held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    users: Arc<RwLock<HashMap<UserId, UserRecord>>>,
    items: Arc<RwLock<HashMap<ItemId, ItemRecord>>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: UserRecord) {
        self.users.write().await.insert(user.id.clone(), user);
    }

    pub async fn insert_item(&self, item: ItemRecord) {
        self.items.write().await.insert(item.id.clone(), item);
    }

    /// Flip a user's banned flag; unknown users are ignored
    pub async fn set_banned(&self, id: &UserId, banned: bool) {
        if let Some(user) = self.users.write().await.get_mut(id) {
            user.banned = banned;
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryDirectory {
    async fn get_user(&self, id: &UserId) -> DirectoryResult<UserRecord> {
        self.users
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::UserNotFound(id.clone()))
    }

    async fn get_item(&self, id: &ItemId) -> DirectoryResult<ItemRecord> {
        self.items
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DirectoryError::ItemNotFound(id.clone()))
    }
}

/// Ban action that flags users in a [`MemoryDirectory`] and records calls
#[derive(Debug, Clone, Default)]
pub struct MemoryBanAction {
    directory: MemoryDirectory,
    calls: Arc<Mutex<Vec<UserId>>>,
    fail: Arc<AtomicBool>,
}

impl MemoryBanAction {
    pub fn new(directory: MemoryDirectory) -> Self {
        Self {
            directory,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make subsequent bans fail (or succeed again)
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Users successfully banned, in order
    pub async fn calls(&self) -> Vec<UserId> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl BanAction for MemoryBanAction {
    async fn ban_user(&self, id: &UserId) -> Result<(), BanError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BanError::Failed {
                user: id.clone(),
                message: "ban action unavailable".to_string(),
            });
        }

        self.directory.set_banned(id, true).await;
        self.calls.lock().await.push(id.clone());
        Ok(())
    }
}
