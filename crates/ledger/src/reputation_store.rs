//! Reputation storage and the reputation-ranked index
//!
//! The store is the only place reputation numbers live. Every mutation is
//! persisted through [`Storage`] before it becomes visible, and the ranking
//! index is updated in the same step.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use repledger_core::{key_segment, timestamp_secs, JsonStorage, Storage, StorageError};

use crate::UserId;

const USERS_PATH: &str = "reputation/users";

/// Errors raised by the reputation backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for reputation store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// A user's position in the ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedUser {
    pub user: UserId,
    pub reputation: i64,
}

/// Atomic reputation reads and mutations plus the ranking index
#[async_trait]
pub trait ReputationStore: Send + Sync {
    /// Current reputation of a user; unknown users have 0
    async fn reputation(&self, user: &UserId) -> StoreResult<i64>;

    /// Add `amount` and return the new value. Non-positive amounts are a no-op.
    async fn increment(&self, user: &UserId, amount: i64) -> StoreResult<i64>;

    /// Subtract `amount` and return the new value. Non-positive amounts are a no-op.
    async fn decrement(&self, user: &UserId, amount: i64) -> StoreResult<i64>;

    /// Highest-reputation users first
    async fn top(&self, limit: usize) -> StoreResult<Vec<RankedUser>>;

    /// 1-based rank of a user, if they are indexed
    async fn rank(&self, user: &UserId) -> StoreResult<Option<usize>>;
}

/// Users ordered by reputation (descending), ties broken by first insertion
#[derive(Debug, Default)]
pub struct RankingIndex {
    ordered: BTreeSet<(Reverse<i64>, u64, UserId)>,
    positions: HashMap<UserId, (i64, u64)>,
}

impl RankingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or move a user. `seq` only matters on first insertion.
    pub fn update(&mut self, user: &UserId, reputation: i64, seq: u64) {
        let seq = match self.positions.get(user) {
            Some(&(old, old_seq)) => {
                self.ordered.remove(&(Reverse(old), old_seq, user.clone()));
                old_seq
            }
            None => seq,
        };
        self.ordered.insert((Reverse(reputation), seq, user.clone()));
        self.positions.insert(user.clone(), (reputation, seq));
    }

    pub fn top(&self, limit: usize) -> Vec<RankedUser> {
        self.ordered
            .iter()
            .take(limit)
            .map(|(Reverse(reputation), _, user)| RankedUser {
                user: user.clone(),
                reputation: *reputation,
            })
            .collect()
    }

    pub fn rank(&self, user: &UserId) -> Option<usize> {
        let &(reputation, seq) = self.positions.get(user)?;
        let ahead = self
            .ordered
            .range(..(Reverse(reputation), seq, user.clone()))
            .count();
        Some(ahead + 1)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Persisted form of a user's reputation
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReputationRecord {
    user: UserId,
    reputation: i64,
    /// Order of first appearance, used to break ranking ties
    seq: u64,
    updated_at: u64,
}

#[derive(Debug)]
struct UserCell {
    reputation: i64,
    seq: u64,
}

/// [`ReputationStore`] backed by a [`Storage`], with one lock per user
pub struct StoredReputationStore {
    storage: Arc<dyn Storage>,
    cells: RwLock<HashMap<UserId, Arc<Mutex<UserCell>>>>,
    index: RwLock<RankingIndex>,
    next_seq: AtomicU64,
}

impl StoredReputationStore {
    /// Open the store, reloading every persisted reputation
    pub async fn open(storage: Arc<dyn Storage>) -> StoreResult<Self> {
        let keys = storage.list(USERS_PATH).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            match storage.get_json::<ReputationRecord>(&key).await {
                Ok(record) => records.push(record),
                Err(e) => error!("Failed to load reputation record {}: {}", key, e),
            }
        }
        records.sort_by_key(|r| r.seq);

        let mut cells = HashMap::with_capacity(records.len());
        let mut index = RankingIndex::new();
        let mut next_seq = 0;
        for record in records {
            index.update(&record.user, record.reputation, record.seq);
            next_seq = next_seq.max(record.seq + 1);
            cells.insert(
                record.user,
                Arc::new(Mutex::new(UserCell {
                    reputation: record.reputation,
                    seq: record.seq,
                })),
            );
        }

        info!("Loaded {} reputation records", cells.len());
        Ok(Self {
            storage,
            cells: RwLock::new(cells),
            index: RwLock::new(index),
            next_seq: AtomicU64::new(next_seq),
        })
    }

    /// Set a user's reputation outright, e.g. when importing existing users
    pub async fn seed(&self, user: &UserId, reputation: i64) -> StoreResult<i64> {
        let cell = self.cell(user).await;
        let mut cell = cell.lock().await;
        self.commit(user, &mut cell, reputation).await
    }

    /// Number of users the store knows about
    pub async fn user_count(&self) -> usize {
        self.cells.read().await.len()
    }

    async fn cell(&self, user: &UserId) -> Arc<Mutex<UserCell>> {
        if let Some(cell) = self.cells.read().await.get(user) {
            return cell.clone();
        }

        let mut cells = self.cells.write().await;
        cells
            .entry(user.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(UserCell {
                    reputation: 0,
                    seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                }))
            })
            .clone()
    }

    /// Persist first, then publish to memory and the index
    async fn commit(&self, user: &UserId, cell: &mut UserCell, reputation: i64) -> StoreResult<i64> {
        let record = ReputationRecord {
            user: user.clone(),
            reputation,
            seq: cell.seq,
            updated_at: timestamp_secs(),
        };
        let key = format!("{}/{}", USERS_PATH, key_segment(user.as_str()));
        self.storage.put_json(&key, &record).await?;

        cell.reputation = reputation;
        self.index.write().await.update(user, reputation, cell.seq);
        Ok(reputation)
    }

    async fn apply(&self, user: &UserId, delta: i64) -> StoreResult<i64> {
        let cell = self.cell(user).await;
        let mut cell = cell.lock().await;
        let reputation = cell.reputation.saturating_add(delta);
        let reputation = self.commit(user, &mut cell, reputation).await?;
        debug!("Reputation of {} changed by {} to {}", user, delta, reputation);
        Ok(reputation)
    }
}

#[async_trait]
impl ReputationStore for StoredReputationStore {
    async fn reputation(&self, user: &UserId) -> StoreResult<i64> {
        let cell = match self.cells.read().await.get(user) {
            Some(cell) => cell.clone(),
            None => return Ok(0),
        };
        let reputation = cell.lock().await.reputation;
        Ok(reputation)
    }

    async fn increment(&self, user: &UserId, amount: i64) -> StoreResult<i64> {
        if amount <= 0 {
            return self.reputation(user).await;
        }
        self.apply(user, amount).await
    }

    async fn decrement(&self, user: &UserId, amount: i64) -> StoreResult<i64> {
        if amount <= 0 {
            return self.reputation(user).await;
        }
        self.apply(user, -amount).await
    }

    async fn top(&self, limit: usize) -> StoreResult<Vec<RankedUser>> {
        Ok(self.index.read().await.top(limit))
    }

    async fn rank(&self, user: &UserId) -> StoreResult<Option<usize>> {
        Ok(self.index.read().await.rank(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repledger_core::{MemoryStorage, MockStorage};

    fn uid(id: &str) -> UserId {
        UserId::new(id)
    }

    #[test]
    fn test_ranking_ties_keep_insertion_order() {
        let mut index = RankingIndex::new();
        index.update(&uid("a"), 10, 0);
        index.update(&uid("b"), 20, 1);
        index.update(&uid("c"), 10, 2);

        let names: Vec<_> = index.top(10).into_iter().map(|r| r.user).collect();
        assert_eq!(names, vec![uid("b"), uid("a"), uid("c")]);

        // moving "a" keeps its original tie-break slot
        index.update(&uid("a"), 5, 99);
        index.update(&uid("a"), 10, 99);
        assert_eq!(index.rank(&uid("a")), Some(2));
        assert_eq!(index.rank(&uid("c")), Some(3));
        assert_eq!(index.rank(&uid("missing")), None);
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_increment_decrement_and_ranking() {
        let store = StoredReputationStore::open(Arc::new(MemoryStorage::new())).await.unwrap();

        assert_eq!(store.reputation(&uid("alice")).await.unwrap(), 0);
        assert_eq!(store.increment(&uid("alice"), 5).await.unwrap(), 5);
        assert_eq!(store.decrement(&uid("bob"), 1).await.unwrap(), -1);
        assert_eq!(store.increment(&uid("carol"), 7).await.unwrap(), 7);

        let top = store.top(2).await.unwrap();
        assert_eq!(top[0], RankedUser { user: uid("carol"), reputation: 7 });
        assert_eq!(top[1], RankedUser { user: uid("alice"), reputation: 5 });
        assert_eq!(store.rank(&uid("bob")).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_non_positive_amounts_are_noops() {
        let storage = MockStorage::new();
        let store = StoredReputationStore::open(Arc::new(storage.clone())).await.unwrap();
        store.seed(&uid("alice"), 10).await.unwrap();
        let writes = storage.write_count();

        assert_eq!(store.increment(&uid("alice"), 0).await.unwrap(), 10);
        assert_eq!(store.increment(&uid("alice"), -3).await.unwrap(), 10);
        assert_eq!(store.decrement(&uid("alice"), -3).await.unwrap(), 10);
        assert_eq!(storage.write_count(), writes);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_reputation_unchanged() {
        let storage = MockStorage::new();
        let store = StoredReputationStore::open(Arc::new(storage.clone())).await.unwrap();
        store.seed(&uid("alice"), 10).await.unwrap();

        storage.fail_writes(true);
        assert!(matches!(
            store.increment(&uid("alice"), 5).await,
            Err(StoreError::Storage(StorageError::Unavailable(_)))
        ));
        assert_eq!(store.reputation(&uid("alice")).await.unwrap(), 10);
        assert_eq!(store.top(1).await.unwrap()[0].reputation, 10);
    }

    #[tokio::test]
    async fn test_reopen_restores_values_and_tie_order() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        {
            let store = StoredReputationStore::open(storage.clone()).await.unwrap();
            store.seed(&uid("first"), 3).await.unwrap();
            store.seed(&uid("second"), 3).await.unwrap();
            store.increment(&uid("third/with-slash"), 8).await.unwrap();
        }

        let store = StoredReputationStore::open(storage).await.unwrap();
        assert_eq!(store.user_count().await, 3);
        assert_eq!(store.reputation(&uid("third/with-slash")).await.unwrap(), 8);

        let names: Vec<_> = store.top(3).await.unwrap().into_iter().map(|r| r.user).collect();
        assert_eq!(names, vec![uid("third/with-slash"), uid("first"), uid("second")]);

        // new users are ordered after reloaded ones
        store.seed(&uid("fourth"), 3).await.unwrap();
        assert_eq!(store.rank(&uid("fourth")).await.unwrap(), Some(4));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(StoredReputationStore::open(Arc::new(MemoryStorage::new())).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment(&uid("alice"), 2).await.unwrap();
                store.decrement(&uid("alice"), 1).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.reputation(&uid("alice")).await.unwrap(), 50);
    }
}
