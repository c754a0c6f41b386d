//! Vote audit log
//!
//! Each applied vote leaves one live entry keyed by (voter, author, item)
//! recording exactly what was applied. Undoing the vote consumes the entry;
//! consumed entries are kept as history, never erased.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use repledger_core::{key_segment, timestamp_ms, JsonStorage, Storage, StorageError};

use crate::{ItemId, ThreadId, UserId, VoteState};

const LIVE_PATH: &str = "votes/live";
const UNDONE_PATH: &str = "votes/undone";

/// Kind of an applied vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteKind {
    Upvote,
    Downvote,
}

impl VoteKind {
    /// The vote state a live entry of this kind stands for
    pub fn state(self) -> VoteState {
        match self {
            VoteKind::Upvote => VoteState::Upvoted,
            VoteKind::Downvote => VoteState::Downvoted,
        }
    }
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteKind::Upvote => f.write_str("upvote"),
            VoteKind::Downvote => f.write_str("downvote"),
        }
    }
}

/// Identifies the single live entry a (voter, author, item) triple may have
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuditKey {
    pub voter: UserId,
    pub author: UserId,
    pub item: ItemId,
}

impl AuditKey {
    pub fn new(voter: UserId, author: UserId, item: ItemId) -> Self {
        Self { voter, author, item }
    }

    fn path(&self) -> String {
        format!(
            "{}/{}/{}",
            key_segment(self.voter.as_str()),
            key_segment(self.author.as_str()),
            key_segment(self.item.as_str()),
        )
    }

    fn live_path(&self) -> String {
        format!("{}/{}", LIVE_PATH, self.path())
    }

    fn undone_prefix(&self) -> String {
        format!("{}/{}/", UNDONE_PATH, self.path())
    }
}

impl fmt::Display for AuditKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voter={} author={} item={}", self.voter, self.author, self.item)
    }
}

/// One applied vote effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteAuditEntry {
    /// When the vote was applied (milliseconds since the epoch)
    pub timestamp: u64,
    pub voter: UserId,
    pub author: UserId,
    pub thread: ThreadId,
    pub item: ItemId,
    pub kind: VoteKind,
    /// Reputation delta that was applied: the author's gain for an upvote,
    /// the voter's (negative) cost for a downvote
    pub amount: i64,
    /// Set once the entry has been consumed by an undo
    #[serde(default)]
    pub undone_at: Option<u64>,
}

impl VoteAuditEntry {
    pub fn new(key: AuditKey, thread: ThreadId, kind: VoteKind, amount: i64) -> Self {
        Self {
            timestamp: timestamp_ms(),
            voter: key.voter,
            author: key.author,
            thread,
            item: key.item,
            kind,
            amount,
            undone_at: None,
        }
    }

    pub fn key(&self) -> AuditKey {
        AuditKey::new(self.voter.clone(), self.author.clone(), self.item.clone())
    }

    pub fn is_live(&self) -> bool {
        self.undone_at.is_none()
    }
}

/// Errors raised by the audit log
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for audit log operations
pub type AuditResult<T> = Result<T, AuditError>;

/// Append-only record of applied vote effects
#[async_trait]
pub trait VoteAuditLog: Send + Sync {
    /// Record a newly applied vote. A live entry already present for the same
    /// key is retracted first.
    async fn record_vote(&self, entry: VoteAuditEntry) -> AuditResult<()>;

    /// The live entry for a key, if any
    async fn find_live_entry(&self, key: &AuditKey) -> AuditResult<Option<VoteAuditEntry>>;

    /// Atomically return and retract the live entry for a key. Of two
    /// concurrent calls for the same key at most one gets `Some`.
    async fn consume(&self, key: &AuditKey) -> AuditResult<Option<VoteAuditEntry>>;
}

/// [`VoteAuditLog`] persisted through a [`Storage`]
///
/// The in-memory view is authoritative while the process runs: a failed
/// write is reported as an error but the memory change stands, so undo
/// always sees what was actually applied.
pub struct StoredAuditLog {
    storage: Arc<dyn Storage>,
    live: RwLock<HashMap<AuditKey, VoteAuditEntry>>,
    undo_seq: AtomicU64,
}

impl StoredAuditLog {
    /// Open the log, reloading all live entries
    pub async fn open(storage: Arc<dyn Storage>) -> AuditResult<Self> {
        let keys = storage.list(LIVE_PATH).await?;
        let mut live = HashMap::with_capacity(keys.len());
        for key in keys {
            match storage.get_json::<VoteAuditEntry>(&key).await {
                Ok(entry) => {
                    live.insert(entry.key(), entry);
                }
                Err(e) => error!("Failed to load vote log {}: {}", key, e),
            }
        }

        info!("Loaded {} live vote log entries", live.len());
        Ok(Self {
            storage,
            live: RwLock::new(live),
            undo_seq: AtomicU64::new(0),
        })
    }

    /// Live entries cast by a voter
    pub async fn live_entries_for_voter(&self, voter: &UserId) -> Vec<VoteAuditEntry> {
        let live = self.live.read().await;
        let mut entries: Vec<_> = live.values().filter(|e| &e.voter == voter).cloned().collect();
        entries.sort_by_key(|e| e.timestamp);
        entries
    }

    /// Live entries on an item
    pub async fn live_entries_for_item(&self, item: &ItemId) -> Vec<VoteAuditEntry> {
        let live = self.live.read().await;
        let mut entries: Vec<_> = live.values().filter(|e| &e.item == item).cloned().collect();
        entries.sort_by_key(|e| e.timestamp);
        entries
    }

    /// Every entry ever recorded for a key, oldest first, live entry last
    pub async fn history(&self, key: &AuditKey) -> AuditResult<Vec<VoteAuditEntry>> {
        let mut entries = Vec::new();
        for path in self.storage.list(&key.undone_prefix()).await? {
            entries.push(self.storage.get_json::<VoteAuditEntry>(&path).await?);
        }
        entries.sort_by_key(|e| (e.timestamp, e.undone_at));

        if let Some(entry) = self.live.read().await.get(key) {
            entries.push(entry.clone());
        }
        Ok(entries)
    }

    async fn archive(&self, mut entry: VoteAuditEntry) -> AuditResult<()> {
        let key = entry.key();
        let undone_at = timestamp_ms();
        entry.undone_at = Some(undone_at);
        let seq = self.undo_seq.fetch_add(1, Ordering::SeqCst);
        let path = format!("{}{:020}-{:010}", key.undone_prefix(), undone_at, seq);

        self.storage.put_json(&path, &entry).await?;
        self.storage.delete(&key.live_path()).await?;
        debug!("Archived {} entry for {}", entry.kind, key);
        Ok(())
    }
}

#[async_trait]
impl VoteAuditLog for StoredAuditLog {
    async fn record_vote(&self, entry: VoteAuditEntry) -> AuditResult<()> {
        let key = entry.key();
        let replaced = {
            let mut live = self.live.write().await;
            live.insert(key.clone(), entry.clone())
        };

        if let Some(previous) = replaced {
            warn!("Retracting unconsumed {} entry for {} before recording a new vote", previous.kind, key);
            self.archive(previous).await?;
        }

        self.storage.put_json(&key.live_path(), &entry).await?;
        debug!("Recorded {} of {} for {}", entry.kind, entry.amount, key);
        Ok(())
    }

    async fn find_live_entry(&self, key: &AuditKey) -> AuditResult<Option<VoteAuditEntry>> {
        Ok(self.live.read().await.get(key).cloned())
    }

    async fn consume(&self, key: &AuditKey) -> AuditResult<Option<VoteAuditEntry>> {
        let taken = self.live.write().await.remove(key);

        match taken {
            Some(entry) => {
                self.archive(entry.clone()).await?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}
