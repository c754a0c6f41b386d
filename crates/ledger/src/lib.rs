//! Vote-driven reputation ledger
//!
//! This crate turns up/down/unvote commands into reputation changes for the
//! voter and the item's author. Every applied effect is written to an audit
//! log so it can later be undone exactly, and reputation decreases feed an
//! automatic ban check.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from anything string-like
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of a user (voter or author)
    UserId
);
string_id!(
    /// Identifier of a votable item (a post)
    ItemId
);
string_id!(
    /// Identifier of the thread an item belongs to
    ThreadId
);

/// Vote state of a (voter, item) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VoteState {
    /// No vote cast
    #[default]
    None,
    /// The voter currently upvotes the item
    Upvoted,
    /// The voter currently downvotes the item
    Downvoted,
}

/// What the voter asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteAction {
    Upvote,
    Downvote,
    Unvote,
}

/// An inbound vote command from the hosting application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCommand {
    /// The user casting the vote
    pub voter: UserId,
    /// The item being voted on
    pub item: ItemId,
    /// The caller's belief about the state before this command
    pub current: VoteState,
    /// The requested action
    pub action: VoteAction,
}

impl VoteCommand {
    pub fn new(
        voter: impl Into<UserId>,
        item: impl Into<ItemId>,
        current: VoteState,
        action: VoteAction,
    ) -> Self {
        Self {
            voter: voter.into(),
            item: item.into(),
            current,
            action,
        }
    }

    pub fn upvote(voter: impl Into<UserId>, item: impl Into<ItemId>, current: VoteState) -> Self {
        Self::new(voter, item, current, VoteAction::Upvote)
    }

    pub fn downvote(voter: impl Into<UserId>, item: impl Into<ItemId>, current: VoteState) -> Self {
        Self::new(voter, item, current, VoteAction::Downvote)
    }

    pub fn unvote(voter: impl Into<UserId>, item: impl Into<ItemId>, current: VoteState) -> Self {
        Self::new(voter, item, current, VoteAction::Unvote)
    }
}

/// A user as resolved through the host's user directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: UserId,
    /// Reputation as last known; the ledger refreshes this from its store
    pub reputation: i64,
    pub banned: bool,
}

impl UserRecord {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            reputation: 0,
            banned: false,
        }
    }
}

/// An item (post) as resolved through the host's content directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub thread: ThreadId,
    pub author: UserId,
}

impl ItemRecord {
    pub fn new(
        id: impl Into<ItemId>,
        thread: impl Into<ThreadId>,
        author: impl Into<UserId>,
    ) -> Self {
        Self {
            id: id.into(),
            thread: thread.into(),
            author: author.into(),
        }
    }
}

/// Errors raised while resolving users or items
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    #[error("Directory backend error: {0}")]
    Backend(String),
}

/// Result type for directory lookups
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Errors raised by the host's ban action
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BanError {
    #[error("Ban action failed for {user}: {message}")]
    Failed { user: UserId, message: String },
}

/// User and item resolution provided by the hosting application
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve a user by identifier
    async fn get_user(&self, id: &UserId) -> DirectoryResult<UserRecord>;

    /// Resolve an item by identifier
    async fn get_item(&self, id: &ItemId) -> DirectoryResult<ItemRecord>;
}

/// The host's administrative ban action
#[async_trait]
pub trait BanAction: Send + Sync {
    async fn ban_user(&self, id: &UserId) -> Result<(), BanError>;
}

/// User-visible errors of a vote command
#[derive(Error, Debug)]
pub enum VoteError {
    /// The eligibility policy refused the vote; nothing was mutated
    #[error("Vote not allowed: {reason}")]
    PolicyDenied { reason: DenialReason },

    /// The reputation backend failed; the transition was aborted
    #[error("Reputation store failure: {0}")]
    StoreFailure(#[from] StoreError),

    /// The voter or the item could not be resolved; nothing was mutated
    #[error("Lookup failed: {0}")]
    Lookup(#[from] DirectoryError),
}

/// Result type for vote commands
pub type VoteResult<T> = Result<T, VoteError>;

pub mod audit_log;
pub mod ban_trigger;
pub mod eligibility;
pub mod locks;
pub mod memory;
pub mod reputation_store;
pub mod vote_ledger;
pub mod weight;

// Re-exports
pub use audit_log::{AuditError, AuditKey, AuditResult, StoredAuditLog, VoteAuditEntry, VoteAuditLog, VoteKind};
pub use ban_trigger::{BanTrigger, BanTriggerStats};
pub use eligibility::{DenialReason, Eligibility, EligibilityPolicy, OpenPolicy};
pub use locks::KeyedLocks;
pub use memory::{MemoryBanAction, MemoryDirectory};
pub use reputation_store::{RankedUser, RankingIndex, ReputationStore, StoreError, StoreResult, StoredReputationStore};
pub use vote_ledger::{LedgerFault, LedgerParts, VoteLedger, VoteOutcome};
pub use weight::{TieredWeightPolicy, WeightPolicy, DOWNVOTE_COST};
