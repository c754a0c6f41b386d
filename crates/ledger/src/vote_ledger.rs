//! The vote ledger
//!
//! Implements the vote state machine over (voter, item) pairs:
//!
//! | Current   | Command  | Effect                                   | New state |
//! |-----------|----------|------------------------------------------|-----------|
//! | None      | Upvote   | author += weight(voter), log upvote      | Upvoted   |
//! | None      | Downvote | voter -= 1, log downvote                 | Downvoted |
//! | Downvoted | Upvote   | undo downvote, then None -> Upvote       | Upvoted   |
//! | Upvoted   | Downvote | undo upvote, then None -> Downvote       | Downvoted |
//! | any       | Unvote   | undo the live vote, if any               | None      |
//!
//! Switching is always "undo, then apply", and every undo reverses the amount
//! read back from the audit entry, never a recomputed weight. A live entry
//! found where the caller claimed None is reported and reversed before the
//! new vote applies.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use repledger_config::{LedgerConfig, RulesConfig};

use crate::audit_log::{AuditKey, VoteAuditEntry, VoteAuditLog, VoteKind};
use crate::ban_trigger::{BanTrigger, BanTriggerStats};
use crate::eligibility::{Eligibility, EligibilityPolicy, OpenPolicy};
use crate::locks::KeyedLocks;
use crate::reputation_store::{RankedUser, ReputationStore};
use crate::weight::{TieredWeightPolicy, WeightPolicy, DOWNVOTE_COST};
use crate::{
    BanAction, ItemId, ItemRecord, UserDirectory, UserId, UserRecord, VoteAction, VoteCommand,
    VoteError, VoteResult, VoteState,
};

/// Something that went wrong during a vote without failing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerFault {
    /// The audit log disagreed with the believed state: an undo of `expected`
    /// found `found` instead, or applying `expected` found a leftover `found`
    ConsistencyFault {
        expected: VoteKind,
        found: Option<VoteKind>,
    },
    /// The audit log could not persist a write; reputation was kept
    AuditWriteFailure { message: String },
}

/// What a vote command actually did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteOutcome {
    /// State the transition started from
    pub previous: VoteState,
    /// State after the transition
    pub state: VoteState,
    /// Net reputation change applied to the voter
    pub voter_delta: i64,
    /// Net reputation change applied to the item's author
    pub author_delta: i64,
    /// Problems logged while the vote still went through
    pub faults: Vec<LedgerFault>,
}

impl VoteOutcome {
    fn new(previous: VoteState) -> Self {
        Self {
            previous,
            state: previous,
            voter_delta: 0,
            author_delta: 0,
            faults: Vec::new(),
        }
    }
}

/// Everything a transition touched, collected while the pair is locked
struct Transition {
    outcome: VoteOutcome,
    /// (user, new reputation) for every decrease, reported after unlocking
    decreases: Vec<(UserId, i64)>,
}

/// Collaborators the ledger is built from
pub struct LedgerParts {
    pub directory: Arc<dyn UserDirectory>,
    pub store: Arc<dyn ReputationStore>,
    pub audit_log: Arc<dyn VoteAuditLog>,
    pub ban_action: Arc<dyn BanAction>,
    pub eligibility: Arc<dyn EligibilityPolicy>,
    /// Defaults to a [`TieredWeightPolicy`] built from the configuration
    pub weight: Option<Arc<dyn WeightPolicy>>,
}

impl LedgerParts {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn ReputationStore>,
        audit_log: Arc<dyn VoteAuditLog>,
        ban_action: Arc<dyn BanAction>,
    ) -> Self {
        Self {
            directory,
            store,
            audit_log,
            ban_action,
            eligibility: Arc::new(OpenPolicy),
            weight: None,
        }
    }

    pub fn with_eligibility(mut self, eligibility: Arc<dyn EligibilityPolicy>) -> Self {
        self.eligibility = eligibility;
        self
    }

    pub fn with_weight(mut self, weight: Arc<dyn WeightPolicy>) -> Self {
        self.weight = Some(weight);
        self
    }
}

/// Orchestrates votes; the only component that mutates reputation
pub struct VoteLedger {
    directory: Arc<dyn UserDirectory>,
    store: Arc<dyn ReputationStore>,
    audit_log: Arc<dyn VoteAuditLog>,
    eligibility: Arc<dyn EligibilityPolicy>,
    weight: Arc<dyn WeightPolicy>,
    ban_trigger: BanTrigger,
    config: LedgerConfig,
    locks: KeyedLocks<(UserId, ItemId)>,
}

impl VoteLedger {
    /// Build the ledger and start its ban worker on the current runtime
    pub fn new(parts: LedgerParts, config: &RulesConfig) -> Self {
        let weight = parts
            .weight
            .unwrap_or_else(|| Arc::new(TieredWeightPolicy::from_config(&config.weight)));

        let ban_trigger = BanTrigger::spawn(
            config.auto_ban.clone(),
            config.ledger.ban_queue_capacity,
            parts.directory.clone(),
            parts.ban_action,
        );

        Self {
            directory: parts.directory,
            store: parts.store,
            audit_log: parts.audit_log,
            eligibility: parts.eligibility,
            weight,
            ban_trigger,
            config: config.ledger.clone(),
            locks: KeyedLocks::new(),
        }
    }

    /// Apply one vote command
    pub async fn vote(&self, command: VoteCommand) -> VoteResult<VoteOutcome> {
        info!(
            "Vote: voter {} item {} current {:?} action {:?}",
            command.voter, command.item, command.current, command.action
        );

        let item = self.directory.get_item(&command.item).await?;
        let voter = self.resolve_voter(&command.voter).await?;

        let eligibility = match command.action {
            VoteAction::Upvote => self.eligibility.can_upvote(&voter, &item),
            VoteAction::Downvote => self.eligibility.can_downvote(&voter, &item),
            VoteAction::Unvote => Eligibility::Allowed,
        };
        if let Eligibility::Denied(reason) = eligibility {
            info!("{:?} by {} on {} not allowed: {}", command.action, voter.id, item.id, reason);
            return Err(VoteError::PolicyDenied { reason });
        }

        let key = AuditKey::new(voter.id.clone(), item.author.clone(), item.id.clone());
        let guard = self.locks.lock((voter.id.clone(), item.id.clone())).await;

        let previous = self.resolve_state(command.current, &key).await;
        let mut tx = Transition {
            outcome: VoteOutcome::new(previous),
            decreases: Vec::new(),
        };
        let result = self.transition(&mut tx, &voter, &item, &key, command.action).await;

        drop(guard);
        // reported even when the transition failed halfway; those decreases committed
        for (user, reputation) in &tx.decreases {
            self.ban_trigger.notify(user, *reputation);
        }

        result?;
        let outcome = tx.outcome;
        debug!(
            "Vote done: {:?} -> {:?}, voter {:+}, author {:+}, {} fault(s)",
            outcome.previous,
            outcome.state,
            outcome.voter_delta,
            outcome.author_delta,
            outcome.faults.len()
        );
        Ok(outcome)
    }

    /// Vote state of a pair as recorded by the audit log
    pub async fn current_state(&self, voter: &UserId, item: &ItemId) -> VoteResult<VoteState> {
        let item = self.directory.get_item(item).await?;
        let key = AuditKey::new(voter.clone(), item.author, item.id);
        Ok(self.recorded_state(&key).await.unwrap_or_default())
    }

    /// Current reputation of a user
    pub async fn reputation(&self, user: &UserId) -> VoteResult<i64> {
        Ok(self.store.reputation(user).await?)
    }

    /// Highest-reputation users first
    pub async fn leaderboard(&self, limit: usize) -> VoteResult<Vec<RankedUser>> {
        Ok(self.store.top(limit).await?)
    }

    /// Wait until queued ban checks have been handled
    pub async fn flush(&self) {
        self.ban_trigger.flush().await;
    }

    /// Stop the ban worker, returning what it did
    pub async fn shutdown(&self) -> BanTriggerStats {
        self.ban_trigger.shutdown().await
    }

    async fn resolve_voter(&self, id: &UserId) -> VoteResult<UserRecord> {
        let mut voter = self.directory.get_user(id).await?;
        voter.reputation = self.store.reputation(id).await?;
        Ok(voter)
    }

    async fn recorded_state(&self, key: &AuditKey) -> Option<VoteState> {
        match self.audit_log.find_live_entry(key).await {
            Ok(entry) => Some(entry.map_or(VoteState::None, |e| e.kind.state())),
            Err(e) => {
                warn!("Could not read vote log for {}: {}", key, e);
                None
            }
        }
    }

    async fn resolve_state(&self, claimed: VoteState, key: &AuditKey) -> VoteState {
        if self.config.trust_caller_state {
            return claimed;
        }

        match self.recorded_state(key).await {
            Some(recorded) => {
                if recorded != claimed {
                    warn!("Caller claimed {:?} for {} but the log says {:?}", claimed, key, recorded);
                }
                recorded
            }
            None => claimed,
        }
    }

    async fn transition(
        &self,
        tx: &mut Transition,
        voter: &UserRecord,
        item: &ItemRecord,
        key: &AuditKey,
        action: VoteAction,
    ) -> VoteResult<()> {
        match (tx.outcome.previous, action) {
            (VoteState::Upvoted, VoteAction::Upvote) | (VoteState::Downvoted, VoteAction::Downvote) => {
                debug!("{:?} on {} is already in effect", action, key);
            }
            (previous, VoteAction::Upvote) => {
                if previous == VoteState::Downvoted {
                    self.undo(tx, key, VoteKind::Downvote).await?;
                } else {
                    self.clear_stale(tx, key, VoteKind::Upvote).await?;
                }
                self.apply_upvote(tx, voter, item, key).await?;
            }
            (previous, VoteAction::Downvote) => {
                if previous == VoteState::Upvoted {
                    self.undo(tx, key, VoteKind::Upvote).await?;
                } else {
                    self.clear_stale(tx, key, VoteKind::Downvote).await?;
                }
                self.apply_downvote(tx, voter, item, key).await?;
            }
            (VoteState::None, VoteAction::Unvote) => {
                debug!("Nothing to undo for {}", key);
            }
            (VoteState::Upvoted, VoteAction::Unvote) => {
                self.undo(tx, key, VoteKind::Upvote).await?;
            }
            (VoteState::Downvoted, VoteAction::Unvote) => {
                self.undo(tx, key, VoteKind::Downvote).await?;
            }
        }
        Ok(())
    }

    /// Reverse the live entry for `key`, using the amount it recorded
    async fn undo(&self, tx: &mut Transition, key: &AuditKey, expected: VoteKind) -> VoteResult<()> {
        let entry = match self.audit_log.find_live_entry(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!("No live {} entry for {}, skipping undo", expected, key);
                tx.outcome.faults.push(LedgerFault::ConsistencyFault { expected, found: None });
                tx.outcome.state = VoteState::None;
                return Ok(());
            }
            Err(e) => {
                error!("Could not read vote log for {}, skipping undo: {}", key, e);
                tx.outcome.faults.push(LedgerFault::ConsistencyFault { expected, found: None });
                tx.outcome.state = VoteState::None;
                return Ok(());
            }
        };

        if entry.kind != expected {
            warn!("Expected a live {} for {} but found a {}; undoing what was applied", expected, key, entry.kind);
            tx.outcome.faults.push(LedgerFault::ConsistencyFault {
                expected,
                found: Some(entry.kind),
            });
        }

        self.reverse(tx, key, entry).await
    }

    /// A pair believed to have no vote must not carry a live entry; any
    /// found is reversed before the new vote applies
    async fn clear_stale(&self, tx: &mut Transition, key: &AuditKey, incoming: VoteKind) -> VoteResult<()> {
        let entry = match self.audit_log.find_live_entry(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("Could not check vote log for {} before applying {}: {}", key, incoming, e);
                return Ok(());
            }
        };

        warn!("Found a live {} for {} while applying {}; undoing it first", entry.kind, key, incoming);
        tx.outcome.faults.push(LedgerFault::ConsistencyFault {
            expected: incoming,
            found: Some(entry.kind),
        });
        self.reverse(tx, key, entry).await
    }

    /// Undo the effect recorded by `entry`, then retract it
    async fn reverse(&self, tx: &mut Transition, key: &AuditKey, entry: VoteAuditEntry) -> VoteResult<()> {
        match entry.kind {
            VoteKind::Upvote => {
                let applied = self.decrease(tx, &entry.author, entry.amount).await?;
                tx.outcome.author_delta -= applied;
            }
            VoteKind::Downvote => {
                let applied = self.increase(&entry.voter, -entry.amount).await?;
                tx.outcome.voter_delta += applied;
            }
        }
        tx.outcome.state = VoteState::None;

        match self.audit_log.consume(key).await {
            Ok(Some(_)) => {}
            Ok(None) => warn!("Vote log entry for {} vanished before it was consumed", key),
            Err(e) => {
                error!("Failed to mark vote undone for {}: {}", key, e);
                tx.outcome.faults.push(LedgerFault::AuditWriteFailure { message: e.to_string() });
            }
        }
        Ok(())
    }

    async fn apply_upvote(
        &self,
        tx: &mut Transition,
        voter: &UserRecord,
        item: &ItemRecord,
        key: &AuditKey,
    ) -> VoteResult<()> {
        let weight = self.weight.upvote_weight(voter);
        let applied = self.increase(&item.author, weight).await?;
        tx.outcome.author_delta += applied;
        tx.outcome.state = VoteState::Upvoted;

        let entry = VoteAuditEntry::new(key.clone(), item.thread.clone(), VoteKind::Upvote, applied);
        self.record(tx, entry).await;
        Ok(())
    }

    async fn apply_downvote(
        &self,
        tx: &mut Transition,
        voter: &UserRecord,
        item: &ItemRecord,
        key: &AuditKey,
    ) -> VoteResult<()> {
        let applied = self.decrease(tx, &voter.id, DOWNVOTE_COST).await?;
        tx.outcome.voter_delta -= applied;
        tx.outcome.state = VoteState::Downvoted;

        let entry = VoteAuditEntry::new(key.clone(), item.thread.clone(), VoteKind::Downvote, -applied);
        self.record(tx, entry).await;
        Ok(())
    }

    async fn record(&self, tx: &mut Transition, entry: VoteAuditEntry) {
        let key = entry.key();
        if let Err(e) = self.audit_log.record_vote(entry.clone()).await {
            error!("Failed to save vote log for {}: {} ({:?})", key, e, entry);
            tx.outcome.faults.push(LedgerFault::AuditWriteFailure { message: e.to_string() });
        }
    }

    /// Returns the amount actually added
    async fn increase(&self, user: &UserId, amount: i64) -> VoteResult<i64> {
        if amount <= 0 {
            return Ok(0);
        }

        let reputation = self.store.increment(user, amount).await?;
        info!("Increased reputation of {} by {} to {}", user, amount, reputation);
        Ok(amount)
    }

    /// Returns the amount actually removed
    async fn decrease(&self, tx: &mut Transition, user: &UserId, amount: i64) -> VoteResult<i64> {
        if amount <= 0 {
            return Ok(0);
        }

        let reputation = self.store.decrement(user, amount).await?;
        info!("Decreased reputation of {} by {} to {}", user, amount, reputation);
        tx.decreases.push((user.clone(), reputation));
        Ok(amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_log::StoredAuditLog;
    use crate::memory::{MemoryBanAction, MemoryDirectory};
    use crate::reputation_store::StoredReputationStore;
    use repledger_config::{WeightConfig, WeightTier};
    use repledger_core::MemoryStorage;

    struct Fixture {
        ledger: VoteLedger,
        store: Arc<StoredReputationStore>,
        audit_log: Arc<StoredAuditLog>,
    }

    async fn fixture(config: RulesConfig) -> Fixture {
        let directory = MemoryDirectory::new();
        directory.insert_user(UserRecord::new("voter")).await;
        directory.insert_user(UserRecord::new("author")).await;
        directory.insert_item(ItemRecord::new("post", "thread", "author")).await;

        let storage = Arc::new(MemoryStorage::new());
        let store = Arc::new(StoredReputationStore::open(storage.clone()).await.unwrap());
        store.seed(&UserId::new("voter"), 50).await.unwrap();
        store.seed(&UserId::new("author"), 100).await.unwrap();
        let audit_log = Arc::new(StoredAuditLog::open(storage).await.unwrap());

        let parts = LedgerParts::new(
            Arc::new(directory.clone()),
            store.clone(),
            audit_log.clone(),
            Arc::new(MemoryBanAction::new(directory)),
        );
        Fixture {
            ledger: VoteLedger::new(parts, &config),
            store,
            audit_log,
        }
    }

    fn tiered() -> RulesConfig {
        RulesConfig {
            weight: WeightConfig {
                default_weight: 1,
                tiers: vec![WeightTier { min_reputation: 10, weight: 5 }],
            },
            ..RulesConfig::default()
        }
    }

    fn key() -> AuditKey {
        AuditKey::new(UserId::new("voter"), UserId::new("author"), ItemId::new("post"))
    }

    async fn rep(f: &Fixture, user: &str) -> i64 {
        f.store.reputation(&UserId::new(user)).await.unwrap()
    }

    #[tokio::test]
    async fn test_same_direction_vote_is_a_noop() {
        let f = fixture(tiered()).await;
        f.ledger.vote(VoteCommand::upvote("voter", "post", VoteState::None)).await.unwrap();

        let again = f.ledger.vote(VoteCommand::upvote("voter", "post", VoteState::Upvoted)).await.unwrap();
        assert_eq!(again.state, VoteState::Upvoted);
        assert_eq!(again.author_delta, 0);
        assert_eq!(rep(&f, "author").await, 105);
    }

    #[tokio::test]
    async fn test_mismatched_entry_is_undone_by_its_own_kind() {
        let f = fixture(tiered()).await;
        f.ledger.vote(VoteCommand::upvote("voter", "post", VoteState::None)).await.unwrap();

        // caller wrongly believes the pair is downvoted
        let outcome = f.ledger.vote(VoteCommand::unvote("voter", "post", VoteState::Downvoted)).await.unwrap();
        assert_eq!(
            outcome.faults,
            vec![LedgerFault::ConsistencyFault { expected: VoteKind::Downvote, found: Some(VoteKind::Upvote) }]
        );
        assert_eq!(rep(&f, "author").await, 100);
        assert_eq!(rep(&f, "voter").await, 50);
        assert!(f.audit_log.find_live_entry(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_log_derived_state_overrides_caller() {
        let mut config = tiered();
        config.ledger.trust_caller_state = false;
        let f = fixture(config).await;

        f.ledger.vote(VoteCommand::downvote("voter", "post", VoteState::None)).await.unwrap();
        // caller forgot about the downvote; the log knows better
        let outcome = f.ledger.vote(VoteCommand::upvote("voter", "post", VoteState::None)).await.unwrap();

        assert_eq!(outcome.previous, VoteState::Downvoted);
        assert!(outcome.faults.is_empty());
        assert_eq!(rep(&f, "voter").await, 50);
        assert_eq!(rep(&f, "author").await, 105);
        assert_eq!(
            f.ledger.current_state(&UserId::new("voter"), &ItemId::new("post")).await.unwrap(),
            VoteState::Upvoted
        );
    }

    #[tokio::test]
    async fn test_zero_weight_upvote_records_zero_and_undoes_nothing() {
        let config = RulesConfig {
            weight: WeightConfig { default_weight: 0, tiers: Vec::new() },
            ..RulesConfig::default()
        };
        let f = fixture(config).await;

        let up = f.ledger.vote(VoteCommand::upvote("voter", "post", VoteState::None)).await.unwrap();
        assert_eq!(up.author_delta, 0);
        assert_eq!(f.audit_log.find_live_entry(&key()).await.unwrap().unwrap().amount, 0);

        let un = f.ledger.vote(VoteCommand::unvote("voter", "post", VoteState::Upvoted)).await.unwrap();
        assert_eq!(un.author_delta, 0);
        assert_eq!(rep(&f, "author").await, 100);
    }

    #[tokio::test]
    async fn test_unknown_item_is_a_lookup_error() {
        let f = fixture(tiered()).await;
        let err = f.ledger.vote(VoteCommand::upvote("voter", "missing", VoteState::None)).await.unwrap_err();
        assert!(matches!(err, VoteError::Lookup(_)));
        assert_eq!(rep(&f, "author").await, 100);
    }

    #[tokio::test]
    async fn test_leaderboard_reflects_votes() {
        let f = fixture(tiered()).await;
        f.ledger.vote(VoteCommand::upvote("voter", "post", VoteState::None)).await.unwrap();

        let board = f.ledger.leaderboard(2).await.unwrap();
        assert_eq!(board[0], RankedUser { user: UserId::new("author"), reputation: 105 });
        assert_eq!(board[1], RankedUser { user: UserId::new("voter"), reputation: 50 });
    }
}
