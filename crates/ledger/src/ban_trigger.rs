//! Automatic banning on low reputation
//!
//! The ledger reports every reputation decrease here. Checks run on a
//! background task fed through a bounded channel, so a slow or failing ban
//! action can never fail or delay a vote. Whether a user is already banned is
//! always read from the host directory, so a user unbanned by an admin is
//! banned again on the next drop below the threshold.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use repledger_config::AutoBanConfig;

use crate::{BanAction, UserDirectory, UserId};

/// Counters describing what the ban worker has done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanTriggerStats {
    /// Decreases that fell below the threshold and were checked
    pub checks: u64,
    pub bans_issued: u64,
    pub ban_failures: u64,
    /// Checks skipped because the host reported the user as already banned
    pub already_banned: u64,
    /// Notifications lost because the queue was full or closed
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    checks: AtomicU64,
    bans_issued: AtomicU64,
    ban_failures: AtomicU64,
    already_banned: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BanTriggerStats {
        BanTriggerStats {
            checks: self.checks.load(Ordering::SeqCst),
            bans_issued: self.bans_issued.load(Ordering::SeqCst),
            ban_failures: self.ban_failures.load(Ordering::SeqCst),
            already_banned: self.already_banned.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
        }
    }
}

/// Commands handled by the ban worker
#[derive(Debug)]
enum BanCommand {
    /// A user's reputation dropped below the threshold
    Check { user: UserId, reputation: i64 },

    /// Acknowledge once every earlier command is handled
    Flush { response_tx: oneshot::Sender<()> },

    /// Stop the worker after acknowledging
    Stop { response_tx: oneshot::Sender<()> },
}

/// Handle to the background ban worker
pub struct BanTrigger {
    config: AutoBanConfig,
    command_tx: mpsc::Sender<BanCommand>,
    task_handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl BanTrigger {
    /// Start the worker on the current tokio runtime
    pub fn spawn(
        config: AutoBanConfig,
        queue_capacity: usize,
        directory: Arc<dyn UserDirectory>,
        ban_action: Arc<dyn BanAction>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(queue_capacity.max(1));
        let counters = Arc::new(Counters::default());

        let worker = BanWorker {
            directory,
            ban_action,
            counters: counters.clone(),
        };
        let handle = tokio::spawn(worker.run(command_rx));

        Self {
            config,
            command_tx,
            task_handle: Mutex::new(Some(handle)),
            counters,
        }
    }

    /// Report a reputation decrease. Never blocks and never fails.
    pub fn notify(&self, user: &UserId, new_reputation: i64) {
        if !self.config.enabled || new_reputation >= self.config.threshold {
            return;
        }

        let command = BanCommand::Check {
            user: user.clone(),
            reputation: new_reputation,
        };
        match self.command_tx.try_send(command) {
            Ok(()) => debug!("Queued ban check for {} at {}", user, new_reputation),
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                warn!("Ban queue full, dropping check for {} at {}", user, new_reputation);
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::SeqCst);
                warn!("Ban worker stopped, dropping check for {} at {}", user, new_reputation);
            }
        }
    }

    /// Wait until every check queued so far has been handled
    pub async fn flush(&self) {
        let (response_tx, response_rx) = oneshot::channel();
        if self.command_tx.send(BanCommand::Flush { response_tx }).await.is_ok() {
            let _ = response_rx.await;
        }
    }

    /// Drain the queue and stop the worker
    pub async fn shutdown(&self) -> BanTriggerStats {
        let (response_tx, response_rx) = oneshot::channel();
        if self.command_tx.send(BanCommand::Stop { response_tx }).await.is_ok() {
            let _ = response_rx.await;
        }

        if let Some(handle) = self.task_handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Ban worker task failed: {}", e);
            }
        }

        self.stats()
    }

    pub fn stats(&self) -> BanTriggerStats {
        self.counters.snapshot()
    }
}

struct BanWorker {
    directory: Arc<dyn UserDirectory>,
    ban_action: Arc<dyn BanAction>,
    counters: Arc<Counters>,
}

impl BanWorker {
    async fn run(self, mut command_rx: mpsc::Receiver<BanCommand>) {
        debug!("Starting ban worker");

        while let Some(command) = command_rx.recv().await {
            match command {
                BanCommand::Check { user, reputation } => {
                    self.handle_check(user, reputation).await;
                }
                BanCommand::Flush { response_tx } => {
                    let _ = response_tx.send(());
                }
                BanCommand::Stop { response_tx } => {
                    let _ = response_tx.send(());
                    break;
                }
            }
        }

        debug!("Ban worker stopped");
    }

    async fn handle_check(&self, user: UserId, reputation: i64) {
        self.counters.checks.fetch_add(1, Ordering::SeqCst);

        match self.directory.get_user(&user).await {
            Ok(record) if record.banned => {
                self.counters.already_banned.fetch_add(1, Ordering::SeqCst);
                debug!("User {} is already banned", user);
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Could not resolve {} for ban check: {}", user, e);
                return;
            }
        }

        match self.ban_action.ban_user(&user).await {
            Ok(()) => {
                self.counters.bans_issued.fetch_add(1, Ordering::SeqCst);
                info!("User {} was banned for reaching {} reputation", user, reputation);
            }
            Err(e) => {
                self.counters.ban_failures.fetch_add(1, Ordering::SeqCst);
                error!("{}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBanAction, MemoryDirectory};
    use crate::UserRecord;

    fn enabled(threshold: i64) -> AutoBanConfig {
        AutoBanConfig { enabled: true, threshold }
    }

    async fn setup(config: AutoBanConfig) -> (BanTrigger, MemoryDirectory, MemoryBanAction) {
        let directory = MemoryDirectory::new();
        directory.insert_user(UserRecord::new("u1")).await;
        directory.insert_user(UserRecord::new("u2")).await;
        let ban_action = MemoryBanAction::new(directory.clone());
        let trigger = BanTrigger::spawn(
            config,
            16,
            Arc::new(directory.clone()),
            Arc::new(ban_action.clone()),
        );
        (trigger, directory, ban_action)
    }

    #[tokio::test]
    async fn test_bans_once_below_threshold() {
        let (trigger, directory, ban_action) = setup(enabled(0)).await;
        let u1 = UserId::new("u1");

        trigger.notify(&u1, 0);
        trigger.flush().await;
        assert!(ban_action.calls().await.is_empty());

        trigger.notify(&u1, -1);
        trigger.notify(&u1, -2);
        trigger.flush().await;

        assert_eq!(ban_action.calls().await, vec![u1.clone()]);
        assert!(directory.get_user(&u1).await.unwrap().banned);

        let stats = trigger.shutdown().await;
        assert_eq!(stats.bans_issued, 1);
        assert_eq!(stats.already_banned, 1);
        assert_eq!(stats.checks, 2);
    }

    #[tokio::test]
    async fn test_disabled_trigger_never_bans() {
        let (trigger, _directory, ban_action) = setup(AutoBanConfig { enabled: false, threshold: 0 }).await;

        trigger.notify(&UserId::new("u1"), -100);
        trigger.flush().await;

        assert!(ban_action.calls().await.is_empty());
        assert_eq!(trigger.shutdown().await.checks, 0);
    }

    #[tokio::test]
    async fn test_already_banned_users_are_skipped() {
        let (trigger, directory, ban_action) = setup(enabled(0)).await;
        directory.set_banned(&UserId::new("u2"), true).await;

        trigger.notify(&UserId::new("u2"), -5);
        trigger.flush().await;

        assert!(ban_action.calls().await.is_empty());
        assert_eq!(trigger.stats().already_banned, 1);
    }

    #[tokio::test]
    async fn test_ban_failures_are_counted_not_raised() {
        let (trigger, _directory, ban_action) = setup(enabled(0)).await;
        ban_action.fail(true);

        trigger.notify(&UserId::new("u1"), -1);
        trigger.flush().await;
        assert_eq!(trigger.stats().ban_failures, 1);

        // a later check retries once the action works again
        ban_action.fail(false);
        trigger.notify(&UserId::new("u1"), -2);
        trigger.flush().await;
        assert_eq!(trigger.stats().bans_issued, 1);
    }

    #[tokio::test]
    async fn test_unbanned_user_is_banned_again() {
        let (trigger, directory, ban_action) = setup(enabled(50)).await;
        let u1 = UserId::new("u1");

        trigger.notify(&u1, 49);
        trigger.flush().await;
        assert!(directory.get_user(&u1).await.unwrap().banned);

        // an admin lifts the ban, then reputation drops again
        directory.set_banned(&u1, false).await;
        trigger.notify(&u1, 48);
        trigger.flush().await;

        assert_eq!(ban_action.calls().await, vec![u1.clone(), u1.clone()]);
        assert!(directory.get_user(&u1).await.unwrap().banned);
        let stats = trigger.shutdown().await;
        assert_eq!(stats.bans_issued, 2);
        assert_eq!(stats.already_banned, 0);
    }

    #[tokio::test]
    async fn test_notify_after_shutdown_is_dropped() {
        let (trigger, _directory, _ban_action) = setup(enabled(0)).await;
        trigger.shutdown().await;

        trigger.notify(&UserId::new("u1"), -1);
        trigger.flush().await;
        assert_eq!(trigger.stats().dropped, 1);
    }
}
