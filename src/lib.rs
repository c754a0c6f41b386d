//! Repledger
//!
//! A vote-driven reputation ledger: users upvote and downvote posts, votes
//! move reputation between voter and author, and every effect can be undone
//! exactly.

/// Module version information
pub mod version {
    /// The current version of the repledger library
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Storage and runtime plumbing
pub use repledger_core as core;

/// Rules configuration
pub use repledger_config as config;

/// The vote ledger and its collaborators
pub use repledger_ledger as ledger;

pub use repledger_config::RulesConfig;
pub use repledger_ledger::{
    LedgerParts, VoteAction, VoteCommand, VoteError, VoteLedger, VoteOutcome, VoteState,
};
