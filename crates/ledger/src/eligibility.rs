//! Eligibility gate for up and down votes
//!
//! The rules themselves belong to the host. This module fixes the contract:
//! a pure yes/no decision with a stable reason code on denial.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ItemRecord, UserRecord};

/// Why a vote was refused. Codes are stable translation keys; the host
/// resolves them to display text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DenialReason {
    NotEnoughReputation,
    NotEnoughPosts,
    AccountTooNew,
    OwnContent,
    ContentTooOld,
    DailyLimitReached,
    ThreadLimitReached,
    AuthorLimitReached,
    VoterBanned,
}

impl DenialReason {
    /// Stable code for the boundary layer
    pub fn code(self) -> &'static str {
        match self {
            DenialReason::NotEnoughReputation => "notEnoughReputation",
            DenialReason::NotEnoughPosts => "notEnoughPosts",
            DenialReason::AccountTooNew => "accountTooNew",
            DenialReason::OwnContent => "ownContent",
            DenialReason::ContentTooOld => "contentTooOld",
            DenialReason::DailyLimitReached => "dailyLimitReached",
            DenialReason::ThreadLimitReached => "threadLimitReached",
            DenialReason::AuthorLimitReached => "authorLimitReached",
            DenialReason::VoterBanned => "voterBanned",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outcome of an eligibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eligibility {
    Allowed,
    Denied(DenialReason),
}

impl Eligibility {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Eligibility::Allowed)
    }

    pub fn reason(&self) -> Option<DenialReason> {
        match self {
            Eligibility::Allowed => None,
            Eligibility::Denied(reason) => Some(*reason),
        }
    }
}

/// Pluggable vote eligibility rules. Implementations must not mutate
/// anything; unvote never consults the policy.
pub trait EligibilityPolicy: Send + Sync {
    fn can_upvote(&self, voter: &UserRecord, item: &ItemRecord) -> Eligibility;

    fn can_downvote(&self, voter: &UserRecord, item: &ItemRecord) -> Eligibility;
}

/// Allows every vote
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenPolicy;

impl EligibilityPolicy for OpenPolicy {
    fn can_upvote(&self, _voter: &UserRecord, _item: &ItemRecord) -> Eligibility {
        Eligibility::Allowed
    }

    fn can_downvote(&self, _voter: &UserRecord, _item: &ItemRecord) -> Eligibility {
        Eligibility::Allowed
    }
}
