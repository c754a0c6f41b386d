//! Upvote weight: how much an upvote is worth, by voter standing

use repledger_config::{WeightConfig, WeightTier};

use crate::UserRecord;

/// A downvote always costs the voter exactly this much reputation
pub const DOWNVOTE_COST: i64 = 1;

/// Maps a voter to the reputation an upvote from them grants the author
pub trait WeightPolicy: Send + Sync {
    fn upvote_weight(&self, voter: &UserRecord) -> i64;
}

/// Weight from the highest tier whose threshold the voter has reached
#[derive(Debug, Clone)]
pub struct TieredWeightPolicy {
    default_weight: i64,
    // sorted by min_reputation, highest first
    tiers: Vec<WeightTier>,
}

impl TieredWeightPolicy {
    pub fn new(default_weight: i64, mut tiers: Vec<WeightTier>) -> Self {
        tiers.sort_by(|a, b| b.min_reputation.cmp(&a.min_reputation));
        Self {
            default_weight,
            tiers,
        }
    }

    pub fn from_config(config: &WeightConfig) -> Self {
        Self::new(config.default_weight, config.tiers.clone())
    }

    /// Weight for a raw reputation value
    pub fn weight_for(&self, reputation: i64) -> i64 {
        self.tiers
            .iter()
            .find(|tier| reputation >= tier.min_reputation)
            .map(|tier| tier.weight)
            .unwrap_or(self.default_weight)
    }
}

impl Default for TieredWeightPolicy {
    fn default() -> Self {
        Self::from_config(&WeightConfig::default())
    }
}

impl WeightPolicy for TieredWeightPolicy {
    fn upvote_weight(&self, voter: &UserRecord) -> i64 {
        self.weight_for(voter.reputation)
    }
}
