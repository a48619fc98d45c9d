//! Join spreading-factor back-off schedule.
//!
//! A join campaign walks the data-rate ladder from the fastest spreading
//! factor toward the slowest, doubling the wait budget at each tier. Slower
//! factors burn more airtime and must be attempted less often, but the
//! slowest tier is still retried periodically rather than abandoned, so the
//! device eventually joins when conditions improve.

use crate::mac::DataRate;
use std::time::Duration;

/// Escalation state of one uninterrupted join campaign. Never regresses to
/// a faster tier; a fresh campaign starts over from the initial rate.
#[derive(Debug, Clone)]
pub struct JoinBackoff {
    data_rate: DataRate,
    tier_budget: Duration,
    tier_max: Duration,
}

impl JoinBackoff {
    pub fn new(initial: DataRate, tier_base: Duration, tier_max: Duration) -> Self {
        Self {
            data_rate: initial,
            tier_budget: tier_base.min(tier_max),
            tier_max,
        }
    }

    /// Spreading factor of the current tier.
    pub fn data_rate(&self) -> DataRate {
        self.data_rate
    }

    /// How long to wait on the current tier before escalating.
    pub fn tier_budget(&self) -> Duration {
        self.tier_budget
    }

    /// Move to the next coarser tier, doubling the wait budget up to the
    /// clamp. At SF12 the rate stays put and only the budget saturates.
    pub fn escalate(&mut self) {
        if !self.data_rate.is_slowest() {
            self.data_rate = self.data_rate.coarser();
        }
        self.tier_budget = (self.tier_budget * 2).min(self.tier_max);
    }
}
