//! Adaptive rescan scheduling based on the consecutive-failure streak

use crate::proxy::models::ProxyEntry;
use chrono::{DateTime, Duration, Utc};

/// One step of the rescan table: streaks up to `max_streak` wait `interval`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RescanTier {
    pub max_streak: u32,
    pub interval: Duration,
}

impl RescanTier {
    pub fn new(max_streak: u32, interval: Duration) -> Self {
        Self {
            max_streak,
            interval,
        }
    }
}

/// Step function from failure streak to the required inter-check interval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RescanPolicy {
    /// Sorted by `max_streak`
    tiers: Vec<RescanTier>,
    /// Interval for streaks beyond the last tier
    fallback: Duration,
}

impl Default for RescanPolicy {
    /// Daily up to 6 failures, weekly up to 29, monthly (30 days) beyond
    fn default() -> Self {
        Self::from_bounds(6, 29, Duration::days(1), Duration::weeks(1), Duration::days(30))
    }
}

impl RescanPolicy {
    pub fn new(tiers: Vec<RescanTier>, fallback: Duration) -> Self {
        let mut tiers = tiers;
        tiers.sort_by_key(|tier| tier.max_streak);
        Self { tiers, fallback }
    }

    /// Three-step table: `daily` up to `daily_max`, `weekly` up to
    /// `weekly_max`, `monthly` beyond
    pub fn from_bounds(
        daily_max: u32,
        weekly_max: u32,
        daily: Duration,
        weekly: Duration,
        monthly: Duration,
    ) -> Self {
        Self::new(
            vec![
                RescanTier::new(daily_max, daily),
                RescanTier::new(weekly_max.max(daily_max), weekly),
            ],
            monthly,
        )
    }

    pub fn tiers(&self) -> &[RescanTier] {
        &self.tiers
    }

    /// Required interval for a failure streak
    pub fn interval_for(&self, streak: u32) -> Duration {
        self.tiers
            .iter()
            .find(|tier| streak <= tier.max_streak)
            .map_or(self.fallback, |tier| tier.interval)
    }

    /// When the entry next becomes due, `None` if it has never been checked
    pub fn next_due_at(&self, entry: &ProxyEntry) -> Option<DateTime<Utc>> {
        entry
            .last_check()
            .map(|last| last.timestamp + self.interval_for(entry.failure_streak()))
    }

    /// Whether the entry should be verified again at `now`
    pub fn is_due(&self, entry: &ProxyEntry, now: DateTime<Utc>) -> bool {
        match self.next_due_at(entry) {
            None => true,
            Some(due_at) => now >= due_at,
        }
    }
}
