use std::time::Duration;

/// Per-run policy knobs consumed by the orchestrator.
#[derive(Clone, Copy, Debug)]
pub struct RunPolicy {
    /// Maximum start attempts per unit before it is marked failed.
    pub max_attempts: u32,

    /// Deadline for a unit to become healthy after a start attempt.
    /// Individual units may override this on their spec.
    pub unit_timeout: Duration,

    /// Interval between health/running polls.
    pub probe_interval: Duration,

    /// How long a unit is given to stop after a shutdown signal before
    /// escalation.
    pub graceful_timeout: Duration,

    /// How long a unit is given to stop after a forced stop before it is
    /// marked failed.
    pub force_timeout: Duration,

    /// Keep processing later tiers after a tier fails during startup.
    /// The overall outcome is still downgraded to failed.
    pub continue_on_tier_failure: bool,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            unit_timeout: Duration::from_secs(120),
            probe_interval: Duration::from_secs(2),
            graceful_timeout: Duration::from_secs(30),
            force_timeout: Duration::from_secs(10),
            continue_on_tier_failure: false,
        }
    }
}
