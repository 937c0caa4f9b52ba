use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// Per-unit status as tracked by the orchestrator during a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Not yet touched by this run.
    Pending,

    /// Start issued; waiting for the unit to become healthy.
    Starting,

    /// The unit answered its health check.
    Healthy,

    /// The unit was observed unhealthy; a retry may follow.
    Unhealthy,

    /// Shutdown requested; waiting for the unit to exit.
    Stopping,

    /// The unit exited on request.
    Stopped,

    /// The unit never reached its desired state.
    Failed,

    /// The unit had to be force-stopped but did reach the desired state.
    Forced,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Forced => "forced",
        };
        write!(f, "{label}")
    }
}

/// Mutable per-unit record, owned by exactly one task for the duration of
/// a tier pass and frozen into the tier result afterwards.
#[derive(Clone, Debug, Serialize)]
pub struct UnitRuntimeState {
    /// Final (or last observed) status.
    pub status: UnitStatus,

    /// Number of control calls issued for this unit (starts on the way
    /// up; signal and force on the way down).
    pub attempts: u32,

    /// When this run first acted on the unit.
    pub started_at: Option<DateTime<Utc>>,

    /// When the unit reached a terminal state for this pass.
    pub settled_at: Option<DateTime<Utc>>,

    /// Last error observed for this unit, if any.
    pub last_error: Option<String>,
}

impl UnitRuntimeState {
    pub(crate) const fn new() -> Self {
        Self {
            status: UnitStatus::Pending,
            attempts: 0,
            started_at: None,
            settled_at: None,
            last_error: None,
        }
    }

    pub(crate) fn settle(&mut self, status: UnitStatus) {
        self.status = status;
        self.settled_at = Some(Utc::now());
    }

    pub(crate) fn fail(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        self.settle(UnitStatus::Failed);
    }
}

/// Aggregate outcome of one tier.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierOutcome {
    /// Every unit reached its desired state without escalation.
    Healthy,

    /// Some unit needed force but ultimately reached the desired state.
    Degraded,

    /// Some unit never reached its desired state.
    Failed,
}

impl std::fmt::Display for TierOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Immutable record of one processed tier.
#[derive(Clone, Debug, Serialize)]
pub struct TierResult {
    /// Position of the tier in the plan.
    pub tier_index: usize,

    /// Final per-unit records, keyed by unit name.
    pub unit_results: BTreeMap<String, UnitRuntimeState>,

    /// Aggregate outcome, computed from the unit records.
    pub outcome: TierOutcome,
}

impl TierResult {
    pub(crate) fn from_units(
        tier_index: usize,
        unit_results: BTreeMap<String, UnitRuntimeState>,
    ) -> Self {
        let outcome = if unit_results
            .values()
            .any(|unit| unit.status == UnitStatus::Failed)
        {
            TierOutcome::Failed
        } else if unit_results
            .values()
            .any(|unit| unit.status == UnitStatus::Forced)
        {
            TierOutcome::Degraded
        } else {
            TierOutcome::Healthy
        };

        Self {
            tier_index,
            unit_results,
            outcome,
        }
    }
}

/// Which way the plan was walked.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunDirection {
    /// Tiers visited in ascending order, units started.
    Startup,

    /// Tiers visited in descending order, units stopped.
    Shutdown,
}

impl std::fmt::Display for RunDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Aggregate outcome of one orchestration pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// Every processed tier was healthy.
    Healthy,

    /// Some tier was degraded, none failed.
    Degraded,

    /// Some tier failed, or the backend became unavailable.
    Failed,

    /// The run was interrupted by the caller before completing.
    Aborted,
}

impl RunOutcome {
    /// Process exit code convention for callers: 0 healthy, 1 degraded,
    /// 2 failed or aborted.
    #[must_use]
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Failed | Self::Aborted => 2,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// The structured outcome of one orchestration pass. Owned by the caller
/// after return; the orchestrator itself never prints.
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    /// Unique id for this pass.
    pub run_id: Uuid,

    /// Startup or shutdown.
    pub direction: RunDirection,

    /// Wall-clock start of the pass.
    pub started_at: DateTime<Utc>,

    /// Total elapsed time of the pass.
    #[serde(rename = "total_duration_ms", serialize_with = "duration_ms")]
    pub total_duration: Duration,

    /// Aggregate outcome.
    pub outcome: RunOutcome,

    /// One entry per processed tier, in processing order.
    pub tier_results: Vec<TierResult>,
}

impl RunReport {
    /// Looks up the final record of a unit anywhere in the report.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&UnitRuntimeState> {
        self.tier_results
            .iter()
            .find_map(|tier| tier.unit_results.get(name))
    }

    pub(crate) fn overall(tier_results: &[TierResult], aborted: bool) -> RunOutcome {
        if aborted {
            RunOutcome::Aborted
        } else if tier_results
            .iter()
            .any(|tier| tier.outcome == TierOutcome::Failed)
        {
            RunOutcome::Failed
        } else if tier_results
            .iter()
            .any(|tier| tier.outcome == TierOutcome::Degraded)
        {
            RunOutcome::Degraded
        } else {
            RunOutcome::Healthy
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn duration_ms<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u128(duration.as_millis())
}
