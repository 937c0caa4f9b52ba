//! The lifecycle state machine: walks an ordered plan of unit tiers
//! forward to start them and backward to stop them, gating each tier on
//! observed health rather than fixed sleeps.
//!
//! Within a tier every unit is driven by its own task; tiers are
//! synchronized at a barrier, and the next tier is never touched before
//! the current one has produced its [`TierResult`]. The orchestrator
//! never prints: callers consume the [`RunReport`].
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod report;
mod shutdown;
mod startup;

pub use report::{
    RunDirection, RunOutcome, RunReport, TierOutcome, TierResult, UnitRuntimeState, UnitStatus,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use stagehand_backend::DeploymentBackend;
use stagehand_plan::{Plan, RunPolicy};
use stagehand_probe::HealthProber;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Options for constructing an [`Orchestrator`].
pub struct OrchestratorOptions<B, P> {
    /// The deployment backend that actually starts and stops units.
    pub backend: Arc<B>,

    /// The health prober used to gate startup tiers.
    pub prober: Arc<P>,

    /// Per-run policy knobs.
    pub policy: RunPolicy,

    /// Operator interrupt. During startup this stops further start calls;
    /// during shutdown it escalates stopping units immediately.
    pub cancellation_token: CancellationToken,
}

/// Sequences units into and out of service, tier by tier.
pub struct Orchestrator<B, P> {
    backend: Arc<B>,
    prober: Arc<P>,
    policy: RunPolicy,
    cancellation_token: CancellationToken,
}

impl<B, P> Orchestrator<B, P>
where
    B: DeploymentBackend,
    P: HealthProber,
{
    /// Creates a new orchestrator.
    #[must_use]
    pub fn new(
        OrchestratorOptions {
            backend,
            prober,
            policy,
            cancellation_token,
        }: OrchestratorOptions<B, P>,
    ) -> Self {
        Self {
            backend,
            prober,
            policy,
            cancellation_token,
        }
    }

    /// Runs the startup pass: tiers in ascending order, each unit started
    /// and health-gated concurrently with its tier peers.
    ///
    /// Startup halts after a failed tier unless the policy says to
    /// continue; either way the overall outcome reflects the failure.
    pub async fn start(&self, plan: &Plan) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let abort = CancellationToken::new();

        info!(
            "startup run {} over {} tiers begins",
            run_id,
            plan.tier_count()
        );

        let mut tier_results = Vec::with_capacity(plan.tier_count());

        for (index, tier) in plan.tiers().iter().enumerate() {
            if self.cancellation_token.is_cancelled() {
                warn!("startup interrupted before tier {}", index);
                break;
            }
            if abort.is_cancelled() {
                break;
            }

            info!("starting tier {} ({} units)", index, tier.len());

            let handles = tier
                .iter()
                .map(|unit| {
                    let handle = tokio::spawn(startup::run_unit(
                        unit.clone(),
                        Arc::clone(&self.backend),
                        Arc::clone(&self.prober),
                        self.policy,
                        self.cancellation_token.clone(),
                        abort.clone(),
                    ));
                    (unit.name().to_string(), handle)
                })
                .collect();

            let result = collect_tier(index, handles).await;
            info!("tier {} finished: {:?}", index, result.outcome);

            let failed = result.outcome == TierOutcome::Failed;
            tier_results.push(result);

            if failed {
                if self.policy.continue_on_tier_failure {
                    warn!("tier {} failed; continuing by policy", index);
                } else {
                    error!("tier {} failed; halting startup", index);
                    break;
                }
            }
        }

        let aborted = self.cancellation_token.is_cancelled() && !abort.is_cancelled();
        let outcome = RunReport::overall(&tier_results, aborted);

        info!("startup run {} finished: {:?}", run_id, outcome);

        RunReport {
            run_id,
            direction: RunDirection::Startup,
            started_at,
            total_duration: clock.elapsed(),
            outcome,
            tier_results,
        }
    }

    /// Runs the shutdown pass: tiers in descending order.
    ///
    /// Unlike startup, shutdown proceeds through every tier regardless of
    /// prior-tier outcomes, so one misbehaving layer cannot wedge the rest
    /// of the teardown. The overall outcome still reflects failures.
    pub async fn stop(&self, plan: &Plan) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let abort = CancellationToken::new();

        info!(
            "shutdown run {} over {} tiers begins",
            run_id,
            plan.tier_count()
        );

        let mut tier_results = Vec::with_capacity(plan.tier_count());

        for (index, tier) in plan.tiers().iter().enumerate().rev() {
            if abort.is_cancelled() {
                break;
            }

            info!("stopping tier {} ({} units)", index, tier.len());

            let handles = tier
                .iter()
                .map(|unit| {
                    let handle = tokio::spawn(shutdown::run_unit(
                        unit.clone(),
                        Arc::clone(&self.backend),
                        self.policy,
                        self.cancellation_token.clone(),
                        abort.clone(),
                    ));
                    (unit.name().to_string(), handle)
                })
                .collect();

            let result = collect_tier(index, handles).await;
            info!("tier {} finished: {:?}", index, result.outcome);
            tier_results.push(result);
        }

        let outcome = RunReport::overall(&tier_results, false);

        info!("shutdown run {} finished: {:?}", run_id, outcome);

        RunReport {
            run_id,
            direction: RunDirection::Shutdown,
            started_at,
            total_duration: clock.elapsed(),
            outcome,
            tier_results,
        }
    }
}

/// Tier barrier: awaits every per-unit task and freezes the results. The
/// only place where per-unit state crosses task boundaries.
async fn collect_tier(
    index: usize,
    handles: Vec<(String, JoinHandle<(String, UnitRuntimeState)>)>,
) -> TierResult {
    let mut unit_results = BTreeMap::new();

    for (name, handle) in handles {
        match handle.await {
            Ok((name, state)) => {
                unit_results.insert(name, state);
            }
            Err(e) => {
                error!("unit task for {} panicked: {}", name, e);
                let mut state = UnitRuntimeState::new();
                state.fail(format!("unit task panicked: {e}"));
                unit_results.insert(name, state);
            }
        }
    }

    TierResult::from_units(index, unit_results)
}
