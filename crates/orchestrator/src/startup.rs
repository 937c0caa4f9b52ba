use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stagehand_backend::DeploymentBackend;
use stagehand_plan::{RunPolicy, UnitSpec};
use stagehand_probe::{HealthProber, HealthState};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::report::{UnitRuntimeState, UnitStatus};

/// Why a health-polling pass ended without the unit becoming healthy.
enum PollVerdict {
    Healthy,
    ConfirmedBroken(String),
    TimedOut(String),
    Unavailable(String),
    Aborted,
}

/// Drives one unit through the startup state machine:
/// `pending -> starting -> {healthy | unhealthy}` with retries up to the
/// policy's attempt budget, then `failed`.
pub(crate) async fn run_unit<B, P>(
    unit: UnitSpec,
    backend: Arc<B>,
    prober: Arc<P>,
    policy: RunPolicy,
    cancel: CancellationToken,
    abort: CancellationToken,
) -> (String, UnitRuntimeState)
where
    B: DeploymentBackend,
    P: HealthProber,
{
    let name = unit.name().to_string();
    let mut state = UnitRuntimeState::new();

    let interval = unit
        .health_check()
        .interval()
        .unwrap_or(policy.probe_interval);
    let budget = unit.start_timeout().unwrap_or(policy.unit_timeout);

    loop {
        // An operator interrupt stops us from issuing any further start
        // calls; in-flight polls have already run out by this point.
        if cancel.is_cancelled() {
            if state.attempts == 0 {
                state.last_error = Some("run aborted before unit was started".to_string());
            } else {
                let earlier = state
                    .last_error
                    .take()
                    .unwrap_or_else(|| "interrupted".to_string());
                state.fail(format!("run aborted before retry: {earlier}"));
            }
            return (name, state);
        }

        if abort.is_cancelled() {
            state.fail("run aborted: deployment backend unavailable");
            return (name, state);
        }

        state.attempts += 1;
        state.status = UnitStatus::Starting;
        if state.started_at.is_none() {
            state.started_at = Some(Utc::now());
        }

        debug!(
            "starting unit {} (attempt {}/{})",
            name, state.attempts, policy.max_attempts
        );

        match backend.start(std::slice::from_ref(&name)).await {
            Ok(()) => {
                match poll_until_healthy(&unit, &*prober, &*backend, interval, budget, &abort).await
                {
                    PollVerdict::Healthy => {
                        state.settle(UnitStatus::Healthy);
                        info!("unit {} is healthy", name);
                        return (name, state);
                    }
                    PollVerdict::ConfirmedBroken(error) | PollVerdict::TimedOut(error) => {
                        state.last_error = Some(error);
                    }
                    PollVerdict::Unavailable(error) => {
                        abort.cancel();
                        state.fail(error);
                        return (name, state);
                    }
                    PollVerdict::Aborted => {
                        state.fail("run aborted: deployment backend unavailable");
                        return (name, state);
                    }
                }
            }
            Err(e) if e.is_unavailable() => {
                abort.cancel();
                state.fail(e.to_string());
                return (name, state);
            }
            Err(e) => {
                // A refused start consumes an attempt just like a timeout.
                debug!("start call for unit {} failed: {}", name, e);
                state.last_error = Some(e.to_string());
            }
        }

        if state.attempts >= policy.max_attempts {
            warn!(
                "unit {} failed after {} attempts: {}",
                name,
                state.attempts,
                state.last_error.as_deref().unwrap_or("unknown error")
            );
            state.settle(UnitStatus::Failed);
            return (name, state);
        }

        state.status = UnitStatus::Unhealthy;
        debug!("unit {} not healthy, retrying", name);
    }
}

/// Polls the unit's health check until it reports healthy, the deadline
/// elapses, or the check is confirmed broken (unhealthy while the backend
/// reports the unit's process as gone).
async fn poll_until_healthy<B, P>(
    unit: &UnitSpec,
    prober: &P,
    backend: &B,
    interval: Duration,
    budget: Duration,
    abort: &CancellationToken,
) -> PollVerdict
where
    B: DeploymentBackend,
    P: HealthProber,
{
    let deadline = Instant::now() + budget;
    let mut last_probe_error: Option<String> = None;

    loop {
        match prober.probe(unit).await {
            Ok(HealthState::Healthy) => return PollVerdict::Healthy,
            Ok(HealthState::Indeterminate) => {}
            Ok(HealthState::Unhealthy) => {
                // Unhealthy alone is not conclusive while the unit is
                // still running; only a dead process confirms it.
                match backend.is_running(unit.name()).await {
                    Ok(true) => {}
                    Ok(false) => {
                        return PollVerdict::ConfirmedBroken(
                            "unit reported unhealthy and its process has exited".to_string(),
                        );
                    }
                    Err(e) if e.is_unavailable() => {
                        return PollVerdict::Unavailable(e.to_string());
                    }
                    Err(e) => {
                        debug!("running check for {} failed: {}", unit.name(), e);
                        last_probe_error = Some(e.to_string());
                    }
                }
            }
            Err(e) => {
                // Treated like an indeterminate probe, but remembered so a
                // timeout can explain itself.
                debug!("probe for {} errored: {}", unit.name(), e);
                last_probe_error = Some(e.to_string());
            }
        }

        let now = Instant::now();
        if now >= deadline {
            let mut message = format!(
                "unit did not become healthy within {}ms",
                budget.as_millis()
            );
            if let Some(probe_error) = last_probe_error {
                message.push_str(&format!(" (last probe error: {probe_error})"));
            }
            return PollVerdict::TimedOut(message);
        }

        tokio::select! {
            () = tokio::time::sleep(interval.min(deadline - now)) => {}
            () = abort.cancelled() => return PollVerdict::Aborted,
        }
    }
}
