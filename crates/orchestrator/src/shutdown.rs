use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stagehand_backend::DeploymentBackend;
use stagehand_plan::{RunPolicy, UnitSpec};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::report::{UnitRuntimeState, UnitStatus};

enum WaitVerdict {
    Stopped,
    TimedOut,
    Interrupted,
    Unavailable(String),
}

/// Drives one unit through the shutdown state machine:
/// `-> stopping -> {stopped | forced | failed}` with exactly one forced
/// escalation after the graceful window.
pub(crate) async fn run_unit<B>(
    unit: UnitSpec,
    backend: Arc<B>,
    policy: RunPolicy,
    cancel: CancellationToken,
    abort: CancellationToken,
) -> (String, UnitRuntimeState)
where
    B: DeploymentBackend,
{
    let name = unit.name().to_string();
    let mut state = UnitRuntimeState::new();

    let interval = unit
        .health_check()
        .interval()
        .unwrap_or(policy.probe_interval);

    if abort.is_cancelled() {
        state.fail("run aborted: deployment backend unavailable");
        return (name, state);
    }

    state.started_at = Some(Utc::now());

    // Stopping an already-stopped unit settles without any signalling.
    match backend.is_running(&name).await {
        Ok(false) => {
            debug!("unit {} already stopped", name);
            state.settle(UnitStatus::Stopped);
            return (name, state);
        }
        Ok(true) => {}
        Err(e) if e.is_unavailable() => {
            abort.cancel();
            state.fail(e.to_string());
            return (name, state);
        }
        Err(e) => {
            // Running state unknown; proceed with the shutdown request.
            debug!("running check for {} failed: {}", name, e);
            state.last_error = Some(e.to_string());
        }
    }

    state.status = UnitStatus::Stopping;
    state.attempts += 1;

    // An operator interrupt while stopping means: skip the graceful wait
    // and escalate right away.
    let mut escalate = cancel.is_cancelled();

    match backend.signal(&name, unit.shutdown_mode()).await {
        Ok(()) => debug!("sent {:?} shutdown to unit {}", unit.shutdown_mode(), name),
        Err(e) if e.is_unavailable() => {
            abort.cancel();
            state.fail(e.to_string());
            return (name, state);
        }
        Err(e) => {
            debug!("signal for {} failed: {}", name, e);
            state.last_error = Some(e.to_string());
            escalate = true;
        }
    }

    if !escalate {
        match wait_until_stopped(
            &*backend,
            &name,
            interval,
            policy.graceful_timeout,
            Some(&cancel),
            &abort,
        )
        .await
        {
            WaitVerdict::Stopped => {
                state.settle(UnitStatus::Stopped);
                info!("unit {} stopped", name);
                return (name, state);
            }
            WaitVerdict::TimedOut => {
                state.last_error = Some(format!(
                    "unit did not stop within {}ms",
                    policy.graceful_timeout.as_millis()
                ));
            }
            WaitVerdict::Interrupted => {
                state.last_error = Some("shutdown interrupted; escalating".to_string());
            }
            WaitVerdict::Unavailable(error) => {
                abort.cancel();
                state.fail(error);
                return (name, state);
            }
        }
    }

    warn!(
        "escalating unit {}: {}",
        name,
        state.last_error.as_deref().unwrap_or("interrupt requested")
    );

    state.attempts += 1;

    match backend.force_stop(&name).await {
        Ok(()) => {}
        Err(e) if e.is_unavailable() => {
            abort.cancel();
            state.fail(e.to_string());
            return (name, state);
        }
        Err(e) => {
            state.fail(e.to_string());
            return (name, state);
        }
    }

    match wait_until_stopped(
        &*backend,
        &name,
        interval,
        policy.force_timeout,
        None,
        &abort,
    )
    .await
    {
        WaitVerdict::Stopped => {
            // Keeps the error that explains why force was needed.
            state.settle(UnitStatus::Forced);
            warn!("unit {} force-stopped", name);
        }
        WaitVerdict::TimedOut | WaitVerdict::Interrupted => {
            state.fail(format!(
                "unit still running {}ms after forced stop",
                policy.force_timeout.as_millis()
            ));
        }
        WaitVerdict::Unavailable(error) => {
            abort.cancel();
            state.fail(error);
        }
    }

    (name, state)
}

/// Polls the backend's running state (not the health prober; a unit mid
/// graceful-shutdown is expected to fail health checks) until it reports
/// stopped or the window closes.
async fn wait_until_stopped<B>(
    backend: &B,
    name: &str,
    interval: Duration,
    window: Duration,
    cancel: Option<&CancellationToken>,
    abort: &CancellationToken,
) -> WaitVerdict
where
    B: DeploymentBackend,
{
    let deadline = Instant::now() + window;

    loop {
        match backend.is_running(name).await {
            Ok(false) => return WaitVerdict::Stopped,
            Ok(true) => {}
            Err(e) if e.is_unavailable() => return WaitVerdict::Unavailable(e.to_string()),
            Err(e) => debug!("running check for {} failed: {}", name, e),
        }

        let now = Instant::now();
        if now >= deadline {
            return WaitVerdict::TimedOut;
        }

        let sleep = tokio::time::sleep(interval.min(deadline - now));

        if let Some(cancel) = cancel {
            tokio::select! {
                () = sleep => {}
                () = cancel.cancelled() => return WaitVerdict::Interrupted,
                () = abort.cancelled() => {
                    return WaitVerdict::Unavailable("deployment backend unavailable".to_string());
                }
            }
        } else {
            tokio::select! {
                () = sleep => {}
                () = abort.cancelled() => {
                    return WaitVerdict::Unavailable("deployment backend unavailable".to_string());
                }
            }
        }
    }
}
