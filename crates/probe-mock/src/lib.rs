//! Scriptable health prober for orchestrator tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use stagehand_plan::UnitSpec;
use stagehand_probe::{HealthProber, HealthState, Result};
use tokio::time::Instant;

/// One recorded probe invocation.
#[derive(Clone, Debug)]
pub struct ProbeCall {
    /// The probed unit.
    pub unit: String,

    /// When the probe was invoked.
    pub at: Instant,

    /// The state the mock answered with.
    pub answered: HealthState,
}

/// A prober that replays a scripted sequence of states per unit.
///
/// When a unit's script runs out the final state repeats; units with no
/// script answer with the default state (healthy unless overridden).
/// Every call is recorded for assertions.
pub struct MockProber {
    default_state: HealthState,
    scripts: Mutex<HashMap<String, VecDeque<HealthState>>>,
    calls: Mutex<Vec<ProbeCall>>,
}

impl MockProber {
    /// Creates a prober that answers healthy for every unscripted unit.
    #[must_use]
    pub fn new() -> Self {
        Self::answering(HealthState::Healthy)
    }

    /// Creates a prober whose unscripted units answer with `state`.
    #[must_use]
    pub fn answering(state: HealthState) -> Self {
        Self {
            default_state: state,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Scripts the answers for one unit. The final state repeats once the
    /// sequence is exhausted.
    pub fn script<I>(&self, unit: impl Into<String>, states: I)
    where
        I: IntoIterator<Item = HealthState>,
    {
        self.scripts
            .lock()
            .insert(unit.into(), states.into_iter().collect());
    }

    /// All recorded probe calls, in invocation order.
    #[must_use]
    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().clone()
    }

    /// Number of probes recorded for one unit.
    #[must_use]
    pub fn probe_count(&self, unit: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.unit == unit)
            .count()
    }

    fn next_state(&self, unit: &str) -> HealthState {
        let mut scripts = self.scripts.lock();
        scripts.get_mut(unit).map_or(self.default_state, |script| {
            if script.len() > 1 {
                script.pop_front().unwrap_or(self.default_state)
            } else {
                script.front().copied().unwrap_or(self.default_state)
            }
        })
    }
}

impl Default for MockProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProber for MockProber {
    async fn probe(&self, unit: &UnitSpec) -> Result<HealthState> {
        let answered = self.next_state(unit.name());

        self.calls.lock().push(ProbeCall {
            unit: unit.name().to_string(),
            at: Instant::now(),
            answered,
        });

        Ok(answered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_plan::HealthCheck;

    fn unit(name: &str) -> UnitSpec {
        UnitSpec::new(
            name,
            HealthCheck::Tcp {
                addr: "127.0.0.1:1".parse().unwrap(),
                interval: None,
                timeout: None,
            },
        )
    }

    #[tokio::test]
    async fn script_replays_and_repeats_final_state() {
        let prober = MockProber::new();
        prober.script(
            "a",
            [
                HealthState::Indeterminate,
                HealthState::Unhealthy,
                HealthState::Healthy,
            ],
        );

        let a = unit("a");
        assert_eq!(prober.probe(&a).await.unwrap(), HealthState::Indeterminate);
        assert_eq!(prober.probe(&a).await.unwrap(), HealthState::Unhealthy);
        assert_eq!(prober.probe(&a).await.unwrap(), HealthState::Healthy);
        assert_eq!(prober.probe(&a).await.unwrap(), HealthState::Healthy);

        assert_eq!(prober.probe_count("a"), 4);
    }

    #[tokio::test]
    async fn unscripted_units_answer_the_default() {
        let prober = MockProber::answering(HealthState::Unhealthy);
        assert_eq!(
            prober.probe(&unit("b")).await.unwrap(),
            HealthState::Unhealthy
        );
    }
}
