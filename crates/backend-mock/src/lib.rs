//! Instrumented, scriptable deployment backend for orchestrator tests.
//!
//! Every call is recorded with a timestamp so tests can assert ordering
//! and counting properties; per-unit behaviors simulate start failures,
//! slow backends, crash loops and units that ignore shutdown signals.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use stagehand_backend::{DeploymentBackend, Error, Result};
use stagehand_plan::ShutdownMode;
use tokio::time::Instant;

/// The kind of backend call that was recorded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallKind {
    /// A start request.
    Start,

    /// A shutdown signal with the given mode.
    Signal(ShutdownMode),

    /// A forced stop.
    ForceStop,

    /// A running-state query.
    IsRunning,

    /// A listing of running units.
    ListRunning,
}

/// One recorded backend invocation.
#[derive(Clone, Debug)]
pub struct BackendCall {
    /// What was called.
    pub kind: CallKind,

    /// The unit the call addressed, if any.
    pub unit: Option<String>,

    /// When the call arrived.
    pub at: Instant,
}

/// Scripted behavior for one unit.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnitBehavior {
    /// The first N start calls fail with a start error.
    pub start_failures: u32,

    /// Time each start call takes before returning.
    pub start_delay: Duration,

    /// The unit exits immediately after a successful start (crash loop).
    pub exits_after_start: bool,

    /// Graceful signals are ignored; only forced stops work.
    pub ignore_graceful: bool,

    /// Even forced stops are ignored; the unit never stops.
    pub ignore_force: bool,
}

#[derive(Default)]
struct Inner {
    running: HashSet<String>,
    behaviors: HashMap<String, UnitBehavior>,
    unavailable: bool,
}

/// In-memory deployment backend with full call recording.
#[derive(Default)]
pub struct MockBackend {
    inner: Mutex<Inner>,
    calls: Mutex<Vec<BackendCall>>,
}

impl MockBackend {
    /// Creates a backend with no units running and no scripted behavior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the behavior of one unit.
    pub fn set_behavior(&self, unit: impl Into<String>, behavior: UnitBehavior) {
        self.inner.lock().behaviors.insert(unit.into(), behavior);
    }

    /// Marks a unit as currently running, as if started out-of-band.
    pub fn set_running(&self, unit: impl Into<String>) {
        self.inner.lock().running.insert(unit.into());
    }

    /// Makes every subsequent call fail with `Error::Unavailable`.
    pub fn set_unavailable(&self) {
        self.inner.lock().unavailable = true;
    }

    /// All recorded calls, in arrival order.
    #[must_use]
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    /// Recorded calls of one kind addressed to one unit, in order.
    #[must_use]
    pub fn calls_for(&self, unit: &str, kind: CallKind) -> Vec<BackendCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.kind == kind && call.unit.as_deref() == Some(unit))
            .cloned()
            .collect()
    }

    /// Number of start calls recorded for one unit.
    #[must_use]
    pub fn start_count(&self, unit: &str) -> usize {
        self.calls_for(unit, CallKind::Start).len()
    }

    /// Number of forced stops recorded for one unit.
    #[must_use]
    pub fn force_stop_count(&self, unit: &str) -> usize {
        self.calls_for(unit, CallKind::ForceStop).len()
    }

    /// Number of shutdown signals (any mode) recorded for one unit.
    #[must_use]
    pub fn signal_count(&self, unit: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| {
                matches!(call.kind, CallKind::Signal(_)) && call.unit.as_deref() == Some(unit)
            })
            .count()
    }

    /// Whether the backend currently considers the unit running.
    #[must_use]
    pub fn running(&self, unit: &str) -> bool {
        self.inner.lock().running.contains(unit)
    }

    fn record(&self, kind: CallKind, unit: Option<&str>) {
        self.calls.lock().push(BackendCall {
            kind,
            unit: unit.map(ToString::to_string),
            at: Instant::now(),
        });
    }

    fn check_available(&self) -> Result<()> {
        if self.inner.lock().unavailable {
            Err(Error::Unavailable("mock backend switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DeploymentBackend for MockBackend {
    async fn start(&self, names: &[String]) -> Result<()> {
        for name in names {
            self.record(CallKind::Start, Some(name));
            self.check_available()?;

            let (fail_this_call, delay) = {
                let mut inner = self.inner.lock();
                let behavior = inner.behaviors.entry(name.clone()).or_default();
                let delay = behavior.start_delay;
                if behavior.start_failures > 0 {
                    behavior.start_failures -= 1;
                    (true, delay)
                } else {
                    (false, delay)
                }
            };

            // Delay outside the lock so tier peers run concurrently.
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if fail_this_call {
                return Err(Error::StartFailed {
                    unit: name.clone(),
                    reason: "scripted start failure".to_string(),
                });
            }

            let mut inner = self.inner.lock();
            let crashed = inner
                .behaviors
                .get(name)
                .is_some_and(|behavior| behavior.exits_after_start);
            if crashed {
                inner.running.remove(name);
            } else {
                inner.running.insert(name.clone());
            }
        }

        Ok(())
    }

    async fn signal(&self, name: &str, mode: ShutdownMode) -> Result<()> {
        self.record(CallKind::Signal(mode), Some(name));
        self.check_available()?;

        let mut inner = self.inner.lock();
        let behavior = inner.behaviors.get(name).copied().unwrap_or_default();

        let honored = match mode {
            ShutdownMode::Graceful => !behavior.ignore_graceful,
            ShutdownMode::Immediate => !behavior.ignore_force,
        };

        if honored {
            inner.running.remove(name);
        }

        Ok(())
    }

    async fn force_stop(&self, name: &str) -> Result<()> {
        self.record(CallKind::ForceStop, Some(name));
        self.check_available()?;

        let mut inner = self.inner.lock();
        let behavior = inner.behaviors.get(name).copied().unwrap_or_default();

        if !behavior.ignore_force {
            inner.running.remove(name);
        }

        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        self.record(CallKind::IsRunning, Some(name));
        self.check_available()?;

        Ok(self.inner.lock().running.contains(name))
    }

    async fn list_running(&self) -> Result<Vec<String>> {
        self.record(CallKind::ListRunning, None);
        self.check_available()?;

        let mut names: Vec<String> = self.inner.lock().running.iter().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_marks_units_running_and_records_calls() {
        let backend = MockBackend::new();
        backend
            .start(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert!(backend.is_running("a").await.unwrap());
        assert_eq!(backend.list_running().await.unwrap(), vec!["a", "b"]);
        assert_eq!(backend.start_count("a"), 1);
        assert_eq!(backend.start_count("b"), 1);
    }

    #[tokio::test]
    async fn scripted_start_failures_are_consumed_in_order() {
        let backend = MockBackend::new();
        backend.set_behavior(
            "a",
            UnitBehavior {
                start_failures: 1,
                ..UnitBehavior::default()
            },
        );

        assert!(backend.start(&["a".to_string()]).await.is_err());
        assert!(backend.start(&["a".to_string()]).await.is_ok());
        assert!(backend.is_running("a").await.unwrap());
    }

    #[tokio::test]
    async fn graceful_signal_is_ignored_when_scripted() {
        let backend = MockBackend::new();
        backend.set_running("stubborn");
        backend.set_behavior(
            "stubborn",
            UnitBehavior {
                ignore_graceful: true,
                ..UnitBehavior::default()
            },
        );

        backend
            .signal("stubborn", ShutdownMode::Graceful)
            .await
            .unwrap();
        assert!(backend.is_running("stubborn").await.unwrap());

        backend.force_stop("stubborn").await.unwrap();
        assert!(!backend.is_running("stubborn").await.unwrap());
    }

    #[tokio::test]
    async fn unavailable_backend_rejects_everything() {
        let backend = MockBackend::new();
        backend.set_unavailable();

        let error = backend.start(&["a".to_string()]).await.unwrap_err();
        assert!(error.is_unavailable());
        assert!(backend.list_running().await.is_err());
    }
}
