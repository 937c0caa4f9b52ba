use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::Result;
use crate::plan::Plan;
use crate::policy::RunPolicy;
use crate::unit::{HealthCheck, LaunchSpec, ShutdownMode, UnitSpec};

/// One run configuration document: policy overrides plus the ordered tier
/// list. All durations are expressed in milliseconds.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Policy overrides; anything omitted falls back to the defaults.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Ordered tiers of unit configurations.
    pub tiers: Vec<Vec<UnitConfig>>,
}

/// Policy overrides as they appear in the config document.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Maximum start attempts per unit.
    pub max_attempts: Option<u32>,

    /// Startup deadline per attempt, in milliseconds.
    pub unit_timeout_ms: Option<u64>,

    /// Poll interval, in milliseconds.
    pub probe_interval_ms: Option<u64>,

    /// Graceful shutdown deadline, in milliseconds.
    pub graceful_timeout_ms: Option<u64>,

    /// Forced shutdown deadline, in milliseconds.
    pub force_timeout_ms: Option<u64>,

    /// Keep processing later tiers after a startup tier fails.
    pub continue_on_tier_failure: Option<bool>,
}

/// One unit as it appears in the config document.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitConfig {
    /// Unit name, unique within the run.
    pub name: String,

    /// Health check descriptor.
    pub health_check: HealthCheckConfig,

    /// Shutdown mode; defaults to graceful.
    #[serde(default)]
    pub shutdown_mode: ShutdownModeConfig,

    /// Names of units that must be healthy before this unit's tier starts.
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Per-unit override of the startup deadline, in milliseconds.
    pub start_timeout_ms: Option<u64>,

    /// Launch information for process-spawning backends.
    pub launch: Option<LaunchConfig>,
}

/// Shutdown mode as spelled in the config document.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownModeConfig {
    /// Ask the unit to stop and wait for it.
    #[default]
    Graceful,

    /// Kill the unit outright.
    Immediate,
}

/// Health check descriptor as it appears in the config document.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HealthCheckConfig {
    /// Command whose exit status decides health.
    Exec {
        /// Program followed by its arguments.
        command: Vec<String>,

        /// Poll interval override, in milliseconds.
        interval_ms: Option<u64>,

        /// Per-call timeout override, in milliseconds.
        timeout_ms: Option<u64>,
    },

    /// TCP connect check.
    Tcp {
        /// Address to connect to.
        addr: SocketAddr,

        /// Poll interval override, in milliseconds.
        interval_ms: Option<u64>,

        /// Per-call timeout override, in milliseconds.
        timeout_ms: Option<u64>,
    },

    /// HTTP GET check.
    Http {
        /// URL to request.
        url: Url,

        /// Poll interval override, in milliseconds.
        interval_ms: Option<u64>,

        /// Per-call timeout override, in milliseconds.
        timeout_ms: Option<u64>,
    },
}

/// Launch stanza for the reference process backend.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LaunchConfig {
    /// Program to execute.
    pub program: String,

    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables set for the process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory for the process.
    pub working_dir: Option<PathBuf>,
}

impl RunConfig {
    /// Loads a run configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Builds the validated plan and effective policy from this document.
    ///
    /// # Errors
    ///
    /// Returns an error if plan validation rejects the tier list.
    pub fn build(self) -> Result<(Plan, RunPolicy)> {
        let policy = self.policy.into_policy();

        let tiers = self
            .tiers
            .into_iter()
            .map(|tier| tier.into_iter().map(UnitConfig::into_spec).collect())
            .collect();

        Ok((Plan::new(tiers)?, policy))
    }
}

impl PolicyConfig {
    fn into_policy(self) -> RunPolicy {
        let defaults = RunPolicy::default();

        RunPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            unit_timeout: self
                .unit_timeout_ms
                .map_or(defaults.unit_timeout, Duration::from_millis),
            probe_interval: self
                .probe_interval_ms
                .map_or(defaults.probe_interval, Duration::from_millis),
            graceful_timeout: self
                .graceful_timeout_ms
                .map_or(defaults.graceful_timeout, Duration::from_millis),
            force_timeout: self
                .force_timeout_ms
                .map_or(defaults.force_timeout, Duration::from_millis),
            continue_on_tier_failure: self
                .continue_on_tier_failure
                .unwrap_or(defaults.continue_on_tier_failure),
        }
    }
}

impl UnitConfig {
    fn into_spec(self) -> UnitSpec {
        let mut unit = UnitSpec::new(self.name, self.health_check.into_check())
            .with_dependencies(self.depends_on)
            .with_shutdown_mode(match self.shutdown_mode {
                ShutdownModeConfig::Graceful => ShutdownMode::Graceful,
                ShutdownModeConfig::Immediate => ShutdownMode::Immediate,
            });

        if let Some(ms) = self.start_timeout_ms {
            unit = unit.with_start_timeout(Duration::from_millis(ms));
        }

        if let Some(launch) = self.launch {
            let mut spec = LaunchSpec::new(launch.program).with_args(launch.args);
            for (key, value) in launch.env {
                spec = spec.with_env(key, value);
            }
            if let Some(dir) = launch.working_dir {
                spec = spec.with_working_dir(dir);
            }
            unit = unit.with_launch(spec);
        }

        unit
    }
}

impl HealthCheckConfig {
    fn into_check(self) -> HealthCheck {
        match self {
            Self::Exec {
                command,
                interval_ms,
                timeout_ms,
            } => HealthCheck::Exec {
                command,
                interval: interval_ms.map(Duration::from_millis),
                timeout: timeout_ms.map(Duration::from_millis),
            },
            Self::Tcp {
                addr,
                interval_ms,
                timeout_ms,
            } => HealthCheck::Tcp {
                addr,
                interval: interval_ms.map(Duration::from_millis),
                timeout: timeout_ms.map(Duration::from_millis),
            },
            Self::Http {
                url,
                interval_ms,
                timeout_ms,
            } => HealthCheck::Http {
                url,
                interval: interval_ms.map(Duration::from_millis),
                timeout: timeout_ms.map(Duration::from_millis),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"{
        "policy": {
            "max_attempts": 5,
            "unit_timeout_ms": 60000,
            "continue_on_tier_failure": true
        },
        "tiers": [
            [
                {
                    "name": "postgres",
                    "health_check": { "kind": "exec", "command": ["pg_isready", "-p", "5432"] },
                    "launch": { "program": "postgres", "args": ["-D", "/var/lib/pg"] }
                }
            ],
            [
                {
                    "name": "gateway",
                    "health_check": { "kind": "http", "url": "http://127.0.0.1:8081/health" },
                    "depends_on": ["postgres"],
                    "shutdown_mode": "immediate",
                    "start_timeout_ms": 15000
                }
            ]
        ]
    }"#;

    #[test]
    fn parses_and_builds_example_config() {
        let config: RunConfig = serde_json::from_str(EXAMPLE).unwrap();
        let (plan, policy) = config.build().unwrap();

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.unit_timeout, Duration::from_secs(60));
        assert!(policy.continue_on_tier_failure);
        // Unset knobs keep their defaults.
        assert_eq!(policy.graceful_timeout, Duration::from_secs(30));

        assert_eq!(plan.tier_count(), 2);
        let gateway = plan.unit("gateway").unwrap();
        assert_eq!(gateway.tier(), 1);
        assert_eq!(gateway.shutdown_mode(), ShutdownMode::Immediate);
        assert_eq!(gateway.start_timeout(), Some(Duration::from_secs(15)));
        assert!(matches!(gateway.health_check(), HealthCheck::Http { .. }));

        let postgres = plan.unit("postgres").unwrap();
        assert_eq!(postgres.launch().unwrap().program, "postgres");
    }

    #[test]
    fn loads_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();

        let config = RunConfig::from_file(file.path()).unwrap();
        assert_eq!(config.tiers.len(), 2);
    }

    #[test]
    fn rejects_unknown_fields() {
        let result: std::result::Result<RunConfig, _> =
            serde_json::from_str(r#"{ "tiers": [], "frobnicate": true }"#);
        assert!(result.is_err());
    }

    #[test]
    fn config_dependency_violations_surface_at_build() {
        let config: RunConfig = serde_json::from_str(
            r#"{
                "tiers": [[
                    { "name": "a", "health_check": { "kind": "tcp", "addr": "127.0.0.1:1" }, "depends_on": ["b"] },
                    { "name": "b", "health_check": { "kind": "tcp", "addr": "127.0.0.1:2" } }
                ]]
            }"#,
        )
        .unwrap();

        assert!(config.build().is_err());
    }
}
