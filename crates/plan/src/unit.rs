use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

/// How a unit should be asked to stop. Carried on the unit spec and
/// dispatched as a tagged variant.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ShutdownMode {
    /// Request a clean shutdown and wait for the unit to exit on its own.
    #[default]
    Graceful,

    /// Terminate the unit without giving it a chance to clean up.
    Immediate,
}

/// Describes how to determine whether a unit is healthy.
#[derive(Clone, Debug)]
pub enum HealthCheck {
    /// Run a command; exit code zero means healthy.
    Exec {
        /// Program followed by its arguments.
        command: Vec<String>,

        /// Override for the polling interval.
        interval: Option<Duration>,

        /// Override for the per-call timeout.
        timeout: Option<Duration>,
    },

    /// Open a TCP connection to the given address.
    Tcp {
        /// Address to connect to.
        addr: SocketAddr,

        /// Override for the polling interval.
        interval: Option<Duration>,

        /// Override for the per-call timeout.
        timeout: Option<Duration>,
    },

    /// Issue an HTTP GET; a 2xx response means healthy.
    Http {
        /// URL to request.
        url: Url,

        /// Override for the polling interval.
        interval: Option<Duration>,

        /// Override for the per-call timeout.
        timeout: Option<Duration>,
    },
}

impl HealthCheck {
    /// The polling interval override carried on this check, if any.
    #[must_use]
    pub const fn interval(&self) -> Option<Duration> {
        match self {
            Self::Exec { interval, .. } | Self::Tcp { interval, .. } | Self::Http { interval, .. } => {
                *interval
            }
        }
    }

    /// The per-call timeout override carried on this check, if any.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Exec { timeout, .. } | Self::Tcp { timeout, .. } | Self::Http { timeout, .. } => {
                *timeout
            }
        }
    }
}

/// How the reference process backend launches a unit.
///
/// Opaque to the orchestrator; only backends that actually spawn local
/// processes consume it.
#[derive(Clone, Debug)]
pub struct LaunchSpec {
    /// Program to execute.
    pub program: String,

    /// Arguments passed to the program.
    pub args: Vec<String>,

    /// Environment variables set for the process.
    pub env: BTreeMap<String, String>,

    /// Working directory for the process.
    pub working_dir: Option<PathBuf>,
}

impl LaunchSpec {
    /// Creates a launch spec for the given program with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Appends arguments to the launch command line.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable for the process.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory for the process.
    #[must_use]
    pub fn with_working_dir(mut self, working_dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(working_dir.into());
        self
    }
}

/// Immutable description of one manageable service instance.
///
/// Created once per orchestration run from caller configuration. The tier
/// index is assigned by [`Plan`](crate::Plan) construction from the unit's
/// position in the tier list and never changes for the lifetime of a run.
#[derive(Clone, Debug)]
pub struct UnitSpec {
    name: String,
    tier: usize,
    health_check: HealthCheck,
    shutdown_mode: ShutdownMode,
    depends_on: BTreeSet<String>,
    start_timeout: Option<Duration>,
    launch: Option<LaunchSpec>,
}

impl UnitSpec {
    /// Creates a unit spec with the default shutdown mode and no
    /// dependencies. The tier index is assigned later by plan construction.
    #[must_use]
    pub fn new(name: impl Into<String>, health_check: HealthCheck) -> Self {
        Self {
            name: name.into(),
            tier: 0,
            health_check,
            shutdown_mode: ShutdownMode::default(),
            depends_on: BTreeSet::new(),
            start_timeout: None,
            launch: None,
        }
    }

    /// Sets the shutdown mode.
    #[must_use]
    pub const fn with_shutdown_mode(mut self, mode: ShutdownMode) -> Self {
        self.shutdown_mode = mode;
        self
    }

    /// Declares units that must be healthy before this unit's tier starts.
    ///
    /// Dependencies are informational; actual gating is tier-level. Plan
    /// construction rejects dependencies that are not in a strictly lower
    /// tier.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Overrides the run policy's startup deadline for this unit.
    #[must_use]
    pub const fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    /// Attaches launch information for backends that spawn local processes.
    #[must_use]
    pub fn with_launch(mut self, launch: LaunchSpec) -> Self {
        self.launch = Some(launch);
        self
    }

    /// The unit's name, unique within a run.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The tier index assigned by plan construction.
    #[must_use]
    pub const fn tier(&self) -> usize {
        self.tier
    }

    /// The unit's health check descriptor.
    #[must_use]
    pub const fn health_check(&self) -> &HealthCheck {
        &self.health_check
    }

    /// How the unit should be asked to stop.
    #[must_use]
    pub const fn shutdown_mode(&self) -> ShutdownMode {
        self.shutdown_mode
    }

    /// Names of units that must be healthy before this unit's tier starts.
    #[must_use]
    pub const fn depends_on(&self) -> &BTreeSet<String> {
        &self.depends_on
    }

    /// Per-unit override of the startup deadline.
    #[must_use]
    pub const fn start_timeout(&self) -> Option<Duration> {
        self.start_timeout
    }

    /// Launch information for process-spawning backends, if present.
    #[must_use]
    pub const fn launch(&self) -> Option<&LaunchSpec> {
        self.launch.as_ref()
    }

    pub(crate) fn set_tier(&mut self, tier: usize) {
        self.tier = tier;
    }

    pub(crate) fn set_shutdown_mode(&mut self, mode: ShutdownMode) {
        self.shutdown_mode = mode;
    }
}
