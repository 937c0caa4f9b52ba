//! Reference deployment backend that runs units as local child processes.
//!
//! Units are spawned from the launch information on their specs; child
//! stdout/stderr is re-emitted line by line through `tracing`, liveness is
//! checked with a zero signal, graceful shutdown is SIGTERM and forced
//! shutdown SIGKILL.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use stagehand_backend::{DeploymentBackend, Error, Result};
use stagehand_plan::{LaunchSpec, Plan, ShutdownMode};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Deployment backend spawning one local process per unit.
pub struct ProcessBackend {
    launch_specs: HashMap<String, LaunchSpec>,
    processes: Arc<Mutex<HashMap<String, u32>>>,
}

impl ProcessBackend {
    /// Creates a backend managing the given launchable units.
    #[must_use]
    pub fn new(units: impl IntoIterator<Item = (String, LaunchSpec)>) -> Self {
        Self {
            launch_specs: units.into_iter().collect(),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates a backend for every unit in the plan that carries launch
    /// information.
    #[must_use]
    pub fn from_plan(plan: &Plan) -> Self {
        Self::new(plan.units().filter_map(|unit| {
            unit.launch()
                .map(|launch| (unit.name().to_string(), launch.clone()))
        }))
    }

    fn pid_of(&self, name: &str) -> Option<u32> {
        self.processes.lock().get(name).copied()
    }

    fn spawn_unit(&self, name: &str) -> Result<()> {
        let Some(spec) = self.launch_specs.get(name) else {
            return Err(Error::UnknownUnit(name.to_string()));
        };

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(ref working_dir) = spec.working_dir {
            cmd.current_dir(working_dir);
        }

        debug!(unit = %name, "spawning process: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| Error::StartFailed {
            unit: name.to_string(),
            reason: e.to_string(),
        })?;

        let Some(pid) = child.id() else {
            return Err(Error::StartFailed {
                unit: name.to_string(),
                reason: "no pid available for spawned process".to_string(),
            });
        };

        debug!(unit = %name, "process spawned with pid {}", pid);

        if let Some(stdout) = child.stdout.take() {
            let unit = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(unit = %unit, "{}", line);
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let unit = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(unit = %unit, "{}", line);
                }
            });
        }

        // Reap the child and drop its table entry, unless the unit has
        // already been restarted under a newer pid.
        let processes = Arc::clone(&self.processes);
        let unit = name.to_string();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    info!(unit = %unit, "process exited with status: {}", status);
                }
                Ok(status) => {
                    warn!(unit = %unit, "process exited with non-zero status: {}", status);
                }
                Err(e) => {
                    error!(unit = %unit, "failed to wait for process: {}", e);
                }
            }

            let mut table = processes.lock();
            if table.get(&unit) == Some(&pid) {
                table.remove(&unit);
            }
        });

        self.processes.lock().insert(name.to_string(), pid);

        Ok(())
    }

    fn send_signal(&self, name: &str, pid: u32, sig: Signal) -> Result<()> {
        #[allow(clippy::cast_possible_wrap)]
        let pid = Pid::from_raw(pid as i32);

        match signal::kill(pid, sig) {
            Ok(()) => Ok(()),
            // Already gone; nothing left to signal.
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::SignalFailed {
                unit: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Whether a pid refers to a live process.
fn pid_alive(pid: u32) -> bool {
    #[allow(clippy::cast_possible_wrap)]
    let raw_pid = pid as i32;

    unsafe { libc::kill(raw_pid, 0) == 0 }
}

#[async_trait]
impl DeploymentBackend for ProcessBackend {
    async fn start(&self, names: &[String]) -> Result<()> {
        for name in names {
            if self.pid_of(name).is_some_and(pid_alive) {
                debug!(unit = %name, "already running; start is a no-op");
                continue;
            }
            self.spawn_unit(name)?;
        }

        Ok(())
    }

    async fn signal(&self, name: &str, mode: ShutdownMode) -> Result<()> {
        let Some(pid) = self.pid_of(name) else {
            debug!(unit = %name, "no process to signal");
            return Ok(());
        };

        let sig = match mode {
            ShutdownMode::Graceful => Signal::SIGTERM,
            ShutdownMode::Immediate => Signal::SIGKILL,
        };

        info!(unit = %name, "sending {} to pid {}", sig, pid);
        self.send_signal(name, pid, sig)
    }

    async fn force_stop(&self, name: &str) -> Result<()> {
        let Some(pid) = self.pid_of(name) else {
            debug!(unit = %name, "no process to force-stop");
            return Ok(());
        };

        warn!(unit = %name, "sending SIGKILL to pid {}", pid);
        self.send_signal(name, pid, Signal::SIGKILL)
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        Ok(self.pid_of(name).is_some_and(pid_alive))
    }

    async fn list_running(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .processes
            .lock()
            .iter()
            .filter(|&(_, &pid)| pid_alive(pid))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
