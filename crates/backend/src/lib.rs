//! Abstract interface to the system that actually starts and stops units.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::{Error, Result};

use async_trait::async_trait;
use stagehand_plan::ShutdownMode;

/// External collaborator that manipulates the infrastructure underneath
/// units. The orchestrator only ever talks to units through this trait;
/// it never touches processes or containers directly.
#[async_trait]
pub trait DeploymentBackend
where
    Self: Send + Sync + 'static,
{
    /// Starts the named units. Backends may batch the request or fan out
    /// one call per unit; both are valid.
    async fn start(&self, names: &[String]) -> Result<()>;

    /// Sends a shutdown request to one unit. `Graceful` asks the unit to
    /// exit cleanly; `Immediate` terminates it outright.
    async fn signal(&self, name: &str, mode: ShutdownMode) -> Result<()>;

    /// Forcibly stops one unit. Escalation path after a graceful request
    /// went unanswered.
    async fn force_stop(&self, name: &str) -> Result<()>;

    /// Whether the named unit currently has a running process.
    async fn is_running(&self, name: &str) -> Result<bool>;

    /// Names of all units the backend currently reports as running.
    async fn list_running(&self) -> Result<Vec<String>>;
}
