//! Health probing for orchestrated units: one trait, three concrete
//! check kinds (exec, tcp, http).
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod standard;

pub use error::{Error, Result};
pub use standard::StandardProber;

use async_trait::async_trait;
use stagehand_plan::UnitSpec;

/// Outcome of one health check.
///
/// `Indeterminate` means the check could not reach a verdict (typically a
/// connection refused while the unit is still booting) and the caller's
/// retry loop should treat it as "not ready yet" rather than "broken".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HealthState {
    /// The unit answered its health check.
    Healthy,

    /// The unit answered, and the answer was negative.
    Unhealthy,

    /// No verdict; try again later.
    Indeterminate,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Indeterminate => write!(f, "indeterminate"),
        }
    }
}

/// Performs one health check against a unit.
///
/// Implementations must be safe to invoke repeatedly and concurrently for
/// different units, and must not block beyond their own per-call timeout.
#[async_trait]
pub trait HealthProber
where
    Self: Send + Sync + 'static,
{
    /// Checks the unit once and reports the tri-state result.
    async fn probe(&self, unit: &UnitSpec) -> Result<HealthState>;
}
