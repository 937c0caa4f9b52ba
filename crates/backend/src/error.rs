use thiserror::Error;

/// Result type for deployment backend calls.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by a deployment backend.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Sending a shutdown signal to a unit failed.
    #[error("failed to signal unit '{unit}': {reason}")]
    SignalFailed {
        /// The unit that could not be signalled.
        unit: String,

        /// Backend-specific failure description.
        reason: String,
    },

    /// Starting a unit failed. Counted as a failed attempt by the
    /// orchestrator.
    #[error("failed to start unit '{unit}': {reason}")]
    StartFailed {
        /// The unit that could not be started.
        unit: String,

        /// Backend-specific failure description.
        reason: String,
    },

    /// The backend itself is unreachable. Fatal to the whole run.
    #[error("deployment backend unavailable: {0}")]
    Unavailable(String),

    /// The backend has no unit registered under the given name.
    #[error("unknown unit '{0}'")]
    UnknownUnit(String),
}

impl Error {
    /// Whether this error means the backend as a whole is unreachable,
    /// in which case the orchestrator aborts the run instead of retrying.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
