use thiserror::Error;

/// Result type for health probe calls.
pub type Result<T> = std::result::Result<T, Error>;

/// Non-transient probe failures.
///
/// Transient conditions (connection refused, timeouts) are not errors;
/// they surface as [`HealthState::Indeterminate`](crate::HealthState).
#[derive(Debug, Error)]
pub enum Error {
    /// The unit's health check descriptor cannot be executed at all.
    #[error("invalid health check for unit '{unit}': {reason}")]
    InvalidCheck {
        /// The unit whose descriptor is unusable.
        unit: String,

        /// What is wrong with the descriptor.
        reason: String,
    },
}
