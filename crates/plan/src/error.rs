use thiserror::Error;

/// Result type for plan construction and config loading.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors arising while validating a plan or loading a run configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// A dependency names a unit in the same or a later tier.
    #[error(
        "unit '{unit}' (tier {unit_tier}) depends on '{dependency}' (tier {dependency_tier}); dependencies must live in a strictly lower tier"
    )]
    DependencyOrder {
        /// The dependent unit.
        unit: String,

        /// Tier of the dependent unit.
        unit_tier: usize,

        /// The dependency that is ordered incorrectly.
        dependency: String,

        /// Tier of the dependency.
        dependency_tier: usize,
    },

    /// Two units in the plan share a name.
    #[error("duplicate unit name '{0}'")]
    DuplicateUnit(String),

    /// A unit was declared with an empty name.
    #[error("unit names must be non-empty")]
    EmptyUnitName,

    /// Failed to read a run configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a run configuration document.
    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    /// A dependency references a unit that does not exist in the plan.
    #[error("unit '{unit}' depends on unknown unit '{dependency}'")]
    UnknownDependency {
        /// The dependent unit.
        unit: String,

        /// The missing dependency.
        dependency: String,
    },
}
