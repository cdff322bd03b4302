use thiserror::Error;

/// Unified error type for `ipscomp` operations.
#[derive(Debug, Error)]
pub enum OpticsError {
    /// Raised when a perpendicular basis is required but the axis is parallel to `k`.
    #[error("axis is numerically parallel to the propagation direction in {context}")]
    DegenerateAxis {
        /// Human-readable context describing the operation.
        context: &'static str,
    },

    /// Raised when a layer or stack description cannot be realised.
    #[error("invalid stack specification: {reason}")]
    InvalidStackSpec { reason: String },

    /// Raised when a parameter range expands to zero grid points.
    #[error("parameter range for {parameter} yields no grid points")]
    GridEmpty { parameter: &'static str },

    /// Raised when a parameter range would expand past the per-range point limit.
    #[error("parameter range for {parameter} exceeds {limit} grid points")]
    GridTooLarge { parameter: &'static str, limit: usize },

    /// Raised when a persisted progress row lacks a requested column.
    #[error("column `{column}` not found; available columns: {available:?}")]
    MissingColumn {
        /// The column that was requested.
        column: String,
        /// Columns present in the row, for diagnostics.
        available: Vec<String>,
    },

    /// Raised when a spectral weight table is empty, non-positive, or not normalized.
    #[error("spectral weights must be strictly positive and sum to one (slack {slack})")]
    InvalidWeights { slack: f64 },

    /// Raised when a viewing angle lies outside its domain.
    #[error("angle `{name}` = {value} is outside its valid domain")]
    InvalidAngle { name: &'static str, value: f64 },

    /// Raised when a selector name does not map onto a known variant.
    #[error("unknown {what} `{name}`")]
    UnknownName { what: &'static str, name: String },
}

impl OpticsError {
    /// Helper to raise when a transmission eigenstate is undefined.
    pub fn degenerate(context: &'static str) -> Self {
        Self::DegenerateAxis { context }
    }

    /// Helper to format an [`InvalidStackSpec`](OpticsError::InvalidStackSpec) error.
    pub fn invalid_stack<S: Into<String>>(reason: S) -> Self {
        Self::InvalidStackSpec {
            reason: reason.into(),
        }
    }

    /// Helper for empty parameter ranges.
    pub fn grid_empty(parameter: &'static str) -> Self {
        Self::GridEmpty { parameter }
    }

    /// Helper for selector names that fall outside the alias tables.
    pub fn unknown_name<S: Into<String>>(what: &'static str, name: S) -> Self {
        Self::UnknownName {
            what,
            name: name.into(),
        }
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, OpticsError>;
