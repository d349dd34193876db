//! Error type shared by every estimator.

/// Errors returned by filter construction and the filter lifecycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    /// `predict`, `correct`, `reset`, `distance` or `likelihood` before `init`.
    #[error("filter used before init")]
    NotInitialized,

    #[error("invalid EKF order {0}: expected 1 or 2")]
    InvalidOrder(u8),

    /// A multiple-model filter has no member filters yet.
    #[error("no models have been added")]
    NoModels,

    /// Models can only be added before the multiple-model filter is initialised.
    #[error("models cannot be added after init")]
    ModelsLocked,

    /// Model probabilities must be finite, non-negative and not all zero.
    #[error("invalid model probabilities")]
    InvalidProbabilities,

    #[error("dimension mismatch for {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The model switch does not know how to convert between these tags.
    #[error("unknown model type: {0}")]
    UnknownModelType(String),

    /// A matrix that has to be inverted is singular (usually the innovation covariance).
    #[error("ill-conditioned matrix: {context}")]
    IllConditioned { context: &'static str },
}

pub type Result<T> = std::result::Result<T, FilterError>;
