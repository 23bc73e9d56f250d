use crate::types::SimulationId;

/// Failures raised by the engine itself: validation, generation and summarizing.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FairError {
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("cannot summarize an empty set of losses")]
    EmptyInput,

    #[error("non-finite value {value} produced during {stage}")]
    NonFinite { stage: &'static str, value: f64 },
}

impl FairError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        FairError::InvalidParameter { field, reason: reason.into() }
    }
}

/// Persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("simulation {id} not found")]
    NotFound { id: SimulationId },

    #[error("stored simulation is corrupt: {reason}")]
    Corrupt { reason: String },
}

/// Everything the service facade can surface to a front end.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] FairError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot compare: {reason}")]
    Compare { reason: String },
}

pub type FairResult<T> = Result<T, FairError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type ServiceResult<T> = Result<T, ServiceError>;
