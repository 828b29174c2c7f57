use thiserror::Error;

/// Failures of the arbitration subsystem.
///
/// None of these are fatal: arbitrated execution falls back to direct execution, and an
/// administrative call that fails leaves unrelated entries untouched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ArbError {
    /// A required argument was missing or empty.
    #[error("parameter is null")]
    ParameterNull,

    /// No matching arbitration entry (or it is being deleted).
    #[error("arbitration entry not found")]
    NotFound,

    /// The participant handle does not resolve to an available participant.
    #[error("participant not found")]
    ParticipantNotFound,

    /// The primitive cannot be arbitrated, or arbitration is disabled at some scope.
    #[error("not supported")]
    NotSupported,

    /// Inverted limits or an unknown comparator type.
    #[error("parameter is out of bounds")]
    OutOfBounds,

    #[error("out of memory")]
    NoMemory,

    #[error("unspecified failure")]
    Unspecified,

    /// Reference acquisition raced with deletion of the entry.
    #[error("entry is marked for delete")]
    MarkedForDelete,

    /// The primitive queue has stopped accepting work.
    #[error("arbitration manager is shutting down")]
    ShuttingDown,

    /// Failure reported by the external execution pipeline.
    #[error("primitive execution failed: {0}")]
    Execution(String),
}

pub type ArbResult<T> = Result<T, ArbError>;
