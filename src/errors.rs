//! Error types for saga transitions and the durable log

use crate::state::SagaId;

/// Every failure the saga core reports.
///
/// The core never retries; callers always hold the prior, unchanged
/// state on error and decide themselves whether a corrected message can
/// be resubmitted.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    /// A message violated its causal precondition. Returned by the
    /// transition function and surfaced unchanged by the façade.
    #[error("invalid transition for saga {saga_id}: {reason}")]
    InvalidTransition { saga_id: SagaId, reason: Box<str> },

    /// The durable store rejected or could not complete a write. The
    /// in-memory attempt has no effect.
    #[error("log append failed: {0}")]
    LogAppend(Box<str>),

    /// Replay hit a message that does not apply cleanly inside an
    /// already-durably-logged history. The log itself is inconsistent;
    /// not retriable.
    #[error("corrupted log for saga {saga_id}: {reason}")]
    CorruptedLog { saga_id: SagaId, reason: Box<str> },

    /// No saga with this id exists in the log.
    #[error("saga {0} not found in log")]
    NotFound(SagaId),

    /// The log already holds a history for this id; a saga may be
    /// started at most once.
    #[error("saga {0} already started")]
    AlreadyStarted(SagaId),
}
