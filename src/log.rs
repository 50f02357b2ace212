//! The durable-log capability: contract, replay, and an in-memory store

use std::collections::HashMap;
use std::sync::RwLock;

use crate::errors::SagaError;
use crate::messages::SagaMessage;
use crate::state::{update_saga_state, SagaId, SagaState};

/// Append-only durable store for saga messages.
///
/// The log is injected wherever the core needs durability; any store
/// satisfying this contract (memory, file, database, replicated log) is
/// pluggable without touching the state machine. Requirements:
///
/// - `start_saga` durably records the initiating fact and must precede
///   every other message for that id; a second start for the same id is
///   [`SagaError::AlreadyStarted`].
/// - `log_message` durably appends one message. Appends for one saga are
///   totally ordered as observed by [`messages`](SagaLog::messages);
///   appends for different sagas need no coordination. A failed append
///   leaves the durable record unchanged. Implementations must reject a
///   message that does not apply cleanly to the replayed history
///   (returning the transition error untouched, writing nothing), so a
///   history that reached disk can only fail replay if the store itself
///   was damaged.
/// - `messages` returns the full history for an id in append order,
///   observing a consistent prefix of any in-flight appends.
/// - `list_sagas` returns the id of every saga present in the log,
///   terminal or not.
pub trait SagaLog: Send + Sync + 'static {
    /// Durably record that a saga exists, with its job payload.
    fn start_saga(&self, saga_id: &SagaId, job: &[u8]) -> Result<(), SagaError>;

    /// Durably append one message to its saga's history.
    fn log_message(&self, message: SagaMessage) -> Result<(), SagaError>;

    /// All messages for a saga, in append order.
    fn messages(&self, saga_id: &SagaId) -> Result<Vec<SagaMessage>, SagaError>;

    /// Ids of every saga the log knows about.
    fn list_sagas(&self) -> Result<Vec<SagaId>, SagaError>;

    /// Current state of a saga, derived by folding its full history
    /// through the transition function.
    fn reconstruct(&self, saga_id: &SagaId) -> Result<SagaState, SagaError> {
        let messages = self.messages(saga_id)?;
        replay(saga_id, &messages)
    }
}

/// Fold an ordered message history into the saga's current state.
///
/// The history must begin with the StartSaga fact, which seeds the
/// initial state; every later message is applied through
/// [`update_saga_state`]. Any invalid intermediate step means the
/// durable history itself is inconsistent, so the whole replay fails
/// with [`SagaError::CorruptedLog`] instead of returning a best-effort
/// state.
pub fn replay(saga_id: &SagaId, messages: &[SagaMessage]) -> Result<SagaState, SagaError> {
    let mut iter = messages.iter();
    let state = match iter.next() {
        Some(SagaMessage::StartSaga { saga_id: id, job }) if id == saga_id => {
            SagaState::new(id.clone(), job.clone())
        }
        Some(other) => {
            return Err(corrupted(
                saga_id,
                format!("history begins with {} instead of start_saga", other.kind()),
            ))
        }
        None => return Err(SagaError::NotFound(saga_id.clone())),
    };

    iter.try_fold(state, |state, message| {
        update_saga_state(&state, message).map_err(|err| corrupted(saga_id, err.to_string()))
    })
}

fn corrupted(saga_id: &SagaId, reason: impl Into<Box<str>>) -> SagaError {
    let reason = reason.into();
    tracing::error!(saga_id = %saga_id, reason = %reason, "saga log corrupted");
    SagaError::CorruptedLog {
        saga_id: saga_id.clone(),
        reason,
    }
}

/// Validate an append against the saga's replayed history.
///
/// Shared by log implementations: replays `existing` and applies
/// `message` on top, so an invalid message is rejected before anything
/// reaches durable storage.
///
/// Each call is linear in the history, so a saga's lifetime append cost
/// grows quadratically with its message count. Histories stay short in
/// practice (a start/end pair per task plus the saga edges); a log
/// implementation serving very long sagas can cache the folded state
/// under its append lock instead of calling this.
pub(crate) fn check_append(
    saga_id: &SagaId,
    existing: &[SagaMessage],
    message: &SagaMessage,
) -> Result<(), SagaError> {
    let state = replay(saga_id, existing)?;
    update_saga_state(&state, message)?;
    Ok(())
}

/// In-memory [`SagaLog`] for tests and single-process schedulers.
///
/// Appends for one saga serialize on the write lock; reads observe a
/// consistent snapshot of each history.
pub struct InMemorySagaLog {
    sagas: RwLock<HashMap<SagaId, Vec<SagaMessage>>>,
}

impl InMemorySagaLog {
    pub fn new() -> Self {
        Self {
            sagas: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySagaLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SagaLog for InMemorySagaLog {
    fn start_saga(&self, saga_id: &SagaId, job: &[u8]) -> Result<(), SagaError> {
        let mut sagas = self
            .sagas
            .write()
            .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        if sagas.contains_key(saga_id) {
            return Err(SagaError::AlreadyStarted(saga_id.clone()));
        }
        sagas.insert(
            saga_id.clone(),
            vec![SagaMessage::start_saga(saga_id.clone(), job.to_vec())],
        );
        tracing::debug!(saga_id = %saga_id, "saga history started");
        Ok(())
    }

    fn log_message(&self, message: SagaMessage) -> Result<(), SagaError> {
        if matches!(message, SagaMessage::StartSaga { .. }) {
            return Err(SagaError::LogAppend(
                "start_saga must go through the start operation".into(),
            ));
        }
        let mut sagas = self
            .sagas
            .write()
            .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        let saga_id = message.saga_id().clone();
        let history = sagas
            .get_mut(&saga_id)
            .ok_or_else(|| SagaError::NotFound(saga_id.clone()))?;
        check_append(&saga_id, history, &message)?;
        history.push(message);
        Ok(())
    }

    fn messages(&self, saga_id: &SagaId) -> Result<Vec<SagaMessage>, SagaError> {
        let sagas = self
            .sagas
            .read()
            .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        sagas
            .get(saga_id)
            .cloned()
            .ok_or_else(|| SagaError::NotFound(saga_id.clone()))
    }

    fn list_sagas(&self) -> Result<Vec<SagaId>, SagaError> {
        let sagas = self
            .sagas
            .read()
            .map_err(|e| SagaError::LogAppend(e.to_string().into()))?;
        Ok(sagas.keys().cloned().collect())
    }
}
