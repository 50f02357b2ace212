//! Per-saga façade and the coordinator that creates and recovers sagas

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::errors::SagaError;
use crate::log::SagaLog;
use crate::messages::SagaMessage;
use crate::state::{SagaId, SagaState, TaskId};
use crate::stats::{SagaStats, SagaStatsSnapshot};

/// Handle binding one saga id to a shared durable log.
///
/// Each task-lifecycle call builds the matching message and appends it
/// synchronously, propagating the log's error untouched; the call
/// returns only once the append durably succeeded or failed. The handle
/// caches no state: [`state`](Saga::state) always reconstructs fresh
/// from the log, so a handle can never diverge from durable truth.
///
/// The caller driving forward execution logs `start_task` before
/// dispatching work to an executor and `end_task` with the serialized
/// result once it finishes, successfully or not.
pub struct Saga {
    id: SagaId,
    log: Arc<dyn SagaLog>,
    stats: Arc<SagaStats>,
}

impl Saga {
    /// Id of the saga this handle drives
    pub fn id(&self) -> &SagaId {
        &self.id
    }

    /// Current state, reconstructed from the durable history
    pub fn state(&self) -> Result<SagaState, SagaError> {
        self.log.reconstruct(&self.id)
    }

    /// Record that forward execution of a task began
    pub fn start_task(&self, task_id: impl Into<TaskId>, data: Vec<u8>) -> Result<(), SagaError> {
        self.append(SagaMessage::start_task(self.id.clone(), task_id, data))
    }

    /// Record that forward execution of a task finished
    pub fn end_task(&self, task_id: impl Into<TaskId>, data: Vec<u8>) -> Result<(), SagaError> {
        self.append(SagaMessage::end_task(self.id.clone(), task_id, data))
    }

    /// Record that compensation of a task began
    pub fn start_comp_task(
        &self,
        task_id: impl Into<TaskId>,
        data: Vec<u8>,
    ) -> Result<(), SagaError> {
        self.append(SagaMessage::start_comp_task(self.id.clone(), task_id, data))
    }

    /// Record that compensation of a task finished
    pub fn end_comp_task(
        &self,
        task_id: impl Into<TaskId>,
        data: Vec<u8>,
    ) -> Result<(), SagaError> {
        self.append(SagaMessage::end_comp_task(self.id.clone(), task_id, data))
    }

    /// Record that the saga will roll back
    pub fn abort_saga(&self) -> Result<(), SagaError> {
        self.append(SagaMessage::abort_saga(self.id.clone()))?;
        self.stats.sagas_aborted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(saga_id = %self.id, "saga aborted");
        Ok(())
    }

    /// Record that the saga finished
    pub fn end_saga(&self) -> Result<(), SagaError> {
        self.append(SagaMessage::end_saga(self.id.clone()))?;
        self.stats.sagas_completed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(saga_id = %self.id, "saga completed");
        Ok(())
    }

    fn append(&self, message: SagaMessage) -> Result<(), SagaError> {
        let kind = message.kind();
        match self.log.log_message(message) {
            Ok(()) => {
                self.stats.messages_logged.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(saga_id = %self.id, message = kind, "message logged");
                Ok(())
            }
            Err(err) => {
                if matches!(err, SagaError::LogAppend(_)) {
                    self.stats.log_failures.fetch_add(1, Ordering::Relaxed);
                }
                tracing::warn!(saga_id = %self.id, message = kind, error = %err, "append rejected");
                Err(err)
            }
        }
    }
}

/// Creates and recovers [`Saga`] handles over one injected log.
///
/// A single coordinator is expected to manage thousands of independent
/// sagas; handles are cheap (an id plus two `Arc`s) and sagas share no
/// state with one another.
pub struct SagaCoordinator {
    log: Arc<dyn SagaLog>,
    stats: Arc<SagaStats>,
}

impl SagaCoordinator {
    pub fn new(log: Arc<dyn SagaLog>) -> Self {
        Self {
            log,
            stats: Arc::new(SagaStats::new()),
        }
    }

    /// Durably start a new saga and hand back its handle.
    pub fn make_saga(
        &self,
        saga_id: impl Into<SagaId>,
        job: Vec<u8>,
    ) -> Result<Saga, SagaError> {
        let saga_id = saga_id.into();
        self.log.start_saga(&saga_id, &job)?;
        self.stats.sagas_made.fetch_add(1, Ordering::Relaxed);
        tracing::info!(saga_id = %saga_id, "saga started");
        Ok(self.handle(saga_id))
    }

    /// Recover the handle for an already-logged saga.
    ///
    /// Reconstructs the history first, so a missing saga is
    /// [`SagaError::NotFound`] and a damaged one is
    /// [`SagaError::CorruptedLog`] before any new message is appended.
    pub fn resume_saga(&self, saga_id: impl Into<SagaId>) -> Result<Saga, SagaError> {
        let saga_id = saga_id.into();
        self.log.reconstruct(&saga_id)?;
        self.stats.sagas_resumed.fetch_add(1, Ordering::Relaxed);
        tracing::info!(saga_id = %saga_id, "saga resumed");
        Ok(self.handle(saga_id))
    }

    /// Ids of every logged saga that has not completed.
    ///
    /// The recovery sweep after a scheduler restart: resume each of
    /// these and drive its remaining tasks or compensations.
    pub fn active_sagas(&self) -> Result<Vec<SagaId>, SagaError> {
        let mut active = Vec::new();
        for saga_id in self.log.list_sagas()? {
            let state = self.log.reconstruct(&saga_id)?;
            if !state.is_completed() {
                active.push(saga_id);
            }
        }
        Ok(active)
    }

    /// Counters for everything this coordinator and its handles logged
    pub fn stats(&self) -> SagaStatsSnapshot {
        self.stats.snapshot()
    }

    fn handle(&self, id: SagaId) -> Saga {
        Saga {
            id,
            log: Arc::clone(&self.log),
            stats: Arc::clone(&self.stats),
        }
    }
}
