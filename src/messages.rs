//! Saga messages: immutable, tagged facts recorded in the durable log

use serde::{Deserialize, Serialize};

use crate::state::{SagaId, TaskId};

/// One durably logged fact about a saga.
///
/// Constructors stamp the ids and payload into the matching variant and
/// perform no validation; causal validity is checked only by
/// [`update_saga_state`](crate::update_saga_state) when the message is
/// applied. Payloads are opaque caller-defined bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaMessage {
    /// The saga exists and carries this job payload. Only ever the
    /// first message of a history, written by the log's start operation.
    StartSaga { saga_id: SagaId, job: Vec<u8> },
    /// The saga finished: all tasks completed, or all compensated after
    /// an abort.
    EndSaga { saga_id: SagaId },
    /// The saga will roll back; only compensating work may follow.
    AbortSaga { saga_id: SagaId },
    /// Forward execution of a task began.
    StartTask {
        saga_id: SagaId,
        task_id: TaskId,
        data: Vec<u8>,
    },
    /// Forward execution of a task finished.
    EndTask {
        saga_id: SagaId,
        task_id: TaskId,
        data: Vec<u8>,
    },
    /// Compensation of a previously started task began.
    StartCompTask {
        saga_id: SagaId,
        task_id: TaskId,
        data: Vec<u8>,
    },
    /// Compensation of a task finished.
    EndCompTask {
        saga_id: SagaId,
        task_id: TaskId,
        data: Vec<u8>,
    },
}

impl SagaMessage {
    /// Build a StartSaga message
    pub fn start_saga(saga_id: impl Into<SagaId>, job: Vec<u8>) -> Self {
        Self::StartSaga {
            saga_id: saga_id.into(),
            job,
        }
    }

    /// Build an EndSaga message
    pub fn end_saga(saga_id: impl Into<SagaId>) -> Self {
        Self::EndSaga {
            saga_id: saga_id.into(),
        }
    }

    /// Build an AbortSaga message
    pub fn abort_saga(saga_id: impl Into<SagaId>) -> Self {
        Self::AbortSaga {
            saga_id: saga_id.into(),
        }
    }

    /// Build a StartTask message
    pub fn start_task(
        saga_id: impl Into<SagaId>,
        task_id: impl Into<TaskId>,
        data: Vec<u8>,
    ) -> Self {
        Self::StartTask {
            saga_id: saga_id.into(),
            task_id: task_id.into(),
            data,
        }
    }

    /// Build an EndTask message
    pub fn end_task(
        saga_id: impl Into<SagaId>,
        task_id: impl Into<TaskId>,
        data: Vec<u8>,
    ) -> Self {
        Self::EndTask {
            saga_id: saga_id.into(),
            task_id: task_id.into(),
            data,
        }
    }

    /// Build a StartCompTask message
    pub fn start_comp_task(
        saga_id: impl Into<SagaId>,
        task_id: impl Into<TaskId>,
        data: Vec<u8>,
    ) -> Self {
        Self::StartCompTask {
            saga_id: saga_id.into(),
            task_id: task_id.into(),
            data,
        }
    }

    /// Build an EndCompTask message
    pub fn end_comp_task(
        saga_id: impl Into<SagaId>,
        task_id: impl Into<TaskId>,
        data: Vec<u8>,
    ) -> Self {
        Self::EndCompTask {
            saga_id: saga_id.into(),
            task_id: task_id.into(),
            data,
        }
    }

    /// Saga this message belongs to
    pub fn saga_id(&self) -> &SagaId {
        match self {
            Self::StartSaga { saga_id, .. } => saga_id,
            Self::EndSaga { saga_id } => saga_id,
            Self::AbortSaga { saga_id } => saga_id,
            Self::StartTask { saga_id, .. } => saga_id,
            Self::EndTask { saga_id, .. } => saga_id,
            Self::StartCompTask { saga_id, .. } => saga_id,
            Self::EndCompTask { saga_id, .. } => saga_id,
        }
    }

    /// Task this message refers to, for the task-scoped variants
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::StartTask { task_id, .. }
            | Self::EndTask { task_id, .. }
            | Self::StartCompTask { task_id, .. }
            | Self::EndCompTask { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// Stable name of the variant, for logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartSaga { .. } => "start_saga",
            Self::EndSaga { .. } => "end_saga",
            Self::AbortSaga { .. } => "abort_saga",
            Self::StartTask { .. } => "start_task",
            Self::EndTask { .. } => "end_task",
            Self::StartCompTask { .. } => "start_comp_task",
            Self::EndCompTask { .. } => "end_comp_task",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_stamp_ids_and_payload() {
        let msg = SagaMessage::start_task("s1", "t1", vec![1, 2, 3]);
        assert_eq!(msg.saga_id(), &SagaId::from("s1"));
        assert_eq!(msg.task_id(), Some(&TaskId::from("t1")));
        assert_eq!(msg.kind(), "start_task");
    }

    #[test]
    fn saga_scoped_messages_carry_no_task_id() {
        assert_eq!(SagaMessage::end_saga("s1").task_id(), None);
        assert_eq!(SagaMessage::abort_saga("s1").task_id(), None);
        assert_eq!(SagaMessage::start_saga("s1", vec![]).task_id(), None);
    }
}
