//! Saga identity, aggregate state, and the transition function

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::SagaError;
use crate::messages::SagaMessage;

/// Unique identifier for a saga instance. Opaque, immutable once assigned.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SagaId(Box<str>);

impl SagaId {
    /// Create a new saga ID
    pub fn new(id: impl Into<Box<str>>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SagaId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for SagaId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Debug for SagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SagaId({})", self.0)
    }
}

impl std::fmt::Display for SagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a task within one saga's task set. Unique per saga,
/// not globally.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Box<str>);

impl TaskId {
    /// Create a new task ID
    pub fn new(id: impl Into<Box<str>>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Debug for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Progress record for one task. Created the first time a StartTask
/// message for its id is applied.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TaskRecord {
    pub(crate) started: bool,
    pub(crate) start_data: Option<Vec<u8>>,
    pub(crate) completed: bool,
    pub(crate) end_data: Option<Vec<u8>>,
    pub(crate) comp_started: bool,
    pub(crate) comp_start_data: Option<Vec<u8>>,
    pub(crate) comp_completed: bool,
    pub(crate) comp_end_data: Option<Vec<u8>>,
}

/// Aggregate snapshot of a saga's progress: the accumulator of the
/// message fold.
///
/// A `SagaState` is an immutable value. Every successful transition
/// produces a new state; a caller holding an older one never observes
/// it change. States are created by [`SagaState::new`] (the durable
/// StartSaga fact) and otherwise only by applying messages through
/// [`update_saga_state`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaState {
    saga_id: SagaId,
    job: Vec<u8>,
    aborted: bool,
    completed: bool,
    tasks: HashMap<TaskId, TaskRecord>,
}

impl SagaState {
    /// Initial state of a freshly started saga: the job payload from
    /// StartSaga, no tasks, not aborted, not completed.
    pub fn new(saga_id: SagaId, job: Vec<u8>) -> Self {
        Self {
            saga_id,
            job,
            aborted: false,
            completed: false,
            tasks: HashMap::new(),
        }
    }

    /// Id of the saga this state belongs to
    pub fn saga_id(&self) -> &SagaId {
        &self.saga_id
    }

    /// Job-level payload recorded at StartSaga
    pub fn job(&self) -> &[u8] {
        &self.job
    }

    /// Ids of all tasks this saga has started, in no particular order
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.keys().cloned().collect()
    }

    /// Has the saga been aborted?
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Has the saga completed? Terminal: no further transitions apply.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Has a StartTask been applied for this id?
    pub fn is_task_started(&self, task_id: &TaskId) -> bool {
        self.tasks.get(task_id).map_or(false, |t| t.started)
    }

    /// Has an EndTask been applied for this id?
    pub fn is_task_completed(&self, task_id: &TaskId) -> bool {
        self.tasks.get(task_id).map_or(false, |t| t.completed)
    }

    /// Payload of the last StartTask for this id, if any
    pub fn start_task_data(&self, task_id: &TaskId) -> Option<&[u8]> {
        self.tasks.get(task_id).and_then(|t| t.start_data.as_deref())
    }

    /// Payload of the EndTask for this id, if any
    pub fn end_task_data(&self, task_id: &TaskId) -> Option<&[u8]> {
        self.tasks.get(task_id).and_then(|t| t.end_data.as_deref())
    }

    /// Has a StartCompTask been applied for this id?
    pub fn is_comp_task_started(&self, task_id: &TaskId) -> bool {
        self.tasks.get(task_id).map_or(false, |t| t.comp_started)
    }

    /// Has an EndCompTask been applied for this id?
    pub fn is_comp_task_completed(&self, task_id: &TaskId) -> bool {
        self.tasks.get(task_id).map_or(false, |t| t.comp_completed)
    }

    /// Payload of the last StartCompTask for this id, if any
    pub fn start_comp_task_data(&self, task_id: &TaskId) -> Option<&[u8]> {
        self.tasks
            .get(task_id)
            .and_then(|t| t.comp_start_data.as_deref())
    }

    /// Payload of the EndCompTask for this id, if any
    pub fn end_comp_task_data(&self, task_id: &TaskId) -> Option<&[u8]> {
        self.tasks
            .get(task_id)
            .and_then(|t| t.comp_end_data.as_deref())
    }

    /// EndSaga precondition: every known task is fully resolved.
    ///
    /// Aborted saga: each started task must have its compensation
    /// started and completed. Non-aborted saga: each started task must
    /// have completed. A saga with no tasks satisfies this vacuously.
    fn all_tasks_resolved(&self) -> Result<(), (&TaskId, &'static str)> {
        for (task_id, task) in &self.tasks {
            if self.aborted {
                if !(task.started && task.comp_started && task.comp_completed) {
                    return Err((task_id, "compensation not completed"));
                }
            } else if !(task.started && task.completed) {
                return Err((task_id, "task not completed"));
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn insert_task(&mut self, task_id: TaskId, record: TaskRecord) {
        self.tasks.insert(task_id, record);
    }

    #[cfg(test)]
    pub(crate) fn set_flags(&mut self, aborted: bool, completed: bool) {
        self.aborted = aborted;
        self.completed = completed;
    }
}

fn invalid(state: &SagaState, reason: impl Into<Box<str>>) -> SagaError {
    SagaError::InvalidTransition {
        saga_id: state.saga_id().clone(),
        reason: reason.into(),
    }
}

/// Apply one message to a state, producing the successor state.
///
/// Pure and deterministic: the input state is never mutated, and on
/// error the caller's value is unchanged and usable. Returns `Ok` iff
/// the message is causally valid against `state`:
///
/// - `StartSaga` — never valid here; a saga is only started through the
///   log's start operation, so any StartSaga reaching an existing state
///   is a duplicate.
/// - `AbortSaga` — valid unless the saga completed.
/// - `EndSaga` — valid unless completed, and only once every known task
///   is resolved (completed, or fully compensated after an abort).
/// - `StartTask` — valid while the saga is neither completed nor
///   aborted and the task has not completed. First application creates
///   the task record; a repeated StartTask on a started, not-completed
///   task is accepted and overwrites its start payload.
/// - `EndTask` — valid while the saga is neither completed nor aborted
///   and the task has started.
/// - `StartCompTask` / `EndCompTask` — only reachable after AbortSaga,
///   and only for tasks that had started; compensation follows the same
///   start-before-end order as forward execution.
///
/// A message addressed to a different saga id is always invalid.
pub fn update_saga_state(state: &SagaState, message: &SagaMessage) -> Result<SagaState, SagaError> {
    if message.saga_id() != state.saga_id() {
        return Err(invalid(
            state,
            format!(
                "message for saga {} applied to saga {}",
                message.saga_id(),
                state.saga_id()
            ),
        ));
    }

    match message {
        SagaMessage::StartSaga { .. } => Err(invalid(state, "saga already started")),

        SagaMessage::AbortSaga { .. } => {
            if state.completed {
                return Err(invalid(state, "cannot abort a completed saga"));
            }
            let mut next = state.clone();
            next.aborted = true;
            Ok(next)
        }

        SagaMessage::EndSaga { .. } => {
            if state.completed {
                return Err(invalid(state, "saga already completed"));
            }
            if let Err((task_id, why)) = state.all_tasks_resolved() {
                return Err(invalid(
                    state,
                    format!("cannot end saga: task {task_id}: {why}"),
                ));
            }
            let mut next = state.clone();
            next.completed = true;
            Ok(next)
        }

        SagaMessage::StartTask { task_id, data, .. } => {
            if state.completed {
                return Err(invalid(state, "cannot start a task on a completed saga"));
            }
            if state.aborted {
                return Err(invalid(state, "cannot start a task on an aborted saga"));
            }
            if state.is_task_completed(task_id) {
                return Err(invalid(state, format!("task {task_id} already completed")));
            }
            let mut next = state.clone();
            let task = next.tasks.entry(task_id.clone()).or_default();
            task.started = true;
            task.start_data = Some(data.clone());
            Ok(next)
        }

        SagaMessage::EndTask { task_id, data, .. } => {
            if state.completed {
                return Err(invalid(state, "cannot end a task on a completed saga"));
            }
            if state.aborted {
                return Err(invalid(state, "cannot end a task on an aborted saga"));
            }
            if !state.is_task_started(task_id) {
                return Err(invalid(state, format!("task {task_id} never started")));
            }
            let mut next = state.clone();
            let task = next.tasks.entry(task_id.clone()).or_default();
            task.completed = true;
            task.end_data = Some(data.clone());
            Ok(next)
        }

        SagaMessage::StartCompTask { task_id, data, .. } => {
            if state.completed {
                return Err(invalid(state, "cannot compensate on a completed saga"));
            }
            if !state.aborted {
                return Err(invalid(
                    state,
                    "cannot compensate a saga that was not aborted",
                ));
            }
            if !state.is_task_started(task_id) {
                return Err(invalid(state, format!("task {task_id} never started")));
            }
            if state.is_comp_task_completed(task_id) {
                return Err(invalid(
                    state,
                    format!("compensation for task {task_id} already completed"),
                ));
            }
            let mut next = state.clone();
            let task = next.tasks.entry(task_id.clone()).or_default();
            task.comp_started = true;
            task.comp_start_data = Some(data.clone());
            Ok(next)
        }

        SagaMessage::EndCompTask { task_id, data, .. } => {
            if state.completed {
                return Err(invalid(state, "cannot compensate on a completed saga"));
            }
            if !state.aborted {
                return Err(invalid(
                    state,
                    "cannot compensate a saga that was not aborted",
                ));
            }
            if !state.is_task_started(task_id) {
                return Err(invalid(state, format!("task {task_id} never started")));
            }
            if !state.is_comp_task_started(task_id) {
                return Err(invalid(
                    state,
                    format!("compensation for task {task_id} never started"),
                ));
            }
            let mut next = state.clone();
            let task = next.tasks.entry(task_id.clone()).or_default();
            task.comp_completed = true;
            task.comp_end_data = Some(data.clone());
            Ok(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn state_with(aborted: bool, completed: bool, tasks: Vec<(TaskId, TaskRecord)>) -> SagaState {
        let mut state = SagaState::new(SagaId::from("saga"), vec![]);
        state.set_flags(aborted, completed);
        for (id, record) in tasks {
            state.insert_task(id, record);
        }
        state
    }

    fn started_task(start_data: &[u8]) -> TaskRecord {
        TaskRecord {
            started: true,
            start_data: Some(start_data.to_vec()),
            ..TaskRecord::default()
        }
    }

    #[test]
    fn mismatched_saga_id_is_rejected() {
        let state = SagaState::new(SagaId::from("saga1"), vec![]);
        let msg = SagaMessage::abort_saga("saga2");
        assert!(matches!(
            update_saga_state(&state, &msg),
            Err(SagaError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn failed_transition_leaves_input_usable() {
        let state = state_with(false, true, vec![]);
        let before = state.clone();
        let msg = SagaMessage::abort_saga("saga");
        assert!(update_saga_state(&state, &msg).is_err());
        assert_eq!(state, before);
        assert!(state.is_completed());
    }

    #[test]
    fn restart_of_running_task_overwrites_start_data() {
        let state = state_with(false, false, vec![(TaskId::from("t1"), started_task(&[1]))]);
        let msg = SagaMessage::start_task("saga", "t1", vec![2, 3]);
        let next = update_saga_state(&state, &msg).unwrap();
        assert_eq!(
            next.start_task_data(&TaskId::from("t1")),
            Some(&[2u8, 3][..])
        );
        assert_eq!(state.start_task_data(&TaskId::from("t1")), Some(&[1u8][..]));
    }

    #[test]
    fn end_saga_is_vacuously_valid_with_no_tasks() {
        let state = SagaState::new(SagaId::from("saga"), vec![]);
        let next = update_saga_state(&state, &SagaMessage::end_saga("saga")).unwrap();
        assert!(next.is_completed());
    }

    #[test]
    fn completed_is_terminal_for_every_message() {
        let state = state_with(false, true, vec![(TaskId::from("t1"), started_task(&[]))]);
        let messages = [
            SagaMessage::start_saga("saga", vec![]),
            SagaMessage::end_saga("saga"),
            SagaMessage::abort_saga("saga"),
            SagaMessage::start_task("saga", "t1", vec![]),
            SagaMessage::end_task("saga", "t1", vec![]),
            SagaMessage::start_comp_task("saga", "t1", vec![]),
            SagaMessage::end_comp_task("saga", "t1", vec![]),
        ];
        for msg in &messages {
            assert!(
                update_saga_state(&state, msg).is_err(),
                "{} accepted on a completed saga",
                msg.kind()
            );
        }
    }

    // Reachable task records always have `started` set (records are only
    // created by StartTask); the other flags cover every stage the
    // transition function can produce.
    fn arb_task_record(aborted: bool) -> impl Strategy<Value = TaskRecord> {
        (
            any::<bool>(),
            0..3u8,
            arb_data(),
            arb_data(),
            arb_data(),
            arb_data(),
        )
            .prop_map(move |(completed, comp_stage, d0, d1, d2, d3)| {
                let comp_stage = if aborted { comp_stage } else { 0 };
                TaskRecord {
                    started: true,
                    start_data: Some(d0),
                    completed,
                    end_data: completed.then_some(d1),
                    comp_started: comp_stage >= 1,
                    comp_start_data: (comp_stage >= 1).then_some(d2),
                    comp_completed: comp_stage >= 2,
                    comp_end_data: (comp_stage >= 2).then_some(d3),
                }
            })
    }

    fn arb_data() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), 0..8)
    }

    fn arb_state() -> impl Strategy<Value = SagaState> {
        (any::<bool>(), any::<bool>())
            .prop_flat_map(|(aborted, completed)| {
                (
                    Just(aborted),
                    Just(completed),
                    arb_data(),
                    prop::collection::vec(("[a-z]{1,4}", arb_task_record(aborted)), 0..5),
                )
            })
            .prop_map(|(aborted, completed, job, tasks)| {
                let mut state = SagaState::new(SagaId::from("saga"), job);
                state.set_flags(aborted, completed);
                for (id, record) in tasks {
                    state.insert_task(TaskId::from(id), record);
                }
                state
            })
    }

    // Mixes ids already in the task set with fresh ones, so the
    // never-started preconditions get exercised too.
    fn arb_state_and_task() -> impl Strategy<Value = (SagaState, TaskId)> {
        (
            arb_state(),
            "[a-z]{1,4}",
            any::<prop::sample::Index>(),
            any::<bool>(),
        )
            .prop_map(|(state, fresh, index, use_existing)| {
                let ids = state.task_ids();
                let task_id = if use_existing && !ids.is_empty() {
                    ids[index.index(ids.len())].clone()
                } else {
                    TaskId::from(fresh)
                };
                (state, task_id)
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        #[test]
        fn start_saga_never_valid_on_started_state(state in arb_state(), data in arb_data()) {
            let msg = SagaMessage::start_saga(state.saga_id().clone(), data);
            prop_assert!(update_saga_state(&state, &msg).is_err());
        }

        #[test]
        fn abort_saga_valid_iff_not_completed(state in arb_state()) {
            let valid = !state.is_completed();
            let msg = SagaMessage::abort_saga(state.saga_id().clone());
            match update_saga_state(&state, &msg) {
                Ok(next) => {
                    prop_assert!(valid);
                    prop_assert!(next.is_aborted());
                    prop_assert!(!next.is_completed());
                }
                Err(_) => prop_assert!(!valid),
            }
        }

        #[test]
        fn end_saga_valid_iff_all_tasks_resolved(state in arb_state()) {
            let mut valid = !state.is_completed();
            for id in state.task_ids() {
                if state.is_aborted() {
                    if !(state.is_task_started(&id)
                        && state.is_comp_task_started(&id)
                        && state.is_comp_task_completed(&id))
                    {
                        valid = false;
                    }
                } else if !(state.is_task_started(&id) && state.is_task_completed(&id)) {
                    valid = false;
                }
            }

            let msg = SagaMessage::end_saga(state.saga_id().clone());
            match update_saga_state(&state, &msg) {
                Ok(next) => {
                    prop_assert!(valid);
                    prop_assert!(next.is_completed());
                }
                Err(_) => prop_assert!(!valid),
            }
        }

        #[test]
        fn start_task_valid_iff_runnable((state, task_id) in arb_state_and_task(), data in arb_data()) {
            let valid = !state.is_completed()
                && !state.is_aborted()
                && !state.is_task_completed(&task_id);

            let msg = SagaMessage::start_task(state.saga_id().clone(), task_id.clone(), data.clone());
            match update_saga_state(&state, &msg) {
                Ok(next) => {
                    prop_assert!(valid);
                    prop_assert!(next.is_task_started(&task_id));
                    prop_assert_eq!(next.start_task_data(&task_id), Some(data.as_slice()));
                }
                Err(_) => prop_assert!(!valid),
            }
        }

        #[test]
        fn end_task_valid_iff_started((state, task_id) in arb_state_and_task(), data in arb_data()) {
            let valid = !state.is_completed()
                && !state.is_aborted()
                && state.is_task_started(&task_id);

            let msg = SagaMessage::end_task(state.saga_id().clone(), task_id.clone(), data.clone());
            match update_saga_state(&state, &msg) {
                Ok(next) => {
                    prop_assert!(valid);
                    prop_assert!(next.is_task_completed(&task_id));
                    prop_assert_eq!(next.end_task_data(&task_id), Some(data.as_slice()));
                }
                Err(_) => prop_assert!(!valid),
            }
        }

        #[test]
        fn start_comp_task_valid_iff_aborted_and_started(
            (state, task_id) in arb_state_and_task(),
            data in arb_data(),
        ) {
            let valid = state.is_aborted()
                && !state.is_completed()
                && state.is_task_started(&task_id)
                && !state.is_comp_task_completed(&task_id);

            let msg = SagaMessage::start_comp_task(state.saga_id().clone(), task_id.clone(), data.clone());
            match update_saga_state(&state, &msg) {
                Ok(next) => {
                    prop_assert!(valid);
                    prop_assert!(next.is_comp_task_started(&task_id));
                    prop_assert_eq!(next.start_comp_task_data(&task_id), Some(data.as_slice()));
                }
                Err(_) => prop_assert!(!valid),
            }
        }

        #[test]
        fn end_comp_task_valid_iff_comp_started(
            (state, task_id) in arb_state_and_task(),
            data in arb_data(),
        ) {
            let valid = state.is_aborted()
                && !state.is_completed()
                && state.is_task_started(&task_id)
                && state.is_comp_task_started(&task_id);

            let msg = SagaMessage::end_comp_task(state.saga_id().clone(), task_id.clone(), data.clone());
            match update_saga_state(&state, &msg) {
                Ok(next) => {
                    prop_assert!(valid);
                    prop_assert!(next.is_comp_task_completed(&task_id));
                    prop_assert_eq!(next.end_comp_task_data(&task_id), Some(data.as_slice()));
                }
                Err(_) => prop_assert!(!valid),
            }
        }
    }
}
