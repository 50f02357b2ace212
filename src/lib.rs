//! Saga Coordination over an Append-Only Durable Log
//!
//! Coordinates long-running distributed jobs with the saga pattern:
//! forward task execution plus explicit compensating actions, giving
//! eventual consistency without two-phase commit. Every fact about a
//! saga is a [`SagaMessage`] appended to a [`SagaLog`]; the current
//! [`SagaState`] is always derived by folding the logged history
//! through the pure transition function [`update_saga_state`].
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use sagalog::{InMemorySagaLog, SagaCoordinator};
//!
//! let coordinator = SagaCoordinator::new(Arc::new(InMemorySagaLog::new()));
//!
//! let saga = coordinator.make_saga("job-1", b"job definition".to_vec())?;
//! saga.start_task("t1", vec![])?;
//! // ... dispatch the task to an executor ...
//! saga.end_task("t1", b"result".to_vec())?;
//! saga.end_saga()?;
//!
//! assert!(saga.state()?.is_completed());
//! # Ok::<(), sagalog::SagaError>(())
//! ```

// === Core Types ===
mod errors;
mod messages;
mod state;

// === Durable Log ===
mod file_log;
mod log;

// === Coordination ===
mod saga;
mod stats;

// === Re-exports ===

// Types
pub use state::{SagaId, SagaState, TaskId};

// Messages
pub use messages::SagaMessage;

// Errors
pub use errors::SagaError;

// Transition function
pub use state::update_saga_state;

// Log
pub use file_log::FileSagaLog;
pub use log::{replay, InMemorySagaLog, SagaLog};

// Coordination
pub use saga::{Saga, SagaCoordinator};
pub use stats::{SagaStats, SagaStatsSnapshot};
