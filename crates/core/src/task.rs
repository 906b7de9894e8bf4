//! Task capability set and task faults
//!
//! A task is a value type that knows how to serialize itself ([`TaskData`])
//! and how to run. Its declared `Arg`/`Output` types decide its shape:
//!
//! | `Arg` | `Output` | Shape |
//! |-------|----------|-------|
//! | `()`  | `()`     | no argument |
//! | `A`   | `()`     | argument only |
//! | `A`   | `R`      | argument and result |
//!
//! Tasks with `DISPOSES = true` get their [`Task::dispose`] step run after
//! every run, successful or not, and also when they are discarded unrun.

use std::any::Any;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};

use crate::data::{DataError, TaskData};
use crate::metadata::MetadataError;
use crate::store::StoreError;

/// Boxed error carried by [`TaskFault::Failed`]
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// A fault raised by a task's own run or cleanup step.
///
/// Faults never escape the queue: they are handed back as values by
/// `run_next` or forwarded to a fault handler.
#[derive(Debug, thiserror::Error)]
pub enum TaskFault {
    /// The task returned an error
    #[error("Task failed: {0}")]
    Failed(#[source] BoxError),

    /// The task panicked
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// The task's payload could not be rebuilt
    #[error("Task data error: {0}")]
    Data(#[from] DataError),

    /// The stores were inconsistent with the queued kind ids
    #[error("Task store error: {0}")]
    Store(#[from] StoreError),

    /// The task was invoked with the wrong signature
    #[error("Task metadata error: {0}")]
    Metadata(#[from] MetadataError),
}

impl TaskFault {
    /// Wrap any error (or message) as a task failure
    pub fn failed(error: impl Into<BoxError>) -> Self {
        TaskFault::Failed(error.into())
    }

    /// Convert a caught panic payload into a fault
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        TaskFault::Panicked(panic_message(payload.as_ref()))
    }

    /// Whether the fault came from a panic
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskFault::Panicked(_))
    }
}

/// Message carried by a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Result type for task steps
pub type TaskResult<T> = Result<T, TaskFault>;

/// Run a task step, turning a panic into a [`TaskFault::Panicked`]
pub(crate) fn guarded<R>(step: impl FnOnce() -> TaskResult<R>) -> TaskResult<R> {
    match panic::catch_unwind(AssertUnwindSafe(step)) {
        Ok(result) => result,
        Err(payload) => Err(TaskFault::from_panic(payload)),
    }
}

/// Capability set of a queueable task
///
/// # Example
///
/// ```ignore
/// use tasq_core::{Task, TaskData, TaskResult};
///
/// #[derive(TaskData)]
/// struct Integrate {
///     body: u32,
///     dt: f32,
/// }
///
/// impl Task for Integrate {
///     type Arg = ();
///     type Output = ();
///
///     fn run(&mut self, _: ()) -> TaskResult<()> {
///         // ...
///         Ok(())
///     }
/// }
/// ```
pub trait Task: TaskData + Send + 'static {
    /// Argument passed to [`Task::run`]; `()` for tasks without one
    type Arg: 'static;

    /// Value produced by [`Task::run`]; `()` for tasks without one
    type Output: 'static;

    /// Whether [`Task::dispose`] must run once the task is finished or discarded
    const DISPOSES: bool = false;

    /// Run the task body
    fn run(&mut self, arg: Self::Arg) -> TaskResult<Self::Output>;

    /// Cleanup step, run after `run` (success or fault) or when discarded unrun
    fn dispose(&mut self) -> TaskResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guarded_catches_panics() {
        let fault = guarded::<()>(|| panic!("boom")).unwrap_err();
        assert!(fault.is_panic());
        assert_eq!(fault.to_string(), "Task panicked: boom");

        let fault = guarded::<()>(|| panic!("{} {}", "formatted", 1)).unwrap_err();
        assert!(matches!(fault, TaskFault::Panicked(ref m) if m == "formatted 1"));
    }

    #[test]
    fn test_failed_from_message() {
        let fault = TaskFault::failed("disk full");
        assert_eq!(fault.to_string(), "Task failed: disk full");
        assert!(!fault.is_panic());
    }
}
