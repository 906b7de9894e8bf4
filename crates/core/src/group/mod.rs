//! Task groups
//!
//! A [`TaskGroup`] counts the tasks it enqueued and how many of them have
//! completed. Each task is wrapped in a [`GroupTask`] whose cleanup step bumps
//! the completed count, so a task counts as complete whether it ran, faulted,
//! or was discarded by `clear`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{trace, warn};

use crate::queue::{QueueError, TaskQueue};
use crate::task::{guarded, Task, TaskResult};

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Group errors
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    /// Not every enqueued task has completed yet
    #[error("Task group is incomplete ({completed}/{total})")]
    Incomplete { completed: usize, total: usize },

    /// The group was disposed
    #[error("Task group is disposed")]
    Disposed,

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Default)]
struct CounterState {
    total: usize,
    completed: usize,
    callbacks: Vec<Callback>,
    /// Some thread is running callbacks outside the lock
    firing: bool,
}

impl CounterState {
    fn is_complete(&self) -> bool {
        self.completed == self.total
    }

    /// Callbacks due now, in registration order
    fn take_due(&mut self) -> Vec<Callback> {
        if self.is_complete() {
            std::mem::take(&mut self.callbacks)
        } else {
            Vec::new()
        }
    }
}

/// Counter shared by a group and each of its wrapped tasks
#[derive(Default)]
pub struct GroupCounter {
    state: Mutex<CounterState>,
}

impl GroupCounter {
    fn complete_one(&self) {
        let mut state = self.state.lock();
        state.completed += 1;
        debug_assert!(state.completed <= state.total);
        self.fire_due(state);
    }

    fn rollback_one(&self) {
        let mut state = self.state.lock();
        state.total -= 1;
        self.fire_due(state);
    }

    /// Run due callbacks until none are left.
    ///
    /// Only one thread fires at a time; callbacks registered meanwhile are
    /// queued and picked up by the firing thread, so they keep their order.
    fn fire_due<'a>(&'a self, mut state: MutexGuard<'a, CounterState>) {
        if state.firing {
            return;
        }
        loop {
            let due = state.take_due();
            if due.is_empty() {
                state.firing = false;
                return;
            }
            state.firing = true;
            drop(state);
            fire(due);
            state = self.state.lock();
        }
    }
}

/// Callbacks run outside the counter lock so they may use the group
fn fire(callbacks: Vec<Callback>) {
    for callback in callbacks {
        let result = guarded(|| {
            callback();
            Ok(())
        });
        if let Err(fault) = result {
            warn!("Task group callback failed: {}", fault);
        }
    }
}

/// Marks its group's counter once the wrapped task's cleanup has run
#[derive(crate::TaskData)]
pub struct GroupTask<T> {
    task: T,
    counter: Arc<GroupCounter>,
}

impl<T: Task> Task for GroupTask<T> {
    type Arg = T::Arg;
    type Output = T::Output;
    const DISPOSES: bool = true;

    fn run(&mut self, arg: T::Arg) -> TaskResult<T::Output> {
        self.task.run(arg)
    }

    fn dispose(&mut self) -> TaskResult<()> {
        let inner = if T::DISPOSES {
            guarded(|| self.task.dispose())
        } else {
            Ok(())
        };
        self.counter.complete_one();
        inner
    }
}

/// Tracks completion of a set of tasks
///
/// # Example
///
/// ```ignore
/// let group = TaskGroup::new();
/// for chunk in 0..16 {
///     group.enqueue(&queue, StreamChunk { chunk })?;
/// }
/// group.when_complete(|| info!("World streamed in"));
/// ```
#[derive(Default)]
pub struct TaskGroup {
    counter: Arc<GroupCounter>,
    disposed: AtomicBool,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task as part of this group
    pub fn enqueue<T>(&self, queue: &TaskQueue, task: T) -> Result<(), GroupError>
    where
        T: Task<Arg = (), Output = ()>,
    {
        if self.disposed.load(Ordering::Acquire) {
            return Err(GroupError::Disposed);
        }

        self.counter.state.lock().total += 1;
        let wrapped = GroupTask {
            task,
            counter: self.counter.clone(),
        };
        if let Err(e) = queue.enqueue(wrapped) {
            self.counter.rollback_one();
            return Err(e.into());
        }
        Ok(())
    }

    /// Run `callback` once every enqueued task has completed.
    ///
    /// Runs immediately on this thread if the group is already complete and
    /// no earlier callbacks are still running.
    pub fn when_complete(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.counter.state.lock();
            if !state.is_complete() || state.firing {
                state.callbacks.push(Box::new(callback));
                return;
            }
        }
        trace!("Task group already complete, running callback now");
        callback();
    }

    /// Fraction of enqueued tasks that completed; `1.0` for an empty group
    pub fn progress(&self) -> f32 {
        let state = self.counter.state.lock();
        if state.total == 0 {
            1.0
        } else {
            state.completed as f32 / state.total as f32
        }
    }

    pub fn completed(&self) -> usize {
        self.counter.state.lock().completed
    }

    pub fn total(&self) -> usize {
        self.counter.state.lock().total
    }

    pub fn is_complete(&self) -> bool {
        self.counter.state.lock().is_complete()
    }

    /// Retire the group. Fails while tasks are outstanding.
    pub fn dispose(&self) -> Result<(), GroupError> {
        let state = self.counter.state.lock();
        if !state.is_complete() {
            return Err(GroupError::Incomplete {
                completed: state.completed,
                total: state.total,
            });
        }
        self.disposed.store(true, Ordering::Release);
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
