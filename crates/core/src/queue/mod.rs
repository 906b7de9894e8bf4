//! Task queue
//!
//! A FIFO of heterogeneous tasks that stores no boxed task objects. Each entry
//! is a [`KindId`] in the id queue plus the task's payload bytes and
//! references in the [`TaskStores`], at positions implied by enqueue order.
//!
//! The queue lock is held from popping an id through rebuilding the task;
//! the task body runs after the lock is released.
//!
//! # Example
//!
//! ```ignore
//! let queue = Arc::new(TaskQueue::new());
//! queue.enqueue(Integrate { body: 3, dt: 0.016 })?;
//!
//! match queue.run_next(None)? {
//!     RunOutcome::Faulted(fault) => warn!("Task faulted: {}", fault),
//!     _ => {}
//! }
//! ```

mod access;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crossbeam_channel::{bounded, never, select, Receiver, Sender};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use access::LockedStores;

use crate::cancel::CancellationToken;
use crate::config::QueueConfig;
use crate::handle::{HandleManager, HandleTask, TaskHandle};
use crate::metadata::{Discard, KindCache, KindId, MetadataError};
use crate::profiler::Profiler;
use crate::store::{StoreError, TaskStores};
use crate::task::{guarded, Task, TaskFault};

/// Queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue has been disposed
    #[error("Task queue is disposed")]
    Disposed,

    /// Called from a cleanup step while this thread is clearing the queue
    #[error("Task queue is being cleared on this thread")]
    Reentrant,

    /// The task type could not be described
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// The task could not be written to the stores
    #[error("Failed to store task: {0}")]
    Store(#[from] StoreError),

    /// A cleanup step faulted while clearing without a fault handler
    #[error("Cleanup faulted while clearing: {0}")]
    Fault(#[source] TaskFault),
}

/// Result of one `run_next` call
#[derive(Debug)]
pub enum RunOutcome {
    /// A task ran to completion
    Ran,
    /// A task ran and faulted; the fault is contained here
    Faulted(TaskFault),
    /// Nothing was queued (non-blocking calls only)
    Empty,
    /// The wait was cancelled before a task became available
    Cancelled,
}

impl RunOutcome {
    /// Whether a task was taken off the queue
    pub fn took_task(&self) -> bool {
        matches!(self, RunOutcome::Ran | RunOutcome::Faulted(_))
    }
}

/// What `clear` did with the entries it removed
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClearSummary {
    /// Entries whose cleanup step ran successfully
    pub disposed: usize,
    /// Entries without a cleanup step
    pub skipped: usize,
    /// Entries whose cleanup step faulted
    pub faulted: usize,
    /// Entries dropped without cleanup after an unhandled fault
    pub dropped: usize,
}

pub(crate) struct QueueState {
    ids: VecDeque<KindId>,
    pub(crate) stores: TaskStores,
}

/// Resets the clearing marker when a clear finishes
struct ClearScope<'a> {
    clearing: &'a Mutex<Option<ThreadId>>,
}

impl<'a> ClearScope<'a> {
    fn enter(clearing: &'a Mutex<Option<ThreadId>>) -> Self {
        *clearing.lock() = Some(thread::current().id());
        Self { clearing }
    }
}

impl Drop for ClearScope<'_> {
    fn drop(&mut self) {
        *self.clearing.lock() = None;
    }
}

/// In-process FIFO task queue
pub struct TaskQueue {
    state: Mutex<QueueState>,
    kinds: KindCache,
    handles: Arc<HandleManager>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    /// Thread currently running `clear`/`dispose` while holding `state`
    clearing: Mutex<Option<ThreadId>>,
    /// Mirrors of `state`, written under its lock so readers never take it
    queued: AtomicUsize,
    disposed: AtomicBool,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::with_config(&QueueConfig::default())
    }

    pub fn with_config(config: &QueueConfig) -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            state: Mutex::new(QueueState {
                ids: VecDeque::new(),
                stores: TaskStores::with_capacity(
                    config.payload_capacity,
                    config.reference_capacity,
                ),
            }),
            kinds: KindCache::with_capacity(config.kind_capacity),
            handles: HandleManager::new(),
            wake_tx,
            wake_rx,
            clearing: Mutex::new(None),
            queued: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
        }
    }

    /// Number of queued tasks. Does not take the queue lock.
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Manager of the handles issued by [`enqueue_with_handle`](Self::enqueue_with_handle)
    pub fn handles(&self) -> &Arc<HandleManager> {
        &self.handles
    }

    /// Descriptors of every task type seen by this queue
    pub fn kinds(&self) -> &KindCache {
        &self.kinds
    }

    /// Auto-reset wake: at most one pending signal
    fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        if *self.clearing.lock() == Some(thread::current().id()) {
            return Err(QueueError::Reentrant);
        }
        Ok(self.state.lock())
    }

    /// Append a task at the back of the queue
    pub fn enqueue<T>(&self, task: T) -> Result<(), QueueError>
    where
        T: Task<Arg = (), Output = ()>,
    {
        let kind = self.kinds.resolve::<T>()?;
        let mut state = self.lock_state()?;
        if self.is_disposed() {
            return Err(QueueError::Disposed);
        }

        state.stores.enqueue(task)?;
        state.ids.push_back(kind.id());
        self.queued.store(state.ids.len(), Ordering::Release);
        drop(state);

        self.wake();
        trace!("Enqueued task {} ({})", kind.id(), kind.type_name());
        Ok(())
    }

    /// Append a task and return a handle completed once it has run and
    /// cleaned up, or once it is discarded.
    pub fn enqueue_with_handle<T>(&self, task: T) -> Result<TaskHandle, QueueError>
    where
        T: Task<Arg = (), Output = ()>,
    {
        let handle = self.handles.create();
        match self.enqueue(HandleTask::new(task, handle.clone())) {
            Ok(()) => Ok(handle),
            Err(e) => {
                // The task never made it in; nothing else would complete the handle
                let _ = handle.notify_complete();
                Err(e)
            }
        }
    }

    /// Run the next task, blocking until one is available or `cancel` fires
    pub fn run_next(&self, cancel: Option<&CancellationToken>) -> Result<RunOutcome, QueueError> {
        self.wait_and_run(None, cancel)
    }

    /// [`run_next`](Self::run_next) with the task bracketed by `profiler`
    pub fn run_next_profiled(
        &self,
        profiler: &dyn Profiler,
        cancel: Option<&CancellationToken>,
    ) -> Result<RunOutcome, QueueError> {
        self.wait_and_run(Some(profiler), cancel)
    }

    /// Run the next task if one is queued, without waiting
    pub fn try_run_next(&self) -> Result<RunOutcome, QueueError> {
        self.run_front(None)
    }

    /// [`try_run_next`](Self::try_run_next) with the task bracketed by `profiler`
    pub fn try_run_next_profiled(&self, profiler: &dyn Profiler) -> Result<RunOutcome, QueueError> {
        self.run_front(Some(profiler))
    }

    fn wait_and_run(
        &self,
        profiler: Option<&dyn Profiler>,
        cancel: Option<&CancellationToken>,
    ) -> Result<RunOutcome, QueueError> {
        let no_cancel = never::<()>();
        let cancelled = cancel.map_or(&no_cancel, CancellationToken::receiver);

        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Ok(RunOutcome::Cancelled);
            }

            match self.run_front(profiler)? {
                RunOutcome::Empty => {}
                outcome => return Ok(outcome),
            }

            select! {
                recv(self.wake_rx) -> _ => {}
                recv(cancelled) -> _ => return Ok(RunOutcome::Cancelled),
            }
        }
    }

    fn run_front(&self, profiler: Option<&dyn Profiler>) -> Result<RunOutcome, QueueError> {
        let mut state = self.lock_state()?;
        if self.is_disposed() {
            drop(state);
            // Pass the wake on so every blocked worker sees the dispose
            self.wake();
            return Err(QueueError::Disposed);
        }

        let Some(id) = state.ids.pop_front() else {
            return Ok(RunOutcome::Empty);
        };
        self.queued.store(state.ids.len(), Ordering::Release);
        if !state.ids.is_empty() {
            self.wake();
        }

        let kind = match self.kinds.get(id) {
            Ok(kind) => kind,
            Err(e) => return Ok(RunOutcome::Faulted(e.into())),
        };

        if let Some(profiler) = profiler {
            profiler.begin_task(kind.type_name());
        }

        let mut access = LockedStores::new(state);
        let result = guarded(|| kind.run(&mut access));
        if !access.is_released() {
            debug!("Task {} faulted before its data was rebuilt", kind.id());
        }
        drop(access);

        if let Some(profiler) = profiler {
            profiler.end_task();
        }

        Ok(match result {
            Ok(()) => RunOutcome::Ran,
            Err(fault) => {
                debug!("Task {} ({}) faulted: {}", kind.id(), kind.type_name(), fault);
                RunOutcome::Faulted(fault)
            }
        })
    }

    /// Remove every queued task.
    ///
    /// Tasks with a cleanup step have it run; the rest are dropped unread.
    /// Cleanup faults go to `fault_handler` and clearing continues. Without a
    /// handler the first fault is returned and the remaining entries are
    /// dropped without cleanup. Either way the queue, its stores and its
    /// outstanding handles are empty afterwards.
    #[tracing::instrument(skip_all)]
    pub fn clear(
        &self,
        fault_handler: Option<&mut dyn FnMut(TaskFault)>,
    ) -> Result<ClearSummary, QueueError> {
        let mut state = self.lock_state()?;
        let _scope = ClearScope::enter(&self.clearing);
        self.clear_locked(&mut state, fault_handler)
    }

    fn clear_locked(
        &self,
        state: &mut QueueState,
        mut fault_handler: Option<&mut dyn FnMut(TaskFault)>,
    ) -> Result<ClearSummary, QueueError> {
        let mut summary = ClearSummary::default();
        let mut unhandled = None;

        while let Some(id) = state.ids.pop_front() {
            self.queued.store(state.ids.len(), Ordering::Release);
            let discarded = self
                .kinds
                .get(id)
                .map_err(TaskFault::from)
                .and_then(|kind| guarded(|| kind.discard(&mut state.stores)));

            match discarded {
                Ok(Discard::Disposed) => summary.disposed += 1,
                Ok(Discard::Skipped) => summary.skipped += 1,
                Err(fault) => {
                    summary.faulted += 1;
                    match fault_handler.as_deref_mut() {
                        Some(handler) => handler(fault),
                        None => {
                            unhandled = Some(fault);
                            break;
                        }
                    }
                }
            }
        }

        summary.dropped = state.ids.len();
        state.ids.clear();
        self.queued.store(0, Ordering::Release);
        state.stores.clear();
        self.handles.clear();

        debug!(
            "Cleared task queue: {} disposed, {} skipped, {} faulted, {} dropped",
            summary.disposed, summary.skipped, summary.faulted, summary.dropped
        );

        match unhandled {
            Some(fault) => Err(QueueError::Fault(fault)),
            None => Ok(summary),
        }
    }

    /// Clear the queue and refuse further work. Later calls do nothing.
    #[tracing::instrument(skip_all)]
    pub fn dispose(&self) -> Result<(), QueueError> {
        let mut state = self.lock_state()?;
        if self.is_disposed() {
            return Ok(());
        }

        let summary = {
            let _scope = ClearScope::enter(&self.clearing);
            let mut log_fault =
                |fault: TaskFault| warn!("Task cleanup faulted during dispose: {}", fault);
            self.clear_locked(&mut state, Some(&mut log_fault))?
        };
        self.disposed.store(true, Ordering::Release);
        drop(state);

        self.wake();
        info!(
            "Task queue disposed ({} tasks discarded)",
            summary.disposed + summary.skipped + summary.faulted
        );
        Ok(())
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!("Failed to dispose task queue: {}", e);
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("len", &self.len())
            .field("kinds", &self.kinds.len())
            .field("handles", &self.handles)
            .finish()
    }
}
