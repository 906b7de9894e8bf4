//! Workers draining a task queue
//!
//! A [`Worker`] runs one thread that calls `run_next` until it is disposed.
//! Task faults never stop the loop: they go to the configured fault handler,
//! or to a `warn!` event when there is none.
//!
//! ```ignore
//! let queue = Arc::new(TaskQueue::new());
//! let mut workers = WorkerGroup::new(queue.clone(), 4, WorkerOptions::new().name("physics"));
//! workers.start()?;
//!
//! queue.enqueue(Integrate { body: 3, dt: 0.016 })?;
//!
//! workers.dispose()?;
//! workers.join()?;
//! ```

mod group;
mod thread;

use std::io;
use std::sync::Arc;

use tracing::{debug, info, warn};

pub use group::WorkerGroup;
pub use thread::{StdThreadSpawner, ThreadBody, ThreadSpawner, WorkerThread};

use crate::cancel::{CancellationSource, CancellationToken};
use crate::config::WorkerConfig;
use crate::profiler::Profiler;
use crate::queue::{QueueError, RunOutcome, TaskQueue};
use crate::task::{panic_message, TaskFault};

/// Receives faults raised by tasks on a worker thread
pub type FaultHandler = Arc<dyn Fn(TaskFault) + Send + Sync + 'static>;

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// `join` was called before `dispose`
    #[error("Worker must be disposed before it is joined")]
    NotDisposed,

    #[error("Worker already started")]
    AlreadyStarted,

    /// The thread could not be started
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    /// The worker thread panicked
    #[error("Worker thread panicked: {0}")]
    Panicked(String),

    /// The owned queue failed to dispose
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Worker settings
#[derive(Clone)]
pub struct WorkerOptions {
    name: String,
    owns_queue: bool,
    fault_handler: Option<FaultHandler>,
    profiler: Option<Arc<dyn Profiler>>,
    spawner: Arc<dyn ThreadSpawner>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerOptions {
    pub fn new() -> Self {
        Self {
            name: "tasq-worker".to_string(),
            owns_queue: false,
            fault_handler: None,
            profiler: None,
            spawner: Arc::new(StdThreadSpawner),
        }
    }

    /// Options matching a [`WorkerConfig`]
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new()
            .name(config.thread_name.clone())
            .owns_queue(config.owns_queue)
    }

    /// Thread name (a prefix for worker groups)
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Dispose the queue when the worker is disposed
    pub fn owns_queue(mut self, owns_queue: bool) -> Self {
        self.owns_queue = owns_queue;
        self
    }

    pub fn fault_handler(mut self, handler: impl Fn(TaskFault) + Send + Sync + 'static) -> Self {
        self.fault_handler = Some(Arc::new(handler));
        self
    }

    /// Bracket every task with `profiler`
    pub fn profiler(mut self, profiler: impl Profiler + 'static) -> Self {
        self.profiler = Some(Arc::new(profiler));
        self
    }

    pub fn spawner(mut self, spawner: impl ThreadSpawner + 'static) -> Self {
        self.spawner = Arc::new(spawner);
        self
    }
}

impl std::fmt::Debug for WorkerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerOptions")
            .field("name", &self.name)
            .field("owns_queue", &self.owns_queue)
            .field("fault_handler", &self.fault_handler.is_some())
            .field("profiler", &self.profiler.is_some())
            .finish()
    }
}

/// One thread draining a queue
pub struct Worker {
    queue: Arc<TaskQueue>,
    options: WorkerOptions,
    cancel: CancellationSource,
    thread: Option<Box<dyn WorkerThread>>,
    started: bool,
    disposed: bool,
}

impl Worker {
    pub fn new(queue: Arc<TaskQueue>, options: WorkerOptions) -> Self {
        Self {
            queue,
            options,
            cancel: CancellationSource::new(),
            thread: None,
            started: false,
            disposed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Start the worker thread
    pub fn start(&mut self) -> Result<(), WorkerError> {
        if self.started {
            return Err(WorkerError::AlreadyStarted);
        }

        let name = self.options.name.clone();
        let queue = self.queue.clone();
        let token = self.cancel.token();
        let fault_handler = self.options.fault_handler.clone();
        let profiler = self.options.profiler.clone();

        let body: ThreadBody = Box::new(move || {
            run_loop(
                &name,
                &queue,
                &token,
                fault_handler.as_deref(),
                profiler.as_deref(),
            )
        });

        let thread = self
            .options
            .spawner
            .start(self.options.name.clone(), body)
            .map_err(WorkerError::Spawn)?;
        self.thread = Some(thread);
        self.started = true;
        info!("Started worker {}", self.options.name);
        Ok(())
    }

    /// Stop the loop, and dispose the queue if this worker owns it.
    ///
    /// A task already running finishes first. Later calls do nothing.
    pub fn dispose(&mut self) -> Result<(), WorkerError> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;
        self.cancel.cancel();

        if self.options.owns_queue {
            self.queue.dispose()?;
        }
        debug!("Disposed worker {}", self.options.name);
        Ok(())
    }

    /// Wait for the worker thread to exit. Requires `dispose` first.
    pub fn join(&mut self) -> Result<(), WorkerError> {
        if !self.disposed {
            return Err(WorkerError::NotDisposed);
        }

        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|payload| WorkerError::Panicked(panic_message(payload.as_ref()))),
            None => Ok(()),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(e) = self.dispose().and_then(|()| self.join()) {
            warn!("Worker {} did not shut down cleanly: {}", self.options.name, e);
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("options", &self.options)
            .field("started", &self.started)
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[tracing::instrument(skip_all, fields(worker = name))]
fn run_loop(
    name: &str,
    queue: &TaskQueue,
    token: &CancellationToken,
    fault_handler: Option<&(dyn Fn(TaskFault) + Send + Sync)>,
    profiler: Option<&dyn Profiler>,
) {
    debug!("Worker loop started");
    let mut ran = 0u64;

    loop {
        let outcome = match profiler {
            Some(profiler) => queue.run_next_profiled(profiler, Some(token)),
            None => queue.run_next(Some(token)),
        };

        match outcome {
            Ok(RunOutcome::Ran) => ran += 1,
            Ok(RunOutcome::Faulted(fault)) => {
                ran += 1;
                match fault_handler {
                    Some(handler) => handler(fault),
                    None => warn!("Task faulted on worker {}: {}", name, fault),
                }
            }
            Ok(RunOutcome::Empty) => {}
            Ok(RunOutcome::Cancelled) | Err(QueueError::Disposed) => break,
            Err(e) => {
                warn!("Worker {} stopping: {}", name, e);
                break;
            }
        }
    }

    debug!("Worker loop stopped after {} tasks", ran);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::{Task, TaskData, TaskResult};

    #[derive(TaskData)]
    struct Bump(Arc<AtomicUsize>);

    impl Task for Bump {
        type Arg = ();
        type Output = ();

        fn run(&mut self, _: ()) -> TaskResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(TaskData)]
    struct Explode(u32);

    impl Task for Explode {
        type Arg = ();
        type Output = ();

        fn run(&mut self, _: ()) -> TaskResult<()> {
            Err(TaskFault::failed(format!("explode {}", self.0)))
        }
    }

    #[test]
    fn test_worker_runs_tasks() {
        let hits = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(TaskQueue::new());
        let mut worker = Worker::new(queue.clone(), WorkerOptions::new());
        worker.start().unwrap();

        let handle = queue.enqueue_with_handle(Bump(hits.clone())).unwrap();
        assert!(handle.wait(Some(Duration::from_secs(5)), None));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        worker.dispose().unwrap();
        worker.join().unwrap();
        assert!(!queue.is_disposed());
    }

    #[test]
    fn test_join_requires_dispose() {
        let mut worker = Worker::new(Arc::new(TaskQueue::new()), WorkerOptions::new());
        worker.start().unwrap();
        assert!(matches!(worker.join(), Err(WorkerError::NotDisposed)));
        assert!(matches!(worker.start(), Err(WorkerError::AlreadyStarted)));

        worker.dispose().unwrap();
        worker.dispose().unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_fault_handler_receives_faults() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let queue = Arc::new(TaskQueue::new());
        let options = WorkerOptions::new().fault_handler(move |fault| {
            let _ = tx.send(fault.to_string());
        });
        let mut worker = Worker::new(queue.clone(), options);
        worker.start().unwrap();

        queue.enqueue(Explode(1)).unwrap();
        queue.enqueue(Explode(2)).unwrap();

        let timeout = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), "Task failed: explode 1");
        assert_eq!(rx.recv_timeout(timeout).unwrap(), "Task failed: explode 2");

        worker.dispose().unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_owning_worker_disposes_queue() {
        let queue = Arc::new(TaskQueue::new());
        let mut worker = Worker::new(queue.clone(), WorkerOptions::new().owns_queue(true));
        worker.start().unwrap();
        worker.dispose().unwrap();
        worker.join().unwrap();
        assert!(queue.is_disposed());
    }

    struct RecordingSpawner {
        names: Arc<Mutex<Vec<String>>>,
    }

    impl ThreadSpawner for RecordingSpawner {
        fn start(&self, name: String, body: ThreadBody) -> io::Result<Box<dyn WorkerThread>> {
            self.names.lock().push(name.clone());
            StdThreadSpawner.start(name, body)
        }
    }

    struct FailingSpawner;

    impl ThreadSpawner for FailingSpawner {
        fn start(&self, _: String, _: ThreadBody) -> io::Result<Box<dyn WorkerThread>> {
            Err(io::Error::other("no threads left"))
        }
    }

    #[test]
    fn test_custom_spawner() {
        let names = Arc::new(Mutex::new(Vec::new()));
        let options = WorkerOptions::new().name("audio").spawner(RecordingSpawner {
            names: names.clone(),
        });
        let mut worker = Worker::new(Arc::new(TaskQueue::new()), options);
        worker.start().unwrap();
        assert_eq!(*names.lock(), vec!["audio".to_string()]);
        drop(worker);

        let mut worker = Worker::new(
            Arc::new(TaskQueue::new()),
            WorkerOptions::new().spawner(FailingSpawner),
        );
        assert!(matches!(worker.start(), Err(WorkerError::Spawn(_))));
    }

    #[test]
    fn test_options_from_config() {
        let config = WorkerConfig {
            count: 2,
            thread_name: "io".to_string(),
            owns_queue: false,
        };
        let options = WorkerOptions::from_config(&config);
        assert_eq!(options.name, "io");
        assert!(!options.owns_queue);
    }
}
