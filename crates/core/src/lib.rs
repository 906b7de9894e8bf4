//! tasq - Core Library
//!
//! An in-process, type-erased task queue that enqueues heterogeneous task
//! values without a heap allocation per task. Worker threads dequeue and run
//! them in arrival order.
//!
//! # Overview
//!
//! - [`TaskQueue`] - FIFO of tasks split into payload bytes and references
//! - [`TaskHandle`] - observe completion of a single task
//! - [`TaskGroup`] - observe completion of a set of tasks
//! - [`Worker`] / [`WorkerGroup`] - threads draining a queue
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tasq_core::{Task, TaskData, TaskQueue, TaskResult, WorkerGroup, WorkerOptions};
//!
//! #[derive(TaskData)]
//! struct Resize {
//!     width: u32,
//!     height: u32,
//!     target: Arc<Surface>,
//! }
//!
//! impl Task for Resize {
//!     type Arg = ();
//!     type Output = ();
//!
//!     fn run(&mut self, _: ()) -> TaskResult<()> {
//!         self.target.resize(self.width, self.height);
//!         Ok(())
//!     }
//! }
//!
//! let queue = Arc::new(TaskQueue::new());
//! let mut workers = WorkerGroup::new(queue.clone(), 2, WorkerOptions::new());
//! workers.start()?;
//!
//! let handle = queue.enqueue_with_handle(Resize { width: 1280, height: 720, target })?;
//! handle.wait(None, None);
//! ```

// Allow the crate to refer to itself as `tasq_core` for proc macro compatibility
extern crate self as tasq_core;

pub mod cancel;
pub mod config;
pub mod data;
pub mod group;
pub mod handle;
pub mod metadata;
pub mod profiler;
pub mod queue;
pub mod store;
pub mod task;
pub mod worker;

// Re-export commonly used items
pub use cancel::{CancellationSource, CancellationToken};
pub use data::{DataError, RefReader, RefWriter, TaskData};
pub use group::{GroupError, TaskGroup};
pub use handle::{HandleError, HandleManager, TaskHandle};
pub use metadata::{Arity, KindCache, KindFlags, KindId, MetadataError, TaskKind};
pub use profiler::{Profiler, TracingProfiler};
pub use queue::{ClearSummary, QueueError, RunOutcome, TaskQueue};
pub use store::{DataAccess, StoreError, TaskStores};
pub use task::{BoxError, Task, TaskFault, TaskResult};
pub use worker::{
    FaultHandler, StdThreadSpawner, ThreadSpawner, Worker, WorkerError, WorkerGroup,
    WorkerOptions, WorkerThread,
};

// Re-export config types
pub use config::{ConfigError, ConfigResult, QueueConfig, TasqConfig, WorkerConfig};

// Re-export macros
pub use tasq_macros::TaskData;
