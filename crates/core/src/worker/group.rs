//! Worker groups

use std::sync::Arc;

use tracing::{info, warn};

use super::{Worker, WorkerError, WorkerOptions};
use crate::config::WorkerConfig;
use crate::queue::TaskQueue;

/// Several workers draining one queue.
///
/// Queue ownership belongs to the group: the individual workers never
/// dispose the queue, the group does it once after stopping all of them.
pub struct WorkerGroup {
    queue: Arc<TaskQueue>,
    workers: Vec<Worker>,
    owns_queue: bool,
    disposed: bool,
}

impl WorkerGroup {
    /// Create `count` workers named `{name}-{index}`
    pub fn new(queue: Arc<TaskQueue>, count: usize, options: WorkerOptions) -> Self {
        let owns_queue = options.owns_queue;
        let workers = (0..count)
            .map(|index| {
                let options = options
                    .clone()
                    .name(format!("{}-{}", options.name, index))
                    .owns_queue(false);
                Worker::new(queue.clone(), options)
            })
            .collect();

        Self {
            queue,
            workers,
            owns_queue,
            disposed: false,
        }
    }

    pub fn from_config(queue: Arc<TaskQueue>, config: &WorkerConfig) -> Self {
        Self::new(queue, config.count, WorkerOptions::from_config(config))
    }

    pub fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Start every worker
    pub fn start(&mut self) -> Result<(), WorkerError> {
        for worker in &mut self.workers {
            worker.start()?;
        }
        info!("Started {} workers", self.workers.len());
        Ok(())
    }

    /// Stop every worker, then dispose the queue if the group owns it
    pub fn dispose(&mut self) -> Result<(), WorkerError> {
        if self.disposed {
            return Ok(());
        }
        self.disposed = true;

        for worker in &mut self.workers {
            worker.dispose()?;
        }
        if self.owns_queue {
            self.queue.dispose()?;
        }
        Ok(())
    }

    /// Join every worker; the first failure is returned after all are joined
    pub fn join(&mut self) -> Result<(), WorkerError> {
        if !self.disposed {
            return Err(WorkerError::NotDisposed);
        }

        let mut first = None;
        for worker in &mut self.workers {
            if let Err(e) = worker.join() {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl Drop for WorkerGroup {
    fn drop(&mut self) {
        if let Err(e) = self.dispose() {
            warn!("Failed to dispose worker group: {}", e);
        }
    }
}

impl std::fmt::Debug for WorkerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerGroup")
            .field("workers", &self.workers)
            .field("owns_queue", &self.owns_queue)
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::group::TaskGroup;
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

    #[test]
    fn test_group_drains_queue() {
        let hits = Arc::new(AtomicUsize::new(0));
        let queue = Arc::new(TaskQueue::new());
        let mut workers = WorkerGroup::new(
            queue.clone(),
            3,
            WorkerOptions::new().name("drain").owns_queue(true),
        );
        assert_eq!(workers.len(), 3);
        workers.start().unwrap();

        let group = TaskGroup::new();
        for _ in 0..200 {
            group.enqueue(&queue, Bump(hits.clone())).unwrap();
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        group.when_complete(move || {
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 200);

        assert!(matches!(workers.join(), Err(WorkerError::NotDisposed)));
        workers.dispose().unwrap();
        workers.join().unwrap();
        assert!(queue.is_disposed());
    }

    #[test]
    fn test_group_from_config() {
        let config = WorkerConfig {
            count: 2,
            thread_name: "cfg".to_string(),
            owns_queue: false,
        };
        let mut workers = WorkerGroup::from_config(Arc::new(TaskQueue::new()), &config);
        assert_eq!(workers.workers[1].name(), "cfg-1");
        workers.start().unwrap();
        workers.dispose().unwrap();
        workers.join().unwrap();
        assert!(!workers.queue().is_disposed());
    }
}
