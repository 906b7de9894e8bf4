//! Completion handles for queued tasks
//!
//! [`TaskQueue::enqueue_with_handle`](crate::TaskQueue::enqueue_with_handle)
//! wraps a task in a [`HandleTask`] whose cleanup step completes the returned
//! [`TaskHandle`]. Since cleanup follows every run and every discard, a handle
//! always completes exactly once: after the task ran, or when the queue
//! dropped it unrun.
//!
//! # Example
//!
//! ```ignore
//! let handle = queue.enqueue_with_handle(BakeLightmap { chunk: 12 })?;
//! if !handle.wait(Some(Duration::from_secs(1)), None) {
//!     warn!("Lightmap bake is taking longer than a second");
//! }
//! ```

mod manager;

use std::sync::Arc;
use std::time::Duration;

use slotmap::{Key, KeyData};
use tracing::warn;

pub use manager::{HandleKey, HandleManager};

use crate::cancel::CancellationToken;
use crate::data::{DataError, RefReader, RefWriter, TaskData};
use crate::task::{guarded, Task, TaskResult};

/// Handle errors
#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    /// The handle is already complete, or was never issued
    #[error("Task handle is not pending")]
    UnknownOrComplete,

    /// The handle was issued by another manager
    #[error("Task handle belongs to another manager")]
    ForeignManager,
}

/// Observes the completion of one queued task
#[derive(Clone)]
pub struct TaskHandle {
    manager: Arc<HandleManager>,
    key: HandleKey,
}

impl TaskHandle {
    pub fn key(&self) -> HandleKey {
        self.key
    }

    /// Whether the task has completed
    pub fn is_complete(&self) -> bool {
        self.manager.is_complete(self.key)
    }

    /// Block until the task completes.
    ///
    /// Returns `true` once complete, `false` if `timeout` elapsed or `cancel`
    /// fired first.
    pub fn wait(&self, timeout: Option<Duration>, cancel: Option<&CancellationToken>) -> bool {
        self.manager.wait(self.key, timeout, cancel)
    }

    /// Mark the task complete and wake every waiter
    pub fn notify_complete(&self) -> Result<(), HandleError> {
        self.manager.notify_complete(self)
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("key", &self.key)
            .field("complete", &self.is_complete())
            .finish()
    }
}

type Stored = (u64, Arc<HandleManager>);

impl TaskData for TaskHandle {
    const SIZE: usize = Stored::SIZE;
    const REFERENCES: usize = Stored::REFERENCES;

    fn serialize(self, bytes: &mut [u8], refs: &mut RefWriter<'_>) {
        (self.key.data().as_ffi(), self.manager).serialize(bytes, refs);
    }

    fn deserialize(bytes: &[u8], refs: &mut RefReader<'_>) -> Result<Self, DataError> {
        let (key, manager) = Stored::deserialize(bytes, refs)?;
        Ok(Self {
            manager,
            key: KeyData::from_ffi(key).into(),
        })
    }
}

/// Completes a handle once the wrapped task's cleanup has run
#[derive(crate::TaskData)]
pub struct HandleTask<T> {
    task: T,
    handle: TaskHandle,
}

impl<T> HandleTask<T> {
    pub(crate) fn new(task: T, handle: TaskHandle) -> Self {
        Self { task, handle }
    }
}

impl<T: Task> Task for HandleTask<T> {
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
        if let Err(e) = self.handle.notify_complete() {
            warn!("Failed to complete task handle {:?}: {}", self.handle.key, e);
        }
        inner
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::cancel::CancellationSource;
    use crate::store::TaskStores;

    #[test]
    fn test_complete_exactly_once() {
        let manager = HandleManager::new();
        let handle = manager.create();
        assert!(!handle.is_complete());
        assert_eq!(manager.pending_count(), 1);

        handle.notify_complete().unwrap();
        assert!(handle.is_complete());
        assert!(matches!(
            handle.notify_complete(),
            Err(HandleError::UnknownOrComplete)
        ));
        assert!(handle.wait(None, None));
    }

    #[test]
    fn test_recycled_slot_keeps_old_handle_complete() {
        let manager = HandleManager::new();
        let old = manager.create();
        old.notify_complete().unwrap();
        let new = manager.create();
        assert_ne!(old.key(), new.key());
        assert!(old.is_complete());
        assert!(!new.is_complete());
    }

    #[test]
    fn test_foreign_manager_rejected() {
        let a = HandleManager::new();
        let b = HandleManager::new();
        let handle = a.create();
        assert!(matches!(
            b.notify_complete(&handle),
            Err(HandleError::ForeignManager)
        ));
        assert!(!handle.is_complete());
    }

    #[test]
    fn test_wait_wakes_all_waiters() {
        let manager = HandleManager::new();
        let handle = manager.create();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.wait(None, None))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        handle.notify_complete().unwrap();
        assert!(waiters.into_iter().all(|w| w.join().unwrap()));
    }

    #[test]
    fn test_wait_timeout_and_cancel() {
        let manager = HandleManager::new();
        let handle = manager.create();
        assert!(!handle.wait(Some(Duration::from_millis(10)), None));

        let source = CancellationSource::new();
        let token = source.token();
        let waiter = {
            let handle = handle.clone();
            thread::spawn(move || handle.wait(None, Some(&token)))
        };
        thread::sleep(Duration::from_millis(20));
        source.cancel();
        assert!(!waiter.join().unwrap());
        assert!(!handle.is_complete());
    }

    #[test]
    fn test_clear_completes_everything() {
        let manager = HandleManager::new();
        let handles: Vec<_> = (0..4).map(|_| manager.create()).collect();
        assert_eq!(manager.clear(), 4);
        assert!(handles.iter().all(TaskHandle::is_complete));
        assert_eq!(manager.pending_count(), 0);
    }

    #[test]
    fn test_handle_survives_the_stores() {
        let manager = HandleManager::new();
        let handle = manager.create();
        let mut stores = TaskStores::new();
        stores.enqueue(handle.clone()).unwrap();
        assert_eq!(Arc::strong_count(&manager), 3);

        let restored = stores.dequeue::<TaskHandle>().unwrap();
        assert_eq!(restored.key(), handle.key());
        restored.notify_complete().unwrap();
        assert!(handle.is_complete());
    }
}
