//! Pending handle registry

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{after, bounded, never, select, Receiver, Sender};
use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};
use tracing::debug;

use super::{HandleError, TaskHandle};
use crate::cancel::CancellationToken;

new_key_type! {
    /// Key of a pending task handle
    pub struct HandleKey;
}

/// Created on the first wait; dropping the sender wakes every waiter
struct WaitSignal {
    _sender: Sender<()>,
    receiver: Receiver<()>,
}

impl WaitSignal {
    fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            _sender: sender,
            receiver,
        }
    }
}

/// Tracks which handles are still pending.
///
/// A handle is pending while its key is present. Completion removes the key,
/// and slotmap's generational keys keep a recycled slot from being mistaken
/// for an old handle.
pub struct HandleManager {
    pending: Mutex<SlotMap<HandleKey, Option<WaitSignal>>>,
}

impl HandleManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(SlotMap::with_key()),
        })
    }

    /// Register a new pending handle
    pub fn create(self: &Arc<Self>) -> TaskHandle {
        let key = self.pending.lock().insert(None);
        TaskHandle {
            manager: self.clone(),
            key,
        }
    }

    /// Number of handles not yet complete
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Complete a pending handle, waking its waiters
    pub fn notify_complete(&self, handle: &TaskHandle) -> Result<(), HandleError> {
        self.check_owner(handle)?;
        // The signal is dropped after the lock is released
        let signal = self.pending.lock().remove(handle.key);
        signal.map(drop).ok_or(HandleError::UnknownOrComplete)
    }

    /// Complete every pending handle
    pub fn clear(&self) -> usize {
        let mut pending = self.pending.lock();
        let count = pending.len();
        pending.clear();
        if count > 0 {
            debug!("Force-completed {} pending task handles", count);
        }
        count
    }

    fn check_owner(&self, handle: &TaskHandle) -> Result<(), HandleError> {
        if std::ptr::eq(Arc::as_ptr(&handle.manager), self) {
            Ok(())
        } else {
            Err(HandleError::ForeignManager)
        }
    }

    pub(super) fn is_complete(&self, key: HandleKey) -> bool {
        !self.pending.lock().contains_key(key)
    }

    pub(super) fn wait(
        &self,
        key: HandleKey,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> bool {
        let receiver = {
            let mut pending = self.pending.lock();
            match pending.get_mut(key) {
                None => return true,
                Some(signal) => signal.get_or_insert_with(WaitSignal::new).receiver.clone(),
            }
        };

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return false;
        }

        let no_cancel = never::<()>();
        let cancelled = cancel.map_or(&no_cancel, CancellationToken::receiver);
        let timed_out = timeout.map_or_else(never::<Instant>, after);

        select! {
            recv(receiver) -> _ => true,
            recv(cancelled) -> _ => false,
            recv(timed_out) -> _ => false,
        }
    }
}

impl std::fmt::Debug for HandleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleManager")
            .field("pending", &self.pending_count())
            .finish()
    }
}
