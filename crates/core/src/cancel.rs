//! Cancellation of blocking waits
//!
//! A [`CancellationSource`] hands out [`CancellationToken`]s. Cancelling drops
//! the source's sender, which disconnects every token's receiver at once, so a
//! token can sit in a `select!` next to any other channel wait.
//!
//! Only waits are cancellable; a task body that is already running always
//! runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

struct CancelState {
    cancelled: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
}

/// Owner side of a cancellation signal
pub struct CancellationSource {
    state: Arc<CancelState>,
    receiver: Receiver<()>,
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationSource {
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            state: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
            }),
            receiver,
        }
    }

    /// A token observing this source
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            state: self.state.clone(),
            receiver: self.receiver.clone(),
        }
    }

    /// Signal cancellation to every token; later calls do nothing
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.sender.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }
}

/// Observer side of a cancellation signal
#[derive(Clone)]
pub struct CancellationToken {
    state: Arc<CancelState>,
    receiver: Receiver<()>,
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Receiver that disconnects once cancelled, for use in `select!`
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use crossbeam_channel::select;

    use super::*;

    #[test]
    fn test_cancel_wakes_select() {
        let source = CancellationSource::new();
        let token = source.token();
        assert!(!token.is_cancelled());

        let waiter = thread::spawn(move || {
            select! {
                recv(token.receiver()) -> msg => msg.is_err(),
            }
        });

        thread::sleep(Duration::from_millis(20));
        source.cancel();
        assert!(waiter.join().unwrap());
        assert!(source.is_cancelled());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let source = CancellationSource::new();
        let token = source.token();
        source.cancel();
        source.cancel();
        assert!(token.is_cancelled());
        assert!(token.clone().receiver().try_recv().is_err());
    }
}
