//! Thread abstraction used by workers

use std::io;
use std::thread::{self, JoinHandle};

/// Body run on a worker thread
pub type ThreadBody = Box<dyn FnOnce() + Send + 'static>;

/// A started thread that can be joined once
pub trait WorkerThread: Send {
    /// Block until the thread exits; `Err` carries the panic payload
    fn join(self: Box<Self>) -> thread::Result<()>;
}

/// Starts worker threads
pub trait ThreadSpawner: Send + Sync {
    fn start(&self, name: String, body: ThreadBody) -> io::Result<Box<dyn WorkerThread>>;
}

/// Spawns named `std` threads
#[derive(Debug, Default, Clone, Copy)]
pub struct StdThreadSpawner;

struct StdWorkerThread(JoinHandle<()>);

impl WorkerThread for StdWorkerThread {
    fn join(self: Box<Self>) -> thread::Result<()> {
        self.0.join()
    }
}

impl ThreadSpawner for StdThreadSpawner {
    fn start(&self, name: String, body: ThreadBody) -> io::Result<Box<dyn WorkerThread>> {
        let handle = thread::Builder::new().name(name).spawn(body)?;
        Ok(Box::new(StdWorkerThread(handle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std_threads_are_named() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let thread = StdThreadSpawner
            .start(
                "tasq-test".to_string(),
                Box::new(move || {
                    let _ = tx.send(thread::current().name().map(str::to_string));
                }),
            )
            .unwrap();

        thread.join().unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("tasq-test"));
    }

    #[test]
    fn test_join_reports_panic() {
        let thread = StdThreadSpawner
            .start("tasq-panics".to_string(), Box::new(|| panic!("worker body")))
            .unwrap();
        assert!(thread.join().is_err());
    }
}
