//! Per-task profiling hooks

use std::cell::RefCell;
use std::time::Instant;

use tracing::trace;

/// Receives a begin/end pair around every profiled task
pub trait Profiler: Send + Sync {
    /// A task of the given type is about to run
    fn begin_task(&self, type_name: &'static str);

    /// The task started by the matching `begin_task` has finished
    fn end_task(&self);
}

thread_local! {
    static OPEN_TASKS: RefCell<Vec<(&'static str, Instant)>> = const { RefCell::new(Vec::new()) };
}

/// Profiler that reports task durations as `trace!` events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProfiler;

impl Profiler for TracingProfiler {
    fn begin_task(&self, type_name: &'static str) {
        OPEN_TASKS.with(|open| open.borrow_mut().push((type_name, Instant::now())));
    }

    fn end_task(&self) {
        if let Some((type_name, started)) = OPEN_TASKS.with(|open| open.borrow_mut().pop()) {
            trace!(
                task = type_name,
                elapsed_us = started.elapsed().as_micros() as u64,
                "Task finished"
            );
        }
    }
}
