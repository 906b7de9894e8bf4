//! Frame scheduler demo
//!
//! Loads `tasq.toml` (or the file named by `$TASQ_CONFIG`), starts a worker
//! group and pushes a few frames of simulation work through it. Each frame
//! fans out one integration task per body, tracked by a task group, then
//! takes a snapshot tracked by a task handle.
//!
//! Logging honors `RUST_LOG`; without it the config's `debug` flag picks
//! between `info` and `debug`.

use std::process::ExitCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tasq_core::config::config_path;
use tasq_core::{
    ConfigError, GroupError, QueueError, Task, TaskData, TaskFault, TaskGroup, TaskQueue,
    TaskResult, TasqConfig, TracingProfiler, WorkerError, WorkerGroup, WorkerOptions,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const FRAMES: u32 = 5;
const BODIES: u32 = 64;
const FRAME_DT: f32 = 1.0 / 60.0;
const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
enum DemoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error("Frame {0} did not complete in time")]
    FrameTimeout(u32),
}

/// Body positions, stored as `f64` bits
struct World {
    positions: Vec<AtomicU64>,
}

impl World {
    fn new(bodies: u32) -> Self {
        Self {
            positions: (0..bodies).map(|_| AtomicU64::new(0f64.to_bits())).collect(),
        }
    }

    fn position(&self, body: u32) -> Option<f64> {
        self.positions
            .get(body as usize)
            .map(|p| f64::from_bits(p.load(Ordering::Acquire)))
    }

    fn total(&self) -> f64 {
        (0..self.positions.len() as u32)
            .filter_map(|body| self.position(body))
            .sum()
    }
}

/// Advance one body by one step; velocity is the body index
#[derive(TaskData)]
struct Integrate {
    body: u32,
    dt: f32,
    world: Arc<World>,
}

impl Task for Integrate {
    type Arg = ();
    type Output = ();

    fn run(&mut self, _: ()) -> TaskResult<()> {
        let slot = self
            .world
            .positions
            .get(self.body as usize)
            .ok_or_else(|| TaskFault::failed(format!("Unknown body {}", self.body)))?;

        let position = f64::from_bits(slot.load(Ordering::Acquire));
        let next = position + f64::from(self.body) * f64::from(self.dt);
        slot.store(next.to_bits(), Ordering::Release);
        Ok(())
    }
}

/// Log the world state for a frame
#[derive(TaskData)]
struct Snapshot {
    frame: u32,
    world: Arc<World>,
}

impl Task for Snapshot {
    type Arg = ();
    type Output = ();
    const DISPOSES: bool = true;

    fn run(&mut self, _: ()) -> TaskResult<()> {
        info!(
            "Frame {}: total displacement {:.3}",
            self.frame,
            self.world.total()
        );
        Ok(())
    }

    fn dispose(&mut self) -> TaskResult<()> {
        debug!("Released snapshot for frame {}", self.frame);
        Ok(())
    }
}

fn init_logging(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn run(config: TasqConfig) -> Result<(), DemoError> {
    let queue = Arc::new(TaskQueue::with_config(&config.queue));
    let options = WorkerOptions::from_config(&config.workers)
        .profiler(TracingProfiler)
        .fault_handler(|fault| warn!("Task fault: {}", fault));
    let mut workers = WorkerGroup::new(queue.clone(), config.workers.count.max(1), options);
    workers.start()?;

    let world = Arc::new(World::new(BODIES));
    for frame in 0..FRAMES {
        let group = TaskGroup::new();
        for body in 0..BODIES {
            group.enqueue(
                &queue,
                Integrate {
                    body,
                    dt: FRAME_DT,
                    world: world.clone(),
                },
            )?;
        }

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        group.when_complete(move || {
            let _ = done_tx.send(());
        });
        if done_rx.recv_timeout(FRAME_TIMEOUT).is_err() {
            return Err(DemoError::FrameTimeout(frame));
        }
        group.dispose()?;

        let snapshot = queue.enqueue_with_handle(Snapshot {
            frame,
            world: world.clone(),
        })?;
        if !snapshot.wait(Some(FRAME_TIMEOUT), None) {
            warn!("Snapshot for frame {} is still pending", frame);
        }
    }

    workers.dispose()?;
    workers.join()?;
    info!(
        "Simulated {} frames of {} bodies on {} workers",
        FRAMES,
        BODIES,
        workers.len()
    );
    Ok(())
}

fn main() -> ExitCode {
    let config = TasqConfig::load(config_path());
    init_logging(config.as_ref().is_ok_and(|c| c.debug));

    match config.map_err(DemoError::from).and_then(run) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("tasq demo failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
