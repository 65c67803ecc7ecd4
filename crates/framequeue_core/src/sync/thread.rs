//! # Frame Threads
//!
//! Long-lived worker threads, each running one [`FrameWorker`] tick per frame.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, info};

use super::frame::{AbortOnPanic, FrameInfo, FrameSynchronizer};
use crate::error::{PipelineError, PipelineResult};
use crate::timing::FpsCalculator;

/// Work done by one thread once per frame.
pub trait FrameWorker: Send + 'static {
    /// Thread name, also used in logs and errors.
    fn name(&self) -> &str;

    /// Runs once on the worker thread before the first frame.
    fn on_start(&mut self) {}

    /// Runs exactly once per frame, between the two rendezvous.
    fn tick(&mut self, frame: &FrameInfo);

    /// Runs once on the worker thread after the last frame.
    fn on_end(&mut self) {}
}

type Hook = Box<dyn FnMut() + Send>;

/// A [`FrameWorker`] built from closures.
///
/// ```rust
/// use framequeue_core::{FnWorker, FrameInfo};
///
/// let worker = FnWorker::new("Audio", |frame: &FrameInfo| {
///     let _ = frame.delta_seconds();
/// })
/// .with_start(|| println!("audio up"))
/// .with_end(|| println!("audio down"));
/// ```
pub struct FnWorker<F> {
    name: String,
    tick: F,
    start: Option<Hook>,
    end: Option<Hook>,
}

impl<F> FnWorker<F>
where
    F: FnMut(&FrameInfo) + Send + 'static,
{
    /// Wraps `tick` as a worker called `name`.
    pub fn new(name: impl Into<String>, tick: F) -> Self {
        Self {
            name: name.into(),
            tick,
            start: None,
            end: None,
        }
    }

    /// Runs `hook` before the first frame.
    #[must_use]
    pub fn with_start(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.start = Some(Box::new(hook));
        self
    }

    /// Runs `hook` after the last frame.
    #[must_use]
    pub fn with_end(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.end = Some(Box::new(hook));
        self
    }
}

impl<F> FrameWorker for FnWorker<F>
where
    F: FnMut(&FrameInfo) + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_start(&mut self) {
        if let Some(hook) = self.start.as_mut() {
            hook();
        }
    }

    fn tick(&mut self, frame: &FrameInfo) {
        (self.tick)(frame);
    }

    fn on_end(&mut self) {
        if let Some(hook) = self.end.as_mut() {
            hook();
        }
    }
}

/// Tick statistics published by a running thread.
#[derive(Debug, Default)]
pub struct WorkStats {
    /// `f32` bits of the rolling average tick time.
    avg_work_ms: AtomicU32,
    ticks: AtomicU64,
}

impl WorkStats {
    /// Rolling average tick time in milliseconds.
    #[must_use]
    pub fn avg_work_ms(&self) -> f32 {
        f32::from_bits(self.avg_work_ms.load(Ordering::Relaxed))
    }

    /// Ticks completed.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Publishes a new average and tick count.
    pub fn record(&self, avg_work_ms: f32, ticks: u64) {
        self.avg_work_ms.store(avg_work_ms.to_bits(), Ordering::Relaxed);
        self.ticks.store(ticks, Ordering::Relaxed);
    }
}

/// A named OS thread driving one [`FrameWorker`] through the frame protocol.
///
/// The thread runs until the synchronizer latches a stop or is aborted, then
/// calls [`FrameWorker::on_end`] and exits. It is one of the synchronizer's
/// parties from the moment it is spawned. A panicking worker aborts the
/// synchronizer so the other parties are released.
#[derive(Debug)]
pub struct FrameThread {
    name: String,
    handle: JoinHandle<()>,
    stats: Arc<WorkStats>,
}

impl FrameThread {
    /// Spawns a thread named after the worker.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Spawn`] if the OS refuses the thread.
    pub fn spawn<W: FrameWorker>(sync: Arc<FrameSynchronizer>, mut worker: W) -> PipelineResult<Self> {
        let name = worker.name().to_owned();
        let stats = Arc::new(WorkStats::default());
        let thread_stats = Arc::clone(&stats);

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(&sync, &mut worker, &thread_stats))
            .map_err(|source| PipelineError::Spawn {
                name: name.clone(),
                source,
            })?;

        Ok(Self {
            name,
            handle,
            stats,
        })
    }

    /// Worker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live statistics of this thread.
    #[must_use]
    pub fn stats(&self) -> &WorkStats {
        &self.stats
    }

    /// Shared handle to this thread's statistics, for other threads to read.
    #[must_use]
    pub fn stats_handle(&self) -> Arc<WorkStats> {
        Arc::clone(&self.stats)
    }

    /// Rolling average tick time in milliseconds.
    #[must_use]
    pub fn avg_work_ms(&self) -> f32 {
        self.stats.avg_work_ms()
    }

    /// Returns true once the thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the thread to exit and returns the number of ticks it ran.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::WorkerPanicked`] if the worker panicked.
    pub fn join(self) -> PipelineResult<u64> {
        self.handle
            .join()
            .map_err(|_| PipelineError::WorkerPanicked { name: self.name })?;
        Ok(self.stats.ticks())
    }
}

fn run_worker<W: FrameWorker>(sync: &FrameSynchronizer, worker: &mut W, stats: &WorkStats) {
    let _abort = AbortOnPanic(sync);
    let mut work_time: FpsCalculator = FpsCalculator::new();
    let mut ticks = 0u64;

    worker.on_start();
    info!(worker = worker.name(), "frame thread started");

    while !sync.should_finish() {
        debug!(worker = worker.name(), frame = sync.frame(), "arrived at frame start");
        sync.frame_start_rendezvous();
        if sync.is_aborted() {
            break;
        }

        let frame = sync.frame_info();
        let started = Instant::now();
        worker.tick(&frame);
        work_time.tick(started.elapsed().as_secs_f32());
        ticks += 1;
        stats.record(work_time.avg_ms(), ticks);

        debug!(worker = worker.name(), frame = frame.frame, "arrived at frame end");
        sync.frame_end_rendezvous();
    }

    worker.on_end();
    info!(
        worker = worker.name(),
        ticks,
        avg_work_ms = work_time.avg_ms(),
        "frame thread finished"
    );
}
