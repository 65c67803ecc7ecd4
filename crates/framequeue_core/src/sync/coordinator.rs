//! # Coordinator
//!
//! The party that owns the consumer side: it ticks like every worker, then,
//! alone between FrameEnd and the next FrameStart, replays the consumer group,
//! swaps the roles and advances the frame.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::double_buffer::DoubleBufferedSet;
use super::frame::{AbortOnPanic, FrameInfo, FrameSynchronizer};
use crate::command::{Domain, DomainScope};
use crate::timing::FpsCalculator;

/// Result of one coordinator frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Keep calling `run_frame`.
    Continue,
    /// A stop was latched; the final flush is done and workers are exiting.
    Finished,
    /// The synchronizer was aborted; the consumer group was left undrained.
    Aborted,
}

/// Drives the coordinator party of a [`FrameSynchronizer`].
///
/// ## Usage
///
/// ```rust,ignore
/// let mut coordinator = Coordinator::new(Arc::clone(&sync), Arc::clone(&set));
/// while coordinator.run_frame(&mut canvas, |frame, canvas| {
///     if frame.frame == 299 {
///         sync.request_stop();
///     }
/// }) == FrameOutcome::Continue {}
/// ```
pub struct Coordinator<C, D: Domain> {
    sync: Arc<FrameSynchronizer>,
    buffers: Arc<DoubleBufferedSet<C, D>>,
    last_boundary: Instant,
    frame_time: FpsCalculator,
    work_time: FpsCalculator,
    drain_time: FpsCalculator,
    finished: bool,
}

impl<C, D: Domain> Coordinator<C, D> {
    /// Creates the coordinator. The first frame's delta is measured from here.
    #[must_use]
    pub fn new(sync: Arc<FrameSynchronizer>, buffers: Arc<DoubleBufferedSet<C, D>>) -> Self {
        Self {
            sync,
            buffers,
            last_boundary: Instant::now(),
            frame_time: FpsCalculator::new(),
            work_time: FpsCalculator::new(),
            drain_time: FpsCalculator::new(),
            finished: false,
        }
    }

    /// The synchronizer this coordinator is a party of.
    #[must_use]
    pub fn sync(&self) -> &Arc<FrameSynchronizer> {
        &self.sync
    }

    /// The set this coordinator drains.
    #[must_use]
    pub fn buffers(&self) -> &Arc<DoubleBufferedSet<C, D>> {
        &self.buffers
    }

    /// Returns true after a frame returned [`FrameOutcome::Finished`] or
    /// [`FrameOutcome::Aborted`].
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Rolling average of the coordinator's own tick time, in milliseconds.
    #[must_use]
    pub fn avg_work_ms(&self) -> f32 {
        self.work_time.avg_ms()
    }

    /// Rolling average time spent replaying the consumer group, in
    /// milliseconds.
    #[must_use]
    pub fn avg_drain_ms(&self) -> f32 {
        self.drain_time.avg_ms()
    }

    /// Rolling average boundary-to-boundary frame time, in milliseconds.
    #[must_use]
    pub fn avg_frame_ms(&self) -> f32 {
        self.frame_time.avg_ms()
    }

    /// Frames per second implied by [`avg_frame_ms`](Self::avg_frame_ms).
    #[must_use]
    pub fn fps(&self) -> u32 {
        self.frame_time.fps()
    }

    /// Runs one frame with no domain hooks.
    ///
    /// # Panics
    ///
    /// Panics if called after the pipeline finished.
    pub fn run_frame<T>(&mut self, ctx: &mut C, tick: T) -> FrameOutcome
    where
        T: FnOnce(&FrameInfo, &mut C),
    {
        self.run_frame_scoped(ctx, &mut (), tick)
    }

    /// Runs one frame: FrameStart, `tick`, FrameEnd, then the boundary step
    /// with `scope`'s hooks around each replayed domain.
    ///
    /// # Panics
    ///
    /// Panics if called after the pipeline finished.
    pub fn run_frame_scoped<S, T>(&mut self, ctx: &mut C, scope: &mut S, tick: T) -> FrameOutcome
    where
        S: DomainScope<C, D> + ?Sized,
        T: FnOnce(&FrameInfo, &mut C),
    {
        assert!(!self.finished, "run_frame called after the pipeline finished");
        let sync = Arc::clone(&self.sync);
        let _abort = AbortOnPanic(&sync);

        debug!(frame = sync.frame(), "coordinator arrived at frame start");
        sync.frame_start_rendezvous();
        if sync.is_aborted() {
            return self.abandon();
        }

        let frame = sync.frame_info();
        let started = Instant::now();
        tick(&frame, ctx);
        self.work_time.tick(started.elapsed().as_secs_f32());

        debug!(frame = frame.frame, "coordinator arrived at frame end");
        sync.frame_end_rendezvous();
        if sync.is_aborted() {
            return self.abandon();
        }

        // Boundary: every other party is parked until the next FrameStart.
        let drain_started = Instant::now();
        self.buffers.drain_consumer_scoped(ctx, scope);
        self.drain_time.tick(drain_started.elapsed().as_secs_f32());
        self.buffers.swap();

        let now = Instant::now();
        let delta = now.duration_since(self.last_boundary);
        self.last_boundary = now;
        self.frame_time.tick(delta.as_secs_f32());
        sync.advance_frame(delta);

        if sync.should_finish() {
            // Records pushed during the last frame were just swapped in.
            self.buffers.drain_consumer_scoped(ctx, scope);
            self.finished = true;
            info!(
                frames = sync.frame(),
                avg_frame_ms = self.avg_frame_ms(),
                "frame pipeline finished"
            );
            return FrameOutcome::Finished;
        }
        FrameOutcome::Continue
    }

    fn abandon(&mut self) -> FrameOutcome {
        self.finished = true;
        warn!(frame = self.sync.frame(), "frame pipeline aborted, consumer group not drained");
        FrameOutcome::Aborted
    }

    /// Runs frames until a stop is latched or the synchronizer is aborted,
    /// and returns the number of frames run. `tick` is responsible for calling
    /// [`FrameSynchronizer::request_stop`] at some point.
    pub fn run<T>(&mut self, ctx: &mut C, mut tick: T) -> u64
    where
        T: FnMut(&FrameInfo, &mut C),
    {
        let mut frames = 0;
        loop {
            frames += 1;
            if self.run_frame(ctx, &mut tick) != FrameOutcome::Continue {
                return frames;
            }
        }
    }
}

impl<C, D: Domain> fmt::Debug for Coordinator<C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("sync", &self.sync)
            .field("buffers", &self.buffers)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Invocation;
    use crate::sync::{FnWorker, FrameThread};
    use crate::TEST_SET_LOCK;

    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    enum Only {
        Main,
    }

    impl Domain for Only {
        const ORDER: &'static [Self] = &[Only::Main];
        fn index(self) -> usize {
            0
        }
    }

    #[test]
    fn test_single_party_pipeline_flushes_last_frame() {
        let _lock = TEST_SET_LOCK.lock();
        let sync = Arc::new(FrameSynchronizer::new(1));
        let set: Arc<DoubleBufferedSet<Vec<u64>, Only>> = DoubleBufferedSet::new();
        let mut coordinator = Coordinator::new(Arc::clone(&sync), Arc::clone(&set));

        let mut log = Vec::new();
        let frames = coordinator.run(&mut log, |frame, _| {
            let n = frame.frame;
            set.producer(Only::Main)
                .push(move |log: &mut Vec<u64>, _: &Invocation<'_>| log.push(n));
            if n == 3 {
                sync.request_stop();
            }
        });

        assert_eq!(frames, 4);
        assert_eq!(log, [0, 1, 2, 3]);
        assert!(coordinator.is_finished());
        assert_eq!(set.frame_swaps(), 4);
        assert_eq!(sync.frame(), 4);
    }

    #[test]
    fn test_records_reach_consumer_one_frame_later() {
        let _lock = TEST_SET_LOCK.lock();
        let sync = Arc::new(FrameSynchronizer::new(1));
        let set: Arc<DoubleBufferedSet<Vec<u64>, Only>> = DoubleBufferedSet::new();
        let mut coordinator = Coordinator::new(Arc::clone(&sync), Arc::clone(&set));

        let mut log = Vec::new();
        coordinator.run_frame(&mut log, |frame, _| {
            let n = frame.frame;
            set.producer(Only::Main)
                .push(move |log: &mut Vec<u64>, _: &Invocation<'_>| log.push(n));
        });
        assert!(log.is_empty(), "frame 0 records must not drain in frame 0");

        coordinator.run_frame(&mut log, |_, _| {});
        assert_eq!(log, [0]);
    }

    #[test]
    fn test_worker_panic_aborts_coordinator() {
        let _lock = TEST_SET_LOCK.lock();
        let sync = Arc::new(FrameSynchronizer::new(2));
        let set: Arc<DoubleBufferedSet<Vec<u64>, Only>> = DoubleBufferedSet::new();
        let worker = FrameThread::spawn(
            Arc::clone(&sync),
            FnWorker::new("Faulty", |frame: &FrameInfo| {
                assert!(frame.frame < 1, "tick failed");
            }),
        )
        .unwrap();
        let mut coordinator = Coordinator::new(Arc::clone(&sync), Arc::clone(&set));

        let mut log = Vec::new();
        let mut outcome = FrameOutcome::Continue;
        while outcome == FrameOutcome::Continue {
            outcome = coordinator.run_frame(&mut log, |frame, _| {
                let n = frame.frame;
                set.producer(Only::Main)
                    .push(move |log: &mut Vec<u64>, _: &Invocation<'_>| log.push(n));
            });
        }

        assert_eq!(outcome, FrameOutcome::Aborted);
        assert!(coordinator.is_finished());
        assert!(worker.join().is_err());
    }

    #[test]
    #[should_panic(expected = "after the pipeline finished")]
    fn test_run_frame_after_finish_panics() {
        let _lock = TEST_SET_LOCK.lock();
        let sync = Arc::new(FrameSynchronizer::new(1));
        let set: Arc<DoubleBufferedSet<(), Only>> = DoubleBufferedSet::new();
        let mut coordinator = Coordinator::new(Arc::clone(&sync), set);

        sync.request_stop();
        assert_eq!(coordinator.run_frame(&mut (), |_, _| {}), FrameOutcome::Finished);
        coordinator.run_frame(&mut (), |_, _| {});
    }
}
