//! # Frame Synchronizer
//!
//! Two barriers and the frame state shared by every party.
//!
//! ```text
//!  WaitFrameStart ──► RunningTick ──► WaitFrameEnd ──┐
//!        ▲                                           │
//!        └────────────── !should_finish ◄────────────┘
//! ```
//!
//! The frame number, delta and termination flag are atomics written either by
//! the coordinator in the boundary step or by the FrameEnd completion. The
//! barrier mutex orders those writes before every party's next read.
//!
//! [`FrameSynchronizer::abort`] is the way out when a party can no longer
//! take part (a failed spawn, a panicking tick). It cancels both barriers, so
//! every party leaves its rendezvous at once and sees
//! [`is_aborted`](FrameSynchronizer::is_aborted).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use super::barrier::FrameBarrier;

/// Per-frame values handed to every tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// Frame number, starting at 0.
    pub frame: u64,
    /// Time between the two previous frame boundaries. Zero on frame 0.
    pub delta: Duration,
}

impl FrameInfo {
    /// `delta` in seconds.
    #[inline]
    #[must_use]
    pub fn delta_seconds(&self) -> f32 {
        self.delta.as_secs_f32()
    }
}

/// Lockstep frame rendezvous for a fixed number of parties.
///
/// `parties` counts every thread that calls the rendezvous methods: all
/// workers plus the coordinator. A wrong count deadlocks every party.
pub struct FrameSynchronizer {
    parties: usize,
    frame_start: FrameBarrier,
    frame_end: FrameBarrier,

    /// Set by `request_stop`, from any thread.
    stop_requested: AtomicBool,

    /// Latched from `stop_requested` by the FrameEnd completion.
    should_finish: AtomicBool,

    /// Set by `abort`; the barriers are cancelled.
    aborted: AtomicBool,

    frame: AtomicU64,
    delta_nanos: AtomicU64,
}

impl FrameSynchronizer {
    /// Creates a synchronizer for `parties` threads.
    ///
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    #[must_use]
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "a frame needs at least one party");
        Self {
            parties,
            frame_start: FrameBarrier::new(parties),
            frame_end: FrameBarrier::new(parties),
            stop_requested: AtomicBool::new(false),
            should_finish: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            frame: AtomicU64::new(0),
            delta_nanos: AtomicU64::new(0),
        }
    }

    /// Number of parties per rendezvous.
    #[inline]
    #[must_use]
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Asks every party to stop after the frame in flight.
    pub fn request_stop(&self) {
        if !self.stop_requested.swap(true, Ordering::AcqRel) {
            debug!(frame = self.frame(), "stop requested");
        }
    }

    /// Stops the pipeline immediately.
    ///
    /// Every party blocked in a rendezvous is released, and every later
    /// rendezvous returns without waiting. The frame in flight is abandoned.
    pub fn abort(&self) {
        if !self.aborted.swap(true, Ordering::AcqRel) {
            warn!(frame = self.frame(), "frame pipeline aborted");
        }
        self.stop_requested.store(true, Ordering::Release);
        self.should_finish.store(true, Ordering::Release);
        self.frame_start.cancel();
        self.frame_end.cancel();
    }

    /// Returns true once [`abort`](Self::abort) has been called.
    #[inline]
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Returns true once [`request_stop`](Self::request_stop) has been called.
    #[inline]
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Returns true once a stop has been latched at a frame end. Every party
    /// sees the same value after a FrameEnd rendezvous.
    #[inline]
    #[must_use]
    pub fn should_finish(&self) -> bool {
        self.should_finish.load(Ordering::Acquire)
    }

    /// Current frame number.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Current frame number and delta.
    #[must_use]
    pub fn frame_info(&self) -> FrameInfo {
        FrameInfo {
            frame: self.frame(),
            delta: Duration::from_nanos(self.delta_nanos.load(Ordering::Acquire)),
        }
    }

    /// Blocks until every party has arrived at the start of the frame.
    pub fn frame_start_rendezvous(&self) {
        self.frame_start.wait();
    }

    /// Blocks until every party has finished its tick, latching a pending stop
    /// request before anyone is released.
    pub fn frame_end_rendezvous(&self) {
        self.frame_end.wait_with(|| {
            if self.stop_requested.load(Ordering::Acquire) {
                self.should_finish.store(true, Ordering::Release);
            }
        });
    }

    /// Moves to the next frame. Coordinator only, in the boundary step.
    pub fn advance_frame(&self, delta: Duration) {
        let nanos = u64::try_from(delta.as_nanos()).unwrap_or(u64::MAX);
        self.delta_nanos.store(nanos, Ordering::Release);
        self.frame.fetch_add(1, Ordering::AcqRel);
    }

    /// Completed FrameStart rendezvous.
    #[must_use]
    pub fn start_generations(&self) -> u64 {
        self.frame_start.generation()
    }

    /// Completed FrameEnd rendezvous.
    #[must_use]
    pub fn end_generations(&self) -> u64 {
        self.frame_end.generation()
    }
}

impl std::fmt::Debug for FrameSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSynchronizer")
            .field("parties", &self.parties)
            .field("frame", &self.frame())
            .field("stop_requested", &self.stop_requested())
            .field("should_finish", &self.should_finish())
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

/// Aborts the synchronizer if dropped during a panic, so the other parties
/// are not left parked at a rendezvous.
pub(crate) struct AbortOnPanic<'a>(pub(crate) &'a FrameSynchronizer);

impl Drop for AbortOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.abort();
        }
    }
}
