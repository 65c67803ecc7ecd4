//! Reusable cyclic barrier.

use parking_lot::{Condvar, Mutex};

struct BarrierState {
    arrived: usize,
    generation: u64,
    cancelled: bool,
}

/// An N-party barrier that re-arms itself after every cycle.
///
/// Each call to [`wait`](Self::wait) blocks until `parties` threads have
/// arrived; then all are released together and the barrier is ready for the
/// next cycle. The generation counter keeps a fast thread that re-enters
/// before a slow one has woken from being counted twice.
///
/// [`cancel`](Self::cancel) breaks the barrier for good: blocked parties are
/// released and every later wait returns at once.
pub struct FrameBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    all_arrived: Condvar,
}

impl FrameBarrier {
    /// Creates a barrier for `parties` threads.
    ///
    /// # Panics
    ///
    /// Panics if `parties` is zero.
    #[must_use]
    pub fn new(parties: usize) -> Self {
        assert!(parties > 0, "a barrier needs at least one party");
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                cancelled: false,
            }),
            all_arrived: Condvar::new(),
        }
    }

    /// Number of parties per cycle.
    #[inline]
    #[must_use]
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Number of completed cycles.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Releases every blocked party and makes every later wait return
    /// `false` immediately. Completions no longer run.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if !state.cancelled {
            state.cancelled = true;
            self.all_arrived.notify_all();
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// Blocks until every party has arrived.
    ///
    /// Returns `true` on exactly one party per cycle, the last to arrive.
    pub fn wait(&self) -> bool {
        self.wait_with(|| {})
    }

    /// Blocks until every party has arrived; the last arriver runs
    /// `completion` before anyone is released.
    ///
    /// `completion` runs under the barrier's lock and must not wait on this
    /// barrier. A cancelled barrier returns `false` without waiting.
    pub fn wait_with<F: FnOnce()>(&self, completion: F) -> bool {
        let mut state = self.state.lock();
        if state.cancelled {
            return false;
        }
        let generation = state.generation;
        state.arrived += 1;

        if state.arrived == self.parties {
            completion();
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.all_arrived.notify_all();
            true
        } else {
            while state.generation == generation && !state.cancelled {
                self.all_arrived.wait(&mut state);
            }
            false
        }
    }
}

impl std::fmt::Debug for FrameBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FrameBarrier")
            .field("parties", &self.parties)
            .field("arrived", &state.arrived)
            .field("generation", &state.generation)
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_party_never_blocks() {
        let barrier = FrameBarrier::new(1);
        for _ in 0..5 {
            assert!(barrier.wait());
        }
        assert_eq!(barrier.generation(), 5);
    }

    #[test]
    fn test_one_leader_per_cycle() {
        const PARTIES: usize = 4;
        const CYCLES: usize = 50;

        let barrier = Arc::new(FrameBarrier::new(PARTIES));
        let leaders = Arc::new(AtomicUsize::new(0));
        let completions = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..PARTIES)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let leaders = Arc::clone(&leaders);
                let completions = Arc::clone(&completions);
                thread::spawn(move || {
                    for _ in 0..CYCLES {
                        let leader = barrier.wait_with(|| {
                            completions.fetch_add(1, Ordering::Relaxed);
                        });
                        if leader {
                            leaders.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(leaders.load(Ordering::Relaxed), CYCLES);
        assert_eq!(completions.load(Ordering::Relaxed), CYCLES);
        assert_eq!(barrier.generation(), CYCLES as u64);
    }

    #[test]
    fn test_no_party_runs_ahead() {
        const PARTIES: usize = 3;
        const CYCLES: usize = 100;

        let barrier = Arc::new(FrameBarrier::new(PARTIES));
        let progress: Arc<Vec<AtomicUsize>> =
            Arc::new((0..PARTIES).map(|_| AtomicUsize::new(0)).collect());

        let handles: Vec<_> = (0..PARTIES)
            .map(|me| {
                let barrier = Arc::clone(&barrier);
                let progress = Arc::clone(&progress);
                thread::spawn(move || {
                    for cycle in 0..CYCLES {
                        progress[me].store(cycle, Ordering::SeqCst);
                        barrier.wait();
                        // Everyone has reached `cycle` before anyone passes it.
                        for other in progress.iter() {
                            assert!(other.load(Ordering::SeqCst) >= cycle);
                        }
                        barrier.wait();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_cancel_releases_blocked_parties() {
        let barrier = Arc::new(FrameBarrier::new(3));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || barrier.wait())
            })
            .collect();

        // Both parties are parked; the third never comes.
        while barrier.state.lock().arrived < 2 {
            thread::yield_now();
        }
        barrier.cancel();

        for handle in handles {
            assert!(!handle.join().unwrap());
        }
        assert!(barrier.is_cancelled());
        assert_eq!(barrier.generation(), 0);
    }

    #[test]
    fn test_cancelled_barrier_skips_completion() {
        let barrier = FrameBarrier::new(1);
        barrier.cancel();
        let mut ran = false;
        assert!(!barrier.wait_with(|| ran = true));
        assert!(!ran);
    }

    #[test]
    #[should_panic(expected = "at least one party")]
    fn test_zero_parties_panics() {
        let _ = FrameBarrier::new(0);
    }
}
