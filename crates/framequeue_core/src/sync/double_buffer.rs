//! # Double-Buffered Queue Set
//!
//! Two [`QueueGroup`]s whose producer and consumer roles are exchanged once per
//! frame.
//!
//! ## Safety Note
//!
//! The groups live in `UnsafeCell`s and are never locked. Exclusive access is
//! guaranteed by the frame protocol: producers only touch the producer group
//! during the tick phase, the coordinator only touches the consumer group in
//! the boundary step. The flags below catch violations of that protocol; they
//! do not replace it.
//!
//! A guard counts itself against the group it writes to, and re-reads the
//! producer index after doing so. A drain refuses a group whose count is not
//! zero. A `producer()` call racing a `swap()` therefore either retries on
//! the new producer group or makes the next drain panic; it never writes into
//! a group that is being replayed.

#![allow(unsafe_code)]
//!
//! ## Architecture
//!
//! ```text
//!          ┌──────────────────────────────────┐
//!          │       DoubleBufferedSet<C, D>    │
//!          │  ┌─────────────┐ ┌─────────────┐ │
//!          │  │ QueueGroup 0│ │ QueueGroup 1│ │
//!          │  └──────┬──────┘ └──────┬──────┘ │
//!          │  ┌──────┴───────────────┴──────┐ │
//!          │  │  producer index (0 / 1)     │ │
//!          │  └─────────────────────────────┘ │
//!          └──────────────────────────────────┘
//!                  │                  │
//!                  ▼                  ▼
//!        ┌──────────────────┐  ┌──────────────────┐
//!        │ ProducerGuard    │  │ drain_consumer   │
//!        │ (one per domain) │  │ + swap (boundary)│
//!        └──────────────────┘  └──────────────────┘
//! ```

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::command::{CommandQueue, Domain, DomainScope, QueueGroup};

/// Claimed by the one live [`DoubleBufferedSet`].
static SET_ALIVE: AtomicBool = AtomicBool::new(false);

/// Producer and consumer [`QueueGroup`]s with swappable roles.
///
/// Only one set may exist per process at a time. It is shared as an
/// `Arc` with every thread that pushes or drains.
///
/// ## Usage
///
/// ```rust,ignore
/// let set: Arc<DoubleBufferedSet<Canvas, RenderGroup>> = DoubleBufferedSet::new();
///
/// // Tick phase, any worker thread
/// set.producer(RenderGroup::World).push(draw_cube);
///
/// // Boundary step, coordinator only
/// set.drain_consumer(&mut canvas);
/// set.swap();
/// ```
pub struct DoubleBufferedSet<C, D: Domain> {
    /// Using UnsafeCell because access is serialized by the frame protocol.
    groups: [UnsafeCell<QueueGroup<C, D>>; 2],

    /// Index of the producer group (0 or 1).
    /// The consumer group is always `producer_index ^ 1`.
    producer_index: AtomicUsize,

    /// One flag per domain: a producer guard is alive for it.
    producers_busy: Box<[AtomicBool]>,

    /// Number of live producer guards.
    active_producers: AtomicUsize,

    /// Live producer guards per group.
    group_producers: [AtomicUsize; 2],

    /// The consumer group is being replayed.
    draining: AtomicBool,

    /// Number of completed swaps.
    swaps: AtomicU64,
}

// SAFETY: the groups are only reached through ProducerGuard (one per domain,
// enforced by `producers_busy`) and through drain_consumer (one at a time,
// enforced by `draining`), on opposite groups. Commands are Send + Sync.
unsafe impl<C, D: Domain> Sync for DoubleBufferedSet<C, D> {}

impl<C, D: Domain> DoubleBufferedSet<C, D> {
    /// Creates the set with unallocated queues.
    ///
    /// # Panics
    ///
    /// Panics if another set is alive, or if `D::ORDER` is not a valid
    /// domain order.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_capacity(0)
    }

    /// Creates the set with every queue pre-allocating `bytes`.
    ///
    /// # Panics
    ///
    /// See [`new`](Self::new).
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Arc<Self> {
        let groups = [
            UnsafeCell::new(QueueGroup::with_capacity(bytes)),
            UnsafeCell::new(QueueGroup::with_capacity(bytes)),
        ];

        let already_alive = SET_ALIVE.swap(true, Ordering::AcqRel);
        assert!(
            !already_alive,
            "Only one DoubleBufferedSet may exist at a time!"
        );

        Arc::new(Self {
            groups,
            producer_index: AtomicUsize::new(0),
            producers_busy: D::ORDER.iter().map(|_| AtomicBool::new(false)).collect(),
            active_producers: AtomicUsize::new(0),
            group_producers: [AtomicUsize::new(0), AtomicUsize::new(0)],
            draining: AtomicBool::new(false),
            swaps: AtomicU64::new(0),
        })
    }

    /// Index of the current producer group (0 or 1).
    #[inline]
    #[must_use]
    pub fn producer_index(&self) -> usize {
        self.producer_index.load(Ordering::Acquire)
    }

    /// Number of swaps performed so far.
    #[inline]
    #[must_use]
    pub fn frame_swaps(&self) -> u64 {
        self.swaps.load(Ordering::Relaxed)
    }

    /// Number of live producer guards.
    #[inline]
    #[must_use]
    pub fn active_producers(&self) -> usize {
        self.active_producers.load(Ordering::Acquire)
    }

    /// Gets exclusive access to one domain's queue in the producer group.
    ///
    /// Guards for different domains may be held on different threads at the
    /// same time. Drop the guard before the frame ends.
    ///
    /// # Panics
    ///
    /// Panics if a guard for `domain` is already alive.
    #[must_use]
    pub fn producer(self: &Arc<Self>, domain: D) -> ProducerGuard<C, D> {
        let was_busy = self.producers_busy[domain.index()].swap(true, Ordering::AcqRel);
        assert!(
            !was_busy,
            "Double producer on domain {domain:?}! Only one producer guard per domain at a time."
        );
        self.active_producers.fetch_add(1, Ordering::AcqRel);

        let group_index = loop {
            let index = self.producer_index.load(Ordering::SeqCst);
            self.group_producers[index].fetch_add(1, Ordering::SeqCst);
            if self.producer_index.load(Ordering::SeqCst) == index {
                break index;
            }
            // Lost a race with swap(); that group is the consumer now.
            self.group_producers[index].fetch_sub(1, Ordering::SeqCst);
        };

        ProducerGuard {
            set: Arc::clone(self),
            domain,
            group_index,
        }
    }

    /// Replays and clears the consumer group. Coordinator only.
    ///
    /// # Panics
    ///
    /// Panics if another drain is in progress.
    pub fn drain_consumer(&self, ctx: &mut C) {
        self.drain_consumer_scoped(ctx, &mut ());
    }

    /// Like [`drain_consumer`](Self::drain_consumer), with `scope`'s hooks
    /// around each domain.
    ///
    /// # Panics
    ///
    /// Panics if another drain is in progress, or if a producer guard still
    /// writes to the consumer group.
    pub fn drain_consumer_scoped<S>(&self, ctx: &mut C, scope: &mut S)
    where
        S: DomainScope<C, D> + ?Sized,
    {
        let already_draining = self.draining.swap(true, Ordering::AcqRel);
        assert!(!already_draining, "Consumer drain already in progress!");
        let _drain = DrainFlag(&self.draining);

        let consumer = self.producer_index.load(Ordering::SeqCst) ^ 1;
        assert_eq!(
            self.group_producers[consumer].load(Ordering::SeqCst),
            0,
            "Cannot drain a group that producer guards still write to!"
        );
        // SAFETY: no guard is pinned to the consumer group, new guards pin
        // the producer group, and `draining` makes this the only reference
        // to the consumer group.
        let group = unsafe { &mut *self.groups[consumer].get() };
        group.execute_all_and_clear_scoped(ctx, scope);
    }

    /// Exchanges the producer and consumer roles. Coordinator only, in the
    /// boundary step.
    ///
    /// # Panics
    ///
    /// Panics if a producer guard is alive or a drain is in progress.
    pub fn swap(&self) {
        assert_eq!(
            self.active_producers.load(Ordering::Acquire),
            0,
            "Cannot swap while producer guards are alive!"
        );
        assert!(
            !self.draining.load(Ordering::Acquire),
            "Cannot swap while the consumer group is draining!"
        );

        self.producer_index.fetch_xor(1, Ordering::SeqCst);
        self.swaps.fetch_add(1, Ordering::Relaxed);
    }

    /// Shared view of one group, for guards.
    ///
    /// # Safety
    ///
    /// `index` must not be the group a drain is replaying.
    unsafe fn group(&self, index: usize) -> &QueueGroup<C, D> {
        // SAFETY: guaranteed by the caller.
        unsafe { &*self.groups[index].get() }
    }
}

impl<C, D: Domain> Drop for DoubleBufferedSet<C, D> {
    fn drop(&mut self) {
        SET_ALIVE.store(false, Ordering::Release);
    }
}

impl<C, D: Domain> fmt::Debug for DoubleBufferedSet<C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DoubleBufferedSet")
            .field("producer_index", &self.producer_index())
            .field("active_producers", &self.active_producers())
            .field("frame_swaps", &self.frame_swaps())
            .finish_non_exhaustive()
    }
}

/// Clears the draining flag, even if a command panics.
struct DrainFlag<'a>(&'a AtomicBool);

impl Drop for DrainFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Exclusive access to one domain's queue in the producer group.
///
/// ## Usage
///
/// ```rust,ignore
/// let mut world = set.producer(RenderGroup::World);
/// let record = world.push(draw_text);
/// world.push_str(record, "Score: 10");
/// // Guard is released when it goes out of scope
/// ```
pub struct ProducerGuard<C, D: Domain> {
    set: Arc<DoubleBufferedSet<C, D>>,
    domain: D,
    group_index: usize,
}

impl<C, D: Domain> ProducerGuard<C, D> {
    /// Domain this guard writes to.
    #[inline]
    #[must_use]
    pub fn domain(&self) -> D {
        self.domain
    }

    /// Group this guard writes to (for debugging).
    #[inline]
    #[must_use]
    pub fn group_index(&self) -> usize {
        self.group_index
    }
}

impl<C, D: Domain> Deref for ProducerGuard<C, D> {
    type Target = CommandQueue<C>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        // SAFETY: we hold the only guard for this domain, and the producer
        // group is never drained while guards are alive.
        unsafe { &*self.set.group(self.group_index).queue_ptr(self.domain) }
    }
}

impl<C, D: Domain> DerefMut for ProducerGuard<C, D> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: as for `deref`; `&mut self` rules out other borrows
        // through this guard.
        unsafe { &mut *self.set.group(self.group_index).queue_ptr(self.domain) }
    }
}

impl<C, D: Domain> Drop for ProducerGuard<C, D> {
    fn drop(&mut self) {
        self.set.group_producers[self.group_index].fetch_sub(1, Ordering::SeqCst);
        self.set.active_producers.fetch_sub(1, Ordering::AcqRel);
        self.set.producers_busy[self.domain.index()].store(false, Ordering::Release);
    }
}

impl<C, D: Domain> fmt::Debug for ProducerGuard<C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerGuard")
            .field("domain", &self.domain)
            .field("group_index", &self.group_index)
            .finish()
    }
}
