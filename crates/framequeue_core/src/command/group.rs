//! # Queue Groups
//!
//! One [`CommandQueue`] per ordering domain, replayed in the domain's
//! declared order.

#![allow(unsafe_code)]

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;

use tracing::trace;

use super::queue::{CommandQueue, Invocation, RecordHandle};

/// A closed set of ordering domains.
///
/// Commands pushed to different domains are replayed domain by domain, in
/// the order of [`Domain::ORDER`], whatever the order they were pushed in.
///
/// # Example
///
/// ```rust
/// use framequeue_core::Domain;
///
/// #[derive(Clone, Copy, PartialEq, Eq, Debug)]
/// enum Pass { Scene, Overlay }
///
/// impl Domain for Pass {
///     const ORDER: &'static [Self] = &[Pass::Scene, Pass::Overlay];
///     fn index(self) -> usize { self as usize }
/// }
/// ```
pub trait Domain: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Every domain, in replay order.
    const ORDER: &'static [Self];

    /// Dense index in `0..ORDER.len()`.
    fn index(self) -> usize;
}

/// Hooks run around the replay of each domain.
///
/// Every hook defaults to a no-op; `()` is the empty scope.
pub trait DomainScope<C, D> {
    /// Before the first domain.
    fn begin(&mut self, _ctx: &mut C) {}
    /// Before replaying `domain`.
    fn enter(&mut self, _ctx: &mut C, _domain: D) {}
    /// After replaying `domain`.
    fn leave(&mut self, _ctx: &mut C, _domain: D) {}
    /// After the last domain.
    fn end(&mut self, _ctx: &mut C) {}
}

impl<C, D> DomainScope<C, D> for () {}

/// Per-domain command queues.
///
/// Each queue sits in its own cell so that producers writing to different
/// domains of the same group never hold overlapping borrows.
pub struct QueueGroup<C, D: Domain> {
    queues: Box<[UnsafeCell<CommandQueue<C>>]>,
    _domain: PhantomData<fn(D)>,
}

impl<C, D: Domain> QueueGroup<C, D> {
    /// Creates a group with empty, unallocated queues.
    ///
    /// # Panics
    ///
    /// Panics if the indices of `D::ORDER` are not a permutation of
    /// `0..D::ORDER.len()`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a group whose queues each pre-allocate `bytes`.
    ///
    /// # Panics
    ///
    /// See [`new`](Self::new).
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        let count = D::ORDER.len();
        let mut seen = vec![false; count];
        for &domain in D::ORDER {
            let index = domain.index();
            assert!(
                index < count && !seen[index],
                "domain {domain:?} has index {index}, expected a unique index below {count}"
            );
            seen[index] = true;
        }

        let queues = (0..count)
            .map(|_| UnsafeCell::new(CommandQueue::with_capacity(bytes)))
            .collect();
        Self {
            queues,
            _domain: PhantomData,
        }
    }

    /// Queue of one domain.
    #[must_use]
    pub fn queue(&self, domain: D) -> &CommandQueue<C> {
        // SAFETY: mutable access needs `&mut self`, or goes through
        // `queue_ptr`, whose callers guarantee no shared borrow is live.
        unsafe { &*self.queues[domain.index()].get() }
    }

    /// Queue of one domain, for pushing.
    pub fn queue_mut(&mut self, domain: D) -> &mut CommandQueue<C> {
        self.queues[domain.index()].get_mut()
    }

    /// Raw pointer to one domain's queue.
    ///
    /// Dereferencing it is only sound while no other reference to the same
    /// queue is live.
    pub(crate) fn queue_ptr(&self, domain: D) -> *mut CommandQueue<C> {
        self.queues[domain.index()].get()
    }

    /// Pushes a command to `domain`.
    pub fn push<F>(&mut self, domain: D, command: F) -> RecordHandle
    where
        F: Fn(&mut C, &Invocation<'_>) + Copy + Send + Sync + 'static,
    {
        self.queue_mut(domain).push(command)
    }

    /// Total commands queued across all domains.
    #[must_use]
    pub fn len(&self) -> usize {
        D::ORDER.iter().map(|&d| self.queue(d).len()).sum()
    }

    /// Returns true if no domain has a queued command.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        D::ORDER.iter().all(|&d| self.queue(d).is_empty())
    }

    /// Total arena capacity across all domains, in bytes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        D::ORDER.iter().map(|&d| self.queue(d).capacity()).sum()
    }

    /// Clears every domain without replaying.
    pub fn clear(&mut self) {
        for cell in self.queues.iter_mut() {
            cell.get_mut().clear();
        }
    }

    /// Replays every domain in [`Domain::ORDER`], clearing each one after its
    /// commands have run.
    pub fn execute_all_and_clear(&mut self, ctx: &mut C) {
        self.execute_all_and_clear_scoped(ctx, &mut ());
    }

    /// Like [`execute_all_and_clear`](Self::execute_all_and_clear), running
    /// `scope`'s hooks around the whole replay and around every domain.
    ///
    /// Hooks run for empty domains too.
    pub fn execute_all_and_clear_scoped<S>(&mut self, ctx: &mut C, scope: &mut S)
    where
        S: DomainScope<C, D> + ?Sized,
    {
        scope.begin(ctx);
        for &domain in D::ORDER {
            let queue = self.queues[domain.index()].get_mut();
            trace!(?domain, commands = queue.len(), bytes = queue.used(), "replaying domain");
            scope.enter(ctx, domain);
            queue.replay_all(ctx);
            queue.clear();
            scope.leave(ctx, domain);
        }
        scope.end(ctx);
    }
}

impl<C, D: Domain> Default for QueueGroup<C, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, D: Domain> fmt::Debug for QueueGroup<C, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for &domain in D::ORDER {
            map.entry(&domain, self.queue(domain));
        }
        map.finish()
    }
}
