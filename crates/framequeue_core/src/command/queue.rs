//! # Command Queue
//!
//! Typed push / replay / clear over one [`ByteArena`].
//!
//! ## Record format
//!
//! ```text
//! ┌────────────────────────── RecordHeader<C> ─┬──────────┬───────────┐
//! │ size: u32 │ body: u32 │ invoke: fn pointer │ closure  │ OOB tail  │
//! └───────────┴───────────┴────────────────────┴──────────┴───────────┘
//! ◄──────────────────────── body ────────────────────────►
//! ◄──────────────────────────────── size ─────────────────────────────►
//! ```
//!
//! `invoke` is a monomorphised trampoline that casts the payload back to the
//! closure type and calls it. It is a code address, never a pointer into the
//! arena, so records can be moved with a plain byte copy when the arena grows.

#![allow(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::mem;

use bytemuck::Pod;

use crate::memory::{ByteArena, Ref, ALIGN};

/// Calls the closure stored at the given payload pointer.
type Trampoline<C> = for<'q> unsafe fn(*const u8, &mut C, &Invocation<'q>);

#[repr(C)]
struct RecordHeader<C> {
    /// Total record size. Must stay the first field: the arena reads and
    /// extends it.
    size: u32,
    /// Header plus payload, rounded to `ALIGN`. The OOB tail starts here.
    body: u32,
    invoke: Trampoline<C>,
}

const _: () = assert!(mem::align_of::<RecordHeader<()>>() <= ALIGN);

const fn align_up(n: usize) -> usize {
    (n + ALIGN - 1) & !(ALIGN - 1)
}

const fn payload_offset<C>() -> usize {
    align_up(mem::size_of::<RecordHeader<C>>())
}

/// # Safety
///
/// `payload` must point at a live, properly aligned `F`.
unsafe fn trampoline<C, F>(payload: *const u8, ctx: &mut C, call: &Invocation<'_>)
where
    F: Fn(&mut C, &Invocation<'_>),
{
    // SAFETY: guaranteed by the caller (replay_all only passes the payload
    // written by `push::<F>`).
    let command = unsafe { &*payload.cast::<F>() };
    command(ctx, call);
}

/// Handle to a record, returned by [`CommandQueue::push`].
///
/// Out-of-band data can only be attached through the handle of the most
/// recently pushed record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordHandle {
    offset: u32,
    epoch: u32,
}

impl RecordHandle {
    /// Byte offset of the record inside its queue's arena.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset as usize
    }
}

/// What a command sees of its queue while it is being replayed.
///
/// Gives read-only access to the queue's arena, so a command can resolve
/// [`Ref`]s it captured, and to the out-of-band bytes attached to the command
/// itself.
pub struct Invocation<'q> {
    arena: &'q ByteArena,
    record: RecordHandle,
    tail_start: usize,
    tail_end: usize,
}

impl<'q> Invocation<'q> {
    /// Handle of the record being replayed.
    #[inline]
    #[must_use]
    pub fn record(&self) -> RecordHandle {
        self.record
    }

    /// All out-of-band bytes attached to this record, alignment padding
    /// included (padding is zero).
    #[inline]
    #[must_use]
    pub fn out_of_band(&self) -> &'q [u8] {
        self.arena.oob_bytes(self.tail_start, self.tail_end)
    }

    /// Text attached to this record, up to the first NUL.
    ///
    /// # Panics
    ///
    /// Panics if the attached bytes are not UTF-8.
    #[must_use]
    pub fn text(&self) -> &'q str {
        let tail = self.out_of_band();
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        std::str::from_utf8(&tail[..end]).expect("record tail must be UTF-8 text")
    }

    /// Resolves a [`Ref`] issued by this queue.
    #[inline]
    #[must_use]
    pub fn at(&self, r: Ref) -> &'q [u8] {
        self.arena.at(r)
    }

    /// Resolves a [`Ref`] to text stored with a terminator.
    #[inline]
    #[must_use]
    pub fn str_at(&self, r: Ref) -> &'q str {
        self.arena.str_at(r)
    }

    /// Resolves a [`Ref`] to a slice of plain-old-data values.
    #[inline]
    #[must_use]
    pub fn slice_at<T: Pod>(&self, r: Ref) -> &'q [T] {
        self.arena.slice_at(r)
    }
}

/// A queue of deferred commands replayed against a context of type `C`.
///
/// # Thread Safety
///
/// `Send + Sync` regardless of `C`: every stored command is
/// `Send + Sync`, and the context is only borrowed during replay.
///
/// # Example
///
/// ```rust
/// use framequeue_core::{CommandQueue, Invocation};
///
/// let mut queue: CommandQueue<String> = CommandQueue::new();
/// queue.push_with_text("hello", |out: &mut String, call: &Invocation<'_>| {
///     out.push_str(call.text());
/// });
///
/// let mut out = String::new();
/// queue.replay_all(&mut out);
/// assert_eq!(out, "hello");
/// ```
pub struct CommandQueue<C> {
    arena: ByteArena,
    _context: PhantomData<fn(&mut C)>,
}

impl<C> CommandQueue<C> {
    /// Creates an empty queue with no backing storage.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a queue with `bytes` of arena pre-allocated.
    #[must_use]
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            arena: ByteArena::with_capacity(bytes),
            _context: PhantomData,
        }
    }

    /// Number of commands queued.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Returns true if nothing is queued.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Arena capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.arena.capacity()
    }

    /// Arena bytes in use.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.arena.used()
    }

    /// The underlying arena, for statistics.
    #[inline]
    #[must_use]
    pub fn arena(&self) -> &ByteArena {
        &self.arena
    }

    /// Handle of the most recently pushed command, if any.
    #[must_use]
    pub fn last(&self) -> Option<RecordHandle> {
        self.arena.last_record().map(|offset| RecordHandle {
            offset: offset as u32,
            epoch: self.arena.epoch(),
        })
    }

    /// Appends a command. Amortized O(1), no allocation unless the arena grows.
    ///
    /// The closure is stored by value and copied bytewise if the arena grows,
    /// which is why it must be `Copy`. It never runs a destructor.
    pub fn push<F>(&mut self, command: F) -> RecordHandle
    where
        F: Fn(&mut C, &Invocation<'_>) + Copy + Send + Sync + 'static,
    {
        const {
            assert!(
                mem::align_of::<F>() <= ALIGN,
                "command captures must not need more than ALIGN alignment"
            );
        }
        let payload_at = payload_offset::<C>();
        let body = align_up(payload_at + mem::size_of::<F>());
        let offset = self.arena.alloc_record(body);

        let header = RecordHeader::<C> {
            size: body as u32,
            body: body as u32,
            invoke: trampoline::<C, F>,
        };
        let base = self.arena.record_ptr_mut(offset);
        // SAFETY: alloc_record reserved `body` bytes at an ALIGN-aligned
        // offset. The header and `F` both need at most ALIGN alignment and
        // together fit inside `body`.
        unsafe {
            base.cast::<RecordHeader<C>>().write(header);
            base.add(payload_at).cast::<F>().write(command);
        }

        RecordHandle {
            offset: offset as u32,
            epoch: self.arena.epoch(),
        }
    }

    /// Reserves `byte_count` zeroed out-of-band bytes attached to `record`.
    ///
    /// # Panics
    ///
    /// Panics unless `record` is the most recently pushed command.
    pub fn reserve_out_of_band(&mut self, record: RecordHandle, byte_count: usize) -> Ref {
        self.assert_last(record);
        self.arena.reserve_out_of_band(byte_count)
    }

    /// Copies `bytes` into an out-of-band region attached to `record`.
    ///
    /// # Panics
    ///
    /// Panics unless `record` is the most recently pushed command.
    pub fn copy_out_of_band(&mut self, record: RecordHandle, bytes: &[u8]) -> Ref {
        self.assert_last(record);
        self.arena.copy_out_of_band(bytes)
    }

    /// Copies plain-old-data values into an out-of-band region attached to
    /// `record`.
    ///
    /// # Panics
    ///
    /// Panics unless `record` is the most recently pushed command.
    pub fn copy_slice_out_of_band<T: Pod>(&mut self, record: RecordHandle, items: &[T]) -> Ref {
        self.assert_last(record);
        self.arena.copy_slice_out_of_band(items)
    }

    /// Copies `text` plus a NUL terminator into an out-of-band region attached
    /// to `record`.
    ///
    /// # Panics
    ///
    /// Panics unless `record` is the most recently pushed command.
    pub fn push_str(&mut self, record: RecordHandle, text: &str) -> Ref {
        self.assert_last(record);
        self.arena.copy_str_out_of_band(text)
    }

    /// Pushes a command with `text` attached; the command reads it back with
    /// [`Invocation::text`].
    pub fn push_with_text<F>(&mut self, text: &str, command: F) -> RecordHandle
    where
        F: Fn(&mut C, &Invocation<'_>) + Copy + Send + Sync + 'static,
    {
        let record = self.push(command);
        self.push_str(record, text);
        record
    }

    /// Bytes of an out-of-band region.
    ///
    /// # Panics
    ///
    /// Panics if `r` is unset, stale, issued by another queue, or out of range.
    #[must_use]
    pub fn at(&self, r: Ref) -> &[u8] {
        self.arena.at(r)
    }

    /// Bytes of an out-of-band region, for writing.
    ///
    /// # Panics
    ///
    /// Panics if `r` is unset, stale, issued by another queue, or out of range.
    pub fn at_mut(&mut self, r: Ref) -> &mut [u8] {
        self.arena.at_mut(r)
    }

    /// Text stored with [`push_str`](Self::push_str).
    #[must_use]
    pub fn str_at(&self, r: Ref) -> &str {
        self.arena.str_at(r)
    }

    /// Invokes every queued command once, in push order.
    ///
    /// Does not clear; see [`clear`](Self::clear).
    pub fn replay_all(&self, ctx: &mut C) {
        for offset in self.arena.records() {
            let base = self.arena.record_ptr(offset);
            // SAFETY: every record in this arena was written by `push`, which
            // puts a RecordHeader<C> at the record start.
            let header = unsafe { base.cast::<RecordHeader<C>>().read() };
            let call = Invocation {
                arena: &self.arena,
                record: RecordHandle {
                    offset: offset as u32,
                    epoch: self.arena.epoch(),
                },
                tail_start: offset + header.body as usize,
                tail_end: offset + header.size as usize,
            };
            // SAFETY: the payload follows the header, and `invoke` was
            // instantiated for the closure type stored there.
            unsafe { (header.invoke)(base.add(payload_offset::<C>()), ctx, &call) };
        }
    }

    /// Forgets every queued command and invalidates every [`Ref`]. O(1).
    #[inline]
    pub fn clear(&mut self) {
        self.arena.clear();
    }

    fn assert_last(&self, record: RecordHandle) {
        assert!(
            record.epoch == self.arena.epoch()
                && self.arena.last_record() == Some(record.offset()),
            "out-of-band data must be attached to the most recently pushed command"
        );
    }
}

impl<C> Default for CommandQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for CommandQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("arena", &self.arena)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_clear_replay() {
        let mut queue: CommandQueue<Vec<i32>> = CommandQueue::new();
        assert_eq!(queue.capacity(), 0);

        for i in 1..=3 {
            queue.push(move |log: &mut Vec<i32>, _: &Invocation<'_>| log.push(i));
        }
        let mut log = Vec::new();
        queue.replay_all(&mut log);
        queue.clear();
        assert_eq!(log, [1, 2, 3]);

        log.clear();
        queue.push(|log: &mut Vec<i32>, _: &Invocation<'_>| log.push(4));
        queue.replay_all(&mut log);
        assert_eq!(log, [4]);
    }

    #[test]
    fn test_order_survives_many_growths() {
        let mut queue: CommandQueue<Vec<u32>> = CommandQueue::new();
        for i in 0..1000u32 {
            if i % 3 == 0 {
                // Larger capture to vary record sizes.
                let pad = [i as u64; 4];
                queue.push(move |log: &mut Vec<u32>, _: &Invocation<'_>| {
                    log.push(pad[3] as u32);
                });
            } else {
                queue.push(move |log: &mut Vec<u32>, _: &Invocation<'_>| log.push(i));
            }
        }
        assert!(queue.arena().growth_count() > 5);

        let mut log = Vec::new();
        queue.replay_all(&mut log);
        assert_eq!(log, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_replay_does_not_consume() {
        let mut queue: CommandQueue<u32> = CommandQueue::new();
        queue.push(|n: &mut u32, _: &Invocation<'_>| *n += 1);
        let mut n = 0;
        queue.replay_all(&mut n);
        queue.replay_all(&mut n);
        assert_eq!(n, 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_text_tail_is_not_a_record() {
        let mut queue: CommandQueue<Vec<String>> = CommandQueue::new();
        queue.push_with_text("first", |out: &mut Vec<String>, call: &Invocation<'_>| {
            out.push(call.text().to_owned());
        });
        queue.push(|out: &mut Vec<String>, _: &Invocation<'_>| out.push("plain".to_owned()));
        queue.push_with_text("third", |out: &mut Vec<String>, call: &Invocation<'_>| {
            out.push(call.text().to_owned());
        });

        assert_eq!(queue.len(), 3);
        let mut out = Vec::new();
        queue.replay_all(&mut out);
        assert_eq!(out, ["first", "plain", "third"]);
    }

    #[test]
    fn test_captured_ref_resolves_after_later_pushes() {
        let mut queue: CommandQueue<Vec<u8>> = CommandQueue::new();
        let anchor = queue.push(|_: &mut Vec<u8>, _: &Invocation<'_>| {});
        let shared = queue.copy_out_of_band(anchor, &[7, 8, 9]);

        for _ in 0..100 {
            queue.push(move |out: &mut Vec<u8>, call: &Invocation<'_>| {
                out.extend_from_slice(call.at(shared));
            });
        }

        assert_eq!(queue.at(shared), &[7, 8, 9]);
        let mut out = Vec::new();
        queue.replay_all(&mut out);
        assert_eq!(out.len(), 300);
        assert!(out.chunks(3).all(|c| c == [7, 8, 9]));
    }

    #[test]
    fn test_long_text_forces_growth_and_round_trips() {
        let mut queue: CommandQueue<()> = CommandQueue::new();
        let record = queue.push(|(): &mut (), _: &Invocation<'_>| {});
        let capacity_before = queue.capacity();

        let text = "x".repeat(capacity_before * 4 + 17);
        let r = queue.push_str(record, &text);
        assert!(queue.capacity() > capacity_before);

        let bytes = queue.at(r);
        assert_eq!(bytes.len(), text.len() + 1);
        assert_eq!(&bytes[..text.len()], text.as_bytes());
        assert_eq!(bytes[text.len()], 0);
        assert_eq!(queue.str_at(r), text);
    }

    #[test]
    fn test_pod_tail() {
        let mut queue: CommandQueue<f32> = CommandQueue::new();
        let record = queue.push(|sum: &mut f32, call: &Invocation<'_>| {
            let values: &[f32] = bytemuck::cast_slice(&call.out_of_band()[..12]);
            *sum += values.iter().sum::<f32>();
        });
        queue.copy_slice_out_of_band(record, &[1.0f32, 2.0, 3.5]);

        let mut sum = 0.0;
        queue.replay_all(&mut sum);
        assert!((sum - 6.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invocation_reports_its_record() {
        let mut queue: CommandQueue<Vec<usize>> = CommandQueue::new();
        let a = queue.push(|out: &mut Vec<usize>, call: &Invocation<'_>| {
            out.push(call.record().offset());
        });
        let b = queue.push(|out: &mut Vec<usize>, call: &Invocation<'_>| {
            out.push(call.record().offset());
        });
        let mut out = Vec::new();
        queue.replay_all(&mut out);
        assert_eq!(out, [a.offset(), b.offset()]);
        assert_eq!(queue.last(), Some(b));
    }

    #[test]
    fn test_zero_sized_command() {
        let mut queue: CommandQueue<u8> = CommandQueue::new();
        queue.push(|n: &mut u8, _: &Invocation<'_>| *n = 9);
        assert_eq!(queue.used(), payload_offset::<u8>());
        let mut n = 0;
        queue.replay_all(&mut n);
        assert_eq!(n, 9);
    }

    #[test]
    #[should_panic(expected = "most recently pushed command")]
    fn test_oob_for_earlier_record_panics() {
        let mut queue: CommandQueue<()> = CommandQueue::new();
        let first = queue.push(|(): &mut (), _: &Invocation<'_>| {});
        queue.push(|(): &mut (), _: &Invocation<'_>| {});
        queue.copy_out_of_band(first, b"late");
    }

    #[test]
    #[should_panic(expected = "most recently pushed command")]
    fn test_oob_for_cleared_record_panics() {
        let mut queue: CommandQueue<()> = CommandQueue::new();
        let old = queue.push(|(): &mut (), _: &Invocation<'_>| {});
        queue.clear();
        queue.push(|(): &mut (), _: &Invocation<'_>| {});
        queue.copy_out_of_band(old, b"stale");
    }
}
