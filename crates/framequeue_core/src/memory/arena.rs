//! # Byte Arena
//!
//! A growable, append-only block of bytes holding a dense sequence of
//! self-describing records, each optionally followed by out-of-band (OOB)
//! regions.
//!
//! ## Layout
//!
//! ```text
//!  first                                   last
//!    │                                       │
//!    ▼                                       ▼
//!  ┌──────┬─────────┬──────┬───────────────┬──────┬─────────┬─────┐
//!  │ size │ payload │ size │ payload │ OOB │ size │ payload │ ... │
//!  └──────┴─────────┴──────┴───────────────┴──────┴─────────┴─────┘
//!  ◄── record 0 ──►◄──────── record 1 ─────►◄─── record 2 ──►
//! ```
//!
//! Every record starts with a `u32` holding its total size, OOB tail
//! included, so traversal is `offset += size` repeated `len()` times.
//! Reserving OOB bytes extends the size of the *last* record; earlier size
//! headers are never touched again.
//!
//! ## Growth
//!
//! When a request does not fit, the buffer is reallocated to the next power of
//! two at least as large as the new total, and the used bytes are copied over
//! verbatim. Records must therefore be trivially relocatable. [`Ref`]s are
//! offsets, so they survive growth; slices returned by [`ByteArena::at`]
//! borrow the arena and cannot outlive the next push.

#![allow(unsafe_code)]

use std::fmt;
use std::mem::{self, MaybeUninit};
use std::slice;
use std::sync::atomic::{AtomicU32, Ordering};

use bytemuck::Pod;
use tracing::trace;

/// Backing storage unit. Keeps the base pointer aligned to [`ALIGN`].
type Word = u64;

/// Alignment, in bytes, of every record and every out-of-band region.
pub const ALIGN: usize = mem::size_of::<Word>();

/// Offsets are stored as `u32`.
const MAX_BYTES: usize = u32::MAX as usize;

/// Size of the header word every record starts with.
const SIZE_HEADER: usize = mem::size_of::<u32>();

/// Identity source for arenas. 0 is reserved for [`Ref::UNSET`].
static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(1);

/// Rounds `n` up to a multiple of [`ALIGN`], or `None` on overflow.
#[inline]
pub(crate) const fn checked_align_up(n: usize) -> Option<usize> {
    match n.checked_add(ALIGN - 1) {
        Some(v) => Some(v & !(ALIGN - 1)),
        None => None,
    }
}

/// An offset-based reference to an out-of-band region of a [`ByteArena`].
///
/// Valid from the moment it is returned until the next
/// [`clear()`](ByteArena::clear) of the arena that issued it. Using a `Ref`
/// after a clear, or with any other arena, panics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Ref {
    pos: u32,
    len: u32,
    epoch: u32,
    arena: u32,
}

impl Ref {
    /// The distinguished "not set" reference.
    pub const UNSET: Self = Self {
        pos: u32::MAX,
        len: 0,
        epoch: 0,
        arena: 0,
    };

    /// Returns true if this reference was produced by an arena.
    #[inline]
    #[must_use]
    pub const fn is_set(self) -> bool {
        self.pos != u32::MAX
    }

    /// Byte offset of the region inside its arena.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> usize {
        self.pos as usize
    }

    /// Number of bytes requested for the region (before alignment padding).
    #[inline]
    #[must_use]
    pub const fn len(self) -> usize {
        self.len as usize
    }

    /// Returns true if the region holds no bytes.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.len == 0
    }
}

impl Default for Ref {
    fn default() -> Self {
        Self::UNSET
    }
}

/// Growable byte buffer of packed, self-describing records.
///
/// This is the storage engine under [`CommandQueue`](crate::CommandQueue).
/// It knows record boundaries but not what the records contain.
///
/// # Thread Safety
///
/// Not internally synchronized. One thread writes, or many read.
pub struct ByteArena {
    /// Backing storage. Only the first `used` bytes are meaningful.
    words: Box<[MaybeUninit<Word>]>,
    /// Bytes handed out so far.
    used: usize,
    /// Number of records.
    count: usize,
    /// Offset of the first record, if any.
    first: Option<usize>,
    /// Offset of the most recently pushed record, if any.
    last: Option<usize>,
    /// Bumped on every clear; stamps issued `Ref`s.
    epoch: u32,
    /// Process-unique identity; stamps issued `Ref`s.
    id: u32,
    /// Number of reallocations so far.
    growths: u32,
}

impl ByteArena {
    /// Creates an empty arena with no backing storage.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an arena with at least `capacity` bytes pre-allocated.
    ///
    /// A capacity of zero is allowed; the first push allocates.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds the 4 GiB offset range.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let bytes = checked_align_up(capacity)
            .filter(|&n| n <= MAX_BYTES)
            .unwrap_or_else(|| panic!("arena capacity {capacity} exceeds {MAX_BYTES} bytes"));
        Self {
            words: vec![MaybeUninit::<Word>::uninit(); bytes / ALIGN].into_boxed_slice(),
            used: 0,
            count: 0,
            first: None,
            last: None,
            epoch: 0,
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            growths: 0,
        }
    }

    /// Returns the total capacity in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.words.len() * ALIGN
    }

    /// Returns the used space in bytes.
    #[inline]
    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Returns the remaining free space in bytes.
    #[inline]
    #[must_use]
    pub fn free_capacity(&self) -> usize {
        self.capacity() - self.used
    }

    /// Returns the number of records.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns true if no record has been pushed since the last clear.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns how many times the buffer has been reallocated.
    #[inline]
    #[must_use]
    pub fn growth_count(&self) -> u32 {
        self.growths
    }

    /// Offset of the first record, if any.
    #[inline]
    #[must_use]
    pub fn first_record(&self) -> Option<usize> {
        self.first
    }

    /// Offset of the most recently pushed record, if any.
    #[inline]
    #[must_use]
    pub fn last_record(&self) -> Option<usize> {
        self.last
    }

    /// Current clear generation. `Ref`s from older generations are rejected.
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Appends a record of `size` bytes and returns its offset.
    ///
    /// The size header is written; the rest of the record is left for the
    /// caller to fill through [`record_ptr_mut`](Self::record_ptr_mut).
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a non-zero multiple of [`ALIGN`], or if the
    /// arena would exceed 4 GiB.
    pub fn alloc_record(&mut self, size: usize) -> usize {
        assert!(
            size >= SIZE_HEADER && size % ALIGN == 0,
            "record size {size} must be a non-zero multiple of {ALIGN}"
        );
        self.ensure_free(size);

        let offset = self.used;
        // SAFETY: ensure_free made [offset, offset + size) part of the buffer,
        // and offset is a multiple of ALIGN on an ALIGN-aligned base.
        unsafe { self.write_size(offset, size) };

        self.used += size;
        self.count += 1;
        if self.first.is_none() {
            self.first = Some(offset);
        }
        self.last = Some(offset);
        offset
    }

    /// Reserves `byte_count` zeroed bytes right after the last record and
    /// folds them into that record's size.
    ///
    /// The region is rounded up to [`ALIGN`]; the returned [`Ref`] covers
    /// exactly `byte_count` bytes.
    ///
    /// # Panics
    ///
    /// Panics if no record has been pushed since the last clear.
    pub fn reserve_out_of_band(&mut self, byte_count: usize) -> Ref {
        let Some(last) = self.last else {
            panic!("out-of-band data must follow a record, but the arena is empty");
        };
        let aligned = checked_align_up(byte_count)
            .unwrap_or_else(|| panic!("out-of-band request of {byte_count} bytes overflows"));
        self.ensure_free(aligned);

        let pos = self.used;
        // SAFETY: [pos, pos + aligned) lies inside the buffer after ensure_free.
        unsafe { self.base_mut().add(pos).write_bytes(0, aligned) };
        self.used += aligned;

        let size = self.record_size(last) + aligned;
        // SAFETY: `last` is the offset of a live record inside the buffer.
        unsafe { self.write_size(last, size) };

        // Both fit in u32: used <= MAX_BYTES after ensure_free.
        Ref {
            pos: pos as u32,
            len: byte_count as u32,
            epoch: self.epoch,
            arena: self.id,
        }
    }

    /// Reserves an out-of-band region and copies `bytes` into it.
    pub fn copy_out_of_band(&mut self, bytes: &[u8]) -> Ref {
        let r = self.reserve_out_of_band(bytes.len());
        self.at_mut(r).copy_from_slice(bytes);
        r
    }

    /// Copies a slice of plain-old-data values into an out-of-band region.
    pub fn copy_slice_out_of_band<T: Pod>(&mut self, items: &[T]) -> Ref {
        const {
            assert!(
                mem::align_of::<T>() <= ALIGN,
                "out-of-band values must not need more than ALIGN alignment"
            );
        }
        self.copy_out_of_band(bytemuck::cast_slice(items))
    }

    /// Copies `text` plus a NUL terminator into an out-of-band region.
    ///
    /// The returned [`Ref`] covers the terminator as well.
    pub fn copy_str_out_of_band(&mut self, text: &str) -> Ref {
        let r = self.reserve_out_of_band(text.len() + 1);
        let bytes = self.at_mut(r);
        bytes[..text.len()].copy_from_slice(text.as_bytes());
        bytes[text.len()] = 0;
        r
    }

    /// Returns the bytes of an out-of-band region.
    ///
    /// # Panics
    ///
    /// Panics if `r` is unset, was issued by another arena or before the
    /// last clear, or lies outside the used part of the arena.
    #[must_use]
    pub fn at(&self, r: Ref) -> &[u8] {
        let start = self.check(r);
        // SAFETY: check() proved [start, start + len) lies below `used`, and
        // the region was zero-filled when it was reserved.
        unsafe { slice::from_raw_parts(self.base().add(start), r.len()) }
    }

    /// Returns the bytes of an out-of-band region for writing.
    ///
    /// # Panics
    ///
    /// Same conditions as [`at`](Self::at).
    pub fn at_mut(&mut self, r: Ref) -> &mut [u8] {
        let start = self.check(r);
        // SAFETY: as in `at`, and `&mut self` gives exclusive access.
        unsafe { slice::from_raw_parts_mut(self.base_mut().add(start), r.len()) }
    }

    /// Reinterprets an out-of-band region as a single `T`.
    ///
    /// # Panics
    ///
    /// Panics if the region size is not exactly `size_of::<T>()`.
    #[must_use]
    pub fn at_as<T: Pod>(&self, r: Ref) -> &T {
        bytemuck::from_bytes(self.at(r))
    }

    /// Reinterprets an out-of-band region as a slice of `T`.
    #[must_use]
    pub fn slice_at<T: Pod>(&self, r: Ref) -> &[T] {
        bytemuck::cast_slice(self.at(r))
    }

    /// Reads back text stored by [`copy_str_out_of_band`](Self::copy_str_out_of_band),
    /// without its terminator.
    ///
    /// # Panics
    ///
    /// Panics if the region does not hold UTF-8.
    #[must_use]
    pub fn str_at(&self, r: Ref) -> &str {
        let bytes = self.at(r);
        let bytes = bytes.strip_suffix(&[0]).unwrap_or(bytes);
        std::str::from_utf8(bytes).expect("out-of-band text must be UTF-8")
    }

    /// Iterates over record offsets in push order.
    #[must_use]
    pub fn records(&self) -> RecordOffsets<'_> {
        RecordOffsets {
            arena: self,
            next: self.first.unwrap_or(0),
            remaining: self.count,
        }
    }

    /// Resets the arena, invalidating every record and every [`Ref`].
    ///
    /// This is a **zero-cost** operation: no memory is freed and no record is
    /// dropped. Capacity is kept.
    #[inline]
    pub fn clear(&mut self) {
        self.used = 0;
        self.count = 0;
        self.first = None;
        self.last = None;
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Total size in bytes of the record at `offset`, OOB tail included.
    #[inline]
    pub(crate) fn record_size(&self, offset: usize) -> usize {
        debug_assert!(offset + SIZE_HEADER <= self.used);
        // SAFETY: offset is a record start below `used`, aligned to ALIGN,
        // and alloc_record wrote a u32 there.
        unsafe { self.base().add(offset).cast::<u32>().read() as usize }
    }

    /// Pointer to the record at `offset`, for typed reads by the queue layer.
    #[inline]
    pub(crate) fn record_ptr(&self, offset: usize) -> *const u8 {
        assert!(offset < self.used, "record offset {offset} out of range");
        // SAFETY: offset is inside the allocation.
        unsafe { self.base().add(offset) }
    }

    /// Pointer to the record at `offset`, for typed writes by the queue layer.
    #[inline]
    pub(crate) fn record_ptr_mut(&mut self, offset: usize) -> *mut u8 {
        assert!(offset < self.used, "record offset {offset} out of range");
        // SAFETY: offset is inside the allocation.
        unsafe { self.base_mut().add(offset) }
    }

    /// Bytes in `[start, end)`, which must lie inside out-of-band regions.
    #[inline]
    pub(crate) fn oob_bytes(&self, start: usize, end: usize) -> &[u8] {
        assert!(start <= end && end <= self.used, "tail {start}..{end} out of range");
        // SAFETY: in range, and out-of-band regions are zero-filled on reserve.
        unsafe { slice::from_raw_parts(self.base().add(start), end - start) }
    }

    fn check(&self, r: Ref) -> usize {
        assert!(r.is_set(), "dereferenced an unset Ref");
        assert_eq!(r.arena, self.id, "dereferenced a Ref issued by another arena");
        assert_eq!(
            r.epoch, self.epoch,
            "dereferenced a Ref issued before the last clear()"
        );
        let start = r.offset();
        let end = start + r.len();
        assert!(
            end <= self.used,
            "Ref {start}..{end} out of range (used {})",
            self.used
        );
        start
    }

    fn ensure_free(&mut self, additional: usize) {
        let required = self
            .used
            .checked_add(additional)
            .filter(|&n| n <= MAX_BYTES)
            .unwrap_or_else(|| {
                panic!(
                    "arena limit exceeded: {} + {additional} bytes > {MAX_BYTES}",
                    self.used
                )
            });
        if required > self.capacity() {
            self.grow(required);
        }
    }

    /// Reallocates to the next power of two >= `required` and copies the used
    /// bytes verbatim. The old block is released.
    fn grow(&mut self, required: usize) {
        let capacity = required.next_power_of_two().max(ALIGN);
        let mut words = vec![MaybeUninit::<Word>::uninit(); capacity / ALIGN].into_boxed_slice();
        let used_words = self.used / ALIGN;
        words[..used_words].copy_from_slice(&self.words[..used_words]);

        trace!(
            from = self.capacity(),
            to = capacity,
            used = self.used,
            "byte arena grew"
        );
        self.words = words;
        self.growths += 1;
    }

    /// # Safety
    ///
    /// `offset` must be an ALIGN-aligned offset with at least 4 bytes of
    /// buffer behind it.
    #[inline]
    unsafe fn write_size(&mut self, offset: usize, size: usize) {
        // Bounded by MAX_BYTES in ensure_free.
        self.base_mut().add(offset).cast::<u32>().write(size as u32);
    }

    #[inline]
    fn base(&self) -> *const u8 {
        self.words.as_ptr().cast()
    }

    #[inline]
    fn base_mut(&mut self) -> *mut u8 {
        self.words.as_mut_ptr().cast()
    }
}

impl Default for ByteArena {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ByteArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteArena")
            .field("capacity", &self.capacity())
            .field("used", &self.used)
            .field("records", &self.count)
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// Iterator over record offsets, produced by [`ByteArena::records`].
///
/// Walks the size headers; out-of-band tails are skipped as part of the
/// record they follow.
pub struct RecordOffsets<'a> {
    arena: &'a ByteArena,
    next: usize,
    remaining: usize,
}

impl Iterator for RecordOffsets<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let offset = self.next;
        self.next += self.arena.record_size(offset);
        self.remaining -= 1;
        Some(offset)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for RecordOffsets<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_arena() {
        let arena = ByteArena::new();
        assert_eq!(arena.capacity(), 0);
        assert_eq!(arena.used(), 0);
        assert!(arena.is_empty());
        assert_eq!(arena.records().count(), 0);
    }

    #[test]
    fn test_growth_is_power_of_two() {
        let mut arena = ByteArena::new();
        arena.alloc_record(24);
        assert_eq!(arena.capacity(), 32);
        assert_eq!(arena.growth_count(), 1);

        arena.alloc_record(16);
        assert_eq!(arena.capacity(), 64);
        assert_eq!(arena.used(), 40);

        // Fits without growing.
        arena.alloc_record(24);
        assert_eq!(arena.capacity(), 64);
        assert_eq!(arena.growth_count(), 2);
    }

    #[test]
    fn test_capacity_never_shrinks() {
        let mut arena = ByteArena::with_capacity(100);
        assert_eq!(arena.capacity(), 104);
        arena.alloc_record(200);
        let grown = arena.capacity();
        assert_eq!(grown, 256);
        arena.clear();
        assert_eq!(arena.capacity(), grown);
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_records_are_packed_and_walked_in_order() {
        let mut arena = ByteArena::new();
        let a = arena.alloc_record(8);
        let b = arena.alloc_record(32);
        let c = arena.alloc_record(16);
        assert_eq!((a, b, c), (0, 8, 40));
        assert_eq!(arena.first_record(), Some(0));
        assert_eq!(arena.last_record(), Some(40));
        assert_eq!(arena.records().collect::<Vec<_>>(), vec![0, 8, 40]);
    }

    #[test]
    fn test_oob_extends_last_record_only() {
        let mut arena = ByteArena::new();
        let a = arena.alloc_record(8);
        let b = arena.alloc_record(8);
        let r = arena.copy_out_of_band(b"hello");

        assert_eq!(r.offset(), 16);
        assert_eq!(r.len(), 5);
        assert_eq!(arena.record_size(a), 8);
        assert_eq!(arena.record_size(b), 16);

        let c = arena.alloc_record(8);
        assert_eq!(c, 24);
        assert_eq!(arena.records().collect::<Vec<_>>(), vec![0, 8, 24]);
        assert_eq!(arena.at(r), b"hello");
    }

    #[test]
    fn test_oob_region_is_zeroed() {
        let mut arena = ByteArena::new();
        arena.alloc_record(8);
        let r = arena.reserve_out_of_band(13);
        assert_eq!(arena.at(r), &[0u8; 13]);
        assert_eq!(arena.used(), 24);
    }

    #[test]
    fn test_ref_survives_growth() {
        let mut arena = ByteArena::new();
        arena.alloc_record(8);
        let r = arena.copy_out_of_band(b"stable");
        let before = arena.capacity();

        for _ in 0..64 {
            arena.alloc_record(64);
        }

        assert!(arena.capacity() > before);
        assert_eq!(arena.at(r), b"stable");
    }

    #[test]
    fn test_str_round_trip_keeps_terminator() {
        let mut arena = ByteArena::new();
        arena.alloc_record(8);
        let r = arena.copy_str_out_of_band("FPS: 60");
        assert_eq!(r.len(), 8);
        assert_eq!(arena.at(r), b"FPS: 60\0");
        assert_eq!(arena.str_at(r), "FPS: 60");
    }

    #[test]
    fn test_pod_slice_round_trip() {
        let mut arena = ByteArena::new();
        arena.alloc_record(8);
        let points = [[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let r = arena.copy_slice_out_of_band(&points);
        assert_eq!(arena.slice_at::<[f32; 3]>(r), &points);

        arena.alloc_record(8);
        let v = arena.copy_slice_out_of_band(&[42u64]);
        assert_eq!(*arena.at_as::<u64>(v), 42);
    }

    #[test]
    fn test_clear_resets_counters() {
        let mut arena = ByteArena::new();
        arena.alloc_record(8);
        arena.copy_out_of_band(b"x");
        let epoch = arena.epoch();
        arena.clear();

        assert_eq!(arena.used(), 0);
        assert_eq!(arena.len(), 0);
        assert_eq!(arena.first_record(), None);
        assert_eq!(arena.last_record(), None);
        assert_ne!(arena.epoch(), epoch);
    }

    #[test]
    #[should_panic(expected = "issued before the last clear")]
    fn test_stale_ref_panics() {
        let mut arena = ByteArena::new();
        arena.alloc_record(8);
        let r = arena.copy_out_of_band(b"old");
        arena.clear();
        arena.alloc_record(8);
        arena.copy_out_of_band(b"new");
        let _ = arena.at(r);
    }

    #[test]
    #[should_panic(expected = "issued by another arena")]
    fn test_foreign_ref_panics() {
        let mut a = ByteArena::new();
        a.alloc_record(8);
        let r = a.copy_out_of_band(b"TEXTTEXT");

        let mut b = ByteArena::new();
        b.alloc_record(16);
        b.alloc_record(16);
        let _ = b.at(r);
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_capacity_beyond_offset_range_panics() {
        let _ = ByteArena::with_capacity(usize::MAX);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    #[should_panic(expected = "exceeds")]
    fn test_capacity_just_past_u32_panics() {
        let _ = ByteArena::with_capacity(MAX_BYTES + 1);
    }

    #[test]
    #[should_panic(expected = "unset Ref")]
    fn test_unset_ref_panics() {
        let arena = ByteArena::new();
        let _ = arena.at(Ref::UNSET);
    }

    #[test]
    #[should_panic(expected = "must follow a record")]
    fn test_oob_without_record_panics() {
        let mut arena = ByteArena::new();
        let _ = arena.reserve_out_of_band(4);
    }

    #[test]
    #[should_panic(expected = "multiple of")]
    fn test_unaligned_record_size_panics() {
        let mut arena = ByteArena::new();
        arena.alloc_record(12);
    }

    #[test]
    fn test_default_ref_is_unset() {
        assert!(!Ref::default().is_set());
        assert!(Ref::UNSET.is_empty());
    }
}
