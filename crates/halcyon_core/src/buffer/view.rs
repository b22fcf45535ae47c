//! Typed record views over raw buffers.
//!
//! A [`Layout`] describes a fixed-size record exactly as the shader reads
//! it. [`StructView`] overlays that layout onto a [`RawBuffer`] and hands out
//! a record accessor bound to one index for the duration of a closure, so
//! the accessor can never outlive the positioning it was created for.

use std::fmt;
use std::marker::PhantomData;

use bytemuck::Pod;

use super::RawBuffer;
use crate::error::{CoreError, CoreResult};

/// Fixed-size record layout shared with GPU code.
pub trait Layout {
    /// Human-readable name used in error messages.
    const NAME: &'static str;
    /// Stride of one record in bytes. No implicit padding is added.
    const RECORD_SIZE: usize;
}

/// A primitive field at a fixed byte offset inside a record.
pub struct Field<T> {
    offset: usize,
    _ty: PhantomData<fn() -> T>,
}

impl<T: Pod> Field<T> {
    /// Declares a field at `offset` bytes from the start of the record.
    #[must_use]
    pub const fn at(offset: usize) -> Self {
        Self {
            offset,
            _ty: PhantomData,
        }
    }

    /// Byte offset within the record.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// First byte past the field.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + std::mem::size_of::<T>()
    }
}

impl<T> Clone for Field<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Field<T> {}

impl<T> fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("offset", &self.offset)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// Read-only accessor for one record.
pub struct RecordRef<'a, L: Layout> {
    bytes: &'a [u8],
    index: usize,
    _layout: PhantomData<fn() -> L>,
}

impl<L: Layout> RecordRef<'_, L> {
    /// Index of the record this accessor is bound to.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Reads a field.
    #[must_use]
    pub fn get<T: Pod>(&self, field: Field<T>) -> T {
        debug_assert!(field.end() <= L::RECORD_SIZE, "field outside `{}`", L::NAME);
        bytemuck::pod_read_unaligned(&self.bytes[field.offset()..field.end()])
    }

    /// Raw record bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }
}

/// Read-write accessor for one record.
pub struct RecordMut<'a, L: Layout> {
    bytes: &'a mut [u8],
    index: usize,
    _layout: PhantomData<fn() -> L>,
}

impl<L: Layout> RecordMut<'_, L> {
    /// Index of the record this accessor is bound to.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Reads a field.
    #[must_use]
    pub fn get<T: Pod>(&self, field: Field<T>) -> T {
        debug_assert!(field.end() <= L::RECORD_SIZE, "field outside `{}`", L::NAME);
        bytemuck::pod_read_unaligned(&self.bytes[field.offset()..field.end()])
    }

    /// Writes a field.
    pub fn set<T: Pod>(&mut self, field: Field<T>, value: T) {
        debug_assert!(field.end() <= L::RECORD_SIZE, "field outside `{}`", L::NAME);
        self.bytes[field.offset()..field.end()].copy_from_slice(bytemuck::bytes_of(&value));
    }

    /// Overwrites the whole record from a `#[repr(C)]` mirror type.
    ///
    /// # Panics
    ///
    /// Panics if `size_of::<T>()` differs from the layout's record size.
    pub fn write_record<T: Pod>(&mut self, record: &T) {
        assert_eq!(
            std::mem::size_of::<T>(),
            L::RECORD_SIZE,
            "record type does not match layout `{}`",
            L::NAME
        );
        self.bytes.copy_from_slice(bytemuck::bytes_of(record));
    }

    /// Zeroes the record.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Raw record bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }
}

/// A raw buffer interpreted as an array of `L` records.
pub struct StructView<L: Layout> {
    buffer: RawBuffer,
    _layout: PhantomData<fn() -> L>,
}

impl<L: Layout> StructView<L> {
    /// Allocates room for `records` records.
    ///
    /// # Errors
    ///
    /// [`CoreError::AllocationFailed`] if the bytes cannot be allocated.
    pub fn with_records(records: usize) -> CoreResult<Self> {
        let bytes = records
            .checked_mul(L::RECORD_SIZE)
            .ok_or(CoreError::AllocationFailed { requested: usize::MAX })?;
        Ok(Self::from_buffer(RawBuffer::with_capacity(bytes)?))
    }

    /// Wraps an existing buffer.
    #[must_use]
    pub fn from_buffer(buffer: RawBuffer) -> Self {
        Self {
            buffer,
            _layout: PhantomData,
        }
    }

    /// Number of whole records the buffer can hold.
    #[must_use]
    pub fn record_capacity(&self) -> usize {
        self.buffer.capacity_in_bytes() / L::RECORD_SIZE
    }

    /// Number of records covered by the logical size.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.buffer.size_in_bytes().div_ceil(L::RECORD_SIZE)
    }

    /// Sets the logical size to `records` whole records.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapacityExceeded`] if that is past the capacity.
    pub fn set_record_count(&mut self, records: usize) -> CoreResult<()> {
        self.buffer.set_size(records.saturating_mul(L::RECORD_SIZE))
    }

    /// Backing buffer.
    #[must_use]
    pub fn buffer(&self) -> &RawBuffer {
        &self.buffer
    }

    /// Mutable backing buffer.
    pub fn buffer_mut(&mut self) -> &mut RawBuffer {
        &mut self.buffer
    }

    /// Unwraps the backing buffer.
    #[must_use]
    pub fn into_buffer(self) -> RawBuffer {
        self.buffer
    }

    /// Runs `f` with a read-only accessor bound to record `index`.
    ///
    /// # Errors
    ///
    /// [`CoreError::IndexOutOfBounds`] if the record does not fit in the
    /// current capacity.
    pub fn for_index<R>(
        &self,
        index: usize,
        f: impl FnOnce(&RecordRef<'_, L>) -> R,
    ) -> CoreResult<R> {
        let range = self.record_range(index)?;
        let record = RecordRef {
            bytes: &self.buffer.as_bytes()[range],
            index,
            _layout: PhantomData,
        };
        Ok(f(&record))
    }

    /// Runs `f` with a read-write accessor bound to record `index`.
    ///
    /// The logical size grows to cover the record.
    ///
    /// # Errors
    ///
    /// [`CoreError::IndexOutOfBounds`] if the record does not fit in the
    /// current capacity. Call [`enlarge`](Self::enlarge) first.
    pub fn for_index_mut<R>(
        &mut self,
        index: usize,
        f: impl FnOnce(&mut RecordMut<'_, L>) -> R,
    ) -> CoreResult<R> {
        let range = self.record_range(index)?;
        let end = range.end;
        let mut record = RecordMut {
            bytes: &mut self.buffer.as_bytes_mut()[range],
            index,
            _layout: PhantomData,
        };
        let result = f(&mut record);
        if end > self.buffer.size_in_bytes() {
            self.buffer.set_size(end)?;
        }
        Ok(result)
    }

    /// Writes a whole `#[repr(C)]` record at `index`.
    ///
    /// # Errors
    ///
    /// [`CoreError::IndexOutOfBounds`] if the record does not fit.
    ///
    /// # Panics
    ///
    /// Panics if `size_of::<T>()` differs from the layout's record size.
    pub fn put_record<T: Pod>(&mut self, index: usize, record: &T) -> CoreResult<()> {
        self.for_index_mut(index, |r| r.write_record(record))
    }

    /// Grows the view to hold at least `records` records.
    ///
    /// Returns `true` when the backing storage was replaced.
    ///
    /// # Errors
    ///
    /// [`CoreError::AllocationFailed`] if the new storage cannot be allocated;
    /// the view keeps its old storage.
    pub fn enlarge(&mut self, records: usize, copy_content: bool) -> CoreResult<bool> {
        let bytes = records
            .checked_mul(L::RECORD_SIZE)
            .ok_or(CoreError::AllocationFailed { requested: usize::MAX })?;
        self.buffer.ensure_capacity(bytes, copy_content)
    }

    fn record_range(&self, index: usize) -> CoreResult<std::ops::Range<usize>> {
        let out_of_bounds = || CoreError::IndexOutOfBounds {
            index,
            capacity: self.record_capacity(),
            layout: L::NAME,
        };
        let start = index.checked_mul(L::RECORD_SIZE).ok_or_else(out_of_bounds)?;
        let end = start.checked_add(L::RECORD_SIZE).ok_or_else(out_of_bounds)?;
        if end > self.buffer.capacity_in_bytes() {
            return Err(out_of_bounds());
        }
        Ok(start..end)
    }
}

impl<L: Layout> fmt::Debug for StructView<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructView")
            .field("layout", &L::NAME)
            .field("record_capacity", &self.record_capacity())
            .field("record_count", &self.record_count())
            .finish()
    }
}
