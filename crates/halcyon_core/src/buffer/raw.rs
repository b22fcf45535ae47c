//! Growable byte region with a sequential cursor.
//!
//! A `RawBuffer` never resizes in place. Growth allocates a fresh region and
//! migrates the old bytes into it, which is exactly what a GPU allocation has
//! to do, so the CPU mirror and the GPU storage follow the same life cycle.

use bytemuck::Pod;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Owned, fixed-capacity byte region.
///
/// ```text
/// 0                 position        size             capacity
/// ├─────────────────────┼───────────────┼─────────────────┤
/// │    consumed/written │   logical     │   reserved      │
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawBuffer {
    /// Backing bytes. Length is the capacity.
    bytes: Box<[u8]>,
    /// High-water mark of written bytes.
    size: usize,
    /// Sequential read/write cursor.
    position: usize,
}

impl RawBuffer {
    /// Allocates a zeroed buffer of exactly `capacity` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AllocationFailed`] when the host cannot provide
    /// the memory.
    pub fn with_capacity(capacity: usize) -> CoreResult<Self> {
        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(capacity)
            .map_err(|_| CoreError::AllocationFailed { requested: capacity })?;
        bytes.resize(capacity, 0);
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
            size: 0,
            position: 0,
        })
    }

    /// Creates a buffer holding a copy of `data`; capacity and size equal its length.
    #[must_use]
    pub fn from_bytes(data: &[u8]) -> Self {
        Self {
            bytes: data.to_vec().into_boxed_slice(),
            size: data.len(),
            position: 0,
        }
    }

    /// Total bytes this buffer can hold.
    #[inline]
    #[must_use]
    pub fn capacity_in_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Logical size: the furthest byte ever written.
    #[inline]
    #[must_use]
    pub const fn size_in_bytes(&self) -> usize {
        self.size
    }

    /// Current cursor position.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Moves the cursor back to the start.
    #[inline]
    pub fn rewind(&mut self) {
        self.position = 0;
    }

    /// Moves the cursor to `position`.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapacityExceeded`] if `position` is past the capacity.
    pub fn set_position(&mut self, position: usize) -> CoreResult<()> {
        if position > self.capacity_in_bytes() {
            return Err(CoreError::CapacityExceeded {
                required: position,
                available: self.capacity_in_bytes(),
            });
        }
        self.position = position;
        Ok(())
    }

    /// Resets logical size and cursor. Bytes are left as they are.
    pub fn clear(&mut self) {
        self.size = 0;
        self.position = 0;
    }

    /// Sets the logical size directly.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapacityExceeded`] if `size` is past the capacity.
    pub fn set_size(&mut self, size: usize) -> CoreResult<()> {
        if size > self.capacity_in_bytes() {
            return Err(CoreError::CapacityExceeded {
                required: size,
                available: self.capacity_in_bytes(),
            });
        }
        self.size = size;
        Ok(())
    }

    /// Whole backing region, including bytes past the logical size.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable whole backing region. Does not move the logical size.
    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Bytes up to the logical size.
    #[inline]
    #[must_use]
    pub fn logical_bytes(&self) -> &[u8] {
        &self.bytes[..self.size]
    }

    /// Start address of the backing region. Identity changes only on growth.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.bytes.as_ptr()
    }

    /// Copies the entire capacity of `self` into `target` at `target_offset`.
    ///
    /// Both cursors are rewound before and after the copy. On failure the
    /// target is left untouched. Copying a buffer onto itself cannot be
    /// expressed:
    ///
    /// ```compile_fail
    /// use halcyon_core::RawBuffer;
    /// let mut buffer = RawBuffer::with_capacity(16).unwrap();
    /// buffer.copy_to(&mut buffer, 0).unwrap();
    /// ```
    ///
    /// # Errors
    ///
    /// [`CoreError::CapacityExceeded`] when
    /// `target.capacity - target_offset < self.capacity`.
    pub fn copy_to(&mut self, target: &mut RawBuffer, target_offset: usize) -> CoreResult<()> {
        let available = target.capacity_in_bytes().saturating_sub(target_offset);
        if target_offset > target.capacity_in_bytes() || available < self.capacity_in_bytes() {
            return Err(CoreError::CapacityExceeded {
                required: self.capacity_in_bytes(),
                available,
            });
        }

        self.rewind();
        target.rewind();

        let end = target_offset + self.capacity_in_bytes();
        target.bytes[target_offset..end].copy_from_slice(&self.bytes);
        target.size = target.size.max(target_offset + self.size);

        self.rewind();
        target.rewind();
        Ok(())
    }

    /// Returns a buffer of at least `n` bytes.
    ///
    /// If the capacity already suffices `self` comes back unchanged (same
    /// storage). Otherwise a new region of exactly `n` bytes is allocated and,
    /// when `copy_content` is set, the old bytes are migrated into it.
    ///
    /// # Errors
    ///
    /// [`CoreError::AllocationFailed`] if the new region cannot be allocated.
    /// The old buffer is consumed either way.
    pub fn enlarge_to_bytes(mut self, n: usize, copy_content: bool) -> CoreResult<Self> {
        if self.capacity_in_bytes() >= n {
            return Ok(self);
        }
        self.migrate(n, copy_content)
    }

    /// In-place flavour of [`enlarge_to_bytes`](Self::enlarge_to_bytes).
    ///
    /// Returns `true` when the storage was replaced. On failure `self` keeps
    /// its old storage.
    ///
    /// # Errors
    ///
    /// [`CoreError::AllocationFailed`] if the new region cannot be allocated.
    pub fn ensure_capacity(&mut self, n: usize, copy_content: bool) -> CoreResult<bool> {
        if self.capacity_in_bytes() >= n {
            return Ok(false);
        }
        *self = self.migrate(n, copy_content)?;
        Ok(true)
    }

    fn migrate(&mut self, n: usize, copy_content: bool) -> CoreResult<Self> {
        let mut grown = RawBuffer::with_capacity(n)?;
        if copy_content {
            self.copy_to(&mut grown, 0)?;
        }
        debug!(
            from = self.capacity_in_bytes(),
            to = n,
            copy_content,
            "raw buffer enlarged"
        );
        Ok(grown)
    }

    /// Writes `data` at the cursor and advances it.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapacityExceeded`] if the bytes do not fit.
    pub fn write_bytes(&mut self, data: &[u8]) -> CoreResult<()> {
        self.write_at(self.position, data)?;
        self.position += data.len();
        Ok(())
    }

    /// Fills `out` from the cursor and advances it.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapacityExceeded`] if fewer than `out.len()` bytes remain.
    pub fn read_bytes(&mut self, out: &mut [u8]) -> CoreResult<()> {
        let end = self.checked_end(self.position, out.len())?;
        out.copy_from_slice(&self.bytes[self.position..end]);
        self.position = end;
        Ok(())
    }

    /// Writes `data` at an absolute offset without moving the cursor.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapacityExceeded`] if the bytes do not fit.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> CoreResult<()> {
        let end = self.checked_end(offset, data.len())?;
        self.bytes[offset..end].copy_from_slice(data);
        self.size = self.size.max(end);
        Ok(())
    }

    /// Borrows `len` bytes at an absolute offset.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapacityExceeded`] if the range is past the capacity.
    pub fn read_at(&self, offset: usize, len: usize) -> CoreResult<&[u8]> {
        let end = self.checked_end(offset, len)?;
        Ok(&self.bytes[offset..end])
    }

    /// Writes a plain-old-data value at the cursor.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapacityExceeded`] if the value does not fit.
    pub fn put<T: Pod>(&mut self, value: T) -> CoreResult<()> {
        self.write_bytes(bytemuck::bytes_of(&value))
    }

    /// Reads a plain-old-data value at the cursor.
    ///
    /// # Errors
    ///
    /// [`CoreError::CapacityExceeded`] if fewer than `size_of::<T>()` bytes remain.
    pub fn get<T: Pod>(&mut self) -> CoreResult<T> {
        let end = self.checked_end(self.position, std::mem::size_of::<T>())?;
        let value = bytemuck::pod_read_unaligned(&self.bytes[self.position..end]);
        self.position = end;
        Ok(value)
    }

    fn checked_end(&self, offset: usize, len: usize) -> CoreResult<usize> {
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > self.capacity_in_bytes() {
            return Err(CoreError::CapacityExceeded {
                required: end,
                available: self.capacity_in_bytes(),
            });
        }
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(capacity: usize, size: usize) -> RawBuffer {
        let mut buffer = RawBuffer::with_capacity(capacity).unwrap();
        for i in 0..size {
            buffer.put(u8::try_from(i % 251).unwrap()).unwrap();
        }
        buffer
    }

    #[test]
    fn test_enlarge_preserves_content() {
        for (capacity, size, n) in [(8, 8, 9), (16, 5, 64), (1, 0, 2), (100, 100, 1000)] {
            let buffer = filled(capacity, size);
            let before = buffer.logical_bytes().to_vec();

            let grown = buffer.enlarge_to_bytes(n, true).unwrap();

            assert_eq!(grown.capacity_in_bytes(), n);
            assert_eq!(&grown.as_bytes()[..size], before.as_slice());
            assert_eq!(grown.size_in_bytes(), size);
        }
    }

    #[test]
    fn test_enlarge_without_copy_is_zeroed() {
        let buffer = filled(4, 4);
        let grown = buffer.enlarge_to_bytes(8, false).unwrap();
        assert_eq!(grown.as_bytes(), &[0u8; 8]);
        assert_eq!(grown.size_in_bytes(), 0);
    }

    #[test]
    fn test_enlarge_is_noop_when_sufficient() {
        let snapshot = filled(32, 10);

        for n in [0, 1, 10, 32] {
            for copy_content in [true, false] {
                let buffer = snapshot.clone();
                let ptr = buffer.as_ptr();
                let result = buffer.enlarge_to_bytes(n, copy_content).unwrap();
                assert_eq!(result.as_ptr(), ptr);
                assert_eq!(result, snapshot);
            }
        }
    }

    #[test]
    fn test_copy_rejects_undersized_target() {
        let mut source = filled(16, 16);
        let mut target = RawBuffer::from_bytes(&[7u8; 20]);
        let before = target.clone();

        // 20 - 5 < 16
        let err = source.copy_to(&mut target, 5).unwrap_err();
        assert_eq!(
            err,
            CoreError::CapacityExceeded { required: 16, available: 15 }
        );
        assert_eq!(target, before);

        // offset past the end
        assert!(source.copy_to(&mut target, 21).is_err());
        assert_eq!(target, before);
    }

    #[test]
    fn test_copy_rewinds_cursors() {
        let mut source = filled(4, 3);
        let mut target = RawBuffer::with_capacity(8).unwrap();
        target.set_position(6).unwrap();

        source.copy_to(&mut target, 2).unwrap();

        assert_eq!(source.position(), 0);
        assert_eq!(target.position(), 0);
        assert_eq!(&target.as_bytes()[2..6], source.as_bytes());
        assert_eq!(target.size_in_bytes(), 5);
    }

    #[test]
    fn test_sequential_put_get() {
        let mut buffer = RawBuffer::with_capacity(12).unwrap();
        buffer.put(1.5f32).unwrap();
        buffer.put(-7i32).unwrap();
        buffer.put(9u32).unwrap();
        assert!(buffer.put(1u8).is_err());

        buffer.rewind();
        assert_eq!(buffer.get::<f32>().unwrap(), 1.5);
        assert_eq!(buffer.get::<i32>().unwrap(), -7);
        assert_eq!(buffer.get::<u32>().unwrap(), 9);
        assert!(buffer.get::<u8>().is_err());
    }

    #[test]
    fn test_ensure_capacity_keeps_storage_on_noop() {
        let mut buffer = filled(8, 8);
        let ptr = buffer.as_ptr();
        assert!(!buffer.ensure_capacity(8, true).unwrap());
        assert_eq!(buffer.as_ptr(), ptr);
        assert!(buffer.ensure_capacity(9, true).unwrap());
        assert_eq!(buffer.capacity_in_bytes(), 9);
        assert_eq!(buffer.size_in_bytes(), 8);
    }

    #[test]
    fn test_absurd_allocation_fails() {
        let err = RawBuffer::with_capacity(usize::MAX).unwrap_err();
        assert_eq!(err, CoreError::AllocationFailed { requested: usize::MAX });
    }
}
