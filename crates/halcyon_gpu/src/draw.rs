//! # Indirect Draw Commands
//!
//! GPU-driven rendering reads its draw arguments from a buffer. Each record
//! is the 20-byte indexed-indirect layout every graphics API agrees on:
//!
//! ```text
//! offset  0   count           u32
//! offset  4   instance_count  u32
//! offset  8   first_index     u32
//! offset 12   base_vertex     i32
//! offset 16   base_instance   u32
//! ```

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use halcyon_core::{Field, Layout};
use tracing::debug;

use crate::buffer::GpuBuffer;
use crate::error::GpuResult;
use crate::executor::{BufferKind, GpuExecutor, StorageMode};
use crate::fence::FenceProbe;

/// One indexed indirect draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct DrawCommand {
    /// Indices per instance.
    pub count: u32,
    /// Instances to draw.
    pub instance_count: u32,
    /// First index in the index buffer.
    pub first_index: u32,
    /// Added to every index.
    pub base_vertex: i32,
    /// First instance id.
    pub base_instance: u32,
}

impl DrawCommand {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Command drawing `instance_count` copies of an index range.
    #[must_use]
    pub const fn indexed(
        count: u32,
        first_index: u32,
        instance_count: u32,
        base_instance: u32,
    ) -> Self {
        Self {
            count,
            instance_count,
            first_index,
            base_vertex: 0,
            base_instance,
        }
    }
}

/// Record layout of [`DrawCommand`].
pub struct DrawCommandLayout;

impl Layout for DrawCommandLayout {
    const NAME: &'static str = "DrawCommand";
    const RECORD_SIZE: usize = DrawCommand::SIZE;
}

/// Field offsets, for shaders that patch commands in place.
pub mod fields {
    use super::Field;

    /// Indices per instance.
    pub const COUNT: Field<u32> = Field::at(0);
    /// Instances to draw.
    pub const INSTANCE_COUNT: Field<u32> = Field::at(4);
    /// First index.
    pub const FIRST_INDEX: Field<u32> = Field::at(8);
    /// Base vertex.
    pub const BASE_VERTEX: Field<i32> = Field::at(12);
    /// Base instance.
    pub const BASE_INSTANCE: Field<u32> = Field::at(16);
}

/// Growable buffer of [`DrawCommand`]s.
#[derive(Debug)]
pub struct IndirectDrawBuffer {
    buffer: GpuBuffer,
    len: usize,
}

impl IndirectDrawBuffer {
    /// Buffer with room for `capacity` commands.
    ///
    /// # Errors
    ///
    /// Allocation failure.
    pub fn new(
        executor: &Arc<dyn GpuExecutor>,
        capacity: usize,
        mode: StorageMode,
    ) -> GpuResult<Self> {
        let bytes = capacity.saturating_mul(DrawCommand::SIZE);
        let buffer = GpuBuffer::new(
            executor,
            &crate::buffer::GpuBufferDesc {
                label: "indirect-draws",
                kind: BufferKind::Indirect,
                mode,
                capacity: bytes,
            },
        )?;
        Ok(Self { buffer, len: 0 })
    }

    /// Commands that fit without growing.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity_in_bytes() / DrawCommand::SIZE
    }

    /// Commands written this frame.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no command was written.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Underlying buffer, for binding.
    #[must_use]
    pub fn buffer(&self) -> &GpuBuffer {
        &self.buffer
    }

    /// Mutable underlying buffer.
    pub fn buffer_mut(&mut self) -> &mut GpuBuffer {
        &mut self.buffer
    }

    /// Grows to hold at least `commands` commands, keeping existing ones.
    ///
    /// # Errors
    ///
    /// Allocation failure or use after release.
    pub fn enlarge(&mut self, commands: usize) -> GpuResult<bool> {
        let grew = self
            .buffer
            .ensure_capacity_in_bytes(commands.saturating_mul(DrawCommand::SIZE))?;
        if grew {
            debug!(
                commands,
                generation = self.buffer.generation(),
                "indirect draw buffer enlarged"
            );
        }
        Ok(grew)
    }

    /// Writes command `index`.
    ///
    /// # Errors
    ///
    /// [`CoreError::IndexOutOfBounds`](halcyon_core::CoreError::IndexOutOfBounds)
    /// past the capacity; use after release.
    pub fn set(&mut self, index: usize, command: DrawCommand) -> GpuResult<()> {
        self.buffer
            .with_view::<DrawCommandLayout, _>(|view| view.put_record(index, &command))??;
        self.len = self.len.max(index + 1);
        Ok(())
    }

    /// Reads command `index` from the CPU mirror.
    ///
    /// # Errors
    ///
    /// [`CoreError::IndexOutOfBounds`](halcyon_core::CoreError::IndexOutOfBounds)
    /// past the capacity; use after release.
    pub fn get(&mut self, index: usize) -> GpuResult<DrawCommand> {
        let command = self.buffer.with_view::<DrawCommandLayout, _>(|view| {
            view.for_index(index, |r| bytemuck::pod_read_unaligned::<DrawCommand>(r.as_bytes()))
        })??;
        Ok(command)
    }

    /// Appends a command, doubling the capacity when full.
    ///
    /// # Errors
    ///
    /// Allocation failure or use after release.
    pub fn push(&mut self, command: DrawCommand) -> GpuResult<usize> {
        let index = self.len;
        if index >= self.capacity() {
            self.enlarge((index + 1).max(self.capacity() * 2))?;
        }
        self.set(index, command)?;
        Ok(index)
    }

    /// Forgets all commands; capacity is kept.
    ///
    /// # Errors
    ///
    /// Use after release.
    pub fn clear(&mut self) -> GpuResult<()> {
        self.buffer.raw_mut()?.clear();
        self.len = 0;
        Ok(())
    }

    /// Publishes the commands to the GPU.
    ///
    /// # Errors
    ///
    /// Use after release, or an executor failure.
    pub fn publish(&mut self) -> GpuResult<Option<FenceProbe>> {
        self.buffer.publish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::HeadlessExecutor;

    fn executor() -> (Arc<HeadlessExecutor>, Arc<dyn GpuExecutor>) {
        let headless = Arc::new(HeadlessExecutor::immediate());
        let executor: Arc<dyn GpuExecutor> = headless.clone();
        (headless, executor)
    }

    fn command(i: u32) -> DrawCommand {
        DrawCommand {
            count: 36,
            instance_count: i + 1,
            first_index: i * 36,
            base_vertex: -(i as i32),
            base_instance: i * 10,
        }
    }

    #[test]
    fn test_draw_command_is_20_bytes() {
        assert_eq!(DrawCommand::SIZE, 20);
        assert_eq!(fields::BASE_INSTANCE.end(), 20);
    }

    #[test]
    fn test_grow_from_four_to_five_commands() {
        let (headless, executor) = executor();
        let mut draws = IndirectDrawBuffer::new(&executor, 4, StorageMode::Staged).unwrap();
        for i in 0..4 {
            draws.set(i, command(i as u32)).unwrap();
        }
        assert_eq!(draws.capacity(), 4);
        assert!(draws.set(4, command(4)).is_err());

        assert!(draws.enlarge(5).unwrap());
        assert!(draws.buffer().capacity_in_bytes() >= 100);
        draws.set(4, command(4)).unwrap();

        for i in 0..5 {
            assert_eq!(draws.get(i).unwrap(), command(i as u32));
        }
        draws.publish().unwrap();
        let gpu = headless.read_buffer(draws.buffer().handle().unwrap()).unwrap();
        let expected: Vec<DrawCommand> = (0..5).map(command).collect();
        assert_eq!(&gpu[..100], bytemuck::cast_slice::<DrawCommand, u8>(&expected));
    }

    #[test]
    fn test_field_offsets_match_struct() {
        let (_headless, executor) = executor();
        let mut draws = IndirectDrawBuffer::new(&executor, 1, StorageMode::Persistent).unwrap();
        draws.set(0, command(3)).unwrap();
        let base_vertex = draws
            .buffer_mut()
            .with_view::<DrawCommandLayout, _>(|view| {
                view.for_index(0, |r| r.get(fields::BASE_VERTEX))
            })
            .unwrap()
            .unwrap();
        assert_eq!(base_vertex, -3);
    }

    #[test]
    fn test_push_doubles_and_clear_keeps_capacity() {
        let (_headless, executor) = executor();
        let mut draws = IndirectDrawBuffer::new(&executor, 1, StorageMode::Persistent).unwrap();
        for i in 0..5 {
            assert_eq!(draws.push(command(i)).unwrap(), i as usize);
        }
        assert_eq!(draws.len(), 5);
        assert!(draws.capacity() >= 5);

        let capacity = draws.capacity();
        draws.clear().unwrap();
        assert!(draws.is_empty());
        assert_eq!(draws.capacity(), capacity);
    }
}
