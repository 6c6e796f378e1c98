//! GPU buffer management.
//!
//! This module handles vertex, index, uniform, storage and staging buffers.
//! A buffer can optionally carry a [`Freelist`] so that many small ranges
//! (meshes, per-object data) share one device buffer.
//!
//! # Overview
//!
//! - [`BufferUsage`] defines how a buffer will be used and where its memory
//!   lives
//! - [`Buffer`] owns a device buffer, an optional range allocator and a
//!   generation counter bumped whenever the device buffer is replaced
//!
//! Device-local buffers are filled through a temporary staging buffer;
//! host-visible buffers are written through a mapping.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use renderer_rhi::device::Device;
//! use renderer_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), renderer_rhi::RhiError> {
//! let mut vertices = Buffer::new_suballocated(device, BufferUsage::Vertex, 64 * 1024)?;
//!
//! let data = [0u8; 96];
//! let block = vertices.allocate(data.len() as u64)?;
//! vertices.load_data(block.offset, &data)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use tracing::{debug, error, info};

use crate::device_api::GraphicsDevice;
use crate::error::{RhiError, RhiResult};
use crate::freelist::{Block, Freelist};

/// Buffer usage type.
///
/// Defines the intended use of the buffer, which affects
/// Vulkan usage flags and memory allocation strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Vertex buffer - stores vertex data
    Vertex,
    /// Index buffer - stores index data
    Index,
    /// Uniform buffer - stores shader uniform data
    Uniform,
    /// Storage buffer - general-purpose GPU storage
    Storage,
    /// Staging buffer - CPU-writable source for uploads
    Staging,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    ///
    /// Everything except staging can be both source and target of a
    /// transfer, which uploads and resizing rely on.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        let transfer = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER | transfer,
            BufferUsage::Index => vk::BufferUsageFlags::INDEX_BUFFER | transfer,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER | transfer,
            BufferUsage::Storage => vk::BufferUsageFlags::STORAGE_BUFFER | transfer,
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Returns the memory location for this buffer type.
    pub fn memory_location(self) -> MemoryLocation {
        match self {
            // Device-local, filled through staging
            BufferUsage::Vertex | BufferUsage::Index | BufferUsage::Storage => {
                MemoryLocation::GpuOnly
            }
            // Rewritten by the host every frame
            BufferUsage::Uniform | BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    /// Whether the host can map buffers of this type.
    #[inline]
    pub fn is_host_visible(self) -> bool {
        self.memory_location() != MemoryLocation::GpuOnly
    }

    /// Returns a human-readable name for the buffer type.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
        }
    }
}

/// Device buffer with an optional range allocator.
///
/// # Thread Safety
///
/// The buffer is not internally synchronized. Mutation goes through
/// `&mut self`.
pub struct Buffer<D: GraphicsDevice> {
    device: Arc<D>,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    usage: BufferUsage,
    freelist: Option<Freelist>,
    locked: bool,
    generation: u64,
}

impl<D: GraphicsDevice> Buffer<D> {
    /// Creates a buffer without range tracking.
    ///
    /// # Arguments
    ///
    /// * `device` - The owning device
    /// * `usage` - The intended buffer usage
    /// * `size` - Buffer size in bytes
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or device allocation fails.
    pub fn new(device: Arc<D>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        Self::create(device, usage, size, false)
    }

    /// Creates a buffer whose ranges are handed out by [`allocate`](Self::allocate).
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or device allocation fails.
    pub fn new_suballocated(
        device: Arc<D>,
        usage: BufferUsage,
        size: vk::DeviceSize,
    ) -> RhiResult<Self> {
        Self::create(device, usage, size, true)
    }

    fn create(
        device: Arc<D>,
        usage: BufferUsage,
        size: vk::DeviceSize,
        suballocated: bool,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidOperation(
                "Buffer size must be greater than 0".to_string(),
            ));
        }

        let buffer = device.create_buffer(size, usage.to_vk_usage(), usage.memory_location())?;

        debug!(
            "Created {} buffer: {} bytes{}",
            usage.name(),
            size,
            if suballocated { " (suballocated)" } else { "" }
        );

        Ok(Self {
            device,
            buffer,
            size,
            usage,
            freelist: suballocated.then(|| Freelist::new(size)),
            locked: false,
            generation: 0,
        })
    }

    /// Reserves `size` bytes and returns the block.
    ///
    /// # Errors
    ///
    /// - [`RhiError::Freelist`] with `OutOfSpace` when no free range fits;
    ///   the buffer can be grown with [`resize`](Self::resize) and the call
    ///   retried
    /// - [`RhiError::InvalidOperation`] if the buffer is not sub-allocated
    pub fn allocate(&mut self, size: vk::DeviceSize) -> RhiResult<Block> {
        let freelist = self.freelist_mut()?;
        Ok(freelist.allocate_block(size)?)
    }

    /// Releases the block starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if no allocated block starts at `offset` or the
    /// buffer is not sub-allocated.
    pub fn free(&mut self, offset: vk::DeviceSize) -> RhiResult<()> {
        let freelist = self.freelist_mut()?;
        freelist.free_block(offset)?;
        Ok(())
    }

    fn freelist_mut(&mut self) -> RhiResult<&mut Freelist> {
        let usage = self.usage;
        self.freelist.as_mut().ok_or_else(|| {
            RhiError::InvalidOperation(format!(
                "{} buffer is not sub-allocated",
                usage.name()
            ))
        })
    }

    /// Copies `data` into the buffer at `offset`.
    ///
    /// Host-visible buffers are mapped and written directly. Device-local
    /// buffers are written through a temporary staging buffer and a device
    /// copy; the call returns once the copy has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write would exceed the buffer, the buffer is
    /// currently locked, or a device operation fails.
    pub fn load_data(&mut self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        self.check_range(offset, data.len() as vk::DeviceSize)?;
        if self.locked {
            return Err(RhiError::InvalidOperation(format!(
                "load into locked {} buffer",
                self.usage.name()
            )));
        }

        if self.usage.is_host_visible() {
            return write_mapped(self.device.as_ref(), self.buffer, offset, data);
        }

        let staging = Buffer::new(
            self.device.clone(),
            BufferUsage::Staging,
            data.len() as vk::DeviceSize,
        )?;
        write_mapped(self.device.as_ref(), staging.buffer, 0, data)?;
        self.device.copy_buffer(
            staging.buffer,
            self.buffer,
            vk::BufferCopy {
                src_offset: 0,
                dst_offset: offset,
                size: data.len() as vk::DeviceSize,
            },
        )
    }

    /// Maps `size` bytes at `offset` for direct host access.
    ///
    /// The mapping stays in place until [`unlock_memory`](Self::unlock_memory).
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidOperation`] if the buffer is device-local,
    /// already locked, or the range exceeds the buffer.
    pub fn lock_memory(
        &mut self,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> RhiResult<&mut [u8]> {
        if !self.usage.is_host_visible() {
            return Err(RhiError::InvalidOperation(format!(
                "cannot lock device-local {} buffer",
                self.usage.name()
            )));
        }
        if self.locked {
            return Err(RhiError::InvalidOperation(format!(
                "{} buffer is already locked",
                self.usage.name()
            )));
        }
        self.check_range(offset, size)?;

        let ptr = self.device.map_buffer(self.buffer)?;
        self.locked = true;

        // SAFETY: the mapping covers the whole buffer, the range was checked
        // above, and the slice borrows `self` mutably so the buffer cannot be
        // unlocked, resized or dropped while it is alive.
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(ptr.as_ptr().add(offset as usize), size as usize)
        };
        Ok(bytes)
    }

    /// Releases a mapping made by [`lock_memory`](Self::lock_memory).
    /// Does nothing if the buffer is not locked.
    pub fn unlock_memory(&mut self) {
        if self.locked {
            self.device.unmap_buffer(self.buffer);
            self.locked = false;
        }
    }

    /// Grows the buffer to `new_size` bytes, preserving its contents.
    ///
    /// A new device buffer is created, the old contents are copied over on the
    /// device, and the old buffer is destroyed once the device is idle. Live
    /// blocks keep their offsets. The generation counter is bumped so users
    /// holding the old handle can notice.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidOperation`] if `new_size` is not larger than
    /// the current size or the buffer is locked, and propagates device errors.
    /// On error the buffer is unchanged.
    pub fn resize(&mut self, new_size: vk::DeviceSize) -> RhiResult<()> {
        if new_size <= self.size {
            return Err(RhiError::InvalidOperation(format!(
                "{} buffer can only grow: {} -> {}",
                self.usage.name(),
                self.size,
                new_size
            )));
        }
        if self.locked {
            return Err(RhiError::InvalidOperation(format!(
                "resize of locked {} buffer",
                self.usage.name()
            )));
        }

        let new_buffer = self.device.create_buffer(
            new_size,
            self.usage.to_vk_usage(),
            self.usage.memory_location(),
        )?;

        let copied = self.device.copy_buffer(
            self.buffer,
            new_buffer,
            vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: self.size,
            },
        );
        if let Err(e) = copied.and_then(|()| self.device.wait_idle()) {
            error!("Failed to copy {} buffer during resize: {}", self.usage.name(), e);
            self.device.destroy_buffer(new_buffer);
            return Err(e);
        }

        self.device.destroy_buffer(self.buffer);
        self.buffer = new_buffer;

        let old_size = self.size;
        self.size = new_size;
        if let Some(freelist) = self.freelist.as_mut() {
            freelist.resize(new_size)?;
        }
        self.generation += 1;

        info!(
            "Resized {} buffer: {} -> {} bytes (generation {})",
            self.usage.name(),
            old_size,
            new_size,
            self.generation
        );
        Ok(())
    }

    fn check_range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> RhiResult<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(RhiError::InvalidOperation(format!(
                "range exceeds {} buffer: offset {} + size {} > {}",
                self.usage.name(),
                offset,
                size,
                self.size
            ))),
        }
    }

    /// Returns the device buffer handle. Changes after [`resize`](Self::resize).
    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Returns the buffer size in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Returns the buffer usage type.
    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Number of times the device buffer has been replaced.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Unallocated bytes. Always zero for buffers without range tracking.
    pub fn free_space(&self) -> vk::DeviceSize {
        self.freelist.as_ref().map_or(0, Freelist::free_space)
    }

    /// Whether ranges are handed out by [`allocate`](Self::allocate).
    #[inline]
    pub fn is_suballocated(&self) -> bool {
        self.freelist.is_some()
    }
}

impl<D: GraphicsDevice> Drop for Buffer<D> {
    fn drop(&mut self) {
        self.unlock_memory();
        self.device.destroy_buffer(self.buffer);
        debug!("Destroyed {} buffer", self.usage.name());
    }
}

fn write_mapped<D: GraphicsDevice>(
    device: &D,
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    data: &[u8],
) -> RhiResult<()> {
    let ptr = device.map_buffer(buffer)?;
    // SAFETY: callers bounds-check `offset + data.len()` against the buffer size.
    unsafe {
        let dst = ptr.as_ptr().add(offset as usize);
        std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
    }
    device.unmap_buffer(buffer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freelist::FreelistError;
    use crate::mock::{MockDevice, MockEvent};

    fn device() -> Arc<MockDevice> {
        Arc::new(MockDevice::new())
    }

    #[test]
    fn test_buffer_usage_to_vk_usage() {
        assert!(
            BufferUsage::Vertex
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC)
        );
        assert!(
            BufferUsage::Index
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert!(
            BufferUsage::Storage
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::STORAGE_BUFFER)
        );
        assert_eq!(
            BufferUsage::Staging.to_vk_usage(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_buffer_usage_memory_location() {
        assert_eq!(BufferUsage::Vertex.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsage::Index.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsage::Storage.memory_location(), MemoryLocation::GpuOnly);
        assert_eq!(BufferUsage::Uniform.memory_location(), MemoryLocation::CpuToGpu);
        assert_eq!(BufferUsage::Staging.memory_location(), MemoryLocation::CpuToGpu);
    }

    #[test]
    fn test_zero_size_rejected() {
        let result = Buffer::new(device(), BufferUsage::Uniform, 0);
        assert!(matches!(result, Err(RhiError::InvalidOperation(_))));
    }

    #[test]
    fn test_allocate_requires_freelist() {
        let mut buffer = Buffer::new(device(), BufferUsage::Vertex, 256).unwrap();
        assert!(matches!(
            buffer.allocate(16),
            Err(RhiError::InvalidOperation(_))
        ));
        assert_eq!(buffer.free_space(), 0);
    }

    #[test]
    fn test_allocate_and_free() {
        let mut buffer = Buffer::new_suballocated(device(), BufferUsage::Vertex, 256).unwrap();

        let a = buffer.allocate(64).unwrap();
        let b = buffer.allocate(64).unwrap();
        assert_eq!((a.offset, b.offset), (0, 64));
        assert_eq!(buffer.free_space(), 128);

        let err = buffer.allocate(200).unwrap_err();
        assert!(err.is_out_of_space());

        buffer.free(a.offset).unwrap();
        assert!(matches!(
            buffer.free(a.offset),
            Err(RhiError::Freelist(FreelistError::NotFound { offset: 0 }))
        ));
        assert_eq!(buffer.free_space(), 192);
    }

    #[test]
    fn test_load_data_device_local_uses_staging() {
        let device = device();
        let mut buffer =
            Buffer::new_suballocated(device.clone(), BufferUsage::Vertex, 16).unwrap();

        buffer.load_data(4, &[9, 8, 7, 6]).unwrap();

        assert_eq!(
            device.buffer_contents(buffer.handle()).unwrap(),
            vec![0, 0, 0, 0, 9, 8, 7, 6, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            device.count_events(|e| matches!(
                e,
                MockEvent::CopyBuffer {
                    dst_offset: 4,
                    size: 4,
                    ..
                }
            )),
            1
        );
        // Staging buffer is gone
        assert_eq!(device.live_buffers(), 1);
    }

    #[test]
    fn test_load_data_host_visible_writes_directly() {
        let device = device();
        let mut buffer = Buffer::new(device.clone(), BufferUsage::Uniform, 8).unwrap();

        buffer.load_data(0, &[1, 2, 3]).unwrap();

        assert_eq!(
            device.buffer_contents(buffer.handle()).unwrap(),
            vec![1, 2, 3, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            device.count_events(|e| matches!(e, MockEvent::CopyBuffer { .. })),
            0
        );
    }

    #[test]
    fn test_load_data_out_of_range() {
        let mut buffer = Buffer::new(device(), BufferUsage::Uniform, 8).unwrap();
        assert!(matches!(
            buffer.load_data(6, &[1, 2, 3]),
            Err(RhiError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_lock_unlock() {
        let device = device();
        let mut buffer = Buffer::new(device.clone(), BufferUsage::Uniform, 8).unwrap();

        let bytes = buffer.lock_memory(2, 4).unwrap();
        bytes.copy_from_slice(&[5, 5, 5, 5]);

        assert!(matches!(
            buffer.lock_memory(0, 1),
            Err(RhiError::InvalidOperation(_))
        ));
        buffer.unlock_memory();

        assert_eq!(
            device.buffer_contents(buffer.handle()).unwrap(),
            vec![0, 0, 5, 5, 5, 5, 0, 0]
        );
        buffer.lock_memory(0, 8).unwrap();
        buffer.unlock_memory();
    }

    #[test]
    fn test_lock_device_local_rejected() {
        let mut buffer = Buffer::new(device(), BufferUsage::Index, 8).unwrap();
        assert!(matches!(
            buffer.lock_memory(0, 4),
            Err(RhiError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_resize_preserves_contents() {
        let device = device();
        let mut buffer =
            Buffer::new_suballocated(device.clone(), BufferUsage::Index, 8).unwrap();
        let block = buffer.allocate(8).unwrap();
        buffer.load_data(block.offset, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let old_handle = buffer.handle();

        buffer.resize(16).unwrap();

        assert_ne!(buffer.handle(), old_handle);
        assert_eq!(buffer.size(), 16);
        assert_eq!(buffer.generation(), 1);
        assert_eq!(buffer.free_space(), 8);
        assert_eq!(
            device.buffer_contents(buffer.handle()).unwrap()[..8],
            [1, 2, 3, 4, 5, 6, 7, 8]
        );
        assert!(device.buffer_contents(old_handle).is_none());
        assert!(device.events().contains(&MockEvent::WaitIdle));

        // The grown tail is usable
        assert_eq!(buffer.allocate(8).unwrap().offset, 8);
    }

    #[test]
    fn test_resize_rejects_shrink() {
        let mut buffer = Buffer::new(device(), BufferUsage::Storage, 64).unwrap();
        assert!(matches!(
            buffer.resize(32),
            Err(RhiError::InvalidOperation(_))
        ));
        assert!(matches!(
            buffer.resize(64),
            Err(RhiError::InvalidOperation(_))
        ));
        assert_eq!(buffer.size(), 64);
        assert_eq!(buffer.generation(), 0);
    }

    #[test]
    fn test_drop_releases_device_buffer() {
        let device = device();
        {
            let mut buffer = Buffer::new(device.clone(), BufferUsage::Uniform, 8).unwrap();
            buffer.lock_memory(0, 8).unwrap();
        }
        assert_eq!(device.live_objects(), 0);
    }
}
