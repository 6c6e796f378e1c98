//! Geometry storage in shared vertex and index buffers.
//!
//! Every geometry lives in a block of one device-local vertex buffer and a
//! block of one device-local index buffer. When a buffer runs out of room it
//! is grown in place and the allocation retried, so callers never see
//! out-of-space errors for reasonable sizes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use glam::{Vec2, Vec3};
//! use renderer_rhi::device::Device;
//! use renderer_renderer::geometry::{GeometryStore, Vertex3d};
//!
//! # fn example(device: Arc<Device>) -> Result<(), renderer_renderer::RendererError> {
//! let mut store = GeometryStore::new(device, 64 * 1024, 64 * 1024)?;
//!
//! let vertices = [
//!     Vertex3d::new(Vec3::new(-0.5, -0.5, 0.0), Vec2::new(0.0, 0.0)),
//!     Vertex3d::new(Vec3::new(0.5, -0.5, 0.0), Vec2::new(1.0, 0.0)),
//!     Vertex3d::new(Vec3::new(0.0, 0.5, 0.0), Vec2::new(0.5, 1.0)),
//! ];
//! let triangle = store.create_geometry(&vertices, &[0, 1, 2])?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use tracing::{debug, info, warn};

use renderer_rhi::buffer::{Buffer, BufferUsage};
use renderer_rhi::{Block, GraphicsDevice, RhiResult};

use crate::error::{RendererError, RendererResult};

/// Vertex with a position and texture coordinate.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex3d {
    /// Position in object space.
    pub position: Vec3,
    /// Texture coordinate.
    pub texcoord: Vec2,
}

impl Vertex3d {
    /// Creates a vertex.
    pub const fn new(position: Vec3, texcoord: Vec2) -> Self {
        Self { position, texcoord }
    }
}

/// Handle to a geometry in a [`GeometryStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(u32);

/// Where a geometry's data lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// Byte offset of the first vertex in the vertex buffer.
    pub vertex_offset: vk::DeviceSize,
    /// Number of vertices.
    pub vertex_count: u32,
    /// Byte offset of the first index in the index buffer.
    pub index_offset: vk::DeviceSize,
    /// Number of `u32` indices.
    pub index_count: u32,
    /// Bumped every time the geometry is re-uploaded.
    pub generation: u32,
}

/// Shared vertex and index buffers with per-geometry blocks.
pub struct GeometryStore<D: GraphicsDevice> {
    vertex_buffer: Buffer<D>,
    index_buffer: Buffer<D>,
    geometries: HashMap<GeometryId, Geometry>,
    next_id: u32,
}

impl<D: GraphicsDevice> GeometryStore<D> {
    /// Creates a store with the given initial buffer capacities in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if either size is zero or buffer creation fails.
    pub fn new(
        device: Arc<D>,
        vertex_capacity: vk::DeviceSize,
        index_capacity: vk::DeviceSize,
    ) -> RendererResult<Self> {
        let vertex_buffer =
            Buffer::new_suballocated(device.clone(), BufferUsage::Vertex, vertex_capacity)?;
        let index_buffer = Buffer::new_suballocated(device, BufferUsage::Index, index_capacity)?;

        info!(
            "Geometry store created: {} vertex bytes, {} index bytes",
            vertex_capacity, index_capacity
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            geometries: HashMap::new(),
            next_id: 0,
        })
    }

    /// Uploads a new geometry.
    ///
    /// # Errors
    ///
    /// - [`RendererError::EmptyGeometry`] if `vertices` or `indices` is empty
    /// - device errors from growing the buffers or uploading
    pub fn create_geometry(
        &mut self,
        vertices: &[Vertex3d],
        indices: &[u32],
    ) -> RendererResult<GeometryId> {
        let geometry = self.upload(vertices, indices)?;

        let id = GeometryId(self.next_id);
        self.next_id += 1;
        self.geometries.insert(id, geometry);

        debug!(
            "Created geometry {:?}: {} vertices, {} indices",
            id, geometry.vertex_count, geometry.index_count
        );
        Ok(id)
    }

    /// Replaces the data of an existing geometry.
    ///
    /// The new data goes into fresh blocks; the old blocks are released
    /// afterwards and the geometry's generation is bumped.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::UnknownGeometry`] for a destroyed id, plus
    /// the errors of [`create_geometry`](Self::create_geometry). On error the
    /// geometry keeps its old data.
    pub fn update_geometry(
        &mut self,
        id: GeometryId,
        vertices: &[Vertex3d],
        indices: &[u32],
    ) -> RendererResult<()> {
        let old = *self
            .geometries
            .get(&id)
            .ok_or(RendererError::UnknownGeometry(id))?;

        let mut geometry = self.upload(vertices, indices)?;
        geometry.generation = old.generation.wrapping_add(1);
        self.release(&old)?;
        self.geometries.insert(id, geometry);

        debug!("Updated geometry {:?} (generation {})", id, geometry.generation);
        Ok(())
    }

    /// Releases a geometry's blocks.
    ///
    /// # Errors
    ///
    /// Returns [`RendererError::UnknownGeometry`] for an unknown id.
    pub fn destroy_geometry(&mut self, id: GeometryId) -> RendererResult<()> {
        let geometry = self
            .geometries
            .remove(&id)
            .ok_or(RendererError::UnknownGeometry(id))?;
        self.release(&geometry)?;

        debug!("Destroyed geometry {:?}", id);
        Ok(())
    }

    /// Returns where a geometry lives, if it exists.
    pub fn geometry(&self, id: GeometryId) -> Option<Geometry> {
        self.geometries.get(&id).copied()
    }

    /// Number of live geometries.
    pub fn len(&self) -> usize {
        self.geometries.len()
    }

    /// Whether the store holds no geometry.
    pub fn is_empty(&self) -> bool {
        self.geometries.is_empty()
    }

    /// Vertex buffer handle. Changes when the buffer grows.
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    /// Index buffer handle. Changes when the buffer grows.
    pub fn index_buffer(&self) -> vk::Buffer {
        self.index_buffer.handle()
    }

    /// Bumped every time the vertex buffer grows.
    pub fn vertex_buffer_generation(&self) -> u64 {
        self.vertex_buffer.generation()
    }

    /// Bumped every time the index buffer grows.
    pub fn index_buffer_generation(&self) -> u64 {
        self.index_buffer.generation()
    }

    /// Current vertex buffer capacity in bytes.
    pub fn vertex_capacity(&self) -> vk::DeviceSize {
        self.vertex_buffer.size()
    }

    /// Current index buffer capacity in bytes.
    pub fn index_capacity(&self) -> vk::DeviceSize {
        self.index_buffer.size()
    }

    fn upload(&mut self, vertices: &[Vertex3d], indices: &[u32]) -> RendererResult<Geometry> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(RendererError::EmptyGeometry);
        }
        let vertex_count = element_count(vertices.len())?;
        let index_count = element_count(indices.len())?;

        let vertex_offset = upload_block(&mut self.vertex_buffer, bytemuck::cast_slice(vertices))?;
        let index_offset = match upload_block(&mut self.index_buffer, bytemuck::cast_slice(indices))
        {
            Ok(offset) => offset,
            Err(e) => {
                release_block(&mut self.vertex_buffer, vertex_offset);
                return Err(e.into());
            }
        };

        Ok(Geometry {
            vertex_offset,
            vertex_count,
            index_offset,
            index_count,
            generation: 0,
        })
    }

    fn release(&mut self, geometry: &Geometry) -> RendererResult<()> {
        self.vertex_buffer.free(geometry.vertex_offset)?;
        self.index_buffer.free(geometry.index_offset)?;
        Ok(())
    }
}

fn element_count(len: usize) -> RendererResult<u32> {
    u32::try_from(len).map_err(|_| RendererError::GeometryTooLarge(len))
}

/// Size a full buffer grows to: twice its size, or just enough for `needed`
/// more bytes if that is larger.
fn grown_size(current: vk::DeviceSize, needed: vk::DeviceSize) -> vk::DeviceSize {
    current.saturating_mul(2).max(current.saturating_add(needed))
}

/// Reserves `size` bytes, growing the buffer once if it is full.
fn allocate_or_grow<D: GraphicsDevice>(
    buffer: &mut Buffer<D>,
    size: vk::DeviceSize,
) -> RhiResult<Block> {
    match buffer.allocate(size) {
        Err(e) if e.is_out_of_space() => {
            let new_size = grown_size(buffer.size(), size);
            info!(
                "{} buffer full, growing {} -> {} bytes",
                buffer.usage().name(),
                buffer.size(),
                new_size
            );
            buffer.resize(new_size)?;
            buffer.allocate(size)
        }
        result => result,
    }
}

fn upload_block<D: GraphicsDevice>(buffer: &mut Buffer<D>, data: &[u8]) -> RhiResult<vk::DeviceSize> {
    let block = allocate_or_grow(buffer, data.len() as vk::DeviceSize)?;
    if let Err(e) = buffer.load_data(block.offset, data) {
        release_block(buffer, block.offset);
        return Err(e);
    }
    Ok(block.offset)
}

fn release_block<D: GraphicsDevice>(buffer: &mut Buffer<D>, offset: vk::DeviceSize) {
    if let Err(e) = buffer.free(offset) {
        warn!("Failed to release block at {} after upload error: {}", offset, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer_rhi::mock::MockDevice;

    fn triangle() -> [Vertex3d; 3] {
        [
            Vertex3d::new(Vec3::new(-0.5, -0.5, 0.0), Vec2::new(0.0, 0.0)),
            Vertex3d::new(Vec3::new(0.5, -0.5, 0.0), Vec2::new(1.0, 0.0)),
            Vertex3d::new(Vec3::new(0.0, 0.5, 0.0), Vec2::new(0.5, 1.0)),
        ]
    }

    #[test]
    fn test_vertex_layout() {
        assert_eq!(std::mem::size_of::<Vertex3d>(), 20);
    }

    #[test]
    fn test_create_geometry_uploads_data() {
        let device = Arc::new(MockDevice::new());
        let mut store = GeometryStore::new(device.clone(), 1024, 1024).unwrap();

        let vertices = triangle();
        let id = store.create_geometry(&vertices, &[0, 1, 2]).unwrap();
        let geometry = store.geometry(id).unwrap();

        assert_eq!(geometry.vertex_count, 3);
        assert_eq!(geometry.index_count, 3);
        assert_eq!(geometry.generation, 0);

        let contents = device.buffer_contents(store.vertex_buffer()).unwrap();
        let start = geometry.vertex_offset as usize;
        assert_eq!(
            &contents[start..start + 60],
            bytemuck::cast_slice::<Vertex3d, u8>(&vertices)
        );

        let contents = device.buffer_contents(store.index_buffer()).unwrap();
        let start = geometry.index_offset as usize;
        assert_eq!(
            &contents[start..start + 12],
            bytemuck::cast_slice::<u32, u8>(&[0, 1, 2])
        );
    }

    #[test]
    fn test_grows_when_full() {
        let device = Arc::new(MockDevice::new());
        // Room for one triangle only
        let mut store = GeometryStore::new(device.clone(), 64, 64).unwrap();

        let first = triangle();
        let a = store.create_geometry(&first, &[0, 1, 2]).unwrap();
        assert_eq!(store.vertex_buffer_generation(), 0);

        let b = store.create_geometry(&triangle(), &[2, 1, 0]).unwrap();
        assert_eq!(store.vertex_buffer_generation(), 1);
        assert_eq!(store.vertex_capacity(), 128);
        assert_eq!(store.index_buffer_generation(), 0);

        assert_eq!(store.geometry(a).unwrap().vertex_offset, 0);
        assert_eq!(store.geometry(b).unwrap().vertex_offset, 60);

        // Growing keeps earlier data in place
        let contents = device.buffer_contents(store.vertex_buffer()).unwrap();
        assert_eq!(&contents[0..60], bytemuck::cast_slice::<Vertex3d, u8>(&first));
    }

    #[test]
    fn test_grows_to_fit_large_request() {
        let device = Arc::new(MockDevice::new());
        let mut store = GeometryStore::new(device, 16, 1024).unwrap();

        let vertices = vec![Vertex3d::default(); 10];
        store.create_geometry(&vertices, &[0]).unwrap();
        assert_eq!(store.vertex_capacity(), 216);
    }

    #[test]
    fn test_update_geometry_bumps_generation() {
        let device = Arc::new(MockDevice::new());
        let mut store = GeometryStore::new(device, 1024, 1024).unwrap();

        let id = store.create_geometry(&triangle(), &[0, 1, 2]).unwrap();
        store.update_geometry(id, &triangle(), &[2, 1, 0]).unwrap();

        let geometry = store.geometry(id).unwrap();
        assert_eq!(geometry.generation, 1);
        // Fresh blocks were taken before the old ones were released
        assert_eq!(geometry.vertex_offset, 60);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_destroy_geometry_releases_blocks() {
        let device = Arc::new(MockDevice::new());
        let mut store = GeometryStore::new(device, 1024, 1024).unwrap();

        let id = store.create_geometry(&triangle(), &[0, 1, 2]).unwrap();
        store.destroy_geometry(id).unwrap();

        assert!(store.is_empty());
        assert!(store.geometry(id).is_none());
        assert!(matches!(
            store.destroy_geometry(id),
            Err(RendererError::UnknownGeometry(_))
        ));

        // Space is reusable from the start again
        let id = store.create_geometry(&triangle(), &[0, 1, 2]).unwrap();
        assert_eq!(store.geometry(id).unwrap().vertex_offset, 0);
    }

    #[test]
    fn test_empty_geometry_rejected() {
        let device = Arc::new(MockDevice::new());
        let mut store = GeometryStore::new(device, 1024, 1024).unwrap();

        assert!(matches!(
            store.create_geometry(&[], &[0]),
            Err(RendererError::EmptyGeometry)
        ));
        assert!(matches!(
            store.create_geometry(&triangle(), &[]),
            Err(RendererError::EmptyGeometry)
        ));
    }

    #[test]
    fn test_element_count_rejects_overflow() {
        assert_eq!(element_count(6).unwrap(), 6);
        assert_eq!(element_count(u32::MAX as usize).unwrap(), u32::MAX);

        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            element_count(u32::MAX as usize + 1),
            Err(RendererError::GeometryTooLarge(_))
        ));
    }

    #[test]
    fn test_grown_size_saturates() {
        assert_eq!(grown_size(64, 4), 128);
        assert_eq!(grown_size(16, 200), 216);
        assert_eq!(grown_size(u64::MAX / 2 + 1, 8), u64::MAX);
        assert_eq!(grown_size(u64::MAX - 4, u64::MAX), u64::MAX);
    }
}
