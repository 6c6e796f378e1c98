//! Render context.
//!
//! [`RenderContext`] bundles everything a frame needs: the frame scheduler,
//! the geometry store and a ring of per-frame uniform slots. It is generic
//! over the device so the same code runs on Vulkan and in tests.

use std::mem::size_of;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use tracing::{debug, info};

use renderer_core::{Error, RendererConfig};
use renderer_rhi::GraphicsDevice;
use renderer_rhi::buffer::{Buffer, BufferUsage};

use crate::error::RendererResult;
use crate::frame_scheduler::FrameScheduler;
use crate::geometry::{Geometry, GeometryId, GeometryStore, Vertex3d};

/// Per-frame uniform data shared by every draw.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct GlobalUniform {
    /// Projection matrix.
    pub projection: Mat4,
    /// View matrix.
    pub view: Mat4,
}

impl Default for GlobalUniform {
    fn default() -> Self {
        Self {
            projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
        }
    }
}

/// Input for one call to [`RenderContext::draw_frame`].
#[derive(Clone, Copy, Debug, Default)]
pub struct FramePacket {
    /// Seconds since the previous frame.
    pub delta_time: f32,
    /// Uniform data for this frame.
    pub uniform: GlobalUniform,
}

impl FramePacket {
    /// Vertical field of view used by [`with_perspective`](Self::with_perspective).
    pub const FOV_Y: f32 = std::f32::consts::FRAC_PI_4;

    /// A packet with a perspective projection for `aspect_ratio` and a
    /// camera at `(0, 0, 2)` looking at the origin.
    pub fn with_perspective(aspect_ratio: f32, delta_time: f32) -> Self {
        let mut projection = Mat4::perspective_rh(Self::FOV_Y, aspect_ratio, 0.1, 100.0);
        // Vulkan clip space has Y pointing down
        projection.y_axis.y *= -1.0;

        Self {
            delta_time,
            uniform: GlobalUniform {
                projection,
                view: Mat4::look_at_rh(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO, Vec3::Y),
            },
        }
    }
}

/// Frame production state for one surface.
///
/// Field order is drop order: the scheduler waits for the device to go idle
/// before the buffers it may still be reading are released.
pub struct RenderContext<D: GraphicsDevice> {
    scheduler: FrameScheduler<D>,
    geometry: GeometryStore<D>,
    /// `uniform_slot_size` bytes per frame slot.
    uniforms: Buffer<D>,
    uniform_slot_size: vk::DeviceSize,
    device: Arc<D>,
}

impl<D: GraphicsDevice> RenderContext<D> {
    /// Creates the scheduler, geometry store and uniform ring.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid, a uniform slot cannot hold a
    /// [`GlobalUniform`], or device resource creation fails.
    pub fn new(device: Arc<D>, width: u32, height: u32, config: &RendererConfig) -> RendererResult<Self> {
        config.validate()?;
        if config.uniform_slot_size < size_of::<GlobalUniform>() as u64 {
            return Err(Error::Config(format!(
                "uniform slot size {} is smaller than the global uniform ({} bytes)",
                config.uniform_slot_size,
                size_of::<GlobalUniform>()
            ))
            .into());
        }

        let scheduler = FrameScheduler::new(device.clone(), width, height, config)?;
        let geometry = GeometryStore::new(
            device.clone(),
            config.vertex_buffer_size,
            config.index_buffer_size,
        )?;
        let uniforms = Buffer::new(
            device.clone(),
            BufferUsage::Uniform,
            config.uniform_slot_size * u64::from(scheduler.max_frames_in_flight()),
        )?;

        info!(
            "Render context created: {}x{}, {} uniform slots",
            width,
            height,
            scheduler.max_frames_in_flight()
        );

        Ok(Self {
            scheduler,
            geometry,
            uniforms,
            uniform_slot_size: config.uniform_slot_size,
            device,
        })
    }

    /// Records a new surface size; see [`FrameScheduler::resized`].
    pub fn resized(&mut self, width: u32, height: u32) {
        self.scheduler.resized(width, height);
    }

    /// Starts a frame; see [`FrameScheduler::begin_frame`].
    ///
    /// Also grows the uniform ring if a swapchain rebuild added frame slots.
    ///
    /// # Errors
    ///
    /// Propagates scheduler and buffer errors.
    pub fn begin_frame(&mut self, delta_time: f32) -> RendererResult<bool> {
        let begun = self.scheduler.begin_frame(delta_time)?;
        self.ensure_uniform_capacity()?;
        Ok(begun)
    }

    /// Finishes a frame; see [`FrameScheduler::end_frame`].
    ///
    /// # Errors
    ///
    /// Propagates scheduler errors.
    pub fn end_frame(&mut self, delta_time: f32) -> RendererResult<bool> {
        Ok(self.scheduler.end_frame(delta_time)?)
    }

    /// Produces one frame: begins it, writes the packet's uniform data into
    /// the current frame slot and ends it.
    ///
    /// Returns whether a frame was presented.
    ///
    /// # Errors
    ///
    /// Propagates scheduler and buffer errors. A started frame is always
    /// ended, even if the uniform write fails.
    pub fn draw_frame(&mut self, packet: &FramePacket) -> RendererResult<bool> {
        if !self.begin_frame(packet.delta_time)? {
            return Ok(false);
        }

        let written = self.write_uniform(&packet.uniform);
        let presented = self.end_frame(packet.delta_time)?;
        written?;
        Ok(presented)
    }

    fn write_uniform(&mut self, uniform: &GlobalUniform) -> RendererResult<()> {
        let offset = self.uniform_offset(self.scheduler.current_frame());
        let bytes = bytemuck::bytes_of(uniform);

        let mapped = self.uniforms.lock_memory(offset, bytes.len() as vk::DeviceSize)?;
        mapped.copy_from_slice(bytes);
        self.uniforms.unlock_memory();
        Ok(())
    }

    fn ensure_uniform_capacity(&mut self) -> RendererResult<()> {
        let required =
            self.uniform_slot_size * u64::from(self.scheduler.max_frames_in_flight());
        if self.uniforms.size() < required {
            debug!(
                "Growing uniform ring for {} frame slots",
                self.scheduler.max_frames_in_flight()
            );
            self.uniforms.resize(required)?;
        }
        Ok(())
    }

    /// Byte offset of a frame slot in the uniform ring.
    #[inline]
    pub fn uniform_offset(&self, frame: usize) -> vk::DeviceSize {
        frame as vk::DeviceSize * self.uniform_slot_size
    }

    /// Uploads a new geometry; see [`GeometryStore::create_geometry`].
    ///
    /// # Errors
    ///
    /// Propagates geometry store errors.
    pub fn create_geometry(
        &mut self,
        vertices: &[Vertex3d],
        indices: &[u32],
    ) -> RendererResult<GeometryId> {
        self.geometry.create_geometry(vertices, indices)
    }

    /// Replaces a geometry's data; see [`GeometryStore::update_geometry`].
    ///
    /// # Errors
    ///
    /// Propagates geometry store errors.
    pub fn update_geometry(
        &mut self,
        id: GeometryId,
        vertices: &[Vertex3d],
        indices: &[u32],
    ) -> RendererResult<()> {
        self.geometry.update_geometry(id, vertices, indices)
    }

    /// Releases a geometry; see [`GeometryStore::destroy_geometry`].
    ///
    /// # Errors
    ///
    /// Propagates geometry store errors.
    pub fn destroy_geometry(&mut self, id: GeometryId) -> RendererResult<()> {
        self.geometry.destroy_geometry(id)
    }

    /// Returns where a geometry lives, if it exists.
    pub fn geometry(&self, id: GeometryId) -> Option<Geometry> {
        self.geometry.geometry(id)
    }

    /// The geometry store.
    pub fn geometry_store(&self) -> &GeometryStore<D> {
        &self.geometry
    }

    /// The frame scheduler.
    pub fn scheduler(&self) -> &FrameScheduler<D> {
        &self.scheduler
    }

    /// Uniform ring buffer handle. Changes when the ring grows.
    pub fn uniform_buffer(&self) -> vk::Buffer {
        self.uniforms.handle()
    }

    /// Uniform ring size in bytes.
    pub fn uniform_buffer_size(&self) -> vk::DeviceSize {
        self.uniforms.size()
    }

    /// The device frames are produced on.
    pub fn device(&self) -> &Arc<D> {
        &self.device
    }
}
