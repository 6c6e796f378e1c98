//! Vulkan renderer bootstrap.
//!
//! [`Renderer`] creates the Vulkan instance, surface and device for a window
//! and owns the [`RenderContext`] that produces frames on them.

use std::mem::ManuallyDrop;

use tracing::info;

use renderer_core::RendererConfig;
use renderer_platform::{Surface, Window};
use renderer_rhi::device::Device;
use renderer_rhi::instance::Instance;
use renderer_rhi::physical_device::select_physical_device;

use crate::context::{FramePacket, RenderContext};
use crate::error::RendererResult;
use crate::geometry::{GeometryId, Vertex3d};

/// Vulkan renderer for a single window.
///
/// # Resource Destruction Order
///
/// 1. Render context (waits for the device, then releases the swapchain,
///    buffers and finally the device itself)
/// 2. Surface
/// 3. Instance
pub struct Renderer {
    context: ManuallyDrop<RenderContext<Device>>,
    surface: ManuallyDrop<Surface>,
    instance: ManuallyDrop<Instance>,
}

impl Renderer {
    /// Creates a renderer drawing into `window`.
    ///
    /// # Arguments
    ///
    /// * `window` - The window to render to
    /// * `config` - Startup configuration. Its size is used while the window
    ///   reports no drawable area.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or any Vulkan object cannot
    /// be created.
    pub fn new(window: &Window, config: &RendererConfig) -> RendererResult<Self> {
        config.validate()?;

        let (width, height) = if window.is_minimized() {
            (config.width, config.height)
        } else {
            (window.width(), window.height())
        };
        info!("Initializing Vulkan renderer ({}x{})", width, height);

        let extensions = window.required_extensions()?;
        let instance = Instance::new(
            &config.application_name,
            config.enable_validation,
            &extensions,
        )?;

        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;

        let device = Device::new(&instance, &physical_device_info, surface.handle())?;

        let context = RenderContext::new(device, width, height, config)?;

        info!(
            "Renderer initialized on {}: {} swapchain images, {} frames in flight",
            physical_device_info.device_name(),
            context.scheduler().image_count(),
            context.scheduler().max_frames_in_flight()
        );

        Ok(Self {
            context: ManuallyDrop::new(context),
            surface: ManuallyDrop::new(surface),
            instance: ManuallyDrop::new(instance),
        })
    }

    /// Notifies the renderer that the window has been resized.
    ///
    /// The swapchain is rebuilt at the start of the next frame.
    pub fn resized(&mut self, width: u32, height: u32) {
        self.context.resized(width, height);
    }

    /// Produces one frame. Returns whether it was presented.
    ///
    /// # Errors
    ///
    /// Returns an error if a device operation fails.
    pub fn draw_frame(&mut self, packet: &FramePacket) -> RendererResult<bool> {
        self.context.draw_frame(packet)
    }

    /// Uploads a geometry.
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is empty or the upload fails.
    pub fn create_geometry(
        &mut self,
        vertices: &[Vertex3d],
        indices: &[u32],
    ) -> RendererResult<GeometryId> {
        self.context.create_geometry(vertices, indices)
    }

    /// The render context.
    pub fn context(&self) -> &RenderContext<Device> {
        &self.context
    }

    /// The render context, mutably.
    pub fn context_mut(&mut self) -> &mut RenderContext<Device> {
        &mut self.context
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // SAFETY: each field is dropped exactly once, here, and never used
        // afterwards. The context holds the last reference to the device,
        // which must go before the surface and instance it was created from.
        unsafe {
            ManuallyDrop::drop(&mut self.context);
            ManuallyDrop::drop(&mut self.surface);
            ManuallyDrop::drop(&mut self.instance);
        }

        info!("Renderer destroyed");
    }
}
