//! Device capability interface.
//!
//! [`GraphicsDevice`] is the seam between the frame machinery (fences,
//! buffers, swapchain, frame scheduling) and a concrete backend. The Vulkan
//! [`Device`](crate::device::Device) is the production implementation; tests
//! run the same code against [`MockDevice`](crate::mock::MockDevice).
//!
//! Handles are plain `ash::vk` handle types so that both backends share one
//! vocabulary. Callers are generic over `D: GraphicsDevice`, so the backend is
//! chosen at build time without dynamic dispatch.

use std::ptr::NonNull;

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::error::RhiResult;

/// Parameters for creating (or replacing) a device swapchain.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    /// Requested width in pixels.
    pub width: u32,
    /// Requested height in pixels.
    pub height: u32,
    /// Swapchain being replaced, or null for the first one.
    pub old_swapchain: vk::SwapchainKHR,
}

/// Presentable images returned by [`GraphicsDevice::create_swapchain`].
#[derive(Clone, Debug)]
pub struct SwapchainImages {
    /// Swapchain handle.
    pub handle: vk::SwapchainKHR,
    /// Images owned by the swapchain.
    pub images: Vec<vk::Image>,
    /// Color format of the images.
    pub format: vk::Format,
    /// Actual extent chosen by the surface.
    pub extent: vk::Extent2D,
}

/// Result of acquiring the next presentable image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquiredImage {
    /// An image is ready. `suboptimal` images can still be rendered to.
    Image {
        /// Index into the swapchain images.
        index: u32,
        /// The surface no longer matches the swapchain exactly.
        suboptimal: bool,
    },
    /// The swapchain no longer matches the surface and must be recreated.
    Stale,
}

/// Result of presenting an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally.
    Presented,
    /// Presented, but the swapchain should be recreated.
    Suboptimal,
    /// Not presented; the swapchain must be recreated.
    Stale,
}

impl PresentOutcome {
    /// Whether the swapchain should be rebuilt after this present.
    #[inline]
    pub fn needs_recreate(self) -> bool {
        !matches!(self, PresentOutcome::Presented)
    }
}

/// Operations the renderer core needs from a graphics device.
///
/// Destroy functions take handles previously returned by the matching
/// create function of the same device. Device-side resources must not be in
/// use by the GPU when they are destroyed; callers wait for idle first.
pub trait GraphicsDevice: Send + Sync {
    // Synchronization

    /// Creates a fence, optionally already signaled.
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;

    /// Destroys a fence.
    fn destroy_fence(&self, fence: vk::Fence);

    /// Blocks until `fence` is signaled or `timeout` nanoseconds pass.
    ///
    /// Returns `Ok(true)` when signaled and `Ok(false)` on timeout.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> RhiResult<bool>;

    /// Returns a fence to the unsignaled state.
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;

    /// Creates a binary semaphore.
    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;

    /// Destroys a semaphore.
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Blocks until all queued work on the device has completed.
    fn wait_idle(&self) -> RhiResult<()>;

    // Presentation

    /// Creates a swapchain for the device's surface.
    fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<SwapchainImages>;

    /// Destroys a swapchain. Its images go with it.
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    /// Acquires the next presentable image, signaling `semaphore` and/or
    /// `fence` (either may be null) when it is ready.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> RhiResult<AcquiredImage>;

    /// Submits one command buffer to the graphics queue.
    ///
    /// The submission waits on `wait_semaphore` at the color-attachment
    /// output stage, signals `signal_semaphore` and then `fence`.
    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait_semaphore: vk::Semaphore,
        signal_semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> RhiResult<()>;

    /// Queues `image_index` for presentation once `wait_semaphore` signals.
    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        wait_semaphore: vk::Semaphore,
        image_index: u32,
    ) -> RhiResult<PresentOutcome>;

    // Images and attachments

    /// Whether `format` can be used as an optimal-tiling depth attachment.
    fn supports_depth_format(&self, format: vk::Format) -> bool;

    /// Creates a 2D view of `image`.
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView>;

    /// Destroys an image view.
    fn destroy_image_view(&self, view: vk::ImageView);

    /// Creates a device-local depth image with its own memory.
    fn create_depth_image(&self, format: vk::Format, extent: vk::Extent2D)
    -> RhiResult<vk::Image>;

    /// Destroys a depth image and releases its memory.
    fn destroy_depth_image(&self, image: vk::Image);

    /// Creates a single-subpass render pass with one color and one depth
    /// attachment. Color is cleared on load and left ready for presentation.
    fn create_render_pass(
        &self,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RhiResult<vk::RenderPass>;

    /// Destroys a render pass.
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);

    /// Creates a framebuffer over `attachments` for `render_pass`.
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer>;

    /// Destroys a framebuffer.
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Command recording

    /// Allocates `count` primary command buffers that can be reset individually.
    fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>>;

    /// Returns command buffers to the pool.
    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);

    /// Resets `command_buffer` and begins recording.
    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    /// Finishes recording.
    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()>;

    /// Sets the dynamic viewport and scissor to cover `extent`.
    fn cmd_set_viewport_scissor(&self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D);

    /// Begins `render_pass` on `framebuffer`, clearing color and depth.
    fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    );

    /// Ends the current render pass.
    fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer);

    // Memory

    /// Creates a buffer with dedicated backing memory at `location`.
    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RhiResult<vk::Buffer>;

    /// Destroys a buffer and releases its memory.
    fn destroy_buffer(&self, buffer: vk::Buffer);

    /// Maps a host-visible buffer, returning a pointer to its first byte.
    ///
    /// The pointer stays valid until [`unmap_buffer`](Self::unmap_buffer) or
    /// [`destroy_buffer`](Self::destroy_buffer) is called for the buffer.
    fn map_buffer(&self, buffer: vk::Buffer) -> RhiResult<NonNull<u8>>;

    /// Releases a mapping obtained from [`map_buffer`](Self::map_buffer).
    fn unmap_buffer(&self, buffer: vk::Buffer);

    /// Copies `region` from `src` to `dst` on the device and waits for the
    /// copy to finish before returning.
    fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy)
    -> RhiResult<()>;
}
