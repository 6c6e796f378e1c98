//! Frame scheduling and swapchain lifecycle.
//!
//! [`FrameScheduler`] drives the per-frame loop against any
//! [`GraphicsDevice`]:
//!
//! - waits for the frame slot's fence before reusing its resources
//! - acquires a swapchain image and begins its command buffer and render pass
//! - submits and presents, then advances to the next slot
//! - rebuilds the swapchain when the window is resized or the surface
//!   goes stale
//!
//! # Frames in flight
//!
//! The number of frame slots is one fewer than the number of swapchain
//! images (at least one). Each slot owns a fence and two semaphores; each
//! image owns a command buffer. Because acquisition order is decided by the
//! presentation engine, two slots can land on the same image. The scheduler
//! records which slot last submitted work for each image and waits for that
//! slot's fence before re-recording the image's command buffer.
//!
//! ```text
//! begin_frame:  wait fence[slot] -> acquire(image_available[slot])
//!               -> wait fence[images_in_flight[image]] if another slot
//!               -> begin cmd[image] -> begin render pass
//! end_frame:    end render pass -> end cmd[image]
//!               -> reset fence[slot] -> submit -> present -> slot += 1
//! ```
//!
//! # Resize
//!
//! [`resized`](FrameScheduler::resized) only records the new size and bumps a
//! generation counter. The next [`begin_frame`](FrameScheduler::begin_frame)
//! compares it against the generation of the last rebuild, so any number of
//! resize events between two frames cost one swapchain recreation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use renderer_core::RendererConfig;
//! use renderer_rhi::device::Device;
//! use renderer_renderer::frame_scheduler::FrameScheduler;
//!
//! # fn example(device: Arc<Device>) -> Result<(), renderer_rhi::RhiError> {
//! let config = RendererConfig::default();
//! let mut scheduler = FrameScheduler::new(device, 1280, 720, &config)?;
//!
//! loop {
//!     if scheduler.begin_frame(0.016)? {
//!         // Record draws into scheduler.command_buffer()
//!         scheduler.end_frame(0.016)?;
//!     }
//!     # break;
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, trace, warn};

use renderer_core::RendererConfig;
use renderer_rhi::render_pass::RenderPass;
use renderer_rhi::swapchain::Swapchain;
use renderer_rhi::sync::{Fence, Semaphore};
use renderer_rhi::{AcquiredImage, GraphicsDevice, RhiError, RhiResult};

/// Lifecycle of the scheduler's swapchain unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainState {
    /// Not created yet.
    Uninitialized,
    /// Frames can be produced.
    Ready,
    /// A rebuild is under way.
    Recreating,
    /// The last rebuild failed. The next `begin_frame` retries it.
    Failed,
}

impl fmt::Display for SwapchainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwapchainState::Uninitialized => "uninitialized",
            SwapchainState::Ready => "ready",
            SwapchainState::Recreating => "recreating",
            SwapchainState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-slot synchronization objects.
struct FrameSync<D: GraphicsDevice> {
    /// Signaled by acquire, waited on by submit.
    image_available: Vec<Semaphore<D>>,
    /// Signaled by submit, waited on by present.
    queue_complete: Vec<Semaphore<D>>,
    /// Signaled when a slot's submission completes.
    in_flight: Vec<Fence<D>>,
}

impl<D: GraphicsDevice> FrameSync<D> {
    fn new(device: &Arc<D>, slots: u32) -> RhiResult<Self> {
        let mut sync = Self {
            image_available: Vec::with_capacity(slots as usize),
            queue_complete: Vec::with_capacity(slots as usize),
            in_flight: Vec::with_capacity(slots as usize),
        };

        for _ in 0..slots {
            sync.image_available.push(Semaphore::new(device.clone())?);
            sync.queue_complete.push(Semaphore::new(device.clone())?);
            // Signaled so the first wait on each slot returns at once
            sync.in_flight.push(Fence::new(device.clone(), true)?);
        }

        debug!("Created sync objects for {} frame slots", slots);
        Ok(sync)
    }

    fn slots(&self) -> usize {
        self.in_flight.len()
    }
}

/// Produces frames on a swapchain and keeps the swapchain in step with the
/// window.
///
/// # Thread Safety
///
/// The scheduler is driven from a single thread. It is `Send` when the
/// device is, so it can be moved to a render thread.
pub struct FrameScheduler<D: GraphicsDevice> {
    device: Arc<D>,
    sync: FrameSync<D>,
    /// One per swapchain image.
    command_buffers: Vec<vk::CommandBuffer>,
    swapchain: Swapchain<D>,
    render_pass: RenderPass<D>,
    /// Slot that last submitted work rendering to each image.
    images_in_flight: Vec<Option<usize>>,
    current_frame: usize,
    image_index: u32,
    framebuffer_generation: u64,
    framebuffer_last_generation: u64,
    /// Size from the latest resize notification.
    cached_width: u32,
    cached_height: u32,
    /// Size the current swapchain was built for.
    width: u32,
    height: u32,
    recreating: bool,
    state: SwapchainState,
    fence_timeout: u64,
    clear_color: [f32; 4],
    frame_in_progress: bool,
}

impl<D: GraphicsDevice> FrameScheduler<D> {
    /// Creates the swapchain unit, render pass, command buffers and sync
    /// objects for a `width` x `height` surface.
    ///
    /// # Arguments
    ///
    /// * `device` - The device to render with
    /// * `width` - Initial surface width
    /// * `height` - Initial surface height
    /// * `config` - Supplies the fence timeout and clear color
    ///
    /// # Errors
    ///
    /// - [`RhiError::NoSupportedDepthFormat`] if the device supports none of
    ///   the depth format candidates
    /// - any device error during creation
    pub fn new(device: Arc<D>, width: u32, height: u32, config: &RendererConfig) -> RhiResult<Self> {
        let mut state = SwapchainState::Uninitialized;
        debug!("Frame scheduler {}", state);

        let created = Swapchain::new(device.clone(), width, height, None).and_then(|mut swapchain| {
            let render_pass =
                RenderPass::new(device.clone(), swapchain.format(), swapchain.depth_format())?;
            swapchain.create_framebuffers(&render_pass)?;
            Ok((swapchain, render_pass))
        });

        let (swapchain, render_pass) = match created {
            Ok(unit) => unit,
            Err(e) => {
                state = SwapchainState::Failed;
                error!("Frame scheduler {}: {}", state, e);
                return Err(e);
            }
        };

        let sync = FrameSync::new(&device, swapchain.max_frames_in_flight())?;
        let command_buffers = device.allocate_command_buffers(swapchain.image_count())?;
        let images_in_flight = vec![None; swapchain.image_count() as usize];

        state = SwapchainState::Ready;
        info!(
            "Frame scheduler {}: {} images, {} frames in flight",
            state,
            swapchain.image_count(),
            sync.slots()
        );

        Ok(Self {
            device,
            sync,
            command_buffers,
            swapchain,
            render_pass,
            images_in_flight,
            current_frame: 0,
            image_index: 0,
            framebuffer_generation: 0,
            framebuffer_last_generation: 0,
            cached_width: width,
            cached_height: height,
            width,
            height,
            recreating: false,
            state,
            fence_timeout: config.fence_timeout_ns,
            clear_color: config.clear_color,
            frame_in_progress: false,
        })
    }

    /// Records a new surface size. The swapchain is rebuilt at the start of
    /// the next frame.
    ///
    /// Zero-sized dimensions (a minimized window) are ignored.
    pub fn resized(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            debug!("Ignoring resize to zero dimensions");
            return;
        }

        self.cached_width = width;
        self.cached_height = height;
        self.framebuffer_generation += 1;

        debug!(
            "Resize to {}x{} recorded (generation {})",
            width, height, self.framebuffer_generation
        );
    }

    /// Starts a frame.
    ///
    /// Returns `Ok(true)` when an image was acquired and its render pass has
    /// begun; [`end_frame`](Self::end_frame) must follow. Returns `Ok(false)`
    /// when the frame is skipped: the swapchain was rebuilt, the surface went
    /// stale, or the slot's fence did not signal within the timeout.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidOperation`] if a frame is already in progress
    /// - [`RhiError::VulkanError`] with `TIMEOUT` if another slot's frame on
    ///   the acquired image never completes
    /// - any device error during acquisition or recreation
    pub fn begin_frame(&mut self, delta_time: f32) -> RhiResult<bool> {
        if self.frame_in_progress {
            error!("begin_frame called while a frame is in progress");
            return Err(RhiError::InvalidOperation(
                "begin_frame called while a frame is in progress".to_string(),
            ));
        }

        if self.recreating {
            debug!("Swapchain rebuild was interrupted, waiting for device idle");
            self.device.wait_idle()?;
            self.recreating = false;
            return Ok(false);
        }

        if self.framebuffer_generation != self.framebuffer_last_generation
            || self.state == SwapchainState::Failed
        {
            self.device.wait_idle()?;
            self.recreate()?;
            return Ok(false);
        }

        let slot = self.current_frame;
        if !self.sync.in_flight[slot].wait(self.fence_timeout)? {
            warn!("Skipping frame: slot {} is still in flight", slot);
            return Ok(false);
        }

        let acquired = self.device.acquire_next_image(
            self.swapchain.handle(),
            self.fence_timeout,
            self.sync.image_available[slot].handle(),
            vk::Fence::null(),
        )?;

        match acquired {
            AcquiredImage::Stale => {
                debug!("Swapchain out of date on acquire, recreating");
                self.recreate_surface()?;
                return Ok(false);
            }
            AcquiredImage::Image { index, suboptimal } => {
                if suboptimal {
                    debug!("Acquired image {} from a suboptimal swapchain", index);
                }
                self.image_index = index;
            }
        }

        let image = self.image_index as usize;

        // The image's command buffer may still be pending for another slot
        if let Some(owner) = self.images_in_flight[image]
            && owner != slot
            && !self.sync.in_flight[owner].wait(self.fence_timeout)?
        {
            error!("Image {} is still in use by frame slot {}", image, owner);
            return Err(RhiError::VulkanError(vk::Result::TIMEOUT));
        }

        let framebuffer = self.swapchain.framebuffer(image).ok_or_else(|| {
            RhiError::InvalidOperation(format!("no framebuffer for image {}", image))
        })?;
        let command_buffer = self.command_buffers[image];
        let extent = self.swapchain.extent();

        self.device.begin_command_buffer(command_buffer)?;
        self.device.cmd_set_viewport_scissor(command_buffer, extent);
        self.device.cmd_begin_render_pass(
            command_buffer,
            self.render_pass.handle(),
            framebuffer,
            extent,
            self.clear_color,
        );

        self.frame_in_progress = true;
        trace!(slot, image, delta_time, "Frame begun");
        Ok(true)
    }

    /// Finishes the frame started by [`begin_frame`](Self::begin_frame):
    /// submits its commands, presents the image and advances to the next
    /// frame slot.
    ///
    /// Returns `Ok(false)` if presentation reported a stale or suboptimal
    /// surface; the swapchain has then been rebuilt and the frame slot still
    /// advances.
    ///
    /// # Errors
    ///
    /// - [`RhiError::InvalidOperation`] without a successful `begin_frame`
    /// - any device error during submission, presentation or recreation
    pub fn end_frame(&mut self, delta_time: f32) -> RhiResult<bool> {
        if !self.frame_in_progress {
            error!("end_frame called without a successful begin_frame");
            return Err(RhiError::InvalidOperation(
                "end_frame called without a successful begin_frame".to_string(),
            ));
        }
        self.frame_in_progress = false;

        let slot = self.current_frame;
        let image = self.image_index as usize;
        let command_buffer = self.command_buffers[image];

        self.device.cmd_end_render_pass(command_buffer);
        self.device.end_command_buffer(command_buffer)?;

        self.images_in_flight[image] = Some(slot);

        let fence = &self.sync.in_flight[slot];
        fence.reset()?;
        self.device.submit(
            command_buffer,
            self.sync.image_available[slot].handle(),
            self.sync.queue_complete[slot].handle(),
            fence.handle(),
        )?;

        let outcome = self.device.present(
            self.swapchain.handle(),
            self.sync.queue_complete[slot].handle(),
            self.image_index,
        )?;

        self.current_frame = (slot + 1) % self.sync.slots();
        trace!(slot, image, delta_time, ?outcome, "Frame ended");

        if outcome.needs_recreate() {
            debug!("Present returned {:?}, recreating swapchain", outcome);
            self.recreate_surface()?;
            return Ok(false);
        }

        Ok(true)
    }

    /// Rebuilds only the swapchain unit at the current size.
    ///
    /// Command buffers and sync objects are kept. If the image count changed,
    /// the framebuffer generation is bumped so the next frame performs a full
    /// rebuild.
    fn recreate_surface(&mut self) -> RhiResult<()> {
        self.recreating = true;
        self.state = SwapchainState::Recreating;

        match self.rebuild_surface() {
            Ok(()) => {
                self.recreating = false;
                self.state = SwapchainState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = SwapchainState::Failed;
                error!("Swapchain recreation failed: {}", e);
                Err(e)
            }
        }
    }

    fn rebuild_surface(&mut self) -> RhiResult<()> {
        self.device.wait_idle()?;

        let old_count = self.swapchain.image_count();
        self.replace_swapchain(self.width, self.height)?;

        let image_count = self.swapchain.image_count();
        self.images_in_flight = vec![None; image_count as usize];
        if image_count != old_count {
            self.framebuffer_generation += 1;
            debug!(
                "Image count changed {} -> {}, scheduling full rebuild",
                old_count, image_count
            );
        }

        info!(
            "Swapchain recreated: {}x{}",
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(())
    }

    /// Rebuilds the swapchain unit, command buffers and sync objects at the
    /// most recent resize dimensions.
    fn recreate(&mut self) -> RhiResult<()> {
        self.state = SwapchainState::Recreating;
        let generation = self.framebuffer_generation;

        match self.rebuild_all() {
            Ok(()) => {
                self.framebuffer_last_generation = generation;
                self.state = SwapchainState::Ready;
                info!(
                    "Swapchain rebuilt: {}x{}, {} images, {} frames in flight",
                    self.swapchain.extent().width,
                    self.swapchain.extent().height,
                    self.swapchain.image_count(),
                    self.sync.slots()
                );
                Ok(())
            }
            Err(e) => {
                self.state = SwapchainState::Failed;
                error!("Swapchain rebuild failed: {}", e);
                Err(e)
            }
        }
    }

    fn rebuild_all(&mut self) -> RhiResult<()> {
        let (width, height) = (self.cached_width, self.cached_height);
        self.replace_swapchain(width, height)?;
        self.width = width;
        self.height = height;

        let image_count = self.swapchain.image_count();
        let sync = FrameSync::new(&self.device, self.swapchain.max_frames_in_flight())?;
        let command_buffers = self.device.allocate_command_buffers(image_count)?;

        self.device.free_command_buffers(&self.command_buffers);
        self.command_buffers = command_buffers;
        self.sync = sync;
        self.images_in_flight = vec![None; image_count as usize];
        self.current_frame = 0;
        Ok(())
    }

    /// Builds a replacement swapchain unit and swaps it in.
    ///
    /// The render pass is kept while its formats match the new swapchain.
    fn replace_swapchain(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let mut swapchain =
            Swapchain::new(self.device.clone(), width, height, Some(&self.swapchain))?;

        if self
            .render_pass
            .is_compatible(swapchain.format(), swapchain.depth_format())
        {
            swapchain.create_framebuffers(&self.render_pass)?;
            self.swapchain = swapchain;
        } else {
            let render_pass = RenderPass::new(
                self.device.clone(),
                swapchain.format(),
                swapchain.depth_format(),
            )?;
            swapchain.create_framebuffers(&render_pass)?;
            // Old framebuffers go before the render pass they were built for
            self.swapchain = swapchain;
            self.render_pass = render_pass;
            debug!("Surface formats changed, render pass replaced");
        }
        Ok(())
    }

    /// Frame slot used by the current (or next) frame.
    #[inline]
    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    /// Swapchain image acquired by the last successful `begin_frame`.
    #[inline]
    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    /// Number of frame slots.
    #[inline]
    pub fn max_frames_in_flight(&self) -> u32 {
        self.sync.slots() as u32
    }

    /// Number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.swapchain.image_count()
    }

    /// Current swapchain extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Current swapchain lifecycle state.
    #[inline]
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    /// Bumped by every accepted resize.
    #[inline]
    pub fn framebuffer_generation(&self) -> u64 {
        self.framebuffer_generation
    }

    /// Generation the swapchain was last fully rebuilt for.
    #[inline]
    pub fn framebuffer_last_generation(&self) -> u64 {
        self.framebuffer_last_generation
    }

    /// Render pass frames are recorded in.
    #[inline]
    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.handle()
    }

    /// Command buffer being recorded, while a frame is in progress.
    pub fn command_buffer(&self) -> Option<vk::CommandBuffer> {
        self.frame_in_progress
            .then(|| self.command_buffers[self.image_index as usize])
    }

    /// Whether `begin_frame` succeeded and `end_frame` has not run yet.
    #[inline]
    pub fn is_frame_in_progress(&self) -> bool {
        self.frame_in_progress
    }

    /// Whether a surface rebuild was interrupted by an error. The next
    /// [`begin_frame`](Self::begin_frame) waits for idle and skips.
    pub fn is_recreating(&self) -> bool {
        self.recreating
    }
}

impl<D: GraphicsDevice> Drop for FrameScheduler<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            error!("Failed to wait for device idle during scheduler drop: {}", e);
        }
        self.device.free_command_buffers(&self.command_buffers);
        debug!("Frame scheduler destroyed");
    }
}
