//! Render pass wrapper.
//!
//! The renderer draws every frame in one single-subpass render pass with a
//! color attachment (cleared on load, transitioned to `PRESENT_SRC_KHR`) and
//! a depth attachment (cleared on load, contents discarded).

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device_api::GraphicsDevice;
use crate::error::RhiResult;

/// Owned render pass handle.
pub struct RenderPass<D: GraphicsDevice> {
    device: Arc<D>,
    render_pass: vk::RenderPass,
    color_format: vk::Format,
    depth_format: vk::Format,
}

impl<D: GraphicsDevice> RenderPass<D> {
    /// Creates the frame render pass for the given attachment formats.
    ///
    /// # Errors
    ///
    /// Returns an error if render pass creation fails.
    pub fn new(
        device: Arc<D>,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> RhiResult<Self> {
        let render_pass = device.create_render_pass(color_format, depth_format)?;

        debug!(
            "Created render pass (color {:?}, depth {:?})",
            color_format, depth_format
        );

        Ok(Self {
            device,
            render_pass,
            color_format,
            depth_format,
        })
    }

    /// Returns the render pass handle.
    #[inline]
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Color attachment format.
    #[inline]
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    /// Depth attachment format.
    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Whether framebuffers built for `color`/`depth` are compatible.
    pub fn is_compatible(&self, color: vk::Format, depth: vk::Format) -> bool {
        self.color_format == color && self.depth_format == depth
    }
}

impl<D: GraphicsDevice> Drop for RenderPass<D> {
    fn drop(&mut self) {
        self.device.destroy_render_pass(self.render_pass);
        debug!("Destroyed render pass");
    }
}
