//! Swapchain unit.
//!
//! A [`Swapchain`] owns everything whose lifetime is tied to one device
//! swapchain: the presentable images and their views, the depth attachment
//! and the framebuffers. It is replaced wholesale on resize or when the
//! surface goes stale; nothing inside it is patched in place.
//!
//! The surface-facing choices (format, present mode, extent, image count)
//! live here as free functions so the Vulkan backend can apply them when it
//! creates the device swapchain.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use renderer_rhi::device::Device;
//! use renderer_rhi::render_pass::RenderPass;
//! use renderer_rhi::swapchain::Swapchain;
//!
//! # fn example(device: Arc<Device>) -> Result<(), renderer_rhi::RhiError> {
//! let mut swapchain = Swapchain::new(device.clone(), 800, 600, None)?;
//! let render_pass = RenderPass::new(device.clone(), swapchain.format(), swapchain.depth_format())?;
//! swapchain.create_framebuffers(&render_pass)?;
//!
//! // On resize, build the replacement from the old one
//! let mut resized = Swapchain::new(device, 1024, 768, Some(&swapchain))?;
//! resized.create_framebuffers(&render_pass)?;
//! drop(swapchain);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::depth::{DepthAttachment, select_depth_format};
use crate::device_api::{GraphicsDevice, SwapchainDesc};
use crate::error::RhiResult;
use crate::render_pass::RenderPass;

/// Swapchain surface support details.
///
/// Contains information about what the surface supports for swapchain creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    /// Surface capabilities (min/max image count, extents, transforms, etc.)
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats (format and color space combinations)
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes (FIFO, MAILBOX, IMMEDIATE, etc.)
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries swapchain support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the queries fail.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        debug!(
            "Swapchain support: {} formats, {} present modes, image count: {}-{}",
            formats.len(),
            present_modes.len(),
            capabilities.min_image_count,
            max_image_count_label(&capabilities)
        );

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// Whether at least one format and one present mode are available.
    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// One device swapchain with its views, depth attachment and framebuffers.
///
/// # Resource Destruction
///
/// Resources are destroyed in the following order:
/// 1. Framebuffers
/// 2. Depth attachment
/// 3. Color image views
/// 4. Device swapchain (its images go with it)
pub struct Swapchain<D: GraphicsDevice> {
    device: Arc<D>,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth: Option<DepthAttachment<D>>,
    framebuffers: Vec<vk::Framebuffer>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl<D: GraphicsDevice> Swapchain<D> {
    /// Creates a swapchain unit of roughly `width` x `height` pixels.
    ///
    /// Framebuffers are not created here; call
    /// [`create_framebuffers`](Self::create_framebuffers) once a compatible
    /// render pass exists.
    ///
    /// # Arguments
    ///
    /// * `device` - The owning device
    /// * `width` - Desired width (the surface may impose another)
    /// * `height` - Desired height
    /// * `old` - Swapchain being replaced, handed to the device for reuse.
    ///   The caller drops it after this returns.
    ///
    /// # Errors
    ///
    /// - [`RhiError::NoSupportedDepthFormat`](crate::RhiError::NoSupportedDepthFormat)
    ///   if no depth format candidate is supported
    /// - any device error during creation
    ///
    /// Everything created before a failure is released.
    pub fn new(
        device: Arc<D>,
        width: u32,
        height: u32,
        old: Option<&Swapchain<D>>,
    ) -> RhiResult<Self> {
        let desc = SwapchainDesc {
            width,
            height,
            old_swapchain: old.map_or(vk::SwapchainKHR::null(), |s| s.swapchain),
        };
        let created = device.create_swapchain(&desc)?;

        // From here on Drop releases whatever was created if a step fails.
        let mut swapchain = Self {
            device: device.clone(),
            swapchain: created.handle,
            images: created.images,
            image_views: Vec::new(),
            depth: None,
            framebuffers: Vec::new(),
            format: created.format,
            extent: created.extent,
        };

        for &image in &swapchain.images {
            let view = device.create_image_view(
                image,
                swapchain.format,
                vk::ImageAspectFlags::COLOR,
            )?;
            swapchain.image_views.push(view);
        }

        let depth_format = select_depth_format(device.as_ref())?;
        swapchain.depth = Some(DepthAttachment::new(
            device,
            swapchain.extent,
            depth_format,
        )?);

        info!(
            "Swapchain ready: {}x{}, {:?}, {} images, {} frames in flight",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.format,
            swapchain.image_count(),
            swapchain.max_frames_in_flight()
        );

        Ok(swapchain)
    }

    /// Builds one framebuffer per image from its color view and the depth view.
    ///
    /// Existing framebuffers are destroyed first.
    ///
    /// # Errors
    ///
    /// Returns an error if framebuffer creation fails.
    pub fn create_framebuffers(&mut self, render_pass: &RenderPass<D>) -> RhiResult<()> {
        self.destroy_framebuffers();

        let depth_view = self.depth_view();
        for &view in &self.image_views {
            let framebuffer = self.device.create_framebuffer(
                render_pass.handle(),
                &[view, depth_view],
                self.extent,
            )?;
            self.framebuffers.push(framebuffer);
        }

        debug!("Created {} framebuffers", self.framebuffers.len());
        Ok(())
    }

    fn destroy_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            self.device.destroy_framebuffer(framebuffer);
        }
    }

    /// Returns the swapchain handle.
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    /// Returns the color image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the depth attachment format.
    #[inline]
    pub fn depth_format(&self) -> vk::Format {
        self.depth
            .as_ref()
            .map_or(vk::Format::UNDEFINED, DepthAttachment::format)
    }

    fn depth_view(&self) -> vk::ImageView {
        self.depth
            .as_ref()
            .map_or(vk::ImageView::null(), DepthAttachment::image_view)
    }

    /// Returns the swapchain extent (resolution).
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the number of presentable images.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Frames that may be recorded ahead of presentation: one fewer than
    /// the image count, never less than one.
    #[inline]
    pub fn max_frames_in_flight(&self) -> u32 {
        self.image_count().saturating_sub(1).max(1)
    }

    /// Returns the color view at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    /// Returns the framebuffer for image `index`, if framebuffers exist.
    #[inline]
    pub fn framebuffer(&self, index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index).copied()
    }

    /// Number of framebuffers currently built.
    #[inline]
    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }
}

impl<D: GraphicsDevice> Drop for Swapchain<D> {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        self.depth = None;
        for view in self.image_views.drain(..) {
            self.device.destroy_image_view(view);
        }
        self.device.destroy_swapchain(self.swapchain);

        info!(
            "Swapchain destroyed (was {}x{}, {} images)",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );
    }
}

fn max_image_count_label(capabilities: &vk::SurfaceCapabilitiesKHR) -> String {
    if capabilities.max_image_count == 0 {
        "unlimited".to_string()
    } else {
        capabilities.max_image_count.to_string()
    }
}

/// Picks the surface format.
///
/// B8G8R8A8_SRGB / SRGB_NONLINEAR first, then B8G8R8A8_UNORM, then whatever
/// the surface lists first.
pub(crate) fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let find = |format: vk::Format| {
        formats.iter().copied().find(|f| {
            f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
    };

    if let Some(format) = find(vk::Format::B8G8R8A8_SRGB) {
        debug!("Selected surface format B8G8R8A8_SRGB");
        return format;
    }
    if let Some(format) = find(vk::Format::B8G8R8A8_UNORM) {
        warn!("Falling back to surface format B8G8R8A8_UNORM");
        return format;
    }

    let first = formats.first().copied().unwrap_or_default();
    warn!("Using first available surface format: {:?}", first.format);
    first
}

/// Picks MAILBOX when offered, otherwise FIFO (always available).
pub(crate) fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        debug!("Selected MAILBOX present mode");
        vk::PresentModeKHR::MAILBOX
    } else {
        debug!("Selected FIFO present mode");
        vk::PresentModeKHR::FIFO
    }
}

/// Uses the surface's current extent when it has one, otherwise clamps the
/// requested size into the supported range.
pub(crate) fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    let extent = vk::Extent2D {
        width: width.clamp(min.width, max.width),
        height: height.clamp(min.height, max.height),
    };

    debug!(
        "Clamped extent {}x{} -> {}x{}",
        width, height, extent.width, extent.height
    );
    extent
}

/// One image above the minimum, capped by the maximum when there is one.
pub(crate) fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    let image_count = if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    };

    debug!(
        "Image count: {} (min: {}, max: {})",
        image_count,
        capabilities.min_image_count,
        max_image_count_label(capabilities)
    );
    image_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RhiError;
    use crate::mock::{MockDevice, MockEvent};

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_SRGB);

        let selected = choose_surface_format(&formats[..2]);
        assert_eq!(selected.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_choose_surface_format_fallback() {
        let formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];

        let selected = choose_surface_format(&formats);
        assert_eq!(selected.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (1920, 1080));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 2000,
                height: 2000,
            },
            ..Default::default()
        };

        let extent = choose_extent(&capabilities, 3000, 50);
        assert_eq!((extent.width, extent.height), (2000, 100));

        let extent = choose_extent(&capabilities, 800, 600);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_determine_image_count() {
        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&capped), 2);

        let unlimited = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&unlimited), 3);
    }

    #[test]
    fn test_swapchain_support_details_is_adequate() {
        let adequate = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR::default()],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(adequate.is_adequate());

        let no_modes = SwapchainSupportDetails {
            present_modes: vec![],
            ..adequate
        };
        assert!(!no_modes.is_adequate());
    }

    #[test]
    fn test_new_builds_views_and_depth() {
        let device = Arc::new(MockDevice::with_image_count(3));
        let swapchain = Swapchain::new(device.clone(), 800, 600, None).unwrap();

        assert_eq!(swapchain.image_count(), 3);
        assert_eq!(swapchain.max_frames_in_flight(), 2);
        assert_eq!(swapchain.depth_format(), vk::Format::D32_SFLOAT);
        assert_eq!(swapchain.extent().width, 800);
        assert_eq!(swapchain.framebuffer_count(), 0);
        // swapchain + 3 views + depth image + depth view
        assert_eq!(device.live_objects(), 6);
    }

    #[test]
    fn test_max_frames_in_flight_floor() {
        let device = Arc::new(MockDevice::with_image_count(1));
        let swapchain = Swapchain::new(device, 64, 64, None).unwrap();
        assert_eq!(swapchain.max_frames_in_flight(), 1);
    }

    #[test]
    fn test_no_depth_format_is_fatal_and_clean() {
        let device = Arc::new(MockDevice::new().with_depth_formats(&[]));
        let result = Swapchain::new(device.clone(), 800, 600, None);

        assert!(matches!(result, Err(RhiError::NoSupportedDepthFormat)));
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_framebuffers_and_teardown() {
        let device = Arc::new(MockDevice::with_image_count(3));
        let mut swapchain = Swapchain::new(device.clone(), 800, 600, None).unwrap();
        let render_pass = RenderPass::new(
            device.clone(),
            swapchain.format(),
            swapchain.depth_format(),
        )
        .unwrap();

        swapchain.create_framebuffers(&render_pass).unwrap();
        assert_eq!(swapchain.framebuffer_count(), 3);
        assert!(swapchain.framebuffer(2).is_some());
        assert!(swapchain.framebuffer(3).is_none());

        // Rebuilding replaces rather than accumulates
        swapchain.create_framebuffers(&render_pass).unwrap();
        assert_eq!(swapchain.framebuffer_count(), 3);

        let handle = swapchain.handle();
        drop(swapchain);
        drop(render_pass);
        assert_eq!(device.live_objects(), 0);
        assert!(device.events().contains(&MockEvent::DestroySwapchain(handle)));
    }

    #[test]
    fn test_replacement_passes_old_handle() {
        let device = Arc::new(MockDevice::new());
        let first = Swapchain::new(device.clone(), 800, 600, None).unwrap();
        let second = Swapchain::new(device.clone(), 1024, 768, Some(&first)).unwrap();
        drop(first);

        assert_eq!(second.extent().width, 1024);
        assert_eq!(
            device.count_events(|e| matches!(e, MockEvent::CreateSwapchain { .. })),
            2
        );
    }
}
