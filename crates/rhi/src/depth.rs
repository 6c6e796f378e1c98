//! Depth attachment management.
//!
//! [`DepthAttachment`] owns a device-local depth image and its view, sized to
//! the swapchain. The format is picked from [`DEPTH_FORMAT_CANDIDATES`] by
//! [`select_depth_format`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use renderer_rhi::device::Device;
//! use renderer_rhi::depth::{DepthAttachment, select_depth_format};
//! use ash::vk;
//!
//! # fn example(device: Arc<Device>) -> Result<(), renderer_rhi::RhiError> {
//! let format = select_depth_format(device.as_ref())?;
//! let depth = DepthAttachment::new(device, vk::Extent2D { width: 1920, height: 1080 }, format)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info};

use crate::device_api::GraphicsDevice;
use crate::error::{RhiError, RhiResult};

/// Depth formats in descending order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Returns the first supported entry of [`DEPTH_FORMAT_CANDIDATES`].
///
/// # Errors
///
/// Returns [`RhiError::NoSupportedDepthFormat`] if the device supports none
/// of them. Rendering cannot continue without a depth attachment.
pub fn select_depth_format<D: GraphicsDevice>(device: &D) -> RhiResult<vk::Format> {
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| device.supports_depth_format(format))
        .ok_or_else(|| {
            error!(
                "None of the depth formats {:?} is supported",
                DEPTH_FORMAT_CANDIDATES
            );
            RhiError::NoSupportedDepthFormat
        })
}

/// Whether `format` carries a stencil component.
#[inline]
pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Image aspect to use for views of a depth image in `format`.
pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    if has_stencil_component(format) {
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
    } else {
        vk::ImageAspectFlags::DEPTH
    }
}

/// Depth image and view used as the depth attachment of every framebuffer.
///
/// # Resource Destruction
///
/// Resources are destroyed in the following order:
/// 1. Image view
/// 2. Image (with its memory)
pub struct DepthAttachment<D: GraphicsDevice> {
    device: Arc<D>,
    image: vk::Image,
    image_view: vk::ImageView,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl<D: GraphicsDevice> DepthAttachment<D> {
    /// Creates a depth attachment covering `extent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the extent is zero or image or view creation fails.
    pub fn new(device: Arc<D>, extent: vk::Extent2D, format: vk::Format) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidOperation(
                "Depth attachment dimensions must be greater than 0".to_string(),
            ));
        }

        let image = device.create_depth_image(format, extent)?;
        let image_view = match device.create_image_view(image, format, depth_aspect(format)) {
            Ok(view) => view,
            Err(e) => {
                device.destroy_depth_image(image);
                return Err(e);
            }
        };

        info!(
            "Created depth attachment: {}x{} ({:?})",
            extent.width, extent.height, format
        );

        Ok(Self {
            device,
            image,
            image_view,
            format,
            extent,
        })
    }

    /// Returns the depth image handle.
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    /// Returns the depth image view handle.
    #[inline]
    pub fn image_view(&self) -> vk::ImageView {
        self.image_view
    }

    /// Returns the depth format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the attachment extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl<D: GraphicsDevice> Drop for DepthAttachment<D> {
    fn drop(&mut self) {
        self.device.destroy_image_view(self.image_view);
        self.device.destroy_depth_image(self.image);

        debug!(
            "Destroyed depth attachment: {}x{}",
            self.extent.width, self.extent.height
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    #[test]
    fn test_prefers_first_candidate() {
        let device = MockDevice::new();
        assert_eq!(select_depth_format(&device).unwrap(), vk::Format::D32_SFLOAT);
    }

    #[test]
    fn test_falls_back_in_order() {
        let device = MockDevice::new().with_depth_formats(&[
            vk::Format::D24_UNORM_S8_UINT,
            vk::Format::D32_SFLOAT_S8_UINT,
        ]);
        assert_eq!(
            select_depth_format(&device).unwrap(),
            vk::Format::D32_SFLOAT_S8_UINT
        );
    }

    #[test]
    fn test_no_supported_format() {
        let device = MockDevice::new().with_depth_formats(&[vk::Format::D16_UNORM]);
        assert!(matches!(
            select_depth_format(&device),
            Err(RhiError::NoSupportedDepthFormat)
        ));
    }

    #[test]
    fn test_stencil_aspect() {
        assert_eq!(
            depth_aspect(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert!(depth_aspect(vk::Format::D24_UNORM_S8_UINT).contains(vk::ImageAspectFlags::STENCIL));
    }

    #[test]
    fn test_zero_extent_rejected() {
        let device = Arc::new(MockDevice::new());
        let result = DepthAttachment::new(
            device.clone(),
            vk::Extent2D {
                width: 0,
                height: 600,
            },
            vk::Format::D32_SFLOAT,
        );
        assert!(result.is_err());
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_drop_releases_image_and_view() {
        let device = Arc::new(MockDevice::new());
        let depth = DepthAttachment::new(
            device.clone(),
            vk::Extent2D {
                width: 800,
                height: 600,
            },
            vk::Format::D32_SFLOAT,
        )
        .unwrap();
        assert_eq!(device.live_objects(), 2);
        drop(depth);
        assert_eq!(device.live_objects(), 0);
    }
}
