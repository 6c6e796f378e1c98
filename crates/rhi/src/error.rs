//! RHI-specific error types.

use thiserror::Error;

use crate::freelist::FreelistError;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// Range allocation failure inside a sub-allocated buffer
    #[error("Freelist error: {0}")]
    Freelist(#[from] FreelistError),

    /// No suitable GPU found
    #[error("No suitable GPU found")]
    NoSuitableGpu,

    /// None of the depth format candidates is supported by the device
    #[error("No supported depth format")]
    NoSupportedDepthFormat,

    /// Surface creation error
    #[error("Surface error: {0}")]
    SurfaceError(String),

    /// Swapchain error
    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    /// Invalid handle error
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// An operation was called in a state that does not allow it
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl RhiError {
    /// Whether this is a range allocator out-of-space condition.
    ///
    /// Callers use this to decide between growing a buffer and failing.
    pub fn is_out_of_space(&self) -> bool {
        matches!(self, RhiError::Freelist(FreelistError::OutOfSpace { .. }))
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_space_detection() {
        let err: RhiError = FreelistError::OutOfSpace {
            requested: 10,
            free: 0,
        }
        .into();
        assert!(err.is_out_of_space());

        let err: RhiError = FreelistError::NotFound { offset: 3 }.into();
        assert!(!err.is_out_of_space());
        assert!(!RhiError::NoSupportedDepthFormat.is_out_of_space());
    }
}
