//! Render hardware interface.
//!
//! This crate is the device layer of the renderer. It provides:
//! - [`GraphicsDevice`], the capability trait the frame machinery is written
//!   against, with a Vulkan implementation in [`device`]
//! - instance creation and GPU selection for the Vulkan backend
//! - a first-fit range allocator ([`freelist`]) and buffers that
//!   sub-allocate from it
//! - fences, semaphores, the swapchain unit, depth attachment and render pass
//!
//! With the `mock` feature (always on for this crate's own tests), an
//! in-memory [`mock::MockDevice`] backend is available for testing code that
//! is generic over [`GraphicsDevice`].

mod error;

pub mod buffer;
pub mod depth;
pub mod device;
pub mod device_api;
pub mod freelist;
pub mod instance;
pub mod physical_device;
pub mod render_pass;
pub mod swapchain;
pub mod sync;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use device_api::{AcquiredImage, GraphicsDevice, PresentOutcome, SwapchainDesc, SwapchainImages};
pub use error::{RhiError, RhiResult};
pub use freelist::{Block, Freelist, FreelistError};

// Re-export ash types that users might need
pub use ash::vk;
