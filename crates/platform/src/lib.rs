//! Platform layer for the renderer.
//!
//! Wraps a winit window and creates the Vulkan surface and instance
//! extension list it needs.

mod window;

pub use window::{Surface, Window, aspect_ratio};

// Re-export winit types that hosts need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
