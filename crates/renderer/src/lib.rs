//! Frame production for the renderer.
//!
//! This crate turns a [`GraphicsDevice`](renderer_rhi::GraphicsDevice) into
//! a stream of presented frames:
//! - [`frame_scheduler`] paces frames in flight and keeps the swapchain in
//!   step with the window
//! - [`geometry`] stores vertex and index data in shared, growable buffers
//! - [`context`] ties both together with a per-frame uniform ring
//! - [`renderer`] bootstraps all of it on Vulkan for a window

mod error;

pub mod context;
pub mod frame_scheduler;
pub mod geometry;
pub mod renderer;

pub use context::{FramePacket, GlobalUniform, RenderContext};
pub use error::{RendererError, RendererResult};
pub use frame_scheduler::{FrameScheduler, SwapchainState};
pub use geometry::{Geometry, GeometryId, GeometryStore, Vertex3d};
pub use renderer::Renderer;
