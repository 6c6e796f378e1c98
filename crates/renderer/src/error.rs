//! Renderer error types.

use thiserror::Error;

use renderer_rhi::RhiError;

use crate::geometry::GeometryId;

/// Errors raised above the device layer.
#[derive(Error, Debug)]
pub enum RendererError {
    /// Device layer error
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Window, surface or configuration error
    #[error(transparent)]
    Core(#[from] renderer_core::Error),

    /// The geometry was destroyed or never existed
    #[error("Unknown geometry {0:?}")]
    UnknownGeometry(GeometryId),

    /// Geometry needs at least one vertex and one index
    #[error("Geometry must have at least one vertex and one index")]
    EmptyGeometry,

    /// More vertices or indices than a draw can address
    #[error("Geometry has {0} elements, more than a u32 can count")]
    GeometryTooLarge(usize),
}

/// Result type alias for renderer operations.
pub type RendererResult<T> = std::result::Result<T, RendererError>;
