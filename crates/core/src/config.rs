//! Renderer configuration.
//!
//! [`RendererConfig`] gathers every tunable the renderer reads at startup:
//! initial surface size, validation, the fence wait timeout and the initial
//! capacity of the geometry and uniform buffers.
//!
//! # Example
//!
//! ```
//! use renderer_core::RendererConfig;
//!
//! let config = RendererConfig::default()
//!     .with_size(1920, 1080)
//!     .with_validation(false);
//! config.validate().expect("valid config");
//! ```

use crate::error::{Error, Result};

/// Environment variable overriding the initial width.
pub const ENV_WIDTH: &str = "RENDERER_WIDTH";
/// Environment variable overriding the initial height.
pub const ENV_HEIGHT: &str = "RENDERER_HEIGHT";
/// Environment variable toggling validation layers (`1`/`0`/`true`/`false`).
pub const ENV_VALIDATION: &str = "RENDERER_VALIDATION";

/// Startup configuration for the renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    /// Application name reported to the driver.
    pub application_name: String,
    /// Initial surface width in pixels.
    pub width: u32,
    /// Initial surface height in pixels.
    pub height: u32,
    /// Enable Vulkan validation layers when available.
    pub enable_validation: bool,
    /// Timeout for in-flight fence waits, in nanoseconds.
    pub fence_timeout_ns: u64,
    /// Initial capacity of the shared vertex buffer in bytes.
    pub vertex_buffer_size: u64,
    /// Initial capacity of the shared index buffer in bytes.
    pub index_buffer_size: u64,
    /// Bytes reserved per frame slot in the uniform ring.
    pub uniform_slot_size: u64,
    /// Color the render pass clears to.
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Vulkan Renderer".to_string(),
            width: 1280,
            height: 720,
            enable_validation: cfg!(debug_assertions),
            fence_timeout_ns: u64::MAX,
            vertex_buffer_size: 1024 * 1024,
            index_buffer_size: 1024 * 1024,
            uniform_slot_size: 256,
            clear_color: [0.1, 0.1, 0.15, 1.0],
        }
    }
}

impl RendererConfig {
    /// Builds a config from the defaults overlaid with `RENDERER_*` variables.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-provided lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_WIDTH) {
            config.width = parse_u32(ENV_WIDTH, &value)?;
        }
        if let Some(value) = lookup(ENV_HEIGHT) {
            config.height = parse_u32(ENV_HEIGHT, &value)?;
        }
        if let Some(value) = lookup(ENV_VALIDATION) {
            config.enable_validation = parse_bool(ENV_VALIDATION, &value)?;
        }

        Ok(config)
    }

    /// Sets the initial surface size.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enables or disables validation layers.
    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Sets the in-flight fence wait timeout.
    pub fn with_fence_timeout(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }

    /// Sets the initial vertex and index buffer capacities.
    pub fn with_geometry_capacity(mut self, vertex_bytes: u64, index_bytes: u64) -> Self {
        self.vertex_buffer_size = vertex_bytes;
        self.index_buffer_size = index_bytes;
        self
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.application_name.is_empty() {
            return Err(Error::Config("application name must not be empty".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::Config(format!(
                "initial size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fence_timeout_ns == 0 {
            return Err(Error::Config("fence timeout must be non-zero".into()));
        }
        if self.vertex_buffer_size == 0 || self.index_buffer_size == 0 {
            return Err(Error::Config(
                "geometry buffer sizes must be non-zero".into(),
            ));
        }
        if self.uniform_slot_size == 0 {
            return Err(Error::Config("uniform slot size must be non-zero".into()));
        }
        Ok(())
    }
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{key}={value:?}: {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key}={value:?}: expected a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        RendererConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_size() {
        let config = RendererConfig::default().with_size(0, 600);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = RendererConfig::default().with_fence_timeout(0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_buffers() {
        let config = RendererConfig::default().with_geometry_capacity(0, 1024);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = RendererConfig::from_lookup(|key| match key {
            ENV_WIDTH => Some("800".to_string()),
            ENV_HEIGHT => Some(" 600 ".to_string()),
            ENV_VALIDATION => Some("off".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.width, 800);
        assert_eq!(config.height, 600);
        assert!(!config.enable_validation);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = RendererConfig::from_lookup(|key| {
            (key == ENV_WIDTH).then(|| "wide".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));

        let result = RendererConfig::from_lookup(|key| {
            (key == ENV_VALIDATION).then(|| "maybe".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
