//! Synchronization primitives.
//!
//! This module provides RAII wrappers for device synchronization objects:
//! - [`Semaphore`] - GPU-to-GPU synchronization (between queue operations)
//! - [`Fence`] - GPU-to-CPU synchronization (for host waiting)
//!
//! # Overview
//!
//! - **Semaphores** order queue operations: acquire signals one before
//!   rendering, submit signals one before presentation. The host never waits
//!   on them.
//!
//! - **Fences** let the host block until submitted work is done. [`Fence`]
//!   caches whether it was last seen signaled, so redundant waits and resets
//!   never reach the device.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use renderer_rhi::device::Device;
//! use renderer_rhi::sync::{Fence, Semaphore};
//!
//! # fn example(device: Arc<Device>) -> Result<(), renderer_rhi::RhiError> {
//! let image_available = Semaphore::new(device.clone())?;
//!
//! // Starts signaled so the first frame does not block
//! let in_flight = Fence::new(device, true)?;
//!
//! if in_flight.wait(u64::MAX)? {
//!     in_flight.reset()?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;
use tracing::{debug, warn};

use crate::device_api::GraphicsDevice;
use crate::error::RhiResult;

/// Binary semaphore owned by a device.
///
/// Created unsignaled and destroyed on drop.
pub struct Semaphore<D: GraphicsDevice> {
    device: Arc<D>,
    semaphore: vk::Semaphore,
}

impl<D: GraphicsDevice> Semaphore<D> {
    /// Creates a new semaphore.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<D>) -> RhiResult<Self> {
        let semaphore = device.create_semaphore()?;
        Ok(Self { device, semaphore })
    }

    /// Returns the semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl<D: GraphicsDevice> Drop for Semaphore<D> {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.semaphore);
    }
}

/// Fence with a host-side signaled cache.
///
/// The cache tracks the last state this wrapper observed:
/// - set after a successful [`wait`](Self::wait), or at creation when
///   `signaled` is requested
/// - cleared by [`reset`](Self::reset)
///
/// Work submitted with the fence does not touch the cache; callers reset the
/// fence before submitting, which clears it.
pub struct Fence<D: GraphicsDevice> {
    device: Arc<D>,
    fence: vk::Fence,
    is_signaled: AtomicBool,
}

impl<D: GraphicsDevice> Fence<D> {
    /// Creates a new fence.
    ///
    /// # Arguments
    ///
    /// * `device` - The owning device
    /// * `signaled` - If true, creates the fence in the signaled state.
    ///   Useful for fences that are waited on before the first submission
    ///   that would signal them.
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<D>, signaled: bool) -> RhiResult<Self> {
        let fence = device.create_fence(signaled)?;

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self {
            device,
            fence,
            is_signaled: AtomicBool::new(signaled),
        })
    }

    /// Returns the fence handle.
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Waits for the fence to become signaled.
    ///
    /// Returns immediately if the fence is already known to be signaled.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Timeout in nanoseconds. Use `u64::MAX` for infinite wait.
    ///
    /// # Returns
    ///
    /// `Ok(true)` once signaled, `Ok(false)` if the timeout expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the device reports a failure other than a timeout.
    pub fn wait(&self, timeout: u64) -> RhiResult<bool> {
        if self.is_signaled.load(Ordering::Acquire) {
            return Ok(true);
        }

        if self.device.wait_for_fence(self.fence, timeout)? {
            self.is_signaled.store(true, Ordering::Release);
            Ok(true)
        } else {
            warn!("Fence wait timed out after {timeout} ns");
            Ok(false)
        }
    }

    /// Resets the fence to the unsignaled state.
    ///
    /// Does nothing unless the fence is known to be signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if the device reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        if self.is_signaled.load(Ordering::Acquire) {
            self.device.reset_fence(self.fence)?;
            self.is_signaled.store(false, Ordering::Release);
        }
        Ok(())
    }

    /// Whether the fence was last observed signaled. Never blocks.
    #[inline]
    pub fn is_signaled(&self) -> bool {
        self.is_signaled.load(Ordering::Acquire)
    }
}

impl<D: GraphicsDevice> Drop for Fence<D> {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockEvent};

    fn submit_with(device: &MockDevice, fence: vk::Fence) {
        let cbs = device.allocate_command_buffers(1).unwrap();
        device
            .submit(cbs[0], vk::Semaphore::null(), vk::Semaphore::null(), fence)
            .unwrap();
        device.free_command_buffers(&cbs);
    }

    #[test]
    fn test_signaled_fence_skips_device_wait() {
        let device = Arc::new(MockDevice::new());
        let fence = Fence::new(device.clone(), true).unwrap();

        assert!(fence.is_signaled());
        assert!(fence.wait(u64::MAX).unwrap());
        assert_eq!(
            device.count_events(|e| matches!(e, MockEvent::WaitFence { .. })),
            0
        );
    }

    #[test]
    fn test_reset_is_noop_unless_signaled() {
        let device = Arc::new(MockDevice::new());
        let fence = Fence::new(device.clone(), false).unwrap();

        fence.reset().unwrap();
        assert_eq!(
            device.count_events(|e| matches!(e, MockEvent::ResetFence(_))),
            0
        );

        let fence = Fence::new(device.clone(), true).unwrap();
        fence.reset().unwrap();
        fence.reset().unwrap();
        assert!(!fence.is_signaled());
        assert_eq!(
            device.count_events(|e| matches!(e, MockEvent::ResetFence(_))),
            1
        );
    }

    #[test]
    fn test_wait_timeout_returns_false() {
        let device = Arc::new(MockDevice::new());
        let fence = Fence::new(device, false).unwrap();

        assert!(!fence.wait(1_000).unwrap());
        assert!(!fence.is_signaled());
    }

    #[test]
    fn test_wait_after_submit_sets_cache() {
        let device = Arc::new(MockDevice::new());
        let fence = Fence::new(device.clone(), true).unwrap();

        fence.reset().unwrap();
        submit_with(&device, fence.handle());

        assert!(!fence.is_signaled());
        assert!(fence.wait(u64::MAX).unwrap());
        assert!(fence.is_signaled());
        assert_eq!(device.fence_signaled(fence.handle()), Some(true));
    }

    #[test]
    fn test_drop_destroys_handles() {
        let device = Arc::new(MockDevice::new());
        {
            let _fence = Fence::new(device.clone(), false).unwrap();
            let _semaphore = Semaphore::new(device.clone()).unwrap();
            assert_eq!(device.live_objects(), 2);
        }
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence<MockDevice>>();
        assert_send_sync::<Semaphore<MockDevice>>();
    }
}
