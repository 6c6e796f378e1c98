//! In-memory [`GraphicsDevice`] for tests.
//!
//! [`MockDevice`] hands out fake handles, keeps buffer contents in host
//! memory, and records every synchronization-relevant call as a
//! [`MockEvent`] so tests can assert on ordering.
//!
//! Fence model:
//! - submitting with a fence makes it *pending*
//! - waiting on a pending fence completes the work and signals it
//! - waiting on an unsignaled fence with nothing pending reports a timeout
//! - [`wait_idle`](GraphicsDevice::wait_idle) completes all pending fences
//! - a [stalled](MockDevice::stall_fence) fence never signals until it is
//!   released, not even on `wait_idle`
//!
//! The mock also rejects misuse a real driver would flag: submitting a
//! signaled fence, resetting a pending fence, submitting a command buffer
//! that is still recording, or touching handles it never created.
//!
//! Acquire and present results can be scripted with
//! [`push_acquire`](MockDevice::push_acquire) and
//! [`push_present`](MockDevice::push_present). Unscripted acquires hand out
//! images round-robin. [`fail_next_swapchain`](MockDevice::fail_next_swapchain)
//! makes swapchain creation fail.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ptr::NonNull;
use std::sync::{Mutex, MutexGuard, PoisonError};

use ash::vk::{self, Handle};
use gpu_allocator::MemoryLocation;

use crate::device_api::{
    AcquiredImage, GraphicsDevice, PresentOutcome, SwapchainDesc, SwapchainImages,
};
use crate::error::{RhiError, RhiResult};

/// A recorded device call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockEvent {
    /// `wait_for_fence`; `signaled` is the result.
    WaitFence { fence: vk::Fence, signaled: bool },
    /// `reset_fence`.
    ResetFence(vk::Fence),
    /// `wait_idle`.
    WaitIdle,
    /// `create_swapchain`.
    CreateSwapchain {
        handle: vk::SwapchainKHR,
        width: u32,
        height: u32,
        image_count: u32,
    },
    /// `destroy_swapchain`.
    DestroySwapchain(vk::SwapchainKHR),
    /// `acquire_next_image`.
    Acquire {
        semaphore: vk::Semaphore,
        result: AcquiredImage,
    },
    /// `submit`.
    Submit {
        command_buffer: vk::CommandBuffer,
        wait_semaphore: vk::Semaphore,
        signal_semaphore: vk::Semaphore,
        fence: vk::Fence,
    },
    /// `present`.
    Present {
        image_index: u32,
        wait_semaphore: vk::Semaphore,
        outcome: PresentOutcome,
    },
    /// `begin_command_buffer`.
    BeginCommandBuffer(vk::CommandBuffer),
    /// `end_command_buffer`.
    EndCommandBuffer(vk::CommandBuffer),
    /// `cmd_set_viewport_scissor`.
    SetViewportScissor { width: u32, height: u32 },
    /// `cmd_begin_render_pass`.
    BeginRenderPass {
        framebuffer: vk::Framebuffer,
        width: u32,
        height: u32,
    },
    /// `cmd_end_render_pass`.
    EndRenderPass,
    /// `copy_buffer`.
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        src_offset: u64,
        dst_offset: u64,
        size: u64,
    },
}

#[derive(Debug, Default)]
struct MockFence {
    signaled: bool,
    pending: bool,
    stalled: bool,
}

#[derive(Debug)]
struct MockBuffer {
    data: Box<[u8]>,
    location: MemoryLocation,
    mapped: bool,
}

#[derive(Debug)]
struct MockSwapchain {
    images: Vec<vk::Image>,
    next_image: u32,
}

#[derive(Debug, Default)]
struct MockState {
    next_handle: u64,
    image_count: u32,
    supported_depth_formats: Vec<vk::Format>,
    fences: HashMap<vk::Fence, MockFence>,
    semaphores: HashSet<vk::Semaphore>,
    swapchains: HashMap<vk::SwapchainKHR, MockSwapchain>,
    image_views: HashSet<vk::ImageView>,
    depth_images: HashSet<vk::Image>,
    render_passes: HashSet<vk::RenderPass>,
    framebuffers: HashSet<vk::Framebuffer>,
    command_buffers: HashSet<vk::CommandBuffer>,
    recording: HashSet<vk::CommandBuffer>,
    buffers: HashMap<vk::Buffer, MockBuffer>,
    acquire_script: VecDeque<AcquiredImage>,
    present_script: VecDeque<PresentOutcome>,
    failing_swapchains: u32,
    events: Vec<MockEvent>,
}

impl MockState {
    fn next_raw(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// Scriptable in-memory device.
#[derive(Debug)]
pub struct MockDevice {
    state: Mutex<MockState>,
}

/// Depth formats every mock device supports unless told otherwise.
const ALL_DEPTH_FORMATS: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

impl MockDevice {
    /// Creates a mock whose swapchains have three images.
    pub fn new() -> Self {
        Self::with_image_count(3)
    }

    /// Creates a mock whose swapchains have `image_count` images.
    pub fn with_image_count(image_count: u32) -> Self {
        Self {
            state: Mutex::new(MockState {
                image_count,
                supported_depth_formats: ALL_DEPTH_FORMATS.to_vec(),
                ..Default::default()
            }),
        }
    }

    /// Restricts the depth formats reported as supported.
    pub fn with_depth_formats(self, formats: &[vk::Format]) -> Self {
        self.state().supported_depth_formats = formats.to_vec();
        self
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes the image count of swapchains created from now on.
    pub fn set_image_count(&self, image_count: u32) {
        self.state().image_count = image_count;
    }

    /// Queues the result of an upcoming `acquire_next_image`.
    pub fn push_acquire(&self, result: AcquiredImage) {
        self.state().acquire_script.push_back(result);
    }

    /// Queues the result of an upcoming `present`.
    pub fn push_present(&self, outcome: PresentOutcome) {
        self.state().present_script.push_back(outcome);
    }

    /// Makes the next `count` swapchain creations fail.
    pub fn fail_next_swapchain(&self, count: u32) {
        self.state().failing_swapchains += count;
    }

    /// Keeps `fence` from signaling: waits report a timeout until
    /// [`release_fence`](Self::release_fence) is called.
    pub fn stall_fence(&self, fence: vk::Fence) {
        if let Some(entry) = self.state().fences.get_mut(&fence) {
            entry.stalled = true;
        }
    }

    /// Lets a stalled fence signal again.
    pub fn release_fence(&self, fence: vk::Fence) {
        if let Some(entry) = self.state().fences.get_mut(&fence) {
            entry.stalled = false;
        }
    }

    /// All recorded events, oldest first.
    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }

    /// Forgets recorded events.
    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Number of recorded events matching `predicate`.
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&MockEvent) -> bool,
    {
        self.state().events.iter().filter(|e| predicate(e)).count()
    }

    /// Host copy of a buffer's contents.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        self.state()
            .buffers
            .get(&buffer)
            .map(|b| b.data.to_vec())
    }

    /// Whether a fence is currently signaled.
    pub fn fence_signaled(&self, fence: vk::Fence) -> Option<bool> {
        self.state().fences.get(&fence).map(|f| f.signaled)
    }

    /// Number of device objects that have been created and not destroyed.
    pub fn live_objects(&self) -> usize {
        let state = self.state();
        state.fences.len()
            + state.semaphores.len()
            + state.swapchains.len()
            + state.image_views.len()
            + state.depth_images.len()
            + state.render_passes.len()
            + state.framebuffers.len()
            + state.command_buffers.len()
            + state.buffers.len()
    }

    /// Number of live buffers.
    pub fn live_buffers(&self) -> usize {
        self.state().buffers.len()
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown(kind: &str, raw: u64) -> RhiError {
    RhiError::InvalidHandle(format!("unknown {kind} {raw:#x}"))
}

impl GraphicsDevice for MockDevice {
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = self.state();
        let fence = vk::Fence::from_raw(state.next_raw());
        state.fences.insert(
            fence,
            MockFence {
                signaled,
                pending: false,
                stalled: false,
            },
        );
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state().fences.remove(&fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> RhiResult<bool> {
        let mut state = self.state();
        let entry = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| unknown("fence", fence.as_raw()))?;

        if entry.pending && !entry.stalled {
            entry.pending = false;
            entry.signaled = true;
        }
        let signaled = entry.signaled && !entry.stalled;

        state.events.push(MockEvent::WaitFence { fence, signaled });
        Ok(signaled)
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        let mut state = self.state();
        let entry = state
            .fences
            .get_mut(&fence)
            .ok_or_else(|| unknown("fence", fence.as_raw()))?;

        if entry.pending {
            return Err(RhiError::InvalidOperation(
                "reset of a fence still in use by the device".into(),
            ));
        }
        entry.signaled = false;
        state.events.push(MockEvent::ResetFence(fence));
        Ok(())
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let mut state = self.state();
        let semaphore = vk::Semaphore::from_raw(state.next_raw());
        state.semaphores.insert(semaphore);
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().semaphores.remove(&semaphore);
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = self.state();
        for fence in state.fences.values_mut() {
            if fence.pending && !fence.stalled {
                fence.pending = false;
                fence.signaled = true;
            }
        }
        state.events.push(MockEvent::WaitIdle);
        Ok(())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RhiResult<SwapchainImages> {
        let mut state = self.state();
        if desc.width == 0 || desc.height == 0 {
            return Err(RhiError::SwapchainError(format!(
                "zero-sized swapchain {}x{}",
                desc.width, desc.height
            )));
        }
        if state.failing_swapchains > 0 {
            state.failing_swapchains -= 1;
            return Err(RhiError::SwapchainError("scripted swapchain failure".into()));
        }

        let handle = vk::SwapchainKHR::from_raw(state.next_raw());
        let image_count = state.image_count;
        let images: Vec<vk::Image> = (0..image_count)
            .map(|_| vk::Image::from_raw(state.next_raw()))
            .collect();

        state.swapchains.insert(
            handle,
            MockSwapchain {
                images: images.clone(),
                next_image: 0,
            },
        );
        state.events.push(MockEvent::CreateSwapchain {
            handle,
            width: desc.width,
            height: desc.height,
            image_count,
        });

        Ok(SwapchainImages {
            handle,
            images,
            format: vk::Format::B8G8R8A8_SRGB,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
        })
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut state = self.state();
        state.swapchains.remove(&swapchain);
        state.events.push(MockEvent::DestroySwapchain(swapchain));
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> RhiResult<AcquiredImage> {
        let mut state = self.state();
        let scripted = state.acquire_script.pop_front();

        let chain = state
            .swapchains
            .get_mut(&swapchain)
            .ok_or_else(|| unknown("swapchain", swapchain.as_raw()))?;

        let result = match scripted {
            Some(result) => result,
            None => {
                let index = chain.next_image;
                chain.next_image = (chain.next_image + 1) % chain.images.len() as u32;
                AcquiredImage::Image {
                    index,
                    suboptimal: false,
                }
            }
        };

        if let AcquiredImage::Image { index, .. } = result
            && index as usize >= chain.images.len()
        {
            return Err(RhiError::InvalidOperation(format!(
                "scripted image index {index} out of range"
            )));
        }

        if fence != vk::Fence::null()
            && let Some(entry) = state.fences.get_mut(&fence)
        {
            entry.signaled = true;
        }

        state.events.push(MockEvent::Acquire { semaphore, result });
        Ok(result)
    }

    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait_semaphore: vk::Semaphore,
        signal_semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> RhiResult<()> {
        let mut state = self.state();
        if !state.command_buffers.contains(&command_buffer) {
            return Err(unknown("command buffer", command_buffer.as_raw()));
        }
        if state.recording.contains(&command_buffer) {
            return Err(RhiError::InvalidOperation(
                "submitted a command buffer that is still recording".into(),
            ));
        }

        if fence != vk::Fence::null() {
            let entry = state
                .fences
                .get_mut(&fence)
                .ok_or_else(|| unknown("fence", fence.as_raw()))?;
            if entry.signaled || entry.pending {
                return Err(RhiError::InvalidOperation(
                    "submitted with a fence that was not reset".into(),
                ));
            }
            entry.pending = true;
        }

        state.events.push(MockEvent::Submit {
            command_buffer,
            wait_semaphore,
            signal_semaphore,
            fence,
        });
        Ok(())
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        wait_semaphore: vk::Semaphore,
        image_index: u32,
    ) -> RhiResult<PresentOutcome> {
        let mut state = self.state();
        if !state.swapchains.contains_key(&swapchain) {
            return Err(unknown("swapchain", swapchain.as_raw()));
        }
        let outcome = state
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented);

        state.events.push(MockEvent::Present {
            image_index,
            wait_semaphore,
            outcome,
        });
        Ok(outcome)
    }

    fn supports_depth_format(&self, format: vk::Format) -> bool {
        self.state().supported_depth_formats.contains(&format)
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView> {
        let mut state = self.state();
        let view = vk::ImageView::from_raw(state.next_raw());
        state.image_views.insert(view);
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state().image_views.remove(&view);
    }

    fn create_depth_image(
        &self,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> RhiResult<vk::Image> {
        let mut state = self.state();
        if !state.supported_depth_formats.contains(&format) {
            return Err(RhiError::InvalidOperation(format!(
                "depth format {format:?} is not supported"
            )));
        }
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidOperation("zero-sized depth image".into()));
        }
        let image = vk::Image::from_raw(state.next_raw());
        state.depth_images.insert(image);
        Ok(image)
    }

    fn destroy_depth_image(&self, image: vk::Image) {
        self.state().depth_images.remove(&image);
    }

    fn create_render_pass(
        &self,
        _color_format: vk::Format,
        _depth_format: vk::Format,
    ) -> RhiResult<vk::RenderPass> {
        let mut state = self.state();
        let render_pass = vk::RenderPass::from_raw(state.next_raw());
        state.render_passes.insert(render_pass);
        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.state().render_passes.remove(&render_pass);
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> RhiResult<vk::Framebuffer> {
        let mut state = self.state();
        if !state.render_passes.contains(&render_pass) {
            return Err(unknown("render pass", render_pass.as_raw()));
        }
        if let Some(view) = attachments
            .iter()
            .find(|view| !state.image_views.contains(view))
        {
            return Err(unknown("image view", view.as_raw()));
        }
        let framebuffer = vk::Framebuffer::from_raw(state.next_raw());
        state.framebuffers.insert(framebuffer);
        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.state().framebuffers.remove(&framebuffer);
    }

    fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        let mut state = self.state();
        let buffers: Vec<vk::CommandBuffer> = (0..count)
            .map(|_| vk::CommandBuffer::from_raw(state.next_raw()))
            .collect();
        state.command_buffers.extend(buffers.iter().copied());
        Ok(buffers)
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        let mut state = self.state();
        for command_buffer in command_buffers {
            state.command_buffers.remove(command_buffer);
            state.recording.remove(command_buffer);
        }
    }

    fn begin_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        if !state.command_buffers.contains(&command_buffer) {
            return Err(unknown("command buffer", command_buffer.as_raw()));
        }
        state.recording.insert(command_buffer);
        state
            .events
            .push(MockEvent::BeginCommandBuffer(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&self, command_buffer: vk::CommandBuffer) -> RhiResult<()> {
        let mut state = self.state();
        if !state.recording.remove(&command_buffer) {
            return Err(RhiError::InvalidOperation(
                "ended a command buffer that was not recording".into(),
            ));
        }
        state.events.push(MockEvent::EndCommandBuffer(command_buffer));
        Ok(())
    }

    fn cmd_set_viewport_scissor(&self, _command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        self.state().events.push(MockEvent::SetViewportScissor {
            width: extent.width,
            height: extent.height,
        });
    }

    fn cmd_begin_render_pass(
        &self,
        _command_buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        _clear_color: [f32; 4],
    ) {
        self.state().events.push(MockEvent::BeginRenderPass {
            framebuffer,
            width: extent.width,
            height: extent.height,
        });
    }

    fn cmd_end_render_pass(&self, _command_buffer: vk::CommandBuffer) {
        self.state().events.push(MockEvent::EndRenderPass);
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RhiResult<vk::Buffer> {
        if size == 0 {
            return Err(RhiError::InvalidOperation("zero-sized buffer".into()));
        }
        let mut state = self.state();
        let buffer = vk::Buffer::from_raw(state.next_raw());
        state.buffers.insert(
            buffer,
            MockBuffer {
                data: vec![0u8; size as usize].into_boxed_slice(),
                location,
                mapped: false,
            },
        );
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        self.state().buffers.remove(&buffer);
    }

    fn map_buffer(&self, buffer: vk::Buffer) -> RhiResult<NonNull<u8>> {
        let mut state = self.state();
        let entry = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| unknown("buffer", buffer.as_raw()))?;

        if entry.location == MemoryLocation::GpuOnly {
            return Err(RhiError::InvalidOperation(
                "cannot map device-local memory".into(),
            ));
        }
        entry.mapped = true;
        NonNull::new(entry.data.as_mut_ptr())
            .ok_or_else(|| RhiError::InvalidOperation("buffer has no storage".into()))
    }

    fn unmap_buffer(&self, buffer: vk::Buffer) {
        if let Some(entry) = self.state().buffers.get_mut(&buffer) {
            entry.mapped = false;
        }
    }

    fn copy_buffer(
        &self,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) -> RhiResult<()> {
        let mut state = self.state();
        let src_offset = region.src_offset as usize;
        let dst_offset = region.dst_offset as usize;
        let size = region.size as usize;

        let bytes = {
            let source = state
                .buffers
                .get(&src)
                .ok_or_else(|| unknown("buffer", src.as_raw()))?;
            source
                .data
                .get(src_offset..src_offset + size)
                .ok_or_else(|| RhiError::InvalidOperation("copy source out of range".into()))?
                .to_vec()
        };

        let target = state
            .buffers
            .get_mut(&dst)
            .ok_or_else(|| unknown("buffer", dst.as_raw()))?;
        target
            .data
            .get_mut(dst_offset..dst_offset + size)
            .ok_or_else(|| RhiError::InvalidOperation("copy target out of range".into()))?
            .copy_from_slice(&bytes);

        state.events.push(MockEvent::CopyBuffer {
            src,
            dst,
            src_offset: region.src_offset,
            dst_offset: region.dst_offset,
            size: region.size,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_lifecycle() {
        let device = MockDevice::new();
        let fence = device.create_fence(false).unwrap();

        assert!(!device.wait_for_fence(fence, 0).unwrap());

        let cbs = device.allocate_command_buffers(1).unwrap();
        device.begin_command_buffer(cbs[0]).unwrap();
        device.end_command_buffer(cbs[0]).unwrap();
        device
            .submit(cbs[0], vk::Semaphore::null(), vk::Semaphore::null(), fence)
            .unwrap();

        assert_eq!(device.fence_signaled(fence), Some(false));
        assert!(device.wait_for_fence(fence, u64::MAX).unwrap());
        assert_eq!(device.fence_signaled(fence), Some(true));
    }

    #[test]
    fn test_submit_rejects_signaled_fence() {
        let device = MockDevice::new();
        let fence = device.create_fence(true).unwrap();
        let cbs = device.allocate_command_buffers(1).unwrap();

        let result = device.submit(cbs[0], vk::Semaphore::null(), vk::Semaphore::null(), fence);
        assert!(matches!(result, Err(RhiError::InvalidOperation(_))));
    }

    #[test]
    fn test_round_robin_acquire() {
        let device = MockDevice::with_image_count(2);
        let chain = device
            .create_swapchain(&SwapchainDesc {
                width: 4,
                height: 4,
                old_swapchain: vk::SwapchainKHR::null(),
            })
            .unwrap();

        let mut indices = Vec::new();
        for _ in 0..3 {
            match device
                .acquire_next_image(chain.handle, 0, vk::Semaphore::null(), vk::Fence::null())
                .unwrap()
            {
                AcquiredImage::Image { index, .. } => indices.push(index),
                AcquiredImage::Stale => panic!("unexpected stale"),
            }
        }
        assert_eq!(indices, vec![0, 1, 0]);
    }

    #[test]
    fn test_copy_and_map() {
        let device = MockDevice::new();
        let src = device
            .create_buffer(8, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::CpuToGpu)
            .unwrap();
        let dst = device
            .create_buffer(8, vk::BufferUsageFlags::TRANSFER_DST, MemoryLocation::GpuOnly)
            .unwrap();

        let ptr = device.map_buffer(src).unwrap();
        unsafe { std::ptr::copy_nonoverlapping([1u8, 2, 3, 4].as_ptr(), ptr.as_ptr(), 4) };
        device.unmap_buffer(src);

        device
            .copy_buffer(
                src,
                dst,
                vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 4,
                    size: 4,
                },
            )
            .unwrap();

        assert_eq!(device.buffer_contents(dst).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(device.map_buffer(dst).is_err());

        device.destroy_buffer(src);
        device.destroy_buffer(dst);
        assert_eq!(device.live_objects(), 0);
    }

    #[test]
    fn test_stalled_fence_times_out_until_released() {
        let device = MockDevice::new();
        let fence = device.create_fence(false).unwrap();
        let cbs = device.allocate_command_buffers(1).unwrap();
        device
            .submit(cbs[0], vk::Semaphore::null(), vk::Semaphore::null(), fence)
            .unwrap();

        device.stall_fence(fence);
        assert!(!device.wait_for_fence(fence, 0).unwrap());
        device.wait_idle().unwrap();
        assert_eq!(device.fence_signaled(fence), Some(false));

        device.release_fence(fence);
        assert!(device.wait_for_fence(fence, 0).unwrap());
    }

    #[test]
    fn test_scripted_swapchain_failure() {
        let device = MockDevice::new();
        let desc = SwapchainDesc {
            width: 4,
            height: 4,
            old_swapchain: vk::SwapchainKHR::null(),
        };

        device.fail_next_swapchain(1);
        assert!(matches!(
            device.create_swapchain(&desc),
            Err(RhiError::SwapchainError(_))
        ));
        assert_eq!(device.live_objects(), 0);

        let chain = device.create_swapchain(&desc).unwrap();
        device.destroy_swapchain(chain.handle);
    }
}
