// SPDX-License-Identifier: CEPL-1.0
//! Frame pacing: frames in flight, acquire/submit/present and when to
//! rebuild the swapchain.
use crate::error::FrameError;
use crate::take_handle;
use anyhow::{Context, Result};
use ash::vk;
use threed_render::MAX_FRAMES_IN_FLIGHT;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireStatus {
    Ready(u32),
    Suboptimal(u32),
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecreateStatus {
    Recreated,
    /// Surface is 0x0; nothing was touched.
    Deferred,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    PresentedAndRecreated,
    /// Acquire said out-of-date; nothing was submitted this tick.
    Abandoned,
    /// Acquire failed recoverably; try again next tick.
    Skipped,
}

/// The GPU-facing half of a frame. `VulkanContext` is the real one.
pub trait FrameTarget {
    fn wait_for_frame(&mut self, slot: usize) -> Result<(), FrameError>;
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireStatus, FrameError>;
    fn update_frame(&mut self, slot: usize, image: u32) -> Result<(), FrameError>;
    fn reset_frame(&mut self, slot: usize) -> Result<(), FrameError>;
    fn record_frame(&mut self, slot: usize, image: u32) -> Result<(), FrameError>;
    fn submit_frame(&mut self, slot: usize, image: u32) -> Result<(), FrameError>;
    fn present_image(&mut self, slot: usize, image: u32) -> Result<PresentStatus, FrameError>;
    fn recreate_swapchain(&mut self) -> Result<RecreateStatus, FrameError>;
}

#[derive(Debug)]
pub struct FrameScheduler {
    frames_in_flight: usize,
    current_frame: usize,
    resize_requested: bool,
}

impl FrameScheduler {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT),
            current_frame: 0,
            resize_requested: false,
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn resize_requested(&self) -> bool {
        self.resize_requested
    }

    /// Forces a rebuild after the next successful present.
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    // STRICT PER-FRAME ORDER:
    // 1) wait on this slot's fence
    // 2) acquire (signals this slot's image-available semaphore)
    // 3) update uniforms, reset fence, record
    // 4) submit (waits image-available, signals render-finished, fences the slot)
    // 5) present (waits render-finished)
    // 6) rebuild if needed, then advance the slot
    pub fn draw_frame<T: FrameTarget + ?Sized>(
        &mut self,
        target: &mut T,
    ) -> Result<FrameOutcome, FrameError> {
        debug_assert!(self.current_frame < self.frames_in_flight);
        let slot = self.current_frame;
        target.wait_for_frame(slot)?;

        let image = match target.acquire_image(slot) {
            Ok(AcquireStatus::Ready(i)) => i,
            Ok(AcquireStatus::Suboptimal(i)) => {
                tracing::debug!("acquire suboptimal; presenting before rebuild");
                i
            }
            Ok(AcquireStatus::OutOfDate) => {
                if target.recreate_swapchain()? == RecreateStatus::Recreated {
                    self.resize_requested = false;
                }
                return Ok(FrameOutcome::Abandoned);
            }
            Err(FrameError::Vk { op, result }) => {
                tracing::warn!("{op} failed with {result:?}; skipping frame");
                return Ok(FrameOutcome::Skipped);
            }
            Err(e) => return Err(e),
        };

        target.update_frame(slot, image)?;
        // Only after a successful acquire, so an abandoned frame cannot leave
        // the fence unsignaled for the next wait.
        target.reset_frame(slot)?;
        target.record_frame(slot, image)?;
        target.submit_frame(slot, image)?;

        let present = match target.present_image(slot, image) {
            Ok(status) => status,
            Err(FrameError::Vk { op, result }) => {
                tracing::warn!("{op} failed with {result:?}");
                PresentStatus::Optimal
            }
            Err(e) => return Err(e),
        };

        let mut outcome = FrameOutcome::Presented;
        if present != PresentStatus::Optimal || self.resize_requested {
            if target.recreate_swapchain()? == RecreateStatus::Recreated {
                self.resize_requested = false;
                outcome = FrameOutcome::PresentedAndRecreated;
            }
        }

        self.current_frame = (self.current_frame + 1) % self.frames_in_flight;
        Ok(outcome)
    }
}

/// Per-slot synchronization.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

/// Command pool, per-slot command buffers and sync objects, plus the
/// optional pre-recorded `[slot][image]` matrix.
#[derive(Debug, Default)]
pub struct FrameResources {
    pub pool: vk::CommandPool,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub sync: Vec<FrameSync>,
    pub prerecorded: Vec<Vec<vk::CommandBuffer>>,
}

impl FrameResources {
    /// Fills `self` in place so a partial failure is still released by `destroy`.
    pub unsafe fn create(
        &mut self,
        device: &ash::Device,
        queue_family: u32,
        frames: usize,
    ) -> Result<()> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        self.pool = device
            .create_command_pool(&pool_info, None)
            .context("create_command_pool")?;
        self.command_buffers = self.allocate(device, frames)?;

        let sem_ci = vk::SemaphoreCreateInfo::default();
        // Signaled so the first wait on each slot returns immediately.
        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for _ in 0..frames {
            let mut sync = FrameSync::default();
            let created = (|| -> ash::prelude::VkResult<()> {
                sync.image_available = device.create_semaphore(&sem_ci, None)?;
                sync.render_finished = device.create_semaphore(&sem_ci, None)?;
                sync.in_flight = device.create_fence(&fence_ci, None)?;
                Ok(())
            })();
            self.sync.push(sync);
            created.context("frame sync objects")?;
        }
        tracing::debug!("{frames} frame slots ready");
        Ok(())
    }

    unsafe fn allocate(
        &self,
        device: &ash::Device,
        count: usize,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        device
            .allocate_command_buffers(&alloc_info)
            .context("allocate_command_buffers")
    }

    /// One buffer per (slot, swapchain image).
    pub unsafe fn allocate_prerecorded(
        &mut self,
        device: &ash::Device,
        images: usize,
    ) -> Result<()> {
        self.free_prerecorded(device);
        for _ in 0..self.sync.len() {
            let row = self.allocate(device, images)?;
            self.prerecorded.push(row);
        }
        Ok(())
    }

    /// The buffer to submit for `slot`: the pre-recorded one for `image`, or
    /// the slot's own buffer recorded this frame.
    pub fn submit_buffer(
        &self,
        pre_record: bool,
        slot: usize,
        image: u32,
    ) -> Option<vk::CommandBuffer> {
        if pre_record {
            self.prerecorded
                .get(slot)
                .and_then(|row| row.get(image as usize))
        } else {
            self.command_buffers.get(slot)
        }
        .copied()
    }

    pub unsafe fn free_prerecorded(&mut self, device: &ash::Device) {
        for row in self.prerecorded.drain(..) {
            if !row.is_empty() {
                device.free_command_buffers(self.pool, &row);
            }
        }
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for s in self.sync.drain(..) {
            if s.in_flight != vk::Fence::null() {
                device.destroy_fence(s.in_flight, None);
            }
            for sem in [s.render_finished, s.image_available] {
                if sem != vk::Semaphore::null() {
                    device.destroy_semaphore(sem, None);
                }
            }
        }
        self.command_buffers.clear();
        self.prerecorded.clear();
        // Destroying the pool frees every buffer allocated from it.
        if let Some(pool) = take_handle(&mut self.pool) {
            device.destroy_command_pool(pool, None);
        }
    }
}
