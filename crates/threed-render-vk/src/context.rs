// SPDX-License-Identifier: CEPL-1.0
//! Owns every Vulkan object and implements the GPU side of a frame.
use crate::device::{
    choose_sample_count, enumerate_physical_devices, pick_physical_device, DeviceContext,
};
use crate::error::{FrameError, VkError};
use crate::frame::{AcquireStatus, FrameResources, FrameTarget, PresentStatus, RecreateStatus};
use crate::instance::InstanceContext;
use crate::rob::{FrameInfo, GpuContext, RenderObject};
use crate::robs::build_object;
use crate::swapchain::{
    choose_extent, choose_swapchain_surface_format, cleanup_swapchain, create_render_pass,
    keep_or_choose_format, SwapchainBuild, SwapchainState,
};
use crate::upload::Uploader;
use anyhow::{anyhow, Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::time::Instant;
use threed_assets::AssetRoot;
use threed_render::{RenderSize, RendererConfig};

/// One step of a swapchain rebuild, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RebuildStep {
    WaitIdle,
    FreePrerecorded,
    Cleanup,
    RenderPass,
    Pipelines,
    Swapchain,
    Prerecord,
}

/// Nothing is freed before the device is idle. A new render pass means
/// every object pipeline is rebuilt against it.
fn rebuild_steps(format_changed: bool, pre_record: bool) -> Vec<RebuildStep> {
    let mut steps = vec![RebuildStep::WaitIdle];
    if pre_record {
        steps.push(RebuildStep::FreePrerecorded);
    }
    steps.push(RebuildStep::Cleanup);
    if format_changed {
        steps.extend([RebuildStep::RenderPass, RebuildStep::Pipelines]);
    }
    steps.push(RebuildStep::Swapchain);
    if pre_record {
        steps.push(RebuildStep::Prerecord);
    }
    steps
}

pub struct VulkanContext {
    cfg: RendererConfig,
    assets: AssetRoot,
    frames_in_flight: usize,
    samples: vk::SampleCountFlags,
    depth_format: vk::Format,
    size_hint: RenderSize,
    clear: [f32; 4],
    started: Instant,

    render_pass: vk::RenderPass,
    swapchain: SwapchainState,
    frames: FrameResources,
    objects: Vec<Box<dyn RenderObject>>,

    // Dropped after `Drop::drop` has released everything above, device first.
    device: DeviceContext,
    instance: InstanceContext,
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device.device;
            d.device_wait_idle().ok();
            for mut obj in self.objects.drain(..).rev() {
                obj.destroy(d);
            }
            cleanup_swapchain(&self.device, &mut self.swapchain);
            if let Some(rp) = crate::take_handle(&mut self.render_pass) {
                d.destroy_render_pass(rp, None);
            }
            self.frames.destroy(d);
        }
    }
}

impl VulkanContext {
    // STRICT ORDER: instance+surface, device, frame slots, render pass,
    // swapchain, objects, pre-recorded commands. Each step stores its handles
    // in `ctx` first so an early return drops a consistent partial context.
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: RendererConfig,
    ) -> Result<Self> {
        if cfg.clamped_frames_in_flight() != cfg.frames_in_flight {
            tracing::warn!(
                "frames_in_flight {} out of range; using {}",
                cfg.frames_in_flight,
                cfg.clamped_frames_in_flight()
            );
        }

        let instance = {
            let _span = tracing::info_span!("create_instance").entered();
            InstanceContext::new(window, display, cfg.validation)?
        };
        let device = {
            let _span = tracing::info_span!("select_device").entered();
            let devices = enumerate_physical_devices(
                &instance.instance,
                &instance.surface_loader,
                instance.surface,
            )?;
            let physical = pick_physical_device(devices)?;
            DeviceContext::new(&instance.instance, physical, cfg.sample_shading.is_some())?
        };

        let depth_format = device.physical.depth_format.ok_or(VkError::NoDepthFormat)?;
        let samples = choose_sample_count(cfg.msaa_samples, device.physical.max_samples);
        let format = choose_swapchain_surface_format(&device.physical.swapchain.surface_formats())
            .ok_or(VkError::NoSuitableDevice)?;

        let mut ctx = VulkanContext {
            assets: AssetRoot::new(cfg.assets_dir.clone()),
            frames_in_flight: cfg.clamped_frames_in_flight(),
            samples,
            depth_format,
            size_hint: size,
            clear: cfg.clear_color,
            started: Instant::now(),
            render_pass: vk::RenderPass::null(),
            swapchain: SwapchainState {
                format,
                ..Default::default()
            },
            frames: FrameResources::default(),
            objects: Vec::new(),
            cfg,
            device,
            instance,
        };

        {
            let _span = tracing::info_span!("create_swapchain").entered();
            ctx.frames
                .create(&ctx.device.device, ctx.device.graphics_family, ctx.frames_in_flight)?;
            ctx.render_pass =
                create_render_pass(&ctx.device.device, format.format, depth_format, samples)?;
            ctx.build_swapchain()?;
        }
        {
            let _span = tracing::info_span!("create_objects").entered();
            ctx.create_objects()?;
            ctx.record_prerecorded()?;
        }

        tracing::info!(
            "vulkan ready: {} frames in flight, {:?} samples, pre-record={}, validation={}",
            ctx.frames_in_flight,
            ctx.samples,
            ctx.cfg.pre_record,
            ctx.instance.validation_enabled()
        );
        Ok(ctx)
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn set_size_hint(&mut self, size: RenderSize) {
        self.size_hint = size;
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear = rgba;
        if self.cfg.pre_record {
            unsafe {
                if let Err(e) = self
                    .device
                    .device
                    .device_wait_idle()
                    .map_err(anyhow::Error::from)
                    .and_then(|_| self.record_prerecorded())
                {
                    tracing::warn!("re-recording after clear color change failed: {e:#}");
                }
            }
        }
    }

    unsafe fn build_swapchain(&mut self) -> Result<()> {
        let build = SwapchainBuild {
            ctx: &self.device,
            uploader: Uploader::new(&self.device, self.frames.pool),
            surface_loader: &self.instance.surface_loader,
            surface: self.instance.surface,
            format: self.swapchain.format,
            depth_format: self.depth_format,
            samples: self.samples,
            render_pass: self.render_pass,
            hint: self.size_hint,
        };
        build.build(&mut self.swapchain)
    }

    fn gpu_context(&self) -> GpuContext<'_> {
        GpuContext {
            device: &self.device.device,
            uploader: Uploader::new(&self.device, self.frames.pool),
            assets: &self.assets,
            render_pass: self.render_pass,
            samples: self.samples,
            min_sample_shading: self.cfg.sample_shading.filter(|_| self.device.sample_shading),
            frames_in_flight: self.frames_in_flight,
            max_anisotropy: self.device.physical.properties.limits.max_sampler_anisotropy,
            linear_blit: self.device.physical.texture_linear_blit,
        }
    }

    fn create_objects(&mut self) -> Result<()> {
        let mut objects: Vec<Box<dyn RenderObject>> = Vec::with_capacity(self.cfg.objects.len());
        let created = (|| -> Result<()> {
            let gpu = self.gpu_context();
            for &kind in &self.cfg.objects {
                // Pushed before `create` so a half-built object is still destroyed.
                objects.push(build_object(kind, &self.cfg, &self.assets)?);
                if let Some(obj) = objects.last_mut() {
                    obj.create(&gpu).with_context(|| format!("create {kind:?}"))?;
                }
            }
            Ok(())
        })();
        self.objects = objects;
        created
    }

    fn rebuild_pipelines(&mut self) -> Result<()> {
        let mut objects = std::mem::take(&mut self.objects);
        let rebuilt = {
            let gpu = self.gpu_context();
            objects.iter_mut().try_for_each(|obj| obj.rebuild_pipeline(&gpu))
        };
        self.objects = objects;
        rebuilt
    }

    fn frame_info(&self, slot: usize, image_index: u32) -> FrameInfo {
        FrameInfo {
            slot,
            image_index,
            extent: self.swapchain.extent,
            seconds: self.started.elapsed().as_secs_f32(),
            pre_record: self.cfg.pre_record,
        }
    }

    unsafe fn record_commands(
        &self,
        cmd: vk::CommandBuffer,
        info: &FrameInfo,
        flags: vk::CommandBufferUsageFlags,
    ) -> Result<()> {
        let d = &self.device.device;
        let framebuffer = *self
            .swapchain
            .framebuffers
            .get(info.image_index as usize)
            .ok_or_else(|| anyhow!("no framebuffer for image {}", info.image_index))?;

        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &bi)?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: self.clear },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let extent = self.swapchain.extent;
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.render_pass,
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        d.cmd_set_viewport(cmd, 0, &[viewport]);
        d.cmd_set_scissor(
            cmd,
            0,
            &[vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            }],
        );

        for obj in &self.objects {
            let recorded = if info.pre_record {
                obj.record(d, cmd, info)
            } else {
                obj.draw(d, cmd, info)
            };
            recorded.with_context(|| format!("record {}", obj.name()))?;
        }

        d.cmd_end_render_pass(cmd);
        d.end_command_buffer(cmd)?;
        Ok(())
    }

    /// Fills the `[slot][image]` matrix. No-op unless pre-recording.
    unsafe fn record_prerecorded(&mut self) -> Result<()> {
        if !self.cfg.pre_record {
            return Ok(());
        }
        self.frames
            .allocate_prerecorded(&self.device.device, self.swapchain.image_count())?;
        for slot in 0..self.frames.prerecorded.len() {
            for image in 0..self.frames.prerecorded[slot].len() {
                let cmd = self.frames.prerecorded[slot][image];
                let info = self.frame_info(slot, image as u32);
                self.record_commands(cmd, &info, vk::CommandBufferUsageFlags::SIMULTANEOUS_USE)?;
            }
        }
        tracing::debug!(
            "pre-recorded {} x {} command buffers",
            self.frames.prerecorded.len(),
            self.swapchain.image_count()
        );
        Ok(())
    }

    unsafe fn rebuild_swapchain(&mut self) -> Result<RecreateStatus> {
        let caps = self
            .instance
            .surface_loader
            .get_physical_device_surface_capabilities(
                self.device.physical.handle,
                self.instance.surface,
            )
            .context("get_physical_device_surface_capabilities")?;
        let extent = choose_extent(&caps, self.size_hint);
        if extent.width == 0 || extent.height == 0 {
            tracing::debug!("surface is 0x0; deferring swapchain rebuild");
            return Ok(RecreateStatus::Deferred);
        }
        let formats = self
            .instance
            .surface_loader
            .get_physical_device_surface_formats(self.device.physical.handle, self.instance.surface)
            .context("get_physical_device_surface_formats")?;
        let format = keep_or_choose_format(self.swapchain.format, &formats)
            .ok_or_else(|| anyhow!("surface reports no formats"))?;

        let format_changed = format != self.swapchain.format;
        for step in rebuild_steps(format_changed, self.cfg.pre_record) {
            match step {
                RebuildStep::WaitIdle => {
                    self.device.device.device_wait_idle().context("device_wait_idle")?
                }
                RebuildStep::FreePrerecorded => self.frames.free_prerecorded(&self.device.device),
                RebuildStep::Cleanup => cleanup_swapchain(&self.device, &mut self.swapchain),
                RebuildStep::RenderPass => {
                    if let Some(rp) = crate::take_handle(&mut self.render_pass) {
                        self.device.device.destroy_render_pass(rp, None);
                    }
                    self.render_pass = create_render_pass(
                        &self.device.device,
                        format.format,
                        self.depth_format,
                        self.samples,
                    )?;
                }
                RebuildStep::Pipelines => self.rebuild_pipelines()?,
                RebuildStep::Swapchain => {
                    self.swapchain.format = format;
                    self.build_swapchain()?;
                }
                RebuildStep::Prerecord => self.record_prerecorded()?,
            }
        }
        tracing::info!(
            "swapchain rebuilt at {}x{}",
            self.swapchain.extent.width,
            self.swapchain.extent.height
        );
        Ok(RecreateStatus::Recreated)
    }

    fn sync(&self, slot: usize) -> Result<crate::frame::FrameSync, FrameError> {
        self.frames
            .sync
            .get(slot)
            .copied()
            .ok_or_else(|| FrameError::Other(anyhow!("no sync objects for slot {slot}")))
    }
}

impl FrameTarget for VulkanContext {
    fn wait_for_frame(&mut self, slot: usize) -> Result<(), FrameError> {
        let fence = self.sync(slot)?.in_flight;
        unsafe { self.device.device.wait_for_fences(&[fence], true, u64::MAX) }
            .map_err(|e| FrameError::vk("wait_for_fences", e))
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireStatus, FrameError> {
        let sem = self.sync(slot)?.image_available;
        let acquired = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain.swapchain,
                u64::MAX,
                sem,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((i, false)) => Ok(AcquireStatus::Ready(i)),
            Ok((i, true)) => Ok(AcquireStatus::Suboptimal(i)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::OutOfDate),
            Err(e) => Err(FrameError::vk("acquire_next_image", e)),
        }
    }

    fn update_frame(&mut self, slot: usize, image: u32) -> Result<(), FrameError> {
        let info = self.frame_info(slot, image);
        for obj in &mut self.objects {
            obj.update(&info)
                .with_context(|| format!("update {}", obj.name()))?;
        }
        Ok(())
    }

    fn reset_frame(&mut self, slot: usize) -> Result<(), FrameError> {
        let fence = self.sync(slot)?.in_flight;
        unsafe { self.device.device.reset_fences(&[fence]) }
            .map_err(|e| FrameError::vk("reset_fences", e))
    }

    fn record_frame(&mut self, slot: usize, image: u32) -> Result<(), FrameError> {
        if self.cfg.pre_record {
            return Ok(());
        }
        let cmd = *self
            .frames
            .command_buffers
            .get(slot)
            .ok_or_else(|| anyhow!("no command buffer for slot {slot}"))?;
        let info = self.frame_info(slot, image);
        unsafe {
            self.device
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(|e| FrameError::vk("reset_command_buffer", e))?;
            self.record_commands(cmd, &info, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        }
        Ok(())
    }

    fn submit_frame(&mut self, slot: usize, image: u32) -> Result<(), FrameError> {
        let sync = self.sync(slot)?;
        let cmd = self
            .frames
            .submit_buffer(self.cfg.pre_record, slot, image)
            .ok_or_else(|| anyhow!("no command buffer for slot {slot}, image {image}"))?;

        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &sync.render_finished,
            ..Default::default()
        };
        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                std::slice::from_ref(&submit),
                sync.in_flight,
            )
        }
        .map_err(|e| FrameError::vk("queue_submit", e))
    }

    fn present_image(&mut self, slot: usize, image: u32) -> Result<PresentStatus, FrameError> {
        let sync = self.sync(slot)?;
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &sync.render_finished,
            swapchain_count: 1,
            p_swapchains: &self.swapchain.swapchain,
            p_image_indices: &image,
            ..Default::default()
        };
        match unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.present_queue, &present)
        } {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(FrameError::vk("queue_present", e)),
        }
    }

    fn recreate_swapchain(&mut self) -> Result<RecreateStatus, FrameError> {
        Ok(unsafe { self.rebuild_swapchain() }?)
    }
}
