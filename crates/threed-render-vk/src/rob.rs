// SPDX-License-Identifier: CEPL-1.0
//! Render objects: things that own GPU resources and record their own draws.
use crate::upload::Uploader;
use anyhow::Result;
use ash::vk;
use threed_assets::AssetRoot;

/// What an object may use while creating its resources.
pub struct GpuContext<'a> {
    pub device: &'a ash::Device,
    pub uploader: Uploader<'a>,
    pub assets: &'a AssetRoot,
    pub render_pass: vk::RenderPass,
    pub samples: vk::SampleCountFlags,
    /// Already `None` when the device lacks sample-rate shading.
    pub min_sample_shading: Option<f32>,
    pub frames_in_flight: usize,
    pub max_anisotropy: f32,
    pub linear_blit: bool,
}

/// Per-frame values handed to `update` and `record`.
#[derive(Clone, Copy, Debug)]
pub struct FrameInfo {
    pub slot: usize,
    pub image_index: u32,
    pub extent: vk::Extent2D,
    /// Seconds since the renderer started.
    pub seconds: f32,
    /// Command buffers were recorded ahead of time; `draw` must not record.
    pub pre_record: bool,
}

pub trait RenderObject {
    fn name(&self) -> &str;

    /// Creates every GPU resource. On error whatever was created is released by `destroy`.
    fn create(&mut self, gpu: &GpuContext<'_>) -> Result<()>;

    /// Rebuilds the pipeline against `gpu.render_pass` after the render pass
    /// was replaced. The device is idle.
    fn rebuild_pipeline(&mut self, gpu: &GpuContext<'_>) -> Result<()>;

    /// Writes this slot's uniforms. Runs after the slot's fence has signaled.
    fn update(&mut self, frame: &FrameInfo) -> Result<()>;

    /// Binds and draws into `cmd`, inside the render pass.
    fn record(&self, device: &ash::Device, cmd: vk::CommandBuffer, frame: &FrameInfo) -> Result<()>;

    /// Per-frame entry point; a no-op when commands were pre-recorded.
    fn draw(&self, device: &ash::Device, cmd: vk::CommandBuffer, frame: &FrameInfo) -> Result<()> {
        if frame.pre_record {
            return Ok(());
        }
        self.record(device, cmd, frame)
    }

    /// Releases everything; calling it twice is harmless.
    fn destroy(&mut self, device: &ash::Device);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Default)]
    struct Counting {
        records: Cell<u32>,
    }

    impl RenderObject for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn create(&mut self, _gpu: &GpuContext<'_>) -> Result<()> {
            Ok(())
        }

        fn rebuild_pipeline(&mut self, _gpu: &GpuContext<'_>) -> Result<()> {
            Ok(())
        }

        fn update(&mut self, _frame: &FrameInfo) -> Result<()> {
            Ok(())
        }

        fn record(
            &self,
            _device: &ash::Device,
            _cmd: vk::CommandBuffer,
            _frame: &FrameInfo,
        ) -> Result<()> {
            self.records.set(self.records.get() + 1);
            Ok(())
        }

        fn destroy(&mut self, _device: &ash::Device) {}
    }

    fn frame(pre_record: bool) -> FrameInfo {
        FrameInfo {
            slot: 0,
            image_index: 0,
            extent: vk::Extent2D {
                width: 8,
                height: 8,
            },
            seconds: 0.0,
            pre_record,
        }
    }

    // Function pointers are never called: `record` above touches no Vulkan entry point.
    fn unloaded_device() -> ash::Device {
        unsafe { ash::Device::load_with(|_| std::ptr::null(), vk::Device::null()) }
    }

    #[test]
    fn draw_records_each_frame() {
        let device = unloaded_device();
        let obj = Counting::default();
        for _ in 0..3 {
            obj.draw(&device, vk::CommandBuffer::null(), &frame(false)).unwrap();
        }
        assert_eq!(obj.records.get(), 3);
    }

    #[test]
    fn draw_is_a_no_op_when_pre_recorded() {
        let device = unloaded_device();
        let obj = Counting::default();
        obj.draw(&device, vk::CommandBuffer::null(), &frame(true)).unwrap();
        assert_eq!(obj.records.get(), 0);
        obj.record(&device, vk::CommandBuffer::null(), &frame(true)).unwrap();
        assert_eq!(obj.records.get(), 1);
    }
}
