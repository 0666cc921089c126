// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: device selection, swapchain, pipelines, uploads and
//! frame pacing behind `threed_render::Renderer`.
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use threed_render::{RenderSize, Renderer, RendererConfig};
use tracing::info;

pub mod context;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod rob;
pub mod robs;
pub mod swapchain;
pub mod upload;

pub use context::VulkanContext;
pub use error::{FrameError, VkError};
pub use frame::{FrameOutcome, FrameScheduler, FrameTarget};
pub use rob::{FrameInfo, GpuContext, RenderObject};

/// Replaces `slot` with the null handle, returning the old one if it was live.
pub(crate) fn take_handle<T: Copy + Default + PartialEq>(slot: &mut T) -> Option<T> {
    let h = std::mem::take(slot);
    (h != T::default()).then_some(h)
}

pub struct VkRenderer {
    scheduler: FrameScheduler,
    ctx: VulkanContext,
    paused: bool,
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: RendererConfig,
    ) -> Result<Self> {
        let ctx = unsafe { VulkanContext::new(window, display, size, cfg) }?;
        Ok(Self {
            scheduler: FrameScheduler::new(ctx.frames_in_flight()),
            ctx,
            paused: size.is_empty(),
        })
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_empty() {
            if !self.paused {
                info!("vk: resize to {}x{} → paused", size.width, size.height);
            }
            self.paused = true;
            return Ok(());
        }
        if self.paused {
            info!("vk: resize to {}x{} → resumed", size.width, size.height);
        }
        self.paused = false;
        self.ctx.set_size_hint(size);
        self.scheduler.request_resize();
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        if self.paused {
            return Ok(());
        }
        let outcome = self.scheduler.draw_frame(&mut self.ctx)?;
        if outcome != FrameOutcome::Presented {
            tracing::debug!("frame outcome: {outcome:?}");
        }
        Ok(())
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.ctx.set_clear_color(rgba);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::{self, Handle};

    #[test]
    fn take_handle_nulls_the_slot() {
        let mut fence = vk::Fence::from_raw(7);
        assert_eq!(take_handle(&mut fence), Some(vk::Fence::from_raw(7)));
        assert_eq!(fence, vk::Fence::null());
        assert_eq!(take_handle(&mut fence), None);
    }
}
