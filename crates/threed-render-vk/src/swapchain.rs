// SPDX-License-Identifier: CEPL-1.0
//! Swapchain and everything sized by it: views, MSAA color, depth, framebuffers.
use crate::device::DeviceContext;
use crate::take_handle;
use crate::upload::{create_image_view, AllocatedImage, ImageSpec, Uploader};
use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain};
use ash::vk;
use threed_render::RenderSize;

/// Cap on requested images unless the surface's minimum is higher.
pub const MAX_SWAPCHAIN_IMAGES: u32 = 4;

/// Prefers B8G8R8A8_SRGB with sRGB-nonlinear, else the first reported.
pub fn choose_swapchain_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// Keeps `current` when the surface still offers it so the render pass stays compatible.
pub fn keep_or_choose_format(
    current: vk::SurfaceFormatKHR,
    formats: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    if formats.contains(&current) {
        return Some(current);
    }
    let next = choose_swapchain_surface_format(formats)?;
    tracing::warn!(
        "surface format {:?} no longer offered; switching to {:?}",
        current.format,
        next.format
    );
    Some(next)
}

/// FIFO unconditionally; it is the one mode every surface must support.
pub fn choose_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    tracing::debug!("present modes offered: {available:?}; using FIFO");
    vk::PresentModeKHR::FIFO
}

/// `current_extent` unless the surface leaves sizing to us (`u32::MAX`),
/// in which case the window size is clamped to the allowed range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, hint: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: hint
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: hint
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Clamp into `[min, max]` (`max == 0` means unbounded), then cap at
/// `MAX_SWAPCHAIN_IMAGES` unless `min` is larger.
pub fn choose_image_count(desired: u32, min: u32, max: u32) -> u32 {
    let mut count = desired.max(min);
    if max > 0 {
        count = count.min(max);
    }
    count.min(MAX_SWAPCHAIN_IMAGES.max(min))
}

/// Exclusive when one family does both, otherwise concurrent across the two.
pub fn choose_sharing(graphics: u32, present: u32) -> (vk::SharingMode, Vec<u32>) {
    if graphics == present {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![graphics, present])
    }
}

/// Attachment order per framebuffer; must match `create_render_pass`.
pub fn framebuffer_attachments(
    msaa_color: Option<vk::ImageView>,
    depth: vk::ImageView,
    swap: vk::ImageView,
) -> Vec<vk::ImageView> {
    match msaa_color {
        Some(color) => vec![color, depth, swap],
        None => vec![swap, depth],
    }
}

/// With MSAA: [multisampled color, depth, resolve]. Without: [color, depth].
/// The presented attachment always ends in PRESENT_SRC_KHR.
pub fn render_pass_attachments(
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Vec<vk::AttachmentDescription> {
    let msaa = samples != vk::SampleCountFlags::TYPE_1;
    let color = vk::AttachmentDescription {
        format: color_format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: if msaa {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        },
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: if msaa {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        },
        ..Default::default()
    };
    let depth = vk::AttachmentDescription {
        format: depth_format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    };
    if !msaa {
        return vec![color, depth];
    }
    let resolve = vk::AttachmentDescription {
        format: color_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::DONT_CARE,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    vec![color, depth, resolve]
}

pub unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Result<vk::RenderPass> {
    let attachments = render_pass_attachments(color_format, depth_format, samples);
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let resolve_ref = vk::AttachmentReference {
        attachment: 2,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_resolve_attachments: if attachments.len() == 3 {
            &resolve_ref
        } else {
            std::ptr::null()
        },
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    device.create_render_pass(&ci, None).context("create_render_pass")
}

/// A handle pulled out of `SwapchainState`, waiting to be destroyed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Retired {
    ImageView(vk::ImageView),
    Image(vk::Image),
    Memory(vk::DeviceMemory),
    Framebuffer(vk::Framebuffer),
    Swapchain(vk::SwapchainKHR),
}

#[derive(Default)]
pub struct SwapchainState {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    /// Multisampled color target; all-null when MSAA is off.
    pub color: AllocatedImage,
    pub depth: AllocatedImage,
    pub framebuffers: Vec<vk::Framebuffer>,
}

fn retire_image(img: &mut AllocatedImage, out: &mut Vec<Retired>) {
    out.extend(take_handle(&mut img.view).map(Retired::ImageView));
    out.extend(take_handle(&mut img.image).map(Retired::Image));
    out.extend(take_handle(&mut img.memory).map(Retired::Memory));
}

impl SwapchainState {
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Takes every owned handle out in destruction order, leaving the state
    /// empty. A second call returns nothing.
    pub fn retire(&mut self) -> Vec<Retired> {
        let mut out = Vec::new();
        retire_image(&mut self.color, &mut out);
        retire_image(&mut self.depth, &mut out);
        out.extend(self.framebuffers.drain(..).map(Retired::Framebuffer));
        out.extend(self.views.drain(..).map(Retired::ImageView));
        // Swapchain images belong to the swapchain itself.
        self.images.clear();
        out.extend(take_handle(&mut self.swapchain).map(Retired::Swapchain));
        out
    }
}

pub unsafe fn destroy_retired(
    device: &ash::Device,
    loader: &swapchain::Device,
    retired: Vec<Retired>,
) {
    for handle in retired {
        match handle {
            Retired::ImageView(v) => device.destroy_image_view(v, None),
            Retired::Image(i) => device.destroy_image(i, None),
            Retired::Memory(m) => device.free_memory(m, None),
            Retired::Framebuffer(f) => device.destroy_framebuffer(f, None),
            Retired::Swapchain(s) => loader.destroy_swapchain(s, None),
        }
    }
}

/// Waits for the device, then destroys everything `state` owns.
pub unsafe fn cleanup_swapchain(ctx: &DeviceContext, state: &mut SwapchainState) {
    if let Err(e) = ctx.device.device_wait_idle() {
        tracing::warn!("device_wait_idle before swapchain cleanup: {e:?}");
    }
    destroy_retired(&ctx.device, &ctx.swapchain_loader, state.retire());
}

pub struct SwapchainBuild<'a> {
    pub ctx: &'a DeviceContext,
    pub uploader: Uploader<'a>,
    pub surface_loader: &'a surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub format: vk::SurfaceFormatKHR,
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
    pub render_pass: vk::RenderPass,
    pub hint: RenderSize,
}

impl SwapchainBuild<'_> {
    // STRICT ORDER: swapchain, views, color, depth, framebuffers.
    // Each handle lands in `state` as soon as it exists, so the owner can
    // clean up after a failure part-way through.
    pub unsafe fn build(&self, state: &mut SwapchainState) -> Result<()> {
        let ctx = self.ctx;
        let device = &ctx.device;
        let caps = self
            .surface_loader
            .get_physical_device_surface_capabilities(ctx.physical.handle, self.surface)
            .context("get_physical_device_surface_capabilities")?;
        let modes = self
            .surface_loader
            .get_physical_device_surface_present_modes(ctx.physical.handle, self.surface)
            .context("get_physical_device_surface_present_modes")?;
        let extent = choose_extent(&caps, self.hint);
        if extent.width == 0 || extent.height == 0 {
            return Err(anyhow!("surface extent is 0x0"));
        }
        let wanted = choose_image_count(
            caps.min_image_count + 1,
            caps.min_image_count,
            caps.max_image_count,
        );
        let (sharing, families) = choose_sharing(ctx.graphics_family, ctx.present_family);

        let ci = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface,
            min_image_count: wanted,
            image_format: self.format.format,
            image_color_space: self.format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing,
            queue_family_index_count: families.len() as u32,
            p_queue_family_indices: families.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: choose_present_mode(&modes),
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        state.swapchain = ctx
            .swapchain_loader
            .create_swapchain(&ci, None)
            .context("create_swapchain")?;
        state.format = self.format;
        state.extent = extent;
        state.images = ctx
            .swapchain_loader
            .get_swapchain_images(state.swapchain)
            .context("get_swapchain_images")?;
        if state.images.len() as u32 != wanted {
            tracing::warn!(
                "asked for {wanted} swapchain images, got {}; using {}",
                state.images.len(),
                state.images.len()
            );
        }

        for i in 0..state.images.len() {
            let view = create_image_view(
                device,
                state.images[i],
                self.format.format,
                vk::ImageAspectFlags::COLOR,
                1,
            )?;
            state.views.push(view);
        }

        if self.samples != vk::SampleCountFlags::TYPE_1 {
            state.color = self.uploader.create_image(&ImageSpec {
                width: extent.width,
                height: extent.height,
                mip_levels: 1,
                samples: self.samples,
                format: self.format.format,
                usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT,
            })?;
            state.color.view = self.uploader.create_image_view(
                state.color.image,
                self.format.format,
                vk::ImageAspectFlags::COLOR,
                1,
            )?;
        }

        state.depth = self.uploader.create_image(&ImageSpec {
            width: extent.width,
            height: extent.height,
            mip_levels: 1,
            samples: self.samples,
            format: self.depth_format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        })?;
        state.depth.view = self.uploader.create_image_view(
            state.depth.image,
            self.depth_format,
            vk::ImageAspectFlags::DEPTH,
            1,
        )?;
        self.uploader.transition_image_layout(
            state.depth.image,
            self.depth_format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            1,
        )?;

        let msaa_color = (state.color.view != vk::ImageView::null()).then_some(state.color.view);
        for i in 0..state.views.len() {
            let attachments = framebuffer_attachments(msaa_color, state.depth.view, state.views[i]);
            let fci = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass: self.render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: extent.width,
                height: extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = device
                .create_framebuffer(&fci, None)
                .context("create_framebuffer")?;
            state.framebuffers.push(fb);
        }

        tracing::info!(
            "swapchain {}x{} with {} images, {:?}, {:?} samples",
            extent.width,
            extent.height,
            state.images.len(),
            self.format.format,
            self.samples
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn prefers_srgb_bgra() {
        let linear = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_swapchain_surface_format(&[linear, srgb]), Some(srgb));
        assert_eq!(choose_swapchain_surface_format(&[linear]), Some(linear));
        assert_eq!(choose_swapchain_surface_format(&[]), None);
        assert_eq!(keep_or_choose_format(linear, &[srgb, linear]), Some(linear));
        assert_eq!(keep_or_choose_format(linear, &[srgb]), Some(srgb));
    }

    #[test]
    fn present_mode_is_always_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_uses_current_unless_special() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 64,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let hint = RenderSize {
            width: 4000,
            height: 10,
        };
        assert_eq!(
            choose_extent(&caps, hint),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        assert_eq!(
            choose_extent(&caps, hint),
            vk::Extent2D {
                width: 1920,
                height: 64
            }
        );
    }

    #[test]
    fn image_count_stays_within_bounds() {
        assert_eq!(choose_image_count(3, 2, 0), 3);
        assert_eq!(choose_image_count(3, 2, 2), 2);
        assert_eq!(choose_image_count(9, 2, 0), MAX_SWAPCHAIN_IMAGES);
        assert_eq!(choose_image_count(7, 6, 8), 6);
        for min in 1..8 {
            for max in [0, min, min + 1, min + 5] {
                for desired in 0..12 {
                    let n = choose_image_count(desired, min, max);
                    assert!(n >= min, "{desired} {min} {max} -> {n}");
                    if max > 0 {
                        assert!(n <= max, "{desired} {min} {max} -> {n}");
                    }
                    assert!(n <= MAX_SWAPCHAIN_IMAGES.max(min));
                }
            }
        }
    }

    #[test]
    fn sharing_follows_families() {
        assert_eq!(choose_sharing(0, 0), (vk::SharingMode::EXCLUSIVE, vec![]));
        assert_eq!(
            choose_sharing(0, 2),
            (vk::SharingMode::CONCURRENT, vec![0, 2])
        );
    }

    #[test]
    fn msaa_attachments_resolve_into_swap_image() {
        let a = render_pass_attachments(
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::D32_SFLOAT,
            vk::SampleCountFlags::TYPE_4,
        );
        assert_eq!(a.len(), 3);
        assert_eq!(a[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(a[1].format, vk::Format::D32_SFLOAT);
        assert_eq!(a[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(a[2].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);

        let single = render_pass_attachments(
            vk::Format::B8G8R8A8_SRGB,
            vk::Format::D32_SFLOAT,
            vk::SampleCountFlags::TYPE_1,
        );
        assert_eq!(single.len(), 2);
        assert_eq!(single[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(single[0].store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn framebuffer_order_matches_render_pass() {
        let color = vk::ImageView::from_raw(1);
        let depth = vk::ImageView::from_raw(2);
        let swap = vk::ImageView::from_raw(3);
        assert_eq!(
            framebuffer_attachments(Some(color), depth, swap),
            vec![color, depth, swap]
        );
        assert_eq!(framebuffer_attachments(None, depth, swap), vec![swap, depth]);
    }

    fn populated() -> SwapchainState {
        SwapchainState {
            swapchain: vk::SwapchainKHR::from_raw(10),
            images: vec![vk::Image::from_raw(20), vk::Image::from_raw(21)],
            views: vec![vk::ImageView::from_raw(30), vk::ImageView::from_raw(31)],
            color: AllocatedImage {
                image: vk::Image::from_raw(40),
                memory: vk::DeviceMemory::from_raw(41),
                view: vk::ImageView::from_raw(42),
            },
            depth: AllocatedImage {
                image: vk::Image::from_raw(50),
                memory: vk::DeviceMemory::from_raw(51),
                view: vk::ImageView::from_raw(52),
            },
            framebuffers: vec![vk::Framebuffer::from_raw(60), vk::Framebuffer::from_raw(61)],
            ..Default::default()
        }
    }

    #[test]
    fn retire_releases_in_dependency_order() {
        let mut state = populated();
        let retired = state.retire();
        assert_eq!(
            retired,
            vec![
                Retired::ImageView(vk::ImageView::from_raw(42)),
                Retired::Image(vk::Image::from_raw(40)),
                Retired::Memory(vk::DeviceMemory::from_raw(41)),
                Retired::ImageView(vk::ImageView::from_raw(52)),
                Retired::Image(vk::Image::from_raw(50)),
                Retired::Memory(vk::DeviceMemory::from_raw(51)),
                Retired::Framebuffer(vk::Framebuffer::from_raw(60)),
                Retired::Framebuffer(vk::Framebuffer::from_raw(61)),
                Retired::ImageView(vk::ImageView::from_raw(30)),
                Retired::ImageView(vk::ImageView::from_raw(31)),
                Retired::Swapchain(vk::SwapchainKHR::from_raw(10)),
            ]
        );
        assert_eq!(state.image_count(), 0);
        assert_eq!(state.swapchain, vk::SwapchainKHR::null());
        assert_eq!(state.depth, AllocatedImage::default());
    }

    #[test]
    fn retire_twice_is_a_no_op() {
        let mut state = populated();
        assert!(!state.retire().is_empty());
        assert!(state.retire().is_empty());
    }

    #[test]
    fn retire_skips_absent_msaa_target() {
        let mut state = populated();
        state.color = AllocatedImage::default();
        let retired = state.retire();
        assert_eq!(retired.len(), 8);
        assert_eq!(retired[0], Retired::ImageView(vk::ImageView::from_raw(52)));
    }
}
