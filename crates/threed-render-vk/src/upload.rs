// SPDX-License-Identifier: CEPL-1.0
//! Buffers, images and one-shot transfer work on the graphics queue.
use crate::device::DeviceContext;
use crate::error::VkError;
use crate::take_handle;
use anyhow::{anyhow, Context, Result};
use ash::vk;
use std::ptr::NonNull;
use threed_assets::DecodedImage;

pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32, VkError> {
    (0..props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32))
        .find(|&i| {
            type_filter & (1 << i) != 0
                && props.memory_types[i as usize].property_flags.contains(flags)
        })
        .ok_or(VkError::NoMemoryType { type_filter, flags })
}

/// `floor(log2(max(w, h))) + 1`.
pub fn mip_levels_for(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

#[derive(Default)]
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    mapped: Option<NonNull<u8>>,
}

impl AllocatedBuffer {
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Copies `bytes` into the persistently mapped range.
    pub unsafe fn write(&self, bytes: &[u8]) -> Result<()> {
        let dst = self.mapped.ok_or_else(|| anyhow!("buffer is not mapped"))?;
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(anyhow!(
                "write of {} bytes into {}-byte buffer",
                bytes.len(),
                self.size
            ));
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.as_ptr(), bytes.len());
        Ok(())
    }

    /// Safe to call repeatedly.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if let Some(memory) = take_handle(&mut self.memory) {
            if self.mapped.take().is_some() {
                device.unmap_memory(memory);
            }
            if let Some(buffer) = take_handle(&mut self.buffer) {
                device.destroy_buffer(buffer, None);
            }
            device.free_memory(memory, None);
        } else if let Some(buffer) = take_handle(&mut self.buffer) {
            device.destroy_buffer(buffer, None);
        }
        self.size = 0;
    }
}

/// Image, its backing memory and (once created) its view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AllocatedImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

impl AllocatedImage {
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if let Some(view) = take_handle(&mut self.view) {
            device.destroy_image_view(view, None);
        }
        if let Some(image) = take_handle(&mut self.image) {
            device.destroy_image(image, None);
        }
        if let Some(memory) = take_handle(&mut self.memory) {
            device.free_memory(memory, None);
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ImageSpec {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

/// Access masks and stages for the layout transitions the renderer performs.
pub fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<
    (
        vk::AccessFlags,
        vk::AccessFlags,
        vk::PipelineStageFlags,
        vk::PipelineStageFlags,
    ),
    VkError,
> {
    use vk::{AccessFlags as A, ImageLayout as L, PipelineStageFlags as S};
    Ok(match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER)
        }
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
            A::empty(),
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::TOP_OF_PIPE,
            S::EARLY_FRAGMENT_TESTS,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            A::TRANSFER_WRITE,
            A::SHADER_READ,
            S::TRANSFER,
            S::FRAGMENT_SHADER,
        ),
        (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
            (A::TRANSFER_WRITE, A::TRANSFER_READ, S::TRANSFER, S::TRANSFER)
        }
        (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            A::TRANSFER_READ,
            A::SHADER_READ,
            S::TRANSFER,
            S::FRAGMENT_SHADER,
        ),
        (from, to) => return Err(VkError::UnsupportedTransition { from, to }),
    })
}

/// One step of mip generation, in submission order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MipStep {
    Barrier {
        level: u32,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },
    Blit {
        src_level: u32,
        src: (i32, i32),
        dst: (i32, i32),
    },
}

/// Expects every level in TRANSFER_DST_OPTIMAL and leaves every level in
/// SHADER_READ_ONLY_OPTIMAL.
pub fn plan_mip_chain(width: u32, height: u32, levels: u32) -> Vec<MipStep> {
    use vk::ImageLayout as L;
    let levels = levels.max(1);
    let mut steps = Vec::with_capacity(levels as usize * 3);
    let (mut w, mut h) = (width.max(1) as i32, height.max(1) as i32);
    for level in 1..levels {
        let (nw, nh) = ((w / 2).max(1), (h / 2).max(1));
        steps.push(MipStep::Barrier {
            level: level - 1,
            old: L::TRANSFER_DST_OPTIMAL,
            new: L::TRANSFER_SRC_OPTIMAL,
        });
        steps.push(MipStep::Blit {
            src_level: level - 1,
            src: (w, h),
            dst: (nw, nh),
        });
        steps.push(MipStep::Barrier {
            level: level - 1,
            old: L::TRANSFER_SRC_OPTIMAL,
            new: L::SHADER_READ_ONLY_OPTIMAL,
        });
        w = nw;
        h = nh;
    }
    steps.push(MipStep::Barrier {
        level: levels - 1,
        old: L::TRANSFER_DST_OPTIMAL,
        new: L::SHADER_READ_ONLY_OPTIMAL,
    });
    steps
}

fn color_range(base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn aspect_for(format: vk::Format, layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    if layout == vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL {
        if crate::device::has_stencil_component(format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

unsafe fn image_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<(), VkError> {
    let (src_access, dst_access, src_stage, dst_stage) = transition_masks(old, new)?;
    let barrier = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: src_access,
        dst_access_mask: dst_access,
        old_layout: old,
        new_layout: new,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: range,
        ..Default::default()
    };
    device.cmd_pipeline_barrier(
        cmd,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&barrier),
    );
    Ok(())
}

/// Sampled texture with its full mip chain.
#[derive(Default)]
pub struct Texture {
    pub image: AllocatedImage,
    pub sampler: vk::Sampler,
    pub mip_levels: u32,
}

impl Texture {
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if let Some(sampler) = take_handle(&mut self.sampler) {
            device.destroy_sampler(sampler, None);
        }
        self.image.destroy(device);
    }
}

/// Transfer helper bound to a device, its graphics queue and a command pool.
pub struct Uploader<'a> {
    pub device: &'a ash::Device,
    pub memory: &'a vk::PhysicalDeviceMemoryProperties,
    pub queue: vk::Queue,
    pub pool: vk::CommandPool,
}

impl<'a> Uploader<'a> {
    pub fn new(ctx: &'a DeviceContext, pool: vk::CommandPool) -> Self {
        Self {
            device: &ctx.device,
            memory: &ctx.physical.memory,
            queue: ctx.graphics_queue,
            pool,
        }
    }

    pub unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> Result<AllocatedBuffer> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let mut out = AllocatedBuffer {
            size,
            ..Default::default()
        };
        out.buffer = self.device.create_buffer(&bci, None).context("create_buffer")?;
        let req = self.device.get_buffer_memory_requirements(out.buffer);
        let alloc = find_memory_type(self.memory, req.memory_type_bits, props)
            .map_err(anyhow::Error::from)
            .and_then(|memory_type_index| {
                let mai = vk::MemoryAllocateInfo {
                    s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                    allocation_size: req.size,
                    memory_type_index,
                    ..Default::default()
                };
                Ok(self.device.allocate_memory(&mai, None)?)
            });
        match alloc {
            Ok(memory) => out.memory = memory,
            Err(e) => {
                out.destroy(self.device);
                return Err(e.context("allocate buffer memory"));
            }
        }
        if let Err(e) = self.device.bind_buffer_memory(out.buffer, out.memory, 0) {
            out.destroy(self.device);
            return Err(anyhow!("bind_buffer_memory: {e:?}"));
        }
        Ok(out)
    }

    /// Host-visible, coherent and mapped for the buffer's lifetime.
    pub unsafe fn create_mapped_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<AllocatedBuffer> {
        let mut buf = self.create_buffer(
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        match self
            .device
            .map_memory(buf.memory, 0, size, vk::MemoryMapFlags::empty())
        {
            Ok(ptr) => {
                buf.mapped = NonNull::new(ptr.cast());
                Ok(buf)
            }
            Err(e) => {
                buf.destroy(self.device);
                Err(anyhow!("map_memory: {e:?}"))
            }
        }
    }

    /// Host -> staging -> device-local buffer with `usage | TRANSFER_DST`.
    pub unsafe fn upload_buffer(
        &self,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<AllocatedBuffer> {
        let size = bytes.len() as vk::DeviceSize;
        let mut staging = self.create_mapped_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        let result = self.upload_via(&staging, bytes, usage);
        staging.destroy(self.device);
        result
    }

    unsafe fn upload_via(
        &self,
        staging: &AllocatedBuffer,
        bytes: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<AllocatedBuffer> {
        staging.write(bytes)?;
        let mut dst = self.create_buffer(
            staging.size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let copied = self.one_shot(|cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: staging.size,
            };
            self.device
                .cmd_copy_buffer(cmd, staging.buffer, dst.buffer, std::slice::from_ref(&region));
            Ok(())
        });
        if let Err(e) = copied {
            dst.destroy(self.device);
            return Err(e);
        }
        Ok(dst)
    }

    pub unsafe fn begin_single_time_commands(&self) -> Result<vk::CommandBuffer> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = self
            .device
            .allocate_command_buffers(&ai)
            .context("allocate one-shot command buffer")?[0];
        let bi = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        if let Err(e) = self.device.begin_command_buffer(cmd, &bi) {
            self.device
                .free_command_buffers(self.pool, std::slice::from_ref(&cmd));
            return Err(anyhow!("begin_command_buffer: {e:?}"));
        }
        Ok(cmd)
    }

    /// Ends, submits and waits for the queue, then frees `cmd`.
    pub unsafe fn end_single_time_commands(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let result = (|| -> Result<()> {
            self.device.end_command_buffer(cmd)?;
            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&si), vk::Fence::null())?;
            self.device.queue_wait_idle(self.queue)?;
            Ok(())
        })();
        self.device
            .free_command_buffers(self.pool, std::slice::from_ref(&cmd));
        result.context("one-shot submit")
    }

    unsafe fn one_shot(&self, record: impl FnOnce(vk::CommandBuffer) -> Result<()>) -> Result<()> {
        let cmd = self.begin_single_time_commands()?;
        if let Err(e) = record(cmd) {
            self.device.end_command_buffer(cmd).ok();
            self.device
                .free_command_buffers(self.pool, std::slice::from_ref(&cmd));
            return Err(e);
        }
        self.end_single_time_commands(cmd)
    }

    /// Image plus bound device-local memory. The view is left null.
    pub unsafe fn create_image(&self, spec: &ImageSpec) -> Result<AllocatedImage> {
        let ici = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: spec.format,
            extent: vk::Extent3D {
                width: spec.width,
                height: spec.height,
                depth: 1,
            },
            mip_levels: spec.mip_levels,
            array_layers: 1,
            samples: spec.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: spec.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let mut out = AllocatedImage {
            image: self.device.create_image(&ici, None).context("create_image")?,
            ..Default::default()
        };
        let req = self.device.get_image_memory_requirements(out.image);
        let bound = (|| -> Result<()> {
            let mai = vk::MemoryAllocateInfo {
                s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                allocation_size: req.size,
                memory_type_index: find_memory_type(
                    self.memory,
                    req.memory_type_bits,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )?,
                ..Default::default()
            };
            out.memory = self.device.allocate_memory(&mai, None)?;
            self.device.bind_image_memory(out.image, out.memory, 0)?;
            Ok(())
        })();
        if let Err(e) = bound {
            out.destroy(self.device);
            return Err(e.context("image memory"));
        }
        Ok(out)
    }

    pub unsafe fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> Result<vk::ImageView> {
        create_image_view(self.device, image, format, aspect, mip_levels)
    }

    pub unsafe fn transition_image_layout(
        &self,
        image: vk::Image,
        format: vk::Format,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
        mip_levels: u32,
    ) -> Result<()> {
        // Reject before any command buffer is allocated.
        transition_masks(old, new)?;
        let range = vk::ImageSubresourceRange {
            aspect_mask: aspect_for(format, new),
            ..color_range(0, mip_levels)
        };
        self.one_shot(|cmd| Ok(image_barrier(self.device, cmd, image, range, old, new)?))
    }

    pub unsafe fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.one_shot(|cmd| {
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
            };
            self.device.cmd_copy_buffer_to_image(
                cmd,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            );
            Ok(())
        })
    }

    /// Records `plan_mip_chain` into a one-shot command buffer.
    pub unsafe fn generate_mipmaps(
        &self,
        image: vk::Image,
        width: u32,
        height: u32,
        levels: u32,
    ) -> Result<()> {
        self.one_shot(|cmd| {
            for step in plan_mip_chain(width, height, levels) {
                match step {
                    MipStep::Barrier { level, old, new } => {
                        image_barrier(self.device, cmd, image, color_range(level, 1), old, new)?;
                    }
                    MipStep::Blit { src_level, src, dst } => {
                        let layers = |mip_level| vk::ImageSubresourceLayers {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            mip_level,
                            base_array_layer: 0,
                            layer_count: 1,
                        };
                        let blit = vk::ImageBlit {
                            src_subresource: layers(src_level),
                            src_offsets: [
                                vk::Offset3D::default(),
                                vk::Offset3D { x: src.0, y: src.1, z: 1 },
                            ],
                            dst_subresource: layers(src_level + 1),
                            dst_offsets: [
                                vk::Offset3D::default(),
                                vk::Offset3D { x: dst.0, y: dst.1, z: 1 },
                            ],
                        };
                        self.device.cmd_blit_image(
                            cmd,
                            image,
                            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                            image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            std::slice::from_ref(&blit),
                            vk::Filter::LINEAR,
                        );
                    }
                }
            }
            Ok(())
        })
    }

    /// Uploads RGBA8 pixels as an sRGB texture. Without linear-blit support
    /// the texture gets a single level.
    pub unsafe fn create_texture(
        &self,
        img: &DecodedImage,
        linear_blit: bool,
        max_anisotropy: f32,
    ) -> Result<Texture> {
        let mip_levels = if linear_blit {
            mip_levels_for(img.width, img.height)
        } else {
            tracing::warn!("texture format lacks linear blit support; skipping mipmaps");
            1
        };
        let mut staging = self.create_mapped_buffer(
            img.byte_len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )?;
        let mut tex = Texture {
            mip_levels,
            ..Default::default()
        };
        let result = self.fill_texture(&mut tex, &staging, img, max_anisotropy);
        staging.destroy(self.device);
        match result {
            Ok(()) => {
                tracing::debug!(
                    "texture {}x{} uploaded with {} mip levels",
                    img.width,
                    img.height,
                    mip_levels
                );
                Ok(tex)
            }
            Err(e) => {
                tex.destroy(self.device);
                Err(e)
            }
        }
    }

    unsafe fn fill_texture(
        &self,
        tex: &mut Texture,
        staging: &AllocatedBuffer,
        img: &DecodedImage,
        max_anisotropy: f32,
    ) -> Result<()> {
        let format = crate::device::TEXTURE_FORMAT;
        staging.write(&img.pixels)?;
        tex.image = self.create_image(&ImageSpec {
            width: img.width,
            height: img.height,
            mip_levels: tex.mip_levels,
            samples: vk::SampleCountFlags::TYPE_1,
            format,
            usage: vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
        })?;
        self.transition_image_layout(
            tex.image.image,
            format,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            tex.mip_levels,
        )?;
        self.copy_buffer_to_image(staging.buffer, tex.image.image, img.width, img.height)?;
        self.generate_mipmaps(tex.image.image, img.width, img.height, tex.mip_levels)?;
        tex.image.view = self.create_image_view(
            tex.image.image,
            format,
            vk::ImageAspectFlags::COLOR,
            tex.mip_levels,
        )?;
        tex.sampler = create_sampler(self.device, tex.mip_levels, max_anisotropy)?;
        Ok(())
    }
}

pub unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    mip_levels: u32,
) -> Result<vk::ImageView> {
    let ci = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        components: vk::ComponentMapping::default(),
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: aspect,
            ..color_range(0, mip_levels)
        },
        ..Default::default()
    };
    device.create_image_view(&ci, None).context("create_image_view")
}

unsafe fn create_sampler(
    device: &ash::Device,
    mip_levels: u32,
    max_anisotropy: f32,
) -> Result<vk::Sampler> {
    let ci = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: vk::TRUE,
        max_anisotropy: max_anisotropy.clamp(1.0, 16.0),
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        compare_op: vk::CompareOp::ALWAYS,
        min_lod: 0.0,
        max_lod: mip_levels as f32,
        ..Default::default()
    };
    device.create_sampler(&ci, None).context("create_sampler")
}
