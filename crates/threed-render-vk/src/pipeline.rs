// SPDX-License-Identifier: CEPL-1.0
//! Shader modules, descriptor layouts/pools and graphics pipelines.
use crate::error::VkError;
use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use threed_assets::{AssetRoot, ShaderStage};

const ENTRY: &CStr = c"main";

/// Validates length and alignment, then decodes to words.
pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>, VkError> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return Err(VkError::InvalidSpirv { len: bytes.len() });
    }
    ash::util::read_spv(&mut std::io::Cursor::new(bytes))
        .map_err(|_| VkError::InvalidSpirv { len: bytes.len() })
}

pub unsafe fn create_shader_module(device: &ash::Device, bytes: &[u8]) -> Result<vk::ShaderModule> {
    let words = spirv_words(bytes)?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        code_size: words.len() * 4,
        p_code: words.as_ptr(),
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .context("create_shader_module")
}

#[cfg(feature = "shaderc")]
fn embedded_shader(name: &str, stage: ShaderStage) -> Option<&'static [u8]> {
    let bytes: &'static [u8] = match (name, stage) {
        ("mesh", ShaderStage::Vertex) => {
            include_bytes!(concat!(env!("OUT_DIR"), "/mesh.vert.spv"))
        }
        ("mesh", ShaderStage::Fragment) => {
            include_bytes!(concat!(env!("OUT_DIR"), "/mesh.frag.spv"))
        }
        ("sprite", ShaderStage::Vertex) => {
            include_bytes!(concat!(env!("OUT_DIR"), "/sprite.vert.spv"))
        }
        ("sprite", ShaderStage::Fragment) => {
            include_bytes!(concat!(env!("OUT_DIR"), "/sprite.frag.spv"))
        }
        _ => return None,
    };
    Some(bytes)
}

#[cfg(not(feature = "shaderc"))]
fn embedded_shader(_name: &str, _stage: ShaderStage) -> Option<&'static [u8]> {
    None
}

/// `<assets>/shaders/<name>.<stage>.spv`, falling back to the build-time copy.
pub fn load_shader(assets: &AssetRoot, name: &str, stage: ShaderStage) -> Result<Vec<u8>> {
    let path = assets.shader_path(name, stage);
    if let Some(bytes) = assets.read_optional(&path)? {
        return Ok(bytes);
    }
    match embedded_shader(name, stage) {
        Some(bytes) => {
            tracing::debug!("{} missing; using embedded {name} shader", path.display());
            Ok(bytes.to_vec())
        }
        None => Err(VkError::MissingShader {
            name: name.to_string(),
            stage: stage.extension(),
        }
        .into()),
    }
}

/// Binding 0 per-vertex input as the pipeline sees it.
#[derive(Clone, Debug)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl VertexLayout {
    pub fn binding(&self) -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: self.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }
}

/// Vertex structs describe their own layout.
pub trait VertexType: bytemuck::Pod {
    fn layout() -> VertexLayout;
}

/// Shorthand for an attribute at `location` in binding 0.
pub fn attribute(
    location: u32,
    format: vk::Format,
    offset: usize,
) -> vk::VertexInputAttributeDescription {
    vk::VertexInputAttributeDescription {
        location,
        binding: 0,
        format,
        offset: offset as u32,
    }
}

/// Fixed-function state callers are allowed to vary.
#[derive(Clone, Debug)]
pub struct PipelineDesc<'a> {
    pub vertex: &'a VertexLayout,
    pub cull_mode: vk::CullModeFlags,
    pub samples: vk::SampleCountFlags,
    pub min_sample_shading: Option<f32>,
}

/// Builds the layout and pipeline. Shader modules are destroyed before
/// returning whether or not creation succeeded.
pub unsafe fn build_graphics_pipeline(
    device: &ash::Device,
    desc: &PipelineDesc<'_>,
    vert_spv: &[u8],
    frag_spv: &[u8],
    set_layout: vk::DescriptorSetLayout,
    render_pass: vk::RenderPass,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    let vert = create_shader_module(device, vert_spv).context("vertex shader")?;
    let frag = match create_shader_module(device, frag_spv).context("fragment shader") {
        Ok(m) => m,
        Err(e) => {
            device.destroy_shader_module(vert, None);
            return Err(e);
        }
    };
    let result = build_with_modules(device, desc, vert, frag, set_layout, render_pass);
    device.destroy_shader_module(frag, None);
    device.destroy_shader_module(vert, None);
    result
}

unsafe fn build_with_modules(
    device: &ash::Device,
    desc: &PipelineDesc<'_>,
    vert: vk::ShaderModule,
    frag: vk::ShaderModule,
    set_layout: vk::DescriptorSetLayout,
    render_pass: vk::RenderPass,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vert,
            p_name: ENTRY.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: frag,
            p_name: ENTRY.as_ptr(),
            ..Default::default()
        },
    ];

    let binding = desc.vertex.binding();
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        vertex_binding_description_count: 1,
        p_vertex_binding_descriptions: &binding,
        vertex_attribute_description_count: desc.vertex.attributes.len() as u32,
        p_vertex_attribute_descriptions: desc.vertex.attributes.as_ptr(),
        ..Default::default()
    };

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    };

    // Viewport and scissor are dynamic, only the counts live here.
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };

    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: vk::PolygonMode::FILL,
        cull_mode: desc.cull_mode,
        front_face: vk::FrontFace::COUNTER_CLOCKWISE,
        line_width: 1.0,
        ..Default::default()
    };

    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: desc.samples,
        sample_shading_enable: if desc.min_sample_shading.is_some() {
            vk::TRUE
        } else {
            vk::FALSE
        },
        min_sample_shading: desc.min_sample_shading.unwrap_or(0.0),
        ..Default::default()
    };

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: vk::TRUE,
        depth_write_enable: vk::TRUE,
        depth_compare_op: vk::CompareOp::LESS,
        depth_bounds_test_enable: vk::FALSE,
        stencil_test_enable: vk::FALSE,
        min_depth_bounds: 0.0,
        max_depth_bounds: 1.0,
        ..Default::default()
    };

    let blend_attachment = vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::FALSE,
        color_write_mask: vk::ColorComponentFlags::RGBA,
        ..Default::default()
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &blend_attachment,
        ..Default::default()
    };

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dynamic_states.len() as u32,
        p_dynamic_states: dynamic_states.as_ptr(),
        ..Default::default()
    };

    let layout_ci = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: 1,
        p_set_layouts: &set_layout,
        ..Default::default()
    };
    let layout = device
        .create_pipeline_layout(&layout_ci, None)
        .context("create_pipeline_layout")?;

    let ci = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    match device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&ci),
        None,
    ) {
        Ok(pipelines) => Ok((layout, pipelines[0])),
        Err((_, e)) => {
            device.destroy_pipeline_layout(layout, None);
            Err(anyhow::anyhow!("create_graphics_pipelines: {e:?}"))
        }
    }
}

/// Accumulates bindings, one descriptor each.
#[derive(Clone, Debug, Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_binding(
        mut self,
        binding: u32,
        ty: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(vk::DescriptorSetLayoutBinding {
            binding,
            descriptor_type: ty,
            descriptor_count: 1,
            stage_flags: stages,
            ..Default::default()
        });
        self
    }

    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'static>] {
        &self.bindings
    }

    pub unsafe fn build(&self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let ci = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: self.bindings.len() as u32,
            p_bindings: self.bindings.as_ptr(),
            ..Default::default()
        };
        device
            .create_descriptor_set_layout(&ci, None)
            .context("create_descriptor_set_layout")
    }
}

/// One entry per descriptor type, sized for `frames` sets.
pub fn pool_sizes(
    bindings: &[vk::DescriptorSetLayoutBinding<'_>],
    frames: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut out: Vec<vk::DescriptorPoolSize> = Vec::new();
    for b in bindings {
        let count = b.descriptor_count * frames;
        match out.iter_mut().find(|p| p.ty == b.descriptor_type) {
            Some(p) => p.descriptor_count += count,
            None => out.push(vk::DescriptorPoolSize {
                ty: b.descriptor_type,
                descriptor_count: count,
            }),
        }
    }
    out
}

pub unsafe fn create_descriptor_pool(
    device: &ash::Device,
    sizes: &[vk::DescriptorPoolSize],
    max_sets: u32,
) -> Result<vk::DescriptorPool> {
    let ci = vk::DescriptorPoolCreateInfo {
        s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
        max_sets,
        pool_size_count: sizes.len() as u32,
        p_pool_sizes: sizes.as_ptr(),
        ..Default::default()
    };
    device
        .create_descriptor_pool(&ci, None)
        .context("create_descriptor_pool")
}

pub unsafe fn allocate_descriptor_sets(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
    count: usize,
) -> Result<Vec<vk::DescriptorSet>> {
    let layouts = vec![layout; count];
    let ai = vk::DescriptorSetAllocateInfo {
        s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
        descriptor_pool: pool,
        descriptor_set_count: layouts.len() as u32,
        p_set_layouts: layouts.as_ptr(),
        ..Default::default()
    };
    device
        .allocate_descriptor_sets(&ai)
        .context("allocate_descriptor_sets")
}

/// Points binding 0 at `uniform` and binding 1 at the sampled texture.
pub unsafe fn write_object_descriptors(
    device: &ash::Device,
    set: vk::DescriptorSet,
    uniform: vk::Buffer,
    uniform_range: vk::DeviceSize,
    view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let buffer_info = vk::DescriptorBufferInfo {
        buffer: uniform,
        offset: 0,
        range: uniform_range,
    };
    let image_info = vk::DescriptorImageInfo {
        sampler,
        image_view: view,
        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    };
    let writes = [
        vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            p_buffer_info: &buffer_info,
            ..Default::default()
        },
        vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: 1,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &image_info,
            ..Default::default()
        },
    ];
    device.update_descriptor_sets(&writes, &[]);
}
