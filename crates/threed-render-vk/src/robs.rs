// SPDX-License-Identifier: CEPL-1.0
//! The demo's drawables: a spinning textured quad and an orbiting sprite swarm.
use crate::pipeline::{
    allocate_descriptor_sets, attribute, build_graphics_pipeline, create_descriptor_pool,
    load_shader, pool_sizes, write_object_descriptors, DescriptorLayoutBuilder, PipelineDesc,
    VertexLayout, VertexType,
};
use crate::rob::{FrameInfo, GpuContext, RenderObject};
use crate::take_handle;
use crate::upload::{AllocatedBuffer, Texture};
use anyhow::{anyhow, Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};
use threed_assets::{AssetRoot, DecodedImage, ShaderStage, SpriteSheet};
use threed_math::{
    orbit_position, screen_mapping, spinning_quad, translate_quad, MvpUniform, QuadCorners,
    SpriteUniform, Vec2, SPRITE_INSTANCES,
};
use threed_render::{ObjectKind, RendererConfig};

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl VertexType for MeshVertex {
    fn layout() -> VertexLayout {
        VertexLayout {
            stride: size_of::<Self>() as u32,
            attributes: vec![
                attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, pos)),
                attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Self, color)),
                attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Self, uv)),
            ],
        }
    }
}

/// Sprite corners come from the uniform; these only offset them.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SpriteVertex {
    pub pos: [f32; 2],
    pub uv: [f32; 2],
}

impl VertexType for SpriteVertex {
    fn layout() -> VertexLayout {
        VertexLayout {
            stride: size_of::<Self>() as u32,
            attributes: vec![
                attribute(0, vk::Format::R32G32_SFLOAT, offset_of!(Self, pos)),
                attribute(1, vk::Format::R32G32_SFLOAT, offset_of!(Self, uv)),
            ],
        }
    }
}

pub const QUAD_VERTICES: [MeshVertex; 4] = [
    MeshVertex {
        pos: [-0.5, -0.5, 0.0],
        color: [1.0, 0.0, 0.0],
        uv: [0.0, 0.0],
    },
    MeshVertex {
        pos: [0.5, -0.5, 0.0],
        color: [0.0, 1.0, 1.0],
        uv: [1.0, 0.0],
    },
    MeshVertex {
        pos: [0.5, 0.5, 0.0],
        color: [0.0, 0.0, 1.0],
        uv: [1.0, 1.0],
    },
    MeshVertex {
        pos: [-0.5, 0.5, 0.0],
        color: [1.0, 1.0, 1.0],
        uv: [0.0, 1.0],
    },
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextureSource {
    /// File under `textures/`; a checkerboard stands in when it is missing.
    File(String),
    Checkerboard,
}

/// Produces the uniform bytes for one frame.
pub trait Animator {
    fn uniforms(&mut self, frame: &FrameInfo) -> &[u8];
}

pub struct MeshConfig {
    pub name: &'static str,
    pub shader: &'static str,
    pub layout: VertexLayout,
    pub vertices: Vec<u8>,
    pub indices: Vec<u16>,
    pub instance_count: u32,
    pub uniform_size: usize,
    pub texture: TextureSource,
    pub cull_mode: vk::CullModeFlags,
}

#[derive(Default)]
struct MeshGpu {
    texture: Texture,
    vertex: AllocatedBuffer,
    index: AllocatedBuffer,
    uniforms: Vec<AllocatedBuffer>,
    set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

/// Indexed, textured, instanced draw with one uniform buffer per frame slot.
pub struct MeshObject {
    cfg: MeshConfig,
    animator: Box<dyn Animator>,
    gpu: MeshGpu,
}

impl MeshObject {
    pub fn new(cfg: MeshConfig, animator: Box<dyn Animator>) -> Self {
        Self {
            cfg,
            animator,
            gpu: MeshGpu::default(),
        }
    }

    fn load_texture(&self, assets: &AssetRoot) -> Result<DecodedImage> {
        let file = match &self.cfg.texture {
            TextureSource::Checkerboard => return Ok(DecodedImage::checkerboard(256, 32)),
            TextureSource::File(file) => file,
        };
        let path = assets.texture_path(file);
        match assets.read_optional(&path)? {
            Some(bytes) => Ok(DecodedImage::decode(&bytes)
                .with_context(|| format!("decode {}", path.display()))?),
            None => {
                tracing::warn!("{} not found; using a checkerboard", path.display());
                Ok(DecodedImage::checkerboard(256, 32))
            }
        }
    }

    // STRICT ORDER: texture, geometry, uniforms, descriptors, pipeline.
    unsafe fn create_resources(&mut self, gpu: &GpuContext<'_>) -> Result<()> {
        let device = gpu.device;
        let img = self.load_texture(gpu.assets)?;
        self.gpu.texture = gpu
            .uploader
            .create_texture(&img, gpu.linear_blit, gpu.max_anisotropy)?;

        self.gpu.vertex = gpu
            .uploader
            .upload_buffer(&self.cfg.vertices, vk::BufferUsageFlags::VERTEX_BUFFER)?;
        self.gpu.index = gpu.uploader.upload_buffer(
            bytemuck::cast_slice(&self.cfg.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let ubo_size = self.cfg.uniform_size as vk::DeviceSize;
        for _ in 0..gpu.frames_in_flight {
            let ubo = gpu
                .uploader
                .create_mapped_buffer(ubo_size, vk::BufferUsageFlags::UNIFORM_BUFFER)?;
            self.gpu.uniforms.push(ubo);
        }

        let layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)
            .add_binding(
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            );
        self.gpu.set_layout = layout.build(device)?;
        let frames = gpu.frames_in_flight as u32;
        self.gpu.pool =
            create_descriptor_pool(device, &pool_sizes(layout.bindings(), frames), frames)?;
        self.gpu.sets = allocate_descriptor_sets(
            device,
            self.gpu.pool,
            self.gpu.set_layout,
            gpu.frames_in_flight,
        )?;
        for (set, ubo) in self.gpu.sets.iter().zip(&self.gpu.uniforms) {
            write_object_descriptors(
                device,
                *set,
                ubo.buffer,
                ubo_size,
                self.gpu.texture.image.view,
                self.gpu.texture.sampler,
            );
        }

        self.build_pipeline(gpu)
    }

    /// Pipeline against `gpu.render_pass`, replacing any previous one.
    unsafe fn build_pipeline(&mut self, gpu: &GpuContext<'_>) -> Result<()> {
        self.destroy_pipeline(gpu.device);
        let device = gpu.device;
        let vert = load_shader(gpu.assets, self.cfg.shader, ShaderStage::Vertex)?;
        let frag = load_shader(gpu.assets, self.cfg.shader, ShaderStage::Fragment)?;
        let desc = PipelineDesc {
            vertex: &self.cfg.layout,
            cull_mode: self.cfg.cull_mode,
            samples: gpu.samples,
            min_sample_shading: gpu.min_sample_shading,
        };
        let (layout, pipeline) = build_graphics_pipeline(
            device,
            &desc,
            &vert,
            &frag,
            self.gpu.set_layout,
            gpu.render_pass,
        )
        .with_context(|| format!("{} pipeline", self.cfg.name))?;
        self.gpu.pipeline_layout = layout;
        self.gpu.pipeline = pipeline;
        Ok(())
    }

    unsafe fn destroy_pipeline(&mut self, device: &ash::Device) {
        if let Some(p) = take_handle(&mut self.gpu.pipeline) {
            device.destroy_pipeline(p, None);
        }
        if let Some(l) = take_handle(&mut self.gpu.pipeline_layout) {
            device.destroy_pipeline_layout(l, None);
        }
    }
}

impl RenderObject for MeshObject {
    fn name(&self) -> &str {
        self.cfg.name
    }

    fn create(&mut self, gpu: &GpuContext<'_>) -> Result<()> {
        unsafe { self.create_resources(gpu) }?;
        tracing::info!(
            "{}: {} indices x {} instances",
            self.cfg.name,
            self.cfg.indices.len(),
            self.cfg.instance_count
        );
        Ok(())
    }

    fn update(&mut self, frame: &FrameInfo) -> Result<()> {
        let ubo = self
            .gpu
            .uniforms
            .get(frame.slot)
            .ok_or_else(|| {
                anyhow!("{}: no uniform buffer for slot {}", self.cfg.name, frame.slot)
            })?;
        let bytes = self.animator.uniforms(frame);
        // The slot's fence has signaled, so the GPU is done reading this buffer.
        unsafe { ubo.write(bytes) }
    }

    fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        frame: &FrameInfo,
    ) -> Result<()> {
        let set = *self
            .gpu
            .sets
            .get(frame.slot)
            .ok_or_else(|| {
                anyhow!("{}: no descriptor set for slot {}", self.cfg.name, frame.slot)
            })?;
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.gpu.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.gpu.vertex.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, self.gpu.index.buffer, 0, vk::IndexType::UINT16);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.gpu.pipeline_layout,
                0,
                &[set],
                &[],
            );
            device.cmd_draw_indexed(
                cmd,
                self.cfg.indices.len() as u32,
                self.cfg.instance_count,
                0,
                0,
                0,
            );
        }
        Ok(())
    }

    fn rebuild_pipeline(&mut self, gpu: &GpuContext<'_>) -> Result<()> {
        unsafe { self.build_pipeline(gpu) }
            .with_context(|| format!("{} pipeline rebuild", self.cfg.name))
    }

    fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            self.destroy_pipeline(device);
            let gpu = &mut self.gpu;
            // Sets go with their pool.
            gpu.sets.clear();
            if let Some(p) = take_handle(&mut gpu.pool) {
                device.destroy_descriptor_pool(p, None);
            }
            if let Some(l) = take_handle(&mut gpu.set_layout) {
                device.destroy_descriptor_set_layout(l, None);
            }
            for ubo in &mut gpu.uniforms {
                ubo.destroy(device);
            }
            gpu.uniforms.clear();
            gpu.index.destroy(device);
            gpu.vertex.destroy(device);
            gpu.texture.destroy(device);
        }
    }
}

/// Rotates the quad about Y at one radian per second.
#[derive(Default)]
pub struct Spinner {
    ubo: MvpUniform,
}

impl Animator for Spinner {
    fn uniforms(&mut self, frame: &FrameInfo) -> &[u8] {
        self.ubo = spinning_quad(frame.seconds);
        bytemuck::bytes_of(&self.ubo)
    }
}

/// The orbit advances one radian per ten seconds of wall time.
const ORBIT_TIME_SCALE: f32 = 0.1;

/// Sixteen sprites cycling through `frames` while they orbit the screen.
pub struct SpriteSwarm {
    frames: Vec<QuadCorners>,
    counters: [usize; SPRITE_INSTANCES],
    half: Vec2,
    ubo: SpriteUniform,
}

impl SpriteSwarm {
    pub fn new(frames: Vec<QuadCorners>) -> Self {
        let frames = if frames.is_empty() {
            vec![default_sprite_frame()]
        } else {
            frames
        };
        let mut counters = [0; SPRITE_INSTANCES];
        for (i, c) in counters.iter_mut().enumerate() {
            *c = (i * 3) % frames.len();
        }
        Self {
            half: frame_half_size(&frames[0]),
            frames,
            counters,
            ubo: SpriteUniform::default(),
        }
    }

    pub fn uniform(&self) -> &SpriteUniform {
        &self.ubo
    }

    fn step(&mut self, frame: &FrameInfo) {
        let (offset, scale) = screen_mapping(frame.extent.width, frame.extent.height);
        self.ubo.offset = offset;
        self.ubo.scale = scale;

        let half_screen = Vec2::new(frame.extent.width as f32, frame.extent.height as f32) * 0.5;
        let center = half_screen - self.half;
        let t = frame.seconds * ORBIT_TIME_SCALE;
        let swing = (t * 0.5).sin();
        let radii = Vec2::new(6.0 * self.half.x, 4.0 * self.half.y) * swing;
        let step = std::f32::consts::TAU / SPRITE_INSTANCES as f32;

        let n = self.frames.len();
        for (i, counter) in self.counters.iter_mut().enumerate() {
            let angle = t + step * i as f32;
            let at = orbit_position(center, radii, angle);
            self.ubo.quads[i] = translate_quad(&self.frames[*counter % n], at);
            *counter = (*counter + 1) % n;
        }
    }
}

impl Animator for SpriteSwarm {
    fn uniforms(&mut self, frame: &FrameInfo) -> &[u8] {
        self.step(frame);
        bytemuck::bytes_of(&self.ubo)
    }
}

/// 128px square covering the whole texture.
pub fn default_sprite_frame() -> QuadCorners {
    [
        [0.0, 0.0, 0.0, 0.0],
        [128.0, 0.0, 1.0, 0.0],
        [128.0, 128.0, 1.0, 1.0],
        [0.0, 128.0, 0.0, 1.0],
    ]
}

fn frame_half_size(frame: &QuadCorners) -> Vec2 {
    let (mut min, mut max) = (Vec2::splat(f32::MAX), Vec2::splat(f32::MIN));
    for c in frame {
        let p = Vec2::new(c[0], c[1]);
        min = min.min(p);
        max = max.max(p);
    }
    (max - min) * 0.5
}

/// Group 0 when the sheet has groups, otherwise every frame.
pub fn sheet_frames(sheet: &SpriteSheet) -> Vec<QuadCorners> {
    let frames = sheet.group_frames(0).unwrap_or(&sheet.frames[..]);
    frames.iter().map(|f| f.corners).collect()
}

fn texture_source(file: &Option<String>) -> TextureSource {
    match file {
        Some(f) => TextureSource::File(f.clone()),
        None => TextureSource::Checkerboard,
    }
}

pub fn quad_object(cfg: &RendererConfig) -> MeshObject {
    MeshObject::new(
        MeshConfig {
            name: "quad",
            shader: "mesh",
            layout: MeshVertex::layout(),
            vertices: bytemuck::cast_slice(&QUAD_VERTICES).to_vec(),
            indices: QUAD_INDICES.to_vec(),
            instance_count: 1,
            uniform_size: size_of::<MvpUniform>(),
            texture: texture_source(&cfg.quad_texture),
            cull_mode: vk::CullModeFlags::BACK,
        },
        Box::new(Spinner::default()),
    )
}

pub fn sprite_object(cfg: &RendererConfig, assets: &AssetRoot) -> Result<MeshObject> {
    let frames = match &cfg.sprite_sheet {
        Some(file) => sheet_frames(
            &SpriteSheet::load(assets, file).with_context(|| format!("sprite sheet {file}"))?,
        ),
        None => Vec::new(),
    };
    Ok(MeshObject::new(
        MeshConfig {
            name: "sprites",
            shader: "sprite",
            layout: SpriteVertex::layout(),
            vertices: bytemuck::cast_slice(&[SpriteVertex::default(); 4]).to_vec(),
            indices: QUAD_INDICES.to_vec(),
            instance_count: SPRITE_INSTANCES as u32,
            uniform_size: size_of::<SpriteUniform>(),
            texture: texture_source(&cfg.sprite_texture),
            // Sprites are seen from both sides as they orbit.
            cull_mode: vk::CullModeFlags::NONE,
        },
        Box::new(SpriteSwarm::new(frames)),
    ))
}

pub fn build_object(
    kind: ObjectKind,
    cfg: &RendererConfig,
    assets: &AssetRoot,
) -> Result<Box<dyn RenderObject>> {
    Ok(match kind {
        ObjectKind::Quad => Box::new(quad_object(cfg)),
        ObjectKind::Sprites => Box::new(sprite_object(cfg, assets)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seconds: f32) -> FrameInfo {
        FrameInfo {
            slot: 0,
            image_index: 0,
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            seconds,
            pre_record: false,
        }
    }

    #[test]
    fn mesh_vertex_layout_matches_struct() {
        let l = MeshVertex::layout();
        assert_eq!(l.stride, 32);
        let offsets: Vec<u32> = l.attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 12, 24]);
        let locations: Vec<u32> = l.attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, vec![0, 1, 2]);
        assert_eq!(l.attributes[2].format, vk::Format::R32G32_SFLOAT);
    }

    #[test]
    fn sprite_vertex_layout_matches_struct() {
        let l = SpriteVertex::layout();
        assert_eq!(l.stride, 16);
        assert_eq!(l.attributes.len(), 2);
        assert_eq!(l.attributes[1].offset, 8);
    }

    #[test]
    fn quad_geometry() {
        assert_eq!(QUAD_INDICES.iter().copied().max(), Some(3));
        assert_eq!(QUAD_VERTICES[1].color, [0.0, 1.0, 1.0]);
        assert_eq!(QUAD_VERTICES[3].uv, [0.0, 1.0]);
        let cfg = RendererConfig::default();
        let quad = quad_object(&cfg);
        assert_eq!(quad.name(), "quad");
        assert_eq!(quad.cfg.vertices.len(), 4 * size_of::<MeshVertex>());
        assert_eq!(quad.cfg.texture, TextureSource::Checkerboard);
    }

    #[test]
    fn spinner_writes_a_full_mvp() {
        let mut s = Spinner::default();
        let bytes = s.uniforms(&frame(0.25)).to_vec();
        assert_eq!(bytes.len(), size_of::<MvpUniform>());
        assert_eq!(bytes, bytemuck::bytes_of(&spinning_quad(0.25)));
    }

    #[test]
    fn swarm_counters_start_staggered_and_advance() {
        let frames: Vec<QuadCorners> = (0..5)
            .map(|i| {
                let mut f = default_sprite_frame();
                f[0][2] = i as f32;
                f
            })
            .collect();
        let mut swarm = SpriteSwarm::new(frames);
        assert_eq!(swarm.counters[0], 0);
        assert_eq!(swarm.counters[1], 3);
        assert_eq!(swarm.counters[2], 1);

        swarm.uniforms(&frame(0.0));
        // The first update draws the staggered frame, then moves on.
        assert_eq!(swarm.uniform().quads[1][0][2], 3.0);
        assert_eq!(swarm.counters[1], 4);
        swarm.uniforms(&frame(0.1));
        assert_eq!(swarm.uniform().quads[1][0][2], 4.0);
    }

    #[test]
    fn swarm_collapses_to_center_at_time_zero() {
        let mut swarm = SpriteSwarm::new(Vec::new());
        swarm.uniforms(&frame(0.0));
        let u = swarm.uniform();
        assert_eq!(u.offset, [400.0, 300.0]);
        // Radii scale with sin(0) = 0, so every sprite sits at the same spot.
        let expected = translate_quad(&default_sprite_frame(), Vec2::new(336.0, 236.0));
        for quad in &u.quads {
            assert_eq!(*quad, expected);
        }
    }

    #[test]
    fn swarm_spreads_sprites_around_the_orbit() {
        let mut swarm = SpriteSwarm::new(Vec::new());
        swarm.uniforms(&frame(std::f32::consts::PI));
        let u = swarm.uniform();
        assert_ne!(u.quads[0], u.quads[8]);
    }

    #[test]
    fn orbit_runs_at_a_tenth_of_wall_time() {
        let mut swarm = SpriteSwarm::new(Vec::new());
        // 10π seconds: angle π, swing sin(π/2) = 1, radii (384, 256).
        swarm.uniforms(&frame(10.0 * std::f32::consts::PI));
        let corner = swarm.uniform().quads[0][0];
        assert!((corner[0] - 336.0).abs() < 0.01, "x = {}", corner[0]);
        assert!((corner[1] - (236.0 - 256.0)).abs() < 0.01, "y = {}", corner[1]);
    }

    #[test]
    fn sheet_prefers_first_group() {
        let mut sheet = SpriteSheet::default();
        for i in 0..4 {
            let mut f = threed_assets::RectVertices::default();
            f.corners[0][0] = i as f32;
            sheet.frames.push(f);
        }
        assert_eq!(sheet_frames(&sheet).len(), 4);
        sheet.groups.push(threed_assets::SpriteGroup {
            frame_start: 1,
            frame_count: 2,
            bounding: Default::default(),
        });
        let frames = sheet_frames(&sheet);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0][0][0], 1.0);
    }

    #[test]
    fn missing_sheet_is_an_error() {
        let mut cfg = RendererConfig::default();
        cfg.sprite_sheet = Some("nope.bin".into());
        let root = AssetRoot::new("/nonexistent/threed-assets");
        assert!(sprite_object(&cfg, &root).is_err());
        cfg.sprite_sheet = None;
        let sprites = sprite_object(&cfg, &root).expect("default frames");
        assert_eq!(sprites.cfg.instance_count, 16);
        assert_eq!(sprites.cfg.cull_mode, vk::CullModeFlags::NONE);
    }
}
