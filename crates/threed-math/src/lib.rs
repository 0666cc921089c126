// SPDX-License-Identifier: CEPL-1.0
//! Uniform layouts and the small amount of math the demo objects need.
use bytemuck::{Pod, Zeroable};
pub use glam::{Mat4, Vec2, Vec3};

/// Sprites drawn per instanced draw call.
pub const SPRITE_INSTANCES: usize = 16;

/// One sprite frame: four corners of `(px, py, tu, tv)`.
pub type QuadCorners = [[f32; 4]; 4];

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MvpUniform {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub all: [[f32; 4]; 4],
}

impl MvpUniform {
    pub fn new(model: Mat4, view: Mat4, proj: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            all: (proj * view * model).to_cols_array_2d(),
        }
    }
}

/// std140 layout: two vec2 followed by a 16-byte aligned vec4 array.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SpriteUniform {
    pub offset: [f32; 2],
    pub scale: [f32; 2],
    pub quads: [QuadCorners; SPRITE_INSTANCES],
}

impl Default for SpriteUniform {
    fn default() -> Self {
        Zeroable::zeroed()
    }
}

/// Quad spinning about +Y, seen from `(0, 0, -1)` through an orthographic
/// projection with Vulkan's downward Y.
pub fn spinning_quad(seconds: f32) -> MvpUniform {
    let model = Mat4::from_rotation_y(seconds);
    let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, -1.0), Vec3::ZERO, Vec3::Y);
    let proj = Mat4::orthographic_rh(-1.0, 1.0, 1.0, -1.0, 0.1, 10.0);
    MvpUniform::new(model, view, proj)
}

/// Offset and scale mapping window pixels to NDC: `ndc = (p - offset) * scale`.
pub fn screen_mapping(width: u32, height: u32) -> ([f32; 2], [f32; 2]) {
    let hw = width.max(1) as f32 * 0.5;
    let hh = height.max(1) as f32 * 0.5;
    ([hw, hh], [1.0 / hw, 1.0 / hh])
}

/// Point on an ellipse around `center`; angle 0 sits at `center + (0, radii.y)`.
pub fn orbit_position(center: Vec2, radii: Vec2, angle: f32) -> Vec2 {
    center + Vec2::new(radii.x * angle.sin(), radii.y * angle.cos())
}

/// Moves the corner positions of a frame, leaving texture coordinates alone.
pub fn translate_quad(frame: &QuadCorners, by: Vec2) -> QuadCorners {
    let mut out = *frame;
    for corner in &mut out {
        corner[0] += by.x;
        corner[1] += by.y;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: &[[f32; 4]; 4], b: &[[f32; 4]; 4]) -> bool {
        a.iter()
            .flatten()
            .zip(b.iter().flatten())
            .all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn all_is_proj_view_model() {
        let u = spinning_quad(0.7);
        let all = Mat4::from_cols_array_2d(&u.proj)
            * Mat4::from_cols_array_2d(&u.view)
            * Mat4::from_cols_array_2d(&u.model);
        assert!(approx(&all.to_cols_array_2d(), &u.all));
    }

    #[test]
    fn quad_at_rest_is_visible_in_depth_range() {
        let u = spinning_quad(0.0);
        assert!(approx(&u.model, &Mat4::IDENTITY.to_cols_array_2d()));
        let clip = Mat4::from_cols_array_2d(&u.all) * glam::Vec4::new(0.5, 0.5, 0.0, 1.0);
        assert!(clip.z >= 0.0 && clip.z <= clip.w);
    }

    #[test]
    fn screen_mapping_hits_ndc_corners() {
        let (offset, scale) = screen_mapping(1280, 768);
        let ndc = |x: f32, y: f32| ((x - offset[0]) * scale[0], (y - offset[1]) * scale[1]);
        assert_eq!(ndc(0.0, 0.0), (-1.0, -1.0));
        assert_eq!(ndc(1280.0, 768.0), (1.0, 1.0));
    }

    #[test]
    fn screen_mapping_survives_zero_size() {
        let (_, scale) = screen_mapping(0, 0);
        assert!(scale.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn orbit_starts_below_center() {
        let p = orbit_position(Vec2::new(10.0, 20.0), Vec2::new(3.0, 4.0), 0.0);
        assert_eq!(p, Vec2::new(10.0, 24.0));
    }

    #[test]
    fn translate_keeps_uvs() {
        let frame = [
            [0.0, 0.0, 0.1, 0.2],
            [8.0, 0.0, 0.3, 0.2],
            [8.0, 8.0, 0.3, 0.4],
            [0.0, 8.0, 0.1, 0.4],
        ];
        let moved = translate_quad(&frame, Vec2::new(5.0, -1.0));
        for (a, b) in frame.iter().zip(moved.iter()) {
            assert_eq!(b[0], a[0] + 5.0);
            assert_eq!(b[1], a[1] - 1.0);
            assert_eq!(&b[2..], &a[2..]);
        }
    }

    #[test]
    fn sprite_uniform_matches_std140_size() {
        assert_eq!(std::mem::size_of::<SpriteUniform>(), 16 + 16 * 64);
        assert_eq!(std::mem::size_of::<MvpUniform>(), 4 * 64);
    }
}
