// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;

/// Upper bound for frames in flight.
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The drawables the demo knows how to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectKind {
    /// Textured quad spinning about Y.
    Quad,
    /// Sixteen animated sprites on an orbit.
    Sprites,
}

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub validation: bool,
    /// Requested MSAA samples; 0 picks the device maximum, 1 disables MSAA.
    pub msaa_samples: u32,
    /// Minimum sample shading fraction; `None` leaves it off.
    pub sample_shading: Option<f32>,
    /// Record command buffers once per (frame slot, image) instead of every frame.
    pub pre_record: bool,
    pub objects: Vec<ObjectKind>,
    pub assets_dir: PathBuf,
    pub quad_texture: Option<String>,
    pub sprite_texture: Option<String>,
    pub sprite_sheet: Option<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            frames_in_flight: 2,
            validation: cfg!(debug_assertions),
            msaa_samples: 0,
            sample_shading: None,
            pre_record: false,
            objects: vec![ObjectKind::Quad, ObjectKind::Sprites],
            assets_dir: PathBuf::from("ass"),
            quad_texture: None,
            sprite_texture: None,
            sprite_sheet: None,
        }
    }
}

impl RendererConfig {
    /// Frames in flight forced into `1..=MAX_FRAMES_IN_FLIGHT`.
    pub fn clamped_frames_in_flight(&self) -> usize {
        self.frames_in_flight.clamp(1, MAX_FRAMES_IN_FLIGHT)
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        cfg: RendererConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Takes note of the new size; the swapchain follows on the next frame.
    fn resize(&mut self, size: RenderSize) -> Result<()>;
    fn render(&mut self) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_in_flight_is_clamped() {
        let mut cfg = RendererConfig::default();
        cfg.frames_in_flight = 0;
        assert_eq!(cfg.clamped_frames_in_flight(), 1);
        cfg.frames_in_flight = 9;
        assert_eq!(cfg.clamped_frames_in_flight(), MAX_FRAMES_IN_FLIGHT);
        cfg.frames_in_flight = 3;
        assert_eq!(cfg.clamped_frames_in_flight(), 3);
    }

    #[test]
    fn empty_sizes() {
        assert!(RenderSize { width: 0, height: 5 }.is_empty());
        assert!(!RenderSize { width: 1, height: 1 }.is_empty());
    }
}
