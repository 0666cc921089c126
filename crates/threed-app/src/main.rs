// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};
use threed_core::init_tracing;
use threed_platform::{is_minimized, is_quit_key, window_attributes};
use threed_render::{ObjectKind, RenderSize, Renderer, RendererConfig};
use threed_render_vk::VkRenderer;
use tracing::{debug, error, info, warn};

use threed_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::ModifiersState,
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing means built-in defaults
    #[arg(long, default_value = "threed.toml")]
    config: PathBuf,
    /// Asset root, overrides `[assets] dir`
    #[arg(long)]
    assets: Option<PathBuf>,
    /// Frames in flight, clamped to 1..=4
    #[arg(long)]
    frames_in_flight: Option<usize>,
    /// Skip the validation layer even in debug builds
    #[arg(long)]
    no_validation: bool,
    /// Record command buffers once per image instead of every frame
    #[arg(long)]
    pre_record: bool,
    /// Objects to draw, e.g. `--objects quad,sprites`
    #[arg(long, value_enum, value_delimiter = ',')]
    objects: Option<Vec<ObjectCfg>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
enum ObjectCfg {
    Quad,
    Sprites,
}

impl From<ObjectCfg> for ObjectKind {
    fn from(o: ObjectCfg) -> Self {
        match o {
            ObjectCfg::Quad => ObjectKind::Quad,
            ObjectCfg::Sprites => ObjectKind::Sprites,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct WindowCfg {
    title: String,
    width: u32,
    height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: threed_platform::DEFAULT_TITLE.to_owned(),
            width: threed_platform::DEFAULT_WIDTH,
            height: threed_platform::DEFAULT_HEIGHT,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct RenderCfg {
    clear_color: [f32; 4],
    frames_in_flight: usize,
    /// Unset follows the build profile.
    validation: Option<bool>,
    msaa_samples: u32,
    sample_shading: Option<f32>,
    pre_record: bool,
    objects: Vec<ObjectCfg>,
    quad_texture: Option<String>,
    sprite_texture: Option<String>,
    sprite_sheet: Option<String>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        let base = RendererConfig::default();
        RenderCfg {
            clear_color: base.clear_color,
            frames_in_flight: base.frames_in_flight,
            validation: None,
            msaa_samples: base.msaa_samples,
            sample_shading: base.sample_shading,
            pre_record: base.pre_record,
            objects: vec![ObjectCfg::Quad, ObjectCfg::Sprites],
            quad_texture: None,
            sprite_texture: None,
            sprite_sheet: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct AssetsCfg {
    dir: PathBuf,
}

impl Default for AssetsCfg {
    fn default() -> Self {
        AssetsCfg {
            dir: RendererConfig::default().assets_dir,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct LogCfg {
    file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
struct AppCfg {
    window: WindowCfg,
    render: RenderCfg,
    assets: AssetsCfg,
    log: LogCfg,
}

fn parse_cfg(text: &str) -> Result<AppCfg> {
    Ok(toml::from_str(text)?)
}

/// A missing file means defaults; an unreadable or malformed one is an error
/// the caller downgrades to a warning.
fn load_cfg(path: &Path) -> Result<AppCfg> {
    if !path.exists() {
        return Ok(AppCfg::default());
    }
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_cfg(&text).with_context(|| format!("parse {}", path.display()))
}

/// Config file values, overridden by whatever was given on the command line.
fn renderer_config(cfg: &AppCfg, args: &Args) -> RendererConfig {
    let r = &cfg.render;
    let objects = args.objects.as_deref().unwrap_or(&r.objects[..]);
    RendererConfig {
        clear_color: r.clear_color,
        frames_in_flight: args.frames_in_flight.unwrap_or(r.frames_in_flight),
        validation: !args.no_validation && r.validation.unwrap_or(cfg!(debug_assertions)),
        msaa_samples: r.msaa_samples,
        sample_shading: r.sample_shading,
        pre_record: args.pre_record || r.pre_record,
        objects: objects.iter().copied().map(ObjectKind::from).collect(),
        assets_dir: args.assets.clone().unwrap_or_else(|| cfg.assets.dir.clone()),
        quad_texture: r.quad_texture.clone(),
        sprite_texture: r.sprite_texture.clone(),
        sprite_sheet: r.sprite_sheet.clone(),
    }
}

struct App {
    window_cfg: WindowCfg,
    renderer_cfg: RendererConfig,

    // Drop order: renderer before window.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,
    modifiers: ModifiersState,

    exiting: bool,
    minimized: bool,
    occluded: bool,
    frames: u32,
    last_fps_instant: Instant,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(window_cfg: WindowCfg, renderer_cfg: RendererConfig) -> Self {
        App {
            window_cfg,
            renderer_cfg,
            renderer: None,
            window: None,
            render_size: RenderSize {
                width: 1,
                height: 1,
            },
            modifiers: ModifiersState::empty(),
            exiting: false,
            minimized: false,
            occluded: false,
            frames: 0,
            last_fps_instant: Instant::now(),
            failure: None,
        }
    }

    fn paused(&self) -> bool {
        self.minimized || self.occluded
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = window_attributes(
            &self.window_cfg.title,
            self.window_cfg.width,
            self.window_cfg.height,
        );
        let window = event_loop.create_window(attrs).context("create window")?;

        let size = window.inner_size();
        self.render_size = RenderSize {
            width: size.width,
            height: size.height,
        };
        self.minimized = is_minimized(size);

        let renderer = {
            let wh = window.window_handle().context("window handle")?;
            let dh = window.display_handle().context("display handle")?;
            VkRenderer::new(&wh, &dh, self.render_size, self.renderer_cfg.clone())
                .context("vulkan renderer init")?
        };

        info!(
            "window {}x{} (paused={})",
            size.width,
            size.height,
            self.paused()
        );
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() && !self.exiting {
            if let Err(e) = self.start(event_loop) {
                error!("startup failed: {e:#}");
                self.failure = Some(e);
                self.shutdown(event_loop);
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        if !self.paused() {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::ModifiersChanged(m) => {
                self.modifiers = m.state();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if is_quit_key(&event, self.modifiers) {
                    info!("quit key");
                    self.shutdown(event_loop);
                }
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                let was_paused = self.paused();
                self.minimized = is_minimized(new_size);
                debug!(
                    "Resized → {}x{} (paused={})",
                    new_size.width,
                    new_size.height,
                    self.paused()
                );
                if was_paused != self.paused() {
                    info!("paused={}", self.paused());
                }

                if let Some(r) = &mut self.renderer {
                    if let Err(e) = r.resize(self.render_size) {
                        error!("resize error: {e:#}");
                    }
                }
                if !self.paused() {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::Occluded(occluded) => {
                if self.occluded != occluded {
                    self.occluded = occluded;
                    info!("Occluded={} → paused={}", occluded, self.paused());
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused() {
                    return;
                }

                if let Some(r) = &mut self.renderer {
                    match r.render() {
                        Ok(()) => {
                            self.frames = self.frames.saturating_add(1);
                        }
                        Err(e) => {
                            error!("render failed: {e:#}");
                            self.failure = Some(e);
                            self.shutdown(event_loop);
                        }
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        event_loop.set_control_flow(ControlFlow::Wait);
        if self.paused() {
            self.frames = 0;
            return;
        }

        // FIFO present paces the loop.
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let (cfg, cfg_err) = match load_cfg(&args.config) {
        Ok(cfg) => (cfg, None),
        Err(e) => (AppCfg::default(), Some(e)),
    };

    if let Err(e) = init_tracing(cfg.log.file.as_deref()) {
        init_tracing(None)?;
        warn!("{e:#}; logging to console only");
    }
    if let Some(e) = cfg_err {
        warn!("{e:#}; using defaults");
    }

    let renderer_cfg = renderer_config(&cfg, &args);
    info!(
        "frames_in_flight={} validation={} pre_record={} objects={:?}",
        renderer_cfg.clamped_frames_in_flight(),
        renderer_cfg.validation,
        renderer_cfg.pre_record,
        renderer_cfg.objects
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg.window, renderer_cfg);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg.window.title, threed_platform::DEFAULT_TITLE);
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.render.objects, vec![ObjectCfg::Quad, ObjectCfg::Sprites]);
        assert_eq!(cfg.assets.dir, PathBuf::from("ass"));
        assert!(cfg.log.file.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_cfg(
            r#"
            [window]
            width = 640

            [render]
            frames_in_flight = 3
            msaa_samples = 4
            sample_shading = 0.25
            objects = ["sprites"]
            sprite_sheet = "sprites.sprite"

            [log]
            file = "threed.log"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.width, 640);
        assert_eq!(cfg.window.height, threed_platform::DEFAULT_HEIGHT);
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert_eq!(cfg.render.msaa_samples, 4);
        assert_eq!(cfg.render.sample_shading, Some(0.25));
        assert_eq!(cfg.render.objects, vec![ObjectCfg::Sprites]);
        assert_eq!(cfg.render.sprite_sheet.as_deref(), Some("sprites.sprite"));
        assert_eq!(cfg.log.file, Some(PathBuf::from("threed.log")));
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(parse_cfg("[render]\nframes_in_flight = \"two\"").is_err());
        assert!(parse_cfg("[render]\nobjects = [\"teapot\"]").is_err());
        assert!(parse_cfg("not toml at all [").is_err());
    }

    #[test]
    fn missing_file_is_defaults() {
        let path = std::env::temp_dir().join("threed-app-no-such-config.toml");
        let cfg = load_cfg(&path).unwrap();
        assert_eq!(cfg.render.frames_in_flight, 2);
    }

    #[test]
    fn command_line_overrides_file() {
        let cfg = parse_cfg(
            r#"
            [render]
            frames_in_flight = 3
            validation = true
            objects = ["quad"]
            [assets]
            dir = "data"
            "#,
        )
        .unwrap();
        let args = Args {
            assets: Some(PathBuf::from("elsewhere")),
            frames_in_flight: Some(1),
            no_validation: true,
            pre_record: true,
            objects: Some(vec![ObjectCfg::Sprites, ObjectCfg::Quad]),
            ..Args::default()
        };
        let rc = renderer_config(&cfg, &args);
        assert_eq!(rc.frames_in_flight, 1);
        assert!(!rc.validation);
        assert!(rc.pre_record);
        assert_eq!(rc.objects, vec![ObjectKind::Sprites, ObjectKind::Quad]);
        assert_eq!(rc.assets_dir, PathBuf::from("elsewhere"));
    }

    #[test]
    fn file_values_apply_without_flags() {
        let text = "[render]\nvalidation = false\npre_record = true\n[assets]\ndir = \"data\"";
        let cfg = parse_cfg(text).unwrap();
        let rc = renderer_config(&cfg, &Args::default());
        assert!(!rc.validation);
        assert!(rc.pre_record);
        assert_eq!(rc.assets_dir, PathBuf::from("data"));
        assert_eq!(rc.objects, vec![ObjectKind::Quad, ObjectKind::Sprites]);
    }

    #[test]
    fn cli_parses_object_list() {
        let args = Args::parse_from(["threed", "--objects", "quad,sprites", "--pre-record"]);
        assert_eq!(args.objects, Some(vec![ObjectCfg::Quad, ObjectCfg::Sprites]));
        assert!(args.pre_record);
        assert_eq!(args.config, PathBuf::from("threed.toml"));
    }
}
