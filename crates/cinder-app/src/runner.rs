//! Application runner and event loop.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context as _};
use cinder_core::constants::{DEFAULT_FRAMES_IN_FLIGHT, ENGINE_NAME};
use cinder_gpu::{FrameStatus, WindowSource};
use cinder_platform::{PlatformConfig, PlatformWindow};
use cinder_render::RendererConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use crate::app::CinderApp;
use crate::context::AppContext;
use crate::frame::FrameContext;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title, also reported to the driver as the application name.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Directory holding the compiled mesh shaders.
    pub shader_dir: PathBuf,
    /// Image file to texture the mesh with; a checkerboard when unset.
    pub texture: Option<PathBuf>,
    /// Instances per side of the instance grid.
    pub grid: u32,
    /// Rasterize in line mode.
    pub wireframe: bool,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: format!("{ENGINE_NAME} Viewer"),
            width: 1280,
            height: 720,
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("assets/shaders/bin"),
            texture: None,
            grid: 8,
            wireframe: false,
            target_fps: None,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    pub fn with_texture(mut self, path: impl Into<PathBuf>) -> Self {
        self.texture = Some(path.into());
        self
    }

    pub fn with_grid(mut self, grid: u32) -> Self {
        self.grid = grid;
        self
    }

    pub fn with_wireframe(mut self, wireframe: bool) -> Self {
        self.wireframe = wireframe;
        self
    }

    /// Set the target FPS.
    pub fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    /// Parse from the process command line.
    pub fn from_args() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        Self::parse_args(&args)
    }

    /// Parse from a slice of arguments, starting from the defaults.
    ///
    /// Recognizes the following flags:
    /// - `--validation` / `--no-validation`
    /// - `--width <PX>` and `--height <PX>`
    /// - `--frames-in-flight <N>`
    /// - `--shader-dir <DIR>`
    /// - `--texture <FILE>`
    /// - `--grid <N>`
    /// - `--wireframe`
    /// - `--fps <N>`
    ///
    /// Unknown arguments are ignored.
    pub fn parse_args(args: &[String]) -> anyhow::Result<Self> {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            match flag {
                "--validation" => config.validation = true,
                "--no-validation" => config.validation = false,
                "--width" => {
                    config.width = parse_number(flag, flag_value(args, &mut i, flag)?)?;
                }
                "--height" => {
                    config.height = parse_number(flag, flag_value(args, &mut i, flag)?)?;
                }
                "--frames-in-flight" => {
                    config.frames_in_flight = parse_number(flag, flag_value(args, &mut i, flag)?)?;
                }
                "--shader-dir" => {
                    config.shader_dir = PathBuf::from(flag_value(args, &mut i, flag)?);
                }
                "--texture" => {
                    config.texture = Some(PathBuf::from(flag_value(args, &mut i, flag)?));
                }
                "--grid" => {
                    config.grid = parse_number(flag, flag_value(args, &mut i, flag)?)?;
                }
                "--wireframe" => config.wireframe = true,
                "--fps" => {
                    config.target_fps = Some(parse_number(flag, flag_value(args, &mut i, flag)?)?);
                }
                _ => {}
            }
            i += 1;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("window size must be non-zero, got {}x{}", self.width, self.height);
        }
        if self.frames_in_flight == 0 {
            bail!("--frames-in-flight must be at least 1");
        }
        if self.grid == 0 {
            bail!("--grid must be at least 1");
        }
        if self.target_fps == Some(0) {
            bail!("--fps must be at least 1");
        }
        Ok(())
    }

    pub(crate) fn platform_config(&self) -> PlatformConfig {
        PlatformConfig {
            title: self.title.clone(),
            width: self.width,
            height: self.height,
            resizable: true,
        }
    }

    pub(crate) fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            app_name: self.title.clone(),
            validation: self.validation,
            frames_in_flight: self.frames_in_flight,
            shader_dir: self.shader_dir.clone(),
            wireframe: self.wireframe,
        }
    }
}

/// The argument following `flag`, advancing the cursor past it.
fn flag_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> anyhow::Result<&'a str> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("missing value for {flag}"))
}

fn parse_number<T>(flag: &str, value: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid value '{value}' for {flag}"))
}

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // A subscriber may already be installed by a test harness or host
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Run a [`CinderApp`] with the given configuration.
///
/// Initializes logging, creates the window and renderer, and runs the
/// event loop until the window closes or a fatal error occurs. A fatal
/// error is logged, the event loop exits, and the error is returned.
pub fn run_app<A: CinderApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging();
    config.validate()?;

    info!("{} starting...", config.title);

    let event_loop =
        EventLoop::new().map_err(|e| anyhow!("Failed to create event loop: {e}"))?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let target_frame_time = config
        .target_fps
        .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)));

    let mut runner = AppRunner::<A> {
        config,
        target_frame_time,
        state: None,
        fatal: None,
    };

    event_loop
        .run_app(&mut runner)
        .map_err(|e| anyhow!("Event loop error: {e}"))?;

    match runner.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's ApplicationHandler.
struct AppRunner<A: CinderApp> {
    config: AppConfig,
    target_frame_time: Option<Duration>,
    state: Option<AppState<A>>,
    fatal: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: CinderApp> {
    app: A,
    ctx: AppContext,
}

impl<A: CinderApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => self.fail(event_loop, e.context("Failed to initialize application")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        // Let the app handle the event first
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                match state.render_frame(self.target_frame_time) {
                    Ok(()) => state.ctx.window().request_redraw(),
                    Err(e) => self.fail(event_loop, e),
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    state.ctx.renderer.notify_resized();
                    state.app.on_resize(size.width, size.height);
                    tracing::debug!("Resized to {}x{}", size.width, size.height);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.ctx.window().request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
    }
}

impl<A: CinderApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let app = A::init(&self.config)?;
        let scene = app.scene()?;
        info!(
            vertices = scene.mesh.vertices.len(),
            indices = scene.mesh.indices.len(),
            instances = scene.instances.len(),
            "Scene prepared"
        );

        let window = PlatformWindow::create(event_loop, &self.config.platform_config())?;
        let ctx = AppContext::new(window, &self.config, &scene)?;

        Ok(AppState { app, ctx })
    }

    /// Log a fatal error, tear down, and stop the event loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("Fatal error: {e:#}");
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        self.fatal.get_or_insert(e);
        event_loop.exit();
    }
}

impl<A: CinderApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self, target_frame_time: Option<Duration>) -> anyhow::Result<()> {
        // Nothing to present into while minimized
        let (width, height) = self.ctx.window().framebuffer_size();
        if width == 0 || height == 0 {
            return Ok(());
        }

        let frame_start = Instant::now();
        let dt = frame_start.duration_since(self.ctx.last_frame_time);
        self.ctx.last_frame_time = frame_start;
        self.ctx.stats.record(dt.as_secs_f64());

        let extent = self.ctx.extent();
        let frame = FrameContext::new(
            dt.as_secs_f32(),
            self.ctx.frame_count(),
            extent.width,
            extent.height,
        );
        let uniforms = self.app.update(&self.ctx, &frame);

        if self.ctx.renderer.render(&uniforms)? == FrameStatus::Aborted {
            tracing::debug!("Frame aborted, swapchain rebuilt");
        }

        // Frame pacing
        if let Some(target) = target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        let stats = self.ctx.stats;
        if let (Some(min), Some(max), Some(avg)) = (stats.min_fps(), stats.max_fps(), stats.avg_fps()) {
            info!("FPS Statistics:");
            info!("  Min: {min:.1}");
            info!("  Max: {max:.1}");
            info!("  Avg: {avg:.1}");
        }
        info!("  Total frames: {}", self.ctx.frame_count());
        info!("  Swapchain rebuilds: {}", self.ctx.rebuilds());

        info!("Starting cleanup...");
        self.app.cleanup(&self.ctx);
        if let Err(e) = self.ctx.renderer.shutdown() {
            error!("Renderer shutdown failed: {e}");
        }
        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("cinder-viewer")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn no_flags_gives_defaults() {
        let config = AppConfig::parse_args(&args(&[])).unwrap();
        assert_eq!(config.width, 1280);
        assert_eq!(config.height, 720);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.validation, cfg!(debug_assertions));
        assert_eq!(config.shader_dir, PathBuf::from("assets/shaders/bin"));
        assert!(config.texture.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let config = AppConfig::parse_args(&args(&[
            "--no-validation",
            "--width",
            "800",
            "--height",
            "600",
            "--frames-in-flight",
            "3",
            "--shader-dir",
            "out/spv",
            "--texture",
            "crate.png",
            "--grid",
            "4",
            "--wireframe",
            "--fps",
            "30",
        ]))
        .unwrap();

        assert!(!config.validation);
        assert_eq!((config.width, config.height), (800, 600));
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.shader_dir, PathBuf::from("out/spv"));
        assert_eq!(config.texture, Some(PathBuf::from("crate.png")));
        assert_eq!(config.grid, 4);
        assert!(config.wireframe);
        assert_eq!(config.target_fps, Some(30));
    }

    #[test]
    fn later_validation_flag_wins() {
        let config = AppConfig::parse_args(&args(&["--no-validation", "--validation"])).unwrap();
        assert!(config.validation);
    }

    #[test]
    fn unknown_flags_are_ignored() {
        let config = AppConfig::parse_args(&args(&["--fullscreen", "--grid", "2"])).unwrap();
        assert_eq!(config.grid, 2);
    }

    #[test]
    fn missing_value_is_an_error() {
        let err = AppConfig::parse_args(&args(&["--width"])).unwrap_err();
        assert!(err.to_string().contains("--width"));
    }

    #[test]
    fn malformed_number_is_an_error() {
        let err = AppConfig::parse_args(&args(&["--grid", "lots"])).unwrap_err();
        assert!(err.to_string().contains("lots"));
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        assert!(AppConfig::parse_args(&args(&["--frames-in-flight", "0"])).is_err());
    }

    #[test]
    fn renderer_config_carries_gpu_settings() {
        let config = AppConfig::new("demo")
            .with_validation(true)
            .with_frames_in_flight(3)
            .with_wireframe(true);
        let renderer = config.renderer_config();
        assert_eq!(renderer.app_name, "demo");
        assert!(renderer.validation);
        assert_eq!(renderer.frames_in_flight, 3);
        assert!(renderer.wireframe);
    }
}
