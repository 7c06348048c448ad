//! Viewer application: an orbiting camera over a grid of textured cubes.

use std::path::Path;

use anyhow::Context as _;
use cinder_app::{
    cube, grid_instances, AppConfig, AppContext, Camera, CameraUniforms, CinderApp, FrameContext,
    SceneDesc, WindowEvent,
};
use cinder_gpu::checkerboard;
use glam::Vec3;
use tracing::info;
use winit::event::{ElementState, MouseScrollDelta};
use winit::keyboard::{KeyCode, PhysicalKey};

/// Spacing between instance centers.
const GRID_SPACING: f32 = 2.0;

/// Orbit speed in radians per second.
const ORBIT_SPEED: f32 = 0.4;

/// Camera elevation above the grid plane in radians.
const ORBIT_PITCH: f32 = 0.45;

/// Radius change per scroll line.
const ZOOM_STEP: f32 = 1.0;

const MIN_RADIUS: f32 = 2.0;
const MAX_RADIUS: f32 = 200.0;

const CHECKER_SIZE: u32 = 256;
const CHECKER_CELLS: u32 = 8;
const CHECKER_LIGHT: [u8; 4] = [230, 230, 230, 255];
const CHECKER_DARK: [u8; 4] = [40, 40, 48, 255];

/// Texture pixels for the scene: decoded from `path`, or a checkerboard.
pub fn load_texture(path: Option<&Path>) -> anyhow::Result<(u32, u32, Vec<u8>)> {
    match path {
        Some(path) => {
            let image = image::open(path)
                .with_context(|| format!("Failed to load texture {}", path.display()))?
                .to_rgba8();
            let (width, height) = image.dimensions();
            info!("Loaded texture {} ({width}x{height})", path.display());
            Ok((width, height, image.into_raw()))
        }
        None => Ok((
            CHECKER_SIZE,
            CHECKER_SIZE,
            checkerboard(CHECKER_SIZE, CHECKER_CELLS, CHECKER_LIGHT, CHECKER_DARK),
        )),
    }
}

/// Orbit radius that keeps an `n` x `n` grid in view.
pub fn initial_radius(grid: u32) -> f32 {
    (grid as f32 * GRID_SPACING * 1.2).clamp(MIN_RADIUS * 2.0, MAX_RADIUS)
}

/// Viewer application state.
pub struct Viewer {
    camera: Camera,
    /// Orbit angle around the Y axis in radians.
    yaw: f32,
    radius: f32,
    paused: bool,
    grid: u32,
    texture: Option<std::path::PathBuf>,
}

impl Viewer {
    fn zoom(&mut self, lines: f32) {
        self.radius = (self.radius - lines * ZOOM_STEP).clamp(MIN_RADIUS, MAX_RADIUS);
    }
}

impl CinderApp for Viewer {
    fn init(config: &AppConfig) -> anyhow::Result<Self> {
        let camera = Camera {
            fov: 60.0_f32.to_radians(),
            aspect: config.width as f32 / config.height as f32,
            ..Camera::default()
        };

        Ok(Self {
            camera,
            yaw: 0.0,
            radius: initial_radius(config.grid),
            paused: false,
            grid: config.grid,
            texture: config.texture.clone(),
        })
    }

    fn scene(&self) -> anyhow::Result<SceneDesc> {
        let (texture_width, texture_height, texture_pixels) =
            load_texture(self.texture.as_deref())?;

        Ok(SceneDesc {
            mesh: cube(),
            instances: grid_instances(self.grid, GRID_SPACING),
            texture_width,
            texture_height,
            texture_pixels,
        })
    }

    fn update(&mut self, _ctx: &AppContext, frame: &FrameContext) -> CameraUniforms {
        if !self.paused {
            self.yaw = (self.yaw + ORBIT_SPEED * frame.dt) % std::f32::consts::TAU;
        }

        self.camera.set_viewport(frame.width, frame.height);
        self.camera.orbit(Vec3::ZERO, self.radius, self.yaw, ORBIT_PITCH);
        self.camera.uniforms()
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        self.camera.set_viewport(width, height);
    }

    fn on_event(&mut self, event: &WindowEvent) -> bool {
        match event {
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                if event.physical_key == PhysicalKey::Code(KeyCode::Space) {
                    self.paused = !self.paused;
                    info!(paused = self.paused, "Orbit toggled");
                    return true;
                }
                false
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => *y,
                    MouseScrollDelta::PixelDelta(pos) => pos.y as f32 / 40.0,
                };
                self.zoom(lines);
                true
            }
            _ => false,
        }
    }

    fn cleanup(&mut self, ctx: &AppContext) {
        info!(
            frames = ctx.frame_count(),
            rebuilds = ctx.rebuilds(),
            "Viewer exiting"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn default_texture_is_checkerboard() {
        let (width, height, pixels) = load_texture(None).unwrap();
        assert_eq!((width, height), (CHECKER_SIZE, CHECKER_SIZE));
        assert_eq!(pixels.len(), (CHECKER_SIZE * CHECKER_SIZE * 4) as usize);
        assert_eq!(&pixels[..4], &CHECKER_LIGHT);
    }

    #[test]
    fn missing_texture_file_names_the_path() {
        let err = load_texture(Some(Path::new("does/not/exist.png"))).unwrap_err();
        assert!(format!("{err:#}").contains("does/not/exist.png"));
    }

    #[test]
    fn radius_scales_with_grid_within_bounds() {
        assert!(initial_radius(8) > initial_radius(2));
        assert_relative_eq!(initial_radius(1), MIN_RADIUS * 2.0);
        assert_relative_eq!(initial_radius(10_000), MAX_RADIUS);
    }

    #[test]
    fn zoom_is_clamped() {
        let mut viewer = Viewer::init(&AppConfig::default()).unwrap();
        viewer.zoom(1000.0);
        assert_relative_eq!(viewer.radius, MIN_RADIUS);
        viewer.zoom(-1000.0);
        assert_relative_eq!(viewer.radius, MAX_RADIUS);
    }

    #[test]
    fn scene_has_one_instance_per_grid_cell() {
        let viewer = Viewer::init(&AppConfig::default().with_grid(3)).unwrap();
        let scene = viewer.scene().unwrap();
        assert_eq!(scene.instances.len(), 9);
        assert_eq!(scene.mesh.indices.len(), 36);
    }
}
