//! Application framework for the Cinder engine.
//!
//! This crate provides a trait-based application framework that handles
//! common boilerplate like:
//! - Logging initialization
//! - Window creation and management
//! - GPU context and renderer initialization
//! - Resize routing and swapchain rebuilds
//! - Event loop handling and the fatal-error policy
//!
//! # Example
//!
//! ```no_run
//! use cinder_app::{
//!     cube, grid_instances, run_app, AppConfig, AppContext, Camera, CameraUniforms, CinderApp,
//!     FrameContext, SceneDesc,
//! };
//!
//! struct MyApp {
//!     camera: Camera,
//! }
//!
//! impl CinderApp for MyApp {
//!     fn init(_config: &AppConfig) -> anyhow::Result<Self> {
//!         Ok(MyApp { camera: Camera::default() })
//!     }
//!
//!     fn scene(&self) -> anyhow::Result<SceneDesc> {
//!         Ok(SceneDesc {
//!             mesh: cube(),
//!             instances: grid_instances(4, 2.0),
//!             texture_width: 1,
//!             texture_height: 1,
//!             texture_pixels: vec![255; 4],
//!         })
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, frame: &FrameContext) -> CameraUniforms {
//!         self.camera.set_viewport(frame.width, frame.height);
//!         self.camera.uniforms()
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::default())
//! }
//! ```

mod app;
mod context;
mod frame;
mod runner;

pub use app::CinderApp;
pub use context::AppContext;
pub use frame::{FrameContext, FrameStats};
pub use runner::{init_logging, run_app, AppConfig};

// Re-export commonly used types for convenience
pub use cinder_gpu::{GpuContext, GpuError};
pub use cinder_render::{cube, grid_instances, Camera, CameraUniforms, InstanceData, Mesh, SceneDesc, Vertex};
pub use winit::event::WindowEvent;
