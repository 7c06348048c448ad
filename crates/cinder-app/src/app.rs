//! `CinderApp` trait definition.

use cinder_render::{CameraUniforms, SceneDesc};
use winit::event::WindowEvent;

use crate::context::AppContext;
use crate::frame::FrameContext;
use crate::runner::AppConfig;

/// Trait for Cinder applications.
///
/// The framework owns the window, the GPU, and the frame loop. The
/// application supplies the static scene once and a camera every frame.
pub trait CinderApp: Sized {
    /// Initialize the application.
    ///
    /// Called once before the window and GPU context exist.
    fn init(config: &AppConfig) -> anyhow::Result<Self>;

    /// Scene content uploaded to the GPU at startup.
    fn scene(&self) -> anyhow::Result<SceneDesc>;

    /// Advance application state and return the camera for this frame.
    fn update(&mut self, ctx: &AppContext, frame: &FrameContext) -> CameraUniforms;

    /// Handle window resize. The swapchain is rebuilt by the framework.
    ///
    /// Default implementation does nothing.
    #[allow(unused_variables)]
    fn on_resize(&mut self, width: u32, height: u32) {}

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed
    /// further.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Called once before shutdown, while the GPU is still alive.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &AppContext) {}
}
