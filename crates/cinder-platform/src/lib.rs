//! Platform abstraction for the Cinder engine.
//!
//! Wraps a winit window and exposes it to the GPU layer through
//! [`WindowSource`].

use std::sync::Arc;
use std::time::Duration;

use cinder_core::constants::ENGINE_NAME;
use cinder_gpu::WindowSource;
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use thiserror::Error;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowAttributes};

/// How long [`PlatformWindow::wait_events`] sleeps while the window has no
/// drawable area.
pub const MINIMIZED_POLL_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Window creation failed: {0}")]
    WindowCreation(String),
    #[error("Event loop error: {0}")]
    EventLoop(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Platform configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            title: ENGINE_NAME.to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

impl PlatformConfig {
    /// Window attributes for this configuration.
    pub fn window_attributes(&self) -> WindowAttributes {
        Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(PhysicalSize::new(self.width, self.height))
            .with_resizable(self.resizable)
    }
}

/// Shared handle to a native window.
#[derive(Debug, Clone)]
pub struct PlatformWindow(Arc<Window>);

impl PlatformWindow {
    /// Create a window on a running event loop.
    pub fn create(event_loop: &ActiveEventLoop, config: &PlatformConfig) -> Result<Self> {
        let window = event_loop
            .create_window(config.window_attributes())
            .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;

        let size = window.inner_size();
        tracing::info!(
            title = %config.title,
            width = size.width,
            height = size.height,
            "Window created"
        );
        Ok(Self(Arc::new(window)))
    }

    /// The underlying winit window.
    pub fn window(&self) -> &Window {
        &self.0
    }

    pub fn request_redraw(&self) {
        self.0.request_redraw();
    }
}

impl HasDisplayHandle for PlatformWindow {
    fn display_handle(&self) -> std::result::Result<DisplayHandle<'_>, HandleError> {
        self.0.display_handle()
    }
}

impl HasWindowHandle for PlatformWindow {
    fn window_handle(&self) -> std::result::Result<WindowHandle<'_>, HandleError> {
        self.0.window_handle()
    }
}

impl WindowSource for PlatformWindow {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.0.inner_size();
        (size.width, size.height)
    }

    fn wait_events(&self) {
        // The event loop is owned by the caller, so the best we can do from
        // inside a frame is yield until the compositor gives us a size again
        std::thread::sleep(MINIMIZED_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::Size;

    #[test]
    fn attributes_follow_config() {
        let config = PlatformConfig {
            title: "viewer".to_string(),
            width: 800,
            height: 600,
            resizable: false,
        };

        let attrs = config.window_attributes();
        assert_eq!(attrs.title, "viewer");
        assert!(!attrs.resizable);
        assert_eq!(
            attrs.inner_size,
            Some(Size::Physical(PhysicalSize::new(800, 600)))
        );
    }

    #[test]
    fn default_title_is_engine_name() {
        assert_eq!(PlatformConfig::default().title, "Cinder");
    }
}
