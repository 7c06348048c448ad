//! Application context.

use std::time::Instant;

use ash::vk;
use cinder_gpu::GpuContext;
use cinder_platform::PlatformWindow;
use cinder_render::{Renderer, SceneDesc};

use crate::frame::FrameStats;
use crate::runner::AppConfig;

/// Application context shared across app callbacks.
///
/// Owns the renderer, and through it the window, the GPU context, and
/// every per-window resource.
pub struct AppContext {
    pub(crate) renderer: Renderer<PlatformWindow>,
    pub(crate) last_frame_time: Instant,
    pub(crate) stats: FrameStats,
}

impl AppContext {
    pub(crate) fn new(
        window: PlatformWindow,
        config: &AppConfig,
        scene: &SceneDesc,
    ) -> anyhow::Result<Self> {
        let renderer = Renderer::new(window, &config.renderer_config(), scene)?;
        let extent = renderer.extent();
        tracing::info!(
            "Renderer ready: {}x{}, {} frames in flight",
            extent.width,
            extent.height,
            config.frames_in_flight
        );

        Ok(Self {
            renderer,
            last_frame_time: Instant::now(),
            stats: FrameStats::default(),
        })
    }

    pub fn window(&self) -> &PlatformWindow {
        self.renderer.window()
    }

    pub fn gpu(&self) -> &GpuContext {
        self.renderer.gpu()
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.renderer.extent()
    }

    pub fn width(&self) -> u32 {
        self.extent().width
    }

    pub fn height(&self) -> u32 {
        self.extent().height
    }

    /// Frames presented so far.
    pub fn frame_count(&self) -> u64 {
        self.renderer.frames_presented()
    }

    /// Swapchain rebuilds so far.
    pub fn rebuilds(&self) -> u64 {
        self.renderer.rebuilds()
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }
}
