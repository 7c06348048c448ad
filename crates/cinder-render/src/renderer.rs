//! Window renderer driving the frame protocol over [`RenderResources`].

use std::path::PathBuf;

use ash::vk;
use cinder_core::constants::{DEFAULT_FRAMES_IN_FLIGHT, ENGINE_NAME};
use cinder_gpu::error::{GpuError, Result};
use cinder_gpu::{
    AcquireOutcome, FrameBackend, FrameLoop, FrameStatus, GpuContext, GpuContextBuilder,
    GraphicsPipelineConfig, MeshShaders, PresentOutcome, SwapchainState, WindowSource,
};

use crate::camera::CameraUniforms;
use crate::mesh;
use crate::resources::{RenderResources, SceneDesc};

/// Renderer configuration.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Enable Vulkan validation layers.
    pub validation: bool,
    /// Number of frames the CPU may record ahead of the GPU.
    pub frames_in_flight: usize,
    /// Directory holding `mesh.vert.spv` and `mesh.frag.spv`.
    pub shader_dir: PathBuf,
    /// Rasterize in line mode when the device supports it.
    pub wireframe: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: ENGINE_NAME.to_string(),
            validation: cfg!(debug_assertions),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            shader_dir: PathBuf::from("assets/shaders/bin"),
            wireframe: false,
        }
    }
}

/// Pick the rasterization mode, falling back to fill when lines are not
/// supported.
pub fn polygon_mode(wireframe: bool, supported: bool) -> vk::PolygonMode {
    match (wireframe, supported) {
        (true, true) => vk::PolygonMode::LINE,
        (true, false) => {
            tracing::warn!("Wireframe requested but fillModeNonSolid is unsupported, using fill");
            vk::PolygonMode::FILL
        }
        (false, _) => vk::PolygonMode::FILL,
    }
}

/// Vulkan side of the frame protocol.
///
/// Field order matters: resources are released in `Drop`, then the context,
/// and the window last so it outlives its surface.
struct SceneBackend<W: WindowSource> {
    resources: Option<RenderResources>,
    gpu: GpuContext,
    uniforms: CameraUniforms,
    window: W,
}

impl<W: WindowSource> SceneBackend<W> {
    fn resources(&self) -> Result<&RenderResources> {
        self.resources
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("render resources already released".to_string()))
    }

    /// Idle the device and destroy the resources, once.
    fn release(&mut self) {
        if let Some(resources) = self.resources.take() {
            if let Err(e) = self.gpu.wait_idle() {
                tracing::error!("Failed to wait idle before teardown: {e}");
            }
            // SAFETY: the device is idle or lost; either way nothing is in
            // flight any more
            unsafe { resources.destroy(&self.gpu) };
        }
    }
}

impl<W: WindowSource> FrameBackend for SceneBackend<W> {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        // SAFETY: resources belong to this context
        unsafe { self.resources()?.wait_for_slot(&self.gpu, slot) }
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        // SAFETY: the slot's fence was waited on, so its semaphore is free
        unsafe { self.resources()?.acquire(&self.gpu, slot) }
    }

    fn reset_slot(&mut self, slot: usize) -> Result<()> {
        // SAFETY: the slot's fence is signaled
        unsafe { self.resources()?.reset_slot(&self.gpu, slot) }
    }

    fn update_frame_data(&mut self, slot: usize, _image_index: u32) -> Result<()> {
        self.resources()?.write_uniforms(slot, &self.uniforms)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        // SAFETY: the slot's previous submission has completed
        unsafe { self.resources()?.record(&self.gpu, slot, image_index) }
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        // SAFETY: the slot's command buffer was just recorded
        unsafe { self.resources()?.submit(&self.gpu, slot) }
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        // SAFETY: the slot's work was just submitted
        unsafe { self.resources()?.present(&self.gpu, slot, image_index) }
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        self.window.framebuffer_size()
    }

    fn wait_events(&mut self) {
        self.window.wait_events();
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.gpu.wait_idle()
    }

    fn rebuild_swapchain(&mut self, width: u32, height: u32) -> Result<()> {
        let resources = self
            .resources
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("render resources already released".to_string()))?;
        // SAFETY: the frame loop idles the device before every rebuild
        unsafe { resources.rebuild_swapchain(&self.gpu, width, height) }
    }
}

impl<W: WindowSource> Drop for SceneBackend<W> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Block until the window has a drawable area.
fn wait_for_drawable<W: WindowSource>(window: &W) -> (u32, u32) {
    loop {
        let (width, height) = window.framebuffer_size();
        if width > 0 && height > 0 {
            return (width, height);
        }
        window.wait_events();
    }
}

/// Forward renderer drawing one instanced, textured mesh into a window.
pub struct Renderer<W: WindowSource> {
    frame_loop: FrameLoop,
    backend: SceneBackend<W>,
}

impl<W: WindowSource> Renderer<W> {
    /// Bring up Vulkan for `window` and upload `scene`.
    ///
    /// Shaders are loaded before any GPU object exists, so a bad shader
    /// directory fails fast.
    pub fn new(window: W, config: &RendererConfig, scene: &SceneDesc) -> Result<Self> {
        let frame_loop = FrameLoop::new(config.frames_in_flight)?;
        let shaders = MeshShaders::load(&config.shader_dir)?;

        // SAFETY: the window moves into the backend, which destroys the
        // surface before dropping the window
        let (gpu, surface) = unsafe {
            GpuContextBuilder::new()
                .app_name(config.app_name.clone())
                .validation(config.validation)
                .build_for_window(&window)
        }?;
        tracing::info!("GPU: {}", gpu.capabilities().summary());

        let pipeline_config = GraphicsPipelineConfig {
            vertex_shader: shaders.vertex,
            fragment_shader: shaders.fragment,
            vertex_bindings: mesh::binding_descriptions(),
            vertex_attributes: mesh::attribute_descriptions(),
            polygon_mode: polygon_mode(config.wireframe, gpu.supports_wireframe()),
            ..Default::default()
        };

        let (width, height) = wait_for_drawable(&window);
        // SAFETY: surface was created for `window` on this context
        let resources = unsafe {
            RenderResources::new(
                &gpu,
                surface,
                width,
                height,
                config.frames_in_flight,
                pipeline_config,
                scene,
            )
        }?;

        Ok(Self {
            frame_loop,
            backend: SceneBackend {
                resources: Some(resources),
                gpu,
                uniforms: CameraUniforms::default(),
                window,
            },
        })
    }

    /// Draw one frame with `uniforms` as the camera block.
    ///
    /// A frame aborted by an out-of-date swapchain returns
    /// [`FrameStatus::Aborted`]; the swapchain is already rebuilt.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn render(&mut self, uniforms: &CameraUniforms) -> Result<FrameStatus> {
        self.backend.uniforms = *uniforms;
        self.frame_loop.draw_frame(&mut self.backend)
    }

    /// Flag the swapchain for rebuild after the next present.
    pub fn notify_resized(&mut self) {
        self.frame_loop.notify_resized();
    }

    /// Current swapchain extent, or zero once shut down.
    pub fn extent(&self) -> vk::Extent2D {
        self.backend
            .resources
            .as_ref()
            .map(RenderResources::extent)
            .unwrap_or_default()
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.backend.gpu
    }

    pub fn window(&self) -> &W {
        &self.backend.window
    }

    pub fn frames_presented(&self) -> u64 {
        self.frame_loop.frames_presented()
    }

    pub fn rebuilds(&self) -> u64 {
        self.frame_loop.rebuilds()
    }

    pub fn swapchain_state(&self) -> SwapchainState {
        self.frame_loop.swapchain_state()
    }

    /// Idle the device and release every resource. Drawing afterwards is
    /// an error.
    pub fn shutdown(&mut self) -> Result<()> {
        self.frame_loop.shutdown(&mut self.backend)?;
        self.backend.release();
        tracing::info!(
            frames = self.frame_loop.frames_presented(),
            rebuilds = self.frame_loop.rebuilds(),
            "Renderer shut down"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_engine_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.app_name, "Cinder");
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.shader_dir, PathBuf::from("assets/shaders/bin"));
        assert!(!config.wireframe);
    }

    #[test]
    fn wireframe_falls_back_to_fill() {
        assert_eq!(polygon_mode(true, true), vk::PolygonMode::LINE);
        assert_eq!(polygon_mode(true, false), vk::PolygonMode::FILL);
        assert_eq!(polygon_mode(false, true), vk::PolygonMode::FILL);
    }
}
