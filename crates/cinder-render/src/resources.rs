//! GPU resource aggregate for the forward mesh renderer.
//!
//! [`RenderResources`] owns every per-window Vulkan object the renderer
//! needs and releases them in reverse dependency order. The swapchain and
//! everything sized by it (depth attachment, framebuffers) can be rebuilt
//! in place without touching the rest.

use ash::vk;
use cinder_core::arena::{align_up, ArenaRange, LinearArena};
use cinder_gpu::command::{begin_command_buffer, end_command_buffer, submit_command_buffers};
use cinder_gpu::error::{GpuError, Result, VkResultExt};
use cinder_gpu::{
    find_depth_format, upload_to_device_local, write_combined_image_sampler, write_uniform_buffer,
    AcquireOutcome, CommandPool, DepthBuffer, DescriptorPool, DescriptorSetLayoutBuilder,
    FrameSyncRing, FramebufferSet, GpuBuffer, GpuContext, GraphicsPipeline,
    GraphicsPipelineConfig, PresentOutcome, RenderPass, SurfaceContext, Swapchain,
    SwapchainConfig, Texture,
};
use gpu_allocator::MemoryLocation;

use crate::camera::CameraUniforms;
use crate::mesh::{InstanceData, Mesh};

/// Descriptor binding of the camera uniform block.
pub const CAMERA_BINDING: u32 = 0;
/// Descriptor binding of the mesh texture.
pub const TEXTURE_BINDING: u32 = 1;

/// Uniform offsets never go below this, whatever the device reports.
const MIN_UNIFORM_ALIGNMENT: u64 = 16;

/// Static scene content uploaded once at startup.
#[derive(Debug, Clone)]
pub struct SceneDesc {
    pub mesh: Mesh,
    pub instances: Vec<InstanceData>,
    pub texture_width: u32,
    pub texture_height: u32,
    /// Tightly packed RGBA8 sRGB pixels.
    pub texture_pixels: Vec<u8>,
}

/// Every Vulkan object owned by one window's renderer.
pub struct RenderResources {
    surface: SurfaceContext,
    swapchain: Swapchain,
    render_pass: RenderPass,
    depth_format: vk::Format,
    depth: DepthBuffer,
    framebuffers: FramebufferSet,

    pipeline_config: GraphicsPipelineConfig,
    pipeline: GraphicsPipeline,

    set_layout: vk::DescriptorSetLayout,
    descriptor_pool: DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,

    /// Persistently mapped, one region per frame slot.
    uniforms: GpuBuffer,
    uniform_ranges: Vec<ArenaRange>,

    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,
    instance_buffer: GpuBuffer,
    index_count: u32,
    instance_count: u32,
    texture: Texture,

    command_pool: CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    sync: FrameSyncRing,
}

impl RenderResources {
    /// Create every resource for `surface`, taking ownership of it.
    ///
    /// On failure everything created so far, the surface included, is
    /// destroyed before the error is returned.
    ///
    /// # Safety
    /// `surface` must belong to `gpu`'s instance and its window must
    /// outlive the returned value.
    pub unsafe fn new(
        gpu: &GpuContext,
        surface: SurfaceContext,
        width: u32,
        height: u32,
        frames_in_flight: usize,
        pipeline_config: GraphicsPipelineConfig,
        scene: &SceneDesc,
    ) -> Result<Self> {
        let mut resources = Self {
            surface,
            swapchain: Swapchain::default(),
            render_pass: RenderPass::default(),
            depth_format: vk::Format::UNDEFINED,
            depth: DepthBuffer::default(),
            framebuffers: FramebufferSet::default(),
            pipeline_config,
            pipeline: GraphicsPipeline::default(),
            set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: DescriptorPool::default(),
            descriptor_sets: Vec::new(),
            uniforms: GpuBuffer::default(),
            uniform_ranges: Vec::new(),
            vertex_buffer: GpuBuffer::default(),
            index_buffer: GpuBuffer::default(),
            instance_buffer: GpuBuffer::default(),
            index_count: 0,
            instance_count: 0,
            texture: Texture::default(),
            command_pool: CommandPool::default(),
            command_buffers: Vec::new(),
            sync: FrameSyncRing::default(),
        };

        // SAFETY: forwarded from caller
        match unsafe { resources.init(gpu, width, height, frames_in_flight, scene) } {
            Ok(()) => Ok(resources),
            Err(e) => {
                tracing::error!("Render resource creation failed: {e}");
                // SAFETY: nothing has been submitted yet; null members are
                // ignored by the destroy calls
                unsafe { resources.destroy(gpu) };
                Err(e)
            }
        }
    }

    unsafe fn init(
        &mut self,
        gpu: &GpuContext,
        width: u32,
        height: u32,
        frames_in_flight: usize,
        scene: &SceneDesc,
    ) -> Result<()> {
        let device = gpu.device();

        self.depth_format = find_depth_format(gpu)?;

        let layout_builder = DescriptorSetLayoutBuilder::new()
            .uniform_buffer(CAMERA_BINDING, vk::ShaderStageFlags::VERTEX)
            .sampled_image(TEXTURE_BINDING, vk::ShaderStageFlags::FRAGMENT);
        // SAFETY: device is valid
        self.set_layout = unsafe { layout_builder.build(device) }?;

        // SAFETY: forwarded from caller
        unsafe { self.build_targets(gpu, width, height) }?;

        self.upload_scene(gpu, scene)?;

        self.uniform_ranges = uniform_layout(
            frames_in_flight,
            std::mem::size_of::<CameraUniforms>() as u64,
            gpu.capabilities().min_uniform_buffer_offset_alignment,
        )?;
        let uniform_size = self.uniform_ranges.last().map_or(0, ArenaRange::end);
        self.uniforms = gpu.allocator().lock().create_buffer(
            uniform_size,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            MemoryLocation::CpuToGpu,
            "camera uniforms",
        )?;
        for range in &self.uniform_ranges {
            self.uniforms
                .write_bytes(range.offset, bytemuck::bytes_of(&CameraUniforms::default()))?;
        }

        let set_count = frames_in_flight as u32;
        // SAFETY: device is valid
        self.descriptor_pool =
            unsafe { DescriptorPool::new(device, set_count, &layout_builder.pool_sizes(set_count)) }?;
        let layouts = vec![self.set_layout; frames_in_flight];
        // SAFETY: layouts and pool were created on this device
        self.descriptor_sets = unsafe { self.descriptor_pool.allocate(device, &layouts) }?;

        for (set, range) in self.descriptor_sets.iter().zip(&self.uniform_ranges) {
            // SAFETY: buffer, view, and sampler are alive and not yet in use
            unsafe {
                write_uniform_buffer(
                    device,
                    *set,
                    CAMERA_BINDING,
                    self.uniforms.buffer,
                    range.offset,
                    range.size,
                );
                write_combined_image_sampler(
                    device,
                    *set,
                    TEXTURE_BINDING,
                    self.texture.view,
                    self.texture.sampler,
                );
            }
        }

        // SAFETY: graphics family exists on this device
        self.command_pool = unsafe {
            CommandPool::new(
                device,
                gpu.graphics_queue_family(),
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
        }?;
        // SAFETY: pool was just created
        self.command_buffers =
            unsafe { self.command_pool.allocate_command_buffers(device, set_count) }?;

        // SAFETY: device is valid
        self.sync = unsafe { FrameSyncRing::new(device, frames_in_flight) }?;

        tracing::info!(
            width = self.swapchain.extent.width,
            height = self.swapchain.extent.height,
            images = self.swapchain.image_count(),
            frames_in_flight,
            "Render resources ready"
        );
        Ok(())
    }

    fn upload_scene(&mut self, gpu: &GpuContext, scene: &SceneDesc) -> Result<()> {
        self.vertex_buffer = upload_to_device_local(
            gpu,
            bytemuck::cast_slice(&scene.mesh.vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "mesh vertices",
        )?;
        self.index_buffer = upload_to_device_local(
            gpu,
            bytemuck::cast_slice(&scene.mesh.indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
            "mesh indices",
        )?;
        self.instance_buffer = upload_to_device_local(
            gpu,
            bytemuck::cast_slice(&scene.instances),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            "mesh instances",
        )?;
        self.index_count = scene.mesh.indices.len() as u32;
        self.instance_count = scene.instances.len() as u32;

        self.texture = Texture::from_rgba8(
            gpu,
            scene.texture_width,
            scene.texture_height,
            &scene.texture_pixels,
            "mesh texture",
        )?;
        Ok(())
    }

    /// Create the swapchain and everything sized by it.
    ///
    /// The render pass and pipeline are recreated only when the surface
    /// format differs from the one they were built for.
    unsafe fn build_targets(&mut self, gpu: &GpuContext, width: u32, height: u32) -> Result<()> {
        let device = gpu.device();

        let support = self.surface.support(gpu.physical_device())?;
        let config = SwapchainConfig::negotiate(&support, width, height)?;
        // SAFETY: surface belongs to this instance; any old swapchain is gone
        self.swapchain =
            unsafe { Swapchain::new(gpu, &self.surface, &config, vk::SwapchainKHR::null()) }?;

        if self.render_pass.color_format != self.swapchain.format {
            if self.render_pass.render_pass != vk::RenderPass::null() {
                tracing::info!(
                    old = ?self.render_pass.color_format,
                    new = ?self.swapchain.format,
                    "Surface format changed, recreating render pass"
                );
            }
            // SAFETY: device is idle whenever targets are rebuilt
            unsafe {
                std::mem::take(&mut self.pipeline).destroy(device);
                std::mem::take(&mut self.render_pass).destroy(device);
                self.render_pass =
                    RenderPass::new(device, self.swapchain.format, self.depth_format)?;
                self.pipeline = GraphicsPipeline::new(
                    device,
                    self.render_pass.render_pass,
                    &self.pipeline_config,
                    &[self.set_layout],
                )?;
            }
        }

        // SAFETY: context is valid
        self.depth = unsafe { DepthBuffer::new(gpu, self.depth_format, self.swapchain.extent) }?;
        // SAFETY: views are compatible with the render pass
        self.framebuffers = unsafe {
            FramebufferSet::new(
                device,
                self.render_pass.render_pass,
                &self.swapchain.image_views,
                self.depth.view,
                self.swapchain.extent,
            )
        }?;

        Ok(())
    }

    /// Tear down and recreate the swapchain, depth attachment, and
    /// framebuffers for a `width` x `height` framebuffer.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn rebuild_swapchain(&mut self, gpu: &GpuContext, width: u32, height: u32) -> Result<()> {
        // SAFETY: caller guarantees the device is idle
        unsafe {
            self.framebuffers.destroy(gpu.device());
            self.depth.destroy(gpu)?;
            self.swapchain.destroy(gpu.device(), gpu.swapchain_loader());
            self.build_targets(gpu, width, height)?;
        }

        tracing::info!(
            width = self.swapchain.extent.width,
            height = self.swapchain.extent.height,
            images = self.swapchain.image_count(),
            "Swapchain recreated"
        );
        Ok(())
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }

    pub fn surface_format(&self) -> vk::Format {
        self.swapchain.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.swapchain.present_mode
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.sync.len()
    }

    /// Block until the slot's previous submission has finished.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn wait_for_slot(&self, gpu: &GpuContext, slot: usize) -> Result<()> {
        // SAFETY: forwarded from caller
        unsafe { self.sync.get(slot).wait(gpu.device()) }
    }

    /// # Safety
    /// The slot's fence must not be pending.
    pub unsafe fn reset_slot(&self, gpu: &GpuContext, slot: usize) -> Result<()> {
        // SAFETY: forwarded from caller
        unsafe { self.sync.get(slot).reset(gpu.device()) }
    }

    /// # Safety
    /// The slot's `image_available` semaphore must be unsignaled.
    pub unsafe fn acquire(&self, gpu: &GpuContext, slot: usize) -> Result<AcquireOutcome> {
        // SAFETY: forwarded from caller
        unsafe {
            self.swapchain
                .acquire_next_image(gpu.swapchain_loader(), self.sync.get(slot).image_available)
        }
    }

    /// Write the camera block into the slot's uniform region.
    pub fn write_uniforms(&self, slot: usize, uniforms: &CameraUniforms) -> Result<()> {
        let range = self
            .uniform_ranges
            .get(slot)
            .ok_or_else(|| GpuError::InvalidState(format!("no uniform region for slot {slot}")))?;
        self.uniforms
            .write_bytes(range.offset, bytemuck::bytes_of(uniforms))
    }

    /// Record the slot's command buffer: one render pass with a single
    /// indexed, instanced draw into `image_index`'s framebuffer.
    ///
    /// # Safety
    /// The slot's fence must have been waited on.
    pub unsafe fn record(&self, gpu: &GpuContext, slot: usize, image_index: u32) -> Result<()> {
        let device = gpu.device();
        let cmd = self.command_buffers[slot];
        let framebuffer = self.framebuffers.get(image_index).ok_or_else(|| {
            GpuError::InvalidState(format!("no framebuffer for image {image_index}"))
        })?;
        let extent = self.swapchain.extent;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: [0.0, 0.0, 0.0, 1.0],
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        // SAFETY: the slot's previous submission has completed
        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .call("vkResetCommandBuffer")?;
            begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass.render_pass)
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);

            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);

            device.cmd_bind_vertex_buffers(
                cmd,
                0,
                &[self.vertex_buffer.buffer, self.instance_buffer.buffer],
                &[0, 0],
            );
            device.cmd_bind_index_buffer(cmd, self.index_buffer.buffer, 0, vk::IndexType::UINT32);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[self.descriptor_sets[slot]],
                &[],
            );
            device.cmd_draw_indexed(cmd, self.index_count, self.instance_count, 0, 0, 0);

            device.cmd_end_render_pass(cmd);
            end_command_buffer(device, cmd)
        }
    }

    /// Submit the slot's command buffer, waiting on its acquire semaphore
    /// and signaling its render-finished semaphore and fence.
    ///
    /// # Safety
    /// The slot's command buffer must be recorded.
    pub unsafe fn submit(&self, gpu: &GpuContext, slot: usize) -> Result<()> {
        let sync = self.sync.get(slot);
        // SAFETY: forwarded from caller
        unsafe {
            submit_command_buffers(
                gpu.device(),
                gpu.graphics_queue(),
                &[self.command_buffers[slot]],
                &[sync.image_available],
                &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
                &[sync.render_finished],
                sync.in_flight,
            )
        }
    }

    /// # Safety
    /// The slot's work must have been submitted.
    pub unsafe fn present(&self, gpu: &GpuContext, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        // SAFETY: forwarded from caller
        unsafe {
            self.swapchain.present(
                gpu.swapchain_loader(),
                gpu.present_queue(),
                image_index,
                &[self.sync.get(slot).render_finished],
            )
        }
    }

    /// Destroy everything, surface last.
    ///
    /// Allocator errors are logged and do not stop the teardown.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(mut self, gpu: &GpuContext) {
        let device = gpu.device();

        // SAFETY: caller guarantees the device is idle; null handles are
        // ignored by every destroy call
        unsafe {
            self.sync.destroy(device);
            self.command_buffers.clear();
            self.command_pool.destroy(device);

            self.descriptor_sets.clear();
            self.descriptor_pool.destroy(device);
            device.destroy_descriptor_set_layout(self.set_layout, None);

            {
                let mut allocator = gpu.allocator().lock();
                for (name, buffer) in [
                    ("uniform", &mut self.uniforms),
                    ("vertex", &mut self.vertex_buffer),
                    ("index", &mut self.index_buffer),
                    ("instance", &mut self.instance_buffer),
                ] {
                    if let Err(e) = allocator.free_buffer(buffer) {
                        tracing::warn!("Failed to free {name} buffer: {e}");
                    }
                }
            }
            if let Err(e) = self.texture.destroy(gpu) {
                tracing::warn!("Failed to free texture: {e}");
            }

            self.pipeline.destroy(device);
            self.framebuffers.destroy(device);
            if let Err(e) = self.depth.destroy(gpu) {
                tracing::warn!("Failed to free depth buffer: {e}");
            }
            self.render_pass.destroy(device);
            self.swapchain.destroy(device, gpu.swapchain_loader());
            self.surface.destroy();
        }

        tracing::debug!("Render resources destroyed");
    }
}

/// Carve one uniform region of `size` bytes per frame slot out of a single
/// buffer, each starting on a valid dynamic offset.
pub fn uniform_layout(slots: usize, size: u64, device_alignment: u64) -> Result<Vec<ArenaRange>> {
    let align = device_alignment.max(MIN_UNIFORM_ALIGNMENT);
    let stride = align_up(size, align);
    let mut arena = LinearArena::new(stride * slots as u64);

    (0..slots)
        .map(|_| {
            arena
                .alloc(size, align)
                .map_err(|e| GpuError::InvalidState(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_regions_respect_device_alignment() {
        let ranges = uniform_layout(3, 208, 256).unwrap();
        let offsets: Vec<u64> = ranges.iter().map(|r| r.offset).collect();
        assert_eq!(offsets, vec![0, 256, 512]);
        assert!(ranges.iter().all(|r| r.size == 208));
    }

    #[test]
    fn uniform_regions_use_minimum_alignment() {
        // Devices reporting 1 still get 16-byte aligned regions
        let ranges = uniform_layout(2, 208, 1).unwrap();
        assert_eq!(ranges[1].offset, 208);
        assert_eq!(ranges[1].offset % MIN_UNIFORM_ALIGNMENT, 0);
    }

    #[test]
    fn uniform_regions_do_not_overlap() {
        let ranges = uniform_layout(4, 100, 64).unwrap();
        for pair in ranges.windows(2) {
            assert!(pair[0].end() <= pair[1].offset);
        }
    }
}
