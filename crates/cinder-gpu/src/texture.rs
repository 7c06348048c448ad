//! Sampled 2D textures uploaded through a staging buffer.

use crate::context::GpuContext;
use crate::error::{GpuError, Result, VkResultExt};
use crate::memory::GpuImage;
use crate::upload::{one_shot, with_staging};
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Access and stage masks for one image layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier masks for the transitions a texture upload needs.
///
/// Only `UNDEFINED -> TRANSFER_DST_OPTIMAL` and
/// `TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL` are supported.
pub fn layout_transition(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<TransitionMasks> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok(TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        }),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        _ => Err(GpuError::InvalidState(format!(
            "unsupported layout transition {old:?} -> {new:?}"
        ))),
    }
}

/// Record a pipeline barrier moving the color image from `old` to `new`.
///
/// # Safety
/// `cmd` must be recording and `image` must be valid.
pub unsafe fn record_layout_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    masks: TransitionMasks,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_range())
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    // SAFETY: forwarded from caller
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            masks.src_stage,
            masks.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Sampled texture: image, view, and sampler.
#[derive(Default)]
pub struct Texture {
    pub image: GpuImage,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
}

impl Texture {
    /// Upload tightly packed RGBA8 sRGB pixels.
    pub fn from_rgba8(gpu: &GpuContext, width: u32, height: u32, pixels: &[u8], name: &str) -> Result<Self> {
        let expected = u64::from(width) * u64::from(height) * 4;
        if width == 0 || height == 0 || pixels.len() as u64 != expected {
            return Err(GpuError::InvalidState(format!(
                "texture '{name}' is {width}x{height} but has {} bytes",
                pixels.len()
            )));
        }

        // Validate both transitions before touching the GPU
        let to_transfer =
            layout_transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        let to_shader = layout_transition(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        let format = vk::Format::R8G8B8A8_SRGB;
        let extent = vk::Extent3D {
            width,
            height,
            depth: 1,
        };
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image = gpu
            .allocator()
            .lock()
            .create_image(&create_info, MemoryLocation::GpuOnly, name)?;

        let device = gpu.device();
        let uploaded = with_staging(
            gpu,
            expected,
            MemoryLocation::CpuToGpu,
            vk::BufferUsageFlags::TRANSFER_SRC,
            "staging texture",
            |staging| {
                staging.write_bytes(0, pixels)?;
                one_shot(gpu, |cmd| {
                    let region = vk::BufferImageCopy::default()
                        .buffer_offset(0)
                        .buffer_row_length(0)
                        .buffer_image_height(0)
                        .image_subresource(
                            vk::ImageSubresourceLayers::default()
                                .aspect_mask(vk::ImageAspectFlags::COLOR)
                                .mip_level(0)
                                .base_array_layer(0)
                                .layer_count(1),
                        )
                        .image_extent(extent);

                    // SAFETY: cmd is recording; image and staging are valid
                    unsafe {
                        record_layout_transition(
                            device,
                            cmd,
                            image.image,
                            to_transfer,
                            vk::ImageLayout::UNDEFINED,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        );
                        device.cmd_copy_buffer_to_image(
                            cmd,
                            staging.buffer,
                            image.image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &[region],
                        );
                        record_layout_transition(
                            device,
                            cmd,
                            image.image,
                            to_shader,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                        );
                    }
                })
            },
        );

        let view_and_sampler = uploaded.and_then(|()| {
            // SAFETY: image holds uploaded pixels in shader-read layout
            unsafe { create_view_and_sampler(gpu, image.image, format) }
        });

        match view_and_sampler {
            Ok((view, sampler)) => {
                tracing::debug!(name, width, height, "Texture uploaded");
                Ok(Self {
                    image,
                    view,
                    sampler,
                })
            }
            Err(e) => {
                gpu.allocator().lock().free_image(&mut image)?;
                Err(e)
            }
        }
    }

    /// Destroy the sampler and view, and release the image.
    ///
    /// # Safety
    /// No descriptor referencing the texture may be in use.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) -> Result<()> {
        // SAFETY: forwarded from caller
        unsafe {
            gpu.device().destroy_sampler(self.sampler, None);
            gpu.device().destroy_image_view(self.view, None);
        }
        self.sampler = vk::Sampler::null();
        self.view = vk::ImageView::null();
        gpu.allocator().lock().free_image(&mut self.image)
    }
}

unsafe fn create_view_and_sampler(
    gpu: &GpuContext,
    image: vk::Image,
    format: vk::Format,
) -> Result<(vk::ImageView, vk::Sampler)> {
    let device = gpu.device();

    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(color_range());
    // SAFETY: forwarded from caller
    let view = unsafe { device.create_image_view(&view_info, None) }.call("vkCreateImageView")?;

    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(true)
        .max_anisotropy(gpu.capabilities().max_sampler_anisotropy)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);

    // SAFETY: samplerAnisotropy was enabled at device creation
    match unsafe { device.create_sampler(&sampler_info, None) }.call("vkCreateSampler") {
        Ok(sampler) => Ok((view, sampler)),
        Err(e) => {
            // SAFETY: view is unused
            unsafe { device.destroy_image_view(view, None) };
            Err(e)
        }
    }
}

/// Generate an RGBA8 checkerboard of `size` x `size` pixels with `cells`
/// squares per side.
pub fn checkerboard(size: u32, cells: u32, a: [u8; 4], b: [u8; 4]) -> Vec<u8> {
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let color = if ((x / cell) + (y / cell)) % 2 == 0 { a } else { b };
            pixels.extend_from_slice(&color);
        }
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_to_transfer_dst_masks() {
        let m = layout_transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .unwrap();
        assert_eq!(m.src_access, vk::AccessFlags::empty());
        assert_eq!(m.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(m.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(m.dst_stage, vk::PipelineStageFlags::TRANSFER);
    }

    #[test]
    fn transfer_dst_to_shader_read_masks() {
        let m = layout_transition(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )
        .unwrap();
        assert_eq!(m.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(m.dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(m.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(m.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn other_transitions_are_rejected() {
        let pairs = [
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            (vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL, vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::UNDEFINED),
            (vk::ImageLayout::GENERAL, vk::ImageLayout::GENERAL),
        ];
        for (old, new) in pairs {
            assert!(matches!(
                layout_transition(old, new),
                Err(GpuError::InvalidState(_))
            ));
        }
    }

    #[test]
    fn checkerboard_alternates_cells() {
        let white = [255, 255, 255, 255];
        let black = [0, 0, 0, 255];
        let pixels = checkerboard(4, 2, white, black);

        assert_eq!(pixels.len(), 4 * 4 * 4);
        let px = |x: usize, y: usize| &pixels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(px(0, 0), white);
        assert_eq!(px(2, 0), black);
        assert_eq!(px(0, 2), black);
        assert_eq!(px(3, 3), white);
    }
}
