//! Depth attachment and per-image framebuffers.
//!
//! Both follow the swapchain extent and are rebuilt with it.

use crate::context::GpuContext;
use crate::error::{GpuError, Result, VkResultExt};
use crate::memory::GpuImage;
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// First candidate for which `supports_depth_attachment` returns true.
pub fn select_depth_format<F>(candidates: &[vk::Format], mut supports_depth_attachment: F) -> Option<vk::Format>
where
    F: FnMut(vk::Format) -> bool,
{
    candidates
        .iter()
        .copied()
        .find(|&format| supports_depth_attachment(format))
}

/// Pick a depth format the device can use as an optimally tiled attachment.
pub fn find_depth_format(gpu: &GpuContext) -> Result<vk::Format> {
    select_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| {
        // SAFETY: physical device belongs to this instance
        let props = unsafe {
            gpu.instance()
                .get_physical_device_format_properties(gpu.physical_device(), format)
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
    .ok_or_else(|| GpuError::InvalidState("no supported depth attachment format".to_string()))
}

/// Whether `format` carries a stencil component.
pub const fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Device-local depth image and its view.
#[derive(Default)]
pub struct DepthBuffer {
    pub image: GpuImage,
    pub view: vk::ImageView,
}

impl DepthBuffer {
    /// Create a depth attachment of `extent`.
    ///
    /// # Safety
    /// The context must be valid.
    pub unsafe fn new(gpu: &GpuContext, format: vk::Format, extent: vk::Extent2D) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image = gpu
            .allocator()
            .lock()
            .create_image(&create_info, MemoryLocation::GpuOnly, "depth")?;

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::DEPTH)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        // SAFETY: image was just created on this device
        let view = match unsafe { gpu.device().create_image_view(&view_info, None) }
            .call("vkCreateImageView")
        {
            Ok(view) => view,
            Err(e) => {
                gpu.allocator().lock().free_image(&mut image)?;
                return Err(e);
            }
        };

        Ok(Self { image, view })
    }

    /// Destroy the view and release the image.
    ///
    /// # Safety
    /// No framebuffer using the view may be in use.
    pub unsafe fn destroy(&mut self, gpu: &GpuContext) -> Result<()> {
        // SAFETY: forwarded from caller
        unsafe {
            gpu.device().destroy_image_view(self.view, None);
        }
        self.view = vk::ImageView::null();
        gpu.allocator().lock().free_image(&mut self.image)
    }
}

/// One framebuffer per swapchain image, all sharing the depth view.
#[derive(Default)]
pub struct FramebufferSet {
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl FramebufferSet {
    /// Create framebuffers for every color view.
    ///
    /// # Safety
    /// All handles must be valid and compatible with `render_pass`.
    pub unsafe fn new(
        device: &ash::Device,
        render_pass: vk::RenderPass,
        color_views: &[vk::ImageView],
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut framebuffers = Vec::with_capacity(color_views.len());

        for &color_view in color_views {
            let attachments = [color_view, depth_view];
            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            // SAFETY: forwarded from caller
            match unsafe { device.create_framebuffer(&create_info, None) }.call("vkCreateFramebuffer") {
                Ok(fb) => framebuffers.push(fb),
                Err(e) => {
                    let mut partial = Self { framebuffers };
                    // SAFETY: partial framebuffers were never used
                    unsafe { partial.destroy(device) };
                    return Err(e);
                }
            }
        }

        Ok(Self { framebuffers })
    }

    /// Framebuffer for a swapchain image.
    pub fn get(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    /// Destroy every framebuffer.
    ///
    /// # Safety
    /// None of the framebuffers may be in use.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for fb in self.framebuffers.drain(..) {
            // SAFETY: forwarded from caller
            unsafe { device.destroy_framebuffer(fb, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_format_prefers_d32() {
        let chosen = select_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| true);
        assert_eq!(chosen, Some(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn depth_format_falls_through_unsupported() {
        let chosen = select_depth_format(&DEPTH_FORMAT_CANDIDATES, |f| {
            f == vk::Format::D24_UNORM_S8_UINT
        });
        assert_eq!(chosen, Some(vk::Format::D24_UNORM_S8_UINT));
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn no_depth_format_when_nothing_supported() {
        assert_eq!(select_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| false), None);
    }
}
