//! Swapchain negotiation, creation, and lifecycle tracking.
//!
//! Negotiation is a pure function of [`SurfaceSupport`] and the window size so
//! it can be tested against mock surfaces. [`Swapchain`] owns the handle and
//! image views; [`SwapchainLifecycle`] tracks where in the
//! create/invalidate/rebuild cycle the presentation state is.

use crate::context::GpuContext;
use crate::error::{GpuError, Result, VkResultExt};
use crate::frame::{AcquireOutcome, PresentOutcome};
use crate::surface::{SurfaceContext, SurfaceSupport};
use ash::vk;

/// Formats preferred for presentation, in order.
pub const PREFERRED_FORMATS: [vk::Format; 2] = [vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB];

/// Negotiated swapchain parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub image_count: u32,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainConfig {
    /// Pick image count, format, present mode, and extent for a surface.
    ///
    /// `width`/`height` are the window's framebuffer size in pixels and only
    /// matter when the surface leaves the extent up to the application.
    pub fn negotiate(support: &SurfaceSupport, width: u32, height: u32) -> Result<Self> {
        let surface_format = select_surface_format(&support.formats).ok_or_else(|| {
            GpuError::SwapchainCreation("surface reports no formats".to_string())
        })?;

        if support.present_modes.is_empty() {
            return Err(GpuError::SwapchainCreation(
                "surface reports no present modes".to_string(),
            ));
        }

        Ok(Self {
            image_count: choose_image_count(&support.capabilities),
            surface_format,
            present_mode: select_present_mode(&support.present_modes),
            extent: calculate_extent(&support.capabilities, width, height),
            pre_transform: support.capabilities.current_transform,
        })
    }
}

/// One more than the minimum, capped by the maximum when there is one.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        desired.min(capabilities.max_image_count)
    } else {
        desired
    }
}

/// Select the best surface format.
///
/// Prefers an 8-bit sRGB format with the sRGB non-linear color space, and
/// falls back to the first format the surface reports.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|f| {
            PREFERRED_FORMATS.contains(&f.format)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Select the best present mode: mailbox when offered, FIFO otherwise.
pub fn select_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        // FIFO is always supported
        vk::PresentModeKHR::FIFO
    }
}

/// Calculate swapchain extent.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired_width: u32,
    desired_height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired_width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired_height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Swapchain wrapper.
#[derive(Default)]
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Create a swapchain and one view per image.
    ///
    /// Images are shared concurrently when graphics and present use
    /// different queue families.
    ///
    /// # Safety
    /// The surface must belong to the context's instance, and
    /// `old_swapchain` (if not null) must not be in use.
    pub unsafe fn new(
        gpu: &GpuContext,
        surface: &SurfaceContext,
        config: &SwapchainConfig,
        old_swapchain: vk::SwapchainKHR,
    ) -> Result<Self> {
        let device = gpu.device();
        let loader = gpu.swapchain_loader();
        let families = [gpu.graphics_queue_family(), gpu.present_queue_family()];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(config.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        create_info = if families[0] == families[1] {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        };

        // SAFETY: caller guarantees handle validity
        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(format!("vkCreateSwapchainKHR: {e:?}")))?;

        // SAFETY: swapchain was just created
        let images = match unsafe { loader.get_swapchain_images(swapchain) }
            .call("vkGetSwapchainImagesKHR")
        {
            Ok(images) => images,
            Err(e) => {
                // SAFETY: no views reference the swapchain yet
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(config.surface_format.format)
                .components(vk::ComponentMapping::default())
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .base_mip_level(0)
                        .level_count(1)
                        .base_array_layer(0)
                        .layer_count(1),
                );

            // SAFETY: image belongs to this device's swapchain
            match unsafe { device.create_image_view(&view_info, None) }.call("vkCreateImageView") {
                Ok(view) => image_views.push(view),
                Err(e) => {
                    // SAFETY: partially built views and the swapchain are unused
                    unsafe {
                        for &view in &image_views {
                            device.destroy_image_view(view, None);
                        }
                        loader.destroy_swapchain(swapchain, None);
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(
            images = images.len(),
            format = ?config.surface_format.format,
            present_mode = ?config.present_mode,
            width = config.extent.width,
            height = config.extent.height,
            "Swapchain created"
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: config.surface_format.format,
            extent: config.extent,
            present_mode: config.present_mode,
        })
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire the next image, signalling `semaphore` when it is ready.
    ///
    /// Out-of-date is reported as an outcome, not an error.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(
        &self,
        loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
    ) -> Result<AcquireOutcome> {
        // SAFETY: forwarded from caller
        let result = unsafe {
            loader.acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            // No image was acquired and the semaphore stays unsignalled
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e).call("vkAcquireNextImageKHR"),
        }
    }

    /// Queue `image_index` for presentation after `wait_semaphores`.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn present(
        &self,
        loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: forwarded from caller
        match unsafe { loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e).call("vkQueuePresentKHR"),
        }
    }

    /// Destroy the image views and the swapchain.
    ///
    /// # Safety
    /// The device must be idle with respect to this swapchain.
    pub unsafe fn destroy(&mut self, device: &ash::Device, loader: &ash::khr::swapchain::Device) {
        // SAFETY: caller guarantees nothing references these objects
        unsafe {
            for view in self.image_views.drain(..) {
                device.destroy_image_view(view, None);
            }
            if self.swapchain != vk::SwapchainKHR::null() {
                loader.destroy_swapchain(self.swapchain, None);
            }
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
    }
}

/// Presentation state of the swapchain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Uninitialized,
    Created,
    Stale,
    Rebuilding,
    Destroyed,
}

/// Tracks legal transitions between [`SwapchainState`]s.
///
/// ```text
/// Uninitialized -> Created -> Stale -> Rebuilding -> Created
///             any live state -> Destroyed
/// ```
#[derive(Debug, Clone)]
pub struct SwapchainLifecycle {
    state: SwapchainState,
    generation: u64,
}

impl Default for SwapchainLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SwapchainLifecycle {
    pub const fn new() -> Self {
        Self {
            state: SwapchainState::Uninitialized,
            generation: 0,
        }
    }

    pub const fn state(&self) -> SwapchainState {
        self.state
    }

    /// Number of times a swapchain has been (re)created.
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    fn illegal(&self, event: &str) -> GpuError {
        GpuError::InvalidState(format!("swapchain cannot {event} while {:?}", self.state))
    }

    /// A swapchain was created (initially or at the end of a rebuild).
    pub fn mark_created(&mut self) -> Result<()> {
        match self.state {
            SwapchainState::Uninitialized | SwapchainState::Rebuilding => {
                self.state = SwapchainState::Created;
                self.generation += 1;
                Ok(())
            }
            _ => Err(self.illegal("be created")),
        }
    }

    /// Presentation reported staleness or the window changed size.
    ///
    /// Invalidating an already stale swapchain is a no-op.
    pub fn invalidate(&mut self) -> Result<()> {
        match self.state {
            SwapchainState::Created | SwapchainState::Stale => {
                self.state = SwapchainState::Stale;
                Ok(())
            }
            _ => Err(self.illegal("be invalidated")),
        }
    }

    /// Teardown of the stale swapchain is starting.
    pub fn begin_rebuild(&mut self) -> Result<()> {
        match self.state {
            SwapchainState::Stale => {
                self.state = SwapchainState::Rebuilding;
                Ok(())
            }
            _ => Err(self.illegal("begin a rebuild")),
        }
    }

    /// Final teardown.
    pub fn mark_destroyed(&mut self) -> Result<()> {
        match self.state {
            SwapchainState::Destroyed => Err(self.illegal("be destroyed")),
            _ => {
                self.state = SwapchainState::Destroyed;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_srgb_format() {
        let formats = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            select_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_SRGB)
        );
    }

    #[test]
    fn rgba_srgb_is_also_preferred() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            select_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_SRGB)
        );
    }

    #[test]
    fn format_falls_back_to_first() {
        let formats = [
            format(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::HDR10_ST2084_EXT),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let first = select_surface_format(&formats);
        assert_eq!(first, Some(formats[0]));
        // Idempotent
        assert_eq!(select_surface_format(&formats), first);
    }

    #[test]
    fn srgb_format_with_wrong_color_space_is_not_preferred() {
        let formats = [
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(select_surface_format(&formats), Some(formats[0]));
    }

    #[test]
    fn no_formats_means_no_selection() {
        assert_eq!(select_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_prefers_mailbox() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(select_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(select_present_mode(&modes), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&modes), select_present_mode(&modes));
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        assert_eq!(choose_image_count(&caps(2, 4)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
    }

    #[test]
    fn extent_is_clamped_into_bounds() {
        let bounds = [(1, 1, 4096, 4096), (200, 100, 800, 600), (64, 64, 64, 64)];
        let sizes = [0, 1, 63, 64, 500, 800, 1920, 10_000];

        for &(min_w, min_h, max_w, max_h) in &bounds {
            let mut c = caps(2, 4);
            c.min_image_extent = vk::Extent2D {
                width: min_w,
                height: min_h,
            };
            c.max_image_extent = vk::Extent2D {
                width: max_w,
                height: max_h,
            };

            for &w in &sizes {
                for &h in &sizes {
                    let e = calculate_extent(&c, w, h);
                    assert!((min_w..=max_w).contains(&e.width), "{w}x{h} -> {e:?}");
                    assert!((min_h..=max_h).contains(&e.height), "{w}x{h} -> {e:?}");
                }
            }
        }
    }

    #[test]
    fn definite_current_extent_wins() {
        let mut c = caps(2, 4);
        c.current_extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        assert_eq!(
            calculate_extent(&c, 10, 10),
            vk::Extent2D {
                width: 1024,
                height: 768
            }
        );
    }

    #[test]
    fn negotiate_rejects_empty_support() {
        let support = SurfaceSupport {
            capabilities: caps(2, 4),
            formats: vec![],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(matches!(
            SwapchainConfig::negotiate(&support, 800, 600),
            Err(GpuError::SwapchainCreation(_))
        ));
    }

    #[test]
    fn lifecycle_cycles_through_rebuild() {
        let mut lifecycle = SwapchainLifecycle::new();
        assert_eq!(lifecycle.state(), SwapchainState::Uninitialized);

        lifecycle.mark_created().unwrap();
        lifecycle.invalidate().unwrap();
        lifecycle.invalidate().unwrap();
        lifecycle.begin_rebuild().unwrap();
        assert_eq!(lifecycle.state(), SwapchainState::Rebuilding);
        lifecycle.mark_created().unwrap();

        assert_eq!(lifecycle.state(), SwapchainState::Created);
        assert_eq!(lifecycle.generation(), 2);
    }

    #[test]
    fn lifecycle_rejects_illegal_transitions() {
        let mut lifecycle = SwapchainLifecycle::new();
        assert!(lifecycle.invalidate().is_err());
        assert!(lifecycle.begin_rebuild().is_err());

        lifecycle.mark_created().unwrap();
        assert!(lifecycle.mark_created().is_err());
        assert!(lifecycle.begin_rebuild().is_err());

        lifecycle.mark_destroyed().unwrap();
        assert!(matches!(
            lifecycle.mark_created(),
            Err(GpuError::InvalidState(_))
        ));
        assert!(lifecycle.mark_destroyed().is_err());
    }
}
