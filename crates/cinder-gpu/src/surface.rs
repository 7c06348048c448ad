//! Surface management for windowed rendering.
//!
//! The engine only needs a handful of things from a window: raw handles for
//! surface creation, the current framebuffer size in pixels, and a way to
//! block until something changes. [`WindowSource`] captures exactly that so
//! the GPU layer never depends on a windowing crate.

use crate::error::{GpuError, Result, VkResultExt};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;

/// A window the renderer can present to.
pub trait WindowSource: HasDisplayHandle + HasWindowHandle {
    /// Current framebuffer size in pixels. Zero in either axis when minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until window events may have changed the framebuffer size.
    fn wait_events(&self);
}

/// Instance extensions the windowing system needs for surface creation.
pub fn window_extensions<W: HasDisplayHandle + ?Sized>(window: &W) -> Result<Vec<&'static CStr>> {
    let display = window
        .display_handle()
        .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;

    let raw = ash_window::enumerate_required_extensions(display.as_raw())
        .call("ash_window::enumerate_required_extensions")?;

    // SAFETY: ash-window returns pointers to static extension name constants
    Ok(raw
        .iter()
        .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
        .collect())
}

/// Surface capabilities query result.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Vulkan surface for a window plus the loader that owns its entry points.
pub struct SurfaceContext {
    surface: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl SurfaceContext {
    /// Create a surface for `window`.
    ///
    /// # Safety
    /// The instance must have been created with the extensions reported by
    /// [`window_extensions`], and the window must outlive the surface.
    pub unsafe fn new<W>(entry: &ash::Entry, instance: &ash::Instance, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        // SAFETY: caller guarantees instance and window validity
        let surface = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(|e| GpuError::SurfaceCreation(format!("{e:?}")))?;

        let loader = ash::khr::surface::Instance::new(entry, instance);

        tracing::debug!("Window surface created");
        Ok(Self { surface, loader })
    }

    /// Raw surface handle.
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Query capabilities, formats, and present modes for a device.
    pub fn support(&self, physical_device: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        // SAFETY: surface and physical device belong to the same instance
        unsafe {
            let capabilities = self
                .loader
                .get_physical_device_surface_capabilities(physical_device, self.surface)
                .call("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;

            let formats = self
                .loader
                .get_physical_device_surface_formats(physical_device, self.surface)
                .call("vkGetPhysicalDeviceSurfaceFormatsKHR")?;

            let present_modes = self
                .loader
                .get_physical_device_surface_present_modes(physical_device, self.surface)
                .call("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

            Ok(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    /// Whether `queue_family` on `physical_device` can present to this surface.
    pub fn supports_present(&self, physical_device: vk::PhysicalDevice, queue_family: u32) -> Result<bool> {
        // SAFETY: surface and physical device belong to the same instance
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family, self.surface)
                .call("vkGetPhysicalDeviceSurfaceSupportKHR")
        }
    }

    /// Destroy the surface.
    ///
    /// # Safety
    /// No swapchain created from this surface may still exist.
    pub unsafe fn destroy(&self) {
        // SAFETY: caller guarantees the surface is unused
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
    }
}
