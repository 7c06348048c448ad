//! GPU context management.
//!
//! [`GpuContext`] owns the long-lived objects every other resource hangs off:
//! entry, instance, optional validation messenger, the chosen physical
//! device, the logical device with its queues, the memory allocator, and a
//! transient command pool for uploads. Dropping it tears these down in the
//! reverse order of creation.

use crate::capabilities::{DeviceCandidate, QueueFamilyIndices, REQUIRED_DEVICE_EXTENSIONS};
use crate::command::CommandPool;
use crate::debug::DebugMessenger;
use crate::error::{GpuError, Result, VkResultExt};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use crate::surface::{window_extensions, SurfaceContext, WindowSource};
use ash::vk;
use cinder_core::constants::ENGINE_NAME;
use parking_lot::Mutex;
use std::ffi::{c_char, CStr};
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) debug: Option<DebugMessenger>,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) candidate: DeviceCandidate,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) allocator: Mutex<GpuAllocator>,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
    pub(crate) transfer_pool: Mutex<CommandPool>,

    pub(crate) graphics_queue_family: u32,
    pub(crate) present_queue_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan entry point.
    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Capability snapshot of the selected device.
    pub fn capabilities(&self) -> &DeviceCandidate {
        &self.candidate
    }

    /// Whether validation messages are being routed to the log.
    pub fn validation_enabled(&self) -> bool {
        self.debug.is_some()
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue. May be the same queue as graphics.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get the graphics queue family index.
    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the present queue family index.
    pub fn present_queue_family(&self) -> u32 {
        self.present_queue_family
    }

    /// Get the swapchain extension loader.
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Transient command pool on the graphics family, for one-shot uploads.
    pub fn transfer_pool(&self) -> &Mutex<CommandPool> {
        &self.transfer_pool
    }

    /// Whether the device can rasterize in line mode.
    pub fn supports_wireframe(&self) -> bool {
        self.candidate.fill_mode_non_solid
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        // SAFETY: device is valid for the context's lifetime
        unsafe { self.device.device_wait_idle() }.call("vkDeviceWaitIdle")
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        // SAFETY: every object below was created by this context and is
        // destroyed exactly once, children before parents
        unsafe {
            let _ = self.device.device_wait_idle();

            self.transfer_pool.lock().destroy(&self.device);

            // Frees every VkDeviceMemory; must precede device destruction
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);

            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
        tracing::debug!("GPU context destroyed");
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: ENGINE_NAME.to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build a context with no presentation support.
    ///
    /// Used for offscreen work and GPU tests. The present queue aliases the
    /// graphics queue.
    pub fn build_headless(self) -> Result<GpuContext> {
        // SAFETY: loading the system Vulkan library
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        // SAFETY: entry was just loaded
        let instance =
            unsafe { create_instance(&entry, &self.app_name, self.enable_validation, &[]) }?;

        // SAFETY: instance is valid and owned by nothing else
        unsafe { self.assemble(entry, instance, None) }
    }

    /// Build a context able to present to `window`.
    ///
    /// Returns the context together with the window's surface. The surface
    /// must be destroyed (after any swapchain on it) before the context is
    /// dropped.
    ///
    /// # Safety
    /// The window must outlive the returned surface.
    pub unsafe fn build_for_window<W>(self, window: &W) -> Result<(GpuContext, SurfaceContext)>
    where
        W: WindowSource + ?Sized,
    {
        // SAFETY: loading the system Vulkan library
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let window_exts = window_extensions(window)?;
        // SAFETY: entry was just loaded
        let instance = unsafe {
            create_instance(&entry, &self.app_name, self.enable_validation, &window_exts)
        }?;

        // SAFETY: instance was created with the window's extensions
        let surface = match unsafe { SurfaceContext::new(&entry, &instance, window) } {
            Ok(surface) => surface,
            Err(e) => {
                // SAFETY: nothing else was created from this instance
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        // SAFETY: instance and surface are valid; on failure both are released
        let ctx = unsafe { self.assemble(entry, instance, Some(&surface)) }?;
        Ok((ctx, surface))
    }

    /// Attach the messenger, pick a device, and create everything that
    /// hangs off it.
    ///
    /// On failure, the surface (if any) and the instance are destroyed.
    unsafe fn assemble(
        &self,
        entry: ash::Entry,
        instance: ash::Instance,
        surface: Option<&SurfaceContext>,
    ) -> Result<GpuContext> {
        let mut debug = None;

        let result = (|| {
            if self.enable_validation {
                // SAFETY: instance was created with debug utils when validation is on
                debug = Some(unsafe { DebugMessenger::new(&entry, &instance) }?);
            }
            // SAFETY: forwarded from caller
            let selected = unsafe { select_physical_device(&instance, surface) }?;
            // SAFETY: device was enumerated from this instance
            unsafe { create_context(&entry, &instance, selected) }
        })();

        match result {
            Ok(mut ctx) => {
                ctx.debug = debug;
                tracing::info!("Selected GPU: {}", ctx.candidate.summary());
                Ok(ctx)
            }
            Err(e) => {
                // SAFETY: create_context released the device; only the
                // surface and messenger still hang off the instance
                unsafe {
                    if let Some(surface) = surface {
                        surface.destroy();
                    }
                    if let Some(debug) = &debug {
                        debug.destroy();
                    }
                    instance.destroy_instance(None);
                }
                Err(e)
            }
        }
    }
}

/// Create the logical device, allocator, and transfer pool.
///
/// Does not destroy `instance` on failure.
unsafe fn create_context(
    entry: &ash::Entry,
    instance: &ash::Instance,
    (physical_device, candidate): (vk::PhysicalDevice, DeviceCandidate),
) -> Result<GpuContext> {
    let families = candidate.queue_families;
    let graphics_family = families.graphics.ok_or(GpuError::NoSuitableDevice)?;
    let present_family = families.present.unwrap_or(graphics_family);

    // SAFETY: forwarded from caller
    let device = unsafe { create_device(instance, physical_device, &candidate, &families) }?;

    // SAFETY: both families were requested at device creation
    let (graphics_queue, present_queue) = unsafe {
        (
            device.get_device_queue(graphics_family, 0),
            device.get_device_queue(present_family, 0),
        )
    };

    let device = Arc::new(device);

    // SAFETY: device was created from this instance and physical device
    let allocator = match unsafe { GpuAllocator::new(instance, device.clone(), physical_device) } {
        Ok(allocator) => allocator,
        Err(e) => {
            // SAFETY: nothing was allocated from the device yet
            unsafe { device.destroy_device(None) };
            return Err(e);
        }
    };

    // SAFETY: graphics family exists on this device
    let transfer_pool = match unsafe {
        CommandPool::new(&device, graphics_family, vk::CommandPoolCreateFlags::TRANSIENT)
    } {
        Ok(pool) => pool,
        Err(e) => {
            drop(allocator);
            // SAFETY: allocator is gone and no other children exist
            unsafe { device.destroy_device(None) };
            return Err(e);
        }
    };

    let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device);

    if graphics_family == present_family {
        tracing::debug!(family = graphics_family, "Graphics and present share a queue family");
    } else {
        tracing::debug!(graphics_family, present_family, "Separate present queue family");
    }

    Ok(GpuContext {
        entry: entry.clone(),
        instance: instance.clone(),
        debug: None,
        physical_device,
        candidate,
        device,
        allocator: Mutex::new(allocator),
        swapchain_loader,
        transfer_pool: Mutex::new(transfer_pool),
        graphics_queue_family: graphics_family,
        present_queue_family: present_family,
        graphics_queue,
        present_queue,
    })
}

/// Create the logical device with one queue per distinct family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    candidate: &DeviceCandidate,
    families: &QueueFamilyIndices,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extension_names: Vec<*const c_char> = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|ext: &&CStr| ext.as_ptr())
        .collect();

    let features = vk::PhysicalDeviceFeatures::default()
        .sampler_anisotropy(true)
        .fill_mode_non_solid(candidate.fill_mode_non_solid);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .enabled_features(&features);

    // SAFETY: forwarded from caller
    unsafe { instance.create_device(physical_device, &device_create_info, None) }
        .call("vkCreateDevice")
}
