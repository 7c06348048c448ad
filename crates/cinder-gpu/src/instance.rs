//! Vulkan instance creation and physical device selection.

use crate::capabilities::{pick_best, DeviceCandidate};
use crate::error::{GpuError, Result, VkResultExt};
use crate::surface::SurfaceContext;
use ash::vk;
use cinder_core::constants::ENGINE_NAME;
use std::ffi::{c_char, CStr, CString};

/// Standard Khronos validation layer.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// API version requested from the driver.
pub const API_VERSION: u32 = vk::API_VERSION_1_2;

/// Instance extensions to enable, given what the windowing system needs.
///
/// Duplicates are removed while keeping the first occurrence.
pub fn instance_extensions(window_extensions: &[&'static CStr], validation: bool) -> Vec<&'static CStr> {
    let mut extensions: Vec<&'static CStr> = Vec::with_capacity(window_extensions.len() + 2);

    let extras: &[&'static CStr] = &[
        #[cfg(target_os = "macos")]
        ash::khr::portability_enumeration::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::get_physical_device_properties2::NAME,
    ];

    let debug: &[&'static CStr] = if validation {
        &[ash::ext::debug_utils::NAME]
    } else {
        &[]
    };

    for ext in window_extensions.iter().chain(extras).chain(debug) {
        if !extensions.contains(ext) {
            extensions.push(ext);
        }
    }

    extensions
}

/// Names in `wanted` that do not appear in `available`.
pub fn missing_names<'a>(wanted: &[&'a CStr], available: &[String]) -> Vec<&'a CStr> {
    wanted
        .iter()
        .copied()
        .filter(|name| {
            let name = name.to_string_lossy();
            !available.iter().any(|have| *have == name)
        })
        .collect()
}

fn extension_names(props: &[vk::ExtensionProperties]) -> Vec<String> {
    props
        .iter()
        .filter_map(|p| p.extension_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

fn layer_names(props: &[vk::LayerProperties]) -> Vec<String> {
    props
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect()
}

/// Create a Vulkan instance.
///
/// Fails with [`GpuError::ExtensionNotSupported`] when an instance extension
/// is missing, and with [`GpuError::ValidationLayerUnavailable`] when
/// validation was requested but the layer is not installed.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    validation: bool,
    window_extensions: &[&'static CStr],
) -> Result<ash::Instance> {
    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::InvalidState("application name contains NUL".to_string()))?;
    let engine_name = CString::new(ENGINE_NAME)
        .map_err(|_| GpuError::InvalidState("engine name contains NUL".to_string()))?;

    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 0, 1, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(API_VERSION);

    let extensions = instance_extensions(window_extensions, validation);

    // SAFETY: entry is valid
    let available = unsafe { entry.enumerate_instance_extension_properties(None) }
        .call("vkEnumerateInstanceExtensionProperties")?;
    let missing = missing_names(&extensions, &extension_names(&available));
    if let Some(first) = missing.first() {
        return Err(GpuError::ExtensionNotSupported(
            first.to_string_lossy().into_owned(),
        ));
    }

    let layers: Vec<&CStr> = if validation {
        // SAFETY: entry is valid
        let available = unsafe { entry.enumerate_instance_layer_properties() }
            .call("vkEnumerateInstanceLayerProperties")?;
        if !missing_names(&[VALIDATION_LAYER], &layer_names(&available)).is_empty() {
            return Err(GpuError::ValidationLayerUnavailable(
                VALIDATION_LAYER.to_string_lossy().into_owned(),
            ));
        }
        vec![VALIDATION_LAYER]
    } else {
        Vec::new()
    };

    let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|ext| ext.as_ptr()).collect();
    let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    // Required for MoltenVK on macOS
    #[cfg(target_os = "macos")]
    let create_flags = vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR;
    #[cfg(not(target_os = "macos"))]
    let create_flags = vk::InstanceCreateFlags::empty();

    // Chained so instance creation and destruction are also validated
    let mut debug_info = crate::debug::messenger_create_info();

    let mut create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extension_ptrs)
        .enabled_layer_names(&layer_ptrs)
        .flags(create_flags);
    if validation {
        create_info = create_info.push_next(&mut debug_info);
    }

    // SAFETY: all pointers in create_info outlive this call
    let instance = unsafe { entry.create_instance(&create_info, None) }.call("vkCreateInstance")?;

    tracing::debug!(
        extensions = extensions.len(),
        validation,
        "Vulkan instance created"
    );
    Ok(instance)
}

/// Score every physical device and pick the best one.
///
/// With a surface, presentation support is part of eligibility.
///
/// # Safety
/// The instance (and surface, if given) must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface: Option<&SurfaceContext>,
) -> Result<(vk::PhysicalDevice, DeviceCandidate)> {
    // SAFETY: instance is valid
    let devices =
        unsafe { instance.enumerate_physical_devices() }.call("vkEnumeratePhysicalDevices")?;

    let mut candidates = Vec::with_capacity(devices.len());
    for &device in &devices {
        // SAFETY: device was enumerated from this instance
        let candidate = unsafe { DeviceCandidate::query(instance, device, surface) }?;
        tracing::debug!("Candidate GPU: {}", candidate.summary());
        candidates.push(candidate);
    }

    let index = pick_best(&candidates).ok_or(GpuError::NoSuitableDevice)?;
    Ok((devices[index], candidates.swap_remove(index)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_adds_debug_utils_once() {
        let window = [ash::khr::surface::NAME, ash::ext::debug_utils::NAME];
        let exts = instance_extensions(&window, true);

        let debug_count = exts
            .iter()
            .filter(|e| **e == ash::ext::debug_utils::NAME)
            .count();
        assert_eq!(debug_count, 1);
        assert_eq!(exts[0], ash::khr::surface::NAME);
    }

    #[test]
    fn no_debug_utils_without_validation() {
        let exts = instance_extensions(&[ash::khr::surface::NAME], false);
        assert!(!exts.contains(&ash::ext::debug_utils::NAME));
    }

    #[test]
    fn missing_names_reports_absent_entries() {
        let available = vec!["VK_KHR_surface".to_string()];
        let missing = missing_names(
            &[ash::khr::surface::NAME, VALIDATION_LAYER],
            &available,
        );
        assert_eq!(missing, vec![VALIDATION_LAYER]);
    }
}
