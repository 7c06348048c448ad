//! Physical device capability snapshots and selection scoring.
//!
//! Scoring works on [`DeviceCandidate`], a plain-data snapshot, so the
//! selection rules can be exercised without a driver.

use crate::error::{Result, VkResultExt};
use crate::surface::SurfaceContext;
use ash::vk;
use std::collections::{BTreeSet, HashSet};
use std::ffi::CStr;

/// Device extensions every candidate must support.
pub const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

/// Score bonus for discrete GPUs.
pub const DISCRETE_GPU_BONUS: u32 = 1000;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Queue family indices discovered on a physical device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    /// First family supporting graphics operations.
    pub graphics: Option<u32>,
    /// First family able to present to the target surface.
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Both families were found.
    pub const fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// Distinct family indices, in ascending order.
    pub fn unique(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = self.graphics.into_iter().chain(self.present).collect();
        set.into_iter().collect()
    }
}

/// Scan queue families once, recording the first graphics family and,
/// independently, the first family that can present.
///
/// Stops as soon as both are known.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Result<QueueFamilyIndices>
where
    F: FnMut(u32) -> Result<bool>,
{
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;

        if indices.graphics.is_none()
            && family.queue_count > 0
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics = Some(i);
        }

        if indices.present.is_none() && family.queue_count > 0 && supports_present(i)? {
            indices.present = Some(i);
        }

        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// Capability snapshot of one physical device.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    /// Device name
    pub name: String,
    /// GPU vendor
    pub vendor: GpuVendor,
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    pub max_image_dimension_2d: u32,
    pub max_sampler_anisotropy: f32,
    pub min_uniform_buffer_offset_alignment: u64,
    pub sampler_anisotropy: bool,
    pub fill_mode_non_solid: bool,
    /// Supported device extension names.
    pub extensions: HashSet<String>,
    pub queue_families: QueueFamilyIndices,
    /// Whether surface checks apply (false for headless contexts).
    pub requires_surface: bool,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
}

impl DeviceCandidate {
    /// Query a physical device.
    ///
    /// With a surface, presentation support and surface format/present mode
    /// counts are recorded. Without one the present family mirrors the
    /// graphics family and surface checks are skipped.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        surface: Option<&SurfaceContext>,
    ) -> Result<Self> {
        // SAFETY: caller guarantees both handles are valid
        let (properties, features, families, extension_props) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_features(physical_device),
                instance.get_physical_device_queue_family_properties(physical_device),
                instance
                    .enumerate_device_extension_properties(physical_device)
                    .call("vkEnumerateDeviceExtensionProperties")?,
            )
        };

        let extensions: HashSet<String> = extension_props
            .iter()
            .filter_map(|ext| ext.extension_name_as_c_str().ok())
            .filter_map(|name| name.to_str().ok())
            .map(String::from)
            .collect();

        let name = properties
            .device_name_as_c_str()
            .map_or_else(|_| "<unnamed>".to_string(), |n| n.to_string_lossy().into_owned());

        let (queue_families, surface_format_count, present_mode_count) = match surface {
            Some(surface) => {
                let queue_families = find_queue_families(&families, |index| {
                    surface.supports_present(physical_device, index)
                })?;
                let support = surface.support(physical_device)?;
                (
                    queue_families,
                    support.formats.len(),
                    support.present_modes.len(),
                )
            }
            None => {
                let queue_families = find_queue_families(&families, |index| {
                    Ok(families[index as usize]
                        .queue_flags
                        .contains(vk::QueueFlags::GRAPHICS))
                })?;
                (queue_families, 0, 0)
            }
        };

        Ok(Self {
            name,
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_type: properties.device_type,
            api_version: properties.api_version,
            max_image_dimension_2d: properties.limits.max_image_dimension2_d,
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
            min_uniform_buffer_offset_alignment: properties
                .limits
                .min_uniform_buffer_offset_alignment,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            fill_mode_non_solid: features.fill_mode_non_solid == vk::TRUE,
            extensions,
            queue_families,
            requires_surface: surface.is_some(),
            surface_format_count,
            present_mode_count,
        })
    }

    /// Names of required device extensions this device lacks.
    pub fn missing_extensions(&self) -> Vec<String> {
        REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .filter_map(|ext| ext.to_str().ok())
            .filter(|ext| !self.extensions.contains(*ext))
            .map(String::from)
            .collect()
    }

    /// Check every mandatory capability.
    pub fn meets_requirements(&self) -> bool {
        if !self.sampler_anisotropy {
            return false;
        }

        if !self.missing_extensions().is_empty() {
            return false;
        }

        if self.queue_families.graphics.is_none() {
            return false;
        }

        if self.requires_surface
            && (self.queue_families.present.is_none()
                || self.surface_format_count == 0
                || self.present_mode_count == 0)
        {
            return false;
        }

        true
    }

    /// Selection score. Zero means the device is ineligible.
    pub fn score(&self) -> u32 {
        if !self.meets_requirements() {
            return 0;
        }

        let mut score = 1u32;
        if self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += DISCRETE_GPU_BONUS;
        }
        score.saturating_add(self.max_image_dimension_2d)
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}, {:?}) - Vulkan {}.{}.{} - score {}",
            self.name,
            self.vendor,
            self.device_type,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.score(),
        )
    }
}

/// Index of the highest-scoring eligible candidate.
///
/// Ties go to the earlier candidate in enumeration order.
pub fn pick_best(candidates: &[DeviceCandidate]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        let score = candidate.score();
        if score == 0 {
            continue;
        }
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((index, score));
        }
    }

    best.map(|(index, _)| index)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn candidate(name: &str, device_type: vk::PhysicalDeviceType) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_string(),
            vendor: GpuVendor::Other(0),
            device_type,
            api_version: vk::API_VERSION_1_2,
            max_image_dimension_2d: 16384,
            max_sampler_anisotropy: 16.0,
            min_uniform_buffer_offset_alignment: 256,
            sampler_anisotropy: true,
            fill_mode_non_solid: true,
            extensions: HashSet::from(["VK_KHR_swapchain".to_string()]),
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            requires_surface: true,
            surface_format_count: 2,
            present_mode_count: 1,
        }
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
    }

    #[test]
    fn discrete_gpu_wins() {
        let candidates = vec![
            candidate("integrated", vk::PhysicalDeviceType::INTEGRATED_GPU),
            candidate("discrete", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(pick_best(&candidates), Some(1));
    }

    #[test]
    fn larger_texture_dimension_breaks_type_parity() {
        let mut small = candidate("small", vk::PhysicalDeviceType::INTEGRATED_GPU);
        small.max_image_dimension_2d = 8192;
        let big = candidate("big", vk::PhysicalDeviceType::INTEGRATED_GPU);
        assert_eq!(pick_best(&[small, big]), Some(1));
    }

    #[test]
    fn ties_go_to_enumeration_order() {
        let candidates = vec![
            candidate("first", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("second", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        assert_eq!(pick_best(&candidates), Some(0));
    }

    #[test]
    fn selection_is_deterministic() {
        let candidates = vec![
            candidate("a", vk::PhysicalDeviceType::CPU),
            candidate("b", vk::PhysicalDeviceType::DISCRETE_GPU),
            candidate("c", vk::PhysicalDeviceType::INTEGRATED_GPU),
        ];
        let first = pick_best(&candidates);
        for _ in 0..10 {
            assert_eq!(pick_best(&candidates), first);
        }
    }

    #[test]
    fn each_mandatory_capability_disqualifies() {
        let mut no_aniso = candidate("aniso", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_aniso.sampler_anisotropy = false;

        let mut no_swapchain = candidate("ext", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_swapchain.extensions.clear();

        let mut no_graphics = candidate("gfx", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_graphics.queue_families.graphics = None;

        let mut no_present = candidate("present", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_present.queue_families.present = None;

        let mut no_formats = candidate("formats", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_formats.surface_format_count = 0;

        let mut no_modes = candidate("modes", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_modes.present_mode_count = 0;

        let candidates = vec![
            no_aniso,
            no_swapchain,
            no_graphics,
            no_present,
            no_formats,
            no_modes,
        ];
        for c in &candidates {
            assert_eq!(c.score(), 0, "{} should be ineligible", c.name);
        }
        assert_eq!(pick_best(&candidates), None);
    }

    #[test]
    fn headless_candidates_skip_surface_checks() {
        let mut headless = candidate("headless", vk::PhysicalDeviceType::CPU);
        headless.requires_surface = false;
        headless.surface_format_count = 0;
        headless.present_mode_count = 0;
        assert!(headless.score() > 0);
    }

    #[test]
    fn queue_families_may_alias() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
        assert_eq!(indices.unique(), vec![0]);
    }

    #[test]
    fn queue_families_found_independently() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = find_queue_families(&families, |i| Ok(i == 2)).unwrap();
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(2));
        assert_eq!(indices.unique(), vec![1, 2]);
    }

    #[test]
    fn queue_family_search_stops_early() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut probed = Vec::new();
        let indices = find_queue_families(&families, |i| {
            probed.push(i);
            Ok(true)
        })
        .unwrap();

        assert!(indices.is_complete());
        assert_eq!(probed, vec![0]);
    }
}
