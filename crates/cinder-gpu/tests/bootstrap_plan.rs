//! Bootstrap decisions against a mock 800x600 window surface.
//!
//! Walks the same pure steps the real bootstrap takes (queue family
//! discovery, device scoring, swapchain negotiation) with driver answers
//! supplied by hand.

use ash::vk;
use cinder_gpu::capabilities::find_queue_families;
use cinder_gpu::{pick_best, DeviceCandidate, GpuVendor, SurfaceSupport, SwapchainConfig};
use std::collections::HashSet;

fn mock_surface(current_extent: vk::Extent2D) -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 4,
            current_extent,
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO],
    }
}

fn mock_device(support: &SurfaceSupport) -> DeviceCandidate {
    let families = [
        vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER,
            queue_count: 1,
            ..Default::default()
        },
        vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::TRANSFER,
            queue_count: 1,
            ..Default::default()
        },
    ];
    let queue_families = find_queue_families(&families, |i| Ok(i == 0)).unwrap();

    DeviceCandidate {
        name: "Mock GPU".to_string(),
        vendor: GpuVendor::Other(0xFFFF),
        device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
        api_version: vk::API_VERSION_1_2,
        max_image_dimension_2d: 8192,
        max_sampler_anisotropy: 16.0,
        min_uniform_buffer_offset_alignment: 64,
        sampler_anisotropy: true,
        fill_mode_non_solid: false,
        extensions: HashSet::from(["VK_KHR_swapchain".to_string()]),
        queue_families,
        requires_surface: true,
        surface_format_count: support.formats.len(),
        present_mode_count: support.present_modes.len(),
    }
}

#[test]
fn window_with_undefined_extent_uses_framebuffer_size() {
    let support = mock_surface(vk::Extent2D {
        width: u32::MAX,
        height: u32::MAX,
    });

    let device = mock_device(&support);
    assert_eq!(pick_best(std::slice::from_ref(&device)), Some(0));
    assert_eq!(device.queue_families.unique(), vec![0]);

    let config = SwapchainConfig::negotiate(&support, 800, 600).unwrap();
    assert_eq!(config.image_count, 3);
    assert_eq!(config.surface_format.format, vk::Format::R8G8B8A8_SRGB);
    assert_eq!(
        config.surface_format.color_space,
        vk::ColorSpaceKHR::SRGB_NONLINEAR
    );
    assert_eq!(config.present_mode, vk::PresentModeKHR::FIFO);
    assert_eq!(
        config.extent,
        vk::Extent2D {
            width: 800,
            height: 600
        }
    );
}

#[test]
fn window_with_definite_extent_ignores_requested_size() {
    let support = mock_surface(vk::Extent2D {
        width: 800,
        height: 600,
    });

    let config = SwapchainConfig::negotiate(&support, 1920, 1080).unwrap();
    assert_eq!(
        config.extent,
        vk::Extent2D {
            width: 800,
            height: 600
        }
    );
    assert_eq!(config.image_count, 3);
}

#[test]
fn surface_without_present_modes_disqualifies_device() {
    let mut support = mock_surface(vk::Extent2D {
        width: 800,
        height: 600,
    });
    support.present_modes.clear();

    let device = mock_device(&support);
    assert_eq!(device.score(), 0);
    assert_eq!(pick_best(&[device]), None);
}
