//! GPU error types.

use ash::prelude::VkResult;
use ash::vk;
use std::panic::Location;
use std::path::PathBuf;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error without call-site information.
    #[error("Vulkan error: {0:?}")]
    Vulkan(#[from] vk::Result),

    /// A driver call returned a non-success result.
    #[error("{call} failed with {result:?} at {location}")]
    Call {
        call: &'static str,
        result: vk::Result,
        location: &'static Location<'static>,
    },

    /// The Vulkan loader could not be found or initialized.
    #[error("Failed to load Vulkan: {0}")]
    Loading(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Validation was requested but the layer is missing.
    #[error("Validation requested but layer {0} is not available")]
    ValidationLayerUnavailable(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader bytecode could not be loaded.
    #[error("Failed to load shader {}: {reason}", path.display())]
    ShaderLoad { path: PathBuf, reason: String },

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl GpuError {
    /// The driver result carried by this error, if any.
    pub const fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::Vulkan(result) | Self::Call { result, .. } => Some(*result),
            _ => None,
        }
    }

    /// Whether this error only means the swapchain must be rebuilt.
    pub fn is_out_of_date(&self) -> bool {
        self.vk_result() == Some(vk::Result::ERROR_OUT_OF_DATE_KHR)
    }
}

/// Attach the failing call name and source location to a raw Vulkan result.
pub trait VkResultExt<T> {
    /// Convert into [`Result`], naming the driver call that produced it.
    fn call(self, name: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    #[track_caller]
    fn call(self, name: &'static str) -> Result<T> {
        let location = Location::caller();
        self.map_err(|result| GpuError::Call {
            call: name,
            result,
            location,
        })
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_records_name_result_and_location() {
        let raw: VkResult<()> = Err(vk::Result::ERROR_DEVICE_LOST);
        let err = raw.call("vkQueueSubmit").unwrap_err();

        let message = err.to_string();
        assert!(message.contains("vkQueueSubmit"));
        assert!(message.contains("ERROR_DEVICE_LOST"));
        assert!(message.contains("error.rs"));
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_DEVICE_LOST));
    }

    #[test]
    fn out_of_date_detection() {
        let raw: VkResult<u32> = Err(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(raw.call("vkAcquireNextImageKHR").unwrap_err().is_out_of_date());
        assert!(!GpuError::NoSuitableDevice.is_out_of_date());
    }
}
