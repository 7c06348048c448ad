//! Validation message routing.
//!
//! The debug-utils loader is resolved once when the messenger is created and
//! cached alongside it; nothing else in the engine looks up these entry
//! points.

use crate::error::{Result, VkResultExt};
use ash::vk;
use std::ffi::{c_void, CStr};
use tracing::Level;

/// Log target used for driver validation messages.
pub const VALIDATION_TARGET: &str = "cinder_gpu::validation";

/// Map a driver message severity to a log level.
pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => Level::TRACE,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => Level::INFO,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => Level::WARN,
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => Level::ERROR,
        _ => Level::DEBUG,
    }
}

fn message_kind(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "general",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "other",
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() {
        return vk::FALSE;
    }

    // SAFETY: the driver guarantees the callback data and its message are valid for
    // the duration of the call
    let message = unsafe {
        let data = &*callback_data;
        if data.p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(data.p_message).to_string_lossy()
    };
    let kind = message_kind(message_type);

    match severity_level(severity) {
        Level::TRACE => tracing::trace!(target: VALIDATION_TARGET, kind, "{message}"),
        Level::INFO => tracing::info!(target: VALIDATION_TARGET, kind, "{message}"),
        Level::WARN => tracing::warn!(target: VALIDATION_TARGET, kind, "{message}"),
        Level::ERROR => tracing::error!(target: VALIDATION_TARGET, kind, "{message}"),
        _ => tracing::debug!(target: VALIDATION_TARGET, kind, "{message}"),
    }

    vk::FALSE
}

/// Create info shared by the messenger and instance creation.
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

/// Debug messenger owned by the instance.
pub struct DebugMessenger {
    loader: ash::ext::debug_utils::Instance,
    messenger: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    /// Attach a messenger to the instance.
    ///
    /// # Safety
    /// The instance must have been created with `VK_EXT_debug_utils` enabled.
    pub unsafe fn new(entry: &ash::Entry, instance: &ash::Instance) -> Result<Self> {
        let loader = ash::ext::debug_utils::Instance::new(entry, instance);
        let create_info = messenger_create_info();
        // SAFETY: loader was created from this instance
        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .call("vkCreateDebugUtilsMessengerEXT")?;

        tracing::debug!("Validation messenger attached");
        Ok(Self { loader, messenger })
    }

    /// Destroy the messenger.
    ///
    /// # Safety
    /// Must be called before the owning instance is destroyed.
    pub unsafe fn destroy(&self) {
        // SAFETY: caller guarantees the instance is still alive
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_maps_one_to_one() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Sev;

        assert_eq!(severity_level(Sev::VERBOSE), Level::TRACE);
        assert_eq!(severity_level(Sev::INFO), Level::INFO);
        assert_eq!(severity_level(Sev::WARNING), Level::WARN);
        assert_eq!(severity_level(Sev::ERROR), Level::ERROR);
    }

    #[test]
    fn create_info_routes_to_callback() {
        let info = messenger_create_info();
        assert!(info.pfn_user_callback.is_some());
        assert!(info
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR));
    }
}
