//! Synchronization primitives.

use crate::error::{GpuError, Result, VkResultExt};
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    // SAFETY: forwarded from caller
    unsafe { device.create_semaphore(&create_info, None) }.call("vkCreateSemaphore")
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    // SAFETY: forwarded from caller
    unsafe { device.create_fence(&create_info, None) }.call("vkCreateFence")
}

/// Per-slot synchronization objects.
pub struct FrameSync {
    /// Signaled when the acquired image is ready to be rendered to
    pub image_available: vk::Semaphore,
    /// Signaled when rendering is complete and the image can be presented
    pub render_finished: vk::Semaphore,
    /// Signaled when the slot's submission has fully retired
    pub in_flight: vk::Fence,
}

impl FrameSync {
    /// Create frame synchronization resources.
    ///
    /// The fence starts signaled so the first wait on a fresh slot returns
    /// immediately.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        // SAFETY: forwarded from caller
        unsafe {
            let image_available = create_semaphore(device)?;
            let render_finished = match create_semaphore(device) {
                Ok(s) => s,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(e);
                }
            };
            let in_flight = match create_fence(device, true) {
                Ok(f) => f,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                    return Err(e);
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight,
            })
        }
    }

    /// Block until the slot's previous submission has retired.
    ///
    /// There is no timeout: a hung GPU hangs the caller.
    ///
    /// # Safety
    /// The device must be valid.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        // SAFETY: forwarded from caller
        unsafe { device.wait_for_fences(&[self.in_flight], true, u64::MAX) }
            .call("vkWaitForFences")
    }

    /// Return the fence to the unsignaled state.
    ///
    /// # Safety
    /// The device must be valid and the fence must not be pending.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        // SAFETY: forwarded from caller
        unsafe { device.reset_fences(&[self.in_flight]) }.call("vkResetFences")
    }

    /// Destroy synchronization resources.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        // SAFETY: forwarded from caller
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// Fixed-size ring of [`FrameSync`] slots, one per frame in flight.
///
/// The ring size is independent of the swapchain image count.
#[derive(Default)]
pub struct FrameSyncRing {
    slots: Vec<FrameSync>,
}

impl FrameSyncRing {
    /// Create a ring with `frames_in_flight` slots.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, frames_in_flight: usize) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(GpuError::InvalidState(
                "frames in flight must be at least 1".to_string(),
            ));
        }

        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            // SAFETY: forwarded from caller
            match unsafe { FrameSync::new(device) } {
                Ok(sync) => slots.push(sync),
                Err(e) => {
                    for sync in &slots {
                        // SAFETY: slots were never submitted
                        unsafe { sync.destroy(device) };
                    }
                    return Err(e);
                }
            }
        }

        Ok(Self { slots })
    }

    /// Sync objects for `slot`.
    pub fn get(&self, slot: usize) -> &FrameSync {
        &self.slots[slot]
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Destroy all slots.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for sync in self.slots.drain(..) {
            // SAFETY: forwarded from caller
            unsafe { sync.destroy(device) };
        }
    }
}
