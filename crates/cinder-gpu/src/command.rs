//! Command buffer management.

use crate::error::{GpuError, Result, VkResultExt};
use ash::vk;

/// Command pool for allocating command buffers.
#[derive(Default)]
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a new command pool.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);

        // SAFETY: caller guarantees device validity
        let pool = unsafe { device.create_command_pool(&create_info, None) }
            .call("vkCreateCommandPool")?;

        Ok(Self { pool, queue_family })
    }

    /// Get the raw pool handle.
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Get the queue family index.
    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate a single primary command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffer(&self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        // SAFETY: forwarded from caller
        let buffers = unsafe { self.allocate_command_buffers(device, 1) }?;
        buffers
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::InvalidState("driver returned no command buffer".to_string()))
    }

    /// Allocate `count` primary command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_command_buffers(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        // SAFETY: pool belongs to this device
        unsafe { device.allocate_command_buffers(&alloc_info) }.call("vkAllocateCommandBuffers")
    }

    /// Destroy the command pool, freeing every buffer allocated from it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        // SAFETY: caller guarantees the pool is idle
        unsafe {
            device.destroy_command_pool(self.pool, None);
        }
    }
}

/// Begin recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    // SAFETY: forwarded from caller
    unsafe { device.begin_command_buffer(cmd, &begin_info) }.call("vkBeginCommandBuffer")
}

/// End recording a command buffer.
///
/// # Safety
/// The device and command buffer must be valid.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    // SAFETY: forwarded from caller
    unsafe { device.end_command_buffer(cmd) }.call("vkEndCommandBuffer")
}

/// Submit command buffers to a queue.
///
/// # Safety
/// All handles must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn submit_command_buffers(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
    wait_semaphores: &[vk::Semaphore],
    wait_stages: &[vk::PipelineStageFlags],
    signal_semaphores: &[vk::Semaphore],
    fence: vk::Fence,
) -> Result<()> {
    let submit_info = vk::SubmitInfo::default()
        .command_buffers(command_buffers)
        .wait_semaphores(wait_semaphores)
        .wait_dst_stage_mask(wait_stages)
        .signal_semaphores(signal_semaphores);

    // SAFETY: forwarded from caller
    unsafe { device.queue_submit(queue, &[submit_info], fence) }.call("vkQueueSubmit")
}

/// Record, submit, and wait for a one-shot command buffer.
///
/// The buffer is freed back to `pool` whether or not the submission succeeds.
///
/// # Safety
/// All handles must be valid and `pool` must belong to `queue`'s family.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer),
{
    // SAFETY: forwarded from caller
    let cmd = unsafe { pool.allocate_command_buffer(device) }?;

    let result = (|| {
        // SAFETY: cmd was just allocated from a pool on this device
        unsafe {
            begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
            f(cmd);
            end_command_buffer(device, cmd)?;

            let cmd_buffers = [cmd];
            let submit_info = vk::SubmitInfo::default().command_buffers(&cmd_buffers);
            device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .call("vkQueueSubmit")?;
            device.queue_wait_idle(queue).call("vkQueueWaitIdle")
        }
    })();

    // SAFETY: the queue is idle (or the buffer was never submitted)
    unsafe {
        device.free_command_buffers(pool.handle(), &[cmd]);
    }

    result
}
