//! Staging transfers between host memory and device-local buffers.
//!
//! Every call allocates its own staging buffer, waits for the copy on the
//! graphics queue, and frees the staging buffer before returning. Staging
//! memory is never reused across calls.

use crate::command::execute_single_time_commands;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::memory::GpuBuffer;
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Run `f` with a freshly allocated staging buffer of `size` bytes, then free
/// it whether or not `f` succeeded.
pub(crate) fn with_staging<T>(
    gpu: &GpuContext,
    size: u64,
    location: MemoryLocation,
    usage: vk::BufferUsageFlags,
    name: &str,
    f: impl FnOnce(&GpuBuffer) -> Result<T>,
) -> Result<T> {
    let mut staging = gpu
        .allocator()
        .lock()
        .create_buffer(size, usage, location, name)?;

    let result = f(&staging);
    let freed = gpu.allocator().lock().free_buffer(&mut staging);

    let value = result?;
    freed?;
    Ok(value)
}

/// Record a one-shot command buffer on the graphics queue and wait for it.
pub(crate) fn one_shot(gpu: &GpuContext, f: impl FnOnce(vk::CommandBuffer)) -> Result<()> {
    let pool = gpu.transfer_pool().lock();
    // SAFETY: the transfer pool belongs to the graphics family
    unsafe { execute_single_time_commands(gpu.device(), &pool, gpu.graphics_queue(), f) }
}

/// Upload `bytes` into a new device-local buffer with `usage` (plus
/// `TRANSFER_DST`).
#[cfg_attr(
    feature = "profiling-tracy",
    tracing::instrument(level = "trace", skip_all)
)]
pub fn upload_to_device_local(
    gpu: &GpuContext,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<GpuBuffer> {
    if bytes.is_empty() {
        return Err(GpuError::InvalidState(format!(
            "cannot upload empty payload to '{name}'"
        )));
    }
    let size = bytes.len() as u64;

    let mut buffer = gpu.allocator().lock().create_buffer(
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
        name,
    )?;

    let copied = with_staging(
        gpu,
        size,
        MemoryLocation::CpuToGpu,
        vk::BufferUsageFlags::TRANSFER_SRC,
        "staging upload",
        |staging| {
            staging.write_bytes(0, bytes)?;
            one_shot(gpu, |cmd| {
                let region = vk::BufferCopy::default().size(size);
                // SAFETY: both buffers are at least `size` bytes
                unsafe {
                    gpu.device()
                        .cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
                }
            })
        },
    );

    if let Err(e) = copied {
        gpu.allocator().lock().free_buffer(&mut buffer)?;
        return Err(e);
    }

    tracing::debug!(name, size, "Uploaded device-local buffer");
    Ok(buffer)
}

/// Copy the first `size` bytes of a device-local buffer back to the host.
///
/// The buffer must have been created with `TRANSFER_SRC` usage.
pub fn download_from_device_local(gpu: &GpuContext, buffer: &GpuBuffer, size: u64) -> Result<Vec<u8>> {
    if size == 0 || size > buffer.size {
        return Err(GpuError::InvalidState(format!(
            "readback of {size} bytes from a {}-byte buffer",
            buffer.size
        )));
    }

    with_staging(
        gpu,
        size,
        MemoryLocation::GpuToCpu,
        vk::BufferUsageFlags::TRANSFER_DST,
        "staging readback",
        |staging| {
            one_shot(gpu, |cmd| {
                let region = vk::BufferCopy::default().size(size);
                // SAFETY: both buffers are at least `size` bytes
                unsafe {
                    gpu.device()
                        .cmd_copy_buffer(cmd, buffer.buffer, staging.buffer, &[region]);
                }
            })?;

            let mut out = vec![0u8; size as usize];
            staging.read_bytes(0, &mut out)?;
            Ok(out)
        },
    )
}
