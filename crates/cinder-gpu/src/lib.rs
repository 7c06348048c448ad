//! Vulkan resource and frame lifecycle layer for the Cinder engine.
//!
//! This crate provides:
//! - Vulkan instance, validation messenger, and device management
//! - GPU capability snapshots and device scoring
//! - Memory allocation via gpu-allocator and staging uploads
//! - Swapchain negotiation, creation, and rebuild tracking
//! - Render pass, framebuffers, pipelines, and descriptors
//! - Frame-in-flight synchronization and the per-frame protocol

pub mod capabilities;
pub mod command;
pub mod context;
pub mod debug;
pub mod descriptors;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod upload;

pub use capabilities::{pick_best, DeviceCandidate, GpuVendor, QueueFamilyIndices};
pub use command::CommandPool;
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{
    write_combined_image_sampler, write_uniform_buffer, DescriptorPool, DescriptorSetLayoutBuilder,
};
pub use error::{GpuError, Result, VkResultExt};
pub use frame::{AcquireOutcome, FrameBackend, FrameLoop, FrameStatus, PresentOutcome};
pub use framebuffer::{find_depth_format, DepthBuffer, FramebufferSet};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
pub use render_pass::RenderPass;
pub use shader::{load_spirv, MeshShaders};
pub use surface::{SurfaceContext, SurfaceSupport, WindowSource};
pub use swapchain::{Swapchain, SwapchainConfig, SwapchainLifecycle, SwapchainState};
pub use sync::{FrameSync, FrameSyncRing};
pub use texture::{checkerboard, Texture};
pub use upload::{download_from_device_local, upload_to_device_local};
