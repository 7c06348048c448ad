//! Forward mesh renderer for the Cinder engine.
//!
//! This crate provides:
//! - The per-window GPU resource aggregate with ordered teardown
//! - Camera and view management
//! - Vertex and instance layouts for the mesh pipeline
//! - A [`cinder_gpu::FrameBackend`] that records one instanced draw per frame

pub mod camera;
pub mod mesh;
pub mod renderer;
pub mod resources;

pub use camera::{Camera, CameraUniforms};
pub use mesh::{cube, grid_instances, InstanceData, Mesh, Vertex};
pub use renderer::{Renderer, RendererConfig};
pub use resources::{RenderResources, SceneDesc};
