//! flow-scene
//!
//! The render-resource and picking core of a small renderer. GPU objects
//! (compiled programs, coat parameters, mesh buffers) are created once per
//! shader class, coat and mesh and shared by every scene node that uses them.
//! World transforms are propagated down the scene graph at most once per
//! frame. Picking renders each node with an identity-encoding program and
//! reads back which node lies under a point, nearest first.
//!
//! High-level modules
//! - `backend`: the GPU capability surface and its wgpu implementation
//! - `camera`: camera, projection and viewport mapping
//! - `config`: engine and backend settings
//! - `context`: headless wgpu device and queue
//! - `data_structures`: scene graph, materials, meshes and resource keys
//! - `engine`: the facade owning resources, registrations and transforms
//! - `logging`: `env_logger` setup
//! - `pick`: object picking
//! - `render`: drawing a scene branch
//! - `resources`: reference-counted resource caches and node registrations
//! - `transform`: world transform propagation
//!

pub mod backend;
pub mod camera;
pub mod config;
pub mod context;
pub mod data_structures;
pub mod engine;
pub mod logging;
pub mod pick;
pub mod render;
pub mod resources;
pub mod transform;

// Re-exports commonly used types for convenience in downstream code.
pub use backend::{GpuBackend, wgpu_backend::WgpuBackend};
pub use camera::{Camera, Projection, Viewport};
pub use config::{EngineConfig, PickReadback, WgpuConfig};
pub use data_structures::{
    material::{Coat, Material, ShaderClass},
    mesh::MeshData,
    scene_graph::{Node, NodeId, Scene},
};
pub use engine::{Engine, EngineStats};
pub use pick::Hit;
pub use cgmath::*;
