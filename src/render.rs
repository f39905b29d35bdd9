//! Drawing a scene branch.
//!
//! The branch is walked depth-first and every registered node is drawn once
//! with its cached program, coat parameters and buffers. World matrices are
//! taken as cached; bring them up to date with
//! [`Engine::advance_frame`](crate::engine::Engine::advance_frame) or
//! [`Engine::register_branch`](crate::engine::Engine::register_branch) first.

use cgmath::Matrix4;

use crate::{
    backend::{DrawCall, GpuBackend},
    camera::Camera,
    data_structures::{
        material::WORLD_UNIFORM,
        scene_graph::{Node, NodeId, Scene},
    },
    resources::{RenderResources, registry::NodeResourceRegistry},
};

/// The matrix a node's mesh is drawn with: its world transform, followed by
/// the mesh pivot if it has one.
pub fn final_transform(node: &Node) -> Matrix4<f32> {
    match node.mesh_pivot() {
        Some(pivot) => *node.world_transform() * *pivot,
        None => *node.world_transform(),
    }
}

/// Draw `root` and its descendants into the currently bound target. Returns
/// the number of draw calls issued.
pub fn draw_branch<B: GpuBackend>(
    resources: &mut RenderResources<B>,
    registry: &NodeResourceRegistry,
    scene: &Scene,
    root: NodeId,
    camera: &Camera,
) -> usize {
    let view_projection = camera.view_projection();
    let (backend, shaders, coats, meshes) = resources.split_mut();
    let mut draws = 0;

    for id in scene.depth_first(root) {
        let (Some(record), Some(node)) = (registry.record(id), scene.get(id)) else {
            continue;
        };
        let (Some(program), Some(parameters), Some(buffers)) = (
            shaders.get(&record.shader),
            coats.get(&record.coat),
            meshes.get(&record.mesh),
        ) else {
            log::warn!("{:?} ({id:?}) is registered but its resources are gone", node.name);
            continue;
        };

        let world = final_transform(node);
        let call = DrawCall {
            program,
            buffers,
            parameters,
            world: program.declares_uniform(WORLD_UNIFORM).then_some(world),
            clip: view_projection * world,
        };
        match backend.draw(call) {
            Ok(()) => draws += 1,
            Err(e) => log::error!("failed to draw {:?} ({id:?}): {e:#}", node.name),
        }
    }
    draws
}
