//! The entry point tying resources, registrations and transforms together.
//!
//! A frame typically looks like:
//!
//! ```ignore
//! engine.advance_frame(&mut scene);
//! engine.register_branch(&mut scene, root);
//! engine.draw_branch(&scene, root, &camera);
//! let hits = engine.pick(&scene, root, &camera, cursor)?;
//! ```

use cgmath::Matrix4;

use crate::{
    backend::GpuBackend,
    camera::{Camera, Viewport},
    config::EngineConfig,
    data_structures::scene_graph::{NodeId, Scene},
    pick::{self, Hit, PickTarget},
    render,
    resources::{RenderResources, registry::NodeResourceRegistry},
    transform::{FrameStamp, TransformEngine},
};

/// Counters describing what the engine currently holds.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub programs: usize,
    pub parameter_objects: usize,
    pub mesh_buffers: usize,
    pub registered_nodes: usize,
    pub recomputed_this_frame: usize,
    pub frame: FrameStamp,
}

pub struct Engine<B: GpuBackend> {
    resources: RenderResources<B>,
    registry: NodeResourceRegistry,
    transforms: TransformEngine,
    config: EngineConfig,
}

impl<B: GpuBackend> Engine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        Self {
            resources: RenderResources::new(backend),
            registry: NodeResourceRegistry::new(),
            transforms: TransformEngine::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn resources(&self) -> &RenderResources<B> {
        &self.resources
    }

    pub fn registry(&self) -> &NodeResourceRegistry {
        &self.registry
    }

    pub fn transforms(&self) -> &TransformEngine {
        &self.transforms
    }

    pub fn backend(&self) -> &B {
        &self.resources.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.resources.backend
    }

    /// Start a new frame: drop registrations of nodes that left the scene,
    /// mint a frame stamp, recompute the world transforms of registered nodes
    /// and clear the display target.
    pub fn advance_frame(&mut self, scene: &mut Scene) -> FrameStamp {
        self.registry.prune_missing(&mut self.resources, scene);
        let stamp = self.transforms.advance_frame(scene, self.registry.nodes());
        if let Err(e) = self.resources.backend.clear(None) {
            log::error!("failed to clear the display target: {e:#}");
        }
        stamp
    }

    pub fn register(&mut self, scene: &Scene, node: NodeId) -> anyhow::Result<()> {
        self.registry.register(&mut self.resources, scene, node)
    }

    pub fn unregister(&mut self, node: NodeId) {
        self.registry.unregister(&mut self.resources, node);
    }

    pub fn update(&mut self, scene: &Scene, node: NodeId) -> anyhow::Result<()> {
        self.registry.update(&mut self.resources, scene, node)
    }

    /// See [`NodeResourceRegistry::register_branch`].
    pub fn register_branch(&mut self, scene: &mut Scene, root: NodeId) -> bool {
        self.registry
            .register_branch(&mut self.resources, &mut self.transforms, scene, root)
    }

    pub fn unregister_branch(&mut self, scene: &Scene, root: NodeId) {
        self.registry
            .unregister_branch(&mut self.resources, scene, root);
    }

    /// Unregister a branch and remove it from the scene.
    pub fn remove_branch(&mut self, scene: &mut Scene, root: NodeId) -> Vec<NodeId> {
        self.unregister_branch(scene, root);
        scene.remove_branch(root)
    }

    pub fn world_transform(&self, scene: &Scene, node: NodeId) -> Option<Matrix4<f32>> {
        self.transforms.world_transform(scene, node)
    }

    /// Draw a branch into the display target.
    pub fn draw_branch(&mut self, scene: &Scene, root: NodeId, camera: &Camera) -> usize {
        self.resources.backend.bind_render_target(None);
        render::draw_branch(&mut self.resources, &self.registry, scene, root, camera)
    }

    /// See [`pick::draw_branch_for_picking`]. Release the targets with
    /// [`Engine::release_pick_targets`].
    pub fn draw_branch_for_picking(
        &mut self,
        scene: &Scene,
        root: NodeId,
        camera: &Camera,
    ) -> anyhow::Result<Vec<PickTarget<B>>> {
        pick::draw_branch_for_picking(&mut self.resources, &self.registry, scene, root, camera)
    }

    pub fn resolve(
        &mut self,
        query: (f32, f32),
        targets: &[PickTarget<B>],
        viewport: &Viewport,
    ) -> anyhow::Result<Vec<Hit>> {
        pick::resolve(
            &mut self.resources.backend,
            self.config.pick_readback,
            query,
            targets,
            viewport,
        )
    }

    pub fn release_pick_targets(&mut self, targets: Vec<PickTarget<B>>) {
        pick::release_targets(&mut self.resources.backend, targets);
    }

    /// Run a whole pick pass for `query` over the camera's viewport and
    /// release its targets again.
    pub fn pick(
        &mut self,
        scene: &Scene,
        root: NodeId,
        camera: &Camera,
        query: (f32, f32),
    ) -> anyhow::Result<Vec<Hit>> {
        let targets = self.draw_branch_for_picking(scene, root, camera)?;
        let hits = self.resolve(query, &targets, &camera.viewport());
        self.release_pick_targets(targets);
        hits
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            programs: self.resources.shaders().len(),
            parameter_objects: self.resources.coats().len(),
            mesh_buffers: self.resources.meshes().len(),
            registered_nodes: self.registry.len(),
            recomputed_this_frame: self.transforms.recomputed_this_frame(),
            frame: self.transforms.current_frame(),
        }
    }

    /// Destroy every cached GPU object and return the backend.
    pub fn shutdown(self) -> B {
        if !self.registry.is_empty() {
            log::warn!(
                "shutting down with {} nodes still registered",
                self.registry.len()
            );
        }
        self.resources.shutdown()
    }
}
