//! Which cached resources each scene node is drawn with.
//!
//! A node holds one reference to each of its shader, coat and mesh entries for
//! as long as it is registered. Changing a node's material or mesh moves those
//! references on [`NodeResourceRegistry::update`].

use std::collections::HashMap;

use anyhow::Context as _;

use crate::{
    backend::GpuBackend,
    data_structures::{
        keys::{CoatKey, MeshKey, ShaderKey},
        material::Material,
        mesh::MeshData,
        scene_graph::{NodeId, Scene},
    },
    resources::RenderResources,
    transform::TransformEngine,
};

/// The cache keys a registered node holds references to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NodeRenderRecord {
    pub shader: ShaderKey,
    pub coat: CoatKey,
    pub mesh: MeshKey,
}

impl NodeRenderRecord {
    fn of(material: &Material, mesh: &MeshData) -> Self {
        Self {
            shader: material.shader_key(),
            coat: material.coat_key(),
            mesh: mesh.key(),
        }
    }
}

#[derive(Debug, Default)]
pub struct NodeResourceRegistry {
    records: HashMap<NodeId, NodeRenderRecord>,
    // Scene revision each branch root was last processed at.
    branch_revisions: HashMap<NodeId, u64>,
}

impl NodeResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, node: NodeId) -> Option<&NodeRenderRecord> {
        self.records.get(&node)
    }

    pub fn is_registered(&self, node: NodeId) -> bool {
        self.records.contains_key(&node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.records.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take references to the node's shader, coat and mesh resources.
    ///
    /// Nodes without a material or a mesh are left unregistered; scenes are
    /// usually assembled piece by piece. Registering twice is a no-op.
    pub fn register<B: GpuBackend>(
        &mut self,
        resources: &mut RenderResources<B>,
        scene: &Scene,
        id: NodeId,
    ) -> anyhow::Result<()> {
        if self.records.contains_key(&id) {
            return Ok(());
        }
        let node = scene
            .get(id)
            .with_context(|| format!("cannot register {id:?}: not in the scene"))?;
        let (Some(material), Some(mesh)) = (node.material(), node.mesh()) else {
            log::trace!("{:?} ({id:?}) has no material or mesh yet, not registered", node.name);
            return Ok(());
        };
        let record = acquire(resources, material, mesh)
            .with_context(|| format!("failed to register {:?} ({id:?})", node.name))?;
        self.records.insert(id, record);
        Ok(())
    }

    /// Drop the node's references. Unregistered nodes are ignored.
    pub fn unregister<B: GpuBackend>(&mut self, resources: &mut RenderResources<B>, id: NodeId) {
        let Some(record) = self.records.remove(&id) else {
            return;
        };
        resources.release_program(record.shader);
        resources.release_parameters(record.coat);
        resources.release_buffers(record.mesh);
    }

    /// Move the node's references to its current shader, coat and mesh.
    ///
    /// New resources are acquired before old ones are released, so a resource
    /// shared with the old assignment is never destroyed and recreated. On
    /// failure the node keeps its previous record.
    pub fn update<B: GpuBackend>(
        &mut self,
        resources: &mut RenderResources<B>,
        scene: &Scene,
        id: NodeId,
    ) -> anyhow::Result<()> {
        let Some(old) = self.records.get(&id).copied() else {
            return self.register(resources, scene, id);
        };
        let Some(node) = scene.get(id) else {
            log::debug!("{id:?} left the scene, unregistering");
            self.unregister(resources, id);
            return Ok(());
        };
        let (Some(material), Some(mesh)) = (node.material(), node.mesh()) else {
            log::debug!("{:?} ({id:?}) lost its material or mesh, unregistering", node.name);
            self.unregister(resources, id);
            return Ok(());
        };
        let new = NodeRenderRecord::of(material, mesh);
        if new == old {
            return Ok(());
        }

        let shader_changed = new.shader != old.shader;
        let coat_changed = new.coat != old.coat;
        let mesh_changed = new.mesh != old.mesh;
        let context = || format!("failed to update {:?} ({id:?})", node.name);

        if shader_changed {
            resources
                .ensure_program(&material.shader)
                .map(|_| ())
                .with_context(context)?;
        }
        if coat_changed {
            let ensured = resources.ensure_parameters(&material.coat).map(|_| ());
            if let Err(e) = ensured {
                if shader_changed {
                    resources.release_program(new.shader);
                }
                return Err(e.context(context()));
            }
        }
        if mesh_changed {
            let ensured = resources.ensure_buffers(mesh).map(|_| ());
            if let Err(e) = ensured {
                if shader_changed {
                    resources.release_program(new.shader);
                }
                if coat_changed {
                    resources.release_parameters(new.coat);
                }
                return Err(e.context(context()));
            }
        }

        if shader_changed {
            resources.release_program(old.shader);
        }
        if coat_changed {
            resources.release_parameters(old.coat);
        }
        if mesh_changed {
            resources.release_buffers(old.mesh);
        }
        log::debug!("{:?} ({id:?}) now uses {} {} {}", node.name, new.shader, new.coat, new.mesh);
        self.records.insert(id, new);
        Ok(())
    }

    /// Register or update `root` and all its descendants, then bring the world
    /// transforms of registered nodes up to date.
    ///
    /// Returns `false` without doing anything if the branch was already
    /// processed in the current frame and the scene has not changed since.
    /// Failing nodes are logged and skipped.
    pub fn register_branch<B: GpuBackend>(
        &mut self,
        resources: &mut RenderResources<B>,
        transforms: &mut TransformEngine,
        scene: &mut Scene,
        root: NodeId,
    ) -> bool {
        let Some(root_node) = scene.get(root) else {
            log::warn!("cannot register branch {root:?}: not in the scene");
            return false;
        };
        let revision = scene.revision();
        if root_node.is_current_at(transforms.current_frame())
            && self.branch_revisions.get(&root) == Some(&revision)
        {
            return false;
        }

        for id in scene.depth_first(root) {
            let result = if self.is_registered(id) {
                self.update(resources, scene, id)
            } else {
                self.register(resources, scene, id)
            };
            if let Err(e) = result {
                log::error!("{e:#}");
            }
        }

        let nodes: Vec<NodeId> = std::iter::once(root).chain(self.nodes()).collect();
        transforms.update(scene, nodes);
        self.branch_revisions.insert(root, revision);
        true
    }

    /// Unregister every node that is no longer in the scene, e.g. after
    /// [`Scene::remove_branch`] was called without unregistering first.
    /// Returns the dropped nodes.
    pub fn prune_missing<B: GpuBackend>(
        &mut self,
        resources: &mut RenderResources<B>,
        scene: &Scene,
    ) -> Vec<NodeId> {
        let missing: Vec<NodeId> = self.nodes().filter(|&id| !scene.contains(id)).collect();
        for &id in &missing {
            log::warn!("{id:?} left the scene while registered, releasing its resources");
            self.unregister(resources, id);
            self.branch_revisions.remove(&id);
        }
        missing
    }

    /// Unregister `root` and every descendant.
    pub fn unregister_branch<B: GpuBackend>(
        &mut self,
        resources: &mut RenderResources<B>,
        scene: &Scene,
        root: NodeId,
    ) {
        let nodes = if scene.contains(root) {
            scene.depth_first(root)
        } else {
            vec![root]
        };
        for id in nodes {
            self.unregister(resources, id);
            self.branch_revisions.remove(&id);
        }
    }
}

/// Ensure all three resources, releasing the ones already taken if a later
/// one fails.
fn acquire<B: GpuBackend>(
    resources: &mut RenderResources<B>,
    material: &Material,
    mesh: &MeshData,
) -> anyhow::Result<NodeRenderRecord> {
    let record = NodeRenderRecord::of(material, mesh);
    resources.ensure_program(&material.shader)?;
    let ensured = resources.ensure_parameters(&material.coat).map(|_| ());
    if let Err(e) = ensured {
        resources.release_program(record.shader);
        return Err(e);
    }
    let ensured = resources.ensure_buffers(mesh).map(|_| ());
    if let Err(e) = ensured {
        resources.release_program(record.shader);
        resources.release_parameters(record.coat);
        return Err(e);
    }
    Ok(record)
}
