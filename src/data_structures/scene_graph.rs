//! Scene graph and hierarchical scene organization.
//!
//! Nodes live in an arena and refer to each other through [`NodeId`] keys, so
//! identity survives renames and duplicate names. Every node carries a cached
//! world matrix with the [`FrameStamp`] it was computed in. Only the transform
//! engine writes that slot; everything else reads it.
//!
//! Structural edits (spawning, attaching, detaching, removing) and changes to
//! what a node is drawn with bump the scene revision, which lets branch
//! registration notice edits made after a branch was already processed in the
//! current frame.

use std::sync::Arc;

use anyhow::{Context, bail};
use cgmath::{Matrix4, SquareMatrix};
use slotmap::SlotMap;

use crate::{
    data_structures::{material::Material, mesh::MeshData},
    transform::FrameStamp,
};

slotmap::new_key_type! {
    /// Stable identity of a scene node.
    pub struct NodeId;
}

/// A scene node: hierarchy links, optional local/pivot transforms, optional
/// material and mesh, and the cached world transform.
#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    local: Option<Matrix4<f32>>,
    mesh_pivot: Option<Matrix4<f32>>,
    material: Option<Material>,
    mesh: Option<Arc<MeshData>>,
    pickable: bool,
    world: Matrix4<f32>,
    stamp: FrameStamp,
    // Set when the node changed parents since its world was last computed.
    moved: bool,
}

impl Node {
    fn new(name: String) -> Self {
        Self {
            name,
            parent: None,
            children: Vec::new(),
            local: None,
            mesh_pivot: None,
            material: None,
            mesh: None,
            pickable: true,
            world: Matrix4::identity(),
            stamp: FrameStamp::NEVER,
            moved: false,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn local_transform(&self) -> Option<&Matrix4<f32>> {
        self.local.as_ref()
    }

    pub fn mesh_pivot(&self) -> Option<&Matrix4<f32>> {
        self.mesh_pivot.as_ref()
    }

    pub fn material(&self) -> Option<&Material> {
        self.material.as_ref()
    }

    pub fn mesh(&self) -> Option<&Arc<MeshData>> {
        self.mesh.as_ref()
    }

    pub fn is_pickable(&self) -> bool {
        self.pickable
    }

    /// The cached world transform; current only if [`Node::stamp`] matches the
    /// frame being rendered.
    pub fn world_transform(&self) -> &Matrix4<f32> {
        &self.world
    }

    /// The frame the cached world transform was computed in. Never
    /// decreases.
    pub fn stamp(&self) -> FrameStamp {
        self.stamp
    }

    /// Whether the cached world transform is valid for frame `stamp`.
    pub fn is_current_at(&self, stamp: FrameStamp) -> bool {
        self.stamp == stamp && !self.moved
    }
}

#[derive(Default, Debug)]
pub struct Scene {
    nodes: SlotMap<NodeId, Node>,
    revision: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parentless node.
    pub fn spawn(&mut self, name: impl Into<String>) -> NodeId {
        self.revision += 1;
        self.nodes.insert(Node::new(name.into()))
    }

    /// Add a node as the last child of `parent`.
    pub fn spawn_child(&mut self, parent: NodeId, name: impl Into<String>) -> anyhow::Result<NodeId> {
        if !self.nodes.contains_key(parent) {
            bail!("cannot spawn a child under unknown node {parent:?}");
        }
        let child = self.spawn(name);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        Ok(child)
    }

    /// Move `child` (and its subtree) under `parent`.
    ///
    /// The moved subtree is marked stale because its cached world transforms
    /// were computed under the old parent.
    pub fn attach(&mut self, child: NodeId, parent: NodeId) -> anyhow::Result<()> {
        if !self.nodes.contains_key(child) || !self.nodes.contains_key(parent) {
            bail!("cannot attach {child:?} to {parent:?}: unknown node");
        }
        if child == parent || self.is_ancestor(child, parent) {
            bail!("attaching {child:?} to {parent:?} would create a cycle");
        }
        self.unlink(child);
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
        self.mark_moved(child);
        self.revision += 1;
        Ok(())
    }

    /// Make `child` a root.
    pub fn detach(&mut self, child: NodeId) -> anyhow::Result<()> {
        if !self.nodes.contains_key(child) {
            bail!("cannot detach unknown node {child:?}");
        }
        self.unlink(child);
        self.mark_moved(child);
        self.revision += 1;
        Ok(())
    }

    /// Remove `root` and all its descendants, returning the removed ids in
    /// depth-first order.
    ///
    /// GPU resources of the removed nodes are not released here; unregister
    /// the branch from the engine first.
    pub fn remove_branch(&mut self, root: NodeId) -> Vec<NodeId> {
        let removed = self.depth_first(root);
        if removed.is_empty() {
            return removed;
        }
        self.unlink(root);
        for &id in &removed {
            self.nodes.remove(id);
        }
        self.revision += 1;
        removed
    }

    pub fn set_local_transform(
        &mut self,
        id: NodeId,
        local: Option<Matrix4<f32>>,
    ) -> anyhow::Result<()> {
        self.node_mut(id)?.local = local;
        Ok(())
    }

    pub fn set_mesh_pivot(&mut self, id: NodeId, pivot: Option<Matrix4<f32>>) -> anyhow::Result<()> {
        self.node_mut(id)?.mesh_pivot = pivot;
        Ok(())
    }

    pub fn set_material(&mut self, id: NodeId, material: Option<Material>) -> anyhow::Result<()> {
        self.node_mut(id)?.material = material;
        self.revision += 1;
        Ok(())
    }

    pub fn set_mesh(&mut self, id: NodeId, mesh: Option<Arc<MeshData>>) -> anyhow::Result<()> {
        self.node_mut(id)?.mesh = mesh;
        self.revision += 1;
        Ok(())
    }

    pub fn set_pickable(&mut self, id: NodeId, pickable: bool) -> anyhow::Result<()> {
        self.node_mut(id)?.pickable = pickable;
        Ok(())
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Bumped on every structural or material/mesh change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(id, _)| id)
    }

    /// `root` followed by its descendants in depth-first pre-order, children in
    /// insertion order. Empty if `root` is unknown.
    pub fn depth_first(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        if !self.nodes.contains_key(root) {
            return order;
        }
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            order.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        order
    }

    /// Whether `ancestor` lies on the parent chain of `node`.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.nodes.get(node).and_then(|n| n.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(id).and_then(|n| n.parent);
        }
        false
    }

    pub(crate) fn store_world(&mut self, id: NodeId, world: Matrix4<f32>, stamp: FrameStamp) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.world = world;
            node.stamp = node.stamp.max(stamp);
            node.moved = false;
        }
    }

    fn node_mut(&mut self, id: NodeId) -> anyhow::Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .with_context(|| format!("unknown scene node {id:?}"))
    }

    fn unlink(&mut self, child: NodeId) {
        if let Some(parent) = self.nodes.get_mut(child).and_then(|n| n.parent.take()) {
            if let Some(parent) = self.nodes.get_mut(parent) {
                parent.children.retain(|&c| c != child);
            }
        }
    }

    fn mark_moved(&mut self, root: NodeId) {
        for id in self.depth_first(root) {
            self.nodes[id].moved = true;
        }
    }
}
