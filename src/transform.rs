//! World transform propagation.
//!
//! World matrices are cached on the scene nodes together with the frame stamp
//! they were computed in. A frame starts with [`TransformEngine::advance_frame`],
//! which mints a new stamp; from then on a node counts as stale until it has
//! been recomputed under that stamp, and every later request within the same
//! frame finds it current and does nothing.
//!
//! The set of current nodes is closed under "parent of": a subtree is only
//! ever recomputed starting from a node whose parent is already current (or
//! which has no parent). Requests can therefore arrive for any node in any
//! order; walking up to the highest stale ancestor and recomputing its
//! subtree top-down touches each node once per frame.

use cgmath::{Matrix4, SquareMatrix};
use instant::Instant;

use crate::data_structures::scene_graph::{NodeId, Scene};

/// Identifies the frame a world transform was computed in.
///
/// Stamps come from high-resolution time and are strictly increasing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameStamp(u64);

impl FrameStamp {
    /// Carried by nodes that have never been computed.
    pub const NEVER: FrameStamp = FrameStamp(0);

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Mints frame stamps from the time elapsed since the clock was created.
#[derive(Debug)]
pub struct FrameClock {
    epoch: Instant,
    current: FrameStamp,
}

impl FrameClock {
    pub fn new() -> Self {
        let mut clock = Self {
            epoch: Instant::now(),
            current: FrameStamp::NEVER,
        };
        clock.tick();
        clock
    }

    /// Start a new frame. The returned stamp is greater than every stamp
    /// handed out before, even if the clock did not advance in between.
    pub fn tick(&mut self) -> FrameStamp {
        let elapsed = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.current = FrameStamp(elapsed.max(self.current.0.saturating_add(1)));
        self.current
    }

    pub fn current(&self) -> FrameStamp {
        self.current
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct TransformEngine {
    clock: FrameClock,
    recomputed_this_frame: usize,
}

impl TransformEngine {
    /// The engine starts inside its first frame.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_frame(&self) -> FrameStamp {
        self.clock.current()
    }

    /// How many world matrices were computed since the current frame started.
    pub fn recomputed_this_frame(&self) -> usize {
        self.recomputed_this_frame
    }

    /// Begin a new frame and bring the branches of `nodes` up to date.
    pub fn advance_frame<I>(&mut self, scene: &mut Scene, nodes: I) -> FrameStamp
    where
        I: IntoIterator<Item = NodeId>,
    {
        let stamp = self.clock.tick();
        self.recomputed_this_frame = 0;
        let recomputed = self.update(scene, nodes);
        log::trace!("frame {}: recomputed {} world transforms", stamp.raw(), recomputed);
        stamp
    }

    /// Recompute, within the current frame, every stale node among `nodes`
    /// together with its stale ancestors and their subtrees. Returns the number
    /// of matrices computed by this call.
    pub fn update<I>(&mut self, scene: &mut Scene, nodes: I) -> usize
    where
        I: IntoIterator<Item = NodeId>,
    {
        let stamp = self.clock.current();
        let mut recomputed = 0;
        for id in nodes {
            let Some(node) = scene.get(id) else {
                log::warn!("cannot update the world transform of {id:?}: not in the scene");
                continue;
            };
            if node.is_current_at(stamp) {
                continue;
            }
            let top = highest_stale_ancestor(scene, id, stamp);
            let seed = scene
                .get(top)
                .and_then(|n| n.parent())
                .and_then(|parent| scene.get(parent))
                .map(|parent| *parent.world_transform())
                .unwrap_or_else(Matrix4::identity);
            recomputed += recompute_branch(scene, top, seed, stamp);
        }
        self.recomputed_this_frame += recomputed;
        recomputed
    }

    /// The cached world transform of `node`, as of the last frame it was
    /// computed in.
    pub fn world_transform(&self, scene: &Scene, node: NodeId) -> Option<Matrix4<f32>> {
        scene.get(node).map(|n| *n.world_transform())
    }

    /// Whether `node` has been computed in the current frame.
    pub fn is_current(&self, scene: &Scene, node: NodeId) -> bool {
        scene
            .get(node)
            .is_some_and(|n| n.is_current_at(self.clock.current()))
    }
}

fn highest_stale_ancestor(scene: &Scene, node: NodeId, stamp: FrameStamp) -> NodeId {
    let mut top = node;
    while let Some(parent) = scene.get(top).and_then(|n| n.parent()) {
        match scene.get(parent) {
            Some(p) if !p.is_current_at(stamp) => top = parent,
            _ => break,
        }
    }
    top
}

fn recompute_branch(scene: &mut Scene, top: NodeId, seed: Matrix4<f32>, stamp: FrameStamp) -> usize {
    let mut recomputed = 0;
    let mut stack: Vec<(NodeId, Matrix4<f32>)> = Vec::with_capacity(64);
    stack.push((top, seed));

    while let Some((id, parent_world)) = stack.pop() {
        let Some(node) = scene.get(id) else {
            continue;
        };
        let world = match node.local_transform() {
            Some(local) => parent_world * *local,
            None => parent_world,
        };
        // Reverse so children are processed in insertion order.
        stack.extend(node.children().iter().rev().map(|&child| (child, world)));
        scene.store_world(id, world, stamp);
        recomputed += 1;
    }
    recomputed
}
