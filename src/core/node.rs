//! Physics nodes: the shared owner of transform-cache and pending-mutation
//! state for a scene entity. Nodes form a tree mirroring the scene
//! hierarchy; a node's active body is itself if it owns a non-static body,
//! otherwise the nearest ancestor that does.

use super::body::RigidBody;
use super::queue::ActionQueue;
use super::types::Transform;
use crate::utils::allocator::{Arena, BodyId, ColliderId, NodeId};

#[derive(Debug, Clone, Default)]
pub struct PhysicsNode {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub body: Option<BodyId>,
    pub colliders: Vec<ColliderId>,

    /// Transform relative to the parent node (or the world for roots).
    pub local_transform: Transform,
    /// Cached world transform; consistent with the parent's cache after the
    /// commit pass runs.
    pub world_transform: Transform,

    pub queue: ActionQueue,
    /// Whether the node sits on the world's dirty list already.
    pub in_dirty_list: bool,
    /// Two-phase destruction: marked during a step, deallocated on commit.
    pub dying: bool,
}

impl PhysicsNode {
    pub fn new(local_transform: Transform) -> Self {
        Self {
            local_transform,
            world_transform: local_transform,
            ..Self::default()
        }
    }

    pub fn is_queued(&self) -> bool {
        self.queue.is_queued()
    }
}

/// Recomputes a node's world transform from the parent chain.
pub fn recompute_world_transform(nodes: &mut Arena<PhysicsNode>, id: NodeId) {
    let (parent, local) = match nodes.get(id) {
        Some(node) => (node.parent, node.local_transform),
        None => return,
    };
    let world = match parent.and_then(|p| nodes.get(p)) {
        Some(parent_node) => parent_node.world_transform.combine(&local),
        None => local,
    };
    if let Some(node) = nodes.get_mut(id) {
        node.world_transform = world;
    }
}

/// Walks toward the root for the nearest non-static body. Falls back to the
/// first body found (even a static one) so callers always get the owner when
/// one exists anywhere up the chain.
pub fn active_body(
    nodes: &Arena<PhysicsNode>,
    bodies: &Arena<RigidBody>,
    start: NodeId,
) -> Option<BodyId> {
    let mut first_found = None;
    let mut current = Some(start);
    while let Some(id) = current {
        let node = nodes.get(id)?;
        if let Some(body_id) = node.body {
            if first_found.is_none() {
                first_found = Some(body_id);
            }
            if let Some(body) = bodies.get(body_id) {
                if !body.is_static() {
                    return Some(body_id);
                }
            }
        }
        current = node.parent;
    }
    first_found
}

/// Attaches `child` under `parent`, detaching it from any previous parent.
pub fn attach(nodes: &mut Arena<PhysicsNode>, child: NodeId, parent: NodeId) {
    detach(nodes, child);
    if let Some(node) = nodes.get_mut(child) {
        node.parent = Some(parent);
    }
    if let Some(parent_node) = nodes.get_mut(parent) {
        parent_node.children.push(child);
    }
}

pub fn detach(nodes: &mut Arena<PhysicsNode>, child: NodeId) {
    let old_parent = nodes.get(child).and_then(|n| n.parent);
    if let Some(parent) = old_parent {
        if let Some(parent_node) = nodes.get_mut(parent) {
            parent_node.children.retain(|&c| c != child);
        }
    }
    if let Some(node) = nodes.get_mut(child) {
        node.parent = None;
    }
}
