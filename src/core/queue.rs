//! Deferred mutation actions for physics nodes.
//!
//! Operations on bodies and colliders never touch broadphase, mass, or the
//! transform cache directly. They raise bits on the owning node's queue and
//! link the node into the world's dirty list; `commit_changes` is the single
//! consumer and runs its sub-passes in a fixed order (transform, mass,
//! broadphase) so later passes see coherent inputs.

use bitflags::bitflags;

bitflags! {
    /// Pending transform work for a node.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TransformAction: u8 {
        /// Re-read the world transform from the parent chain.
        const READ_TRANSFORM = 1 << 0;
        /// Publish kinematic velocities from the transform delta.
        const KINEMATIC_VELOCITY = 1 << 1;
        /// Overwrite the "old transform" snapshot instead of keeping it for
        /// velocity synthesis (teleports should not produce huge velocities).
        const OVERRIDE_OLD_TRANSFORM = 1 << 2;
    }
}

bitflags! {
    /// Pending mass work for a node's body.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MassAction: u8 {
        /// Recompute the center of mass from child colliders.
        const RECOMPUTE_CENTER_OF_MASS = 1 << 0;
        /// Recompute the local inertia tensor from child colliders.
        const RECOMPUTE_INERTIA = 1 << 1;
        /// Rotate the local inertia tensor into world space.
        const WORLD_INERTIA = 1 << 2;
    }
}

bitflags! {
    /// Pending broadphase work plus the node's current broadphase state.
    ///
    /// The action bits batch: a frame's worth of queued changes collapses to
    /// the minimal broadphase operation sequence when committed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BroadPhaseAction: u8 {
        const STATIC_INSERT = 1 << 0;
        const DYNAMIC_INSERT = 1 << 1;
        const REMOVE = 1 << 2;
        const UPDATE = 1 << 3;
        // State bits, owned by the committer.
        const IN_STATIC = 1 << 4;
        const IN_DYNAMIC = 1 << 5;

        const INSERTS = Self::STATIC_INSERT.bits() | Self::DYNAMIC_INSERT.bits();
        const ACTIONS = Self::INSERTS.bits() | Self::REMOVE.bits() | Self::UPDATE.bits();
        const CURRENT_STATE = Self::IN_STATIC.bits() | Self::IN_DYNAMIC.bits();
    }
}

impl BroadPhaseAction {
    pub fn is_in_broadphase(&self) -> bool {
        self.intersects(BroadPhaseAction::CURRENT_STATE)
    }

    pub fn is_in_dynamic(&self) -> bool {
        self.contains(BroadPhaseAction::IN_DYNAMIC)
    }
}

/// The queue of deferred actions shared by a node's body and colliders.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionQueue {
    pub transform: TransformAction,
    pub mass: MassAction,
    pub broadphase: BroadPhaseAction,
}

impl ActionQueue {
    pub fn is_queued(&self) -> bool {
        !self.transform.is_empty()
            || !self.mass.is_empty()
            || self.broadphase.intersects(BroadPhaseAction::ACTIONS)
    }

    pub fn queue_transform(&mut self, action: TransformAction) {
        self.transform |= action;
    }

    pub fn queue_mass(&mut self, action: MassAction) {
        self.mass |= action;
    }

    /// Queues an insertion into the static or dynamic broadphase. An insert
    /// after a pending removal of an already-proxied node collapses to an
    /// update (or a migration when the target set changed).
    pub fn queue_insert(&mut self, dynamic: bool) {
        let insert = if dynamic {
            BroadPhaseAction::DYNAMIC_INSERT
        } else {
            BroadPhaseAction::STATIC_INSERT
        };
        if self.broadphase.contains(BroadPhaseAction::REMOVE) && self.broadphase.is_in_broadphase()
        {
            let currently_dynamic = self.broadphase.is_in_dynamic();
            if currently_dynamic == dynamic {
                self.broadphase.remove(BroadPhaseAction::REMOVE);
                self.broadphase.insert(BroadPhaseAction::UPDATE);
                return;
            }
            // Different target set: the remove stays and the insert follows.
        }
        self.broadphase.remove(BroadPhaseAction::INSERTS);
        self.broadphase.insert(insert);
    }

    /// Queues removal from whichever broadphase the node occupies. A removal
    /// cancels a pending insert outright.
    pub fn queue_removal(&mut self) {
        if self.broadphase.intersects(BroadPhaseAction::INSERTS) {
            self.broadphase.remove(BroadPhaseAction::INSERTS);
            if !self.broadphase.is_in_broadphase() {
                // Insert-then-remove on an unproxied node is a no-op.
                self.broadphase.remove(BroadPhaseAction::UPDATE);
                return;
            }
        }
        self.broadphase.remove(BroadPhaseAction::UPDATE);
        if self.broadphase.is_in_broadphase() {
            self.broadphase.insert(BroadPhaseAction::REMOVE);
        }
    }

    pub fn queue_update(&mut self) {
        // An update is meaningless alongside a pending insert or remove.
        if self
            .broadphase
            .intersects(BroadPhaseAction::INSERTS | BroadPhaseAction::REMOVE)
        {
            return;
        }
        if self.broadphase.is_in_broadphase() {
            self.broadphase.insert(BroadPhaseAction::UPDATE);
        }
    }

    /// Clears action bits, keeping the committer-owned state bits.
    pub fn clear_actions(&mut self) {
        self.transform = TransformAction::empty();
        self.mass = MassAction::empty();
        self.broadphase.remove(BroadPhaseAction::ACTIONS);
    }
}
