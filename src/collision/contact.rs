//! Contacts and the contact manager.
//!
//! A contact is the solver-visible constraint wrapping one persistent
//! manifold. The manager owns every contact, keyed by the ordered collider
//! pair, and drives the lifecycle: created on first detection, persisted
//! while point matching keeps the manifold alive, destroyed when it empties.

use std::collections::HashMap;

use bitflags::bitflags;

use super::manifold::Manifold;
use super::narrowphase::RawManifold;
use crate::config::ContactTangentMode;
use crate::core::types::{MaterialPairProperties, Transform};
use crate::utils::allocator::{BodyId, ColliderId};
use crate::warn_once;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContactFlags: u8 {
        const ON_ISLAND = 1 << 0;
        /// At least one collider is a ghost: detect and report, never resolve.
        const GHOST = 1 << 1;
        /// The collision filter requested detection without resolution.
        const SKIPS_RESOLUTION = 1 << 2;
        const VALID = 1 << 3;
        /// Created this step; emits a started event at publication.
        const NEW_CONTACT = 1 << 4;
        /// Updated by narrow phase this step.
        const ACTIVE = 1 << 5;
    }
}

/// Ordered collider pair used as the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    pub a: ColliderId,
    pub b: ColliderId,
}

impl PairKey {
    pub fn new(a: ColliderId, b: ColliderId) -> Self {
        if a.index() <= b.index() {
            Self { a, b }
        } else {
            Self { a: b, b: a }
        }
    }
}

/// A solver-visible constraint wrapping a manifold.
#[derive(Debug, Clone)]
pub struct Contact {
    pub pair: PairKey,
    /// Active bodies behind each collider; `None` for static scenery.
    pub body_a: Option<BodyId>,
    pub body_b: Option<BodyId>,
    pub manifold: Manifold,
    pub material: MaterialPairProperties,
    pub flags: ContactFlags,
    /// Whether either endpoint wants collision events.
    pub sends_events: bool,
}

impl Contact {
    pub fn is_resolvable(&self) -> bool {
        self.flags.contains(ContactFlags::VALID)
            && !self
                .flags
                .intersects(ContactFlags::GHOST | ContactFlags::SKIPS_RESOLUTION)
    }
}

/// What happened to a pair during the contact-cache update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactEvent {
    Started,
    Persisted,
    Ended,
}

/// Pair-indexed cache of persistent contacts.
pub struct ContactManager {
    contacts: HashMap<PairKey, Contact>,
    /// Pool bound; pairs beyond it degrade to "no contact".
    max_contacts: usize,
    tangent_mode: ContactTangentMode,
    frame: u64,
    /// Pair transitions recorded during the step, drained at publication.
    transitions: Vec<(PairKey, ContactEvent)>,
}

impl ContactManager {
    pub fn new(max_contacts: usize, tangent_mode: ContactTangentMode) -> Self {
        Self {
            contacts: HashMap::new(),
            max_contacts,
            tangent_mode,
            frame: 0,
            transitions: Vec::new(),
        }
    }

    pub fn configure(&mut self, max_contacts: usize, tangent_mode: ContactTangentMode) {
        self.max_contacts = max_contacts.max(1);
        self.tangent_mode = tangent_mode;
    }

    pub fn begin_step(&mut self) {
        self.frame = self.frame.wrapping_add(1);
        self.transitions.clear();
        for contact in self.contacts.values_mut() {
            contact.flags.remove(ContactFlags::ACTIVE | ContactFlags::NEW_CONTACT);
        }
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn get(&self, key: &PairKey) -> Option<&Contact> {
        self.contacts.get(key)
    }

    pub fn get_mut(&mut self, key: &PairKey) -> Option<&mut Contact> {
        self.contacts.get_mut(key)
    }

    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    pub fn contacts_mut(&mut self) -> impl Iterator<Item = &mut Contact> {
        self.contacts.values_mut()
    }

    /// Merges one narrow-phase result into the cache.
    ///
    /// `transform_a`/`transform_b` must belong to the pair in key order. The
    /// raw manifold's normal must point from `key.a` toward `key.b`.
    #[allow(clippy::too_many_arguments)]
    pub fn update_pair(
        &mut self,
        key: PairKey,
        raw: &RawManifold,
        transform_a: &Transform,
        transform_b: &Transform,
        body_a: Option<BodyId>,
        body_b: Option<BodyId>,
        material: MaterialPairProperties,
        relative_velocity: glam::Vec3,
    ) {
        if !self.contacts.contains_key(&key) {
            if self.contacts.len() >= self.max_contacts {
                // Allocation failure degrades to "narrow phase found nothing".
                warn_once!(
                    "contact pool exhausted ({} pairs); excess pairs are dropped",
                    self.max_contacts
                );
                return;
            }
            let contact = Contact {
                pair: key,
                body_a,
                body_b,
                manifold: Manifold::default(),
                material,
                flags: ContactFlags::VALID | ContactFlags::NEW_CONTACT,
                sends_events: true,
            };
            self.contacts.insert(key, contact);
            self.transitions.push((key, ContactEvent::Started));
        } else {
            self.transitions.push((key, ContactEvent::Persisted));
        }

        let Some(contact) = self.contacts.get_mut(&key) else { return };
        contact.body_a = body_a;
        contact.body_b = body_b;
        contact.material = material;
        contact.flags.insert(ContactFlags::ACTIVE);
        contact.manifold.update(raw, transform_a, transform_b);
        contact
            .manifold
            .select_tangents(self.tangent_mode, relative_velocity, self.frame);

        if contact.manifold.is_empty() {
            self.destroy(key);
        }
    }

    /// Removes contacts narrow phase did not refresh this step.
    pub fn prune_inactive(&mut self) {
        let stale: Vec<PairKey> = self
            .contacts
            .iter()
            .filter(|(_, contact)| !contact.flags.contains(ContactFlags::ACTIVE))
            .map(|(&key, _)| key)
            .collect();
        for key in stale {
            self.destroy(key);
        }
    }

    /// Destroys one contact, recording the ended transition. A pair that
    /// both started and died within the same step reports nothing.
    pub fn destroy(&mut self, key: PairKey) -> Option<Contact> {
        let removed = self.contacts.remove(&key);
        if let Some(contact) = &removed {
            let started_this_step = contact.flags.contains(ContactFlags::NEW_CONTACT);
            self.transitions.retain(|(k, _)| *k != key);
            if !started_this_step {
                self.transitions.push((key, ContactEvent::Ended));
            }
        }
        removed
    }

    /// Destroys every contact referencing a collider. Used by two-phase
    /// destruction; ended events still fire so handlers see a live entity.
    pub fn destroy_contacts_of(&mut self, collider: ColliderId) -> Vec<PairKey> {
        let keys: Vec<PairKey> = self
            .contacts
            .keys()
            .filter(|key| key.a == collider || key.b == collider)
            .copied()
            .collect();
        for &key in &keys {
            self.destroy(key);
        }
        keys
    }

    /// Pair transitions recorded this step, in discovery order.
    pub fn transitions(&self) -> &[(PairKey, ContactEvent)] {
        &self.transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::narrowphase::RawContactPoint;
    use crate::utils::allocator::EntityId;
    use glam::Vec3;

    fn raw_manifold() -> RawManifold {
        RawManifold {
            normal: Vec3::Y,
            points: vec![RawContactPoint {
                world_point: Vec3::ZERO,
                depth: 0.01,
            }],
        }
    }

    fn key(a: usize, b: usize) -> PairKey {
        PairKey::new(EntityId::new(a, 0), EntityId::new(b, 0))
    }

    fn update(manager: &mut ContactManager, key: PairKey) {
        manager.update_pair(
            key,
            &raw_manifold(),
            &Transform::default(),
            &Transform::from_position(Vec3::Y),
            None,
            None,
            MaterialPairProperties::default(),
            Vec3::ZERO,
        );
    }

    #[test]
    fn first_detection_starts_then_persists() {
        let mut manager = ContactManager::new(16, ContactTangentMode::Orthonormal);

        manager.begin_step();
        update(&mut manager, key(0, 1));
        assert_eq!(manager.transitions(), &[(key(0, 1), ContactEvent::Started)]);

        manager.begin_step();
        update(&mut manager, key(0, 1));
        assert_eq!(manager.transitions(), &[(key(0, 1), ContactEvent::Persisted)]);
    }

    #[test]
    fn unrefreshed_contacts_end() {
        let mut manager = ContactManager::new(16, ContactTangentMode::Orthonormal);
        manager.begin_step();
        update(&mut manager, key(0, 1));

        manager.begin_step();
        manager.prune_inactive();
        assert_eq!(manager.transitions(), &[(key(0, 1), ContactEvent::Ended)]);
        assert!(manager.is_empty());
    }

    #[test]
    fn pool_exhaustion_drops_new_pairs_only() {
        let mut manager = ContactManager::new(1, ContactTangentMode::Orthonormal);
        manager.begin_step();
        update(&mut manager, key(0, 1));
        update(&mut manager, key(2, 3));
        assert_eq!(manager.len(), 1);
        assert!(manager.get(&key(0, 1)).is_some());
        assert!(manager.get(&key(2, 3)).is_none());
    }

    #[test]
    fn pair_key_ordering_is_stable() {
        assert_eq!(key(5, 2), key(2, 5));
    }

    #[test]
    fn destroying_a_collider_ends_its_contacts() {
        let mut manager = ContactManager::new(16, ContactTangentMode::Orthonormal);
        manager.begin_step();
        update(&mut manager, key(0, 1));
        update(&mut manager, key(1, 2));
        update(&mut manager, key(3, 4));

        let ended = manager.destroy_contacts_of(EntityId::new(1, 0));
        assert_eq!(ended.len(), 2);
        assert_eq!(manager.len(), 1);
    }
}
