//! Event records and dispatch.
//!
//! Events are immutable records appended to a per-world queue during the
//! step and dispatched in one pass at publication time. Pre-solve events
//! are the exception: they fire inline between filtering and solving.
//! A panicking subscriber is caught at the dispatch boundary, logged, and
//! the step continues; the subscriber stays registered.

use std::panic::{catch_unwind, AssertUnwindSafe};

use glam::Vec3;
use log::error;

use crate::utils::allocator::{BodyId, ColliderId, EffectId, JointId};

/// One contact point as exposed to event handlers.
#[derive(Debug, Clone, Copy)]
pub struct ContactPointView {
    pub local_point_a: Vec3,
    pub local_point_b: Vec3,
    pub world_point: Vec3,
    /// Normal pointing from the first collider toward the second.
    pub normal: Vec3,
    pub normal_impulse: f32,
    pub friction_impulse: f32,
    pub penetration: f32,
    /// Approach speed along the normal at the start of the step.
    pub relative_velocity: f32,
}

/// Payload shared by the collision event family.
#[derive(Debug, Clone)]
pub struct CollisionEventData {
    pub collider_a: ColliderId,
    pub collider_b: ColliderId,
    pub body_a: Option<BodyId>,
    pub body_b: Option<BodyId>,
    pub points: Vec<ContactPointView>,
    /// Set when a collision-filter block renamed the event.
    pub event_name_override: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct JointEventData {
    pub joint: JointId,
}

/// Everything the engine reports. Group events fire in addition to the
/// plain collision events when a collision-filter block asks for them.
#[derive(Debug, Clone)]
pub enum PhysicsEvent {
    CollisionStarted(CollisionEventData),
    CollisionPersisted(CollisionEventData),
    CollisionEnded(CollisionEventData),
    GroupCollisionStarted(CollisionEventData),
    GroupCollisionPersisted(CollisionEventData),
    GroupCollisionEnded(CollisionEventData),
    GroupCollisionPreSolve(CollisionEventData),
    JointExceedImpulseLimit(JointEventData),
    JointLowerLimitReached(JointEventData),
    JointUpperLimitReached(JointEventData),
    RigidBodySlept(BodyId),
    RigidBodyAwoke(BodyId),
    PhysicsUpdateFinished,
    CustomPhysicsEffectPrecalculatePhase(EffectId),
    ApplyCustomPhysicsEffect { effect: EffectId, body: BodyId },
    ComputeCustomJointInfo(JointId),
}

type Listener = Box<dyn FnMut(&PhysicsEvent) + Send>;

/// Registered event subscribers.
#[derive(Default)]
pub struct EventDispatcher {
    listeners: Vec<Listener>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(&PhysicsEvent) + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Delivers one event to every subscriber, catching panics at the
    /// boundary so a faulty handler cannot take down the step.
    pub fn dispatch(&mut self, event: &PhysicsEvent) {
        for listener in &mut self.listeners {
            let result = catch_unwind(AssertUnwindSafe(|| listener(event)));
            if result.is_err() {
                error!("physics event subscriber panicked; continuing the step");
            }
        }
    }
}

/// Append-only during a step, drained at publication.
#[derive(Default)]
pub struct EventQueue {
    events: Vec<PhysicsEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: PhysicsEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn drain(&mut self) -> Vec<PhysicsEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn panicking_subscriber_does_not_stop_delivery() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new();

        dispatcher.subscribe(|_| panic!("bad handler"));
        let counter = Arc::clone(&delivered);
        dispatcher.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.dispatch(&PhysicsEvent::PhysicsUpdateFinished);
        dispatcher.dispatch(&PhysicsEvent::PhysicsUpdateFinished);
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.listener_count(), 2, "faulty subscriber stays registered");
    }

    #[test]
    fn queue_drains_in_order() {
        let mut queue = EventQueue::new();
        queue.push(PhysicsEvent::RigidBodySlept(BodyId::default()));
        queue.push(PhysicsEvent::PhysicsUpdateFinished);
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
        assert!(matches!(drained[1], PhysicsEvent::PhysicsUpdateFinished));
    }
}
