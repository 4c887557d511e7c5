//! Sleep management.
//!
//! A body accumulates sleep time while its linear and angular speeds stay
//! below the thresholds; an island goes to sleep only when every member
//! qualifies simultaneously, so a single restless crate keeps its whole
//! stack awake. Waking is handled upstream: island assembly propagates
//! wake-ups before the fill.

use crate::config::{ANGULAR_SLEEP_EPSILON, LINEAR_SLEEP_EPSILON, TIME_TO_SLEEP};
use crate::core::body::RigidBody;
use crate::dynamics::island::Island;
use crate::utils::allocator::{Arena, BodyId};

fn below_motion_thresholds(body: &RigidBody) -> bool {
    body.velocity.linear.length_squared() < LINEAR_SLEEP_EPSILON * LINEAR_SLEEP_EPSILON
        && body.velocity.angular.length_squared() < ANGULAR_SLEEP_EPSILON * ANGULAR_SLEEP_EPSILON
}

/// Advances sleep timers for one island and puts it to sleep when every
/// body qualifies. Returns the bodies that fell asleep this step (for the
/// publication phase).
pub fn update_island_sleep(
    island: &Island,
    bodies: &mut Arena<RigidBody>,
    dt: f32,
    allow_sleeping: bool,
) -> Vec<BodyId> {
    if !allow_sleeping {
        return Vec::new();
    }

    let mut island_may_sleep = true;
    for &body_id in &island.bodies {
        let Some(body) = bodies.get_mut(body_id) else { continue };
        if !body.allows_sleep() {
            island_may_sleep = false;
            continue;
        }
        if below_motion_thresholds(body) {
            body.sleep_timer += dt;
        } else {
            body.sleep_timer = 0.0;
        }
        if body.sleep_timer < TIME_TO_SLEEP {
            island_may_sleep = false;
        }
    }

    if !island_may_sleep {
        return Vec::new();
    }

    let mut slept = Vec::with_capacity(island.bodies.len());
    for &body_id in &island.bodies {
        if let Some(body) = bodies.get_mut(body_id) {
            if body.is_awake() {
                body.put_to_sleep();
                slept.push(body_id);
            }
        }
    }
    slept
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn island_of(bodies: &[BodyId]) -> Island {
        Island {
            bodies: bodies.to_vec(),
            ..Island::default()
        }
    }

    #[test]
    fn still_bodies_sleep_after_the_timeout() {
        let mut bodies = Arena::new();
        let id = bodies.insert(RigidBody::default());
        let island = island_of(&[id]);
        let dt = 1.0 / 60.0;

        let steps = (TIME_TO_SLEEP / dt).ceil() as usize + 1;
        let mut slept = Vec::new();
        for _ in 0..steps {
            slept = update_island_sleep(&island, &mut bodies, dt, true);
        }
        assert_eq!(slept, vec![id]);
        assert!(bodies.get(id).unwrap().is_asleep());
    }

    #[test]
    fn one_moving_body_keeps_the_island_awake() {
        let mut bodies = Arena::new();
        let still = bodies.insert(RigidBody::default());
        let mut mover = RigidBody::default();
        mover.set_velocity(Vec3::X);
        let mover = bodies.insert(mover);
        let island = island_of(&[still, mover]);

        for _ in 0..120 {
            let slept = update_island_sleep(&island, &mut bodies, 1.0 / 60.0, true);
            assert!(slept.is_empty());
        }
        assert!(bodies.get(still).unwrap().is_awake());
    }

    #[test]
    fn sleep_disallowed_bodies_never_sleep() {
        let mut bodies = Arena::new();
        let mut body = RigidBody::default();
        body.set_allow_sleep(false);
        let id = bodies.insert(body);
        let island = island_of(&[id]);

        for _ in 0..120 {
            update_island_sleep(&island, &mut bodies, 1.0 / 60.0, true);
        }
        assert!(bodies.get(id).unwrap().is_awake());
    }

    #[test]
    fn movement_resets_the_sleep_timer() {
        let mut bodies = Arena::new();
        let id = bodies.insert(RigidBody::default());
        let island = island_of(&[id]);
        let dt = 1.0 / 60.0;

        for _ in 0..20 {
            update_island_sleep(&island, &mut bodies, dt, true);
        }
        bodies.get_mut(id).unwrap().set_velocity(Vec3::X);
        update_island_sleep(&island, &mut bodies, dt, true);
        assert_eq!(bodies.get(id).unwrap().sleep_timer, 0.0);
    }
}
