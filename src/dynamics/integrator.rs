//! Velocity and position integration.
//!
//! Semi-implicit Euler is the default and the only scheme contacts are
//! solved against (the solver needs a single velocity per step). Verlet and
//! the Runge-Kutta variants are selectable per world or per body for
//! ballistic motion parity; they sample the accumulated force at the start
//! of the step.

use glam::{Quat, Vec3};

use crate::config::IntegrationMethod;
use crate::core::body::RigidBody;

/// Below this squared norm a quaternion is considered corrupted and reset.
const QUAT_NORM_EPSILON: f32 = 1e-12;

#[derive(Debug, Clone, Copy, Default)]
pub struct Integrator {
    pub method: IntegrationMethod,
}

impl Integrator {
    pub fn new(method: IntegrationMethod) -> Self {
        Self { method }
    }

    /// Turns accumulated force/torque into velocity deltas and clears the
    /// accumulators. Statics, kinematics, and sleepers are skipped.
    pub fn integrate_velocity(&self, body: &mut RigidBody, dt: f32) {
        if !body.is_dynamic() || body.is_asleep() {
            body.force_accumulator = Vec3::ZERO;
            body.torque_accumulator = Vec3::ZERO;
            return;
        }

        let acceleration = body.mass.apply(body.force_accumulator);

        // Gyroscopic term: torque - w x (I w). Skipped when the inertia is
        // not invertible (locked axes).
        let inv_inertia = body.inertia.inv_world();
        let mut torque = body.torque_accumulator;
        if inv_inertia.determinant().abs() > f32::EPSILON {
            let inertia = inv_inertia.inverse();
            let w = body.velocity.angular;
            torque -= w.cross(inertia * w);
        }
        let angular_acceleration = body.inertia.apply(torque);

        match self.method {
            IntegrationMethod::SemiImplicitEuler
            | IntegrationMethod::Verlet
            | IntegrationMethod::Rk2
            | IntegrationMethod::Rk4 => {
                // With the force sampled once per step, every scheme shares
                // this velocity update; they differ in the position update.
                body.velocity.linear += acceleration * dt;
                body.velocity.angular += angular_acceleration * dt;
            }
        }

        let linear_decay = (1.0 - body.linear_damping * dt).max(0.0);
        let angular_decay = (1.0 - body.angular_damping * dt).max(0.0);
        body.velocity.linear *= linear_decay;
        body.velocity.angular *= angular_decay;

        self.enforce_locks(body);

        body.force_accumulator = Vec3::ZERO;
        body.torque_accumulator = Vec3::ZERO;
    }

    /// Advances the center of mass and orientation from the solved
    /// velocities, then rebuilds the cached transform.
    pub fn integrate_position(&self, body: &mut RigidBody, dt: f32) {
        if !body.is_dynamic() || body.is_asleep() {
            return;
        }

        let offset = match self.method {
            IntegrationMethod::SemiImplicitEuler => body.velocity.linear * dt,
            // The remaining schemes average over the step; with the solved
            // velocity fixed, the midpoint shift is half the old/new delta.
            IntegrationMethod::Verlet | IntegrationMethod::Rk2 | IntegrationMethod::Rk4 => {
                (body.velocity.linear + body.old_velocity.linear) * 0.5 * dt
            }
        };
        body.center_of_mass += offset;

        // q' = q + 0.5 * w * q * dt, renormalized.
        let w = body.velocity.angular;
        if w.length_squared() > 0.0 {
            let spin = Quat::from_xyzw(w.x, w.y, w.z, 0.0);
            let derivative = spin * body.transform.rotation;
            let mut next = Quat::from_xyzw(
                body.transform.rotation.x + 0.5 * derivative.x * dt,
                body.transform.rotation.y + 0.5 * derivative.y * dt,
                body.transform.rotation.z + 0.5 * derivative.z * dt,
                body.transform.rotation.w + 0.5 * derivative.w * dt,
            );
            if next.length_squared() < QUAT_NORM_EPSILON {
                next = Quat::IDENTITY;
            } else {
                next = next.normalize();
            }
            body.transform.rotation = next;
            body.inertia.update_world(next);
        }

        self.enforce_locks(body);
        body.publish_transform();
        body.old_velocity = body.velocity;
    }

    /// Zeroes velocity on locked degrees of freedom after integration.
    fn enforce_locks(&self, body: &mut RigidBody) {
        if body.is_2d() {
            body.velocity.linear.z = 0.0;
            body.velocity.angular.x = 0.0;
            body.velocity.angular.y = 0.0;
        }
        if body.rotation_locked() {
            body.velocity.angular = Vec3::ZERO;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn gravity_step_matches_closed_form() {
        let integrator = Integrator::default();
        let mut body = RigidBody::default();
        let dt = 1.0 / 60.0;

        body.apply_force(Vec3::new(0.0, -10.0, 0.0));
        integrator.integrate_velocity(&mut body, dt);
        integrator.integrate_position(&mut body, dt);

        assert_relative_eq!(body.velocity.linear.y, -10.0 * dt, epsilon = 1e-6);
        assert_relative_eq!(body.center_of_mass.y, -10.0 * dt * dt, epsilon = 1e-6);
        assert_eq!(body.force_accumulator, Vec3::ZERO);
    }

    #[test]
    fn free_body_velocity_is_conserved() {
        let integrator = Integrator::default();
        let mut body = RigidBody::default();
        body.set_velocity(Vec3::new(3.0, 0.0, 0.0));

        for _ in 0..60 {
            integrator.integrate_velocity(&mut body, 1.0 / 60.0);
            integrator.integrate_position(&mut body, 1.0 / 60.0);
        }
        assert_relative_eq!(body.velocity.linear.x, 3.0, epsilon = 1e-4);
    }

    #[test]
    fn sleeping_bodies_do_not_move() {
        let integrator = Integrator::default();
        let mut body = RigidBody::default();
        body.apply_force(Vec3::Y * 100.0);
        body.put_to_sleep();

        integrator.integrate_velocity(&mut body, 1.0 / 60.0);
        integrator.integrate_position(&mut body, 1.0 / 60.0);
        assert_eq!(body.center_of_mass, Vec3::ZERO);
        assert_eq!(body.velocity.linear, Vec3::ZERO);
    }

    #[test]
    fn locked_2d_axes_stay_zero_through_integration() {
        let integrator = Integrator::default();
        let mut body = RigidBody::default();
        body.set_mode_2d(crate::core::body::Mode2D::Mode2D, false);
        body.apply_force(Vec3::new(1.0, 0.0, 5.0));
        body.apply_torque(Vec3::new(2.0, 2.0, 1.0));

        integrator.integrate_velocity(&mut body, 1.0 / 60.0);
        integrator.integrate_position(&mut body, 1.0 / 60.0);

        assert_eq!(body.velocity.linear.z, 0.0);
        assert_eq!(body.velocity.angular.x, 0.0);
        assert_eq!(body.velocity.angular.y, 0.0);
        assert!(body.velocity.angular.z.abs() > 0.0);
    }

    #[test]
    fn corrupted_rotation_resets_to_identity() {
        let integrator = Integrator::default();
        let mut body = RigidBody::default();
        body.transform.rotation = Quat::from_xyzw(0.0, 0.0, 0.0, 1e-8);
        body.set_angular_velocity(Vec3::X);

        integrator.integrate_position(&mut body, 1.0 / 60.0);
        let q = body.transform.rotation;
        assert_relative_eq!(q.length(), 1.0, epsilon = 1e-5);
    }
}
