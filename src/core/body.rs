use bitflags::bitflags;
use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::types::{Inertia, Mass, Transform, Velocity};
use crate::config::MAX_VELOCITY;
use crate::utils::allocator::NodeId;

bitflags! {
    /// Internal states of a rigid body.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BodyState: u16 {
        const STATIC = 1 << 0;
        const KINEMATIC = 1 << 1;
        const ASLEEP = 1 << 2;
        const ROTATION_LOCKED = 1 << 3;
        const MODE_2D = 1 << 4;
        const ALLOW_SLEEP = 1 << 5;
        const INHERIT_2D = 1 << 6;
        /// Two-phase destruction: marked during a step, deallocated on commit.
        const DYING = 1 << 7;
    }
}

/// What kind of dynamics a body has. Determines whether forces are
/// integrated and how collisions are resolved against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DynamicState {
    /// A regular body affected by forces and constraints.
    #[default]
    Dynamic,
    /// Infinite mass, never moved by dynamics.
    Static,
    /// Infinite mass for solving, but publishes a velocity synthesized from
    /// externally driven transform changes so dynamic contacts respond.
    Kinematic,
}

/// How many degrees of freedom a body gets by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode2D {
    /// Lock z-translation and x/y rotation.
    Mode2D,
    /// Use the world's 2D mode.
    #[default]
    InheritFromSpace,
    Mode3D,
}

/// The dynamic mass-bearing entity: velocity, inertia, accumulated forces,
/// and the lifecycle state driving the solver and the sleep system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigidBody {
    pub transform: Transform,
    pub velocity: Velocity,
    /// Snapshot of the previous step's velocity, used for sleep heuristics.
    pub old_velocity: Velocity,
    pub force_accumulator: Vec3,
    pub torque_accumulator: Vec3,

    pub mass: Mass,
    pub inertia: Inertia,

    /// The center of mass in world space of this body and its colliders.
    pub center_of_mass: Vec3,
    /// Offset from the center of mass to the transform translation in local
    /// space (scale excluded). Bodies rotate about the center of mass, so the
    /// translation must be reconstructed from this after integration.
    pub position_offset: Vec3,

    /// Previous-step transform, kept for kinematic velocity synthesis. The
    /// synthesized velocity intentionally lags one step; wheel-style
    /// consumers depend on that.
    pub old_transform: Transform,

    pub sleep_timer: f32,
    pub state: BodyState,
    /// When set, replaces the mass computed from collider density x volume;
    /// computed inertia is rescaled to match.
    pub mass_override: Option<f32>,
    pub gravity_scale: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub mode_2d: Mode2D,

    /// Space-scope effect types this body opts out of.
    pub ignored_space_effects: u16,

    /// The physics node owning this body's transform cache and queue.
    #[serde(skip)]
    pub node: NodeId,
}

impl Default for RigidBody {
    fn default() -> Self {
        Self {
            transform: Transform::default(),
            velocity: Velocity::default(),
            old_velocity: Velocity::default(),
            force_accumulator: Vec3::ZERO,
            torque_accumulator: Vec3::ZERO,
            mass: Mass::from_mass(1.0),
            inertia: Inertia::default(),
            center_of_mass: Vec3::ZERO,
            position_offset: Vec3::ZERO,
            old_transform: Transform::default(),
            sleep_timer: 0.0,
            state: BodyState::ALLOW_SLEEP,
            mass_override: None,
            gravity_scale: 1.0,
            linear_damping: 0.0,
            angular_damping: 0.0,
            mode_2d: Mode2D::InheritFromSpace,
            ignored_space_effects: 0,
            node: NodeId::default(),
        }
    }
}

fn clamp_velocity(value: Vec3) -> Vec3 {
    let clamped = value.clamp(Vec3::splat(-MAX_VELOCITY), Vec3::splat(MAX_VELOCITY));
    if clamped.is_finite() {
        clamped
    } else {
        Vec3::new(
            if value.x.is_finite() { clamped.x } else { 0.0 },
            if value.y.is_finite() { clamped.y } else { 0.0 },
            if value.z.is_finite() { clamped.z } else { 0.0 },
        )
    }
}

impl RigidBody {
    pub fn builder() -> RigidBodyBuilder {
        RigidBodyBuilder::new()
    }

    pub fn is_static(&self) -> bool {
        self.state.contains(BodyState::STATIC)
    }

    pub fn is_kinematic(&self) -> bool {
        self.state.contains(BodyState::KINEMATIC)
    }

    pub fn is_dynamic(&self) -> bool {
        !self.state.intersects(BodyState::STATIC | BodyState::KINEMATIC)
    }

    pub fn is_asleep(&self) -> bool {
        self.state.contains(BodyState::ASLEEP)
    }

    pub fn is_awake(&self) -> bool {
        !self.is_asleep()
    }

    pub fn is_dying(&self) -> bool {
        self.state.contains(BodyState::DYING)
    }

    pub fn dynamic_state(&self) -> DynamicState {
        if self.is_static() {
            DynamicState::Static
        } else if self.is_kinematic() {
            DynamicState::Kinematic
        } else {
            DynamicState::Dynamic
        }
    }

    /// Switches dynamic state, clearing mass and velocity terms when the body
    /// stops being dynamic. Mass recomputation is queued by the caller.
    pub fn set_dynamic_state(&mut self, state: DynamicState) {
        self.state.remove(BodyState::STATIC | BodyState::KINEMATIC);
        match state {
            DynamicState::Dynamic => {}
            DynamicState::Static => {
                self.state.insert(BodyState::STATIC);
                self.clear_mass_and_velocities();
            }
            DynamicState::Kinematic => {
                self.state.insert(BodyState::KINEMATIC);
                self.clear_mass_and_velocities();
                self.old_transform = self.transform;
            }
        }
    }

    pub fn clear_mass_and_velocities(&mut self) {
        self.mass = Mass::infinite();
        self.inertia = Inertia::infinite();
        self.velocity = Velocity::default();
        self.force_accumulator = Vec3::ZERO;
        self.torque_accumulator = Vec3::ZERO;
    }

    // Velocity and force accessors. Setters clamp so NaN/infinity from user
    // scripts never propagates into the solver.

    pub fn set_velocity(&mut self, linear: Vec3) {
        if self.is_dynamic() {
            self.velocity.linear = clamp_velocity(linear);
        }
    }

    pub fn set_angular_velocity(&mut self, angular: Vec3) {
        if self.is_dynamic() {
            self.velocity.angular = clamp_velocity(angular);
        }
    }

    pub fn apply_linear_velocity(&mut self, delta: Vec3) {
        self.set_velocity(self.velocity.linear + delta);
        self.wake_up();
    }

    pub fn apply_angular_velocity(&mut self, delta: Vec3) {
        self.set_angular_velocity(self.velocity.angular + delta);
        self.wake_up();
    }

    pub fn apply_force(&mut self, force: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.force_accumulator += clamp_velocity(force);
    }

    pub fn apply_torque(&mut self, torque: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.torque_accumulator += clamp_velocity(torque);
    }

    /// Applies a force at a world point, producing force and torque about
    /// the center of mass.
    pub fn apply_force_at_point(&mut self, force: Vec3, world_point: Vec3) {
        self.apply_force(force);
        self.apply_torque((world_point - self.center_of_mass).cross(force));
    }

    pub fn apply_impulse(&mut self, impulse: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.velocity.linear = clamp_velocity(self.velocity.linear + self.mass.apply(impulse));
        self.wake_up();
    }

    pub fn apply_angular_impulse(&mut self, angular_impulse: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.velocity.angular =
            clamp_velocity(self.velocity.angular + self.inertia.apply(angular_impulse));
        self.wake_up();
    }

    pub fn apply_impulse_at_point(&mut self, impulse: Vec3, world_point: Vec3) {
        self.apply_impulse(impulse);
        self.apply_angular_impulse((world_point - self.center_of_mass).cross(impulse));
    }

    /// Linear and angular delta in one call; the shape constraint rows use.
    pub fn apply_constraint_impulse(&mut self, linear: Vec3, angular: Vec3) {
        if !self.is_dynamic() {
            return;
        }
        self.velocity.linear += self.mass.apply(linear);
        self.velocity.angular += self.inertia.apply(angular);
    }

    /// Velocity of a world-space point on this body.
    pub fn point_velocity(&self, world_point: Vec3) -> Vec3 {
        self.velocity.point_velocity(world_point, self.center_of_mass)
    }

    // Sleep interface.

    pub fn allows_sleep(&self) -> bool {
        self.state.contains(BodyState::ALLOW_SLEEP)
    }

    pub fn set_allow_sleep(&mut self, allow: bool) {
        self.state.set(BodyState::ALLOW_SLEEP, allow);
        if !allow {
            self.wake_up();
        }
    }

    /// Wakes the body without resetting the sleep timer; a motionless body
    /// will drop back asleep on the next step.
    pub fn wake_up(&mut self) {
        self.state.remove(BodyState::ASLEEP);
    }

    /// Wakes the body and restarts the sleep countdown.
    pub fn force_awake(&mut self) {
        self.wake_up();
        self.sleep_timer = 0.0;
    }

    pub fn put_to_sleep(&mut self) {
        if self.is_dynamic() {
            self.state.insert(BodyState::ASLEEP);
            self.velocity = Velocity::default();
            self.force_accumulator = Vec3::ZERO;
            self.torque_accumulator = Vec3::ZERO;
        }
    }

    // Mode and lock interface.

    pub fn rotation_locked(&self) -> bool {
        self.state.contains(BodyState::ROTATION_LOCKED)
    }

    pub fn set_rotation_locked(&mut self, locked: bool) {
        self.state.set(BodyState::ROTATION_LOCKED, locked);
        self.apply_dof_locks();
    }

    pub fn set_mode_2d(&mut self, mode: Mode2D, space_is_2d: bool) {
        self.mode_2d = mode;
        let is_2d = match mode {
            Mode2D::Mode2D => true,
            Mode2D::Mode3D => false,
            Mode2D::InheritFromSpace => space_is_2d,
        };
        self.state.set(BodyState::MODE_2D, is_2d);
        self.state.set(BodyState::INHERIT_2D, mode == Mode2D::InheritFromSpace);
        self.apply_dof_locks();
        if is_2d {
            self.velocity.linear.z = 0.0;
            self.velocity.angular.x = 0.0;
            self.velocity.angular.y = 0.0;
        }
    }

    pub fn is_2d(&self) -> bool {
        self.state.contains(BodyState::MODE_2D)
    }

    /// Re-applies 2D and rotation locks onto the mass/inertia inverses.
    /// Called whenever mass terms or lock state change.
    pub fn apply_dof_locks(&mut self) {
        let is_2d = self.is_2d();
        self.mass.set_axis_lock(false, false, is_2d);
        self.inertia.update_world(self.transform.rotation);
        if self.rotation_locked() {
            self.inertia.lock_world_axes(true, true, true);
        } else if is_2d {
            self.inertia.lock_world_axes(true, true, false);
        }
    }

    pub fn set_mass(&mut self, mass: f32) {
        let clamped = mass.max(f32::EPSILON);
        self.mass_override = Some(clamped);
        if self.is_dynamic() {
            self.mass = Mass::from_mass(clamped);
            self.apply_dof_locks();
        }
    }

    /// Synthesizes kinematic velocity from the transform delta since the last
    /// step. Deliberately uses the previous snapshot, giving a one-step lag.
    pub fn update_kinematic_velocities(&mut self, dt: f32) {
        if !self.is_kinematic() || dt <= 0.0 {
            return;
        }
        let inv_dt = 1.0 / dt;
        self.velocity.linear = (self.transform.position - self.old_transform.position) * inv_dt;

        let delta = self.transform.rotation * self.old_transform.rotation.conjugate();
        let (axis, mut angle) = delta.to_axis_angle();
        if angle > std::f32::consts::PI {
            angle -= 2.0 * std::f32::consts::PI;
        }
        self.velocity.angular = axis * (angle * inv_dt);
        self.old_transform = self.transform;
    }

    /// Recomputes the world-space center of mass after a user moved the
    /// transform directly.
    pub fn update_center_of_mass_from_transform(&mut self) {
        self.center_of_mass =
            self.transform.position - self.transform.rotation * self.position_offset;
        self.inertia.update_world(self.transform.rotation);
    }

    /// Moves the center of mass and reconstructs the transform translation.
    pub fn translate_center_of_mass(&mut self, offset: Vec3) {
        self.center_of_mass += offset;
        self.publish_transform();
    }

    /// Rotates the body about its center of mass.
    pub fn rotate_about_center_of_mass(&mut self, delta: Quat) {
        self.transform.rotation = (delta * self.transform.rotation).normalize();
        self.inertia.update_world(self.transform.rotation);
        self.publish_transform();
    }

    /// Rebuilds the transform translation from the center of mass and offset.
    pub fn publish_transform(&mut self) {
        self.transform.position = self.center_of_mass + self.transform.rotation * self.position_offset;
    }

    pub fn world_inverse_inertia(&self) -> Mat3 {
        self.inertia.inv_world()
    }
}

pub struct RigidBodyBuilder {
    body: RigidBody,
}

impl Default for RigidBodyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RigidBodyBuilder {
    pub fn new() -> Self {
        Self {
            body: RigidBody::default(),
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.body.transform.position = position;
        self.body.center_of_mass = position;
        self.body.old_transform = self.body.transform;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.body.transform.rotation = rotation;
        self.body.old_transform = self.body.transform;
        self.body.inertia.update_world(rotation);
        self
    }

    pub fn mass(mut self, mass: f32) -> Self {
        self.body.set_mass(mass);
        self
    }

    pub fn mode_2d(mut self, mode: Mode2D) -> Self {
        self.body.set_mode_2d(mode, false);
        self
    }

    pub fn inertia_tensor(mut self, local: Mat3) -> Self {
        self.body.inertia = Inertia::from_local_tensor(local);
        self.body.inertia.update_world(self.body.transform.rotation);
        self
    }

    pub fn dynamic_state(mut self, state: DynamicState) -> Self {
        self.body.set_dynamic_state(state);
        self
    }

    pub fn velocity(mut self, linear: Vec3, angular: Vec3) -> Self {
        self.body.set_velocity(linear);
        self.body.set_angular_velocity(angular);
        self
    }

    pub fn gravity_scale(mut self, scale: f32) -> Self {
        self.body.gravity_scale = scale;
        self
    }

    pub fn damping(mut self, linear: f32, angular: f32) -> Self {
        self.body.linear_damping = linear.max(0.0);
        self.body.angular_damping = angular.max(0.0);
        self
    }

    pub fn allow_sleep(mut self, allow: bool) -> Self {
        self.body.state.set(BodyState::ALLOW_SLEEP, allow);
        self
    }

    pub fn build(self) -> RigidBody {
        self.body
    }
}
