//! Physics effects: sources of force and acceleration.
//!
//! An effect attaches to a body, a region, or the whole world (space or
//! level scope) and is applied every step to the bodies it covers. Each
//! step runs two passes: `pre_calculate` caches per-step values (world-space
//! directions and positions), then `apply_to_body` accumulates force and
//! torque on every covered body.

use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::body::RigidBody;
use crate::core::types::Transform;
use crate::utils::allocator::{BodyId, ColliderId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct EffectFlags: u8 {
        const ACTIVE = 1 << 0;
        /// Wake covered bodies whenever a property changes.
        const WAKE_UP_ON_CHANGE = 1 << 1;
    }
}

/// Bit per effect type, matching [`RigidBody::ignored_space_effects`].
pub mod effect_type_bits {
    pub const DRAG: u16 = 1 << 0;
    pub const FLOW: u16 = 1 << 1;
    pub const FORCE: u16 = 1 << 2;
    pub const GRAVITY: u16 = 1 << 3;
    pub const THRUST: u16 = 1 << 4;
    pub const VORTEX: u16 = 1 << 5;
    pub const WIND: u16 = 1 << 6;
    pub const TORQUE: u16 = 1 << 7;
    pub const POINT_GRAVITY: u16 = 1 << 8;
    pub const POINT_FORCE: u16 = 1 << 9;
    pub const BUOYANCY: u16 = 1 << 10;
    pub const CUSTOM: u16 = 1 << 11;
}

/// What the effect covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectScope {
    /// Every dynamic body in the world.
    Space,
    /// Every body in the loaded level; distinct from space scope so level
    /// teardown drops its effects wholesale.
    Level,
    /// Bodies whose colliders overlap the region collider's volume.
    Region(ColliderId),
    /// One body.
    Body(BodyId),
}

/// How force values interpolate between the min and max distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EffectInterpolation {
    #[default]
    Linear,
    Quadratic,
}

impl EffectInterpolation {
    fn blend(&self, t: f32) -> f32 {
        match self {
            EffectInterpolation::Linear => t,
            EffectInterpolation::Quadratic => t * t,
        }
    }
}

/// Behavior past the max distance of a point effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EffectEndCondition {
    #[default]
    ClampToMax,
    ContinueFalloff,
    NoEffect,
}

/// Distance-interpolated strength shared by the point effects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Falloff {
    pub strength_at_min: f32,
    pub strength_at_max: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub interpolation: EffectInterpolation,
    pub end_condition: EffectEndCondition,
}

impl Default for Falloff {
    fn default() -> Self {
        Self {
            strength_at_min: 10.0,
            strength_at_max: 0.0,
            min_distance: 0.0,
            max_distance: 10.0,
            interpolation: EffectInterpolation::Linear,
            end_condition: EffectEndCondition::ClampToMax,
        }
    }
}

impl Falloff {
    /// Strength at a distance, honoring the end condition.
    pub fn strength(&self, distance: f32) -> Option<f32> {
        let span = (self.max_distance - self.min_distance).max(1e-6);
        let t = (distance - self.min_distance) / span;
        if t > 1.0 {
            return match self.end_condition {
                EffectEndCondition::ClampToMax => Some(self.strength_at_max),
                EffectEndCondition::ContinueFalloff => Some(
                    self.strength_at_min
                        + (self.strength_at_max - self.strength_at_min)
                            * self.interpolation.blend(t),
                ),
                EffectEndCondition::NoEffect => None,
            };
        }
        let t = t.clamp(0.0, 1.0);
        Some(
            self.strength_at_min
                + (self.strength_at_max - self.strength_at_min) * self.interpolation.blend(t),
        )
    }
}

/// The effect variants and their parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EffectKind {
    /// A constant force along a direction.
    Force { direction: Vec3, strength: f32 },
    /// A constant acceleration along a direction (mass-independent).
    Gravity { direction: Vec3, strength: f32 },
    /// Force toward/away from a point, interpolated by distance.
    PointForce { falloff: Falloff },
    /// Acceleration toward/away from a point, interpolated by distance.
    PointGravity { falloff: Falloff },
    /// Linear and angular damping plus quadratic drag.
    Drag {
        linear_damping: f32,
        angular_damping: f32,
        drag: f32,
    },
    /// Force proportional to the relative wind speed.
    Wind { direction: Vec3, wind_speed: f32 },
    /// Accelerates bodies toward a target flow velocity, with a force cap.
    Flow {
        direction: Vec3,
        flow_speed: f32,
        max_force: f32,
    },
    /// Swirls bodies about an axis: tangential twist plus inward pull.
    Vortex {
        axis: Vec3,
        twist_strength: f32,
        inward_strength: f32,
        falloff: Falloff,
    },
    /// Buoyant lift from displaced fluid, applied by region overlap.
    Buoyancy { fluid_density: f32, fluid_drag: f32 },
    /// Force along a local direction at a local offset (an engine nozzle).
    Thrust {
        local_direction: Vec3,
        strength: f32,
        local_offset: Vec3,
    },
    /// Torque about a local or world axis.
    Torque { local_axis: Vec3, strength: f32 },
    /// Raises events so user code computes and applies the forces.
    Custom,
}

/// Extra per-application data the world computes for region effects.
#[derive(Debug, Clone, Copy)]
pub struct EffectContext {
    /// Fraction of the body's volume inside the region (buoyancy).
    pub submerged_fraction: f32,
    /// Displaced volume in world units (buoyancy).
    pub displaced_volume: f32,
    /// World gravity, for effects that push against it.
    pub gravity: Vec3,
}

impl Default for EffectContext {
    fn default() -> Self {
        Self {
            submerged_fraction: 1.0,
            displaced_volume: 0.0,
            gravity: Vec3::new(0.0, -9.81, 0.0),
        }
    }
}

/// A force/acceleration source attached somewhere in the world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsEffect {
    pub kind: EffectKind,
    pub scope: EffectScope,
    pub flags: EffectFlags,
    /// Local-to-world transform of the owning node, cached each step.
    #[serde(skip)]
    world_transform: Transform,
    #[serde(skip)]
    world_direction: Vec3,
    #[serde(skip)]
    world_position: Vec3,
}

impl PhysicsEffect {
    pub fn new(kind: EffectKind, scope: EffectScope) -> Self {
        Self {
            kind,
            scope,
            flags: EffectFlags::ACTIVE | EffectFlags::WAKE_UP_ON_CHANGE,
            world_transform: Transform::default(),
            world_direction: Vec3::Y,
            world_position: Vec3::ZERO,
        }
    }

    pub fn is_active(&self) -> bool {
        self.flags.contains(EffectFlags::ACTIVE)
    }

    pub fn wakes_on_change(&self) -> bool {
        self.flags.contains(EffectFlags::WAKE_UP_ON_CHANGE)
    }

    /// The bit this effect occupies in a body's space-effect ignore mask.
    pub fn type_bit(&self) -> u16 {
        use effect_type_bits::*;
        match self.kind {
            EffectKind::Force { .. } => FORCE,
            EffectKind::Gravity { .. } => GRAVITY,
            EffectKind::PointForce { .. } => POINT_FORCE,
            EffectKind::PointGravity { .. } => POINT_GRAVITY,
            EffectKind::Drag { .. } => DRAG,
            EffectKind::Wind { .. } => WIND,
            EffectKind::Flow { .. } => FLOW,
            EffectKind::Vortex { .. } => VORTEX,
            EffectKind::Buoyancy { .. } => BUOYANCY,
            EffectKind::Thrust { .. } => THRUST,
            EffectKind::Torque { .. } => TORQUE,
            EffectKind::Custom => CUSTOM,
        }
    }

    /// Per-step cache: world-space direction, position, and axis values
    /// that would otherwise be recomputed per covered body.
    pub fn pre_calculate(&mut self, owner_transform: &Transform) {
        self.world_transform = *owner_transform;
        self.world_position = owner_transform.position;
        let local_direction = match &self.kind {
            EffectKind::Force { direction, .. }
            | EffectKind::Gravity { direction, .. }
            | EffectKind::Wind { direction, .. }
            | EffectKind::Flow { direction, .. } => *direction,
            EffectKind::Vortex { axis, .. } => *axis,
            EffectKind::Thrust { local_direction, .. } => *local_direction,
            EffectKind::Torque { local_axis, .. } => *local_axis,
            _ => Vec3::Y,
        };
        self.world_direction =
            (owner_transform.rotation * local_direction).normalize_or_zero();
    }

    /// Accumulates this effect's force/torque on one body.
    pub fn apply_to_body(&self, body: &mut RigidBody, dt: f32, context: &EffectContext) {
        if !self.is_active() || !body.is_dynamic() || body.is_asleep() {
            return;
        }
        let _ = dt;
        match &self.kind {
            EffectKind::Force { strength, .. } => {
                body.apply_force(self.world_direction * *strength);
            }
            EffectKind::Gravity { strength, .. } => {
                let force = self.world_direction * *strength * body.mass.mass();
                body.apply_force(force * body.gravity_scale);
            }
            EffectKind::PointForce { falloff } => {
                self.apply_point(body, falloff, 1.0);
            }
            EffectKind::PointGravity { falloff } => {
                self.apply_point(body, falloff, body.mass.mass());
            }
            EffectKind::Drag {
                linear_damping,
                angular_damping,
                drag,
            } => {
                let speed = body.velocity.linear.length();
                let mut force = -body.velocity.linear * *linear_damping;
                if speed > 1e-6 {
                    force -= body.velocity.linear.normalize() * speed * speed * *drag;
                }
                body.apply_force(force);
                body.apply_torque(-body.velocity.angular * *angular_damping);
            }
            EffectKind::Wind { wind_speed, .. } => {
                let wind_velocity = self.world_direction * *wind_speed;
                let relative = wind_velocity - body.velocity.linear;
                body.apply_force(relative * relative.length());
            }
            EffectKind::Flow {
                flow_speed,
                max_force,
                ..
            } => {
                let target = self.world_direction * *flow_speed;
                let correction = (target - body.velocity.linear) * body.mass.mass();
                let force = crate::utils::math::clamp_length(correction, *max_force);
                body.apply_force(force);
            }
            EffectKind::Vortex {
                twist_strength,
                inward_strength,
                falloff,
                ..
            } => {
                let axis = self.world_direction;
                let offset = body.center_of_mass - self.world_position;
                let radial = offset - axis * offset.dot(axis);
                let distance = radial.length();
                if distance < 1e-6 {
                    return;
                }
                let Some(scale) = falloff.strength(distance) else { return };
                let inward = -radial / distance;
                let tangent = axis.cross(radial / distance);
                body.apply_force(
                    (tangent * *twist_strength + inward * *inward_strength) * scale,
                );
            }
            EffectKind::Buoyancy {
                fluid_density,
                fluid_drag,
            } => {
                if context.submerged_fraction <= 0.0 {
                    return;
                }
                let displaced = context.displaced_volume * context.submerged_fraction;
                body.apply_force(-context.gravity * *fluid_density * displaced);
                body.apply_force(
                    -body.velocity.linear * *fluid_drag * context.submerged_fraction,
                );
            }
            EffectKind::Thrust {
                strength,
                local_offset,
                ..
            } => {
                let point = self.world_transform.transform_point(*local_offset);
                body.apply_force_at_point(self.world_direction * *strength, point);
            }
            EffectKind::Torque { strength, .. } => {
                body.apply_torque(self.world_direction * *strength);
            }
            // Custom effects apply through the world's event hook.
            EffectKind::Custom => {}
        }
    }

    fn apply_point(&self, body: &mut RigidBody, falloff: &Falloff, mass_scale: f32) {
        let offset = body.center_of_mass - self.world_position;
        let distance = offset.length();
        let Some(strength) = falloff.strength(distance) else { return };
        let direction = if distance > 1e-6 {
            offset / distance
        } else {
            Vec3::Y
        };
        // Positive strength pushes away from the point, negative attracts.
        body.apply_force(direction * strength * mass_scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn applied_force(effect: &mut PhysicsEffect, body: &mut RigidBody) -> Vec3 {
        effect.pre_calculate(&Transform::default());
        effect.apply_to_body(body, 1.0 / 60.0, &EffectContext::default());
        let force = body.force_accumulator;
        body.force_accumulator = Vec3::ZERO;
        force
    }

    #[test]
    fn gravity_scales_with_mass_but_force_does_not() {
        let mut heavy = RigidBody::builder().mass(10.0).build();
        let mut gravity = PhysicsEffect::new(
            EffectKind::Gravity {
                direction: Vec3::NEG_Y,
                strength: 10.0,
            },
            EffectScope::Space,
        );
        let mut force = PhysicsEffect::new(
            EffectKind::Force {
                direction: Vec3::NEG_Y,
                strength: 10.0,
            },
            EffectScope::Space,
        );

        assert_relative_eq!(applied_force(&mut gravity, &mut heavy).y, -100.0, epsilon = 1e-4);
        assert_relative_eq!(applied_force(&mut force, &mut heavy).y, -10.0, epsilon = 1e-4);
    }

    #[test]
    fn point_force_interpolates_and_respects_end_condition() {
        let falloff = Falloff {
            strength_at_min: -10.0,
            strength_at_max: 0.0,
            min_distance: 0.0,
            max_distance: 10.0,
            interpolation: EffectInterpolation::Linear,
            end_condition: EffectEndCondition::NoEffect,
        };
        let mut effect = PhysicsEffect::new(
            EffectKind::PointForce { falloff },
            EffectScope::Space,
        );

        let mut near = RigidBody::builder().position(Vec3::new(5.0, 0.0, 0.0)).build();
        let force = applied_force(&mut effect, &mut near);
        // Attraction at half distance: half of the min strength.
        assert_relative_eq!(force.x, -5.0, epsilon = 1e-4);

        let mut far = RigidBody::builder().position(Vec3::new(50.0, 0.0, 0.0)).build();
        assert_eq!(applied_force(&mut effect, &mut far), Vec3::ZERO);
    }

    #[test]
    fn vortex_pushes_tangentially_and_inward() {
        let mut effect = PhysicsEffect::new(
            EffectKind::Vortex {
                axis: Vec3::Y,
                twist_strength: 1.0,
                inward_strength: 1.0,
                falloff: Falloff {
                    strength_at_min: 1.0,
                    strength_at_max: 1.0,
                    ..Falloff::default()
                },
            },
            EffectScope::Space,
        );
        let mut body = RigidBody::builder().position(Vec3::new(2.0, 0.0, 0.0)).build();
        let force = applied_force(&mut effect, &mut body);
        assert!(force.x < 0.0, "inward pull toward the axis");
        assert!(force.z.abs() > 0.0, "tangential twist");
    }

    #[test]
    fn buoyancy_lifts_against_gravity_by_displaced_volume() {
        let mut effect = PhysicsEffect::new(
            EffectKind::Buoyancy {
                fluid_density: 2.0,
                fluid_drag: 0.0,
            },
            EffectScope::Space,
        );
        effect.pre_calculate(&Transform::default());
        let mut body = RigidBody::default();
        let context = EffectContext {
            submerged_fraction: 0.5,
            displaced_volume: 1.0,
            gravity: Vec3::new(0.0, -10.0, 0.0),
        };
        effect.apply_to_body(&mut body, 1.0 / 60.0, &context);
        assert_relative_eq!(body.force_accumulator.y, 10.0, epsilon = 1e-4);
    }

    #[test]
    fn inactive_effects_apply_nothing() {
        let mut effect = PhysicsEffect::new(
            EffectKind::Force {
                direction: Vec3::X,
                strength: 5.0,
            },
            EffectScope::Space,
        );
        effect.flags.remove(EffectFlags::ACTIVE);
        let mut body = RigidBody::default();
        assert_eq!(applied_force(&mut effect, &mut body), Vec3::ZERO);
    }
}
