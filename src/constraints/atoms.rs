//! Constraint atoms: the serializable pieces a joint is assembled from.
//!
//! Atoms describe what a constraint couples (two anchor points, an axis, a
//! reference angle) in the bodies' local spaces, plus the per-row state that
//! persists across steps (accumulated impulse and last error). Per step they
//! are transformed into their world-space forms before molecules are built.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::types::Transform;

/// Two local anchor points, one per body. Used by any joint that locks two
/// points together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnchorAtom {
    pub local: [Vec3; 2],
}

impl AnchorAtom {
    pub fn new(local_a: Vec3, local_b: Vec3) -> Self {
        Self {
            local: [local_a, local_b],
        }
    }

    pub fn to_world(&self, a: &Transform, b: &Transform) -> WorldAnchorAtom {
        WorldAnchorAtom {
            points: [
                a.transform_point(self.local[0]),
                b.transform_point(self.local[1]),
            ],
        }
    }
}

/// Anchors after transformation into world space.
#[derive(Debug, Clone, Copy)]
pub struct WorldAnchorAtom {
    pub points: [Vec3; 2],
}

impl WorldAnchorAtom {
    /// Separation vector from the anchor on A to the anchor on B.
    pub fn point_difference(&self) -> Vec3 {
        self.points[1] - self.points[0]
    }
}

/// Two local unit axes, one per body. Used by any joint with a free axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisAtom {
    pub local: [Vec3; 2],
}

impl Default for AxisAtom {
    fn default() -> Self {
        Self {
            local: [Vec3::Y, Vec3::Y],
        }
    }
}

impl AxisAtom {
    pub fn new(local_a: Vec3, local_b: Vec3) -> Self {
        Self {
            local: [local_a.normalize_or_zero(), local_b.normalize_or_zero()],
        }
    }

    pub fn to_world(&self, a: &Transform, b: &Transform) -> WorldAxisAtom {
        WorldAxisAtom {
            axes: [
                (a.rotation * self.local[0]).normalize_or_zero(),
                (b.rotation * self.local[1]).normalize_or_zero(),
            ],
        }
    }
}

/// Axes after rotation into world space.
#[derive(Debug, Clone, Copy)]
pub struct WorldAxisAtom {
    pub axes: [Vec3; 2],
}

/// Two local reference frames, one per body. Used by any joint that locks a
/// rotation of one body to another.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleAtom {
    pub local: [Quat; 2],
}

impl Default for AngleAtom {
    fn default() -> Self {
        Self {
            local: [Quat::IDENTITY, Quat::IDENTITY],
        }
    }
}

impl AngleAtom {
    /// Captures the current relative rotation as the reference, so the joint
    /// holds the configuration it was created in.
    pub fn from_current(a: &Transform, b: &Transform) -> Self {
        Self {
            local: [Quat::IDENTITY, (b.rotation.inverse() * a.rotation).normalize()],
        }
    }

    /// The world-space rotation error between the two reference frames, as
    /// the rotation vector carrying A's frame onto B's. Its time derivative
    /// is approximately `wb - wa`, matching the angular Jacobian convention.
    pub fn world_error(&self, a: &Transform, b: &Transform) -> Vec3 {
        let world_a = (a.rotation * self.local[0]).normalize();
        let world_b = (b.rotation * self.local[1]).normalize();
        crate::utils::math::orientation_error(world_a, world_b)
    }
}

/// The bare minimum persistent state of one constraint row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintAtom {
    pub impulse: f32,
    /// Position-level constraint value from the last assembly.
    pub error: f32,
}

/// A min/max bound for a row's accumulated impulse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpulseLimitAtom {
    pub min_impulse: f32,
    pub max_impulse: f32,
}

impl Default for ImpulseLimitAtom {
    fn default() -> Self {
        Self {
            min_impulse: f32::NEG_INFINITY,
            max_impulse: f32::INFINITY,
        }
    }
}

impl ImpulseLimitAtom {
    pub fn symmetric(max_impulse: f32) -> Self {
        Self {
            min_impulse: -max_impulse,
            max_impulse,
        }
    }
}

/// The elements that turn a hard constraint row into a soft one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpringAtom {
    pub frequency_hz: f32,
    pub damping_ratio: f32,
}

impl Default for SpringAtom {
    fn default() -> Self {
        Self {
            frequency_hz: 4.0,
            damping_ratio: 0.7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn world_anchor_reflects_body_motion() {
        let atom = AnchorAtom::new(Vec3::X, Vec3::ZERO);
        let a = Transform::from_position(Vec3::new(0.0, 1.0, 0.0));
        let b = Transform::from_position(Vec3::new(3.0, 1.0, 0.0));
        let world = atom.to_world(&a, &b);
        assert_relative_eq!(world.points[0], Vec3::new(1.0, 1.0, 0.0));
        assert_relative_eq!(world.point_difference(), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn reference_angle_capture_yields_zero_initial_error() {
        let a = Transform::from_position_rotation(
            Vec3::ZERO,
            Quat::from_axis_angle(Vec3::Z, 0.8),
        );
        let b = Transform::from_position_rotation(
            Vec3::X,
            Quat::from_axis_angle(Vec3::Z, 0.3),
        );
        let atom = AngleAtom::from_current(&a, &b);
        assert!(atom.world_error(&a, &b).length() < 1e-5);

        // Rotating B away from the captured pose produces an error about Z.
        let rotated = Transform {
            rotation: Quat::from_axis_angle(Vec3::Z, 0.5) * b.rotation,
            ..b
        };
        let error = atom.world_error(&a, &rotated);
        assert!(error.z.abs() > 0.4);
    }
}
