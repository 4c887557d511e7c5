//! Math helpers layered on top of `glam` for constraint assembly.

use glam::{Mat3, Quat, Vec3};

/// Converts an angular velocity vector (radians/sec) into a quaternion delta.
pub fn angular_velocity_to_quat(angular: Vec3, dt: f32) -> Quat {
    let angle = angular.length() * dt;
    if angle.abs() < 1e-6 {
        return Quat::IDENTITY;
    }
    let axis = angular.normalize();
    Quat::from_axis_angle(axis, angle)
}

/// Skew-symmetric cross-product matrix: `skew(r) * v == r.cross(v)`.
pub fn skew(r: Vec3) -> Mat3 {
    Mat3::from_cols(
        Vec3::new(0.0, r.z, -r.y),
        Vec3::new(-r.z, 0.0, r.x),
        Vec3::new(r.y, -r.x, 0.0),
    )
}

/// Rotates a local-space inertia tensor into world space: `R * I * R^T`.
pub fn rotate_inertia(local_inertia: Mat3, rotation: Quat) -> Mat3 {
    let r = Mat3::from_quat(rotation);
    r * local_inertia * r.transpose()
}

/// Extracts the rotation-vector form of the error between two orientations.
/// The angle is normalized into [-pi, pi] to avoid the quaternion double cover.
pub fn orientation_error(from: Quat, to: Quat) -> Vec3 {
    let error = to * from.inverse();
    let (axis, mut angle) = error.to_axis_angle();
    if angle > std::f32::consts::PI {
        angle -= 2.0 * std::f32::consts::PI;
    }
    axis * angle
}

/// Soft-constraint parameters derived from a frequency/damping-ratio spring.
///
/// The mapping follows the standard implicit spring derivation: stiffness
/// `k = m * w^2` and damper `c = 2 m zeta w` turn into a constraint-force
/// mixing term `gamma` and a modified bias factor applied to the position
/// error. Both are already scaled by `dt` for direct use in the row.
#[derive(Debug, Clone, Copy)]
pub struct SoftConstraint {
    pub gamma: f32,
    pub bias_scale: f32,
}

pub fn soft_constraint(frequency_hz: f32, damping_ratio: f32, effective_mass: f32, dt: f32) -> SoftConstraint {
    let omega = 2.0 * std::f32::consts::PI * frequency_hz;
    let stiffness = effective_mass * omega * omega;
    let damper = 2.0 * effective_mass * damping_ratio * omega;

    let gamma_raw = dt * (damper + dt * stiffness);
    if gamma_raw <= f32::EPSILON {
        return SoftConstraint {
            gamma: 0.0,
            bias_scale: 0.0,
        };
    }
    let gamma = 1.0 / gamma_raw;
    let bias_scale = dt * stiffness * gamma;
    SoftConstraint { gamma, bias_scale }
}

/// Clamps a vector's length, preserving its direction.
pub fn clamp_length(v: Vec3, max_length: f32) -> Vec3 {
    let length_sq = v.length_squared();
    if length_sq > max_length * max_length {
        v * (max_length / length_sq.sqrt())
    } else {
        v
    }
}

/// An orthonormal tangent pair via Gram-Schmidt from a unit normal.
pub fn orthonormal_basis(normal: Vec3) -> (Vec3, Vec3) {
    let reference = if normal.x.abs() < 0.57 { Vec3::X } else { Vec3::Y };
    let tangent = (reference - normal * reference.dot(normal)).normalize();
    let bitangent = normal.cross(tangent);
    (tangent, bitangent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn skew_matches_cross_product() {
        let r = Vec3::new(1.0, -2.0, 3.0);
        let v = Vec3::new(0.5, 4.0, -1.0);
        assert_relative_eq!(skew(r) * v, r.cross(v), epsilon = 1e-6);
    }

    #[test]
    fn orientation_error_is_zero_for_identical_rotations() {
        let q = Quat::from_axis_angle(Vec3::Y, 0.7);
        assert!(orientation_error(q, q).length() < 1e-6);
    }

    #[test]
    fn orthonormal_basis_is_orthogonal() {
        for normal in [Vec3::X, Vec3::Y, Vec3::Z, Vec3::new(0.3, -0.8, 0.52).normalize()] {
            let (t, b) = orthonormal_basis(normal);
            assert!(t.dot(normal).abs() < 1e-5);
            assert!(b.dot(normal).abs() < 1e-5);
            assert!(t.dot(b).abs() < 1e-5);
            assert_relative_eq!(t.length(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn soft_constraint_softens_with_low_frequency() {
        let stiff = soft_constraint(60.0, 1.0, 1.0, 1.0 / 60.0);
        let soft = soft_constraint(2.0, 1.0, 1.0, 1.0 / 60.0);
        assert!(soft.gamma > stiff.gamma);
    }
}
