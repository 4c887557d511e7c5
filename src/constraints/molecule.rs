//! Constraint molecules: the transient per-step rows fed to the solver.
//!
//! A molecule carries everything one sequential-impulse iteration needs: the
//! Jacobian over its two bodies, the effective mass, bias and softening
//! terms, impulse bounds, the accumulated impulse, and an atom index so
//! results can be written back to persistent storage after solving.

use glam::{Mat3, Quat, Vec3};

use crate::core::body::RigidBody;
use crate::core::types::Transform;

/// The row matrix of one constraint over two bodies: two linear and two
/// angular 3-vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Jacobian {
    pub linear_a: Vec3,
    pub angular_a: Vec3,
    pub linear_b: Vec3,
    pub angular_b: Vec3,
}

impl Jacobian {
    /// A linear row along `axis` applied at offsets `ra`/`rb` from the two
    /// centers of mass. Its velocity product is the separation rate along
    /// the axis.
    pub fn linear(axis: Vec3, ra: Vec3, rb: Vec3) -> Self {
        Self {
            linear_a: -axis,
            angular_a: -ra.cross(axis),
            linear_b: axis,
            angular_b: rb.cross(axis),
        }
    }

    /// An angular row along `axis`; velocity product is `(wb - wa) . axis`.
    pub fn angular(axis: Vec3) -> Self {
        Self {
            linear_a: Vec3::ZERO,
            angular_a: -axis,
            linear_b: Vec3::ZERO,
            angular_b: axis,
        }
    }

    /// An angular row driving only body A (B is the world or a boundary).
    pub fn angular_single(axis: Vec3) -> Self {
        Self {
            linear_a: Vec3::ZERO,
            angular_a: axis,
            linear_b: Vec3::ZERO,
            angular_b: Vec3::ZERO,
        }
    }
}

/// Whether the row corrects a linear or an angular quantity; position
/// correction clamps the two differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowKind {
    #[default]
    Linear,
    Angular,
}

/// Runtime solving data for one constraint row.
#[derive(Debug, Clone, Default)]
pub struct ConstraintMolecule {
    pub jacobian: Jacobian,
    /// Island body indices for the two endpoints.
    pub body_a: usize,
    pub body_b: usize,

    /// `1 / (J M^-1 J^T + gamma)`.
    pub effective_mass: f32,
    /// Constraint-force mixing term for soft rows; zero when hard.
    pub gamma: f32,
    /// Right-hand-side bias (Baumgarte, restitution, or motor target).
    pub bias: f32,
    pub min_impulse: f32,
    pub max_impulse: f32,
    pub impulse: f32,
    /// Position-level constraint value at assembly time.
    pub error: f32,
    /// Where to write the accumulated impulse back after solving.
    pub atom_index: usize,
    pub kind: RowKind,
    /// Whether this row participates in the post-stabilization phase.
    pub position_solve: bool,
    /// Max error corrected in one frame during post-stabilization.
    pub correction_cap: f32,
}

/// The per-island view of one body the solver iterates on. Gathered from the
/// world before solving and scattered back afterwards; static and kinematic
/// boundary bodies get zero inverse mass so rows against them are one-sided.
#[derive(Debug, Clone)]
pub struct SolverBody {
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Center of mass position; position correction translates this.
    pub position: Vec3,
    pub rotation: Quat,
    /// Per-axis inverse mass (axis locks zero individual components).
    pub inv_mass: Vec3,
    /// World-space inverse inertia tensor.
    pub inv_inertia: Mat3,
}

impl SolverBody {
    pub fn from_body(body: &RigidBody) -> Self {
        let locked = !body.is_dynamic();
        Self {
            linear_velocity: body.velocity.linear,
            angular_velocity: body.velocity.angular,
            position: body.center_of_mass,
            rotation: body.transform.rotation,
            inv_mass: if locked { Vec3::ZERO } else { body.mass.inverse() },
            inv_inertia: if locked { Mat3::ZERO } else { body.inertia.inv_world() },
        }
    }

    /// A zero-inverse-mass entry standing in for static scenery.
    pub fn fixed(transform: &Transform) -> Self {
        Self {
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            position: transform.position,
            rotation: transform.rotation,
            inv_mass: Vec3::ZERO,
            inv_inertia: Mat3::ZERO,
        }
    }

    pub fn is_immovable(&self) -> bool {
        self.inv_mass == Vec3::ZERO && self.inv_inertia == Mat3::ZERO
    }
}

/// Distinct mutable references to two island bodies.
///
/// Callers guarantee `a != b`; rows never couple a body to itself.
pub fn pair_mut(bodies: &mut [SolverBody], a: usize, b: usize) -> (&mut SolverBody, &mut SolverBody) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = bodies.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = bodies.split_at_mut(a);
        let (first, second) = (&mut right[0], &mut left[b]);
        (first, second)
    }
}

impl ConstraintMolecule {
    pub fn set_limit(&mut self, min: f32, max: f32) {
        self.min_impulse = min;
        self.max_impulse = max;
    }

    /// Computes `1 / (J M^-1 J^T + gamma)` for this row's body pair.
    pub fn compute_effective_mass(&mut self, a: &SolverBody, b: &SolverBody) {
        let j = &self.jacobian;
        let k = j.linear_a.dot(j.linear_a * a.inv_mass)
            + j.angular_a.dot(a.inv_inertia * j.angular_a)
            + j.linear_b.dot(j.linear_b * b.inv_mass)
            + j.angular_b.dot(b.inv_inertia * j.angular_b);
        let total = k + self.gamma;
        self.effective_mass = if total > f32::EPSILON { 1.0 / total } else { 0.0 };
    }

    /// The constraint-space velocity `J v`.
    pub fn velocity_product(&self, a: &SolverBody, b: &SolverBody) -> f32 {
        let j = &self.jacobian;
        j.linear_a.dot(a.linear_velocity)
            + j.angular_a.dot(a.angular_velocity)
            + j.linear_b.dot(b.linear_velocity)
            + j.angular_b.dot(b.angular_velocity)
    }

    /// Applies an impulse along the Jacobian to both bodies.
    pub fn apply(&self, a: &mut SolverBody, b: &mut SolverBody, lambda: f32) {
        let j = &self.jacobian;
        a.linear_velocity += j.linear_a * a.inv_mass * lambda;
        a.angular_velocity += a.inv_inertia * (j.angular_a * lambda);
        b.linear_velocity += j.linear_b * b.inv_mass * lambda;
        b.angular_velocity += b.inv_inertia * (j.angular_b * lambda);
    }

    /// One sequential-impulse update: computes the clamped impulse delta and
    /// applies it. Returns the delta.
    pub fn solve(&mut self, a: &mut SolverBody, b: &mut SolverBody) -> f32 {
        let jv = self.velocity_product(a, b);
        let lambda = -(jv + self.bias + self.gamma * self.impulse) * self.effective_mass;
        let new_total = (self.impulse + lambda).clamp(self.min_impulse, self.max_impulse);
        let delta = new_total - self.impulse;
        self.impulse = new_total;
        self.apply(a, b, delta);
        delta
    }

    /// Warm start: re-applies the previous step's accumulated impulse.
    pub fn warm_start(&self, a: &mut SolverBody, b: &mut SolverBody) {
        if self.impulse != 0.0 {
            self.apply(a, b, self.impulse);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_body(velocity: Vec3) -> SolverBody {
        SolverBody {
            linear_velocity: velocity,
            angular_velocity: Vec3::ZERO,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            inv_mass: Vec3::ONE,
            inv_inertia: Mat3::IDENTITY,
        }
    }

    #[test]
    fn effective_mass_of_two_unit_bodies_is_half() {
        let a = unit_body(Vec3::ZERO);
        let b = unit_body(Vec3::ZERO);
        let mut row = ConstraintMolecule {
            jacobian: Jacobian::linear(Vec3::X, Vec3::ZERO, Vec3::ZERO),
            min_impulse: f32::NEG_INFINITY,
            max_impulse: f32::INFINITY,
            ..Default::default()
        };
        row.compute_effective_mass(&a, &b);
        assert_relative_eq!(row.effective_mass, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn solving_a_hard_row_removes_relative_velocity() {
        let mut a = unit_body(Vec3::ZERO);
        let mut b = unit_body(Vec3::new(-2.0, 0.0, 0.0));
        let mut row = ConstraintMolecule {
            jacobian: Jacobian::linear(Vec3::X, Vec3::ZERO, Vec3::ZERO),
            min_impulse: f32::NEG_INFINITY,
            max_impulse: f32::INFINITY,
            ..Default::default()
        };
        row.compute_effective_mass(&a, &b);
        row.solve(&mut a, &mut b);
        let relative = (b.linear_velocity - a.linear_velocity).x;
        assert_relative_eq!(relative, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn clamped_rows_respect_their_bounds() {
        let mut a = unit_body(Vec3::ZERO);
        let mut b = unit_body(Vec3::new(-100.0, 0.0, 0.0));
        let mut row = ConstraintMolecule {
            jacobian: Jacobian::linear(Vec3::X, Vec3::ZERO, Vec3::ZERO),
            min_impulse: 0.0,
            max_impulse: 1.0,
            ..Default::default()
        };
        row.compute_effective_mass(&a, &b);
        row.solve(&mut a, &mut b);
        assert!(row.impulse <= 1.0 + 1e-6);
        assert!(row.impulse >= 0.0);
    }

    #[test]
    fn immovable_bodies_absorb_nothing() {
        let transform = Transform::default();
        let mut wall = SolverBody::fixed(&transform);
        let mut ball = unit_body(Vec3::new(-1.0, 0.0, 0.0));
        let mut row = ConstraintMolecule {
            jacobian: Jacobian::linear(Vec3::X, Vec3::ZERO, Vec3::ZERO),
            min_impulse: f32::NEG_INFINITY,
            max_impulse: f32::INFINITY,
            ..Default::default()
        };
        row.compute_effective_mass(&wall, &ball);
        row.solve(&mut wall, &mut ball);
        assert_eq!(wall.linear_velocity, Vec3::ZERO);
        assert_relative_eq!(ball.linear_velocity.x, 0.0, epsilon = 1e-5);
    }
}
