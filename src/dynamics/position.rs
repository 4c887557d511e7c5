//! Post-stabilization position correction.
//!
//! When the world's correction mode is Baumgarte this phase is a no-op: the
//! bias terms already mixed position error into the velocity solve. Under
//! post-stabilization, rows flagged for position solving drive their error
//! toward zero by directly translating and rotating bodies with
//! pseudo-impulses. The basic variant relaxes one row at a time; the block
//! variant runs several Gauss-Seidel sweeps inside each constraint's rows
//! before moving on, which converges faster for highly-coupled rows.

use glam::Vec3;

use crate::config::PositionSolveKind;
use crate::constraints::molecule::{ConstraintMolecule, SolverBody};
use crate::utils::math::angular_velocity_to_quat;

/// Relaxation factor applied to each pseudo-impulse.
const POSITION_RELAXATION: f32 = 0.8;

/// A contiguous run of position rows belonging to one constraint, used for
/// block solving.
#[derive(Debug, Clone, Copy)]
pub struct RowBlock {
    pub start: usize,
    pub len: usize,
}

/// Accumulated positional change per island body during the position solve.
#[derive(Debug, Clone, Copy, Default)]
struct PseudoDisplacement {
    linear: Vec3,
    angular: Vec3,
}

pub struct PositionSolver {
    displacements: Vec<PseudoDisplacement>,
    pseudo_impulses: Vec<f32>,
}

impl PositionSolver {
    pub fn new() -> Self {
        Self {
            displacements: Vec::new(),
            pseudo_impulses: Vec::new(),
        }
    }

    /// Runs the position phase and applies the resulting displacements to
    /// the solver bodies. Rows keep their velocity-phase Jacobians and
    /// effective masses; the residual tracks the pseudo-displacement
    /// accumulated so far, a first-order approximation that holds for the
    /// small corrections the caps allow.
    pub fn solve(
        &mut self,
        rows: &[ConstraintMolecule],
        blocks: &[RowBlock],
        bodies: &mut [SolverBody],
        iterations: u32,
        kind: PositionSolveKind,
    ) {
        if rows.is_empty() {
            return;
        }
        self.displacements.clear();
        self.displacements.resize(bodies.len(), PseudoDisplacement::default());
        self.pseudo_impulses.clear();
        self.pseudo_impulses.resize(rows.len(), 0.0);

        let sweeps = match kind {
            PositionSolveKind::Basic => 1,
            PositionSolveKind::Block => 4,
        };

        for _ in 0..iterations {
            for block in blocks {
                for _ in 0..sweeps {
                    for offset in 0..block.len {
                        let index = block.start + offset;
                        self.relax_row(index, &rows[index], bodies);
                    }
                }
            }
        }

        for (body, displacement) in bodies.iter_mut().zip(&self.displacements) {
            if displacement.linear == Vec3::ZERO && displacement.angular == Vec3::ZERO {
                continue;
            }
            body.position += displacement.linear;
            if displacement.angular != Vec3::ZERO {
                let delta = angular_velocity_to_quat(displacement.angular, 1.0);
                body.rotation = (delta * body.rotation).normalize();
            }
        }
    }

    fn relax_row(&mut self, index: usize, row: &ConstraintMolecule, bodies: &[SolverBody]) {
        let a = &self.displacements[row.body_a];
        let b = &self.displacements[row.body_b];
        let j = &row.jacobian;

        // Residual: original error plus the correction applied so far.
        let progress = j.linear_a.dot(a.linear)
            + j.angular_a.dot(a.angular)
            + j.linear_b.dot(b.linear)
            + j.angular_b.dot(b.angular);
        let residual = (row.error + progress).clamp(-row.correction_cap, row.correction_cap);

        let mut lambda = -residual * row.effective_mass * POSITION_RELAXATION;

        // Position rows inherit the velocity row's one-sided bounds (a
        // contact never pulls, a rope never pushes).
        let total = (self.pseudo_impulses[index] + lambda)
            .clamp(row.min_impulse, row.max_impulse);
        lambda = total - self.pseudo_impulses[index];
        self.pseudo_impulses[index] = total;
        if lambda == 0.0 {
            return;
        }

        let body_a = &bodies[row.body_a];
        let body_b = &bodies[row.body_b];
        let da = &mut self.displacements[row.body_a];
        da.linear += j.linear_a * body_a.inv_mass * lambda;
        da.angular += body_a.inv_inertia * (j.angular_a * lambda);
        let db = &mut self.displacements[row.body_b];
        db.linear += j.linear_b * body_b.inv_mass * lambda;
        db.angular += body_b.inv_inertia * (j.angular_b * lambda);
    }
}

impl Default for PositionSolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::molecule::Jacobian;
    use crate::core::types::Transform;
    use glam::{Mat3, Quat};

    fn dynamic_body() -> SolverBody {
        SolverBody {
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            inv_mass: Vec3::ONE,
            inv_inertia: Mat3::IDENTITY,
        }
    }

    #[test]
    fn penetration_row_pushes_bodies_apart() {
        let mut bodies = vec![SolverBody::fixed(&Transform::default()), dynamic_body()];
        let mut row = ConstraintMolecule {
            jacobian: Jacobian::linear(Vec3::Y, Vec3::ZERO, Vec3::ZERO),
            body_a: 0,
            body_b: 1,
            error: -0.1,
            min_impulse: 0.0,
            max_impulse: f32::INFINITY,
            correction_cap: 0.2,
            position_solve: true,
            ..Default::default()
        };
        row.compute_effective_mass(&bodies[0], &bodies[1]);

        let rows = vec![row];
        let blocks = vec![RowBlock { start: 0, len: 1 }];
        let mut solver = PositionSolver::new();
        solver.solve(&rows, &blocks, &mut bodies, 8, PositionSolveKind::Basic);

        assert!(bodies[1].position.y > 0.05, "body lifted out of penetration");
        assert_eq!(bodies[0].position, Vec3::ZERO, "fixed body never moves");
    }

    #[test]
    fn correction_respects_the_per_frame_cap() {
        let mut bodies = vec![SolverBody::fixed(&Transform::default()), dynamic_body()];
        let mut row = ConstraintMolecule {
            jacobian: Jacobian::linear(Vec3::Y, Vec3::ZERO, Vec3::ZERO),
            body_a: 0,
            body_b: 1,
            error: -10.0,
            min_impulse: 0.0,
            max_impulse: f32::INFINITY,
            correction_cap: 0.05,
            position_solve: true,
            ..Default::default()
        };
        row.compute_effective_mass(&bodies[0], &bodies[1]);

        let rows = vec![row];
        let blocks = vec![RowBlock { start: 0, len: 1 }];
        let mut solver = PositionSolver::new();
        solver.solve(&rows, &blocks, &mut bodies, 1, PositionSolveKind::Basic);

        assert!(bodies[1].position.y <= 0.05 + 1e-5);
    }

    #[test]
    fn block_solving_converges_faster_on_coupled_rows() {
        let run = |kind: PositionSolveKind| -> f32 {
            let mut bodies = vec![SolverBody::fixed(&Transform::default()), dynamic_body()];
            let mut rows = Vec::new();
            for axis in [Vec3::Y, (Vec3::Y + Vec3::X * 0.5).normalize()] {
                let mut row = ConstraintMolecule {
                    jacobian: Jacobian::linear(axis, Vec3::ZERO, Vec3::ZERO),
                    body_a: 0,
                    body_b: 1,
                    error: -0.1,
                    min_impulse: f32::NEG_INFINITY,
                    max_impulse: f32::INFINITY,
                    correction_cap: 1.0,
                    position_solve: true,
                    ..Default::default()
                };
                row.compute_effective_mass(&bodies[0], &bodies[1]);
                rows.push(row);
            }
            let blocks = vec![RowBlock { start: 0, len: 2 }];
            let mut solver = PositionSolver::new();
            solver.solve(&rows, &blocks, &mut bodies, 1, kind);

            // Remaining worst-case residual across the two rows.
            rows.iter()
                .map(|r| {
                    let progress = r.jacobian.linear_b.dot(bodies[1].position);
                    (r.error + progress).abs()
                })
                .fold(0.0, f32::max)
        };

        assert!(run(PositionSolveKind::Block) <= run(PositionSolveKind::Basic) + 1e-6);
    }
}
