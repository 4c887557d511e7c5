//! Contact constraint rows.
//!
//! Each manifold point produces one normal row and two friction rows. The
//! normal impulse stays non-negative; friction impulses are box-clamped by
//! the normal row's accumulated impulse times the friction coefficient.
//! Friction solves before the normal each iteration so its limits use the
//! most recent normal impulse.

use crate::collision::contact::{Contact, PairKey};
use crate::config::{ConstraintConfigBlock, PositionCorrectionMode, RESTITUTION_THRESHOLD};
use crate::constraints::molecule::{pair_mut, ConstraintMolecule, Jacobian, RowKind, SolverBody};

/// The three rows of one manifold point.
#[derive(Debug, Clone)]
pub struct ContactPointRows {
    pub point_index: usize,
    pub normal: ConstraintMolecule,
    pub tangents: [ConstraintMolecule; 2],
}

/// All rows for one contact, plus the data shared across its points.
#[derive(Debug, Clone)]
pub struct ContactRowGroup {
    pub key: PairKey,
    pub body_a: usize,
    pub body_b: usize,
    pub friction: f32,
    pub restitution: f32,
    pub points: Vec<ContactPointRows>,
}

impl ContactRowGroup {
    /// Assembles rows for a resolvable contact. `body_a`/`body_b` index the
    /// island's solver-body array in the contact's pair order.
    pub fn build(
        contact: &Contact,
        body_a: usize,
        body_b: usize,
        bodies: &[SolverBody],
        dt: f32,
        block: &ConstraintConfigBlock,
        correction: PositionCorrectionMode,
    ) -> Self {
        let a = &bodies[body_a];
        let b = &bodies[body_b];
        let manifold = &contact.manifold;
        let normal = manifold.normal;

        let mut points = Vec::with_capacity(manifold.points.len());
        for (point_index, point) in manifold.points.iter().enumerate() {
            let ra = point.world_point - a.position;
            let rb = point.world_point - b.position;

            let mut normal_row = ConstraintMolecule {
                jacobian: Jacobian::linear(normal, ra, rb),
                body_a,
                body_b,
                atom_index: point_index,
                kind: RowKind::Linear,
                impulse: point.normal_impulse,
                min_impulse: 0.0,
                max_impulse: f32::INFINITY,
                ..Default::default()
            };
            normal_row.compute_effective_mass(a, b);

            // Approach speed at assembly feeds restitution and reporting.
            let approach = normal_row.velocity_product(a, b);
            if approach < -RESTITUTION_THRESHOLD {
                normal_row.bias += contact.material.restitution * approach;
            }

            let correctable = (point.penetration - block.slop).max(0.0);
            normal_row.correction_cap = block.linear_error_correction;
            match correction {
                PositionCorrectionMode::Baumgarte => {
                    let error = correctable.min(block.linear_error_correction);
                    normal_row.bias -= block.linear_baumgarte * error / dt;
                }
                PositionCorrectionMode::PostStabilization => {
                    normal_row.error = -correctable;
                    normal_row.position_solve = true;
                }
            }

            let tangents = std::array::from_fn(|i| {
                let axis = manifold.tangents[i];
                let mut row = ConstraintMolecule {
                    jacobian: Jacobian::linear(axis, ra, rb),
                    body_a,
                    body_b,
                    atom_index: point_index,
                    kind: RowKind::Linear,
                    impulse: point.tangent_impulse[i],
                    ..Default::default()
                };
                row.compute_effective_mass(a, b);
                row
            });

            points.push(ContactPointRows {
                point_index,
                normal: normal_row,
                tangents,
            });
        }

        Self {
            key: contact.pair,
            body_a,
            body_b,
            friction: contact.material.dynamic_friction,
            restitution: contact.material.restitution,
            points,
        }
    }

    /// Applies the previous step's accumulated impulses once.
    pub fn warm_start(&self, bodies: &mut [SolverBody]) {
        let (a, b) = pair_mut(bodies, self.body_a, self.body_b);
        for point in &self.points {
            point.normal.warm_start(a, b);
            for tangent in &point.tangents {
                tangent.warm_start(a, b);
            }
        }
    }

    /// Drops accumulated impulses (warm starting disabled).
    pub fn cold_start(&mut self) {
        for point in &mut self.points {
            point.normal.impulse = 0.0;
            for tangent in &mut point.tangents {
                tangent.impulse = 0.0;
            }
        }
    }

    /// One velocity iteration over every point: friction first, clamped by
    /// the current normal impulse, then the normal row.
    pub fn solve(&mut self, bodies: &mut [SolverBody]) {
        let (a, b) = pair_mut(bodies, self.body_a, self.body_b);
        for point in &mut self.points {
            let max_friction = self.friction * point.normal.impulse.max(0.0);
            for tangent in &mut point.tangents {
                tangent.set_limit(-max_friction, max_friction);
                // Clamp the carried impulse too: the friction cone may have
                // shrunk since warm start.
                let clamped = tangent.impulse.clamp(-max_friction, max_friction);
                if clamped != tangent.impulse {
                    let correction = clamped - tangent.impulse;
                    tangent.apply(a, b, correction);
                    tangent.impulse = clamped;
                }
                tangent.solve(a, b);
            }
            point.normal.solve(a, b);
        }
    }

    /// Writes accumulated impulses back into the manifold points.
    pub fn commit(&self, contact: &mut Contact) {
        for point in &self.points {
            if let Some(target) = contact.manifold.points.get_mut(point.point_index) {
                target.normal_impulse = point.normal.impulse;
                target.tangent_impulse = [point.tangents[0].impulse, point.tangents[1].impulse];
            }
        }
    }

    /// Records the approach speed per point for event reporting.
    pub fn capture_relative_velocity(&self, contact: &mut Contact, bodies: &[SolverBody]) {
        let a = &bodies[self.body_a];
        let b = &bodies[self.body_b];
        for point in &self.points {
            if let Some(target) = contact.manifold.points.get_mut(point.point_index) {
                target.relative_velocity = point.normal.velocity_product(a, b);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::contact::ContactFlags;
    use crate::collision::manifold::{Manifold, ManifoldPoint};
    use crate::core::types::MaterialPairProperties;
    use crate::utils::allocator::EntityId;
    use glam::{Mat3, Quat, Vec3};

    fn solver_body(velocity: Vec3) -> SolverBody {
        SolverBody {
            linear_velocity: velocity,
            angular_velocity: Vec3::ZERO,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            inv_mass: Vec3::ONE,
            inv_inertia: Mat3::IDENTITY,
        }
    }

    fn contact_with_point(penetration: f32) -> Contact {
        let manifold = Manifold {
            normal: Vec3::Y,
            tangents: [Vec3::X, Vec3::Z],
            points: vec![ManifoldPoint {
                local_a: Vec3::ZERO,
                local_b: Vec3::ZERO,
                world_point: Vec3::ZERO,
                penetration,
                normal_impulse: 0.0,
                tangent_impulse: [0.0; 2],
                relative_velocity: 0.0,
            }],
        };
        Contact {
            pair: PairKey::new(EntityId::new(0, 0), EntityId::new(1, 0)),
            body_a: None,
            body_b: None,
            manifold,
            material: MaterialPairProperties::default(),
            flags: ContactFlags::VALID,
            sends_events: true,
        }
    }

    fn solve_iterations(group: &mut ContactRowGroup, bodies: &mut [SolverBody], n: usize) {
        for _ in 0..n {
            group.solve(bodies);
        }
    }

    #[test]
    fn normal_impulse_stays_non_negative() {
        // Bodies separating: the row must not pull them back together.
        let mut bodies = vec![solver_body(Vec3::ZERO), solver_body(Vec3::Y * 2.0)];
        let contact = contact_with_point(0.0);
        let block = ConstraintConfigBlock::default();
        let mut group = ContactRowGroup::build(
            &contact,
            0,
            1,
            &bodies,
            1.0 / 60.0,
            &block,
            PositionCorrectionMode::Baumgarte,
        );
        solve_iterations(&mut group, &mut bodies, 10);
        for point in &group.points {
            assert!(point.normal.impulse >= 0.0);
        }
        assert!(bodies[1].linear_velocity.y > 1.9, "separating motion preserved");
    }

    #[test]
    fn friction_is_bounded_by_the_friction_cone() {
        // Body B slides along X while pressed into A.
        let mut bodies = vec![solver_body(Vec3::ZERO), solver_body(Vec3::new(5.0, -1.0, 0.0))];
        let contact = contact_with_point(0.01);
        let block = ConstraintConfigBlock::default();
        let mut group = ContactRowGroup::build(
            &contact,
            0,
            1,
            &bodies,
            1.0 / 60.0,
            &block,
            PositionCorrectionMode::Baumgarte,
        );
        solve_iterations(&mut group, &mut bodies, 10);

        for point in &group.points {
            let normal = point.normal.impulse;
            let tangent = (point.tangents[0].impulse.powi(2)
                + point.tangents[1].impulse.powi(2))
            .sqrt();
            // Box clamp bounds each axis by mu * lambda_n.
            assert!(point.tangents[0].impulse.abs() <= group.friction * normal + 1e-5);
            assert!(point.tangents[1].impulse.abs() <= group.friction * normal + 1e-5);
            assert!(tangent.is_finite());
        }
    }

    #[test]
    fn impulses_commit_back_to_the_manifold() {
        let mut bodies = vec![solver_body(Vec3::ZERO), solver_body(Vec3::new(0.0, -1.0, 0.0))];
        let mut contact = contact_with_point(0.01);
        let block = ConstraintConfigBlock::default();
        let mut group = ContactRowGroup::build(
            &contact,
            0,
            1,
            &bodies,
            1.0 / 60.0,
            &block,
            PositionCorrectionMode::Baumgarte,
        );
        solve_iterations(&mut group, &mut bodies, 4);
        group.commit(&mut contact);
        assert!(contact.manifold.points[0].normal_impulse > 0.0);
    }
}
