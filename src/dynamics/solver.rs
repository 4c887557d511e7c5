//! The island constraint solver.
//!
//! Each island gathers its bodies into a flat solver array keyed by a local
//! index map, assembles contact and joint rows against it, warm-starts,
//! iterates sequential impulses, commits accumulated impulses back to the
//! persistent stores, and finally runs position correction before
//! scattering the results into the world.
//!
//! Solver kinds: `Basic`, `Normal`, and `GenericBasic` share the flat-array
//! path (rows are plain data here, so typed dispatch and the SoA gather
//! coincide); `Threaded` additionally partitions constraints into phases of
//! body-disjoint batches and solves each phase's batches in parallel.

use std::collections::HashMap;

use crate::collision::contact::ContactManager;
use crate::config::{PositionCorrectionMode, SolverConfig, SolverKind, WorldConfig};
use crate::constraints::contact_rows::ContactRowGroup;
use crate::constraints::joints::{Joint, JointContext, JointFrame, JointNotice};
use crate::constraints::molecule::{pair_mut, ConstraintMolecule, SolverBody};
use crate::core::body::RigidBody;
use crate::core::collider::Collider;
use crate::dynamics::island::Island;
use crate::dynamics::position::{PositionSolver, RowBlock};
use crate::utils::allocator::{Arena, BodyId, ColliderId, JointId};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Units a batch can contain within one threaded phase.
const THREADED_BATCH_SIZE: usize = 8;

/// Aggregate counters for one solver pass, reported through the profiler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SolverMetrics {
    pub islands_solved: usize,
    pub contacts_solved: usize,
    pub joints_solved: usize,
    pub normal_impulse_sum: f32,
}

impl SolverMetrics {
    pub fn merge(&mut self, other: &SolverMetrics) {
        self.islands_solved += other.islands_solved;
        self.contacts_solved += other.contacts_solved;
        self.joints_solved += other.joints_solved;
        self.normal_impulse_sum += other.normal_impulse_sum;
    }
}

/// Joint-related outcomes the world turns into events after the solve.
#[derive(Debug, Default)]
pub struct SolveOutput {
    pub notices: Vec<(JointId, JointNotice)>,
    pub exceeded_joints: Vec<JointId>,
    pub metrics: SolverMetrics,
}

/// Where a solver slot's state comes from when re-gathering.
#[derive(Debug, Clone)]
pub enum GatherSource {
    Body(BodyId),
    Fixed(crate::core::types::Transform),
}

/// Position-correction work deferred until after position integration, per
/// the pipeline order: velocity solve, integrate, then correct.
pub struct PendingPositionSolve {
    rows: Vec<ConstraintMolecule>,
    blocks: Vec<RowBlock>,
    sources: Vec<GatherSource>,
}

/// One solvable constraint with its rows, the unit of iteration and of
/// threaded batching.
enum ConstraintUnit {
    Contact(ContactRowGroup),
    Joint {
        id: JointId,
        rows: Vec<ConstraintMolecule>,
    },
}

impl ConstraintUnit {
    fn dynamic_bodies(&self, bodies: &[SolverBody]) -> Vec<usize> {
        let (a, b) = match self {
            ConstraintUnit::Contact(group) => (group.body_a, group.body_b),
            ConstraintUnit::Joint { rows, .. } => match rows.first() {
                Some(row) => (row.body_a, row.body_b),
                None => return Vec::new(),
            },
        };
        [a, b]
            .into_iter()
            .filter(|&i| !bodies[i].is_immovable())
            .collect()
    }

    fn warm_start(&self, bodies: &mut [SolverBody]) {
        match self {
            ConstraintUnit::Contact(group) => group.warm_start(bodies),
            ConstraintUnit::Joint { rows, .. } => {
                for row in rows {
                    if row.body_a != row.body_b {
                        let (a, b) = pair_mut(bodies, row.body_a, row.body_b);
                        row.warm_start(a, b);
                    }
                }
            }
        }
    }

    fn cold_start(&mut self) {
        match self {
            ConstraintUnit::Contact(group) => group.cold_start(),
            ConstraintUnit::Joint { rows, .. } => {
                for row in rows {
                    row.impulse = 0.0;
                }
            }
        }
    }

    /// One velocity iteration over this unit's rows.
    fn solve(&mut self, bodies: &mut [SolverBody]) {
        match self {
            ConstraintUnit::Contact(group) => group.solve(bodies),
            ConstraintUnit::Joint { rows, .. } => {
                for row in rows {
                    if row.body_a != row.body_b {
                        let (a, b) = pair_mut(bodies, row.body_a, row.body_b);
                        row.solve(a, b);
                    }
                }
            }
        }
    }
}

/// The per-island body gather: world ids to local indices, with fixed
/// entries standing in for bodiless (scenery) colliders.
struct BodyGather {
    solver_bodies: Vec<SolverBody>,
    /// World body behind each slot; `None` for scenery entries.
    sources: Vec<Option<BodyId>>,
    body_index: HashMap<BodyId, usize>,
    fixed_index: HashMap<ColliderId, usize>,
}

impl BodyGather {
    fn new() -> Self {
        Self {
            solver_bodies: Vec::new(),
            sources: Vec::new(),
            body_index: HashMap::new(),
            fixed_index: HashMap::new(),
        }
    }

    fn index_of_body(&mut self, id: BodyId, bodies: &Arena<RigidBody>) -> Option<usize> {
        if let Some(&index) = self.body_index.get(&id) {
            return Some(index);
        }
        let body = bodies.get(id)?;
        let index = self.solver_bodies.len();
        self.solver_bodies.push(SolverBody::from_body(body));
        self.sources.push(Some(id));
        self.body_index.insert(id, index);
        Some(index)
    }

    /// Resolves a collider endpoint to a slot: its active body when it has
    /// one, otherwise a fixed entry at the collider's world transform.
    fn index_of_endpoint(
        &mut self,
        collider_id: ColliderId,
        colliders: &Arena<Collider>,
        bodies: &Arena<RigidBody>,
    ) -> Option<usize> {
        let collider = colliders.get(collider_id)?;
        if let Some(body_id) = collider.body {
            if let Some(index) = self.index_of_body(body_id, bodies) {
                return Some(index);
            }
        }
        if let Some(&index) = self.fixed_index.get(&collider_id) {
            return Some(index);
        }
        let index = self.solver_bodies.len();
        self.solver_bodies.push(SolverBody::fixed(&collider.world_transform));
        self.sources.push(None);
        self.fixed_index.insert(collider_id, index);
        Some(index)
    }

    fn frame(&self, index: usize, bodies: &Arena<RigidBody>) -> JointFrame {
        if let Some(body) = self.sources[index].and_then(|id| bodies.get(id)) {
            return JointFrame {
                transform: body.transform,
                center_of_mass: body.center_of_mass,
                index,
            };
        }
        let solver_body = &self.solver_bodies[index];
        JointFrame {
            transform: crate::core::types::Transform::from_position_rotation(
                solver_body.position,
                solver_body.rotation,
            ),
            center_of_mass: solver_body.position,
            index,
        }
    }
}

pub struct IslandSolver {
    position_solver: PositionSolver,
}

impl Default for IslandSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IslandSolver {
    pub fn new() -> Self {
        Self {
            position_solver: PositionSolver::new(),
        }
    }

    /// Solves one island's velocity phase: assembly, warm start, iterations,
    /// and impulse commit. Position-correction rows are returned for the
    /// post-integration phase instead of being solved here.
    #[allow(clippy::too_many_arguments)]
    pub fn solve_island(
        &mut self,
        island: &Island,
        bodies: &mut Arena<RigidBody>,
        colliders: &Arena<Collider>,
        contact_manager: &mut ContactManager,
        joints: &mut Arena<Joint>,
        world_config: &WorldConfig,
        solver_config: &SolverConfig,
        dt: f32,
    ) -> (SolveOutput, Option<PendingPositionSolve>) {
        let mut output = SolveOutput::default();
        let mut gather = BodyGather::new();

        for &body_id in &island.bodies {
            let _ = gather.index_of_body(body_id, bodies);
        }

        let mut units: Vec<ConstraintUnit> = Vec::new();
        let mut joint_units: Vec<ConstraintUnit> = Vec::new();

        // Contact rows.
        let contact_block = solver_config.contact_block;
        let contact_correction = solver_config.correction_for(&contact_block);
        for key in &island.contacts {
            let Some(contact) = contact_manager.get(key) else { continue };
            if !contact.is_resolvable() || contact.manifold.is_empty() {
                continue;
            }
            let Some(index_a) = gather.index_of_endpoint(key.a, colliders, bodies) else {
                continue;
            };
            let Some(index_b) = gather.index_of_endpoint(key.b, colliders, bodies) else {
                continue;
            };
            if index_a == index_b {
                continue;
            }
            let group = ContactRowGroup::build(
                contact,
                index_a,
                index_b,
                &gather.solver_bodies,
                dt,
                &contact_block,
                contact_correction,
            );
            // Approach speeds for event reporting, sampled pre-solve.
            if let Some(contact) = contact_manager.get_mut(key) {
                group.capture_relative_velocity(contact, &gather.solver_bodies);
            }
            output.metrics.contacts_solved += 1;
            units.push(ConstraintUnit::Contact(group));
        }

        // Joint rows.
        for &joint_id in &island.joints {
            let Some(joint) = joints.get_mut(joint_id) else { continue };
            if !joint.is_solvable() {
                continue;
            }
            let Some(index_a) = gather.index_of_endpoint(joint.colliders[0], colliders, bodies)
            else {
                continue;
            };
            let Some(index_b) = gather.index_of_endpoint(joint.colliders[1], colliders, bodies)
            else {
                continue;
            };
            if index_a == index_b {
                continue;
            }

            let block = solver_config.block_for(joint.kind.id());
            let correction = solver_config.correction_for(&block);
            let frame_a = gather.frame(index_a, bodies);
            let frame_b = gather.frame(index_b, bodies);
            let mut rows = Vec::new();
            let notices = {
                let ctx = JointContext {
                    frame_a,
                    frame_b,
                    body_a: &gather.solver_bodies[index_a],
                    body_b: &gather.solver_bodies[index_b],
                    dt,
                    block,
                    correction,
                };
                joint.compute_molecules(&ctx, &mut rows)
            };
            for notice in notices {
                output.notices.push((joint_id, notice));
            }
            if rows.is_empty() {
                continue;
            }
            output.metrics.joints_solved += 1;
            joint_units.push(ConstraintUnit::Joint { id: joint_id, rows });
        }

        // Row order within an iteration: contacts before joints by default.
        if solver_config.contacts_before_joints {
            units.extend(joint_units);
        } else {
            joint_units.extend(units);
            units = joint_units;
        }

        if units.is_empty() {
            return (output, None);
        }

        // Warm start once before iterating.
        if world_config.warm_starting {
            for unit in &units {
                unit.warm_start(&mut gather.solver_bodies);
            }
        } else {
            for unit in &mut units {
                unit.cold_start();
            }
        }

        match world_config.solver_kind {
            SolverKind::Threaded => self.iterate_threaded(
                &mut units,
                &mut gather.solver_bodies,
                solver_config.velocity_iterations,
            ),
            SolverKind::Basic | SolverKind::Normal | SolverKind::GenericBasic => {
                for _ in 0..solver_config.velocity_iterations {
                    for unit in &mut units {
                        unit.solve(&mut gather.solver_bodies);
                    }
                }
            }
        }

        // Commit impulses back to the persistent stores.
        for unit in &units {
            match unit {
                ConstraintUnit::Contact(group) => {
                    if let Some(contact) = contact_manager.get_mut(&group.key) {
                        group.commit(contact);
                        output.metrics.normal_impulse_sum +=
                            contact.manifold.total_normal_impulse();
                    }
                }
                ConstraintUnit::Joint { id, rows } => {
                    if let Some(joint) = joints.get_mut(*id) {
                        joint.commit(rows);
                        if joint.exceeded_max_impulse() {
                            output.exceeded_joints.push(*id);
                        }
                    }
                }
            }
        }

        // Collect rows for the post-integration position phase.
        let pending = if solver_config.position_correction
            == PositionCorrectionMode::PostStabilization
            || units.iter().any(unit_has_position_rows)
        {
            let (rows, blocks) = collect_position_rows(&units);
            if rows.is_empty() {
                None
            } else {
                let sources = gather
                    .sources
                    .iter()
                    .enumerate()
                    .map(|(index, source)| match source {
                        Some(body_id) => GatherSource::Body(*body_id),
                        None => {
                            let solver_body = &gather.solver_bodies[index];
                            GatherSource::Fixed(
                                crate::core::types::Transform::from_position_rotation(
                                    solver_body.position,
                                    solver_body.rotation,
                                ),
                            )
                        }
                    })
                    .collect();
                Some(PendingPositionSolve { rows, blocks, sources })
            }
        } else {
            None
        };

        output.metrics.islands_solved = 1;
        self.scatter_velocities(&gather, bodies);
        (output, pending)
    }

    /// Runs a deferred position solve against the post-integration state.
    ///
    /// Errors were measured before integration; advancing them by `dt`
    /// times the solved constraint velocity re-anchors them to the current
    /// transforms to first order.
    pub fn finish_position_solve(
        &mut self,
        pending: &mut PendingPositionSolve,
        bodies: &mut Arena<RigidBody>,
        solver_config: &SolverConfig,
        dt: f32,
    ) {
        let mut solver_bodies: Vec<SolverBody> = Vec::with_capacity(pending.sources.len());
        for source in &pending.sources {
            match source {
                GatherSource::Body(body_id) => match bodies.get(*body_id) {
                    Some(body) => solver_bodies.push(SolverBody::from_body(body)),
                    None => solver_bodies.push(SolverBody::fixed(
                        &crate::core::types::Transform::default(),
                    )),
                },
                GatherSource::Fixed(transform) => {
                    solver_bodies.push(SolverBody::fixed(transform))
                }
            }
        }

        for row in &mut pending.rows {
            let a = &solver_bodies[row.body_a];
            let b = &solver_bodies[row.body_b];
            row.error += dt * row.velocity_product(a, b);
        }

        self.position_solver.solve(
            &pending.rows,
            &pending.blocks,
            &mut solver_bodies,
            solver_config.position_iterations,
            solver_config.position_solve_kind,
        );

        // Scatter corrected poses back to the world bodies.
        for (source, solver_body) in pending.sources.iter().zip(&solver_bodies) {
            let GatherSource::Body(body_id) = source else { continue };
            if solver_body.is_immovable() {
                continue;
            }
            let Some(body) = bodies.get_mut(*body_id) else { continue };
            if solver_body.position != body.center_of_mass
                || solver_body.rotation != body.transform.rotation
            {
                body.center_of_mass = solver_body.position;
                body.transform.rotation = solver_body.rotation;
                body.inertia.update_world(solver_body.rotation);
                body.publish_transform();
            }
        }
    }

    fn iterate_threaded(
        &self,
        units: &mut [ConstraintUnit],
        solver_bodies: &mut Vec<SolverBody>,
        iterations: u32,
    ) {
        // Phases of body-disjoint batches: within a phase no dynamic body
        // appears in two batches, so batches solve in parallel; phases are
        // barriers.
        let mut phase_members: Vec<Vec<usize>> = Vec::new();
        let mut phase_bodies: Vec<Vec<bool>> = Vec::new();
        let body_count = solver_bodies.len();

        for (unit_index, unit) in units.iter().enumerate() {
            let touched = unit.dynamic_bodies(solver_bodies);
            let slot = phase_bodies
                .iter()
                .position(|used| touched.iter().all(|&i| !used[i]));
            let phase = match slot {
                Some(phase) => phase,
                None => {
                    phase_members.push(Vec::new());
                    phase_bodies.push(vec![false; body_count]);
                    phase_members.len() - 1
                }
            };
            for &i in &touched {
                phase_bodies[phase][i] = true;
            }
            phase_members[phase].push(unit_index);
        }

        for _ in 0..iterations {
            for members in &phase_members {
                solve_phase(units, members, solver_bodies);
            }
        }
    }

    fn scatter_velocities(&self, gather: &BodyGather, bodies: &mut Arena<RigidBody>) {
        for (index, source) in gather.sources.iter().enumerate() {
            let Some(body_id) = source else { continue };
            let solver_body = &gather.solver_bodies[index];
            if solver_body.is_immovable() {
                continue;
            }
            let Some(body) = bodies.get_mut(*body_id) else { continue };
            body.velocity.linear = solver_body.linear_velocity;
            body.velocity.angular = solver_body.angular_velocity;
        }
    }
}

fn unit_has_position_rows(unit: &ConstraintUnit) -> bool {
    match unit {
        ConstraintUnit::Contact(group) => group.points.iter().any(|p| p.normal.position_solve),
        ConstraintUnit::Joint { rows, .. } => rows.iter().any(|r| r.position_solve),
    }
}

/// Flattens every position-solve row, grouped per constraint for block
/// solving.
fn collect_position_rows(units: &[ConstraintUnit]) -> (Vec<ConstraintMolecule>, Vec<RowBlock>) {
    let mut rows = Vec::new();
    let mut blocks = Vec::new();
    for unit in units {
        let start = rows.len();
        match unit {
            ConstraintUnit::Contact(group) => {
                for point in &group.points {
                    if point.normal.position_solve {
                        rows.push(point.normal.clone());
                    }
                }
            }
            ConstraintUnit::Joint { rows: joint_rows, .. } => {
                for row in joint_rows {
                    if row.position_solve {
                        rows.push(row.clone());
                    }
                }
            }
        }
        let len = rows.len() - start;
        if len > 0 {
            blocks.push(RowBlock { start, len });
        }
    }
    (rows, blocks)
}

/// Solves one phase's batches, in parallel when the pool is available.
fn solve_phase(units: &mut [ConstraintUnit], members: &[usize], solver_bodies: &mut Vec<SolverBody>) {
    if members.len() <= THREADED_BATCH_SIZE {
        for &index in members {
            units[index].solve(solver_bodies);
        }
        return;
    }

    #[cfg(feature = "parallel")]
    {
        // Each batch works on a private copy of the body array and reports
        // back only the bodies it owns in this phase; disjointness makes the
        // merge conflict-free.
        let snapshot: Vec<SolverBody> = solver_bodies.clone();
        let mut batches: Vec<(Vec<usize>, Vec<&mut ConstraintUnit>)> = Vec::new();
        {
            let mut remaining: Vec<Option<&mut ConstraintUnit>> =
                units.iter_mut().map(Some).collect();
            for chunk in members.chunks(THREADED_BATCH_SIZE) {
                let mut chunk_units = Vec::new();
                for &index in chunk {
                    if let Some(unit) = remaining[index].take() {
                        chunk_units.push(unit);
                    }
                }
                batches.push((chunk.to_vec(), chunk_units));
            }
        }

        let updates: Vec<Vec<(usize, SolverBody)>> = batches
            .par_iter_mut()
            .map(|(_, chunk_units)| {
                let mut local = snapshot.clone();
                let mut touched = Vec::new();
                for unit in chunk_units.iter_mut() {
                    touched.extend(unit.dynamic_bodies(&local));
                    unit.solve(&mut local);
                }
                touched.sort_unstable();
                touched.dedup();
                touched
                    .into_iter()
                    .map(|index| (index, local[index].clone()))
                    .collect()
            })
            .collect();

        for update in updates {
            for (index, body) in update {
                solver_bodies[index] = body;
            }
        }
        return;
    }

    #[cfg(not(feature = "parallel"))]
    {
        for &index in members {
            units[index].solve(solver_bodies);
        }
    }
}
