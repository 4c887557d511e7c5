//! The joint type library.
//!
//! Every joint composes the same atom primitives (anchors, axes, reference
//! angles) and differs only in which atoms are present and the shape of its
//! Jacobians. Per step a joint turns its atoms into constraint molecules;
//! after solving, accumulated impulses are committed back by atom index.
//!
//! Persistent row state lives in a fixed per-kind layout: the kind's hard
//! rows first, then one reserved motor slot and one reserved limit slot, so
//! warm-start data survives sidecars toggling on and off.

mod angular;
mod linear;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use bitflags::bitflags;

use super::atoms::{AnchorAtom, AngleAtom, AxisAtom, ConstraintAtom, SpringAtom};
use super::molecule::{ConstraintMolecule, Jacobian, RowKind, SolverBody};
use super::sidecars::{JointConfigOverride, JointLimit, JointMotor, JointSpring, LimitState};
use crate::config::{ConstraintConfigBlock, PositionCorrectionMode};
use crate::core::types::Transform;
use crate::utils::allocator::ColliderId;
use crate::utils::math::soft_constraint;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct JointFlags: u8 {
        const ON_ISLAND = 1 << 0;
        const GHOST = 1 << 1;
        /// A joint is valid when both endpoints resolve to live colliders.
        const VALID = 1 << 2;
        const ACTIVE = 1 << 3;
        const SENDS_EVENTS = 1 << 4;
        /// Delete the joint when a row reaches the max impulse.
        const AUTO_SNAPS = 1 << 5;
        const COLLIDE_CONNECTED = 1 << 6;
    }
}

/// Stable identifier of a joint type, used to key solver config blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JointKindId {
    Stick,
    Position,
    FixedAngle,
    Weld,
    Prismatic,
    Revolute,
    Wheel,
    Gear,
    Pulley,
    Universal,
    Upright,
    RelativeVelocity,
    Manipulator,
    PhyGun,
    LinearAxis,
    Custom,
}

/// A user-authored constraint row for [`JointKind::Custom`]. Exposes the
/// Jacobian, error, impulse bounds, softness, and position-solve flag
/// directly so bespoke constraints need no changes to the core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomRow {
    pub linear_a: Vec3,
    pub angular_a: Vec3,
    pub linear_b: Vec3,
    pub angular_b: Vec3,
    pub error: f32,
    pub min_impulse: f32,
    pub max_impulse: f32,
    pub spring: Option<SpringAtom>,
    pub position_solve: bool,
    pub angular: bool,
}

impl CustomRow {
    pub fn free() -> Self {
        Self {
            min_impulse: f32::NEG_INFINITY,
            max_impulse: f32::INFINITY,
            ..Self::default()
        }
    }
}

/// The tagged payload of each joint type: which atoms it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JointKind {
    /// Keeps two anchor points at a fixed distance (a massless rod).
    Stick { anchors: AnchorAtom, length: f32 },
    /// Locks two anchor points together, leaving rotation free.
    Position { anchors: AnchorAtom },
    /// Locks relative orientation, leaving translation free.
    FixedAngle { reference: AngleAtom },
    /// Locks both anchors and orientation: a rigid connection.
    Weld {
        anchors: AnchorAtom,
        reference: AngleAtom,
    },
    /// One translational degree of freedom along an axis.
    Prismatic {
        anchors: AnchorAtom,
        axes: AxisAtom,
        reference: AngleAtom,
    },
    /// One rotational degree of freedom about an axis (a hinge).
    Revolute {
        anchors: AnchorAtom,
        axes: AxisAtom,
        reference: AngleAtom,
    },
    /// Suspension shock along one axis plus a free rolling axis.
    Wheel {
        anchors: AnchorAtom,
        shock_axes: AxisAtom,
        wheel_axes: AxisAtom,
        shock_spring: SpringAtom,
    },
    /// Couples the angular rates of two bodies about local axes.
    Gear { axes: AxisAtom, ratio: f32 },
    /// A rope through two ground pulleys with a transmission ratio.
    Pulley {
        anchors: AnchorAtom,
        grounds: [Vec3; 2],
        ratio: f32,
        total_length: f32,
    },
    /// Anchor lock plus one angular lock: two bent rotation axes stay
    /// perpendicular (a drive shaft coupling).
    Universal { anchors: AnchorAtom, axes: AxisAtom },
    /// Keeps a body's local axis aligned with a world axis.
    Upright { axes: AxisAtom },
    /// Drives the relative linear velocity along up to three world axes.
    RelativeVelocity {
        axes: [Vec3; 3],
        target_speeds: [f32; 3],
        max_impulses: [f32; 3],
        active: [bool; 3],
    },
    /// Pulls a grab point on one body toward a world target.
    Manipulator {
        local_point: Vec3,
        target: Vec3,
        max_impulse: f32,
    },
    /// Drives one body's full pose toward a world target pose.
    PhyGun {
        local_point: Vec3,
        target_position: Vec3,
        target_rotation: Quat,
        max_impulse: f32,
    },
    /// Motor-only translation along a single axis; applies no positional
    /// lock on its own.
    LinearAxis { axes: AxisAtom },
    /// Rows supplied by user code through the custom-joint hook.
    Custom { rows: Vec<CustomRow> },
}

impl JointKind {
    pub fn id(&self) -> JointKindId {
        match self {
            JointKind::Stick { .. } => JointKindId::Stick,
            JointKind::Position { .. } => JointKindId::Position,
            JointKind::FixedAngle { .. } => JointKindId::FixedAngle,
            JointKind::Weld { .. } => JointKindId::Weld,
            JointKind::Prismatic { .. } => JointKindId::Prismatic,
            JointKind::Revolute { .. } => JointKindId::Revolute,
            JointKind::Wheel { .. } => JointKindId::Wheel,
            JointKind::Gear { .. } => JointKindId::Gear,
            JointKind::Pulley { .. } => JointKindId::Pulley,
            JointKind::Universal { .. } => JointKindId::Universal,
            JointKind::Upright { .. } => JointKindId::Upright,
            JointKind::RelativeVelocity { .. } => JointKindId::RelativeVelocity,
            JointKind::Manipulator { .. } => JointKindId::Manipulator,
            JointKind::PhyGun { .. } => JointKindId::PhyGun,
            JointKind::LinearAxis { .. } => JointKindId::LinearAxis,
            JointKind::Custom { .. } => JointKindId::Custom,
        }
    }

    /// Number of always-present hard rows for this kind.
    pub fn hard_row_count(&self) -> usize {
        match self {
            JointKind::Stick { .. } => 1,
            JointKind::Position { .. } => 3,
            JointKind::FixedAngle { .. } => 3,
            JointKind::Weld { .. } => 6,
            JointKind::Prismatic { .. } => 5,
            JointKind::Revolute { .. } => 5,
            JointKind::Wheel { .. } => 3,
            JointKind::Gear { .. } => 1,
            JointKind::Pulley { .. } => 1,
            JointKind::Universal { .. } => 4,
            JointKind::Upright { .. } => 2,
            JointKind::RelativeVelocity { .. } => 3,
            JointKind::Manipulator { .. } => 3,
            JointKind::PhyGun { .. } => 6,
            JointKind::LinearAxis { .. } => 0,
            JointKind::Custom { rows } => rows.len(),
        }
    }
}

/// World-space data for one joint endpoint during assembly.
#[derive(Debug, Clone, Copy)]
pub struct JointFrame {
    pub transform: Transform,
    pub center_of_mass: Vec3,
    /// Index into the island's solver-body array.
    pub index: usize,
}

/// Everything assembly needs about the two endpoints and the step.
pub struct JointContext<'a> {
    pub frame_a: JointFrame,
    pub frame_b: JointFrame,
    pub body_a: &'a SolverBody,
    pub body_b: &'a SolverBody,
    pub dt: f32,
    pub block: ConstraintConfigBlock,
    pub correction: PositionCorrectionMode,
}

/// Noteworthy transitions surfaced during assembly, turned into events by
/// the world after the solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointNotice {
    LowerLimitReached,
    UpperLimitReached,
}

/// The primary scalar coordinate of a joint (hinge angle, slide distance,
/// rope length). Motors, limits, and springs act on it.
pub(crate) struct Coordinate {
    pub jacobian: Jacobian,
    pub value: f32,
    pub kind: RowKind,
}

/// A persistent constraint declared between two colliders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Joint {
    pub colliders: [ColliderId; 2],
    pub kind: JointKind,
    pub flags: JointFlags,
    /// Breakage threshold; a row's accumulated impulse beyond this raises
    /// the exceeded-impulse event (and snaps the joint when AUTO_SNAPS).
    pub max_impulse: f32,
    /// Persistent per-row state, laid out as hard rows + motor + limit.
    pub atoms: Vec<ConstraintAtom>,

    pub limit: Option<JointLimit>,
    pub motor: Option<JointMotor>,
    pub spring: Option<JointSpring>,
    pub config: Option<JointConfigOverride>,

    #[serde(skip)]
    pub limit_state: LimitState,
}

impl Joint {
    pub fn new(collider_a: ColliderId, collider_b: ColliderId, kind: JointKind) -> Self {
        let atom_count = kind.hard_row_count() + 2;
        Self {
            colliders: [collider_a, collider_b],
            kind,
            flags: JointFlags::VALID | JointFlags::ACTIVE | JointFlags::SENDS_EVENTS,
            max_impulse: f32::INFINITY,
            atoms: vec![ConstraintAtom::default(); atom_count],
            limit: None,
            motor: None,
            spring: None,
            config: None,
            limit_state: LimitState::Inactive,
        }
    }

    pub fn with_limit(mut self, limit: JointLimit) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_motor(mut self, motor: JointMotor) -> Self {
        self.motor = Some(motor);
        self
    }

    pub fn with_spring(mut self, spring: JointSpring) -> Self {
        self.spring = Some(spring);
        self
    }

    pub fn with_max_impulse(mut self, max_impulse: f32) -> Self {
        self.max_impulse = max_impulse;
        self
    }

    pub fn with_collide_connected(mut self, collide: bool) -> Self {
        self.flags.set(JointFlags::COLLIDE_CONNECTED, collide);
        self
    }

    pub fn is_solvable(&self) -> bool {
        self.flags.contains(JointFlags::VALID | JointFlags::ACTIVE)
    }

    /// The slot index reserved for the motor row.
    fn motor_slot(&self) -> usize {
        self.kind.hard_row_count()
    }

    /// The slot index reserved for the limit row.
    fn limit_slot(&self) -> usize {
        self.kind.hard_row_count() + 1
    }

    /// Returns the colliders as graph-edge endpoints.
    pub fn other_collider(&self, collider: ColliderId) -> Option<ColliderId> {
        if self.colliders[0] == collider {
            Some(self.colliders[1])
        } else if self.colliders[1] == collider {
            Some(self.colliders[0])
        } else {
            None
        }
    }

    /// The local anchor points, for kinds that carry an anchor atom.
    pub fn local_anchors(&self) -> Option<[Vec3; 2]> {
        self.anchor_atom().map(|a| a.local)
    }

    /// The anchors transformed into world space through the endpoint frames.
    pub fn world_anchors(&self, a: &Transform, b: &Transform) -> Option<[Vec3; 2]> {
        self.anchor_atom().map(|atom| atom.to_world(a, b).points)
    }

    pub fn set_local_anchor(&mut self, endpoint: usize, point: Vec3) {
        if endpoint < 2 {
            if let Some(atom) = self.anchor_atom_mut() {
                atom.local[endpoint] = point;
            }
        }
    }

    /// The local axes, for kinds that carry an axis atom.
    pub fn local_axes(&self) -> Option<[Vec3; 2]> {
        self.axis_atom().map(|a| a.local)
    }

    /// The axes rotated into world space through the endpoint frames.
    pub fn world_axes(&self, a: &Transform, b: &Transform) -> Option<[Vec3; 2]> {
        self.axis_atom().map(|atom| atom.to_world(a, b).axes)
    }

    /// The local reference frames, for kinds that lock an angle.
    pub fn reference_angles(&self) -> Option<[Quat; 2]> {
        match &self.kind {
            JointKind::FixedAngle { reference }
            | JointKind::Weld { reference, .. }
            | JointKind::Prismatic { reference, .. }
            | JointKind::Revolute { reference, .. } => Some(reference.local),
            _ => None,
        }
    }

    fn anchor_atom(&self) -> Option<&AnchorAtom> {
        match &self.kind {
            JointKind::Stick { anchors, .. }
            | JointKind::Position { anchors }
            | JointKind::Weld { anchors, .. }
            | JointKind::Prismatic { anchors, .. }
            | JointKind::Revolute { anchors, .. }
            | JointKind::Wheel { anchors, .. }
            | JointKind::Pulley { anchors, .. }
            | JointKind::Universal { anchors, .. } => Some(anchors),
            _ => None,
        }
    }

    fn anchor_atom_mut(&mut self) -> Option<&mut AnchorAtom> {
        match &mut self.kind {
            JointKind::Stick { anchors, .. }
            | JointKind::Position { anchors }
            | JointKind::Weld { anchors, .. }
            | JointKind::Prismatic { anchors, .. }
            | JointKind::Revolute { anchors, .. }
            | JointKind::Wheel { anchors, .. }
            | JointKind::Pulley { anchors, .. }
            | JointKind::Universal { anchors, .. } => Some(anchors),
            _ => None,
        }
    }

    fn axis_atom(&self) -> Option<&AxisAtom> {
        match &self.kind {
            JointKind::Prismatic { axes, .. }
            | JointKind::Revolute { axes, .. }
            | JointKind::Gear { axes, .. }
            | JointKind::Universal { axes, .. }
            | JointKind::Upright { axes }
            | JointKind::LinearAxis { axes } => Some(axes),
            JointKind::Wheel { shock_axes, .. } => Some(shock_axes),
            _ => None,
        }
    }

    /// Builds this step's molecules. Hard rows come from the kind; motor,
    /// limit, and spring sidecars attach to the kind's primary coordinate.
    pub fn compute_molecules(
        &mut self,
        ctx: &JointContext,
        out: &mut Vec<ConstraintMolecule>,
    ) -> Vec<JointNotice> {
        // Custom rows are resized by user code between steps.
        if let JointKind::Custom { rows } = &self.kind {
            let wanted = rows.len() + 2;
            if self.atoms.len() != wanted {
                self.atoms.resize(wanted, ConstraintAtom::default());
            }
        }

        let start = out.len();
        match &self.kind {
            JointKind::Stick { anchors, length } => {
                linear::stick(self, ctx, anchors, *length, out)
            }
            JointKind::Position { anchors } => linear::position(self, ctx, anchors, out),
            JointKind::FixedAngle { reference } => {
                angular::fixed_angle(self, ctx, reference, 0, out)
            }
            JointKind::Weld { anchors, reference } => {
                linear::anchor_rows(self, ctx, anchors, 0, out);
                angular::fixed_angle(self, ctx, reference, 3, out);
            }
            JointKind::Prismatic { anchors, axes, reference } => {
                linear::prismatic(self, ctx, anchors, axes, reference, out)
            }
            JointKind::Revolute { anchors, axes, reference } => {
                angular::revolute(self, ctx, anchors, axes, reference, out)
            }
            JointKind::Wheel { anchors, shock_axes, wheel_axes, shock_spring } => {
                angular::wheel(self, ctx, anchors, shock_axes, wheel_axes, *shock_spring, out)
            }
            JointKind::Gear { axes, ratio } => angular::gear(self, ctx, axes, *ratio, out),
            JointKind::Pulley { anchors, grounds, ratio, total_length } => {
                linear::pulley(self, ctx, anchors, grounds, *ratio, *total_length, out)
            }
            JointKind::Universal { anchors, axes } => {
                angular::universal(self, ctx, anchors, axes, out)
            }
            JointKind::Upright { axes } => angular::upright(self, ctx, axes, out),
            JointKind::RelativeVelocity { axes, target_speeds, max_impulses, active } => {
                linear::relative_velocity(self, ctx, axes, target_speeds, max_impulses, active, out)
            }
            JointKind::Manipulator { local_point, target, max_impulse } => {
                linear::manipulator(self, ctx, *local_point, *target, *max_impulse, out)
            }
            JointKind::PhyGun { local_point, target_position, target_rotation, max_impulse } => {
                angular::phy_gun(
                    self,
                    ctx,
                    *local_point,
                    *target_position,
                    *target_rotation,
                    *max_impulse,
                    out,
                )
            }
            JointKind::LinearAxis { .. } => {}
            JointKind::Custom { rows } => {
                for (index, row) in rows.iter().enumerate() {
                    let jacobian = Jacobian {
                        linear_a: row.linear_a,
                        angular_a: row.angular_a,
                        linear_b: row.linear_b,
                        angular_b: row.angular_b,
                    };
                    let kind = if row.angular { RowKind::Angular } else { RowKind::Linear };
                    let mut molecule = make_row(self, ctx, index, jacobian, row.error, kind, row.spring);
                    molecule.set_limit(row.min_impulse, row.max_impulse);
                    molecule.position_solve = row.position_solve
                        && ctx.correction == PositionCorrectionMode::PostStabilization;
                    out.push(molecule);
                }
            }
        }
        debug_assert!(out.len() - start <= self.atoms.len());

        let mut notices = Vec::new();
        if let Some(coordinate) = self.primary_coordinate(ctx) {
            self.push_motor_row(ctx, &coordinate, out);
            self.push_limit_row(ctx, &coordinate, out, &mut notices);
        }
        notices
    }

    /// The coordinate motors/limits/springs act on, when the kind has one.
    fn primary_coordinate(&self, ctx: &JointContext) -> Option<Coordinate> {
        match &self.kind {
            JointKind::Stick { anchors, length } => {
                Some(linear::stick_coordinate(ctx, anchors, *length))
            }
            JointKind::Prismatic { anchors, axes, .. } => {
                Some(linear::axis_coordinate(ctx, anchors, axes))
            }
            JointKind::LinearAxis { axes } => {
                let anchors = AnchorAtom::default();
                Some(linear::axis_coordinate(ctx, &anchors, axes))
            }
            JointKind::Revolute { axes, reference, .. } => {
                Some(angular::hinge_coordinate(ctx, axes, reference))
            }
            JointKind::Wheel { anchors, shock_axes, wheel_axes, .. } => Some(
                angular::wheel_coordinate(ctx, anchors, shock_axes, wheel_axes),
            ),
            _ => None,
        }
    }

    fn push_motor_row(
        &self,
        ctx: &JointContext,
        coordinate: &Coordinate,
        out: &mut Vec<ConstraintMolecule>,
    ) {
        let Some(motor) = self.motor.filter(|m| m.active) else {
            return;
        };
        let mut molecule = ConstraintMolecule {
            jacobian: coordinate.jacobian,
            body_a: ctx.frame_a.index,
            body_b: ctx.frame_b.index,
            bias: -motor.effective_speed(),
            atom_index: self.motor_slot(),
            kind: coordinate.kind,
            impulse: self.atoms[self.motor_slot()].impulse,
            ..Default::default()
        };
        molecule.set_limit(-motor.max_impulse, motor.max_impulse);
        molecule.compute_effective_mass(ctx.body_a, ctx.body_b);
        out.push(molecule);
    }

    fn push_limit_row(
        &mut self,
        ctx: &JointContext,
        coordinate: &Coordinate,
        out: &mut Vec<ConstraintMolecule>,
        notices: &mut Vec<JointNotice>,
    ) {
        let Some(limit) = self.limit.filter(|l| l.active) else {
            self.limit_state = LimitState::Inactive;
            return;
        };

        let value = coordinate.value;
        let new_state = if value <= limit.min {
            LimitState::AtLower
        } else if value >= limit.max {
            LimitState::AtUpper
        } else {
            LimitState::Inactive
        };

        if new_state != self.limit_state {
            match new_state {
                LimitState::AtLower => notices.push(JointNotice::LowerLimitReached),
                LimitState::AtUpper => notices.push(JointNotice::UpperLimitReached),
                LimitState::Inactive => {}
            }
        }
        self.limit_state = new_state;

        if new_state == LimitState::Inactive {
            // The atom goes inactive; drop its stored impulse so warm
            // starting doesn't reapply a stale limit push.
            let slot = self.limit_slot();
            self.atoms[slot] = ConstraintAtom::default();
            return;
        }

        let error = match new_state {
            LimitState::AtLower => value - limit.min,
            LimitState::AtUpper => value - limit.max,
            LimitState::Inactive => unreachable!(),
        };

        let slot = self.limit_slot();
        let mut molecule = make_row(self, ctx, slot, coordinate.jacobian, error, coordinate.kind, None);
        match new_state {
            // Below the minimum only pushes (positive impulse), above the
            // maximum only pulls.
            LimitState::AtLower => molecule.set_limit(0.0, f32::INFINITY),
            LimitState::AtUpper => molecule.set_limit(f32::NEG_INFINITY, 0.0),
            LimitState::Inactive => unreachable!(),
        }
        out.push(molecule);
    }

    /// Writes solved impulses and errors back into the persistent atoms.
    pub fn commit(&mut self, molecules: &[ConstraintMolecule]) {
        for molecule in molecules {
            if let Some(atom) = self.atoms.get_mut(molecule.atom_index) {
                atom.impulse = molecule.impulse;
                atom.error = molecule.error;
            }
        }
    }

    /// Whether any committed row exceeded the joint's impulse budget.
    pub fn exceeded_max_impulse(&self) -> bool {
        self.max_impulse.is_finite()
            && self
                .atoms
                .iter()
                .any(|atom| atom.impulse.abs() > self.max_impulse)
    }
}

/// Shared row construction: effective mass, Baumgarte or soft bias, caps,
/// and warm-start impulse from the joint's atom storage.
pub(crate) fn make_row(
    joint: &Joint,
    ctx: &JointContext,
    atom_index: usize,
    jacobian: Jacobian,
    error: f32,
    kind: RowKind,
    spring: Option<SpringAtom>,
) -> ConstraintMolecule {
    let block = joint.config.map(|c| c.block).unwrap_or(ctx.block);
    let mut molecule = ConstraintMolecule {
        jacobian,
        body_a: ctx.frame_a.index,
        body_b: ctx.frame_b.index,
        error,
        atom_index,
        kind,
        impulse: joint.atoms.get(atom_index).map_or(0.0, |a| a.impulse),
        min_impulse: f32::NEG_INFINITY,
        max_impulse: f32::INFINITY,
        ..Default::default()
    };
    molecule.compute_effective_mass(ctx.body_a, ctx.body_b);

    if let Some(spring) = spring {
        let soft = soft_constraint(
            spring.frequency_hz,
            spring.damping_ratio,
            molecule.effective_mass,
            ctx.dt,
        );
        molecule.gamma = soft.gamma;
        molecule.bias = soft.bias_scale * error;
        molecule.compute_effective_mass(ctx.body_a, ctx.body_b);
        return molecule;
    }

    let (baumgarte, cap) = match kind {
        RowKind::Linear => (block.linear_baumgarte, block.linear_error_correction),
        RowKind::Angular => (block.angular_baumgarte, block.angular_error_correction),
    };
    molecule.correction_cap = cap;

    match ctx.correction {
        PositionCorrectionMode::Baumgarte => {
            molecule.bias = baumgarte * error.clamp(-cap, cap) / ctx.dt;
        }
        PositionCorrectionMode::PostStabilization => {
            molecule.bias = 0.0;
            molecule.position_solve = true;
        }
    }
    molecule
}

/// The spring sidecar applied to a joint's primary hard rows, when present.
pub(crate) fn primary_spring(joint: &Joint) -> Option<SpringAtom> {
    joint.spring.map(|s| SpringAtom {
        frequency_hz: s.frequency_hz,
        damping_ratio: s.damping_ratio,
    })
}
