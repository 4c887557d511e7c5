//! Joint kinds whose hard rows are primarily linear: stick, position,
//! prismatic, pulley, relative-velocity, manipulator, and the shared
//! anchor-lock fragment reused by weld.

use glam::Vec3;

use super::{make_row, primary_spring, Coordinate, Joint, JointContext};
use crate::constraints::atoms::{AnchorAtom, AxisAtom, AngleAtom, SpringAtom};
use crate::constraints::molecule::{ConstraintMolecule, Jacobian, RowKind};
use crate::utils::math::orthonormal_basis;

/// World anchor points and center-of-mass offsets for a joint's anchors.
pub(super) struct AnchorGeometry {
    pub world_a: Vec3,
    pub world_b: Vec3,
    pub ra: Vec3,
    pub rb: Vec3,
    /// Separation from the anchor on A to the anchor on B.
    pub separation: Vec3,
}

pub(super) fn anchor_geometry(ctx: &JointContext, anchors: &AnchorAtom) -> AnchorGeometry {
    let world = anchors.to_world(&ctx.frame_a.transform, &ctx.frame_b.transform);
    AnchorGeometry {
        world_a: world.points[0],
        world_b: world.points[1],
        ra: world.points[0] - ctx.frame_a.center_of_mass,
        rb: world.points[1] - ctx.frame_b.center_of_mass,
        separation: world.point_difference(),
    }
}

/// Three linear rows locking the anchors together along the world basis.
/// Used by the position joint and as weld's linear fragment.
pub(super) fn anchor_rows(
    joint: &Joint,
    ctx: &JointContext,
    anchors: &AnchorAtom,
    base_atom: usize,
    out: &mut Vec<ConstraintMolecule>,
) {
    let geometry = anchor_geometry(ctx, anchors);
    let spring = primary_spring(joint);
    for (offset, axis) in [Vec3::X, Vec3::Y, Vec3::Z].into_iter().enumerate() {
        let jacobian = Jacobian::linear(axis, geometry.ra, geometry.rb);
        let error = geometry.separation.dot(axis);
        out.push(make_row(
            joint,
            ctx,
            base_atom + offset,
            jacobian,
            error,
            RowKind::Linear,
            spring,
        ));
    }
}

pub(super) fn position(
    joint: &Joint,
    ctx: &JointContext,
    anchors: &AnchorAtom,
    out: &mut Vec<ConstraintMolecule>,
) {
    anchor_rows(joint, ctx, anchors, 0, out);
}

pub(super) fn stick(
    joint: &Joint,
    ctx: &JointContext,
    anchors: &AnchorAtom,
    length: f32,
    out: &mut Vec<ConstraintMolecule>,
) {
    let coordinate = stick_coordinate(ctx, anchors, length);
    out.push(make_row(
        joint,
        ctx,
        0,
        coordinate.jacobian,
        coordinate.value,
        RowKind::Linear,
        primary_spring(joint),
    ));
}

pub(super) fn stick_coordinate(
    ctx: &JointContext,
    anchors: &AnchorAtom,
    length: f32,
) -> Coordinate {
    let geometry = anchor_geometry(ctx, anchors);
    let distance = geometry.separation.length();
    let axis = if distance > 1e-6 {
        geometry.separation / distance
    } else {
        Vec3::Y
    };
    Coordinate {
        jacobian: Jacobian::linear(axis, geometry.ra, geometry.rb),
        value: distance - length,
        kind: RowKind::Linear,
    }
}

/// The translation coordinate along a joint's free axis (prismatic, wheel
/// shock, linear-axis motors).
pub(super) fn axis_coordinate(
    ctx: &JointContext,
    anchors: &AnchorAtom,
    axes: &AxisAtom,
) -> Coordinate {
    let geometry = anchor_geometry(ctx, anchors);
    let axis = (ctx.frame_a.transform.rotation * axes.local[0]).normalize_or_zero();
    // Body A's lever arm reaches to the anchor on B so the row stays
    // consistent as the slider extends.
    let ra = geometry.world_b - ctx.frame_a.center_of_mass;
    Coordinate {
        jacobian: Jacobian::linear(axis, ra, geometry.rb),
        value: geometry.separation.dot(axis),
        kind: RowKind::Linear,
    }
}

pub(super) fn prismatic(
    joint: &Joint,
    ctx: &JointContext,
    anchors: &AnchorAtom,
    axes: &AxisAtom,
    reference: &AngleAtom,
    out: &mut Vec<ConstraintMolecule>,
) {
    let geometry = anchor_geometry(ctx, anchors);
    let axis = (ctx.frame_a.transform.rotation * axes.local[0]).normalize_or_zero();
    let (v, w) = orthonormal_basis(axis);
    let ra = geometry.world_b - ctx.frame_a.center_of_mass;

    // Two linear locks perpendicular to the slide axis.
    for (offset, perp) in [v, w].into_iter().enumerate() {
        let jacobian = Jacobian::linear(perp, ra, geometry.rb);
        let error = geometry.separation.dot(perp);
        out.push(make_row(joint, ctx, offset, jacobian, error, RowKind::Linear, None));
    }

    // Full angular lock keeps the slider from twisting.
    super::angular::angle_lock_rows(joint, ctx, reference, 2, out);
}

pub(super) fn pulley(
    joint: &Joint,
    ctx: &JointContext,
    anchors: &AnchorAtom,
    grounds: &[Vec3; 2],
    ratio: f32,
    total_length: f32,
    out: &mut Vec<ConstraintMolecule>,
) {
    let geometry = anchor_geometry(ctx, anchors);

    let rope_a = geometry.world_a - grounds[0];
    let rope_b = geometry.world_b - grounds[1];
    let len_a = rope_a.length();
    let len_b = rope_b.length();
    if len_a < 1e-6 || len_b < 1e-6 {
        return;
    }
    let dir_a = rope_a / len_a;
    let dir_b = rope_b / len_b;

    let error = len_a + ratio * len_b - total_length;
    let jacobian = Jacobian {
        linear_a: dir_a,
        angular_a: geometry.ra.cross(dir_a),
        linear_b: dir_b * ratio,
        angular_b: geometry.rb.cross(dir_b) * ratio,
    };
    let mut molecule = make_row(joint, ctx, 0, jacobian, error, RowKind::Linear, None);
    // A rope only pulls.
    molecule.set_limit(f32::NEG_INFINITY, 0.0);
    out.push(molecule);
}

#[allow(clippy::too_many_arguments)]
pub(super) fn relative_velocity(
    joint: &Joint,
    ctx: &JointContext,
    axes: &[Vec3; 3],
    target_speeds: &[f32; 3],
    max_impulses: &[f32; 3],
    active: &[bool; 3],
    out: &mut Vec<ConstraintMolecule>,
) {
    for index in 0..3 {
        if !active[index] {
            continue;
        }
        let axis = axes[index].normalize_or_zero();
        if axis == Vec3::ZERO {
            continue;
        }
        let mut molecule = ConstraintMolecule {
            jacobian: Jacobian {
                linear_a: -axis,
                angular_a: Vec3::ZERO,
                linear_b: axis,
                angular_b: Vec3::ZERO,
            },
            body_a: ctx.frame_a.index,
            body_b: ctx.frame_b.index,
            bias: -target_speeds[index],
            atom_index: index,
            kind: RowKind::Linear,
            impulse: joint.atoms[index].impulse,
            ..Default::default()
        };
        molecule.set_limit(-max_impulses[index], max_impulses[index]);
        molecule.compute_effective_mass(ctx.body_a, ctx.body_b);
        out.push(molecule);
    }
}

pub(super) fn manipulator(
    joint: &Joint,
    ctx: &JointContext,
    local_point: Vec3,
    target: Vec3,
    max_impulse: f32,
    out: &mut Vec<ConstraintMolecule>,
) {
    let grab = ctx.frame_a.transform.transform_point(local_point);
    let ra = grab - ctx.frame_a.center_of_mass;
    let offset = grab - target;
    let spring = primary_spring(joint).unwrap_or(SpringAtom {
        frequency_hz: 5.0,
        damping_ratio: 1.0,
    });

    for (index, axis) in [Vec3::X, Vec3::Y, Vec3::Z].into_iter().enumerate() {
        let jacobian = Jacobian {
            linear_a: axis,
            angular_a: ra.cross(axis),
            linear_b: Vec3::ZERO,
            angular_b: Vec3::ZERO,
        };
        let mut molecule = make_row(
            joint,
            ctx,
            index,
            jacobian,
            offset.dot(axis),
            RowKind::Linear,
            Some(spring),
        );
        molecule.set_limit(-max_impulse, max_impulse);
        out.push(molecule);
    }
}
