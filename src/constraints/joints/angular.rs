//! Joint kinds built around angular locks: fixed-angle, revolute, weld's
//! angular fragment, universal, upright, gear, wheel, and the phy-gun.

use glam::{Quat, Vec3};

use super::linear::{anchor_geometry, anchor_rows};
use super::{make_row, primary_spring, Coordinate, Joint, JointContext};
use crate::constraints::atoms::{AnchorAtom, AngleAtom, AxisAtom, SpringAtom};
use crate::constraints::molecule::{ConstraintMolecule, Jacobian, RowKind};
use crate::utils::math::{orientation_error, orthonormal_basis};

/// Three angular rows locking the relative orientation to the reference
/// frames. Shared by fixed-angle, weld, and prismatic.
pub(super) fn angle_lock_rows(
    joint: &Joint,
    ctx: &JointContext,
    reference: &AngleAtom,
    base_atom: usize,
    out: &mut Vec<ConstraintMolecule>,
) {
    let error = reference.world_error(&ctx.frame_a.transform, &ctx.frame_b.transform);
    let spring = primary_spring(joint);
    for (offset, axis) in [Vec3::X, Vec3::Y, Vec3::Z].into_iter().enumerate() {
        out.push(make_row(
            joint,
            ctx,
            base_atom + offset,
            Jacobian::angular(axis),
            error.dot(axis),
            RowKind::Angular,
            spring,
        ));
    }
}

pub(super) fn fixed_angle(
    joint: &Joint,
    ctx: &JointContext,
    reference: &AngleAtom,
    base_atom: usize,
    out: &mut Vec<ConstraintMolecule>,
) {
    angle_lock_rows(joint, ctx, reference, base_atom, out);
}

/// Anchor lock plus two angular rows holding the hinge axes aligned. The
/// free rotation about the axis is the primary coordinate.
pub(super) fn revolute(
    joint: &Joint,
    ctx: &JointContext,
    anchors: &AnchorAtom,
    axes: &AxisAtom,
    _reference: &AngleAtom,
    out: &mut Vec<ConstraintMolecule>,
) {
    anchor_rows(joint, ctx, anchors, 0, out);

    let axis_a = (ctx.frame_a.transform.rotation * axes.local[0]).normalize_or_zero();
    let axis_b = (ctx.frame_b.transform.rotation * axes.local[1]).normalize_or_zero();
    let misalignment = axis_a.cross(axis_b);
    let (b1, b2) = orthonormal_basis(axis_a);
    for (offset, basis) in [b1, b2].into_iter().enumerate() {
        out.push(make_row(
            joint,
            ctx,
            3 + offset,
            Jacobian::angular(basis),
            misalignment.dot(basis),
            RowKind::Angular,
            None,
        ));
    }
}

/// The hinge rotation coordinate: angle about the world axis, measured from
/// the captured reference frames.
pub(super) fn hinge_coordinate(
    ctx: &JointContext,
    axes: &AxisAtom,
    reference: &AngleAtom,
) -> Coordinate {
    let axis = (ctx.frame_a.transform.rotation * axes.local[0]).normalize_or_zero();
    let error = reference.world_error(&ctx.frame_a.transform, &ctx.frame_b.transform);
    Coordinate {
        jacobian: Jacobian::angular(axis),
        value: error.dot(axis),
        kind: RowKind::Angular,
    }
}

/// Anchor lock plus one angular row keeping the two shaft axes
/// perpendicular; both bend directions stay free.
pub(super) fn universal(
    joint: &Joint,
    ctx: &JointContext,
    anchors: &AnchorAtom,
    axes: &AxisAtom,
    out: &mut Vec<ConstraintMolecule>,
) {
    anchor_rows(joint, ctx, anchors, 0, out);

    let axis_a = (ctx.frame_a.transform.rotation * axes.local[0]).normalize_or_zero();
    let axis_b = (ctx.frame_b.transform.rotation * axes.local[1]).normalize_or_zero();
    // d/dt (a . b) projects onto b x a.
    let row_axis = axis_b.cross(axis_a);
    let jacobian = if row_axis.length_squared() > 1e-10 {
        Jacobian::angular(row_axis.normalize())
    } else {
        // Axes collapsed parallel; pick any perpendicular to recover.
        let (fallback, _) = orthonormal_basis(axis_a);
        Jacobian::angular(fallback)
    };
    out.push(make_row(
        joint,
        ctx,
        3,
        jacobian,
        axis_a.dot(axis_b),
        RowKind::Angular,
        None,
    ));
}

/// Two angular rows keeping body A's local axis aligned with a world axis.
/// `axes.local[0]` is the body axis, `axes.local[1]` the world target.
pub(super) fn upright(
    joint: &Joint,
    ctx: &JointContext,
    axes: &AxisAtom,
    out: &mut Vec<ConstraintMolecule>,
) {
    let body_axis = (ctx.frame_a.transform.rotation * axes.local[0]).normalize_or_zero();
    let target = axes.local[1].normalize_or_zero();
    // Rotating A by +correction carries the body axis onto the target.
    let correction = body_axis.cross(target);

    let (b1, b2) = orthonormal_basis(target);
    let spring = primary_spring(joint);
    for (offset, basis) in [b1, b2].into_iter().enumerate() {
        let jacobian = Jacobian {
            linear_a: Vec3::ZERO,
            angular_a: basis,
            linear_b: Vec3::ZERO,
            angular_b: Vec3::ZERO,
        };
        out.push(make_row(
            joint,
            ctx,
            offset,
            jacobian,
            -correction.dot(basis),
            RowKind::Angular,
            spring,
        ));
    }
}

/// One velocity-level row coupling the angular rates of two bodies about
/// their local axes with a transmission ratio.
pub(super) fn gear(
    joint: &Joint,
    ctx: &JointContext,
    axes: &AxisAtom,
    ratio: f32,
    out: &mut Vec<ConstraintMolecule>,
) {
    let axis_a = (ctx.frame_a.transform.rotation * axes.local[0]).normalize_or_zero();
    let axis_b = (ctx.frame_b.transform.rotation * axes.local[1]).normalize_or_zero();
    let mut molecule = ConstraintMolecule {
        jacobian: Jacobian {
            linear_a: Vec3::ZERO,
            angular_a: axis_a * ratio,
            linear_b: Vec3::ZERO,
            angular_b: axis_b,
        },
        body_a: ctx.frame_a.index,
        body_b: ctx.frame_b.index,
        atom_index: 0,
        kind: RowKind::Angular,
        impulse: joint.atoms[0].impulse,
        min_impulse: f32::NEG_INFINITY,
        max_impulse: f32::INFINITY,
        ..Default::default()
    };
    molecule.compute_effective_mass(ctx.body_a, ctx.body_b);
    out.push(molecule);
}

/// Two hard rows perpendicular to the shock axis plus a soft axial row:
/// the wheel slides on its suspension and spins freely on its rolling axis.
pub(super) fn wheel(
    joint: &Joint,
    ctx: &JointContext,
    anchors: &AnchorAtom,
    shock_axes: &AxisAtom,
    _wheel_axes: &AxisAtom,
    shock_spring: SpringAtom,
    out: &mut Vec<ConstraintMolecule>,
) {
    let geometry = anchor_geometry(ctx, anchors);
    let axis = (ctx.frame_a.transform.rotation * shock_axes.local[0]).normalize_or_zero();
    let (v, w) = orthonormal_basis(axis);
    let ra = geometry.world_b - ctx.frame_a.center_of_mass;

    for (offset, perp) in [v, w].into_iter().enumerate() {
        let jacobian = Jacobian::linear(perp, ra, geometry.rb);
        out.push(make_row(
            joint,
            ctx,
            offset,
            jacobian,
            geometry.separation.dot(perp),
            RowKind::Linear,
            None,
        ));
    }

    // The shock: soft along the suspension axis.
    let spring = primary_spring(joint).unwrap_or(shock_spring);
    let jacobian = Jacobian::linear(axis, ra, geometry.rb);
    out.push(make_row(
        joint,
        ctx,
        2,
        jacobian,
        geometry.separation.dot(axis),
        RowKind::Linear,
        Some(spring),
    ));
}

/// The wheel's motor coordinate: rotation about the rolling axis on B.
pub(super) fn wheel_coordinate(
    ctx: &JointContext,
    _anchors: &AnchorAtom,
    _shock_axes: &AxisAtom,
    wheel_axes: &AxisAtom,
) -> Coordinate {
    let axis = (ctx.frame_b.transform.rotation * wheel_axes.local[1]).normalize_or_zero();
    Coordinate {
        jacobian: Jacobian::angular(axis),
        // Spin is unbounded; motors drive it, limits stay inert.
        value: 0.0,
        kind: RowKind::Angular,
    }
}

/// Six soft rows driving body A's pose toward a world target pose.
#[allow(clippy::too_many_arguments)]
pub(super) fn phy_gun(
    joint: &Joint,
    ctx: &JointContext,
    local_point: Vec3,
    target_position: Vec3,
    target_rotation: Quat,
    max_impulse: f32,
    out: &mut Vec<ConstraintMolecule>,
) {
    let grab = ctx.frame_a.transform.transform_point(local_point);
    let ra = grab - ctx.frame_a.center_of_mass;
    let offset = grab - target_position;
    let spring = primary_spring(joint).unwrap_or(SpringAtom {
        frequency_hz: 6.0,
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

    let error = orientation_error(target_rotation, ctx.frame_a.transform.rotation);
    for (index, axis) in [Vec3::X, Vec3::Y, Vec3::Z].into_iter().enumerate() {
        let mut molecule = make_row(
            joint,
            ctx,
            3 + index,
            Jacobian::angular_single(axis),
            error.dot(axis),
            RowKind::Angular,
            Some(spring),
        );
        molecule.set_limit(-max_impulse, max_impulse);
        out.push(molecule);
    }
}
