//! Shape-vs-shape intersection producing raw contact manifolds.
//!
//! The pipeline treats this module as a black box: colliding pairs go in,
//! world-space manifold points come out. The normal always points from the
//! first collider toward the second.

use glam::Vec3;

use crate::collision::clipping::{clip_polygon, rectangle_planes};
use crate::config::MAX_MANIFOLD_POINTS;
use crate::core::collider::{Collider, ColliderShape};
use crate::core::types::Transform;
use crate::warn_once;

/// One world-space contact candidate before persistence.
#[derive(Debug, Clone, Copy)]
pub struct RawContactPoint {
    pub world_point: Vec3,
    pub depth: f32,
}

/// Raw per-frame manifold between an ordered collider pair.
#[derive(Debug, Clone)]
pub struct RawManifold {
    /// Unit normal from the first collider toward the second.
    pub normal: Vec3,
    pub points: Vec<RawContactPoint>,
}

impl RawManifold {
    fn single(normal: Vec3, world_point: Vec3, depth: f32) -> Self {
        Self {
            normal,
            points: vec![RawContactPoint { world_point, depth }],
        }
    }

    fn flipped(mut self) -> Self {
        self.normal = -self.normal;
        self
    }
}

/// Intersects two colliders, returning a manifold when they touch.
pub fn collide(a: &Collider, b: &Collider) -> Option<RawManifold> {
    if a.dormant || b.dormant {
        return None;
    }
    collide_shapes(
        &a.shape,
        &a.world_transform,
        &b.shape,
        &b.world_transform,
    )
}

fn collide_shapes(
    shape_a: &ColliderShape,
    ta: &Transform,
    shape_b: &ColliderShape,
    tb: &Transform,
) -> Option<RawManifold> {
    use ColliderShape::*;
    match (shape_a, shape_b) {
        (Sphere { radius: ra }, Sphere { radius: rb }) => {
            sphere_sphere(ta.position, scaled(*ra, ta), tb.position, scaled(*rb, tb))
        }
        (Sphere { radius }, Plane { normal }) => {
            sphere_plane(ta.position, scaled(*radius, ta), plane_world(normal, tb))
                .map(RawManifold::flipped)
        }
        (Plane { normal }, Sphere { radius }) => {
            sphere_plane(tb.position, scaled(*radius, tb), plane_world(normal, ta))
        }
        (Box { half_extents }, Plane { normal }) => {
            box_plane(*half_extents, ta, plane_world(normal, tb)).map(RawManifold::flipped)
        }
        (Plane { normal }, Box { half_extents }) => {
            box_plane(*half_extents, tb, plane_world(normal, ta))
        }
        (Sphere { radius }, Box { half_extents }) => {
            sphere_box(ta.position, scaled(*radius, ta), *half_extents, tb)
        }
        (Box { half_extents }, Sphere { radius }) => {
            sphere_box(tb.position, scaled(*radius, tb), *half_extents, ta)
                .map(RawManifold::flipped)
        }
        (Box { half_extents: ha }, Box { half_extents: hb }) => box_box(*ha, ta, *hb, tb),
        (Capsule { radius, height }, Plane { normal }) => {
            capsule_plane(scaled(*radius, ta), *height, ta, plane_world(normal, tb))
                .map(RawManifold::flipped)
        }
        (Plane { normal }, Capsule { radius, height }) => {
            capsule_plane(scaled(*radius, tb), *height, tb, plane_world(normal, ta))
        }
        (Capsule { radius, height }, Sphere { radius: rb }) => {
            let center = closest_on_capsule_axis(ta, *height, tb.position);
            sphere_sphere(center, scaled(*radius, ta), tb.position, scaled(*rb, tb))
        }
        (Sphere { radius: ra }, Capsule { radius, height }) => {
            let center = closest_on_capsule_axis(tb, *height, ta.position);
            sphere_sphere(ta.position, scaled(*ra, ta), center, scaled(*radius, tb))
        }
        (Capsule { radius: ra, height: ha }, Capsule { radius: rb, height: hb }) => {
            capsule_capsule(scaled(*ra, ta), *ha, ta, scaled(*rb, tb), *hb, tb)
        }
        (Capsule { radius, height }, Box { half_extents }) => {
            let center = closest_on_capsule_axis(ta, *height, tb.position);
            sphere_box(center, scaled(*radius, ta), *half_extents, tb)
        }
        (Box { half_extents }, Capsule { radius, height }) => {
            let center = closest_on_capsule_axis(tb, *height, ta.position);
            sphere_box(center, scaled(*radius, tb), *half_extents, ta)
                .map(RawManifold::flipped)
        }
        // Cylinders intersect as capsules of the same dimensions.
        (Cylinder { radius, height }, _) => collide_shapes(
            &Capsule { radius: *radius, height: *height },
            ta,
            shape_b,
            tb,
        ),
        (_, Cylinder { radius, height }) => collide_shapes(
            shape_a,
            ta,
            &Capsule { radius: *radius, height: *height },
            tb,
        ),
        _ => {
            warn_once!("narrow phase has no routine for this shape pair; contact skipped");
            None
        }
    }
}

fn scaled(radius: f32, transform: &Transform) -> f32 {
    radius * transform.scale.abs().max_element()
}

/// A world plane as (unit normal, signed offset from origin).
fn plane_world(local_normal: &Vec3, transform: &Transform) -> (Vec3, f32) {
    let normal = (transform.rotation * *local_normal).normalize_or_zero();
    (normal, normal.dot(transform.position))
}

fn sphere_sphere(ca: Vec3, ra: f32, cb: Vec3, rb: f32) -> Option<RawManifold> {
    let delta = cb - ca;
    let distance_sq = delta.length_squared();
    let total = ra + rb;
    if distance_sq >= total * total {
        return None;
    }
    let distance = distance_sq.sqrt();
    let normal = if distance > 1e-6 { delta / distance } else { Vec3::Y };
    let depth = total - distance;
    let point = ca + normal * (ra - depth * 0.5);
    Some(RawManifold::single(normal, point, depth))
}

/// Manifold normal points from the plane toward the sphere.
fn sphere_plane(center: Vec3, radius: f32, (normal, offset): (Vec3, f32)) -> Option<RawManifold> {
    let distance = normal.dot(center) - offset;
    if distance >= radius {
        return None;
    }
    let depth = radius - distance;
    let point = center - normal * distance;
    Some(RawManifold::single(normal, point, depth))
}

fn box_plane(
    half_extents: Vec3,
    transform: &Transform,
    (normal, offset): (Vec3, f32),
) -> Option<RawManifold> {
    let he = half_extents * transform.scale.abs();
    let mut points = Vec::new();
    for sx in [-1.0, 1.0] {
        for sy in [-1.0, 1.0] {
            for sz in [-1.0, 1.0] {
                let local = Vec3::new(sx * he.x, sy * he.y, sz * he.z);
                let world = transform.position + transform.rotation * local;
                let distance = normal.dot(world) - offset;
                if distance < 0.0 {
                    points.push(RawContactPoint {
                        world_point: world,
                        depth: -distance,
                    });
                }
            }
        }
    }
    if points.is_empty() {
        return None;
    }
    // Keep the deepest corners; persistence trims to four by area anyway.
    points.sort_by(|a, b| b.depth.partial_cmp(&a.depth).unwrap_or(std::cmp::Ordering::Equal));
    points.truncate(MAX_MANIFOLD_POINTS);
    Some(RawManifold { normal, points })
}

fn sphere_box(
    center: Vec3,
    radius: f32,
    half_extents: Vec3,
    box_transform: &Transform,
) -> Option<RawManifold> {
    let he = half_extents * box_transform.scale.abs();
    let local_center = box_transform.rotation.conjugate() * (center - box_transform.position);
    let clamped = local_center.clamp(-he, he);

    let delta = local_center - clamped;
    let distance_sq = delta.length_squared();

    if distance_sq > 1e-12 {
        if distance_sq >= radius * radius {
            return None;
        }
        let distance = distance_sq.sqrt();
        let local_normal = delta / distance;
        let normal = box_transform.rotation * -local_normal;
        let world_point = box_transform.position + box_transform.rotation * clamped;
        Some(RawManifold::single(normal, world_point, radius - distance))
    } else {
        // Sphere center inside the box: push out along the shallowest face.
        let distances = he - local_center.abs();
        let (axis, face_depth) = [(0, distances.x), (1, distances.y), (2, distances.z)]
            .into_iter()
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        let mut local_normal = Vec3::ZERO;
        local_normal[axis] = -local_center[axis].signum();
        if local_normal == Vec3::ZERO {
            local_normal[axis] = -1.0;
        }
        let normal = box_transform.rotation * local_normal;
        Some(RawManifold::single(normal, center, face_depth + radius))
    }
}

fn capsule_segment(transform: &Transform, height: f32) -> (Vec3, Vec3) {
    let half = height * 0.5 * transform.scale.y.abs();
    let axis = transform.rotation * Vec3::Y;
    (
        transform.position - axis * half,
        transform.position + axis * half,
    )
}

fn closest_on_capsule_axis(transform: &Transform, height: f32, point: Vec3) -> Vec3 {
    let (start, end) = capsule_segment(transform, height);
    closest_point_on_segment(start, end, point)
}

fn closest_point_on_segment(start: Vec3, end: Vec3, point: Vec3) -> Vec3 {
    let segment = end - start;
    let length_sq = segment.length_squared();
    if length_sq < 1e-12 {
        return start;
    }
    let t = ((point - start).dot(segment) / length_sq).clamp(0.0, 1.0);
    start + segment * t
}

fn capsule_plane(
    radius: f32,
    height: f32,
    transform: &Transform,
    plane: (Vec3, f32),
) -> Option<RawManifold> {
    let (start, end) = capsule_segment(transform, height);
    let mut manifold: Option<RawManifold> = None;
    for endpoint in [start, end] {
        if let Some(single) = sphere_plane(endpoint, radius, plane) {
            match &mut manifold {
                Some(existing) => existing.points.extend(single.points),
                None => manifold = Some(single),
            }
        }
    }
    manifold
}

fn capsule_capsule(
    ra: f32,
    ha: f32,
    ta: &Transform,
    rb: f32,
    hb: f32,
    tb: &Transform,
) -> Option<RawManifold> {
    let (a0, a1) = capsule_segment(ta, ha);
    let (b0, b1) = capsule_segment(tb, hb);
    let (pa, pb) = closest_segment_points(a0, a1, b0, b1);
    sphere_sphere(pa, ra, pb, rb)
}

fn closest_segment_points(a0: Vec3, a1: Vec3, b0: Vec3, b1: Vec3) -> (Vec3, Vec3) {
    let d1 = a1 - a0;
    let d2 = b1 - b0;
    let r = a0 - b0;
    let len1 = d1.length_squared();
    let len2 = d2.length_squared();
    let f = d2.dot(r);

    let (mut s, mut t);
    if len1 < 1e-12 && len2 < 1e-12 {
        return (a0, b0);
    }
    if len1 < 1e-12 {
        s = 0.0;
        t = (f / len2).clamp(0.0, 1.0);
    } else {
        let c = d1.dot(r);
        if len2 < 1e-12 {
            t = 0.0;
            s = (-c / len1).clamp(0.0, 1.0);
        } else {
            let b = d1.dot(d2);
            let denom = len1 * len2 - b * b;
            s = if denom > 1e-12 {
                ((b * f - c * len2) / denom).clamp(0.0, 1.0)
            } else {
                0.0
            };
            t = (b * s + f) / len2;
            if t < 0.0 {
                t = 0.0;
                s = (-c / len1).clamp(0.0, 1.0);
            } else if t > 1.0 {
                t = 1.0;
                s = ((b - c) / len1).clamp(0.0, 1.0);
            }
        }
    }
    (a0 + d1 * s, b0 + d2 * t)
}

// Box-box face manifold via SAT over the face axes plus reference-face
// clipping. Edge-edge cases fall back to the best face axis, which keeps
// stacks stable and avoids degenerate single-point manifolds.

struct BoxGeometry {
    center: Vec3,
    axes: [Vec3; 3],
    half_extents: Vec3,
}

impl BoxGeometry {
    fn new(half_extents: Vec3, transform: &Transform) -> Self {
        let axes = [
            transform.rotation * Vec3::X,
            transform.rotation * Vec3::Y,
            transform.rotation * Vec3::Z,
        ];
        Self {
            center: transform.position,
            axes,
            half_extents: half_extents * transform.scale.abs(),
        }
    }

    fn project_radius(&self, axis: Vec3) -> f32 {
        self.half_extents.x * self.axes[0].dot(axis).abs()
            + self.half_extents.y * self.axes[1].dot(axis).abs()
            + self.half_extents.z * self.axes[2].dot(axis).abs()
    }
}

struct FaceAxis {
    reference_is_a: bool,
    axis_index: usize,
    face_sign: f32,
}

fn find_face_axis(box_a: &BoxGeometry, box_b: &BoxGeometry) -> Option<FaceAxis> {
    let mut best_overlap = f32::MAX;
    let mut best = None;
    let center_diff = box_b.center - box_a.center;

    for (reference_is_a, reference, other, diff) in [
        (true, box_a, box_b, center_diff),
        (false, box_b, box_a, -center_diff),
    ] {
        for axis_index in 0..3 {
            let axis = reference.axes[axis_index];
            let separation = diff.dot(axis);
            let overlap =
                reference.half_extents[axis_index] + other.project_radius(axis) - separation.abs();
            if overlap < 0.0 {
                return None;
            }
            if overlap < best_overlap {
                best_overlap = overlap;
                best = Some(FaceAxis {
                    reference_is_a,
                    axis_index,
                    face_sign: if separation >= 0.0 { 1.0 } else { -1.0 },
                });
            }
        }
    }
    best
}

fn face_tangent_indices(face_index: usize) -> (usize, usize) {
    match face_index {
        0 => (1, 2),
        1 => (0, 2),
        _ => (0, 1),
    }
}

fn incident_face(incident: &BoxGeometry, reference_normal: Vec3) -> (usize, f32) {
    let mut min_dot = f32::MAX;
    let mut face_index = 0;
    for i in 0..3 {
        let dot = incident.axes[i].dot(reference_normal);
        if dot < min_dot {
            min_dot = dot;
            face_index = i;
        }
    }
    (face_index, if min_dot <= 0.0 { 1.0 } else { -1.0 })
}

fn face_vertices(geom: &BoxGeometry, face_index: usize, sign: f32) -> [Vec3; 4] {
    let face_center = geom.center + geom.axes[face_index] * geom.half_extents[face_index] * sign;
    let (u_idx, v_idx) = face_tangent_indices(face_index);
    let u = geom.axes[u_idx] * geom.half_extents[u_idx];
    let v = geom.axes[v_idx] * geom.half_extents[v_idx];
    [
        face_center + u + v,
        face_center + u - v,
        face_center - u - v,
        face_center - u + v,
    ]
}

fn box_box(ha: Vec3, ta: &Transform, hb: Vec3, tb: &Transform) -> Option<RawManifold> {
    let box_a = BoxGeometry::new(ha, ta);
    let box_b = BoxGeometry::new(hb, tb);

    let face = find_face_axis(&box_a, &box_b)?;
    let (reference, incident) = if face.reference_is_a {
        (&box_a, &box_b)
    } else {
        (&box_b, &box_a)
    };

    let reference_normal = reference.axes[face.axis_index] * face.face_sign;
    let reference_center = reference.center
        + reference_normal * reference.half_extents[face.axis_index];

    let (incident_index, incident_sign) = incident_face(incident, reference_normal);
    let incident_poly = face_vertices(incident, incident_index, incident_sign);

    let (u_idx, v_idx) = face_tangent_indices(face.axis_index);
    let planes = rectangle_planes(
        reference_center,
        reference.axes[u_idx],
        reference.axes[v_idx],
        reference.half_extents[u_idx],
        reference.half_extents[v_idx],
    );

    let clipped = clip_polygon(&incident_poly, &planes);
    if clipped.is_empty() {
        return None;
    }

    let mut points = Vec::new();
    for point in clipped {
        let depth = (reference_center - point).dot(reference_normal);
        if depth <= 0.0 {
            continue;
        }
        points.push(RawContactPoint {
            world_point: point,
            depth,
        });
    }
    if points.is_empty() {
        return None;
    }

    // The returned normal always runs from A toward B.
    let normal = if face.reference_is_a {
        reference_normal
    } else {
        -reference_normal
    };
    Some(RawManifold { normal, points })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn collider_at(shape: ColliderShape, position: Vec3) -> Collider {
        let mut collider = Collider::new(shape);
        collider.update_world_cache(&Transform::from_position(position));
        collider
    }

    #[test]
    fn touching_spheres_produce_a_midpoint_contact() {
        let a = collider_at(ColliderShape::Sphere { radius: 1.0 }, Vec3::ZERO);
        let b = collider_at(ColliderShape::Sphere { radius: 1.0 }, Vec3::new(1.5, 0.0, 0.0));
        let manifold = collide(&a, &b).unwrap();
        assert_relative_eq!(manifold.normal, Vec3::X, epsilon = 1e-5);
        assert_relative_eq!(manifold.points[0].depth, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn separated_spheres_produce_nothing() {
        let a = collider_at(ColliderShape::Sphere { radius: 1.0 }, Vec3::ZERO);
        let b = collider_at(ColliderShape::Sphere { radius: 1.0 }, Vec3::new(3.0, 0.0, 0.0));
        assert!(collide(&a, &b).is_none());
    }

    #[test]
    fn plane_sphere_normal_points_at_the_sphere() {
        let plane = collider_at(ColliderShape::Plane { normal: Vec3::Y }, Vec3::ZERO);
        let ball = collider_at(ColliderShape::Sphere { radius: 1.0 }, Vec3::new(0.0, 0.5, 0.0));
        let manifold = collide(&plane, &ball).unwrap();
        assert_relative_eq!(manifold.normal, Vec3::Y, epsilon = 1e-5);
        assert_relative_eq!(manifold.points[0].depth, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn resting_box_on_plane_yields_a_four_point_face() {
        let plane = collider_at(ColliderShape::Plane { normal: Vec3::Y }, Vec3::ZERO);
        let cube = collider_at(
            ColliderShape::Box { half_extents: Vec3::splat(0.5) },
            Vec3::new(0.0, 0.45, 0.0),
        );
        let manifold = collide(&plane, &cube).unwrap();
        assert_eq!(manifold.points.len(), 4);
        for point in &manifold.points {
            assert_relative_eq!(point.depth, 0.05, epsilon = 1e-4);
        }
    }

    #[test]
    fn stacked_boxes_produce_a_face_manifold() {
        let lower = collider_at(
            ColliderShape::Box { half_extents: Vec3::splat(0.5) },
            Vec3::ZERO,
        );
        let upper = collider_at(
            ColliderShape::Box { half_extents: Vec3::splat(0.5) },
            Vec3::new(0.0, 0.95, 0.0),
        );
        let manifold = collide(&lower, &upper).unwrap();
        assert!(manifold.normal.y > 0.99);
        assert!(manifold.points.len() >= 3);
    }

    #[test]
    fn sphere_inside_box_resolves_along_the_shallowest_face() {
        let ball = collider_at(ColliderShape::Sphere { radius: 0.1 }, Vec3::new(0.0, 0.4, 0.0));
        let cube = collider_at(
            ColliderShape::Box { half_extents: Vec3::splat(0.5) },
            Vec3::ZERO,
        );
        let manifold = collide(&ball, &cube).unwrap();
        assert!(manifold.normal.y < -0.99);
    }
}
