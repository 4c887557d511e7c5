//! World-space cast queries: ray, segment, AABB, sphere, and frustum.
//!
//! Every cast returns a bounded list of hits sorted by `t` (distance along
//! the cast, or distance from the volume center for overlap casts). The
//! filter selects body kinds, ghosts, collision groups, an ignored node, and
//! an optional per-object callback for custom accept/reject.

use glam::Vec3;

use crate::core::body::RigidBody;
use crate::core::collider::{Collider, ColliderShape};
use crate::core::types::{Aabb, Transform};
use crate::utils::allocator::{Arena, BodyId, ColliderId, NodeId};

/// One cast result.
#[derive(Debug, Clone, Copy)]
pub struct CastHit {
    pub collider: ColliderId,
    pub body: Option<BodyId>,
    /// Where the cast enters the shape.
    pub entry: Vec3,
    /// Where the cast leaves the shape (equals `entry` for overlap casts).
    pub exit: Vec3,
    pub normal: Vec3,
    pub t: f32,
}

/// Accept/reject controls shared by every cast kind.
pub struct CastFilter<'a> {
    pub include_dynamic: bool,
    pub include_static: bool,
    pub include_kinematic: bool,
    pub include_ghosts: bool,
    /// Bitmask over collision-group ids (bit N = group N). Groups are capped
    /// at 32 so one word covers the whole table.
    pub group_mask: u32,
    /// Colliders on this node are skipped (self-exclusion for the caster).
    pub ignored_node: Option<NodeId>,
    /// Custom accept test; returning false rejects the collider.
    #[allow(clippy::type_complexity)]
    pub accept: Option<&'a dyn Fn(ColliderId, &Collider) -> bool>,
    pub max_hits: usize,
}

impl Default for CastFilter<'_> {
    fn default() -> Self {
        Self {
            include_dynamic: true,
            include_static: true,
            include_kinematic: true,
            include_ghosts: false,
            group_mask: u32::MAX,
            ignored_node: None,
            accept: None,
            max_hits: usize::MAX,
        }
    }
}

impl CastFilter<'_> {
    fn accepts(
        &self,
        id: ColliderId,
        collider: &Collider,
        bodies: &Arena<RigidBody>,
    ) -> bool {
        if collider.ghost && !self.include_ghosts {
            return false;
        }
        if collider.group < 32 && self.group_mask & (1 << collider.group) == 0 {
            return false;
        }
        if self.ignored_node == Some(collider.node) && !collider.node.is_null() {
            return false;
        }

        let body_kind_ok = match collider.body.and_then(|b| bodies.get(b)) {
            None => self.include_static,
            Some(body) if body.is_static() => self.include_static,
            Some(body) if body.is_kinematic() => self.include_kinematic,
            Some(_) => self.include_dynamic,
        };
        if !body_kind_ok {
            return false;
        }

        match self.accept {
            Some(callback) => callback(id, collider),
            None => true,
        }
    }
}

/// A ray with a maximum travel distance (`f32::MAX` for unbounded).
#[derive(Debug, Clone, Copy)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub max_t: f32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
            max_t: f32::MAX,
        }
    }

    pub fn segment(start: Vec3, end: Vec3) -> Self {
        let delta = end - start;
        Self {
            origin: start,
            direction: delta.normalize_or_zero(),
            max_t: delta.length(),
        }
    }

    pub fn point_at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }
}

/// A view frustum as six inward-facing planes (normal, offset).
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    pub planes: [(Vec3, f32); 6],
}

impl Frustum {
    fn contains_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|(normal, offset)| normal.dot(center) - offset >= -radius)
    }
}

fn finish(mut hits: Vec<CastHit>, max_hits: usize) -> Vec<CastHit> {
    hits.sort_by(|a, b| a.t.partial_cmp(&b.t).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(max_hits);
    hits
}

/// Casts a ray against every accepted collider.
pub fn ray_cast(
    colliders: &Arena<Collider>,
    bodies: &Arena<RigidBody>,
    ray: &Ray,
    filter: &CastFilter,
) -> Vec<CastHit> {
    let mut hits = Vec::new();
    for (id, collider) in colliders.iter_with_ids() {
        if !filter.accepts(id, collider, bodies) {
            continue;
        }
        if let Some((t_entry, t_exit, normal)) =
            ray_shape(ray, &collider.shape, &collider.world_transform)
        {
            if t_entry > ray.max_t {
                continue;
            }
            hits.push(CastHit {
                collider: id,
                body: collider.body,
                entry: ray.point_at(t_entry),
                exit: ray.point_at(t_exit.min(ray.max_t)),
                normal,
                t: t_entry,
            });
        }
    }
    finish(hits, filter.max_hits)
}

/// Overlap cast against an AABB region.
pub fn aabb_cast(
    colliders: &Arena<Collider>,
    bodies: &Arena<RigidBody>,
    region: &Aabb,
    filter: &CastFilter,
) -> Vec<CastHit> {
    let center = region.center();
    let mut hits = Vec::new();
    for (id, collider) in colliders.iter_with_ids() {
        if !filter.accepts(id, collider, bodies) {
            continue;
        }
        if collider.world_aabb.overlaps(region) {
            let point = collider.world_transform.position;
            hits.push(CastHit {
                collider: id,
                body: collider.body,
                entry: point,
                exit: point,
                normal: (point - center).normalize_or_zero(),
                t: (point - center).length(),
            });
        }
    }
    finish(hits, filter.max_hits)
}

/// Overlap cast against a sphere volume.
pub fn sphere_cast(
    colliders: &Arena<Collider>,
    bodies: &Arena<RigidBody>,
    center: Vec3,
    radius: f32,
    filter: &CastFilter,
) -> Vec<CastHit> {
    let mut hits = Vec::new();
    for (id, collider) in colliders.iter_with_ids() {
        if !filter.accepts(id, collider, bodies) {
            continue;
        }
        let position = collider.world_transform.position;
        let distance = (position - center).length();
        if distance <= radius + collider.bounding_sphere_radius {
            hits.push(CastHit {
                collider: id,
                body: collider.body,
                entry: position,
                exit: position,
                normal: (position - center).normalize_or_zero(),
                t: distance,
            });
        }
    }
    finish(hits, filter.max_hits)
}

/// Overlap cast against a frustum volume.
pub fn frustum_cast(
    colliders: &Arena<Collider>,
    bodies: &Arena<RigidBody>,
    frustum: &Frustum,
    filter: &CastFilter,
) -> Vec<CastHit> {
    let mut hits = Vec::new();
    for (id, collider) in colliders.iter_with_ids() {
        if !filter.accepts(id, collider, bodies) {
            continue;
        }
        let position = collider.world_transform.position;
        if frustum.contains_sphere(position, collider.bounding_sphere_radius) {
            hits.push(CastHit {
                collider: id,
                body: collider.body,
                entry: position,
                exit: position,
                normal: Vec3::ZERO,
                t: position.length(),
            });
        }
    }
    finish(hits, filter.max_hits)
}

/// Intersects a ray with a shape, returning (t_entry, t_exit, entry normal).
fn ray_shape(
    ray: &Ray,
    shape: &ColliderShape,
    transform: &Transform,
) -> Option<(f32, f32, Vec3)> {
    match shape {
        ColliderShape::Sphere { radius } => {
            let r = radius * transform.scale.abs().max_element();
            ray_sphere(ray, transform.position, r)
        }
        ColliderShape::Plane { normal } => {
            let world_normal = (transform.rotation * *normal).normalize_or_zero();
            let offset = world_normal.dot(transform.position);
            let denom = world_normal.dot(ray.direction);
            if denom.abs() < 1e-8 {
                return None;
            }
            let t = (offset - world_normal.dot(ray.origin)) / denom;
            if t < 0.0 {
                return None;
            }
            let facing = if denom < 0.0 { world_normal } else { -world_normal };
            Some((t, t, facing))
        }
        ColliderShape::Box { half_extents } => {
            ray_box(ray, *half_extents * transform.scale.abs(), transform)
        }
        // Remaining shapes use their bounding sphere; entry normal comes
        // from the sphere surface.
        other => {
            let r = other.bounding_radius() * transform.scale.abs().max_element();
            if !r.is_finite() {
                return None;
            }
            ray_sphere(ray, transform.position, r)
        }
    }
}

fn ray_sphere(ray: &Ray, center: Vec3, radius: f32) -> Option<(f32, f32, Vec3)> {
    let offset = ray.origin - center;
    let b = offset.dot(ray.direction);
    let c = offset.length_squared() - radius * radius;
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }
    let sqrt_d = discriminant.sqrt();
    let t_entry = -b - sqrt_d;
    let t_exit = -b + sqrt_d;
    if t_exit < 0.0 {
        return None;
    }
    let t_entry = t_entry.max(0.0);
    let normal = (ray.point_at(t_entry) - center).normalize_or_zero();
    Some((t_entry, t_exit, normal))
}

fn ray_box(ray: &Ray, half_extents: Vec3, transform: &Transform) -> Option<(f32, f32, Vec3)> {
    // Slab test in the box's local frame.
    let inv_rot = transform.rotation.conjugate();
    let local_origin = inv_rot * (ray.origin - transform.position);
    let local_dir = inv_rot * ray.direction;

    let mut t_min = 0.0f32;
    let mut t_max = f32::MAX;
    let mut entry_axis = 0;
    let mut entry_sign = 1.0;

    for axis in 0..3 {
        if local_dir[axis].abs() < 1e-8 {
            if local_origin[axis].abs() > half_extents[axis] {
                return None;
            }
            continue;
        }
        let inv_d = 1.0 / local_dir[axis];
        let mut t0 = (-half_extents[axis] - local_origin[axis]) * inv_d;
        let mut t1 = (half_extents[axis] - local_origin[axis]) * inv_d;
        let mut sign = -1.0;
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
            sign = 1.0;
        }
        if t0 > t_min {
            t_min = t0;
            entry_axis = axis;
            entry_sign = sign;
        }
        t_max = t_max.min(t1);
        if t_min > t_max {
            return None;
        }
    }

    let mut local_normal = Vec3::ZERO;
    local_normal[entry_axis] = entry_sign;
    Some((t_min, t_max, transform.rotation * local_normal))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::body::DynamicState;
    use approx::assert_relative_eq;

    fn world_with_sphere(position: Vec3) -> (Arena<Collider>, Arena<RigidBody>) {
        let mut colliders = Arena::new();
        let bodies = Arena::new();
        let mut collider = Collider::sphere(1.0);
        collider.update_world_cache(&Transform::from_position(position));
        colliders.insert(collider);
        (colliders, bodies)
    }

    #[test]
    fn ray_hits_report_entry_exit_and_normal() {
        let (colliders, bodies) = world_with_sphere(Vec3::new(5.0, 0.0, 0.0));
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        let hits = ray_cast(&colliders, &bodies, &ray, &CastFilter::default());
        assert_eq!(hits.len(), 1);
        assert_relative_eq!(hits[0].t, 4.0, epsilon = 1e-4);
        assert_relative_eq!(hits[0].entry.x, 4.0, epsilon = 1e-4);
        assert_relative_eq!(hits[0].exit.x, 6.0, epsilon = 1e-4);
        assert_relative_eq!(hits[0].normal, -Vec3::X, epsilon = 1e-4);
    }

    #[test]
    fn hits_sort_by_distance_and_respect_max_hits() {
        let mut colliders = Arena::new();
        let bodies = Arena::new();
        for x in [9.0, 3.0, 6.0] {
            let mut c = Collider::sphere(0.5);
            c.update_world_cache(&Transform::from_position(Vec3::new(x, 0.0, 0.0)));
            colliders.insert(c);
        }
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        let hits = ray_cast(&colliders, &bodies, &ray, &CastFilter::default());
        assert_eq!(hits.len(), 3);
        assert!(hits[0].t < hits[1].t && hits[1].t < hits[2].t);

        let filter = CastFilter {
            max_hits: 1,
            ..CastFilter::default()
        };
        assert_eq!(ray_cast(&colliders, &bodies, &ray, &filter).len(), 1);
    }

    #[test]
    fn filter_excludes_ghosts_and_body_kinds() {
        let mut colliders = Arena::new();
        let mut bodies = Arena::new();

        let mut ghost = Collider::sphere(1.0);
        ghost.ghost = true;
        ghost.update_world_cache(&Transform::from_position(Vec3::new(3.0, 0.0, 0.0)));
        colliders.insert(ghost);

        let kinematic_body = bodies.insert(
            RigidBody::builder().dynamic_state(DynamicState::Kinematic).build(),
        );
        let mut kinematic = Collider::sphere(1.0);
        kinematic.body = Some(kinematic_body);
        kinematic.update_world_cache(&Transform::from_position(Vec3::new(6.0, 0.0, 0.0)));
        colliders.insert(kinematic);

        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        let default_hits = ray_cast(&colliders, &bodies, &ray, &CastFilter::default());
        assert_eq!(default_hits.len(), 1, "ghost excluded by default");

        let filter = CastFilter {
            include_ghosts: true,
            include_kinematic: false,
            ..CastFilter::default()
        };
        let hits = ray_cast(&colliders, &bodies, &ray, &filter);
        assert_eq!(hits.len(), 1);
        assert_relative_eq!(hits[0].t, 2.0, epsilon = 1e-4);
    }

    #[test]
    fn custom_callback_can_reject_hits() {
        let (colliders, bodies) = world_with_sphere(Vec3::new(5.0, 0.0, 0.0));
        let reject_all = |_: ColliderId, _: &Collider| false;
        let filter = CastFilter {
            accept: Some(&reject_all),
            ..CastFilter::default()
        };
        let ray = Ray::new(Vec3::ZERO, Vec3::X);
        assert!(ray_cast(&colliders, &bodies, &ray, &filter).is_empty());
    }

    #[test]
    fn segment_cast_is_bounded() {
        let (colliders, bodies) = world_with_sphere(Vec3::new(5.0, 0.0, 0.0));
        let short = Ray::segment(Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0));
        assert!(ray_cast(&colliders, &bodies, &short, &CastFilter::default()).is_empty());
    }

    #[test]
    fn aabb_cast_reports_overlapping_colliders() {
        let (colliders, bodies) = world_with_sphere(Vec3::new(1.0, 0.0, 0.0));
        let region = Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(1.5));
        let hits = aabb_cast(&colliders, &bodies, &region, &CastFilter::default());
        assert_eq!(hits.len(), 1);
    }
}
