//! Persistent contact manifolds.
//!
//! A manifold keeps at most four contact points between an ordered collider
//! pair. Across frames, new narrow-phase points are matched to cached points
//! by nearest body-space distance on the first collider so accumulated
//! impulses survive for warm-starting. When more than four candidates exist,
//! the retained set maximizes the projected quadrilateral area on the
//! contact plane, which keeps the pressure distribution stable.

use glam::Vec3;

use super::narrowphase::RawManifold;
use crate::config::{ContactTangentMode, CONTACT_MATCH_SLOP, MAX_MANIFOLD_POINTS};
use crate::core::types::Transform;
use crate::utils::math::orthonormal_basis;

/// One persisted contact point and its solver state.
#[derive(Debug, Clone, Copy)]
pub struct ManifoldPoint {
    /// Contact point in the first collider's local space.
    pub local_a: Vec3,
    /// Contact point in the second collider's local space.
    pub local_b: Vec3,
    pub world_point: Vec3,
    pub penetration: f32,
    pub normal_impulse: f32,
    pub tangent_impulse: [f32; 2],
    /// Relative normal speed at the start of the step, for event reporting.
    pub relative_velocity: f32,
}

/// Up to four contact points plus the shared normal and friction tangents.
#[derive(Debug, Clone, Default)]
pub struct Manifold {
    /// Unit normal from collider A toward collider B.
    pub normal: Vec3,
    pub tangents: [Vec3; 2],
    pub points: Vec<ManifoldPoint>,
}

impl Manifold {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Merges a raw narrow-phase manifold into the persisted state.
    ///
    /// Points matching a cached point within the slop radius inherit its
    /// accumulated impulses. Points whose predecessors disappeared are
    /// dropped; the rest start cold.
    pub fn update(
        &mut self,
        raw: &RawManifold,
        transform_a: &Transform,
        transform_b: &Transform,
    ) {
        self.normal = raw.normal;

        let mut updated: Vec<ManifoldPoint> = Vec::with_capacity(raw.points.len());
        for raw_point in &raw.points {
            let local_a = transform_a.inverse_transform_point(raw_point.world_point);
            let local_b = transform_b.inverse_transform_point(raw_point.world_point);

            let mut point = ManifoldPoint {
                local_a,
                local_b,
                world_point: raw_point.world_point,
                penetration: raw_point.depth,
                normal_impulse: 0.0,
                tangent_impulse: [0.0; 2],
                relative_velocity: 0.0,
            };

            // Nearest cached point in A's body space wins the warm-start data.
            let mut best: Option<(usize, f32)> = None;
            for (index, cached) in self.points.iter().enumerate() {
                let distance_sq = (cached.local_a - local_a).length_squared();
                if distance_sq < CONTACT_MATCH_SLOP * CONTACT_MATCH_SLOP
                    && best.map_or(true, |(_, d)| distance_sq < d)
                {
                    best = Some((index, distance_sq));
                }
            }
            if let Some((index, _)) = best {
                let cached = self.points.swap_remove(index);
                point.normal_impulse = cached.normal_impulse;
                point.tangent_impulse = cached.tangent_impulse;
            }
            updated.push(point);
        }

        if updated.len() > MAX_MANIFOLD_POINTS {
            updated = reduce_points(updated, raw.normal);
        }
        self.points = updated;
    }

    /// Chooses the friction tangent basis for this step.
    pub fn select_tangents(
        &mut self,
        mode: ContactTangentMode,
        relative_velocity: Vec3,
        seed: u64,
    ) {
        self.tangents = match mode {
            ContactTangentMode::Orthonormal => {
                let (t, b) = orthonormal_basis(self.normal);
                [t, b]
            }
            ContactTangentMode::VelocityAligned => {
                let tangential =
                    relative_velocity - self.normal * relative_velocity.dot(self.normal);
                if tangential.length_squared() > 1e-8 {
                    let t = tangential.normalize();
                    [t, self.normal.cross(t)]
                } else {
                    let (t, b) = orthonormal_basis(self.normal);
                    [t, b]
                }
            }
            ContactTangentMode::Random => {
                let (t, b) = orthonormal_basis(self.normal);
                // Cheap hash-driven rotation of the basis in the plane.
                let hashed = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15);
                let angle = (hashed >> 40) as f32 / (1u32 << 24) as f32
                    * std::f32::consts::TAU;
                let (sin, cos) = angle.sin_cos();
                [t * cos + b * sin, b * cos - t * sin]
            }
        };
    }

    /// Sum of accumulated normal impulses across all points.
    pub fn total_normal_impulse(&self) -> f32 {
        self.points.iter().map(|p| p.normal_impulse).sum()
    }
}

/// Projected polygon area of up to four points on the plane orthogonal to
/// `normal`, with vertices ordered by angle about their centroid.
fn projected_area(points: &[&ManifoldPoint], normal: Vec3) -> f32 {
    let (t, b) = orthonormal_basis(normal);
    let flat: Vec<(f32, f32)> = points
        .iter()
        .map(|p| (p.world_point.dot(t), p.world_point.dot(b)))
        .collect();

    let cx = flat.iter().map(|p| p.0).sum::<f32>() / flat.len() as f32;
    let cy = flat.iter().map(|p| p.1).sum::<f32>() / flat.len() as f32;
    let mut ordered = flat.clone();
    ordered.sort_by(|a, b| {
        let angle_a = (a.1 - cy).atan2(a.0 - cx);
        let angle_b = (b.1 - cy).atan2(b.0 - cx);
        angle_a.partial_cmp(&angle_b).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut area = 0.0;
    for i in 0..ordered.len() {
        let (x0, y0) = ordered[i];
        let (x1, y1) = ordered[(i + 1) % ordered.len()];
        area += x0 * y1 - x1 * y0;
    }
    area.abs() * 0.5
}

/// Keeps the four points whose projected quadrilateral area is maximal.
/// Candidate counts stay small (box clipping yields at most eight), so an
/// exhaustive search is affordable and honors the invariant exactly.
fn reduce_points(points: Vec<ManifoldPoint>, normal: Vec3) -> Vec<ManifoldPoint> {
    if points.len() <= MAX_MANIFOLD_POINTS {
        return points;
    }

    let n = points.len();
    let mut best_area = f32::MIN;
    let mut best = [0usize; MAX_MANIFOLD_POINTS];

    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                for l in (k + 1)..n {
                    let quad = [&points[i], &points[j], &points[k], &points[l]];
                    let area = projected_area(&quad, normal);
                    if area > best_area {
                        best_area = area;
                        best = [i, j, k, l];
                    }
                }
            }
        }
    }

    best.iter().map(|&index| points[index]).collect()
}
