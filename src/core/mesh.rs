//! Mesh-backed collision resources.
//!
//! Resources validate on load. Invalid content (indices out of range,
//! triangle counts that are not a multiple of three) flips the resource into
//! a dormant state that contributes nothing to simulation instead of
//! crashing; a diagnostic is emitted once on the transition. Fixing the data
//! and revalidating recovers automatically.

use glam::Vec3;
use log::warn;
use serde::{Deserialize, Serialize};

use super::types::Aabb;

/// Why a mesh resource failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// An index referenced a vertex that does not exist.
    IndexOutOfRange { index: u32, vertex_count: usize },
    /// The index list length is not a multiple of three.
    PartialTriangle { index_count: usize },
    /// A sub-mesh selection referenced indices outside the index array.
    SubMeshOutOfRange { sub_mesh: usize },
    /// The mesh has no geometry at all.
    Empty,
}

impl std::fmt::Display for MeshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeshError::IndexOutOfRange { index, vertex_count } => write!(
                f,
                "index {index} references a vertex outside the {vertex_count}-vertex array"
            ),
            MeshError::PartialTriangle { index_count } => {
                write!(f, "index count {index_count} is not a multiple of three")
            }
            MeshError::SubMeshOutOfRange { sub_mesh } => {
                write!(f, "sub-mesh {sub_mesh} selects indices outside the index array")
            }
            MeshError::Empty => write!(f, "mesh has no geometry"),
        }
    }
}

impl std::error::Error for MeshError {}

fn validate_indexed_geometry(vertices: &[Vec3], indices: &[u32]) -> Result<(), MeshError> {
    if vertices.is_empty() {
        return Err(MeshError::Empty);
    }
    if indices.len() % 3 != 0 {
        return Err(MeshError::PartialTriangle {
            index_count: indices.len(),
        });
    }
    for &index in indices {
        if index as usize >= vertices.len() {
            return Err(MeshError::IndexOutOfRange {
                index,
                vertex_count: vertices.len(),
            });
        }
    }
    Ok(())
}

/// A triangle-soup collision mesh for static scenery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhysicsMesh {
    vertices: Vec<Vec3>,
    indices: Vec<u32>,
    #[serde(skip)]
    valid: bool,
    #[serde(skip)]
    local_aabb: Aabb,
}

impl PhysicsMesh {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<u32>) -> Self {
        let mut mesh = Self {
            vertices,
            indices,
            valid: false,
            local_aabb: Aabb::default(),
        };
        mesh.revalidate();
        mesh
    }

    /// Re-runs validation, recovering from a dormant state if the data was
    /// corrected. Returns the validation result.
    pub fn revalidate(&mut self) -> Result<(), MeshError> {
        match validate_indexed_geometry(&self.vertices, &self.indices) {
            Ok(()) => {
                self.valid = true;
                self.local_aabb = Aabb::from_points(&self.vertices);
                Ok(())
            }
            Err(error) => {
                if self.valid || self.local_aabb == Aabb::default() {
                    warn!("physics mesh is dormant: {error}");
                }
                self.valid = false;
                Err(error)
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn triangle(&self, index: usize) -> Option<[Vec3; 3]> {
        if !self.valid || index >= self.triangle_count() {
            return None;
        }
        let base = index * 3;
        Some([
            self.vertices[self.indices[base] as usize],
            self.vertices[self.indices[base + 1] as usize],
            self.vertices[self.indices[base + 2] as usize],
        ])
    }

    pub fn local_aabb(&self) -> Aabb {
        self.local_aabb
    }

    pub fn bounding_radius(&self) -> f32 {
        if !self.valid {
            return 0.0;
        }
        self.local_aabb.min.length().max(self.local_aabb.max.length())
    }
}

/// A convex hull mesh with precomputed volume and center of mass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConvexMesh {
    vertices: Vec<Vec3>,
    indices: Vec<u32>,
    #[serde(skip)]
    valid: bool,
    #[serde(skip)]
    volume: f32,
    #[serde(skip)]
    center_of_mass: Vec3,
    #[serde(skip)]
    local_aabb: Aabb,
}

/// Signed volume/centroid of the tetrahedra fanned from the origin. Exact for
/// closed meshes regardless of where the origin sits.
fn hull_volume_properties(vertices: &[Vec3], indices: &[u32]) -> (f32, Vec3) {
    let mut volume = 0.0;
    let mut weighted_centroid = Vec3::ZERO;
    for tri in indices.chunks_exact(3) {
        let a = vertices[tri[0] as usize];
        let b = vertices[tri[1] as usize];
        let c = vertices[tri[2] as usize];
        let signed = a.dot(b.cross(c)) / 6.0;
        volume += signed;
        weighted_centroid += (a + b + c) / 4.0 * signed;
    }
    let volume = volume.abs();
    let centroid = if volume > f32::EPSILON {
        weighted_centroid / volume
    } else {
        Vec3::ZERO
    };
    (volume, centroid)
}

impl ConvexMesh {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<u32>) -> Self {
        let mut mesh = Self {
            vertices,
            indices,
            valid: false,
            volume: 0.0,
            center_of_mass: Vec3::ZERO,
            local_aabb: Aabb::default(),
        };
        mesh.revalidate();
        mesh
    }

    pub fn revalidate(&mut self) -> Result<(), MeshError> {
        match validate_indexed_geometry(&self.vertices, &self.indices) {
            Ok(()) => {
                self.valid = true;
                self.local_aabb = Aabb::from_points(&self.vertices);
                let (volume, center) = hull_volume_properties(&self.vertices, &self.indices);
                self.volume = volume;
                self.center_of_mass = center;
                Ok(())
            }
            Err(error) => {
                warn!("convex mesh is dormant: {error}");
                self.valid = false;
                self.volume = 0.0;
                Err(error)
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn center_of_mass(&self) -> Vec3 {
        self.center_of_mass
    }

    pub fn local_aabb(&self) -> Aabb {
        self.local_aabb
    }

    pub fn bounding_radius(&self) -> f32 {
        if !self.valid {
            return 0.0;
        }
        self.vertices
            .iter()
            .map(|v| v.length())
            .fold(0.0, f32::max)
    }

    /// Farthest vertex along a direction; narrow-phase support function.
    pub fn support(&self, direction: Vec3) -> Vec3 {
        let mut best = Vec3::ZERO;
        let mut best_dot = f32::MIN;
        for v in &self.vertices {
            let d = v.dot(direction);
            if d > best_dot {
                best_dot = d;
                best = *v;
            }
        }
        best
    }
}

/// One sub-hull of a multi-convex mesh: an index selection plus cached
/// per-sub-mesh properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubMesh {
    pub indices: Vec<u32>,
    #[serde(skip)]
    pub volume: f32,
    #[serde(skip)]
    pub center_of_mass: Vec3,
    #[serde(skip)]
    pub local_aabb: Aabb,
}

/// A concave shape decomposed into convex pieces sharing one vertex array.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiConvexMesh {
    vertices: Vec<Vec3>,
    sub_meshes: Vec<SubMesh>,
    #[serde(skip)]
    valid: bool,
    #[serde(skip)]
    local_aabb: Aabb,
}

impl MultiConvexMesh {
    pub fn new(vertices: Vec<Vec3>, selections: Vec<Vec<u32>>) -> Self {
        let sub_meshes = selections
            .into_iter()
            .map(|indices| SubMesh {
                indices,
                volume: 0.0,
                center_of_mass: Vec3::ZERO,
                local_aabb: Aabb::default(),
            })
            .collect();
        let mut mesh = Self {
            vertices,
            sub_meshes,
            valid: false,
            local_aabb: Aabb::default(),
        };
        mesh.revalidate();
        mesh
    }

    pub fn revalidate(&mut self) -> Result<(), MeshError> {
        if self.vertices.is_empty() || self.sub_meshes.is_empty() {
            warn!("multi-convex mesh is dormant: {}", MeshError::Empty);
            self.valid = false;
            return Err(MeshError::Empty);
        }
        for (i, sub) in self.sub_meshes.iter().enumerate() {
            if let Err(error) = validate_indexed_geometry(&self.vertices, &sub.indices) {
                warn!("multi-convex mesh sub-mesh {i} is dormant: {error}");
                self.valid = false;
                return Err(MeshError::SubMeshOutOfRange { sub_mesh: i });
            }
        }

        let mut whole = Aabb::from_points(&self.vertices);
        for sub in &mut self.sub_meshes {
            let (volume, center) = hull_volume_properties(&self.vertices, &sub.indices);
            sub.volume = volume;
            sub.center_of_mass = center;
            let points: Vec<Vec3> = sub
                .indices
                .iter()
                .map(|&i| self.vertices[i as usize])
                .collect();
            sub.local_aabb = Aabb::from_points(&points);
            whole = whole.merged(&sub.local_aabb);
        }
        self.local_aabb = whole;
        self.valid = true;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn sub_meshes(&self) -> &[SubMesh] {
        &self.sub_meshes
    }

    pub fn total_volume(&self) -> f32 {
        self.sub_meshes.iter().map(|s| s.volume).sum()
    }

    /// Volume-weighted center of mass across sub-hulls.
    pub fn combined_center_of_mass(&self) -> Vec3 {
        let total = self.total_volume();
        if total <= f32::EPSILON {
            return Vec3::ZERO;
        }
        self.sub_meshes
            .iter()
            .map(|s| s.center_of_mass * s.volume)
            .sum::<Vec3>()
            / total
    }

    pub fn local_aabb(&self) -> Aabb {
        self.local_aabb
    }

    pub fn bounding_radius(&self) -> f32 {
        if !self.valid {
            return 0.0;
        }
        self.local_aabb.min.length().max(self.local_aabb.max.length())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_tetrahedron() -> (Vec<Vec3>, Vec<u32>) {
        let vertices = vec![
            Vec3::ZERO,
            Vec3::X,
            Vec3::Y,
            Vec3::Z,
        ];
        // Outward-facing winding.
        let indices = vec![0, 2, 1, 0, 1, 3, 0, 3, 2, 1, 2, 3];
        (vertices, indices)
    }

    #[test]
    fn out_of_range_index_makes_the_mesh_dormant() {
        let mesh = PhysicsMesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1, 5]);
        assert!(!mesh.is_valid());
        assert_eq!(mesh.bounding_radius(), 0.0);
    }

    #[test]
    fn partial_triangle_makes_the_mesh_dormant() {
        let mesh = PhysicsMesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1]);
        assert!(!mesh.is_valid());
    }

    #[test]
    fn dormant_mesh_recovers_after_correction() {
        let mut mesh = PhysicsMesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1]);
        assert!(!mesh.is_valid());
        mesh = PhysicsMesh::new(mesh.vertices.clone(), vec![0, 1, 2]);
        assert!(mesh.is_valid());
        assert_eq!(mesh.triangle_count(), 1);
    }

    #[test]
    fn tetrahedron_volume_is_one_sixth() {
        let (vertices, indices) = unit_tetrahedron();
        let mesh = ConvexMesh::new(vertices, indices);
        assert!(mesh.is_valid());
        assert!((mesh.volume() - 1.0 / 6.0).abs() < 1e-4);
    }

    #[test]
    fn multi_convex_caches_per_sub_mesh_properties() {
        let (vertices, indices) = unit_tetrahedron();
        let mesh = MultiConvexMesh::new(vertices, vec![indices.clone(), indices]);
        assert!(mesh.is_valid());
        assert_eq!(mesh.sub_meshes().len(), 2);
        assert!((mesh.total_volume() - 2.0 / 6.0).abs() < 1e-4);
        for sub in mesh.sub_meshes() {
            assert!(sub.volume > 0.0);
            assert!(sub.local_aabb.max.x > 0.0);
        }
    }

    #[test]
    fn serialized_payload_round_trips() {
        let (vertices, indices) = unit_tetrahedron();
        let mesh = PhysicsMesh::new(vertices, indices);
        let json = serde_json::to_string(&mesh).unwrap();
        let mut back: PhysicsMesh = serde_json::from_str(&json).unwrap();
        back.revalidate().unwrap();
        assert_eq!(mesh, back);
    }
}
