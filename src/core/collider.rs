use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use super::mesh::{ConvexMesh, MultiConvexMesh, PhysicsMesh};
use super::types::{Aabb, InertiaTensorExt, Material, Transform};
use crate::utils::allocator::{BodyId, NodeId};

/// Identifier of a collision group registered in a collision table.
pub type CollisionGroupId = u32;

/// The group every collider starts in.
pub const DEFAULT_COLLISION_GROUP: CollisionGroupId = 0;

/// Supported collider geometries.
///
/// Mesh-backed shapes hold their own copy of the resource data; resources are
/// validated on load and dormant shapes contribute nothing to simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ColliderShape {
    Sphere { radius: f32 },
    Box { half_extents: Vec3 },
    Capsule { radius: f32, height: f32 },
    Cylinder { radius: f32, height: f32 },
    /// An infinite plane through the origin with the given normal. Static
    /// scenery only.
    Plane { normal: Vec3 },
    ConvexMesh { mesh: ConvexMesh },
    Mesh { mesh: PhysicsMesh },
    MultiConvexMesh { mesh: MultiConvexMesh },
    HeightMap { cell_size: f32, heights: Vec<f32>, columns: u32 },
}

impl ColliderShape {
    /// Conservative bounding radius about the shape's local origin.
    pub fn bounding_radius(&self) -> f32 {
        match self {
            ColliderShape::Sphere { radius } => *radius,
            ColliderShape::Box { half_extents } => half_extents.length(),
            ColliderShape::Capsule { radius, height }
            | ColliderShape::Cylinder { radius, height } => {
                (radius * radius + (height * 0.5) * (height * 0.5)).sqrt()
            }
            ColliderShape::Plane { .. } => f32::MAX,
            ColliderShape::ConvexMesh { mesh } => mesh.bounding_radius(),
            ColliderShape::Mesh { mesh } => mesh.bounding_radius(),
            ColliderShape::MultiConvexMesh { mesh } => mesh.bounding_radius(),
            ColliderShape::HeightMap { cell_size, heights, columns } => {
                let rows = if *columns == 0 { 0 } else { heights.len() as u32 / columns };
                let extent = Vec3::new(
                    *columns as f32 * cell_size,
                    heights.iter().fold(0.0f32, |a, h| a.max(h.abs())),
                    rows as f32 * cell_size,
                );
                extent.length()
            }
        }
    }

    pub fn volume(&self) -> f32 {
        match self {
            ColliderShape::Sphere { radius } => (4.0 / 3.0) * std::f32::consts::PI * radius.powi(3),
            ColliderShape::Box { half_extents } => {
                8.0 * half_extents.x * half_extents.y * half_extents.z
            }
            ColliderShape::Capsule { radius, height } => {
                let cylinder = std::f32::consts::PI * radius * radius * height;
                let caps = (4.0 / 3.0) * std::f32::consts::PI * radius.powi(3);
                cylinder + caps
            }
            ColliderShape::Cylinder { radius, height } => {
                std::f32::consts::PI * radius * radius * height
            }
            // Boundless or hollow scenery shapes carry no mass.
            ColliderShape::Plane { .. }
            | ColliderShape::Mesh { .. }
            | ColliderShape::HeightMap { .. } => 0.0,
            ColliderShape::ConvexMesh { mesh } => mesh.volume(),
            ColliderShape::MultiConvexMesh { mesh } => mesh.total_volume(),
        }
    }

    /// Inertia tensor about the shape's local center of mass for the given mass.
    pub fn local_inertia(&self, mass: f32) -> Mat3 {
        match self {
            ColliderShape::Sphere { radius } => Mat3::for_solid_sphere(*radius, mass),
            ColliderShape::Box { half_extents } => Mat3::for_solid_box(*half_extents, mass),
            ColliderShape::Capsule { radius, height } => {
                Mat3::for_solid_capsule(*radius, *height, mass)
            }
            ColliderShape::Cylinder { radius, height } => {
                Mat3::for_solid_cylinder(*radius, *height, mass)
            }
            ColliderShape::ConvexMesh { mesh } => {
                // Approximated by the bounding box of the hull.
                Mat3::for_solid_box(mesh.local_aabb().half_extents(), mass)
            }
            ColliderShape::MultiConvexMesh { mesh } => {
                Mat3::for_solid_box(mesh.local_aabb().half_extents(), mass)
            }
            ColliderShape::Plane { .. }
            | ColliderShape::Mesh { .. }
            | ColliderShape::HeightMap { .. } => Mat3::IDENTITY,
        }
    }

    /// Local center of mass relative to the shape origin.
    pub fn local_center_of_mass(&self) -> Vec3 {
        match self {
            ColliderShape::MultiConvexMesh { mesh } => mesh.combined_center_of_mass(),
            ColliderShape::ConvexMesh { mesh } => mesh.center_of_mass(),
            _ => Vec3::ZERO,
        }
    }

    /// World AABB of the shape under a transform.
    pub fn world_aabb(&self, transform: &Transform) -> Aabb {
        match self {
            ColliderShape::Plane { .. } => Aabb::new(Vec3::splat(-1e12), Vec3::splat(1e12)),
            ColliderShape::Box { half_extents } => {
                let scaled = *half_extents * transform.scale.abs();
                let rot = Mat3::from_quat(transform.rotation);
                // Extent of a rotated box along each world axis.
                let abs = Mat3::from_cols(
                    rot.x_axis.abs(),
                    rot.y_axis.abs(),
                    rot.z_axis.abs(),
                );
                let world_half = abs * scaled;
                Aabb::from_center_half_extents(transform.position, world_half)
            }
            ColliderShape::Sphere { radius } => {
                let r = *radius * transform.scale.abs().max_element();
                Aabb::from_center_half_extents(transform.position, Vec3::splat(r))
            }
            _ => {
                let r = self.bounding_radius() * transform.scale.abs().max_element();
                Aabb::from_center_half_extents(transform.position, Vec3::splat(r))
            }
        }
    }
}

/// The mass a collider contributes to its owning body.
#[derive(Debug, Clone, Copy)]
pub struct MassContribution {
    pub mass: f32,
    /// Inertia about the collider's local center of mass.
    pub local_inertia: Mat3,
    /// Center of mass in the collider's local space.
    pub local_center: Vec3,
}

/// A shape attached (directly or via hierarchy) to a body or static scenery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collider {
    pub shape: ColliderShape,
    /// Offset from the owning node's transform.
    pub offset: Transform,
    pub material: Material,
    pub group: CollisionGroupId,

    /// Ghost colliders detect but never resolve.
    pub ghost: bool,
    pub sends_events: bool,

    /// Resolved each commit: the body this collider moves with, if any.
    /// Colliders without a body are static scenery.
    #[serde(skip)]
    pub body: Option<BodyId>,
    #[serde(skip)]
    pub node: NodeId,

    /// Updated by the commit pass; broadphase and pair tests read these.
    #[serde(skip)]
    pub world_transform: Transform,
    #[serde(skip)]
    pub world_aabb: Aabb,
    #[serde(skip)]
    pub bounding_sphere_radius: f32,
    /// Whether this collider's resource failed validation and is dormant.
    #[serde(skip)]
    pub dormant: bool,
}

impl Collider {
    pub fn new(shape: ColliderShape) -> Self {
        let dormant = match &shape {
            ColliderShape::Mesh { mesh } => !mesh.is_valid(),
            ColliderShape::ConvexMesh { mesh } => !mesh.is_valid(),
            ColliderShape::MultiConvexMesh { mesh } => !mesh.is_valid(),
            _ => false,
        };
        Self {
            shape,
            offset: Transform::default(),
            material: Material::default(),
            group: DEFAULT_COLLISION_GROUP,
            ghost: false,
            sends_events: true,
            body: None,
            node: NodeId::default(),
            world_transform: Transform::default(),
            world_aabb: Aabb::default(),
            bounding_sphere_radius: 0.0,
            dormant: false,
        }
        .with_dormant(dormant)
    }

    fn with_dormant(mut self, dormant: bool) -> Self {
        if dormant {
            log::warn!("collider created from an invalid mesh resource; entering dormant state");
        }
        self.dormant = dormant;
        self
    }

    pub fn with_offset(mut self, offset: Transform) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    pub fn with_group(mut self, group: CollisionGroupId) -> Self {
        self.group = group;
        self
    }

    pub fn with_ghost(mut self, ghost: bool) -> Self {
        self.ghost = ghost;
        self
    }

    pub fn sphere(radius: f32) -> Self {
        Self::new(ColliderShape::Sphere { radius })
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Self::new(ColliderShape::Box { half_extents })
    }

    pub fn capsule(radius: f32, height: f32) -> Self {
        Self::new(ColliderShape::Capsule { radius, height })
    }

    pub fn plane(normal: Vec3) -> Self {
        Self::new(ColliderShape::Plane {
            normal: normal.normalize_or_zero(),
        })
    }

    pub fn is_static_scenery(&self) -> bool {
        self.body.is_none()
    }

    /// Recomputes the cached world transform, AABB, and bounding sphere from
    /// the owning node's world transform.
    pub fn update_world_cache(&mut self, node_transform: &Transform) {
        self.world_transform = node_transform.combine(&self.offset);
        self.world_aabb = self.shape.world_aabb(&self.world_transform);
        self.bounding_sphere_radius =
            self.shape.bounding_radius() * self.world_transform.scale.abs().max_element();
    }

    /// Mass contributed to the owning body: density times volume, with the
    /// inertia tensor taken about the collider's local center of mass.
    /// Dormant colliders contribute nothing.
    pub fn mass_contribution(&self) -> MassContribution {
        if self.dormant {
            return MassContribution {
                mass: 0.0,
                local_inertia: Mat3::ZERO,
                local_center: Vec3::ZERO,
            };
        }
        let mass = self.material.density * self.shape.volume();
        MassContribution {
            mass,
            local_inertia: self.shape.local_inertia(mass),
            local_center: self.offset.position + self.shape.local_center_of_mass(),
        }
    }
}
