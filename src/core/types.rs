use glam::{Mat3, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Position, orientation, and non-uniform scale of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Self::default()
        }
    }

    /// Builds a homogeneous matrix representation of the transform.
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Applies another transform on top of this one, returning the composition.
    pub fn combine(&self, other: &Transform) -> Transform {
        Transform {
            position: self.position + self.rotation * (self.scale * other.position),
            rotation: (self.rotation * other.rotation).normalize(),
            scale: self.scale * other.scale,
        }
    }

    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.position + self.rotation * (self.scale * local)
    }

    pub fn inverse_transform_point(&self, world: Vec3) -> Vec3 {
        let unrotated = self.rotation.conjugate() * (world - self.position);
        unrotated / self.scale
    }

    pub fn transform_direction(&self, local: Vec3) -> Vec3 {
        self.rotation * local
    }
}

/// Linear and angular velocity of a rigid body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub linear: Vec3,
    pub angular: Vec3,
}

impl Velocity {
    /// Linear velocity of a world point given this velocity about `center`.
    pub fn point_velocity(&self, point: Vec3, center: Vec3) -> Vec3 {
        self.linear + self.angular.cross(point - center)
    }
}

/// Inverse mass stored per axis so degrees of freedom can be locked
/// independently (2D mode, axis locks) by zeroing components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mass {
    inv_masses: Vec3,
    mass: f32,
}

impl Default for Mass {
    fn default() -> Self {
        Self::from_mass(1.0)
    }
}

impl Mass {
    pub fn from_mass(mass: f32) -> Self {
        let inv = if mass <= f32::EPSILON { 0.0 } else { 1.0 / mass };
        Self {
            inv_masses: Vec3::splat(inv),
            mass,
        }
    }

    pub fn infinite() -> Self {
        Self {
            inv_masses: Vec3::ZERO,
            mass: 0.0,
        }
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn inverse(&self) -> Vec3 {
        self.inv_masses
    }

    /// Scalar inverse mass ignoring per-axis locks. Constraint rows use the
    /// per-axis form; this exists for diagnostics and mass ratios.
    pub fn scalar_inverse(&self) -> f32 {
        if self.mass <= f32::EPSILON {
            0.0
        } else {
            1.0 / self.mass
        }
    }

    pub fn is_infinite(&self) -> bool {
        self.inv_masses == Vec3::ZERO
    }

    /// Re-applies per-axis locks on top of the stored scalar mass.
    pub fn set_axis_lock(&mut self, lock_x: bool, lock_y: bool, lock_z: bool) {
        let inv = if self.mass <= f32::EPSILON { 0.0 } else { 1.0 / self.mass };
        self.inv_masses = Vec3::new(
            if lock_x { 0.0 } else { inv },
            if lock_y { 0.0 } else { inv },
            if lock_z { 0.0 } else { inv },
        );
    }

    pub fn apply(&self, impulse: Vec3) -> Vec3 {
        impulse * self.inv_masses
    }
}

/// Inverse inertia in local space plus the cached world-space form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Inertia {
    inv_local: Mat3,
    inv_world: Mat3,
}

impl Default for Inertia {
    fn default() -> Self {
        Self {
            inv_local: Mat3::IDENTITY,
            inv_world: Mat3::IDENTITY,
        }
    }
}

impl Inertia {
    pub fn from_local_tensor(local: Mat3) -> Self {
        let inv_local = if local.determinant().abs() < f32::EPSILON {
            Mat3::ZERO
        } else {
            local.inverse()
        };
        Self {
            inv_local,
            inv_world: inv_local,
        }
    }

    pub fn infinite() -> Self {
        Self {
            inv_local: Mat3::ZERO,
            inv_world: Mat3::ZERO,
        }
    }

    pub fn inv_local(&self) -> Mat3 {
        self.inv_local
    }

    pub fn inv_world(&self) -> Mat3 {
        self.inv_world
    }

    pub fn set_inv_local(&mut self, inv_local: Mat3) {
        self.inv_local = inv_local;
    }

    /// Rotates the local inverse tensor into world space.
    pub fn update_world(&mut self, rotation: Quat) {
        let r = Mat3::from_quat(rotation);
        self.inv_world = r * self.inv_local * r.transpose();
    }

    /// Zeros all but the z angular degree of freedom (2D mode) or all of them
    /// (rotation lock) in the world tensor.
    pub fn lock_world_axes(&mut self, lock_x: bool, lock_y: bool, lock_z: bool) {
        let mut m = self.inv_world.to_cols_array_2d();
        for (axis, locked) in [(0, lock_x), (1, lock_y), (2, lock_z)] {
            if locked {
                for i in 0..3 {
                    m[axis][i] = 0.0;
                    m[i][axis] = 0.0;
                }
            }
        }
        self.inv_world = Mat3::from_cols_array_2d(&m);
    }

    pub fn apply(&self, angular_impulse: Vec3) -> Vec3 {
        self.inv_world * angular_impulse
    }
}

/// Material coefficients that affect contact response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub density: f32,
    pub restitution: f32,
    pub static_friction: f32,
    pub dynamic_friction: f32,
    /// Higher-priority materials win the mixing-mode choice on contact.
    pub restitution_priority: u32,
    pub friction_priority: u32,
    /// How this material mixes its coefficients with another material.
    pub mixing: MaterialMixing,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            density: 1.0,
            restitution: 0.1,
            static_friction: 0.5,
            dynamic_friction: 0.3,
            restitution_priority: 0,
            friction_priority: 0,
            mixing: MaterialMixing::default(),
        }
    }
}

impl Material {
    pub fn combine_pair(a: &Self, b: &Self) -> MaterialPairProperties {
        let friction_mode = if a.friction_priority >= b.friction_priority {
            a.mixing.friction
        } else {
            b.mixing.friction
        };
        let restitution_mode = if a.restitution_priority >= b.restitution_priority {
            a.mixing.restitution
        } else {
            b.mixing.restitution
        };

        MaterialPairProperties {
            static_friction: friction_mode.combine(a.static_friction, b.static_friction),
            dynamic_friction: friction_mode.combine(a.dynamic_friction, b.dynamic_friction),
            restitution: restitution_mode.combine(a.restitution, b.restitution),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MaterialMixing {
    pub friction: MixingMode,
    pub restitution: MixingMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MixingMode {
    #[default]
    Average,
    Min,
    Max,
    GeometricMean,
}

impl MixingMode {
    fn combine(self, a: f32, b: f32) -> f32 {
        match self {
            MixingMode::Average => 0.5 * (a + b),
            MixingMode::Min => a.min(b),
            MixingMode::Max => a.max(b),
            MixingMode::GeometricMean => (a.abs() * b.abs()).sqrt(),
        }
    }
}

/// Combined coefficients for one contacting pair.
#[derive(Debug, Clone, Copy)]
pub struct MaterialPairProperties {
    pub static_friction: f32,
    pub dynamic_friction: f32,
    pub restitution: f32,
}

impl Default for MaterialPairProperties {
    fn default() -> Self {
        Material::combine_pair(&Material::default(), &Material::default())
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::ZERO,
        }
    }
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut min = Vec3::splat(f32::MAX);
        let mut max = Vec3::splat(f32::MIN);
        for p in points {
            min = min.min(*p);
            max = max.max(*p);
        }
        Self { min, max }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn expanded(&self, margin: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }
}

/// Helper constructors for common inertia tensors.
pub trait InertiaTensorExt {
    fn for_solid_box(half_extents: Vec3, mass: f32) -> Mat3;
    fn for_solid_sphere(radius: f32, mass: f32) -> Mat3;
    fn for_solid_cylinder(radius: f32, height: f32, mass: f32) -> Mat3;
    fn for_solid_capsule(radius: f32, height: f32, mass: f32) -> Mat3;
}

impl InertiaTensorExt for Mat3 {
    fn for_solid_box(half_extents: Vec3, mass: f32) -> Mat3 {
        let lx = half_extents.x * 2.0;
        let ly = half_extents.y * 2.0;
        let lz = half_extents.z * 2.0;
        let factor = mass / 12.0;
        Mat3::from_diagonal(Vec3::new(
            factor * (ly * ly + lz * lz),
            factor * (lx * lx + lz * lz),
            factor * (lx * lx + ly * ly),
        ))
    }

    fn for_solid_sphere(radius: f32, mass: f32) -> Mat3 {
        Mat3::from_diagonal(Vec3::splat(0.4 * mass * radius * radius))
    }

    fn for_solid_cylinder(radius: f32, height: f32, mass: f32) -> Mat3 {
        let lateral = (1.0 / 12.0) * mass * (3.0 * radius * radius + height * height);
        Mat3::from_diagonal(Vec3::new(lateral, 0.5 * mass * radius * radius, lateral))
    }

    fn for_solid_capsule(radius: f32, height: f32, mass: f32) -> Mat3 {
        let cylinder_mass = mass * 0.6;
        let sphere_mass = (mass - cylinder_mass) / 2.0;

        let cylinder = Mat3::for_solid_cylinder(radius, height, cylinder_mass);
        let spheres = Mat3::from_diagonal(Vec3::splat(0.4 * 2.0 * sphere_mass * radius * radius));
        cylinder + spheres
    }
}
