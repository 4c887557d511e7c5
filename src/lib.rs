//! Kinetra – a constraint-based rigid body dynamics kernel.
//!
//! The crate evolves populations of rigid bodies under gravity, user
//! forces, and pairwise contact/joint constraints. Each simulation world
//! steps independently through a fixed pipeline: deferred-mutation flush,
//! effect application, integration, collision and contact caching, island
//! assembly, an iterative velocity solve with warm starting, position
//! correction, sleep management, and event publication.

pub mod collision;
pub mod config;
pub mod constraints;
pub mod core;
pub mod dynamics;
pub mod effects;
pub mod utils;
pub mod world;

pub use glam::{Mat3, Mat4, Quat, Vec3};

pub use crate::collision::{
    broadphase::BroadPhase,
    contact::{Contact, ContactFlags, PairKey},
    filter::{
        CollisionFilter, CollisionGroup, CollisionTable, FilterBlock, FilterBlockPhase,
        FilterMode,
    },
    manifold::{Manifold, ManifoldPoint},
    queries::{CastFilter, CastHit, Frustum, Ray},
};
pub use crate::config::{
    ConstraintConfigBlock, ContactTangentMode, IntegrationMethod, PositionCorrectionMode,
    PositionSolveKind, SolverConfig, SolverKind, WorldConfig,
};
pub use crate::constraints::{
    atoms::{AnchorAtom, AngleAtom, AxisAtom, SpringAtom},
    joints::{CustomRow, Joint, JointFlags, JointKind, JointKindId},
    sidecars::{JointConfigOverride, JointLimit, JointMotor, JointSpring},
};
pub use crate::core::{
    body::{DynamicState, Mode2D, RigidBody, RigidBodyBuilder},
    collider::{Collider, ColliderShape},
    mesh::{ConvexMesh, MeshError, MultiConvexMesh, PhysicsMesh},
    types::{Aabb, Material, MaterialMixing, MixingMode, Transform, Velocity},
};
pub use crate::effects::{
    EffectEndCondition, EffectInterpolation, EffectKind, EffectScope, Falloff, PhysicsEffect,
};
pub use crate::utils::allocator::{Arena, BodyId, ColliderId, EffectId, EntityId, JointId, NodeId};
pub use crate::world::{
    events::{CollisionEventData, ContactPointView, PhysicsEvent},
    PhysicsWorld,
};
