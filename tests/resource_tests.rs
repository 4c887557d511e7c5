//! Persisted resources: validation on load, dormant recovery, and
//! serialization round trips.

use kinetra::*;

fn tetrahedron() -> (Vec<Vec3>, Vec<u32>) {
    let vertices = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::Z];
    let indices = vec![0, 2, 1, 0, 1, 3, 0, 3, 2, 1, 2, 3];
    (vertices, indices)
}

#[test]
fn invalid_mesh_resources_go_dormant_instead_of_crashing() {
    let bad_index = PhysicsMesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1, 9]);
    assert!(!bad_index.is_valid());

    let partial = PhysicsMesh::new(vec![Vec3::ZERO, Vec3::X, Vec3::Y], vec![0, 1]);
    assert!(!partial.is_valid());

    // A collider built on a dormant mesh contributes nothing to the world.
    let mut world = PhysicsWorld::new(WorldConfig::default());
    let body = world.add_body(RigidBody::builder().mass(2.0).build());
    world.attach_collider(body, Collider::new(ColliderShape::Mesh { mesh: partial }));
    world.step(1.0 / 60.0);
    assert!((world.body(body).unwrap().mass.mass() - 2.0).abs() < 1e-6);
}

#[test]
fn corrected_mesh_recovers_from_dormancy() {
    let (vertices, _) = tetrahedron();
    let mut mesh = PhysicsMesh::new(vertices.clone(), vec![0, 1]);
    assert!(!mesh.is_valid());

    mesh = PhysicsMesh::new(vertices, vec![0, 1, 2]);
    assert!(mesh.is_valid());
    assert_eq!(mesh.triangle_count(), 1);
}

#[test]
fn mesh_payload_survives_a_save_cycle() {
    let (vertices, indices) = tetrahedron();
    let mesh = PhysicsMesh::new(vertices, indices);

    let first = serde_json::to_string(&mesh).unwrap();
    let decoded: PhysicsMesh = serde_json::from_str(&first).unwrap();
    let second = serde_json::to_string(&decoded).unwrap();
    assert_eq!(first, second, "payload must be byte-stable after one cycle");
}

#[test]
fn multi_convex_mesh_precomputes_sub_mesh_properties() {
    let (vertices, indices) = tetrahedron();
    let mesh = MultiConvexMesh::new(vertices, vec![indices.clone(), indices]);
    assert!(mesh.is_valid());
    assert_eq!(mesh.sub_meshes().len(), 2);
    for sub in mesh.sub_meshes() {
        assert!(sub.volume > 0.0);
        assert!(sub.local_aabb.max.cmpge(sub.local_aabb.min).all());
    }
    assert!(mesh.combined_center_of_mass().is_finite());
}

#[test]
fn collision_table_serialization_round_trips() {
    let mut table = CollisionTable::new();
    table
        .register_group(CollisionGroup { id: 1, name: "debris".into() })
        .unwrap();
    table.set_filter(
        0,
        1,
        CollisionFilter::new(FilterMode::SkipResolution)
            .with_block(FilterBlock::new(FilterBlockPhase::Start)),
    );

    let first = serde_json::to_string(&table).unwrap();
    let decoded: CollisionTable = serde_json::from_str(&first).unwrap();
    let second = serde_json::to_string(&decoded).unwrap();
    assert_eq!(first, second);
    assert_eq!(decoded.mode(1, 0), FilterMode::SkipResolution);
}

#[test]
fn material_serialization_round_trips() {
    let material = Material {
        density: 7.8,
        restitution: 0.4,
        static_friction: 0.58,
        dynamic_friction: 0.44,
        restitution_priority: 2,
        friction_priority: 1,
        mixing: MaterialMixing {
            friction: MixingMode::Min,
            restitution: MixingMode::Max,
        },
    };
    let json = serde_json::to_string(&material).unwrap();
    let decoded: Material = serde_json::from_str(&json).unwrap();
    assert_eq!(material, decoded);
}

#[test]
fn solver_config_round_trips_with_joint_blocks() {
    let mut config = SolverConfig::default();
    let mut block = ConstraintConfigBlock::default();
    block.slop = 0.05;
    config.joint_blocks.push((JointKindId::Revolute, block));

    let json = serde_json::to_string(&config).unwrap();
    let decoded: SolverConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded.block_for(JointKindId::Revolute).slop, 0.05);
}

#[test]
fn joint_records_round_trip() {
    let joint = Joint::new(
        EntityId::new(0, 0),
        EntityId::new(1, 0),
        JointKind::Revolute {
            anchors: AnchorAtom::new(Vec3::X, Vec3::NEG_X),
            axes: AxisAtom::new(Vec3::Z, Vec3::Z),
            reference: AngleAtom::default(),
        },
    )
    .with_motor(JointMotor::new(1.0, 50.0))
    .with_limit(JointLimit::new(-1.0, 1.0));

    let json = serde_json::to_string(&joint).unwrap();
    let decoded: Joint = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded.motor, joint.motor);
    assert_eq!(decoded.limit, joint.limit);
    assert_eq!(decoded.atoms.len(), joint.atoms.len());
}
