//! End-to-end pipeline scenarios: ballistic motion, resting stacks, and the
//! warm-start behavior of the contact cache.

use kinetra::*;

const DT: f32 = 1.0 / 60.0;

fn flat_material() -> Material {
    Material {
        restitution: 0.0,
        static_friction: 0.5,
        dynamic_friction: 0.5,
        ..Material::default()
    }
}

#[test]
fn falling_sphere_matches_closed_form() {
    // Unit sphere, mass 1, dropped from y = 10 under g = -10 for one second.
    // The midpoint integrator reproduces the closed form 10 - 5 t^2 exactly.
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::new(0.0, -10.0, 0.0),
        integration: IntegrationMethod::Rk2,
        ..WorldConfig::default()
    });

    let body = world.add_body(
        RigidBody::builder()
            .position(Vec3::new(0.0, 10.0, 0.0))
            .mass(1.0)
            .build(),
    );
    world.attach_collider(body, Collider::sphere(1.0));

    for _ in 0..60 {
        world.step(DT);
    }

    let y = world.body(body).unwrap().transform.position.y;
    assert!(
        (4.95..=5.05).contains(&y),
        "expected y in [4.95, 5.05], got {y}"
    );
}

#[test]
fn untouched_body_conserves_velocity() {
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::ZERO,
        ..WorldConfig::default()
    });
    let body = world.add_body(
        RigidBody::builder()
            .velocity(Vec3::new(3.0, 1.0, -2.0), Vec3::ZERO)
            .allow_sleep(false)
            .build(),
    );

    for _ in 0..60 {
        world.step(DT);
    }

    let velocity = world.body(body).unwrap().velocity.linear;
    assert!((velocity - Vec3::new(3.0, 1.0, -2.0)).length() < 1e-4);
}

#[test]
fn stacked_boxes_come_to_rest() {
    // Three unit boxes on a static floor settle at 0.5 / 1.5 / 2.5 and stop.
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::new(0.0, -10.0, 0.0),
        ..WorldConfig::default()
    });
    let mut solver = SolverConfig::default();
    solver.position_correction = PositionCorrectionMode::PostStabilization;
    solver.contact_block.slop = 0.002;
    solver.position_iterations = 8;
    world.set_solver_config(solver);

    world.add_static_collider(
        Collider::plane(Vec3::Y).with_material(flat_material()),
        Transform::default(),
    );

    let mut boxes = Vec::new();
    for level in 0..3 {
        let body = world.add_body(
            RigidBody::builder()
                .position(Vec3::new(0.0, 0.5 + level as f32, 0.0))
                .build(),
        );
        world.attach_collider(
            body,
            Collider::cuboid(Vec3::splat(0.5)).with_material(flat_material()),
        );
        boxes.push(body);
    }

    for _ in 0..120 {
        world.step(DT);
    }

    for (level, &body) in boxes.iter().enumerate() {
        let body = world.body(body).unwrap();
        let expected = 0.5 + level as f32;
        let y = body.transform.position.y;
        assert!(
            (y - expected).abs() <= 0.01,
            "box {level} rests at {y}, expected {expected} +/- 0.01"
        );
        assert!(
            body.velocity.linear.length() <= 0.02,
            "box {level} still moving at {:?}",
            body.velocity.linear
        );
    }
}

#[test]
fn resting_contact_impulse_converges_to_weight() {
    // A sphere resting on a static plane: the per-frame normal impulse
    // summed over the manifold converges to m * g * dt.
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::new(0.0, -10.0, 0.0),
        ..WorldConfig::default()
    });
    world.add_static_collider(
        Collider::plane(Vec3::Y).with_material(flat_material()),
        Transform::default(),
    );
    let ball = world.add_body(
        RigidBody::builder()
            .position(Vec3::new(0.0, 0.5005, 0.0))
            .mass(1.0)
            .build(),
    );
    world.attach_collider(
        ball,
        Collider::sphere(0.5).with_material(flat_material()),
    );

    for _ in 0..20 {
        world.step(DT);
    }

    let expected = 1.0 * 10.0 * DT;
    let impulse: f32 = world
        .contacts()
        .map(|contact| contact.manifold.total_normal_impulse())
        .sum();
    assert!(
        (impulse - expected).abs() <= expected * 0.01,
        "normal impulse {impulse} should match weight impulse {expected} within 1%"
    );
}

#[test]
fn commit_changes_is_idempotent() {
    let mut world = PhysicsWorld::new(WorldConfig::default());
    let body = world.add_body(
        RigidBody::builder()
            .position(Vec3::new(1.0, 2.0, 3.0))
            .build(),
    );
    world.attach_collider(body, Collider::sphere(0.5));

    world.commit_changes();
    let after_first = world.body(body).unwrap().clone();
    world.commit_changes();
    let after_second = world.body(body).unwrap();

    assert_eq!(after_first.transform, after_second.transform);
    assert_eq!(after_first.center_of_mass, after_second.center_of_mass);
    assert_eq!(after_first.mass.mass(), after_second.mass.mass());
}

#[test]
fn velocity_setters_return_the_clamped_value() {
    let mut world = PhysicsWorld::new(WorldConfig::default());
    let body = world.add_body(RigidBody::default());

    let body_ref = world.body_mut(body).unwrap();
    body_ref.set_velocity(Vec3::splat(1e30));
    assert_eq!(body_ref.velocity.linear, Vec3::splat(1e10));

    body_ref.set_mass(-5.0);
    assert!(body_ref.mass.mass() > 0.0);
}

#[test]
fn threaded_solver_matches_the_sequential_outcome() {
    // Same stack, solved with the batched solver: it must stay together.
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::new(0.0, -10.0, 0.0),
        solver_kind: SolverKind::Threaded,
        ..WorldConfig::default()
    });
    world.add_static_collider(
        Collider::plane(Vec3::Y).with_material(flat_material()),
        Transform::default(),
    );
    let mut boxes = Vec::new();
    for level in 0..3 {
        let body = world.add_body(
            RigidBody::builder()
                .position(Vec3::new(0.0, 0.5 + level as f32, 0.0))
                .build(),
        );
        world.attach_collider(
            body,
            Collider::cuboid(Vec3::splat(0.5)).with_material(flat_material()),
        );
        boxes.push(body);
    }

    for _ in 0..120 {
        world.step(DT);
    }

    for (level, &body) in boxes.iter().enumerate() {
        let y = world.body(body).unwrap().transform.position.y;
        let expected = 0.5 + level as f32;
        assert!(
            (y - expected).abs() < 0.1,
            "threaded solve kept the stack: box {level} at {y}"
        );
    }
}

#[test]
fn kinematic_bodies_publish_synthesized_velocity() {
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::ZERO,
        ..WorldConfig::default()
    });
    let platform = world.add_body(
        RigidBody::builder()
            .dynamic_state(DynamicState::Kinematic)
            .build(),
    );
    world.attach_collider(platform, Collider::cuboid(Vec3::splat(0.5)));
    world.step(DT);

    // Move the platform one unit along X; the synthesized velocity appears
    // after the next commit, one step behind the transform change.
    world.set_transform(platform, Transform::from_position(Vec3::X));
    world.step(DT);

    let velocity = world.body(platform).unwrap().velocity.linear;
    assert!(
        (velocity.x - 1.0 / DT).abs() < 1.0,
        "kinematic velocity should be about {} but was {}",
        1.0 / DT,
        velocity.x
    );
}
