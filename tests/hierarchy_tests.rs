//! Hierarchy behavior: child-node colliders contribute to the owning body
//! and track its motion.

use kinetra::*;

const DT: f32 = 1.0 / 60.0;

fn sphere_volume(radius: f32) -> f32 {
    (4.0 / 3.0) * std::f32::consts::PI * radius.powi(3)
}

#[test]
fn child_colliders_contribute_mass_and_shift_the_center() {
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::ZERO,
        ..WorldConfig::default()
    });

    let body = world.add_body(RigidBody::default());
    world.attach_collider(body, Collider::sphere(0.5));
    world.add_child_collider(
        body,
        Collider::sphere(0.5),
        Transform::from_position(Vec3::new(2.0, 0.0, 0.0)),
    );
    world.step(DT);

    let body = world.body(body).unwrap();
    let expected_mass = 2.0 * sphere_volume(0.5);
    assert!(
        (body.mass.mass() - expected_mass).abs() < 1e-3,
        "both spheres weigh in, mass = {}",
        body.mass.mass()
    );
    // Equal masses at x = 0 and x = 2: the center of mass sits between.
    assert!(
        (body.center_of_mass.x - 1.0).abs() < 1e-3,
        "center of mass at {:?}",
        body.center_of_mass
    );
}

#[test]
fn child_colliders_follow_the_moving_body() {
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::ZERO,
        ..WorldConfig::default()
    });
    let body = world.add_body(
        RigidBody::builder()
            .velocity(Vec3::new(1.0, 0.0, 0.0), Vec3::ZERO)
            .allow_sleep(false)
            .build(),
    );
    world.attach_collider(body, Collider::sphere(0.2));
    let child = world
        .add_child_collider(
            body,
            Collider::sphere(0.2),
            Transform::from_position(Vec3::new(0.0, 1.0, 0.0)),
        )
        .unwrap();

    for _ in 0..60 {
        world.step(DT);
    }

    let body_x = world.body(body).unwrap().transform.position.x;
    let child_position = world.collider(child).unwrap().world_transform.position;
    assert!((child_position.x - body_x).abs() < 1e-3, "child tracks the body");
    assert!((child_position.y - 1.0).abs() < 1e-3, "child keeps its offset");
}

#[test]
fn casts_against_child_colliders_report_the_owning_body() {
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::ZERO,
        ..WorldConfig::default()
    });
    let body = world.add_body(RigidBody::default());
    world.add_child_collider(
        body,
        Collider::sphere(0.5),
        Transform::from_position(Vec3::new(0.0, 3.0, 0.0)),
    );
    world.step(DT);

    let hits = world.ray_cast(
        &Ray::new(Vec3::new(0.0, 3.0, -5.0), Vec3::Z),
        &CastFilter::default(),
    );
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].body, Some(body));
}
