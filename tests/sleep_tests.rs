//! Sleep lifecycle: islands fall asleep as a unit, publish their events in
//! the right phase, and wake transitively.

use std::sync::Arc;

use parking_lot::Mutex;

use kinetra::*;

const DT: f32 = 1.0 / 60.0;

fn resting_material() -> Material {
    Material {
        restitution: 0.0,
        ..Material::default()
    }
}

/// One pair of boxes resting side by side on the floor, tied together by a
/// slack spring stick (decorative: it transmits no force at rest length).
fn add_pair(world: &mut PhysicsWorld, x: f32) -> (BodyId, BodyId) {
    let mut add_box = |offset: f32| {
        let body = world.add_body(
            RigidBody::builder()
                .position(Vec3::new(x + offset, 0.499, 0.0))
                .build(),
        );
        let collider = world
            .attach_collider(
                body,
                Collider::cuboid(Vec3::splat(0.5)).with_material(resting_material()),
            )
            .unwrap();
        (body, collider)
    };
    let (a, ca) = add_box(0.0);
    let (b, cb) = add_box(1.5);

    world.add_joint(
        Joint::new(
            ca,
            cb,
            JointKind::Stick {
                anchors: AnchorAtom::new(Vec3::ZERO, Vec3::ZERO),
                length: 1.5,
            },
        )
        .with_spring(JointSpring {
            frequency_hz: 2.0,
            damping_ratio: 1.0,
        }),
    );
    (a, b)
}

#[test]
fn separate_islands_sleep_independently_and_in_the_publish_phase() {
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::new(0.0, -10.0, 0.0),
        ..WorldConfig::default()
    });
    world.add_static_collider(
        Collider::plane(Vec3::Y).with_material(resting_material()),
        Transform::default(),
    );

    let slept = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&slept);
    world.subscribe_events(move |event| {
        if let PhysicsEvent::RigidBodySlept(body) = event {
            sink.lock().push(*body);
        }
    });

    let (a1, a2) = add_pair(&mut world, -10.0);
    let (b1, b2) = add_pair(&mut world, 10.0);

    // Nothing can sleep before the timer elapses (checked with a margin
    // below the 0.5 s timeout).
    let min_steps = (0.4 / DT) as usize;
    for _ in 0..min_steps {
        world.step(DT);
    }
    assert!(
        slept.lock().is_empty(),
        "no body may sleep before the sleep timeout"
    );

    for _ in 0..240 {
        world.step(DT);
    }

    for body in [a1, a2, b1, b2] {
        assert!(
            world.body(body).unwrap().is_asleep(),
            "body should be asleep after settling"
        );
    }
    let slept = slept.lock();
    assert_eq!(slept.len(), 4, "each body reports sleep exactly once");
}

#[test]
fn sleeping_bodies_hold_their_state_bitwise() {
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::new(0.0, -10.0, 0.0),
        ..WorldConfig::default()
    });
    world.add_static_collider(
        Collider::plane(Vec3::Y).with_material(resting_material()),
        Transform::default(),
    );
    let body = world.add_body(
        RigidBody::builder()
            .position(Vec3::new(0.0, 0.499, 0.0))
            .build(),
    );
    world.attach_collider(
        body,
        Collider::cuboid(Vec3::splat(0.5)).with_material(resting_material()),
    );

    for _ in 0..180 {
        world.step(DT);
    }
    assert!(world.body(body).unwrap().is_asleep());

    let before = world.body(body).unwrap().clone();
    world.step(DT);
    let after = world.body(body).unwrap();

    assert_eq!(before.transform, after.transform);
    assert_eq!(before.velocity, after.velocity);
    assert_eq!(before.state, after.state);
}

#[test]
fn an_impulse_wakes_the_sleeper_and_reports_it() {
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::new(0.0, -10.0, 0.0),
        ..WorldConfig::default()
    });
    world.add_static_collider(
        Collider::plane(Vec3::Y).with_material(resting_material()),
        Transform::default(),
    );
    let body = world.add_body(
        RigidBody::builder()
            .position(Vec3::new(0.0, 0.499, 0.0))
            .build(),
    );
    world.attach_collider(
        body,
        Collider::cuboid(Vec3::splat(0.5)).with_material(resting_material()),
    );

    let awoke = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&awoke);
    world.subscribe_events(move |event| {
        if matches!(event, PhysicsEvent::RigidBodyAwoke(_)) {
            *sink.lock() += 1;
        }
    });

    for _ in 0..180 {
        world.step(DT);
    }
    assert!(world.body(body).unwrap().is_asleep());

    world.apply_impulse(body, Vec3::new(0.0, 2.0, 0.0));
    assert!(world.body(body).unwrap().is_awake());
    world.step(DT);
    assert!(*awoke.lock() >= 1, "waking publishes an event");
}

#[test]
fn waking_one_body_wakes_its_island_neighbors() {
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::new(0.0, -10.0, 0.0),
        ..WorldConfig::default()
    });
    world.add_static_collider(
        Collider::plane(Vec3::Y).with_material(resting_material()),
        Transform::default(),
    );

    // Two boxes touching side by side so a contact connects them.
    let mut add_box = |x: f32| {
        let body = world.add_body(
            RigidBody::builder()
                .position(Vec3::new(x, 0.499, 0.0))
                .build(),
        );
        world.attach_collider(
            body,
            Collider::cuboid(Vec3::splat(0.5)).with_material(resting_material()),
        );
        body
    };
    let left = add_box(0.0);
    let right = add_box(0.999);

    for _ in 0..240 {
        world.step(DT);
    }
    assert!(world.body(left).unwrap().is_asleep());
    assert!(world.body(right).unwrap().is_asleep());

    world.apply_impulse(left, Vec3::new(1.0, 0.0, 0.0));
    world.step(DT);

    assert!(
        world.body(right).unwrap().is_awake(),
        "wake-ups propagate through contacts"
    );
}
