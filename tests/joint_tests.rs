//! Joint library scenarios: motors, limits, breakage, and positional locks.

use std::sync::Arc;

use parking_lot::Mutex;

use kinetra::*;

const DT: f32 = 1.0 / 60.0;

fn zero_gravity_world() -> PhysicsWorld {
    PhysicsWorld::new(WorldConfig {
        gravity: Vec3::ZERO,
        ..WorldConfig::default()
    })
}

/// Two free bodies with small colliders far enough apart not to touch.
fn body_pair(world: &mut PhysicsWorld) -> ((BodyId, ColliderId), (BodyId, ColliderId)) {
    let a = world.add_body(
        RigidBody::builder()
            .position(Vec3::ZERO)
            .mass(1.0)
            .allow_sleep(false)
            .build(),
    );
    let ca = world.attach_collider(a, Collider::sphere(0.1)).unwrap();
    let b = world.add_body(
        RigidBody::builder()
            .position(Vec3::new(2.0, 0.0, 0.0))
            .mass(1.0)
            .allow_sleep(false)
            .build(),
    );
    let cb = world.attach_collider(b, Collider::sphere(0.1)).unwrap();
    ((a, ca), (b, cb))
}

fn relative_angle_about_z(world: &PhysicsWorld, a: BodyId, b: BodyId) -> f32 {
    let qa = world.body(a).unwrap().transform.rotation;
    let qb = world.body(b).unwrap().transform.rotation;
    let relative = qb * qa.inverse();
    let (axis, angle) = relative.to_axis_angle();
    angle * axis.z.signum()
}

#[test]
fn revolute_motor_converges_to_target_speed() {
    let mut world = zero_gravity_world();
    let ((a, ca), (b, cb)) = body_pair(&mut world);

    let ta = Transform::default();
    let tb = Transform::from_position(Vec3::new(2.0, 0.0, 0.0));
    let kind = JointKind::Revolute {
        anchors: AnchorAtom::new(Vec3::X, Vec3::NEG_X),
        axes: AxisAtom::new(Vec3::Z, Vec3::Z),
        reference: AngleAtom::from_current(&ta, &tb),
    };
    world.add_joint(
        Joint::new(ca, cb, kind)
            .with_motor(JointMotor::new(std::f32::consts::TAU, 1000.0)),
    );

    // Let the motor spin up for five seconds.
    for _ in 0..300 {
        world.step(DT);
    }

    let before = relative_angle_about_z(&world, a, b);
    world.step(DT);
    let after = relative_angle_about_z(&world, a, b);

    // Normalize the wrap-around of the measured angle.
    let mut increment = after - before;
    while increment < -std::f32::consts::PI {
        increment += std::f32::consts::TAU;
    }
    while increment > std::f32::consts::PI {
        increment -= std::f32::consts::TAU;
    }
    let expected = std::f32::consts::TAU / 60.0;
    assert!(
        (increment - expected).abs() <= 1e-3,
        "per-step angle increment {increment} should be {expected} +/- 1e-3"
    );
}

#[test]
fn revolute_limit_stops_the_motor_and_raises_an_event() {
    let mut world = zero_gravity_world();
    let ((a, ca), (b, cb)) = body_pair(&mut world);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    world.subscribe_events(move |event| {
        if matches!(event, PhysicsEvent::JointUpperLimitReached(_)) {
            sink.lock().push(());
        }
    });

    let ta = Transform::default();
    let tb = Transform::from_position(Vec3::new(2.0, 0.0, 0.0));
    let kind = JointKind::Revolute {
        anchors: AnchorAtom::new(Vec3::X, Vec3::NEG_X),
        axes: AxisAtom::new(Vec3::Z, Vec3::Z),
        reference: AngleAtom::from_current(&ta, &tb),
    };
    world.add_joint(
        Joint::new(ca, cb, kind)
            .with_motor(JointMotor::new(4.0, 1000.0))
            .with_limit(JointLimit::new(-0.5, 0.5)),
    );

    for _ in 0..120 {
        world.step(DT);
    }

    let angle = relative_angle_about_z(&world, a, b).abs();
    assert!(
        angle < 0.7,
        "limit should hold the hinge near 0.5 rad, got {angle}"
    );
    assert!(!events.lock().is_empty(), "upper limit event should fire");
}

#[test]
fn stick_joint_holds_its_length() {
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::new(0.0, -10.0, 0.0),
        ..WorldConfig::default()
    });

    // A pendulum bob hanging from a static anchor by a rigid stick.
    let anchor = world.add_static_collider(Collider::sphere(0.1), Transform::default());
    let bob = world.add_body(
        RigidBody::builder()
            .position(Vec3::new(2.0, 0.0, 0.0))
            .mass(1.0)
            .allow_sleep(false)
            .build(),
    );
    let bob_collider = world.attach_collider(bob, Collider::sphere(0.1)).unwrap();

    world.add_joint(Joint::new(
        anchor,
        bob_collider,
        JointKind::Stick {
            anchors: AnchorAtom::new(Vec3::ZERO, Vec3::ZERO),
            length: 2.0,
        },
    ));

    for _ in 0..180 {
        world.step(DT);
    }

    let distance = world.body(bob).unwrap().transform.position.length();
    assert!(
        (distance - 2.0).abs() < 0.05,
        "stick length drifted to {distance}"
    );
}

#[test]
fn weld_joint_keeps_the_relative_pose() {
    let mut world = zero_gravity_world();
    let ((a, ca), (b, cb)) = body_pair(&mut world);

    let ta = Transform::default();
    let tb = Transform::from_position(Vec3::new(2.0, 0.0, 0.0));
    world.add_joint(Joint::new(
        ca,
        cb,
        JointKind::Weld {
            anchors: AnchorAtom::new(Vec3::X, Vec3::NEG_X),
            reference: AngleAtom::from_current(&ta, &tb),
        },
    ));

    world.apply_impulse(a, Vec3::new(0.0, 2.0, 0.0));
    for _ in 0..120 {
        world.step(DT);
    }

    let pa = world.body(a).unwrap().transform.position;
    let pb = world.body(b).unwrap().transform.position;
    let separation = (pb - pa).length();
    assert!(
        (separation - 2.0).abs() < 0.1,
        "welded bodies separated to {separation}"
    );

    let angle = relative_angle_about_z(&world, a, b).abs();
    assert!(angle < 0.1, "welded bodies twisted by {angle}");
}

#[test]
fn breakable_joint_snaps_and_reports() {
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::new(0.0, -10.0, 0.0),
        ..WorldConfig::default()
    });

    let events = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&events);
    world.subscribe_events(move |event| {
        if matches!(event, PhysicsEvent::JointExceedImpulseLimit(_)) {
            *sink.lock() += 1;
        }
    });

    let anchor = world.add_static_collider(Collider::sphere(0.1), Transform::default());
    let weight = world.add_body(
        RigidBody::builder()
            .position(Vec3::new(0.0, -2.0, 0.0))
            .mass(1.0)
            .allow_sleep(false)
            .build(),
    );
    let weight_collider = world.attach_collider(weight, Collider::sphere(0.1)).unwrap();

    let joint_id = world.add_joint(
        Joint::new(
            anchor,
            weight_collider,
            JointKind::Stick {
                anchors: AnchorAtom::new(Vec3::ZERO, Vec3::ZERO),
                length: 2.0,
            },
        )
        // Holding the weight needs ~0.167 impulse per step; this budget
        // cannot carry it.
        .with_max_impulse(0.05),
    );
    // Default joints keep solving after exceeding; request snapping.
    world
        .joint_mut(joint_id)
        .unwrap()
        .flags
        .insert(JointFlags::AUTO_SNAPS);

    for _ in 0..60 {
        world.step(DT);
    }

    assert!(*events.lock() > 0, "exceed-impulse event should fire");
    assert!(
        !world.joint(joint_id).unwrap().flags.contains(JointFlags::VALID),
        "auto-snapping joint should invalidate itself"
    );
    let y = world.body(weight).unwrap().transform.position.y;
    assert!(y < -2.5, "freed weight should fall, y = {y}");
}

#[test]
fn custom_joint_rows_come_from_the_hook() {
    let mut world = zero_gravity_world();
    let ((a, _ca), (b, cb)) = body_pair(&mut world);
    let _ = a;

    // The hook builds one row pinning body B's x-velocity to zero.
    world.set_custom_joint_hook(move |_, rows| {
        rows.clear();
        let mut row = CustomRow::free();
        row.linear_b = Vec3::X;
        rows.push(row);
    });

    let anchor = world.add_static_collider(Collider::sphere(0.1), Transform::from_position(Vec3::Y * 5.0));
    world.add_joint(Joint::new(anchor, cb, JointKind::Custom { rows: Vec::new() }));

    world.apply_impulse(b, Vec3::new(3.0, 0.0, 0.0));
    for _ in 0..10 {
        world.step(DT);
    }

    let velocity = world.body(b).unwrap().velocity.linear;
    assert!(
        velocity.x.abs() < 1e-3,
        "custom row should cancel x velocity, got {velocity:?}"
    );
}
