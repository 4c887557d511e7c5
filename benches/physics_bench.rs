use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kinetra::*;

fn falling_grid_world(count: usize) -> PhysicsWorld {
    let mut world = PhysicsWorld::new(WorldConfig {
        gravity: Vec3::new(0.0, -10.0, 0.0),
        ..WorldConfig::default()
    });
    world.add_static_collider(Collider::plane(Vec3::Y), Transform::default());
    let side = (count as f32).sqrt().ceil() as usize;
    for i in 0..count {
        let x = (i % side) as f32 * 1.5;
        let z = (i / side) as f32 * 1.5;
        let body = world.add_body(
            RigidBody::builder()
                .position(Vec3::new(x, 2.0, z))
                .build(),
        );
        world.attach_collider(body, Collider::sphere(0.5));
    }
    world
}

fn bench_step_100_spheres(c: &mut Criterion) {
    c.bench_function("step_100_spheres_on_plane", |b| {
        let mut world = falling_grid_world(100);
        b.iter(|| {
            world.step(black_box(1.0 / 60.0));
        })
    });
}

fn bench_stack_solve(c: &mut Criterion) {
    c.bench_function("step_10_box_stack", |b| {
        let mut world = PhysicsWorld::new(WorldConfig {
            gravity: Vec3::new(0.0, -10.0, 0.0),
            ..WorldConfig::default()
        });
        world.add_static_collider(Collider::plane(Vec3::Y), Transform::default());
        for level in 0..10 {
            let body = world.add_body(
                RigidBody::builder()
                    .position(Vec3::new(0.0, 0.5 + level as f32, 0.0))
                    .build(),
            );
            world.attach_collider(body, Collider::cuboid(Vec3::splat(0.5)));
        }
        b.iter(|| {
            world.step(black_box(1.0 / 60.0));
        })
    });
}

fn bench_ray_cast(c: &mut Criterion) {
    c.bench_function("ray_cast_100_spheres", |b| {
        let world = falling_grid_world(100);
        let ray = Ray::new(Vec3::new(-1.0, 2.0, 0.0), Vec3::X);
        b.iter(|| {
            black_box(world.ray_cast(&ray, &CastFilter::default()));
        })
    });
}

criterion_group!(benches, bench_step_100_spheres, bench_stack_solve, bench_ray_cast);
criterion_main!(benches);
