use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gaia_ecs_core::World;

#[derive(Debug, Clone, Copy)]
struct Position(f32, f32, f32);

#[derive(Debug, Clone, Copy)]
struct Velocity(f32, f32, f32);

#[derive(Debug, Clone, Copy)]
struct Health(u32);

fn spawn_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("spawn_bench");

    group.bench_function("spawn_2_components", |b| {
        let mut world = World::new();
        b.iter(|| {
            for _ in 0..1000 {
                black_box(world.spawn_bundle((Position(1.0, 2.0, 3.0), Velocity(1.0, 0.0, 0.0))));
            }
        });
    });

    group.bench_function("spawn_3_components", |b| {
        let mut world = World::new();
        b.iter(|| {
            for _ in 0..1000 {
                black_box(world.spawn_bundle((Position(1.0, 2.0, 3.0), Velocity(1.0, 0.0, 0.0), Health(100))));
            }
        });
    });

    group.bench_function("spawn_mixed", |b| {
        let mut world = World::new();
        b.iter(|| {
            for i in 0..1000 {
                if i % 2 == 0 {
                    black_box(world.spawn_bundle((Position(1.0, 2.0, 3.0), Velocity(1.0, 0.0, 0.0))));
                } else {
                    black_box(world.spawn_bundle((Position(1.0, 2.0, 3.0), Velocity(1.0, 0.0, 0.0), Health(100))));
                }
            }
        });
    });

    group.bench_function("despawn", |b| {
        b.iter_batched(
            || {
                let mut world = World::new();
                let entities: Vec<_> = (0..1000)
                    .map(|_| world.spawn_bundle((Position(1.0, 2.0, 3.0), Velocity(1.0, 0.0, 0.0))))
                    .collect();
                (world, entities)
            },
            |(mut world, entities)| {
                for e in entities {
                    black_box(world.despawn(e).unwrap());
                }
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, spawn_benchmark);
criterion_main!(benches);
