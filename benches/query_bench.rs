//! Benchmarks for the query engine: cold compile, cached re-run, and
//! wildcard relationship matching.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gaia_ecs_core::World;

#[derive(Debug, Clone, Copy)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, Copy)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

fn populated_world(n: usize) -> (World, gaia_ecs_core::Entity) {
    let mut world = World::new();
    for i in 0..n {
        if i % 2 == 0 {
            world.spawn_bundle((Position { x: i as f32, y: 0.0, z: 0.0 },));
        } else {
            world.spawn_bundle((
                Position { x: i as f32, y: 0.0, z: 0.0 },
                Velocity { x: 1.0, y: 0.0, z: 0.0 },
            ));
        }
    }
    let pos_id = world.component_id::<Position>().unwrap();
    (world, pos_id)
}

fn bench_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");

    group.bench_function("first_run_10k_entities", |b| {
        b.iter_batched(
            || populated_world(10_000),
            |(mut world, pos_id)| {
                let q = world.query().all(pos_id).build();
                black_box(world.count(&q));
            },
            criterion::BatchSize::LargeInput,
        );
    });

    group.bench_function("cached_rerun_10k_entities", |b| {
        let (mut world, pos_id) = populated_world(10_000);
        let q = world.query().all(pos_id).build();
        world.count(&q);
        b.iter(|| {
            black_box(world.count(&q));
        });
    });

    group.bench_function("wildcard_relation_10k_entities", |b| {
        let mut world = World::new();
        let likes = world.spawn();
        let targets: Vec<_> = (0..8).map(|_| world.spawn()).collect();
        for i in 0..10_000 {
            let e = world.spawn();
            let t = targets[i % targets.len()];
            world.add_id(e, gaia_ecs_core::Entity::new_pair(likes, t)).unwrap();
        }
        let pattern = gaia_ecs_core::Entity::pair_with_wildcard_target(likes);
        let q = world.query().all(pattern).build();
        b.iter(|| {
            black_box(world.count(&q));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_query);
criterion_main!(benches);
