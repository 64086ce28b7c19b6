use gaia_ecs_core::limits::{CHUNK_BLOCK_SIZE_SMALL, MEMORY_BLOCK_USABLE_OFFSET};
use gaia_ecs_core::World;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

/// Change tracking is per chunk, not per row - bumping one entity's column
/// version marks its whole chunk touched. This test fills chunk 0 and
/// chunk 1 to capacity so `e1` and `e2` land alone at the head of separate
/// chunks, and only `e1`'s chunk should be reported as changed.
#[test]
fn changed_term_only_matches_the_chunk_touched_since_last_run() {
    let mut world = World::new();
    let row_bytes = std::mem::size_of::<Position>();
    let capacity = (CHUNK_BLOCK_SIZE_SMALL - MEMORY_BLOCK_USABLE_OFFSET) / row_bytes;

    for _ in 0..capacity {
        world.spawn_bundle((Position { x: 0.0, y: 0.0 },));
    }
    let e1 = world.spawn_bundle((Position { x: 0.0, y: 0.0 },));
    for _ in 0..(capacity - 1) {
        world.spawn_bundle((Position { x: 0.0, y: 0.0 },));
    }
    let e2 = world.spawn_bundle((Position { x: 0.0, y: 0.0 },));

    let pos_id = world.component_id::<Position>().unwrap();
    let q = world.query().all(pos_id).changed(pos_id).build();

    let baseline = world.arr(&q);
    assert!(baseline.contains(&e1));
    assert!(baseline.contains(&e2));

    world.set(e1, Position { x: 1.0, y: 1.0 }).unwrap();

    let after = world.arr(&q);
    assert!(after.contains(&e1));
    assert!(!after.contains(&e2));
}
