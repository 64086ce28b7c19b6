use gaia_ecs_core::World;

#[test]
fn removing_the_middle_entity_moves_the_last_row_into_its_place() {
    let mut world = World::new();
    let tag = world.spawn();

    let e1 = world.spawn();
    let e2 = world.spawn();
    let e3 = world.spawn();
    world.add_id(e1, tag).unwrap();
    world.add_id(e2, tag).unwrap();
    world.add_id(e3, tag).unwrap();

    world.despawn(e2).unwrap();

    assert!(!world.valid(e2));
    assert!(world.valid(e1));
    assert!(world.valid(e3));
    assert!(world.has(e1, tag));
    assert!(world.has(e3, tag));
}
