use gaia_ecs_core::Entity;
use gaia_ecs_core::World;

#[test]
fn group_by_partitions_matches_by_the_relation_target() {
    let mut world = World::new();
    let faction = world.spawn();
    let red = world.spawn();
    let blue = world.spawn();

    let r1 = world.spawn();
    let r2 = world.spawn();
    let b1 = world.spawn();
    world.add_id(r1, Entity::new_pair(faction, red)).unwrap();
    world.add_id(r2, Entity::new_pair(faction, red)).unwrap();
    world.add_id(b1, Entity::new_pair(faction, blue)).unwrap();

    let q = world
        .query()
        .all(Entity::pair_with_wildcard_target(faction))
        .group_by(faction)
        .build();

    let groups = world.grouped(&q);

    let mut reds = groups.get(&red).cloned().unwrap_or_default();
    reds.sort_by_key(|e| e.bits());
    let mut expected_reds = vec![r1, r2];
    expected_reds.sort_by_key(|e| e.bits());
    assert_eq!(reds, expected_reds);

    assert_eq!(groups.get(&blue).cloned().unwrap_or_default(), vec![b1]);
}
