use gaia_ecs_core::Entity;
use gaia_ecs_core::World;

#[test]
fn all_wildcard_term_matches_every_relation_target_pairing() {
    let mut world = World::new();
    let likes = world.spawn();
    let owns = world.spawn();
    let apples = world.spawn();
    let pears = world.spawn();

    let e1 = world.spawn();
    let e2 = world.spawn();
    let e3 = world.spawn();
    world.add_id(e1, Entity::new_pair(likes, apples)).unwrap();
    world.add_id(e2, Entity::new_pair(likes, pears)).unwrap();
    world.add_id(e3, Entity::new_pair(owns, apples)).unwrap();

    let q = world.query().all(Entity::pair_with_wildcard_target(likes)).build();
    let mut matched = world.arr(&q);
    matched.sort_by_key(|e| e.bits());

    let mut expected = vec![e1, e2];
    expected.sort_by_key(|e| e.bits());
    assert_eq!(matched, expected);
}
