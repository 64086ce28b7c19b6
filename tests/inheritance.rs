use gaia_ecs_core::Entity;
use gaia_ecs_core::World;

#[test]
fn is_a_query_follows_the_chain_until_the_link_is_removed() {
    let mut world = World::new();
    let animal = world.spawn();
    let carnivore = world.spawn();
    let wolf = world.spawn();
    world.add_is_a(wolf, carnivore).unwrap();
    world.add_is_a(carnivore, animal).unwrap();

    let w1 = world.spawn();
    world.add_id(w1, wolf).unwrap();

    let is_rel = world.is_relation();
    let q = world.query().all(Entity::new_pair(is_rel, animal)).build();
    assert!(world.arr(&q).contains(&w1));

    world.remove_id(wolf, Entity::new_pair(is_rel, carnivore)).unwrap();
    let still_matched = world.arr(&q);
    assert!(!still_matched.contains(&w1));
}
