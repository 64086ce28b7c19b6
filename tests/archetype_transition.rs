use gaia_ecs_core::World;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

#[test]
fn attaching_and_detaching_components_moves_between_archetypes() {
    let mut world = World::new();
    let e1 = world.spawn();

    world.set(e1, Position { x: 1.0, y: 2.0, z: 3.0 }).unwrap();
    world.set(e1, Velocity { x: 4.0, y: 5.0, z: 6.0 }).unwrap();

    assert_eq!(world.get::<Position>(e1), Some(&Position { x: 1.0, y: 2.0, z: 3.0 }));
    assert_eq!(world.get::<Velocity>(e1), Some(&Velocity { x: 4.0, y: 5.0, z: 6.0 }));

    world.remove_component::<Velocity>(e1).unwrap();

    assert!(!world.has_component::<Velocity>(e1));
    assert_eq!(world.get::<Position>(e1), Some(&Position { x: 1.0, y: 2.0, z: 3.0 }));
}
