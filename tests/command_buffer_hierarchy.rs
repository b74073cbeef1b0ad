//! Deferred spawn-then-self-parent through a command buffer.

use archetype_ecs::hierarchy::{parent_of, set_parent};
use archetype_ecs::{CommandBuffer, World};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Position {
    x: i32,
    y: i32,
    z: i32,
}

#[test]
fn deferred_spawn_can_reference_the_entity_it_just_created() {
    let mut world = World::new();
    let mut buffer = CommandBuffer::new();

    buffer.add(|world: &mut World| {
        let t = world.spawn_empty();
        world.add_component(t, Position { x: 1, y: 2, z: 3 })?;
        set_parent(world, t, t)?;
        Ok(())
    });

    world.flush_commands(buffer).unwrap();

    let entity = {
        let query: archetype_ecs::Query<'_, archetype_ecs::Required<Position>> = world.query();
        query.iter().next().map(|(e, _)| e).expect("the deferred spawn must have run")
    };

    assert_eq!(world.get::<Position>(entity), Some(&Position { x: 1, y: 2, z: 3 }));
    assert_eq!(parent_of(&world, entity), Some(entity));
}
