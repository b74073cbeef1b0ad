//! Query exclusion (`Not<T>`) and optional (`Optional<T>`) matching.

use archetype_ecs::{Not, Optional, Query, Required, Storage};

#[derive(Clone, Copy)]
struct Position;
#[derive(Clone, Copy)]
struct Velocity;
#[derive(Clone, Copy)]
struct Health;

fn populate() -> Storage {
    let mut storage = Storage::new();
    for _ in 0..3 {
        storage.spawn((Position,));
    }
    for _ in 0..2 {
        storage.spawn((Position, Velocity));
    }
    for _ in 0..4 {
        storage.spawn((Position, Health));
    }
    storage.spawn((Position, Velocity, Health));
    storage
}

#[test]
fn not_excludes_every_archetype_carrying_the_component() {
    let storage = populate();
    let query: Query<'_, (Required<Position>, Not<Velocity>)> = Query::new(&storage);
    assert_eq!(query.count(), 3 + 4);
}

#[test]
fn optional_widens_to_every_archetype_regardless_of_presence() {
    let storage = populate();
    let query: Query<'_, (Required<Position>, Optional<Velocity>)> = Query::new(&storage);
    assert_eq!(query.count(), 3 + 2 + 4 + 1);

    let without_velocity = query.iter().filter(|(_, (_, v))| v.is_none()).count();
    assert_eq!(without_velocity, 3 + 4);
}
