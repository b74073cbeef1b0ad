//! Component registration order and the masks derived from it.

use archetype_ecs::Storage;

#[derive(Clone, Copy)]
struct Position {
    #[allow(dead_code)]
    x: f32,
    #[allow(dead_code)]
    y: f32,
    #[allow(dead_code)]
    z: f32,
}
struct Velocity {
    #[allow(dead_code)]
    dx: f32,
    #[allow(dead_code)]
    dy: f32,
    #[allow(dead_code)]
    dz: f32,
}
struct Health(#[allow(dead_code)] i32);

#[test]
fn registration_order_assigns_monotonic_ids() {
    let mut storage = Storage::new();
    let position_id = storage.registry_mut().register::<Position>();
    let velocity_id = storage.registry_mut().register::<Velocity>();
    let health_id = storage.registry_mut().register::<Health>();

    assert_eq!(position_id, 0);
    assert_eq!(velocity_id, 1);
    assert_eq!(health_id, 2);

    let mut mask = archetype_ecs::ComponentMask::EMPTY;
    mask.set(position_id as usize);
    mask.set(velocity_id as usize);
    assert_eq!(mask.words()[0] & 0b111, 0b011);
}

#[test]
fn registration_is_idempotent_by_type() {
    let mut storage = Storage::new();
    let first = storage.registry_mut().register::<Position>();
    let second = storage.registry_mut().register::<Position>();
    assert_eq!(first, second);
}
