use ecs_core::prelude::*;

fn component(raw: u64) -> ComponentId {
    ComponentId::from_raw(raw)
}

/// spec.md §8 scenario 6: populate a world, snapshot it, restore into a
/// fresh world, and confirm entities and component bytes survive intact.
#[test]
fn world_state_survives_a_snapshot_and_restore_round_trip() {
    let mut world = World::new().unwrap();
    world.register_component(component(1), 4, 4, ComponentHooks::default());

    let e = world.create(None).unwrap();
    world.add_component(e, component(1), None).unwrap();
    world.set_component(e, component(1), &55i32.to_ne_bytes(), None).unwrap();

    let snapshot = world.snapshot(&[]);
    let restored = World::restore(&snapshot).unwrap();

    assert!(restored.is_alive(e));
    let handle = restored.register_query(Signature::new(vec![Term::and(component(1))]));
    let table = restored.iterate(handle).next().unwrap().table;
    let bytes = restored.table(table).get_component_raw(component(1), 0).unwrap();
    assert_eq!(i32::from_ne_bytes(bytes.try_into().unwrap()), 55);
}

/// A snapshot taken with a non-empty filter only carries the listed
/// components; everything else on the same entity is dropped.
#[test]
fn filtered_snapshot_drops_components_outside_the_filter() {
    let mut world = World::new().unwrap();
    world.register_component(component(1), 4, 4, ComponentHooks::default());
    world.register_component(component(2), 4, 4, ComponentHooks::default());

    let e = world.create(None).unwrap();
    world.add_component(e, component(1), None).unwrap();
    world.add_component(e, component(2), None).unwrap();
    world.set_component(e, component(1), &1i32.to_ne_bytes(), None).unwrap();
    world.set_component(e, component(2), &2i32.to_ne_bytes(), None).unwrap();

    let snapshot = world.snapshot(&[component(1)]);
    assert_eq!(snapshot.tables[0].type_ids, vec![1]);

    let restored = World::restore(&snapshot).unwrap();
    let record = {
        let handle = restored.register_query(Signature::new(vec![Term::and(component(1))]));
        restored.iterate(handle).next().unwrap().table
    };
    assert!(restored.table(record).get_component_raw(component(2), 0).is_none());
}

/// Restoring reinstates entities at their original ids rather than minting
/// fresh ones, so a `create()` afterward never collides with a restored id.
#[test]
fn restore_does_not_collide_with_subsequent_creates() {
    let mut world = World::new().unwrap();
    world.register_component(component(1), 4, 4, ComponentHooks::default());
    let e = world.create(None).unwrap();
    world.add_component(e, component(1), None).unwrap();

    let snapshot = world.snapshot(&[]);
    let mut restored = World::restore(&snapshot).unwrap();
    assert!(restored.is_alive(e));

    let fresh = restored.create(None).unwrap();
    assert_ne!(fresh, e);
    assert!(restored.is_alive(fresh));
}
