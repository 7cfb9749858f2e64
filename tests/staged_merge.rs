use ecs_core::prelude::*;

fn component(raw: u64) -> ComponentId {
    ComponentId::from_raw(raw)
}

#[test]
fn staged_writes_are_invisible_to_direct_reads_until_merge() {
    let mut world = World::new().unwrap();
    world.register_component(component(1), 4, 4, ComponentHooks::default());

    let e = world.create(None).unwrap();
    world.add_component(e, component(1), None).unwrap();
    world.set_component(e, component(1), &1i32.to_ne_bytes(), None).unwrap();

    world.begin_iteration();
    world
        .set_component(e, component(1), &2i32.to_ne_bytes(), Some(StageId(1)))
        .unwrap();

    // Direct read during iteration still sees the pre-staging value.
    let handle = world.register_query(Signature::new(vec![Term::and(component(1))]));
    let table = world.iterate(handle).next().unwrap().table;
    let before = world.table(table).get_component_raw(component(1), 0).unwrap().to_vec();
    assert_eq!(i32::from_ne_bytes(before.try_into().unwrap()), 1);

    world.merge().unwrap();

    let after = world.table(table).get_component_raw(component(1), 0).unwrap().to_vec();
    assert_eq!(i32::from_ne_bytes(after.try_into().unwrap()), 2);
}

#[test]
fn staged_spawn_is_placed_only_at_merge_time() {
    let mut world = World::new().unwrap();
    world.register_component(component(1), 4, 4, ComponentHooks::default());

    world.begin_iteration();
    let e = world.create(Some(StageId(1))).unwrap();
    world.add_component(e, component(1), Some(StageId(1))).unwrap();
    world
        .set_component(e, component(1), &7i32.to_ne_bytes(), Some(StageId(1)))
        .unwrap();

    assert!(world.is_alive(e));

    world.merge().unwrap();

    let handle = world.register_query(Signature::new(vec![Term::and(component(1))]));
    let table = world.iterate(handle).next().unwrap().table;
    assert_eq!(world.table(table).len(), 1);
    let bytes = world.table(table).get_component_raw(component(1), 0).unwrap();
    assert_eq!(i32::from_ne_bytes(bytes.try_into().unwrap()), 7);
}

#[test]
fn staged_destroy_of_a_newly_spawned_entity_leaves_nothing_behind() {
    let mut world = World::new().unwrap();
    world.register_component(component(1), 4, 4, ComponentHooks::default());

    world.begin_iteration();
    let e = world.create(Some(StageId(1))).unwrap();
    world.add_component(e, component(1), Some(StageId(1))).unwrap();
    world.destroy(e, Some(StageId(1))).unwrap();

    world.merge().unwrap();
    assert!(!world.is_alive(e));
}
