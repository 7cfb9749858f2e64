use ecs_core::prelude::*;

fn component(raw: u64) -> ComponentId {
    ComponentId::from_raw(raw)
}

/// spec.md §8 scenario 5: two tables at depth 1 and depth 2 on a `Cascade`
/// column must be iterated in ascending depth.
#[test]
fn cascade_query_visits_tables_in_ascending_depth_order() {
    let mut world = World::new().unwrap();
    world.register_component(component(1), 4, 4, ComponentHooks::default());
    world.register_component(component(2), 4, 4, ComponentHooks::default());

    let shallow = world.create(None).unwrap();
    world.add_component(shallow, component(1), None).unwrap();
    let shallow_table = world.entity_table(shallow).unwrap();
    world.set_table_depth(shallow_table, 2);

    let deep = world.create(None).unwrap();
    world.add_component(deep, component(1), None).unwrap();
    world.add_component(deep, component(2), None).unwrap();
    let deep_table = world.entity_table(deep).unwrap();
    world.set_table_depth(deep_table, 1);

    let mut cascade_term = Term::and(component(1));
    cascade_term.from_kind = FromKind::Cascade;
    let handle = world.register_query(Signature::new(vec![cascade_term]));

    let depths: Vec<u32> = world.iterate(handle).map(|m| m.depth).collect();
    assert_eq!(depths, vec![1, 2]);
}
