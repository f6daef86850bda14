//! Property tests for ECS operations.
//!
//! Random sequences of structural operations are applied to a world. After
//! every step the cached query matches must equal a brute-force scan of the
//! alive entities, and issued ids must never repeat.

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;
use ripple_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
struct Pos {
    x: f64,
    y: f64,
}

impl Component for Pos {
    const TAG: &'static str = "Pos";
    const FIELDS: &'static [FieldSchema] = &[
        FieldSchema::new("x", FieldKind::Number),
        FieldSchema::new("y", FieldKind::Number),
    ];
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
struct Vel {
    x: f64,
    y: f64,
}

impl Component for Vel {
    const TAG: &'static str = "Vel";
    const FIELDS: &'static [FieldSchema] = &[
        FieldSchema::new("x", FieldKind::Number),
        FieldSchema::new("y", FieldKind::Number),
    ];
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
struct Tag;

impl Component for Tag {
    const TAG: &'static str = "Tag";
    const FIELDS: &'static [FieldSchema] = &[];
}

/// Operations we can perform on the world.
#[derive(Debug, Clone)]
enum EcsOp {
    Create,
    Destroy(usize),
    AddPos(usize),
    AddVel(usize),
    AddTag(usize),
    RemovePos(usize),
    RemoveVel(usize),
    Reserve,
    SpawnReserved(usize),
    DeferDestroy(usize),
    Flush,
}

fn ecs_op_strategy() -> impl Strategy<Value = EcsOp> {
    prop_oneof![
        3 => Just(EcsOp::Create),
        1 => (0..64usize).prop_map(EcsOp::Destroy),
        2 => (0..64usize).prop_map(EcsOp::AddPos),
        2 => (0..64usize).prop_map(EcsOp::AddVel),
        1 => (0..64usize).prop_map(EcsOp::AddTag),
        1 => (0..64usize).prop_map(EcsOp::RemovePos),
        1 => (0..64usize).prop_map(EcsOp::RemoveVel),
        1 => Just(EcsOp::Reserve),
        1 => (0..64usize).prop_map(EcsOp::SpawnReserved),
        1 => (0..64usize).prop_map(EcsOp::DeferDestroy),
        1 => Just(EcsOp::Flush),
    ]
}

fn pick(ids: &[EntityId], i: usize) -> Option<EntityId> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[i % ids.len()])
    }
}

/// Brute-force set definition of a query's matches.
fn expected_matches(world: &World, check: impl Fn(EntityId) -> bool) -> Vec<EntityId> {
    world.alive_entities().filter(|e| check(*e)).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn query_index_matches_set_definition(ops in prop::collection::vec(ecs_op_strategy(), 1..80)) {
        let mut world = World::new();
        let pos = world.register_component::<Pos>().unwrap();
        let vel = world.register_component::<Vel>().unwrap();
        let tag = world.register_component::<Tag>().unwrap();
        let q_pos = world.register_query(&[pos]).unwrap();
        let q_moving = world.register_query(&[pos, vel]).unwrap();
        let q_tagged = world.register_query(&[tag, pos]).unwrap();

        // Every id ever handed out, plus still-reserved ids.
        let mut issued: Vec<EntityId> = Vec::new();
        let mut reserved: Vec<EntityId> = Vec::new();
        let mut cmds = CommandBuffer::new();

        for op in ops {
            let alive: Vec<EntityId> = world.alive_entities().collect();
            match op {
                EcsOp::Create => issued.push(world.create().unwrap()),
                EcsOp::Destroy(i) => {
                    if let Some(e) = pick(&alive, i) {
                        world.destroy(e).unwrap();
                    }
                }
                EcsOp::AddPos(i) => {
                    if let Some(e) = pick(&alive, i) {
                        let _ = world.add(e, Pos { x: 0.0, y: 0.0 });
                    }
                }
                EcsOp::AddVel(i) => {
                    if let Some(e) = pick(&alive, i) {
                        let _ = world.add(e, Vel { x: 1.0, y: 1.0 });
                    }
                }
                EcsOp::AddTag(i) => {
                    if let Some(e) = pick(&alive, i) {
                        let _ = world.add(e, Tag);
                    }
                }
                EcsOp::RemovePos(i) => {
                    if let Some(e) = pick(&alive, i) {
                        let _ = world.remove::<Pos>(e);
                    }
                }
                EcsOp::RemoveVel(i) => {
                    if let Some(e) = pick(&alive, i) {
                        let _ = world.remove::<Vel>(e);
                    }
                }
                EcsOp::Reserve => {
                    let e = world.reserve_entity();
                    issued.push(e);
                    reserved.push(e);
                }
                EcsOp::SpawnReserved(i) => {
                    if !reserved.is_empty() {
                        let e = reserved.remove(i % reserved.len());
                        let mut bundle = ComponentBundle::new();
                        bundle.add(world.registry(), Pos { x: 1.0, y: 1.0 }).unwrap();
                        bundle.add(world.registry(), Vel { x: 0.0, y: 0.0 }).unwrap();
                        world.spawn_reserved(e, bundle).unwrap();
                    }
                }
                EcsOp::DeferDestroy(i) => {
                    if let Some(e) = pick(&alive, i) {
                        cmds.destroy(e);
                    }
                }
                EcsOp::Flush => {
                    cmds.apply(&mut world);
                }
            }

            prop_assert_eq!(
                world.queries().snapshot(q_pos),
                expected_matches(&world, |e| world.has::<Pos>(e))
            );
            prop_assert_eq!(
                world.queries().snapshot(q_moving),
                expected_matches(&world, |e| world.has::<Pos>(e) && world.has::<Vel>(e))
            );
            prop_assert_eq!(
                world.queries().snapshot(q_tagged),
                expected_matches(&world, |e| world.has::<Pos>(e) && world.has::<Tag>(e))
            );
            for e in world.queries().matches(q_moving) {
                prop_assert!(world.is_alive(e));
            }
        }

        let unique: HashSet<EntityId> = issued.iter().copied().collect();
        prop_assert_eq!(unique.len(), issued.len(), "an entity id was issued twice");
        for pair in issued.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn destroyed_entities_leave_no_records(n in 1usize..40, kill in prop::collection::vec(any::<bool>(), 40)) {
        let mut world = World::new();
        world.register_component::<Pos>().unwrap();
        world.register_component::<Vel>().unwrap();

        let mut survivors = BTreeSet::new();
        for i in 0..n {
            let mut bundle = ComponentBundle::new();
            bundle.add(world.registry(), Pos { x: i as f64, y: 0.0 }).unwrap();
            bundle.add(world.registry(), Vel { x: 0.0, y: i as f64 }).unwrap();
            let e = world.spawn(bundle).unwrap();
            if kill[i] {
                world.destroy(e).unwrap();
            } else {
                survivors.insert(e);
            }
        }

        prop_assert_eq!(world.entity_count(), survivors.len());
        prop_assert_eq!(world.store().record_count(), survivors.len() * 2);
        let with_pos: BTreeSet<EntityId> =
            world.components_of_type::<Pos>().map(|(e, _)| e).collect();
        prop_assert_eq!(with_pos, survivors);
    }
}
