//! Room tick benchmarks.
//!
//! Measures a full `Room::update` (drain, movement, projection and diff) at
//! growing session counts, and the projector alone against a moving world.
//! At 60 Hz the whole tick has a 16.67ms budget.
//!
//! Run with: `cargo bench --bench tick_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use ripple_room::prelude::*;
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A seeded room with `sessions` joined and spawned shapes.
fn populated_room(sessions: usize) -> Room {
    let mut room = Room::on_create(&json!({"seed": 2024})).expect("room options are valid");
    for i in 0..sessions {
        room.on_join(SessionId::new(format!("s{i}")), &JoinOptions::default())
            .expect("join succeeds");
    }
    room.update(0.0).expect("first tick succeeds");
    room
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Full tick with every shape moving, so every entity emits a patch entry.
fn bench_room_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("room_update");
    for count in [10usize, 100, 1_000] {
        let mut room = populated_room(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let patch = room.update(black_box(1.0 / 60.0)).expect("tick succeeds");
                black_box(patch.changes.len());
            });
        });
    }
    group.finish();
}

/// Join churn: one join and one leave queued per tick on top of 100 shapes.
fn bench_session_churn(c: &mut Criterion) {
    let mut room = populated_room(100);
    let mut next = 0u64;
    c.bench_function("session_churn_100", |b| {
        b.iter(|| {
            let session = SessionId::new(format!("churn-{next}"));
            next += 1;
            room.on_join(session.clone(), &JoinOptions::default())
                .expect("join succeeds");
            room.update(1.0 / 60.0).expect("tick succeeds");
            room.on_leave(&session).expect("leave succeeds");
        });
    });
}

/// Projection and diff only.
fn bench_projector(c: &mut Criterion) {
    let mut group = c.benchmark_group("projector_publish");
    for count in [100usize, 1_000] {
        let mut world = World::new();
        register_all(&mut world).expect("components register");
        let entities: Vec<EntityId> = (0..count)
            .map(|i| {
                let e = world.create().expect("create succeeds");
                world
                    .add(e, Position { x: i as f64, y: 0.0 })
                    .expect("add succeeds");
                e
            })
            .collect();
        let mut projector = StateProjector::new();
        let mut tick = 0u64;
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                tick += 1;
                for &e in &entities {
                    if let Some(p) = world.get_mut::<Position>(e) {
                        p.y += 1.0;
                    }
                }
                black_box(projector.publish(&world, tick));
            });
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Criterion groups and main
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_room_update,
    bench_session_churn,
    bench_projector,
);
criterion_main!(benches);
