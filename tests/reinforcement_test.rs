//! Access reinforcement and the events it publishes.

mod helpers;

use cortex::events::EventKind;
use helpers::{input_with_importance, test_engine};

#[tokio::test]
async fn three_accesses_reinforce_and_publish() {
    let (engine, clock) = test_engine();
    let memory = engine
        .add(input_with_importance("Reinforced", "frequently used fact", 0.40))
        .await
        .unwrap()
        .memory;

    let mut rx = engine.bus.subscribe();

    let mut salience = memory.salience;
    for i in 1..=3u32 {
        clock.advance_hours(1);
        let accessed = engine.access(memory.id).await.unwrap().unwrap();
        assert_eq!(accessed.access_count, i);
        assert!(accessed.salience > salience, "salience must strictly increase");
        assert!(accessed.last_accessed > memory.last_accessed);
        salience = accessed.salience;
    }

    // Exactly three memory_accessed events, in order, with increasing salience
    let mut salience_seen = 0.0f64;
    for _ in 0..3 {
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::MemoryAccessed);
        assert_eq!(event.data["id"], memory.id);
        let s = event.data["salience"].as_f64().unwrap();
        assert!(s > salience_seen);
        salience_seen = s;
    }
}

#[tokio::test]
async fn event_timestamps_are_monotonic_per_memory() {
    let (engine, _) = test_engine();
    let mut rx = engine.bus.subscribe();

    let memory = engine
        .add(input_with_importance("Chatty", "content emitting events", 0.5))
        .await
        .unwrap()
        .memory;
    engine.access(memory.id).await.unwrap();
    engine.access(memory.id).await.unwrap();
    engine.delete(memory.id).await.unwrap();

    let mut last = None;
    for _ in 0..4 {
        let event = rx.recv().await.unwrap();
        if let Some(previous) = last {
            assert!(event.timestamp >= previous);
        }
        last = Some(event.timestamp);
    }
}

#[tokio::test]
async fn reinforcement_boost_diminishes() {
    let (engine, _) = test_engine();
    let memory = engine
        .add(input_with_importance("Diminishing", "diminishing returns probe", 0.30))
        .await
        .unwrap()
        .memory;

    let first = engine.access(memory.id).await.unwrap().unwrap();
    let first_gain = first.salience - memory.salience;

    let mut previous = first.salience;
    for _ in 0..5 {
        previous = engine.access(memory.id).await.unwrap().unwrap().salience;
    }
    let sixth = engine.access(memory.id).await.unwrap().unwrap();
    let late_gain = sixth.salience - previous;

    assert!(late_gain < first_gain, "boost must shrink with access count");
    assert!(sixth.salience <= 1.0);
}
