//! Insert deduplication: a repeated title+project with near-identical content
//! returns the existing row instead of a second copy.

mod helpers;

use helpers::{input, test_engine};

#[tokio::test]
async fn duplicate_insert_returns_same_id() {
    let (engine, _) = test_engine();

    let mut first = input("Use PostgreSQL", "Decided to use PostgreSQL");
    first.project = Some("p".into());
    let first = engine.add(first).await.unwrap();
    assert!(!first.deduplicated);

    let mut second = input("Use PostgreSQL", "Decided to use PostgreSQL");
    second.project = Some("p".into());
    let second = engine.add(second).await.unwrap();

    assert!(second.deduplicated);
    assert_eq!(second.memory.id, first.memory.id);
    assert_eq!(second.memory.access_count, 0);

    // Only one row exists
    let stats = engine.stats(None).await.unwrap();
    assert_eq!(stats.total_memories, 1);
}

#[tokio::test]
async fn different_project_is_a_new_memory() {
    let (engine, _) = test_engine();

    let mut first = input("Use PostgreSQL", "Decided to use PostgreSQL");
    first.project = Some("p1".into());
    let first = engine.add(first).await.unwrap();

    let mut second = input("Use PostgreSQL", "Decided to use PostgreSQL");
    second.project = Some("p2".into());
    let second = engine.add(second).await.unwrap();

    assert!(!second.deduplicated);
    assert_ne!(second.memory.id, first.memory.id);
}

#[tokio::test]
async fn divergent_content_is_a_new_memory() {
    let (engine, _) = test_engine();

    let mut first = input("Design notes", "caching layer with write-through invalidation");
    first.project = Some("p".into());
    engine.add(first).await.unwrap();

    let mut second = input("Design notes", "frontend routing and component hierarchy");
    second.project = Some("p".into());
    let second = engine.add(second).await.unwrap();

    assert!(!second.deduplicated);
    let stats = engine.stats(None).await.unwrap();
    assert_eq!(stats.total_memories, 2);
}

#[tokio::test]
async fn dedup_is_case_insensitive_on_title() {
    let (engine, _) = test_engine();

    let first = engine
        .add(input("Use PostgreSQL", "Decided to use PostgreSQL"))
        .await
        .unwrap();
    let second = engine
        .add(input("use postgresql", "Decided to use PostgreSQL"))
        .await
        .unwrap();

    assert!(second.deduplicated);
    assert_eq!(second.memory.id, first.memory.id);
}
