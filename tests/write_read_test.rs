//! Write/read round trips through the engine.

mod helpers;

use cortex::memory::types::{Category, MemoryPatch, MemoryType, Scope};
use helpers::{input, input_with_importance, test_engine};

#[tokio::test]
async fn add_get_update_get_round_trip() {
    let (engine, _) = test_engine();

    let added = engine
        .add(input("Database decision", "We decided to use PostgreSQL for storage"))
        .await
        .unwrap()
        .memory;

    let fetched = engine.get(added.id).await.unwrap().unwrap();
    assert_eq!(fetched.id, added.id);
    assert_eq!(fetched.title, added.title);
    assert_eq!(fetched.category, Category::Architecture);
    assert!(fetched.salience >= 0.2 && fetched.salience <= 1.0);
    assert!(fetched.decayed_score <= fetched.salience);

    // Patch one field; everything else survives
    let patch = MemoryPatch {
        content: Some("We decided to use PostgreSQL 16 with pgvector".into()),
        ..Default::default()
    };
    let updated = engine.update(added.id, patch).await.unwrap().unwrap();
    assert_eq!(updated.title, added.title);
    assert_eq!(updated.content, "We decided to use PostgreSQL 16 with pgvector");
    assert_eq!(updated.category, added.category);
    assert_eq!(updated.tags, added.tags);
    assert_eq!(updated.created_at, added.created_at);

    let fetched = engine.get(added.id).await.unwrap().unwrap();
    assert_eq!(fetched.content, updated.content);
}

#[tokio::test]
async fn missing_ids_return_none_or_not_found() {
    let (engine, _) = test_engine();
    assert!(engine.get(12345).await.unwrap().is_none());
    assert!(engine.access(12345).await.unwrap().is_none());
    assert!(!engine.delete(12345).await.unwrap());
    assert!(engine
        .update(12345, MemoryPatch::default())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn validation_failures_surface_as_kinds() {
    let (engine, _) = test_engine();

    let err = engine.add(input("", "content")).await.unwrap_err();
    assert_eq!(err.kind(), "validation");

    let err = engine.add(input("title", "   ")).await.unwrap_err();
    assert_eq!(err.kind(), "validation");

    let mut bad = input("title", "content");
    bad.importance = Some(1.5);
    let err = engine.add(bad).await.unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn type_and_scope_inference() {
    let (engine, _) = test_engine();

    // High salience lands in long-term directly
    let critical = engine
        .add(input_with_importance("Security invariant", "never log raw tokens", 0.9))
        .await
        .unwrap()
        .memory;
    assert_eq!(critical.memory_type, MemoryType::LongTerm);
    // "never ..." phrasing makes it global
    assert_eq!(critical.scope, Scope::Global);

    let mundane = engine
        .add(input_with_importance("Scratch", "temporary working state", 0.3))
        .await
        .unwrap()
        .memory;
    assert_eq!(mundane.memory_type, MemoryType::ShortTerm);
    assert_eq!(mundane.scope, Scope::Project);
}

#[tokio::test]
async fn content_cap_boundary() {
    let (engine, _) = test_engine();

    let exactly = "x".repeat(10 * 1024);
    let at_cap = engine.add(input("At cap", &exactly)).await.unwrap().memory;
    assert_eq!(at_cap.content.len(), 10 * 1024);
    assert!(!at_cap.content.contains("truncated"));

    let over = "y".repeat(10 * 1024 + 1);
    let truncated = engine.add(input("Over cap", &over)).await.unwrap().memory;
    assert!(truncated.content.len() <= 10 * 1024);
    assert!(truncated.content.contains("[content truncated]"));
}

#[tokio::test]
async fn recent_high_priority_and_project_views() {
    let (engine, _) = test_engine();

    let mut scoped = input_with_importance("Project fact", "alpha specifics", 0.6);
    scoped.project = Some("alpha".into());
    engine.add(scoped).await.unwrap();

    let mut other = input_with_importance("Other fact", "beta specifics", 0.9);
    other.project = Some("beta".into());
    engine.add(other).await.unwrap();

    let recents = engine.recent(10, Some("alpha".into())).await.unwrap();
    assert_eq!(recents.len(), 1);
    assert_eq!(recents[0].title, "Project fact");

    let important = engine.high_priority(10, None).await.unwrap();
    assert_eq!(important.len(), 2);
    assert_eq!(important[0].title, "Other fact");

    let by_type = engine
        .by_type(cortex::memory::types::MemoryType::LongTerm, 10)
        .await
        .unwrap();
    assert_eq!(by_type.len(), 1); // only the 0.9-importance row

    let project = engine.project_memories("alpha".into()).await.unwrap();
    assert_eq!(project.len(), 1);
}

#[tokio::test]
async fn salience_invariants_hold_across_operations() {
    let (engine, _) = test_engine();

    for importance in [0.0, 0.2, 0.5, 0.99, 1.0] {
        let memory = engine
            .add(input_with_importance(
                &format!("inv {importance}"),
                "invariant probe content",
                importance,
            ))
            .await
            .unwrap()
            .memory;
        assert!((0.0..=1.0).contains(&memory.salience));
        assert!(memory.decayed_score >= 0.0 && memory.decayed_score <= memory.salience + 1e-9);

        let accessed = engine.access(memory.id).await.unwrap().unwrap();
        assert!(accessed.salience >= memory.salience);
        assert!(accessed.salience <= 1.0);
    }
}
