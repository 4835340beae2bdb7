//! Write path — validation, inference, deduplication, storage.
//!
//! [`add_memory`] is the single insert entry point. It infers the category,
//! salience, type, scope, and tags the caller left unspecified, truncates
//! oversized content, and returns an existing near-duplicate instead of
//! inserting a second copy. The FTS index follows every mutation via the
//! schema triggers, so nothing here touches `memories_fts` directly.
//!
//! Events are published by the engine layer after the transaction commits;
//! these functions only return what happened.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;

use crate::db::{with_immediate_transaction, with_transaction};
use crate::error::CortexError;
use crate::memory::types::{
    tags_to_json, Memory, MemoryInput, MemoryLink, MemoryPatch, MemoryType, Scope,
    MAX_CONTENT_BYTES, TRUNCATION_MARKER,
};
use crate::memory::{memory_from_row, MEMORY_COLUMNS};
use crate::salience;

/// Salience at or above which a new memory lands directly in long-term.
pub const CONSOLIDATION_THRESHOLD: f64 = 0.7;

/// Content relevance above which a same-title insert is treated as a duplicate.
const DEDUP_RELEVANCE: f64 = 0.9;

/// Outcome of an [`add_memory`] call.
#[derive(Debug)]
pub struct AddOutcome {
    pub memory: Memory,
    /// `true` if an existing near-duplicate was returned instead of inserting.
    pub deduplicated: bool,
}

/// Insert a new memory, or return an existing near-duplicate.
pub fn add_memory(
    conn: &mut Connection,
    input: &MemoryInput,
    now: DateTime<Utc>,
) -> Result<AddOutcome, CortexError> {
    if input.title.trim().is_empty() {
        return Err(CortexError::Validation("title must not be empty".into()));
    }
    if input.content.trim().is_empty() {
        return Err(CortexError::Validation("content must not be empty".into()));
    }
    if let Some(importance) = input.importance {
        if !(0.0..=1.0).contains(&importance) {
            return Err(CortexError::Validation(
                "importance must be between 0.0 and 1.0".into(),
            ));
        }
    }

    let content = truncate_content(&input.content);
    let category = input
        .category
        .unwrap_or_else(|| salience::suggest_category(&input.title, &content));
    let salience_score = input
        .importance
        .unwrap_or_else(|| salience::calculate(&input.title, &content));
    let memory_type = input.memory_type.unwrap_or({
        if salience_score >= CONSOLIDATION_THRESHOLD {
            MemoryType::LongTerm
        } else {
            MemoryType::ShortTerm
        }
    });
    let tags = crate::memory::types::normalize_tags(match &input.tags {
        Some(tags) if !tags.is_empty() => tags.clone(),
        _ => salience::extract_tags(&input.title, &content),
    });
    let scope = input
        .scope
        .unwrap_or_else(|| infer_scope(category, &input.title, &content, &tags));
    let transferable = input.transferable.unwrap_or(scope == Scope::Global);

    // Dedup gate: an existing memory with the same title in the same project
    // whose content is nearly identical is reinforced by identity, not copied.
    if let Some(existing) = find_duplicate(conn, &input.title, input.project.as_deref(), &content)?
    {
        return Ok(AddOutcome {
            memory: existing,
            deduplicated: true,
        });
    }

    let metadata_json = input
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    let now_str = now.to_rfc3339();

    let id = with_transaction(conn, |tx| {
        tx.execute(
            "INSERT INTO memories (type, category, title, content, project, scope, transferable, \
             tags, salience, decayed_score, access_count, last_accessed, created_at, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, 0, ?10, ?10, ?11)",
            params![
                memory_type.as_str(),
                category.as_str(),
                input.title,
                content,
                input.project,
                scope.as_str(),
                transferable as i64,
                tags_to_json(&tags),
                salience_score,
                now_str,
                metadata_json,
            ],
        )?;
        Ok(tx.last_insert_rowid())
    })?;

    let memory = get_memory(conn, id)?.ok_or_else(|| {
        CortexError::Internal(format!("freshly inserted memory {id} not readable"))
    })?;

    tracing::debug!(id, category = %category, salience = salience_score, "memory stored");

    Ok(AddOutcome {
        memory,
        deduplicated: false,
    })
}

/// Fetch a memory by id.
pub fn get_memory(conn: &Connection, id: i64) -> Result<Option<Memory>, CortexError> {
    let memory = conn
        .query_row(
            &format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?1"),
            params![id],
            memory_from_row,
        )
        .optional()?;
    Ok(memory)
}

/// Apply a patch. Returns the updated row, or `None` when the id is unknown.
pub fn update_memory(
    conn: &mut Connection,
    id: i64,
    patch: &MemoryPatch,
    now: DateTime<Utc>,
) -> Result<Option<Memory>, CortexError> {
    if let Some(salience_value) = patch.salience {
        if !(0.0..=1.0).contains(&salience_value) {
            return Err(CortexError::Validation(
                "salience must be between 0.0 and 1.0".into(),
            ));
        }
    }
    if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(CortexError::Validation("title must not be empty".into()));
    }

    let Some(current) = get_memory(conn, id)? else {
        return Ok(None);
    };

    let title = patch.title.clone().unwrap_or(current.title);
    let content = patch
        .content
        .as_deref()
        .map(truncate_content)
        .unwrap_or(current.content);
    let memory_type = patch.memory_type.unwrap_or(current.memory_type);
    let category = patch.category.unwrap_or(current.category);
    let tags = patch
        .tags
        .clone()
        .map(crate::memory::types::normalize_tags)
        .unwrap_or(current.tags);
    let salience_value = patch.salience.unwrap_or(current.salience);
    let metadata = patch.metadata.clone().or(current.metadata);
    let metadata_json = metadata.as_ref().map(serde_json::to_string).transpose()?;

    with_transaction(conn, |tx| {
        tx.execute(
            "UPDATE memories SET title = ?1, content = ?2, type = ?3, category = ?4, tags = ?5, \
             salience = ?6, metadata = ?7, last_accessed = ?8 WHERE id = ?9",
            params![
                title,
                content,
                memory_type.as_str(),
                category.as_str(),
                tags_to_json(&tags),
                salience_value,
                metadata_json,
                now.to_rfc3339(),
                id,
            ],
        )?;
        Ok(())
    })?;

    get_memory(conn, id)
}

/// Delete a memory. Cascades remove links, mentions, triples, and the FTS row;
/// mentioned entities get their `memory_count` decremented first.
pub fn delete_memory(conn: &mut Connection, id: i64) -> Result<bool, CortexError> {
    with_transaction(conn, |tx| {
        tx.execute(
            "UPDATE entities SET memory_count = MAX(memory_count - 1, 0) \
             WHERE id IN (SELECT DISTINCT entity_id FROM memory_entities WHERE memory_id = ?1)",
            params![id],
        )?;
        let rows = tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    })
}

/// Record an access: bump the count, reinforce salience, refresh timestamps.
///
/// Runs as a single transaction so the count and `last_accessed` never
/// diverge. Returns the post-access row.
pub fn access_memory(
    conn: &mut Connection,
    id: i64,
    now: DateTime<Utc>,
) -> Result<Option<Memory>, CortexError> {
    let updated = with_transaction(conn, |tx| {
        let current = tx
            .query_row(
                "SELECT type, salience, access_count FROM memories WHERE id = ?1",
                params![id],
                |row| {
                    let type_str: String = row.get(0)?;
                    Ok((
                        type_str.parse::<MemoryType>().unwrap_or(MemoryType::ShortTerm),
                        row.get::<_, f64>(1)?,
                        row.get::<_, u32>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((memory_type, current_salience, access_count)) = current else {
            return Ok(false);
        };

        let new_salience = salience::reinforce(current_salience, memory_type, access_count);
        tx.execute(
            "UPDATE memories SET access_count = access_count + 1, salience = ?1, \
             decayed_score = ?1, last_accessed = ?2 WHERE id = ?3",
            params![new_salience, now.to_rfc3339(), id],
        )?;
        Ok(true)
    })?;

    if !updated {
        return Ok(None);
    }
    get_memory(conn, id)
}

/// Most recently created memories, optionally scoped to a project
/// (global-scope memories are always visible).
pub fn recent(
    conn: &Connection,
    limit: usize,
    project: Option<&str>,
) -> Result<Vec<Memory>, CortexError> {
    let sql = match project {
        Some(_) => format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE project = ?1 OR scope = 'global' \
             ORDER BY created_at DESC, id DESC LIMIT ?2"
        ),
        None => format!(
            "SELECT {MEMORY_COLUMNS} FROM memories ORDER BY created_at DESC, id DESC LIMIT ?1"
        ),
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = match project {
        Some(p) => stmt
            .query_map(params![p, limit as i64], memory_from_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(params![limit as i64], memory_from_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}

/// Highest-priority memories under the composite score (no query ranking).
pub fn high_priority(
    conn: &Connection,
    limit: usize,
    project: Option<&str>,
) -> Result<Vec<Memory>, CortexError> {
    // Over-fetch by decayed score, then order by the full composite in memory.
    let candidates = {
        let sql = match project {
            Some(_) => format!(
                "SELECT {MEMORY_COLUMNS} FROM memories \
                 WHERE project = ?1 OR scope = 'global' \
                 ORDER BY decayed_score DESC, id ASC LIMIT ?2"
            ),
            None => format!(
                "SELECT {MEMORY_COLUMNS} FROM memories \
                 ORDER BY decayed_score DESC, id ASC LIMIT ?1"
            ),
        };
        let mut stmt = conn.prepare(&sql)?;
        let fetch = (limit * 3).max(60) as i64;
        match project {
            Some(p) => stmt
                .query_map(params![p, fetch], memory_from_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![fetch], memory_from_row)?
                .collect::<Result<Vec<_>, _>>()?,
        }
    };

    let mut scored: Vec<(f64, Memory)> = candidates
        .into_iter()
        .map(|m| {
            let p = salience::priority(m.salience, m.decayed_score, m.access_count, m.memory_type);
            (p, m)
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.id.cmp(&b.1.id))
    });
    Ok(scored.into_iter().take(limit).map(|(_, m)| m).collect())
}

/// All memories of a given type, newest first.
pub fn by_type(
    conn: &Connection,
    memory_type: MemoryType,
    limit: usize,
) -> Result<Vec<Memory>, CortexError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMORY_COLUMNS} FROM memories WHERE type = ?1 \
         ORDER BY created_at DESC, id DESC LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(params![memory_type.as_str(), limit as i64], memory_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every memory owned by a project (global memories excluded).
pub fn project_memories(conn: &Connection, project: &str) -> Result<Vec<Memory>, CortexError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMORY_COLUMNS} FROM memories WHERE project = ?1 ORDER BY created_at DESC"
    ))?;
    let rows = stmt
        .query_map(params![project], memory_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Recompute and persist `decayed_score` for every memory. Returns the number
/// of rows whose persisted value changed.
pub fn update_decay_scores(conn: &mut Connection, now: DateTime<Utc>) -> Result<usize, CortexError> {
    with_immediate_transaction(conn, |tx| {
        let rows: Vec<(i64, String, f64, String, f64)> = {
            let mut stmt = tx.prepare(
                "SELECT id, type, salience, last_accessed, decayed_score FROM memories",
            )?;
            let collected = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            collected
        };

        let mut changed = 0;
        let mut update = tx.prepare("UPDATE memories SET decayed_score = ?1 WHERE id = ?2")?;
        for (id, type_str, salience_value, last_accessed, stored) in rows {
            let memory_type = type_str.parse::<MemoryType>().unwrap_or(MemoryType::ShortTerm);
            let hours = salience::hours_since(&last_accessed, now);
            let fresh = salience::decayed_score(salience_value, memory_type, hours);
            if (fresh - stored).abs() > 1e-9 {
                update.execute(params![fresh, id])?;
                changed += 1;
            }
        }
        Ok(changed)
    })
}

/// Delete short-term memories whose decayed score fell below `threshold`.
/// Returns the deleted rows (id + title) so callers can publish events.
pub fn cleanup_decayed(
    conn: &mut Connection,
    threshold: f64,
) -> Result<Vec<(i64, String)>, CortexError> {
    with_immediate_transaction(conn, |tx| {
        let doomed: Vec<(i64, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, title FROM memories \
                 WHERE type = 'short_term' AND decayed_score < ?1",
            )?;
            let collected = stmt
                .query_map(params![threshold], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            collected
        };

        for (id, _) in &doomed {
            tx.execute(
                "UPDATE entities SET memory_count = MAX(memory_count - 1, 0) \
                 WHERE id IN (SELECT DISTINCT entity_id FROM memory_entities WHERE memory_id = ?1)",
                params![id],
            )?;
            tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        }
        Ok(doomed)
    })
}

/// Result of a [`link_memories`] call.
#[derive(Debug)]
pub struct LinkOutcome {
    pub link: MemoryLink,
    pub deduplicated: bool,
}

/// Create a directed link between two memories. The `(source, target)` pair is
/// unique; linking an already-linked pair returns the existing edge.
pub fn link_memories(
    conn: &Connection,
    source_id: i64,
    target_id: i64,
    relationship: &str,
    strength: f64,
    now: DateTime<Utc>,
) -> Result<LinkOutcome, CortexError> {
    if source_id == target_id {
        return Err(CortexError::Validation(
            "a memory cannot link to itself".into(),
        ));
    }
    if !(0.0..=1.0).contains(&strength) {
        return Err(CortexError::Validation(
            "strength must be between 0.0 and 1.0".into(),
        ));
    }
    for id in [source_id, target_id] {
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM memories WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(CortexError::NotFound(format!("memory {id}")));
        }
    }

    let existing = conn
        .query_row(
            "SELECT id, source_id, target_id, relationship, strength, created_at \
             FROM memory_links WHERE source_id = ?1 AND target_id = ?2",
            params![source_id, target_id],
            link_from_row,
        )
        .optional()?;
    if let Some(link) = existing {
        return Ok(LinkOutcome {
            link,
            deduplicated: true,
        });
    }

    conn.execute(
        "INSERT INTO memory_links (source_id, target_id, relationship, strength, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![source_id, target_id, relationship, strength, now.to_rfc3339()],
    )?;
    let id = conn.last_insert_rowid();
    let link = conn.query_row(
        "SELECT id, source_id, target_id, relationship, strength, created_at \
         FROM memory_links WHERE id = ?1",
        params![id],
        link_from_row,
    )?;
    Ok(LinkOutcome {
        link,
        deduplicated: false,
    })
}

/// All links, newest first, for the read API.
pub fn all_links(conn: &Connection, limit: usize) -> Result<Vec<MemoryLink>, CortexError> {
    let mut stmt = conn.prepare(
        "SELECT id, source_id, target_id, relationship, strength, created_at \
         FROM memory_links ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit as i64], link_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn link_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryLink> {
    Ok(MemoryLink {
        id: row.get(0)?,
        source_id: row.get(1)?,
        target_id: row.get(2)?,
        relationship: row.get(3)?,
        strength: row.get(4)?,
        created_at: row.get(5)?,
    })
}

// ── Inference helpers ────────────────────────────────────────────────────────

/// Truncate content to the 10 KiB cap at a char boundary, appending a marker.
fn truncate_content(content: &str) -> String {
    if content.len() <= MAX_CONTENT_BYTES {
        return content.to_string();
    }
    let end = content
        .char_indices()
        .take_while(|(i, _)| *i <= MAX_CONTENT_BYTES - TRUNCATION_MARKER.len())
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    format!("{}{TRUNCATION_MARKER}", &content[..end])
}

/// Global scope for pattern/preference/learning categories, universal-claim
/// phrasing, or explicit global tags.
fn infer_scope(
    category: crate::memory::types::Category,
    title: &str,
    content: &str,
    tags: &[String],
) -> Scope {
    if category.defaults_to_global() {
        return Scope::Global;
    }
    let lower = format!("{title} {content}").to_lowercase();
    if ["always", "never", "best practice"]
        .iter()
        .any(|m| lower.contains(m))
    {
        return Scope::Global;
    }
    if tags
        .iter()
        .any(|t| t == "global" || t == "all-projects" || t == "cross-project")
    {
        return Scope::Global;
    }
    Scope::Project
}

/// Token-set Jaccard similarity, the dedup relevance measure.
fn text_relevance(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.to_lowercase().split_whitespace().map(String::from).collect();
    let set_b: HashSet<String> = b.to_lowercase().split_whitespace().map(String::from).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

/// Same title (case-insensitive) in the same project with near-identical
/// content counts as a duplicate.
fn find_duplicate(
    conn: &Connection,
    title: &str,
    project: Option<&str>,
    content: &str,
) -> Result<Option<Memory>, CortexError> {
    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories \
         WHERE LOWER(title) = LOWER(?1) AND project IS ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let candidates: Vec<Memory> = stmt
        .query_map(params![title, project], memory_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(candidates
        .into_iter()
        .find(|m| text_relevance(&m.content, content) > DEDUP_RELEVANCE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::types::Category;
    use chrono::TimeZone;

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn basic_input(title: &str, content: &str) -> MemoryInput {
        MemoryInput {
            title: title.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    #[test]
    fn add_infers_category_salience_and_tags() {
        let mut conn = test_db();
        let outcome = add_memory(
            &mut conn,
            &basic_input("Database decision", "We decided to use PostgreSQL for the schema"),
            t0(),
        )
        .unwrap();

        assert!(!outcome.deduplicated);
        let m = outcome.memory;
        assert_eq!(m.category, Category::Architecture);
        assert!(m.salience > salience::BASE_SALIENCE);
        assert!(m.tags.iter().any(|t| t == "postgresql" || t == "database"));
        assert_eq!(m.access_count, 0);
        assert_eq!(m.decayed_score, m.salience);
    }

    #[test]
    fn add_rejects_empty_title() {
        let mut conn = test_db();
        let err = add_memory(&mut conn, &basic_input("  ", "content"), t0()).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn high_salience_lands_in_long_term() {
        let mut conn = test_db();
        let mut input = basic_input("Critical security fix", "important: always validate tokens");
        input.importance = Some(0.9);
        let outcome = add_memory(&mut conn, &input, t0()).unwrap();
        assert_eq!(outcome.memory.memory_type, MemoryType::LongTerm);
    }

    #[test]
    fn low_salience_lands_in_short_term() {
        let mut conn = test_db();
        let mut input = basic_input("Lunch note", "had soup");
        input.importance = Some(0.3);
        let outcome = add_memory(&mut conn, &input, t0()).unwrap();
        assert_eq!(outcome.memory.memory_type, MemoryType::ShortTerm);
    }

    #[test]
    fn preference_category_is_global_scope() {
        let mut conn = test_db();
        let mut input = basic_input("Indent style", "two spaces everywhere");
        input.category = Some(Category::Preference);
        let outcome = add_memory(&mut conn, &input, t0()).unwrap();
        assert_eq!(outcome.memory.scope, Scope::Global);
        assert!(outcome.memory.transferable);
    }

    #[test]
    fn universal_phrasing_is_global_scope() {
        let mut conn = test_db();
        let mut input = basic_input("Token handling", "never log raw tokens");
        input.category = Some(Category::Note);
        let outcome = add_memory(&mut conn, &input, t0()).unwrap();
        assert_eq!(outcome.memory.scope, Scope::Global);
    }

    #[test]
    fn content_at_cap_is_untouched_and_over_cap_truncated() {
        let mut conn = test_db();

        let exactly = "x".repeat(MAX_CONTENT_BYTES);
        let outcome = add_memory(&mut conn, &basic_input("cap", &exactly), t0()).unwrap();
        assert_eq!(outcome.memory.content.len(), MAX_CONTENT_BYTES);
        assert!(!outcome.memory.content.contains("[content truncated]"));

        let over = "y".repeat(MAX_CONTENT_BYTES + 1);
        let outcome = add_memory(&mut conn, &basic_input("over", &over), t0()).unwrap();
        assert!(outcome.memory.content.len() <= MAX_CONTENT_BYTES);
        assert!(outcome.memory.content.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn duplicate_title_and_content_returns_existing() {
        let mut conn = test_db();
        let mut input = basic_input("Use PostgreSQL", "Decided to use PostgreSQL");
        input.project = Some("p".into());

        let first = add_memory(&mut conn, &input, t0()).unwrap();
        let second = add_memory(&mut conn, &input, t0()).unwrap();

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(second.memory.id, first.memory.id);
        assert_eq!(second.memory.access_count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn same_title_different_project_is_not_duplicate() {
        let mut conn = test_db();
        let mut input = basic_input("Use PostgreSQL", "Decided to use PostgreSQL");
        input.project = Some("p1".into());
        let first = add_memory(&mut conn, &input, t0()).unwrap();

        input.project = Some("p2".into());
        let second = add_memory(&mut conn, &input, t0()).unwrap();
        assert!(!second.deduplicated);
        assert_ne!(second.memory.id, first.memory.id);
    }

    #[test]
    fn same_title_divergent_content_is_not_duplicate() {
        let mut conn = test_db();
        let first = add_memory(
            &mut conn,
            &basic_input("Notes", "completely different words here about caching"),
            t0(),
        )
        .unwrap();
        let second = add_memory(
            &mut conn,
            &basic_input("Notes", "unrelated sentences regarding deployment pipelines"),
            t0(),
        )
        .unwrap();
        assert!(!second.deduplicated);
        assert_ne!(second.memory.id, first.memory.id);
    }

    #[test]
    fn update_patches_fields_and_preserves_others() {
        let mut conn = test_db();
        let added = add_memory(&mut conn, &basic_input("Original", "original content"), t0())
            .unwrap()
            .memory;

        let patch = MemoryPatch {
            content: Some("revised content".into()),
            ..Default::default()
        };
        let later = Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap();
        let updated = update_memory(&mut conn, added.id, &patch, later)
            .unwrap()
            .unwrap();

        assert_eq!(updated.title, "Original");
        assert_eq!(updated.content, "revised content");
        assert_eq!(updated.created_at, added.created_at);
        assert!(updated.last_accessed > added.last_accessed);
    }

    #[test]
    fn update_unknown_id_returns_none() {
        let mut conn = test_db();
        let patch = MemoryPatch::default();
        assert!(update_memory(&mut conn, 999, &patch, t0()).unwrap().is_none());
    }

    #[test]
    fn access_increments_and_reinforces() {
        let mut conn = test_db();
        let mut input = basic_input("Reinforced", "some content");
        input.importance = Some(0.4);
        let added = add_memory(&mut conn, &input, t0()).unwrap().memory;

        let mut last_salience = added.salience;
        for i in 1..=3u32 {
            let later = Utc.with_ymd_and_hms(2026, 3, 1, 12 + i, 0, 0).unwrap();
            let accessed = access_memory(&mut conn, added.id, later).unwrap().unwrap();
            assert_eq!(accessed.access_count, i);
            assert!(accessed.salience > last_salience);
            last_salience = accessed.salience;
        }
        assert!(last_salience <= 1.0);
    }

    #[test]
    fn access_unknown_id_returns_none() {
        let mut conn = test_db();
        assert!(access_memory(&mut conn, 404, t0()).unwrap().is_none());
    }

    #[test]
    fn delete_cascades_everywhere() {
        let mut conn = test_db();
        let a = add_memory(&mut conn, &basic_input("A", "first memory"), t0())
            .unwrap()
            .memory;
        let b = add_memory(&mut conn, &basic_input("B", "second memory"), t0())
            .unwrap()
            .memory;
        link_memories(&conn, a.id, b.id, "related", 0.8, t0()).unwrap();

        assert!(delete_memory(&mut conn, a.id).unwrap());
        assert!(get_memory(&conn, a.id).unwrap().is_none());

        let links: i64 = conn
            .query_row("SELECT COUNT(*) FROM memory_links", [], |r| r.get(0))
            .unwrap();
        assert_eq!(links, 0);

        // FTS row is gone too (trigger)
        let fts: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memories_fts WHERE memories_fts MATCH 'first'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(fts, 0);

        assert!(!delete_memory(&mut conn, a.id).unwrap());
    }

    #[test]
    fn link_dedup_and_validation() {
        let mut conn = test_db();
        let a = add_memory(&mut conn, &basic_input("A", "alpha"), t0()).unwrap().memory;
        let b = add_memory(&mut conn, &basic_input("B", "beta"), t0()).unwrap().memory;

        let first = link_memories(&conn, a.id, b.id, "contradicts", 0.9, t0()).unwrap();
        assert!(!first.deduplicated);
        let second = link_memories(&conn, a.id, b.id, "contradicts", 0.9, t0()).unwrap();
        assert!(second.deduplicated);
        assert_eq!(second.link.id, first.link.id);

        assert_eq!(
            link_memories(&conn, a.id, a.id, "related", 0.5, t0())
                .unwrap_err()
                .kind(),
            "validation"
        );
        assert_eq!(
            link_memories(&conn, a.id, 999, "related", 0.5, t0())
                .unwrap_err()
                .kind(),
            "not_found"
        );
    }

    #[test]
    fn decay_sweep_updates_and_is_idempotent() {
        let mut conn = test_db();
        let mut input = basic_input("Old memory", "stale content");
        input.importance = Some(0.8);
        let added = add_memory(&mut conn, &input, t0()).unwrap().memory;

        // 30 days later
        let later = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();
        let changed = update_decay_scores(&mut conn, later).unwrap();
        assert_eq!(changed, 1);

        let after = get_memory(&conn, added.id).unwrap().unwrap();
        assert!(after.decayed_score < added.salience);
        assert!(after.decayed_score >= 0.0);
        // salience itself is untouched by decay persistence
        assert_eq!(after.salience, added.salience);

        // Second sweep at the same instant changes nothing
        let changed_again = update_decay_scores(&mut conn, later).unwrap();
        assert_eq!(changed_again, 0);
    }

    #[test]
    fn cleanup_removes_decayed_short_term_only() {
        let mut conn = test_db();
        let mut stm = basic_input("Fading note", "short term junk");
        stm.importance = Some(0.4);
        let stm = add_memory(&mut conn, &stm, t0()).unwrap().memory;

        let mut ltm = basic_input("Solid fact", "long term keeper");
        ltm.importance = Some(0.9);
        let ltm = add_memory(&mut conn, &ltm, t0()).unwrap().memory;

        // A month of decay pushes the STM memory below the floor
        let later = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();
        update_decay_scores(&mut conn, later).unwrap();

        let deleted = cleanup_decayed(&mut conn, 0.1).unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].0, stm.id);
        assert!(get_memory(&conn, stm.id).unwrap().is_none());
        assert!(get_memory(&conn, ltm.id).unwrap().is_some());
    }

    #[test]
    fn recent_and_by_type_and_project_queries() {
        let mut conn = test_db();
        let mut a = basic_input("In project", "alpha content");
        a.project = Some("p".into());
        add_memory(&mut conn, &a, t0()).unwrap();

        let mut b = basic_input("Elsewhere", "beta content");
        b.project = Some("q".into());
        add_memory(&mut conn, &b, t0()).unwrap();

        let recents = recent(&conn, 10, Some("p")).unwrap();
        assert!(recents.iter().all(|m| {
            m.project.as_deref() == Some("p") || m.scope == Scope::Global
        }));

        let stm = by_type(&conn, MemoryType::ShortTerm, 10).unwrap();
        assert_eq!(stm.len(), 2);

        let proj = project_memories(&conn, "p").unwrap();
        assert_eq!(proj.len(), 1);
        assert_eq!(proj[0].title, "In project");
    }

    #[test]
    fn text_relevance_behaves() {
        assert!(text_relevance("decided to use postgres", "decided to use postgres") > 0.99);
        assert!(text_relevance("alpha beta gamma", "delta epsilon zeta") < 0.01);
    }
}
