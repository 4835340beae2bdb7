//! Entity resolution — dedupe extracted names into stable graph entities.
//!
//! The matching algorithm runs in order and stops at the first hit:
//! exact `(name, type)` → case-insensitive name → alias set → Levenshtein ≤ 2
//! (names longer than 5 chars, length within ±2) → insert new. Alias hits
//! append the incoming casing so future lookups short-circuit earlier.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::CortexError;
use crate::graph::extract::{EntityType, Extraction};

/// Maximum edit distance for a fuzzy entity match.
const FUZZY_MAX_DISTANCE: usize = 2;
/// Fuzzy matching only applies to names longer than this.
const FUZZY_MIN_LEN: usize = 5;

/// Counters from applying one extraction.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub entities_created: usize,
    pub entities_matched: usize,
    pub mentions_added: usize,
    pub triples_added: usize,
}

/// Resolve a name to an entity id, creating the entity when nothing matches.
pub fn resolve_entity(
    conn: &Connection,
    name: &str,
    entity_type: EntityType,
) -> Result<(i64, bool), CortexError> {
    let name = name.trim();

    // 1. Exact (name, type)
    if let Some(id) = conn
        .query_row(
            "SELECT id FROM entities WHERE name = ?1 AND type = ?2",
            params![name, entity_type.as_str()],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
    {
        return Ok((id, false));
    }

    // 2. Case-insensitive name
    if let Some(id) = conn
        .query_row(
            "SELECT id FROM entities WHERE LOWER(name) = LOWER(?1) ORDER BY id LIMIT 1",
            params![name],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
    {
        return Ok((id, false));
    }

    // 3 + 4. Alias and fuzzy scans over the full entity table
    let candidates: Vec<(i64, String, String)> = {
        let mut stmt = conn.prepare("SELECT id, name, aliases FROM entities ORDER BY id")?;
        let collected = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        collected
    };

    let name_lower = name.to_lowercase();

    for (id, _, aliases_json) in &candidates {
        let aliases: Vec<String> = serde_json::from_str(aliases_json).unwrap_or_default();
        if aliases.iter().any(|a| a.to_lowercase() == name_lower) {
            append_alias(conn, *id, name, &aliases)?;
            return Ok((*id, false));
        }
    }

    if name.len() > FUZZY_MIN_LEN {
        for (id, candidate_name, aliases_json) in &candidates {
            let len_diff = candidate_name.len().abs_diff(name.len());
            if len_diff > 2 {
                continue;
            }
            let distance =
                strsim::levenshtein(&name_lower, &candidate_name.to_lowercase());
            if distance <= FUZZY_MAX_DISTANCE {
                let aliases: Vec<String> =
                    serde_json::from_str(aliases_json).unwrap_or_default();
                append_alias(conn, *id, name, &aliases)?;
                return Ok((*id, false));
            }
        }
    }

    // 5. New entity
    conn.execute(
        "INSERT INTO entities (name, type, aliases, memory_count) VALUES (?1, ?2, '[]', 0)",
        params![name, entity_type.as_str()],
    )?;
    Ok((conn.last_insert_rowid(), true))
}

fn append_alias(
    conn: &Connection,
    entity_id: i64,
    alias: &str,
    current: &[String],
) -> Result<(), CortexError> {
    if current.iter().any(|a| a == alias) {
        return Ok(());
    }
    let mut aliases = current.to_vec();
    aliases.push(alias.to_string());
    conn.execute(
        "UPDATE entities SET aliases = ?1 WHERE id = ?2",
        params![serde_json::to_string(&aliases)?, entity_id],
    )?;
    Ok(())
}

/// Apply an extraction for one memory: resolve entities, upsert mentions and
/// triples, and bump `memory_count` once per newly-mentioned entity.
/// Runs inside a transaction.
pub fn apply_extraction(
    conn: &mut Connection,
    memory_id: i64,
    extraction: &Extraction,
) -> Result<ApplyStats, CortexError> {
    let tx = conn.transaction()?;
    let mut stats = ApplyStats::default();

    // Resolve every extracted entity; remember name → id for triple wiring.
    let mut resolved: Vec<(String, i64)> = Vec::new();
    for entity in &extraction.entities {
        let (id, created) = resolve_entity(&tx, &entity.name, entity.entity_type)?;
        if created {
            stats.entities_created += 1;
        } else {
            stats.entities_matched += 1;
        }
        resolved.push((entity.name.clone(), id));
    }

    // Mentions: memory_count bumps only when the mention row is new.
    let mut seen: std::collections::HashSet<i64> = std::collections::HashSet::new();
    for (_, entity_id) in &resolved {
        if !seen.insert(*entity_id) {
            continue;
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO memory_entities (memory_id, entity_id, role) \
             VALUES (?1, ?2, 'mention')",
            params![memory_id, entity_id],
        )?;
        if inserted > 0 {
            stats.mentions_added += 1;
            tx.execute(
                "UPDATE entities SET memory_count = memory_count + 1 WHERE id = ?1",
                params![entity_id],
            )?;
        }
    }

    for triple in &extraction.triples {
        let subject_id = lookup(&resolved, &triple.subject);
        let object_id = lookup(&resolved, &triple.object);
        let (Some(subject_id), Some(object_id)) = (subject_id, object_id) else {
            continue;
        };
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO triples (subject_id, predicate, object_id, source_memory_id) \
             VALUES (?1, ?2, ?3, ?4)",
            params![subject_id, triple.predicate, object_id, memory_id],
        )?;
        if inserted > 0 {
            stats.triples_added += 1;
        }
    }

    tx.commit()?;
    Ok(stats)
}

fn lookup(resolved: &[(String, i64)], name: &str) -> Option<i64> {
    resolved
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, id)| *id)
}

/// Merge entity `remove_id` into `keep_id`: rewire triples and mentions,
/// union aliases (plus the removed primary name), sum memory counts, and
/// delete the removed row. Idempotent — a missing `remove_id` is a no-op.
pub fn merge(conn: &mut Connection, keep_id: i64, remove_id: i64) -> Result<bool, CortexError> {
    if keep_id == remove_id {
        return Err(CortexError::Validation(
            "cannot merge an entity into itself".into(),
        ));
    }

    crate::db::with_immediate_transaction(conn, |tx| {
        let keep: Option<(String, String, i64)> = tx
            .query_row(
                "SELECT name, aliases, memory_count FROM entities WHERE id = ?1",
                params![keep_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((_, keep_aliases_json, keep_count)) = keep else {
            return Err(CortexError::NotFound(format!("entity {keep_id}")));
        };

        let removed: Option<(String, String, i64)> = tx
            .query_row(
                "SELECT name, aliases, memory_count FROM entities WHERE id = ?1",
                params![remove_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let Some((removed_name, removed_aliases_json, removed_count)) = removed else {
            return Ok(false); // already merged
        };

        // Rewire triples; rows that would collide with an existing tuple are
        // left behind by OR IGNORE and swept afterwards.
        tx.execute(
            "UPDATE OR IGNORE triples SET subject_id = ?1 WHERE subject_id = ?2",
            params![keep_id, remove_id],
        )?;
        tx.execute(
            "UPDATE OR IGNORE triples SET object_id = ?1 WHERE object_id = ?2",
            params![keep_id, remove_id],
        )?;
        tx.execute(
            "DELETE FROM triples WHERE subject_id = ?1 OR object_id = ?1",
            params![remove_id],
        )?;

        // Rewire mentions the same way.
        tx.execute(
            "UPDATE OR IGNORE memory_entities SET entity_id = ?1 WHERE entity_id = ?2",
            params![keep_id, remove_id],
        )?;
        tx.execute(
            "DELETE FROM memory_entities WHERE entity_id = ?1",
            params![remove_id],
        )?;

        // Union aliases, adding the removed entity's primary name.
        let mut aliases: Vec<String> =
            serde_json::from_str(&keep_aliases_json).unwrap_or_default();
        let removed_aliases: Vec<String> =
            serde_json::from_str(&removed_aliases_json).unwrap_or_default();
        for alias in removed_aliases.into_iter().chain([removed_name]) {
            if !aliases.iter().any(|a| a.eq_ignore_ascii_case(&alias)) {
                aliases.push(alias);
            }
        }

        tx.execute(
            "UPDATE entities SET aliases = ?1, memory_count = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(&aliases)?,
                keep_count + removed_count,
                keep_id
            ],
        )?;
        tx.execute("DELETE FROM entities WHERE id = ?1", params![remove_id])?;

        Ok(true)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::graph::extract::{ExtractedEntity, ExtractedTriple};

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn insert_memory(conn: &Connection, title: &str) -> i64 {
        conn.execute(
            "INSERT INTO memories (title, content, tags, last_accessed, created_at) \
             VALUES (?1, 'content', '[]', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            params![title],
        )
        .unwrap();
        conn.last_insert_rowid()
    }

    fn entity(name: &str, entity_type: EntityType) -> ExtractedEntity {
        ExtractedEntity {
            name: name.into(),
            entity_type,
        }
    }

    #[test]
    fn exact_match_wins() {
        let conn = test_db();
        let (first, created) = resolve_entity(&conn, "Redis", EntityType::System).unwrap();
        assert!(created);
        let (second, created) = resolve_entity(&conn, "Redis", EntityType::System).unwrap();
        assert!(!created);
        assert_eq!(first, second);
    }

    #[test]
    fn case_insensitive_match() {
        let conn = test_db();
        let (first, _) = resolve_entity(&conn, "PostgreSQL", EntityType::System).unwrap();
        let (second, created) = resolve_entity(&conn, "postgresql", EntityType::System).unwrap();
        assert!(!created);
        assert_eq!(first, second);
    }

    #[test]
    fn alias_match_appends_incoming_casing() {
        let conn = test_db();
        let (id, _) = resolve_entity(&conn, "Kubernetes", EntityType::Tool).unwrap();
        conn.execute(
            "UPDATE entities SET aliases = '[\"k8s\"]' WHERE id = ?1",
            params![id],
        )
        .unwrap();

        let (hit, created) = resolve_entity(&conn, "K8S", EntityType::Tool).unwrap();
        assert!(!created);
        assert_eq!(hit, id);

        let aliases_json: String = conn
            .query_row("SELECT aliases FROM entities WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .unwrap();
        let aliases: Vec<String> = serde_json::from_str(&aliases_json).unwrap();
        assert!(aliases.contains(&"k8s".to_string()));
        assert!(aliases.contains(&"K8S".to_string()));
    }

    #[test]
    fn fuzzy_match_within_two_edits() {
        let conn = test_db();
        let (id, _) = resolve_entity(&conn, "Kubernetes", EntityType::Tool).unwrap();

        // One deletion away
        let (hit, created) = resolve_entity(&conn, "Kuberntes", EntityType::Tool).unwrap();
        assert!(!created);
        assert_eq!(hit, id);

        // The typo is recorded as an alias
        let aliases_json: String = conn
            .query_row("SELECT aliases FROM entities WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .unwrap();
        assert!(aliases_json.contains("Kuberntes"));
    }

    #[test]
    fn fuzzy_skips_short_names() {
        let conn = test_db();
        let (redis, _) = resolve_entity(&conn, "Redis", EntityType::System).unwrap();
        // "Redos" is 1 edit from "Redis" but 5 chars — below the fuzzy minimum
        let (other, created) = resolve_entity(&conn, "Redos", EntityType::System).unwrap();
        assert!(created);
        assert_ne!(redis, other);
    }

    #[test]
    fn fuzzy_respects_length_window() {
        let conn = test_db();
        resolve_entity(&conn, "Gateway", EntityType::Concept).unwrap();
        // Levenshtein 2 would match, but length differs by 3
        let (_, created) = resolve_entity(&conn, "GatewayAPI", EntityType::Concept).unwrap();
        assert!(created);
    }

    #[test]
    fn apply_extraction_counts_mentions_once() {
        let mut conn = test_db();
        let memory_id = insert_memory(&conn, "stack");

        let extraction = Extraction {
            entities: vec![
                entity("Redis", EntityType::System),
                entity("redis", EntityType::System), // duplicate casing
                entity("cortex", EntityType::Project),
            ],
            triples: vec![ExtractedTriple {
                subject: "cortex".into(),
                predicate: "uses".into(),
                object: "Redis".into(),
            }],
        };

        let stats = apply_extraction(&mut conn, memory_id, &extraction).unwrap();
        assert_eq!(stats.entities_created, 2); // Redis + cortex
        assert_eq!(stats.mentions_added, 2);
        assert_eq!(stats.triples_added, 1);

        let redis_count: i64 = conn
            .query_row(
                "SELECT memory_count FROM entities WHERE LOWER(name) = 'redis'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(redis_count, 1);

        // Re-applying the same extraction adds nothing
        let stats = apply_extraction(&mut conn, memory_id, &extraction).unwrap();
        assert_eq!(stats.mentions_added, 0);
        assert_eq!(stats.triples_added, 0);

        let redis_count: i64 = conn
            .query_row(
                "SELECT memory_count FROM entities WHERE LOWER(name) = 'redis'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(redis_count, 1);
    }

    #[test]
    fn same_extraction_from_second_memory_bumps_count() {
        let mut conn = test_db();
        let m1 = insert_memory(&conn, "first");
        let m2 = insert_memory(&conn, "second");

        let extraction = Extraction {
            entities: vec![entity("Redis", EntityType::System)],
            triples: vec![],
        };
        apply_extraction(&mut conn, m1, &extraction).unwrap();
        apply_extraction(&mut conn, m2, &extraction).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT memory_count FROM entities WHERE name = 'Redis'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn merge_rewires_and_unions() {
        let mut conn = test_db();
        let m1 = insert_memory(&conn, "first");
        let m2 = insert_memory(&conn, "second");

        let (keep, _) = resolve_entity(&conn, "PostgreSQL", EntityType::System).unwrap();
        // Force a distinct near-duplicate (different type dodges steps 1–2;
        // short names dodge fuzzy)
        conn.execute(
            "INSERT INTO entities (name, type, aliases, memory_count) VALUES ('PG', 'system', '[\"pgsql\"]', 0)",
            [],
        )
        .unwrap();
        let remove: i64 = conn
            .query_row("SELECT id FROM entities WHERE name = 'PG'", [], |r| r.get(0))
            .unwrap();
        let (other, _) = resolve_entity(&conn, "cortex", EntityType::Project).unwrap();

        // Mentions and triples on both sides
        for (mem, ent) in [(m1, keep), (m1, remove), (m2, remove)] {
            conn.execute(
                "INSERT INTO memory_entities (memory_id, entity_id, role) VALUES (?1, ?2, 'mention')",
                params![mem, ent],
            )
            .unwrap();
            conn.execute(
                "UPDATE entities SET memory_count = memory_count + 1 WHERE id = ?1",
                params![ent],
            )
            .unwrap();
        }
        conn.execute(
            "INSERT INTO triples (subject_id, predicate, object_id, source_memory_id) VALUES (?1, 'uses', ?2, ?3)",
            params![other, remove, m1],
        )
        .unwrap();
        // Pre-existing duplicate that will collide after rewire
        conn.execute(
            "INSERT INTO triples (subject_id, predicate, object_id, source_memory_id) VALUES (?1, 'uses', ?2, ?3)",
            params![other, keep, m1],
        )
        .unwrap();

        assert!(merge(&mut conn, keep, remove).unwrap());

        // Removed entity is gone; keep absorbed everything
        let removed_exists: i64 = conn
            .query_row("SELECT COUNT(*) FROM entities WHERE id = ?1", params![remove], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(removed_exists, 0);

        let (aliases_json, count): (String, i64) = conn
            .query_row(
                "SELECT aliases, memory_count FROM entities WHERE id = ?1",
                params![keep],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert!(aliases_json.contains("pgsql"));
        assert!(aliases_json.contains("PG"));
        assert_eq!(count, 3); // 1 + 2

        // No triple still references the removed id; the collision was swept
        let dangling: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM triples WHERE subject_id = ?1 OR object_id = ?1",
                params![remove],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(dangling, 0);
        let triples: i64 = conn
            .query_row("SELECT COUNT(*) FROM triples", [], |r| r.get(0))
            .unwrap();
        assert_eq!(triples, 1);

        // Idempotent: second merge is a no-op
        assert!(!merge(&mut conn, keep, remove).unwrap());
        assert_eq!(
            merge(&mut conn, keep, keep).unwrap_err().kind(),
            "validation"
        );
    }
}
