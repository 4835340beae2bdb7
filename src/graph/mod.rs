//! Knowledge graph — entity extraction, resolution, and traversal.
//!
//! [`extract`] pulls entities and `(subject, predicate, object)` triples from
//! memory text; [`resolve`] dedupes them into stable graph rows. This module
//! owns the read-side: entity listings, neighborhood queries, and BFS path
//! explanations. Entities form a directed multigraph keyed by numeric ids, so
//! cycles are natural; every traversal tracks a visited set and caps depth.

pub mod extract;
pub mod resolve;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::CortexError;

/// Default and maximum BFS depth.
pub const MAX_GRAPH_DEPTH: usize = 4;

/// A stored graph entity.
#[derive(Debug, Clone, Serialize)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub aliases: Vec<String>,
    pub memory_count: i64,
}

/// A triple with endpoint names resolved for display.
#[derive(Debug, Clone, Serialize)]
pub struct TripleView {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub source_memory_id: i64,
}

/// Result of a neighborhood query around one entity.
#[derive(Debug, Serialize)]
pub struct Subgraph {
    pub root: Entity,
    pub entities: Vec<Entity>,
    pub triples: Vec<TripleView>,
}

/// One hop in an explained path.
#[derive(Debug, Clone, Serialize)]
pub struct PathStep {
    pub from: String,
    pub predicate: String,
    pub to: String,
}

fn entity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let aliases_json: String = row.get(3)?;
    Ok(Entity {
        id: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        aliases: serde_json::from_str(&aliases_json).unwrap_or_default(),
        memory_count: row.get(4)?,
    })
}

/// Look up an entity by primary name or alias, case-insensitively.
pub fn find_entity(conn: &Connection, name: &str) -> Result<Option<Entity>, CortexError> {
    let direct = conn
        .query_row(
            "SELECT id, name, type, aliases, memory_count FROM entities \
             WHERE LOWER(name) = LOWER(?1) ORDER BY id LIMIT 1",
            params![name],
            entity_from_row,
        )
        .optional()?;
    if direct.is_some() {
        return Ok(direct);
    }

    let name_lower = name.to_lowercase();
    let mut stmt =
        conn.prepare("SELECT id, name, type, aliases, memory_count FROM entities ORDER BY id")?;
    let all: Vec<Entity> = stmt
        .query_map([], entity_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(all
        .into_iter()
        .find(|e| e.aliases.iter().any(|a| a.to_lowercase() == name_lower)))
}

/// List entities, optionally filtered by type and minimum mention count.
pub fn graph_entities(
    conn: &Connection,
    entity_type: Option<&str>,
    min_mentions: i64,
    limit: usize,
) -> Result<Vec<Entity>, CortexError> {
    let rows = match entity_type {
        Some(t) => {
            let mut stmt = conn.prepare(
                "SELECT id, name, type, aliases, memory_count FROM entities \
                 WHERE type = ?1 AND memory_count >= ?2 \
                 ORDER BY memory_count DESC, name ASC LIMIT ?3",
            )?;
            let collected = stmt
                .query_map(params![t, min_mentions, limit as i64], entity_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            collected
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, name, type, aliases, memory_count FROM entities \
                 WHERE memory_count >= ?1 \
                 ORDER BY memory_count DESC, name ASC LIMIT ?2",
            )?;
            let collected = stmt
                .query_map(params![min_mentions, limit as i64], entity_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            collected
        }
    };
    Ok(rows)
}

/// Edges touching an entity, in either direction.
fn edges_of(conn: &Connection, entity_id: i64) -> Result<Vec<(i64, String, i64, i64)>, CortexError> {
    let mut stmt = conn.prepare(
        "SELECT subject_id, predicate, object_id, source_memory_id FROM triples \
         WHERE subject_id = ?1 OR object_id = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![entity_id], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn entity_by_id(conn: &Connection, id: i64) -> Result<Option<Entity>, CortexError> {
    let entity = conn
        .query_row(
            "SELECT id, name, type, aliases, memory_count FROM entities WHERE id = ?1",
            params![id],
            entity_from_row,
        )
        .optional()?;
    Ok(entity)
}

/// BFS neighborhood around an entity, depth-capped, optionally restricted to
/// a predicate set.
pub fn graph_query(
    conn: &Connection,
    entity_name: &str,
    depth: usize,
    predicates: Option<&[String]>,
) -> Result<Subgraph, CortexError> {
    let root = find_entity(conn, entity_name)?
        .ok_or_else(|| CortexError::NotFound(format!("entity '{entity_name}'")))?;
    let depth = depth.clamp(1, MAX_GRAPH_DEPTH);

    let mut visited: HashSet<i64> = HashSet::from([root.id]);
    let mut frontier: VecDeque<(i64, usize)> = VecDeque::from([(root.id, 0)]);
    let mut entities: HashMap<i64, Entity> = HashMap::new();
    let mut triples: Vec<TripleView> = Vec::new();
    let mut seen_edges: HashSet<(i64, String, i64, i64)> = HashSet::new();

    while let Some((current, level)) = frontier.pop_front() {
        if level >= depth {
            continue;
        }
        for (subject_id, predicate, object_id, source_memory_id) in edges_of(conn, current)? {
            if let Some(wanted) = predicates {
                if !wanted.iter().any(|p| p.eq_ignore_ascii_case(&predicate)) {
                    continue;
                }
            }
            let edge_key = (subject_id, predicate.clone(), object_id, source_memory_id);
            if !seen_edges.insert(edge_key) {
                continue;
            }

            for id in [subject_id, object_id] {
                if !entities.contains_key(&id) && id != root.id {
                    if let Some(entity) = entity_by_id(conn, id)? {
                        entities.insert(id, entity);
                    }
                }
                if visited.insert(id) {
                    frontier.push_back((id, level + 1));
                }
            }

            let subject_name = name_of(conn, &entities, &root, subject_id)?;
            let object_name = name_of(conn, &entities, &root, object_id)?;
            triples.push(TripleView {
                subject: subject_name,
                predicate,
                object: object_name,
                source_memory_id,
            });
        }
    }

    let mut entity_list: Vec<Entity> = entities.into_values().collect();
    entity_list.sort_by_key(|e| e.id);

    Ok(Subgraph {
        root,
        entities: entity_list,
        triples,
    })
}

fn name_of(
    conn: &Connection,
    cache: &HashMap<i64, Entity>,
    root: &Entity,
    id: i64,
) -> Result<String, CortexError> {
    if id == root.id {
        return Ok(root.name.clone());
    }
    if let Some(entity) = cache.get(&id) {
        return Ok(entity.name.clone());
    }
    Ok(entity_by_id(conn, id)?
        .map(|e| e.name)
        .unwrap_or_else(|| format!("#{id}")))
}

/// BFS shortest path between two entities, treating edges as bidirectional.
/// Returns `None` when no path exists within `max_depth`.
pub fn graph_explain(
    conn: &Connection,
    from: &str,
    to: &str,
    max_depth: usize,
) -> Result<Option<Vec<PathStep>>, CortexError> {
    let start = find_entity(conn, from)?
        .ok_or_else(|| CortexError::NotFound(format!("entity '{from}'")))?;
    let goal = find_entity(conn, to)?
        .ok_or_else(|| CortexError::NotFound(format!("entity '{to}'")))?;
    let max_depth = max_depth.clamp(1, MAX_GRAPH_DEPTH);

    if start.id == goal.id {
        return Ok(Some(Vec::new()));
    }

    // parent: node → (previous node, predicate, forward?)
    let mut parent: HashMap<i64, (i64, String, bool)> = HashMap::new();
    let mut visited: HashSet<i64> = HashSet::from([start.id]);
    let mut frontier: VecDeque<(i64, usize)> = VecDeque::from([(start.id, 0)]);

    'bfs: while let Some((current, level)) = frontier.pop_front() {
        if level >= max_depth {
            continue;
        }
        for (subject_id, predicate, object_id, _) in edges_of(conn, current)? {
            let (next, forward) = if subject_id == current {
                (object_id, true)
            } else {
                (subject_id, false)
            };
            if !visited.insert(next) {
                continue;
            }
            parent.insert(next, (current, predicate, forward));
            if next == goal.id {
                break 'bfs;
            }
            frontier.push_back((next, level + 1));
        }
    }

    if !parent.contains_key(&goal.id) {
        return Ok(None);
    }

    // Walk back from the goal and reverse.
    let mut steps: Vec<PathStep> = Vec::new();
    let mut cursor = goal.id;
    while cursor != start.id {
        let (previous, predicate, forward) = parent[&cursor].clone();
        let from_name = name_for_id(conn, if forward { previous } else { cursor })?;
        let to_name = name_for_id(conn, if forward { cursor } else { previous })?;
        steps.push(PathStep {
            from: from_name,
            predicate,
            to: to_name,
        });
        cursor = previous;
    }
    steps.reverse();
    Ok(Some(steps))
}

fn name_for_id(conn: &Connection, id: i64) -> Result<String, CortexError> {
    Ok(entity_by_id(conn, id)?
        .map(|e| e.name)
        .unwrap_or_else(|| format!("#{id}")))
}
