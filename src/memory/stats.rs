//! Read-side projections: statistics, context summaries, and suggestions.

use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::HashMap;

use crate::error::CortexError;
use crate::memory::types::{Category, Memory};
use crate::memory::{memory_from_row, MEMORY_COLUMNS};

/// Response from `stats`.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_memories: u64,
    pub by_type: HashMap<String, u64>,
    pub by_category: HashMap<String, u64>,
    pub average_salience: f64,
    pub decay_distribution: DecayDistribution,
    pub total_links: u64,
    pub total_entities: u64,
    pub db_size_bytes: u64,
}

/// How the store's decayed scores are distributed.
#[derive(Debug, Serialize)]
pub struct DecayDistribution {
    /// decayed_score > 0.7
    pub healthy: u64,
    /// 0.4 <= decayed_score <= 0.7
    pub fading: u64,
    /// decayed_score < 0.4
    pub critical: u64,
}

/// A typeahead suggestion with its occurrence count.
#[derive(Debug, Serialize)]
pub struct Suggestion {
    pub value: String,
    pub kind: &'static str,
    pub count: u64,
}

/// Compute store statistics, optionally scoped to one project
/// (global-scope memories included).
pub fn stats(
    conn: &Connection,
    project: Option<&str>,
    db_size_bytes: u64,
) -> Result<StatsResponse, CortexError> {
    let (filter, param): (&str, Vec<&dyn rusqlite::ToSql>) = match &project {
        Some(p) => (
            "WHERE project = ?1 OR scope = 'global'",
            vec![p as &dyn rusqlite::ToSql],
        ),
        None => ("", vec![]),
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM memories {filter}"),
        param.as_slice(),
        |row| row.get(0),
    )?;

    let mut by_type = HashMap::new();
    for t in ["short_term", "long_term", "episodic"] {
        by_type.insert(t.to_string(), 0u64);
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT type, COUNT(*) FROM memories {filter} GROUP BY type"
    ))?;
    let rows: Vec<(String, i64)> = stmt
        .query_map(param.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (t, count) in rows {
        by_type.insert(t, count as u64);
    }

    let mut by_category = HashMap::new();
    for c in Category::ALL {
        by_category.insert(c.as_str().to_string(), 0u64);
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT category, COUNT(*) FROM memories {filter} GROUP BY category"
    ))?;
    let rows: Vec<(String, i64)> = stmt
        .query_map(param.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (c, count) in rows {
        by_category.insert(c, count as u64);
    }

    let average_salience: f64 = conn.query_row(
        &format!("SELECT COALESCE(AVG(salience), 0.0) FROM memories {filter}"),
        param.as_slice(),
        |row| row.get(0),
    )?;

    let (healthy, fading, critical): (i64, i64, i64) = conn.query_row(
        &format!(
            "SELECT \
               COALESCE(SUM(decayed_score > 0.7), 0), \
               COALESCE(SUM(decayed_score >= 0.4 AND decayed_score <= 0.7), 0), \
               COALESCE(SUM(decayed_score < 0.4), 0) \
             FROM memories {filter}"
        ),
        param.as_slice(),
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let total_links: i64 =
        conn.query_row("SELECT COUNT(*) FROM memory_links", [], |row| row.get(0))?;
    let total_entities: i64 =
        conn.query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;

    Ok(StatsResponse {
        total_memories: total as u64,
        by_type,
        by_category,
        average_salience,
        decay_distribution: DecayDistribution {
            healthy: healthy as u64,
            fading: fading as u64,
            critical: critical as u64,
        },
        total_links: total_links as u64,
        total_entities: total_entities as u64,
        db_size_bytes,
    })
}

/// Format the top memories as grouped Markdown for client injection.
pub fn context_summary(
    conn: &Connection,
    project: Option<&str>,
    limit: usize,
) -> Result<String, CortexError> {
    let sql = match project {
        Some(_) => format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE project = ?1 OR scope = 'global' \
             ORDER BY decayed_score DESC, salience DESC, id ASC LIMIT ?2"
        ),
        None => format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             ORDER BY decayed_score DESC, salience DESC, id ASC LIMIT ?1"
        ),
    };
    let mut stmt = conn.prepare(&sql)?;
    let memories: Vec<Memory> = match project {
        Some(p) => stmt
            .query_map(params![p, limit as i64], memory_from_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(params![limit as i64], memory_from_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };

    if memories.is_empty() {
        return Ok("No stored memories yet.".to_string());
    }

    // Group by category, categories in declaration order
    let mut grouped: HashMap<Category, Vec<&Memory>> = HashMap::new();
    for memory in &memories {
        grouped.entry(memory.category).or_default().push(memory);
    }

    let mut out = String::new();
    match project {
        Some(p) => out.push_str(&format!("# Memory context for `{p}`\n")),
        None => out.push_str("# Memory context\n"),
    }
    for category in Category::ALL {
        let Some(group) = grouped.get(&category) else {
            continue;
        };
        out.push_str(&format!("\n## {}\n", heading(category)));
        for memory in group {
            out.push_str(&format!("- **{}**: {}\n", memory.title, first_line(&memory.content)));
        }
    }
    Ok(out)
}

/// Prefix/substring suggestions over titles, categories, and projects.
pub fn suggestions(
    conn: &Connection,
    q: &str,
    limit: usize,
) -> Result<Vec<Suggestion>, CortexError> {
    let needle = q.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(Vec::new());
    }
    let prefix_pattern = format!("{needle}%");
    let substring_pattern = format!("%{needle}%");

    let mut out: Vec<Suggestion> = Vec::new();

    // Titles: prefix matches rank before substring matches
    let mut stmt = conn.prepare(
        "SELECT title, COUNT(*) FROM memories WHERE LOWER(title) LIKE ?1 \
         GROUP BY LOWER(title) \
         ORDER BY LOWER(title) LIKE ?2 DESC, COUNT(*) DESC, title ASC LIMIT ?3",
    )?;
    let rows: Vec<(String, i64)> = stmt
        .query_map(
            params![substring_pattern, prefix_pattern, limit as i64],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    for (value, count) in rows {
        out.push(Suggestion {
            value,
            kind: "title",
            count: count as u64,
        });
    }

    for category in Category::ALL {
        if category.as_str().starts_with(&needle) || category.as_str().contains(&needle) {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM memories WHERE category = ?1",
                params![category.as_str()],
                |row| row.get(0),
            )?;
            if count > 0 {
                out.push(Suggestion {
                    value: category.as_str().to_string(),
                    kind: "category",
                    count: count as u64,
                });
            }
        }
    }

    let mut stmt = conn.prepare(
        "SELECT project, COUNT(*) FROM memories \
         WHERE project IS NOT NULL AND LOWER(project) LIKE ?1 \
         GROUP BY project ORDER BY COUNT(*) DESC, project ASC LIMIT ?2",
    )?;
    let rows: Vec<(String, i64)> = stmt
        .query_map(params![substring_pattern, limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (value, count) in rows {
        out.push(Suggestion {
            value,
            kind: "project",
            count: count as u64,
        });
    }

    out.truncate(limit);
    Ok(out)
}

fn heading(category: Category) -> &'static str {
    match category {
        Category::Architecture => "Architecture",
        Category::Pattern => "Patterns",
        Category::Preference => "Preferences",
        Category::Error => "Known errors",
        Category::Context => "Context",
        Category::Learning => "Learnings",
        Category::Todo => "Todos",
        Category::Note => "Notes",
        Category::Relationship => "Relationships",
        Category::Custom => "Other",
    }
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or(content)
}

// ── Session bookkeeping ──────────────────────────────────────────────────────

/// Open a session row and return its id.
pub fn begin_session(
    conn: &Connection,
    project: Option<&str>,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<String, CortexError> {
    let id = uuid::Uuid::now_v7().to_string();
    conn.execute(
        "INSERT INTO sessions (id, project, started_at) VALUES (?1, ?2, ?3)",
        params![id, project, now.to_rfc3339()],
    )?;
    Ok(id)
}

/// Close a session row with a summary and usage counters.
pub fn end_session(
    conn: &Connection,
    session_id: &str,
    summary: Option<&str>,
    memories_created: u32,
    memories_accessed: u32,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<(), CortexError> {
    let rows = conn.execute(
        "UPDATE sessions SET ended_at = ?1, summary = ?2, memories_created = ?3, \
         memories_accessed = ?4 WHERE id = ?5",
        params![
            now.to_rfc3339(),
            summary,
            memories_created,
            memories_accessed,
            session_id
        ],
    )?;
    if rows == 0 {
        return Err(CortexError::NotFound(format!("session {session_id}")));
    }
    Ok(())
}
