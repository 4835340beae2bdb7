//! Background consolidation — decay refresh, STM→LTM promotion, link
//! discovery, and eviction.
//!
//! Two tick classes drive the lifecycle. The light tick recomputes decayed
//! scores over a recently-accessed window and persists every Nth run. The
//! medium tick runs the full consolidation pass inside one IMMEDIATE
//! transaction so it serializes against concurrent writers: promotion
//! (including predictive early promotion), tag/category link discovery for
//! each promotion, and eviction of decayed short-term rows.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::Serialize;

use crate::config::ConsolidationConfig;
use crate::db::with_immediate_transaction;
use crate::error::CortexError;
use crate::memory::types::{tags_from_json, MemoryType};
use crate::salience;

/// Promotion bumps salience by this much, capped at 1.0.
const PROMOTION_BONUS: f64 = 0.1;

/// How many accesses within the predictive window trigger early promotion.
const PREDICTIVE_MIN_ACCESSES: u32 = 2;

/// One row whose decayed score moved during a light tick.
#[derive(Debug, Clone, Serialize)]
pub struct DecayedRow {
    pub id: i64,
    pub decayed_score: f64,
}

/// Result of a light tick.
#[derive(Debug)]
pub struct LightTickResult {
    pub changed: Vec<DecayedRow>,
    pub persisted: bool,
}

/// A `related` link created by link discovery.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredLink {
    pub source_id: i64,
    pub target_id: i64,
    pub strength: f64,
}

/// Counts and side effects of one consolidation pass.
#[derive(Debug, Default)]
pub struct ConsolidationOutcome {
    /// Rows promoted STM → LTM (regular + predictive).
    pub consolidated: usize,
    /// Rows whose decayed score was refreshed.
    pub decayed: usize,
    /// Evicted rows as `(id, title)`, for event publication.
    pub deleted: Vec<(i64, String)>,
    pub promoted_ids: Vec<i64>,
    pub links: Vec<DiscoveredLink>,
}

/// Recompute decayed scores for the `window` most-recently-accessed rows.
/// Changed values are persisted only when `persist` is set; the caller emits
/// a `decay_tick` event with the changed rows either way.
pub fn light_tick(
    conn: &mut Connection,
    window: usize,
    persist: bool,
    now: DateTime<Utc>,
) -> Result<LightTickResult, CortexError> {
    let rows: Vec<(i64, String, f64, String, f64)> = {
        let mut stmt = conn.prepare(
            "SELECT id, type, salience, last_accessed, decayed_score FROM memories \
             ORDER BY last_accessed DESC, id DESC LIMIT ?1",
        )?;
        let collected = stmt
            .query_map(params![window as i64], |row| {
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

    let mut changed = Vec::new();
    for (id, type_str, salience_value, last_accessed, stored) in rows {
        let memory_type = type_str.parse::<MemoryType>().unwrap_or(MemoryType::ShortTerm);
        let hours = salience::hours_since(&last_accessed, now);
        let fresh = salience::decayed_score(salience_value, memory_type, hours);
        if (fresh - stored).abs() > 1e-6 {
            changed.push(DecayedRow {
                id,
                decayed_score: fresh,
            });
        }
    }

    if persist && !changed.is_empty() {
        let tx = conn.transaction()?;
        {
            let mut update = tx.prepare("UPDATE memories SET decayed_score = ?1 WHERE id = ?2")?;
            for row in &changed {
                update.execute(params![row.decayed_score, row.id])?;
            }
        }
        tx.commit()?;
    }

    Ok(LightTickResult { changed, persisted: persist })
}

/// Run the full consolidation pass inside one IMMEDIATE transaction.
pub fn consolidate(
    conn: &mut Connection,
    config: &ConsolidationConfig,
    now: DateTime<Utc>,
) -> Result<ConsolidationOutcome, CortexError> {
    with_immediate_transaction(conn, |tx| {
        let mut outcome = ConsolidationOutcome::default();

        outcome.decayed = refresh_decay(tx, now)?;

        // Regular promotion: STM whose stored salience reached the threshold.
        let mut promoted = select_promotable(
            tx,
            "SELECT id FROM memories WHERE type = 'short_term' AND salience >= ?1",
            params![config.promotion_threshold],
        )?;

        // Predictive promotion: repeatedly-accessed STM inside the window.
        let window_start = (now - Duration::hours(config.predictive_window_hours)).to_rfc3339();
        let predictive = select_promotable(
            tx,
            "SELECT id FROM memories WHERE type = 'short_term' \
             AND access_count >= ?1 AND last_accessed >= ?2",
            params![PREDICTIVE_MIN_ACCESSES, window_start],
        )?;
        for id in predictive {
            if !promoted.contains(&id) {
                promoted.push(id);
            }
        }

        for &id in &promoted {
            tx.execute(
                "UPDATE memories SET type = 'long_term', \
                 salience = MIN(salience + ?1, 1.0), \
                 decayed_score = MIN(decayed_score + ?1, 1.0), \
                 last_accessed = ?2 \
                 WHERE id = ?3",
                params![PROMOTION_BONUS, now.to_rfc3339(), id],
            )?;
        }
        outcome.consolidated = promoted.len();

        // Link discovery for each promotion.
        for &id in &promoted {
            let links = discover_links(tx, id, now)?;
            outcome.links.extend(links);
        }
        outcome.promoted_ids = promoted;

        // Eviction of decayed short-term rows.
        let doomed: Vec<(i64, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, title FROM memories \
                 WHERE type = 'short_term' AND decayed_score < ?1",
            )?;
            let collected = stmt
                .query_map(params![config.eviction_floor], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
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
        outcome.deleted = doomed;

        Ok(outcome)
    })
}

fn refresh_decay(tx: &Transaction, now: DateTime<Utc>) -> Result<usize, CortexError> {
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
}

fn select_promotable(
    tx: &Transaction,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<i64>, CortexError> {
    let mut stmt = tx.prepare(sql)?;
    let ids = stmt
        .query_map(params, |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Find memories overlapping the promoted row's tags or category and create
/// `related` links, strength proportional to the tag overlap.
fn discover_links(
    tx: &Transaction,
    memory_id: i64,
    now: DateTime<Utc>,
) -> Result<Vec<DiscoveredLink>, CortexError> {
    let (category, tags_json): (String, String) = tx.query_row(
        "SELECT category, tags FROM memories WHERE id = ?1",
        params![memory_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let tags = tags_from_json(&tags_json);

    let candidates: Vec<(i64, String, String)> = {
        let mut stmt = tx.prepare(
            "SELECT id, category, tags FROM memories \
             WHERE id != ?1 ORDER BY salience DESC LIMIT 50",
        )?;
        let collected = stmt
            .query_map(params![memory_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        collected
    };

    let mut links = Vec::new();
    for (other_id, other_category, other_tags_json) in candidates {
        let other_tags = tags_from_json(&other_tags_json);
        let shared = tags
            .iter()
            .filter(|t| other_tags.iter().any(|o| o.eq_ignore_ascii_case(t)))
            .count();
        let union = tags.len() + other_tags.len() - shared;

        let mut strength = if union > 0 {
            shared as f64 / union as f64
        } else {
            0.0
        };
        if other_category == category {
            strength = (strength + 0.2).min(1.0);
        }
        if shared == 0 && other_category != category {
            continue;
        }
        if strength < 0.2 {
            continue;
        }

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO memory_links \
             (source_id, target_id, relationship, strength, created_at) \
             VALUES (?1, ?2, 'related', ?3, ?4)",
            params![memory_id, other_id, strength, now.to_rfc3339()],
        )?;
        if inserted > 0 {
            links.push(DiscoveredLink {
                source_id: memory_id,
                target_id: other_id,
                strength,
            });
        }
    }
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::store::add_memory;
    use crate::memory::types::{Category, MemoryInput};
    use chrono::TimeZone;

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn config() -> ConsolidationConfig {
        ConsolidationConfig::default()
    }

    fn add(
        conn: &mut Connection,
        title: &str,
        importance: f64,
        tags: Option<Vec<String>>,
        category: Option<Category>,
    ) -> i64 {
        let input = MemoryInput {
            title: title.into(),
            content: format!("{title} content"),
            memory_type: Some(MemoryType::ShortTerm),
            importance: Some(importance),
            tags,
            category,
            ..Default::default()
        };
        add_memory(conn, &input, t0()).unwrap().memory.id
    }

    #[test]
    fn light_tick_reports_without_persisting() {
        let mut conn = test_db();
        let id = add(&mut conn, "Fades", 0.8, None, None);

        let later = Utc.with_ymd_and_hms(2026, 3, 11, 12, 0, 0).unwrap();
        let result = light_tick(&mut conn, 200, false, later).unwrap();
        assert_eq!(result.changed.len(), 1);
        assert_eq!(result.changed[0].id, id);
        assert!(result.changed[0].decayed_score < 0.8);

        // Not persisted: the column still holds the insert-time value
        let stored: f64 = conn
            .query_row("SELECT decayed_score FROM memories WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .unwrap();
        assert!((stored - 0.8).abs() < 1e-9);

        // Persisting tick writes it through
        let result = light_tick(&mut conn, 200, true, later).unwrap();
        assert!(result.persisted);
        let stored: f64 = conn
            .query_row("SELECT decayed_score FROM memories WHERE id = ?1", params![id], |r| {
                r.get(0)
            })
            .unwrap();
        assert!((stored - result.changed[0].decayed_score).abs() < 1e-9);
    }

    #[test]
    fn light_tick_respects_window() {
        let mut conn = test_db();
        for i in 0..5 {
            add(&mut conn, &format!("m{i}"), 0.5, None, None);
        }
        let later = Utc.with_ymd_and_hms(2026, 3, 11, 12, 0, 0).unwrap();
        let result = light_tick(&mut conn, 2, false, later).unwrap();
        assert_eq!(result.changed.len(), 2);
    }

    #[test]
    fn promotion_bumps_and_caps_salience() {
        let mut conn = test_db();
        let high = add(&mut conn, "Promote me", 0.85, None, None);
        let low = add(&mut conn, "Leave me", 0.4, None, None);

        let outcome = consolidate(&mut conn, &config(), t0()).unwrap();
        assert_eq!(outcome.consolidated, 1);
        assert_eq!(outcome.promoted_ids, vec![high]);

        let (type_str, salience_value): (String, f64) = conn
            .query_row(
                "SELECT type, salience FROM memories WHERE id = ?1",
                params![high],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(type_str, "long_term");
        assert!((salience_value - 0.95).abs() < 1e-9);

        let low_type: String = conn
            .query_row("SELECT type FROM memories WHERE id = ?1", params![low], |r| r.get(0))
            .unwrap();
        assert_eq!(low_type, "short_term");
    }

    #[test]
    fn promotion_salience_never_exceeds_one() {
        let mut conn = test_db();
        let id = add(&mut conn, "Maxed", 0.97, None, None);
        consolidate(&mut conn, &config(), t0()).unwrap();

        let salience_value: f64 = conn
            .query_row("SELECT salience FROM memories WHERE id = ?1", params![id], |r| r.get(0))
            .unwrap();
        assert!((salience_value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn predictive_promotion_for_hot_memories() {
        let mut conn = test_db();
        let id = add(&mut conn, "Hot topic", 0.4, None, None);
        // Two accesses within the window
        crate::memory::store::access_memory(&mut conn, id, t0()).unwrap();
        crate::memory::store::access_memory(&mut conn, id, t0()).unwrap();

        let outcome = consolidate(&mut conn, &config(), t0()).unwrap();
        assert_eq!(outcome.consolidated, 1);

        let type_str: String = conn
            .query_row("SELECT type FROM memories WHERE id = ?1", params![id], |r| r.get(0))
            .unwrap();
        assert_eq!(type_str, "long_term");
    }

    #[test]
    fn stale_hot_memories_are_not_predictively_promoted() {
        let mut conn = test_db();
        let id = add(&mut conn, "Cold topic", 0.4, None, None);
        crate::memory::store::access_memory(&mut conn, id, t0()).unwrap();
        crate::memory::store::access_memory(&mut conn, id, t0()).unwrap();

        // Run consolidation two days later — outside the 24 h window.
        // (By then decay has pulled 0.5-ish salience to ~0.39, still above floor.)
        let later = Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap();
        let outcome = consolidate(&mut conn, &config(), later).unwrap();
        assert_eq!(outcome.consolidated, 0);

        let type_str: String = conn
            .query_row("SELECT type FROM memories WHERE id = ?1", params![id], |r| r.get(0))
            .unwrap();
        assert_eq!(type_str, "short_term");
    }

    #[test]
    fn link_discovery_connects_overlapping_tags() {
        let mut conn = test_db();
        let promoted = add(
            &mut conn,
            "Auth design",
            0.9,
            Some(vec!["auth".into(), "jwt".into()]),
            Some(Category::Architecture),
        );
        let related = add(
            &mut conn,
            "JWT pitfalls",
            0.5,
            Some(vec!["jwt".into(), "security".into()]),
            Some(Category::Error),
        );
        add(
            &mut conn,
            "Unrelated lunch",
            0.5,
            Some(vec!["food".into()]),
            Some(Category::Note),
        );

        let outcome = consolidate(&mut conn, &config(), t0()).unwrap();
        assert!(outcome
            .links
            .iter()
            .any(|l| l.source_id == promoted && l.target_id == related));

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memory_links WHERE relationship = 'related'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(count >= 1);

        // Re-running does not duplicate links
        let outcome = consolidate(&mut conn, &config(), t0()).unwrap();
        assert!(outcome.links.is_empty());
    }

    #[test]
    fn eviction_removes_decayed_short_term() {
        let mut conn = test_db();
        let id = add(&mut conn, "Doomed", 0.3, None, None);

        // A month later the 0.3-salience STM row decays to ~0.008
        let later = Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap();
        let outcome = consolidate(&mut conn, &config(), later).unwrap();
        assert_eq!(outcome.deleted.len(), 1);
        assert_eq!(outcome.deleted[0].0, id);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn consolidation_counts_decay_refreshes() {
        let mut conn = test_db();
        add(&mut conn, "Keeper", 0.9, None, None);
        let later = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap();
        let outcome = consolidate(&mut conn, &config(), later).unwrap();
        assert_eq!(outcome.decayed, 1);
    }
}
