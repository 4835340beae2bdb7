//! Hybrid search — lexical, vector, decay, priority, and overlap signals
//! fused into one ranked result list.
//!
//! The pipeline: FTS candidate pull (or a salience-ordered scan when there is
//! no query) → SQL filter predicates → vector pass over stored embeddings →
//! weighted score fusion → contradiction annotation → decay post-filter →
//! deterministic ordering. Each ranking signal is a `(name, weight, score_fn)`
//! row; the fusion step folds the table, so new signals slot in without
//! touching the pipeline.

use rusqlite::{params, params_from_iter, Connection};

use crate::config::SearchConfig;
use crate::embedding::cosine_similarity;
use crate::error::CortexError;
use crate::memory::types::{Contradiction, Memory, SearchOptions, SearchResult};
use crate::memory::{memory_from_row, MEMORY_COLUMNS_M};
use crate::salience::{self, DECAY_FLOOR};

/// A candidate with its per-signal inputs, before fusion.
struct Candidate {
    memory: Memory,
    /// `|rank| / 100` clamped to [0,1]; 0 without a query.
    fts_norm: f64,
    /// Cosine similarity in [0,1]; 0 when the vector term is unavailable.
    vector: f64,
}

/// Context shared by all signal functions.
struct ScoreContext<'a> {
    options: &'a SearchOptions,
}

/// One ranking signal: a named, weighted score function over a candidate.
struct RankSignal {
    name: &'static str,
    weight: f64,
    score: fn(&Candidate, &ScoreContext) -> f64,
}

fn signal_fts(c: &Candidate, _ctx: &ScoreContext) -> f64 {
    c.fts_norm
}

fn signal_vector(c: &Candidate, _ctx: &ScoreContext) -> f64 {
    c.vector
}

fn signal_decay(c: &Candidate, _ctx: &ScoreContext) -> f64 {
    c.memory.decayed_score
}

fn signal_priority(c: &Candidate, _ctx: &ScoreContext) -> f64 {
    salience::priority(
        c.memory.salience,
        c.memory.decayed_score,
        c.memory.access_count,
        c.memory.memory_type,
    )
}

fn signal_overlap(c: &Candidate, ctx: &ScoreContext) -> f64 {
    let mut boost = 0.0;
    if let Some(category) = ctx.options.category {
        if c.memory.category == category {
            boost += 0.5;
        }
    }
    if let Some(tags) = &ctx.options.tags {
        if !tags.is_empty() {
            let hits = tags
                .iter()
                .filter(|t| c.memory.tags.iter().any(|m| m.eq_ignore_ascii_case(t)))
                .count();
            boost += hits as f64 / tags.len() as f64;
        }
    }
    boost.min(1.0)
}

fn signal_table(config: &SearchConfig) -> [RankSignal; 5] {
    [
        RankSignal { name: "fts", weight: config.fts_weight, score: signal_fts },
        RankSignal { name: "vector", weight: config.vector_weight, score: signal_vector },
        RankSignal { name: "decay", weight: config.decay_weight, score: signal_decay },
        RankSignal { name: "priority", weight: config.priority_weight, score: signal_priority },
        RankSignal { name: "overlap", weight: config.overlap_weight, score: signal_overlap },
    ]
}

/// Run a hybrid search. `query_embedding` is the pre-computed query vector, or
/// `None` when the embedder is unavailable (the vector signal scores 0).
pub fn search(
    conn: &Connection,
    options: &SearchOptions,
    query_embedding: Option<&[f32]>,
    config: &SearchConfig,
) -> Result<Vec<SearchResult>, CortexError> {
    let limit = options.limit.unwrap_or(config.default_limit);
    if limit == 0 || limit > 1000 {
        return Err(CortexError::Validation(
            "limit must be between 1 and 1000".into(),
        ));
    }

    let candidate_cap = (limit * 3).max(60);
    let query = options.query.as_deref().unwrap_or("").trim();

    // 1–2. Candidate set under the filter predicates
    let mut candidates = if query.is_empty() {
        browse_candidates(conn, options, candidate_cap)?
    } else {
        fts_candidates(conn, options, query, candidate_cap)?
    };

    // 3. Vector pass: score stored embeddings against the query vector, drop
    //    dissimilar embedded candidates, cap the vector contribution window.
    if let Some(query_vec) = query_embedding {
        let mut sims: Vec<(usize, f64)> = Vec::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            if let Some(embedding) = &candidate.memory.embedding {
                sims.push((idx, cosine_similarity(query_vec, embedding)));
            }
        }

        let min_sim = config.min_vector_similarity;
        let dropped: Vec<usize> = sims
            .iter()
            .filter(|(_, sim)| *sim < min_sim)
            .map(|(idx, _)| *idx)
            .collect();

        let mut ranked: Vec<(usize, f64)> =
            sims.into_iter().filter(|(_, sim)| *sim >= min_sim).collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (idx, sim) in ranked.into_iter().take(limit * 2) {
            candidates[idx].vector = sim;
        }

        // Remove embedded-but-dissimilar candidates (highest index first so
        // the remaining indexes stay valid).
        for idx in dropped.into_iter().rev() {
            candidates.remove(idx);
        }
    }

    // 4. Score fusion
    let signals = signal_table(config);
    let ctx = ScoreContext { options };
    let mut scored: Vec<(f64, Candidate)> = candidates
        .into_iter()
        .map(|c| {
            let score = signals
                .iter()
                .fold(0.0, |acc, s| acc + s.weight * (s.score)(&c, &ctx));
            (score, c)
        })
        .collect();

    // 6. Decay floor post-filter
    if !options.include_decayed {
        scored.retain(|(_, c)| c.memory.decayed_score >= DECAY_FLOOR);
    }

    // 7. Deterministic ordering: score desc → salience desc → recency desc → id asc
    scored.sort_by(|(score_a, a), (score_b, b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.memory
                    .salience
                    .partial_cmp(&a.memory.salience)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| b.memory.last_accessed.cmp(&a.memory.last_accessed))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    scored.truncate(limit);

    // 5. Contradiction annotation on the final page
    let mut results = Vec::with_capacity(scored.len());
    for (score, candidate) in scored {
        let contradictions = contradictions_for(conn, candidate.memory.id)?;
        results.push(SearchResult {
            memory: candidate.memory,
            score,
            contradictions,
        });
    }
    Ok(results)
}

// ── Candidate queries ────────────────────────────────────────────────────────

/// Shared WHERE fragment + params for the filter predicates.
fn filter_clause(options: &SearchOptions) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(project) = &options.project {
        if options.include_global.unwrap_or(true) {
            clauses.push("(m.project = ? OR m.scope = 'global')".into());
        } else {
            clauses.push("m.project = ?".into());
        }
        params.push(Box::new(project.clone()));
    }
    if let Some(category) = options.category {
        clauses.push("m.category = ?".into());
        params.push(Box::new(category.as_str()));
    }
    if let Some(memory_type) = options.memory_type {
        clauses.push("m.type = ?".into());
        params.push(Box::new(memory_type.as_str()));
    }
    if let Some(min_salience) = options.min_salience {
        clauses.push("m.salience >= ?".into());
        params.push(Box::new(min_salience));
    }
    if let Some(tags) = &options.tags {
        if !tags.is_empty() {
            let any: Vec<String> = tags.iter().map(|_| "m.tags LIKE ?".into()).collect();
            clauses.push(format!("({})", any.join(" OR ")));
            for tag in tags {
                params.push(Box::new(format!("%\"{}\"%", tag.to_lowercase())));
            }
        }
    }

    let sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(" AND {}", clauses.join(" AND "))
    };
    (sql, params)
}

/// FTS-matched candidates with their rank, best first.
fn fts_candidates(
    conn: &Connection,
    options: &SearchOptions,
    query: &str,
    cap: usize,
) -> Result<Vec<Candidate>, CortexError> {
    let escaped = escape_fts_query(query);
    if escaped.is_empty() {
        return browse_candidates(conn, options, cap);
    }

    match run_fts_query(conn, options, &escaped, cap) {
        Ok(rows) => Ok(rows),
        Err(CortexError::Internal(msg)) if msg.contains("fts5") => {
            // Operator soup the escaper did not anticipate: retry the whole
            // query as one literal phrase rather than surfacing a parse error.
            let phrase = format!("\"{}\"", query.replace('"', ""));
            run_fts_query(conn, options, &phrase, cap).or_else(|_| Ok(Vec::new()))
        }
        Err(e) => Err(e),
    }
}

fn run_fts_query(
    conn: &Connection,
    options: &SearchOptions,
    match_expr: &str,
    cap: usize,
) -> Result<Vec<Candidate>, CortexError> {
    let (filter_sql, filter_params) = filter_clause(options);
    let sql = format!(
        "SELECT {MEMORY_COLUMNS_M}, f.rank FROM memories_fts f \
         JOIN memories m ON m.id = f.rowid \
         WHERE f.memories_fts MATCH ?{filter_sql} \
         ORDER BY f.rank LIMIT ?"
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut all_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::with_capacity(filter_params.len() + 2);
    all_params.push(Box::new(match_expr.to_string()));
    all_params.extend(filter_params);
    all_params.push(Box::new(cap as i64));

    let rows = stmt
        .query_map(
            params_from_iter(all_params.iter().map(|p| p.as_ref())),
            |row| {
                let memory = memory_from_row(row)?;
                let rank: f64 = row.get(16)?;
                Ok((memory, rank))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|(memory, rank)| Candidate {
            memory,
            fts_norm: (rank.abs() / 100.0).clamp(0.0, 1.0),
            vector: 0.0,
        })
        .collect())
}

/// Query-less candidates: salience then recency, under the filters.
fn browse_candidates(
    conn: &Connection,
    options: &SearchOptions,
    cap: usize,
) -> Result<Vec<Candidate>, CortexError> {
    let (filter_sql, filter_params) = filter_clause(options);
    let sql = format!(
        "SELECT {MEMORY_COLUMNS_M} FROM memories m \
         WHERE 1=1{filter_sql} \
         ORDER BY m.salience DESC, m.last_accessed DESC, m.id ASC LIMIT ?"
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut all_params = filter_params;
    all_params.push(Box::new(cap as i64));

    let rows = stmt
        .query_map(
            params_from_iter(all_params.iter().map(|p| p.as_ref())),
            memory_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .map(|memory| Candidate {
            memory,
            fts_norm: 0.0,
            vector: 0.0,
        })
        .collect())
}

/// Escape a user query for FTS5 MATCH syntax.
///
/// Each whitespace-delimited token is stripped of quotes and wrapped in fresh
/// ones, which neutralizes operator characters (`- : * ^ ( ) "`). The final
/// token gets a `*` suffix so an in-progress word still prefix-matches.
pub fn escape_fts_query(query: &str) -> String {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|word| word.replace('"', ""))
        .filter(|w| !w.is_empty())
        .collect();

    let last = tokens.len().saturating_sub(1);
    tokens
        .iter()
        .enumerate()
        .map(|(i, word)| {
            if i == last && word.len() >= 3 {
                format!("\"{word}\"*")
            } else {
                format!("\"{word}\"")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Contradiction annotations: links labelled `contradicts` touching this row.
pub fn contradictions_for(
    conn: &Connection,
    memory_id: i64,
) -> Result<Vec<Contradiction>, CortexError> {
    let mut stmt = conn.prepare(
        "SELECT CASE WHEN l.source_id = ?1 THEN l.target_id ELSE l.source_id END AS other_id, \
                m.title, l.strength \
         FROM memory_links l \
         JOIN memories m ON m.id = \
              CASE WHEN l.source_id = ?1 THEN l.target_id ELSE l.source_id END \
         WHERE l.relationship = 'contradicts' AND (l.source_id = ?1 OR l.target_id = ?1) \
         ORDER BY other_id",
    )?;
    let rows = stmt
        .query_map(params![memory_id], |row| {
            Ok(Contradiction {
                memory_id: row.get(0)?,
                title: row.get(1)?,
                strength: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
