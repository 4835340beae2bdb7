//! Salience scoring and memory dynamics.
//!
//! Static salience is computed from keyword dictionaries over title+content:
//! each matched dictionary contributes an additive weight on top of a base
//! score, clamped to `[0.2, 1.0]`. The same module owns the time dynamics —
//! per-tier exponential decay, access reinforcement with diminishing returns,
//! and the priority composite used when ranking without a query.
//!
//! All time math takes an explicit `now` so tests can inject a clock.

use chrono::{DateTime, Utc};

use crate::memory::types::{Category, MemoryType};

/// Floor of the static salience range.
pub const BASE_SALIENCE: f64 = 0.2;

/// Decayed scores below this mark a memory as eligible for eviction.
pub const DECAY_FLOOR: f64 = 0.1;

/// A keyword dictionary contributing to static salience.
struct Dictionary {
    name: &'static str,
    weight: f64,
    markers: &'static [&'static str],
}

const DICTIONARIES: &[Dictionary] = &[
    Dictionary {
        name: "architecture",
        weight: 0.25,
        markers: &[
            "architecture", "design", "structure", "schema", "migration", "database",
            "service", "module", "interface", "api", "component",
        ],
    },
    Dictionary {
        name: "error",
        weight: 0.20,
        markers: &[
            "error", "bug", "crash", "fail", "broken", "fix", "panic", "exception",
            "regression",
        ],
    },
    Dictionary {
        name: "decision",
        weight: 0.25,
        markers: &[
            "decided", "decision", "chose", "chosen", "agreed", "will use", "instead of",
            "tradeoff",
        ],
    },
    Dictionary {
        name: "learning",
        weight: 0.20,
        markers: &[
            "learned", "insight", "realized", "discovered", "turns out", "til",
            "gotcha",
        ],
    },
    Dictionary {
        name: "preference",
        weight: 0.15,
        markers: &[
            "prefer", "preference", "style", "convention", "always", "never",
            "best practice",
        ],
    },
    Dictionary {
        name: "pattern",
        weight: 0.15,
        markers: &["pattern", "approach", "recipe", "idiom", "template", "workflow"],
    },
    Dictionary {
        name: "importance",
        weight: 0.30,
        markers: &[
            "important", "critical", "must", "remember", "crucial", "essential",
            "warning", "security",
        ],
    },
];

/// Lowercased word-boundary match. Multi-word markers match as substrings.
fn matches_marker(text_lower: &str, marker: &str) -> bool {
    if marker.contains(' ') {
        return text_lower.contains(marker);
    }
    for (start, _) in text_lower.match_indices(marker) {
        let before_ok = start == 0
            || !text_lower[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let end = start + marker.len();
        let after_ok = end >= text_lower.len()
            || !text_lower[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
    }
    false
}

fn matched_dictionaries(text: &str) -> Vec<&'static Dictionary> {
    let lower = text.to_lowercase();
    DICTIONARIES
        .iter()
        .filter(|d| d.markers.iter().any(|m| matches_marker(&lower, m)))
        .collect()
}

/// Static salience in `[0.2, 1.0]` from title+content keywords.
pub fn calculate(title: &str, content: &str) -> f64 {
    let text = format!("{title} {content}");
    let score: f64 = BASE_SALIENCE
        + matched_dictionaries(&text)
            .iter()
            .map(|d| d.weight)
            .sum::<f64>();
    score.clamp(0.0, 1.0)
}

/// Suggest a category from the strongest keyword evidence.
pub fn suggest_category(title: &str, content: &str) -> Category {
    let text = format!("{title} {content}").to_lowercase();

    let cues: &[(&[&str], Category)] = &[
        (&["todo", "next step", "follow up", "later"], Category::Todo),
        (
            &["error", "bug", "crash", "fail", "broken", "fix", "panic"],
            Category::Error,
        ),
        (
            &["prefer", "style", "convention", "always", "never", "best practice"],
            Category::Preference,
        ),
        (
            &["pattern", "approach", "recipe", "idiom", "workflow"],
            Category::Pattern,
        ),
        (
            &["learned", "insight", "realized", "discovered", "til"],
            Category::Learning,
        ),
        (
            &["architecture", "design", "schema", "database", "structure", "decided", "decision"],
            Category::Architecture,
        ),
        (
            &["works with", "depends on", "relates to", "owned by"],
            Category::Relationship,
        ),
    ];

    for (markers, category) in cues {
        if markers.iter().any(|m| matches_marker(&text, m)) {
            return *category;
        }
    }
    Category::Note
}

/// Extract short lowercase tags from recognizable tech terms and markers.
pub fn extract_tags(title: &str, content: &str) -> Vec<String> {
    const KNOWN_TERMS: &[&str] = &[
        "rust", "python", "typescript", "javascript", "sql", "sqlite", "postgresql",
        "postgres", "redis", "docker", "kubernetes", "git", "api", "http", "auth",
        "jwt", "oauth", "cache", "database", "migration", "test", "async", "cli",
        "config", "security", "performance", "logging",
    ];

    let lower = format!("{title} {content}").to_lowercase();
    let mut tags: Vec<String> = Vec::new();

    for term in KNOWN_TERMS {
        if matches_marker(&lower, term) && !tags.iter().any(|t| t == term) {
            tags.push((*term).to_string());
        }
    }
    for dict in matched_dictionaries(&lower) {
        if !tags.iter().any(|t| t == dict.name) {
            tags.push(dict.name.to_string());
        }
    }

    tags.truncate(8);
    tags
}

/// Human-readable explanation of a salience score.
pub fn explain(title: &str, content: &str) -> String {
    let text = format!("{title} {content}");
    let matched = matched_dictionaries(&text);
    let score = calculate(title, content);

    if matched.is_empty() {
        return format!("salience {score:.2}: base score only, no signal keywords matched");
    }

    let parts: Vec<String> = matched
        .iter()
        .map(|d| format!("{} (+{:.2})", d.name, d.weight))
        .collect();
    format!(
        "salience {score:.2}: base {BASE_SALIENCE:.2} + {}",
        parts.join(" + ")
    )
}

/// Hours elapsed between an RFC 3339 timestamp and `now`. Negative clamps to 0.
pub fn hours_since(timestamp: &str, now: DateTime<Utc>) -> f64 {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|t| {
            let secs = (now - t.with_timezone(&Utc)).num_seconds();
            (secs.max(0) as f64) / 3600.0
        })
        .unwrap_or(0.0)
}

/// `salience × r^Δh` with the tier's hourly rate.
pub fn decayed_score(salience: f64, memory_type: MemoryType, hours: f64) -> f64 {
    (salience * memory_type.decay_rate().powf(hours)).clamp(0.0, 1.0)
}

/// Reinforcement boost: larger for short-term memories, shrinking with each
/// additional access.
pub fn reinforcement_boost(memory_type: MemoryType, access_count: u32) -> f64 {
    let base = match memory_type {
        MemoryType::ShortTerm => 0.10,
        MemoryType::Episodic => 0.08,
        MemoryType::LongTerm => 0.05,
    };
    base / (1.0 + 0.5 * access_count as f64)
}

/// New salience after an access: `min(1, salience + boost)`.
pub fn reinforce(salience: f64, memory_type: MemoryType, access_count: u32) -> f64 {
    (salience + reinforcement_boost(memory_type, access_count)).min(1.0)
}

/// Bounded priority composite used for ranking without a query.
pub fn priority(
    salience: f64,
    decayed: f64,
    access_count: u32,
    memory_type: MemoryType,
) -> f64 {
    let access_term = ((access_count as f64).ln_1p() / 100f64.ln_1p()).min(1.0);
    0.4 * decayed + 0.3 * salience + 0.2 * access_term + 0.1 * memory_type.priority_weight()
}
