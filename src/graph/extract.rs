//! Pattern-based entity and triple extraction from memory text.
//!
//! Extraction is deliberately cheap: a known-technology dictionary, backtick
//! identifiers, TitleCase names, and a handful of category-conditional
//! `subject predicate object` regexes. The resolver (not this module) decides
//! whether an extracted name is a new entity or an alias of an existing one.

use regex::Regex;
use std::sync::LazyLock;

use crate::memory::types::Category;

/// Closed set of entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    System,
    Library,
    Tool,
    Person,
    Concept,
    Project,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Library => "library",
            Self::Tool => "tool",
            Self::Person => "person",
            Self::Concept => "concept",
            Self::Project => "project",
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "library" => Ok(Self::Library),
            "tool" => Ok(Self::Tool),
            "person" => Ok(Self::Person),
            "concept" => Ok(Self::Concept),
            "project" => Ok(Self::Project),
            _ => Err(format!("unknown entity type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedTriple {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

#[derive(Debug, Default)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub triples: Vec<ExtractedTriple>,
}

/// Well-known technologies, matched case-insensitively on word boundaries.
const KNOWN_TECH: &[(&str, EntityType)] = &[
    ("postgresql", EntityType::System),
    ("postgres", EntityType::System),
    ("sqlite", EntityType::System),
    ("mysql", EntityType::System),
    ("redis", EntityType::System),
    ("kafka", EntityType::System),
    ("docker", EntityType::Tool),
    ("kubernetes", EntityType::Tool),
    ("git", EntityType::Tool),
    ("tokio", EntityType::Library),
    ("axum", EntityType::Library),
    ("react", EntityType::Library),
    ("serde", EntityType::Library),
    ("rusqlite", EntityType::Library),
];

static BACKTICK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([A-Za-z_][\w:./-]{1,60})`").expect("valid regex"));

// Two or more TitleCase words in a row: "Memory Engine", "John Smith"
static TITLECASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b").expect("valid regex")
});

// A lone capitalized word mid-sentence (preceded by a lowercase word) is a
// proper-noun candidate: "the Kuberntes cluster", "tried Webpack again".
// Sentence-initial capitals are skipped — too noisy.
static PROPER_NOUN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[a-z][\w]*\s+([A-Z][a-zA-Z0-9]{3,})\b").expect("valid regex")
});

// subject predicate object over entity-ish tokens
static TRIPLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b([A-Za-z][\w.-]{1,40})\s+(uses|depends on|runs on|connects to|replaces|extends|talks to)\s+([A-Za-z][\w.-]{1,40})",
    )
    .expect("valid regex")
});

// relationship-category patterns between people/projects
static RELATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)\s+(works with|works at|reports to|owns|maintains)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+)?)\b",
    )
    .expect("valid regex")
});

// architecture-category adoption statements: "decided to use X", "chose X"
static ADOPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:decided to use|chose|switched to|migrating to)\s+([A-Za-z][\w.-]{1,40})")
        .expect("valid regex")
});

/// Extract entities and triples from a memory's text.
pub fn extract(title: &str, content: &str, category: Category) -> Extraction {
    let text = format!("{title}\n{content}");
    let mut extraction = Extraction::default();

    let lower = text.to_lowercase();
    for (tech, entity_type) in KNOWN_TECH {
        if word_match(&lower, tech) {
            push_entity(&mut extraction.entities, canonical_tech(tech), *entity_type);
        }
    }

    for capture in BACKTICK_RE.captures_iter(&text) {
        push_entity(&mut extraction.entities, capture[1].to_string(), EntityType::Concept);
    }

    for capture in TITLECASE_RE.captures_iter(&text) {
        let name = capture[1].to_string();
        let entity_type = if category == Category::Relationship {
            EntityType::Person
        } else {
            EntityType::Concept
        };
        push_entity(&mut extraction.entities, name, entity_type);
    }

    for capture in PROPER_NOUN_RE.captures_iter(&text) {
        push_entity(
            &mut extraction.entities,
            capture[1].to_string(),
            typed_guess(&capture[1]),
        );
    }

    for capture in TRIPLE_RE.captures_iter(&text) {
        let subject = capture[1].to_string();
        let predicate = normalize_predicate(&capture[2]);
        let object = capture[3].to_string();
        push_entity(&mut extraction.entities, subject.clone(), typed_guess(&subject));
        push_entity(&mut extraction.entities, object.clone(), typed_guess(&object));
        extraction.triples.push(ExtractedTriple {
            subject,
            predicate,
            object,
        });
    }

    if category == Category::Relationship {
        for capture in RELATION_RE.captures_iter(&text) {
            let subject = capture[1].to_string();
            let predicate = normalize_predicate(&capture[2]);
            let object = capture[3].to_string();
            push_entity(&mut extraction.entities, subject.clone(), EntityType::Person);
            push_entity(&mut extraction.entities, object.clone(), typed_guess(&object));
            extraction.triples.push(ExtractedTriple {
                subject,
                predicate,
                object,
            });
        }
    }

    if category == Category::Architecture {
        for capture in ADOPTION_RE.captures_iter(&text) {
            push_entity(
                &mut extraction.entities,
                capture[1].to_string(),
                typed_guess(&capture[1]),
            );
        }
    }

    extraction
}

fn push_entity(entities: &mut Vec<ExtractedEntity>, name: String, entity_type: EntityType) {
    let name = name.trim().to_string();
    if name.len() < 2 {
        return;
    }
    if !entities
        .iter()
        .any(|e| e.name.eq_ignore_ascii_case(&name))
    {
        entities.push(ExtractedEntity { name, entity_type });
    }
}

/// Known tech keeps its dictionary type even in free-form captures.
fn typed_guess(name: &str) -> EntityType {
    let lower = name.to_lowercase();
    KNOWN_TECH
        .iter()
        .find(|(tech, _)| *tech == lower)
        .map(|(_, t)| *t)
        .unwrap_or(EntityType::Concept)
}

/// Display casing for dictionary hits.
fn canonical_tech(tech: &str) -> String {
    match tech {
        "postgresql" => "PostgreSQL".into(),
        "postgres" => "Postgres".into(),
        "sqlite" => "SQLite".into(),
        "mysql" => "MySQL".into(),
        "redis" => "Redis".into(),
        "kafka" => "Kafka".into(),
        "docker" => "Docker".into(),
        "kubernetes" => "Kubernetes".into(),
        "git" => "git".into(),
        other => other.to_string(),
    }
}

fn normalize_predicate(raw: &str) -> String {
    raw.to_lowercase().split_whitespace().collect::<Vec<_>>().join("_")
}

fn word_match(haystack_lower: &str, needle: &str) -> bool {
    for (start, _) in haystack_lower.match_indices(needle) {
        let before_ok = start == 0
            || !haystack_lower[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let end = start + needle.len();
        let after_ok = end >= haystack_lower.len()
            || !haystack_lower[end..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tech_is_extracted_with_type() {
        let extraction = extract(
            "Database choice",
            "We evaluated SQLite and Redis for the cache layer",
            Category::Architecture,
        );
        let names: Vec<&str> = extraction.entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"SQLite"));
        assert!(names.contains(&"Redis"));
        let sqlite = extraction
            .entities
            .iter()
            .find(|e| e.name == "SQLite")
            .unwrap();
        assert_eq!(sqlite.entity_type, EntityType::System);
    }

    #[test]
    fn postgres_substring_does_not_match_postgresql_twice() {
        let extraction = extract("DB", "PostgreSQL is the choice", Category::Note);
        let hits: Vec<&ExtractedEntity> = extraction
            .entities
            .iter()
            .filter(|e| e.name.to_lowercase().contains("postgre"))
            .collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "PostgreSQL");
    }

    #[test]
    fn backtick_identifiers_become_concepts() {
        let extraction = extract(
            "Worker queue",
            "the `embed_worker` consumes jobs from `job_queue`",
            Category::Note,
        );
        let names: Vec<&str> = extraction.entities.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"embed_worker"));
        assert!(names.contains(&"job_queue"));
    }

    #[test]
    fn uses_pattern_produces_triple() {
        let extraction = extract(
            "Stack",
            "cortex uses SQLite for persistence",
            Category::Architecture,
        );
        assert!(extraction.triples.iter().any(|t| {
            t.subject.eq_ignore_ascii_case("cortex")
                && t.predicate == "uses"
                && t.object.eq_ignore_ascii_case("sqlite")
        }));
        // endpoints always appear as entities too
        assert!(extraction
            .entities
            .iter()
            .any(|e| e.name.eq_ignore_ascii_case("cortex")));
    }

    #[test]
    fn relationship_category_extracts_people() {
        let extraction = extract(
            "Team",
            "Jane Doe works with Acme Platform",
            Category::Relationship,
        );
        let jane = extraction
            .entities
            .iter()
            .find(|e| e.name == "Jane Doe")
            .unwrap();
        assert_eq!(jane.entity_type, EntityType::Person);
        assert!(extraction
            .triples
            .iter()
            .any(|t| t.subject == "Jane Doe" && t.predicate == "works_with"));
    }

    #[test]
    fn adoption_statement_yields_entity() {
        let extraction = extract(
            "DB decision",
            "decided to use postgres for everything",
            Category::Architecture,
        );
        assert!(extraction
            .entities
            .iter()
            .any(|e| e.name.eq_ignore_ascii_case("postgres")));
    }

    #[test]
    fn entities_are_deduplicated_case_insensitively() {
        let extraction = extract(
            "Redis",
            "redis again and REDIS once more, Redis uses Redis",
            Category::Note,
        );
        let redis_count = extraction
            .entities
            .iter()
            .filter(|e| e.name.eq_ignore_ascii_case("redis"))
            .count();
        assert_eq!(redis_count, 1);
    }

    #[test]
    fn plain_text_extracts_nothing() {
        let extraction = extract("lunch", "had soup again", Category::Note);
        assert!(extraction.entities.is_empty());
        assert!(extraction.triples.is_empty());
    }
}
