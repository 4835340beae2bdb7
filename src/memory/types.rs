//! Core memory type definitions.
//!
//! Defines [`MemoryType`] (the three lifecycle tiers), [`Category`] (the
//! closed set of memory categories), [`Scope`] (project vs. global
//! visibility), [`Memory`] (a full record), and the search option/result
//! types.

use serde::{Deserialize, Serialize};

/// Content larger than this is truncated on insert.
pub const MAX_CONTENT_BYTES: usize = 10 * 1024;

/// Marker appended to truncated content.
pub const TRUNCATION_MARKER: &str = "\n… [content truncated]";

/// The three memory tiers, inspired by human memory consolidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Default landing zone for new memories — fast decay.
    ShortTerm,
    /// Consolidated tier for reinforced or high-salience memories — slow decay.
    LongTerm,
    /// Time-bound narrative context (session logs, decisions in flight).
    Episodic,
}

impl MemoryType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
            Self::Episodic => "episodic",
        }
    }

    /// Hourly exponential decay rate for this tier.
    pub fn decay_rate(&self) -> f64 {
        match self {
            Self::ShortTerm => 0.995,
            Self::Episodic => 0.998,
            Self::LongTerm => 0.9995,
        }
    }

    /// Weight of this tier in the priority composite.
    pub fn priority_weight(&self) -> f64 {
        match self {
            Self::LongTerm => 1.0,
            Self::Episodic => 0.7,
            Self::ShortTerm => 0.5,
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_term" => Ok(Self::ShortTerm),
            "long_term" => Ok(Self::LongTerm),
            "episodic" => Ok(Self::Episodic),
            _ => Err(format!("unknown memory type: {s}")),
        }
    }
}

/// The closed set of memory categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Architecture,
    Pattern,
    Preference,
    Error,
    Context,
    Learning,
    Todo,
    Note,
    Relationship,
    Custom,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architecture => "architecture",
            Self::Pattern => "pattern",
            Self::Preference => "preference",
            Self::Error => "error",
            Self::Context => "context",
            Self::Learning => "learning",
            Self::Todo => "todo",
            Self::Note => "note",
            Self::Relationship => "relationship",
            Self::Custom => "custom",
        }
    }

    pub const ALL: [Category; 10] = [
        Self::Architecture,
        Self::Pattern,
        Self::Preference,
        Self::Error,
        Self::Context,
        Self::Learning,
        Self::Todo,
        Self::Note,
        Self::Relationship,
        Self::Custom,
    ];

    /// Categories whose memories default to global scope.
    pub fn defaults_to_global(&self) -> bool {
        matches!(self, Self::Pattern | Self::Preference | Self::Learning)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "architecture" => Ok(Self::Architecture),
            "pattern" => Ok(Self::Pattern),
            "preference" => Ok(Self::Preference),
            "error" => Ok(Self::Error),
            "context" => Ok(Self::Context),
            "learning" => Ok(Self::Learning),
            "todo" => Ok(Self::Todo),
            "note" => Ok(Self::Note),
            "relationship" => Ok(Self::Relationship),
            "custom" => Ok(Self::Custom),
            _ => Err(format!("unknown category: {s}")),
        }
    }
}

/// Visibility scope for a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Visible only when searching the owning project.
    Project,
    /// Visible when searching any project.
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Global => "global",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(Self::Project),
            "global" => Ok(Self::Global),
            _ => Err(format!("unknown scope: {s}")),
        }
    }
}

/// A memory record, matching the `memories` table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub category: Category,
    pub title: String,
    pub content: String,
    /// Owning project. `None` for cross-project memories.
    pub project: Option<String>,
    pub scope: Scope,
    /// Advisory hint that this memory is worth transferring across projects.
    pub transferable: bool,
    pub tags: Vec<String>,
    /// Stored strength in `[0, 1]`; changes only on reinforcement or consolidation.
    pub salience: f64,
    /// Last-persisted time-decayed value — a read-side cache.
    pub decayed_score: f64,
    pub access_count: u32,
    /// ISO 8601 timestamp of the last access or mutation.
    pub last_accessed: String,
    /// ISO 8601 creation timestamp.
    pub created_at: String,
    /// Unit-norm embedding vector. Absent until the embedder produces it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Input to [`crate::memory::store::add_memory`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryInput {
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: Option<MemoryType>,
    pub category: Option<Category>,
    pub project: Option<String>,
    pub tags: Option<Vec<String>>,
    /// Explicit salience override in `[0, 1]`.
    pub importance: Option<f64>,
    pub scope: Option<Scope>,
    pub transferable: Option<bool>,
    pub metadata: Option<serde_json::Value>,
}

/// Patch for [`crate::memory::store::update_memory`]; `None` fields are untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: Option<MemoryType>,
    pub category: Option<Category>,
    pub tags: Option<Vec<String>>,
    pub salience: Option<f64>,
    pub metadata: Option<serde_json::Value>,
}

/// A directed link between two memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLink {
    pub id: i64,
    pub source_id: i64,
    pub target_id: i64,
    /// Relationship label (e.g. `"related"`, `"contradicts"`).
    pub relationship: String,
    pub strength: f64,
    pub created_at: String,
}

/// Options for [`crate::memory::search::search`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchOptions {
    pub query: Option<String>,
    pub project: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: Option<MemoryType>,
    pub category: Option<Category>,
    pub tags: Option<Vec<String>>,
    pub min_salience: Option<f64>,
    /// Keep results whose decayed score has fallen below the floor.
    #[serde(default)]
    pub include_decayed: bool,
    /// Include global-scope memories from other projects. Defaults to true.
    pub include_global: Option<bool>,
    pub limit: Option<usize>,
}

/// Reference to a contradicting memory, attached to search results.
#[derive(Debug, Clone, Serialize)]
pub struct Contradiction {
    #[serde(rename = "memoryId")]
    pub memory_id: i64,
    pub title: String,
    pub strength: f64,
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub memory: Memory,
    pub score: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contradictions: Vec<Contradiction>,
}

/// Serialize tags for the `tags` column (JSON array text).
pub fn tags_to_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".into())
}

/// Tags are stored lowercased, trimmed, and de-duplicated (order-preserving)
/// so the any-match filter can compare literally.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

/// Parse the `tags` column, tolerating malformed legacy rows.
pub fn tags_from_json(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}
