//! MCP graph tool parameter definitions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `graph_query` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GraphQueryParams {
    /// Entity name or alias to explore around.
    #[schemars(description = "Entity name or alias to explore around")]
    pub entity: String,

    /// Traversal depth, 1-4 (default 2).
    #[schemars(description = "Traversal depth, 1-4. Default 2.")]
    pub depth: Option<usize>,

    /// Only follow these predicates.
    #[schemars(description = "Only follow edges with these predicates")]
    pub predicates: Option<Vec<String>>,
}

/// Parameters for the `graph_entities` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GraphEntitiesParams {
    /// Filter by entity type (system, library, tool, person, concept, project).
    #[schemars(description = "Filter by entity type: system, library, tool, person, concept, project")]
    pub r#type: Option<String>,

    /// Only entities mentioned by at least this many memories.
    #[schemars(description = "Only entities mentioned by at least this many memories")]
    pub min_mentions: Option<i64>,

    /// Maximum entities to return (default 50).
    #[schemars(description = "Maximum entities to return, default 50")]
    pub limit: Option<usize>,
}

/// Parameters for the `graph_explain` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GraphExplainParams {
    /// Start entity name or alias.
    #[schemars(description = "Start entity name or alias")]
    pub from: String,

    /// Goal entity name or alias.
    #[schemars(description = "Goal entity name or alias")]
    pub to: String,

    /// Maximum path length, 1-4 (default 4).
    #[schemars(description = "Maximum path length, 1-4. Default 4.")]
    pub max_depth: Option<usize>,
}
