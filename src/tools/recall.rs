//! MCP `recall` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `recall` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RecallParams {
    /// Natural-language search query.
    #[schemars(description = "Natural-language search query")]
    pub query: String,

    /// Restrict results to this project (global memories still included).
    #[schemars(description = "Restrict to this project; global-scope memories are still included")]
    pub project: Option<String>,

    /// Filter by tier: short_term, long_term, episodic.
    #[schemars(description = "Filter by memory tier: short_term, long_term, or episodic")]
    pub r#type: Option<String>,

    /// Filter by category.
    #[schemars(description = "Filter by category")]
    pub category: Option<String>,

    /// Any-match tag filter.
    #[schemars(description = "Only memories carrying at least one of these tags")]
    pub tags: Option<Vec<String>>,

    /// Maximum results (default 10).
    #[schemars(description = "Maximum number of results, default 10")]
    pub limit: Option<usize>,

    /// Include global-scope memories from other projects (default true).
    #[schemars(description = "Include global-scope memories from other projects. Default true.")]
    #[serde(rename = "includeGlobal")]
    pub include_global: Option<bool>,
}
