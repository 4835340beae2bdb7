//! MCP `get_context` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `get_context` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct GetContextParams {
    /// Project to summarize. Defaults to the session project.
    #[schemars(description = "Project to summarize. Defaults to the session project.")]
    pub project: Option<String>,

    /// Optional query to focus the summary on matching memories.
    #[schemars(description = "Optional query to focus the summary on matching memories")]
    pub query: Option<String>,

    /// Output format: markdown (default) or json.
    #[schemars(description = "Output format: 'markdown' (default) or 'json'")]
    pub format: Option<String>,
}
