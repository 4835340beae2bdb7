//! MCP `set_project` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `set_project` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SetProjectParams {
    /// Project name that scopes subsequent remember/recall calls.
    #[schemars(description = "Project name used to scope subsequent remember/recall calls")]
    pub name: String,
}
