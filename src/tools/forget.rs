//! MCP `forget` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `forget` MCP tool. Exactly one of `id` or `query`.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ForgetParams {
    /// Id of the memory to delete.
    #[schemars(description = "Id of the memory to delete")]
    pub id: Option<i64>,

    /// Delete the best match for this query instead of a specific id.
    #[schemars(description = "Delete the single best search match for this query")]
    pub query: Option<String>,
}
