//! MCP `remember` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `remember` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RememberParams {
    /// Short title for the memory.
    #[schemars(description = "Short title for the memory")]
    pub title: String,

    /// Free-text content (capped at 10 KiB; overflow is truncated).
    #[schemars(description = "Free-text content of the memory")]
    pub content: String,

    /// Category: architecture, pattern, preference, error, context, learning,
    /// todo, note, relationship, or custom. Inferred when omitted.
    #[schemars(
        description = "Category: architecture, pattern, preference, error, context, learning, todo, note, relationship, custom. Inferred from the text when omitted."
    )]
    pub category: Option<String>,

    /// Memory tier: short_term (default), long_term, or episodic.
    #[schemars(description = "Memory tier: short_term, long_term, or episodic. Defaults by salience.")]
    pub r#type: Option<String>,

    /// Owning project. Defaults to the session project.
    #[schemars(description = "Owning project. Defaults to the session project.")]
    pub project: Option<String>,

    /// Tags; extracted from the text when omitted.
    #[schemars(description = "Tags; extracted from the text when omitted")]
    pub tags: Option<Vec<String>>,

    /// Explicit salience override in [0, 1].
    #[schemars(description = "Explicit importance/salience override, 0.0-1.0")]
    pub importance: Option<f64>,

    /// Visibility: project (default) or global.
    #[schemars(description = "Visibility scope: 'project' or 'global'. Inferred when omitted.")]
    pub scope: Option<String>,

    /// Hint that this memory transfers across projects.
    #[schemars(description = "Hint that this memory is worth transferring across projects")]
    pub transferable: Option<bool>,
}
