//! MCP tool handler — the agent-facing surface over the engine.
//!
//! One method per tool, wired through the `#[tool_router]` macro. Every tool
//! returns a structured JSON string with a top-level `success` flag; errors
//! carry the taxonomy kind so hook scripts can branch on it.

pub mod context;
pub mod forget;
pub mod graph;
pub mod project;
pub mod recall;
pub mod remember;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use std::sync::Arc;

use context::GetContextParams;
use forget::ForgetParams;
use graph::{GraphEntitiesParams, GraphExplainParams, GraphQueryParams};
use project::SetProjectParams;
use recall::RecallParams;
use remember::RememberParams;

use crate::engine::Engine;
use crate::error::CortexError;
use crate::memory::types::{MemoryInput, SearchOptions};

/// The Cortex MCP tool handler. Holds the shared engine and exposes all
/// tools via the `#[tool_router]` macro.
#[derive(Clone)]
pub struct CortexTools {
    tool_router: ToolRouter<Self>,
    engine: Arc<Engine>,
}

fn err_json(e: &CortexError) -> String {
    serde_json::json!({
        "success": false,
        "error": {"kind": e.kind(), "message": e.to_string()},
    })
    .to_string()
}

fn ok_json(value: serde_json::Value) -> Result<String, String> {
    let mut body = serde_json::json!({"success": true});
    if let (Some(obj), Some(extra)) = (body.as_object_mut(), value.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    serde_json::to_string(&body).map_err(|e| format!("serialization failed: {e}"))
}

#[tool_router]
impl CortexTools {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            engine,
        }
    }

    /// Store a memory.
    #[tool(description = "Store a memory. Category, salience, scope, and tags are inferred from the text when not given; near-duplicates return the existing memory.")]
    async fn remember(
        &self,
        Parameters(params): Parameters<RememberParams>,
    ) -> Result<String, String> {
        let memory_type = match params.r#type.as_deref() {
            Some(s) => Some(s.parse().map_err(|e: String| e)?),
            None => None,
        };
        let category = match params.category.as_deref() {
            Some(s) => Some(s.parse().map_err(|e: String| e)?),
            None => None,
        };
        let scope = match params.scope.as_deref() {
            Some(s) => Some(s.parse().map_err(|e: String| e)?),
            None => None,
        };

        let input = MemoryInput {
            title: params.title,
            content: params.content,
            memory_type,
            category,
            project: params.project,
            tags: params.tags,
            importance: params.importance,
            scope,
            transferable: params.transferable,
            metadata: None,
        };

        tracing::info!(title_len = input.title.len(), "remember called");
        match self.engine.add(input).await {
            Ok(outcome) => ok_json(serde_json::json!({
                "memory": outcome.memory,
                "deduplicated": outcome.deduplicated,
            })),
            Err(e) => Ok(err_json(&e)),
        }
    }

    /// Search memories.
    #[tool(description = "Search memories with hybrid lexical + semantic ranking. Returns scored results with contradiction warnings.")]
    async fn recall(
        &self,
        Parameters(params): Parameters<RecallParams>,
    ) -> Result<String, String> {
        let memory_type = match params.r#type.as_deref() {
            Some(s) => Some(s.parse().map_err(|e: String| e)?),
            None => None,
        };
        let category = match params.category.as_deref() {
            Some(s) => Some(s.parse().map_err(|e: String| e)?),
            None => None,
        };

        let options = SearchOptions {
            query: Some(params.query),
            project: params.project.or_else(|| self.engine.get_project()),
            memory_type,
            category,
            tags: params.tags,
            limit: params.limit,
            include_global: params.include_global,
            ..Default::default()
        };

        match self.engine.search(options).await {
            Ok(results) => {
                let count = results.len();
                ok_json(serde_json::json!({"results": results, "count": count}))
            }
            Err(e) => Ok(err_json(&e)),
        }
    }

    /// Delete a memory by id or best query match.
    #[tool(description = "Delete a memory, by id or by the best match for a query.")]
    async fn forget(
        &self,
        Parameters(params): Parameters<ForgetParams>,
    ) -> Result<String, String> {
        let id = match (params.id, params.query.as_deref()) {
            (Some(id), _) => id,
            (None, Some(query)) => {
                let options = SearchOptions {
                    query: Some(query.to_string()),
                    project: self.engine.get_project(),
                    limit: Some(1),
                    ..Default::default()
                };
                match self.engine.search(options).await {
                    Ok(results) => match results.first() {
                        Some(hit) => hit.memory.id,
                        None => {
                            return ok_json(serde_json::json!({
                                "deleted": false,
                                "reason": "no match for query",
                            }))
                        }
                    },
                    Err(e) => return Ok(err_json(&e)),
                }
            }
            (None, None) => {
                return Ok(err_json(&CortexError::Validation(
                    "either id or query is required".into(),
                )))
            }
        };

        match self.engine.delete(id).await {
            Ok(true) => ok_json(serde_json::json!({"deleted": true, "id": id})),
            Ok(false) => Ok(err_json(&CortexError::NotFound(format!("memory {id}")))),
            Err(e) => Ok(err_json(&e)),
        }
    }

    /// Project context summary for injection into an assistant prompt.
    #[tool(description = "Get a grouped Markdown summary of the most relevant memories, ready to inject into an assistant prompt.")]
    async fn get_context(
        &self,
        Parameters(params): Parameters<GetContextParams>,
    ) -> Result<String, String> {
        let project = params.project.or_else(|| self.engine.get_project());

        // A focusing query switches from the priority summary to search hits.
        if let Some(query) = params.query.filter(|q| !q.trim().is_empty()) {
            let options = SearchOptions {
                query: Some(query),
                project,
                limit: Some(10),
                ..Default::default()
            };
            return match self.engine.search(options).await {
                Ok(results) => {
                    if params.format.as_deref() == Some("json") {
                        ok_json(serde_json::json!({"results": results}))
                    } else {
                        let mut out = String::from("# Relevant memories\n");
                        for result in &results {
                            out.push_str(&format!(
                                "- **{}**: {}\n",
                                result.memory.title,
                                result.memory.content.lines().next().unwrap_or(""),
                            ));
                        }
                        ok_json(serde_json::json!({"context": out}))
                    }
                }
                Err(e) => Ok(err_json(&e)),
            };
        }

        match self.engine.context_summary(project, 20).await {
            Ok(summary) => ok_json(serde_json::json!({"context": summary})),
            Err(e) => Ok(err_json(&e)),
        }
    }

    /// Set the session project.
    #[tool(description = "Set the project that scopes subsequent remember/recall calls.")]
    async fn set_project(
        &self,
        Parameters(params): Parameters<SetProjectParams>,
    ) -> Result<String, String> {
        if params.name.trim().is_empty() {
            return Ok(err_json(&CortexError::Validation(
                "project name must not be empty".into(),
            )));
        }
        self.engine.set_project(Some(params.name.clone()));
        ok_json(serde_json::json!({"project": params.name}))
    }

    /// Get the session project.
    #[tool(description = "Get the currently active project.")]
    async fn get_project(&self) -> Result<String, String> {
        ok_json(serde_json::json!({"project": self.engine.get_project()}))
    }

    /// Explore the knowledge graph around an entity.
    #[tool(description = "Explore the knowledge graph around an entity: its neighbors and the triples connecting them.")]
    async fn graph_query(
        &self,
        Parameters(params): Parameters<GraphQueryParams>,
    ) -> Result<String, String> {
        match self
            .engine
            .graph_query(params.entity, params.depth.unwrap_or(2), params.predicates)
            .await
        {
            Ok(subgraph) => ok_json(serde_json::json!({"graph": subgraph})),
            Err(e) => Ok(err_json(&e)),
        }
    }

    /// List graph entities.
    #[tool(description = "List knowledge-graph entities, optionally filtered by type and minimum mention count.")]
    async fn graph_entities(
        &self,
        Parameters(params): Parameters<GraphEntitiesParams>,
    ) -> Result<String, String> {
        match self
            .engine
            .graph_entities(
                params.r#type,
                params.min_mentions.unwrap_or(0),
                params.limit.unwrap_or(50).clamp(1, 500),
            )
            .await
        {
            Ok(entities) => ok_json(serde_json::json!({"entities": entities})),
            Err(e) => Ok(err_json(&e)),
        }
    }

    /// Explain how two entities are connected.
    #[tool(description = "Explain how two entities are connected: the shortest path of triples between them.")]
    async fn graph_explain(
        &self,
        Parameters(params): Parameters<GraphExplainParams>,
    ) -> Result<String, String> {
        match self
            .engine
            .graph_explain(params.from, params.to, params.max_depth.unwrap_or(4))
            .await
        {
            Ok(Some(path)) => ok_json(serde_json::json!({"connected": true, "path": path})),
            Ok(None) => ok_json(serde_json::json!({"connected": false, "path": []})),
            Err(e) => Ok(err_json(&e)),
        }
    }
}

#[tool_handler]
impl ServerHandler for CortexTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Cortex is a persistent memory engine for coding assistants. Use remember to \
                 save memories, recall to search them, get_context for a project summary, and \
                 the graph_* tools to explore extracted entities."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
