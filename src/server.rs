//! HTTP + WebSocket surface for the visualization UI and hook clients.
//!
//! A thin axum layer over [`Engine`]: every handler parses params, calls one
//! engine method, and maps [`CortexError`] kinds onto status codes. The
//! `/ws/events` socket sends one `initial_state` frame and then streams the
//! event bus verbatim; a subscriber that lags simply loses the oldest frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use crate::engine::Engine;
use crate::error::CortexError;
use crate::memory::types::{Category, MemoryInput, MemoryType, SearchOptions};

impl IntoResponse for CortexError {
    fn into_response(self) -> Response {
        let status = match &self {
            CortexError::Validation(_) => StatusCode::BAD_REQUEST,
            CortexError::NotFound(_) => StatusCode::NOT_FOUND,
            CortexError::Paused => StatusCode::CONFLICT,
            CortexError::OverCapacity { .. } => StatusCode::INSUFFICIENT_STORAGE,
            CortexError::Contention(_) => StatusCode::SERVICE_UNAVAILABLE,
            CortexError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "success": false,
            "error": {"kind": self.kind(), "message": self.to_string()},
        });
        (status, Json(body)).into_response()
    }
}

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/memories", get(list_memories).post(create_memory))
        .route("/api/memories/{id}", get(get_memory).delete(delete_memory))
        .route("/api/memories/{id}/access", post(access_memory))
        .route("/api/stats", get(get_stats))
        .route("/api/links", get(get_links))
        .route("/api/consolidate", post(run_consolidate))
        .route("/api/context", get(get_context))
        .route("/api/suggestions", get(get_suggestions))
        .route("/ws/events", get(ws_events))
        .with_state(engine)
}

/// Bind and serve until ctrl-c.
pub async fn serve_http(engine: Arc<Engine>, host: &str, port: u16) -> anyhow::Result<()> {
    let bind_addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "HTTP API listening");

    axum::serve(listener, router(engine))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            tracing::info!("shutting down HTTP server");
        })
        .await?;
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": engine.control.uptime_human(),
        "paused": engine.control.is_paused(),
        "pendingEmbedJobs": engine.pending_embed_jobs(),
    }))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    project: Option<String>,
    #[serde(rename = "type")]
    memory_type: Option<String>,
    category: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    mode: Option<String>,
    query: Option<String>,
}

async fn list_memories(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<ListParams>,
) -> Result<Json<serde_json::Value>, CortexError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 200);
    let offset = params.offset.unwrap_or(0);
    let mode = params.mode.as_deref().unwrap_or("recent");
    let category = parse_opt::<Category>(params.category.as_deref())?;
    let memory_type = parse_opt::<MemoryType>(params.memory_type.as_deref())?;

    let mut memories = match mode {
        "search" => {
            let options = SearchOptions {
                query: params.query.clone(),
                project: params.project.clone(),
                memory_type,
                category,
                limit: Some(offset + limit),
                ..Default::default()
            };
            engine
                .search(options)
                .await?
                .into_iter()
                .map(|r| r.memory)
                .collect::<Vec<_>>()
        }
        "important" => {
            engine
                .high_priority(offset + limit, params.project.clone())
                .await?
        }
        _ => {
            if let Some(memory_type) = memory_type {
                engine.by_type(memory_type, offset + limit).await?
            } else {
                engine.recent(offset + limit, params.project.clone()).await?
            }
        }
    };

    // Search already applied these as predicates; browse modes filter here.
    if mode != "search" {
        if let Some(category) = category {
            memories.retain(|m| m.category == category);
        }
        if mode == "important" {
            if let Some(memory_type) = memory_type {
                memories.retain(|m| m.memory_type == memory_type);
            }
        }
    }

    let stats = engine.stats(params.project).await?;
    let total = stats.total_memories as usize;
    let page: Vec<_> = memories.into_iter().skip(offset).collect();
    let has_more = offset + page.len() < total;

    Ok(Json(serde_json::json!({
        "memories": page,
        "pagination": {
            "offset": offset,
            "limit": limit,
            "total": total,
            "hasMore": has_more,
        },
    })))
}

async fn create_memory(
    State(engine): State<Arc<Engine>>,
    Json(input): Json<MemoryInput>,
) -> Result<(StatusCode, Json<serde_json::Value>), CortexError> {
    let outcome = engine.add(input).await?;
    let status = if outcome.deduplicated {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(serde_json::json!({
            "success": true,
            "memory": outcome.memory,
            "deduplicated": outcome.deduplicated,
        })),
    ))
}

async fn get_memory(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, CortexError> {
    let memory = engine
        .get(id)
        .await?
        .ok_or_else(|| CortexError::NotFound(format!("memory {id}")))?;
    Ok(Json(serde_json::json!({"success": true, "memory": memory})))
}

async fn delete_memory(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, CortexError> {
    if !engine.delete(id).await? {
        return Err(CortexError::NotFound(format!("memory {id}")));
    }
    Ok(Json(serde_json::json!({"success": true, "id": id})))
}

async fn access_memory(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, CortexError> {
    let memory = engine
        .access(id)
        .await?
        .ok_or_else(|| CortexError::NotFound(format!("memory {id}")))?;
    Ok(Json(serde_json::json!({"success": true, "memory": memory})))
}

#[derive(Debug, Deserialize)]
struct ProjectParams {
    project: Option<String>,
    limit: Option<usize>,
}

async fn get_stats(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<ProjectParams>,
) -> Result<Json<serde_json::Value>, CortexError> {
    let stats = engine.stats(params.project).await?;
    Ok(Json(serde_json::json!({"success": true, "stats": stats})))
}

async fn get_links(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<ProjectParams>,
) -> Result<Json<serde_json::Value>, CortexError> {
    let links = engine.links(params.limit.unwrap_or(200).clamp(1, 1000)).await?;
    Ok(Json(serde_json::json!({"success": true, "links": links})))
}

async fn run_consolidate(
    State(engine): State<Arc<Engine>>,
) -> Result<Json<serde_json::Value>, CortexError> {
    let outcome = engine.consolidate().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "consolidated": outcome.consolidated,
        "decayed": outcome.decayed,
        "deleted": outcome.deleted.len(),
    })))
}

async fn get_context(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<ProjectParams>,
) -> Result<Json<serde_json::Value>, CortexError> {
    let summary = engine
        .context_summary(params.project, params.limit.unwrap_or(20).clamp(1, 100))
        .await?;
    Ok(Json(serde_json::json!({"success": true, "context": summary})))
}

#[derive(Debug, Deserialize)]
struct SuggestParams {
    q: Option<String>,
    limit: Option<usize>,
}

async fn get_suggestions(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<SuggestParams>,
) -> Result<Json<serde_json::Value>, CortexError> {
    let suggestions = engine
        .suggestions(
            params.q.unwrap_or_default(),
            params.limit.unwrap_or(10).clamp(1, 50),
        )
        .await?;
    Ok(Json(
        serde_json::json!({"success": true, "suggestions": suggestions}),
    ))
}

// ── WebSocket ────────────────────────────────────────────────────────────────

async fn ws_events(ws: WebSocketUpgrade, State(engine): State<Arc<Engine>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, engine))
}

async fn handle_socket(mut socket: WebSocket, engine: Arc<Engine>) {
    // One initial_state frame: current stats plus the recent page the UI
    // renders first.
    let initial = async {
        let stats = engine.stats(None).await.ok()?;
        let memories = engine.recent(50, None).await.ok()?;
        Some(serde_json::json!({
            "type": "initial_state",
            "timestamp": chrono::Utc::now(),
            "data": {"stats": stats, "memories": memories},
        }))
    }
    .await;

    if let Some(frame) = initial {
        if socket.send(Message::Text(frame.to_string().into())).await.is_err() {
            return;
        }
    }

    let mut rx = engine.bus.subscribe();
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    // Slow consumer lost the oldest events; keep streaming.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(dropped = n, "ws subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // ignore pings and client chatter
                }
            }
        }
    }
}

fn parse_opt<T: std::str::FromStr<Err = String>>(
    raw: Option<&str>,
) -> Result<Option<T>, CortexError> {
    raw.map(|s| s.parse::<T>().map_err(CortexError::Validation))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_statuses() {
        let cases = [
            (CortexError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (CortexError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (CortexError::Paused, StatusCode::CONFLICT),
            (
                CortexError::OverCapacity {
                    size_bytes: 1,
                    cap_bytes: 1,
                },
                StatusCode::INSUFFICIENT_STORAGE,
            ),
            (
                CortexError::Contention("busy".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CortexError::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }
}
