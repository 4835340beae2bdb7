//! The engine — one value owning the connection, event bus, embedder, control
//! state, and background workers.
//!
//! All public operations are async: database work runs under
//! `tokio::task::spawn_blocking` against a shared `Mutex<Connection>`, which
//! serializes writers (every mutation is linearizable) while WAL keeps
//! readers on snapshots. Events are published only after the underlying
//! transaction has committed. Embedding backfill goes through a bounded
//! drop-oldest job queue so inserts never wait on the model.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::config::CortexConfig;
use crate::consolidate::{self, ConsolidationOutcome};
use crate::control::ControlState;
use crate::db;
use crate::embedding::{self, EmbeddingService, EMBEDDING_DIM};
use crate::error::CortexError;
use crate::events::{EventBus, EventKind};
use crate::graph;
use crate::memory::search::{self as search_mod};
use crate::memory::stats::{self as stats_mod, StatsResponse, Suggestion};
use crate::memory::store;
use crate::memory::types::{
    Memory, MemoryInput, MemoryLink, MemoryPatch, MemoryType, SearchOptions, SearchResult,
};
use crate::salience::DECAY_FLOOR;

/// Injectable time source. Background decay math must be testable against a
/// simulated wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The default clock: UTC system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Cap on queued embedding jobs; the oldest job is dropped on overflow.
const EMBED_QUEUE_CAP: usize = 256;

struct EmbedJob {
    memory_id: i64,
    text: String,
}

/// Bounded FIFO with drop-oldest overflow, woken by a `Notify`.
struct EmbedQueue {
    jobs: Mutex<VecDeque<EmbedJob>>,
    notify: Notify,
}

impl EmbedQueue {
    fn new() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, job: EmbedJob) {
        let mut jobs = self.jobs.lock().expect("embed queue lock");
        if jobs.len() >= EMBED_QUEUE_CAP {
            let dropped = jobs.pop_front();
            if let Some(dropped) = dropped {
                tracing::warn!(memory_id = dropped.memory_id, "embed queue full, dropping oldest job");
            }
        }
        jobs.push_back(job);
        drop(jobs);
        self.notify.notify_one();
    }

    async fn pop(&self) -> EmbedJob {
        loop {
            if let Some(job) = self.jobs.lock().expect("embed queue lock").pop_front() {
                return job;
            }
            self.notify.notified().await;
        }
    }

    fn len(&self) -> usize {
        self.jobs.lock().expect("embed queue lock").len()
    }
}

/// The memory engine. Construct once per process (or per test) and share via `Arc`.
pub struct Engine {
    conn: Arc<Mutex<Connection>>,
    /// `None` for in-memory databases — the size guard is then disabled.
    db_path: Option<PathBuf>,
    pub config: CortexConfig,
    pub bus: EventBus,
    pub control: ControlState,
    pub embedder: EmbeddingService,
    clock: Arc<dyn Clock>,
    embed_queue: EmbedQueue,
    current_project: Mutex<Option<String>>,
}

impl Engine {
    /// Open the engine against the configured database file.
    pub fn new(config: CortexConfig) -> anyhow::Result<Arc<Self>> {
        let db_path = config.resolved_db_path();
        let conn = db::open_database(&db_path)?;

        if let Ok(Some(stored_model)) = db::migrations::get_embedding_model(&conn) {
            if stored_model != config.embedding.model {
                tracing::warn!(
                    stored = %stored_model,
                    configured = %config.embedding.model,
                    "embedding model changed — existing vectors were produced by a different model"
                );
            }
        }

        Ok(Arc::new(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(db_path),
            embedder: EmbeddingService::new(config.embedding.clone()),
            bus: EventBus::new(),
            control: ControlState::new(),
            clock: Arc::new(SystemClock),
            embed_queue: EmbedQueue::new(),
            current_project: Mutex::new(config.storage.default_project.clone()),
            config,
        }))
    }

    /// Engine over an in-memory database with an injected clock. For tests.
    pub fn in_memory_with_clock(
        config: CortexConfig,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Arc<Self>> {
        let conn = db::open_memory_database()?;
        Ok(Arc::new(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
            embedder: EmbeddingService::new(config.embedding.clone()),
            bus: EventBus::new(),
            control: ControlState::new(),
            clock,
            embed_queue: EmbedQueue::new(),
            current_project: Mutex::new(config.storage.default_project.clone()),
            config,
        }))
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Run a closure against the connection on the blocking pool.
    async fn run_db<T, F>(&self, f: F) -> Result<T, CortexError>
    where
        F: FnOnce(&mut Connection) -> Result<T, CortexError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| CortexError::Internal(format!("db lock poisoned: {e}")))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| CortexError::Internal(format!("db task failed: {e}")))?
    }

    /// Refuse mutations while paused or above the size cap.
    fn check_mutable(&self) -> Result<(), CortexError> {
        if self.control.is_paused() {
            return Err(CortexError::Paused);
        }
        if let Some(path) = &self.db_path {
            db::check_writable(path)?;
        }
        Ok(())
    }

    fn db_size_bytes(&self) -> u64 {
        self.db_path
            .as_deref()
            .map(|p| db::size_info(p).bytes)
            .unwrap_or(0)
    }

    // ── Write path ───────────────────────────────────────────────────────────

    /// Add a memory. Publishes `memory_created`, runs KG extraction, and
    /// enqueues the embedding job. Dedup hits return the existing row and
    /// skip all side effects.
    pub async fn add(&self, mut input: MemoryInput) -> Result<store::AddOutcome, CortexError> {
        self.check_mutable()?;
        if input.project.is_none() {
            input.project = self.get_project();
        }
        let now = self.now();

        let outcome = self
            .run_db(move |conn| {
                let outcome = store::add_memory(conn, &input, now)?;
                if !outcome.deduplicated {
                    // Extraction is cheap regex work; run it while we still
                    // hold the connection so graph state is visible to the
                    // caller on return. Failures only log — the memory is in.
                    let memory = &outcome.memory;
                    let extraction = graph::extract::extract(
                        &memory.title,
                        &memory.content,
                        memory.category,
                    );
                    if let Err(e) =
                        graph::resolve::apply_extraction(conn, memory.id, &extraction)
                    {
                        tracing::warn!(id = memory.id, error = %e, "kg extraction failed");
                    }
                }
                Ok(outcome)
            })
            .await?;

        if !outcome.deduplicated {
            self.bus.publish(
                EventKind::MemoryCreated,
                serde_json::json!({"memory": outcome.memory}),
            );
            self.embed_queue.push(EmbedJob {
                memory_id: outcome.memory.id,
                text: embed_text(&outcome.memory),
            });
        }
        Ok(outcome)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Memory>, CortexError> {
        self.run_db(move |conn| store::get_memory(conn, id)).await
    }

    /// Patch a memory. Publishes `memory_updated` and re-runs extraction and
    /// embedding against the new text.
    pub async fn update(
        &self,
        id: i64,
        patch: MemoryPatch,
    ) -> Result<Option<Memory>, CortexError> {
        self.check_mutable()?;
        let now = self.now();
        let updated = self
            .run_db(move |conn| {
                let updated = store::update_memory(conn, id, &patch, now)?;
                if let Some(memory) = &updated {
                    let extraction = graph::extract::extract(
                        &memory.title,
                        &memory.content,
                        memory.category,
                    );
                    if let Err(e) = graph::resolve::apply_extraction(conn, memory.id, &extraction)
                    {
                        tracing::warn!(id = memory.id, error = %e, "kg extraction failed");
                    }
                }
                Ok(updated)
            })
            .await?;

        if let Some(memory) = &updated {
            self.bus.publish(
                EventKind::MemoryUpdated,
                serde_json::json!({"memory": memory}),
            );
            self.embed_queue.push(EmbedJob {
                memory_id: memory.id,
                text: embed_text(memory),
            });
        }
        Ok(updated)
    }

    /// Delete a memory. Publishes `memory_deleted` when a row was removed.
    pub async fn delete(&self, id: i64) -> Result<bool, CortexError> {
        self.check_mutable()?;
        let deleted = self.run_db(move |conn| store::delete_memory(conn, id)).await?;
        if deleted {
            self.bus
                .publish(EventKind::MemoryDeleted, serde_json::json!({"id": id}));
        }
        Ok(deleted)
    }

    /// Record an access. Publishes `memory_accessed` with the new salience.
    pub async fn access(&self, id: i64) -> Result<Option<Memory>, CortexError> {
        let now = self.now();
        let accessed = self
            .run_db(move |conn| store::access_memory(conn, id, now))
            .await?;
        if let Some(memory) = &accessed {
            self.bus.publish(
                EventKind::MemoryAccessed,
                serde_json::json!({
                    "id": memory.id,
                    "salience": memory.salience,
                    "accessCount": memory.access_count,
                }),
            );
        }
        Ok(accessed)
    }

    /// Explicit link between two memories.
    pub async fn link(
        &self,
        source_id: i64,
        target_id: i64,
        relationship: String,
        strength: f64,
    ) -> Result<store::LinkOutcome, CortexError> {
        self.check_mutable()?;
        let now = self.now();
        self.run_db(move |conn| {
            store::link_memories(conn, source_id, target_id, &relationship, strength, now)
        })
        .await
    }

    // ── Read path ────────────────────────────────────────────────────────────

    /// Hybrid search. Embeds the query when the pipeline is up; otherwise
    /// degrades to FTS + decay ranking without surfacing an error.
    pub async fn search(&self, options: SearchOptions) -> Result<Vec<SearchResult>, CortexError> {
        let query_embedding = match options.query.as_deref() {
            Some(q) if !q.trim().is_empty() => self.embedder.embed(q).await,
            _ => None,
        };
        let config = self.config.search.clone();
        self.run_db(move |conn| {
            search_mod::search(conn, &options, query_embedding.as_deref(), &config)
        })
        .await
    }

    pub async fn recent(
        &self,
        limit: usize,
        project: Option<String>,
    ) -> Result<Vec<Memory>, CortexError> {
        self.run_db(move |conn| store::recent(conn, limit, project.as_deref()))
            .await
    }

    pub async fn high_priority(
        &self,
        limit: usize,
        project: Option<String>,
    ) -> Result<Vec<Memory>, CortexError> {
        self.run_db(move |conn| store::high_priority(conn, limit, project.as_deref()))
            .await
    }

    pub async fn by_type(
        &self,
        memory_type: MemoryType,
        limit: usize,
    ) -> Result<Vec<Memory>, CortexError> {
        self.run_db(move |conn| store::by_type(conn, memory_type, limit))
            .await
    }

    pub async fn project_memories(&self, project: String) -> Result<Vec<Memory>, CortexError> {
        self.run_db(move |conn| store::project_memories(conn, &project))
            .await
    }

    pub async fn stats(&self, project: Option<String>) -> Result<StatsResponse, CortexError> {
        let size = self.db_size_bytes();
        self.run_db(move |conn| stats_mod::stats(conn, project.as_deref(), size))
            .await
    }

    pub async fn context_summary(
        &self,
        project: Option<String>,
        limit: usize,
    ) -> Result<String, CortexError> {
        self.run_db(move |conn| stats_mod::context_summary(conn, project.as_deref(), limit))
            .await
    }

    pub async fn suggestions(
        &self,
        q: String,
        limit: usize,
    ) -> Result<Vec<Suggestion>, CortexError> {
        self.run_db(move |conn| stats_mod::suggestions(conn, &q, limit))
            .await
    }

    pub async fn links(&self, limit: usize) -> Result<Vec<MemoryLink>, CortexError> {
        self.run_db(move |conn| store::all_links(conn, limit)).await
    }

    // ── Sessions ─────────────────────────────────────────────────────────────

    /// Open a bookkeeping session row; returns the session id.
    pub async fn begin_session(&self, project: Option<String>) -> Result<String, CortexError> {
        let now = self.now();
        self.run_db(move |conn| stats_mod::begin_session(conn, project.as_deref(), now))
            .await
    }

    /// Close a session row with its summary and usage counters.
    pub async fn end_session(
        &self,
        session_id: String,
        summary: Option<String>,
        memories_created: u32,
        memories_accessed: u32,
    ) -> Result<(), CortexError> {
        let now = self.now();
        self.run_db(move |conn| {
            stats_mod::end_session(
                conn,
                &session_id,
                summary.as_deref(),
                memories_created,
                memories_accessed,
                now,
            )
        })
        .await
    }

    // ── Graph ────────────────────────────────────────────────────────────────

    pub async fn graph_query(
        &self,
        entity: String,
        depth: usize,
        predicates: Option<Vec<String>>,
    ) -> Result<graph::Subgraph, CortexError> {
        self.run_db(move |conn| graph::graph_query(conn, &entity, depth, predicates.as_deref()))
            .await
    }

    pub async fn graph_entities(
        &self,
        entity_type: Option<String>,
        min_mentions: i64,
        limit: usize,
    ) -> Result<Vec<graph::Entity>, CortexError> {
        self.run_db(move |conn| {
            graph::graph_entities(conn, entity_type.as_deref(), min_mentions, limit)
        })
        .await
    }

    pub async fn graph_explain(
        &self,
        from: String,
        to: String,
        max_depth: usize,
    ) -> Result<Option<Vec<graph::PathStep>>, CortexError> {
        self.run_db(move |conn| graph::graph_explain(conn, &from, &to, max_depth))
            .await
    }

    pub async fn merge_entities(&self, keep_id: i64, remove_id: i64) -> Result<bool, CortexError> {
        self.check_mutable()?;
        self.run_db(move |conn| graph::resolve::merge(conn, keep_id, remove_id))
            .await
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Full consolidation pass. Publishes `consolidation_complete`, one
    /// `link_discovered` per new link, and `memory_deleted` per eviction.
    pub async fn consolidate(&self) -> Result<ConsolidationOutcome, CortexError> {
        if self.control.is_paused() {
            return Err(CortexError::Paused);
        }
        let config = self.config.consolidation.clone();
        let now = self.now();
        let outcome = self
            .run_db(move |conn| consolidate::consolidate(conn, &config, now))
            .await?;

        for link in &outcome.links {
            self.bus.publish(
                EventKind::LinkDiscovered,
                serde_json::json!({
                    "sourceId": link.source_id,
                    "targetId": link.target_id,
                    "strength": link.strength,
                }),
            );
        }
        for (id, _) in &outcome.deleted {
            self.bus
                .publish(EventKind::MemoryDeleted, serde_json::json!({"id": id}));
        }
        self.bus.publish(
            EventKind::ConsolidationComplete,
            serde_json::json!({
                "consolidated": outcome.consolidated,
                "decayed": outcome.decayed,
                "deleted": outcome.deleted.len(),
            }),
        );
        Ok(outcome)
    }

    /// Recompute and persist every decayed score.
    pub async fn update_decay_scores(&self) -> Result<usize, CortexError> {
        let now = self.now();
        self.run_db(move |conn| store::update_decay_scores(conn, now))
            .await
    }

    /// Evict decayed short-term rows below `threshold`. Publishes
    /// `memory_deleted` per eviction and returns the count.
    pub async fn cleanup_decayed(&self, threshold: f64) -> Result<usize, CortexError> {
        let deleted = self
            .run_db(move |conn| store::cleanup_decayed(conn, threshold))
            .await?;
        for (id, _) in &deleted {
            self.bus
                .publish(EventKind::MemoryDeleted, serde_json::json!({"id": id}));
        }
        Ok(deleted.len())
    }

    // ── Control ──────────────────────────────────────────────────────────────

    pub fn pause(&self) {
        self.control.set_paused(true);
        tracing::info!("engine paused");
    }

    pub fn resume(&self) {
        self.control.set_paused(false);
        tracing::info!("engine resumed");
    }

    pub fn set_project(&self, project: Option<String>) {
        *self.current_project.lock().expect("project lock") = project;
    }

    pub fn get_project(&self) -> Option<String> {
        self.current_project.lock().expect("project lock").clone()
    }

    pub fn pending_embed_jobs(&self) -> usize {
        self.embed_queue.len()
    }

    // ── Background workers ───────────────────────────────────────────────────

    /// Spawn the embedding worker and the tick loops. Tasks run until the
    /// process exits; errors inside a tick are logged and the next tick
    /// retries.
    pub fn start_workers(self: Arc<Self>) {
        let engine = Arc::clone(&self);
        tokio::spawn(async move {
            loop {
                let job = engine.embed_queue.pop().await;
                engine.process_embed_job(job).await;
            }
        });

        let engine = Arc::clone(&self);
        tokio::spawn(async move {
            let period = engine.config.consolidation.light_tick_secs.max(1);
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(period));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut tick: u32 = 0;
            loop {
                interval.tick().await;
                tick = tick.wrapping_add(1);
                engine.run_light_tick(tick).await;
            }
        });

        let engine = Arc::clone(&self);
        tokio::spawn(async move {
            let period = engine.config.consolidation.medium_tick_secs.max(1);
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(period));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                engine.run_medium_tick().await;
            }
        });
    }

    /// One embedding job: encode, validate, store. A failed or cancelled job
    /// leaves `embedding` NULL; a later insert or re-embed retries.
    async fn process_embed_job(&self, job: EmbedJob) {
        let Some(vector) = self.embedder.embed(&job.text).await else {
            return;
        };
        if vector.len() != EMBEDDING_DIM {
            tracing::warn!(
                memory_id = job.memory_id,
                len = vector.len(),
                "embedding has wrong dimension, discarding"
            );
            return;
        }
        let memory_id = job.memory_id;
        let result = self
            .run_db(move |conn| {
                conn.execute(
                    "UPDATE memories SET embedding = ?1 WHERE id = ?2",
                    params![embedding::embedding_to_bytes(&vector), memory_id],
                )?;
                Ok(())
            })
            .await;
        match result {
            // A job for a row deleted in the meantime updates nothing; fine.
            Ok(()) => tracing::debug!(memory_id, "embedding stored"),
            Err(e) => tracing::warn!(memory_id, error = %e, "embedding update failed"),
        }
    }

    async fn run_light_tick(&self, tick: u32) {
        if self.control.is_paused() {
            return;
        }
        let persist_every = self.config.consolidation.persist_every.max(1);
        let persist = tick % persist_every == 0;
        let window = self.config.consolidation.decay_window;
        let now = self.now();

        let result = self
            .run_db(move |conn| consolidate::light_tick(conn, window, persist, now))
            .await;
        match result {
            Ok(result) => {
                if !result.changed.is_empty() {
                    self.bus.publish(
                        EventKind::DecayTick,
                        serde_json::json!({"changed": result.changed, "persisted": result.persisted}),
                    );
                }
                self.bus
                    .publish(EventKind::WorkerLightTick, serde_json::json!({"tick": tick}));
            }
            Err(e) => tracing::warn!(error = %e, "light tick failed"),
        }
    }

    async fn run_medium_tick(&self) {
        if !self.config.consolidation.enabled {
            return;
        }
        match self.consolidate().await {
            Ok(_) => {
                self.bus
                    .publish(EventKind::WorkerMediumTick, serde_json::json!({}));
            }
            Err(CortexError::Paused) => {}
            Err(e) => tracing::warn!(error = %e, "consolidation tick failed"),
        }
    }

    /// Decay floor used by cleanup endpoints.
    pub fn decay_floor(&self) -> f64 {
        DECAY_FLOOR
    }
}

/// Text handed to the embedder for a memory.
fn embed_text(memory: &Memory) -> String {
    format!("{}\n{}", memory.title, memory.content)
}
