//! Cortex — a persistent, brain-inspired memory store for LLM coding assistants.
//!
//! Clients submit free-text memories tagged with a category and project; the
//! store retrieves the most relevant ones for a query using a hybrid of
//! lexical full-text search and dense-vector similarity, biased by a
//! time-decay salience score that models forgetting and reinforcement.
//!
//! | Tier | Purpose | Decay (per hour) |
//! |------|---------|------------------|
//! | **short_term** | landing zone for new memories | 0.995 (~½-life 138 h) |
//! | **episodic** | time-bound narrative context | 0.998 (~½-life 346 h) |
//! | **long_term** | consolidated, reinforced knowledge | 0.9995 (~½-life 1386 h) |
//!
//! # Architecture
//!
//! - **Storage**: SQLite (WAL) with FTS5 for Porter-stemmed keyword search;
//!   embeddings live in a BLOB column and are ranked by cosine similarity
//! - **Embeddings**: local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions),
//!   lazily loaded, filled in by a background worker so writes never wait
//! - **Ranking**: weighted fusion of FTS rank, vector similarity, decayed
//!   salience, priority, and tag/category overlap
//! - **Lifecycle**: background ticks decay, promote, link, and evict memories
//! - **Transports**: MCP over stdio for agents; HTTP + WebSocket for the UI
//!
//! # Modules
//!
//! - [`config`] — TOML configuration and environment overrides
//! - [`db`] — SQLite schema, migrations, transaction helpers, size guard
//! - [`embedding`] — text-to-vector pipeline and cosine math
//! - [`salience`] — keyword salience, decay, reinforcement, priority
//! - [`memory`] — CRUD, hybrid search, and statistics
//! - [`graph`] — entity/triple extraction, resolution, and traversal
//! - [`engine`] — the async facade owning workers, events, and control state

pub mod cli;
pub mod config;
pub mod consolidate;
pub mod control;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod memory;
pub mod salience;
pub mod server;
pub mod tools;
