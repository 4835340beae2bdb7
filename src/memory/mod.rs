//! Core memory engine — storage, search, and read-side projections.
//!
//! The write path ([`store`]), the hybrid ranking pipeline ([`search`]), and
//! statistics/context projections ([`stats`]) are synchronous functions over a
//! `rusqlite::Connection`; the async facade lives in [`crate::engine`]. Type
//! definitions live in [`types`].

pub mod search;
pub mod stats;
pub mod store;
pub mod types;

use rusqlite::Row;

use types::{Memory, MemoryType, Scope};

/// Column list every memory SELECT uses, in [`memory_from_row`] order.
pub(crate) const MEMORY_COLUMNS: &str = "id, type, category, title, content, project, scope, \
     transferable, tags, salience, decayed_score, access_count, last_accessed, created_at, \
     embedding, metadata";

/// Same column list qualified with the `m` alias, for joins where the FTS
/// table carries identically-named columns.
pub(crate) const MEMORY_COLUMNS_M: &str = "m.id, m.type, m.category, m.title, m.content, \
     m.project, m.scope, m.transferable, m.tags, m.salience, m.decayed_score, m.access_count, \
     m.last_accessed, m.created_at, m.embedding, m.metadata";

/// Map a row selected with [`MEMORY_COLUMNS`] into a [`Memory`].
pub(crate) fn memory_from_row(row: &Row<'_>) -> rusqlite::Result<Memory> {
    let type_str: String = row.get(1)?;
    let category_str: String = row.get(2)?;
    let scope_str: String = row.get(6)?;
    let tags_json: String = row.get(8)?;
    let embedding_blob: Option<Vec<u8>> = row.get(14)?;
    let metadata_str: Option<String> = row.get(15)?;

    Ok(Memory {
        id: row.get(0)?,
        memory_type: type_str.parse::<MemoryType>().unwrap_or(MemoryType::ShortTerm),
        category: category_str.parse().unwrap_or(types::Category::Note),
        title: row.get(3)?,
        content: row.get(4)?,
        project: row.get(5)?,
        scope: scope_str.parse::<Scope>().unwrap_or(Scope::Project),
        transferable: row.get::<_, i64>(7)? != 0,
        tags: types::tags_from_json(&tags_json),
        salience: row.get(9)?,
        decayed_score: row.get(10)?,
        access_count: row.get(11)?,
        last_accessed: row.get(12)?,
        created_at: row.get(13)?,
        embedding: embedding_blob.map(|b| crate::embedding::bytes_to_embedding(&b)),
        metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
    })
}
