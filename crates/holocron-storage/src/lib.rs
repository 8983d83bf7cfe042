//! Holocron catalog store
//!
//! One arena of rows shared by all three entity kinds, plus the indices the
//! ingestion pipeline and the vote/ranking surface need:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          MemoryStore                             │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  keys: (kind, natural_key) ──► EntityId     (uniqueness gate)    │
//! │                                    │                             │
//! │                                    ▼                             │
//! │  rows: EntityId ──► Row { attributes, references, votes }        │
//! │                                    ▲                             │
//! │                                    │ backfill                    │
//! │  waiting: ReferenceToken ──► {referrer ids}                      │
//! │                                                                  │
//! │  catalog.wal  ◄── every upsert / vote        (optional)          │
//! │  catalog.snapshot ◄── checkpoint             (optional)          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Guarantees
//!
//! - **One row per natural key**: the `keys` entry lock serializes concurrent
//!   upserts of the same key; the loser of the race becomes an update.
//! - **Stable ids**: ids come from one counter shared by all kinds and are
//!   never reused.
//! - **Lossless votes**: each increment is a single `fetch_add` on the row's
//!   counter.
//! - **Order-independent references**: a pending reference is resolved
//!   whichever side (referrer or target) is written first.

pub mod memory;
pub mod persistence;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use holocron_model::{
    Attributes, Entity, EntityId, EntityKind, NaturalKey, RankedEntry, Reference,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub use memory::MemoryStore;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: EntityKind, id: EntityId },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding `catalog.wal` and `catalog.snapshot`. `None` keeps
    /// everything in memory.
    pub data_dir: Option<PathBuf>,
    /// fsync the write-ahead log after every record.
    pub sync_writes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            sync_writes: true,
        }
    }
}

// ============================================================================
// Writes
// ============================================================================

/// A fully resolved entity ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityWrite {
    pub natural_key: NaturalKey,
    pub attributes: Attributes,
    pub references: Vec<Reference>,
}

impl EntityWrite {
    pub fn kind(&self) -> EntityKind {
        self.attributes.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertStatus {
    Inserted,
    Updated,
    /// Natural key existed and nothing changed.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: EntityId,
    pub status: UpsertStatus,
    /// Rows whose pending references were resolved by this write.
    pub backfilled: usize,
}

// ============================================================================
// Store trait
// ============================================================================

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_by_natural_key(
        &self,
        kind: EntityKind,
        key: &NaturalKey,
    ) -> StoreResult<Option<Entity>>;

    /// Surrogate id for a natural key, without materializing the row.
    async fn resolve_natural_key(&self, kind: EntityKind, key: &NaturalKey) -> Option<EntityId>;

    /// Insert or overwrite by natural key. Votes are never touched.
    async fn upsert(&self, write: EntityWrite) -> StoreResult<UpsertOutcome>;

    async fn get(&self, kind: EntityKind, id: EntityId) -> StoreResult<Entity>;

    async fn list(&self, kind: EntityKind) -> StoreResult<Vec<Entity>>;

    /// Case-insensitive substring match on name/title.
    async fn search(&self, kind: EntityKind, query: &str) -> StoreResult<Vec<Entity>>;

    async fn count(&self, kind: Option<EntityKind>) -> usize;

    /// Add one vote, returning the new count.
    async fn increment_votes(&self, kind: EntityKind, id: EntityId) -> StoreResult<u64>;

    /// Top `n` by votes descending, ties by ascending id.
    async fn top(&self, kind: Option<EntityKind>, n: i64) -> StoreResult<Vec<RankedEntry>>;

    /// Flush durable state. A no-op for purely in-memory stores.
    async fn checkpoint(&self) -> StoreResult<()>;
}
