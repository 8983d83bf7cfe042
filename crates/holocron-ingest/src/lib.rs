//! Holocron ingestion pipeline
//!
//! Pulls the characters, films and starships collections from a SWAPI mirror
//! and mirrors them into a [`CatalogStore`](holocron_storage::CatalogStore):
//!
//! ```text
//! ┌──────────────┐  pages   ┌────────┐  drafts  ┌──────────┐  writes  ┌───────┐
//! │ RemoteSource │ ───────► │ mapper │ ───────► │ resolver │ ───────► │ store │
//! └──────────────┘          └────────┘          └──────────┘          └───────┘
//!        ▲                                                                 │
//!        └──────────────────── Ingestor (retry, cancel, summary) ◄─────────┘
//! ```
//!
//! Runs for different collections are independent and may overlap; the store
//! converges to the same reference graph whichever order they finish in.

pub mod mapper;
pub mod pipeline;
pub mod remote;
pub mod resolver;

use holocron_model::EntityKind;
use thiserror::Error;

pub use mapper::{map_record, BrokenLocator, MappedRecord, MappingError};
pub use pipeline::{IngestConfig, IngestionSummary, Ingestor, RecordFailure, RetryPolicy, Stage};
pub use remote::{
    FetchError, FixtureSource, Page, PageCursor, PageStream, RemoteConfig, RemoteSource,
    SwapiClient, DEFAULT_BASE_URL,
};
pub use resolver::{Resolution, Resolver, UnresolvedReason, UnresolvedReferenceWarning};

#[derive(Debug, Error)]
pub enum IngestError {
    /// Every attempt at the first page failed; nothing was ingested.
    #[error("remote source unavailable for {kind} after {attempts} attempt(s): {source}")]
    SourceUnavailable {
        kind: EntityKind,
        attempts: u32,
        source: FetchError,
    },

    #[error("ingest configuration error: {0}")]
    Config(String),
}
