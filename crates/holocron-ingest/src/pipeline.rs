//! Ingestion orchestrator
//!
//! One run drains one collection, page by page:
//!
//! ```text
//!   Fetching ──► Mapping ──► Resolving ──► Upserting ──┐
//!      ▲                                               │ next record
//!      │ next page            ◄────────────────────────┘
//!      └──────────── (stream exhausted / cancelled / failed) ──► Summarizing
//! ```
//!
//! Record-level failures are counted and skipped. Page-level failures end the
//! run early with `partial = true`. Only a source that never delivered a
//! single page surfaces as [`IngestError::SourceUnavailable`].

use chrono::{DateTime, Utc};
use holocron_model::EntityKind;
use holocron_storage::{CatalogStore, EntityWrite, UpsertStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::mapper::map_record;
use crate::remote::{FetchError, Page, PageStream, RemoteSource};
use crate::resolver::{Resolver, UnresolvedReferenceWarning};
use crate::IngestError;

// ============================================================================
// Configuration
// ============================================================================

/// Exponential backoff for transient fetch failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per page, the first one included.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 2_000,
            max_backoff_ms: 10_000,
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failed`-th failed attempt (1-based).
    pub fn backoff(&self, failed: u32) -> Duration {
        let factor = u64::from(self.multiplier.max(1)).saturating_pow(failed.saturating_sub(1));
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms.max(self.initial_backoff_ms));
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub retry: RetryPolicy,
    /// Passes after which a missing reference target is reported as
    /// permanently unresolved.
    pub max_resolution_passes: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_resolution_passes: 3,
        }
    }
}

// ============================================================================
// Summary
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetching,
    Mapping,
    Resolving,
    Upserting,
    Summarizing,
}

/// One record that could not be ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// 1-based page number within the run.
    pub page: usize,
    /// 0-based position within the page.
    pub index: usize,
    pub natural_key: Option<String>,
    pub stage: Stage,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub kind: EntityKind,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub pages: usize,
    pub imported: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<RecordFailure>,
    pub unresolved_references: Vec<UnresolvedReferenceWarning>,
    pub partial: bool,
    pub cancelled: bool,
    pub error: Option<String>,
}

impl IngestionSummary {
    fn new(kind: EntityKind, run_id: Uuid) -> Self {
        Self {
            kind,
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            pages: 0,
            imported: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
            unresolved_references: Vec::new(),
            partial: false,
            cancelled: false,
            error: None,
        }
    }

    /// Records seen, failed ones included.
    pub fn processed(&self) -> usize {
        self.imported + self.updated + self.skipped + self.failed
    }

    fn record_failure(&mut self, failure: RecordFailure) {
        tracing::warn!(
            page = failure.page,
            index = failure.index,
            natural_key = failure.natural_key.as_deref().unwrap_or("-"),
            stage = ?failure.stage,
            error = %failure.error,
            "record skipped"
        );
        self.failed += 1;
        self.failures.push(failure);
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

enum PageFetch {
    Page(Page),
    Exhausted,
    Cancelled,
    Failed { error: FetchError, attempts: u32 },
}

pub struct Ingestor {
    source: Arc<dyn RemoteSource>,
    store: Arc<dyn CatalogStore>,
    config: IngestConfig,
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        store: Arc<dyn CatalogStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    /// Ingest one collection. Cancellation is honoured between pages and
    /// during retry backoff; everything committed before that stays.
    pub async fn run(
        &self,
        kind: EntityKind,
        cancel: &CancellationToken,
    ) -> Result<IngestionSummary, IngestError> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("ingest", kind = %kind, run_id = %run_id);
        self.drive(kind, run_id, cancel).instrument(span).await
    }

    /// Ingest all three collections concurrently.
    pub async fn run_all(
        &self,
        cancel: &CancellationToken,
    ) -> Vec<(EntityKind, Result<IngestionSummary, IngestError>)> {
        let (characters, films, starships) = tokio::join!(
            self.run(EntityKind::Character, cancel),
            self.run(EntityKind::Film, cancel),
            self.run(EntityKind::Starship, cancel),
        );
        vec![
            (EntityKind::Character, characters),
            (EntityKind::Film, films),
            (EntityKind::Starship, starships),
        ]
    }

    /// A page that fails for good ends the run as partial rather than being
    /// skipped: cursors are opaque, so there is no way to reach the page after it.
    async fn drive(
        &self,
        kind: EntityKind,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<IngestionSummary, IngestError> {
        let mut summary = IngestionSummary::new(kind, run_id);
        let mut stream = PageStream::new(self.source.as_ref(), kind);
        let resolver = Resolver::new(self.store.as_ref(), self.config.max_resolution_passes);
        tracing::info!("ingestion started");

        loop {
            tracing::debug!(stage = ?Stage::Fetching, page = summary.pages + 1);
            match self.fetch_with_retry(&mut stream, cancel).await {
                PageFetch::Page(page) => {
                    summary.pages += 1;
                    let page_no = summary.pages;
                    for (index, raw) in page.records.iter().enumerate() {
                        self.ingest_record(kind, &resolver, page_no, index, raw, &mut summary)
                            .await;
                    }
                    tracing::debug!(
                        page = page_no,
                        records = page.records.len(),
                        processed = summary.processed(),
                        "page done"
                    );
                }
                PageFetch::Exhausted => break,
                PageFetch::Cancelled => {
                    summary.cancelled = true;
                    summary.partial = true;
                    break;
                }
                PageFetch::Failed { error, attempts } => {
                    if summary.pages == 0 && error.is_retryable() {
                        tracing::error!(attempts, error = %error, "remote source unavailable");
                        return Err(IngestError::SourceUnavailable {
                            kind,
                            attempts,
                            source: error,
                        });
                    }
                    tracing::warn!(
                        attempts,
                        error = %error,
                        pages = summary.pages,
                        "page fetch failed, ending run early"
                    );
                    summary.partial = true;
                    summary.error = Some(error.to_string());
                    break;
                }
            }

            if stream.is_exhausted() {
                break;
            }
            if cancel.is_cancelled() {
                tracing::info!(pages = summary.pages, "ingestion cancelled between pages");
                summary.cancelled = true;
                summary.partial = true;
                break;
            }
        }

        tracing::debug!(stage = ?Stage::Summarizing);
        summary.finished_at = Some(Utc::now());
        tracing::info!(
            pages = summary.pages,
            imported = summary.imported,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            unresolved = summary.unresolved_references.len(),
            partial = summary.partial,
            "ingestion finished"
        );
        Ok(summary)
    }

    async fn fetch_with_retry(
        &self,
        stream: &mut PageStream<'_>,
        cancel: &CancellationToken,
    ) -> PageFetch {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match stream.next_page().await {
                Ok(Some(page)) => return PageFetch::Page(page),
                Ok(None) => return PageFetch::Exhausted,
                Err(error) if error.is_retryable() && attempt < max_attempts => {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient fetch failure, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return PageFetch::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(error) => {
                    return PageFetch::Failed {
                        error,
                        attempts: attempt,
                    }
                }
            }
        }
    }

    async fn ingest_record(
        &self,
        kind: EntityKind,
        resolver: &Resolver<'_>,
        page: usize,
        index: usize,
        raw: &Value,
        summary: &mut IngestionSummary,
    ) {
        let failure = |natural_key: Option<String>, stage: Stage, error: String| RecordFailure {
            page,
            index,
            natural_key,
            stage,
            error,
        };

        tracing::trace!(stage = ?Stage::Mapping, page, index);
        let mapped = match map_record(kind, raw) {
            Ok(mapped) => mapped,
            Err(err) => {
                let key = raw.get("url").and_then(Value::as_str).map(str::to_string);
                summary.record_failure(failure(key, Stage::Mapping, err.to_string()));
                return;
            }
        };
        let draft = mapped.draft;
        let key = draft.natural_key.clone();
        for broken in &mapped.broken {
            tracing::warn!(
                natural_key = %key,
                field = broken.field,
                locator = %broken.locator,
                reason = %broken.reason,
                "broken reference locator"
            );
            summary
                .unresolved_references
                .push(UnresolvedReferenceWarning::broken(kind, &key, broken));
        }

        tracing::trace!(stage = ?Stage::Resolving, natural_key = %key);
        let previous = match self.store.find_by_natural_key(kind, &key).await {
            Ok(previous) => previous,
            Err(err) => {
                summary.record_failure(failure(Some(key.to_string()), Stage::Resolving, err.to_string()));
                return;
            }
        };
        let resolution = resolver.resolve(&draft, previous.as_ref()).await;
        summary.unresolved_references.extend(resolution.warnings);

        tracing::trace!(stage = ?Stage::Upserting, natural_key = %key);
        let write = EntityWrite {
            natural_key: draft.natural_key,
            attributes: draft.attributes,
            references: resolution.references,
        };
        match self.store.upsert(write).await {
            Ok(outcome) => match outcome.status {
                UpsertStatus::Inserted => summary.imported += 1,
                UpsertStatus::Updated => summary.updated += 1,
                UpsertStatus::Unchanged => summary.skipped += 1,
            },
            Err(err) => {
                summary.record_failure(failure(Some(key.to_string()), Stage::Upserting, err.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
        assert_eq!(policy.backoff(60), Duration::from_secs(10));
    }

    #[test]
    fn config_fills_defaults_from_partial_json() {
        let config: IngestConfig =
            serde_json::from_str(r#"{ "retry": { "max_attempts": 5 } }"#).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 2_000);
        assert_eq!(config.max_resolution_passes, 3);
    }
}
