//! The operations the CLI and the HTTP surface share.

use holocron_ingest::{IngestConfig, IngestError, IngestionSummary, Ingestor, RemoteSource};
use holocron_model::{Entity, EntityId, EntityKind, RankedEntry};
use holocron_storage::{CatalogStore, StoreResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    ingestor: Ingestor,
    shutdown: CancellationToken,
}

impl CatalogService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        source: Arc<dyn RemoteSource>,
        config: IngestConfig,
    ) -> Self {
        let ingestor = Ingestor::new(source, Arc::clone(&store), config);
        Self {
            store,
            ingestor,
            shutdown: CancellationToken::new(),
        }
    }

    pub async fn ingest(&self, kind: EntityKind) -> Result<IngestionSummary, IngestError> {
        self.ingestor.run(kind, &self.shutdown.child_token()).await
    }

    pub async fn ingest_all(&self) -> Vec<(EntityKind, Result<IngestionSummary, IngestError>)> {
        self.ingestor.run_all(&self.shutdown.child_token()).await
    }

    pub async fn cast_vote(&self, kind: EntityKind, id: EntityId) -> StoreResult<u64> {
        let votes = self.store.increment_votes(kind, id).await?;
        tracing::debug!(kind = %kind, id = %id, votes, "vote cast");
        Ok(votes)
    }

    pub async fn top_ranked(&self, kind: Option<EntityKind>, n: i64) -> StoreResult<Vec<RankedEntry>> {
        self.store.top(kind, n).await
    }

    pub async fn search(&self, kind: EntityKind, query: &str) -> StoreResult<Vec<Entity>> {
        self.store.search(kind, query).await
    }

    pub async fn list(&self, kind: EntityKind) -> StoreResult<Vec<Entity>> {
        self.store.list(kind).await
    }

    pub async fn get(&self, kind: EntityKind, id: EntityId) -> StoreResult<Entity> {
        self.store.get(kind, id).await
    }

    pub async fn checkpoint(&self) -> StoreResult<()> {
        self.store.checkpoint().await
    }

    /// Cancel in-flight ingestion runs at their next page boundary.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
