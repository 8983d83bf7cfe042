//! Arena-backed catalog store.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use holocron_model::{
    Attributes, Entity, EntityId, EntityKind, NaturalKey, RankedEntry, Reference,
    ReferenceState, ReferenceToken,
};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::persistence::{Snapshot, WalEntry, WriteAheadLog, SNAPSHOT_FILE, WAL_FILE};
use crate::{
    CatalogStore, EntityWrite, StoreConfig, StoreError, StoreResult, UpsertOutcome, UpsertStatus,
};

// ============================================================================
// Rows
// ============================================================================

struct Row {
    kind: EntityKind,
    natural_key: NaturalKey,
    attributes: Attributes,
    references: Vec<Reference>,
    votes: AtomicU64,
}

impl Row {
    fn to_entity(&self, id: EntityId) -> Entity {
        Entity {
            id,
            kind: self.kind,
            natural_key: self.natural_key.clone(),
            attributes: self.attributes.clone(),
            references: self.references.clone(),
            vote_count: self.votes.load(Ordering::Acquire),
        }
    }

    fn pending_targets(&self) -> Vec<ReferenceToken> {
        self.references
            .iter()
            .filter(|r| !r.is_resolved())
            .map(|r| r.target.clone())
            .collect()
    }
}

struct Durability {
    dir: PathBuf,
    wal: WriteAheadLog,
}

// ============================================================================
// MemoryStore
// ============================================================================

/// The catalog store. In-memory by default; [`MemoryStore::open`] adds a
/// write-ahead log and snapshots under a directory.
///
/// Lock order is `gate → keys → rows → wal`. No code path acquires `keys`
/// while holding a `rows` guard, and at most one row guard is held at a time.
pub struct MemoryStore {
    rows: DashMap<EntityId, Row>,
    keys: DashMap<(EntityKind, NaturalKey), EntityId>,
    waiting: DashMap<ReferenceToken, BTreeSet<EntityId>>,
    next_id: AtomicU64,
    /// Mutations share it; checkpoint takes it exclusively.
    gate: RwLock<()>,
    durability: Option<Durability>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            keys: DashMap::new(),
            waiting: DashMap::new(),
            next_id: AtomicU64::new(1),
            gate: RwLock::new(()),
            durability: None,
        }
    }

    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        match &config.data_dir {
            Some(dir) => Self::open(dir, config.sync_writes),
            None => Ok(Self::new()),
        }
    }

    /// Open (or create) a durable store under `dir`: load the snapshot, then
    /// replay the write-ahead log on top of it.
    pub fn open(dir: &Path, sync_writes: bool) -> StoreResult<Self> {
        std::fs::create_dir_all(dir)?;
        let mut store = Self::new();

        if let Some(snapshot) = Snapshot::load(&dir.join(SNAPSHOT_FILE))? {
            store.restore(snapshot)?;
        }

        let wal = WriteAheadLog::open(&dir.join(WAL_FILE), sync_writes)?;
        let replayed = wal.replay(|entry| store.replay_entry(entry))?;

        tracing::info!(
            dir = %dir.display(),
            rows = store.rows.len(),
            replayed,
            "opened catalog store"
        );

        store.durability = Some(Durability {
            dir: dir.to_path_buf(),
            wal,
        });
        Ok(store)
    }

    pub fn is_durable(&self) -> bool {
        self.durability.is_some()
    }

    fn restore(&self, snapshot: Snapshot) -> StoreResult<()> {
        for entity in snapshot.rows {
            let id = entity.id;
            let row = Row {
                kind: entity.kind,
                natural_key: entity.natural_key.clone(),
                attributes: entity.attributes,
                references: entity.references,
                votes: AtomicU64::new(entity.vote_count),
            };
            for target in row.pending_targets() {
                self.waiting.entry(target).or_default().insert(id);
            }
            if self.keys.insert((entity.kind, entity.natural_key), id).is_some() {
                return Err(StoreError::Codec(format!(
                    "snapshot holds two {} rows with one natural key",
                    entity.kind
                )));
            }
            self.rows.insert(id, row);
        }
        self.next_id.fetch_max(snapshot.next_id, Ordering::AcqRel);
        Ok(())
    }

    fn replay_entry(&self, entry: WalEntry) -> StoreResult<()> {
        match entry {
            WalEntry::Upsert {
                id,
                kind,
                natural_key,
                attributes,
                references,
            } => {
                if attributes.kind() != kind {
                    return Err(StoreError::Codec(format!(
                        "wal record for {kind} {id} carries {} attributes",
                        attributes.kind()
                    )));
                }
                let write = EntityWrite {
                    natural_key,
                    attributes,
                    references,
                };
                self.apply_upsert(write, Some(id))?;
            }
            WalEntry::Vote { kind, id } => match self.rows.get(&id) {
                Some(row) if row.kind == kind => {
                    row.votes.fetch_add(1, Ordering::AcqRel);
                }
                _ => tracing::warn!(kind = %kind, id = %id, "dropping vote for unknown row"),
            },
        }
        Ok(())
    }

    fn log(&self, entry: &WalEntry) -> StoreResult<()> {
        if let Some(durability) = &self.durability {
            durability.wal.append(entry)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Upsert
    // ------------------------------------------------------------------------

    /// `forced_id` is only set during replay, where ids come from the log.
    fn apply_upsert(&self, write: EntityWrite, forced_id: Option<EntityId>) -> StoreResult<UpsertOutcome> {
        let kind = write.kind();
        if write.natural_key.as_str().is_empty() {
            return Err(StoreError::Persistence(format!(
                "{kind} record has an empty natural key"
            )));
        }
        if let Some(bad) = write.references.iter().find(|r| r.target.natural_key.as_str().is_empty()) {
            return Err(StoreError::Persistence(format!(
                "{kind} {} references a {} with an empty natural key",
                write.natural_key, bad.target.kind
            )));
        }

        let token = ReferenceToken::new(kind, write.natural_key.clone());
        let logging = forced_id.is_none();
        let EntityWrite {
            natural_key,
            attributes,
            references,
        } = write;

        let (id, status, pending) = match self.keys.entry((kind, natural_key.clone())) {
            Entry::Occupied(slot) => {
                let id = *slot.get();
                let mut row = self.rows.get_mut(&id).ok_or_else(|| {
                    StoreError::Persistence(format!("index points {kind} {natural_key} at missing row {id}"))
                })?;
                if row.attributes == attributes && row.references == references {
                    (id, UpsertStatus::Unchanged, Vec::new())
                } else {
                    if logging {
                        self.log(&WalEntry::Upsert {
                            id,
                            kind,
                            natural_key: natural_key.clone(),
                            attributes: attributes.clone(),
                            references: references.clone(),
                        })?;
                    }
                    row.attributes = attributes;
                    row.references = references;
                    (id, UpsertStatus::Updated, row.pending_targets())
                }
            }
            Entry::Vacant(slot) => {
                let id = match forced_id {
                    Some(id) => {
                        self.next_id.fetch_max(id.raw() + 1, Ordering::AcqRel);
                        id
                    }
                    None => EntityId::new(self.next_id.fetch_add(1, Ordering::AcqRel)),
                };
                if logging {
                    self.log(&WalEntry::Upsert {
                        id,
                        kind,
                        natural_key: natural_key.clone(),
                        attributes: attributes.clone(),
                        references: references.clone(),
                    })?;
                }
                let row = Row {
                    kind,
                    natural_key,
                    attributes,
                    references,
                    votes: AtomicU64::new(0),
                };
                let pending = row.pending_targets();
                self.rows.insert(id, row);
                slot.insert(id);
                (id, UpsertStatus::Inserted, pending)
            }
        };

        // Our own pending references: register, then re-check the index so a
        // target inserted concurrently is never missed.
        for target in &pending {
            self.waiting.entry(target.clone()).or_default().insert(id);
        }
        for target in &pending {
            if let Some(target_id) = self.lookup(target) {
                self.settle(id, target, target_id);
            }
        }

        // References elsewhere that were waiting for us.
        let mut backfilled = 0;
        if status == UpsertStatus::Inserted {
            if let Some((_, referrers)) = self.waiting.remove(&token) {
                for referrer in referrers {
                    if self.settle(referrer, &token, id) {
                        backfilled += 1;
                    }
                }
            }
        }
        if backfilled > 0 {
            tracing::debug!(kind = %kind, id = %id, backfilled, "backfilled pending references");
        }

        Ok(UpsertOutcome {
            id,
            status,
            backfilled,
        })
    }

    fn lookup(&self, token: &ReferenceToken) -> Option<EntityId> {
        self.keys
            .get(&(token.kind, token.natural_key.clone()))
            .map(|id| *id)
    }

    /// Point every unresolved reference of `referrer` at `target` to
    /// `target_id`. Returns whether anything changed.
    fn settle(&self, referrer: EntityId, target: &ReferenceToken, target_id: EntityId) -> bool {
        let Some(mut row) = self.rows.get_mut(&referrer) else {
            return false;
        };
        let mut changed = false;
        for reference in row.references.iter_mut().filter(|r| &r.target == target) {
            if !reference.is_resolved() {
                reference.state = ReferenceState::Resolved(target_id);
                changed = true;
            }
        }
        changed
    }

    /// Resolve whatever pending references of `id` can be resolved now.
    fn resolve_lazily(&self, id: EntityId, pending: Vec<ReferenceToken>) {
        for target in pending {
            if let Some(target_id) = self.lookup(&target) {
                self.settle(id, &target, target_id);
            }
        }
    }

    fn snapshot_row(&self, kind: EntityKind, id: EntityId) -> Option<(Entity, Vec<ReferenceToken>)> {
        let row = self.rows.get(&id)?;
        if row.kind != kind {
            return None;
        }
        Some((row.to_entity(id), row.pending_targets()))
    }

    fn sorted_by_name(mut entities: Vec<Entity>) -> Vec<Entity> {
        entities.sort_by(|a, b| {
            a.display_name()
                .cmp(b.display_name())
                .then_with(|| a.id.cmp(&b.id))
        });
        entities
    }

    fn collect_kind(&self, kind: EntityKind, keep: impl Fn(&Row) -> bool) -> Vec<Entity> {
        self.rows
            .iter()
            .filter(|entry| entry.kind == kind && keep(entry.value()))
            .map(|entry| entry.to_entity(*entry.key()))
            .collect()
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn find_by_natural_key(
        &self,
        kind: EntityKind,
        key: &NaturalKey,
    ) -> StoreResult<Option<Entity>> {
        let Some(id) = self.lookup(&ReferenceToken::new(kind, key.clone())) else {
            return Ok(None);
        };
        Ok(self.rows.get(&id).map(|row| row.to_entity(id)))
    }

    async fn resolve_natural_key(&self, kind: EntityKind, key: &NaturalKey) -> Option<EntityId> {
        self.lookup(&ReferenceToken::new(kind, key.clone()))
    }

    async fn upsert(&self, write: EntityWrite) -> StoreResult<UpsertOutcome> {
        let _gate = self.gate.read();
        self.apply_upsert(write, None)
    }

    async fn get(&self, kind: EntityKind, id: EntityId) -> StoreResult<Entity> {
        let (entity, pending) = self
            .snapshot_row(kind, id)
            .ok_or(StoreError::NotFound { kind, id })?;
        if pending.is_empty() {
            return Ok(entity);
        }

        {
            let _gate = self.gate.read();
            self.resolve_lazily(id, pending);
        }
        self.snapshot_row(kind, id)
            .map(|(entity, _)| entity)
            .ok_or(StoreError::NotFound { kind, id })
    }

    async fn list(&self, kind: EntityKind) -> StoreResult<Vec<Entity>> {
        Ok(Self::sorted_by_name(self.collect_kind(kind, |_| true)))
    }

    async fn search(&self, kind: EntityKind, query: &str) -> StoreResult<Vec<Entity>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let hits = self.collect_kind(kind, |row| {
            row.attributes.display_name().to_lowercase().contains(&needle)
        });
        Ok(Self::sorted_by_name(hits))
    }

    async fn count(&self, kind: Option<EntityKind>) -> usize {
        match kind {
            Some(kind) => self.rows.iter().filter(|entry| entry.kind == kind).count(),
            None => self.rows.len(),
        }
    }

    async fn increment_votes(&self, kind: EntityKind, id: EntityId) -> StoreResult<u64> {
        let _gate = self.gate.read();
        let row = self
            .rows
            .get(&id)
            .filter(|row| row.kind == kind)
            .ok_or(StoreError::NotFound { kind, id })?;
        self.log(&WalEntry::Vote { kind, id })?;
        Ok(row.votes.fetch_add(1, Ordering::AcqRel) + 1)
    }

    async fn top(&self, kind: Option<EntityKind>, n: i64) -> StoreResult<Vec<RankedEntry>> {
        if n <= 0 {
            return Ok(Vec::new());
        }
        let limit = usize::try_from(n).unwrap_or(usize::MAX);

        let mut ranked: Vec<RankedEntry> = self
            .rows
            .iter()
            .filter(|entry| kind.map_or(true, |k| entry.kind == k))
            .map(|entry| RankedEntry {
                kind: entry.kind,
                id: *entry.key(),
                name: entry.attributes.display_name().to_string(),
                vote_count: entry.votes.load(Ordering::Acquire),
            })
            .collect();
        ranked.sort_by_key(|e| (Reverse(e.vote_count), e.id));
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn checkpoint(&self) -> StoreResult<()> {
        let Some(durability) = &self.durability else {
            return Ok(());
        };
        let _gate = self.gate.write();

        let mut rows: Vec<Entity> = self
            .rows
            .iter()
            .map(|entry| entry.to_entity(*entry.key()))
            .collect();
        rows.sort_by_key(|e| e.id);
        let count = rows.len();

        let snapshot = Snapshot::new(self.next_id.load(Ordering::Acquire), rows);
        snapshot.write(&durability.dir.join(SNAPSHOT_FILE))?;
        durability.wal.truncate()?;

        tracing::info!(dir = %durability.dir.display(), rows = count, "checkpoint written");
        Ok(())
    }
}
