//! Durability for the catalog store
//!
//! Two files live under the store directory:
//! 1. `catalog.wal`: write-ahead log, one length-prefixed bincode record per
//!    committed upsert or vote increment
//! 2. `catalog.snapshot`: full image of every row, written by a checkpoint
//!
//! Startup loads the snapshot (if any) and replays the log on top of it. A
//! checkpoint rewrites the snapshot and truncates the log.

use holocron_model::{Attributes, Entity, EntityId, EntityKind, NaturalKey, Reference};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::{StoreError, StoreResult};

pub const WAL_FILE: &str = "catalog.wal";
pub const SNAPSHOT_FILE: &str = "catalog.snapshot";
const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// Write-Ahead Log
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    Upsert {
        id: EntityId,
        kind: EntityKind,
        natural_key: NaturalKey,
        attributes: Attributes,
        references: Vec<Reference>,
    },
    Vote {
        kind: EntityKind,
        id: EntityId,
    },
}

/// Append-only log of committed writes.
pub struct WriteAheadLog {
    file: Mutex<File>,
    path: PathBuf,
    sync: bool,
}

impl WriteAheadLog {
    pub fn open(path: &Path, sync: bool) -> std::io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            sync,
        })
    }

    /// Append entry to WAL
    ///
    /// A write that fails partway is cut back off, so the log never holds a
    /// half record in front of later ones.
    pub fn append(&self, entry: &WalEntry) -> StoreResult<u64> {
        let data = bincode::serialize(entry).map_err(|e| StoreError::Codec(e.to_string()))?;
        let len = u32::try_from(data.len())
            .map_err(|_| StoreError::Persistence("wal record exceeds 4 GiB".to_string()))?;
        let mut frame = Vec::with_capacity(data.len() + 4);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&data);

        let mut file = self.file.lock();
        let start = file.metadata()?.len();
        if let Err(e) = write_frame(&mut file, &frame, self.sync) {
            if let Err(cut) = file.set_len(start) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %cut,
                    "failed to cut a partial write-ahead log record"
                );
            }
            return Err(e.into());
        }

        Ok(frame.len() as u64)
    }

    /// Replay WAL for recovery.
    ///
    /// A torn record at the tail (crash mid-append) ends the replay and is cut
    /// off the file; everything before it is applied.
    pub fn replay<F: FnMut(WalEntry) -> StoreResult<()>>(&self, mut handler: F) -> StoreResult<usize> {
        let mut file = self.file.lock();
        let end = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;

        let mut applied = 0;
        let mut offset = 0u64;
        loop {
            let mut len_bytes = [0u8; 4];
            match file.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match file.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let entry: WalEntry =
                bincode::deserialize(&data).map_err(|e| StoreError::Codec(e.to_string()))?;
            handler(entry)?;
            applied += 1;
            offset += 4 + len as u64;
        }

        if offset < end {
            tracing::warn!(
                path = %self.path.display(),
                applied,
                dropped_bytes = end - offset,
                "cutting torn record off the end of the write-ahead log"
            );
            file.set_len(offset)?;
            if self.sync {
                file.sync_all()?;
            }
        }

        Ok(applied)
    }

    /// Truncate WAL after checkpoint
    pub fn truncate(&self) -> StoreResult<()> {
        let mut file = self.file.lock();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        if self.sync {
            file.sync_all()?;
        }
        Ok(())
    }
}

fn write_frame(file: &mut File, frame: &[u8], sync: bool) -> std::io::Result<()> {
    file.write_all(frame)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub next_id: u64,
    pub rows: Vec<Entity>,
}

impl Snapshot {
    pub fn new(next_id: u64, rows: Vec<Entity>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            next_id,
            rows,
        }
    }

    pub fn load(path: &Path) -> StoreResult<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Snapshot =
            bincode::deserialize(&bytes).map_err(|e| StoreError::Codec(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StoreError::Codec(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    /// Write to `path` via a temp file + rename so a crash never leaves a
    /// half-written snapshot behind.
    pub fn write(&self, path: &Path) -> StoreResult<()> {
        let bytes = bincode::serialize(self).map_err(|e| StoreError::Codec(e.to_string()))?;
        let tmp = path.with_extension("snapshot.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
