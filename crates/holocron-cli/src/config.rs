//! Layered configuration: defaults → JSON file → environment → CLI flags.

use anyhow::{anyhow, Context, Result};
use holocron_ingest::{IngestConfig, RemoteConfig};
use holocron_storage::StoreConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8000";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HolocronConfig {
    pub remote: RemoteConfig,
    pub ingest: IngestConfig,
    pub store: StoreConfig,
    pub listen: SocketAddr,
}

impl Default for HolocronConfig {
    fn default() -> Self {
        Self {
            remote: RemoteConfig::default(),
            ingest: IngestConfig::default(),
            store: StoreConfig::default(),
            listen: SocketAddr::from(([127, 0, 0, 1], 8000)),
        }
    }
}

impl HolocronConfig {
    /// Defaults, overlaid with `path` (if given) and then the process
    /// environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply `HOLOCRON_*` variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("HOLOCRON_SWAPI_BASE_URL") {
            self.remote.base_url = url;
        }
        if let Some(dir) = lookup("HOLOCRON_DATA_DIR").filter(|d| !d.trim().is_empty()) {
            self.store.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(listen) = lookup("HOLOCRON_LISTEN") {
            self.listen = listen
                .parse()
                .map_err(|e| anyhow!("HOLOCRON_LISTEN={listen:?}: {e}"))?;
        }
        if let Some(attempts) = lookup("HOLOCRON_MAX_ATTEMPTS") {
            self.ingest.retry.max_attempts = attempts
                .parse()
                .map_err(|e| anyhow!("HOLOCRON_MAX_ATTEMPTS={attempts:?}: {e}"))?;
        }
        if let Some(passes) = lookup("HOLOCRON_MAX_PASSES") {
            self.ingest.max_resolution_passes = passes
                .parse()
                .map_err(|e| anyhow!("HOLOCRON_MAX_PASSES={passes:?}: {e}"))?;
        }
        Ok(())
    }
}
