//! Remote catalog access
//!
//! [`RemoteSource`] yields one page of raw JSON records at a time. The live
//! implementation talks to a SWAPI mirror; [`FixtureSource`] serves canned
//! pages for tests and offline dumps.

use async_trait::async_trait;
use holocron_model::EntityKind;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::IngestError;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Network trouble, timeouts, throttling, 5xx. Worth retrying.
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// The source answered, but not with something we can read.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    fn from_status(status: StatusCode, url: &Url) -> Self {
        let message = format!("{url} answered {status}");
        if status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
            || status.is_server_error()
        {
            Self::Transient(message)
        } else {
            Self::Malformed(message)
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed(err.to_string())
        } else {
            Self::Transient(err.to_string())
        }
    }
}

// ============================================================================
// Pages
// ============================================================================

/// Opaque position of the next page (a URL for the live source).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Value>,
    pub next: Option<PageCursor>,
}

#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the page at `cursor`, or the first page when `cursor` is `None`.
    async fn fetch_page(
        &self,
        kind: EntityKind,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, FetchError>;
}

/// Lazy, restartable walk over one collection.
///
/// A failed fetch leaves the cursor where it was, so calling
/// [`next_page`](Self::next_page) again retries the same page.
pub struct PageStream<'a> {
    source: &'a dyn RemoteSource,
    kind: EntityKind,
    cursor: Option<PageCursor>,
    /// Cursors already served; a `next` link back into this set is a cycle.
    visited: HashSet<PageCursor>,
    exhausted: bool,
}

impl<'a> PageStream<'a> {
    pub fn new(source: &'a dyn RemoteSource, kind: EntityKind) -> Self {
        Self {
            source,
            kind,
            cursor: None,
            visited: HashSet::new(),
            exhausted: false,
        }
    }

    pub async fn next_page(&mut self) -> Result<Option<Page>, FetchError> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self.source.fetch_page(self.kind, self.cursor.as_ref()).await?;
        if let Some(current) = &self.cursor {
            self.visited.insert(current.clone());
        }
        if let Some(next) = page.next.as_ref().filter(|next| self.visited.contains(*next)) {
            return Err(FetchError::Malformed(format!(
                "pagination cycle: {} was already visited",
                next.as_str()
            )));
        }
        self.exhausted = page.next.is_none();
        self.cursor = page.next.clone();
        Ok(Some(page))
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn restart(&mut self) {
        self.cursor = None;
        self.visited.clear();
        self.exhausted = false;
    }
}

// ============================================================================
// SWAPI client
// ============================================================================

pub const DEFAULT_BASE_URL: &str = "https://swapi.info/api";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
        }
    }
}

/// reqwest client for a SWAPI mirror.
///
/// The first page of a collection is `{base}/{collection}/`. Mirrors answer
/// either with a bare JSON array (everything in one page) or with
/// `{ count, next, previous, results }`, in which case `next` is followed.
pub struct SwapiClient {
    client: Client,
    base_url: Url,
}

impl SwapiClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, IngestError> {
        let mut raw = config.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw)
            .map_err(|e| IngestError::Config(format!("invalid base url `{}`: {e}", config.base_url)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("holocron/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn first_page(&self, kind: EntityKind) -> Result<Url, FetchError> {
        self.base_url
            .join(&format!("{}/", kind.collection()))
            .map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl RemoteSource for SwapiClient {
    async fn fetch_page(
        &self,
        kind: EntityKind,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, FetchError> {
        let url = match cursor {
            Some(cursor) => Url::parse(cursor.as_str())
                .map_err(|e| FetchError::Malformed(format!("bad cursor `{}`: {e}", cursor.as_str())))?,
            None => self.first_page(kind)?,
        };

        tracing::debug!(kind = %kind, url = %url, "fetching page");
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status, &url));
        }
        let body: Value = response.json().await?;
        parse_page(body, &url)
    }
}

/// Accept either payload shape served by SWAPI mirrors.
pub fn parse_page(body: Value, current: &Url) -> Result<Page, FetchError> {
    match body {
        Value::Array(records) => Ok(Page {
            records,
            next: None,
        }),
        Value::Object(mut map) => {
            let records = match map.remove("results") {
                Some(Value::Array(records)) => records,
                Some(_) => {
                    return Err(FetchError::Malformed(format!(
                        "{current}: `results` is not an array"
                    )))
                }
                None => {
                    return Err(FetchError::Malformed(format!(
                        "{current}: object payload without `results`"
                    )))
                }
            };
            let next = match map.get("next") {
                Some(Value::String(link)) if !link.trim().is_empty() => {
                    let next = current
                        .join(link.trim())
                        .map_err(|e| FetchError::Malformed(format!("bad next link `{link}`: {e}")))?;
                    Some(PageCursor::new(next.as_str()))
                }
                None | Some(Value::Null) | Some(Value::String(_)) => None,
                Some(other) => {
                    return Err(FetchError::Malformed(format!(
                        "{current}: `next` is {other}, expected a link"
                    )))
                }
            };
            Ok(Page { records, next })
        }
        other => Err(FetchError::Malformed(format!(
            "{current}: expected an array or a results object, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Fixture source
// ============================================================================

/// Canned pages, with optional scripted failures.
#[derive(Default)]
pub struct FixtureSource {
    pages: HashMap<EntityKind, Vec<Vec<Value>>>,
    failures: Mutex<HashMap<(EntityKind, usize), VecDeque<FetchError>>>,
    fetches: AtomicUsize,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(mut self, kind: EntityKind, pages: Vec<Vec<Value>>) -> Self {
        self.pages.insert(kind, pages);
        self
    }

    pub fn with_records(self, kind: EntityKind, records: Vec<Value>) -> Self {
        self.with_pages(kind, vec![records])
    }

    /// Make the next fetch of `page` (0-based) fail with `error`. Repeated
    /// calls queue further failures for the same page.
    pub fn fail_page(self, kind: EntityKind, page: usize, error: FetchError) -> Self {
        self.failures
            .lock()
            .entry((kind, page))
            .or_default()
            .push_back(error);
        self
    }

    /// Load `people.json`, `films.json` and `starships.json` from `dir`.
    /// Each file holds either a bare array or a `{ "results": [...] }` page.
    /// Missing files leave that collection empty.
    pub fn from_dir(dir: &Path) -> Result<Self, IngestError> {
        let mut source = Self::new();
        for kind in EntityKind::ALL {
            let path = dir.join(format!("{}.json", kind.collection()));
            if !path.exists() {
                tracing::warn!(path = %path.display(), "fixture file missing, collection left empty");
                continue;
            }
            let text = std::fs::read_to_string(&path)
                .map_err(|e| IngestError::Config(format!("reading {}: {e}", path.display())))?;
            let value: Value = serde_json::from_str(&text)
                .map_err(|e| IngestError::Config(format!("parsing {}: {e}", path.display())))?;
            let base = Url::parse("file:///fixtures/").map_err(|e| IngestError::Config(e.to_string()))?;
            let page = parse_page(value, &base)
                .map_err(|e| IngestError::Config(format!("{}: {e}", path.display())))?;
            source.pages.insert(kind, vec![page.records]);
        }
        Ok(source)
    }

    /// Total `fetch_page` calls served, failures included.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    fn cursor(kind: EntityKind, index: usize) -> PageCursor {
        PageCursor::new(format!("fixture:{}/{index}", kind.collection()))
    }

    fn page_index(kind: EntityKind, cursor: Option<&PageCursor>) -> Result<usize, FetchError> {
        let Some(cursor) = cursor else {
            return Ok(0);
        };
        cursor
            .as_str()
            .strip_prefix(&format!("fixture:{}/", kind.collection()))
            .and_then(|index| index.parse().ok())
            .ok_or_else(|| FetchError::Malformed(format!("unknown cursor `{}`", cursor.as_str())))
    }
}

#[async_trait]
impl RemoteSource for FixtureSource {
    async fn fetch_page(
        &self,
        kind: EntityKind,
        cursor: Option<&PageCursor>,
    ) -> Result<Page, FetchError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        let index = Self::page_index(kind, cursor)?;

        if let Some(error) = self
            .failures
            .lock()
            .get_mut(&(kind, index))
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }

        let pages = self.pages.get(&kind).map(Vec::as_slice).unwrap_or_default();
        let records = pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < pages.len()).then(|| Self::cursor(kind, index + 1));
        Ok(Page { records, next })
    }
}
