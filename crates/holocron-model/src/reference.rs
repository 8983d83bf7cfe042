//! Cross-collection references.
//!
//! The remote source expresses relationships as locators
//! (`https://swapi.info/api/starships/10/`). A locator names the target
//! collection and the target's natural key, which is all we need to link rows
//! that may not exist yet.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

use crate::{EntityId, EntityKind, ModelError, NaturalKey};

/// An unresolved pointer at another collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceToken {
    pub kind: EntityKind,
    pub natural_key: NaturalKey,
}

impl ReferenceToken {
    pub fn new(kind: EntityKind, natural_key: impl Into<NaturalKey>) -> Self {
        Self {
            kind,
            natural_key: natural_key.into(),
        }
    }

    /// Parse a remote locator of the form `.../<collection>/<numeric id>/`.
    ///
    /// Absolute URLs and bare paths (`/api/films/1/`) are both accepted.
    pub fn from_locator(locator: &str) -> Result<Self, ModelError> {
        let (kind, key) = parse_locator(locator)?;
        Ok(Self {
            kind,
            natural_key: key,
        })
    }
}

impl fmt::Display for ReferenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.natural_key)
    }
}

/// Extract `(kind, natural key)` from a locator.
pub fn parse_locator(locator: &str) -> Result<(EntityKind, NaturalKey), ModelError> {
    let invalid = || ModelError::InvalidLocator(locator.to_string());

    let trimmed = locator.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }
    let url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(_) => Url::parse("http://localhost/")
            .and_then(|base| base.join(trimmed))
            .map_err(|_| invalid())?,
    };

    let segments: Vec<&str> = url
        .path_segments()
        .ok_or_else(invalid)?
        .filter(|s| !s.is_empty())
        .collect();
    let [.., collection, id] = segments.as_slice() else {
        return Err(invalid());
    };
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let kind = EntityKind::from_collection(collection).ok_or_else(invalid)?;
    Ok((kind, NaturalKey::new(*id)))
}

/// Resolution state of one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceState {
    /// Target exists; its surrogate id.
    Resolved(EntityId),
    /// Target not ingested yet; `passes` ingestion runs have looked for it.
    Pending { passes: u32 },
    /// Still missing after the configured number of passes. Kept so that a late
    /// arrival of the target can still resolve it.
    Unresolved { passes: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub target: ReferenceToken,
    pub state: ReferenceState,
}

impl Reference {
    pub fn resolved(target: ReferenceToken, id: EntityId) -> Self {
        Self {
            target,
            state: ReferenceState::Resolved(id),
        }
    }

    pub fn pending(target: ReferenceToken, passes: u32) -> Self {
        Self {
            target,
            state: ReferenceState::Pending { passes },
        }
    }

    pub fn resolved_id(&self) -> Option<EntityId> {
        match self.state {
            ReferenceState::Resolved(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, ReferenceState::Resolved(_))
    }

    /// Number of ingestion passes that failed to find the target.
    pub fn passes(&self) -> u32 {
        match self.state {
            ReferenceState::Resolved(_) => 0,
            ReferenceState::Pending { passes } | ReferenceState::Unresolved { passes } => passes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_locator() {
        let token = ReferenceToken::from_locator("https://swapi.info/api/starships/10/").unwrap();
        assert_eq!(token.kind, EntityKind::Starship);
        assert_eq!(token.natural_key.as_str(), "10");
    }

    #[test]
    fn parses_locator_without_trailing_slash_and_relative_path() {
        let token = ReferenceToken::from_locator("https://swapi.dev/api/people/1").unwrap();
        assert_eq!(token, ReferenceToken::new(EntityKind::Character, "1"));

        let token = ReferenceToken::from_locator("/api/films/4/").unwrap();
        assert_eq!(token, ReferenceToken::new(EntityKind::Film, "4"));
    }

    #[test]
    fn rejects_broken_locators() {
        for bad in [
            "",
            "https://swapi.info/api/planets/1/",
            "https://swapi.info/api/films/",
            "https://swapi.info/api/films/abc/",
            "not a url at all",
        ] {
            assert!(
                matches!(ReferenceToken::from_locator(bad), Err(ModelError::InvalidLocator(_))),
                "expected {bad:?} to be rejected"
            );
        }
    }

    #[test]
    fn passes_reported_for_unresolved_states() {
        let token = ReferenceToken::new(EntityKind::Film, "1");
        assert_eq!(Reference::pending(token.clone(), 2).passes(), 2);
        assert_eq!(Reference::resolved(token, EntityId::new(7)).resolved_id(), Some(EntityId::new(7)));
    }
}
