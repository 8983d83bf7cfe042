//! Entity kinds and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ModelError;

/// The three mirrored collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Character,
    Film,
    Starship,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [Self::Character, Self::Film, Self::Starship];

    /// Singular, lowercase name used in votes and rankings (`character`).
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Film => "film",
            Self::Starship => "starship",
        }
    }

    /// Collection name on the remote source (`people`).
    pub const fn collection(self) -> &'static str {
        match self {
            Self::Character => "people",
            Self::Film => "films",
            Self::Starship => "starships",
        }
    }

    /// Plural route segment on the local HTTP surface (`characters`).
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Character => "characters",
            Self::Film => "films",
            Self::Starship => "starships",
        }
    }

    /// Map a remote collection segment back to a kind.
    pub fn from_collection(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.collection().eq_ignore_ascii_case(segment))
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "character" | "characters" | "people" | "person" => Ok(Self::Character),
            "film" | "films" => Ok(Self::Film),
            "starship" | "starships" => Ok(Self::Starship),
            other => Err(ModelError::UnknownKind(other.to_string())),
        }
    }
}

/// Surrogate identifier assigned by the store on first persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct EntityId(u64);

impl EntityId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier derived from the remote source, unique per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NaturalKey(String);

impl NaturalKey {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.trim().len() == raw.len() {
            Self(raw)
        } else {
            Self(raw.trim().to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NaturalKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
