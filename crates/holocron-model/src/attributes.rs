//! Typed attribute payloads, one per entity kind.
//!
//! Scalar fields are copied verbatim from the remote record. The remote source
//! serves most numeric-looking values as strings ("172", "unknown", "n/a"), so
//! they stay strings here; only `episode_id` is a real integer.

use serde::{Deserialize, Serialize};

use crate::EntityKind;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterAttributes {
    pub name: String,
    pub height: String,
    pub mass: String,
    pub hair_color: String,
    pub skin_color: String,
    pub eye_color: String,
    pub birth_year: String,
    pub gender: String,
    /// Locator into the planets collection, which is not mirrored.
    pub homeworld: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilmAttributes {
    pub title: String,
    pub episode_id: Option<i64>,
    pub opening_crawl: String,
    pub director: String,
    pub producer: String,
    pub release_date: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarshipAttributes {
    pub name: String,
    pub model: String,
    pub manufacturer: String,
    pub cost_in_credits: String,
    pub length: String,
    pub max_atmosphering_speed: String,
    pub crew: String,
    pub passengers: String,
    pub cargo_capacity: String,
    pub consumables: String,
    pub hyperdrive_rating: String,
    #[serde(rename = "MGLT")]
    pub mglt: String,
    pub starship_class: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attributes {
    Character(CharacterAttributes),
    Film(FilmAttributes),
    Starship(StarshipAttributes),
}

impl Attributes {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Character(_) => EntityKind::Character,
            Self::Film(_) => EntityKind::Film,
            Self::Starship(_) => EntityKind::Starship,
        }
    }

    /// `name` for characters and starships, `title` for films.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Character(a) => &a.name,
            Self::Film(a) => &a.title,
            Self::Starship(a) => &a.name,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            Self::Character(a) => &a.url,
            Self::Film(a) => &a.url,
            Self::Starship(a) => &a.url,
        }
    }
}
