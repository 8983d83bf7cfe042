//! Raw record → [`EntityDraft`].
//!
//! Pure: no I/O, no store access. Only `url` and the display field (`name`,
//! or `title` for films) are required; every other scalar falls back to an
//! empty string.

use holocron_model::reference::parse_locator;
use holocron_model::{
    Attributes, CharacterAttributes, EntityDraft, EntityKind, FilmAttributes, NaturalKey,
    ReferenceToken, StarshipAttributes,
};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` should be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("`url` {url:?} does not point into the {kind} collection")]
    ForeignUrl { kind: EntityKind, url: String },
}

/// A locator that could not be turned into a reference token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenLocator {
    pub field: &'static str,
    pub locator: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedRecord {
    pub draft: EntityDraft,
    pub broken: Vec<BrokenLocator>,
}

/// Reference-bearing fields per kind, and the kind they point at.
fn reference_fields(kind: EntityKind) -> &'static [(&'static str, EntityKind)] {
    match kind {
        EntityKind::Character => &[("films", EntityKind::Film), ("starships", EntityKind::Starship)],
        EntityKind::Film => &[
            ("characters", EntityKind::Character),
            ("starships", EntityKind::Starship),
        ],
        EntityKind::Starship => &[("pilots", EntityKind::Character), ("films", EntityKind::Film)],
    }
}

pub fn map_record(kind: EntityKind, raw: &Value) -> Result<MappedRecord, MappingError> {
    let record = raw.as_object().ok_or(MappingError::NotAnObject)?;

    let url = required(record, "url")?;
    let natural_key = natural_key(kind, &url)?;

    let attributes = match kind {
        EntityKind::Character => Attributes::Character(CharacterAttributes {
            name: required(record, "name")?,
            height: text(record, "height")?,
            mass: text(record, "mass")?,
            hair_color: text(record, "hair_color")?,
            skin_color: text(record, "skin_color")?,
            eye_color: text(record, "eye_color")?,
            birth_year: text(record, "birth_year")?,
            gender: text(record, "gender")?,
            homeworld: text(record, "homeworld")?,
            url,
        }),
        EntityKind::Film => Attributes::Film(FilmAttributes {
            title: required(record, "title")?,
            episode_id: integer(record, "episode_id")?,
            opening_crawl: text(record, "opening_crawl")?,
            director: text(record, "director")?,
            producer: text(record, "producer")?,
            release_date: text(record, "release_date")?,
            url,
        }),
        EntityKind::Starship => Attributes::Starship(StarshipAttributes {
            name: required(record, "name")?,
            model: text(record, "model")?,
            manufacturer: text(record, "manufacturer")?,
            cost_in_credits: text(record, "cost_in_credits")?,
            length: text(record, "length")?,
            max_atmosphering_speed: text(record, "max_atmosphering_speed")?,
            crew: text(record, "crew")?,
            passengers: text(record, "passengers")?,
            cargo_capacity: text(record, "cargo_capacity")?,
            consumables: text(record, "consumables")?,
            hyperdrive_rating: text(record, "hyperdrive_rating")?,
            mglt: text(record, "MGLT")?,
            starship_class: text(record, "starship_class")?,
            url,
        }),
    };

    let mut references: Vec<ReferenceToken> = Vec::new();
    let mut broken = Vec::new();
    for &(field, target) in reference_fields(kind) {
        let locators = match record.get(field) {
            None | Some(Value::Null) => continue,
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(MappingError::WrongType {
                    field,
                    expected: "an array of locators",
                })
            }
        };
        for item in locators {
            let Some(locator) = item.as_str() else {
                broken.push(BrokenLocator {
                    field,
                    locator: item.to_string(),
                    reason: "not a string".to_string(),
                });
                continue;
            };
            match ReferenceToken::from_locator(locator) {
                Ok(token) if token.kind == target => {
                    if !references.contains(&token) {
                        references.push(token);
                    }
                }
                Ok(token) => broken.push(BrokenLocator {
                    field,
                    locator: locator.to_string(),
                    reason: format!("points at {} instead of {target}", token.kind),
                }),
                Err(err) => broken.push(BrokenLocator {
                    field,
                    locator: locator.to_string(),
                    reason: err.to_string(),
                }),
            }
        }
    }

    Ok(MappedRecord {
        draft: EntityDraft {
            natural_key,
            attributes,
            references,
        },
        broken,
    })
}

fn natural_key(kind: EntityKind, url: &str) -> Result<NaturalKey, MappingError> {
    match parse_locator(url) {
        Ok((found, key)) if found == kind => Ok(key),
        _ => Err(MappingError::ForeignUrl {
            kind,
            url: url.to_string(),
        }),
    }
}

fn required(record: &Map<String, Value>, field: &'static str) -> Result<String, MappingError> {
    let value = text(record, field)?;
    if value.trim().is_empty() {
        return Err(MappingError::MissingField(field));
    }
    Ok(value)
}

/// Scalars are kept verbatim; numbers and booleans are rendered as text.
fn text(record: &Map<String, Value>, field: &'static str) -> Result<String, MappingError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(_) => Err(MappingError::WrongType {
            field,
            expected: "a scalar",
        }),
    }
}

fn integer(record: &Map<String, Value>, field: &'static str) -> Result<Option<i64>, MappingError> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or(MappingError::WrongType {
            field,
            expected: "an integer",
        }),
    }
}
