//! Holocron catalog model
//!
//! The mirrored catalog holds three near-identical entity shapes (characters,
//! films, starships). Instead of three hand-written hierarchies they share one
//! generic record:
//!
//! ```text
//! Entity {
//!     id           surrogate id, assigned by the store, never reused
//!     kind         Character | Film | Starship
//!     natural_key  remote id ("10" for .../api/starships/10/)
//!     attributes   typed payload, one variant per kind
//!     references   ordered links into the other collections
//!     vote_count   aggregate counter, never touched by ingestion
//! }
//! ```
//!
//! References are recorded by natural key first and resolved to surrogate ids
//! when (or once) the target exists; see [`ReferenceState`].

pub mod attributes;
pub mod entity;
pub mod kind;
pub mod reference;

pub use attributes::{Attributes, CharacterAttributes, FilmAttributes, StarshipAttributes};
pub use entity::{Entity, EntityDraft, RankedEntry};
pub use kind::{EntityId, EntityKind, NaturalKey};
pub use reference::{Reference, ReferenceState, ReferenceToken};

/// Errors raised while interpreting catalog identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("unknown entity type `{0}` (expected character|film|starship)")]
    UnknownKind(String),
    #[error("invalid reference locator `{0}`")]
    InvalidLocator(String),
}
