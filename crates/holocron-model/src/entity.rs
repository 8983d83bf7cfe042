use serde::{Deserialize, Serialize};

use crate::{Attributes, EntityId, EntityKind, NaturalKey, Reference, ReferenceToken};

/// A persisted catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub natural_key: NaturalKey,
    pub attributes: Attributes,
    pub references: Vec<Reference>,
    pub vote_count: u64,
}

impl Entity {
    pub fn display_name(&self) -> &str {
        self.attributes.display_name()
    }

    /// Resolved target ids of one kind, in reference order.
    pub fn resolved_ids(&self, kind: EntityKind) -> Vec<EntityId> {
        self.references
            .iter()
            .filter(|r| r.target.kind == kind)
            .filter_map(Reference::resolved_id)
            .collect()
    }

    /// References that still wait for their target.
    pub fn unresolved(&self) -> impl Iterator<Item = &Reference> {
        self.references.iter().filter(|r| !r.is_resolved())
    }
}

/// A normalized record straight out of the mapper: no surrogate id yet and
/// references still expressed as tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDraft {
    pub natural_key: NaturalKey,
    pub attributes: Attributes,
    pub references: Vec<ReferenceToken>,
}

impl EntityDraft {
    pub fn kind(&self) -> EntityKind {
        self.attributes.kind()
    }
}

/// One row of a popularity ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub kind: EntityKind,
    pub id: EntityId,
    pub name: String,
    pub vote_count: u64,
}
