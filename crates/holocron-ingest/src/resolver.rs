//! Reference tokens → surrogate ids.
//!
//! Each token is looked up by natural key. A miss becomes a pending
//! reference carrying the number of passes that have missed it so far; once
//! that number reaches `max_passes` the reference is marked unresolved and a
//! warning is raised. Neither outcome blocks the record: the store keeps the
//! marker and backfills it whenever the target shows up.

use holocron_model::{
    Entity, EntityDraft, EntityKind, NaturalKey, Reference, ReferenceState, ReferenceToken,
};
use holocron_storage::CatalogStore;
use serde::{Deserialize, Serialize};

use crate::mapper::BrokenLocator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// The locator itself could not be parsed.
    Broken { detail: String },
    /// Target still missing after this many passes.
    Exhausted { passes: u32 },
}

/// Non-fatal; reported in the ingestion summary only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReferenceWarning {
    pub referrer_kind: EntityKind,
    pub referrer_key: NaturalKey,
    pub field: Option<String>,
    pub target: String,
    #[serde(flatten)]
    pub reason: UnresolvedReason,
}

impl UnresolvedReferenceWarning {
    pub fn broken(kind: EntityKind, key: &NaturalKey, locator: &BrokenLocator) -> Self {
        Self {
            referrer_kind: kind,
            referrer_key: key.clone(),
            field: Some(locator.field.to_string()),
            target: locator.locator.clone(),
            reason: UnresolvedReason::Broken {
                detail: locator.reason.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub references: Vec<Reference>,
    pub warnings: Vec<UnresolvedReferenceWarning>,
}

pub struct Resolver<'a> {
    store: &'a dyn CatalogStore,
    max_passes: u32,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn CatalogStore, max_passes: u32) -> Self {
        Self {
            store,
            max_passes: max_passes.max(1),
        }
    }

    /// Resolve the draft's tokens. `previous` is the stored row for the same
    /// natural key, if any; its pass counts carry over.
    pub async fn resolve(&self, draft: &EntityDraft, previous: Option<&Entity>) -> Resolution {
        let mut resolution = Resolution::default();

        for token in &draft.references {
            if let Some(id) = self
                .store
                .resolve_natural_key(token.kind, &token.natural_key)
                .await
            {
                resolution.references.push(Reference::resolved(token.clone(), id));
                continue;
            }

            let passes = (prior_passes(previous, token) + 1).min(self.max_passes);
            if passes >= self.max_passes {
                tracing::warn!(
                    kind = %draft.kind(),
                    natural_key = %draft.natural_key,
                    target = %token,
                    passes,
                    "reference still unresolved"
                );
                resolution.warnings.push(UnresolvedReferenceWarning {
                    referrer_kind: draft.kind(),
                    referrer_key: draft.natural_key.clone(),
                    field: None,
                    target: token.to_string(),
                    reason: UnresolvedReason::Exhausted { passes },
                });
                resolution.references.push(Reference {
                    target: token.clone(),
                    state: ReferenceState::Unresolved { passes },
                });
            } else {
                resolution.references.push(Reference::pending(token.clone(), passes));
            }
        }

        resolution
    }
}

fn prior_passes(previous: Option<&Entity>, token: &ReferenceToken) -> u32 {
    previous
        .and_then(|entity| entity.references.iter().find(|r| &r.target == token))
        .map_or(0, Reference::passes)
}
