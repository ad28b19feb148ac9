//! Divergence between cached and authoritative entity status.

use std::collections::HashMap;

use crate::catalog::{CatalogEntity, EntityKind, EntityStatus};
use crate::compat::{BackendAdapter, Feature};
use crate::storage::RawEntityStatus;

/// An entity whose cached status differs from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DivergentEntity {
    /// Entity id.
    pub id: String,
    /// Entity kind.
    pub kind: EntityKind,
    /// Status recorded in the catalog.
    pub cached: EntityStatus,
    /// Status according to storage.
    pub authoritative: EntityStatus,
    /// Catalog version the cached status was read at.
    pub version: u64,
}

/// Result of comparing one study.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Divergence {
    /// Entities to rewrite, sorted by id.
    pub divergent: Vec<DivergentEntity>,
    /// Ids reported by storage that the catalog does not know.
    pub ignored: Vec<String>,
    /// `(id, code)` pairs whose code the adapter could not translate.
    pub untranslated: Vec<(String, String)>,
    /// `(id, reported kind)` pairs whose kind disagrees with the catalog.
    pub mismatched: Vec<(String, EntityKind)>,
    /// Live entities compared.
    pub compared: usize,
}

fn feature_for(kind: EntityKind) -> Feature {
    match kind {
        EntityKind::Sample => Feature::SampleIndex,
        EntityKind::Cohort => Feature::CohortStats,
        EntityKind::File => Feature::FileIndex,
    }
}

/// Compare catalog entities of a study against the backend report.
///
/// `authoritative` is `None` when the study is absent from storage, in which
/// case every live entity is authoritatively NONE. Soft-deleted entities and
/// kinds the adapter does not support are left out. A report whose kind
/// disagrees with the catalog entity is not trusted and leaves the cached
/// status alone.
pub fn compute(
    adapter: &dyn BackendAdapter,
    cached: &[CatalogEntity],
    authoritative: Option<&[RawEntityStatus]>,
) -> Divergence {
    let reported: HashMap<&str, &RawEntityStatus> = authoritative
        .unwrap_or_default()
        .iter()
        .map(|raw| (raw.id.as_str(), raw))
        .collect();

    let mut divergence = Divergence::default();

    let known: HashMap<&str, &CatalogEntity> =
        cached.iter().map(|entity| (entity.id.as_str(), entity)).collect();
    divergence.ignored = reported
        .keys()
        .filter(|id| !known.contains_key(*id))
        .map(|id| id.to_string())
        .collect();
    divergence.ignored.sort();

    for entity in cached {
        if entity.deleted || !adapter.supports(feature_for(entity.kind)) {
            continue;
        }
        divergence.compared += 1;

        let status = match reported.get(entity.id.as_str()) {
            Some(raw) if raw.kind != entity.kind => {
                divergence.mismatched.push((raw.id.clone(), raw.kind));
                continue;
            }
            Some(raw) => match adapter.interpret(raw) {
                Some(status) => status,
                None => {
                    divergence.untranslated.push((raw.id.clone(), raw.code.clone()));
                    continue;
                }
            },
            None => EntityStatus::None,
        };

        if status != entity.status {
            divergence.divergent.push(DivergentEntity {
                id: entity.id.clone(),
                kind: entity.kind,
                cached: entity.status,
                authoritative: status,
                version: entity.version,
            });
        }
    }

    divergence.divergent.sort_by(|a, b| a.id.cmp(&b.id));
    divergence
}
