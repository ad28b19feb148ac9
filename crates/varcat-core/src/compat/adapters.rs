//! Built-in backend adapters.

use std::sync::Arc;

use super::{BackendAdapter, Feature, TableDescriptor};
use crate::catalog::{EntityKind, EntityStatus};
use crate::storage::{ClusterMember, RawEntityStatus};

/// Split `[org@]project:study` into `(project, study)`, falling back to the
/// whole name when it is not qualified.
fn split_study(study: &str) -> (&str, &str) {
    match study.split_once(':') {
        Some((scope, name)) => {
            let project = scope.rsplit_once('@').map_or(scope, |(_, project)| project);
            (project, name)
        }
        None => (study, study),
    }
}

/// Table names only allow `[a-z0-9_]`.
fn table_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

fn live_by_state(members: &[ClusterMember], live_states: &[&str]) -> Vec<String> {
    members
        .iter()
        .filter(|member| live_states.contains(&member.state.as_str()))
        .map(|member| member.node.clone())
        .collect()
}

/// Adapter for document-store backends (`mongodb`).
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentAdapter;

impl DocumentAdapter {
    /// Shared instance for the compatibility table.
    pub fn shared() -> Arc<dyn BackendAdapter> {
        Arc::new(Self)
    }
}

impl BackendAdapter for DocumentAdapter {
    fn name(&self) -> &'static str {
        "document"
    }

    fn supports(&self, feature: Feature) -> bool {
        matches!(feature, Feature::FileIndex | Feature::CohortStats)
    }

    fn table_descriptor(&self, study: &str) -> TableDescriptor {
        let (project, name) = split_study(study);
        TableDescriptor {
            variants: format!("{}_variants_{}", table_safe(project), table_safe(name)),
            archive: None,
            sample_index: None,
        }
    }

    fn live_nodes(&self, members: &[ClusterMember]) -> Vec<String> {
        live_by_state(members, &["PRIMARY", "SECONDARY"])
    }

    fn interpret(&self, raw: &RawEntityStatus) -> Option<EntityStatus> {
        match raw.code.as_str() {
            "READY" => Some(EntityStatus::Ready),
            "INDEXING" | "LOADING" | "CALCULATING" => Some(EntityStatus::Running),
            "NONE" | "TRANSFORMED" => Some(EntityStatus::None),
            "INVALID" => Some(EntityStatus::Invalid),
            _ => None,
        }
    }
}

/// Adapter for wide-column backends before 3.0 (`hadoop` 1.x and 2.x).
///
/// These runtimes keep one archive table per study, have no sample index
/// and do not track cohort statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LegacyColumnAdapter;

impl LegacyColumnAdapter {
    /// Shared instance for the compatibility table.
    pub fn shared() -> Arc<dyn BackendAdapter> {
        Arc::new(Self)
    }
}

impl BackendAdapter for LegacyColumnAdapter {
    fn name(&self) -> &'static str {
        "legacy-column"
    }

    fn supports(&self, feature: Feature) -> bool {
        matches!(feature, Feature::FileIndex | Feature::ArchiveTable)
    }

    fn table_descriptor(&self, study: &str) -> TableDescriptor {
        let (project, name) = split_study(study);
        let project = table_safe(project);
        TableDescriptor {
            variants: format!("{project}_variants"),
            archive: Some(format!("{project}_archive_{}", table_safe(name))),
            sample_index: None,
        }
    }

    fn live_nodes(&self, members: &[ClusterMember]) -> Vec<String> {
        live_by_state(members, &["live"])
    }

    fn interpret(&self, raw: &RawEntityStatus) -> Option<EntityStatus> {
        if raw.kind != EntityKind::File {
            return None;
        }
        match raw.code.as_str() {
            "LOADED" | "INDEXED" => Some(EntityStatus::Ready),
            "LOADING" => Some(EntityStatus::Running),
            "NONE" => Some(EntityStatus::None),
            "ERROR" => Some(EntityStatus::Invalid),
            _ => None,
        }
    }
}

/// Adapter for wide-column backends from 3.0 on.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnAdapter;

impl ColumnAdapter {
    /// Shared instance for the compatibility table.
    pub fn shared() -> Arc<dyn BackendAdapter> {
        Arc::new(Self)
    }
}

impl BackendAdapter for ColumnAdapter {
    fn name(&self) -> &'static str {
        "column"
    }

    fn supports(&self, _feature: Feature) -> bool {
        true
    }

    fn table_descriptor(&self, study: &str) -> TableDescriptor {
        let (project, name) = split_study(study);
        let project = table_safe(project);
        let name = table_safe(name);
        TableDescriptor {
            variants: format!("{project}:variants"),
            archive: Some(format!("{project}:archive_{name}")),
            sample_index: Some(format!("{project}:sample_index_{name}")),
        }
    }

    fn live_nodes(&self, members: &[ClusterMember]) -> Vec<String> {
        live_by_state(members, &["ONLINE", "DECOMMISSIONING"])
    }

    fn interpret(&self, raw: &RawEntityStatus) -> Option<EntityStatus> {
        match (raw.kind, raw.code.as_str()) {
            (EntityKind::Cohort, "STATS_READY") => Some(EntityStatus::Ready),
            (EntityKind::Cohort, "STATS_CALCULATING") => Some(EntityStatus::Running),
            (EntityKind::Cohort, "STATS_INVALID") => Some(EntityStatus::Invalid),
            (EntityKind::Cohort, "STATS_NONE") => Some(EntityStatus::None),
            (EntityKind::Cohort, _) => None,
            (_, "INDEXED" | "READY") => Some(EntityStatus::Ready),
            (_, "RUNNING" | "PENDING") => Some(EntityStatus::Running),
            (_, "INVALID" | "ERROR") => Some(EntityStatus::Invalid),
            (_, "NONE" | "NOT_INDEXED") => Some(EntityStatus::None),
            _ => None,
        }
    }
}
