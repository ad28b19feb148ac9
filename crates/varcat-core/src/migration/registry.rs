//! Migration discovery and ordering.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;

use super::descriptor::{Domain, MigrationBody, MigrationDescriptor, MigrationProvider};
use super::error::DescriptorError;
use crate::version::Version;

/// A validated manifest entry with its versions parsed.
#[derive(Clone)]
pub struct ResolvedMigration {
    /// The descriptor as declared.
    pub descriptor: MigrationDescriptor,
    /// Parsed target version.
    pub target: Version,
    /// Parsed deprecation version.
    pub deprecated_since: Option<Version>,
    /// The body.
    pub body: Arc<dyn MigrationBody>,
}

impl ResolvedMigration {
    /// Migration id.
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Total order: target version, rank, patch, then id.
    fn order(&self, other: &Self) -> Ordering {
        self.target
            .cmp(&other.target)
            .then(self.descriptor.rank.cmp(&other.descriptor.rank))
            .then(self.descriptor.patch.cmp(&other.descriptor.patch))
            .then_with(|| self.descriptor.id.cmp(&other.descriptor.id))
    }
}

impl fmt::Debug for ResolvedMigration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedMigration")
            .field("id", &self.descriptor.id)
            .field("target", &self.target)
            .field("domain", &self.descriptor.domain)
            .finish_non_exhaustive()
    }
}

/// Validated, totally ordered set of migrations.
#[derive(Debug)]
pub struct MigrationRegistry {
    migrations: Vec<ResolvedMigration>,
}

impl MigrationRegistry {
    /// Load and validate the whole manifest of a provider.
    ///
    /// Every entry of every domain is checked, so a broken manifest is
    /// rejected before anything runs.
    pub fn load(provider: &dyn MigrationProvider) -> Result<Self, DescriptorError> {
        let manifest = provider.manifest();
        let mut seen = HashSet::with_capacity(manifest.len());
        let mut migrations = Vec::with_capacity(manifest.len());

        for entry in manifest {
            let descriptor = entry.descriptor;
            if !seen.insert(descriptor.id.clone()) {
                return Err(DescriptorError::DuplicateId { id: descriptor.id });
            }

            let target = Version::parse(&descriptor.target_version).map_err(|source| {
                DescriptorError::InvalidVersion {
                    id: descriptor.id.clone(),
                    field: "target_version",
                    source,
                }
            })?;
            let deprecated_since = descriptor
                .deprecated_since
                .as_deref()
                .map(Version::parse)
                .transpose()
                .map_err(|source| DescriptorError::InvalidVersion {
                    id: descriptor.id.clone(),
                    field: "deprecated_since",
                    source,
                })?;
            validate_release_date(&descriptor)?;

            migrations.push(ResolvedMigration {
                descriptor,
                target,
                deprecated_since,
                body: entry.body,
            });
        }

        migrations.sort_by(ResolvedMigration::order);
        Ok(Self { migrations })
    }

    /// Ordered migrations of a domain, optionally restricted to some ids.
    ///
    /// Fails with [`DescriptorError::UnknownId`] when a requested id names
    /// no migration of the domain.
    pub fn discover(
        &self,
        domain: Domain,
        ids: Option<&[String]>,
    ) -> Result<Vec<&ResolvedMigration>, DescriptorError> {
        let Some(ids) = ids else {
            return Ok(self.domain(domain).collect());
        };

        for id in ids {
            if !self.domain(domain).any(|m| m.id() == id) {
                return Err(DescriptorError::UnknownId { id: id.clone() });
            }
        }
        Ok(self
            .domain(domain)
            .filter(|m| ids.iter().any(|id| id == m.id()))
            .collect())
    }

    /// Ordered migrations of a domain targeting `version` or earlier.
    pub fn discover_up_to(&self, domain: Domain, version: &Version) -> Vec<&ResolvedMigration> {
        self.domain(domain)
            .filter(|m| m.target <= *version)
            .collect()
    }

    /// Look up a migration by id.
    pub fn get(&self, id: &str) -> Option<&ResolvedMigration> {
        self.migrations.iter().find(|m| m.id() == id)
    }

    /// All migrations, in order.
    pub fn migrations(&self) -> &[ResolvedMigration] {
        &self.migrations
    }

    /// Number of migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Check if the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    fn domain(&self, domain: Domain) -> impl Iterator<Item = &ResolvedMigration> {
        self.migrations
            .iter()
            .filter(move |m| m.descriptor.domain == domain)
    }
}

fn validate_release_date(descriptor: &MigrationDescriptor) -> Result<(), DescriptorError> {
    let date = descriptor.release_date;
    let valid = (10_000_000..=99_999_999).contains(&date)
        && NaiveDate::parse_from_str(&date.to_string(), "%Y%m%d").is_ok();
    if valid {
        Ok(())
    } else {
        Err(DescriptorError::InvalidReleaseDate {
            id: descriptor.id.clone(),
            date,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DomainContext;
    use crate::migration::descriptor::ManifestEntry;
    use crate::migration::error::BoxError;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl MigrationBody for Noop {
        async fn run(&self, _ctx: &DomainContext) -> Result<(), BoxError> {
            Ok(())
        }
    }

    fn entry(descriptor: MigrationDescriptor) -> ManifestEntry {
        ManifestEntry::new(descriptor, Noop)
    }

    fn ids(migrations: &[&ResolvedMigration]) -> Vec<String> {
        migrations.iter().map(|m| m.id().to_string()).collect()
    }

    #[test]
    fn test_ordering_key() {
        let manifest = vec![
            entry(MigrationDescriptor::new("m1", Domain::Catalog, "1.2.0", 20240101).with_rank(1)),
            entry(MigrationDescriptor::new("m2", Domain::Catalog, "1.10.0", 20240101)),
            entry(MigrationDescriptor::new("m3", Domain::Catalog, "1.2.0", 20240101)),
        ];
        let registry = MigrationRegistry::load(&manifest).unwrap();
        let ordered = registry.discover(Domain::Catalog, None).unwrap();
        assert_eq!(ids(&ordered), vec!["m3", "m1", "m2"]);
    }

    #[test]
    fn test_patch_and_id_break_ties() {
        let manifest = vec![
            entry(MigrationDescriptor::new("b", Domain::Storage, "2.0.0", 20240101).with_patch(1)),
            entry(MigrationDescriptor::new("c", Domain::Storage, "2.0.0", 20240101)),
            entry(MigrationDescriptor::new("a", Domain::Storage, "2.0.0", 20240101)),
        ];
        let registry = MigrationRegistry::load(&manifest).unwrap();
        assert_eq!(ids(&registry.discover(Domain::Storage, None).unwrap()), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_discovery_filters_domain() {
        let manifest = vec![
            entry(MigrationDescriptor::new("c1", Domain::Catalog, "1.0.0", 20240101)),
            entry(MigrationDescriptor::new("s1", Domain::Storage, "1.0.0", 20240101)),
        ];
        let registry = MigrationRegistry::load(&manifest).unwrap();
        assert_eq!(ids(&registry.discover(Domain::Storage, None).unwrap()), vec!["s1"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_id_across_domains() {
        let manifest = vec![
            entry(MigrationDescriptor::new("dup", Domain::Catalog, "1.0.0", 20240101)),
            entry(MigrationDescriptor::new("dup", Domain::Storage, "1.1.0", 20240101)),
        ];
        let err = MigrationRegistry::load(&manifest).unwrap_err();
        assert_eq!(err, DescriptorError::DuplicateId { id: "dup".to_string() });
    }

    #[test]
    fn test_invalid_versions() {
        let manifest = vec![entry(MigrationDescriptor::new("m", Domain::Catalog, "1.x", 20240101))];
        let err = MigrationRegistry::load(&manifest).unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidVersion { field: "target_version", .. }));

        let manifest = vec![entry(
            MigrationDescriptor::new("m", Domain::Catalog, "1.0.0", 20240101).deprecated_since("two"),
        )];
        let err = MigrationRegistry::load(&manifest).unwrap_err();
        assert!(matches!(err, DescriptorError::InvalidVersion { field: "deprecated_since", .. }));
    }

    #[test]
    fn test_invalid_release_date() {
        for date in [2024013, 20241301, 20240230, 0] {
            let manifest = vec![entry(MigrationDescriptor::new("m", Domain::Catalog, "1.0.0", date))];
            let err = MigrationRegistry::load(&manifest).unwrap_err();
            assert_eq!(
                err,
                DescriptorError::InvalidReleaseDate {
                    id: "m".to_string(),
                    date
                }
            );
        }
    }

    #[test]
    fn test_unknown_id_filter() {
        let manifest = vec![
            entry(MigrationDescriptor::new("c1", Domain::Catalog, "1.0.0", 20240101)),
            entry(MigrationDescriptor::new("s1", Domain::Storage, "1.0.0", 20240101)),
        ];
        let registry = MigrationRegistry::load(&manifest).unwrap();

        let selected = registry
            .discover(Domain::Catalog, Some(&["c1".to_string()]))
            .unwrap();
        assert_eq!(ids(&selected), vec!["c1"]);

        let err = registry
            .discover(Domain::Catalog, Some(&["s1".to_string()]))
            .unwrap_err();
        assert_eq!(err, DescriptorError::UnknownId { id: "s1".to_string() });
    }

    #[test]
    fn test_discover_up_to() {
        let manifest = vec![
            entry(MigrationDescriptor::new("m1", Domain::Catalog, "1.0.0", 20240101)),
            entry(MigrationDescriptor::new("m2", Domain::Catalog, "2.0.0", 20240101)),
            entry(MigrationDescriptor::new("m3", Domain::Catalog, "2.1.0", 20240101)),
        ];
        let registry = MigrationRegistry::load(&manifest).unwrap();
        let selected = registry.discover_up_to(Domain::Catalog, &Version::new(2, 0, 0));
        assert_eq!(ids(&selected), vec!["m1", "m2"]);
    }
}
