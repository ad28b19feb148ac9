//! sled-backed catalog store.

use super::{CasOutcome, CatalogEntity, CatalogStore, EntityStatus, StudyRef};
use crate::codec::{decode, encode};
use crate::error::Error;
use sled::{Db, Tree};

/// Tree name for registered studies (fqn -> project).
const STUDY_TREE: &str = "catalog:studies";

/// Tree name for entity status records.
const ENTITY_TREE: &str = "catalog:entities";

/// Separator between the study name and the entity id in entity keys.
const KEY_SEPARATOR: u8 = 0;

/// Catalog store persisted in sled.
pub struct SledCatalog {
    /// Registered studies.
    study_tree: Tree,
    /// Entity status records keyed by `study \0 id`.
    entity_tree: Tree,
}

impl SledCatalog {
    /// Open or create a catalog using the given sled database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        Ok(Self {
            study_tree: db.open_tree(STUDY_TREE)?,
            entity_tree: db.open_tree(ENTITY_TREE)?,
        })
    }

    /// Register a study.
    pub fn register_study(&self, study: &StudyRef) -> Result<(), Error> {
        self.study_tree
            .insert(study.fqn.as_bytes(), study.project.as_bytes())?;
        Ok(())
    }

    /// Insert or overwrite an entity record, ignoring its version.
    ///
    /// Used for seeding and imports; status changes coming from
    /// reconciliation go through [`CatalogStore::compare_and_set_status`].
    pub fn put_entity(&self, study: &str, entity: &CatalogEntity) -> Result<(), Error> {
        if !self.study_tree.contains_key(study.as_bytes())? {
            return Err(Error::NotFound(format!("study {study}")));
        }
        let key = Self::entity_key(study, &entity.id);
        self.entity_tree.insert(key, encode(entity)?)?;
        Ok(())
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), Error> {
        self.study_tree.flush()?;
        self.entity_tree.flush()?;
        Ok(())
    }

    fn entity_key(study: &str, id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(study.len() + id.len() + 1);
        key.extend_from_slice(study.as_bytes());
        key.push(KEY_SEPARATOR);
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn study_prefix(study: &str) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(study.len() + 1);
        prefix.extend_from_slice(study.as_bytes());
        prefix.push(KEY_SEPARATOR);
        prefix
    }
}

impl CatalogStore for SledCatalog {
    fn list_studies(&self, project: Option<&str>) -> Result<Vec<StudyRef>, Error> {
        let mut studies = Vec::new();
        for result in self.study_tree.iter() {
            let (key, value) = result?;
            let fqn = String::from_utf8(key.to_vec())
                .map_err(|e| Error::Deserialization(e.to_string()))?;
            let owner = String::from_utf8(value.to_vec())
                .map_err(|e| Error::Deserialization(e.to_string()))?;
            if project.map_or(true, |p| p == owner) {
                studies.push(StudyRef {
                    fqn,
                    project: owner,
                });
            }
        }
        Ok(studies)
    }

    fn study(&self, fqn: &str) -> Result<Option<StudyRef>, Error> {
        match self.study_tree.get(fqn.as_bytes())? {
            Some(value) => Ok(Some(StudyRef {
                fqn: fqn.to_string(),
                project: String::from_utf8(value.to_vec())
                    .map_err(|e| Error::Deserialization(e.to_string()))?,
            })),
            None => Ok(None),
        }
    }

    fn entities(&self, study: &str) -> Result<Vec<CatalogEntity>, Error> {
        let mut entities = Vec::new();
        for result in self.entity_tree.scan_prefix(Self::study_prefix(study)) {
            let (_, value) = result?;
            entities.push(decode::<CatalogEntity>(&value)?);
        }
        Ok(entities)
    }

    fn entity(&self, study: &str, id: &str) -> Result<Option<CatalogEntity>, Error> {
        match self.entity_tree.get(Self::entity_key(study, id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn compare_and_set_status(
        &self,
        study: &str,
        id: &str,
        expected_version: u64,
        status: EntityStatus,
    ) -> Result<CasOutcome, Error> {
        let key = Self::entity_key(study, id);
        let current = self
            .entity_tree
            .get(&key)?
            .ok_or_else(|| Error::NotFound(format!("entity {id} in study {study}")))?;

        let mut entity: CatalogEntity = decode(&current)?;
        if entity.version != expected_version {
            return Ok(CasOutcome::Conflict);
        }
        entity.status = status;
        entity.version += 1;

        match self
            .entity_tree
            .compare_and_swap(&key, Some(&current), Some(encode(&entity)?))?
        {
            Ok(()) => Ok(CasOutcome::Applied {
                version: entity.version,
            }),
            Err(_) => Ok(CasOutcome::Conflict),
        }
    }
}
