//! Capability handles handed to migration bodies and the reconciliation
//! engine.
//!
//! Contexts are built explicitly by the host through a [`ContextProvider`];
//! nothing in the engine reaches for a global catalog or opens a backend
//! connection on its own.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::catalog::CatalogStore;
use crate::compat::{BackendAdapter, CompatError, CompatResolver};
use crate::migration::{Domain, MigrationError};
use crate::storage::StorageBackend;
use crate::sync::SyncError;

/// Context for CATALOG-domain work.
#[derive(Clone)]
pub struct CatalogContext {
    catalog: Arc<dyn CatalogStore>,
}

impl CatalogContext {
    /// Create a catalog context.
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self { catalog }
    }

    /// The catalog store.
    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }
}

/// A project backend paired with the adapter resolved for its version.
#[derive(Clone)]
pub struct ResolvedBackend {
    /// Project served by the backend.
    pub project: String,
    /// Backend handle.
    pub backend: Arc<dyn StorageBackend>,
    /// Adapter for the backend version.
    pub adapter: Arc<dyn BackendAdapter>,
}

impl fmt::Debug for ResolvedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedBackend")
            .field("project", &self.project)
            .field("backend", &self.backend.backend_id())
            .field("version", &self.backend.version())
            .field("adapter", &self.adapter.name())
            .finish()
    }
}

/// Context for STORAGE-domain work.
///
/// Holds every configured project backend. A backend whose version no
/// adapter covers is kept with its resolution error so the studies of that
/// project can be reported instead of silently dropped.
#[derive(Clone)]
pub struct StorageContext {
    catalog: Arc<dyn CatalogStore>,
    backends: Arc<BTreeMap<String, Result<ResolvedBackend, CompatError>>>,
}

impl StorageContext {
    /// Resolve adapters for each `(project, backend)` pair.
    pub fn resolve(
        catalog: Arc<dyn CatalogStore>,
        backends: &[(String, Arc<dyn StorageBackend>)],
        resolver: &CompatResolver,
    ) -> Self {
        let resolved = backends
            .iter()
            .map(|(project, backend)| {
                let entry = resolver.resolve_backend(backend.as_ref()).map(|adapter| ResolvedBackend {
                    project: project.clone(),
                    backend: Arc::clone(backend),
                    adapter,
                });
                if let Err(e) = &entry {
                    tracing::warn!(project = %project, error = %e, "no adapter for project backend");
                }
                (project.clone(), entry)
            })
            .collect();

        Self {
            catalog,
            backends: Arc::new(resolved),
        }
    }

    /// The catalog store.
    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    /// Backend serving a project.
    pub fn backend(&self, project: &str) -> Result<&ResolvedBackend, SyncError> {
        match self.backends.get(project) {
            Some(Ok(backend)) => Ok(backend),
            Some(Err(e)) => Err(SyncError::Compat(e.clone())),
            None => Err(SyncError::NoBackend {
                project: project.to_string(),
            }),
        }
    }

    /// Configured project ids.
    pub fn projects(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }
}

/// Context handed to a migration body, selected by domain.
#[derive(Clone)]
pub enum DomainContext {
    /// CATALOG domain.
    Catalog(CatalogContext),
    /// STORAGE domain.
    Storage(StorageContext),
}

impl DomainContext {
    /// Domain of the context.
    pub fn domain(&self) -> Domain {
        match self {
            DomainContext::Catalog(_) => Domain::Catalog,
            DomainContext::Storage(_) => Domain::Storage,
        }
    }

    /// The catalog store, available in both domains.
    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        match self {
            DomainContext::Catalog(ctx) => ctx.catalog(),
            DomainContext::Storage(ctx) => ctx.catalog(),
        }
    }

    /// The storage context, if this is a STORAGE context.
    pub fn storage(&self) -> Option<&StorageContext> {
        match self {
            DomainContext::Storage(ctx) => Some(ctx),
            DomainContext::Catalog(_) => None,
        }
    }
}

/// Host hook building contexts on demand.
pub trait ContextProvider: Send + Sync {
    /// Build the context for a domain.
    fn context(&self, domain: Domain) -> Result<DomainContext, MigrationError>;
}

/// Context provider over a fixed catalog and backend topology.
pub struct StaticContextProvider {
    catalog: Arc<dyn CatalogStore>,
    backends: Vec<(String, Arc<dyn StorageBackend>)>,
    resolver: Arc<CompatResolver>,
}

impl StaticContextProvider {
    /// Create a provider with no backends.
    pub fn new(catalog: Arc<dyn CatalogStore>, resolver: Arc<CompatResolver>) -> Self {
        Self {
            catalog,
            backends: Vec::new(),
            resolver,
        }
    }

    /// Register the backend of a project.
    pub fn with_backend(mut self, project: impl Into<String>, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.push((project.into(), backend));
        self
    }

    /// Build the storage context directly.
    pub fn storage_context(&self) -> StorageContext {
        StorageContext::resolve(Arc::clone(&self.catalog), &self.backends, &self.resolver)
    }
}

impl ContextProvider for StaticContextProvider {
    fn context(&self, domain: Domain) -> Result<DomainContext, MigrationError> {
        Ok(match domain {
            Domain::Catalog => DomainContext::Catalog(CatalogContext::new(Arc::clone(&self.catalog))),
            Domain::Storage => DomainContext::Storage(self.storage_context()),
        })
    }
}
