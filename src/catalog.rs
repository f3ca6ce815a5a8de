//! The validated, immutable collection of query definitions.
//!
//! Built once at startup from a JSON definitions file and shared read-only
//! for the life of the process. Entries that fail parameter/placeholder
//! validation are dropped with a logged diagnostic; a malformed file or a
//! duplicate method identity fails the whole load.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::MethodDefinition;

/// Errors that abort catalog construction.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unable to read queries file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to parse queries file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate query definition for {service}/{method} in queries file")]
    DuplicateMethod { service: String, method: String },
}

/// An ordered, load-time-fixed collection of validated definitions.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    methods: Vec<MethodDefinition>,
}

impl Catalog {
    /// Load and validate a definitions file.
    pub fn load_file(path: &Path) -> Result<Self, CatalogError> {
        let data = std::fs::read(path).map_err(|source| {
            tracing::error!(path = %path.display(), error = %source, "error loading query file");
            CatalogError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::from_slice(&data)
    }

    /// Load several definitions files into one catalog. The duplicate
    /// identity check spans all of them.
    pub fn load_files(paths: &[PathBuf]) -> Result<Self, CatalogError> {
        let mut methods = Vec::new();
        for path in paths {
            let data = std::fs::read(path).map_err(|source| {
                tracing::error!(path = %path.display(), error = %source, "error loading query file");
                CatalogError::Io {
                    path: path.clone(),
                    source,
                }
            })?;
            let mut parsed: Vec<MethodDefinition> = serde_json::from_slice(&data).map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "error unmarshalling query file");
                e
            })?;
            methods.append(&mut parsed);
        }
        Self::from_definitions(methods)
    }

    /// Build a catalog from the raw bytes of a definitions file: a JSON
    /// array of method definitions.
    pub fn from_slice(data: &[u8]) -> Result<Self, CatalogError> {
        let methods: Vec<MethodDefinition> = serde_json::from_slice(data).map_err(|e| {
            tracing::error!(error = %e, "error unmarshalling query file");
            e
        })?;
        Self::from_definitions(methods)
    }

    /// Build a catalog from already-parsed definitions, retaining only the
    /// valid ones in original order. Two definitions sharing a
    /// `(service, method)` identity would silently shadow each other at
    /// lookup time, so duplicates fail the load outright.
    pub fn from_definitions(methods: Vec<MethodDefinition>) -> Result<Self, CatalogError> {
        for (i, a) in methods.iter().enumerate() {
            for b in &methods[i + 1..] {
                if a.service_name == b.service_name && a.method_name == b.method_name {
                    return Err(CatalogError::DuplicateMethod {
                        service: a.service_name.clone(),
                        method: a.method_name.clone(),
                    });
                }
            }
        }

        let mut retained = Vec::with_capacity(methods.len());
        for method in methods {
            if method.validate() {
                retained.push(method);
            } else {
                tracing::warn!(
                    service = %method.service_name,
                    method = %method.method_name,
                    "query params validation failed for method; dropping it from the catalog"
                );
            }
        }

        Ok(Catalog { methods: retained })
    }

    /// Resolve a `(service, method)` identity. Linear scan; catalogs are
    /// small and load-time-fixed.
    pub fn lookup(&self, service_name: &str, method_name: &str) -> Option<&MethodDefinition> {
        self.methods
            .iter()
            .find(|m| m.service_name == service_name && m.method_name == method_name)
    }

    /// All retained definitions, in original order.
    pub fn methods(&self) -> &[MethodDefinition] {
        &self.methods
    }

    /// Serialized snapshot of the retained definitions, for discovery.
    pub fn list_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.methods)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
