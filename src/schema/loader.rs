//! Schema reference loading
//!
//! Resolves `$ref` URIs of import schemas:
//!
//! - `local://<name>` - a type from the blueprint's local type map
//! - `blueprint://<path>` - a file from the blueprint filesystem
//! - anything else - the configured fallback loader
//!
//! Documents loaded from `local` and `blueprint` refs are checked to be valid
//! JSON Schemas before they are handed to the validator.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use jsonschema::{SchemaResolver, SchemaResolverError};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::{parse_schema_document, validate_schema_document, Blueprint, BlueprintFs};

/// Schema loading errors
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("unsupported ref {0}")]
    UnsupportedRef(String),

    #[error("invalid ref {reference}: {reason}")]
    InvalidReference { reference: String, reason: String },

    #[error("a path is not supported for local resources: {0}")]
    LocalPath(String),

    #[error("type {0} is not defined in local types")]
    LocalTypeNotFound(String),

    #[error("no filesystem defined to read a local schema")]
    NoFilesystem,

    #[error("unable to read local schema from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to parse schema {reference}: {reason}")]
    Parse { reference: String, reason: String },

    #[error("schema {reference} is not a valid JSON schema: {reason}")]
    InvalidSchema { reference: String, reason: String },
}

/// Loader for refs with schemes the resolver does not handle itself
pub trait FallbackLoader: Send + Sync + fmt::Debug {
    fn load(&self, url: &Url) -> Result<Value, LoaderError>;
}

/// Fallback loader for `file://` refs
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl FallbackLoader for FileLoader {
    fn load(&self, url: &Url) -> Result<Value, LoaderError> {
        if url.scheme() != "file" {
            return Err(LoaderError::UnsupportedRef(url.to_string()));
        }
        let path = url.to_file_path().map_err(|_| LoaderError::InvalidReference {
            reference: url.to_string(),
            reason: "not a local file path".to_string(),
        })?;
        let bytes = fs::read(&path).map_err(|source| LoaderError::Read {
            path: path.display().to_string(),
            source,
        })?;
        parse_schema_document(url.as_str(), &bytes)
    }
}

/// Sources the loader resolves refs against
#[derive(Debug, Clone, Default)]
pub struct LoaderConfig {
    /// Blueprint local types by name
    pub local_types: BTreeMap<String, Value>,
    /// Filesystem used for `blueprint` refs
    pub blueprint_fs: Option<Arc<dyn BlueprintFs>>,
    /// Loader used when the scheme is unknown
    pub default_loader: Option<Arc<dyn FallbackLoader>>,
}

impl LoaderConfig {
    pub fn from_blueprint(blueprint: &Blueprint) -> Self {
        Self {
            local_types: blueprint.local_types.clone(),
            blueprint_fs: blueprint.fs.clone(),
            default_loader: None,
        }
    }

    pub fn with_default_loader(mut self, loader: impl FallbackLoader + 'static) -> Self {
        self.default_loader = Some(Arc::new(loader));
        self
    }
}

/// Reference loader, also used as the validator's `$ref` resolver
#[derive(Debug, Clone, Default)]
pub struct ReferenceLoader {
    config: Arc<LoaderConfig>,
}

impl ReferenceLoader {
    pub fn new(config: LoaderConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load the schema a ref points to
    pub fn load(&self, reference: &str) -> Result<Value, LoaderError> {
        let url = Url::parse(reference).map_err(|e| LoaderError::InvalidReference {
            reference: reference.to_string(),
            reason: e.to_string(),
        })?;
        self.load_url(&url)
    }

    pub fn load_url(&self, url: &Url) -> Result<Value, LoaderError> {
        debug!(reference = %url, "loading schema reference");
        let schema = match url.scheme() {
            "local" => self.load_local_reference(url)?,
            "blueprint" => self.load_blueprint_reference(url)?,
            _ => {
                return match &self.config.default_loader {
                    Some(loader) => loader.load(url),
                    None => Err(LoaderError::UnsupportedRef(url.to_string())),
                };
            }
        };
        validate_schema_document(url.as_str(), &schema)?;
        Ok(schema)
    }

    fn load_local_reference(&self, url: &Url) -> Result<Value, LoaderError> {
        if !url.path().is_empty() {
            return Err(LoaderError::LocalPath(url.to_string()));
        }
        let name = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| LoaderError::InvalidReference {
                reference: url.to_string(),
                reason: "missing type name".to_string(),
            })?;
        self.config
            .local_types
            .get(name)
            .cloned()
            .ok_or_else(|| LoaderError::LocalTypeNotFound(name.to_string()))
    }

    fn load_blueprint_reference(&self, url: &Url) -> Result<Value, LoaderError> {
        let fs = self
            .config
            .blueprint_fs
            .as_ref()
            .ok_or(LoaderError::NoFilesystem)?;
        let host = url.host_str().unwrap_or("");
        let file_path = Path::new(host).join(url.path().trim_start_matches('/'));
        let bytes = fs.read(&file_path).map_err(|source| LoaderError::Read {
            path: file_path.display().to_string(),
            source,
        })?;
        parse_schema_document(url.as_str(), &bytes)
    }
}

impl SchemaResolver for ReferenceLoader {
    fn resolve(
        &self,
        _root_schema: &Value,
        url: &Url,
        _original_reference: &str,
    ) -> Result<Arc<Value>, SchemaResolverError> {
        self.load_url(url).map(Arc::new).map_err(SchemaResolverError::new)
    }
}
