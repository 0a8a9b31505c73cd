//! Import schemas
//!
//! Blueprints supply the schemas imports are validated against: a map of
//! locally defined types and a virtual filesystem with bundled schema files.
//! `loader` resolves `$ref`s into both, `validator` checks values.

pub mod loader;
pub mod validator;

pub use loader::{FallbackLoader, FileLoader, LoaderConfig, LoaderError, ReferenceLoader};
pub use validator::{validate_value, ValidationFailure};

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use jsonschema::{Draft, JSONSchema};
use serde::Deserialize;
use tracing::warn;

/// Read-only filesystem bundled with a blueprint
pub trait BlueprintFs: Send + Sync + fmt::Debug {
    /// Read a file, `path` is relative to the blueprint root
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Normalize a blueprint path, rejecting attempts to leave the root
fn normalize_path(path: &Path) -> io::Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("path {} escapes the blueprint root", path.display()),
                ));
            }
        }
    }
    Ok(normalized)
}

/// Blueprint filesystem rooted at a directory
#[derive(Debug, Clone)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlueprintFs for DirFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let relative = normalize_path(path)?;
        fs::read(self.root.join(relative))
    }
}

/// In-memory blueprint filesystem
#[derive(Debug, Clone, Default)]
pub struct MemoryFs {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file; leading slashes are ignored
    ///
    /// A path leaving the root through `..` is not added, so reading it later
    /// fails with `NotFound`.
    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<Vec<u8>>) -> Self {
        match normalize_path(path.as_ref()) {
            Ok(normalized) => {
                self.files.insert(normalized, contents.into());
            }
            Err(e) => warn!(path = %path.as_ref().display(), error = %e, "skipping blueprint file"),
        }
        self
    }
}

impl BlueprintFs for MemoryFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let normalized = normalize_path(path)?;
        self.files.get(&normalized).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file {} does not exist", normalized.display()),
            )
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlueprintDefinition {
    #[serde(default)]
    local_types: BTreeMap<String, serde_json::Value>,
}

/// Schema sources of one blueprint
#[derive(Clone, Default)]
pub struct Blueprint {
    /// Locally defined types, addressed as `local://<name>`
    pub local_types: BTreeMap<String, serde_json::Value>,
    /// Bundled files, addressed as `blueprint://<path>`
    pub fs: Option<Arc<dyn BlueprintFs>>,
}

impl fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blueprint")
            .field("local_types", &self.local_types.keys().collect::<Vec<_>>())
            .field("fs", &self.fs)
            .finish()
    }
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local_type(mut self, name: impl Into<String>, schema: serde_json::Value) -> Self {
        self.local_types.insert(name.into(), schema);
        self
    }

    pub fn with_fs(mut self, fs: impl BlueprintFs + 'static) -> Self {
        self.fs = Some(Arc::new(fs));
        self
    }

    /// Load a blueprint directory
    ///
    /// Local types are read from `blueprint.json` or `blueprint.yaml` if present;
    /// the directory itself becomes the blueprint filesystem.
    pub fn from_directory(dir: &Path) -> Result<Self, LoaderError> {
        let mut definition = BlueprintDefinition::default();
        for file_name in ["blueprint.json", "blueprint.yaml"] {
            let path = dir.join(file_name);
            if !path.is_file() {
                continue;
            }
            let content = fs::read(&path).map_err(|source| LoaderError::Read {
                path: path.display().to_string(),
                source,
            })?;
            definition = serde_yaml::from_slice(&content).map_err(|e| LoaderError::Parse {
                reference: path.display().to_string(),
                reason: e.to_string(),
            })?;
            break;
        }

        Ok(Self {
            local_types: definition.local_types,
            fs: Some(Arc::new(DirFs::new(dir))),
        })
    }
}

/// Parse raw schema bytes, JSON or YAML
pub fn parse_schema_document(reference: &str, bytes: &[u8]) -> Result<serde_json::Value, LoaderError> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Ok(value),
        Err(_) => serde_yaml::from_slice(bytes).map_err(|e| LoaderError::Parse {
            reference: reference.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Check that a document is itself a valid draft 7 JSON Schema
pub fn validate_schema_document(reference: &str, schema: &serde_json::Value) -> Result<(), LoaderError> {
    if !schema.is_object() && !schema.is_boolean() {
        return Err(LoaderError::InvalidSchema {
            reference: reference.to_string(),
            reason: "a schema must be an object or a boolean".to_string(),
        });
    }
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(schema)
        .map(|_| ())
        .map_err(|e| LoaderError::InvalidSchema {
            reference: reference.to_string(),
            reason: e.to_string(),
        })
}
