//! State Loading
//!
//! Loads an installation snapshot from a state directory. Every `.json`,
//! `.yaml` or `.yml` file holds one object or a list of objects, each tagged
//! with its `kind`:
//!
//! - `Installation` - an installation with metadata, spec and status
//! - `DataObject` - a data value exported or imported by an installation
//! - `Target` - a target exported or imported by an installation

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{GraphBuilder, InstallationGraph};
use crate::error::{ImportError, Result};
use crate::installation::{ExportValue, ImportType, Installation, ObjectRef, Target};
use crate::schema::Blueprint;

/// Configuration for state loading
#[derive(Debug, Clone)]
pub struct LoadConfig {
    /// Skip files matching these path prefixes
    pub skip_prefixes: Vec<String>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            skip_prefixes: vec![
                ".git/".to_string(),
                "blueprints/".to_string(),
            ],
        }
    }
}

/// Side of the owner a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ValueSource {
    #[default]
    Export,
    Import,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataObjectDocument {
    namespace: String,
    owner: String,
    /// External name for exports, local import name for imports
    name: String,
    #[serde(default)]
    source: ValueSource,
    value: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetDocument {
    namespace: String,
    owner: String,
    name: String,
    #[serde(default)]
    source: ValueSource,
    target: Target,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
enum StateObject {
    Installation(Installation),
    DataObject(DataObjectDocument),
    Target(TargetDocument),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StateDocument {
    Many(Vec<StateObject>),
    One(Box<StateObject>),
}

fn is_state_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("json") | Some("yaml") | Some("yml")
    )
}

fn parse_document(path: &Path, content: &[u8]) -> Result<Vec<StateObject>> {
    let document: StateDocument = serde_yaml::from_slice(content).map_err(|e| {
        ImportError::InvalidState(format!("failed to parse {}: {}", path.display(), e))
    })?;
    Ok(match document {
        StateDocument::Many(objects) => objects,
        StateDocument::One(object) => vec![*object],
    })
}

/// Load an installation snapshot from a state directory
pub fn load_state_directory(state_dir: &Path, config: &LoadConfig) -> Result<InstallationGraph> {
    if !state_dir.is_dir() {
        return Err(ImportError::Store(format!(
            "state directory {} does not exist",
            state_dir.display()
        )));
    }

    let mut builder = GraphBuilder::default();
    let mut files = 0usize;

    for entry in WalkDir::new(state_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || !is_state_file(path) {
            continue;
        }

        let relative = path.strip_prefix(state_dir).unwrap_or(path);
        let relative_str = relative.to_string_lossy().replace('\\', "/");
        if config.skip_prefixes.iter().any(|p| relative_str.starts_with(p)) {
            continue;
        }

        let content = fs::read(path)?;
        files += 1;
        for object in parse_document(path, &content)? {
            builder = add_object(builder, object);
        }
    }

    debug!(dir = %state_dir.display(), files, "loaded state directory");
    builder.build()
}

fn add_object(builder: GraphBuilder, object: StateObject) -> GraphBuilder {
    match object {
        StateObject::Installation(inst) => builder.installation(inst),
        StateObject::DataObject(doc) => {
            let owner = ObjectRef::new(doc.namespace, doc.owner);
            match doc.source {
                ValueSource::Export => builder.data_export(owner, doc.name, doc.value),
                ValueSource::Import => {
                    builder.materialized_import(owner, ImportType::Data, doc.name, doc.value)
                }
            }
        }
        StateObject::Target(doc) => {
            let owner = ObjectRef::new(doc.namespace, doc.owner);
            match doc.source {
                ValueSource::Export => builder.target_export(owner, doc.name, doc.target),
                ValueSource::Import => {
                    let value = ExportValue::Target(doc.target).to_json();
                    builder.materialized_import(owner, ImportType::Target, doc.name, value)
                }
            }
        }
    }
}

/// Load all blueprints below a directory, keyed by subdirectory name
pub fn load_blueprints(blueprint_dir: &Path) -> Result<BTreeMap<String, Blueprint>> {
    let mut blueprints = BTreeMap::new();
    if !blueprint_dir.is_dir() {
        warn!(dir = %blueprint_dir.display(), "blueprint directory does not exist");
        return Ok(blueprints);
    }

    for entry in fs::read_dir(blueprint_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let blueprint = Blueprint::from_directory(&path).map_err(|e| {
            ImportError::InvalidState(format!("invalid blueprint {}: {}", name, e))
        })?;
        blueprints.insert(name, blueprint);
    }
    Ok(blueprints)
}
