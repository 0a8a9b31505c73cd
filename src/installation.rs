//! Installation types
//!
//! The logical shape of installations as the resolver sees them: identity,
//! parent link, declared imports and exports, static data and status.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ImportError, Result};
use crate::import_status::ImportStatus;

/// Object names follow the DNS-1123 subdomain rules of the backing store
fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("static name pattern is valid")
    })
}

/// Check that a name is usable as an object name
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 253 || !name_pattern().is_match(name) {
        return Err(ImportError::InvalidState(format!(
            "invalid object name {:?}: must be a lowercase DNS-1123 subdomain",
            name
        )));
    }
    Ok(())
}

/// Identity of an object in the backing store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse a `namespace/name` reference
    pub fn parse(value: &str) -> Result<Self> {
        let (namespace, name) = value.split_once('/').ok_or_else(|| {
            ImportError::InvalidState(format!(
                "invalid reference {:?}: expected <namespace>/<name>",
                value
            ))
        })?;
        validate_name(namespace)?;
        validate_name(name)?;
        Ok(Self::new(namespace, name))
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Kind of an import or export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ImportType {
    /// Arbitrary structured data
    Data,
    /// Reference to an external addressable resource
    Target,
}

impl fmt::Display for ImportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportType::Data => write!(f, "data"),
            ImportType::Target => write!(f, "target"),
        }
    }
}

/// Lifecycle phase of an installation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Pending,
    Progressing,
    Succeeded,
    Failed,
    Deleting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Phase::Pending => "Pending",
            Phase::Progressing => "Progressing",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::Deleting => "Deleting",
        };
        f.write_str(phase)
    }
}

/// Store metadata of an installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    /// Incremented on every spec change
    #[serde(default = "default_generation")]
    pub generation: i64,
    /// Name of the owning installation in the same namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

fn default_generation() -> i64 {
    1
}

/// A data import declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataImport {
    /// Local name, used as the configuration key
    pub name: String,
    /// External source name (defaults to the local name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// JSON Schema the resolved value must satisfy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

/// A target import declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetImport {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Expected type of the imported target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<String>,
}

/// All imports of an installation, split by kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportDeclarations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<DataImport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<TargetImport>,
}

impl ImportDeclarations {
    pub fn len(&self) -> usize {
        self.data.len() + self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.targets.is_empty()
    }

    /// Iterate all declarations, data imports first
    pub fn iter(&self) -> impl Iterator<Item = ImportDefinition<'_>> {
        let data = self.data.iter().map(|import| ImportDefinition {
            kind: ImportType::Data,
            name: &import.name,
            from: import.from.as_deref().unwrap_or(&import.name),
            requirement: Requirement::Schema(import.schema.as_ref()),
        });
        let targets = self.targets.iter().map(|import| ImportDefinition {
            kind: ImportType::Target,
            name: &import.name,
            from: import.from.as_deref().unwrap_or(&import.name),
            requirement: Requirement::TargetType(import.target_type.as_deref()),
        });
        data.chain(targets)
    }

    /// Whether an import of the given kind and local name is declared
    pub fn declares(&self, kind: ImportType, name: &str) -> bool {
        self.iter().any(|def| def.kind == kind && def.name == name)
    }
}

/// What a resolved value has to satisfy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Requirement<'a> {
    Schema(Option<&'a serde_json::Value>),
    TargetType(Option<&'a str>),
}

/// Borrowed, kind-independent view of one import declaration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportDefinition<'a> {
    pub kind: ImportType,
    /// Local name
    pub name: &'a str,
    /// External source name
    pub from: &'a str,
    pub requirement: Requirement<'a>,
}

/// An export of a locally produced value under an external name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportBinding {
    /// Local name of the produced value
    pub name: String,
    /// External name (defaults to the local name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl ExportBinding {
    pub fn exported_name(&self) -> &str {
        self.to.as_deref().unwrap_or(&self.name)
    }
}

/// All exports of an installation, split by kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDeclarations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<ExportBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<ExportBinding>,
}

impl ExportDeclarations {
    pub fn of_kind(&self, kind: ImportType) -> &[ExportBinding] {
        match kind {
            ImportType::Data => &self.data,
            ImportType::Target => &self.targets,
        }
    }

    /// Find the export of the given kind published under `external_name`
    pub fn find(&self, kind: ImportType, external_name: &str) -> Option<&ExportBinding> {
        self.of_kind(kind)
            .iter()
            .find(|export| export.exported_name() == external_name)
    }
}

/// Desired state of an installation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSpec {
    /// Name of the blueprint supplying local types and schema files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint: Option<String>,
    #[serde(default)]
    pub imports: ImportDeclarations,
    #[serde(default)]
    pub exports: ExportDeclarations,
    /// Values this installation provides to its own imports
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub static_data: BTreeMap<String, serde_json::Value>,
}

/// Observed state of an installation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub import_status: ImportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_import_resolution: Option<DateTime<Utc>>,
}

/// A node in the installation forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installation {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: InstallationSpec,
    #[serde(default)]
    pub status: InstallationStatus,
}

impl Installation {
    /// Create a root installation with an empty spec
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                generation: default_generation(),
                parent: None,
            },
            spec: InstallationSpec::default(),
            status: InstallationStatus::default(),
        }
    }

    /// Set the owning installation
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.metadata.parent = Some(parent.into());
        self
    }

    /// Declare a data import
    pub fn import_data(
        mut self,
        name: impl Into<String>,
        from: impl Into<String>,
        schema: Option<serde_json::Value>,
    ) -> Self {
        self.spec.imports.data.push(DataImport {
            name: name.into(),
            from: Some(from.into()),
            schema,
        });
        self
    }

    /// Declare a target import
    pub fn import_target(
        mut self,
        name: impl Into<String>,
        from: impl Into<String>,
        target_type: Option<String>,
    ) -> Self {
        self.spec.imports.targets.push(TargetImport {
            name: name.into(),
            from: Some(from.into()),
            target_type,
        });
        self
    }

    /// Declare an export of the given kind
    pub fn export(mut self, kind: ImportType, name: impl Into<String>, to: impl Into<String>) -> Self {
        let binding = ExportBinding {
            name: name.into(),
            to: Some(to.into()),
        };
        match kind {
            ImportType::Data => self.spec.exports.data.push(binding),
            ImportType::Target => self.spec.exports.targets.push(binding),
        }
        self
    }

    /// Add a static data value
    pub fn static_value(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.spec.static_data.insert(key.into(), value);
        self
    }

    /// Mark the installation as succeeded for its current generation
    pub fn succeeded(mut self) -> Self {
        self.status.phase = Phase::Succeeded;
        self.status.observed_generation = self.metadata.generation;
        self
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(&self.metadata.namespace, &self.metadata.name)
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn is_root(&self) -> bool {
        self.metadata.parent.is_none()
    }

    /// Reference to the parent, which always shares this installation's namespace
    pub fn parent_ref(&self) -> Option<ObjectRef> {
        self.metadata
            .parent
            .as_ref()
            .map(|parent| ObjectRef::new(&self.metadata.namespace, parent))
    }

    /// Whether the exported values reflect the current spec
    pub fn is_ready(&self) -> bool {
        self.status.phase == Phase::Succeeded
            && self.status.observed_generation == self.metadata.generation
    }

    pub fn import_status(&self) -> &ImportStatus {
        &self.status.import_status
    }
}

/// A target value exported by an installation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub name: String,
    #[serde(rename = "type")]
    pub target_type: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A value produced by an installation's export
#[derive(Debug, Clone, PartialEq)]
pub enum ExportValue {
    Data(serde_json::Value),
    Target(Target),
}

impl ExportValue {
    pub fn kind(&self) -> ImportType {
        match self {
            ExportValue::Data(_) => ImportType::Data,
            ExportValue::Target(_) => ImportType::Target,
        }
    }

    /// The value as it appears in a configuration map
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ExportValue::Data(value) => value.clone(),
            ExportValue::Target(target) => serde_json::json!({
                "name": target.name,
                "type": target.target_type,
                "config": target.config,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_ref() {
        let reference = ObjectRef::parse("test1/root").unwrap();
        assert_eq!(reference, ObjectRef::new("test1", "root"));
        assert_eq!(reference.to_string(), "test1/root");

        assert!(ObjectRef::parse("root").is_err());
        assert!(ObjectRef::parse("Test1/root").is_err());
        assert!(ObjectRef::parse("test1/").is_err());
    }

    #[test]
    fn test_import_iteration_order_and_defaults() {
        let mut inst = Installation::new("default", "a")
            .import_target("cluster", "cluster", Some("kubernetes".to_string()))
            .import_data("a.b", "b", None);
        inst.spec.imports.data.push(DataImport {
            name: "plain".to_string(),
            from: None,
            schema: None,
        });

        let defs: Vec<_> = inst.spec.imports.iter().collect();
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[0].name, "a.b");
        assert_eq!(defs[0].from, "b");
        assert_eq!(defs[1].from, "plain");
        assert_eq!(defs[2].kind, ImportType::Target);
        assert_eq!(defs[2].requirement, Requirement::TargetType(Some("kubernetes")));
    }

    #[test]
    fn test_readiness_tracks_generation() {
        let mut inst = Installation::new("default", "a").succeeded();
        assert!(inst.is_ready());

        inst.metadata.generation += 1;
        assert!(!inst.is_ready());
    }

    #[test]
    fn test_deserialize_installation() {
        let inst: Installation = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "b", "namespace": "test2", "parent": "root" },
            "spec": {
                "imports": { "data": [{ "name": "b.a", "from": "a" }] },
                "exports": { "targets": [{ "name": "cluster", "to": "shared-cluster" }] }
            },
            "status": { "phase": "Succeeded", "observedGeneration": 1 }
        }))
        .unwrap();

        assert_eq!(inst.parent_ref(), Some(ObjectRef::new("test2", "root")));
        assert_eq!(inst.metadata.generation, 1);
        assert!(inst.is_ready());
        assert!(inst.spec.exports.find(ImportType::Target, "shared-cluster").is_some());
        assert!(inst.spec.exports.find(ImportType::Data, "shared-cluster").is_none());
    }
}
