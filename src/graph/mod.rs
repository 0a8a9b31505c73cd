//! Installation Graph
//!
//! In-memory snapshot of the installation forest using petgraph for parent
//! links, with HashMap indexes for lookups by reference. Alongside the
//! installations it holds the values they export and the imports they have
//! materialized, so one snapshot is a complete read model for a resolution
//! pass.
//!
//! The snapshot implements the store accessor interface the resolver reads
//! through ([`InstallationStore`]) and the write-back interface used after a
//! successful construction ([`ImportStatusWriter`]).

pub mod loader;

pub use loader::{load_blueprints, load_state_directory, LoadConfig};

use chrono::Utc;
use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::error::{ImportError, Result};
use crate::imports::Construction;
use crate::installation::{validate_name, ExportValue, ImportType, Installation, ObjectRef, Target};

/// Read access to installations and their values
///
/// Implementations may be backed by a remote, eventually consistent store.
/// Missing objects are `Ok(None)`; `Err` is reserved for store failures.
pub trait InstallationStore {
    /// All installations of a namespace, in a stable order
    fn list_installations(&self, namespace: &str) -> Result<Vec<Installation>>;

    fn get_installation(&self, reference: &ObjectRef) -> Result<Option<Installation>>;

    /// Value exported by `owner` under the external name `name`
    fn get_export_value(
        &self,
        owner: &ObjectRef,
        kind: ImportType,
        name: &str,
    ) -> Result<Option<ExportValue>>;

    /// Value `owner` resolved for its import `name` in its last construction
    fn get_import_value(&self, owner: &ObjectRef, kind: ImportType, name: &str) -> Result<Option<Value>>;
}

/// Write-back of resolution results
pub trait ImportStatusWriter {
    /// Persist the ledger and materialized imports of a successful construction
    fn record_construction(&mut self, reference: &ObjectRef, construction: &Construction) -> Result<()>;
}

type ValueKey = (ObjectRef, ImportType, String);

/// Snapshot of installations with their exported and imported values
#[derive(Debug, Clone, Default)]
pub struct InstallationGraph {
    /// Parent -> child edges
    pub(crate) graph: DiGraph<ObjectRef, ()>,

    /// Installations ordered by namespace, then name
    pub(crate) installations: BTreeMap<ObjectRef, Installation>,

    /// Node index lookup: reference -> NodeIndex
    pub(crate) node_indices: HashMap<ObjectRef, NodeIndex>,

    /// Exported values keyed by (owner, kind, external name)
    pub(crate) exports: BTreeMap<ValueKey, ExportValue>,

    /// Materialized imports keyed by (owner, kind, local name)
    pub(crate) imports: BTreeMap<ValueKey, Value>,
}

impl InstallationGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    /// Get installation count
    pub fn len(&self) -> usize {
        self.installations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installations.is_empty()
    }

    pub fn get(&self, reference: &ObjectRef) -> Option<&Installation> {
        self.installations.get(reference)
    }

    /// All installations in reference order
    pub fn installations(&self) -> impl Iterator<Item = &Installation> {
        self.installations.values()
    }

    /// Direct children of an installation, ordered by name
    pub fn children(&self, reference: &ObjectRef) -> Vec<&Installation> {
        let Some(&idx) = self.node_indices.get(reference) else {
            return Vec::new();
        };
        let mut children: Vec<&Installation> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .filter_map(|child| self.graph.node_weight(child))
            .filter_map(|child| self.installations.get(child))
            .collect();
        children.sort_by(|a, b| a.name().cmp(b.name()));
        children
    }

    /// Parent-first order over all installations
    ///
    /// Roots come in reference order, each followed by its subtree with
    /// children ordered by name.
    pub fn resolution_order(&self) -> Vec<ObjectRef> {
        let mut order = Vec::with_capacity(self.installations.len());
        let mut stack: Vec<&Installation> = self
            .installations
            .values()
            .filter(|inst| inst.is_root() || !self.has_parent_node(inst))
            .rev()
            .collect();
        while let Some(inst) = stack.pop() {
            order.push(inst.object_ref());
            stack.extend(self.children(&inst.object_ref()).into_iter().rev());
        }
        order
    }

    fn has_parent_node(&self, inst: &Installation) -> bool {
        inst.parent_ref()
            .map(|parent| self.node_indices.contains_key(&parent))
            .unwrap_or(false)
    }

    /// Publish an exported value, replacing an existing one
    pub fn insert_export(&mut self, owner: &ObjectRef, name: impl Into<String>, value: ExportValue) -> Result<()> {
        if !self.installations.contains_key(owner) {
            return Err(ImportError::Store(format!("installation {} not found", owner)));
        }
        self.exports.insert((owner.clone(), value.kind(), name.into()), value);
        Ok(())
    }

    /// Remove an installation together with all of its descendants
    ///
    /// Returns the removed references in reference order.
    pub fn remove_cascading(&mut self, reference: &ObjectRef) -> Vec<ObjectRef> {
        let Some(&start) = self.node_indices.get(reference) else {
            return Vec::new();
        };

        let mut removed = BTreeSet::new();
        let mut dfs = Dfs::new(&self.graph, start);
        while let Some(idx) = dfs.next(&self.graph) {
            if let Some(node) = self.graph.node_weight(idx) {
                removed.insert(node.clone());
            }
        }

        for node in &removed {
            self.installations.remove(node);
        }
        self.exports.retain(|(owner, _, _), _| !removed.contains(owner));
        self.imports.retain(|(owner, _, _), _| !removed.contains(owner));
        self.reindex();

        debug!(installation = %reference, removed = removed.len(), "removed installation subtree");
        removed.into_iter().collect()
    }

    /// Rebuild graph and index from the installation map
    fn reindex(&mut self) {
        let (graph, node_indices) = build_parent_graph(self.installations.values());
        self.graph = graph;
        self.node_indices = node_indices;
    }
}

fn build_parent_graph<'a>(
    installations: impl Iterator<Item = &'a Installation>,
) -> (DiGraph<ObjectRef, ()>, HashMap<ObjectRef, NodeIndex>) {
    let installations: Vec<&Installation> = installations.collect();
    let mut graph = DiGraph::with_capacity(installations.len(), installations.len());
    let mut node_indices = HashMap::with_capacity(installations.len());

    for inst in &installations {
        let reference = inst.object_ref();
        let idx = graph.add_node(reference.clone());
        node_indices.insert(reference, idx);
    }
    for inst in &installations {
        if let Some(parent) = inst.parent_ref() {
            if let (Some(&from), Some(&to)) = (node_indices.get(&parent), node_indices.get(&inst.object_ref())) {
                graph.add_edge(from, to, ());
            }
        }
    }
    (graph, node_indices)
}

impl InstallationStore for InstallationGraph {
    fn list_installations(&self, namespace: &str) -> Result<Vec<Installation>> {
        Ok(self
            .installations
            .values()
            .filter(|inst| inst.namespace() == namespace)
            .cloned()
            .collect())
    }

    fn get_installation(&self, reference: &ObjectRef) -> Result<Option<Installation>> {
        Ok(self.installations.get(reference).cloned())
    }

    fn get_export_value(
        &self,
        owner: &ObjectRef,
        kind: ImportType,
        name: &str,
    ) -> Result<Option<ExportValue>> {
        Ok(self.exports.get(&(owner.clone(), kind, name.to_string())).cloned())
    }

    fn get_import_value(&self, owner: &ObjectRef, kind: ImportType, name: &str) -> Result<Option<Value>> {
        Ok(self.imports.get(&(owner.clone(), kind, name.to_string())).cloned())
    }
}

impl ImportStatusWriter for InstallationGraph {
    fn record_construction(&mut self, reference: &ObjectRef, construction: &Construction) -> Result<()> {
        let inst = self
            .installations
            .get_mut(reference)
            .ok_or_else(|| ImportError::Store(format!("installation {} not found", reference)))?;
        inst.status.import_status = construction.import_status.clone();
        inst.status.last_import_resolution = Some(Utc::now());

        self.imports.retain(|(owner, _, _), _| owner != reference);
        for entry in construction.import_status.entries() {
            let value = construction.values.get(&entry.to).cloned().ok_or_else(|| {
                ImportError::InvalidState(format!(
                    "construction of {} has no value for import {}",
                    reference, entry.name
                ))
            })?;
            self.imports
                .insert((reference.clone(), entry.kind, entry.name.clone()), value);
        }
        Ok(())
    }
}

/// Collects installations and values, then validates them into a snapshot
#[derive(Debug, Default)]
pub struct GraphBuilder {
    installations: Vec<Installation>,
    exports: Vec<(ValueKey, ExportValue)>,
    imports: Vec<(ValueKey, Value)>,
}

impl GraphBuilder {
    pub fn installation(mut self, installation: Installation) -> Self {
        self.installations.push(installation);
        self
    }

    /// Data exported by `owner` under the external name `name`
    pub fn data_export(mut self, owner: ObjectRef, name: impl Into<String>, value: Value) -> Self {
        self.exports
            .push(((owner, ImportType::Data, name.into()), ExportValue::Data(value)));
        self
    }

    /// Target exported by `owner` under the external name `name`
    pub fn target_export(mut self, owner: ObjectRef, name: impl Into<String>, target: Target) -> Self {
        self.exports
            .push(((owner, ImportType::Target, name.into()), ExportValue::Target(target)));
        self
    }

    /// Import value `owner` has already materialized
    pub fn materialized_import(
        mut self,
        owner: ObjectRef,
        kind: ImportType,
        name: impl Into<String>,
        value: Value,
    ) -> Self {
        self.imports.push(((owner, kind, name.into()), value));
        self
    }

    /// Validate and build the snapshot
    ///
    /// Fails on invalid names, duplicate installations, self-parents, parent
    /// cycles and values owned by unknown installations. Parents missing from
    /// the snapshot are allowed; resolving such a child's context fails.
    pub fn build(self) -> Result<InstallationGraph> {
        let mut installations = BTreeMap::new();
        for inst in self.installations {
            validate_name(inst.namespace())?;
            validate_name(inst.name())?;
            if let Some(parent) = &inst.metadata.parent {
                validate_name(parent)?;
                if parent == inst.name() {
                    return Err(ImportError::InvalidState(format!(
                        "installation {} is its own parent",
                        inst.object_ref()
                    )));
                }
            }
            let reference = inst.object_ref();
            if installations.insert(reference.clone(), inst).is_some() {
                return Err(ImportError::InvalidState(format!(
                    "installation {} is defined more than once",
                    reference
                )));
            }
        }

        let (graph, node_indices) = build_parent_graph(installations.values());

        let cycles: Vec<Vec<String>> = kosaraju_scc(&graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut members: Vec<String> = scc
                    .into_iter()
                    .filter_map(|idx| graph.node_weight(idx).map(|r| r.to_string()))
                    .collect();
                members.sort();
                members
            })
            .collect();
        if let Some(members) = cycles.first() {
            return Err(ImportError::InvalidState(format!(
                "installations form a parent cycle: {}",
                members.join(" -> ")
            )));
        }

        let mut exports = BTreeMap::new();
        for (key, value) in self.exports {
            ensure_owner(&installations, &key.0, "export")?;
            exports.insert(key, value);
        }
        let mut imports = BTreeMap::new();
        for (key, value) in self.imports {
            ensure_owner(&installations, &key.0, "import")?;
            imports.insert(key, value);
        }

        debug!(
            installations = installations.len(),
            exports = exports.len(),
            imports = imports.len(),
            "built installation graph"
        );

        Ok(InstallationGraph {
            graph,
            installations,
            node_indices,
            exports,
            imports,
        })
    }
}

fn ensure_owner(
    installations: &BTreeMap<ObjectRef, Installation>,
    owner: &ObjectRef,
    what: &str,
) -> Result<()> {
    if installations.contains_key(owner) {
        Ok(())
    } else {
        Err(ImportError::InvalidState(format!(
            "{} value owned by unknown installation {}",
            what, owner
        )))
    }
}
