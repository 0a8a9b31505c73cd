//! Import status ledger
//!
//! Records, per installation, where each import was resolved from and the
//! fingerprint of the consumed value.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::checksum::Fingerprint;
use crate::error::{ImportError, Result};
use crate::installation::{ImportType, ObjectRef};

/// Provenance of one resolved import
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatusEntry {
    /// Local import name
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ImportType,
    /// Producing export or parent import the value came from
    pub from: String,
    /// Local name the value was written to
    pub to: String,
    /// Installation that produced the value
    pub source_ref: ObjectRef,
    /// Fingerprint of the value at resolution time
    pub config_generation: Fingerprint,
}

/// All import states of an installation
///
/// At most one entry exists per (kind, name).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStatus {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    data: BTreeMap<String, ImportStatusEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    target: BTreeMap<String, ImportStatusEntry>,
}

impl ImportStatus {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: ImportType) -> &BTreeMap<String, ImportStatusEntry> {
        match kind {
            ImportType::Data => &self.data,
            ImportType::Target => &self.target,
        }
    }

    /// Insert or overwrite the entry for the entry's kind and name
    pub fn update(&mut self, entry: ImportStatusEntry) {
        let map = match entry.kind {
            ImportType::Data => &mut self.data,
            ImportType::Target => &mut self.target,
        };
        map.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, kind: ImportType, name: &str) -> Option<&ImportStatusEntry> {
        self.map(kind).get(name)
    }

    /// Get the data import state for the given name
    pub fn get_data(&self, name: &str) -> Result<&ImportStatusEntry> {
        self.get(ImportType::Data, name)
            .ok_or_else(|| ImportError::Store(format!("import state {} not found", name)))
    }

    /// Get the target import state for the given name
    pub fn get_target(&self, name: &str) -> Result<&ImportStatusEntry> {
        self.get(ImportType::Target, name)
            .ok_or_else(|| ImportError::Store(format!("import state {} not found", name)))
    }

    /// All entries, data entries first, each group ordered by name
    pub fn entries(&self) -> impl Iterator<Item = &ImportStatusEntry> {
        self.data.values().chain(self.target.values())
    }

    pub fn len(&self) -> usize {
        self.data.len() + self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.target.is_empty()
    }

    /// Whether the recorded fingerprint differs from `current`
    ///
    /// A missing entry counts as stale.
    pub fn is_stale(&self, kind: ImportType, name: &str, current: &Fingerprint) -> bool {
        self.get(kind, name)
            .map(|entry| entry.config_generation != *current)
            .unwrap_or(true)
    }
}
