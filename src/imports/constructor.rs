//! Import Constructor
//!
//! Resolves every declared import of an installation, in declaration order
//! (data imports first, then target imports). A value is taken from the first
//! source that provides it:
//!
//! 1. a sibling exporting the import's `from` name under the same kind
//! 2. the parent's resolved import of that name (pass-through)
//! 3. the installation's own static data (data imports only)
//!
//! Data values are validated against their schema, targets against their
//! expected type. The result is either a complete configuration map with its
//! ledger or an error; a partial map is never returned.

use std::collections::{BTreeMap, BTreeSet};

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::checksum::Fingerprint;
use crate::context::Context;
use crate::error::{ImportError, Result};
use crate::graph::InstallationStore;
use crate::import_status::{ImportStatus, ImportStatusEntry};
use crate::installation::{ImportDefinition, ImportType, Installation, ObjectRef, Requirement};
use crate::schema::{validate_value, ReferenceLoader, ValidationFailure};

/// Flat configuration keyed by local import name
pub type ConfigMap = BTreeMap<String, Value>;

/// Result of a successful construction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Construction {
    pub values: ConfigMap,
    /// Ledger with one entry per resolved import
    pub import_status: ImportStatus,
}

impl Construction {
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Values with dotted keys expanded into nested objects
    ///
    /// `{"c.a": 1}` becomes `{"c": {"a": 1}}`. Fails when one key is a prefix
    /// of another, as in `c` and `c.a`.
    pub fn nested_values(&self) -> Result<Value> {
        let mut root = Map::new();
        for (key, value) in &self.values {
            let segments: Vec<&str> = key.split('.').collect();
            if !insert_path(&mut root, &segments, value.clone()) {
                return Err(ImportError::InvalidState(format!(
                    "import {} collides with another import when nesting dotted keys",
                    key
                )));
            }
        }
        Ok(Value::Object(root))
    }

    /// Whether every import resolved from the same source to the same value
    /// as recorded in `previous`
    pub fn is_unchanged_from(&self, previous: &ImportStatus) -> bool {
        self.import_status == *previous
    }
}

/// Insert `value` at `segments`; false if the path is already occupied
fn insert_path(map: &mut Map<String, Value>, segments: &[&str], value: Value) -> bool {
    match segments {
        [] => false,
        [last] => {
            if map.contains_key(*last) {
                return false;
            }
            map.insert(last.to_string(), value);
            true
        }
        [head, rest @ ..] => {
            let slot = map
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match slot {
                Value::Object(child) => insert_path(child, rest, value),
                _ => false,
            }
        }
    }
}

/// Caller-facing state of a resolution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionState {
    Resolved,
    /// Some source is not ready yet; retry on the next trigger
    Waiting,
    Failed,
}

/// A construct result classified for the caller's state machine
#[derive(Debug)]
pub enum ResolutionOutcome {
    Resolved(Construction),
    Waiting(ImportError),
    Failed(ImportError),
}

impl ResolutionOutcome {
    pub fn state(&self) -> ResolutionState {
        match self {
            ResolutionOutcome::Resolved(_) => ResolutionState::Resolved,
            ResolutionOutcome::Waiting(_) => ResolutionState::Waiting,
            ResolutionOutcome::Failed(_) => ResolutionState::Failed,
        }
    }

    pub fn construction(&self) -> Option<&Construction> {
        match self {
            ResolutionOutcome::Resolved(construction) => Some(construction),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ImportError> {
        match self {
            ResolutionOutcome::Resolved(_) => None,
            ResolutionOutcome::Waiting(err) | ResolutionOutcome::Failed(err) => Some(err),
        }
    }
}

impl From<Result<Construction>> for ResolutionOutcome {
    fn from(result: Result<Construction>) -> Self {
        match result {
            Ok(construction) => ResolutionOutcome::Resolved(construction),
            Err(err) if err.is_retryable() => ResolutionOutcome::Waiting(err),
            Err(err) => ResolutionOutcome::Failed(err),
        }
    }
}

/// Constructor behaviour switches
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstructorOptions {
    /// Stop at the first failing import instead of collecting all failures
    pub fail_fast: bool,
}

/// Where a resolved value came from
struct Resolved {
    value: Value,
    source_ref: ObjectRef,
}

/// Import constructor over one store snapshot
pub struct Constructor<'a, S: InstallationStore + ?Sized> {
    store: &'a S,
    loader: ReferenceLoader,
    options: ConstructorOptions,
}

impl<'a, S: InstallationStore + ?Sized> Constructor<'a, S> {
    pub fn new(store: &'a S, loader: ReferenceLoader) -> Self {
        Self {
            store,
            loader,
            options: ConstructorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ConstructorOptions) -> Self {
        self.options = options;
        self
    }

    /// Resolve and validate all imports of `installation` within `context`
    pub fn construct(&self, installation: &Installation, context: &Context) -> Result<Construction> {
        let reference = installation.object_ref();
        check_duplicates(installation)?;

        let mut construction = Construction::default();
        let mut errors = Vec::new();

        for def in installation.spec.imports.iter() {
            match self.resolve_import(installation, context, &def) {
                Ok(resolved) => {
                    debug!(
                        installation = %reference,
                        import = def.name,
                        kind = %def.kind,
                        source = %resolved.source_ref,
                        "resolved import"
                    );
                    construction.import_status.update(ImportStatusEntry {
                        name: def.name.to_string(),
                        kind: def.kind,
                        from: def.from.to_string(),
                        to: def.name.to_string(),
                        source_ref: resolved.source_ref,
                        config_generation: Fingerprint::from_json(&resolved.value),
                    });
                    construction.values.insert(def.name.to_string(), resolved.value);
                }
                Err(err) => {
                    if err.is_retryable() {
                        warn!(installation = %reference, import = def.name, error = %err, "import not ready");
                    } else {
                        debug!(installation = %reference, import = def.name, error = %err, "import failed");
                    }
                    if self.options.fail_fast {
                        return Err(err);
                    }
                    errors.push(err);
                }
            }
        }

        if !errors.is_empty() {
            return Err(combine_errors(errors));
        }

        info!(
            installation = %reference,
            imports = construction.values.len(),
            "constructed imports"
        );
        Ok(construction)
    }

    fn resolve_import(
        &self,
        installation: &Installation,
        context: &Context,
        def: &ImportDefinition<'_>,
    ) -> Result<Resolved> {
        let resolved = match self.from_siblings(installation, context, def)? {
            Some(resolved) => resolved,
            None => match self.from_parent(installation, context, def)? {
                Some(resolved) => resolved,
                None => from_static_data(installation, def)
                    .ok_or_else(|| not_found(installation, context, def))?,
            },
        };
        self.check_requirement(def, &resolved.value)?;
        Ok(resolved)
    }

    fn from_siblings(
        &self,
        installation: &Installation,
        context: &Context,
        def: &ImportDefinition<'_>,
    ) -> Result<Option<Resolved>> {
        let mut exporters = context
            .siblings
            .iter()
            .filter(|sibling| sibling.spec.exports.find(def.kind, def.from).is_some());
        let Some(sibling) = exporters.next() else {
            return Ok(None);
        };
        let others: Vec<&str> = exporters.map(|other| other.name()).collect();
        if !others.is_empty() {
            warn!(
                installation = %installation.object_ref(),
                import = def.name,
                chosen = sibling.name(),
                ignored = ?others,
                "multiple siblings export {} {}", def.kind, def.from
            );
        }

        let sibling_ref = sibling.object_ref();
        if !sibling.is_ready() {
            return Err(not_ready(
                installation,
                def,
                format!(
                    "sibling {} is {} (observed generation {} of {})",
                    sibling_ref,
                    sibling.status.phase,
                    sibling.status.observed_generation,
                    sibling.metadata.generation
                ),
            ));
        }

        let value = self
            .store
            .get_export_value(&sibling_ref, def.kind, def.from)?
            .ok_or_else(|| {
                not_ready(
                    installation,
                    def,
                    format!("export {} of sibling {} is not available yet", def.from, sibling_ref),
                )
            })?;
        Ok(Some(Resolved {
            value: value.to_json(),
            source_ref: sibling_ref,
        }))
    }

    fn from_parent(
        &self,
        installation: &Installation,
        context: &Context,
        def: &ImportDefinition<'_>,
    ) -> Result<Option<Resolved>> {
        let Some(parent) = &context.parent else {
            return Ok(None);
        };
        let parent_ref = parent.object_ref();

        let Some(entry) = parent.import_status().get(def.kind, def.from) else {
            if parent.spec.imports.declares(def.kind, def.from) {
                return Err(not_ready(
                    installation,
                    def,
                    format!("parent {} has not resolved its import {} yet", parent_ref, def.from),
                ));
            }
            return Ok(None);
        };

        let value = self
            .store
            .get_import_value(&parent_ref, def.kind, def.from)?
            .ok_or_else(|| {
                not_ready(
                    installation,
                    def,
                    format!("import {} of parent {} is not materialized", def.from, parent_ref),
                )
            })?;
        if !entry.config_generation.matches(&value) {
            return Err(not_ready(
                installation,
                def,
                format!(
                    "import {} of parent {} changed since it was resolved",
                    def.from, parent_ref
                ),
            ));
        }
        Ok(Some(Resolved {
            value,
            source_ref: parent_ref,
        }))
    }

    fn check_requirement(&self, def: &ImportDefinition<'_>, value: &Value) -> Result<()> {
        match def.requirement {
            Requirement::Schema(None) | Requirement::TargetType(None) => Ok(()),
            Requirement::Schema(Some(schema)) => match validate_value(schema, value, &self.loader) {
                Ok(()) => Ok(()),
                Err(ValidationFailure::Violations(violations)) => Err(ImportError::SchemaValidationFailed {
                    import: def.name.to_string(),
                    violations,
                }),
                Err(ValidationFailure::Loader(source)) => Err(ImportError::SchemaLoader {
                    import: def.name.to_string(),
                    source,
                }),
            },
            Requirement::TargetType(Some(expected)) => {
                let actual = value.get("type").and_then(Value::as_str);
                if actual == Some(expected) {
                    Ok(())
                } else {
                    Err(ImportError::SchemaValidationFailed {
                        import: def.name.to_string(),
                        violations: vec![format!(
                            "expected target type {:?}, got {:?}",
                            expected,
                            actual.unwrap_or("")
                        )],
                    })
                }
            }
        }
    }
}

fn from_static_data(installation: &Installation, def: &ImportDefinition<'_>) -> Option<Resolved> {
    if def.kind != ImportType::Data {
        return None;
    }
    installation.spec.static_data.get(def.from).map(|value| Resolved {
        value: value.clone(),
        source_ref: installation.object_ref(),
    })
}

fn check_duplicates(installation: &Installation) -> Result<()> {
    let mut seen = BTreeSet::new();
    for def in installation.spec.imports.iter() {
        if !seen.insert(def.name) {
            return Err(ImportError::DuplicateImport {
                name: def.name.to_string(),
            });
        }
    }
    Ok(())
}

/// Fatal errors win over not-ready ones; a single error is returned as is
fn combine_errors(errors: Vec<ImportError>) -> ImportError {
    let (retryable, fatal): (Vec<_>, Vec<_>) = errors.into_iter().partition(ImportError::is_retryable);
    let mut selected = if fatal.is_empty() { retryable } else { fatal };
    if selected.len() == 1 {
        selected.remove(0)
    } else {
        ImportError::Aggregate(selected)
    }
}

fn not_ready(installation: &Installation, def: &ImportDefinition<'_>, reason: String) -> ImportError {
    ImportError::ImportNotReady {
        installation: installation.object_ref(),
        import: def.name.to_string(),
        reason,
    }
}

fn not_found(installation: &Installation, context: &Context, def: &ImportDefinition<'_>) -> ImportError {
    ImportError::ImportNotFound {
        installation: installation.object_ref(),
        import: def.name.to_string(),
        from: def.from.to_string(),
        suggestion: suggest(def.from, candidates(installation, context, def.kind)),
    }
}

/// Names an import of `kind` could have been resolved from
fn candidates<'c>(installation: &'c Installation, context: &'c Context, kind: ImportType) -> BTreeSet<&'c str> {
    let mut names = BTreeSet::new();
    for sibling in &context.siblings {
        names.extend(sibling.spec.exports.of_kind(kind).iter().map(|e| e.exported_name()));
    }
    if let Some(parent) = &context.parent {
        names.extend(
            parent
                .import_status()
                .entries()
                .filter(|entry| entry.kind == kind)
                .map(|entry| entry.name.as_str()),
        );
    }
    if kind == ImportType::Data {
        names.extend(installation.spec.static_data.keys().map(String::as_str));
    }
    names
}

fn suggest(query: &str, candidates: BTreeSet<&str>) -> Option<String> {
    let matcher = SkimMatcherV2::default();
    let mut best: Option<(i64, &str)> = None;
    for candidate in candidates {
        if let Some(score) = matcher.fuzzy_match(candidate, query) {
            if best.map(|(top, _)| score > top).unwrap_or(true) {
                best = Some((score, candidate));
            }
        }
    }
    best.map(|(_, name)| name.to_string())
}
