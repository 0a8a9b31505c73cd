//! Templating
//!
//! Resolved imports feed template executions that produce import bindings,
//! deploy items, exports and subinstallations. Engines implement
//! [`Templater`]; [`Templating`] dispatches a list of executors to the engine
//! registered for each executor's type and merges the outputs.

pub mod deadline;
pub mod error;
pub mod gotemplate;

pub use deadline::{run_with_deadline, CancellationToken};
pub use error::{TemplateError, TemplateInputFormatter};
pub use gotemplate::GoTemplater;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::schema::Blueprint;

/// Default wall-clock limit of a single template execution
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Template engine tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateType {
    GoTemplate,
    Spiff,
    Starlark,
}

impl fmt::Display for TemplateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateType::GoTemplate => write!(f, "GoTemplate"),
            TemplateType::Spiff => write!(f, "Spiff"),
            TemplateType::Starlark => write!(f, "Starlark"),
        }
    }
}

/// What a template execution produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionKind {
    ImportExecutions,
    DeployExecutions,
    ExportExecutions,
    SubinstallationExecutions,
}

impl ExecutionKind {
    pub fn template_name(&self) -> &'static str {
        match self {
            ExecutionKind::ImportExecutions => "import_executions",
            ExecutionKind::DeployExecutions => "deploy_executions",
            ExecutionKind::ExportExecutions => "export_executions",
            ExecutionKind::SubinstallationExecutions => "subinstallation_executions",
        }
    }

    /// Key of the rendered document holding the output
    pub fn output_key(&self) -> &'static str {
        match self {
            ExecutionKind::ImportExecutions => "imports",
            ExecutionKind::DeployExecutions => "deployItems",
            ExecutionKind::ExportExecutions => "exports",
            ExecutionKind::SubinstallationExecutions => "subinstallations",
        }
    }
}

/// Component version a blueprint is rendered for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentVersion {
    pub name: String,
    pub version: semver::Version,
}

/// One template execution of a blueprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateExecutor {
    pub name: String,
    #[serde(rename = "type")]
    pub template_type: TemplateType,
    /// Inline template source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Template file in the blueprint filesystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl TemplateExecutor {
    /// Template source, inline or read from the blueprint filesystem
    pub fn source(&self, blueprint: &Blueprint) -> Result<String, TemplateError> {
        if let Some(template) = &self.template {
            return Ok(template.clone());
        }
        let Some(file) = &self.file else {
            return Err(TemplateError::NoTemplate(self.name.clone()));
        };
        let fs = blueprint
            .fs
            .as_ref()
            .ok_or_else(|| TemplateError::NoFilesystem(file.clone()))?;
        let bytes = fs.read(Path::new(file)).map_err(|source| TemplateError::TemplateFile {
            path: file.clone(),
            source,
        })?;
        String::from_utf8(bytes).map_err(|e| TemplateError::Decode(e.to_string()))
    }
}

/// Everything a template is rendered with
#[derive(Debug, Clone, Default)]
pub struct TemplateInput {
    pub blueprint: Blueprint,
    pub component_version: Option<ComponentVersion>,
    pub component_versions: Vec<ComponentVersion>,
    /// Template context, usually an object with `imports` and friends
    pub values: Value,
}

/// A template engine
pub trait Templater: Send + Sync {
    fn template_type(&self) -> TemplateType;

    /// Render `source` and return the output stored under the kind's key
    fn execute(
        &self,
        kind: ExecutionKind,
        source: &str,
        input: &TemplateInput,
        cancel: &CancellationToken,
    ) -> Result<Value, TemplateError>;

    fn template_import_executions(&self, source: &str, input: &TemplateInput) -> Result<Value, TemplateError> {
        self.execute(ExecutionKind::ImportExecutions, source, input, &CancellationToken::new())
    }

    fn template_deploy_executions(&self, source: &str, input: &TemplateInput) -> Result<Value, TemplateError> {
        self.execute(ExecutionKind::DeployExecutions, source, input, &CancellationToken::new())
    }

    fn template_export_executions(&self, source: &str, input: &TemplateInput) -> Result<Value, TemplateError> {
        self.execute(ExecutionKind::ExportExecutions, source, input, &CancellationToken::new())
    }

    fn template_subinstallation_executions(
        &self,
        source: &str,
        input: &TemplateInput,
    ) -> Result<Value, TemplateError> {
        self.execute(
            ExecutionKind::SubinstallationExecutions,
            source,
            input,
            &CancellationToken::new(),
        )
    }
}

/// Registry of template engines
#[derive(Clone)]
pub struct Templating {
    templaters: Vec<Arc<dyn Templater>>,
    timeout: Duration,
}

impl fmt::Debug for Templating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<TemplateType> = self.templaters.iter().map(|t| t.template_type()).collect();
        f.debug_struct("Templating")
            .field("templaters", &types)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for Templating {
    fn default() -> Self {
        Self::new()
    }
}

impl Templating {
    pub fn new() -> Self {
        Self {
            templaters: Vec::new(),
            timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    /// Register an engine; a later engine of the same type wins
    pub fn with_templater(mut self, templater: impl Templater + 'static) -> Self {
        let templater: Arc<dyn Templater> = Arc::new(templater);
        self.templaters
            .retain(|existing| existing.template_type() != templater.template_type());
        self.templaters.push(templater);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn templater(&self, template_type: TemplateType) -> Result<Arc<dyn Templater>, TemplateError> {
        self.templaters
            .iter()
            .find(|t| t.template_type() == template_type)
            .cloned()
            .ok_or(TemplateError::UnsupportedTemplateType(template_type))
    }

    /// Run all executors in order and merge their outputs
    ///
    /// Arrays are concatenated, objects merged key by key with later
    /// executors winning, null outputs skipped.
    pub fn execute(
        &self,
        kind: ExecutionKind,
        executors: &[TemplateExecutor],
        input: &TemplateInput,
    ) -> Result<Value, TemplateError> {
        let input = Arc::new(input.clone());
        let mut merged = Value::Null;

        for executor in executors {
            let templater = self.templater(executor.template_type)?;
            let source = executor.source(&input.blueprint)?;
            let job_input = Arc::clone(&input);

            debug!(executor = %executor.name, template_type = %executor.template_type, kind = kind.template_name(), "executing template");
            let output = run_with_deadline(&executor.name, self.timeout, move |cancel| {
                templater.execute(kind, &source, &job_input, &cancel)
            })?;
            merged = merge_outputs(merged, output);
        }
        Ok(merged)
    }

    pub fn template_import_executions(
        &self,
        executors: &[TemplateExecutor],
        input: &TemplateInput,
    ) -> Result<Value, TemplateError> {
        self.execute(ExecutionKind::ImportExecutions, executors, input)
    }

    pub fn template_deploy_executions(
        &self,
        executors: &[TemplateExecutor],
        input: &TemplateInput,
    ) -> Result<Value, TemplateError> {
        self.execute(ExecutionKind::DeployExecutions, executors, input)
    }

    pub fn template_export_executions(
        &self,
        executors: &[TemplateExecutor],
        input: &TemplateInput,
    ) -> Result<Value, TemplateError> {
        self.execute(ExecutionKind::ExportExecutions, executors, input)
    }

    pub fn template_subinstallation_executions(
        &self,
        executors: &[TemplateExecutor],
        input: &TemplateInput,
    ) -> Result<Value, TemplateError> {
        self.execute(ExecutionKind::SubinstallationExecutions, executors, input)
    }
}

fn merge_outputs(current: Value, next: Value) -> Value {
    match (current, next) {
        (current, Value::Null) => current,
        (Value::Array(mut items), Value::Array(more)) => {
            items.extend(more);
            Value::Array(items)
        }
        (Value::Object(mut map), Value::Object(more)) => {
            map.extend(more);
            Value::Object(map)
        }
        (_, next) => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::MemoryFs;
    use serde_json::json;

    fn executor(name: &str, template_type: TemplateType, template: &str) -> TemplateExecutor {
        TemplateExecutor {
            name: name.to_string(),
            template_type,
            template: Some(template.to_string()),
            file: None,
        }
    }

    fn input() -> TemplateInput {
        TemplateInput {
            values: json!({"imports": {"port": 80, "host": "db"}}),
            ..TemplateInput::default()
        }
    }

    #[test]
    fn test_unknown_template_type() {
        let templating = Templating::new().with_templater(GoTemplater::default());
        let executors = vec![executor("spiff", TemplateType::Spiff, "deployItems: []")];

        let err = templating
            .template_deploy_executions(&executors, &input())
            .unwrap_err();
        assert!(matches!(err, TemplateError::UnsupportedTemplateType(TemplateType::Spiff)));
    }

    #[test]
    fn test_outputs_are_merged_in_order() {
        let templating = Templating::new().with_templater(GoTemplater::default());
        let executors = vec![
            executor("first", TemplateType::GoTemplate, "deployItems:\n- name: a\n  port: {{ imports.port }}\n"),
            executor("second", TemplateType::GoTemplate, "deployItems:\n- name: b\n  host: {{ imports.host }}\n"),
        ];

        let output = templating
            .template_deploy_executions(&executors, &input())
            .unwrap();
        assert_eq!(
            output,
            json!([{"name": "a", "port": 80}, {"name": "b", "host": "db"}])
        );
    }

    #[test]
    fn test_template_from_blueprint_file() {
        let blueprint = Blueprint::new().with_fs(
            MemoryFs::new().with_file("templates/exports.yaml", "exports:\n  url: http://{{ imports.host }}\n"),
        );
        let executor = TemplateExecutor {
            name: "file".to_string(),
            template_type: TemplateType::GoTemplate,
            template: None,
            file: Some("templates/exports.yaml".to_string()),
        };
        let input = TemplateInput {
            blueprint,
            ..input()
        };

        let output = Templating::new()
            .with_templater(GoTemplater::default())
            .template_export_executions(&[executor], &input)
            .unwrap();
        assert_eq!(output, json!({"url": "http://db"}));
    }

    #[test]
    fn test_executor_without_template() {
        let executor = TemplateExecutor {
            name: "empty".to_string(),
            template_type: TemplateType::GoTemplate,
            template: None,
            file: None,
        };
        assert!(matches!(
            executor.source(&Blueprint::new()),
            Err(TemplateError::NoTemplate(name)) if name == "empty"
        ));
    }

    #[test]
    fn test_executor_deserializes_type_tag() {
        let executor: TemplateExecutor = serde_json::from_value(json!({
            "name": "deploy",
            "type": "GoTemplate",
            "file": "deploy.yaml"
        }))
        .unwrap();
        assert_eq!(executor.template_type, TemplateType::GoTemplate);
    }
}
