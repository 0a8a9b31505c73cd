//! Go-template style engine
//!
//! Uses minijinja with strict undefined handling. The rendered text is decoded
//! as YAML and the output is read from the execution kind's key.
//!
//! The template context is the input values object, plus:
//! - `cd` - the component version, if any
//! - `components` - all component versions

use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use serde_json::{Map, Value};

use super::{CancellationToken, ExecutionKind, TemplateError, TemplateInput, TemplateInputFormatter, TemplateType, Templater};

/// Top-level input keys hidden in error messages by default
pub const DEFAULT_SENSITIVE_KEYS: [&str; 3] = ["imports", "values", "state"];

pub struct GoTemplater {
    env: Environment<'static>,
    formatter: TemplateInputFormatter,
}

impl Default for GoTemplater {
    fn default() -> Self {
        Self::new(TemplateInputFormatter::new(false, DEFAULT_SENSITIVE_KEYS))
    }
}

impl GoTemplater {
    pub fn new(formatter: TemplateInputFormatter) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("toYaml", to_yaml);
        env.add_filter("toJson", to_json);
        Self { env, formatter }
    }

    fn template_context(&self, input: &TemplateInput) -> Result<Value, TemplateError> {
        let mut context = match &input.values {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(TemplateError::Execution {
                    message: format!("template values must be an object, got {}", other),
                    input: None,
                })
            }
        };
        if let Some(cd) = &input.component_version {
            let cd = serde_json::to_value(cd).map_err(|e| TemplateError::Decode(e.to_string()))?;
            context.entry("cd").or_insert(cd);
        }
        let components = serde_json::to_value(&input.component_versions)
            .map_err(|e| TemplateError::Decode(e.to_string()))?;
        context.entry("components").or_insert(components);
        Ok(Value::Object(context))
    }
}

impl Templater for GoTemplater {
    fn template_type(&self) -> TemplateType {
        TemplateType::GoTemplate
    }

    fn execute(
        &self,
        kind: ExecutionKind,
        source: &str,
        input: &TemplateInput,
        cancel: &CancellationToken,
    ) -> Result<Value, TemplateError> {
        cancel.check()?;
        let context = self.template_context(input)?;

        let rendered = self
            .env
            .render_str(source, &context)
            .map_err(|e| TemplateError::Execution {
                message: format!("unable to execute template {}: {}", kind.template_name(), e),
                input: Some(self.formatter.format(&context, "\t")),
            })?;
        cancel.check()?;

        let document: Value =
            serde_yaml::from_str(&rendered).map_err(|e| TemplateError::Decode(e.to_string()))?;
        document
            .get(kind.output_key())
            .cloned()
            .ok_or_else(|| TemplateError::MissingOutput(kind.output_key().to_string()))
    }
}

fn to_yaml(value: minijinja::Value) -> Result<String, minijinja::Error> {
    serde_yaml::to_string(&value)
        .map(|yaml| yaml.trim_end().to_string())
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, format!("toYaml: {}", e)))
}

fn to_json(value: minijinja::Value) -> Result<String, minijinja::Error> {
    serde_json::to_string(&value)
        .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, format!("toJson: {}", e)))
}
