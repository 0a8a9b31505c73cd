//! Template error types

use std::collections::BTreeSet;
use std::io;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use super::TemplateType;

/// Errors that can occur during template execution
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("unsupported template type {0}")]
    UnsupportedTemplateType(TemplateType),

    #[error("no template found for executor {0}")]
    NoTemplate(String),

    #[error("no blueprint filesystem to read template file {0}")]
    NoFilesystem(String),

    #[error("unable to read template file {path}: {source}")]
    TemplateFile {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Rendering failed; `input` holds the formatted template input
    #[error("{message}{}", input_suffix(.input))]
    Execution { message: String, input: Option<String> },

    #[error("error while decoding templated execution: {0}")]
    Decode(String),

    #[error("output with name {0:?} not found")]
    MissingOutput(String),

    #[error("maximum execution time of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("template execution was cancelled")]
    Cancelled,

    #[error("template worker failed: {0}")]
    Worker(String),
}

fn input_suffix(input: &Option<String>) -> String {
    match input {
        Some(formatted) => format!("\ntemplate input:\n{}", formatted),
        None => String::new(),
    }
}

/// Renders template input for error messages, hiding sensitive values
#[derive(Debug, Clone)]
pub struct TemplateInputFormatter {
    pretty: bool,
    sensitive_keys: BTreeSet<String>,
}

impl TemplateInputFormatter {
    pub fn new<I, K>(pretty: bool, sensitive_keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            pretty,
            sensitive_keys: sensitive_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// One line per top-level key, each prefixed with `indent`
    ///
    /// Values of sensitive keys are replaced by `[redacted]`. Non-object
    /// input is printed as a single value.
    pub fn format(&self, input: &Value, indent: &str) -> String {
        let Value::Object(map) = input else {
            return format!("{}{}", indent, self.render(input, indent));
        };

        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| {
                let rendered = if self.sensitive_keys.contains(key) {
                    "[redacted]".to_string()
                } else {
                    self.render(&map[key], indent)
                };
                format!("{}{}: {}", indent, key, rendered)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render(&self, value: &Value, indent: &str) -> String {
        let rendered = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        rendered
            .unwrap_or_default()
            .replace('\n', &format!("\n{}", indent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sensitive_keys_are_redacted() {
        let formatter = TemplateInputFormatter::new(false, ["imports", "values", "state"]);
        let input = json!({
            "imports": {"password": "secret"},
            "cd": {"name": "web"},
            "state": {"token": "abc"}
        });

        let formatted = formatter.format(&input, "\t");
        assert!(!formatted.contains("secret"));
        assert!(!formatted.contains("abc"));
        assert!(formatted.contains("\timports: [redacted]"));
        assert!(formatted.contains("\tcd: {\"name\":\"web\"}"));
    }

    #[test]
    fn test_execution_error_appends_input() {
        let err = TemplateError::Execution {
            message: "undefined value".to_string(),
            input: Some("\tcd: {}".to_string()),
        };
        assert_eq!(err.to_string(), "undefined value\ntemplate input:\n\tcd: {}");

        let bare = TemplateError::Execution {
            message: "undefined value".to_string(),
            input: None,
        };
        assert_eq!(bare.to_string(), "undefined value");
    }
}
