//! Validation of import values against their declared schemas

use jsonschema::error::ValidationErrorKind;
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

use super::loader::{LoaderError, ReferenceLoader};

/// Why a value was rejected
#[derive(Debug)]
pub enum ValidationFailure {
    /// The value does not satisfy the schema
    Violations(Vec<String>),
    /// The schema, or a document it references, could not be loaded
    Loader(LoaderError),
}

/// Validate `value` against a draft 7 `schema`, resolving `$ref`s with `loader`
pub fn validate_value(
    schema: &Value,
    value: &Value,
    loader: &ReferenceLoader,
) -> Result<(), ValidationFailure> {
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .with_resolver(loader.clone())
        .compile(schema)
        .map_err(|e| {
            ValidationFailure::Loader(LoaderError::InvalidSchema {
                reference: "#".to_string(),
                reason: e.to_string(),
            })
        })?;

    let errors = match compiled.validate(value) {
        Ok(()) => return Ok(()),
        Err(errors) => errors,
    };

    let mut violations = Vec::new();
    for error in errors {
        let path = error.instance_path.to_string();
        let message = error.to_string();
        match error.kind {
            ValidationErrorKind::Resolver { url, error } => {
                let loader_error = error.downcast::<LoaderError>().unwrap_or_else(|other| {
                    LoaderError::InvalidReference {
                        reference: url.to_string(),
                        reason: other.to_string(),
                    }
                });
                return Err(ValidationFailure::Loader(loader_error));
            }
            _ => {
                if path.is_empty() {
                    violations.push(message);
                } else {
                    violations.push(format!("{}: {}", path, message));
                }
            }
        }
    }
    Err(ValidationFailure::Violations(violations))
}
