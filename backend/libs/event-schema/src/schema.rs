//! JSON Schema validation for decoded event bodies.
//!
//! Schemas are JSON Schema documents loaded once at startup from a directory
//! (`<name>.json` registers schema `<name>`). They are compiled when loaded so
//! that a bad `pattern` or an unresolvable `$ref` is reported at startup rather
//! than on every message.

use crate::error::{SchemaError, SchemaResult};
use jsonschema::Validator;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A single place where a value does not conform to its schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    /// JSON pointer to the offending value ("" is the document root)
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let path = if self.path.is_empty() { "/" } else { &self.path };
        write!(f, "{}: {}", path, self.message)
    }
}

/// Named schemas, loaded once at startup.
///
/// Validation is advisory: [`SchemaValidator::validate`] logs and returns
/// `false` on any problem, it never fails.
#[derive(Clone, Default)]
pub struct SchemaValidator {
    schemas: HashMap<String, Arc<Validator>>,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("schemas", &self.schema_names())
            .finish()
    }
}

impl SchemaValidator {
    /// Validator with no schemas (every validation reports unknown schema)
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` file in `dir` as a schema named after its file stem.
    ///
    /// An unreadable directory is an error; individual files that fail to parse
    /// or compile are logged and skipped.
    pub fn from_dir(dir: impl AsRef<Path>) -> SchemaResult<Self> {
        let dir = dir.as_ref();
        let io_err = |source| SchemaError::Io {
            path: dir.display().to_string(),
            source,
        };

        let mut validator = Self::new();
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                warn!(path = %path.display(), "Skipping schema with non UTF-8 name");
                continue;
            };

            match Self::read_schema(name, &path) {
                Ok(schema) => match validator.register(name, &schema) {
                    Ok(()) => debug!(schema = %name, "Loaded schema"),
                    Err(e) => error!(error = %e, "Skipping invalid schema"),
                },
                Err(e) => error!(error = %e, "Skipping unreadable schema"),
            }
        }

        info!(
            dir = %dir.display(),
            count = validator.len(),
            "Schema validator initialized"
        );
        Ok(validator)
    }

    fn read_schema(name: &str, path: &Path) -> SchemaResult<Value> {
        let raw = fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SchemaError::Json {
            name: name.to_string(),
            source,
        })
    }

    /// Compile and register a schema document; replaces any schema of the same name
    pub fn register(&mut self, name: &str, schema: &Value) -> SchemaResult<()> {
        let doc = schema.as_object().ok_or_else(|| SchemaError::InvalidSchema {
            name: name.to_string(),
            reason: "schema document must be an object".to_string(),
        })?;
        if !doc.contains_key("type") && !doc.contains_key("$schema") {
            return Err(SchemaError::InvalidSchema {
                name: name.to_string(),
                reason: "not a JSON schema (missing $schema or type)".to_string(),
            });
        }

        let compiled = jsonschema::options()
            .should_validate_formats(true)
            .build(schema)
            .map_err(|e| SchemaError::InvalidSchema {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        self.schemas.insert(name.to_string(), Arc::new(compiled));
        Ok(())
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn schema_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Detailed violations, or `None` when no schema has that name
    pub fn violations(&self, name: &str, data: &Value) -> Option<Vec<SchemaViolation>> {
        let compiled = self.schemas.get(name)?;
        let violations = compiled
            .iter_errors(data)
            .map(|e| SchemaViolation {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();
        Some(violations)
    }

    /// `true` when `data` conforms to schema `name`. Logs and returns `false`
    /// for unknown schemas and non-conforming data.
    pub fn validate(&self, name: &str, data: &Value) -> bool {
        match self.violations(name, data) {
            None => {
                warn!(schema = %name, "Schema not found");
                false
            }
            Some(violations) if violations.is_empty() => true,
            Some(violations) => {
                let summary: Vec<String> = violations.iter().map(ToString::to_string).collect();
                warn!(
                    schema = %name,
                    violations = %summary.join("; "),
                    "Schema validation failed"
                );
                false
            }
        }
    }
}
