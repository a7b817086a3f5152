//! Tool parameter schemas.
//!
//! Tool parameters are described with a JSON Schema subset (`type`,
//! `properties`, `required`, `enum`, `items`). Validation reports every
//! failing field; a schema that cannot be applied is an error of its own.

use schemars::JsonSchema;
use serde_json::Value;

use crate::error::{PromptError, Result};

/// A single failing field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    /// Dotted path to the field, `(root)` for the value itself.
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// JSON Schema describing a tool's parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSchema {
    schema: Value,
}

impl ParameterSchema {
    pub fn new(schema: Value) -> Self {
        Self { schema }
    }

    /// Derive the schema of a parameter struct.
    pub fn for_type<T: JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        Self::new(serde_json::to_value(root).unwrap_or_default())
    }

    pub fn as_value(&self) -> &Value {
        &self.schema
    }

    /// Validate `value`, returning the failing fields (empty on success).
    ///
    /// Errors only when the schema itself is malformed.
    pub fn validate(&self, value: &Value) -> Result<Vec<SchemaIssue>> {
        let mut issues = Vec::new();
        validate_node(&self.schema, value, "", &mut issues)?;
        Ok(issues)
    }

    /// Human-readable parameter summary, one line per property.
    ///
    /// Used wherever parameters are shown to a model as prose, so it never
    /// contains JSON Schema syntax.
    pub fn describe(&self) -> String {
        let Some(props) = self.schema.get("properties").and_then(|p| p.as_object()) else {
            return "No parameters.".to_string();
        };
        if props.is_empty() {
            return "No parameters.".to_string();
        }

        let required: Vec<&str> = self
            .schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let mut lines = Vec::with_capacity(props.len());
        for (name, prop) in props {
            let type_str = type_label(prop);
            let req = if required.contains(&name.as_str()) {
                ", required"
            } else {
                ", optional"
            };
            let desc = prop
                .get("description")
                .and_then(|d| d.as_str())
                .unwrap_or("");
            lines.push(format!("- `{}` ({}{}): {}", name, type_str, req, desc));
        }
        lines.join("\n")
    }
}

fn type_label(schema: &Value) -> String {
    match schema.get("type") {
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(|t| t.as_str())
            .filter(|t| *t != "null")
            .collect::<Vec<_>>()
            .join(" | "),
        _ => "any".to_string(),
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "(root)".to_string()
    } else {
        path.to_string()
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn matches_type(expected: &str, value: &Value) -> Result<bool> {
    Ok(match expected {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "string" => value.is_string(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        },
        other => {
            return Err(PromptError::Schema(format!("unsupported type '{}'", other)));
        }
    })
}

fn validate_node(
    schema: &Value,
    value: &Value,
    path: &str,
    issues: &mut Vec<SchemaIssue>,
) -> Result<()> {
    let schema = match schema {
        Value::Bool(true) => return Ok(()),
        Value::Bool(false) => {
            issues.push(SchemaIssue {
                path: display_path(path),
                message: "No value allowed".to_string(),
            });
            return Ok(());
        }
        Value::Object(map) => map,
        _ => {
            return Err(PromptError::Schema(format!(
                "schema at {} is not an object",
                display_path(path)
            )));
        }
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(types) => types
                .iter()
                .map(|t| {
                    t.as_str().ok_or_else(|| {
                        PromptError::Schema(format!("invalid type list at {}", display_path(path)))
                    })
                })
                .collect::<Result<_>>()?,
            _ => {
                return Err(PromptError::Schema(format!(
                    "invalid type at {}",
                    display_path(path)
                )));
            }
        };
        let mut ok = false;
        for t in &allowed {
            if matches_type(t, value)? {
                ok = true;
                break;
            }
        }
        if !ok {
            issues.push(SchemaIssue {
                path: display_path(path),
                message: format!(
                    "Expected {}, received {}",
                    allowed.join(" | "),
                    value_kind(value)
                ),
            });
            return Ok(());
        }
    }

    if let Some(options) = schema.get("enum") {
        let options = options.as_array().ok_or_else(|| {
            PromptError::Schema(format!("enum at {} is not an array", display_path(path)))
        })?;
        if !options.contains(value) {
            let expected: Vec<String> = options.iter().map(|o| o.to_string()).collect();
            issues.push(SchemaIssue {
                path: display_path(path),
                message: format!(
                    "Invalid enum value. Expected {}, received {}",
                    expected.join(" | "),
                    value
                ),
            });
        }
    }

    if let Value::Object(fields) = value {
        if let Some(required) = schema.get("required") {
            let required = required.as_array().ok_or_else(|| {
                PromptError::Schema(format!(
                    "required at {} is not an array",
                    display_path(path)
                ))
            })?;
            for name in required {
                let name = name.as_str().ok_or_else(|| {
                    PromptError::Schema(format!(
                        "required entry at {} is not a string",
                        display_path(path)
                    ))
                })?;
                if !fields.contains_key(name) {
                    issues.push(SchemaIssue {
                        path: join_path(path, name),
                        message: "Required".to_string(),
                    });
                }
            }
        }

        if let Some(props) = schema.get("properties") {
            let props = props.as_object().ok_or_else(|| {
                PromptError::Schema(format!(
                    "properties at {} is not an object",
                    display_path(path)
                ))
            })?;
            for (name, prop_schema) in props {
                if let Some(field) = fields.get(name) {
                    validate_node(prop_schema, field, &join_path(path, name), issues)?;
                }
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_node(item_schema, item, &format!("{}[{}]", path, i), issues)?;
        }
    }

    Ok(())
}
