//! Per-step configuration schemas and their validator.
//!
//! Steps declare the shape of the configuration they consume with
//! `validate_config`; the validator checks the host's realized configuration
//! against that shape and accumulates violations instead of stopping at the
//! first one.

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::value::Value;

/// A single leaf type a schema can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    Str,
    Path,
    Boolean,
    Code,
    List,
    Hash,
    Options,
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchemaType::Str => "string",
            SchemaType::Path => "path",
            SchemaType::Boolean => "boolean",
            SchemaType::Code => "code",
            SchemaType::List => "list",
            SchemaType::Hash => "hash",
            SchemaType::Options => "options",
        };
        f.write_str(name)
    }
}

/// A recursive schema node. `types` holds one entry normally, several when
/// the step accepts alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    types: Vec<SchemaType>,
    required: bool,
    help: Option<String>,
    items: Option<Box<Schema>>,
    key: Option<Box<Schema>>,
    value: Option<Box<Schema>>,
    options: Option<BTreeMap<String, Schema>>,
}

impl Schema {
    fn of(kind: SchemaType) -> Self {
        Self {
            types: vec![kind],
            ..Self::default()
        }
    }

    pub fn string() -> Self {
        Self::of(SchemaType::Str)
    }

    pub fn path() -> Self {
        Self::of(SchemaType::Path)
    }

    pub fn boolean() -> Self {
        Self::of(SchemaType::Boolean)
    }

    pub fn code() -> Self {
        Self::of(SchemaType::Code)
    }

    pub fn list(items: Schema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(SchemaType::List)
        }
    }

    pub fn hash(key: Schema, value: Schema) -> Self {
        Self {
            key: Some(Box::new(key)),
            value: Some(Box::new(value)),
            ..Self::of(SchemaType::Hash)
        }
    }

    pub fn options<I: IntoIterator<Item = (&'static str, Schema)>>(options: I) -> Self {
        Self {
            options: Some(
                options
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            ),
            ..Self::of(SchemaType::Options)
        }
    }

    /// Accept any of several alternative shapes.
    pub fn one_of<I: IntoIterator<Item = Schema>>(alternatives: I) -> Self {
        let mut merged = Self::default();
        for alt in alternatives {
            merged.types.extend(alt.types.iter().copied());
            merged.items = merged.items.or(alt.items);
            merged.key = merged.key.or(alt.key);
            merged.value = merged.value.or(alt.value);
            merged.options = merged.options.or(alt.options);
        }
        merged
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn help(mut self, text: &str) -> Self {
        self.help = Some(text.to_string());
        self
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    fn type_names(&self) -> String {
        self.types
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

/// One accumulated validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub path: String,
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Check one configuration value against a schema, appending violations.
pub fn check_value(path: &str, value: &Value, schema: &Schema, out: &mut Vec<Violation>) {
    if schema.types.is_empty() {
        return;
    }
    if schema.types.len() > 1 {
        // Alternatives: accept the value when any branch accepts it.
        for kind in &schema.types {
            let mut probe = Vec::new();
            check_single(path, value, *kind, schema, &mut probe);
            if probe.is_empty() {
                return;
            }
        }
        out.push(Violation {
            path: path.to_string(),
            message: format!("expected {}, got {}", schema.type_names(), describe(value)),
        });
        return;
    }
    check_single(path, value, schema.types[0], schema, out);
}

fn check_single(
    path: &str,
    value: &Value,
    kind: SchemaType,
    schema: &Schema,
    out: &mut Vec<Violation>,
) {
    match kind {
        SchemaType::Str | SchemaType::Path => {
            if !matches!(value, Value::Str(_)) {
                mismatch(path, kind, value, out);
            }
        }
        SchemaType::Boolean => {
            if !matches!(value, Value::Bool(_)) {
                mismatch(path, kind, value, out);
            }
        }
        SchemaType::Code => {
            if !matches!(value, Value::Code(_)) {
                mismatch(path, kind, value, out);
            }
        }
        SchemaType::List => match value {
            Value::List(items) => {
                if let Some(item_schema) = &schema.items {
                    for (i, item) in items.iter().enumerate() {
                        check_value(&format!("{path}[{i}]"), item, item_schema, out);
                    }
                }
            }
            other => mismatch(path, kind, other, out),
        },
        SchemaType::Hash => match value {
            Value::Map(map) => {
                for (k, v) in map {
                    if let Some(key_schema) = &schema.key {
                        check_value(
                            &format!("{path}/{k}"),
                            &Value::Str(k.clone()),
                            key_schema,
                            out,
                        );
                    }
                    if let Some(value_schema) = &schema.value {
                        check_value(&format!("{path}/{k}"), v, value_schema, out);
                    }
                }
            }
            other => mismatch(path, kind, other, out),
        },
        SchemaType::Options => match value {
            Value::Map(map) => {
                let Some(options) = &schema.options else {
                    return;
                };
                for (k, v) in map {
                    match options.get(k) {
                        Some(sub) => check_value(&format!("{path}/{k}"), v, sub, out),
                        None => out.push(Violation {
                            path: format!("{path}/{k}"),
                            message: format!(
                                "unrecognized option (known: {})",
                                options.keys().cloned().collect::<Vec<_>>().join(", ")
                            ),
                        }),
                    }
                }
                for (k, sub) in options {
                    if sub.required && !map.contains_key(k) {
                        out.push(Violation {
                            path: format!("{path}/{k}"),
                            message: "required option is missing".to_string(),
                        });
                    }
                }
            }
            other => mismatch(path, kind, other, out),
        },
    }
}

fn mismatch(path: &str, kind: SchemaType, value: &Value, out: &mut Vec<Violation>) {
    out.push(Violation {
        path: path.to_string(),
        message: format!("expected {kind}, got {}", describe(value)),
    });
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Int(_) => "integer",
        Value::Str(_) => "string",
        Value::List(_) => "list",
        Value::Map(_) => "hash",
        Value::Code(_) => "code",
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────
