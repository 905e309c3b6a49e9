//! Configuration values.
//!
//! Pure data, no I/O. Entities hold arbitrary trees of [`Value`]; the
//! `flatten_*` helpers normalize the multi-ancestor hit lists that
//! [`crate::domain::model::ConfigModel::c_all`] returns.

use std::collections::BTreeMap;

/// A configuration value: scalar, ordered sequence, mapping, or an opaque
/// code fragment carried through from the host configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Code(String),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Loose truthiness for flag-like configuration values.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty() && s != "0" && !s.eq_ignore_ascii_case("false"),
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Code(_) => true,
        }
    }

    /// Render a scalar for display; containers render their debug form.
    pub fn display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Str(s) | Value::Code(s) => s.clone(),
            other => format!("{other:?}"),
        }
    }
}

impl From<serde_yaml::Value> for Value {
    fn from(yaml: serde_yaml::Value) -> Self {
        match yaml {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(b),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Str(n.to_string()),
            },
            serde_yaml::Value::String(s) => Value::Str(s),
            serde_yaml::Value::Sequence(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_yaml::Value::Mapping(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(yaml_key(&k), Value::from(v));
                }
                Value::Map(out)
            }
            serde_yaml::Value::Tagged(tagged) => {
                if tagged.tag.to_string() == "!code" {
                    Value::Code(match tagged.value {
                        serde_yaml::Value::String(s) => s,
                        other => Value::from(other).display(),
                    })
                } else {
                    Value::from(tagged.value)
                }
            }
        }
    }
}

fn yaml_key(key: &serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => format!("{other:?}"),
    }
}

/// Concatenate sequences and scalars into a single sequence, one level deep.
pub fn flatten_list(values: &[Value]) -> Vec<Value> {
    let mut out = Vec::new();
    for value in values {
        match value {
            Value::List(items) => out.extend(items.iter().cloned()),
            Value::Null => {}
            other => out.push(other.clone()),
        }
    }
    out
}

/// Left-to-right deep merge of mappings.
///
/// For each key: two sequences concatenate and deduplicate, two mappings
/// recurse, otherwise the later value wins. Non-mapping inputs are skipped.
pub fn flatten_hash(values: &[Value]) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for value in values {
        if let Value::Map(map) = value {
            for (k, v) in map {
                merge_into(&mut out, k, v.clone());
            }
        }
    }
    out
}

fn merge_into(target: &mut BTreeMap<String, Value>, key: &str, incoming: Value) {
    match (target.get_mut(key), incoming) {
        (Some(Value::List(existing)), Value::List(incoming)) => {
            for item in incoming {
                if !existing.contains(&item) {
                    existing.push(item);
                }
            }
        }
        (Some(Value::Map(existing)), Value::Map(incoming)) => {
            for (k, v) in incoming {
                merge_into(existing, &k, v);
            }
        }
        (Some(slot), incoming) => *slot = incoming,
        (None, incoming) => {
            target.insert(key.to_string(), incoming);
        }
    }
}

// ── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Value {
        Value::List(items.iter().map(|s| Value::Str((*s).to_string())).collect())
    }

    #[test]
    fn test_flatten_list_concatenates_one_level() {
        let flat = flatten_list(&[list(&["c"]), list(&["a", "b"]), Value::Str("d".into())]);
        assert_eq!(flat, vec![
            Value::Str("c".into()),
            Value::Str("a".into()),
            Value::Str("b".into()),
            Value::Str("d".into()),
        ]);
    }

    #[test]
    fn test_flatten_hash_lists_concatenate_and_dedup() {
        let a = Value::Map(BTreeMap::from([("gems".to_string(), list(&["a", "b"]))]));
        let b = Value::Map(BTreeMap::from([("gems".to_string(), list(&["b", "c"]))]));
        let merged = flatten_hash(&[a, b]);
        assert_eq!(merged.get("gems"), Some(&list(&["a", "b", "c"])));
    }

    #[test]
    fn test_flatten_hash_maps_merge_recursively() {
        let a = Value::Map(BTreeMap::from([(
            "svc".to_string(),
            Value::Map(BTreeMap::from([("port".to_string(), Value::Int(80))])),
        )]));
        let b = Value::Map(BTreeMap::from([(
            "svc".to_string(),
            Value::Map(BTreeMap::from([("host".to_string(), Value::Str("x".into()))])),
        )]));
        let merged = flatten_hash(&[a, b]);
        let svc = merged.get("svc").and_then(Value::as_map).expect("svc map");
        assert_eq!(svc.len(), 2);
    }

    #[test]
    fn test_flatten_hash_later_scalar_wins() {
        let a = Value::Map(BTreeMap::from([("x".to_string(), Value::Int(1))]));
        let b = Value::Map(BTreeMap::from([("x".to_string(), Value::Int(2))]));
        assert_eq!(flatten_hash(&[a, b]).get("x"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_yaml_code_tag_becomes_code_value() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("!code 'echo hi'").expect("yaml");
        assert_eq!(Value::from(yaml), Value::Code("echo hi".into()));
    }

    #[test]
    fn test_truthiness_of_scalars() {
        assert!(Value::Str("yes".into()).truthy());
        assert!(!Value::Str("0".into()).truthy());
        assert!(!Value::Null.truthy());
        assert!(Value::Int(2).truthy());
    }
}
