//! Dynamic values flowing between configuration, providers, and state.
//!
//! `Value` mirrors the JSON data model plus `Unknown`, the placeholder for
//! results that only exist after apply. Sensitivity is tracked as mark
//! paths alongside a value, never embedded in it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
    /// A value that will only be known once the plan is applied.
    Unknown,
}

impl Value {
    pub fn int(n: i64) -> Self {
        Value::Number(n as f64)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn empty_object() -> Self {
        Value::Object(BTreeMap::new())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
            Value::Unknown => "unknown",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Value::Unknown)
    }

    /// Whether this value or anything nested inside it is unknown.
    pub fn contains_unknown(&self) -> bool {
        match self {
            Value::Unknown => true,
            Value::List(items) => items.iter().any(Value::contains_unknown),
            Value::Object(fields) => fields.values().any(Value::contains_unknown),
            _ => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn index(&self, step: &PathStep) -> Option<&Value> {
        match (self, step) {
            (Value::List(items), PathStep::Index(i)) => items.get(*i),
            (Value::Object(fields), PathStep::Key(k)) => fields.get(k),
            _ => None,
        }
    }

    /// Follow a whole path, returning the nested value if every step lands.
    pub fn traverse(&self, path: &ValuePath) -> Option<&Value> {
        let mut current = self;
        for step in &path.0 {
            current = current.index(step)?;
        }
        Some(current)
    }

    /// A copy of this value with the element at `path` replaced. Paths that
    /// do not resolve leave the value unchanged.
    pub fn with_value_at(&self, path: &ValuePath, replacement: Value) -> Value {
        fn go(current: &Value, steps: &[PathStep], replacement: Value) -> Value {
            let Some((step, rest)) = steps.split_first() else {
                return replacement;
            };
            match (current, step) {
                (Value::Object(fields), PathStep::Key(k)) if fields.contains_key(k) => {
                    let mut out = fields.clone();
                    let child = go(&fields[k], rest, replacement);
                    out.insert(k.clone(), child);
                    Value::Object(out)
                }
                (Value::List(items), PathStep::Index(i)) if *i < items.len() => {
                    let mut out = items.clone();
                    out[*i] = go(&items[*i], rest, replacement);
                    Value::List(out)
                }
                _ => current.clone(),
            }
        }
        go(self, &path.0, replacement)
    }

    /// Replace every unknown in `self` with the corresponding part of
    /// `other`, used when a provider echoes a planned value back with the
    /// unknowns resolved.
    pub fn filled_from(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Unknown, o) => o.clone(),
            (Value::List(a), Value::List(b)) if a.len() == b.len() => Value::List(
                a.iter().zip(b.iter()).map(|(x, y)| x.filled_from(y)).collect(),
            ),
            (Value::Object(a), Value::Object(b)) => Value::Object(
                a.iter()
                    .map(|(k, v)| {
                        let filled = match b.get(k) {
                            Some(o) => v.filled_from(o),
                            None => v.clone(),
                        };
                        (k.clone(), filled)
                    })
                    .collect(),
            ),
            _ => self.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => {
                if n.fract() == 0.0 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} = {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Unknown => write!(f, "(known after apply)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

/// A path into a nested value, used for sensitivity marks, ignore_changes,
/// and required-replacement reporting.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ValuePath(pub Vec<PathStep>);

impl ValuePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn attr(name: &str) -> Self {
        Self(vec![PathStep::Key(name.to_string())])
    }

    pub fn push(&mut self, step: PathStep) {
        self.0.push(step);
    }

    pub fn is_prefix_of(&self, other: &ValuePath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Parse a dotted attribute path like `a.b[0].c`. Only static steps.
    pub fn parse(input: &str) -> Option<Self> {
        let mut steps = Vec::new();
        for part in input.split('.') {
            if part.is_empty() {
                return None;
            }
            let attr_end = part.find('[').unwrap_or(part.len());
            let (attr, mut tail) = part.split_at(attr_end);
            if !attr.is_empty() {
                steps.push(PathStep::Key(attr.to_string()));
            }
            while tail.starts_with('[') {
                let close = tail.find(']')?;
                let idx = tail[1..close].parse::<usize>().ok()?;
                steps.push(PathStep::Index(idx));
                tail = &tail[close + 1..];
            }
            if !tail.is_empty() {
                return None;
            }
        }
        Some(Self(steps))
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            match step {
                PathStep::Key(k) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", k)?;
                }
                PathStep::Index(n) => write!(f, "[{}]", n)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(pairs: &[(&str, Value)]) -> Value {
        Value::Object(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn unknown_detection_is_deep() {
        let v = obj(&[
            ("a", Value::int(1)),
            ("b", Value::List(vec![Value::Unknown])),
        ]);
        assert!(!v.is_unknown());
        assert!(v.contains_unknown());
    }

    #[test]
    fn traverse_follows_paths() {
        let v = obj(&[(
            "items",
            Value::List(vec![obj(&[("name", Value::string("x"))])]),
        )]);
        let path = ValuePath::parse("items[0].name").unwrap();
        assert_eq!(v.traverse(&path), Some(&Value::string("x")));
        assert_eq!(v.traverse(&ValuePath::parse("items[1]").unwrap()), None);
    }

    #[test]
    fn filled_from_resolves_unknowns() {
        let planned = obj(&[("id", Value::Unknown), ("num", Value::int(2))]);
        let actual = obj(&[("id", Value::string("i-123")), ("num", Value::int(2))]);
        let filled = planned.filled_from(&actual);
        assert_eq!(filled, actual);
    }

    #[test]
    fn value_serde_round_trip() {
        let v = obj(&[
            ("n", Value::int(3)),
            ("u", Value::Unknown),
            ("l", Value::List(vec![Value::Bool(true), Value::Null])),
        ]);
        let text = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn path_prefix() {
        let a = ValuePath::parse("a.b").unwrap();
        let b = ValuePath::parse("a.b[0].c").unwrap();
        assert!(a.is_prefix_of(&b));
        assert!(!b.is_prefix_of(&a));
    }
}
