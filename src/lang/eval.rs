//! Scope-based evaluation. The scope supplies reference origins, repetition
//! data, and non-builtin functions; evaluation itself is pure and
//! unknown-aware: unknowns propagate instead of failing.

use std::collections::BTreeMap;

use super::{BinOp, Expr, RefOrigin, RefStep};
use crate::error::Diagnostic;
use crate::values::{PathStep, Value};

/// The per-instance repetition symbols available during evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepetitionData {
    pub count_index: Option<i64>,
    pub each_key: Option<String>,
    pub each_value: Option<Value>,
}

impl RepetitionData {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_count(index: i64) -> Self {
        Self {
            count_index: Some(index),
            ..Self::default()
        }
    }

    pub fn for_each(key: String, value: Value) -> Self {
        Self {
            each_key: Some(key),
            each_value: Some(value),
            ..Self::default()
        }
    }
}

/// The evaluation environment: what the expression can see.
pub trait Scope {
    /// Resolve the base value of a reference origin (a variable, local,
    /// whole resource, or module call).
    fn resolve_origin(&self, origin: &RefOrigin) -> Result<Value, Diagnostic>;

    fn repetition(&self) -> RepetitionData;

    /// Call a non-builtin function, e.g. one contributed by a provider.
    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, Diagnostic>;
}

pub fn evaluate(expr: &Expr, scope: &dyn Scope) -> Result<Value, Diagnostic> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ref(reference) => {
            let base = match &reference.origin {
                RefOrigin::CountIndex => match scope.repetition().count_index {
                    Some(i) => Value::int(i),
                    None => {
                        return Err(Diagnostic::error(
                            "Invalid count.index reference",
                            "count.index is only available inside resources using count",
                        ))
                    }
                },
                RefOrigin::EachKey => match scope.repetition().each_key {
                    Some(k) => Value::String(k),
                    None => {
                        return Err(Diagnostic::error(
                            "Invalid each reference",
                            "each.key is only available inside objects using for_each",
                        ))
                    }
                },
                RefOrigin::EachValue => match scope.repetition().each_value {
                    Some(v) => v,
                    None => {
                        return Err(Diagnostic::error(
                            "Invalid each reference",
                            "each.value is only available inside objects using for_each",
                        ))
                    }
                },
                other => scope.resolve_origin(other)?,
            };
            apply_steps(base, &reference.steps, scope, &reference.origin)
        }
        Expr::Call { name, args } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(evaluate(arg, scope)?);
            }
            call_builtin(name, &values)
                .unwrap_or_else(|| scope.call_function(name, &values))
        }
        Expr::Binary { op, lhs, rhs } => {
            let a = evaluate(lhs, scope)?;
            let b = evaluate(rhs, scope)?;
            if a.contains_unknown() || b.contains_unknown() {
                return Ok(Value::Unknown);
            }
            let equal = a == b;
            Ok(Value::Bool(match op {
                BinOp::Eq => equal,
                BinOp::NotEq => !equal,
            }))
        }
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            let c = evaluate(cond, scope)?;
            match c {
                Value::Bool(true) => evaluate(then, scope),
                Value::Bool(false) => evaluate(otherwise, scope),
                Value::Unknown => Ok(Value::Unknown),
                other => Err(Diagnostic::error(
                    "Invalid condition",
                    format!("condition must be bool, got {}", other.kind_name()),
                )),
            }
        }
        Expr::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(evaluate(item, scope)?);
            }
            Ok(Value::List(out))
        }
        Expr::Object(fields) => {
            let mut out = BTreeMap::new();
            for (key, expr) in fields {
                out.insert(key.clone(), evaluate(expr, scope)?);
            }
            Ok(Value::Object(out))
        }
    }
}

fn apply_steps(
    mut current: Value,
    steps: &[RefStep],
    scope: &dyn Scope,
    origin: &RefOrigin,
) -> Result<Value, Diagnostic> {
    for step in steps {
        if current.is_unknown() {
            return Ok(Value::Unknown);
        }
        let path_step = match step {
            RefStep::Attr(name) => PathStep::Key(name.clone()),
            RefStep::Index(expr) => {
                let idx = evaluate(expr, scope)?;
                match idx {
                    Value::Unknown => return Ok(Value::Unknown),
                    Value::Number(n) if n.fract() == 0.0 && n >= 0.0 => {
                        PathStep::Index(n as usize)
                    }
                    Value::String(s) => PathStep::Key(s),
                    other => {
                        return Err(Diagnostic::error(
                            "Invalid index",
                            format!(
                                "cannot index {} with a {} value",
                                origin,
                                other.kind_name()
                            ),
                        ))
                    }
                }
            }
        };
        current = match current.index(&path_step) {
            Some(v) => v.clone(),
            None => {
                return Err(Diagnostic::error(
                    "Invalid reference",
                    format!("{} has no element for step applied to it", origin),
                ))
            }
        };
    }
    Ok(current)
}

/// Built-in functions. Returns None when the name is not a builtin so the
/// scope can try provider-contributed functions.
fn call_builtin(name: &str, args: &[Value]) -> Option<Result<Value, Diagnostic>> {
    let result = match name {
        "length" => Some(fn_length(args)),
        "keys" => Some(fn_keys(args)),
        "values" => Some(fn_values(args)),
        "concat" => Some(fn_concat(args)),
        "tostring" => Some(fn_tostring(args)),
        "tonumber" => Some(fn_tonumber(args)),
        "not" => Some(fn_not(args)),
        "element" => Some(fn_element(args)),
        _ => None,
    };
    result
}

fn arity(name: &str, args: &[Value], want: usize) -> Result<(), Diagnostic> {
    if args.len() != want {
        return Err(Diagnostic::error(
            "Invalid function call",
            format!("{} expects {} argument(s), got {}", name, want, args.len()),
        ));
    }
    Ok(())
}

fn fn_length(args: &[Value]) -> Result<Value, Diagnostic> {
    arity("length", args, 1)?;
    match &args[0] {
        Value::Unknown => Ok(Value::Unknown),
        Value::List(items) => Ok(Value::int(items.len() as i64)),
        Value::Object(fields) => Ok(Value::int(fields.len() as i64)),
        Value::String(s) => Ok(Value::int(s.chars().count() as i64)),
        other => Err(Diagnostic::error(
            "Invalid function argument",
            format!("length does not accept {}", other.kind_name()),
        )),
    }
}

fn fn_keys(args: &[Value]) -> Result<Value, Diagnostic> {
    arity("keys", args, 1)?;
    match &args[0] {
        Value::Unknown => Ok(Value::Unknown),
        Value::Object(fields) => Ok(Value::List(
            fields.keys().map(|k| Value::String(k.clone())).collect(),
        )),
        other => Err(Diagnostic::error(
            "Invalid function argument",
            format!("keys expects an object, got {}", other.kind_name()),
        )),
    }
}

fn fn_values(args: &[Value]) -> Result<Value, Diagnostic> {
    arity("values", args, 1)?;
    match &args[0] {
        Value::Unknown => Ok(Value::Unknown),
        Value::Object(fields) => Ok(Value::List(fields.values().cloned().collect())),
        other => Err(Diagnostic::error(
            "Invalid function argument",
            format!("values expects an object, got {}", other.kind_name()),
        )),
    }
}

fn fn_concat(args: &[Value]) -> Result<Value, Diagnostic> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Value::Unknown => return Ok(Value::Unknown),
            Value::List(items) => out.extend(items.iter().cloned()),
            other => {
                return Err(Diagnostic::error(
                    "Invalid function argument",
                    format!("concat expects lists, got {}", other.kind_name()),
                ))
            }
        }
    }
    Ok(Value::List(out))
}

fn fn_tostring(args: &[Value]) -> Result<Value, Diagnostic> {
    arity("tostring", args, 1)?;
    match &args[0] {
        Value::Unknown => Ok(Value::Unknown),
        Value::String(s) => Ok(Value::String(s.clone())),
        Value::Number(n) => Ok(Value::String(if n.fract() == 0.0 {
            format!("{}", *n as i64)
        } else {
            format!("{}", n)
        })),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(Diagnostic::error(
            "Invalid function argument",
            format!("tostring does not accept {}", other.kind_name()),
        )),
    }
}

fn fn_tonumber(args: &[Value]) -> Result<Value, Diagnostic> {
    arity("tonumber", args, 1)?;
    match &args[0] {
        Value::Unknown => Ok(Value::Unknown),
        Value::Number(n) => Ok(Value::Number(*n)),
        Value::String(s) => match s.parse::<f64>() {
            Ok(n) => Ok(Value::Number(n)),
            Err(_) => Err(Diagnostic::error(
                "Invalid function argument",
                format!("tonumber cannot convert {:?}", s),
            )),
        },
        other => Err(Diagnostic::error(
            "Invalid function argument",
            format!("tonumber does not accept {}", other.kind_name()),
        )),
    }
}

fn fn_not(args: &[Value]) -> Result<Value, Diagnostic> {
    arity("not", args, 1)?;
    match &args[0] {
        Value::Unknown => Ok(Value::Unknown),
        Value::Bool(b) => Ok(Value::Bool(!b)),
        other => Err(Diagnostic::error(
            "Invalid function argument",
            format!("not expects bool, got {}", other.kind_name()),
        )),
    }
}

fn fn_element(args: &[Value]) -> Result<Value, Diagnostic> {
    arity("element", args, 2)?;
    if args[0].is_unknown() || args[1].is_unknown() {
        return Ok(Value::Unknown);
    }
    let step = match &args[1] {
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 => PathStep::Index(*n as usize),
        Value::String(s) => PathStep::Key(s.clone()),
        other => {
            return Err(Diagnostic::error(
                "Invalid index",
                format!("cannot index with a {} value", other.kind_name()),
            ))
        }
    };
    match args[0].index(&step) {
        Some(v) => Ok(v.clone()),
        None => Err(Diagnostic::error(
            "Invalid index",
            "collection has no such element",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Reference;

    /// A scope backed by a flat map of origin values.
    struct MapScope {
        origins: BTreeMap<String, Value>,
        rep: RepetitionData,
    }

    impl Scope for MapScope {
        fn resolve_origin(&self, origin: &RefOrigin) -> Result<Value, Diagnostic> {
            self.origins
                .get(&origin.to_string())
                .cloned()
                .ok_or_else(|| {
                    Diagnostic::error("Unknown reference", origin.to_string())
                })
        }

        fn repetition(&self) -> RepetitionData {
            self.rep.clone()
        }

        fn call_function(&self, name: &str, _args: &[Value]) -> Result<Value, Diagnostic> {
            Err(Diagnostic::error(
                "Unknown function",
                format!("no function named {:?}", name),
            ))
        }
    }

    fn scope_with(pairs: &[(&str, Value)]) -> MapScope {
        MapScope {
            origins: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            rep: RepetitionData::for_count(1),
        }
    }

    fn eval_str(scope: &MapScope, text: &str) -> Result<Value, Diagnostic> {
        evaluate(&Expr::parse(text).unwrap(), scope)
    }

    #[test]
    fn evaluates_resource_traversal_with_count_index() {
        let resource = Value::List(vec![
            Value::Object([("num".to_string(), Value::int(0))].into_iter().collect()),
            Value::Object([("num".to_string(), Value::int(1))].into_iter().collect()),
        ]);
        let scope = scope_with(&[("test.a", resource)]);
        let v = eval_str(&scope, "test.a[count.index].num").unwrap();
        assert_eq!(v, Value::int(1));
    }

    #[test]
    fn length_of_resource_list() {
        let scope = scope_with(&[(
            "test.a",
            Value::List(vec![Value::empty_object(), Value::empty_object()]),
        )]);
        assert_eq!(eval_str(&scope, "length(test.a)").unwrap(), Value::int(2));
    }

    #[test]
    fn unknown_propagates_through_steps_and_calls() {
        let scope = scope_with(&[("test.a", Value::Unknown)]);
        assert_eq!(eval_str(&scope, "test.a[0].num").unwrap(), Value::Unknown);
        assert_eq!(eval_str(&scope, "length(test.a)").unwrap(), Value::Unknown);
    }

    #[test]
    fn conditional_branches() {
        let scope = scope_with(&[("var.flag", Value::Bool(false))]);
        assert_eq!(
            eval_str(&scope, "var.flag ? 1 : 2").unwrap(),
            Value::int(2)
        );
        let scope = scope_with(&[("var.flag", Value::Unknown)]);
        assert_eq!(eval_str(&scope, "var.flag ? 1 : 2").unwrap(), Value::Unknown);
    }

    #[test]
    fn missing_each_data_is_an_error() {
        let scope = scope_with(&[]);
        let err = eval_str(&scope, "each.key").unwrap_err();
        assert!(err.summary.contains("each"));
    }

    #[test]
    fn reference_without_steps_resolves_whole_origin() {
        let scope = scope_with(&[("var.x", Value::string("hello"))]);
        let expr = Expr::Ref(Reference::origin_only(RefOrigin::InputVariable("x".into())));
        assert_eq!(evaluate(&expr, &scope).unwrap(), Value::string("hello"));
    }
}
