//! A deliberately small expression language: enough for configuration
//! bodies to reference other objects, index into them, branch, and call
//! functions. The engine only needs reference extraction and scope-based
//! evaluation; anything fancier belongs to the embedding language frontend.

mod eval;
mod parse;

pub use eval::{evaluate, RepetitionData, Scope};

use crate::addrs::Resource;
use crate::error::ExprError;
use crate::values::{PathStep, Value, ValuePath};

/// The root object a reference starts from, before any attribute or index
/// steps are applied.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefOrigin {
    InputVariable(String),
    LocalValue(String),
    ModuleCall(String),
    Resource(Resource),
    CountIndex,
    EachKey,
    EachValue,
}

impl std::fmt::Display for RefOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefOrigin::InputVariable(n) => write!(f, "var.{}", n),
            RefOrigin::LocalValue(n) => write!(f, "local.{}", n),
            RefOrigin::ModuleCall(n) => write!(f, "module.{}", n),
            RefOrigin::Resource(r) => write!(f, "{}", r),
            RefOrigin::CountIndex => write!(f, "count.index"),
            RefOrigin::EachKey => write!(f, "each.key"),
            RefOrigin::EachValue => write!(f, "each.value"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RefStep {
    Attr(String),
    /// A bracketed index whose value may itself be an expression
    /// (`test.a[count.index]`).
    Index(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reference {
    pub origin: RefOrigin,
    pub steps: Vec<RefStep>,
}

impl Reference {
    pub fn origin_only(origin: RefOrigin) -> Self {
        Self {
            origin,
            steps: Vec::new(),
        }
    }

    /// The statically-known attribute path of this reference, cut off at the
    /// first dynamic index. Used for relevant-attribute tracking.
    pub fn static_path(&self) -> ValuePath {
        let mut path = ValuePath::root();
        for step in &self.steps {
            match step {
                RefStep::Attr(name) => path.push(PathStep::Key(name.clone())),
                RefStep::Index(expr) => match expr.as_ref() {
                    Expr::Literal(Value::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => {
                        path.push(PathStep::Index(*n as usize))
                    }
                    Expr::Literal(Value::String(s)) => path.push(PathStep::Key(s.clone())),
                    _ => break,
                },
            }
        }
        path
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum BinOp {
    Eq,
    NotEq,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ref(Reference),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    List(Vec<Expr>),
    Object(Vec<(String, Expr)>),
}

impl Expr {
    pub fn parse(input: &str) -> Result<Expr, ExprError> {
        parse::parse_expr(input)
    }

    pub fn lit(value: Value) -> Expr {
        Expr::Literal(value)
    }

    /// Every reference this expression makes, including references nested
    /// inside index expressions, call arguments, and constructors.
    pub fn references(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references(&self, out: &mut Vec<Reference>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ref(r) => {
                out.push(r.clone());
                for step in &r.steps {
                    if let RefStep::Index(expr) = step {
                        expr.collect_references(out);
                    }
                }
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_references(out);
                }
            }
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_references(out);
                rhs.collect_references(out);
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                cond.collect_references(out);
                then.collect_references(out);
                otherwise.collect_references(out);
            }
            Expr::List(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Expr::Object(fields) => {
                for (_, expr) in fields {
                    expr.collect_references(out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::ResourceMode;

    #[test]
    fn reference_extraction_sees_through_indexes() {
        let expr = Expr::parse("test.a[count.index].num").unwrap();
        let refs = expr.references();
        assert_eq!(refs.len(), 2);
        assert!(matches!(&refs[0].origin, RefOrigin::Resource(r) if r.type_ == "test"));
        assert!(refs.iter().any(|r| r.origin == RefOrigin::CountIndex));
    }

    #[test]
    fn reference_extraction_in_calls() {
        let expr = Expr::parse("length(test.a)").unwrap();
        let refs = expr.references();
        assert_eq!(refs.len(), 1);
        match &refs[0].origin {
            RefOrigin::Resource(r) => {
                assert_eq!(r.mode, ResourceMode::Managed);
                assert_eq!(r.name, "a");
            }
            other => panic!("unexpected origin {:?}", other),
        }
    }

    #[test]
    fn static_path_stops_at_dynamic_index() {
        let expr = Expr::parse("test.a[0].net[count.index].cidr").unwrap();
        match expr {
            Expr::Ref(r) => {
                assert_eq!(r.static_path().to_string(), "[0].net");
            }
            other => panic!("unexpected expr {:?}", other),
        }
    }
}
