//! The immutable configuration tree the engine plans from. The embedding
//! frontend owns parsing real source; this model carries exactly what the
//! engine consumes. A TOML loader builds trees compactly for tests and
//! embedders.

mod loader;

pub use loader::from_toml_str;

use std::collections::BTreeMap;

use crate::addrs::{ConfigResource, ModuleAddr, ProviderAddr, Resource, Target};
use crate::lang::{Expr, Reference};
use crate::values::{Value, ValuePath};

/// One node of the configuration tree: a module plus its child modules
/// keyed by call name.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub module: Module,
    pub children: BTreeMap<String, Config>,
}

impl Config {
    pub fn new(module: Module) -> Self {
        Self {
            module,
            children: BTreeMap::new(),
        }
    }

    pub fn descend(&self, addr: &ModuleAddr) -> Option<&Config> {
        let mut current = self;
        for step in &addr.0 {
            current = current.children.get(step)?;
        }
        Some(current)
    }

    pub fn module(&self, addr: &ModuleAddr) -> Option<&Module> {
        self.descend(addr).map(|c| &c.module)
    }

    pub fn resource(&self, addr: &ConfigResource) -> Option<&ResourceConfig> {
        self.module(&addr.module)?.resources.get(&addr.resource)
    }

    /// All modules in the tree, preorder, root first.
    pub fn all_modules(&self) -> Vec<(ModuleAddr, &Module)> {
        let mut out = Vec::new();
        self.collect_modules(ModuleAddr::root(), &mut out);
        out
    }

    fn collect_modules<'a>(
        &'a self,
        addr: ModuleAddr,
        out: &mut Vec<(ModuleAddr, &'a Module)>,
    ) {
        out.push((addr.clone(), &self.module));
        for (name, child) in &self.children {
            child.collect_modules(addr.child(name), out);
        }
    }

    /// Resolve a local provider name to the plugin address, consulting the
    /// module's required_providers and falling back to the implied default.
    pub fn provider_addr_for(&self, module: &ModuleAddr, local_name: &str) -> ProviderAddr {
        let mut addr = module.clone();
        loop {
            if let Some(m) = self.module(&addr) {
                if let Some(found) = m.required_providers.get(local_name) {
                    return found.clone();
                }
            }
            match addr.parent() {
                Some((parent, _)) => addr = parent,
                None => break,
            }
        }
        ProviderAddr::implied(local_name)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Module {
    pub resources: BTreeMap<Resource, ResourceConfig>,
    pub variables: BTreeMap<String, VariableConfig>,
    pub locals: BTreeMap<String, Expr>,
    pub outputs: BTreeMap<String, OutputConfig>,
    pub module_calls: BTreeMap<String, ModuleCall>,
    pub provider_configs: Vec<ProviderBlock>,
    pub required_providers: BTreeMap<String, ProviderAddr>,
    pub imports: Vec<ImportBlock>,
    pub moved: Vec<MovedBlock>,
    pub removed: Vec<RemovedBlock>,
    pub checks: Vec<CheckBlock>,
}

/// A configuration body: attribute expressions plus nested blocks. Nested
/// blocks may repeat, so they are kept in declaration order.
#[derive(Clone, Debug, Default)]
pub struct Body {
    pub attrs: BTreeMap<String, Expr>,
    pub blocks: Vec<(String, Body)>,
}

impl Body {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_attrs(attrs: &[(&str, Expr)]) -> Self {
        Self {
            attrs: attrs
                .iter()
                .map(|(k, e)| (k.to_string(), e.clone()))
                .collect(),
            blocks: Vec::new(),
        }
    }

    /// Every reference made anywhere in the body, nested blocks included.
    pub fn references(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        for expr in self.attrs.values() {
            out.extend(expr.references());
        }
        for (_, block) in &self.blocks {
            out.extend(block.references());
        }
        out
    }
}

/// An explicit `provider = type.alias[key]` reference on a resource or
/// module call.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderRef {
    pub type_name: String,
    pub alias: Option<String>,
    pub key: Option<Expr>,
}

impl ProviderRef {
    /// Parse the `type` or `type.alias` textual form.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split('.');
        let type_name = parts.next()?.trim().to_string();
        if type_name.is_empty() {
            return None;
        }
        let alias = parts.next().map(|a| a.trim().to_string());
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            type_name,
            alias,
            key: None,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct Lifecycle {
    pub create_before_destroy: bool,
    pub prevent_destroy: bool,
    pub ignore_changes: Vec<ValuePath>,
    pub replace_triggered_by: Vec<Reference>,
}

#[derive(Clone, Debug)]
pub struct CheckRule {
    pub condition: Expr,
    pub error_message: String,
}

#[derive(Clone, Debug)]
pub struct ResourceConfig {
    pub resource: Resource,
    pub body: Body,
    pub count: Option<Expr>,
    pub for_each: Option<Expr>,
    pub provider: Option<ProviderRef>,
    pub depends_on: Vec<Reference>,
    pub lifecycle: Lifecycle,
    pub preconditions: Vec<CheckRule>,
    pub postconditions: Vec<CheckRule>,
}

impl ResourceConfig {
    pub fn new(resource: Resource, body: Body) -> Self {
        Self {
            resource,
            body,
            count: None,
            for_each: None,
            provider: None,
            depends_on: Vec::new(),
            lifecycle: Lifecycle::default(),
            preconditions: Vec::new(),
            postconditions: Vec::new(),
        }
    }

    /// References from the body, repetition arguments, depends_on, and
    /// lifecycle triggers; the reference transformer draws edges from all
    /// of them.
    pub fn references(&self) -> Vec<Reference> {
        let mut out = self.body.references();
        if let Some(expr) = &self.count {
            out.extend(expr.references());
        }
        if let Some(expr) = &self.for_each {
            out.extend(expr.references());
        }
        out.extend(self.depends_on.iter().cloned());
        out.extend(self.lifecycle.replace_triggered_by.iter().cloned());
        for rule in self.preconditions.iter().chain(&self.postconditions) {
            out.extend(rule.condition.references());
        }
        out
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TypeConstraint {
    #[default]
    Any,
    String,
    Number,
    Bool,
    List,
    Map,
}

impl TypeConstraint {
    pub fn name(&self) -> &'static str {
        match self {
            TypeConstraint::Any => "any",
            TypeConstraint::String => "string",
            TypeConstraint::Number => "number",
            TypeConstraint::Bool => "bool",
            TypeConstraint::List => "list",
            TypeConstraint::Map => "map",
        }
    }

    pub fn allows(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) | (_, Value::Unknown) => true,
            (TypeConstraint::Any, _) => true,
            (TypeConstraint::String, Value::String(_)) => true,
            (TypeConstraint::Number, Value::Number(_)) => true,
            (TypeConstraint::Bool, Value::Bool(_)) => true,
            (TypeConstraint::List, Value::List(_)) => true,
            (TypeConstraint::Map, Value::Object(_)) => true,
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct VariableConfig {
    pub type_: TypeConstraint,
    pub default: Option<Value>,
    pub sensitive: bool,
    pub ephemeral: bool,
    pub nullable: bool,
    pub validations: Vec<CheckRule>,
}

#[derive(Clone, Debug)]
pub struct OutputConfig {
    pub value: Expr,
    pub sensitive: bool,
    pub depends_on: Vec<Reference>,
    pub preconditions: Vec<CheckRule>,
}

impl OutputConfig {
    pub fn new(value: Expr) -> Self {
        Self {
            value,
            sensitive: false,
            depends_on: Vec::new(),
            preconditions: Vec::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModuleCall {
    pub name: String,
    pub source: String,
    pub count: Option<Expr>,
    pub for_each: Option<Expr>,
    pub inputs: BTreeMap<String, Expr>,
    /// Child-local provider name to the parent configuration it aliases.
    pub providers: BTreeMap<String, ProviderRef>,
}

impl ModuleCall {
    pub fn new(name: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            count: None,
            for_each: None,
            inputs: BTreeMap::new(),
            providers: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProviderBlock {
    pub type_name: String,
    pub alias: Option<String>,
    pub for_each: Option<Expr>,
    pub body: Body,
}

/// The `to` address of an import block; the instance key may be a dynamic
/// expression evaluated at plan time.
#[derive(Clone, Debug)]
pub struct ImportTo {
    pub module: ModuleAddr,
    pub resource: Resource,
    pub key: Option<Expr>,
}

#[derive(Clone, Debug)]
pub struct ImportBlock {
    pub to: ImportTo,
    pub id: Expr,
    pub provider: Option<ProviderRef>,
}

#[derive(Clone, Debug)]
pub struct MovedBlock {
    pub from: Target,
    pub to: Target,
}

#[derive(Clone, Debug)]
pub struct RemovedBlock {
    pub from: Target,
}

#[derive(Clone, Debug)]
pub struct CheckBlock {
    pub name: String,
    pub asserts: Vec<CheckRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descend_and_lookup() {
        let mut root = Config::default();
        let mut child = Config::default();
        let res = Resource::managed("test", "x");
        child
            .module
            .resources
            .insert(res.clone(), ResourceConfig::new(res.clone(), Body::empty()));
        root.children.insert("child".to_string(), child);

        let addr = ConfigResource {
            module: ModuleAddr(vec!["child".into()]),
            resource: res,
        };
        assert!(root.resource(&addr).is_some());
        assert!(root.module(&ModuleAddr(vec!["other".into()])).is_none());
        assert_eq!(root.all_modules().len(), 2);
    }

    #[test]
    fn provider_addr_resolution_walks_up() {
        let mut root = Config::default();
        root.module
            .required_providers
            .insert("test".to_string(), ProviderAddr::new("example", "test"));
        root.children
            .insert("child".to_string(), Config::default());

        let child_addr = ModuleAddr(vec!["child".into()]);
        assert_eq!(
            root.provider_addr_for(&child_addr, "test"),
            ProviderAddr::new("example", "test")
        );
        assert_eq!(
            root.provider_addr_for(&child_addr, "other"),
            ProviderAddr::implied("other")
        );
    }

    #[test]
    fn provider_ref_parsing() {
        let r = ProviderRef::parse("test.east").unwrap();
        assert_eq!(r.type_name, "test");
        assert_eq!(r.alias.as_deref(), Some("east"));
        assert!(ProviderRef::parse("").is_none());
        assert!(ProviderRef::parse("a.b.c").is_none());
    }
}
