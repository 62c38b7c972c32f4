//! The typed vertices of the execution graph. The taxonomy is finite and
//! closed, so dispatch is an exhaustive match rather than open-set
//! indirection; optional capabilities (dynamic expansion, attachment
//! points) are methods the variants that need them implement.

mod import;
mod provider;
mod resource_apply;
mod resource_plan;
mod values;

pub use import::{ImportInstanceNode, ImportNode};
pub use provider::ProviderNode;
pub use resource_apply::{ApplyInstanceNode, ApplyPhase};
pub use resource_plan::{OrphanResourceNode, PlanInstanceNode, PlanResourceNode, ProviderRequest};
pub use values::{
    CheckNode, LocalNode, ModuleExpandNode, ModuleVariableNode, OutputNode, RootVariableNode,
};

use crate::addrs::{ConfigResource, ModuleAddr, ProviderConfigAddr};
use crate::context::WalkContext;
use crate::graph::{GraphNode, NodeResult};
use crate::lang::{RefOrigin, Reference};

/// What a node makes referenceable to other nodes; the reference
/// transformer keys its edge map by these.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefKey {
    Variable(ModuleAddr, String),
    Local(ModuleAddr, String),
    ModuleCall(ModuleAddr, String),
    Resource(ConfigResource),
}

/// Resolve one reference made from inside `module` to the key of the node
/// that provides it. Repetition symbols resolve to nothing; they are
/// instance-local.
pub fn resolve_ref(module: &ModuleAddr, reference: &Reference) -> Option<RefKey> {
    match &reference.origin {
        RefOrigin::InputVariable(name) => Some(RefKey::Variable(module.clone(), name.clone())),
        RefOrigin::LocalValue(name) => Some(RefKey::Local(module.clone(), name.clone())),
        RefOrigin::ModuleCall(name) => Some(RefKey::ModuleCall(module.clone(), name.clone())),
        RefOrigin::Resource(resource) => Some(RefKey::Resource(ConfigResource {
            module: module.clone(),
            resource: resource.clone(),
        })),
        RefOrigin::CountIndex | RefOrigin::EachKey | RefOrigin::EachValue => None,
    }
}

#[derive(Clone)]
pub enum Node {
    /// The synthetic sink every other vertex precedes.
    Root,
    Provider(ProviderNode),
    ProviderClose { addr: ProviderConfigAddr },
    RootVariable(RootVariableNode),
    ModuleVariable(ModuleVariableNode),
    Local(LocalNode),
    Output(OutputNode),
    ModuleExpand(ModuleExpandNode),
    Check(CheckNode),
    PlanResource(PlanResourceNode),
    PlanInstance(PlanInstanceNode),
    OrphanResource(OrphanResourceNode),
    ApplyInstance(ApplyInstanceNode),
    Import(ImportNode),
    ImportInstance(ImportInstanceNode),
}

impl GraphNode for Node {
    fn node_name(&self) -> String {
        match self {
            Node::Root => "root".to_string(),
            Node::Provider(n) => n.addr.to_string(),
            Node::ProviderClose { addr } => format!("{} (close)", addr),
            Node::RootVariable(n) => format!("var.{}", n.name),
            Node::ModuleVariable(n) => {
                format!("{}.var.{}", n.module, n.name)
            }
            Node::Local(n) => {
                if n.module.is_root() {
                    format!("local.{}", n.name)
                } else {
                    format!("{}.local.{}", n.module, n.name)
                }
            }
            Node::Output(n) => {
                if n.module.is_root() {
                    format!("output.{}", n.name)
                } else {
                    format!("{}.output.{}", n.module, n.name)
                }
            }
            Node::ModuleExpand(n) => {
                if n.parent.is_root() {
                    format!("module.{} (expand)", n.call.name)
                } else {
                    format!("{}.module.{} (expand)", n.parent, n.call.name)
                }
            }
            Node::Check(n) => {
                if n.module.is_root() {
                    format!("check.{}", n.block.name)
                } else {
                    format!("{}.check.{}", n.module, n.block.name)
                }
            }
            Node::PlanResource(n) => n.addr.to_string(),
            Node::PlanInstance(n) => match &n.deposed {
                Some(key) => format!("{} (deposed {})", n.addr, key),
                None if n.destroy_only => format!("{} (destroy)", n.addr),
                None => n.addr.to_string(),
            },
            Node::OrphanResource(n) => format!("{} (orphan)", n.addr),
            Node::ApplyInstance(n) => match n.phase {
                ApplyPhase::ReapDeposed => format!("{} (reap deposed)", n.change.addr),
                _ => match &n.change.deposed {
                    Some(key) => format!("{} (deposed {})", n.change.addr, key),
                    None => n.change.addr.to_string(),
                },
            },
            Node::Import(n) => format!("import {}.{}", n.resource.type_, n.resource.name),
            Node::ImportInstance(n) => format!("import {}", n.addr),
        }
    }
}

impl Node {
    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        match self {
            Node::Root => NodeResult::ok(),
            Node::Provider(n) => n.execute(ctx),
            Node::ProviderClose { addr } => {
                ctx.close_provider(addr);
                NodeResult::ok()
            }
            Node::RootVariable(n) => n.execute(ctx),
            Node::ModuleVariable(n) => n.execute(ctx),
            Node::Local(n) => n.execute(ctx),
            Node::Output(n) => n.execute(ctx),
            Node::ModuleExpand(n) => n.execute(ctx),
            Node::Check(n) => n.execute(ctx),
            Node::PlanResource(n) => n.execute(ctx),
            Node::PlanInstance(n) => n.execute(ctx),
            Node::OrphanResource(n) => n.execute(ctx),
            Node::ApplyInstance(n) => n.execute(ctx),
            Node::Import(n) => n.execute(ctx),
            Node::ImportInstance(n) => n.execute(ctx),
        }
    }

    /// References this node's expressions make, paired with the module
    /// whose scope they resolve in.
    pub fn references(&self) -> Vec<(ModuleAddr, Reference)> {
        match self {
            Node::Root | Node::ProviderClose { .. } | Node::RootVariable(_) => Vec::new(),
            Node::Provider(n) => n.references(),
            Node::ModuleVariable(n) => n.references(),
            Node::Local(n) => n
                .expr
                .references()
                .into_iter()
                .map(|r| (n.module.clone(), r))
                .collect(),
            Node::Output(n) => n.references(),
            Node::ModuleExpand(n) => n.references(),
            Node::Check(n) => n.references(),
            Node::PlanResource(n) => n
                .config
                .references()
                .into_iter()
                .map(|r| (n.addr.module.clone(), r))
                .collect(),
            Node::PlanInstance(n) => match &n.config {
                Some(config) => config
                    .references()
                    .into_iter()
                    .map(|r| (n.addr.config().module, r))
                    .collect(),
                None => Vec::new(),
            },
            Node::OrphanResource(_) => Vec::new(),
            // Pure destroys never evaluate configuration; giving them
            // reference edges would fight the destroy-edge ordering.
            Node::ApplyInstance(n)
                if n.phase == ApplyPhase::ReapDeposed
                    || matches!(
                        n.change.action,
                        crate::plan::Action::Delete | crate::plan::Action::Forget
                    ) =>
            {
                Vec::new()
            }
            Node::ApplyInstance(n) => match &n.config {
                Some(config) => config
                    .references()
                    .into_iter()
                    .map(|r| (n.change.addr.config().module, r))
                    .collect(),
                None => Vec::new(),
            },
            Node::Import(n) => n.references(),
            Node::ImportInstance(_) => Vec::new(),
        }
    }

    /// The keys this node provides for others to reference.
    pub fn referenceable(&self) -> Vec<RefKey> {
        match self {
            Node::RootVariable(n) => {
                vec![RefKey::Variable(ModuleAddr::root(), n.name.clone())]
            }
            Node::ModuleVariable(n) => {
                vec![RefKey::Variable(n.module.clone(), n.name.clone())]
            }
            Node::Local(n) => vec![RefKey::Local(n.module.clone(), n.name.clone())],
            Node::Output(n) => match n.module.parent() {
                Some((parent, call_name)) => vec![RefKey::ModuleCall(
                    parent,
                    call_name.to_string(),
                )],
                None => Vec::new(),
            },
            Node::ModuleExpand(n) => {
                vec![RefKey::ModuleCall(n.parent.clone(), n.call.name.clone())]
            }
            Node::PlanResource(n) => vec![RefKey::Resource(n.addr.clone())],
            Node::PlanInstance(n) => vec![RefKey::Resource(n.addr.config())],
            // Only value-producing applies stand in for the resource;
            // destroys are ordered by the destroy-edge transformers and
            // must not masquerade as value providers.
            Node::ApplyInstance(n) => match n.change.action {
                crate::plan::Action::Create
                | crate::plan::Action::Update
                | crate::plan::Action::Read
                | crate::plan::Action::DeleteThenCreate
                | crate::plan::Action::CreateThenDelete
                    if n.phase != ApplyPhase::ReapDeposed =>
                {
                    vec![RefKey::Resource(n.change.addr.config())]
                }
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// The static module path whose instances this node iterates when it
    /// executes; module-expansion edges key off this.
    pub fn module_path(&self) -> ModuleAddr {
        match self {
            Node::Root | Node::ProviderClose { .. } | Node::RootVariable(_) => ModuleAddr::root(),
            Node::Provider(n) => n.addr.module.clone(),
            Node::ModuleVariable(n) => n.module.clone(),
            Node::Local(n) => n.module.clone(),
            Node::Output(n) => n.module.clone(),
            Node::ModuleExpand(n) => n.parent.clone(),
            Node::Check(n) => n.module.clone(),
            Node::PlanResource(n) => n.addr.module.clone(),
            Node::PlanInstance(n) => n.addr.config().module,
            Node::OrphanResource(n) => n.addr.module.module(),
            Node::ApplyInstance(n) => n.change.addr.config().module,
            Node::Import(n) => n.module.clone(),
            Node::ImportInstance(n) => n.addr.config().module,
        }
    }

    /// The provider configuration this node must run after, if any.
    pub fn provider_dependency(&self) -> Option<ProviderConfigAddr> {
        match self {
            Node::PlanResource(n) => n.provider.as_ref().map(|p| p.config_addr.clone()),
            Node::PlanInstance(n) => Some(n.provider.config.clone()),
            Node::OrphanResource(n) => Some(n.provider.clone()),
            Node::ApplyInstance(n) => Some(n.change.provider.config.clone()),
            Node::Import(n) => Some(n.provider.config_addr.clone()),
            Node::ImportInstance(n) => Some(n.provider.config.clone()),
            _ => None,
        }
    }

    /// Non-builtin function names this node's expressions call, for wiring
    /// provider-function edges.
    pub fn called_functions(&self) -> Vec<String> {
        fn collect_expr(expr: &crate::lang::Expr, out: &mut Vec<String>) {
            use crate::lang::Expr;
            match expr {
                Expr::Call { name, args } => {
                    out.push(name.clone());
                    for arg in args {
                        collect_expr(arg, out);
                    }
                }
                Expr::Binary { lhs, rhs, .. } => {
                    collect_expr(lhs, out);
                    collect_expr(rhs, out);
                }
                Expr::Conditional {
                    cond,
                    then,
                    otherwise,
                } => {
                    collect_expr(cond, out);
                    collect_expr(then, out);
                    collect_expr(otherwise, out);
                }
                Expr::List(items) => {
                    for item in items {
                        collect_expr(item, out);
                    }
                }
                Expr::Object(fields) => {
                    for (_, e) in fields {
                        collect_expr(e, out);
                    }
                }
                Expr::Ref(r) => {
                    for step in &r.steps {
                        if let crate::lang::RefStep::Index(e) = step {
                            collect_expr(e, out);
                        }
                    }
                }
                Expr::Literal(_) => {}
            }
        }

        let mut out = Vec::new();
        let mut exprs: Vec<&crate::lang::Expr> = Vec::new();
        match self {
            Node::PlanResource(n) => {
                exprs.extend(n.config.body.attrs.values());
                exprs.extend(n.config.count.iter());
                exprs.extend(n.config.for_each.iter());
            }
            Node::PlanInstance(n) => {
                if let Some(config) = &n.config {
                    exprs.extend(config.body.attrs.values());
                }
            }
            Node::ApplyInstance(n) => {
                if let Some(config) = &n.config {
                    exprs.extend(config.body.attrs.values());
                }
            }
            Node::Local(n) => exprs.push(&n.expr),
            Node::Output(n) => exprs.push(&n.config.value),
            _ => {}
        }
        for expr in exprs {
            collect_expr(expr, &mut out);
        }
        out
    }
}
