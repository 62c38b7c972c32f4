//! Configuration-driven transformers: one vertex per resource block,
//! variable, local, output, check block, and module call in the tree.

use crate::addrs::ConfigResource;
use crate::error::Diagnostics;
use crate::graph::Graph;
use crate::nodes::{
    CheckNode, LocalNode, ModuleExpandNode, ModuleVariableNode, Node, OutputNode,
    PlanResourceNode, RootVariableNode,
};

use super::{GraphTransformer, TransformCtx};

/// One static resource vertex per resource block in every module.
pub struct ConfigTransformer;

impl GraphTransformer for ConfigTransformer {
    fn name(&self) -> &'static str {
        "config"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        for (module_addr, module) in cx.config.all_modules() {
            for (resource, config) in &module.resources {
                graph.add(Node::PlanResource(PlanResourceNode {
                    addr: ConfigResource {
                        module: module_addr.clone(),
                        resource: resource.clone(),
                    },
                    config: config.clone(),
                    provider: None,
                    schema: None,
                    force_cbd: false,
                    dependencies: Vec::new(),
                }));
            }
        }
        Diagnostics::new()
    }
}

pub struct RootVariableTransformer;

impl GraphTransformer for RootVariableTransformer {
    fn name(&self) -> &'static str {
        "root-variables"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        for (name, config) in &cx.config.module.variables {
            graph.add(Node::RootVariable(RootVariableNode {
                name: name.clone(),
                config: config.clone(),
            }));
        }
        Diagnostics::new()
    }
}

pub struct ModuleVariableTransformer;

impl GraphTransformer for ModuleVariableTransformer {
    fn name(&self) -> &'static str {
        "module-variables"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        for (module_addr, module) in cx.config.all_modules() {
            if module_addr.is_root() {
                continue;
            }
            let Some((parent_addr, call_name)) = module_addr.parent() else { continue };
            let call = cx
                .config
                .module(&parent_addr)
                .and_then(|m| m.module_calls.get(call_name));
            for (name, config) in &module.variables {
                let arg = call.and_then(|c| c.inputs.get(name)).cloned();
                graph.add(Node::ModuleVariable(ModuleVariableNode {
                    module: module_addr.clone(),
                    name: name.clone(),
                    config: config.clone(),
                    arg,
                }));
            }
        }
        Diagnostics::new()
    }
}

pub struct LocalTransformer;

impl GraphTransformer for LocalTransformer {
    fn name(&self) -> &'static str {
        "locals"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        for (module_addr, module) in cx.config.all_modules() {
            for (name, expr) in &module.locals {
                graph.add(Node::Local(LocalNode {
                    module: module_addr.clone(),
                    name: name.clone(),
                    expr: expr.clone(),
                }));
            }
        }
        Diagnostics::new()
    }
}

pub struct OutputTransformer;

impl GraphTransformer for OutputTransformer {
    fn name(&self) -> &'static str {
        "outputs"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        for (module_addr, module) in cx.config.all_modules() {
            for (name, config) in &module.outputs {
                graph.add(Node::Output(OutputNode {
                    module: module_addr.clone(),
                    name: name.clone(),
                    config: config.clone(),
                }));
            }
        }
        Diagnostics::new()
    }
}

pub struct CheckTransformer;

impl GraphTransformer for CheckTransformer {
    fn name(&self) -> &'static str {
        "checks"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        for (module_addr, module) in cx.config.all_modules() {
            for block in &module.checks {
                graph.add(Node::Check(CheckNode {
                    module: module_addr.clone(),
                    block: block.clone(),
                }));
            }
        }
        Diagnostics::new()
    }
}

/// One expansion vertex per module call, wired before everything living
/// inside that call's subtree.
pub struct ModuleExpansionTransformer;

impl GraphTransformer for ModuleExpansionTransformer {
    fn name(&self) -> &'static str {
        "module-expansion"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        let mut expand_ids = Vec::new();
        for (module_addr, module) in cx.config.all_modules() {
            for call in module.module_calls.values() {
                let id = graph.add(Node::ModuleExpand(ModuleExpandNode {
                    parent: module_addr.clone(),
                    call: call.clone(),
                }));
                expand_ids.push((module_addr.child(&call.name), id));
            }
        }

        // Everything whose module path sits inside the call's subtree runs
        // after the call's expansion is registered.
        for id in graph.ids() {
            let Some(path) = graph.node(id).map(|n| n.module_path()) else {
                continue;
            };
            for (call_path, expand_id) in &expand_ids {
                if *expand_id != id && call_path.contains(&path) {
                    graph.connect(*expand_id, id);
                }
            }
        }
        Diagnostics::new()
    }
}
