//! Reference-driven transformers: edges from providers of a value to its
//! consumers, dependency attachment for state recording, and the
//! external-reference pass.

use std::collections::HashMap;

use crate::addrs::ConfigResource;
use crate::error::Diagnostics;
use crate::graph::Graph;
use crate::lang::RefOrigin;
use crate::nodes::{resolve_ref, Node, RefKey};

use super::{GraphTransformer, TransformCtx};

/// Add an edge from A to B whenever B's configuration references something
/// A provides. Sees through nested blocks and index expressions because
/// node reference extraction already does.
pub struct ReferenceTransformer;

impl GraphTransformer for ReferenceTransformer {
    fn name(&self) -> &'static str {
        "references"
    }

    fn transform(&self, graph: &mut Graph<Node>, _cx: &TransformCtx) -> Diagnostics {
        let mut providers: HashMap<RefKey, Vec<crate::graph::NodeId>> = HashMap::new();
        for id in graph.ids() {
            let Some(node) = graph.node(id).cloned() else { continue };
            for key in node.referenceable() {
                providers.entry(key).or_default().push(id);
            }
        }

        for id in graph.ids() {
            let Some(node) = graph.node(id).cloned() else { continue };
            for (module, reference) in node.references() {
                let Some(key) = resolve_ref(&module, &reference) else { continue };
                if let Some(sources) = providers.get(&key) {
                    for &source in sources {
                        graph.connect(source, id);
                    }
                }
            }
        }
        Diagnostics::new()
    }
}

/// Record, on each static resource vertex, the config-level resources it
/// references; instances copy them into created objects so destroys order
/// correctly in later runs.
pub struct AttachDependenciesTransformer;

impl GraphTransformer for AttachDependenciesTransformer {
    fn name(&self) -> &'static str {
        "attach-dependencies"
    }

    fn transform(&self, graph: &mut Graph<Node>, _cx: &TransformCtx) -> Diagnostics {
        for id in graph.ids() {
            let Some(node) = graph.node(id).cloned() else { continue };
            let Node::PlanResource(n) = node.as_ref() else { continue };

            let mut deps: Vec<ConfigResource> = Vec::new();
            for (module, reference) in node.references() {
                if let RefOrigin::Resource(resource) = &reference.origin {
                    let dep = ConfigResource {
                        module: module.clone(),
                        resource: resource.clone(),
                    };
                    if dep != n.addr && !deps.contains(&dep) {
                        deps.push(dep);
                    }
                }
            }
            if !deps.is_empty() {
                let mut updated = n.clone();
                updated.dependencies = deps;
                graph.replace(id, Node::PlanResource(updated));
            }
        }
        Diagnostics::new()
    }
}

/// References held by the embedder are honored during pruning; the pass
/// itself only records that they exist.
pub struct ExternalReferenceTransformer;

impl GraphTransformer for ExternalReferenceTransformer {
    fn name(&self) -> &'static str {
        "external-references"
    }

    fn transform(&self, _graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        if !cx.opts.external_references.is_empty() {
            tracing::debug!(
                count = cx.opts.external_references.len(),
                "external references held; pruning will keep their targets"
            );
        }
        Diagnostics::new()
    }
}
