//! Destroy ordering: edges that run destroys after everything that still
//! depends on the destroyed object, reversed ordering between dependent
//! destroys, and the create-before-destroy rewiring.

use std::collections::HashMap;

use crate::addrs::AbsResource;
use crate::error::{Diagnostic, Diagnostics};
use crate::graph::{Graph, NodeId};
use crate::nodes::{ApplyPhase, Node};
use crate::plan::Action;

use super::{GraphTransformer, TransformCtx};

fn is_destroy_vertex(node: &Node) -> bool {
    match node {
        Node::ApplyInstance(n) => {
            n.phase == ApplyPhase::ReapDeposed || matches!(n.change.action, Action::Delete)
        }
        _ => false,
    }
}

fn is_desired_vertex(node: &Node) -> bool {
    match node {
        Node::ApplyInstance(n) => {
            n.phase != ApplyPhase::ReapDeposed
                && matches!(
                    n.change.action,
                    Action::Create
                        | Action::Update
                        | Action::Read
                        | Action::DeleteThenCreate
                        | Action::CreateThenDelete
                )
        }
        _ => false,
    }
}

/// The resources an apply vertex's object depended on when it was created,
/// read from the prior state.
fn prior_dependencies(cx: &TransformCtx, node: &Node) -> Vec<AbsResource> {
    let Node::ApplyInstance(n) = node else { return Vec::new() };
    let instance = match cx.state.resource_instance(&n.change.addr) {
        Some(i) => i,
        None => return Vec::new(),
    };
    match &n.change.deposed {
        Some(key) => instance
            .deposed
            .get(key)
            .map(|o| o.dependencies.clone())
            .unwrap_or_default(),
        None => instance
            .current
            .as_ref()
            .map(|o| o.dependencies.clone())
            .unwrap_or_default(),
    }
}

/// For every destroy in the ledger: the destroy runs after every desired
/// vertex whose object depends on the destroyed resource, and dependent
/// destroys run in reverse dependency order.
pub struct DestroyEdgeTransformer;

impl GraphTransformer for DestroyEdgeTransformer {
    fn name(&self) -> &'static str {
        "destroy-edges"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        let mut destroyers: HashMap<AbsResource, Vec<NodeId>> = HashMap::new();
        let mut desired: Vec<(NodeId, Vec<AbsResource>)> = Vec::new();
        let mut destroyer_deps: Vec<(NodeId, AbsResource, Vec<AbsResource>)> = Vec::new();

        for id in graph.ids() {
            let Some(node) = graph.node(id).cloned() else { continue };
            if is_destroy_vertex(&node) {
                if let Node::ApplyInstance(n) = node.as_ref() {
                    let resource = n.change.addr.resource.clone();
                    destroyers.entry(resource.clone()).or_default().push(id);
                    destroyer_deps.push((id, resource, prior_dependencies(cx, &node)));
                }
            } else if is_desired_vertex(&node) {
                let deps = prior_dependencies(cx, &node);
                if !deps.is_empty() {
                    desired.push((id, deps));
                }
            }
        }

        // Desired vertices finish before the destroy of anything their
        // prior object depended on.
        for (id, deps) in &desired {
            for dep in deps {
                if let Some(targets) = destroyers.get(dep) {
                    for &target in targets {
                        graph.connect(*id, target);
                    }
                }
            }
        }

        // When A depended on B and both are being destroyed, A's destroy
        // runs first.
        for (id, _resource, deps) in &destroyer_deps {
            for dep in deps {
                if let Some(targets) = destroyers.get(dep) {
                    for &target in targets {
                        graph.connect(*id, target);
                    }
                }
            }
        }

        Diagnostics::new()
    }
}

/// Create-before-destroy rewiring: dependents of a replaced resource switch
/// over after the new object exists and before the deposed one is reaped.
/// Reports a precise error when the rewiring would create a cycle.
pub struct CbdEdgeTransformer;

impl GraphTransformer for CbdEdgeTransformer {
    fn name(&self) -> &'static str {
        "cbd-edges"
    }

    fn transform(&self, graph: &mut Graph<Node>, _cx: &TransformCtx) -> Diagnostics {
        // Pair each create-before-destroy create vertex with its reap
        // vertex at the same address.
        let mut creates: Vec<(NodeId, crate::addrs::AbsResourceInstance)> = Vec::new();
        let mut reaps: HashMap<crate::addrs::AbsResourceInstance, NodeId> = HashMap::new();
        for id in graph.ids() {
            match graph.node(id).map(|n| n.as_ref()) {
                Some(Node::ApplyInstance(n)) => match n.phase {
                    ApplyPhase::CreateBeforeDestroy => {
                        creates.push((id, n.change.addr.clone()))
                    }
                    ApplyPhase::ReapDeposed => {
                        reaps.insert(n.change.addr.clone(), id);
                    }
                    ApplyPhase::Full => {}
                },
                _ => {}
            }
        }

        let mut diags = Diagnostics::new();
        for (create_id, addr) in creates {
            let Some(&reap_id) = reaps.get(&addr) else {
                diags.push(Diagnostic::internal(format!(
                    "create-before-destroy of {} has no reap vertex",
                    addr
                )));
                continue;
            };
            graph.connect(create_id, reap_id);
            // Every dependent that consumes the new object finishes before
            // the old object is reaped.
            for dependent in graph.successors(create_id) {
                if dependent != reap_id {
                    graph.connect(dependent, reap_id);
                }
            }

            if let Err(e) = graph.validate(false) {
                diags.push(Diagnostic::error(
                    "Cycle in create-before-destroy dependencies",
                    format!(
                        "replacing {} with create_before_destroy ordering is impossible: {}",
                        addr, e
                    ),
                ));
                return diags;
            }
        }
        diags
    }
}

/// Propagate the create-before-destroy property: when any dependent of X
/// requires it, X requires it too.
pub struct ForcedCbdTransformer;

impl GraphTransformer for ForcedCbdTransformer {
    fn name(&self) -> &'static str {
        "forced-cbd"
    }

    fn transform(&self, graph: &mut Graph<Node>, _cx: &TransformCtx) -> Diagnostics {
        loop {
            let mut changed = false;
            for id in graph.ids() {
                let Some(node) = graph.node(id).cloned() else { continue };
                let Node::PlanResource(n) = node.as_ref() else { continue };
                if n.force_cbd || n.config.lifecycle.create_before_destroy {
                    continue;
                }
                let forced = graph.successors(id).into_iter().any(|succ| {
                    match graph.node(succ).map(|s| s.as_ref()) {
                        Some(Node::PlanResource(s)) => {
                            s.force_cbd || s.config.lifecycle.create_before_destroy
                        }
                        _ => false,
                    }
                });
                if forced {
                    let mut updated = n.clone();
                    updated.force_cbd = true;
                    graph.replace(id, Node::PlanResource(updated));
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        Diagnostics::new()
    }
}
