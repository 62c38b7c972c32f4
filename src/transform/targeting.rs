//! Targeting and pruning: reduce the graph to the requested subset and
//! drop vertices with nothing downstream to feed.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::Diagnostics;
use crate::graph::{Graph, NodeId};
use crate::nodes::{resolve_ref, Node, RefKey};

use super::{GraphTransformer, TransformCtx};

fn is_targetable(node: &Node) -> bool {
    matches!(
        node,
        Node::PlanResource(_) | Node::OrphanResource(_) | Node::ApplyInstance(_)
    )
}

fn matches_target(node: &Node, targets: &[crate::addrs::Target]) -> bool {
    targets.iter().any(|t| match node {
        Node::PlanResource(n) => t.contains_config_resource(&n.addr),
        Node::OrphanResource(n) => t.contains_resource(&n.addr),
        Node::ApplyInstance(n) => t.contains(&n.change.addr),
        _ => false,
    })
}

/// Remove resource vertices outside the target set (keeping everything the
/// kept set depends on), or inside the excluded set along with their
/// dependents.
pub struct TargetingTransformer;

impl GraphTransformer for TargetingTransformer {
    fn name(&self) -> &'static str {
        "targeting"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        if !cx.opts.targets.is_empty() {
            let mut keep: BTreeSet<NodeId> = BTreeSet::new();
            for id in graph.ids() {
                let Some(node) = graph.node(id).cloned() else { continue };
                if is_targetable(&node) && matches_target(&node, &cx.opts.targets) {
                    keep.insert(id);
                    keep.extend(graph.ancestors(id));
                }
            }
            let mut removed = 0usize;
            for id in graph.ids() {
                let Some(node) = graph.node(id).cloned() else { continue };
                if is_targetable(&node) && !keep.contains(&id) {
                    graph.remove(id);
                    removed += 1;
                }
            }
            debug!(removed, "targeting removed untargeted resource vertices");
        }

        if !cx.opts.excludes.is_empty() {
            let mut drop: BTreeSet<NodeId> = BTreeSet::new();
            for id in graph.ids() {
                let Some(node) = graph.node(id).cloned() else { continue };
                if is_targetable(&node) && matches_target(&node, &cx.opts.excludes) {
                    drop.insert(id);
                    for descendant in graph.descendants(id) {
                        let Some(desc) = graph.node(descendant).cloned() else { continue };
                        if is_targetable(&desc) {
                            drop.insert(descendant);
                        }
                    }
                }
            }
            let count = drop.len();
            for id in drop {
                graph.remove(id);
            }
            debug!(removed = count, "exclusion removed resource vertices");
        }

        Diagnostics::new()
    }
}

/// Remove named-value vertices that feed no resource, import, or check
/// vertex. External references held by the embedder are kept.
pub struct PruneUnusedTransformer;

impl GraphTransformer for PruneUnusedTransformer {
    fn name(&self) -> &'static str {
        "prune-unused"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        let externally_held: Vec<RefKey> = cx
            .opts
            .external_references
            .iter()
            .filter_map(|r| resolve_ref(&crate::addrs::ModuleAddr::root(), r))
            .collect();

        loop {
            let mut removed_any = false;
            for id in graph.ids() {
                let Some(node) = graph.node(id).cloned() else { continue };
                let prunable = matches!(
                    node.as_ref(),
                    Node::RootVariable(_)
                        | Node::ModuleVariable(_)
                        | Node::Local(_)
                        | Node::Output(_)
                        | Node::ModuleExpand(_)
                );
                if !prunable {
                    continue;
                }
                if node
                    .referenceable()
                    .iter()
                    .any(|key| externally_held.contains(key))
                {
                    continue;
                }
                let feeds_work = graph.descendants(id).into_iter().any(|d| {
                    matches!(
                        graph.node(d).map(|n| n.as_ref()),
                        Some(
                            Node::PlanResource(_)
                                | Node::PlanInstance(_)
                                | Node::OrphanResource(_)
                                | Node::ApplyInstance(_)
                                | Node::Import(_)
                                | Node::ImportInstance(_)
                                | Node::Check(_)
                        )
                    )
                });
                if !feeds_work {
                    graph.remove(id);
                    removed_any = true;
                }
            }
            if !removed_any {
                break;
            }
        }
        Diagnostics::new()
    }
}
