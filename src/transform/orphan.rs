//! Orphan handling: state resources with no configuration counterpart plan
//! destroys, and `removed` blocks downgrade those destroys to forgets.

use crate::error::Diagnostics;
use crate::graph::Graph;
use crate::nodes::{Node, OrphanResourceNode};
use crate::plan::ActionReason;

use super::{GraphTransformer, TransformCtx};

/// One vertex per state resource whose configuration is gone, covering
/// both dropped resource blocks and whole orphaned modules.
pub struct OrphanResourceTransformer;

impl GraphTransformer for OrphanResourceTransformer {
    fn name(&self) -> &'static str {
        "orphan-resources"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        for (addr, resource_state) in &cx.state.resources {
            if resource_state.is_empty() {
                continue;
            }
            let config_addr = addr.config();
            if cx.config.resource(&config_addr).is_some() {
                continue;
            }

            let reason = if cx.config.module(&config_addr.module).is_some() {
                ActionReason::DeleteBecauseNoResourceConfig
            } else {
                ActionReason::DeleteBecauseNoModule
            };

            let instances = resource_state
                .instances
                .iter()
                .map(|(key, instance)| {
                    (key.clone(), instance.deposed.keys().cloned().collect())
                })
                .collect();

            graph.add(Node::OrphanResource(OrphanResourceNode {
                addr: addr.clone(),
                provider: resource_state.provider.clone(),
                instances,
                forget: false,
                schema: None,
                reason,
            }));
        }
        Diagnostics::new()
    }
}

/// Apply `removed` blocks: matching orphans are forgotten rather than
/// destroyed, leaving the remote objects in place.
pub struct RemovedTransformer;

impl GraphTransformer for RemovedTransformer {
    fn name(&self) -> &'static str {
        "removed-blocks"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        let mut removed_targets = Vec::new();
        for (_, module) in cx.config.all_modules() {
            for block in &module.removed {
                removed_targets.push(block.from.clone());
            }
        }
        if removed_targets.is_empty() {
            return Diagnostics::new();
        }

        for id in graph.ids() {
            let Some(node) = graph.node(id).cloned() else { continue };
            let Node::OrphanResource(n) = node.as_ref() else { continue };
            if removed_targets.iter().any(|t| t.contains_resource(&n.addr)) {
                let mut updated = n.clone();
                updated.forget = true;
                graph.replace(id, Node::OrphanResource(updated));
            }
        }
        Diagnostics::new()
    }
}
