//! State-attachment checks. Vertices read the working state through the
//! walk context; this pass guards the invariant behind that: every state
//! resource must be claimed by exactly one vertex, configured or orphan.

use std::collections::HashSet;

use crate::error::{Diagnostic, Diagnostics};
use crate::graph::Graph;
use crate::nodes::Node;

use super::{GraphTransformer, TransformCtx};

pub use super::providers::AttachSchemaTransformer;

pub struct AttachStateTransformer;

impl GraphTransformer for AttachStateTransformer {
    fn name(&self) -> &'static str {
        "attach-state"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        let mut claimed: HashSet<String> = HashSet::new();
        for id in graph.ids() {
            match graph.node(id).map(|n| n.as_ref()) {
                Some(Node::PlanResource(n)) => {
                    claimed.insert(n.addr.to_string());
                }
                Some(Node::OrphanResource(n)) => {
                    claimed.insert(n.addr.config().to_string());
                }
                _ => {}
            }
        }

        let mut diags = Diagnostics::new();
        for (addr, resource_state) in &cx.state.resources {
            if resource_state.is_empty() {
                continue;
            }
            if !claimed.contains(&addr.config().to_string()) {
                diags.push(Diagnostic::internal(format!(
                    "state resource {} is claimed by no graph vertex",
                    addr
                )));
            }
        }
        diags
    }
}
