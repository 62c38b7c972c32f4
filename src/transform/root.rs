//! Final structural passes: the synthetic root sink and transitive
//! reduction.

use crate::error::Diagnostics;
use crate::graph::Graph;
use crate::nodes::Node;

use super::{GraphTransformer, TransformCtx};

/// Add the single root vertex every sink feeds, so the walk has one final
/// synchronization point and validation can check for strays.
pub struct RootTransformer;

impl GraphTransformer for RootTransformer {
    fn name(&self) -> &'static str {
        "root"
    }

    fn transform(&self, graph: &mut Graph<Node>, _cx: &TransformCtx) -> Diagnostics {
        let sinks = graph.sinks();
        let root = graph.add(Node::Root);
        for sink in sinks {
            graph.connect(sink, root);
        }
        Diagnostics::new()
    }
}

pub struct TransitiveReductionTransformer;

impl GraphTransformer for TransitiveReductionTransformer {
    fn name(&self) -> &'static str {
        "transitive-reduction"
    }

    fn transform(&self, graph: &mut Graph<Node>, _cx: &TransformCtx) -> Diagnostics {
        graph.transitive_reduction();
        Diagnostics::new()
    }
}
