//! Graph transformers: small, single-purpose rewriting passes composed
//! into the plan and apply pipelines. The runner logs each step, keeps
//! going past warning-only results, and stops on the first error.

mod attach;
mod config;
mod destroy;
mod diff;
mod imports;
mod orphan;
mod providers;
mod reference;
mod root;
mod targeting;

pub use attach::{AttachSchemaTransformer, AttachStateTransformer};
pub use config::{
    CheckTransformer, ConfigTransformer, LocalTransformer, ModuleExpansionTransformer,
    ModuleVariableTransformer, OutputTransformer, RootVariableTransformer,
};
pub use destroy::{CbdEdgeTransformer, DestroyEdgeTransformer, ForcedCbdTransformer};
pub use diff::DiffTransformer;
pub use imports::ImportTransformer;
pub use orphan::{OrphanResourceTransformer, RemovedTransformer};
pub use providers::{
    infer_provider_config, CloseProviderTransformer, MissingProviderTransformer,
    ProviderConfigTransformer, ProviderFunctionTransformer, ProviderInferenceTransformer,
    PruneProviderTransformer,
};
pub use reference::{
    AttachDependenciesTransformer, ExternalReferenceTransformer, ReferenceTransformer,
};
pub use root::{RootTransformer, TransitiveReductionTransformer};
pub use targeting::{PruneUnusedTransformer, TargetingTransformer};

use std::sync::Arc;

use tracing::trace;

use crate::config::Config;
use crate::context::{PlanOpts, WalkOperation};
use crate::error::Diagnostics;
use crate::graph::Graph;
use crate::nodes::Node;
use crate::plan::Changes;
use crate::providers::ProviderLibrary;
use crate::state::State;

/// Everything a transformer may consult while rewriting the graph.
pub struct TransformCtx {
    pub op: WalkOperation,
    pub config: Arc<Config>,
    /// The prior state the graph plans against (already moved/refreshed as
    /// appropriate for the phase).
    pub state: Arc<State>,
    /// The plan's ledger, present only when building an apply graph.
    pub changes: Option<Arc<Changes>>,
    pub providers: Arc<ProviderLibrary>,
    pub opts: Arc<PlanOpts>,
}

pub trait GraphTransformer {
    fn name(&self) -> &'static str;

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics;
}

/// Run a pipeline: after every transformer the graph must still be acyclic;
/// error-severity diagnostics stop the pipeline, warnings continue.
pub fn run_pipeline(
    graph: &mut Graph<Node>,
    transformers: &[Box<dyn GraphTransformer>],
    cx: &TransformCtx,
) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for transformer in transformers {
        let step = transformer.transform(graph, cx);
        let failed = step.has_errors();
        trace!(
            transformer = transformer.name(),
            vertices = graph.len(),
            failed,
            "transform step"
        );
        diags.extend(step);
        if failed {
            return diags;
        }
        if let Err(e) = graph.validate(false) {
            diags.push(crate::error::Diagnostic::from(e));
            return diags;
        }
    }
    diags
}

/// The plan pipeline: configuration into a validated plan graph.
pub fn plan_transformers() -> Vec<Box<dyn GraphTransformer>> {
    vec![
        Box::new(ConfigTransformer),
        Box::new(RootVariableTransformer),
        Box::new(ModuleVariableTransformer),
        Box::new(LocalTransformer),
        Box::new(OutputTransformer),
        Box::new(CheckTransformer),
        Box::new(OrphanResourceTransformer),
        Box::new(RemovedTransformer),
        Box::new(AttachStateTransformer),
        Box::new(ImportTransformer),
        Box::new(ProviderConfigTransformer),
        Box::new(MissingProviderTransformer),
        Box::new(ProviderInferenceTransformer),
        Box::new(AttachSchemaTransformer),
        Box::new(ProviderFunctionTransformer),
        Box::new(ModuleExpansionTransformer),
        Box::new(ReferenceTransformer),
        Box::new(AttachDependenciesTransformer),
        Box::new(TargetingTransformer),
        Box::new(ForcedCbdTransformer),
        Box::new(DestroyEdgeTransformer),
        Box::new(CbdEdgeTransformer),
        Box::new(ExternalReferenceTransformer),
        Box::new(PruneProviderTransformer),
        Box::new(CloseProviderTransformer),
        Box::new(RootTransformer),
        Box::new(TransitiveReductionTransformer),
    ]
}

/// The apply pipeline: a plan's ledger into a validated apply graph.
pub fn apply_transformers() -> Vec<Box<dyn GraphTransformer>> {
    vec![
        Box::new(ConfigTransformer),
        Box::new(RootVariableTransformer),
        Box::new(ModuleVariableTransformer),
        Box::new(LocalTransformer),
        Box::new(OutputTransformer),
        Box::new(DiffTransformer),
        Box::new(CheckTransformer),
        Box::new(ProviderConfigTransformer),
        Box::new(MissingProviderTransformer),
        Box::new(ProviderInferenceTransformer),
        Box::new(AttachSchemaTransformer),
        Box::new(ProviderFunctionTransformer),
        Box::new(ModuleExpansionTransformer),
        Box::new(ReferenceTransformer),
        Box::new(AttachDependenciesTransformer),
        Box::new(ForcedCbdTransformer),
        Box::new(DestroyEdgeTransformer),
        Box::new(CbdEdgeTransformer),
        Box::new(ExternalReferenceTransformer),
        Box::new(PruneUnusedTransformer),
        Box::new(TargetingTransformer),
        Box::new(PruneProviderTransformer),
        Box::new(CloseProviderTransformer),
        Box::new(RootTransformer),
        Box::new(TransitiveReductionTransformer),
    ]
}

/// Build and fully validate a graph for the given phase.
pub fn build_graph(
    transformers: &[Box<dyn GraphTransformer>],
    cx: &TransformCtx,
) -> (Graph<Node>, Diagnostics) {
    let mut graph = Graph::new();
    let mut diags = run_pipeline(&mut graph, transformers, cx);
    if !diags.has_errors() {
        if let Err(e) = graph.validate(true) {
            diags.push(crate::error::Diagnostic::from(e));
        }
    }
    (graph, diags)
}
