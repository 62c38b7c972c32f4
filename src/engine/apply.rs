//! The apply driver: consume a plan's ledger, rebuild the graph, walk it,
//! and finalize state. Always returns the working state, even after
//! partial failure, because side effects already happened.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::Engine;
use crate::config::Config;
use crate::context::{PlanOpts, WalkContext, WalkOperation};
use crate::error::{Diagnostic, Diagnostics};
use crate::plan::{Action, Plan, PlanMode};
use crate::state::{State, SyncState};
use crate::transform::{apply_transformers, build_graph, TransformCtx};
use crate::values::Value;

#[derive(Clone, Debug, Default)]
pub struct ApplyOpts {
    /// Apply-time variable values: must match the plan for persisted
    /// variables and must supply any required ephemerals.
    pub variables: BTreeMap<String, Value>,
    /// Suppress the warning about Forget actions abandoning remote objects.
    pub allow_forget: bool,
}

impl Engine {
    pub fn apply(
        &self,
        plan: &Plan,
        config: &Config,
        opts: ApplyOpts,
    ) -> (State, Diagnostics) {
        let mut diags = Diagnostics::new();

        // 1. Refuse plans that cannot be applied.
        if plan.errored {
            diags.push(Diagnostic::error(
                "Cannot apply errored plan",
                "the given plan was created with errors and is not applyable",
            ));
            return (plan.prior_state.clone(), diags);
        }
        if !plan.applyable {
            diags.push(Diagnostic::error(
                "Cannot apply this plan",
                "the given plan is not applyable; refresh-only plans only update state",
            ));
            return (plan.prior_state.clone(), diags);
        }

        // Merge plan-time and apply-time variables: persisted values must
        // agree, ephemerals must arrive now when declared without default.
        let mut variables = plan.variables.clone();
        for (name, value) in &opts.variables {
            match variables.get(name) {
                Some(planned) if planned != value => {
                    diags.push(Diagnostic::error(
                        "Inconsistent variable value",
                        format!(
                            "variable {:?} was set during planning and differs at apply",
                            name
                        ),
                    ));
                }
                _ => {
                    variables.insert(name.clone(), value.clone());
                }
            }
        }
        for (name, var_config) in &config.module.variables {
            if var_config.ephemeral
                && var_config.default.is_none()
                && !variables.contains_key(name)
            {
                diags.push(Diagnostic::error(
                    "Missing ephemeral variable",
                    format!(
                        "ephemeral variable {:?} must be supplied again at apply time",
                        name
                    ),
                ));
            }
        }
        if diags.has_errors() {
            return (plan.prior_state.clone(), diags);
        }

        // 5. Targeting at plan time limits what this apply covers.
        if !plan.targets.is_empty() || !plan.excludes.is_empty() {
            diags.push(Diagnostic::warning(
                "Applying a targeted plan",
                "this plan was created with targeting in effect, so it may not cover \
                 every pending change",
            ));
        }

        let walk_opts = Arc::new(PlanOpts {
            mode: plan.mode,
            variables,
            targets: plan.targets.clone(),
            excludes: plan.excludes.clone(),
            force_replace: plan.forced_replace.clone(),
            ..PlanOpts::default()
        });
        let config = Arc::new(config.clone());

        // 2. Build the apply graph from the ledger.
        let transform_cx = TransformCtx {
            op: WalkOperation::Apply,
            config: config.clone(),
            state: Arc::new(plan.prior_state.clone()),
            changes: Some(Arc::new(plan.changes.clone())),
            providers: self.providers(),
            opts: walk_opts.clone(),
        };
        let (mut graph, graph_diags) = build_graph(&apply_transformers(), &transform_cx);
        let graph_failed = graph_diags.has_errors();
        diags.extend(graph_diags);
        if graph_failed {
            return (plan.prior_state.clone(), diags);
        }

        // 3. Walk.
        let mut ctx = WalkContext::new(
            WalkOperation::Apply,
            config.clone(),
            self.providers(),
            SyncState::new(plan.prior_state.clone()),
            Arc::new(plan.prev_run_state.clone()),
            walk_opts,
            self.cancel_token(),
        );
        ctx.hooks = self.hooks();
        let ctx = Arc::new(ctx);

        diags.extend(self.run_walk(&mut graph, &ctx));
        ctx.close_all_providers();

        // 4. Forget actions abandon remote objects; say so unless told not
        // to.
        if !opts.allow_forget {
            let forgotten: Vec<String> = plan
                .changes
                .iter()
                .filter(|c| c.action == Action::Forget)
                .map(|c| c.addr.to_string())
                .collect();
            if !forgotten.is_empty() {
                diags.push(Diagnostic::warning(
                    "Objects removed from state only",
                    format!(
                        "the remote objects for {} still exist and are no longer managed",
                        forgotten.join(", ")
                    ),
                ));
            }
        }

        // 6. Finalize: plan-time check results carry over, husks prune.
        let mut checks = ctx.checks.lock().unwrap().clone();
        checks.merge_from(&plan.checks);
        let mut final_state = ctx.state.close(checks);

        if plan.mode == PlanMode::Destroy && !diags.has_errors() && !final_state.is_empty() {
            warn!("destroy apply completed but objects remain in state");
        }
        final_state.prune();

        info!(errored = diags.has_errors(), "apply complete");
        (final_state, diags)
    }
}
