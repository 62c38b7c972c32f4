//! The plan driver: option validation, moves, the optional pre-refresh for
//! destroy mode, the plan walk itself, and every post-walk verification.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use super::Engine;
use crate::addrs::AbsResourceInstance;
use crate::config::Config;
use crate::context::{PlanOpts, WalkContext, WalkOperation};
use crate::error::{Diagnostic, Diagnostics};
use crate::lang::RefOrigin;
use crate::moves::{self, MoveResults};
use crate::plan::{Action, ActionReason, Change, Plan, PlanMode};
use crate::state::{State, SyncState};
use crate::transform::{
    apply_transformers, build_graph, plan_transformers, TransformCtx,
};
use crate::values::{Value, ValuePath};

impl Engine {
    /// Produce a plan. The plan is returned even when diagnostics carry
    /// errors; it is then marked errored and not applyable.
    pub fn plan(
        &self,
        config: &Config,
        prior_state: &State,
        opts: PlanOpts,
    ) -> (Plan, Diagnostics) {
        let mut diags = Diagnostics::new();

        // 1. Mode/option validation.
        if opts.mode == PlanMode::RefreshOnly && opts.skip_refresh {
            diags.push(Diagnostic::error(
                "Incompatible plan options",
                "a refresh-only plan cannot also skip refreshing",
            ));
        }
        if !opts.force_replace.is_empty() && opts.mode != PlanMode::Normal {
            diags.push(Diagnostic::error(
                "Incompatible plan options",
                "forced replacement is only valid in normal planning mode",
            ));
        }
        if diags.has_errors() {
            return (
                empty_plan(opts.mode, prior_state.clone(), prior_state.clone(), &opts, true),
                diags,
            );
        }

        // 2. Deep copy and refactoring moves.
        let mut moved_prior = prior_state.clone();
        let mut statements = moves::collect_moves(config);
        statements.extend(moves::implied_moves(config, &moved_prior));
        let move_results = moves::apply_moves(&statements, &mut moved_prior);
        diags.extend(moves::validate_moves(&move_results, &opts));

        let prev_run_state = moved_prior.clone();

        // 3. Destroy mode refreshes through an internal plan first, then
        // plans the destroy against the refreshed result.
        let mut opts = opts;
        let mut prior_for_walk = moved_prior;
        if opts.mode == PlanMode::Destroy && !opts.skip_refresh {
            let mut refresh_opts = opts.clone();
            refresh_opts.mode = PlanMode::RefreshOnly;
            refresh_opts.skip_refresh = false;
            refresh_opts.import_targets = Vec::new();
            refresh_opts.force_replace = Vec::new();

            debug!("running internal refresh plan ahead of destroy");
            let (refresh_plan, refresh_diags) = self.plan_walk(
                config,
                prior_for_walk.clone(),
                prev_run_state.clone(),
                refresh_opts,
                &MoveResults::default(),
            );
            diags.extend(refresh_diags);
            if diags.has_errors() {
                return (
                    empty_plan(opts.mode, prev_run_state.clone(), prev_run_state, &opts, true),
                    diags,
                );
            }
            prior_for_walk = refresh_plan.prior_state;
            opts.skip_refresh = true;
        }

        // 4-8. The plan walk and its post-walk verifications.
        let (mut plan, walk_diags) = self.plan_walk(
            config,
            prior_for_walk,
            prev_run_state,
            opts,
            &move_results,
        );
        diags.extend(walk_diags);
        plan.errored = diags.has_errors();
        plan.applyable = !plan.errored && plan.mode != PlanMode::RefreshOnly;

        // 9. Apply-graph dry check: surface cycle errors now, not at apply.
        if plan.applyable && !plan.changes.is_empty() {
            let dry_cx = TransformCtx {
                op: WalkOperation::Apply,
                config: Arc::new(config.clone()),
                state: Arc::new(plan.prior_state.clone()),
                changes: Some(Arc::new(plan.changes.clone())),
                providers: self.providers(),
                opts: Arc::new(PlanOpts {
                    mode: plan.mode,
                    variables: plan.variables.clone(),
                    ..PlanOpts::default()
                }),
            };
            let (_, dry_diags) = build_graph(&apply_transformers(), &dry_cx);
            if dry_diags.has_errors() {
                plan.errored = true;
                plan.applyable = false;
            }
            diags.extend(dry_diags);
        }

        info!(
            changes = plan.changes.len(),
            errored = plan.errored,
            "plan complete"
        );
        (plan, diags)
    }

    fn plan_walk(
        &self,
        config: &Config,
        prior: State,
        prev_run: State,
        opts: PlanOpts,
        move_results: &MoveResults,
    ) -> (Plan, Diagnostics) {
        let opts = Arc::new(opts);
        let config = Arc::new(config.clone());

        let transform_cx = TransformCtx {
            op: WalkOperation::Plan,
            config: config.clone(),
            state: Arc::new(prior.clone()),
            changes: None,
            providers: self.providers(),
            opts: opts.clone(),
        };
        let (mut graph, mut diags) = build_graph(&plan_transformers(), &transform_cx);
        if diags.has_errors() {
            return (
                empty_plan(opts.mode, prev_run.clone(), prior, &opts, true),
                diags,
            );
        }

        let mut ctx = WalkContext::new(
            WalkOperation::Plan,
            config.clone(),
            self.providers(),
            SyncState::new(prior.clone()),
            Arc::new(prev_run.clone()),
            opts.clone(),
            self.cancel_token(),
        );
        ctx.refreshed = SyncState::new(prior);
        ctx.hooks = self.hooks();
        let ctx = Arc::new(ctx);

        diags.extend(self.run_walk(&mut graph, &ctx));
        ctx.close_all_providers();

        // Refresh-only walks must not have planned anything; a non-empty
        // ledger here is an engine (or provider) bug.
        if opts.mode == PlanMode::RefreshOnly && !ctx.changes.is_empty() {
            let offender = ctx
                .changes
                .snapshot()
                .iter()
                .next()
                .map(|c| c.addr.to_string())
                .unwrap_or_default();
            diags.push(Diagnostic::internal(format!(
                "refresh-only plan produced change entries, first for {}",
                offender
            )));
        }

        // Every import target must have landed in the desired state, unless
        // it exists purely to generate configuration.
        let imported: Vec<(AbsResourceInstance, String)> = ctx
            .imported
            .lock()
            .unwrap()
            .iter()
            .map(|(a, i)| (a.clone(), i.clone()))
            .collect();
        for (addr, id) in &imported {
            if ctx.changes.get(addr, None).is_none()
                && opts.generate_config_path.is_none()
                && opts.mode == PlanMode::Normal
            {
                diags.push(
                    Diagnostic::error(
                        "Import target not planned",
                        format!(
                            "{} was imported (id {:?}) but is not part of the desired state",
                            addr, id
                        ),
                    )
                    .with_address(addr),
                );
            }
        }

        // Instance-less force-replace entries only bind when the resource
        // has exactly one instance; anything else warns.
        for entry in &opts.force_replace {
            if entry.key.is_some() {
                continue;
            }
            let count = ctx
                .expander
                .resource_expansion(&entry.resource)
                .map(|e| e.keys().len());
            match count {
                Some(1) => {}
                Some(n) => diags.push(Diagnostic::warning(
                    "Incomplete forced replacement",
                    format!(
                        "{} matches {} instances; use an instance address to force \
                         replacement",
                        entry, n
                    ),
                )),
                None => diags.push(Diagnostic::warning(
                    "Incomplete forced replacement",
                    format!("{} does not match any resource in the plan", entry),
                )),
            }
        }

        let mut changes = ctx.changes.snapshot();
        changes.apply_moved_addresses(&move_results.moved);

        let prior_state = ctx.refreshed.snapshot();
        let drift = compute_drift(&prev_run, &prior_state);
        let relevant_attributes = compute_relevant_attributes(&config, &ctx);

        // Only caller-set values are snapshotted, and never ephemerals.
        let variables: BTreeMap<String, Value> = opts
            .variables
            .iter()
            .filter(|(name, _)| {
                !config
                    .module
                    .variables
                    .get(*name)
                    .map(|v| v.ephemeral)
                    .unwrap_or(false)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let checks = ctx.checks.lock().unwrap().clone();
        let errored = diags.has_errors();

        let plan = Plan {
            mode: opts.mode,
            variables,
            changes,
            drift,
            targets: opts.targets.clone(),
            excludes: opts.excludes.clone(),
            forced_replace: opts.force_replace.clone(),
            prev_run_state: prev_run,
            prior_state,
            checks,
            relevant_attributes,
            timestamp: Utc::now(),
            errored,
            applyable: !errored && opts.mode != PlanMode::RefreshOnly,
        };
        (plan, diags)
    }
}

fn empty_plan(
    mode: PlanMode,
    prev_run: State,
    prior: State,
    opts: &PlanOpts,
    errored: bool,
) -> Plan {
    Plan {
        mode,
        variables: BTreeMap::new(),
        changes: crate::plan::Changes::new(),
        drift: Vec::new(),
        targets: opts.targets.clone(),
        excludes: opts.excludes.clone(),
        forced_replace: opts.force_replace.clone(),
        prev_run_state: prev_run,
        prior_state: prior,
        checks: crate::state::CheckResults::new(),
        relevant_attributes: Vec::new(),
        timestamp: Utc::now(),
        errored,
        applyable: false,
    }
}

/// Differences between the previous run and the refreshed prior state, for
/// managed resources: what changed outside the tool.
fn compute_drift(prev_run: &State, refreshed: &State) -> Vec<Change> {
    let mut drift = Vec::new();

    for (addr, resource_state) in &prev_run.resources {
        if addr.resource.mode != crate::addrs::ResourceMode::Managed {
            continue;
        }
        for (key, instance) in &resource_state.instances {
            let Some(before_object) = &instance.current else { continue };
            let instance_addr = addr.instance(key.clone());
            let after_object = refreshed.current_object(&instance_addr);

            let (action, after_attrs) = match after_object {
                None => (Action::Delete, Value::Null),
                Some(object) if object.attrs != before_object.attrs => {
                    (Action::Update, object.attrs.clone())
                }
                Some(_) => continue,
            };

            drift.push(Change {
                addr: instance_addr.clone(),
                prev_run_addr: instance_addr,
                deposed: None,
                action,
                before: before_object.attrs.clone(),
                after: after_attrs,
                before_sensitive: before_object.sensitive_paths.clone(),
                after_sensitive: Vec::new(),
                required_replace: Vec::new(),
                provider: crate::addrs::ResolvedProvider::new(resource_state.provider.clone()),
                importing: None,
                reason: ActionReason::None,
                create_before_destroy: false,
            });
        }
    }

    drift
}

/// The resource attributes the configuration references anywhere, expanded
/// to concrete instances where expansion is known.
fn compute_relevant_attributes(
    config: &Config,
    ctx: &WalkContext,
) -> Vec<(AbsResourceInstance, ValuePath)> {
    let mut out: Vec<(AbsResourceInstance, ValuePath)> = Vec::new();
    let mut seen: HashMap<String, ()> = HashMap::new();

    for (module_addr, module) in config.all_modules() {
        let mut references = Vec::new();
        for resource in module.resources.values() {
            references.extend(resource.references());
        }
        for output in module.outputs.values() {
            references.extend(output.value.references());
        }
        for local in module.locals.values() {
            references.extend(local.references());
        }

        for reference in references {
            let RefOrigin::Resource(resource) = &reference.origin else { continue };
            if resource.mode != crate::addrs::ResourceMode::Managed {
                continue;
            }
            let path = reference.static_path();
            if !ctx.expander.module_expansion_known(&module_addr) {
                continue;
            }
            for module_instance in ctx.expander.expand_module(&module_addr) {
                let abs = crate::addrs::AbsResource {
                    module: module_instance,
                    resource: resource.clone(),
                };
                if ctx.expander.resource_expansion(&abs).is_none() {
                    continue;
                }
                for instance in ctx.expander.expand_resource(&abs) {
                    let dedupe_key = format!("{}|{}", instance, path);
                    if seen.insert(dedupe_key, ()).is_none() {
                        out.push((instance, path.clone()));
                    }
                }
            }
        }
    }

    out
}
