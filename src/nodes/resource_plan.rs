//! Plan-side resource vertices. The static vertex evaluates expansion and
//! dynamically expands into one vertex per instance object to plan; the
//! instance vertex runs the refresh/plan sequence against the provider;
//! the orphan vertex covers whole resources that exist only in state.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::addrs::{
    AbsResource, AbsResourceInstance, ConfigResource, DeposedKey, InstanceKey,
    ModuleInstanceAddr, ProviderConfigAddr, ResolvedProvider, ResourceMode,
};
use crate::config::ResourceConfig;
use crate::context::{WalkContext, WalkOperation};
use crate::error::{Diagnostic, Diagnostics};
use crate::graph::{Graph, NodeResult};
use crate::lang::{evaluate, Expr, RepetitionData};
use crate::plan::{Action, ActionReason, Change, Importing, PlanMode};
use crate::schema::{proposed_new, BlockSchema};
use crate::state::{CheckStatus, ObjectState};
use crate::values::Value;

use super::Node;

/// The provider resolution attached to a static resource vertex: which
/// configuration handles it, plus the not-yet-evaluated instance key for
/// for_each-expanded providers.
#[derive(Clone)]
pub struct ProviderRequest {
    pub config_addr: ProviderConfigAddr,
    pub key_expr: Option<Expr>,
}

// ---------------------------------------------------------------------------
// Static resource vertex
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PlanResourceNode {
    pub addr: ConfigResource,
    pub config: ResourceConfig,
    /// Attached by provider inference.
    pub provider: Option<ProviderRequest>,
    /// Attached by the schema transformer.
    pub schema: Option<(BlockSchema, i64)>,
    /// Set when a dependent's create-before-destroy forces ours.
    pub force_cbd: bool,
    /// Config-level resources this one references, attached before walk.
    pub dependencies: Vec<ConfigResource>,
}

impl PlanResourceNode {
    fn provider_request(&self) -> Result<&ProviderRequest, Diagnostic> {
        self.provider.as_ref().ok_or_else(|| {
            Diagnostic::internal(format!("no provider resolved for {}", self.addr))
        })
    }

    fn schema_parts(&self) -> Result<(&BlockSchema, i64), Diagnostic> {
        match &self.schema {
            Some((block, version)) => Ok((block, *version)),
            None => Err(Diagnostic::internal(format!(
                "no schema attached for {}",
                self.addr
            ))),
        }
    }

    /// Map config-level dependencies into the given module instance, for
    /// recording on created objects.
    fn instance_dependencies(&self, module: &ModuleInstanceAddr) -> Vec<AbsResource> {
        self.dependencies
            .iter()
            .filter_map(|dep| {
                if dep.module == self.addr.module {
                    Some(AbsResource {
                        module: module.clone(),
                        resource: dep.resource.clone(),
                    })
                } else if dep.module.is_root() {
                    Some(AbsResource {
                        module: ModuleInstanceAddr::root(),
                        resource: dep.resource.clone(),
                    })
                } else {
                    None
                }
            })
            .collect()
    }

    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        match ctx.op {
            WalkOperation::Validate => self.execute_validate(ctx),
            WalkOperation::Plan => self.execute_plan(ctx),
            // In the apply graph the static vertex only re-registers
            // expansions so instance scopes have their repetition data;
            // the per-instance work lives in the diff-derived vertices.
            WalkOperation::Apply => self.execute_register(ctx),
        }
    }

    fn execute_register(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        for module_instance in ctx.expander.expand_module(&self.addr.module) {
            let abs = AbsResource {
                module: module_instance.clone(),
                resource: self.addr.resource.clone(),
            };
            match ctx.evaluate_expansion(
                &module_instance,
                &self.config.count,
                &self.config.for_each,
                &abs.to_string(),
            ) {
                Ok(expansion) => ctx.expander.set_resource_expansion(&abs, expansion),
                Err(d) => diags.push(d.with_address(&abs)),
            }
        }
        NodeResult::diags(diags)
    }

    fn execute_validate(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        let request = match self.provider_request() {
            Ok(r) => r,
            Err(d) => return NodeResult::diags(d.into()),
        };
        let resolved = ResolvedProvider {
            config: request.config_addr.clone(),
            key: None,
        };
        let provider = match ctx.provider_for(&resolved) {
            Ok(p) => p,
            Err(d) => return NodeResult::diags(d.into()),
        };

        // Evaluate with no repetition data; unknowns are fine here.
        let scope = ctx.scope(ModuleInstanceAddr::root(), RepetitionData::none());
        let mut fields = BTreeMap::new();
        for (name, expr) in &self.config.body.attrs {
            match evaluate(expr, &scope) {
                Ok(v) => {
                    fields.insert(name.clone(), v);
                }
                Err(_) => {
                    // References into unexpanded objects are fine during
                    // validation; stand in with unknown.
                    fields.insert(name.clone(), Value::Unknown);
                }
            }
        }
        let config_value = Value::Object(fields);
        let validation = match self.addr.resource.mode {
            ResourceMode::Managed => {
                provider.validate_resource_config(&self.addr.resource.type_, &config_value)
            }
            ResourceMode::Data => provider
                .validate_data_resource_config(&self.addr.resource.type_, &config_value),
        };
        diags.extend(validation);
        NodeResult::diags(diags)
    }

    fn execute_plan(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        let request = match self.provider_request() {
            Ok(r) => r.clone(),
            Err(d) => return NodeResult::diags(d.into()),
        };
        let (schema, schema_version) = match self.schema_parts() {
            Ok((block, version)) => (block.clone(), version),
            Err(d) => return NodeResult::diags(d.into()),
        };

        let cbd = self.config.lifecycle.create_before_destroy || self.force_cbd;
        let has_conditions =
            !self.config.preconditions.is_empty() || !self.config.postconditions.is_empty();

        let mut subgraph: Graph<Node> = Graph::new();

        for module_instance in ctx.expander.expand_module(&self.addr.module) {
            let abs = AbsResource {
                module: module_instance.clone(),
                resource: self.addr.resource.clone(),
            };

            // 1. Evaluate and register the expansion.
            let expansion = match ctx.evaluate_expansion(
                &module_instance,
                &self.config.count,
                &self.config.for_each,
                &abs.to_string(),
            ) {
                Ok(e) => e,
                Err(d) => {
                    diags.push(d.with_address(&abs));
                    continue;
                }
            };
            ctx.expander.set_resource_expansion(&abs, expansion.clone());

            // 2. Reconcile desired keys with prior keys.
            let desired: Vec<Option<InstanceKey>> = if ctx.mode() == PlanMode::Destroy {
                Vec::new()
            } else {
                expansion.keys()
            };

            let prior = ctx.state.resource(&abs);
            let prior_keys: Vec<Option<InstanceKey>> = prior
                .as_ref()
                .map(|r| r.instances.keys().cloned().collect())
                .unwrap_or_default();

            let dependencies = self.instance_dependencies(&module_instance);

            // 3. Announce the checkable set before any instance runs.
            if has_conditions {
                for key in &desired {
                    ctx.register_expected_check(abs.instance(key.clone()));
                }
            }

            // 4. One vertex per instance object to plan, tie-broken by
            // lexical key order via the sorted desired/prior sets.
            for key in &desired {
                let instance = PlanInstanceNode {
                    addr: abs.instance(key.clone()),
                    config: Some(self.config.clone()),
                    deposed: None,
                    destroy_only: false,
                    forget: false,
                    reason: ActionReason::None,
                    provider: ResolvedProvider {
                        config: request.config_addr.clone(),
                        key: None,
                    },
                    provider_key_expr: request.key_expr.clone(),
                    schema: schema.clone(),
                    schema_version,
                    cbd,
                    dependencies: dependencies.clone(),
                };
                subgraph.add(Node::PlanInstance(instance));
            }

            for key in &prior_keys {
                let instance_state = prior
                    .as_ref()
                    .and_then(|r| r.instances.get(key))
                    .cloned()
                    .unwrap_or_default();

                if !desired.contains(key) && instance_state.current.is_some() {
                    let reason = if ctx.mode() == PlanMode::Destroy {
                        ActionReason::None
                    } else {
                        ActionReason::DeleteBecauseWrongRepetition
                    };
                    subgraph.add(Node::PlanInstance(PlanInstanceNode {
                        addr: abs.instance(key.clone()),
                        config: Some(self.config.clone()),
                        deposed: None,
                        destroy_only: true,
                        forget: false,
                        reason,
                        provider: ResolvedProvider {
                            config: request.config_addr.clone(),
                            key: None,
                        },
                        provider_key_expr: request.key_expr.clone(),
                        schema: schema.clone(),
                        schema_version,
                        cbd,
                        dependencies: dependencies.clone(),
                    }));
                }

                // Deposed objects always plan a destroy.
                for deposed_key in instance_state.deposed.keys() {
                    subgraph.add(Node::PlanInstance(PlanInstanceNode {
                        addr: abs.instance(key.clone()),
                        config: Some(self.config.clone()),
                        deposed: Some(deposed_key.clone()),
                        destroy_only: true,
                        forget: false,
                        reason: ActionReason::DeleteBecauseDeposed,
                        provider: ResolvedProvider {
                            config: request.config_addr.clone(),
                            key: None,
                        },
                        provider_key_expr: request.key_expr.clone(),
                        schema: schema.clone(),
                        schema_version,
                        cbd,
                        dependencies: dependencies.clone(),
                    }));
                }
            }
        }

        trace!(resource = %self.addr, vertices = subgraph.len(), "expanded");
        NodeResult::expanded(diags, subgraph)
    }
}

// ---------------------------------------------------------------------------
// Instance plan vertex
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PlanInstanceNode {
    pub addr: AbsResourceInstance,
    pub config: Option<ResourceConfig>,
    pub deposed: Option<DeposedKey>,
    pub destroy_only: bool,
    pub forget: bool,
    pub reason: ActionReason,
    pub provider: ResolvedProvider,
    /// Unevaluated instance key for for_each-expanded providers.
    pub provider_key_expr: Option<Expr>,
    pub schema: BlockSchema,
    pub schema_version: i64,
    pub cbd: bool,
    pub dependencies: Vec<AbsResource>,
}

impl PlanInstanceNode {
    fn resolved_provider(&self, ctx: &WalkContext) -> Result<ResolvedProvider, Diagnostic> {
        let key = match &self.provider_key_expr {
            None => None,
            Some(expr) => {
                let rep = ctx.expander.repetition(&self.addr);
                let module = self.addr.resource.module.clone();
                match ctx.eval_in(&module, rep, expr)? {
                    Value::String(s) => Some(InstanceKey::Str(s)),
                    Value::Number(n) if n.fract() == 0.0 => Some(InstanceKey::Int(n as i64)),
                    Value::Unknown => {
                        return Err(Diagnostic::error(
                            "Invalid provider instance key",
                            "the provider instance key cannot be determined until apply",
                        )
                        .with_address(&self.addr))
                    }
                    other => {
                        return Err(Diagnostic::error(
                            "Invalid provider instance key",
                            format!("key must be a string or number, got {}", other.kind_name()),
                        )
                        .with_address(&self.addr))
                    }
                }
            }
        };
        Ok(ResolvedProvider {
            config: self.provider.config.clone(),
            key,
        })
    }

    fn forced_replace(&self, ctx: &WalkContext) -> bool {
        for entry in &ctx.opts.force_replace {
            if *entry == self.addr {
                return true;
            }
            if entry.key.is_none() && entry.resource == self.addr.resource {
                let count = ctx.expander.expand_resource(&self.addr.resource).len();
                if count == 1 {
                    return true;
                }
            }
        }
        false
    }

    /// Whether a replace_triggered_by reference points at a resource whose
    /// plan already carries a real change.
    fn replacement_triggered(&self, ctx: &WalkContext) -> bool {
        let Some(config) = &self.config else { return false };
        for reference in &config.lifecycle.replace_triggered_by {
            if let crate::lang::RefOrigin::Resource(resource) = &reference.origin {
                let abs = AbsResource {
                    module: self.addr.resource.module.clone(),
                    resource: resource.clone(),
                };
                if let Some(expansion) = ctx.expander.resource_expansion(&abs) {
                    for key in expansion.keys() {
                        if let Some(change) = ctx.changes.get(&abs.instance(key), None) {
                            if !change.action.is_noop() {
                                return true;
                            }
                        }
                    }
                }
            }
        }
        false
    }

    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        if self.addr.resource.resource.mode == ResourceMode::Data {
            return self.plan_data(ctx);
        }
        if self.deposed.is_some() {
            return self.plan_deposed(ctx);
        }
        if self.destroy_only {
            return self.plan_destroy(ctx);
        }
        self.plan_managed(ctx)
    }

    // -- data sources ------------------------------------------------------

    fn plan_data(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        if self.destroy_only || ctx.mode() == PlanMode::Destroy {
            // Data results simply fall out of state with their module.
            ctx.state
                .remove_resource_instance_object(&self.addr, None, &self.provider.config);
            return NodeResult::diags(diags);
        }

        let config_value = match self.evaluate_config(ctx) {
            Ok(v) => v,
            Err(d) => return NodeResult::diags(d.into()),
        };

        if config_value.contains_unknown() {
            if ctx.mode() == PlanMode::RefreshOnly {
                return NodeResult::diags(diags);
            }
            let resolved = match self.resolved_provider(ctx) {
                Ok(r) => r,
                Err(d) => return NodeResult::diags(d.into()),
            };
            let change = Change {
                addr: self.addr.clone(),
                prev_run_addr: self.addr.clone(),
                deposed: None,
                action: Action::Read,
                before: Value::Null,
                after: Value::Unknown,
                before_sensitive: Vec::new(),
                after_sensitive: Vec::new(),
                required_replace: Vec::new(),
                provider: resolved,
                importing: None,
                reason: ActionReason::ReadBecauseConfigUnknown,
                create_before_destroy: false,
            };
            if let Err(d) = ctx.changes.append(change) {
                diags.push(d);
            }
            return NodeResult::diags(diags);
        }

        let resolved = match self.resolved_provider(ctx) {
            Ok(r) => r,
            Err(d) => return NodeResult::diags(d.into()),
        };
        let provider = match ctx.provider_for(&resolved) {
            Ok(p) => p,
            Err(d) => return NodeResult::diags(d.into()),
        };
        match provider.read_data_source(&self.addr.resource.resource.type_, &config_value) {
            Ok(result) => {
                let mut object = ObjectState::new(result);
                object.schema_version = self.schema_version;
                object.sensitive_paths = self.schema.sensitive_paths(&object.attrs);
                ctx.state.set_resource_instance_current(
                    &self.addr,
                    Some(object),
                    &self.provider.config,
                );
            }
            Err(d) => diags.push(d.with_address(&self.addr)),
        }
        NodeResult::diags(diags)
    }

    // -- deposed objects ---------------------------------------------------

    fn plan_deposed(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        let key = self.deposed.clone().unwrap();
        let Some(instance) = ctx.state.resource_instance(&self.addr) else {
            return NodeResult::diags(diags);
        };
        let Some(object) = instance.deposed.get(&key) else {
            return NodeResult::diags(diags);
        };

        if ctx.mode() == PlanMode::RefreshOnly {
            diags.push(
                Diagnostic::warning(
                    "Deposed object still present",
                    format!(
                        "{} has a deposed object ({}) a previous replacement left behind; \
                         it will be destroyed on the next normal apply",
                        self.addr, key
                    ),
                )
                .with_address(&self.addr),
            );
            return NodeResult::diags(diags);
        }

        let resolved = match self.resolved_provider(ctx) {
            Ok(r) => r,
            Err(d) => return NodeResult::diags(d.into()),
        };
        let change = Change {
            addr: self.addr.clone(),
            prev_run_addr: self.addr.clone(),
            deposed: Some(key),
            action: Action::Delete,
            before: object.attrs.clone(),
            after: Value::Null,
            before_sensitive: object.sensitive_paths.clone(),
            after_sensitive: Vec::new(),
            required_replace: Vec::new(),
            provider: resolved,
            importing: None,
            reason: ActionReason::DeleteBecauseDeposed,
            create_before_destroy: false,
        };
        if let Err(d) = ctx.changes.append(change) {
            diags.push(d);
        }
        NodeResult::diags(diags)
    }

    // -- orphan destroys ---------------------------------------------------

    fn plan_destroy(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        let Some(mut prior) = ctx.state.current_object(&self.addr) else {
            return NodeResult::diags(diags);
        };

        // Orphans still refresh so the destroy plans against reality.
        if !ctx.opts.skip_refresh {
            match self.refresh(ctx, &prior) {
                Ok(Some(refreshed)) => prior = refreshed,
                Ok(None) => {
                    // Deleted outside the tool; nothing left to destroy.
                    ctx.state.remove_resource_instance_object(
                        &self.addr,
                        None,
                        &self.provider.config,
                    );
                    return NodeResult::diags(diags);
                }
                Err(d) => {
                    diags.push(d);
                    return NodeResult::diags(diags);
                }
            }
        }

        if ctx.mode() == PlanMode::RefreshOnly {
            return NodeResult::diags(diags);
        }

        if let Some(config) = &self.config {
            if config.lifecycle.prevent_destroy && !self.forget {
                diags.push(
                    Diagnostic::error(
                        "Instance cannot be destroyed",
                        format!(
                            "{} has lifecycle.prevent_destroy set, but the plan calls for \
                             this object to be destroyed",
                            self.addr
                        ),
                    )
                    .with_address(&self.addr),
                );
                return NodeResult::diags(diags);
            }
        }

        let resolved = match self.resolved_provider(ctx) {
            Ok(r) => r,
            Err(d) => return NodeResult::diags(d.into()),
        };
        let change = Change {
            addr: self.addr.clone(),
            prev_run_addr: self.addr.clone(),
            deposed: None,
            action: if self.forget { Action::Forget } else { Action::Delete },
            before: prior.attrs.clone(),
            after: Value::Null,
            before_sensitive: prior.sensitive_paths.clone(),
            after_sensitive: Vec::new(),
            required_replace: Vec::new(),
            provider: resolved,
            importing: None,
            reason: self.reason,
            create_before_destroy: false,
        };
        if let Err(d) = ctx.changes.append(change) {
            diags.push(d);
        }
        NodeResult::diags(diags)
    }

    // -- desired instances -------------------------------------------------

    fn plan_managed(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();

        let resolved = match self.resolved_provider(ctx) {
            Ok(r) => r,
            Err(d) => return NodeResult::diags(d.into()),
        };
        let provider = match ctx.provider_for(&resolved) {
            Ok(p) => p,
            Err(d) => return NodeResult::diags(d.into()),
        };

        // 1. Prior object, upgraded across schema versions.
        let mut prior: Option<ObjectState> = ctx.state.current_object(&self.addr);
        if let Some(object) = &prior {
            if object.schema_version != self.schema_version {
                match provider.upgrade_resource_state(
                    &self.addr.resource.resource.type_,
                    object.schema_version,
                    &object.attrs,
                ) {
                    Ok(upgraded) => {
                        let mut updated = object.clone();
                        updated.attrs = upgraded;
                        updated.schema_version = self.schema_version;
                        prior = Some(updated);
                    }
                    Err(d) => {
                        diags.push(d.with_address(&self.addr));
                        return NodeResult::diags(diags);
                    }
                }
            }
        }

        // 2. Refresh, unless skipped.
        if !ctx.opts.skip_refresh {
            if let Some(object) = &prior {
                match self.refresh(ctx, object) {
                    Ok(Some(refreshed)) => prior = Some(refreshed),
                    Ok(None) => {
                        debug!(instance = %self.addr, "object gone; planning create");
                        ctx.state.remove_resource_instance_object(
                            &self.addr,
                            None,
                            &self.provider.config,
                        );
                        prior = None;
                    }
                    Err(d) => {
                        diags.push(d);
                        return NodeResult::diags(diags);
                    }
                }
            }
        }

        if ctx.mode() == PlanMode::RefreshOnly {
            return NodeResult::diags(diags);
        }

        let config = match &self.config {
            Some(c) => c,
            None => {
                return NodeResult::diags(
                    Diagnostic::internal(format!("desired instance {} has no config", self.addr))
                        .into(),
                )
            }
        };

        // 3. Preconditions gate planning of this instance.
        let rep = ctx.expander.repetition(&self.addr);
        let has_conditions =
            !config.preconditions.is_empty() || !config.postconditions.is_empty();
        if has_conditions {
            let mut failed = false;
            for rule in &config.preconditions {
                let scope = ctx.scope(self.addr.resource.module.clone(), rep.clone());
                match evaluate(&rule.condition, &scope) {
                    Ok(Value::Bool(true)) | Ok(Value::Unknown) => {}
                    Ok(_) => {
                        failed = true;
                        diags.push(
                            Diagnostic::error(
                                "Resource precondition failed",
                                rule.error_message.clone(),
                            )
                            .with_address(&self.addr),
                        );
                    }
                    Err(d) => {
                        failed = true;
                        diags.push(d.with_address(&self.addr));
                    }
                }
            }
            ctx.report_check(
                &self.addr,
                if failed { CheckStatus::Fail } else { CheckStatus::Pass },
                Vec::new(),
            );
            if failed {
                return NodeResult::diags(diags);
            }
        }

        // 4. Configured value, with ignore_changes folded back in.
        let mut config_value = match self.evaluate_config(ctx) {
            Ok(v) => v,
            Err(d) => return NodeResult::diags(d.into()),
        };
        if let Some(prior_object) = &prior {
            for path in &config.lifecycle.ignore_changes {
                if let Some(prior_value) = prior_object.attrs.traverse(path) {
                    config_value = config_value.with_value_at(path, prior_value.clone());
                }
            }
        }

        let validation =
            provider.validate_resource_config(&self.addr.resource.resource.type_, &config_value);
        if validation.has_errors() {
            return NodeResult::diags(validation);
        }
        diags.extend(validation);

        // 5. Provider planning. The prior value is conformed to the schema
        // first so stored objects and configurations compare evenly.
        let prior_attrs = prior
            .as_ref()
            .map(|o| self.schema.normalize(&o.attrs))
            .unwrap_or(Value::Null);
        let prior_private = prior.as_ref().map(|o| o.private.clone()).unwrap_or_default();
        let proposed = proposed_new(&self.schema, &prior_attrs, &config_value);

        let response = provider.plan_resource_change(crate::providers::PlanChangeRequest {
            type_name: &self.addr.resource.resource.type_,
            prior: &prior_attrs,
            config: &config_value,
            proposed: &proposed,
            private: &prior_private,
        });
        if response.diagnostics.has_errors() {
            let mut out = Diagnostics::new();
            for d in response.diagnostics.into_iter() {
                out.push(d.with_address(&self.addr));
            }
            diags.extend(out);
            return NodeResult::diags(diags);
        }
        diags.extend(response.diagnostics);
        let mut planned = response.planned;
        let mut private = response.private;
        let required_replace = response.requires_replace;

        // 6. Action and replacement policy.
        let forced = self.forced_replace(ctx);
        let triggered = self.replacement_triggered(ctx);
        let action = if prior.is_none() {
            Action::Create
        } else if !required_replace.is_empty() || forced || triggered {
            if self.cbd {
                Action::CreateThenDelete
            } else {
                Action::DeleteThenCreate
            }
        } else if planned == prior_attrs {
            Action::NoOp
        } else {
            Action::Update
        };
        let reason = if forced {
            ActionReason::ReplaceRequested
        } else if triggered {
            ActionReason::ReplaceTriggered
        } else if !required_replace.is_empty() {
            ActionReason::ReplaceCannotUpdate
        } else {
            ActionReason::None
        };

        // A replacement plans again as a create: the replacement object's
        // computed attributes are unknown, not the old object's values.
        if action.is_replace() {
            let proposed_create = proposed_new(&self.schema, &Value::Null, &config_value);
            let create_response =
                provider.plan_resource_change(crate::providers::PlanChangeRequest {
                    type_name: &self.addr.resource.resource.type_,
                    prior: &Value::Null,
                    config: &config_value,
                    proposed: &proposed_create,
                    private: &[],
                });
            if create_response.diagnostics.has_errors() {
                diags.extend(create_response.diagnostics);
                return NodeResult::diags(diags);
            }
            diags.extend(create_response.diagnostics);
            planned = create_response.planned;
            private = create_response.private;
        }

        if action.is_replace() && config.lifecycle.prevent_destroy {
            diags.push(
                Diagnostic::error(
                    "Instance cannot be destroyed",
                    format!(
                        "{} has lifecycle.prevent_destroy set, but the plan calls for \
                         this object to be replaced",
                        self.addr
                    ),
                )
                .with_address(&self.addr),
            );
            return NodeResult::diags(diags);
        }

        // 7. Commit the planned value so downstream references resolve.
        let mut planned_object = ObjectState::new(planned.clone());
        planned_object.schema_version = self.schema_version;
        planned_object.private = private;
        planned_object.sensitive_paths = self.schema.sensitive_paths(&planned);
        planned_object.dependencies = self.dependencies.clone();
        planned_object.create_before_destroy = self.cbd;
        ctx.state.set_resource_instance_current(
            &self.addr,
            Some(planned_object),
            &self.provider.config,
        );

        let importing = ctx
            .imported
            .lock()
            .unwrap()
            .get(&self.addr)
            .map(|id| Importing { id: id.clone() });

        let change = Change {
            addr: self.addr.clone(),
            prev_run_addr: self.addr.clone(),
            deposed: None,
            action,
            before: prior_attrs,
            after_sensitive: self.schema.sensitive_paths(&planned),
            after: planned,
            before_sensitive: prior
                .as_ref()
                .map(|o| o.sensitive_paths.clone())
                .unwrap_or_default(),
            required_replace,
            provider: resolved,
            importing,
            reason,
            create_before_destroy: self.cbd,
        };

        if let Err(d) = ctx.changes.append(change) {
            diags.push(d);
        }

        // 8. Postconditions evaluate against the planned value; unknowns
        // leave the outcome for apply.
        for rule in &config.postconditions {
            let scope = ctx.scope(self.addr.resource.module.clone(), rep.clone());
            match evaluate(&rule.condition, &scope) {
                Ok(Value::Bool(true)) | Ok(Value::Unknown) => {}
                Ok(_) => {
                    diags.push(
                        Diagnostic::error(
                            "Resource postcondition failed",
                            rule.error_message.clone(),
                        )
                        .with_address(&self.addr),
                    );
                }
                Err(d) => diags.push(d.with_address(&self.addr)),
            }
        }

        NodeResult::diags(diags)
    }

    /// Evaluate the configuration body for this instance.
    fn evaluate_config(&self, ctx: &WalkContext) -> Result<Value, Diagnostic> {
        let Some(config) = &self.config else {
            return Ok(Value::Null);
        };
        let rep = ctx.expander.repetition(&self.addr);
        let scope = ctx.scope(self.addr.resource.module.clone(), rep);
        let mut fields = BTreeMap::new();
        for (name, expr) in &config.body.attrs {
            let value =
                evaluate(expr, &scope).map_err(|d| d.with_address(&self.addr))?;
            fields.insert(name.clone(), value);
        }
        for (name, block) in &config.body.blocks {
            let mut block_fields = BTreeMap::new();
            for (attr, expr) in &block.attrs {
                let value =
                    evaluate(expr, &scope).map_err(|d| d.with_address(&self.addr))?;
                block_fields.insert(attr.clone(), value);
            }
            // Repeated blocks accumulate into a list.
            let entry = fields
                .entry(name.clone())
                .or_insert_with(|| Value::List(Vec::new()));
            if let Value::List(items) = entry {
                items.push(Value::Object(block_fields));
            }
        }
        Ok(Value::Object(fields))
    }

    /// Refresh one object via the provider; records the result in both the
    /// refreshed and working states. None means the remote object is gone.
    fn refresh(
        &self,
        ctx: &WalkContext,
        object: &ObjectState,
    ) -> Result<Option<ObjectState>, Diagnostic> {
        let resolved = self.resolved_provider(ctx)?;
        let provider = ctx.provider_for(&resolved)?;
        let response = provider.read_resource(
            &self.addr.resource.resource.type_,
            &object.attrs,
            &object.private,
        );
        if response.diagnostics.has_errors() {
            let text = response.diagnostics.to_summary();
            return Err(Diagnostic::error("Provider refresh failed", text)
                .with_address(&self.addr));
        }

        match response.new_state {
            None => {
                ctx.refreshed.set_resource_instance_current(
                    &self.addr,
                    None,
                    &self.provider.config,
                );
                Ok(None)
            }
            Some(attrs) => {
                let mut refreshed = object.clone();
                refreshed.attrs = attrs;
                refreshed.private = response.private;
                ctx.refreshed.set_resource_instance_current(
                    &self.addr,
                    Some(refreshed.clone()),
                    &self.provider.config,
                );
                ctx.state.set_resource_instance_current(
                    &self.addr,
                    Some(refreshed.clone()),
                    &self.provider.config,
                );
                Ok(Some(refreshed))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Whole-resource orphans
// ---------------------------------------------------------------------------

/// A resource present in state with no configuration counterpart: every
/// instance, current and deposed, plans a destroy (or a forget when a
/// `removed` block covers it).
#[derive(Clone)]
pub struct OrphanResourceNode {
    pub addr: AbsResource,
    pub provider: ProviderConfigAddr,
    pub instances: Vec<(Option<InstanceKey>, Vec<DeposedKey>)>,
    pub forget: bool,
    pub schema: Option<(BlockSchema, i64)>,
    pub reason: ActionReason,
}

impl OrphanResourceNode {
    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        if ctx.op == WalkOperation::Validate {
            return NodeResult::ok();
        }
        let (schema, schema_version) = match &self.schema {
            Some((block, version)) => (block.clone(), *version),
            None => {
                return NodeResult::diags(
                    Diagnostic::internal(format!("no schema attached for orphan {}", self.addr))
                        .into(),
                )
            }
        };

        // Orphans have no configuration, so the expander learns their keys
        // from state; the ledger coverage invariant still holds.
        let keys: Vec<Option<InstanceKey>> =
            self.instances.iter().map(|(k, _)| k.clone()).collect();
        ctx.expander
            .set_resource_expansion(&self.addr, crate::instances::Expansion::Keys(keys));

        let mut subgraph: Graph<Node> = Graph::new();
        for (key, deposed_keys) in &self.instances {
            subgraph.add(Node::PlanInstance(PlanInstanceNode {
                addr: self.addr.instance(key.clone()),
                config: None,
                deposed: None,
                destroy_only: true,
                forget: self.forget,
                reason: self.reason,
                provider: ResolvedProvider {
                    config: self.provider.clone(),
                    key: None,
                },
                provider_key_expr: None,
                schema: schema.clone(),
                schema_version,
                cbd: false,
                dependencies: Vec::new(),
            }));
            for deposed_key in deposed_keys {
                subgraph.add(Node::PlanInstance(PlanInstanceNode {
                    addr: self.addr.instance(key.clone()),
                    config: None,
                    deposed: Some(deposed_key.clone()),
                    destroy_only: true,
                    forget: false,
                    reason: ActionReason::DeleteBecauseDeposed,
                    provider: ResolvedProvider {
                        config: self.provider.clone(),
                        key: None,
                    },
                    provider_key_expr: None,
                    schema: schema.clone(),
                    schema_version,
                    cbd: false,
                    dependencies: Vec::new(),
                }));
            }
        }

        NodeResult::expanded(Diagnostics::new(), subgraph)
    }
}
