//! Apply-side instance vertices, one per ledger entry. Each acts purely on
//! its change record: the action, the replacement discipline, and the
//! deposed key all come from the plan, never from the plan mode.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::config::ResourceConfig;
use crate::context::WalkContext;
use crate::error::{Diagnostic, Diagnostics};
use crate::graph::NodeResult;
use crate::lang::evaluate;
use crate::plan::{Action, Change};
use crate::providers::ApplyChangeRequest;
use crate::schema::{proposed_new, BlockSchema};
use crate::state::{CheckStatus, ObjectState};
use crate::values::Value;

use super::Node;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyPhase {
    /// Execute the change's action in full.
    Full,
    /// The create half of a create-before-destroy replacement: depose the
    /// current object, then create the new one.
    CreateBeforeDestroy,
    /// Reap every deposed object at the address, after dependents have
    /// switched over.
    ReapDeposed,
}

#[derive(Clone)]
pub struct ApplyInstanceNode {
    pub change: Change,
    pub config: Option<ResourceConfig>,
    pub schema: BlockSchema,
    pub schema_version: i64,
    pub phase: ApplyPhase,
    /// Resources this instance's configuration references, recorded on the
    /// new object for future destroy ordering.
    pub dependencies: Vec<crate::addrs::AbsResource>,
}

impl ApplyInstanceNode {
    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        ctx.hooks.pre_apply(&self.change.addr, self.change.action);

        let result = match self.phase {
            ApplyPhase::ReapDeposed => self.reap_deposed(ctx),
            ApplyPhase::CreateBeforeDestroy => self.apply_cbd_create(ctx),
            ApplyPhase::Full => match self.change.action {
                Action::NoOp => Ok(Diagnostics::new()),
                Action::Read => self.apply_data(ctx),
                Action::Forget => self.apply_forget(ctx),
                Action::Delete => self.apply_destroy(ctx),
                Action::Create | Action::Update => self.apply_write(ctx, None),
                Action::DeleteThenCreate => self.apply_replace(ctx),
                Action::CreateThenDelete => self.apply_cbd_create(ctx),
            },
        };

        let diags = match result {
            Ok(diags) => diags,
            Err(d) => d.into(),
        };
        ctx.hooks
            .post_apply(&self.change.addr, !diags.has_errors());
        NodeResult::diags(diags)
    }

    fn provider(
        &self,
        ctx: &WalkContext,
    ) -> Result<std::sync::Arc<dyn crate::providers::Provider>, Diagnostic> {
        ctx.provider_for(&self.change.provider)
    }

    fn type_name(&self) -> &str {
        &self.change.addr.resource.resource.type_
    }

    /// Evaluate the configuration body now that upstream applies have made
    /// referenced values concrete.
    fn evaluate_config(&self, ctx: &WalkContext) -> Result<Value, Diagnostic> {
        let Some(config) = &self.config else {
            return Err(Diagnostic::internal(format!(
                "apply of {} has no configuration",
                self.change.addr
            )));
        };
        let rep = ctx.expander.repetition(&self.change.addr);
        let scope = ctx.scope(self.change.addr.resource.module.clone(), rep);
        let mut fields = BTreeMap::new();
        for (name, expr) in &config.body.attrs {
            let value =
                evaluate(expr, &scope).map_err(|d| d.with_address(&self.change.addr))?;
            fields.insert(name.clone(), value);
        }
        for (name, block) in &config.body.blocks {
            let mut block_fields = BTreeMap::new();
            for (attr, expr) in &block.attrs {
                let value =
                    evaluate(expr, &scope).map_err(|d| d.with_address(&self.change.addr))?;
                block_fields.insert(attr.clone(), value);
            }
            let entry = fields
                .entry(name.clone())
                .or_insert_with(|| Value::List(Vec::new()));
            if let Value::List(items) = entry {
                items.push(Value::Object(block_fields));
            }
        }
        Ok(Value::Object(fields))
    }

    /// Destroy one remote object and drop it from the working state.
    fn destroy_object(
        &self,
        ctx: &WalkContext,
        attrs: &Value,
        private: &[u8],
        deposed: Option<&crate::addrs::DeposedKey>,
    ) -> Result<Diagnostics, Diagnostic> {
        let provider = self.provider(ctx)?;
        let response = provider.apply_resource_change(ApplyChangeRequest {
            type_name: self.type_name(),
            prior: attrs,
            planned: &Value::Null,
            config: &Value::Null,
            private,
        });
        if response.diagnostics.has_errors() {
            return Err(Diagnostic::error(
                "Provider destroy failed",
                response.diagnostics.to_summary(),
            )
            .with_address(&self.change.addr));
        }
        ctx.state.remove_resource_instance_object(
            &self.change.addr,
            deposed,
            &self.change.provider.config,
        );
        info!(instance = %self.change.addr, deposed = ?deposed, "destroyed");
        Ok(response.diagnostics)
    }

    fn apply_destroy(&self, ctx: &WalkContext) -> Result<Diagnostics, Diagnostic> {
        // Prefer the object still in state; the ledger's before value is
        // the fallback for objects already pruned from the working copy.
        let (attrs, private) = match &self.change.deposed {
            Some(key) => match ctx
                .state
                .resource_instance(&self.change.addr)
                .and_then(|i| i.deposed.get(key).cloned())
            {
                Some(object) => (object.attrs, object.private),
                None => (self.change.before.clone(), Vec::new()),
            },
            None => match ctx.state.current_object(&self.change.addr) {
                Some(object) => (object.attrs, object.private),
                None => (self.change.before.clone(), Vec::new()),
            },
        };
        self.destroy_object(ctx, &attrs, &private, self.change.deposed.as_ref())
    }

    fn apply_forget(&self, ctx: &WalkContext) -> Result<Diagnostics, Diagnostic> {
        ctx.state.remove_resource_instance_object(
            &self.change.addr,
            self.change.deposed.as_ref(),
            &self.change.provider.config,
        );
        debug!(instance = %self.change.addr, "forgotten; remote object left in place");
        Ok(Diagnostics::new())
    }

    fn apply_data(&self, ctx: &WalkContext) -> Result<Diagnostics, Diagnostic> {
        let provider = self.provider(ctx)?;
        let config_value = self.evaluate_config(ctx)?;
        if config_value.contains_unknown() {
            return Err(Diagnostic::internal(format!(
                "data configuration for {} still unknown at apply",
                self.change.addr
            )));
        }
        let result = provider
            .read_data_source(self.type_name(), &config_value)
            .map_err(|d| d.with_address(&self.change.addr))?;
        let mut object = ObjectState::new(result);
        object.schema_version = self.schema_version;
        object.sensitive_paths = self.schema.sensitive_paths(&object.attrs);
        ctx.state.set_resource_instance_current(
            &self.change.addr,
            Some(object),
            &self.change.provider.config,
        );
        Ok(Diagnostics::new())
    }

    /// Create or update: call the provider with the planned value, verify
    /// the result, and commit it with its new private blob.
    fn apply_write(
        &self,
        ctx: &WalkContext,
        prior_override: Option<&Value>,
    ) -> Result<Diagnostics, Diagnostic> {
        let mut diags = Diagnostics::new();
        let provider = self.provider(ctx)?;
        let config_value = self.evaluate_config(ctx)?;

        let prior_attrs = prior_override.cloned().unwrap_or_else(|| self.change.before.clone());
        let prior_private = ctx
            .state
            .current_object(&self.change.addr)
            .map(|o| o.private)
            .unwrap_or_default();

        // References planned as unknown are concrete now; fold them in
        // before handing the provider its final planned value.
        let proposed = proposed_new(&self.schema, &prior_attrs, &config_value);
        let final_planned = self.change.after.filled_from(&proposed);

        let response = provider.apply_resource_change(ApplyChangeRequest {
            type_name: self.type_name(),
            prior: &prior_attrs,
            planned: &final_planned,
            config: &config_value,
            private: &prior_private,
        });
        if response.diagnostics.has_errors() {
            return Err(Diagnostic::error(
                "Provider apply failed",
                response.diagnostics.to_summary(),
            )
            .with_address(&self.change.addr));
        }
        diags.extend(response.diagnostics);

        if response.new_state.is_null() {
            return Err(Diagnostic::error(
                "Provider returned no state",
                format!(
                    "the provider reported success applying {} but produced no new object",
                    self.change.addr
                ),
            )
            .with_address(&self.change.addr));
        }
        if response.new_state.contains_unknown() {
            return Err(Diagnostic::error(
                "Provider returned an incomplete object",
                format!(
                    "the new state for {} still contains unknown values after apply",
                    self.change.addr
                ),
            )
            .with_address(&self.change.addr));
        }

        let mut object = ObjectState::new(response.new_state);
        object.schema_version = self.schema_version;
        object.private = response.private;
        object.sensitive_paths = self.schema.sensitive_paths(&object.attrs);
        object.dependencies = self.dependencies.clone();
        object.create_before_destroy = self.change.create_before_destroy;
        ctx.state.set_resource_instance_current(
            &self.change.addr,
            Some(object),
            &self.change.provider.config,
        );
        info!(instance = %self.change.addr, action = ?self.change.action, "applied");

        // Postconditions observe the final object.
        if let Some(config) = &self.config {
            if !config.postconditions.is_empty() {
                let rep = ctx.expander.repetition(&self.change.addr);
                let mut failed = false;
                for rule in &config.postconditions {
                    let scope = ctx.scope(self.change.addr.resource.module.clone(), rep.clone());
                    match evaluate(&rule.condition, &scope) {
                        Ok(Value::Bool(true)) | Ok(Value::Unknown) => {}
                        Ok(_) => {
                            failed = true;
                            diags.push(
                                Diagnostic::error(
                                    "Resource postcondition failed",
                                    rule.error_message.clone(),
                                )
                                .with_address(&self.change.addr),
                            );
                        }
                        Err(d) => {
                            failed = true;
                            diags.push(d.with_address(&self.change.addr));
                        }
                    }
                }
                ctx.report_check(
                    &self.change.addr,
                    if failed { CheckStatus::Fail } else { CheckStatus::Pass },
                    Vec::new(),
                );
            }
        }

        Ok(diags)
    }

    fn apply_replace(&self, ctx: &WalkContext) -> Result<Diagnostics, Diagnostic> {
        let mut diags = self.apply_destroy(ctx)?;
        diags.extend(self.apply_write(ctx, Some(&Value::Null))?);
        Ok(diags)
    }

    fn apply_cbd_create(&self, ctx: &WalkContext) -> Result<Diagnostics, Diagnostic> {
        if let Some(key) = ctx.state.depose_current(&self.change.addr) {
            debug!(instance = %self.change.addr, deposed = %key, "deposed current object");
        }
        self.apply_write(ctx, Some(&Value::Null))
    }

    fn reap_deposed(&self, ctx: &WalkContext) -> Result<Diagnostics, Diagnostic> {
        let mut diags = Diagnostics::new();
        let deposed: Vec<(crate::addrs::DeposedKey, ObjectState)> = ctx
            .state
            .resource_instance(&self.change.addr)
            .map(|i| i.deposed.into_iter().collect())
            .unwrap_or_default();
        for (key, object) in deposed {
            diags.extend(self.destroy_object(
                ctx,
                &object.attrs,
                &object.private,
                Some(&key),
            )?);
        }
        Ok(diags)
    }
}
