//! Named-value vertices: root and module input variables, locals, outputs,
//! module-call expansion, and check blocks. Each executes once and writes
//! into the shared named-value tables for every instance of its module.

use tracing::trace;

use crate::addrs::ModuleAddr;
use crate::config::{CheckBlock, ModuleCall, OutputConfig, VariableConfig};
use crate::context::WalkContext;
use crate::error::{Diagnostic, Diagnostics};
use crate::graph::NodeResult;
use crate::lang::{evaluate, Expr, Reference, RepetitionData};
use crate::plan::PlanMode;
use crate::state::CheckStatus;
use crate::values::Value;

use super::Node;

// ---------------------------------------------------------------------------
// Root variables
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RootVariableNode {
    pub name: String,
    pub config: VariableConfig,
}

impl RootVariableNode {
    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        let caller = ctx.opts.variables.get(&self.name).cloned();
        let value = match caller {
            Some(v) => v,
            None => match &self.config.default {
                Some(d) => d.clone(),
                None => {
                    if self.config.ephemeral {
                        // Ephemeral values may legitimately be absent at
                        // plan time and re-supplied at apply.
                        Value::Null
                    } else if ctx.op == crate::context::WalkOperation::Validate {
                        // Validation runs without caller values; the
                        // variable is simply not yet known.
                        Value::Unknown
                    } else {
                        diags.push(Diagnostic::error(
                            "No value for required variable",
                            format!(
                                "variable {:?} has no default and no caller value",
                                self.name
                            ),
                        ));
                        return NodeResult::diags(diags);
                    }
                }
            },
        };

        if !self.config.type_.allows(&value) {
            diags.push(Diagnostic::error(
                "Invalid value for input variable",
                format!(
                    "variable {:?} expects {}, got {}",
                    self.name,
                    self.config.type_.name(),
                    value.kind_name()
                ),
            ));
            return NodeResult::diags(diags);
        }

        let root = crate::addrs::ModuleInstanceAddr::root();
        ctx.named.set_variable(&root, &self.name, value);

        diags.extend(run_validations(
            ctx,
            &root,
            &self.config.validations,
            &format!("var.{}", self.name),
        ));
        NodeResult::diags(diags)
    }
}

// ---------------------------------------------------------------------------
// Module variables
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ModuleVariableNode {
    /// The child module that declares the variable.
    pub module: ModuleAddr,
    pub name: String,
    pub config: VariableConfig,
    /// The argument expression from the module call, evaluated in the
    /// parent's scope.
    pub arg: Option<Expr>,
}

impl ModuleVariableNode {
    pub fn references(&self) -> Vec<(ModuleAddr, Reference)> {
        let Some((parent, _)) = self.module.parent() else {
            return Vec::new();
        };
        self.arg
            .iter()
            .flat_map(|e| e.references())
            .map(|r| (parent.clone(), r))
            .collect()
    }

    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        for instance in ctx.expander.expand_module(&self.module) {
            let Some((parent_instance, step)) = instance.parent() else { continue };
            let rep = ctx
                .module_call_expansion(&parent_instance, &step.name)
                .map(|e| e.repetition(&step.key))
                .unwrap_or_else(RepetitionData::none);

            let value = match &self.arg {
                Some(expr) => match ctx.eval_in(&parent_instance, rep, expr) {
                    Ok(v) => v,
                    Err(d) => {
                        diags.push(d.with_address(format!("{}.var.{}", instance, self.name)));
                        continue;
                    }
                },
                None => self.config.default.clone().unwrap_or(Value::Null),
            };

            if !self.config.type_.allows(&value) {
                diags.push(Diagnostic::error(
                    "Invalid value for input variable",
                    format!(
                        "variable {:?} expects {}, got {}",
                        self.name,
                        self.config.type_.name(),
                        value.kind_name()
                    ),
                ));
                continue;
            }

            ctx.named.set_variable(&instance, &self.name, value);
            diags.extend(run_validations(
                ctx,
                &instance,
                &self.config.validations,
                &format!("{}.var.{}", instance, self.name),
            ));
        }
        NodeResult::diags(diags)
    }
}

fn run_validations(
    ctx: &WalkContext,
    module: &crate::addrs::ModuleInstanceAddr,
    validations: &[crate::config::CheckRule],
    label: &str,
) -> Diagnostics {
    let mut diags = Diagnostics::new();
    for rule in validations {
        let scope = ctx.scope(module.clone(), RepetitionData::none());
        match evaluate(&rule.condition, &scope) {
            Ok(Value::Bool(true)) | Ok(Value::Unknown) => {}
            Ok(_) => {
                diags.push(Diagnostic::error(
                    "Invalid value for input variable",
                    if rule.error_message.is_empty() {
                        format!("validation failed for {}", label)
                    } else {
                        rule.error_message.clone()
                    },
                ));
            }
            Err(d) => diags.push(d),
        }
    }
    diags
}

// ---------------------------------------------------------------------------
// Locals
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LocalNode {
    pub module: ModuleAddr,
    pub name: String,
    pub expr: Expr,
}

impl LocalNode {
    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        for instance in ctx.expander.expand_module(&self.module) {
            match ctx.eval_in(&instance, RepetitionData::none(), &self.expr) {
                Ok(value) => ctx.named.set_local(&instance, &self.name, value),
                Err(d) => {
                    diags.push(d.with_address(format!("local.{}", self.name)));
                }
            }
        }
        NodeResult::diags(diags)
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct OutputNode {
    pub module: ModuleAddr,
    pub name: String,
    pub config: OutputConfig,
}

impl OutputNode {
    pub fn references(&self) -> Vec<(ModuleAddr, Reference)> {
        let mut refs = self.config.value.references();
        refs.extend(self.config.depends_on.iter().cloned());
        for rule in &self.config.preconditions {
            refs.extend(rule.condition.references());
        }
        refs.into_iter().map(|r| (self.module.clone(), r)).collect()
    }

    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        for instance in ctx.expander.expand_module(&self.module) {
            let label = if instance.is_root() {
                format!("output.{}", self.name)
            } else {
                format!("{}.output.{}", instance, self.name)
            };

            if !self.config.preconditions.is_empty() {
                ctx.register_expected_check(&label);
                let mut failed = false;
                for rule in &self.config.preconditions {
                    let scope = ctx.scope(instance.clone(), RepetitionData::none());
                    match evaluate(&rule.condition, &scope) {
                        Ok(Value::Bool(true)) | Ok(Value::Unknown) => {}
                        Ok(_) => {
                            failed = true;
                            diags.push(Diagnostic::error(
                                "Output precondition failed",
                                rule.error_message.clone(),
                            ).with_address(&label));
                        }
                        Err(d) => {
                            failed = true;
                            diags.push(d.with_address(&label));
                        }
                    }
                }
                ctx.report_check(
                    &label,
                    if failed { CheckStatus::Fail } else { CheckStatus::Pass },
                    Vec::new(),
                );
                if failed {
                    continue;
                }
            }

            // Outputs in a destroy plan resolve to null; the objects they
            // would read are on their way out.
            let value = if ctx.mode() == PlanMode::Destroy {
                Value::Null
            } else {
                let scope = ctx.scope(instance.clone(), RepetitionData::none());
                match evaluate(&self.config.value, &scope) {
                    Ok(v) => v,
                    Err(d) => {
                        diags.push(d.with_address(&label));
                        continue;
                    }
                }
            };
            trace!(output = %label, "evaluated");
            ctx.named.set_output(&instance, &self.name, value);
        }
        NodeResult::diags(diags)
    }
}

// ---------------------------------------------------------------------------
// Module expansion
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ModuleExpandNode {
    pub parent: ModuleAddr,
    pub call: ModuleCall,
}

impl ModuleExpandNode {
    pub fn references(&self) -> Vec<(ModuleAddr, Reference)> {
        let mut refs = Vec::new();
        if let Some(expr) = &self.call.count {
            refs.extend(expr.references());
        }
        if let Some(expr) = &self.call.for_each {
            refs.extend(expr.references());
        }
        refs.into_iter().map(|r| (self.parent.clone(), r)).collect()
    }

    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        for parent_instance in ctx.expander.expand_module(&self.parent) {
            let what = format!("module.{}", self.call.name);
            if ctx.op == crate::context::WalkOperation::Validate {
                // Validation treats every call as a single instance; the
                // real expansion may depend on unset variables.
                ctx.expander.set_module_expansion(
                    &parent_instance,
                    &self.call.name,
                    crate::instances::Expansion::Single,
                );
                ctx.record_module_call_expansion(
                    &parent_instance,
                    &self.call.name,
                    crate::instances::Expansion::Single,
                );
                continue;
            }
            match ctx.evaluate_expansion(
                &parent_instance,
                &self.call.count,
                &self.call.for_each,
                &what,
            ) {
                Ok(expansion) => {
                    ctx.expander.set_module_expansion(
                        &parent_instance,
                        &self.call.name,
                        expansion.clone(),
                    );
                    ctx.record_module_call_expansion(
                        &parent_instance,
                        &self.call.name,
                        expansion,
                    );
                }
                Err(d) => diags.push(d.with_address(&what)),
            }
        }
        NodeResult::diags(diags)
    }
}

// ---------------------------------------------------------------------------
// Check blocks
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct CheckNode {
    pub module: ModuleAddr,
    pub block: CheckBlock,
}

impl CheckNode {
    pub fn references(&self) -> Vec<(ModuleAddr, Reference)> {
        self.block
            .asserts
            .iter()
            .flat_map(|rule| rule.condition.references())
            .map(|r| (self.module.clone(), r))
            .collect()
    }

    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        for instance in ctx.expander.expand_module(&self.module) {
            let label = if instance.is_root() {
                format!("check.{}", self.block.name)
            } else {
                format!("{}.check.{}", instance, self.block.name)
            };
            ctx.register_expected_check(&label);

            let mut status = CheckStatus::Pass;
            let mut messages = Vec::new();
            for rule in &self.block.asserts {
                let scope = ctx.scope(instance.clone(), RepetitionData::none());
                match evaluate(&rule.condition, &scope) {
                    Ok(Value::Bool(true)) => {}
                    Ok(Value::Unknown) => {
                        if status == CheckStatus::Pass {
                            status = CheckStatus::Unknown;
                        }
                    }
                    Ok(_) => {
                        status = CheckStatus::Fail;
                        messages.push(rule.error_message.clone());
                        // Check blocks warn rather than block the run.
                        diags.push(Diagnostic::warning(
                            "Check block assertion failed",
                            rule.error_message.clone(),
                        ).with_address(&label));
                    }
                    Err(d) => {
                        status = CheckStatus::Error;
                        messages.push(d.to_string());
                        diags.push(Diagnostic::warning(
                            "Check block assertion errored",
                            d.to_string(),
                        ).with_address(&label));
                    }
                }
            }
            ctx.report_check(&label, status, messages);
        }
        NodeResult::diags(diags)
    }
}
