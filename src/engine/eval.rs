//! The eval driver: evaluate one expression against a state-backed scope,
//! without planning anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::Engine;
use crate::addrs::ModuleInstanceAddr;
use crate::config::Config;
use crate::context::{PlanOpts, WalkContext, WalkOperation};
use crate::error::{Diagnostic, Diagnostics};
use crate::instances::Expansion;
use crate::lang::{evaluate, Expr, RepetitionData};
use crate::state::{State, SyncState};
use crate::values::Value;

impl Engine {
    /// Evaluate `expression` in the root module's scope against the given
    /// state. Variables resolve from `variables` falling back to declared
    /// defaults; locals evaluate on demand.
    pub fn eval(
        &self,
        config: &Config,
        state: &State,
        expression: &str,
        variables: BTreeMap<String, Value>,
    ) -> (Option<Value>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let expr = match Expr::parse(expression) {
            Ok(e) => e,
            Err(e) => {
                diags.push(Diagnostic::error("Invalid expression", e.to_string()));
                return (None, diags);
            }
        };

        let config = Arc::new(config.clone());
        let opts = Arc::new(PlanOpts {
            variables,
            ..PlanOpts::default()
        });
        let ctx = WalkContext::new(
            WalkOperation::Plan,
            config.clone(),
            self.providers(),
            SyncState::new(state.clone()),
            Arc::new(state.clone()),
            opts,
            self.cancel_token(),
        );

        let root = ModuleInstanceAddr::root();

        // Resource references resolve against the shapes the state holds.
        for (addr, resource_state) in &state.resources {
            let keys: Vec<_> = resource_state.instances.keys().cloned().collect();
            ctx.expander
                .set_resource_expansion(addr, Expansion::Keys(keys));
        }

        // Variables: caller values, then declared defaults.
        for (name, var_config) in &config.module.variables {
            let value = ctx
                .opts
                .variables
                .get(name)
                .cloned()
                .or_else(|| var_config.default.clone())
                .unwrap_or(Value::Null);
            ctx.named.set_variable(&root, name, value);
        }

        // Locals settle by fixpoint; anything still unresolved after that
        // refers to values eval cannot see.
        let mut remaining: Vec<(&String, &Expr)> = config.module.locals.iter().collect();
        let mut passes = remaining.len() + 1;
        while !remaining.is_empty() && passes > 0 {
            passes -= 1;
            remaining.retain(|(name, local_expr)| {
                let scope = ctx.scope(root.clone(), RepetitionData::none());
                match evaluate(local_expr, &scope) {
                    Ok(value) => {
                        ctx.named.set_local(&root, name.as_str(), value);
                        false
                    }
                    Err(_) => true,
                }
            });
        }

        let scope = ctx.scope(root, RepetitionData::none());
        match evaluate(&expr, &scope) {
            Ok(value) => (Some(value), diags),
            Err(d) => {
                diags.push(d);
                (None, diags)
            }
        }
    }
}
