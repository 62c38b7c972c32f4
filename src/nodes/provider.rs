//! Provider configuration vertices: instantiate, validate, and configure
//! one provider instance per expansion key, registering each with the walk
//! context for resource nodes to use.

use std::collections::BTreeMap;

use tracing::debug;

use crate::addrs::{ModuleAddr, ModuleInstanceAddr, ProviderAddr, ProviderConfigAddr, ResolvedProvider};
use crate::config::ProviderBlock;
use crate::context::{WalkContext, WalkOperation};
use crate::error::Diagnostics;
use crate::graph::NodeResult;
use crate::lang::{evaluate, Reference, RepetitionData};
use crate::values::Value;

use super::Node;

#[derive(Clone)]
pub struct ProviderNode {
    pub addr: ProviderConfigAddr,
    /// None for default configurations injected for resources that never
    /// declared one.
    pub block: Option<ProviderBlock>,
    /// The plugin address, resolved before the walk.
    pub plugin: Option<ProviderAddr>,
}

impl ProviderNode {
    pub fn references(&self) -> Vec<(ModuleAddr, Reference)> {
        let Some(block) = &self.block else {
            return Vec::new();
        };
        let mut refs = block.body.references();
        if let Some(expr) = &block.for_each {
            refs.extend(expr.references());
        }
        refs.into_iter()
            .map(|r| (self.addr.module.clone(), r))
            .collect()
    }

    /// The module instance provider bodies evaluate in. Provider blocks are
    /// static per module path; for expanded modules the first instance
    /// stands in, matching the one-configuration-per-path model.
    fn eval_instance(&self, ctx: &WalkContext) -> ModuleInstanceAddr {
        if self.addr.module.is_root() {
            return ModuleInstanceAddr::root();
        }
        if ctx.expander.module_expansion_known(&self.addr.module) {
            ctx.expander
                .expand_module(&self.addr.module)
                .into_iter()
                .next()
                .unwrap_or_else(ModuleInstanceAddr::root)
        } else {
            ModuleInstanceAddr::root()
        }
    }

    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        let plugin = match &self.plugin {
            Some(p) => p.clone(),
            None => ctx.plugin_addr_of(&self.addr),
        };

        let module_instance = self.eval_instance(ctx);

        // Expansion keys for for_each-expanded provider configurations.
        let keys: Vec<Option<crate::addrs::InstanceKey>> = match self
            .block
            .as_ref()
            .and_then(|b| b.for_each.as_ref())
        {
            Some(_) => {
                let block = self.block.as_ref().unwrap();
                match ctx.evaluate_expansion(
                    &module_instance,
                    &None,
                    &block.for_each,
                    &self.addr.to_string(),
                ) {
                    Ok(expansion) => expansion.keys(),
                    Err(d) => {
                        diags.push(d.with_address(&self.addr));
                        return NodeResult::diags(diags);
                    }
                }
            }
            None => vec![None],
        };

        for key in keys {
            let rep = match &key {
                Some(crate::addrs::InstanceKey::Str(k)) => {
                    RepetitionData::for_each(k.clone(), Value::String(k.clone()))
                }
                Some(crate::addrs::InstanceKey::Int(i)) => RepetitionData::for_count(*i),
                None => RepetitionData::none(),
            };

            let config_value = match &self.block {
                Some(block) => {
                    let mut fields = BTreeMap::new();
                    let scope = ctx.scope(module_instance.clone(), rep);
                    let mut eval_failed = false;
                    for (name, expr) in &block.body.attrs {
                        match evaluate(expr, &scope) {
                            Ok(v) => {
                                fields.insert(name.clone(), v);
                            }
                            Err(d) => {
                                diags.push(d.with_address(&self.addr));
                                eval_failed = true;
                            }
                        }
                    }
                    if eval_failed {
                        continue;
                    }
                    Value::Object(fields)
                }
                None => Value::empty_object(),
            };

            let instance = match ctx.providers.new_provider_instance(&plugin) {
                Ok(i) => i,
                Err(d) => {
                    diags.push(d);
                    continue;
                }
            };

            let validation = instance.validate_provider_config(&config_value);
            if validation.has_errors() {
                diags.extend(validation);
                continue;
            }
            diags.extend(validation);

            // Validation walks never make data calls, so configuration is
            // skipped there and the instance only serves static checks.
            if ctx.op != WalkOperation::Validate {
                let configured = instance.configure(&config_value);
                if configured.has_errors() {
                    diags.extend(configured);
                    continue;
                }
                diags.extend(configured);
            }

            let resolved = ResolvedProvider {
                config: self.addr.clone(),
                key,
            };
            debug!(provider = %resolved, "provider configured");
            ctx.register_provider_instance(resolved, instance);
        }

        NodeResult::diags(diags)
    }
}
