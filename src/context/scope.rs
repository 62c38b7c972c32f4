//! The expression scope backed by the walk context: resolves references
//! against named values, the working state, and the expander, and routes
//! non-builtin functions to provider-contributed implementations.

use std::collections::BTreeMap;

use super::WalkContext;
use crate::addrs::{AbsResource, InstanceKey, ModuleInstanceAddr, Resource};
use crate::error::Diagnostic;
use crate::instances::Expansion;
use crate::lang::{RefOrigin, RepetitionData, Scope};
use crate::values::Value;

pub struct EvalScope<'a> {
    ctx: &'a WalkContext,
    module: ModuleInstanceAddr,
    rep: RepetitionData,
}

impl<'a> EvalScope<'a> {
    pub fn new(ctx: &'a WalkContext, module: ModuleInstanceAddr, rep: RepetitionData) -> Self {
        Self { ctx, module, rep }
    }

    /// The value of a whole resource as seen from expressions: a single
    /// object, a list (count), or a map (for_each) of instance attributes.
    fn resource_value(&self, resource: &Resource) -> Value {
        let abs = AbsResource {
            module: self.module.clone(),
            resource: resource.clone(),
        };
        let Some(expansion) = self.ctx.expander.resource_expansion(&abs) else {
            // Not yet registered: only reachable in operations that do not
            // wire reference edges (validate), where unknown is correct.
            return Value::Unknown;
        };
        match expansion {
            Expansion::Single => self.instance_value(&abs, &None),
            Expansion::Count(n) => Value::List(
                (0..n)
                    .map(|i| self.instance_value(&abs, &Some(InstanceKey::Int(i as i64))))
                    .collect(),
            ),
            Expansion::ForEach(map) => Value::Object(
                map.keys()
                    .map(|k| {
                        (
                            k.clone(),
                            self.instance_value(&abs, &Some(InstanceKey::Str(k.clone()))),
                        )
                    })
                    .collect(),
            ),
            // Literal key sets take the shape their keys imply.
            Expansion::Keys(keys) => {
                if keys == vec![None] {
                    return self.instance_value(&abs, &None);
                }
                if keys.iter().all(|k| matches!(k, Some(InstanceKey::Str(_)))) {
                    return Value::Object(
                        keys.iter()
                            .filter_map(|k| match k {
                                Some(InstanceKey::Str(s)) => Some((
                                    s.clone(),
                                    self.instance_value(
                                        &abs,
                                        &Some(InstanceKey::Str(s.clone())),
                                    ),
                                )),
                                _ => None,
                            })
                            .collect(),
                    );
                }
                let max = keys
                    .iter()
                    .filter_map(|k| match k {
                        Some(InstanceKey::Int(i)) => Some(*i),
                        _ => None,
                    })
                    .max()
                    .unwrap_or(-1);
                Value::List(
                    (0..=max)
                        .map(|i| self.instance_value(&abs, &Some(InstanceKey::Int(i))))
                        .collect(),
                )
            }
        }
    }

    fn instance_value(&self, abs: &AbsResource, key: &Option<InstanceKey>) -> Value {
        match self.ctx.state.current_object(&abs.instance(key.clone())) {
            Some(object) => object.attrs,
            None => Value::Unknown,
        }
    }

    /// `module.x` resolves to the child's outputs, shaped by the call's
    /// expansion.
    fn module_call_value(&self, call_name: &str) -> Result<Value, Diagnostic> {
        let Some(expansion) = self.ctx.module_call_expansion(&self.module, call_name) else {
            return Ok(Value::Unknown);
        };
        let child_outputs = |key: Option<InstanceKey>| -> Value {
            let child = self.module.child(call_name, key);
            let outputs: BTreeMap<String, Value> = self.ctx.named.outputs_of(&child);
            Value::Object(outputs)
        };
        Ok(match expansion {
            Expansion::Single => child_outputs(None),
            Expansion::Count(n) => Value::List(
                (0..n)
                    .map(|i| child_outputs(Some(InstanceKey::Int(i as i64))))
                    .collect(),
            ),
            Expansion::ForEach(map) => Value::Object(
                map.keys()
                    .map(|k| (k.clone(), child_outputs(Some(InstanceKey::Str(k.clone())))))
                    .collect(),
            ),
            // Module calls never register literal key sets.
            Expansion::Keys(_) => Value::Unknown,
        })
    }
}

impl Scope for EvalScope<'_> {
    fn resolve_origin(&self, origin: &RefOrigin) -> Result<Value, Diagnostic> {
        match origin {
            RefOrigin::InputVariable(name) => {
                self.ctx.named.variable(&self.module, name).ok_or_else(|| {
                    Diagnostic::error(
                        "Reference to undeclared input variable",
                        format!("no variable named {:?} is available here", name),
                    )
                })
            }
            RefOrigin::LocalValue(name) => {
                self.ctx.named.local(&self.module, name).ok_or_else(|| {
                    Diagnostic::error(
                        "Reference to undeclared local value",
                        format!("no local value named {:?} is available here", name),
                    )
                })
            }
            RefOrigin::ModuleCall(name) => self.module_call_value(name),
            RefOrigin::Resource(resource) => Ok(self.resource_value(resource)),
            RefOrigin::CountIndex | RefOrigin::EachKey | RefOrigin::EachValue => Err(
                Diagnostic::internal("repetition symbols must be resolved by the evaluator"),
            ),
        }
    }

    fn repetition(&self) -> RepetitionData {
        self.rep.clone()
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, Diagnostic> {
        for (plugin_addr, instance) in self.ctx.provider_instances_with_addrs() {
            let declares = self
                .ctx
                .providers
                .provider_schema(&plugin_addr)
                .map(|s| s.functions.contains_key(name))
                .unwrap_or(false);
            if declares {
                return instance.call_function(name, args);
            }
        }
        Err(Diagnostic::error(
            "Call to unknown function",
            format!("there is no function named {:?}", name),
        ))
    }
}
