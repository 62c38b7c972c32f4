//! Import vertices. One vertex per import request (config block or
//! CLI-style target) evaluates the possibly-dynamic target address and
//! import id, then dynamically expands into one vertex per imported
//! object, which pulls the remote object in and seeds the working state
//! before the owning resource plans.

use std::io::Write;

use tracing::{debug, info};

use crate::addrs::{
    AbsResource, AbsResourceInstance, InstanceKey, ModuleAddr, Resource, ResolvedProvider,
};
use crate::context::{WalkContext, WalkOperation};
use crate::error::{Diagnostic, Diagnostics};
use crate::graph::{Graph, NodeResult};
use crate::lang::{Expr, Reference, RepetitionData};
use crate::schema::BlockSchema;
use crate::state::ObjectState;
use crate::values::Value;

use super::{Node, ProviderRequest};

#[derive(Clone)]
pub struct ImportNode {
    pub module: ModuleAddr,
    pub resource: Resource,
    /// A statically-known instance key, for CLI-style targets.
    pub static_key: Option<InstanceKey>,
    /// A dynamic key expression from an `import` block's `to` address.
    pub key_expr: Option<Expr>,
    pub id: Expr,
    pub provider: ProviderRequest,
    pub schema: Option<(BlockSchema, i64)>,
    /// Whether the target resource has configuration; without it the
    /// import needs config generation or fails.
    pub has_config: bool,
}

impl ImportNode {
    pub fn references(&self) -> Vec<(ModuleAddr, Reference)> {
        let mut refs = self.id.references();
        if let Some(expr) = &self.key_expr {
            refs.extend(expr.references());
        }
        refs.into_iter().map(|r| (self.module.clone(), r)).collect()
    }

    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        if ctx.op == WalkOperation::Validate
            || ctx.mode() != crate::plan::PlanMode::Normal
        {
            return NodeResult::ok();
        }
        let mut diags = Diagnostics::new();
        let (schema, schema_version) = match &self.schema {
            Some((block, version)) => (block.clone(), *version),
            None => {
                return NodeResult::diags(
                    Diagnostic::internal(format!(
                        "no schema attached for import of {}",
                        self.resource
                    ))
                    .into(),
                )
            }
        };

        let generating = !self.has_config;
        if generating {
            if ctx.opts.generate_config_path.is_none() {
                diags.push(Diagnostic::error(
                    "Import target has no configuration",
                    format!(
                        "{} is not declared in the configuration; add a resource block \
                         or enable configuration generation",
                        self.resource
                    ),
                ));
                return NodeResult::diags(diags);
            }
            if self.key_expr.is_some() || self.static_key.is_some() || !self.module.is_root() {
                diags.push(Diagnostic::error(
                    "Cannot generate configuration",
                    "configuration generation only supports root-module resource \
                     addresses without instance keys",
                ));
                return NodeResult::diags(diags);
            }
        }

        let mut subgraph: Graph<Node> = Graph::new();

        for module_instance in ctx.expander.expand_module(&self.module) {
            // Resolve the instance key, which may be dynamic.
            let key = match (&self.static_key, &self.key_expr) {
                (Some(k), _) => Some(k.clone()),
                (None, None) => None,
                (None, Some(expr)) => {
                    match ctx.eval_in(&module_instance, RepetitionData::none(), expr) {
                        Ok(Value::String(s)) => Some(InstanceKey::Str(s)),
                        Ok(Value::Number(n)) if n.fract() == 0.0 => {
                            Some(InstanceKey::Int(n as i64))
                        }
                        Ok(Value::Unknown) => {
                            diags.push(Diagnostic::error(
                                "Import block 'to' address contains an invalid key",
                                "the instance key depends on values known only after apply",
                            ));
                            continue;
                        }
                        Ok(other) => {
                            diags.push(Diagnostic::error(
                                "Import block 'to' address contains an invalid key",
                                format!(
                                    "instance keys must be strings or whole numbers, got {}",
                                    other.kind_name()
                                ),
                            ));
                            continue;
                        }
                        Err(d) => {
                            diags.push(d);
                            continue;
                        }
                    }
                }
            };

            let id = match ctx.eval_in(&module_instance, RepetitionData::none(), &self.id) {
                Ok(Value::String(s)) => s,
                Ok(Value::Unknown) => {
                    diags.push(Diagnostic::error(
                        "Invalid import id",
                        "the import id depends on values known only after apply",
                    ));
                    continue;
                }
                Ok(other) => {
                    diags.push(Diagnostic::error(
                        "Invalid import id",
                        format!("import ids must be strings, got {}", other.kind_name()),
                    ));
                    continue;
                }
                Err(d) => {
                    diags.push(d);
                    continue;
                }
            };

            let addr = AbsResource {
                module: module_instance.clone(),
                resource: self.resource.clone(),
            }
            .instance(key);

            if ctx.prev_run_state.current_object(&addr).is_some() {
                diags.push(
                    Diagnostic::error(
                        "Resource already managed",
                        format!("{} is already tracked in state and cannot be imported", addr),
                    )
                    .with_address(&addr),
                );
                continue;
            }

            ctx.imported.lock().unwrap().insert(addr.clone(), id.clone());
            debug!(instance = %addr, id = %id, "import target resolved");

            subgraph.add(Node::ImportInstance(ImportInstanceNode {
                addr,
                id,
                provider: ResolvedProvider {
                    config: self.provider.config_addr.clone(),
                    key: None,
                },
                schema: schema.clone(),
                schema_version,
                generate: generating,
            }));
        }

        NodeResult::expanded(diags, subgraph)
    }
}

#[derive(Clone)]
pub struct ImportInstanceNode {
    pub addr: AbsResourceInstance,
    pub id: String,
    pub provider: ResolvedProvider,
    pub schema: BlockSchema,
    pub schema_version: i64,
    pub generate: bool,
}

impl ImportInstanceNode {
    pub fn execute(&self, ctx: &WalkContext) -> NodeResult<Node> {
        let mut diags = Diagnostics::new();
        let provider = match ctx.provider_for(&self.provider) {
            Ok(p) => p,
            Err(d) => return NodeResult::diags(d.into()),
        };
        let type_name = &self.addr.resource.resource.type_;

        if ctx.state.current_object(&self.addr).is_some() {
            return NodeResult::diags(
                Diagnostic::error(
                    "Resource already managed",
                    format!("{} already has an object in state", self.addr),
                )
                .with_address(&self.addr)
                .into(),
            );
        }

        // One import id may materialize several related objects; the one
        // matching the target type lands at the target address.
        let imported = match provider.import_resource_state(type_name, &self.id) {
            Ok(list) => list,
            Err(d) => return NodeResult::diags(d.with_address(&self.addr).into()),
        };
        let Some(object) = imported.iter().find(|r| &r.type_name == type_name) else {
            return NodeResult::diags(
                Diagnostic::error(
                    "Import returned no resources",
                    format!(
                        "the provider returned no object of type {:?} for id {:?}",
                        type_name, self.id
                    ),
                )
                .with_address(&self.addr)
                .into(),
            );
        };

        // Imported objects refresh immediately so the subsequent plan works
        // against reality.
        let response = provider.read_resource(type_name, &object.state, &object.private);
        if response.diagnostics.has_errors() {
            diags.extend(response.diagnostics);
            return NodeResult::diags(diags);
        }
        let Some(attrs) = response.new_state else {
            return NodeResult::diags(
                Diagnostic::error(
                    "Imported object does not exist",
                    format!("id {:?} resolved to no live remote object", self.id),
                )
                .with_address(&self.addr)
                .into(),
            );
        };

        let mut state_object = ObjectState::new(attrs);
        state_object.schema_version = self.schema_version;
        state_object.private = response.private;
        state_object.sensitive_paths = self.schema.sensitive_paths(&state_object.attrs);
        ctx.refreshed.set_resource_instance_current(
            &self.addr,
            Some(state_object.clone()),
            &self.provider.config,
        );
        ctx.state.set_resource_instance_current(
            &self.addr,
            Some(state_object.clone()),
            &self.provider.config,
        );
        info!(instance = %self.addr, id = %self.id, "imported");

        if self.generate {
            if let Some(path) = &ctx.opts.generate_config_path {
                if let Err(e) = append_generated_config(path, &self.addr, &state_object.attrs) {
                    diags.push(
                        Diagnostic::error(
                            "Failed to write generated configuration",
                            format!("{}: {}", path.display(), e),
                        )
                        .with_address(&self.addr),
                    );
                }
            }
        }

        NodeResult::diags(diags)
    }
}

/// Emit an importable resource body for a generated configuration file.
fn append_generated_config(
    path: &std::path::Path,
    addr: &AbsResourceInstance,
    attrs: &Value,
) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(
        file,
        "resource \"{}\" \"{}\" {{",
        addr.resource.resource.type_, addr.resource.resource.name
    )?;
    if let Value::Object(fields) = attrs {
        for (name, value) in fields {
            if !value.is_null() {
                writeln!(file, "  {} = {}", name, value)?;
            }
        }
    }
    writeln!(file, "}}")?;
    Ok(())
}
