//! The diff transformer: one apply vertex per ledger entry, typed by the
//! entry's action. Create-before-destroy replacements split into a create
//! vertex and a reap vertex so dependents can switch over in between.

use std::collections::HashMap;

use tracing::trace;

use crate::addrs::{AbsResource, ConfigResource, ModuleInstanceAddr};
use crate::error::{Diagnostic, Diagnostics};
use crate::graph::{Graph, NodeId};
use crate::lang::RefOrigin;
use crate::nodes::{ApplyInstanceNode, ApplyPhase, Node};
use crate::plan::Action;

use super::{GraphTransformer, TransformCtx};

pub struct DiffTransformer;

impl GraphTransformer for DiffTransformer {
    fn name(&self) -> &'static str {
        "diff"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let Some(changes) = &cx.changes else {
            diags.push(Diagnostic::internal(
                "diff transformer invoked without a change ledger",
            ));
            return diags;
        };

        // Static resource vertices, for expansion-before-instance edges.
        let mut statics: HashMap<ConfigResource, NodeId> = HashMap::new();
        for id in graph.ids() {
            if let Some(Node::PlanResource(n)) = graph.node(id).map(|n| n.as_ref()) {
                statics.insert(n.addr.clone(), id);
            }
        }

        for change in changes.iter() {
            if change.action.is_noop() {
                continue;
            }

            let config_addr = change.addr.config();
            let config = cx.config.resource(&config_addr).cloned();

            let plugin = cx.config.provider_addr_for(
                &change.provider.config.module,
                &change.provider.config.type_name,
            );
            let (schema, schema_version) = match cx.providers.resource_type_schema(
                &plugin,
                change.addr.resource.resource.mode,
                &change.addr.resource.resource.type_,
            ) {
                Ok(parts) => parts,
                Err(d) => {
                    diags.push(d);
                    continue;
                }
            };

            // Dependencies for the objects this vertex will write.
            let dependencies: Vec<AbsResource> = match &config {
                Some(config) => config
                    .references()
                    .iter()
                    .filter_map(|r| match &r.origin {
                        RefOrigin::Resource(resource) => {
                            let dep_config = ConfigResource {
                                module: config_addr.module.clone(),
                                resource: resource.clone(),
                            };
                            if dep_config == config_addr {
                                None
                            } else if dep_config.module == config_addr.module {
                                Some(AbsResource {
                                    module: change.addr.resource.module.clone(),
                                    resource: resource.clone(),
                                })
                            } else if dep_config.module.is_root() {
                                Some(AbsResource {
                                    module: ModuleInstanceAddr::root(),
                                    resource: resource.clone(),
                                })
                            } else {
                                None
                            }
                        }
                        _ => None,
                    })
                    .collect(),
                None => Vec::new(),
            };

            let mut added: Vec<NodeId> = Vec::new();
            match change.action {
                Action::CreateThenDelete => {
                    added.push(graph.add(Node::ApplyInstance(ApplyInstanceNode {
                        change: change.clone(),
                        config: config.clone(),
                        schema: schema.clone(),
                        schema_version,
                        phase: ApplyPhase::CreateBeforeDestroy,
                        dependencies: dependencies.clone(),
                    })));
                    added.push(graph.add(Node::ApplyInstance(ApplyInstanceNode {
                        change: change.clone(),
                        config: config.clone(),
                        schema: schema.clone(),
                        schema_version,
                        phase: ApplyPhase::ReapDeposed,
                        dependencies: Vec::new(),
                    })));
                }
                _ => {
                    added.push(graph.add(Node::ApplyInstance(ApplyInstanceNode {
                        change: change.clone(),
                        config: config.clone(),
                        schema: schema.clone(),
                        schema_version,
                        phase: ApplyPhase::Full,
                        dependencies: dependencies.clone(),
                    })));
                }
            }

            // The static vertex registers this resource's expansion before
            // any of its instances evaluate.
            if let Some(&static_id) = statics.get(&config_addr) {
                for &id in &added {
                    graph.connect(static_id, id);
                }
            }
        }

        trace!(entries = changes.len(), "diff vertices created");
        diags
    }
}
