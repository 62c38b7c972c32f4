//! Import lowering: `import` blocks and CLI-style targets become one
//! import vertex each, ordered before the resource vertex they seed.

use std::collections::HashMap;

use crate::addrs::ConfigResource;
use crate::error::Diagnostics;
use crate::graph::NodeId;
use crate::nodes::{ImportNode, Node, ProviderRequest};

use super::providers::infer_provider_config;
use super::{GraphTransformer, TransformCtx};

pub struct ImportTransformer;

impl GraphTransformer for ImportTransformer {
    fn name(&self) -> &'static str {
        "imports"
    }

    fn transform(
        &self,
        graph: &mut crate::graph::Graph<Node>,
        cx: &TransformCtx,
    ) -> Diagnostics {
        let mut statics: HashMap<ConfigResource, NodeId> = HashMap::new();
        for id in graph.ids() {
            if let Some(Node::PlanResource(n)) = graph.node(id).map(|n| n.as_ref()) {
                statics.insert(n.addr.clone(), id);
            }
        }

        let mut pending: Vec<ImportNode> = Vec::new();

        // Config-block imports; the `to` address is already absolute.
        for (_, module) in cx.config.all_modules() {
            for block in &module.imports {
                let target = ConfigResource {
                    module: block.to.module.clone(),
                    resource: block.to.resource.clone(),
                };
                let (config_addr, key_expr) = infer_provider_config(
                    &cx.config,
                    &target.module,
                    block.provider.as_ref(),
                    &target.resource.type_,
                );
                pending.push(ImportNode {
                    module: target.module.clone(),
                    resource: target.resource.clone(),
                    static_key: None,
                    key_expr: block.to.key.clone(),
                    id: block.id.clone(),
                    provider: ProviderRequest {
                        config_addr,
                        key_expr,
                    },
                    schema: None,
                    has_config: cx.config.resource(&target).is_some(),
                });
            }
        }

        // CLI-style targets, unified onto the same vertex kind.
        for target in &cx.opts.import_targets {
            let config_addr = target.addr.config();
            let (provider_addr, key_expr) = infer_provider_config(
                &cx.config,
                &config_addr.module,
                None,
                &config_addr.resource.type_,
            );
            pending.push(ImportNode {
                module: config_addr.module.clone(),
                resource: config_addr.resource.clone(),
                static_key: target.addr.key.clone(),
                key_expr: None,
                id: crate::lang::Expr::lit(crate::values::Value::String(target.id.clone())),
                provider: ProviderRequest {
                    config_addr: provider_addr,
                    key_expr,
                },
                schema: None,
                has_config: cx.config.resource(&config_addr).is_some(),
            });
        }

        for node in pending {
            let target = ConfigResource {
                module: node.module.clone(),
                resource: node.resource.clone(),
            };
            let id = graph.add(Node::Import(node));
            // The import seeds state the resource's plan reads.
            if let Some(&resource_id) = statics.get(&target) {
                graph.connect(id, resource_id);
            }
        }

        Diagnostics::new()
    }
}
