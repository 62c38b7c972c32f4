//! The provider pipeline: vertices for declared configurations, inference
//! of which configuration each resource uses, injection of missing default
//! configurations, schema attachment, pruning, and shutdown vertices.

use crate::addrs::{ModuleAddr, ProviderConfigAddr};
use crate::config::{Config, ProviderRef};
use crate::error::{Diagnostic, Diagnostics};
use crate::graph::Graph;
use crate::lang::Expr;
use crate::nodes::{Node, ProviderNode, ProviderRequest};

use super::{GraphTransformer, TransformCtx};

/// The provider local name implied by a resource type: the prefix before
/// the first underscore.
fn implied_local_name(resource_type: &str) -> &str {
    resource_type.split('_').next().unwrap_or(resource_type)
}

/// Resolve which provider configuration handles a resource: an explicit
/// `provider =` reference, a module call's providers map, a configuration
/// declared in an enclosing module, or the implied root default.
pub fn infer_provider_config(
    config: &Config,
    module: &ModuleAddr,
    explicit: Option<&ProviderRef>,
    resource_type: &str,
) -> (ProviderConfigAddr, Option<Expr>) {
    let mut local_name = explicit
        .map(|r| r.type_name.clone())
        .unwrap_or_else(|| implied_local_name(resource_type).to_string());
    let mut alias = explicit.and_then(|r| r.alias.clone());
    let key_expr = explicit.and_then(|r| r.key.clone());

    let mut current = module.clone();
    loop {
        // Declared in this module?
        if let Some(m) = config.module(&current) {
            let declared = m.provider_configs.iter().any(|block| {
                block.type_name == local_name && block.alias == alias
            });
            if declared {
                return (
                    ProviderConfigAddr {
                        module: current,
                        type_name: local_name,
                        alias,
                    },
                    key_expr,
                );
            }
        }

        let Some((parent, call_name)) = current.parent() else {
            // Root reached without a declaration: the implied default.
            return (
                ProviderConfigAddr {
                    module: ModuleAddr::root(),
                    type_name: local_name,
                    alias,
                },
                key_expr,
            );
        };

        // Translate through the call's providers map if one applies.
        if let Some(call) = config
            .module(&parent)
            .and_then(|m| m.module_calls.get(call_name))
        {
            let key = match &alias {
                Some(a) => format!("{}.{}", local_name, a),
                None => local_name.clone(),
            };
            if let Some(mapped) = call.providers.get(&key) {
                local_name = mapped.type_name.clone();
                alias = mapped.alias.clone();
            }
        }
        current = parent;
    }
}

/// Compute the provider configuration a graph node needs, if any. For
/// static resource vertices this runs the inference; other kinds already
/// carry their resolution.
fn required_provider(cx: &TransformCtx, node: &Node) -> Option<(ProviderConfigAddr, Option<Expr>)> {
    match node {
        Node::PlanResource(n) => Some(infer_provider_config(
            &cx.config,
            &n.addr.module,
            n.config.provider.as_ref(),
            &n.addr.resource.type_,
        )),
        _ => node.provider_dependency().map(|addr| (addr, None)),
    }
}

/// One vertex per declared provider configuration block.
pub struct ProviderConfigTransformer;

impl GraphTransformer for ProviderConfigTransformer {
    fn name(&self) -> &'static str {
        "provider-configs"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        for (module_addr, module) in cx.config.all_modules() {
            for block in &module.provider_configs {
                graph.add(Node::Provider(ProviderNode {
                    addr: ProviderConfigAddr {
                        module: module_addr.clone(),
                        type_name: block.type_name.clone(),
                        alias: block.alias.clone(),
                    },
                    block: Some(block.clone()),
                    plugin: None,
                }));
            }
        }
        Diagnostics::new()
    }
}

/// Inject default configuration vertices for provider configurations that
/// are referenced but never declared.
pub struct MissingProviderTransformer;

impl GraphTransformer for MissingProviderTransformer {
    fn name(&self) -> &'static str {
        "missing-providers"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        let mut present: Vec<ProviderConfigAddr> = graph
            .ids()
            .into_iter()
            .filter_map(|id| match graph.node(id).map(|n| n.as_ref()) {
                Some(Node::Provider(p)) => Some(p.addr.clone()),
                _ => None,
            })
            .collect();

        for id in graph.ids() {
            let Some(node) = graph.node(id).cloned() else { continue };
            let Some((addr, _)) = required_provider(cx, &node) else { continue };
            if !present.contains(&addr) {
                present.push(addr.clone());
                graph.add(Node::Provider(ProviderNode {
                    addr,
                    block: None,
                    plugin: None,
                }));
            }
        }
        Diagnostics::new()
    }
}

/// Attach each node's provider resolution and draw the configure-before-use
/// edges.
pub struct ProviderInferenceTransformer;

impl GraphTransformer for ProviderInferenceTransformer {
    fn name(&self) -> &'static str {
        "provider-inference"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        let providers: Vec<(ProviderConfigAddr, crate::graph::NodeId)> = graph
            .ids()
            .into_iter()
            .filter_map(|id| match graph.node(id).map(|n| n.as_ref()) {
                Some(Node::Provider(p)) => Some((p.addr.clone(), id)),
                _ => None,
            })
            .collect();

        let mut diags = Diagnostics::new();
        for id in graph.ids() {
            let Some(node) = graph.node(id).cloned() else { continue };
            let Some((addr, key_expr)) = required_provider(cx, node.as_ref()) else {
                continue;
            };

            if let Node::PlanResource(n) = node.as_ref() {
                let mut updated = n.clone();
                updated.provider = Some(ProviderRequest {
                    config_addr: addr.clone(),
                    key_expr,
                });
                graph.replace(id, Node::PlanResource(updated));
            }

            match providers.iter().find(|(p, _)| *p == addr) {
                Some((_, provider_id)) => graph.connect(*provider_id, id),
                None => diags.push(Diagnostic::internal(format!(
                    "no provider vertex for {} required by {:?}",
                    addr,
                    graph.node(id).map(|n| {
                        use crate::graph::GraphNode;
                        n.node_name()
                    })
                ))),
            }
        }
        diags
    }
}

/// Remove provider vertices nothing uses.
pub struct PruneProviderTransformer;

impl GraphTransformer for PruneProviderTransformer {
    fn name(&self) -> &'static str {
        "prune-providers"
    }

    fn transform(&self, graph: &mut Graph<Node>, _cx: &TransformCtx) -> Diagnostics {
        for id in graph.ids() {
            let is_provider = matches!(
                graph.node(id).map(|n| n.as_ref()),
                Some(Node::Provider(_))
            );
            if is_provider && graph.successors(id).is_empty() {
                graph.remove(id);
            }
        }
        Diagnostics::new()
    }
}

/// A shutdown vertex per provider, after every consumer.
pub struct CloseProviderTransformer;

impl GraphTransformer for CloseProviderTransformer {
    fn name(&self) -> &'static str {
        "close-providers"
    }

    fn transform(&self, graph: &mut Graph<Node>, _cx: &TransformCtx) -> Diagnostics {
        let providers: Vec<crate::graph::NodeId> = graph
            .ids()
            .into_iter()
            .filter(|id| {
                matches!(graph.node(*id).map(|n| n.as_ref()), Some(Node::Provider(_)))
            })
            .collect();

        for provider_id in providers {
            let addr = match graph.node(provider_id).map(|n| n.as_ref()) {
                Some(Node::Provider(p)) => p.addr.clone(),
                _ => continue,
            };
            let close_id = graph.add(Node::ProviderClose { addr });
            graph.connect(provider_id, close_id);
            for user in graph.successors(provider_id) {
                if user != close_id {
                    graph.connect(user, close_id);
                }
            }
        }
        Diagnostics::new()
    }
}

/// Resolve plugin addresses, fail early on missing factories, and attach
/// resource schemas to the vertices that plan against them.
pub struct AttachSchemaTransformer;

impl GraphTransformer for AttachSchemaTransformer {
    fn name(&self) -> &'static str {
        "attach-schemas"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        let mut diags = Diagnostics::new();

        for id in graph.ids() {
            let Some(node) = graph.node(id).cloned() else { continue };
            match node.as_ref() {
                Node::Provider(p) => {
                    let plugin = cx
                        .config
                        .provider_addr_for(&p.addr.module, &p.addr.type_name);
                    if !cx.providers.has_provider(&plugin) {
                        diags.push(
                            Diagnostic::error(
                                "Missing provider",
                                format!(
                                    "configuration requires provider {} but no factory for \
                                     {} is registered",
                                    p.addr, plugin
                                ),
                            )
                            .with_address(&p.addr),
                        );
                        continue;
                    }
                    let mut updated = p.clone();
                    updated.plugin = Some(plugin);
                    graph.replace(id, Node::Provider(updated));
                }
                Node::PlanResource(n) => {
                    let Some(request) = &n.provider else {
                        diags.push(Diagnostic::internal(format!(
                            "resource {} reached schema attachment without a provider",
                            n.addr
                        )));
                        continue;
                    };
                    let plugin = cx.config.provider_addr_for(
                        &request.config_addr.module,
                        &request.config_addr.type_name,
                    );
                    match cx.providers.resource_type_schema(
                        &plugin,
                        n.addr.resource.mode,
                        &n.addr.resource.type_,
                    ) {
                        Ok((block, version)) => {
                            let mut updated = n.clone();
                            updated.schema = Some((block, version));
                            graph.replace(id, Node::PlanResource(updated));
                        }
                        Err(d) => diags.push(d),
                    }
                }
                Node::OrphanResource(n) => {
                    let plugin = cx
                        .config
                        .provider_addr_for(&n.provider.module, &n.provider.type_name);
                    match cx.providers.resource_type_schema(
                        &plugin,
                        n.addr.resource.mode,
                        &n.addr.resource.type_,
                    ) {
                        Ok((block, version)) => {
                            let mut updated = n.clone();
                            updated.schema = Some((block, version));
                            graph.replace(id, Node::OrphanResource(updated));
                        }
                        Err(d) => diags.push(d),
                    }
                }
                Node::Import(n) => {
                    let plugin = cx.config.provider_addr_for(
                        &n.provider.config_addr.module,
                        &n.provider.config_addr.type_name,
                    );
                    match cx.providers.resource_type_schema(
                        &plugin,
                        n.resource.mode,
                        &n.resource.type_,
                    ) {
                        Ok((block, version)) => {
                            let mut updated = n.clone();
                            updated.schema = Some((block, version));
                            graph.replace(id, Node::Import(updated));
                        }
                        Err(d) => diags.push(d),
                    }
                }
                _ => {}
            }
        }
        diags
    }
}

/// Wire provider vertices before any vertex calling one of their declared
/// functions.
pub struct ProviderFunctionTransformer;

impl GraphTransformer for ProviderFunctionTransformer {
    fn name(&self) -> &'static str {
        "provider-functions"
    }

    fn transform(&self, graph: &mut Graph<Node>, cx: &TransformCtx) -> Diagnostics {
        const BUILTINS: &[&str] = &[
            "length", "keys", "values", "concat", "tostring", "tonumber", "not", "element",
        ];

        let providers: Vec<(crate::graph::NodeId, crate::addrs::ProviderAddr)> = graph
            .ids()
            .into_iter()
            .filter_map(|id| match graph.node(id).map(|n| n.as_ref()) {
                Some(Node::Provider(p)) => {
                    let plugin = cx
                        .config
                        .provider_addr_for(&p.addr.module, &p.addr.type_name);
                    Some((id, plugin))
                }
                _ => None,
            })
            .collect();
        if providers.is_empty() {
            return Diagnostics::new();
        }

        for id in graph.ids() {
            let Some(node) = graph.node(id).cloned() else { continue };
            let called: Vec<String> = node
                .called_functions()
                .into_iter()
                .filter(|name| !BUILTINS.contains(&name.as_str()))
                .collect();
            if called.is_empty() {
                continue;
            }
            for (provider_id, plugin) in &providers {
                let declares = cx
                    .providers
                    .provider_schema(plugin)
                    .map(|s| called.iter().any(|f| s.functions.contains_key(f)))
                    .unwrap_or(false);
                if declares {
                    graph.connect(*provider_id, id);
                }
            }
        }
        Diagnostics::new()
    }
}
