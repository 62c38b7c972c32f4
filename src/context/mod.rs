//! The shared walk context: everything a node can reach while executing.
//! One context serves a whole walk; all interior state is synchronized so
//! worker threads share it freely.

mod scope;

pub use scope::EvalScope;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::addrs::{
    AbsResourceInstance, ModuleInstanceAddr, ProviderAddr, ProviderConfigAddr,
    ResolvedProvider, Target,
};
use crate::config::Config;
use crate::error::Diagnostic;
use crate::graph::CancelToken;
use crate::instances::{Expander, Expansion};
use crate::lang::{evaluate, Expr, Reference, RepetitionData};
use crate::plan::{ChangesSync, PlanMode};
use crate::providers::{Provider, ProviderLibrary};
use crate::schema::BlockSchema;
use crate::state::{CheckResults, State, SyncState};
use crate::values::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkOperation {
    Validate,
    Plan,
    Apply,
}

/// Embedder callbacks around per-instance apply operations. All methods
/// default to no-ops.
pub trait Hooks: Send + Sync {
    fn pre_apply(&self, _addr: &AbsResourceInstance, _action: crate::plan::Action) {}
    fn post_apply(&self, _addr: &AbsResourceInstance, _success: bool) {}
}

pub struct NoopHooks;

impl Hooks for NoopHooks {}

/// A CLI-style import request, unified with `import` blocks before graph
/// construction.
#[derive(Clone, Debug)]
pub struct ImportTarget {
    pub addr: AbsResourceInstance,
    pub id: String,
}

/// Options for a plan run; apply reuses the relevant subset via the plan
/// document.
#[derive(Clone, Debug, Default)]
pub struct PlanOpts {
    pub mode: PlanMode,
    pub variables: BTreeMap<String, Value>,
    pub targets: Vec<Target>,
    pub excludes: Vec<Target>,
    pub force_replace: Vec<AbsResourceInstance>,
    pub skip_refresh: bool,
    pub import_targets: Vec<ImportTarget>,
    /// When set, imports whose target has no configuration emit a generated
    /// body to this file instead of failing.
    pub generate_config_path: Option<PathBuf>,
    /// References held alive by the embedder, exempt from pruning.
    pub external_references: Vec<Reference>,
}

/// Named values produced by variable, local, and output nodes during the
/// walk, keyed per module instance.
#[derive(Clone, Default)]
pub struct NamedValues {
    inner: Arc<Mutex<NamedData>>,
}

#[derive(Default)]
struct NamedData {
    variables: HashMap<(ModuleInstanceAddr, String), Value>,
    locals: HashMap<(ModuleInstanceAddr, String), Value>,
    outputs: HashMap<(ModuleInstanceAddr, String), Value>,
}

impl NamedValues {
    pub fn set_variable(&self, module: &ModuleInstanceAddr, name: &str, value: Value) {
        self.inner
            .lock()
            .unwrap()
            .variables
            .insert((module.clone(), name.to_string()), value);
    }

    pub fn variable(&self, module: &ModuleInstanceAddr, name: &str) -> Option<Value> {
        self.inner
            .lock()
            .unwrap()
            .variables
            .get(&(module.clone(), name.to_string()))
            .cloned()
    }

    pub fn set_local(&self, module: &ModuleInstanceAddr, name: &str, value: Value) {
        self.inner
            .lock()
            .unwrap()
            .locals
            .insert((module.clone(), name.to_string()), value);
    }

    pub fn local(&self, module: &ModuleInstanceAddr, name: &str) -> Option<Value> {
        self.inner
            .lock()
            .unwrap()
            .locals
            .get(&(module.clone(), name.to_string()))
            .cloned()
    }

    pub fn set_output(&self, module: &ModuleInstanceAddr, name: &str, value: Value) {
        self.inner
            .lock()
            .unwrap()
            .outputs
            .insert((module.clone(), name.to_string()), value);
    }

    pub fn output(&self, module: &ModuleInstanceAddr, name: &str) -> Option<Value> {
        self.inner
            .lock()
            .unwrap()
            .outputs
            .get(&(module.clone(), name.to_string()))
            .cloned()
    }

    /// All outputs of one module instance, for `module.x` references.
    pub fn outputs_of(&self, module: &ModuleInstanceAddr) -> BTreeMap<String, Value> {
        self.inner
            .lock()
            .unwrap()
            .outputs
            .iter()
            .filter(|((m, _), _)| m == module)
            .map(|((_, name), value)| (name.clone(), value.clone()))
            .collect()
    }
}

pub struct WalkContext {
    pub op: WalkOperation,
    pub config: Arc<Config>,
    pub providers: Arc<ProviderLibrary>,
    /// The working state: planned values during plan, applied objects
    /// during apply.
    pub state: SyncState,
    /// Post-refresh objects recorded during plan, for drift computation.
    pub refreshed: SyncState,
    pub prev_run_state: Arc<State>,
    pub changes: ChangesSync,
    pub expander: Arc<Expander>,
    pub named: NamedValues,
    pub checks: Arc<Mutex<CheckResults>>,
    pub cancel: CancelToken,
    pub opts: Arc<PlanOpts>,
    pub hooks: Arc<dyn Hooks>,
    /// Imported instance addresses and their import ids, registered by
    /// import nodes and consumed by instance planning.
    pub imported: Arc<Mutex<HashMap<AbsResourceInstance, String>>>,
    instances: Arc<Mutex<HashMap<ResolvedProvider, Arc<dyn Provider>>>>,
    /// Module-call expansions, so scopes can shape `module.x` references.
    module_call_expansions: Arc<Mutex<HashMap<(ModuleInstanceAddr, String), Expansion>>>,
}

impl WalkContext {
    pub fn new(
        op: WalkOperation,
        config: Arc<Config>,
        providers: Arc<ProviderLibrary>,
        state: SyncState,
        prev_run_state: Arc<State>,
        opts: Arc<PlanOpts>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            op,
            config,
            providers,
            state,
            refreshed: SyncState::new(State::new()),
            prev_run_state,
            changes: ChangesSync::new(),
            expander: Arc::new(Expander::new()),
            named: NamedValues::default(),
            checks: Arc::new(Mutex::new(CheckResults::new())),
            cancel,
            opts,
            hooks: Arc::new(NoopHooks),
            imported: Arc::new(Mutex::new(HashMap::new())),
            instances: Arc::new(Mutex::new(HashMap::new())),
            module_call_expansions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn mode(&self) -> PlanMode {
        self.opts.mode
    }

    /// An evaluation scope for expressions inside one module instance.
    pub fn scope(&self, module: ModuleInstanceAddr, rep: RepetitionData) -> EvalScope<'_> {
        EvalScope::new(self, module, rep)
    }

    pub fn eval_in(
        &self,
        module: &ModuleInstanceAddr,
        rep: RepetitionData,
        expr: &Expr,
    ) -> Result<Value, Diagnostic> {
        let scope = self.scope(module.clone(), rep);
        evaluate(expr, &scope)
    }

    // -- providers ---------------------------------------------------------

    pub fn register_provider_instance(
        &self,
        resolved: ResolvedProvider,
        instance: Arc<dyn Provider>,
    ) {
        self.instances.lock().unwrap().insert(resolved, instance);
    }

    /// The configured provider instance for a resolved reference. The graph
    /// guarantees the provider node ran first, so a miss is an engine bug.
    pub fn provider_for(
        &self,
        resolved: &ResolvedProvider,
    ) -> Result<Arc<dyn Provider>, Diagnostic> {
        self.instances
            .lock()
            .unwrap()
            .get(resolved)
            .cloned()
            .ok_or_else(|| {
                Diagnostic::internal(format!(
                    "provider {} was not configured before use",
                    resolved
                ))
            })
    }

    /// All configured instances of one provider configuration.
    pub fn close_provider(&self, addr: &ProviderConfigAddr) {
        let mut instances = self.instances.lock().unwrap();
        let keys: Vec<ResolvedProvider> = instances
            .keys()
            .filter(|r| r.config == *addr)
            .cloned()
            .collect();
        for key in keys {
            if let Some(instance) = instances.remove(&key) {
                instance.close();
            }
        }
    }

    /// Shut down any instances the close vertices never reached, e.g.
    /// after a cancelled or failed walk.
    pub fn close_all_providers(&self) {
        let drained: Vec<Arc<dyn Provider>> = {
            let mut instances = self.instances.lock().unwrap();
            instances.drain().map(|(_, i)| i).collect()
        };
        for instance in drained {
            instance.close();
        }
    }

    /// Ask every live provider instance to stop, without holding any other
    /// engine lock.
    pub fn stop_all_providers(&self) {
        let instances: Vec<Arc<dyn Provider>> =
            self.instances.lock().unwrap().values().cloned().collect();
        for instance in instances {
            instance.stop();
        }
    }

    /// Configured provider instances paired with their plugin address, for
    /// provider-contributed function dispatch.
    pub fn provider_instances_with_addrs(&self) -> Vec<(ProviderAddr, Arc<dyn Provider>)> {
        self.instances
            .lock()
            .unwrap()
            .iter()
            .map(|(resolved, instance)| {
                let addr = self.plugin_addr_of(&resolved.config);
                (addr, instance.clone())
            })
            .collect()
    }

    /// Resolve a provider configuration address to its plugin address.
    pub fn plugin_addr_of(&self, config_addr: &ProviderConfigAddr) -> ProviderAddr {
        self.config
            .provider_addr_for(&config_addr.module, &config_addr.type_name)
    }

    pub fn resource_schema(
        &self,
        config_addr: &ProviderConfigAddr,
        mode: crate::addrs::ResourceMode,
        type_name: &str,
    ) -> Result<(BlockSchema, i64), Diagnostic> {
        let plugin = self.plugin_addr_of(config_addr);
        self.providers.resource_type_schema(&plugin, mode, type_name)
    }

    // -- module call expansions -------------------------------------------

    pub fn record_module_call_expansion(
        &self,
        parent: &ModuleInstanceAddr,
        call_name: &str,
        expansion: Expansion,
    ) {
        self.module_call_expansions
            .lock()
            .unwrap()
            .insert((parent.clone(), call_name.to_string()), expansion);
    }

    pub fn module_call_expansion(
        &self,
        parent: &ModuleInstanceAddr,
        call_name: &str,
    ) -> Option<Expansion> {
        self.module_call_expansions
            .lock()
            .unwrap()
            .get(&(parent.clone(), call_name.to_string()))
            .cloned()
    }

    // -- checks ------------------------------------------------------------

    pub fn register_expected_check(&self, addr: impl std::fmt::Display) {
        self.checks.lock().unwrap().register_expected(addr);
    }

    pub fn report_check(
        &self,
        addr: impl std::fmt::Display,
        status: crate::state::CheckStatus,
        messages: Vec<String>,
    ) {
        self.checks.lock().unwrap().report(addr, status, messages);
    }

    // -- expansion evaluation ---------------------------------------------

    /// Evaluate a count/for_each pair into an expansion. Unknowns are
    /// rejected: expansion must be decidable at plan time.
    pub fn evaluate_expansion(
        &self,
        module: &ModuleInstanceAddr,
        count: &Option<Expr>,
        for_each: &Option<Expr>,
        what: &str,
    ) -> Result<Expansion, Diagnostic> {
        if let Some(expr) = count {
            let value = self.eval_in(module, RepetitionData::none(), expr)?;
            return match value {
                Value::Unknown => Err(Diagnostic::error(
                    "Invalid count argument",
                    format!(
                        "the count of {} depends on values known only after apply",
                        what
                    ),
                )),
                Value::Number(_) => match value.as_integer() {
                    Some(n) if n >= 0 => Ok(Expansion::Count(n as usize)),
                    _ => Err(Diagnostic::error(
                        "Invalid count argument",
                        format!("count of {} must be a non-negative whole number", what),
                    )),
                },
                other => Err(Diagnostic::error(
                    "Invalid count argument",
                    format!(
                        "count of {} must be a number, got {}",
                        what,
                        other.kind_name()
                    ),
                )),
            };
        }

        if let Some(expr) = for_each {
            let value = self.eval_in(module, RepetitionData::none(), expr)?;
            return match value {
                Value::Unknown => Err(Diagnostic::error(
                    "Invalid for_each argument",
                    format!(
                        "the for_each of {} depends on values known only after apply",
                        what
                    ),
                )),
                Value::Object(fields) => Ok(Expansion::ForEach(fields)),
                Value::List(items) => {
                    let mut map = BTreeMap::new();
                    for item in items {
                        match item {
                            Value::String(s) => {
                                map.insert(s.clone(), Value::String(s));
                            }
                            other => {
                                return Err(Diagnostic::error(
                                    "Invalid for_each argument",
                                    format!(
                                        "for_each of {} accepts a map or a set of strings, \
                                         found a {} element",
                                        what,
                                        other.kind_name()
                                    ),
                                ))
                            }
                        }
                    }
                    Ok(Expansion::ForEach(map))
                }
                other => Err(Diagnostic::error(
                    "Invalid for_each argument",
                    format!(
                        "for_each of {} must be a map or set, got {}",
                        what,
                        other.kind_name()
                    ),
                )),
            };
        }

        Ok(Expansion::Single)
    }
}
