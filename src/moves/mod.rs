//! Refactoring moves: `moved` blocks plus the implied renames that appear
//! when a resource switches between keyless, count, and for_each forms.
//! Moves rewrite the prior-state copy before planning; the plan records
//! where each instance came from.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::addrs::{
    AbsResource, AbsResourceInstance, InstanceKey, ModuleInstanceAddr, Target,
};
use crate::config::Config;
use crate::context::PlanOpts;
use crate::error::{Diagnostic, Diagnostics};
use crate::state::State;

#[derive(Clone, Debug)]
pub struct MoveStatement {
    pub from: Target,
    pub to: Target,
    pub implied: bool,
}

#[derive(Debug, Default)]
pub struct MoveResults {
    /// Instance-granular (to, from) pairs actually performed.
    pub moved: HashMap<AbsResourceInstance, AbsResourceInstance>,
    /// Statements that could not run, with the reason; implied blocks are
    /// dropped silently before this.
    pub blocked: Vec<(MoveStatement, String)>,
}

/// Gather explicit `moved` blocks from every module, in tree order.
pub fn collect_moves(config: &Config) -> Vec<MoveStatement> {
    let mut out = Vec::new();
    for (_, module) in config.all_modules() {
        for block in &module.moved {
            out.push(MoveStatement {
                from: block.from.clone(),
                to: block.to.clone(),
                implied: false,
            });
        }
    }
    out
}

/// Infer moves for repetition-form changes: a keyless state instance under
/// a now-counted resource moves to `[0]`, and vice versa.
pub fn implied_moves(config: &Config, state: &State) -> Vec<MoveStatement> {
    let mut out = Vec::new();
    for (addr, resource_state) in &state.resources {
        let Some(resource_config) = config.resource(&addr.config()) else { continue };

        let has_count = resource_config.count.is_some();
        let has_for_each = resource_config.for_each.is_some();

        let keyless = resource_state.instances.contains_key(&None);
        let zero = resource_state
            .instances
            .contains_key(&Some(InstanceKey::Int(0)));

        if has_count && keyless && !zero {
            out.push(MoveStatement {
                from: Target::ResourceInstance(addr.instance(None)),
                to: Target::ResourceInstance(addr.instance(Some(InstanceKey::Int(0)))),
                implied: true,
            });
        } else if !has_count && !has_for_each && zero && !keyless {
            out.push(MoveStatement {
                from: Target::ResourceInstance(addr.instance(Some(InstanceKey::Int(0)))),
                to: Target::ResourceInstance(addr.instance(None)),
                implied: true,
            });
        }
    }
    out
}

/// Apply move statements to the state copy, in order. Destination conflicts
/// block the statement; everything else records the rename.
pub fn apply_moves(statements: &[MoveStatement], state: &mut State) -> MoveResults {
    let mut results = MoveResults::default();

    for statement in statements {
        match (&statement.from, &statement.to) {
            (Target::ResourceInstance(from), Target::ResourceInstance(to)) => {
                move_instance(statement, from, to, state, &mut results);
            }
            (Target::Resource(from), Target::Resource(to)) => {
                move_resource(statement, from, to, state, &mut results);
            }
            (Target::Module(from), Target::Module(to)) => {
                move_module(statement, from, to, state, &mut results);
            }
            _ => {
                results.blocked.push((
                    statement.clone(),
                    "moved endpoints must be the same kind of address".to_string(),
                ));
            }
        }
    }

    results
}

fn move_instance(
    statement: &MoveStatement,
    from: &AbsResourceInstance,
    to: &AbsResourceInstance,
    state: &mut State,
    results: &mut MoveResults,
) {
    let Some(from_resource) = state.resources.get(&from.resource) else { return };
    if !from_resource.instances.contains_key(&from.key) {
        return;
    }
    let occupied = state
        .resource_instance(to)
        .map(|i| !i.is_empty())
        .unwrap_or(false);
    if occupied {
        if !statement.implied {
            results.blocked.push((
                statement.clone(),
                format!("destination {} already has an object", to),
            ));
        }
        return;
    }

    let provider = from_resource.provider.clone();
    let instance = state
        .resources
        .get_mut(&from.resource)
        .and_then(|r| r.instances.remove(&from.key));
    if let Some(instance) = instance {
        state
            .ensure_resource(&to.resource, &provider)
            .instances
            .insert(to.key.clone(), instance);
        debug!(from = %from, to = %to, "moved instance");
        results.moved.insert(to.clone(), from.clone());
    }
}

fn move_resource(
    statement: &MoveStatement,
    from: &AbsResource,
    to: &AbsResource,
    state: &mut State,
    results: &mut MoveResults,
) {
    if !state.resources.contains_key(from) {
        return;
    }
    let occupied = state
        .resources
        .get(to)
        .map(|r| !r.is_empty())
        .unwrap_or(false);
    if occupied {
        results.blocked.push((
            statement.clone(),
            format!("destination {} already has objects", to),
        ));
        return;
    }

    if let Some(resource_state) = state.resources.remove(from) {
        for key in resource_state.instances.keys() {
            results
                .moved
                .insert(to.instance(key.clone()), from.instance(key.clone()));
        }
        debug!(from = %from, to = %to, "moved resource");
        state.resources.insert(to.clone(), resource_state);
    }
}

fn move_module(
    statement: &MoveStatement,
    from: &ModuleInstanceAddr,
    to: &ModuleInstanceAddr,
    state: &mut State,
    results: &mut MoveResults,
) {
    let affected: Vec<AbsResource> = state
        .resources
        .keys()
        .filter(|addr| module_has_prefix(&addr.module, from))
        .cloned()
        .collect();
    if affected.is_empty() {
        return;
    }

    for old_addr in affected {
        let new_module = swap_prefix(&old_addr.module, from, to);
        let new_addr = AbsResource {
            module: new_module,
            resource: old_addr.resource.clone(),
        };
        let occupied = state
            .resources
            .get(&new_addr)
            .map(|r| !r.is_empty())
            .unwrap_or(false);
        if occupied {
            results.blocked.push((
                statement.clone(),
                format!("destination {} already has objects", new_addr),
            ));
            continue;
        }
        if let Some(resource_state) = state.resources.remove(&old_addr) {
            for key in resource_state.instances.keys() {
                results.moved.insert(
                    new_addr.instance(key.clone()),
                    old_addr.instance(key.clone()),
                );
            }
            state.resources.insert(new_addr, resource_state);
        }
    }
}

fn module_has_prefix(module: &ModuleInstanceAddr, prefix: &ModuleInstanceAddr) -> bool {
    module.0.len() >= prefix.0.len()
        && prefix
            .0
            .iter()
            .zip(module.0.iter())
            .all(|(p, m)| p.name == m.name && (p.key.is_none() || p.key == m.key))
}

fn swap_prefix(
    module: &ModuleInstanceAddr,
    from: &ModuleInstanceAddr,
    to: &ModuleInstanceAddr,
) -> ModuleInstanceAddr {
    let mut steps = to.0.clone();
    steps.extend(module.0[from.0.len()..].iter().cloned());
    ModuleInstanceAddr(steps)
}

/// Post-move validation: blocked explicit moves warn, and moves whose
/// destinations fall outside the target set warn that targeting hid them.
pub fn validate_moves(results: &MoveResults, opts: &PlanOpts) -> Diagnostics {
    let mut diags = Diagnostics::new();

    for (statement, reason) in &results.blocked {
        diags.push(Diagnostic::warning(
            "Blocked move",
            format!(
                "cannot move {} to {}: {}",
                statement.from, statement.to, reason
            ),
        ));
    }

    if !opts.targets.is_empty() {
        for to in results.moved.keys() {
            let covered = opts.targets.iter().any(|t| t.contains(to));
            if !covered {
                warn!(moved = %to, "move target outside the -target set");
                diags.push(Diagnostic::warning(
                    "Moved object not targeted",
                    format!(
                        "{} was moved but is outside the current target set; its plan is \
                         deferred to an untargeted run",
                        to
                    ),
                ));
            }
        }
    }

    diags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::Resource;
    use crate::config::{Body, ResourceConfig};
    use crate::state::ObjectState;
    use crate::values::Value;

    fn state_with(instances: &[(&str, Option<InstanceKey>)]) -> State {
        let mut state = State::new();
        let provider = crate::addrs::ProviderConfigAddr::default_for("test");
        for (name, key) in instances {
            let addr = AbsResource::root(Resource::managed("test_thing", name))
                .instance(key.clone());
            state.set_instance_current(
                &addr,
                Some(ObjectState::new(Value::string(*name))),
                &provider,
            );
        }
        state
    }

    #[test]
    fn explicit_resource_move() {
        let mut state = state_with(&[("old", None)]);
        let from = AbsResource::root(Resource::managed("test_thing", "old"));
        let to = AbsResource::root(Resource::managed("test_thing", "new"));
        let statements = vec![MoveStatement {
            from: Target::Resource(from.clone()),
            to: Target::Resource(to.clone()),
            implied: false,
        }];

        let results = apply_moves(&statements, &mut state);
        assert!(results.blocked.is_empty());
        assert!(state.resources.contains_key(&to));
        assert!(!state.resources.contains_key(&from));
        assert_eq!(
            results.moved.get(&to.instance(None)),
            Some(&from.instance(None))
        );
    }

    #[test]
    fn occupied_destination_blocks() {
        let mut state = state_with(&[("old", None), ("new", None)]);
        let statements = vec![MoveStatement {
            from: Target::Resource(AbsResource::root(Resource::managed("test_thing", "old"))),
            to: Target::Resource(AbsResource::root(Resource::managed("test_thing", "new"))),
            implied: false,
        }];
        let results = apply_moves(&statements, &mut state);
        assert_eq!(results.blocked.len(), 1);

        let opts = PlanOpts::default();
        let diags = validate_moves(&results, &opts);
        assert!(!diags.has_errors());
        assert_eq!(diags.warnings().count(), 1);
    }

    #[test]
    fn implied_move_to_count_form() {
        let mut config = Config::default();
        let resource = Resource::managed("test_thing", "a");
        let mut rc = ResourceConfig::new(resource.clone(), Body::empty());
        rc.count = Some(crate::lang::Expr::lit(Value::int(1)));
        config.module.resources.insert(resource.clone(), rc);

        let state = state_with(&[("a", None)]);
        let moves = implied_moves(&config, &state);
        assert_eq!(moves.len(), 1);
        assert!(moves[0].implied);

        let mut state = state;
        let results = apply_moves(&moves, &mut state);
        let addr = AbsResource::root(resource);
        assert!(state
            .resource_instance(&addr.instance(Some(InstanceKey::Int(0))))
            .is_some());
        assert!(state.resource_instance(&addr.instance(None)).is_none());
        assert_eq!(results.moved.len(), 1);
    }

    #[test]
    fn module_rename_moves_contents() {
        let mut state = State::new();
        let provider = crate::addrs::ProviderConfigAddr::default_for("test");
        let old_module = ModuleInstanceAddr::root().child("a", None);
        let addr = AbsResource {
            module: old_module.clone(),
            resource: Resource::managed("test_thing", "x"),
        }
        .instance(None);
        state.set_instance_current(
            &addr,
            Some(ObjectState::new(Value::int(1))),
            &provider,
        );

        let statements = vec![MoveStatement {
            from: Target::Module(old_module),
            to: Target::Module(ModuleInstanceAddr::root().child("b", None)),
            implied: false,
        }];
        let results = apply_moves(&statements, &mut state);
        assert!(results.blocked.is_empty());
        let new_addr = AbsResource {
            module: ModuleInstanceAddr::root().child("b", None),
            resource: Resource::managed("test_thing", "x"),
        };
        assert!(state.resources.contains_key(&new_addr));
    }
}
