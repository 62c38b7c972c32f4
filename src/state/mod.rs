//! The engine's record of real-world objects it manages. The raw model is
//! passive and not thread-safe; walks go through [`SyncState`]. Snapshots
//! serialize losslessly for the plan document.

mod checks;
mod sync;

pub use checks::{CheckResult, CheckResults, CheckStatus};
pub use sync::SyncState;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::addrs::{
    AbsResource, AbsResourceInstance, DeposedKey, InstanceKey, ModuleInstanceAddr,
    ProviderConfigAddr,
};
use crate::values::{Value, ValuePath};

/// One remote object: its attributes plus the metadata the engine carries
/// for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectState {
    pub attrs: Value,
    #[serde(default)]
    pub schema_version: i64,
    #[serde(default)]
    pub sensitive_paths: Vec<ValuePath>,
    /// Opaque provider bytes, stored and passed back verbatim.
    #[serde(default)]
    pub private: Vec<u8>,
    /// Resources this object depended on when created, for destroy order.
    #[serde(default)]
    pub dependencies: Vec<AbsResource>,
    #[serde(default)]
    pub create_before_destroy: bool,
}

impl ObjectState {
    pub fn new(attrs: Value) -> Self {
        Self {
            attrs,
            schema_version: 0,
            sensitive_paths: Vec::new(),
            private: Vec::new(),
            dependencies: Vec::new(),
            create_before_destroy: false,
        }
    }
}

/// Per-instance-key record: the current object plus any deposed objects
/// left behind by create-before-destroy replacements.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceState {
    pub current: Option<ObjectState>,
    pub deposed: BTreeMap<DeposedKey, ObjectState>,
}

impl InstanceState {
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.deposed.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResourceState {
    pub provider: ProviderConfigAddr,
    pub instances: BTreeMap<Option<InstanceKey>, InstanceState>,
}

impl ResourceState {
    pub fn new(provider: ProviderConfigAddr) -> Self {
        Self {
            provider,
            instances: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.instances.values().all(InstanceState::is_empty)
    }
}

/// The full state snapshot: resources keyed by absolute address, plus the
/// recorded outcomes of condition checks.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "StateRepr", from = "StateRepr")]
pub struct State {
    pub resources: BTreeMap<AbsResource, ResourceState>,
    pub check_results: CheckResults,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no object exists anywhere, husks included.
    pub fn is_empty(&self) -> bool {
        self.resources.values().all(ResourceState::is_empty)
    }

    pub fn resource(&self, addr: &AbsResource) -> Option<&ResourceState> {
        self.resources.get(addr)
    }

    pub fn resource_instance(&self, addr: &AbsResourceInstance) -> Option<&InstanceState> {
        self.resources
            .get(&addr.resource)?
            .instances
            .get(&addr.key)
    }

    pub fn current_object(&self, addr: &AbsResourceInstance) -> Option<&ObjectState> {
        self.resource_instance(addr)?.current.as_ref()
    }

    /// Every instance address with a current or deposed object, in address
    /// order.
    pub fn all_resource_instances(&self) -> Vec<AbsResourceInstance> {
        let mut out = Vec::new();
        for (addr, resource) in &self.resources {
            for (key, instance) in &resource.instances {
                if !instance.is_empty() {
                    out.push(addr.instance(key.clone()));
                }
            }
        }
        out
    }

    /// Every module instance that still holds any resource.
    pub fn all_module_instances(&self) -> BTreeSet<ModuleInstanceAddr> {
        self.resources
            .iter()
            .filter(|(_, r)| !r.is_empty())
            .map(|(addr, _)| addr.module.clone())
            .collect()
    }

    pub fn ensure_resource(
        &mut self,
        addr: &AbsResource,
        provider: &ProviderConfigAddr,
    ) -> &mut ResourceState {
        self.resources
            .entry(addr.clone())
            .or_insert_with(|| ResourceState::new(provider.clone()))
    }

    /// Set or clear the current object of one instance. Clearing drops the
    /// instance record when no deposed objects remain; the resource husk is
    /// kept until [`State::prune`].
    pub fn set_instance_current(
        &mut self,
        addr: &AbsResourceInstance,
        object: Option<ObjectState>,
        provider: &ProviderConfigAddr,
    ) {
        let resource = self.ensure_resource(&addr.resource, provider);
        match object {
            Some(obj) => {
                resource
                    .instances
                    .entry(addr.key.clone())
                    .or_default()
                    .current = Some(obj);
            }
            None => {
                if let Some(instance) = resource.instances.get_mut(&addr.key) {
                    instance.current = None;
                    if instance.is_empty() {
                        resource.instances.remove(&addr.key);
                    }
                }
            }
        }
    }

    pub fn set_instance_deposed(
        &mut self,
        addr: &AbsResourceInstance,
        key: &DeposedKey,
        object: Option<ObjectState>,
        provider: &ProviderConfigAddr,
    ) {
        let resource = self.ensure_resource(&addr.resource, provider);
        match object {
            Some(obj) => {
                resource
                    .instances
                    .entry(addr.key.clone())
                    .or_default()
                    .deposed
                    .insert(key.clone(), obj);
            }
            None => {
                if let Some(instance) = resource.instances.get_mut(&addr.key) {
                    instance.deposed.remove(key);
                    if instance.is_empty() {
                        resource.instances.remove(&addr.key);
                    }
                }
            }
        }
    }

    /// Move the current object aside under a fresh deposed key, the first
    /// half of a create-before-destroy replacement.
    pub fn depose_current(&mut self, addr: &AbsResourceInstance) -> Option<DeposedKey> {
        let resource = self.resources.get_mut(&addr.resource)?;
        let instance = resource.instances.get_mut(&addr.key)?;
        let current = instance.current.take()?;
        let key = DeposedKey::new_random();
        instance.deposed.insert(key.clone(), current);
        Some(key)
    }

    /// Drop instance records with no objects and resource records with no
    /// instances.
    pub fn prune(&mut self) {
        for resource in self.resources.values_mut() {
            resource.instances.retain(|_, inst| !inst.is_empty());
        }
        self.resources.retain(|_, r| !r.instances.is_empty());
    }
}

// ---------------------------------------------------------------------------
// Serde representation
// ---------------------------------------------------------------------------

// Maps keyed by structured addresses flatten into entry lists so the
// snapshot stays valid JSON.

#[derive(Serialize, Deserialize)]
struct InstanceRepr {
    key: Option<InstanceKey>,
    current: Option<ObjectState>,
    deposed: Vec<(DeposedKey, ObjectState)>,
}

#[derive(Serialize, Deserialize)]
struct ResourceRepr {
    addr: AbsResource,
    provider: ProviderConfigAddr,
    instances: Vec<InstanceRepr>,
}

#[derive(Serialize, Deserialize)]
pub struct StateRepr {
    resources: Vec<ResourceRepr>,
    #[serde(default)]
    check_results: CheckResults,
}

impl From<State> for StateRepr {
    fn from(state: State) -> Self {
        Self {
            resources: state
                .resources
                .into_iter()
                .map(|(addr, resource)| ResourceRepr {
                    addr,
                    provider: resource.provider,
                    instances: resource
                        .instances
                        .into_iter()
                        .map(|(key, instance)| InstanceRepr {
                            key,
                            current: instance.current,
                            deposed: instance.deposed.into_iter().collect(),
                        })
                        .collect(),
                })
                .collect(),
            check_results: state.check_results,
        }
    }
}

impl From<StateRepr> for State {
    fn from(repr: StateRepr) -> Self {
        let mut state = State::new();
        for resource_repr in repr.resources {
            let resource = state
                .resources
                .entry(resource_repr.addr)
                .or_insert_with(|| ResourceState::new(resource_repr.provider.clone()));
            for instance_repr in resource_repr.instances {
                let instance = resource
                    .instances
                    .entry(instance_repr.key)
                    .or_default();
                instance.current = instance_repr.current;
                instance.deposed = instance_repr.deposed.into_iter().collect();
            }
        }
        state.check_results = repr.check_results;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::Resource;

    fn addr(name: &str, key: Option<InstanceKey>) -> AbsResourceInstance {
        AbsResource::root(Resource::managed("test_thing", name)).instance(key)
    }

    fn provider() -> ProviderConfigAddr {
        ProviderConfigAddr::default_for("test")
    }

    #[test]
    fn set_and_remove_current() {
        let mut state = State::new();
        let a0 = addr("a", Some(InstanceKey::Int(0)));
        state.set_instance_current(
            &a0,
            Some(ObjectState::new(Value::empty_object())),
            &provider(),
        );
        assert!(state.current_object(&a0).is_some());
        assert_eq!(state.all_resource_instances(), vec![a0.clone()]);

        state.set_instance_current(&a0, None, &provider());
        assert!(state.current_object(&a0).is_none());
        // The husk survives until pruning.
        assert_eq!(state.resources.len(), 1);
        state.prune();
        assert!(state.resources.is_empty());
    }

    #[test]
    fn depose_moves_current_aside() {
        let mut state = State::new();
        let a = addr("a", None);
        state.set_instance_current(
            &a,
            Some(ObjectState::new(Value::string("old"))),
            &provider(),
        );
        let key = state.depose_current(&a).unwrap();
        assert!(state.current_object(&a).is_none());
        let instance = state.resource_instance(&a).unwrap();
        assert_eq!(instance.deposed[&key].attrs, Value::string("old"));
        // Instance still listed because a deposed object remains.
        assert_eq!(state.all_resource_instances().len(), 1);
    }

    #[test]
    fn snapshot_serde_round_trip() {
        let mut state = State::new();
        let a0 = addr("a", Some(InstanceKey::Int(0)));
        let mut obj = ObjectState::new(Value::Object(
            [("num".to_string(), Value::int(7))].into_iter().collect(),
        ));
        obj.dependencies
            .push(AbsResource::root(Resource::managed("test_thing", "b")));
        obj.sensitive_paths.push(ValuePath::attr("num"));
        obj.private = vec![1, 2, 3];
        state.set_instance_current(&a0, Some(obj), &provider());
        state.depose_current(&a0);
        state.set_instance_current(
            &a0,
            Some(ObjectState::new(Value::string("new"))),
            &provider(),
        );

        let text = serde_json::to_string(&state).unwrap();
        let back: State = serde_json::from_str(&text).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn deep_copy_is_independent() {
        let mut state = State::new();
        let a = addr("a", None);
        state.set_instance_current(
            &a,
            Some(ObjectState::new(Value::int(1))),
            &provider(),
        );
        let copy = state.clone();
        state.set_instance_current(&a, Some(ObjectState::new(Value::int(2))), &provider());
        assert_eq!(copy.current_object(&a).unwrap().attrs, Value::int(1));
    }
}
