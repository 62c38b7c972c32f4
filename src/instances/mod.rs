//! The expander: the single registry of evaluated `count`/`for_each`
//! results. Every enumeration of module or resource instances goes through
//! it. Asking about an address whose expansion has not been registered is
//! an engine bug and panics; it is never a user-facing error.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::addrs::{
    AbsResource, AbsResourceInstance, ConfigResource, InstanceKey, ModuleAddr,
    ModuleInstanceAddr,
};
use crate::lang::RepetitionData;
use crate::values::Value;

/// The evaluated repetition of one module call or resource block.
#[derive(Clone, Debug, PartialEq)]
pub enum Expansion {
    /// No count or for_each: exactly one keyless instance.
    Single,
    Count(usize),
    ForEach(BTreeMap<String, Value>),
    /// A literal key set, registered for state-only resources that have no
    /// configuration to evaluate.
    Keys(Vec<Option<InstanceKey>>),
}

impl Expansion {
    pub fn keys(&self) -> Vec<Option<InstanceKey>> {
        match self {
            Expansion::Single => vec![None],
            Expansion::Count(n) => (0..*n)
                .map(|i| Some(InstanceKey::Int(i as i64)))
                .collect(),
            Expansion::ForEach(map) => map
                .keys()
                .map(|k| Some(InstanceKey::Str(k.clone())))
                .collect(),
            Expansion::Keys(keys) => keys.clone(),
        }
    }

    pub fn repetition(&self, key: &Option<InstanceKey>) -> RepetitionData {
        match (self, key) {
            (Expansion::Count(_), Some(InstanceKey::Int(i))) => RepetitionData::for_count(*i),
            (Expansion::ForEach(map), Some(InstanceKey::Str(k))) => {
                let value = map.get(k).cloned().unwrap_or(Value::Null);
                RepetitionData::for_each(k.clone(), value)
            }
            _ => RepetitionData::none(),
        }
    }
}

#[derive(Default)]
struct ExpanderData {
    modules: HashMap<(ModuleInstanceAddr, String), Expansion>,
    resources: HashMap<AbsResource, Expansion>,
}

/// Concurrent registry; registration of disjoint addresses from parallel
/// nodes is safe, double registration panics.
#[derive(Default)]
pub struct Expander {
    data: Mutex<ExpanderData>,
}

impl Expander {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_module_expansion(
        &self,
        parent: &ModuleInstanceAddr,
        call_name: &str,
        expansion: Expansion,
    ) {
        let mut data = self.data.lock().unwrap();
        let key = (parent.clone(), call_name.to_string());
        if data.modules.insert(key, expansion).is_some() {
            panic!(
                "module expansion registered twice for {}.module.{}",
                parent, call_name
            );
        }
    }

    pub fn set_resource_expansion(&self, addr: &AbsResource, expansion: Expansion) {
        let mut data = self.data.lock().unwrap();
        if data.resources.insert(addr.clone(), expansion).is_some() {
            panic!("resource expansion registered twice for {}", addr);
        }
    }

    /// All instances of a static module path. Expands level by level, so
    /// every enclosing call must have registered first.
    pub fn expand_module(&self, addr: &ModuleAddr) -> Vec<ModuleInstanceAddr> {
        let data = self.data.lock().unwrap();
        let mut current = vec![ModuleInstanceAddr::root()];
        for step in &addr.0 {
            let mut next = Vec::new();
            for parent in &current {
                let key = (parent.clone(), step.clone());
                let expansion = data.modules.get(&key).unwrap_or_else(|| {
                    panic!(
                        "module expansion not yet registered for {}.module.{}",
                        parent, step
                    )
                });
                for instance_key in expansion.keys() {
                    next.push(parent.child(step, instance_key));
                }
            }
            current = next;
        }
        current
    }

    /// Whether every enclosing module call on the path has registered.
    pub fn module_expansion_known(&self, addr: &ModuleAddr) -> bool {
        let data = self.data.lock().unwrap();
        let mut current = vec![ModuleInstanceAddr::root()];
        for step in &addr.0 {
            let mut next = Vec::new();
            for parent in &current {
                let key = (parent.clone(), step.clone());
                match data.modules.get(&key) {
                    Some(expansion) => {
                        for instance_key in expansion.keys() {
                            next.push(parent.child(step, instance_key));
                        }
                    }
                    None => return false,
                }
            }
            current = next;
        }
        true
    }

    pub fn resource_expansion(&self, addr: &AbsResource) -> Option<Expansion> {
        self.data.lock().unwrap().resources.get(addr).cloned()
    }

    /// All instances of one absolute resource.
    pub fn expand_resource(&self, addr: &AbsResource) -> Vec<AbsResourceInstance> {
        let data = self.data.lock().unwrap();
        let expansion = data.resources.get(addr).unwrap_or_else(|| {
            panic!("resource expansion not yet registered for {}", addr)
        });
        expansion
            .keys()
            .into_iter()
            .map(|key| addr.instance(key))
            .collect()
    }

    /// All instances of a configuration-level resource across all module
    /// instances.
    pub fn expand_config_resource(&self, addr: &ConfigResource) -> Vec<AbsResourceInstance> {
        let mut out = Vec::new();
        for module in self.expand_module(&addr.module) {
            let abs = AbsResource {
                module,
                resource: addr.resource.clone(),
            };
            out.extend(self.expand_resource(&abs));
        }
        out
    }

    /// Repetition symbols for one instance, from its resource's expansion.
    pub fn repetition(&self, addr: &AbsResourceInstance) -> RepetitionData {
        let data = self.data.lock().unwrap();
        match data.resources.get(&addr.resource) {
            Some(expansion) => expansion.repetition(&addr.key),
            None => RepetitionData::none(),
        }
    }

    /// Whether the ledger invariant holds for this instance: its containing
    /// resource and every enclosing module have registered expansions. The
    /// key itself may fall outside the desired set (orphan destroys).
    pub fn covers_instance(&self, addr: &AbsResourceInstance) -> bool {
        {
            let data = self.data.lock().unwrap();
            if !data.resources.contains_key(&addr.resource) {
                return false;
            }
        }
        let module_path = addr.resource.module.module();
        self.module_expansion_known(&module_path)
            && self
                .expand_module(&module_path)
                .contains(&addr.resource.module)
    }

    /// Total number of registered module instances, across all paths.
    pub fn module_instance_count(&self) -> usize {
        let data = self.data.lock().unwrap();
        data.modules
            .values()
            .map(|e| e.keys().len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::Resource;

    #[test]
    fn count_expansion_produces_int_keys() {
        let expander = Expander::new();
        let addr = AbsResource::root(Resource::managed("test_thing", "a"));
        expander.set_resource_expansion(&addr, Expansion::Count(3));

        let instances = expander.expand_resource(&addr);
        assert_eq!(instances.len(), 3);
        assert_eq!(instances[1].key, Some(InstanceKey::Int(1)));
        assert_eq!(
            expander.repetition(&instances[2]).count_index,
            Some(2)
        );
    }

    #[test]
    fn for_each_expansion_carries_values() {
        let expander = Expander::new();
        let addr = AbsResource::root(Resource::managed("test_thing", "a"));
        let mut map = BTreeMap::new();
        map.insert("east".to_string(), Value::string("10.0.0.0/16"));
        expander.set_resource_expansion(&addr, Expansion::ForEach(map));

        let instances = expander.expand_resource(&addr);
        assert_eq!(instances.len(), 1);
        let rep = expander.repetition(&instances[0]);
        assert_eq!(rep.each_key.as_deref(), Some("east"));
        assert_eq!(rep.each_value, Some(Value::string("10.0.0.0/16")));
    }

    #[test]
    fn nested_module_expansion() {
        let expander = Expander::new();
        expander.set_module_expansion(&ModuleInstanceAddr::root(), "a", Expansion::Count(2));
        for parent in expander.expand_module(&ModuleAddr(vec!["a".into()])) {
            expander.set_module_expansion(&parent, "b", Expansion::Single);
        }

        let leaves = expander.expand_module(&ModuleAddr(vec!["a".into(), "b".into()]));
        assert_eq!(leaves.len(), 2);
        assert_eq!(
            leaves[0].to_string(),
            "module.a[0].module.b"
        );
    }

    #[test]
    fn covers_instance_checks_both_levels() {
        let expander = Expander::new();
        expander.set_module_expansion(&ModuleInstanceAddr::root(), "m", Expansion::Count(1));
        let module = ModuleInstanceAddr::root().child("m", Some(InstanceKey::Int(0)));
        let abs = AbsResource {
            module,
            resource: Resource::managed("test_thing", "a"),
        };
        expander.set_resource_expansion(&abs, Expansion::Count(2));

        assert!(expander.covers_instance(&abs.instance(Some(InstanceKey::Int(1)))));
        // Orphan keys outside the desired set are still covered by the
        // resource's registration.
        assert!(expander.covers_instance(&abs.instance(Some(InstanceKey::Int(5)))));

        let other_module = ModuleInstanceAddr::root().child("m", Some(InstanceKey::Int(9)));
        let stray = AbsResource {
            module: other_module,
            resource: Resource::managed("test_thing", "a"),
        };
        assert!(!expander.covers_instance(&stray.instance(None)));
    }

    #[test]
    #[should_panic(expected = "not yet registered")]
    fn unregistered_expansion_panics() {
        let expander = Expander::new();
        let addr = AbsResource::root(Resource::managed("test_thing", "a"));
        expander.expand_resource(&addr);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn double_registration_panics() {
        let expander = Expander::new();
        let addr = AbsResource::root(Resource::managed("test_thing", "a"));
        expander.set_resource_expansion(&addr, Expansion::Count(1));
        expander.set_resource_expansion(&addr, Expansion::Count(1));
    }
}
