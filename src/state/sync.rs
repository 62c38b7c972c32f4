//! The synchronized wrapper around the working state. Point mutations go
//! through atomic helpers; read-modify-write sequences take the lock
//! explicitly. Nodes must never hold the guard across a provider call.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{CheckResults, InstanceState, ObjectState, ResourceState, State};
use crate::addrs::{AbsResource, AbsResourceInstance, DeposedKey, ProviderConfigAddr};

#[derive(Clone)]
pub struct SyncState {
    inner: Arc<Mutex<State>>,
}

impl SyncState {
    pub fn new(state: State) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Exclusive access for a read-modify-write sequence.
    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap()
    }

    pub fn snapshot(&self) -> State {
        self.lock().clone()
    }

    pub fn resource(&self, addr: &AbsResource) -> Option<ResourceState> {
        self.lock().resource(addr).cloned()
    }

    pub fn resource_instance(&self, addr: &AbsResourceInstance) -> Option<InstanceState> {
        self.lock().resource_instance(addr).cloned()
    }

    pub fn current_object(&self, addr: &AbsResourceInstance) -> Option<ObjectState> {
        self.lock().current_object(addr).cloned()
    }

    pub fn set_resource_instance_current(
        &self,
        addr: &AbsResourceInstance,
        object: Option<ObjectState>,
        provider: &ProviderConfigAddr,
    ) {
        self.lock().set_instance_current(addr, object, provider);
    }

    pub fn set_resource_instance_deposed(
        &self,
        addr: &AbsResourceInstance,
        key: &DeposedKey,
        object: Option<ObjectState>,
        provider: &ProviderConfigAddr,
    ) {
        self.lock().set_instance_deposed(addr, key, object, provider);
    }

    pub fn remove_resource_instance_object(
        &self,
        addr: &AbsResourceInstance,
        deposed: Option<&DeposedKey>,
        provider: &ProviderConfigAddr,
    ) {
        let mut state = self.lock();
        match deposed {
            Some(key) => state.set_instance_deposed(addr, key, None, provider),
            None => state.set_instance_current(addr, None, provider),
        }
    }

    pub fn depose_current(&self, addr: &AbsResourceInstance) -> Option<DeposedKey> {
        self.lock().depose_current(addr)
    }

    /// Finalize: attach check results, prune husks, and return the
    /// immutable snapshot.
    pub fn close(&self, checks: CheckResults) -> State {
        let mut state = self.snapshot();
        // Walk-collected results take precedence; anything the walk never
        // reached keeps its carried-over outcome.
        let mut merged = checks;
        merged.merge_from(&state.check_results);
        state.check_results = merged;
        state.prune();
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::Resource;
    use crate::values::Value;

    #[test]
    fn atomic_helpers_and_close() {
        let sync = SyncState::new(State::new());
        let provider = ProviderConfigAddr::default_for("test");
        let addr = AbsResource::root(Resource::managed("test_thing", "a")).instance(None);

        sync.set_resource_instance_current(
            &addr,
            Some(ObjectState::new(Value::int(1))),
            &provider,
        );
        assert!(sync.current_object(&addr).is_some());

        sync.remove_resource_instance_object(&addr, None, &provider);
        let closed = sync.close(CheckResults::new());
        assert!(closed.resources.is_empty());
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let sync = SyncState::new(State::new());
        let provider = ProviderConfigAddr::default_for("test");

        let mut handles = Vec::new();
        for i in 0..8 {
            let sync = sync.clone();
            let provider = provider.clone();
            handles.push(std::thread::spawn(move || {
                let addr = AbsResource::root(Resource::managed("test_thing", "a"))
                    .instance(Some(crate::addrs::InstanceKey::Int(i)));
                sync.set_resource_instance_current(
                    &addr,
                    Some(ObjectState::new(Value::int(i))),
                    &provider,
                );
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(sync.snapshot().all_resource_instances().len(), 8);
    }
}
