//! Shared fixtures for the end-to-end scenarios: an echo provider wired
//! into a library, engines, and prior-state builders.

use std::collections::BTreeMap;
use std::sync::Arc;

use groundwork::addrs::{AbsResource, InstanceKey, ProviderAddr, ProviderConfigAddr, Resource};
use groundwork::providers::mock::MockProvider;
use groundwork::providers::{Provider, ProviderLibrary};
use groundwork::state::ObjectState;
use groundwork::{Engine, State, Value};

/// Opt-in walk tracing: `RUST_LOG=groundwork=trace cargo test -- --nocapture`.
pub fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// One shared mock instance behind the factory, so tests can inspect the
/// full call log regardless of how many times the engine "instantiates"
/// the provider.
pub fn test_provider() -> Arc<MockProvider> {
    Arc::new(MockProvider::with_simple_schema("test_thing"))
}

pub fn library_with(provider: Arc<MockProvider>) -> ProviderLibrary {
    let mut library = ProviderLibrary::new();
    library.add_provider(
        ProviderAddr::implied("test"),
        Arc::new(move || {
            let instance: Arc<dyn Provider> = provider.clone();
            Ok(instance)
        }),
    );
    library
}

pub fn engine_with(provider: Arc<MockProvider>, parallelism: usize) -> Engine {
    init_logging();
    Engine::new(library_with(provider), parallelism).unwrap()
}

pub fn provider_config() -> ProviderConfigAddr {
    ProviderConfigAddr::default_for("test")
}

pub fn object(fields: &[(&str, Value)]) -> ObjectState {
    ObjectState::new(Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    ))
}

/// A prior state with `count` instances of `test_thing.<name>`, each
/// carrying `num = i` and a distinct id.
pub fn counted_state(name: &str, count: usize) -> State {
    let mut state = State::new();
    let resource = AbsResource::root(Resource::managed("test_thing", name));
    for i in 0..count {
        let addr = resource.instance(Some(InstanceKey::Int(i as i64)));
        state.set_instance_current(
            &addr,
            Some(object(&[
                ("num", Value::int(i as i64)),
                ("id", Value::string(format!("{}-{}", name, i))),
            ])),
            &provider_config(),
        );
    }
    state
}

pub fn variables(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
