//! The provider library: factories keyed by provider address, plus memoized
//! schema retrieval. Schema fetches are single-flight per address: however
//! many nodes ask concurrently, one throwaway instance is spun up, its
//! schema validated and cached, and everyone observes the same outcome,
//! including failures.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};

use tracing::debug;

use super::{Provider, Provisioner};
use crate::addrs::{ProviderAddr, ResourceMode};
use crate::error::Diagnostic;
use crate::schema::{BlockSchema, ProviderSchema};

pub type ProviderFactory = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Provider>> + Send + Sync>;
pub type ProvisionerFactory =
    Arc<dyn Fn() -> anyhow::Result<Arc<dyn Provisioner>> + Send + Sync>;

#[derive(Clone)]
enum SchemaSlot<T> {
    InFlight,
    Ready(Result<Arc<T>, String>),
}

struct SchemaCache<K, T> {
    slots: Mutex<HashMap<K, SchemaSlot<T>>>,
    ready: Condvar,
}

impl<K: std::hash::Hash + Eq + Clone, T> SchemaCache<K, T> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ready: Condvar::new(),
        }
    }

    /// Fetch-or-compute with single-flight semantics. The computation runs
    /// outside the lock; concurrent callers for the same key block until
    /// the first caller publishes its result.
    fn get_or_compute(
        &self,
        key: &K,
        compute: impl FnOnce() -> Result<T, String>,
    ) -> Result<Arc<T>, String> {
        {
            let mut slots = self.slots.lock().unwrap();
            loop {
                match slots.get(key) {
                    None => {
                        slots.insert(key.clone(), SchemaSlot::InFlight);
                        break;
                    }
                    Some(SchemaSlot::InFlight) => {
                        slots = self.ready.wait(slots).unwrap();
                    }
                    Some(SchemaSlot::Ready(result)) => return result.clone(),
                }
            }
        }

        let result = compute().map(Arc::new);

        let mut slots = self.slots.lock().unwrap();
        slots.insert(key.clone(), SchemaSlot::Ready(result.clone()));
        self.ready.notify_all();
        result
    }
}

/// Maps provider and provisioner names to their factories and memoizes
/// schemas. One library instance serves a whole plan or apply run.
pub struct ProviderLibrary {
    providers: HashMap<ProviderAddr, ProviderFactory>,
    provisioners: HashMap<String, ProvisionerFactory>,
    provider_schemas: SchemaCache<ProviderAddr, ProviderSchema>,
    provisioner_schemas: SchemaCache<String, BlockSchema>,
}

impl Default for ProviderLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderLibrary {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            provisioners: HashMap::new(),
            provider_schemas: SchemaCache::new(),
            provisioner_schemas: SchemaCache::new(),
        }
    }

    pub fn add_provider(&mut self, addr: ProviderAddr, factory: ProviderFactory) {
        self.providers.insert(addr, factory);
    }

    pub fn add_provisioner(&mut self, name: &str, factory: ProvisionerFactory) {
        self.provisioners.insert(name.to_string(), factory);
    }

    pub fn has_provider(&self, addr: &ProviderAddr) -> bool {
        self.providers.contains_key(addr)
    }

    pub fn has_provisioner(&self, name: &str) -> bool {
        self.provisioners.contains_key(name)
    }

    pub fn new_provider_instance(
        &self,
        addr: &ProviderAddr,
    ) -> Result<Arc<dyn Provider>, Diagnostic> {
        let factory = self.providers.get(addr).ok_or_else(|| {
            Diagnostic::error(
                "Missing provider",
                format!("no provider factory registered for {}", addr),
            )
            .with_address(addr)
        })?;
        factory().map_err(|e| {
            Diagnostic::error(
                "Provider startup failed",
                format!("instantiating {}: {:#}", addr, e),
            )
            .with_address(addr)
        })
    }

    pub fn new_provisioner_instance(
        &self,
        name: &str,
    ) -> Result<Arc<dyn Provisioner>, Diagnostic> {
        let factory = self.provisioners.get(name).ok_or_else(|| {
            Diagnostic::error(
                "Missing provisioner",
                format!("no provisioner factory registered for {:?}", name),
            )
        })?;
        factory().map_err(|e| {
            Diagnostic::error(
                "Provisioner startup failed",
                format!("instantiating {:?}: {:#}", name, e),
            )
        })
    }

    /// The memoized schema for one provider. The first caller instantiates
    /// a temporary provider, fetches and internally validates the schema,
    /// and shuts the instance down again.
    pub fn provider_schema(
        &self,
        addr: &ProviderAddr,
    ) -> Result<Arc<ProviderSchema>, Diagnostic> {
        let addr_text = addr.to_string();
        self.provider_schemas
            .get_or_compute(addr, || {
                debug!(provider = %addr_text, "fetching provider schema");
                let instance = self
                    .new_provider_instance(addr)
                    .map_err(|d| d.to_string())?;
                let schema = instance.schema();
                instance.close();
                schema
                    .internal_validate()
                    .map_err(|e| format!("provider {} returned an invalid schema: {}", addr_text, e))?;
                Ok(schema)
            })
            .map_err(|msg| {
                Diagnostic::error("Failed to load provider schema", msg).with_address(addr)
            })
    }

    pub fn provider_config_schema(
        &self,
        addr: &ProviderAddr,
    ) -> Result<BlockSchema, Diagnostic> {
        Ok(self.provider_schema(addr)?.provider_config.clone())
    }

    /// The schema and version of one resource type or data source.
    pub fn resource_type_schema(
        &self,
        addr: &ProviderAddr,
        mode: ResourceMode,
        type_name: &str,
    ) -> Result<(BlockSchema, i64), Diagnostic> {
        let schema = self.provider_schema(addr)?;
        let map = match mode {
            ResourceMode::Managed => &schema.resource_types,
            ResourceMode::Data => &schema.data_sources,
        };
        match map.get(type_name) {
            Some(entry) => Ok((entry.block.clone(), entry.version)),
            None => Err(Diagnostic::error(
                "Unsupported resource type",
                format!("provider {} does not support {:?}", addr, type_name),
            )
            .with_address(addr)),
        }
    }

    /// The memoized schema for one provisioner, with the same single-flight
    /// discipline as provider schemas.
    pub fn provisioner_schema(&self, name: &str) -> Result<Arc<BlockSchema>, Diagnostic> {
        let key = name.to_string();
        self.provisioner_schemas
            .get_or_compute(&key, || {
                let instance = self
                    .new_provisioner_instance(name)
                    .map_err(|d| d.to_string())?;
                let schema = instance.schema();
                instance.close();
                schema
                    .internal_validate()
                    .map_err(|e| format!("provisioner {:?} returned an invalid schema: {}", name, e))?;
                Ok(schema)
            })
            .map_err(|msg| Diagnostic::error("Failed to load provisioner schema", msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::mock::MockProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn library_with_counting_factory() -> (ProviderLibrary, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let mut lib = ProviderLibrary::new();
        lib.add_provider(
            ProviderAddr::new("example", "test"),
            Arc::new(move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
                Ok(Arc::new(MockProvider::with_simple_schema("test_thing")))
            }),
        );
        (lib, count)
    }

    #[test]
    fn schema_is_memoized() {
        let (lib, count) = library_with_counting_factory();
        let addr = ProviderAddr::new("example", "test");
        let first = lib.provider_schema(&addr).unwrap();
        let second = lib.provider_schema(&addr).unwrap();
        assert_eq!(first, second);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_schema_fetch_is_single_flight() {
        let (lib, count) = library_with_counting_factory();
        let lib = Arc::new(lib);
        let addr = ProviderAddr::new("example", "test");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lib = lib.clone();
            let addr = addr.clone();
            handles.push(std::thread::spawn(move || {
                lib.provider_schema(&addr).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn errors_are_cached_without_reinstantiating() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let mut lib = ProviderLibrary::new();
        lib.add_provider(
            ProviderAddr::new("example", "broken"),
            Arc::new(move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("plugin crashed on launch")
            }),
        );
        let addr = ProviderAddr::new("example", "broken");
        let first = lib.provider_schema(&addr).unwrap_err();
        let second = lib.provider_schema(&addr).unwrap_err();
        assert_eq!(first.detail, second.detail);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_provider_is_reported() {
        let lib = ProviderLibrary::new();
        let addr = ProviderAddr::new("example", "absent");
        assert!(!lib.has_provider(&addr));
        let err = lib.new_provider_instance(&addr).unwrap_err();
        assert!(err.summary.contains("Missing provider"));
    }

    #[test]
    fn resource_type_lookup() {
        let (lib, _) = library_with_counting_factory();
        let addr = ProviderAddr::new("example", "test");
        let (block, version) = lib
            .resource_type_schema(&addr, ResourceMode::Managed, "test_thing")
            .unwrap();
        assert!(block.attributes.contains_key("num"));
        assert_eq!(version, 0);
        assert!(lib
            .resource_type_schema(&addr, ResourceMode::Managed, "missing_type")
            .is_err());
    }
}
