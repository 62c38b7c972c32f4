//! The provider plugin contract. The engine only consumes this interface;
//! real plugins live behind whatever transport the embedder supplies.
//! Providers own their internal concurrency: the engine multiplexes calls
//! through one instance per configuration without serializing them.

mod library;
pub mod mock;

pub use library::{ProviderFactory, ProviderLibrary, ProvisionerFactory};

use crate::error::{Diagnostic, Diagnostics};
use crate::schema::{BlockSchema, ProviderSchema};
use crate::values::{Value, ValuePath};

/// One object materialized by an import; a single import id can yield
/// several related resources.
#[derive(Clone, Debug)]
pub struct ImportedResource {
    pub type_name: String,
    pub state: Value,
    pub private: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct ReadResponse {
    /// None means the remote object no longer exists.
    pub new_state: Option<Value>,
    pub private: Vec<u8>,
    pub diagnostics: Diagnostics,
}

#[derive(Clone, Debug)]
pub struct PlanChangeRequest<'a> {
    pub type_name: &'a str,
    pub prior: &'a Value,
    pub config: &'a Value,
    pub proposed: &'a Value,
    pub private: &'a [u8],
}

#[derive(Clone, Debug)]
pub struct PlanChangeResponse {
    pub planned: Value,
    pub requires_replace: Vec<ValuePath>,
    pub private: Vec<u8>,
    pub diagnostics: Diagnostics,
}

#[derive(Clone, Debug)]
pub struct ApplyChangeRequest<'a> {
    pub type_name: &'a str,
    pub prior: &'a Value,
    pub planned: &'a Value,
    pub config: &'a Value,
    pub private: &'a [u8],
}

#[derive(Clone, Debug)]
pub struct ApplyChangeResponse {
    pub new_state: Value,
    pub private: Vec<u8>,
    pub diagnostics: Diagnostics,
}

impl std::fmt::Debug for dyn Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Provider")
    }
}

pub trait Provider: Send + Sync {
    fn schema(&self) -> ProviderSchema;

    fn validate_provider_config(&self, config: &Value) -> Diagnostics;

    fn validate_resource_config(&self, type_name: &str, config: &Value) -> Diagnostics;

    fn validate_data_resource_config(&self, type_name: &str, config: &Value) -> Diagnostics;

    /// Must be called before any data operation; a conforming provider
    /// fails data calls made earlier with a distinguished error.
    fn configure(&self, config: &Value) -> Diagnostics;

    fn upgrade_resource_state(
        &self,
        type_name: &str,
        from_version: i64,
        raw: &Value,
    ) -> Result<Value, Diagnostic>;

    fn move_resource_state(
        &self,
        from_type: &str,
        from_state: &Value,
        to_type: &str,
    ) -> Result<(Value, Vec<u8>), Diagnostic>;

    fn read_resource(&self, type_name: &str, prior: &Value, private: &[u8]) -> ReadResponse;

    fn plan_resource_change(&self, req: PlanChangeRequest<'_>) -> PlanChangeResponse;

    fn apply_resource_change(&self, req: ApplyChangeRequest<'_>) -> ApplyChangeResponse;

    fn import_resource_state(
        &self,
        type_name: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, Diagnostic>;

    fn read_data_source(&self, type_name: &str, config: &Value) -> Result<Value, Diagnostic>;

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, Diagnostic>;

    /// Non-blocking cancel request; may race with any in-flight call.
    fn stop(&self);

    fn close(&self);
}

/// Provisioners run scripts against newly-created objects; the engine only
/// needs their schema and invocation surface.
pub trait Provisioner: Send + Sync {
    fn schema(&self) -> BlockSchema;

    fn provision(&self, config: &Value) -> Diagnostics;

    fn stop(&self);

    fn close(&self);
}
