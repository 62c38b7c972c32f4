//! An in-process test double for the provider contract. The default
//! behaviour echoes: plans return the proposed value, applies return the
//! planned value with unknowns resolved, reads return the prior state.
//! Every operation is recorded so tests can assert on call patterns and
//! observed concurrency.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{
    ApplyChangeRequest, ApplyChangeResponse, ImportedResource, PlanChangeRequest,
    PlanChangeResponse, Provider, ReadResponse,
};
use crate::error::{Diagnostic, Diagnostics};
use crate::schema::{
    AttributeSchema, BlockSchema, ProviderSchema, ResourceTypeSchema,
};
use crate::values::{Value, ValuePath};

type ReadFn = Box<dyn Fn(&str, &Value) -> Option<Option<Value>> + Send + Sync>;
type PlanFn = Box<dyn Fn(&str, &Value, &Value) -> Option<Value> + Send + Sync>;
type ApplyFn = Box<dyn Fn(&str, &Value, &Value) -> Option<Value> + Send + Sync>;
type ImportFn = Box<dyn Fn(&str, &str) -> Result<Vec<ImportedResource>, Diagnostic> + Send + Sync>;
type FunctionFn = Box<dyn Fn(&[Value]) -> Result<Value, Diagnostic> + Send + Sync>;

pub struct MockProvider {
    schema: ProviderSchema,
    configured: AtomicBool,
    stopped: AtomicBool,
    closed: AtomicBool,
    apply_seq: AtomicU64,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    calls: Mutex<Vec<String>>,
    read_fn: Option<ReadFn>,
    plan_fn: Option<PlanFn>,
    apply_fn: Option<ApplyFn>,
    import_fn: Option<ImportFn>,
    functions: BTreeMap<String, FunctionFn>,
    requires_replace: Vec<ValuePath>,
    plan_error: Mutex<Option<String>>,
}

impl MockProvider {
    pub fn new(schema: ProviderSchema) -> Self {
        Self {
            schema,
            configured: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            apply_seq: AtomicU64::new(0),
            concurrent: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            read_fn: None,
            plan_fn: None,
            apply_fn: None,
            import_fn: None,
            functions: BTreeMap::new(),
            requires_replace: Vec::new(),
            plan_error: Mutex::new(None),
        }
    }

    /// A provider with one managed type and one data source, both carrying
    /// an optional `num`, a computed `id`, and a free-form `attr`.
    pub fn with_simple_schema(type_name: &str) -> Self {
        let block = BlockSchema::with_attributes(&[
            ("num", AttributeSchema::optional()),
            ("attr", AttributeSchema::optional()),
            ("id", AttributeSchema::computed()),
        ]);
        let mut resource_types = BTreeMap::new();
        resource_types.insert(
            type_name.to_string(),
            ResourceTypeSchema {
                version: 0,
                block: block.clone(),
            },
        );
        let mut data_sources = BTreeMap::new();
        data_sources.insert(
            format!("{}_source", type_name),
            ResourceTypeSchema { version: 0, block },
        );
        Self::new(ProviderSchema {
            resource_types,
            data_sources,
            ..ProviderSchema::default()
        })
    }

    pub fn with_read_fn(
        mut self,
        f: impl Fn(&str, &Value) -> Option<Option<Value>> + Send + Sync + 'static,
    ) -> Self {
        self.read_fn = Some(Box::new(f));
        self
    }

    pub fn with_plan_fn(
        mut self,
        f: impl Fn(&str, &Value, &Value) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.plan_fn = Some(Box::new(f));
        self
    }

    pub fn with_apply_fn(
        mut self,
        f: impl Fn(&str, &Value, &Value) -> Option<Value> + Send + Sync + 'static,
    ) -> Self {
        self.apply_fn = Some(Box::new(f));
        self
    }

    pub fn with_import_fn(
        mut self,
        f: impl Fn(&str, &str) -> Result<Vec<ImportedResource>, Diagnostic>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.import_fn = Some(Box::new(f));
        self
    }

    pub fn with_function(
        mut self,
        name: &str,
        f: impl Fn(&[Value]) -> Result<Value, Diagnostic> + Send + Sync + 'static,
    ) -> Self {
        self.functions.insert(name.to_string(), Box::new(f));
        self
    }

    pub fn with_requires_replace(mut self, paths: Vec<ValuePath>) -> Self {
        self.requires_replace = paths;
        self
    }

    /// Make every subsequent plan call fail with the given message.
    pub fn fail_plans_with(&self, message: &str) {
        *self.plan_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(op))
            .count()
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The highest number of data operations observed in flight at once.
    pub fn max_observed_concurrency(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn enter(&self) -> ConcurrencyGuard<'_> {
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        ConcurrencyGuard { provider: self }
    }

    fn not_configured(&self) -> Option<Diagnostic> {
        if self.configured.load(Ordering::SeqCst) {
            None
        } else {
            Some(Diagnostic::error(
                "Provider not configured",
                "a data operation was attempted before ConfigureProvider",
            ))
        }
    }

    /// Resolve unknowns in an applied value: the computed id becomes a
    /// generated identifier, anything else collapses to null.
    fn resolve_unknowns(&self, type_name: &str, value: &Value) -> Value {
        match value {
            Value::Unknown => Value::Null,
            Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| {
                        let resolved = if k == "id" && v.is_unknown() {
                            let n = self.apply_seq.fetch_add(1, Ordering::SeqCst);
                            Value::String(format!("{}-{}", type_name, n))
                        } else {
                            self.resolve_unknowns(type_name, v)
                        };
                        (k.clone(), resolved)
                    })
                    .collect(),
            ),
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(|v| self.resolve_unknowns(type_name, v))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

struct ConcurrencyGuard<'a> {
    provider: &'a MockProvider,
}

impl Drop for ConcurrencyGuard<'_> {
    fn drop(&mut self) {
        self.provider.concurrent.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Provider for MockProvider {
    fn schema(&self) -> ProviderSchema {
        self.record("schema".to_string());
        self.schema.clone()
    }

    fn validate_provider_config(&self, _config: &Value) -> Diagnostics {
        self.record("validate_provider_config".to_string());
        Diagnostics::new()
    }

    fn validate_resource_config(&self, type_name: &str, _config: &Value) -> Diagnostics {
        self.record(format!("validate_resource_config {}", type_name));
        Diagnostics::new()
    }

    fn validate_data_resource_config(&self, type_name: &str, _config: &Value) -> Diagnostics {
        self.record(format!("validate_data_resource_config {}", type_name));
        Diagnostics::new()
    }

    fn configure(&self, _config: &Value) -> Diagnostics {
        self.record("configure".to_string());
        self.configured.store(true, Ordering::SeqCst);
        Diagnostics::new()
    }

    fn upgrade_resource_state(
        &self,
        type_name: &str,
        _from_version: i64,
        raw: &Value,
    ) -> Result<Value, Diagnostic> {
        self.record(format!("upgrade {}", type_name));
        Ok(raw.clone())
    }

    fn move_resource_state(
        &self,
        from_type: &str,
        from_state: &Value,
        to_type: &str,
    ) -> Result<(Value, Vec<u8>), Diagnostic> {
        self.record(format!("move {} -> {}", from_type, to_type));
        Ok((from_state.clone(), Vec::new()))
    }

    fn read_resource(&self, type_name: &str, prior: &Value, private: &[u8]) -> ReadResponse {
        let _guard = self.enter();
        self.record(format!("read {}", type_name));
        if let Some(diag) = self.not_configured() {
            return ReadResponse {
                new_state: Some(prior.clone()),
                private: private.to_vec(),
                diagnostics: diag.into(),
            };
        }
        let new_state = match &self.read_fn {
            Some(f) => match f(type_name, prior) {
                Some(replaced) => replaced,
                None => Some(prior.clone()),
            },
            None => Some(prior.clone()),
        };
        ReadResponse {
            new_state,
            private: private.to_vec(),
            diagnostics: Diagnostics::new(),
        }
    }

    fn plan_resource_change(&self, req: PlanChangeRequest<'_>) -> PlanChangeResponse {
        let _guard = self.enter();
        self.record(format!("plan {}", req.type_name));
        if let Some(message) = self.plan_error.lock().unwrap().clone() {
            return PlanChangeResponse {
                planned: req.proposed.clone(),
                requires_replace: Vec::new(),
                private: req.private.to_vec(),
                diagnostics: Diagnostic::error("Provider planning failed", message).into(),
            };
        }
        if let Some(diag) = self.not_configured() {
            return PlanChangeResponse {
                planned: req.proposed.clone(),
                requires_replace: Vec::new(),
                private: req.private.to_vec(),
                diagnostics: diag.into(),
            };
        }
        let planned = match &self.plan_fn {
            Some(f) => f(req.type_name, req.prior, req.proposed)
                .unwrap_or_else(|| req.proposed.clone()),
            None => req.proposed.clone(),
        };
        let requires_replace = if req.prior.is_null() {
            Vec::new()
        } else {
            self.requires_replace.clone()
        };
        PlanChangeResponse {
            planned,
            requires_replace,
            private: req.private.to_vec(),
            diagnostics: Diagnostics::new(),
        }
    }

    fn apply_resource_change(&self, req: ApplyChangeRequest<'_>) -> ApplyChangeResponse {
        let _guard = self.enter();
        // The prior id makes destroy ordering observable in the call log.
        let prior_id = req
            .prior
            .traverse(&ValuePath::attr("id"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        match (&prior_id, req.planned.is_null()) {
            (Some(id), true) => self.record(format!("apply {} destroy {}", req.type_name, id)),
            (Some(id), false) => self.record(format!("apply {} update {}", req.type_name, id)),
            (None, _) => self.record(format!("apply {}", req.type_name)),
        }
        if let Some(diag) = self.not_configured() {
            return ApplyChangeResponse {
                new_state: req.planned.clone(),
                private: req.private.to_vec(),
                diagnostics: diag.into(),
            };
        }
        let new_state = match &self.apply_fn {
            Some(f) => f(req.type_name, req.prior, req.planned)
                .unwrap_or_else(|| self.resolve_unknowns(req.type_name, req.planned)),
            None => self.resolve_unknowns(req.type_name, req.planned),
        };
        ApplyChangeResponse {
            new_state,
            private: req.private.to_vec(),
            diagnostics: Diagnostics::new(),
        }
    }

    fn import_resource_state(
        &self,
        type_name: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, Diagnostic> {
        self.record(format!("import {} {}", type_name, id));
        if let Some(diag) = self.not_configured() {
            return Err(diag);
        }
        match &self.import_fn {
            Some(f) => f(type_name, id),
            None => Ok(vec![ImportedResource {
                type_name: type_name.to_string(),
                state: Value::Object(
                    [("id".to_string(), Value::String(id.to_string()))]
                        .into_iter()
                        .collect(),
                ),
                private: Vec::new(),
            }]),
        }
    }

    fn read_data_source(&self, type_name: &str, config: &Value) -> Result<Value, Diagnostic> {
        let _guard = self.enter();
        self.record(format!("read_data {}", type_name));
        if let Some(diag) = self.not_configured() {
            return Err(diag);
        }
        // Echo the configuration with a synthetic id attached.
        let mut fields = match config {
            Value::Object(fields) => fields.clone(),
            _ => BTreeMap::new(),
        };
        fields
            .entry("id".to_string())
            .or_insert_with(|| Value::String(format!("{}-data", type_name)));
        Ok(Value::Object(fields))
    }

    fn call_function(&self, name: &str, args: &[Value]) -> Result<Value, Diagnostic> {
        self.record(format!("call_function {}", name));
        match self.functions.get(name) {
            Some(f) => f(args),
            None => Err(Diagnostic::error(
                "Unknown provider function",
                format!("no function named {:?}", name),
            )),
        }
    }

    fn stop(&self) {
        self.record("stop".to_string());
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.record("close".to_string());
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_calls_before_configure_fail() {
        let provider = MockProvider::with_simple_schema("test_thing");
        let resp = provider.read_resource("test_thing", &Value::empty_object(), &[]);
        assert!(resp.diagnostics.has_errors());

        provider.configure(&Value::empty_object());
        let resp = provider.read_resource("test_thing", &Value::empty_object(), &[]);
        assert!(!resp.diagnostics.has_errors());
    }

    #[test]
    fn echo_plan_and_apply() {
        let provider = MockProvider::with_simple_schema("test_thing");
        provider.configure(&Value::empty_object());

        let proposed = Value::Object(
            [
                ("num".to_string(), Value::int(1)),
                ("id".to_string(), Value::Unknown),
            ]
            .into_iter()
            .collect(),
        );
        let plan = provider.plan_resource_change(PlanChangeRequest {
            type_name: "test_thing",
            prior: &Value::Null,
            config: &proposed,
            proposed: &proposed,
            private: &[],
        });
        assert_eq!(plan.planned, proposed);

        let apply = provider.apply_resource_change(ApplyChangeRequest {
            type_name: "test_thing",
            prior: &Value::Null,
            planned: &plan.planned,
            config: &proposed,
            private: &[],
        });
        assert!(!apply.new_state.contains_unknown());
        match apply.new_state {
            Value::Object(fields) => {
                assert!(fields["id"].as_str().unwrap().starts_with("test_thing-"));
            }
            other => panic!("unexpected state {:?}", other),
        }
    }

    #[test]
    fn records_calls_and_stop() {
        let provider = MockProvider::with_simple_schema("test_thing");
        provider.configure(&Value::empty_object());
        provider.stop();
        assert!(provider.was_stopped());
        assert_eq!(provider.call_count("configure"), 1);
    }
}
