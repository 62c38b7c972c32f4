//! The change ledger a plan walk accumulates, and the plan document that
//! wraps it together with everything apply needs to reproduce the run.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::addrs::{AbsResourceInstance, DeposedKey, ResolvedProvider, Target};
use crate::error::Diagnostic;
use crate::state::{CheckResults, State};
use crate::values::{Value, ValuePath};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    NoOp,
    Create,
    Read,
    Update,
    Delete,
    /// Replace: destroy the old object, then create the new one.
    DeleteThenCreate,
    /// Replace with create-before-destroy: the old object is deposed and
    /// reaped after the new one exists.
    CreateThenDelete,
    /// Drop from state without destroying the remote object.
    Forget,
}

impl Action {
    pub fn is_replace(&self) -> bool {
        matches!(self, Action::DeleteThenCreate | Action::CreateThenDelete)
    }

    pub fn is_destroy(&self) -> bool {
        matches!(self, Action::Delete)
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Action::NoOp)
    }
}

/// Why a change carries the action it does, for reporting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionReason {
    #[default]
    None,
    ReplaceRequested,
    ReplaceCannotUpdate,
    ReplaceTriggered,
    DeleteBecauseNoResourceConfig,
    DeleteBecauseWrongRepetition,
    DeleteBecauseNoModule,
    DeleteBecauseDeposed,
    ReadBecauseConfigUnknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Importing {
    pub id: String,
}

/// One entry in the ledger: the action to take against one resource
/// instance object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub addr: AbsResourceInstance,
    /// Where this instance lived before `moved` blocks were applied.
    pub prev_run_addr: AbsResourceInstance,
    pub deposed: Option<DeposedKey>,
    pub action: Action,
    pub before: Value,
    pub after: Value,
    #[serde(default)]
    pub before_sensitive: Vec<ValuePath>,
    #[serde(default)]
    pub after_sensitive: Vec<ValuePath>,
    /// Paths the provider said force replacement.
    #[serde(default)]
    pub required_replace: Vec<ValuePath>,
    pub provider: ResolvedProvider,
    #[serde(default)]
    pub importing: Option<Importing>,
    #[serde(default)]
    pub reason: ActionReason,
    /// Whether the replacement discipline for this instance is
    /// create-before-destroy, carried so apply never consults plan mode.
    #[serde(default)]
    pub create_before_destroy: bool,
}

impl Change {
    pub fn object_id(&self) -> (AbsResourceInstance, Option<DeposedKey>) {
        (self.addr.clone(), self.deposed.clone())
    }
}

/// The accumulated plan changes. Append-only during a walk; apply only
/// reads it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Changes {
    entries: Vec<Change>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Two entries for the same (address, deposed key)
    /// pair indicate an engine bug and are rejected.
    pub fn append(&mut self, change: Change) -> Result<(), Diagnostic> {
        if self.get(&change.addr, change.deposed.as_ref()).is_some() {
            return Err(Diagnostic::internal(format!(
                "duplicate change for {} (deposed {:?})",
                change.addr, change.deposed
            )));
        }
        self.entries.push(change);
        Ok(())
    }

    pub fn get(
        &self,
        addr: &AbsResourceInstance,
        deposed: Option<&DeposedKey>,
    ) -> Option<&Change> {
        self.entries
            .iter()
            .find(|c| c.addr == *addr && c.deposed.as_ref() == deposed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn without_noops(&self) -> Vec<&Change> {
        self.entries.iter().filter(|c| !c.action.is_noop()).collect()
    }

    /// Record pre-move addresses on entries whose instance was moved, so
    /// the plan shows where each object came from.
    pub fn apply_moved_addresses(
        &mut self,
        moved: &std::collections::HashMap<AbsResourceInstance, AbsResourceInstance>,
    ) {
        for entry in &mut self.entries {
            if let Some(old) = moved.get(&entry.addr) {
                entry.prev_run_addr = old.clone();
            }
        }
    }
}

/// Synchronized handle over the ledger for concurrent appends during the
/// walk.
#[derive(Clone, Default)]
pub struct ChangesSync {
    inner: Arc<Mutex<Changes>>,
}

impl ChangesSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, change: Change) -> Result<(), Diagnostic> {
        self.inner.lock().unwrap().append(change)
    }

    pub fn get(
        &self,
        addr: &AbsResourceInstance,
        deposed: Option<&DeposedKey>,
    ) -> Option<Change> {
        self.inner.lock().unwrap().get(addr, deposed).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn snapshot(&self) -> Changes {
        self.inner.lock().unwrap().clone()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanMode {
    #[default]
    Normal,
    Destroy,
    RefreshOnly,
}

/// The plan document: everything needed to inspect the planned run and to
/// apply it later. Serializes losslessly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plan {
    pub mode: PlanMode,
    /// Variable values the caller actually set; ephemerals are omitted.
    pub variables: BTreeMap<String, Value>,
    pub changes: Changes,
    /// Differences between the previous run state and the refreshed state,
    /// for managed resources only.
    pub drift: Vec<Change>,
    pub targets: Vec<Target>,
    pub excludes: Vec<Target>,
    pub forced_replace: Vec<AbsResourceInstance>,
    pub prev_run_state: State,
    pub prior_state: State,
    pub checks: CheckResults,
    /// Resource attributes the configuration actually references, so apply
    /// can scope drift reporting to what matters.
    pub relevant_attributes: Vec<(AbsResourceInstance, ValuePath)>,
    pub timestamp: DateTime<Utc>,
    pub errored: bool,
    pub applyable: bool,
}

impl Plan {
    pub fn serialize_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn deserialize_json(text: &str) -> serde_json::Result<Plan> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{AbsResource, ProviderConfigAddr, Resource};

    fn change(name: &str, key: Option<crate::addrs::InstanceKey>, action: Action) -> Change {
        let addr = AbsResource::root(Resource::managed("test_thing", name)).instance(key);
        Change {
            addr: addr.clone(),
            prev_run_addr: addr,
            deposed: None,
            action,
            before: Value::Null,
            after: Value::Null,
            before_sensitive: Vec::new(),
            after_sensitive: Vec::new(),
            required_replace: Vec::new(),
            provider: ResolvedProvider::new(ProviderConfigAddr::default_for("test")),
            importing: None,
            reason: ActionReason::None,
            create_before_destroy: false,
        }
    }

    #[test]
    fn append_rejects_duplicates() {
        let mut changes = Changes::new();
        changes.append(change("a", None, Action::Create)).unwrap();
        let err = changes.append(change("a", None, Action::Update)).unwrap_err();
        assert!(err.detail.contains("duplicate change"));

        // A deposed entry for the same address is a different object.
        let mut deposed = change("a", None, Action::Delete);
        deposed.deposed = Some(DeposedKey::from_str_unchecked("00000001"));
        changes.append(deposed).unwrap();
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn noop_filtering() {
        let mut changes = Changes::new();
        changes.append(change("a", None, Action::NoOp)).unwrap();
        changes.append(change("b", None, Action::Delete)).unwrap();
        assert_eq!(changes.without_noops().len(), 1);
    }

    #[test]
    fn plan_round_trips_through_json() {
        let mut changes = Changes::new();
        let mut c = change("a", Some(crate::addrs::InstanceKey::Int(0)), Action::Update);
        c.after = Value::Object(
            [("num".to_string(), Value::Unknown)].into_iter().collect(),
        );
        c.importing = Some(Importing { id: "i-1".into() });
        changes.append(c).unwrap();

        let plan = Plan {
            mode: PlanMode::Normal,
            variables: [("key".to_string(), Value::string("a"))].into_iter().collect(),
            changes,
            drift: Vec::new(),
            targets: vec![Target::Resource(AbsResource::root(Resource::managed(
                "test_thing",
                "a",
            )))],
            excludes: Vec::new(),
            forced_replace: Vec::new(),
            prev_run_state: State::new(),
            prior_state: State::new(),
            checks: CheckResults::new(),
            relevant_attributes: Vec::new(),
            timestamp: Utc::now(),
            errored: false,
            applyable: true,
        };

        let text = plan.serialize_json().unwrap();
        let back = Plan::deserialize_json(&text).unwrap();
        assert_eq!(back.changes, plan.changes);
        assert_eq!(back.targets, plan.targets);
        assert_eq!(back.variables, plan.variables);
        assert_eq!(back.timestamp, plan.timestamp);
    }
}
