//! Recorded outcomes of preconditions, postconditions, and check-block
//! assertions. The expected object set is registered before instances run
//! so anything unreached reports as unknown instead of silently vanishing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckStatus {
    Pass,
    Fail,
    Error,
    /// Registered but never evaluated, e.g. skipped behind a failure.
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// Check outcomes keyed by the display form of the checkable object's
/// address.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckResults {
    pub objects: BTreeMap<String, CheckResult>,
}

impl CheckResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Register an object whose checks are expected to run. Idempotent;
    /// a later report overwrites the unknown placeholder.
    pub fn register_expected(&mut self, addr: impl std::fmt::Display) {
        self.objects
            .entry(addr.to_string())
            .or_insert(CheckResult {
                status: CheckStatus::Unknown,
                messages: Vec::new(),
            });
    }

    pub fn report(
        &mut self,
        addr: impl std::fmt::Display,
        status: CheckStatus,
        messages: Vec<String>,
    ) {
        self.objects
            .insert(addr.to_string(), CheckResult { status, messages });
    }

    pub fn status_of(&self, addr: impl std::fmt::Display) -> Option<CheckStatus> {
        self.objects.get(&addr.to_string()).map(|r| r.status)
    }

    /// Carry results forward, e.g. plan-time outcomes into the applied
    /// state. Existing entries win over carried ones.
    pub fn merge_from(&mut self, other: &CheckResults) {
        for (addr, result) in &other.objects {
            self.objects
                .entry(addr.clone())
                .or_insert_with(|| result.clone());
        }
    }

    pub fn has_failures(&self) -> bool {
        self.objects
            .values()
            .any(|r| matches!(r.status, CheckStatus::Fail | CheckStatus::Error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreached_checks_stay_unknown() {
        let mut results = CheckResults::new();
        results.register_expected("test_thing.a[0]");
        results.register_expected("test_thing.a[1]");
        results.report("test_thing.a[0]", CheckStatus::Pass, vec![]);

        assert_eq!(
            results.status_of("test_thing.a[0]"),
            Some(CheckStatus::Pass)
        );
        assert_eq!(
            results.status_of("test_thing.a[1]"),
            Some(CheckStatus::Unknown)
        );
        assert!(!results.has_failures());
    }

    #[test]
    fn merge_keeps_fresh_results() {
        let mut plan_time = CheckResults::new();
        plan_time.report("output.x", CheckStatus::Fail, vec!["bad".into()]);

        let mut apply_time = CheckResults::new();
        apply_time.report("output.x", CheckStatus::Pass, vec![]);
        apply_time.merge_from(&plan_time);

        assert_eq!(apply_time.status_of("output.x"), Some(CheckStatus::Pass));
        assert!(!apply_time.has_failures());
    }
}
