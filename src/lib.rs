//! groundwork: the core execution engine of a declarative infrastructure
//! runtime. Given a parsed configuration tree, a prior state snapshot, and
//! a library of provider plugins, it produces a plan (a set of per-instance
//! actions) and applies it to yield a new state snapshot.
//!
//! The work happens on a dynamically-expanded dependency graph: composable
//! transformers rewrite configuration into a DAG of typed vertices,
//! `count`/`for_each` expansion materializes instances mid-walk, and a
//! bounded-parallel walker executes vertices against provider plugins while
//! accumulating diagnostics, planned changes, and state updates.
//!
//! Out of scope by design: configuration parsing (a compact TOML fixture
//! loader stands in), the plugin transport, state storage, and any command
//! line. See the provider trait in [`providers`] for the plugin contract.

pub mod addrs;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod graph;
pub mod instances;
pub mod lang;
pub mod moves;
pub mod nodes;
pub mod plan;
pub mod providers;
pub mod schema;
pub mod state;
pub mod transform;
pub mod values;

pub use addrs::{
    AbsResource, AbsResourceInstance, InstanceKey, ModuleAddr, ModuleInstanceAddr,
    ProviderAddr, ProviderConfigAddr, Resource, ResourceMode, Target,
};
pub use config::Config;
pub use context::{Hooks, ImportTarget, PlanOpts};
pub use engine::{ApplyOpts, Engine};
pub use error::{Diagnostic, Diagnostics, Severity};
pub use graph::CancelToken;
pub use plan::{Action, Change, Changes, Plan, PlanMode};
pub use providers::{Provider, ProviderLibrary};
pub use state::{ObjectState, State};
pub use values::{Value, ValuePath};
