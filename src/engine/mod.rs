//! The engine drivers: plan, apply, validate, and eval, wrapped around the
//! transformer pipelines and the graph walker.

mod apply;
mod eval;
mod plan;
mod validate;

pub use apply::ApplyOpts;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};

use crate::context::{Hooks, NoopHooks, WalkContext};
use crate::error::Diagnostics;
use crate::graph::{walk, CancelToken, Graph, WalkOpts};
use crate::nodes::Node;
use crate::providers::ProviderLibrary;

pub struct Engine {
    providers: Arc<ProviderLibrary>,
    parallelism: usize,
    hooks: Arc<dyn Hooks>,
    cancel: CancelToken,
}

impl Engine {
    /// A parallelism of zero is degenerate and rejected outright.
    pub fn new(providers: ProviderLibrary, parallelism: usize) -> Result<Self> {
        if parallelism == 0 {
            bail!("parallelism must be a positive integer");
        }
        Ok(Self {
            providers: Arc::new(providers),
            parallelism,
            hooks: Arc::new(NoopHooks),
            cancel: CancelToken::new(),
        })
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn Hooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// The cancellation handle; cancelling stops scheduling new vertices
    /// and asks in-flight providers to stop.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn providers(&self) -> Arc<ProviderLibrary> {
        self.providers.clone()
    }

    pub(crate) fn hooks(&self) -> Arc<dyn Hooks> {
        self.hooks.clone()
    }

    /// Walk a built graph under this engine's concurrency limit, with a
    /// watcher relaying cancellation to the providers.
    pub(crate) fn run_walk(&self, graph: &mut Graph<Node>, ctx: &Arc<WalkContext>) -> Diagnostics {
        let walk_done = Arc::new(AtomicBool::new(false));

        let watcher = {
            let walk_done = walk_done.clone();
            let cancel = self.cancel.clone();
            let ctx = ctx.clone();
            std::thread::spawn(move || {
                while !walk_done.load(Ordering::SeqCst) {
                    if cancel.is_cancelled() {
                        // Stop is advisory and non-blocking; providers race
                        // it against their in-flight calls by design.
                        ctx.stop_all_providers();
                        return;
                    }
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            })
        };

        let exec_ctx = ctx.clone();
        let diags = walk(
            graph,
            &WalkOpts {
                parallelism: self.parallelism,
            },
            &self.cancel,
            move |node: &Node| node.execute(&exec_ctx),
        );

        walk_done.store(true, Ordering::SeqCst);
        let _ = watcher.join();
        diags
    }
}
