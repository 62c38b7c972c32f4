//! The validate driver: an eval-mode walk over the configuration with no
//! prior state and no provider data calls, surfacing configuration,
//! reference, and schema problems.

use std::sync::Arc;

use super::Engine;
use crate::config::Config;
use crate::context::{PlanOpts, WalkContext, WalkOperation};
use crate::error::Diagnostics;
use crate::state::{State, SyncState};
use crate::transform::{build_graph, plan_transformers, TransformCtx};

impl Engine {
    pub fn validate(&self, config: &Config) -> Diagnostics {
        let config = Arc::new(config.clone());
        let opts = Arc::new(PlanOpts::default());

        let transform_cx = TransformCtx {
            op: WalkOperation::Validate,
            config: config.clone(),
            state: Arc::new(State::new()),
            changes: None,
            providers: self.providers(),
            opts: opts.clone(),
        };
        let (mut graph, mut diags) = build_graph(&plan_transformers(), &transform_cx);
        if diags.has_errors() {
            return diags;
        }

        let ctx = Arc::new(WalkContext::new(
            WalkOperation::Validate,
            config,
            self.providers(),
            SyncState::new(State::new()),
            Arc::new(State::new()),
            opts,
            self.cancel_token(),
        ));

        diags.extend(self.run_walk(&mut graph, &ctx));
        ctx.close_all_providers();
        diags
    }
}
