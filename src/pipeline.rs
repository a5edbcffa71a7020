//! The per-resource admission pipeline.
//!
//! An immutable, ordered stage sequence shared lock-free by every concurrent
//! invocation of one resource. Entry walks the stages front to back and stops
//! at the first block or fault; exit walks exactly the stages whose entry
//! completed, in reverse. The blocking stage itself is not exited: its entry
//! never finished.

use tracing::{debug, error};

use crate::context::{InvocationContext, Outcome};
use crate::error::{Blocked, TurnstileError, TurnstileResult};
use crate::stage::{BoxedStage, Verdict};
use crate::window::now_epoch_secs;

pub struct Pipeline {
    stages: Vec<BoxedStage>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stage_names()).finish()
    }
}

impl Pipeline {
    pub fn new(stages: Vec<BoxedStage>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in traversal order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs the entry side. On admission the context is marked and pass is
    /// counted on its nodes. On a block or fault the already-entered stages
    /// are unwound before the error returns, so the caller never has cleanup
    /// to do for a refused call.
    pub(crate) fn entry(&self, ctx: &mut InvocationContext) -> TurnstileResult<()> {
        for (index, stage) in self.stages.iter().enumerate() {
            match stage.on_entry(ctx) {
                Ok(Verdict::Proceed) => {
                    ctx.entered = index + 1;
                }
                Ok(Verdict::Block(reason)) => {
                    ctx.set_outcome(Outcome::Blocked);
                    let now = now_epoch_secs();
                    if let Some(node) = ctx.node() {
                        node.stats().record_block(now);
                    }
                    if let Some(origin) = ctx.origin_node() {
                        origin.record_block(now);
                    }
                    if let Some(global) = ctx.global_node() {
                        global.record_block(now);
                    }
                    debug!(
                        resource = ctx.resource(),
                        stage = stage.name(),
                        reason = %reason,
                        invocation = %ctx.id(),
                        "invocation blocked"
                    );
                    self.exit(ctx);
                    return Err(TurnstileError::Blocked(Blocked {
                        resource: ctx.resource().to_string(),
                        stage: stage.name(),
                        reason,
                    }));
                }
                Err(fault) => {
                    ctx.set_outcome(Outcome::Error);
                    error!(
                        resource = ctx.resource(),
                        stage = stage.name(),
                        fault = %fault,
                        invocation = %ctx.id(),
                        "stage fault aborted invocation"
                    );
                    self.exit(ctx);
                    return Err(TurnstileError::StageFault { stage: stage.name(), fault });
                }
            }
        }
        ctx.admitted = true;
        let now = now_epoch_secs();
        if let Some(node) = ctx.node() {
            node.stats().record_pass(now);
        }
        if let Some(origin) = ctx.origin_node() {
            origin.record_pass(now);
        }
        if let Some(global) = ctx.global_node() {
            global.record_pass(now);
        }
        Ok(())
    }

    /// Exit side: the entered prefix, back to front, each stage exactly once.
    pub(crate) fn exit(&self, ctx: &InvocationContext) {
        for stage in self.stages[..ctx.entered].iter().rev() {
            stage.on_exit(ctx);
        }
    }
}
