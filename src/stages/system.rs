use std::sync::Arc;

use crate::context::InvocationContext;
use crate::error::{BlockReason, StageFault};
use crate::rules::RuleStore;
use crate::stage::{Stage, Verdict};

/// Process-wide protection: sheds load once the global in-flight count
/// exceeds the configured ceiling, regardless of which resource is called.
pub struct SystemStage {
    rules: Arc<RuleStore>,
}

impl SystemStage {
    pub fn new(rules: Arc<RuleStore>) -> Self {
        Self { rules }
    }
}

impl Stage for SystemStage {
    fn name(&self) -> &'static str {
        "system"
    }

    fn on_entry(&self, ctx: &mut InvocationContext) -> Result<Verdict, StageFault> {
        let Some(rule) = self
            .rules
            .system_rule()
            .map_err(|e| StageFault::new(e.to_string()))?
        else {
            return Ok(Verdict::Proceed);
        };
        if let Some(limit) = rule.max_concurrency {
            let in_flight = ctx.readings().global_in_flight;
            if in_flight > limit {
                return Ok(Verdict::Block(BlockReason::SystemOverload { in_flight, limit }));
            }
        }
        Ok(Verdict::Proceed)
    }

    fn on_exit(&self, _ctx: &InvocationContext) {}
}
