use std::sync::Arc;

use crate::context::InvocationContext;
use crate::error::{BlockReason, StageFault};
use crate::node::AttemptReadings;
use crate::rules::{FlowRule, RuleStore};
use crate::stage::{Stage, Verdict};

/// Per-resource flow control: concurrency and per-second rate ceilings,
/// checked against the admission-time readings in the order rules were
/// configured. Origin-scoped rules are measured on the origin's own node.
pub struct FlowStage {
    rules: Arc<RuleStore>,
}

impl FlowStage {
    pub fn new(rules: Arc<RuleStore>) -> Self {
        Self { rules }
    }

    fn check(rule: &FlowRule, readings: AttemptReadings) -> Option<BlockReason> {
        if let Some(limit) = rule.max_concurrency {
            if readings.in_flight > limit {
                return Some(BlockReason::ConcurrencyExceeded {
                    in_flight: readings.in_flight,
                    limit,
                });
            }
        }
        if let Some(limit) = rule.max_per_sec {
            if readings.attempts_this_sec > limit {
                return Some(BlockReason::RateExceeded {
                    attempts: readings.attempts_this_sec,
                    limit,
                });
            }
        }
        None
    }
}

impl Stage for FlowStage {
    fn name(&self) -> &'static str {
        "flow"
    }

    fn on_entry(&self, ctx: &mut InvocationContext) -> Result<Verdict, StageFault> {
        let Some(rules) = self
            .rules
            .flow_rules(ctx.resource())
            .map_err(|e| StageFault::new(e.to_string()))?
        else {
            return Ok(Verdict::Proceed);
        };

        let readings = ctx.readings();
        for rule in rules.iter() {
            let scoped = match &rule.origin {
                None => Some(readings.resource),
                Some(origin) => match (ctx.origin(), readings.origin) {
                    (Some(call_origin), Some(origin_readings)) if call_origin == origin => {
                        Some(origin_readings)
                    }
                    _ => None,
                },
            };
            let Some(scoped) = scoped else { continue };
            if let Some(reason) = Self::check(rule, scoped) {
                return Ok(Verdict::Block(reason));
            }
        }
        Ok(Verdict::Proceed)
    }

    fn on_exit(&self, _ctx: &InvocationContext) {}
}
