use std::sync::Arc;

use crate::context::{EntryReadings, InvocationContext, Outcome};
use crate::error::StageFault;
use crate::stage::{Stage, Verdict};
use crate::window::now_epoch_secs;

/// Records admission-time readings on entry and settles the books on exit.
///
/// On entry it bumps in-flight and the per-second attempt counters on the
/// resource, origin, and global nodes, and stores the post-increment values
/// in the context so the checking stages that follow can compare them against
/// thresholds exactly. On exit it rebalances in-flight and, for admitted
/// calls, records outcome and response time. Pass and block totals are
/// counted by the pipeline at the moment of admission or rejection.
#[derive(Debug, Default)]
pub struct StatisticStage;

impl StatisticStage {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for StatisticStage {
    fn name(&self) -> &'static str {
        "statistic"
    }

    fn on_entry(&self, ctx: &mut InvocationContext) -> Result<Verdict, StageFault> {
        let node = ctx
            .node()
            .map(Arc::clone)
            .ok_or_else(|| StageFault::new("statistic stage ran before node selection"))?;
        let origin_node = ctx.origin_node().map(Arc::clone);
        let global_node = ctx
            .global_node()
            .map(Arc::clone)
            .ok_or_else(|| StageFault::new("statistic stage ran before node selection"))?;

        let now = now_epoch_secs();
        let resource = node.stats().record_attempt(now);
        let origin = origin_node.map(|n| n.record_attempt(now));
        let global_in_flight = global_node.record_attempt(now).in_flight;
        ctx.set_readings(EntryReadings { resource, origin, global_in_flight });
        Ok(Verdict::Proceed)
    }

    fn on_exit(&self, ctx: &InvocationContext) {
        let Some(node) = ctx.node() else { return };
        let now = now_epoch_secs();
        if ctx.admitted() {
            let erred = ctx.outcome() == Outcome::Error;
            let rt_ms = ctx.elapsed_ms();
            node.stats().record_exit_done(now, erred, rt_ms);
            if let Some(origin) = ctx.origin_node() {
                origin.record_exit_done(now, erred, rt_ms);
            }
            if let Some(global) = ctx.global_node() {
                global.record_exit_done(now, erred, rt_ms);
            }
        } else {
            node.stats().record_exit_rejected();
            if let Some(origin) = ctx.origin_node() {
                origin.record_exit_rejected();
            }
            if let Some(global) = ctx.global_node() {
                global.record_exit_rejected();
            }
        }
    }
}
