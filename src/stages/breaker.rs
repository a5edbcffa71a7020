use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::context::{InvocationContext, Outcome};
use crate::error::{BlockReason, StageFault};
use crate::rules::RuleStore;
use crate::stage::{Stage, Verdict};
use crate::window::now_epoch_millis;

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// Error-ratio circuit breaker.
///
/// Closed: admitted completions are tallied (and forgotten once they age past
/// the rule's window); when enough completed and the error ratio reaches the
/// threshold, the breaker opens and the observing call is rejected. Open:
/// everything is rejected until the cooldown elapses, then exactly one call
/// is admitted as a probe. HalfOpen: the probe's outcome closes the breaker
/// or re-opens it for another cooldown; everyone else waits.
///
/// State is per pipeline, so it survives rule replacement; removing the rule
/// merely disables the checks.
pub struct BreakerStage {
    rules: Arc<RuleStore>,
    state: AtomicU8,
    opened_at_ms: AtomicU64,
    probe_seq: AtomicU64,
    window_started_ms: AtomicU64,
    done: AtomicU64,
    errors: AtomicU64,
}

impl BreakerStage {
    pub fn new(rules: Arc<RuleStore>) -> Self {
        Self {
            rules,
            state: AtomicU8::new(CLOSED),
            opened_at_ms: AtomicU64::new(0),
            probe_seq: AtomicU64::new(0),
            window_started_ms: AtomicU64::new(now_epoch_millis()),
            done: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    fn reset_tally(&self, now_ms: u64) {
        self.done.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.window_started_ms.store(now_ms, Ordering::Relaxed);
    }
}

impl Stage for BreakerStage {
    fn name(&self) -> &'static str {
        "breaker"
    }

    fn on_entry(&self, ctx: &mut InvocationContext) -> Result<Verdict, StageFault> {
        let Some(rule) = self
            .rules
            .breaker_rule(ctx.resource())
            .map_err(|e| StageFault::new(e.to_string()))?
        else {
            return Ok(Verdict::Proceed);
        };
        let cooldown_ms = rule.cooldown.as_millis() as u64;
        let window_ms = rule.window.as_millis() as u64;
        let now_ms = now_epoch_millis();

        match self.state.load(Ordering::Acquire) {
            OPEN => {
                let opened = self.opened_at_ms.load(Ordering::Relaxed);
                let elapsed = now_ms.saturating_sub(opened);
                if elapsed < cooldown_ms {
                    return Ok(Verdict::Block(BlockReason::CircuitOpen {
                        retry_after_ms: cooldown_ms - elapsed,
                    }));
                }
                // Cooldown over: the winner of this race becomes the probe.
                if self
                    .state
                    .compare_exchange(OPEN, HALF_OPEN, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    self.probe_seq.store(ctx.seq(), Ordering::Release);
                    Ok(Verdict::Proceed)
                } else {
                    Ok(Verdict::Block(BlockReason::CircuitOpen { retry_after_ms: cooldown_ms }))
                }
            }
            HALF_OPEN => {
                Ok(Verdict::Block(BlockReason::CircuitOpen { retry_after_ms: cooldown_ms }))
            }
            _ => {
                let started = self.window_started_ms.load(Ordering::Relaxed);
                if now_ms.saturating_sub(started) >= window_ms {
                    // Measurement window aged out; start a fresh tally.
                    if self
                        .window_started_ms
                        .compare_exchange(started, now_ms, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        self.done.store(0, Ordering::Relaxed);
                        self.errors.store(0, Ordering::Relaxed);
                    }
                    return Ok(Verdict::Proceed);
                }
                let done = self.done.load(Ordering::Relaxed);
                let errors = self.errors.load(Ordering::Relaxed);
                if done >= rule.min_requests && errors as f64 / done as f64 >= rule.error_ratio {
                    self.opened_at_ms.store(now_ms, Ordering::Relaxed);
                    let _ = self.state.compare_exchange(
                        CLOSED,
                        OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    return Ok(Verdict::Block(BlockReason::CircuitOpen {
                        retry_after_ms: cooldown_ms,
                    }));
                }
                Ok(Verdict::Proceed)
            }
        }
    }

    fn on_exit(&self, ctx: &InvocationContext) {
        let now_ms = now_epoch_millis();
        if self.state.load(Ordering::Acquire) == HALF_OPEN
            && self.probe_seq.load(Ordering::Acquire) == ctx.seq()
        {
            self.probe_seq.store(0, Ordering::Release);
            match (ctx.admitted(), ctx.outcome()) {
                (true, Outcome::Success) => {
                    self.reset_tally(now_ms);
                    self.state.store(CLOSED, Ordering::Release);
                }
                (true, _) => {
                    self.opened_at_ms.store(now_ms, Ordering::Relaxed);
                    self.state.store(OPEN, Ordering::Release);
                }
                // Probe never ran: inconclusive, keep the old open timestamp
                // so the next entry probes again right away.
                (false, _) => {
                    self.state.store(OPEN, Ordering::Release);
                }
            }
            return;
        }
        if ctx.admitted() {
            self.done.fetch_add(1, Ordering::Relaxed);
            if ctx.outcome() == Outcome::Error {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::BreakerRule;
    use std::thread;
    use std::time::Duration;

    fn stage_with_rule(cooldown: Duration, window: Duration) -> BreakerStage {
        let rules = Arc::new(RuleStore::new());
        let mut rule = BreakerRule::new("orders", 0.5);
        rule.min_requests = 4;
        rule.cooldown = cooldown;
        rule.window = window;
        rules.set_breaker_rules(vec![rule]).unwrap();
        BreakerStage::new(rules)
    }

    fn ctx() -> InvocationContext {
        InvocationContext::new(Arc::from("orders"), None)
    }

    /// Runs one admitted call through the stage with the given outcome.
    fn settle(stage: &BreakerStage, outcome: Outcome) -> bool {
        let mut call = ctx();
        let admitted = matches!(stage.on_entry(&mut call), Ok(Verdict::Proceed));
        if admitted {
            call.admitted = true;
            call.set_outcome(outcome);
            stage.on_exit(&call);
        }
        admitted
    }

    #[test]
    fn stays_closed_below_min_requests() {
        let stage = stage_with_rule(Duration::from_millis(50), Duration::from_secs(10));
        for _ in 0..3 {
            assert!(settle(&stage, Outcome::Error));
        }
        assert!(matches!(stage.on_entry(&mut ctx()), Ok(Verdict::Proceed)));
    }

    #[test]
    fn opens_on_error_ratio_and_rejects() {
        let stage = stage_with_rule(Duration::from_secs(5), Duration::from_secs(10));
        assert!(settle(&stage, Outcome::Error));
        assert!(settle(&stage, Outcome::Error));
        assert!(settle(&stage, Outcome::Error));
        assert!(settle(&stage, Outcome::Success));
        match stage.on_entry(&mut ctx()) {
            Ok(Verdict::Block(BlockReason::CircuitOpen { .. })) => {}
            other => panic!("expected open circuit, got {:?}", other),
        }
        // Still open on the next call.
        assert!(matches!(stage.on_entry(&mut ctx()), Ok(Verdict::Block(_))));
    }

    #[test]
    fn probe_success_closes_probe_failure_reopens() {
        let stage = stage_with_rule(Duration::from_millis(150), Duration::from_secs(10));
        for _ in 0..4 {
            settle(&stage, Outcome::Error);
        }
        assert!(matches!(stage.on_entry(&mut ctx()), Ok(Verdict::Block(_))));

        thread::sleep(Duration::from_millis(200));
        // First caller after cooldown becomes the probe and fails.
        let mut probe = ctx();
        assert!(matches!(stage.on_entry(&mut probe), Ok(Verdict::Proceed)));
        assert!(matches!(stage.on_entry(&mut ctx()), Ok(Verdict::Block(_))));
        probe.admitted = true;
        probe.set_outcome(Outcome::Error);
        stage.on_exit(&probe);
        assert!(matches!(stage.on_entry(&mut ctx()), Ok(Verdict::Block(_))));

        thread::sleep(Duration::from_millis(200));
        // Second probe succeeds and the breaker closes for everyone.
        let mut probe = ctx();
        assert!(matches!(stage.on_entry(&mut probe), Ok(Verdict::Proceed)));
        probe.admitted = true;
        probe.set_outcome(Outcome::Success);
        stage.on_exit(&probe);
        assert!(matches!(stage.on_entry(&mut ctx()), Ok(Verdict::Proceed)));
    }

    #[test]
    fn stale_tallies_age_out_with_the_window() {
        let stage = stage_with_rule(Duration::from_millis(50), Duration::from_secs(1));
        assert!(settle(&stage, Outcome::Error));
        assert!(settle(&stage, Outcome::Error));
        thread::sleep(Duration::from_millis(1100));
        assert!(settle(&stage, Outcome::Error));
        assert!(settle(&stage, Outcome::Error));
        // Four errors total, but never four inside one window.
        assert!(matches!(stage.on_entry(&mut ctx()), Ok(Verdict::Proceed)));
    }

    #[test]
    fn no_rule_is_inert() {
        let stage = BreakerStage::new(Arc::new(RuleStore::new()));
        assert!(matches!(stage.on_entry(&mut ctx()), Ok(Verdict::Proceed)));
    }
}
