use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use turnstile::rules::{AuthorityRule, BreakerRule, FlowRule, RuleSet, SystemRule};
use turnstile::{BlockReason, Engine};

fn install(engine: &Engine, set: RuleSet) {
    engine.rules().apply(set).unwrap();
}

/// Blocks until the current epoch second is at most 200ms old, so a burst of
/// quick attempts lands inside a single counting second.
fn wait_for_fresh_second() {
    loop {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_millis();
        if millis < 200 {
            return;
        }
        thread::sleep(Duration::from_millis(u64::from(1000 - millis)));
    }
}

#[test]
fn concurrency_limit_is_exact_under_contention() {
    let engine = Engine::new();
    install(
        &engine,
        RuleSet { flow: vec![FlowRule::concurrency("checkout", 10)], ..RuleSet::default() },
    );

    let all_attempted = Arc::new(Barrier::new(15));
    let mut workers = Vec::new();
    for _ in 0..15 {
        let engine = engine.clone();
        let all_attempted = Arc::clone(&all_attempted);
        workers.push(thread::spawn(move || {
            let entry = engine.try_enter("checkout");
            let admitted = entry.is_ok();
            // Hold every admitted guard until all 15 threads have attempted.
            all_attempted.wait();
            admitted
        }));
    }

    let admitted = workers
        .into_iter()
        .map(|worker| worker.join().unwrap())
        .filter(|admitted| *admitted)
        .count();
    assert_eq!(admitted, 10);

    let stats = engine.nodes().get("checkout").unwrap();
    assert_eq!(stats.stats().pass(), 10);
    assert_eq!(stats.stats().block(), 5);
    assert_eq!(stats.stats().total(), 15);
    assert_eq!(stats.stats().in_flight(), 0);
}

#[test]
fn per_second_rate_limit_is_exact() {
    let engine = Engine::new();
    install(
        &engine,
        RuleSet { flow: vec![FlowRule::per_sec("search", 10)], ..RuleSet::default() },
    );

    wait_for_fresh_second();
    let mut admitted = 0;
    let mut rate_blocks = 0;
    for _ in 0..15 {
        match engine.try_enter("search") {
            Ok(entry) => {
                admitted += 1;
                entry.complete();
            }
            Err(e) => {
                let blocked = e.blocked().unwrap();
                assert!(matches!(blocked.reason, BlockReason::RateExceeded { .. }));
                rate_blocks += 1;
            }
        }
    }

    assert_eq!(admitted, 10);
    assert_eq!(rate_blocks, 5);
}

#[test]
fn origin_scoped_rules_only_limit_that_origin() {
    let engine = Engine::new();
    install(
        &engine,
        RuleSet {
            flow: vec![FlowRule::concurrency("reports", 1).for_origin("batch")],
            ..RuleSet::default()
        },
    );

    let held = engine.try_enter_with_origin("reports", Some("batch")).unwrap();

    let second_batch = engine.try_enter_with_origin("reports", Some("batch"));
    assert!(second_batch.is_err());

    let gateway = engine.try_enter_with_origin("reports", Some("gateway"));
    assert!(gateway.is_ok());

    drop(held);
    let after_release = engine.try_enter_with_origin("reports", Some("batch"));
    assert!(after_release.is_ok());
}

#[test]
fn authority_rules_gate_origins() {
    let engine = Engine::new();
    install(
        &engine,
        RuleSet {
            authority: vec![AuthorityRule::allow("admin", vec!["gateway".to_string()])],
            ..RuleSet::default()
        },
    );

    assert!(engine.try_enter_with_origin("admin", Some("gateway")).is_ok());

    let denied = engine.try_enter_with_origin("admin", Some("mobile")).unwrap_err();
    let blocked = denied.blocked().unwrap();
    assert_eq!(blocked.stage, "authority");
    assert!(matches!(blocked.reason, BlockReason::AuthorityDenied { .. }));

    // An allow list admits only listed origins, so anonymous calls are out.
    assert!(engine.try_enter("admin").is_err());
}

#[test]
fn system_rule_caps_total_in_flight() {
    let engine = Engine::new();
    install(
        &engine,
        RuleSet { system: Some(SystemRule { max_concurrency: Some(3) }), ..RuleSet::default() },
    );

    let a = engine.try_enter("alpha").unwrap();
    let b = engine.try_enter("beta").unwrap();
    let c = engine.try_enter("gamma").unwrap();

    let overload = engine.try_enter("delta").unwrap_err();
    let blocked = overload.blocked().unwrap();
    assert_eq!(blocked.stage, "system");
    assert!(matches!(blocked.reason, BlockReason::SystemOverload { .. }));

    drop(a);
    assert!(engine.try_enter("delta").is_ok());

    drop(b);
    drop(c);
    assert_eq!(engine.nodes().global().in_flight(), 0);
}

#[test]
fn breaker_opens_after_error_ratio_and_recovers() {
    let engine = Engine::new();
    let mut rule = BreakerRule::new("flaky", 0.5);
    rule.min_requests = 4;
    rule.cooldown = Duration::from_millis(300);
    install(&engine, RuleSet { breaker: vec![rule], ..RuleSet::default() });

    // Four completions, half of them failures.
    for call in 0..4 {
        let mut entry = engine.try_enter("flaky").unwrap();
        if call % 2 == 0 {
            entry.mark_error();
        }
    }

    let open = engine.try_enter("flaky").unwrap_err();
    let blocked = open.blocked().unwrap();
    assert_eq!(blocked.stage, "breaker");
    assert!(matches!(blocked.reason, BlockReason::CircuitOpen { .. }));

    // After the cooldown a single probe is admitted; its success closes the
    // circuit for everyone.
    thread::sleep(Duration::from_millis(500));
    engine.try_enter("flaky").unwrap().complete();
    assert!(engine.try_enter("flaky").is_ok());
}

#[test]
fn guards_settle_when_a_worker_panics() {
    let engine = Engine::new();

    let worker = {
        let engine = engine.clone();
        thread::spawn(move || {
            let _entry = engine.try_enter("fragile").unwrap();
            panic!("worker crashed mid-call");
        })
    };
    assert!(worker.join().is_err());

    let stats = engine.nodes().get("fragile").unwrap();
    assert_eq!(stats.stats().in_flight(), 0);
    assert_eq!(stats.stats().pass(), 1);
}

#[test]
fn statistics_capture_errors_and_latency() {
    let engine = Engine::new();

    let mut entry = engine.try_enter("billing").unwrap();
    thread::sleep(Duration::from_millis(30));
    entry.mark_error();
    drop(entry);

    let node = engine.nodes().get("billing").unwrap();
    assert_eq!(node.stats().error(), 1);

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let totals = node.stats().window_totals(now, 10);
    assert_eq!(totals.done, 1);
    assert_eq!(totals.error, 1);
    assert!(totals.avg_rt_ms() >= 30.0);
}

#[test]
fn rule_replacement_applies_to_next_invocation() {
    let engine = Engine::new();

    // No rules: everything is admitted.
    engine.try_enter("orders").unwrap().complete();

    install(
        &engine,
        RuleSet { flow: vec![FlowRule::concurrency("orders", 1)], ..RuleSet::default() },
    );
    let held = engine.try_enter("orders").unwrap();
    assert!(engine.try_enter("orders").is_err());
    drop(held);

    // Clearing the set lifts the limit without rebuilding the pipeline.
    install(&engine, RuleSet::default());
    let first = engine.try_enter("orders").unwrap();
    let second = engine.try_enter("orders").unwrap();
    drop(first);
    drop(second);
}
