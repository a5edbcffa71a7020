//! Per-resource statistics nodes.
//!
//! One [`ResourceNode`] per guarded resource, holding lifetime counters, a
//! windowed view for rates, and lazily-created per-origin child nodes. The
//! registry also keeps one global node aggregated across every resource.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{TurnstileError, TurnstileResult};
use crate::window::{MetricsWindow, WindowTotals};

/// Span used when turning window buckets into per-second rates.
const SNAPSHOT_SPAN_SECS: u64 = 10;

/// Post-increment readings taken at entry time. Because the increments are
/// atomic read-modify-writes, concurrent invocations observe distinct values,
/// which is what makes threshold checks exact.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptReadings {
    pub in_flight: u64,
    pub attempts_this_sec: u64,
}

/// Lock-free counter set shared by every invocation of one resource (or one
/// origin under a resource, or the whole process for the global node).
#[derive(Debug, Default)]
pub struct StatsNode {
    total: AtomicU64,
    pass: AtomicU64,
    block: AtomicU64,
    error: AtomicU64,
    in_flight: AtomicU64,
    rt_sum_ms: AtomicU64,
    window: MetricsWindow,
}

impl StatsNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts an entry attempt and returns the readings for this invocation.
    pub fn record_attempt(&self, now_sec: u64) -> AttemptReadings {
        self.total.fetch_add(1, Ordering::Relaxed);
        let in_flight = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        let attempts_this_sec = self.window.record_attempt(now_sec);
        AttemptReadings { in_flight, attempts_this_sec }
    }

    /// Counts an admission, recorded once the whole entry traversal passed.
    pub fn record_pass(&self, now_sec: u64) {
        self.pass.fetch_add(1, Ordering::Relaxed);
        self.window.record_pass(now_sec);
    }

    pub fn record_block(&self, now_sec: u64) {
        self.block.fetch_add(1, Ordering::Relaxed);
        self.window.record_block(now_sec);
    }

    /// Exit of an invocation that was never admitted. Rebalances in-flight
    /// and nothing else.
    pub fn record_exit_rejected(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Exit of an admitted invocation, with its outcome and response time.
    pub fn record_exit_done(&self, now_sec: u64, erred: bool, rt_ms: u64) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        if erred {
            self.error.fetch_add(1, Ordering::Relaxed);
        }
        self.rt_sum_ms.fetch_add(rt_ms, Ordering::Relaxed);
        self.window.record_done(now_sec, erred, rt_ms);
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn pass(&self) -> u64 {
        self.pass.load(Ordering::Relaxed)
    }

    pub fn block(&self) -> u64 {
        self.block.load(Ordering::Relaxed)
    }

    pub fn error(&self) -> u64 {
        self.error.load(Ordering::Relaxed)
    }

    pub fn window_totals(&self, now_sec: u64, span_secs: u64) -> WindowTotals {
        self.window.totals(now_sec, span_secs)
    }

    pub fn snapshot(&self, now_sec: u64) -> NodeSnapshot {
        let recent = self.window.totals(now_sec, SNAPSHOT_SPAN_SECS);
        let span = SNAPSHOT_SPAN_SECS as f64;
        NodeSnapshot {
            total: self.total(),
            pass: self.pass(),
            block: self.block(),
            error: self.error(),
            in_flight: self.in_flight(),
            pass_per_sec: recent.pass as f64 / span,
            block_per_sec: recent.block as f64 / span,
            avg_rt_ms: recent.avg_rt_ms(),
            error_ratio: recent.error_ratio(),
        }
    }
}

/// Point-in-time counter view, serialized by the management endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub total: u64,
    pub pass: u64,
    pub block: u64,
    pub error: u64,
    pub in_flight: u64,
    pub pass_per_sec: f64,
    pub block_per_sec: f64,
    pub avg_rt_ms: f64,
    pub error_ratio: f64,
}

/// Statistics for one resource: its own counters plus per-origin children.
#[derive(Debug)]
pub struct ResourceNode {
    name: Arc<str>,
    stats: StatsNode,
    origins: RwLock<HashMap<String, Arc<StatsNode>>>,
}

impl ResourceNode {
    fn new(name: Arc<str>) -> Self {
        Self {
            name,
            stats: StatsNode::new(),
            origins: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> &StatsNode {
        &self.stats
    }

    /// Returns the child node for `origin`, creating it on first use.
    /// Concurrent creators converge on the same node.
    pub fn origin_node(&self, origin: &str) -> TurnstileResult<Arc<StatsNode>> {
        {
            let origins = self
                .origins
                .read()
                .map_err(|e| TurnstileError::Internal(format!("origin map poisoned: {}", e)))?;
            if let Some(node) = origins.get(origin) {
                return Ok(Arc::clone(node));
            }
        }
        let mut origins = self
            .origins
            .write()
            .map_err(|e| TurnstileError::Internal(format!("origin map poisoned: {}", e)))?;
        let node = origins
            .entry(origin.to_string())
            .or_insert_with(|| Arc::new(StatsNode::new()));
        Ok(Arc::clone(node))
    }

    pub fn origin_snapshots(&self, now_sec: u64) -> TurnstileResult<Vec<(String, NodeSnapshot)>> {
        let origins = self
            .origins
            .read()
            .map_err(|e| TurnstileError::Internal(format!("origin map poisoned: {}", e)))?;
        let mut snapshots: Vec<_> = origins
            .iter()
            .map(|(origin, node)| (origin.clone(), node.snapshot(now_sec)))
            .collect();
        snapshots.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(snapshots)
    }
}

/// Process-wide node registry. Creation is idempotent: every caller asking
/// for the same resource gets the same node.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: RwLock<HashMap<Arc<str>, Arc<ResourceNode>>>,
    global: Arc<StatsNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aggregate node covering every invocation in the process.
    pub fn global(&self) -> &Arc<StatsNode> {
        &self.global
    }

    pub fn get(&self, resource: &str) -> Option<Arc<ResourceNode>> {
        self.nodes.read().ok()?.get(resource).map(Arc::clone)
    }

    pub fn resource_node(&self, resource: &str) -> TurnstileResult<Arc<ResourceNode>> {
        {
            let nodes = self
                .nodes
                .read()
                .map_err(|e| TurnstileError::Internal(format!("node registry poisoned: {}", e)))?;
            if let Some(node) = nodes.get(resource) {
                return Ok(Arc::clone(node));
            }
        }
        let mut nodes = self
            .nodes
            .write()
            .map_err(|e| TurnstileError::Internal(format!("node registry poisoned: {}", e)))?;
        if let Some(node) = nodes.get(resource) {
            return Ok(Arc::clone(node));
        }
        let name: Arc<str> = Arc::from(resource);
        let node = Arc::new(ResourceNode::new(Arc::clone(&name)));
        nodes.insert(name, Arc::clone(&node));
        Ok(node)
    }

    pub fn resource_names(&self) -> TurnstileResult<Vec<String>> {
        let nodes = self
            .nodes
            .read()
            .map_err(|e| TurnstileError::Internal(format!("node registry poisoned: {}", e)))?;
        let mut names: Vec<String> = nodes.keys().map(|k| k.to_string()).collect();
        names.sort();
        Ok(names)
    }
}
