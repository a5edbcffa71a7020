//! Per-invocation state. Owned by the calling thread, never shared.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::node::{AttemptReadings, ResourceNode, StatsNode};

static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Final state of an invocation. Starts as `Success` and is downgraded by a
/// block or an explicit error mark before exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    Success,
    Error,
    Blocked,
}

/// Readings captured by the statistic stage at entry time, consumed by the
/// checking stages that run after it. Post-increment values: each concurrent
/// invocation sees its own distinct reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntryReadings {
    pub resource: AttemptReadings,
    pub origin: Option<AttemptReadings>,
    pub global_in_flight: u64,
}

/// Call-scoped context handed to every stage hook. Created at entry, carried
/// through the pipeline, destroyed when the entry guard exits.
#[derive(Debug)]
pub struct InvocationContext {
    id: Uuid,
    seq: u64,
    resource: Arc<str>,
    origin: Option<String>,
    entered_at: Instant,
    outcome: Outcome,
    node: Option<Arc<ResourceNode>>,
    origin_node: Option<Arc<StatsNode>>,
    global_node: Option<Arc<StatsNode>>,
    readings: EntryReadings,
    pub(crate) entered: usize,
    pub(crate) admitted: bool,
}

impl InvocationContext {
    pub(crate) fn new(resource: Arc<str>, origin: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            resource,
            origin,
            entered_at: Instant::now(),
            outcome: Outcome::Success,
            node: None,
            origin_node: None,
            global_node: None,
            readings: EntryReadings::default(),
            entered: 0,
            admitted: false,
        }
    }

    /// Correlation id for log lines about this invocation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Process-unique, nonzero sequence number for this invocation.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn entered_at(&self) -> Instant {
        self.entered_at
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.entered_at.elapsed().as_millis() as u64
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub(crate) fn set_outcome(&mut self, outcome: Outcome) {
        self.outcome = outcome;
    }

    /// Statistics node for the resource, once the node selection stage ran.
    pub fn node(&self) -> Option<&Arc<ResourceNode>> {
        self.node.as_ref()
    }

    /// Child node for this invocation's origin, when an origin was given.
    pub fn origin_node(&self) -> Option<&Arc<StatsNode>> {
        self.origin_node.as_ref()
    }

    /// Process-wide aggregate node.
    pub fn global_node(&self) -> Option<&Arc<StatsNode>> {
        self.global_node.as_ref()
    }

    /// True once the whole entry traversal passed and the call was admitted.
    pub fn admitted(&self) -> bool {
        self.admitted
    }

    pub fn attach_nodes(
        &mut self,
        node: Arc<ResourceNode>,
        origin_node: Option<Arc<StatsNode>>,
        global_node: Arc<StatsNode>,
    ) {
        self.node = Some(node);
        self.origin_node = origin_node;
        self.global_node = Some(global_node);
    }

    pub fn readings(&self) -> EntryReadings {
        self.readings
    }

    pub fn set_readings(&mut self, readings: EntryReadings) {
        self.readings = readings;
    }
}
