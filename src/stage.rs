//! The stage contract every pipeline element implements.

use crate::context::InvocationContext;
use crate::error::{BlockReason, StageFault};

/// What a stage decided about an invocation at entry.
///
/// Blocking is control flow, not failure: a `Block` stops the pipeline,
/// becomes a typed [`Blocked`](crate::Blocked) rejection for the caller, and
/// is counted on the resource's node. Genuine failures travel on the error
/// channel as [`StageFault`].
#[derive(Debug)]
pub enum Verdict {
    Proceed,
    Block(BlockReason),
}

/// One element of a resource's admission pipeline.
///
/// A stage instance belongs to exactly one pipeline and is shared by every
/// concurrent invocation of that pipeline's resource, so implementations keep
/// no per-call state outside the context and mutate nothing but atomics.
///
/// `on_entry` runs front to back; `on_exit` runs back to front over the
/// stages whose `on_entry` completed, exactly once each, whatever the
/// invocation's outcome. Both hooks sit on the hot path: no locks, no I/O,
/// no blocking.
///
/// Returning `Err(StageFault)` aborts the invocation: already-entered stages
/// are unwound, the fault is logged at error level and surfaced to the
/// caller. The guarded work does not run.
pub trait Stage: Send + Sync {
    /// Stable name used in logs, rejections, and pipeline introspection.
    fn name(&self) -> &'static str;

    fn on_entry(&self, ctx: &mut InvocationContext) -> Result<Verdict, StageFault>;

    /// Exit hook. Infallible: cleanup must not invent new failure modes.
    fn on_exit(&self, ctx: &InvocationContext);
}

pub type BoxedStage = Box<dyn Stage>;
