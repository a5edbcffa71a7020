//! The engine façade: per-resource pipelines and scoped entries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tracing::debug;

use crate::context::{InvocationContext, Outcome};
use crate::error::{TurnstileError, TurnstileResult};
use crate::node::NodeRegistry;
use crate::pipeline::Pipeline;
use crate::resolver;
use crate::rules::RuleStore;

/// Admission control engine. Cheap to clone; clones share pipelines, nodes,
/// and rules.
///
/// One pipeline is assembled per resource, on first use, under an internal
/// build lock; every later entry reuses it lock-free apart from one shared
/// map read. Entries come back as [`EntryGuard`]s, whose drop performs the
/// matching exit, so every admitted call is balanced even on early returns
/// and panics.
#[derive(Clone, Default)]
pub struct Engine {
    chains: Arc<RwLock<HashMap<Arc<str>, Arc<Pipeline>>>>,
    build_lock: Arc<Mutex<()>>,
    nodes: Arc<NodeRegistry>,
    rules: Arc<RuleStore>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &Arc<NodeRegistry> {
        &self.nodes
    }

    pub fn rules(&self) -> &Arc<RuleStore> {
        &self.rules
    }

    /// Asks the pipeline to admit a call against `resource`.
    ///
    /// `Ok` carries the guard for the admitted call; dropping it exits the
    /// pipeline. `Err` is either a typed [`Blocked`](crate::Blocked)
    /// rejection or a fault; in both cases all bookkeeping has already been
    /// unwound and there is nothing to release.
    pub fn try_enter(&self, resource: &str) -> TurnstileResult<EntryGuard> {
        self.try_enter_with_origin(resource, None)
    }

    /// Like [`try_enter`](Self::try_enter), attributing the call to an
    /// origin so per-origin rules and statistics apply.
    pub fn try_enter_with_origin(
        &self,
        resource: &str,
        origin: Option<&str>,
    ) -> TurnstileResult<EntryGuard> {
        let (name, chain) = self.chain_for(resource)?;
        let mut ctx = InvocationContext::new(name, origin.map(|o| o.to_string()));
        chain.entry(&mut ctx)?;
        Ok(EntryGuard { chain, ctx })
    }

    /// The pipeline serving `resource`, assembling it if this is the first
    /// use. Mostly useful for introspection.
    pub fn pipeline(&self, resource: &str) -> TurnstileResult<Arc<Pipeline>> {
        self.chain_for(resource).map(|(_, chain)| chain)
    }

    fn chain_for(&self, resource: &str) -> TurnstileResult<(Arc<str>, Arc<Pipeline>)> {
        {
            let chains = self
                .chains
                .read()
                .map_err(|_| TurnstileError::Internal("chain map poisoned".to_string()))?;
            if let Some((name, chain)) = chains.get_key_value(resource) {
                return Ok((Arc::clone(name), Arc::clone(chain)));
            }
        }

        // First use of this resource: build exactly one pipeline for it.
        let _build = self
            .build_lock
            .lock()
            .map_err(|_| TurnstileError::Internal("build lock poisoned".to_string()))?;
        {
            let chains = self
                .chains
                .read()
                .map_err(|_| TurnstileError::Internal("chain map poisoned".to_string()))?;
            if let Some((name, chain)) = chains.get_key_value(resource) {
                return Ok((Arc::clone(name), Arc::clone(chain)));
            }
        }
        let builder = resolver::resolved_builder();
        let chain = Arc::new(builder.build(&self.nodes, &self.rules));
        debug!(
            resource,
            builder = builder.name(),
            stages = ?chain.stage_names(),
            "assembled pipeline"
        );
        let name: Arc<str> = Arc::from(resource);
        let mut chains = self
            .chains
            .write()
            .map_err(|_| TurnstileError::Internal("chain map poisoned".to_string()))?;
        chains.insert(Arc::clone(&name), Arc::clone(&chain));
        Ok((name, chain))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let resources = self.chains.read().map(|c| c.len()).unwrap_or(0);
        f.debug_struct("Engine").field("resources", &resources).finish()
    }
}

const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    let _ = assert_send_sync::<Engine>;
    let _ = assert_send_sync::<EntryGuard>;
};

/// A successfully admitted call. Exits the pipeline exactly once, when
/// dropped. Keep it alive for the duration of the guarded work.
#[derive(Debug)]
pub struct EntryGuard {
    chain: Arc<Pipeline>,
    ctx: InvocationContext,
}

impl EntryGuard {
    pub fn context(&self) -> &InvocationContext {
        &self.ctx
    }

    /// Marks the guarded work as failed, so the exit records an error
    /// outcome. The circuit breaker feeds on these.
    pub fn mark_error(&mut self) {
        self.ctx.set_outcome(Outcome::Error);
    }

    /// Explicit, readable exit with a success outcome.
    pub fn complete(self) {}
}

impl Drop for EntryGuard {
    fn drop(&mut self) {
        self.chain.exit(&self.ctx);
    }
}
