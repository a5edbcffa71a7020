//! Pipeline assembly, and the registration point for swapping it out.
//!
//! Alternative builders register themselves at build time:
//!
//! ```ignore
//! inventory::submit! {
//!     turnstile::BuilderRegistration::new(|| Box::new(MyBuilder))
//! }
//! ```
//!
//! Resolution picks the first registered non-default builder, falling back to
//! [`DefaultPipelineBuilder`]. See the `resolver` module.

use std::sync::Arc;

use crate::node::NodeRegistry;
use crate::pipeline::Pipeline;
use crate::rules::RuleStore;
use crate::stages::{
    AuthorityStage, BreakerStage, FlowStage, NodeSelectorStage, StatisticStage, SystemStage,
};

/// The built-in stage sequence. Downstream stages depend on upstream side
/// effects (checks read what the statistic stage recorded), so the order is
/// part of the contract.
pub const DEFAULT_STAGE_ORDER: [&str; 6] =
    ["node_selector", "statistic", "authority", "system", "flow", "breaker"];

/// Assembles the pipeline for one resource. Implementations must be cheap to
/// call repeatedly: one invocation per resource, under the engine's build
/// lock.
pub trait PipelineBuilder: Send + Sync {
    fn name(&self) -> &'static str;

    /// Marks the built-in fallback. Resolution prefers any other candidate.
    fn is_default(&self) -> bool {
        false
    }

    fn build(&self, nodes: &Arc<NodeRegistry>, rules: &Arc<RuleStore>) -> Pipeline;
}

/// Builds the default six-stage pipeline in [`DEFAULT_STAGE_ORDER`]. Every
/// call produces fresh stage instances, so pipelines built for different
/// resources share structure but no state.
#[derive(Debug, Default)]
pub struct DefaultPipelineBuilder;

impl PipelineBuilder for DefaultPipelineBuilder {
    fn name(&self) -> &'static str {
        "default"
    }

    fn is_default(&self) -> bool {
        true
    }

    fn build(&self, nodes: &Arc<NodeRegistry>, rules: &Arc<RuleStore>) -> Pipeline {
        Pipeline::new(vec![
            Box::new(NodeSelectorStage::new(Arc::clone(nodes))),
            Box::new(StatisticStage::new()),
            Box::new(AuthorityStage::new(Arc::clone(rules))),
            Box::new(SystemStage::new(Arc::clone(rules))),
            Box::new(FlowStage::new(Arc::clone(rules))),
            Box::new(BreakerStage::new(Arc::clone(rules))),
        ])
    }
}

/// Build-time registration record collected through `inventory`.
pub struct BuilderRegistration {
    factory: fn() -> Box<dyn PipelineBuilder>,
}

impl BuilderRegistration {
    pub const fn new(factory: fn() -> Box<dyn PipelineBuilder>) -> Self {
        Self { factory }
    }

    pub fn instantiate(&self) -> Box<dyn PipelineBuilder> {
        (self.factory)()
    }
}

inventory::collect!(BuilderRegistration);

inventory::submit! {
    BuilderRegistration::new(|| Box::new(DefaultPipelineBuilder))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_builder_produces_the_contractual_order() {
        let nodes = Arc::new(NodeRegistry::new());
        let rules = Arc::new(RuleStore::new());
        let pipeline = DefaultPipelineBuilder.build(&nodes, &rules);
        assert_eq!(pipeline.stage_names(), DEFAULT_STAGE_ORDER);
    }

    #[test]
    fn builds_are_structurally_identical_but_independent() {
        let nodes = Arc::new(NodeRegistry::new());
        let rules = Arc::new(RuleStore::new());
        let a = DefaultPipelineBuilder.build(&nodes, &rules);
        let b = DefaultPipelineBuilder.build(&nodes, &rules);
        assert_eq!(a.stage_names(), b.stage_names());
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn default_registration_is_collected() {
        let names: Vec<_> = inventory::iter::<BuilderRegistration>
            .into_iter()
            .map(|reg| reg.instantiate().name())
            .collect();
        assert!(names.contains(&"default"));
    }
}
