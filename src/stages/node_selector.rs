use std::sync::Arc;

use crate::context::InvocationContext;
use crate::error::StageFault;
use crate::node::NodeRegistry;
use crate::stage::{Stage, Verdict};

/// First stage of the default pipeline: looks up (or creates) the statistics
/// nodes for the resource, its origin, and the process, and attaches them to
/// the context for everything downstream.
pub struct NodeSelectorStage {
    nodes: Arc<NodeRegistry>,
}

impl NodeSelectorStage {
    pub fn new(nodes: Arc<NodeRegistry>) -> Self {
        Self { nodes }
    }
}

impl Stage for NodeSelectorStage {
    fn name(&self) -> &'static str {
        "node_selector"
    }

    fn on_entry(&self, ctx: &mut InvocationContext) -> Result<Verdict, StageFault> {
        let node = self
            .nodes
            .resource_node(ctx.resource())
            .map_err(|e| StageFault::new(e.to_string()))?;
        let origin_node = match ctx.origin() {
            Some(origin) => {
                Some(node.origin_node(origin).map_err(|e| StageFault::new(e.to_string()))?)
            }
            None => None,
        };
        let global = Arc::clone(self.nodes.global());
        ctx.attach_nodes(node, origin_node, global);
        Ok(Verdict::Proceed)
    }

    fn on_exit(&self, _ctx: &InvocationContext) {}
}
