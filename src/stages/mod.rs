//! Built-in pipeline stages, listed in their contractual order.

mod node_selector;
mod statistic;
mod authority;
mod system;
mod flow;
mod breaker;

pub use authority::AuthorityStage;
pub use breaker::BreakerStage;
pub use flow::FlowStage;
pub use node_selector::NodeSelectorStage;
pub use statistic::StatisticStage;
pub use system::SystemStage;
