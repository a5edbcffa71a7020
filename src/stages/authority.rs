use std::sync::Arc;

use crate::context::InvocationContext;
use crate::error::{BlockReason, StageFault};
use crate::rules::RuleStore;
use crate::stage::{Stage, Verdict};

/// Origin allow/deny check. No rule for the resource means every caller is
/// welcome.
pub struct AuthorityStage {
    rules: Arc<RuleStore>,
}

impl AuthorityStage {
    pub fn new(rules: Arc<RuleStore>) -> Self {
        Self { rules }
    }
}

impl Stage for AuthorityStage {
    fn name(&self) -> &'static str {
        "authority"
    }

    fn on_entry(&self, ctx: &mut InvocationContext) -> Result<Verdict, StageFault> {
        let rule = self
            .rules
            .authority_rule(ctx.resource())
            .map_err(|e| StageFault::new(e.to_string()))?;
        match rule {
            Some(rule) if !rule.permits(ctx.origin()) => {
                Ok(Verdict::Block(BlockReason::AuthorityDenied {
                    origin: ctx.origin().map(|o| o.to_string()),
                }))
            }
            _ => Ok(Verdict::Proceed),
        }
    }

    fn on_exit(&self, _ctx: &InvocationContext) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::AuthorityRule;

    fn ctx(origin: Option<&str>) -> InvocationContext {
        InvocationContext::new(Arc::from("orders"), origin.map(|o| o.to_string()))
    }

    #[test]
    fn no_rule_admits_everyone() {
        let stage = AuthorityStage::new(Arc::new(RuleStore::new()));
        assert!(matches!(stage.on_entry(&mut ctx(None)), Ok(Verdict::Proceed)));
        assert!(matches!(stage.on_entry(&mut ctx(Some("batch"))), Ok(Verdict::Proceed)));
    }

    #[test]
    fn allow_list_blocks_unlisted_and_anonymous_origins() {
        let rules = Arc::new(RuleStore::new());
        rules
            .set_authority_rules(vec![AuthorityRule::allow("orders", vec!["gateway".to_string()])])
            .unwrap();
        let stage = AuthorityStage::new(rules);

        assert!(matches!(stage.on_entry(&mut ctx(Some("gateway"))), Ok(Verdict::Proceed)));
        assert!(matches!(stage.on_entry(&mut ctx(Some("batch"))), Ok(Verdict::Block(_))));
        assert!(matches!(stage.on_entry(&mut ctx(None)), Ok(Verdict::Block(_))));
    }

    #[test]
    fn deny_list_blocks_only_listed_origins() {
        let rules = Arc::new(RuleStore::new());
        rules
            .set_authority_rules(vec![AuthorityRule::deny("orders", vec!["batch".to_string()])])
            .unwrap();
        let stage = AuthorityStage::new(rules);

        assert!(matches!(stage.on_entry(&mut ctx(Some("batch"))), Ok(Verdict::Block(_))));
        assert!(matches!(stage.on_entry(&mut ctx(Some("gateway"))), Ok(Verdict::Proceed)));
        assert!(matches!(stage.on_entry(&mut ctx(None)), Ok(Verdict::Proceed)));
    }
}
