//! Admission rules and the runtime-mutable store stages consult.
//!
//! Rules arrive as whole sets (per kind) and replace what was there before.
//! Stages fetch the current `Arc` per entry and never hold it across calls,
//! so a replacement is picked up by the next invocation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use validator::Validate;

use crate::error::{TurnstileError, TurnstileResult};
use crate::window::MAX_SPAN_SECS;

/// Concurrency and rate ceilings for one resource, optionally scoped to a
/// single calling origin. A limit of zero rejects every call it covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct FlowRule {
    #[validate(length(min = 1))]
    pub resource: String,
    /// When set, the rule applies only to calls carrying this origin and is
    /// checked against the origin's own readings.
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub max_concurrency: Option<u64>,
    #[serde(default)]
    pub max_per_sec: Option<u64>,
}

impl FlowRule {
    pub fn concurrency(resource: impl Into<String>, limit: u64) -> Self {
        Self {
            resource: resource.into(),
            origin: None,
            max_concurrency: Some(limit),
            max_per_sec: None,
        }
    }

    pub fn per_sec(resource: impl Into<String>, limit: u64) -> Self {
        Self {
            resource: resource.into(),
            origin: None,
            max_concurrency: None,
            max_per_sec: Some(limit),
        }
    }

    pub fn for_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        Validate::validate(self).map_err(|e| e.to_string())?;
        if self.max_concurrency.is_none() && self.max_per_sec.is_none() {
            return Err(format!("flow rule for '{}' sets no limit", self.resource));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityMode {
    /// Only the listed origins may call. Calls without an origin are denied.
    Allow,
    /// The listed origins may not call. Calls without an origin are admitted.
    Deny,
}

/// Origin allow/deny list for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AuthorityRule {
    #[validate(length(min = 1))]
    pub resource: String,
    pub mode: AuthorityMode,
    #[validate(length(min = 1))]
    pub origins: Vec<String>,
}

impl AuthorityRule {
    pub fn allow(resource: impl Into<String>, origins: Vec<String>) -> Self {
        Self { resource: resource.into(), mode: AuthorityMode::Allow, origins }
    }

    pub fn deny(resource: impl Into<String>, origins: Vec<String>) -> Self {
        Self { resource: resource.into(), mode: AuthorityMode::Deny, origins }
    }

    pub fn validate(&self) -> Result<(), String> {
        Validate::validate(self).map_err(|e| e.to_string())
    }

    pub fn permits(&self, origin: Option<&str>) -> bool {
        match (self.mode, origin) {
            (AuthorityMode::Allow, Some(origin)) => self.origins.iter().any(|o| o == origin),
            (AuthorityMode::Allow, None) => false,
            (AuthorityMode::Deny, Some(origin)) => !self.origins.iter().any(|o| o == origin),
            (AuthorityMode::Deny, None) => true,
        }
    }
}

fn default_breaker_window() -> Duration {
    Duration::from_secs(10)
}

fn default_breaker_cooldown() -> Duration {
    Duration::from_secs(5)
}

fn default_min_requests() -> u64 {
    5
}

/// Error-ratio circuit breaker settings for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BreakerRule {
    #[validate(length(min = 1))]
    pub resource: String,
    /// Open once errors per completed call reach this ratio.
    #[validate(range(min = 0.0, max = 1.0))]
    pub error_ratio: f64,
    /// Ratio is only meaningful after this many completions in the window.
    #[validate(range(min = 1))]
    #[serde(default = "default_min_requests")]
    pub min_requests: u64,
    /// Span of recent completions the ratio is measured over.
    #[serde(default = "default_breaker_window", with = "humantime_serde")]
    pub window: Duration,
    /// How long the breaker stays open before probing.
    #[serde(default = "default_breaker_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,
}

impl BreakerRule {
    pub fn new(resource: impl Into<String>, error_ratio: f64) -> Self {
        Self {
            resource: resource.into(),
            error_ratio,
            min_requests: default_min_requests(),
            window: default_breaker_window(),
            cooldown: default_breaker_cooldown(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        Validate::validate(self).map_err(|e| e.to_string())?;
        let window_secs = self.window.as_secs();
        if window_secs == 0 || window_secs > MAX_SPAN_SECS {
            return Err(format!(
                "breaker window for '{}' must be 1..={}s",
                self.resource, MAX_SPAN_SECS
            ));
        }
        if self.cooldown.is_zero() {
            return Err(format!("breaker cooldown for '{}' must be nonzero", self.resource));
        }
        Ok(())
    }
}

/// Process-wide protection, checked against the global node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemRule {
    #[serde(default)]
    pub max_concurrency: Option<u64>,
}

/// Complete rule configuration, as fetched from and installed through the
/// management endpoint. Installing a set replaces every kind it covers;
/// omitted kinds are cleared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub flow: Vec<FlowRule>,
    #[serde(default)]
    pub authority: Vec<AuthorityRule>,
    #[serde(default)]
    pub breaker: Vec<BreakerRule>,
    #[serde(default)]
    pub system: Option<SystemRule>,
}

/// Shared rule store. Reads are short shared-lock fetches of an `Arc`;
/// writes validate, then swap whole maps.
#[derive(Debug, Default)]
pub struct RuleStore {
    flow: RwLock<HashMap<String, Arc<Vec<FlowRule>>>>,
    authority: RwLock<HashMap<String, Arc<AuthorityRule>>>,
    breaker: RwLock<HashMap<String, Arc<BreakerRule>>>,
    system: RwLock<Option<Arc<SystemRule>>>,
}

fn poisoned(what: &str) -> TurnstileError {
    TurnstileError::Internal(format!("{} lock poisoned", what))
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flow_rules(&self, resource: &str) -> TurnstileResult<Option<Arc<Vec<FlowRule>>>> {
        let flow = self.flow.read().map_err(|_| poisoned("flow rules"))?;
        Ok(flow.get(resource).map(Arc::clone))
    }

    pub fn authority_rule(&self, resource: &str) -> TurnstileResult<Option<Arc<AuthorityRule>>> {
        let authority = self.authority.read().map_err(|_| poisoned("authority rules"))?;
        Ok(authority.get(resource).map(Arc::clone))
    }

    pub fn breaker_rule(&self, resource: &str) -> TurnstileResult<Option<Arc<BreakerRule>>> {
        let breaker = self.breaker.read().map_err(|_| poisoned("breaker rules"))?;
        Ok(breaker.get(resource).map(Arc::clone))
    }

    pub fn system_rule(&self) -> TurnstileResult<Option<Arc<SystemRule>>> {
        let system = self.system.read().map_err(|_| poisoned("system rule"))?;
        Ok(system.as_ref().map(Arc::clone))
    }

    /// Replaces all flow rules. Rules for the same resource accumulate and
    /// are checked in the order given.
    pub fn set_flow_rules(&self, rules: Vec<FlowRule>) -> TurnstileResult<()> {
        for rule in &rules {
            rule.validate().map_err(TurnstileError::InvalidRule)?;
        }
        let mut grouped: HashMap<String, Vec<FlowRule>> = HashMap::new();
        for rule in rules {
            grouped.entry(rule.resource.clone()).or_default().push(rule);
        }
        let next: HashMap<String, Arc<Vec<FlowRule>>> =
            grouped.into_iter().map(|(k, v)| (k, Arc::new(v))).collect();
        let mut flow = self.flow.write().map_err(|_| poisoned("flow rules"))?;
        *flow = next;
        Ok(())
    }

    /// Replaces all authority rules. One rule per resource, last wins.
    pub fn set_authority_rules(&self, rules: Vec<AuthorityRule>) -> TurnstileResult<()> {
        for rule in &rules {
            rule.validate().map_err(TurnstileError::InvalidRule)?;
        }
        let next: HashMap<String, Arc<AuthorityRule>> = rules
            .into_iter()
            .map(|rule| (rule.resource.clone(), Arc::new(rule)))
            .collect();
        let mut authority = self.authority.write().map_err(|_| poisoned("authority rules"))?;
        *authority = next;
        Ok(())
    }

    /// Replaces all breaker rules. One rule per resource, last wins.
    pub fn set_breaker_rules(&self, rules: Vec<BreakerRule>) -> TurnstileResult<()> {
        for rule in &rules {
            rule.validate().map_err(TurnstileError::InvalidRule)?;
        }
        let next: HashMap<String, Arc<BreakerRule>> = rules
            .into_iter()
            .map(|rule| (rule.resource.clone(), Arc::new(rule)))
            .collect();
        let mut breaker = self.breaker.write().map_err(|_| poisoned("breaker rules"))?;
        *breaker = next;
        Ok(())
    }

    pub fn set_system_rule(&self, rule: Option<SystemRule>) -> TurnstileResult<()> {
        let mut system = self.system.write().map_err(|_| poisoned("system rule"))?;
        *system = rule.map(Arc::new);
        Ok(())
    }

    /// Installs a complete rule set, validating everything before touching
    /// any kind. Either the whole set applies or nothing does.
    pub fn apply(&self, set: RuleSet) -> TurnstileResult<()> {
        for rule in &set.flow {
            rule.validate().map_err(TurnstileError::InvalidRule)?;
        }
        for rule in &set.authority {
            rule.validate().map_err(TurnstileError::InvalidRule)?;
        }
        for rule in &set.breaker {
            rule.validate().map_err(TurnstileError::InvalidRule)?;
        }
        self.set_flow_rules(set.flow)?;
        self.set_authority_rules(set.authority)?;
        self.set_breaker_rules(set.breaker)?;
        self.set_system_rule(set.system)
    }

    pub fn snapshot(&self) -> TurnstileResult<RuleSet> {
        let mut flow: Vec<FlowRule> = {
            let map = self.flow.read().map_err(|_| poisoned("flow rules"))?;
            map.values().flat_map(|rules| rules.iter().cloned()).collect()
        };
        flow.sort_by(|a, b| a.resource.cmp(&b.resource));
        let mut authority: Vec<AuthorityRule> = {
            let map = self.authority.read().map_err(|_| poisoned("authority rules"))?;
            map.values().map(|rule| rule.as_ref().clone()).collect()
        };
        authority.sort_by(|a, b| a.resource.cmp(&b.resource));
        let mut breaker: Vec<BreakerRule> = {
            let map = self.breaker.read().map_err(|_| poisoned("breaker rules"))?;
            map.values().map(|rule| rule.as_ref().clone()).collect()
        };
        breaker.sort_by(|a, b| a.resource.cmp(&b.resource));
        let system = self
            .system
            .read()
            .map_err(|_| poisoned("system rule"))?
            .as_ref()
            .map(|rule| rule.as_ref().clone());
        Ok(RuleSet { flow, authority, breaker, system })
    }
}
