//! Built-in management commands.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use serde::Serialize;

use crate::command::{CommandHandler, CommandRequest};
use crate::engine::Engine;
use crate::error::TurnstileError;
use crate::node::NodeSnapshot;
use crate::resolver;
use crate::response::{CommandResponse, HealthInfo, VersionInfo};
use crate::rules::RuleSet;
use crate::window::now_epoch_secs;

static STARTED_AT: LazyLock<Instant> = LazyLock::new(Instant::now);

pub(crate) fn builtin_handlers() -> Vec<Arc<dyn CommandHandler>> {
    vec![
        Arc::new(VersionCommand),
        Arc::new(HealthCommand),
        Arc::new(ResourcesCommand),
        Arc::new(NodeCommand),
        Arc::new(RulesCommand),
    ]
}

fn internal(error: TurnstileError) -> CommandResponse {
    CommandResponse::error(500, error.to_string())
}

pub struct VersionCommand;

impl CommandHandler for VersionCommand {
    fn name(&self) -> &'static str {
        "version"
    }

    fn description(&self) -> &'static str {
        "package name and version"
    }

    fn handle(&self, _engine: &Engine, _request: &CommandRequest) -> CommandResponse {
        CommandResponse::ok(VersionInfo::current())
    }
}

pub struct HealthCommand;

impl CommandHandler for HealthCommand {
    fn name(&self) -> &'static str {
        "health"
    }

    fn description(&self) -> &'static str {
        "process health and uptime"
    }

    fn handle(&self, engine: &Engine, _request: &CommandRequest) -> CommandResponse {
        let resources = match engine.nodes().resource_names() {
            Ok(names) => names.len(),
            Err(e) => return internal(e),
        };
        let builder = resolver::resolved_builder_name().unwrap_or("unresolved");
        CommandResponse::ok(HealthInfo::healthy(STARTED_AT.elapsed().as_secs(), builder, resources))
    }
}

#[derive(Debug, Serialize)]
struct ResourceSummary {
    resource: String,
    #[serde(flatten)]
    stats: NodeSnapshot,
}

pub struct ResourcesCommand;

impl CommandHandler for ResourcesCommand {
    fn name(&self) -> &'static str {
        "resources"
    }

    fn description(&self) -> &'static str {
        "statistics for every tracked resource"
    }

    fn handle(&self, engine: &Engine, _request: &CommandRequest) -> CommandResponse {
        let names = match engine.nodes().resource_names() {
            Ok(names) => names,
            Err(e) => return internal(e),
        };
        let now = now_epoch_secs();
        let mut summaries = Vec::with_capacity(names.len());
        for name in names {
            if let Some(node) = engine.nodes().get(&name) {
                summaries.push(ResourceSummary {
                    resource: name,
                    stats: node.stats().snapshot(now),
                });
            }
        }
        CommandResponse::ok(summaries)
    }
}

#[derive(Debug, Serialize)]
struct OriginSummary {
    origin: String,
    #[serde(flatten)]
    stats: NodeSnapshot,
}

#[derive(Debug, Serialize)]
struct NodeDetail {
    resource: String,
    stages: Vec<&'static str>,
    #[serde(flatten)]
    stats: NodeSnapshot,
    origins: Vec<OriginSummary>,
}

pub struct NodeCommand;

impl CommandHandler for NodeCommand {
    fn name(&self) -> &'static str {
        "node"
    }

    fn description(&self) -> &'static str {
        "detailed statistics for one resource, split by origin"
    }

    fn handle(&self, engine: &Engine, request: &CommandRequest) -> CommandResponse {
        let resource = match request.param("resource") {
            Some(resource) => resource,
            None => return CommandResponse::bad_request("missing 'resource' parameter"),
        };
        let node = match engine.nodes().get(resource) {
            Some(node) => node,
            None => {
                return CommandResponse::not_found(format!("unknown resource '{}'", resource))
            }
        };
        let now = now_epoch_secs();
        let origins = match node.origin_snapshots(now) {
            Ok(pairs) => pairs
                .into_iter()
                .map(|(origin, stats)| OriginSummary { origin, stats })
                .collect(),
            Err(e) => return internal(e),
        };
        let stages = match engine.pipeline(resource) {
            Ok(pipeline) => pipeline.stage_names(),
            Err(e) => return internal(e),
        };
        CommandResponse::ok(NodeDetail {
            resource: resource.to_string(),
            stages,
            stats: node.stats().snapshot(now),
            origins,
        })
    }
}

pub struct RulesCommand;

impl CommandHandler for RulesCommand {
    fn name(&self) -> &'static str {
        "rules"
    }

    fn description(&self) -> &'static str {
        "GET the active rule set, POST a replacement"
    }

    fn handle(&self, engine: &Engine, request: &CommandRequest) -> CommandResponse {
        match &request.body {
            None => match engine.rules().snapshot() {
                Ok(set) => CommandResponse::ok(set),
                Err(e) => internal(e),
            },
            Some(body) => {
                let set: RuleSet = match serde_json::from_value(body.clone()) {
                    Ok(set) => set,
                    Err(e) => {
                        return CommandResponse::bad_request(format!(
                            "invalid rule document: {}",
                            e
                        ))
                    }
                };
                if let Err(e) = engine.rules().apply(set) {
                    return match e {
                        TurnstileError::InvalidRule(message) => CommandResponse::error(422, message),
                        other => internal(other),
                    };
                }
                match engine.rules().snapshot() {
                    Ok(set) => CommandResponse::accepted("rules installed", set),
                    Err(e) => internal(e),
                }
            }
        }
    }
}
