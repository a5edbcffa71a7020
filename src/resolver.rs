//! Process-wide resolution of the active pipeline builder.
//!
//! Exactly one builder is active per process. Candidates come from build-time
//! [`BuilderRegistration`] submissions; the first non-default candidate wins,
//! otherwise the default builder is used. The winner is cached for the
//! process lifetime (unresolved, then resolved, never back), and the choice
//! is logged once so deployments can verify which implementation is live.
//!
//! First use is expected to be serialized by the caller (the engine resolves
//! under its build lock); the cell makes a concurrent first use safe anyway.

use std::sync::OnceLock;

use tracing::info;

use crate::builder::{BuilderRegistration, DefaultPipelineBuilder, PipelineBuilder};

static RESOLVED: OnceLock<Box<dyn PipelineBuilder>> = OnceLock::new();

/// The active builder, resolving it on first use.
pub fn resolved_builder() -> &'static dyn PipelineBuilder {
    RESOLVED
        .get_or_init(|| {
            let builder = select(
                inventory::iter::<BuilderRegistration>
                    .into_iter()
                    .map(|registration| registration.instantiate()),
            );
            info!(builder = builder.name(), "resolved pipeline builder");
            builder
        })
        .as_ref()
}

/// Name of the resolved builder, if resolution already happened.
pub fn resolved_builder_name() -> Option<&'static str> {
    RESOLVED.get().map(|builder| builder.name())
}

/// First non-default candidate wins; otherwise the default from the list;
/// otherwise a directly constructed default, so resolution cannot fail.
fn select(
    candidates: impl Iterator<Item = Box<dyn PipelineBuilder>>,
) -> Box<dyn PipelineBuilder> {
    let mut fallback = None;
    for candidate in candidates {
        if candidate.is_default() {
            fallback.get_or_insert(candidate);
        } else {
            return candidate;
        }
    }
    fallback.unwrap_or_else(|| Box::new(DefaultPipelineBuilder))
}
