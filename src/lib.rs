//! In-process admission control around named resources.
//!
//! Wrap each guarded call site in [`Engine::try_enter`]. Admitted calls get
//! an [`EntryGuard`] that settles statistics when dropped; rejected calls
//! get a [`Blocked`] error naming the stage and reason. Each resource is
//! checked by a pipeline of [`Stage`]s assembled once and shared by every
//! call, and an HTTP [`server::ManagementServer`] exposes statistics and
//! accepts rule changes at runtime.

pub mod builder;
pub mod command;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod node;
pub mod pipeline;
pub mod resolver;
pub mod response;
pub mod rules;
pub mod server;
pub mod stage;
pub mod stages;
pub mod window;

pub use builder::{BuilderRegistration, DefaultPipelineBuilder, PipelineBuilder, DEFAULT_STAGE_ORDER};
pub use config::Config;
pub use context::{EntryReadings, InvocationContext, Outcome};
pub use engine::{Engine, EntryGuard};
pub use error::{BlockReason, Blocked, StageFault, TurnstileError, TurnstileResult};
pub use pipeline::Pipeline;
pub use stage::{BoxedStage, Stage, Verdict};
