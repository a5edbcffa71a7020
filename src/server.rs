//! HTTP management endpoint.
//!
//! Commands registered before [`ManagementServer::start`] are mounted under
//! `/{name}` for both GET and POST. The server runs on its own task; the
//! returned handle stops it gracefully.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::command::{CommandHandler, CommandRegistry, CommandRequest};
use crate::engine::Engine;
use crate::error::{TurnstileError, TurnstileResult};
use crate::middleware::logging_middleware;
use crate::response::CommandResponse;

pub struct ManagementServer {
    engine: Engine,
    registry: CommandRegistry,
    addr: SocketAddr,
}

impl ManagementServer {
    /// Server with the built-in commands.
    pub fn new(engine: Engine, addr: SocketAddr) -> Self {
        Self { engine, registry: CommandRegistry::with_defaults(), addr }
    }

    pub fn with_registry(engine: Engine, addr: SocketAddr, registry: CommandRegistry) -> Self {
        Self { engine, registry, addr }
    }

    /// Adds a command. Must be called before `start`; the route table is
    /// fixed once the server is listening.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        self.registry.register(handler);
    }

    /// Binds the listener and serves commands on a background task. A bind
    /// failure is returned to the caller, not swallowed.
    pub async fn start(self) -> TurnstileResult<ManagementHandle> {
        let router = management_router(self.engine, &self.registry);
        let listener = TcpListener::bind(self.addr).await?;
        let addr = listener.local_addr()?;
        info!(
            target: "turnstile::management",
            addr = %addr,
            commands = ?self.registry.names(),
            "management endpoint listening"
        );

        let (shutdown, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await
        });

        Ok(ManagementHandle { addr, shutdown, task })
    }
}

/// Running management endpoint. Dropping the handle without calling `stop`
/// leaves the server running for the life of the process.
pub struct ManagementHandle {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<(), std::io::Error>>,
}

impl ManagementHandle {
    /// Actual bound address, useful when binding to port 0.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signals shutdown and waits for in-flight requests to drain.
    pub async fn stop(self) -> TurnstileResult<()> {
        let _ = self.shutdown.send(());
        match self.task.await {
            Ok(result) => result.map_err(TurnstileError::from),
            Err(e) => Err(TurnstileError::Internal(format!("management task failed: {}", e))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct CommandSummary {
    command: String,
    description: String,
}

/// Router serving every registered command, plus an index at `/`.
pub fn management_router(engine: Engine, registry: &CommandRegistry) -> Router {
    let mut router: Router<Engine> = Router::new();

    for handler in registry.handlers() {
        let path = format!("/{}", handler.name());

        let get_handler = {
            let handler = Arc::clone(handler);
            move |State(engine): State<Engine>, Query(params): Query<HashMap<String, String>>| {
                let handler = Arc::clone(&handler);
                async move { handler.handle(&engine, &CommandRequest { params, body: None }) }
            }
        };

        let post_handler = {
            let handler = Arc::clone(handler);
            move |State(engine): State<Engine>,
                  Query(params): Query<HashMap<String, String>>,
                  Json(body): Json<Value>| {
                let handler = Arc::clone(&handler);
                async move {
                    handler.handle(&engine, &CommandRequest { params, body: Some(body) })
                }
            }
        };

        router = router.route(&path, get(get_handler).post(post_handler));
    }

    let commands: Vec<CommandSummary> = registry
        .handlers()
        .map(|handler| CommandSummary {
            command: handler.name().to_string(),
            description: handler.description().to_string(),
        })
        .collect();
    let index = move || {
        let commands = commands.clone();
        async move { CommandResponse::ok(commands) }
    };
    router = router.route("/", get(index));

    router.with_state(engine).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .layer(middleware::from_fn(logging_middleware)),
    )
}

/// Resolves when the process receives Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("received terminate signal, shutting down");
        },
    }
}
