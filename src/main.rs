use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile::config::Config;
use turnstile::rules::{BreakerRule, FlowRule, RuleSet, SystemRule};
use turnstile::server::{shutdown_signal, ManagementServer};
use turnstile::Engine;

#[derive(Parser, Debug)]
#[command(
    name = "turnstile",
    about = "In-process admission control engine with an HTTP management endpoint",
    version
)]
struct Args {
    /// Management endpoint bind address (overrides TURNSTILE_BIND_ADDR)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log filter level (overrides TURNSTILE_LOG)
    #[arg(long)]
    log_level: Option<String>,

    /// Generate demo traffic against a few guarded resources
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let args = Args::parse();
    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }
    if args.demo {
        config.demo_traffic = true;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("turnstile={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting turnstile");
    tracing::info!("Configuration: bind_addr={}, demo_traffic={}", config.bind_addr, config.demo_traffic);

    let engine = Engine::new();
    if config.demo_traffic {
        seed_demo_rules(&engine).map_err(|e| anyhow::anyhow!("Failed to seed demo rules: {}", e))?;
    }

    let server = ManagementServer::new(engine.clone(), config.bind_addr);
    let handle = server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start management endpoint: {}", e))?;
    tracing::info!("Management endpoint ready at http://{}", handle.addr());

    if config.demo_traffic {
        tokio::spawn(demo_traffic(engine));
        tracing::info!("Demo traffic running; inspect /resources and /node?resource=checkout");
    }

    shutdown_signal().await;

    handle
        .stop()
        .await
        .map_err(|e| anyhow::anyhow!("Shutdown error: {}", e))?;
    tracing::info!("Shut down cleanly");

    Ok(())
}

fn seed_demo_rules(engine: &Engine) -> turnstile::TurnstileResult<()> {
    engine.rules().apply(RuleSet {
        flow: vec![
            FlowRule::concurrency("checkout", 8),
            FlowRule::per_sec("search", 30),
        ],
        breaker: vec![BreakerRule::new("payments", 0.5)],
        system: Some(SystemRule { max_concurrency: Some(64) }),
        ..RuleSet::default()
    })
}

/// Exercises a few resources forever so the management endpoint has live
/// statistics. Every seventh call is marked as a failure.
async fn demo_traffic(engine: Engine) {
    const RESOURCES: [&str; 3] = ["checkout", "search", "payments"];
    const ORIGINS: [&str; 3] = ["gateway", "mobile", "batch"];

    let mut interval = tokio::time::interval(Duration::from_millis(25));
    let mut tick: usize = 0;
    loop {
        interval.tick().await;
        tick += 1;
        let resource = RESOURCES[tick % RESOURCES.len()];
        let origin = ORIGINS[(tick / RESOURCES.len()) % ORIGINS.len()];
        match engine.try_enter_with_origin(resource, Some(origin)) {
            Ok(mut entry) => {
                tokio::time::sleep(Duration::from_millis(2)).await;
                if tick % 7 == 0 {
                    entry.mark_error();
                }
            }
            Err(_) => {}
        }
    }
}
