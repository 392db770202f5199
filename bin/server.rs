// Resolution Gateway - Web Server
// REST API over a pool of local engine handles

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use resolution_gateway::api::{build_router, AppState};
use resolution_gateway::{EngineHandle, EnginePool, LocalEngine, RefreshOutcome};

#[derive(Debug, Parser)]
#[command(name = "gateway-server", version, about = "Serve the resolution gateway REST API")]
struct ServerArgs {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(long, default_value_t = 8250)]
    port: u16,

    /// SQLite repository of resolved entities
    #[arg(long)]
    repository: PathBuf,

    /// Number of engine handles (defaults to available CPUs)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Seconds between automatic configuration checks, 0 disables
    #[arg(long, default_value_t = 0)]
    config_refresh_secs: u64,

    /// Allowed CORS origins; permissive when none are given
    #[arg(long, value_delimiter = ',')]
    allowed_origins: Vec<String>,

    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "resolution_gateway=debug,tower_http=debug"
    } else {
        "resolution_gateway=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .init();
}

fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    if origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin.trim())
                .with_context(|| format!("Invalid CORS origin: {}", origin))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(CorsLayer::new().allow_origin(AllowOrigin::list(origins)))
}

fn open_pool(args: &ServerArgs) -> Result<EnginePool> {
    if !args.repository.exists() {
        anyhow::bail!(
            "Repository not found at {} (run `resolution-gateway import` first)",
            args.repository.display()
        );
    }

    let concurrency = args.concurrency.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });
    let mut handles: Vec<EngineHandle> = Vec::with_capacity(concurrency);
    for _ in 0..concurrency.max(1) {
        let engine = LocalEngine::open(&args.repository)
            .with_context(|| format!("Failed to open engine on {}", args.repository.display()))?;
        handles.push(Box::new(engine));
    }

    Ok(EnginePool::new(handles)?)
}

fn spawn_config_refresh(pool: Arc<EnginePool>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match pool.ensure_config_current().await {
                Ok(RefreshOutcome::Refreshed { reinitialized }) if reinitialized > 0 => {
                    info!(reinitialized, "periodic config refresh")
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "periodic config refresh failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    init_tracing(args.verbose);

    println!("🌐 Resolution Gateway - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let pool = open_pool(&args)?;
    println!("✓ Repository opened: {}", args.repository.display());
    println!("✓ Engine handles: {}", pool.size());

    let state = AppState::new(pool);
    if args.config_refresh_secs > 0 {
        spawn_config_refresh(state.pool.clone(), Duration::from_secs(args.config_refresh_secs));
        println!("✓ Config refresh every {}s", args.config_refresh_secs);
    }

    let app = build_router(state, cors_layer(&args.allowed_origins)?);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("Invalid bind address: {}:{}", args.bind, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    println!("\n🚀 Server running on http://{}", addr);
    println!("   Heartbeat: http://{}/heartbeat", addr);
    println!("\n   Press Ctrl+C to stop\n");
    info!(%addr, "listening");

    axum::serve(listener, app)
        .await
        .context("Server stopped unexpectedly")?;

    Ok(())
}
