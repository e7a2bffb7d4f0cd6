//! docsync synchronization server
//!
//! Runs the WebSocket endpoint that keeps collaborative documents in
//! sync: LWW field resolution, delta batching, ACK/retry delivery and
//! per-document awareness.
//!
//! Usage:
//!   docsync-server --port 8080

use anyhow::{Context, Result};
use clap::Parser;
use docsync_engine::{EngineConfig, StaticTokenVerifier};
use docsync_server::{build_router, Orchestrator, ServerConfig};
use docsync_storage::MemoryStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "docsync-server")]
#[command(about = "Real-time collaborative-state synchronization server")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Global live-connection cap
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Per-IP live-connection cap
    #[arg(long, default_value = "32")]
    max_connections_per_ip: usize,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value = "30000")]
    heartbeat_interval_ms: u64,

    /// Per-connection message rate, messages per second
    #[arg(long, default_value = "100")]
    rate_limit: f64,

    /// Per-connection burst capacity
    #[arg(long, default_value = "200")]
    rate_limit_burst: f64,

    /// Delta coalescing window in milliseconds
    #[arg(long, default_value = "50")]
    batch_window_ms: u64,

    /// Acknowledgement timeout in milliseconds
    #[arg(long, default_value = "5000")]
    ack_timeout_ms: u64,

    /// Acknowledgement retry budget
    #[arg(long, default_value = "3")]
    ack_retries: u32,

    /// Awareness idle timeout in seconds (reaper runs at the same cadence)
    #[arg(long, default_value = "30")]
    awareness_timeout_secs: u64,

    /// Require authentication before document operations
    #[arg(long)]
    auth_required: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("docsync server starting...");

    let server_config = ServerConfig {
        max_connections: args.max_connections,
        max_connections_per_ip: args.max_connections_per_ip,
        heartbeat_interval: Duration::from_millis(args.heartbeat_interval_ms),
        rate_limit_per_sec: args.rate_limit,
        rate_limit_burst: args.rate_limit_burst,
        auth_required: args.auth_required,
        ..ServerConfig::default()
    };
    let engine_config = EngineConfig {
        batch_window: Duration::from_millis(args.batch_window_ms),
        ack_timeout: Duration::from_millis(args.ack_timeout_ms),
        ack_max_retries: args.ack_retries,
        awareness_reap_interval: Duration::from_secs(args.awareness_timeout_secs),
        awareness_timeout: Duration::from_secs(args.awareness_timeout_secs),
    };

    let store = Arc::new(MemoryStore::new());
    let verifier = Arc::new(StaticTokenVerifier::new());
    let orchestrator =
        Orchestrator::new(server_config, engine_config, store, verifier, None).await;

    let app = build_router(Arc::clone(&orchestrator));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port))
        .await
        .context("Failed to bind listener")?;

    println!("\n========================================");
    println!("  docsync Server Running");
    println!("========================================");
    println!("  Port:      {}", args.port);
    println!("  Endpoint:  ws://0.0.0.0:{}/ws", args.port);
    println!("  Auth:      {}", if args.auth_required { "required" } else { "optional" });
    println!("========================================\n");

    let shutdown_orchestrator = Arc::clone(&orchestrator);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown_orchestrator.shutdown().await;
    })
    .await
    .context("server failed")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {e}");
    }
    info!("shutdown signal received");
}
