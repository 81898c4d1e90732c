//! Live Leaderboard Server
//!
//! Main entry point. Wires the action-auth components, the score
//! runtime, and the HTTP/WebSocket surfaces together; owns the
//! lifecycle of every shared handle (store handles are injected from
//! here, never hidden globals).

use anyhow::Result;
use api_server::{
    ApiContext, BroadcastCoordinator, HttpApiServer, RoomRegistry, WebSocketServer,
};
use action_auth::{
    ActionTokenIssuer, ActionValidator, ConsumedActions, RateLimiter, RateLimiterConfig,
    ScoringTable,
};
use clap::Parser;
use score_runtime::{RankingEngine, ScoreLedger, SubmissionPipeline};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::ServerConfig;

/// Live leaderboard service
#[derive(Parser, Debug)]
#[command(name = "leaderboardd")]
#[command(about = "Real-time leaderboard with replay-safe score submission", long_about = None)]
struct Args {
    /// HTTP API bind address
    #[arg(long, default_value = "127.0.0.1:8080")]
    http_addr: String,

    /// WebSocket bind address
    #[arg(long, default_value = "127.0.0.1:8081")]
    ws_addr: String,

    /// Token signing secret; a random one is generated when omitted
    #[arg(long, env = "LEADERBOARD_SECRET")]
    secret: Option<String>,

    /// Action token validity window in milliseconds
    #[arg(long, default_value = "600000")]
    token_window_ms: i64,

    /// Size of the broadcast leaderboard window
    #[arg(long, default_value = "10")]
    top_k: usize,

    /// Per-user submissions allowed per minute
    #[arg(long, default_value = "10")]
    per_user_limit: u32,

    /// Per-source-address submissions allowed per minute
    #[arg(long, default_value = "100")]
    per_source_limit: u32,

    /// Global submissions allowed per second
    #[arg(long, default_value = "10000")]
    global_limit: u32,

    /// Seconds between sweeps of expired consume markers and stale
    /// rate-limit windows
    #[arg(long, default_value = "60")]
    sweep_interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn to_config(&self) -> ServerConfig {
        ServerConfig {
            http_addr: self.http_addr.clone(),
            ws_addr: self.ws_addr.clone(),
            token_window_ms: self.token_window_ms,
            top_k: self.top_k,
            per_user_limit: self.per_user_limit,
            per_source_limit: self.per_source_limit,
            global_limit: self.global_limit,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.to_config();
    tracing::info!("Starting live leaderboard server");
    tracing::info!("  HTTP API: {}", config.http_addr);
    tracing::info!("  WebSocket: {}", config.ws_addr);
    tracing::info!("  Token window: {}ms", config.token_window_ms);
    tracing::info!("  Broadcast top-K: {}", config.top_k);

    let secret = match args.secret {
        Some(secret) => secret.into_bytes(),
        None => {
            tracing::warn!("No signing secret configured, generating an ephemeral one");
            ActionTokenIssuer::random_secret()
        }
    };

    // Action authorization
    let issuer = ActionTokenIssuer::new(secret.clone(), ScoringTable::default())
        .with_window_ms(config.token_window_ms);
    let consumed = Arc::new(ConsumedActions::new(config.token_window_ms));
    let validator = ActionValidator::new(secret, consumed.clone());
    let rate_limiter = RateLimiter::new(RateLimiterConfig {
        per_user_limit: config.per_user_limit,
        per_source_limit: config.per_source_limit,
        global_limit: config.global_limit,
        ..RateLimiterConfig::default()
    });

    // Score state
    let ledger = Arc::new(ScoreLedger::new());
    let ranking = Arc::new(RankingEngine::new());
    let (pipeline, events) =
        SubmissionPipeline::new(validator, rate_limiter, ledger.clone(), ranking.clone());
    let pipeline = Arc::new(pipeline);

    // Broadcast side
    let rooms = Arc::new(RoomRegistry::new());
    let coordinator =
        BroadcastCoordinator::new(rooms.clone(), ranking.clone(), ledger.clone(), config.top_k);
    let coordinator_handle = tokio::spawn(async move {
        coordinator.run(events).await;
    });

    // Periodic sweep of expired consume markers and stale rate windows
    let sweep_consumed = consumed.clone();
    let sweep_pipeline = pipeline.clone();
    let sweep_interval = Duration::from_secs(args.sweep_interval_secs.max(1));
    let sweeper_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            let now = action_auth::now_ms();
            let purged = sweep_consumed.purge_expired(now);
            if purged > 0 {
                tracing::debug!(purged, "Swept expired consume markers");
            }
            sweep_pipeline.purge_stale_rate_windows(now);
        }
    });

    // HTTP API server
    let api_context = Arc::new(ApiContext {
        issuer,
        pipeline: pipeline.clone(),
        ledger: ledger.clone(),
        ranking: ranking.clone(),
    });
    let http_addr = config.http_addr.clone();
    let http_handle = tokio::spawn(async move {
        let server = HttpApiServer::new(api_context);
        if let Err(e) = server.run(&http_addr).await {
            tracing::error!("HTTP API server error: {}", e);
        }
    });

    // WebSocket server
    let ws_rooms = rooms.clone();
    let ws_addr = config.ws_addr.clone();
    let ws_handle = tokio::spawn(async move {
        let server = WebSocketServer::new(ws_rooms);
        if let Err(e) = server.run(&ws_addr).await {
            tracing::error!("WebSocket server error: {}", e);
        }
    });

    tracing::info!("Leaderboard server running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    tracing::info!(
        "  {} users, {} transactions recorded",
        ledger.user_count(),
        ledger.transaction_count()
    );

    coordinator_handle.abort();
    sweeper_handle.abort();
    http_handle.abort();
    ws_handle.abort();

    tracing::info!("Leaderboard server stopped");

    Ok(())
}
