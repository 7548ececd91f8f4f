use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use transcription_relay::{create_router, AppState, Config};

#[derive(Debug, Parser)]
#[command(name = "transcription-relay", version, about = "Real-time transcription event relay")]
struct Cli {
    /// Config file path (extension optional)
    #[arg(short, long, default_value = "config/transcription-relay")]
    config: String,

    /// Address to bind
    #[arg(long, env = "HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Allowed CORS origins, comma separated
    #[arg(long, env = "CORS_ORIGIN", value_delimiter = ',')]
    cors_origin: Vec<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::load(&cli.config)?;
    if let Some(host) = cli.host {
        cfg.service.http.bind = host;
    }
    if let Some(port) = cli.port {
        cfg.service.http.port = port;
    }
    if !cli.cors_origin.is_empty() {
        cfg.security.cors_origins = cli.cors_origin;
    }
    if let Some(level) = cli.log_level {
        cfg.logging.level = level;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));
    info!("Broadcast policy: {:?}", cfg.websocket.broadcast_policy);

    let state = AppState::new(&cfg);
    let app = create_router(state.clone());

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server running on {}", addr);
    info!("WebSocket server ready for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(state: AppState) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
    state.shutdown();
}
