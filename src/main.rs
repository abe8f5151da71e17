use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use voice_archiver::delivery::{DirectoryDelivery, NatsDelivery, TelegramDelivery};
use voice_archiver::gateway::NatsGateway;
use voice_archiver::{
    create_router, AppState, Config, DeliveryRegistry, EncoderFactory, NatsClient, PcmFormat,
    SessionDeps, SessionRegistry,
};

#[derive(Debug, Parser)]
#[command(name = "voice-archiver", version, about = "Record voice channels into segmented clips")]
struct Cli {
    /// Configuration file, extension optional
    #[arg(short, long, default_value = "config/voice-archiver")]
    config: String,

    /// Verbose logging and transcoder diagnostics
    #[arg(long)]
    debug: bool,

    /// Do not serve the status API
    #[arg(long)]
    no_http: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::load(&cli.config)?;
    cfg.debug |= cli.debug;

    let default_level = if cfg.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!("Voice Archiver v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    info!("Working directory: {:?}", cfg.recorder.work_dir);

    let nats = NatsClient::connect(&cfg.nats.url, &cfg.service.name)
        .await
        .context("Failed to connect to NATS")?;

    let encoder = EncoderFactory::create(
        cfg.recorder.encoder,
        PcmFormat::default(),
        &cfg.recorder.ffmpeg_path,
        &cfg.recorder.bitrate,
        cfg.debug,
    );
    info!("Encoding segments with {} (.{})", encoder.name(), encoder.extension());

    let deps = SessionDeps {
        gateway: Arc::new(NatsGateway::new(nats.clone(), &cfg.nats.gateway_prefix)),
        encoder,
        deliveries: build_deliveries(&cfg, &nats),
    };
    let registry = Arc::new(SessionRegistry::start(&cfg.channels, &cfg.recorder, deps));
    if registry.is_empty() {
        warn!("No channels to record");
    }

    let shutdown = CancellationToken::new();
    let server = if cli.no_http {
        None
    } else {
        let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;
        info!("HTTP server listening on {}", addr);

        let app = create_router(AppState::new(Arc::clone(&registry)));
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
        }))
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");

    shutdown.cancel();
    registry.shutdown().await;

    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => error!("HTTP server failed: {}", e),
            Err(e) => error!("HTTP server task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    Ok(())
}

/// Deliveries available to destinations; a type whose credentials are missing
/// is left out and only channels using it are affected
fn build_deliveries(cfg: &Config, nats: &NatsClient) -> DeliveryRegistry {
    let mut deliveries = DeliveryRegistry::new();

    match cfg.telegram.token.as_deref() {
        Some(token) => match TelegramDelivery::new(token, &cfg.telegram.base_api_url) {
            Ok(telegram) => deliveries.register("telegram", Arc::new(telegram)),
            Err(e) => error!("Telegram delivery disabled: {:#}", e),
        },
        None => warn!("No Telegram bot token configured, telegram destinations are unavailable"),
    }

    deliveries.register(
        "nats",
        Arc::new(NatsDelivery::new(nats.clone(), &cfg.nats.segment_prefix)),
    );
    deliveries.register("directory", Arc::new(DirectoryDelivery::new(&cfg.archive.root)));

    info!("Delivery types available: {:?}", deliveries.kinds());
    deliveries
}
