use std::sync::Arc;
use std::time::Duration;

use serenity::http::Http;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vaultkeeper::{
    bot,
    config::AppConfig,
    crypto::PayloadCipher,
    db,
    engine::{CommandRouter, SessionManager},
    transport::Messenger,
    web,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Operator helper: print a fresh encryption key and exit.
    if std::env::args().any(|arg| arg == "--generate-key") {
        println!("{}", PayloadCipher::generate_key());
        return Ok(());
    }

    dotenvy::dotenv().ok();

    // Initialize logging first
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vaultkeeper=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting VaultKeeper v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load()?;
    info!("Configuration loaded");

    if config.discord.token.is_empty() {
        error!("Discord token not configured!");
        error!("Set VAULTKEEPER_DISCORD__TOKEN or discord.token in config/local.toml");
        return Err(anyhow::anyhow!("Discord token not configured"));
    }

    let cipher = match PayloadCipher::from_base64(&config.crypto.key) {
        Ok(cipher) => cipher,
        Err(e) => {
            error!("Encryption key missing or malformed: {}", e);
            error!("Generate one with: vaultkeeper --generate-key");
            error!("Then set VAULTKEEPER_CRYPTO__KEY or crypto.key in config/local.toml");
            return Err(anyhow::anyhow!("Encryption key not configured"));
        }
    };

    // Initialize database
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    info!("Database connected: {}", config.database.url);
    db::init_db(&pool).await?;

    // Wire the engine: one shared HTTP client backs both the gateway client
    // and the outbound transport.
    let http = Arc::new(Http::new(&config.discord.token));
    let transport = Arc::new(bot::DiscordTransport::new(http.clone()));
    let messenger = Arc::new(Messenger::new(
        transport,
        Duration::from_secs(config.engine.secret_ttl_secs),
    ));

    let manager = Arc::new(SessionManager::new(
        pool.clone(),
        cipher,
        messenger.clone(),
        config.engine.session_timeout_secs,
    ));
    let sweeper = manager.spawn_sweeper(Duration::from_secs(config.engine.sweep_interval_secs));
    let router = Arc::new(CommandRouter::new(
        manager,
        config.engine.command_prefix.clone(),
    ));

    // Health endpoint for the deployment platform
    let health_addr = format!("{}:{}", config.health.host, config.health.port);
    let listener = TcpListener::bind(&health_addr).await?;
    info!("Health endpoint listening on http://{}", health_addr);
    let health_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, web::create_router()).await {
            error!("Health server error: {}", e);
        }
    });

    let bot_result = bot::start_bot(http, router, messenger).await;

    sweeper.abort();
    health_handle.abort();

    match bot_result {
        Ok(()) => {
            info!("Discord bot shut down gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Discord bot error: {}", e);
            Err(anyhow::anyhow!("{}", e))
        }
    }
}
