use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use simplechat_server::auth::identity::JwtIdentityProvider;
use simplechat_server::config::ServerConfig;
use simplechat_server::db::pool::{create_pool, run_migrations};
use simplechat_server::engine::alerts::Alerter;
use simplechat_server::engine::chat_engine::ChatEngine;
use simplechat_server::web::app_state::AppState;
use simplechat_server::web::router::build_router;

#[derive(Debug, Parser)]
#[command(name = "simplechat-server", version, about = "SimpleChat backend")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "simplechat.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;
    let auth_config = config.to_auth_config();
    if auth_config.uses_dev_secrets() {
        warn!("Using development secrets; set JWT_SECRET and IDENTITY_SECRET in production");
    }

    // Initialize database
    let pool = create_pool(&config.database.url, config.database.max_connections)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;

    let alerter = Alerter::new(config.alerts.webhook_url.clone());
    let identity = Arc::new(JwtIdentityProvider::new(
        auth_config.identity_secret.clone(),
        auth_config.identity_issuer.clone(),
    ));
    let engine = Arc::new(ChatEngine::new(
        pool.clone(),
        identity,
        alerter,
        config.engine_settings(),
    ));

    let shutdown = CancellationToken::new();
    let app_state = Arc::new(AppState {
        engine,
        auth_config,
        shutdown: shutdown.clone(),
    });
    let app = build_router(app_state);

    let web_addr = &config.server.web_address;
    let listener = tokio::net::TcpListener::bind(web_addr.as_str())
        .await
        .with_context(|| format!("failed to bind web listener on {web_addr}"))?;
    info!(%web_addr, "SimpleChat server starting");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
            }
            info!("Shutdown requested, closing subscriptions");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    pool.close().await;
    info!("SimpleChat server stopped");
    Ok(())
}
