//! Holdbox - Capture server entry point

use anyhow::{Context, Result};
use holdbox_api::AppState;
use holdbox_common::config::{Config, LoggingConfig, RelayConfig};
use holdbox_core::{RelayPolicy, ReleasePipeline, SmtpRelayTransport, SmtpServer};
use holdbox_storage::{DatabasePool, MessageRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Holdbox capture server...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;
    info!("Database connection established");

    // Run migrations
    db_pool.migrate().await?;
    info!("Database migrations completed");

    let messages = MessageRepository::new(db_pool.clone());

    // Outbound relay for releasing captured messages
    let release = match &config.relay {
        Some(relay) => Some(build_release_pipeline(relay, messages.clone())?),
        None => {
            info!("No relay configured, message release disabled");
            None
        }
    };

    // Start SMTP capture listener
    let smtp_handle = {
        let smtp_server = SmtpServer::new(&config, messages);
        tokio::spawn(async move {
            if let Err(e) = smtp_server.run().await {
                error!("SMTP server error: {}", e);
            }
        })
    };

    // Start API server
    let api_addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("Failed to bind API server on {}", api_addr))?;

    let mut state = AppState::new(db_pool).with_api_keys(config.api.api_keys.clone());
    if let Some(release) = release {
        state = state.with_release(release);
    }
    let app = holdbox_api::create_router(state);

    let api_handle = tokio::spawn(async move {
        info!("Starting API server on {}", api_addr);
        if let Err(e) = axum::serve(listener, app).await {
            error!("API server error: {}", e);
        }
    });

    info!("Holdbox server started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    smtp_handle.abort();
    api_handle.abort();

    info!("Holdbox server shutdown complete");

    Ok(())
}

fn build_release_pipeline(
    relay: &RelayConfig,
    messages: MessageRepository,
) -> Result<Arc<ReleasePipeline>> {
    let policy = RelayPolicy::from_config(relay)?;
    let transport = SmtpRelayTransport::from_config(relay)?;

    info!(
        host = %relay.host,
        port = relay.port,
        restricted = policy.allowed_recipients().is_some(),
        return_path = policy.return_path().is_some(),
        "Message release enabled"
    );

    let pipeline = ReleasePipeline::new(Arc::new(messages), Arc::new(transport), Arc::new(policy))
        .with_timeout(Duration::from_secs(relay.timeout_secs));

    Ok(Arc::new(pipeline))
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_level(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
