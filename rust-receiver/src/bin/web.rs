//! Mailhook Web Server - inbound email webhook receiver.
//!
//! This binary mounts one webhook route per configured provider:
//! - Parses the provider's POST body
//! - Verifies the request signature where the provider signs
//! - Normalizes the payload into canonical messages
//!
//! Configuration comes from the environment; see `mailhook::Config`.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mailhook::web::{router, AppState};
use mailhook::{Config, Provider};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        providers = ?config.providers,
        require_authentication = config.require_authentication,
        mailgun_signing_configured = config.mailgun_api_key.is_some(),
        mandrill_signing_configured = config.mandrill_webhook_key.is_some(),
        "config_loaded"
    );

    if !config.require_authentication {
        for provider in config.providers.iter().copied().filter(|p| !is_signed(p, &config)) {
            warn!(provider = provider.as_str(), "receiver_accepts_unsigned_requests");
        }
    }

    // Build one receiver per provider
    let port = config.port;
    let state = AppState::new(config).context("Invalid receiver configuration")?;

    let app = router(state).layer(TraceLayer::new_for_http());

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Whether requests for this provider will be signature-checked.
fn is_signed(provider: &Provider, config: &Config) -> bool {
    match provider {
        Provider::Mailgun => config.mailgun_api_key.is_some(),
        Provider::Mandrill => config.mandrill_webhook_key.is_some(),
        Provider::Postmark | Provider::SendGrid => false,
    }
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
