use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use bsn_client::{BsnClient, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before reading LOG_LEVEL
    dotenvy::dotenv().ok();

    // Initialize logging with a configured level
    let log_level = std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Config::from_env().context("Invalid configuration")?;
    tracing::info!("API endpoint: {}", config.api_base_url);
    tracing::debug!("Debug mode: {:?}", config.debug_mode);

    let client = BsnClient::new(config).context("Failed to create client")?;
    let auth = client.auth();

    // Ctrl-C aborts any in-flight request or pending retry
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    tracing::info!("Authenticating...");
    if let Err(e) = auth.authenticate(&cancel).await {
        tracing::error!("❌ Authentication failed: {}", e);
        if bsn_client::is_authentication_error(&e) {
            tracing::error!("   Check BS_CLIENT_ID and BS_SECRET");
        }
        anyhow::bail!("Connectivity check failed: {}", e);
    }
    if let Some(token) = auth.current_token() {
        tracing::info!(
            "✅ Authentication successful (expires {})",
            token.expires_at.to_rfc3339()
        );
    }

    let networks = auth
        .get_networks(&cancel)
        .await
        .context("Failed to list networks")?;
    tracing::info!("📊 {} networks visible:", networks.len());
    for network in &networks {
        tracing::info!("  {} (id {})", network.name, network.id);
    }

    if auth.config().default_network.is_some() {
        auth.ensure_network_set(&cancel)
            .await
            .context("Failed to bind default network")?;
        if let Some(network) = auth.current_network() {
            tracing::info!("✅ Session bound to network {}", network.name);
        }
    } else {
        tracing::info!("No default network configured (set BS_NETWORK to bind one)");
    }

    Ok(())
}
