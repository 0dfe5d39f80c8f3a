use authlink_relay::config::ServerConfig;
use authlink_relay::RelayServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration
    let config = if let Ok(path) = std::env::var("AUTHLINK_RELAY_CONFIG") {
        ServerConfig::from_toml(path)?
    } else {
        ServerConfig::from_env()?
    };

    // Create and start server
    let server = RelayServer::new(config)?;
    server.start().await?;

    Ok(())
}
