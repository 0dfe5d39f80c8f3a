use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,

    // Channel settings
    pub max_message_size: usize,
    pub max_queue_length: usize,
    pub message_ttl_secs: u64,
    pub eviction_interval_secs: u64,
    pub idle_channel_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8090".parse().unwrap(),
            max_message_size: 64 * 1024, // 64KB
            max_queue_length: 16,
            message_ttl_secs: 300, // 5 minutes, outlives any handshake deadline
            eviction_interval_secs: 30,
            idle_channel_timeout_secs: 900, // 15 minutes
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("AUTHLINK_RELAY_BIND_ADDR") {
            config.bind_addr = addr.parse()?;
        }

        if let Ok(size) = std::env::var("AUTHLINK_RELAY_MAX_MESSAGE_SIZE") {
            config.max_message_size = size.parse()?;
        }

        if let Ok(len) = std::env::var("AUTHLINK_RELAY_MAX_QUEUE_LENGTH") {
            config.max_queue_length = len.parse()?;
        }

        if let Ok(ttl) = std::env::var("AUTHLINK_RELAY_MESSAGE_TTL_SECS") {
            config.message_ttl_secs = ttl.parse()?;
        }

        if let Ok(secs) = std::env::var("AUTHLINK_RELAY_EVICTION_INTERVAL_SECS") {
            config.eviction_interval_secs = secs.parse()?;
        }

        if let Ok(secs) = std::env::var("AUTHLINK_RELAY_IDLE_CHANNEL_TIMEOUT_SECS") {
            config.idle_channel_timeout_secs = secs.parse()?;
        }

        Ok(config)
    }

    pub fn from_toml(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_message_size == 0 {
            anyhow::bail!("max_message_size must be > 0");
        }

        if self.max_queue_length == 0 {
            anyhow::bail!("max_queue_length must be > 0");
        }

        if self.message_ttl_secs == 0 {
            anyhow::bail!("message_ttl_secs must be > 0");
        }

        if self.eviction_interval_secs == 0 {
            anyhow::bail!("eviction_interval_secs must be > 0");
        }

        Ok(())
    }

    pub fn message_ttl(&self) -> Duration {
        Duration::from_secs(self.message_ttl_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }

    pub fn idle_channel_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_channel_timeout_secs)
    }
}
