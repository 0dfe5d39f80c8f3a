use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::mailbox::ChannelMap;

pub struct RelayServer {
    config: ServerConfig,
    channels: ChannelMap,
    shutdown_tx: watch::Sender<bool>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let channels = Arc::new(dashmap::DashMap::new());
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            channels,
            shutdown_tx,
        })
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn start(&self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        info!("authlink-relay listening on {} (HTTP)", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve on an already-bound listener. Tests bind port 0 and hand
    /// the listener in here.
    pub async fn serve(&self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        // Start eviction task
        let channels = self.channels.clone();
        let config = self.config.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(Self::eviction_task(channels, config, shutdown_rx));

        let state = AppState {
            channels: self.channels.clone(),
            config: self.config.clone(),
            shutdown: self.shutdown_tx.subscribe(),
        };

        // The authenticator page posts callbacks cross-origin, so CORS
        // stays permissive.
        let app = Router::new()
            .route(
                "/v1/channel/:id",
                axum::routing::post(crate::api::post_channel).get(crate::api::get_channel),
            )
            .route("/health", axum::routing::get(crate::api::get_health))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state);

        let shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(Self::shutdown_signal(shutdown_rx))
            .await?;

        Ok(())
    }

    async fn eviction_task(
        channels: ChannelMap,
        config: ServerConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut interval = tokio::time::interval(config.eviction_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let mut expired = 0;
                    let mut idle = Vec::new();

                    for mut entry in channels.iter_mut() {
                        expired += entry.value_mut().evict_expired(config.message_ttl());
                        if entry.value().is_idle(config.idle_channel_timeout()) {
                            idle.push(entry.key().clone());
                        }
                    }

                    // Removal happens after the iterator releases its
                    // shard locks.
                    let removed = idle.len();
                    for id in idle {
                        channels.remove(&id);
                    }

                    if expired > 0 || removed > 0 {
                        info!("Evicted {} expired messages, removed {} idle channels", expired, removed);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{signal, SignalKind};
            signal(SignalKind::terminate()).ok()
        };

        tokio::select! {
            _ = async {
                #[cfg(unix)]
                {
                    if let Some(ref mut sigterm) = sigterm {
                        sigterm.recv().await;
                    }
                }
                #[cfg(not(unix))]
                {
                    std::future::pending::<()>().await;
                }
            } => {
                info!("Received SIGTERM, starting graceful shutdown");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, starting graceful shutdown");
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Shutdown requested");
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
