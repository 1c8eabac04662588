//! Implements the gateway server. This accepts Java clients over TCP
//! and gives each one its own connection task and PE bridge.

use crate::{config::GatewayConfig, connection, translation::HandlerTable};
use anyhow::Context;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::Instrument;

/// Binds the configured listen address.
pub async fn bind(config: &GatewayConfig) -> anyhow::Result<TcpListener> {
    TcpListener::bind(config.listen_address)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_address))
}

/// Runs a gateway server on the given listener.
pub async fn run(
    listener: TcpListener,
    config: Arc<GatewayConfig>,
    handlers: Arc<HandlerTable>,
) -> anyhow::Result<()> {
    tracing::info!(
        "Accepting Java clients on {}, forwarding to {}",
        listener.local_addr()?,
        config.target()
    );
    loop {
        let (stream, address) = listener.accept().await.context("listener closed")?;

        tracing::info!("Accepted connection from {address}");
        let config = Arc::clone(&config);
        let handlers = Arc::clone(&handlers);
        tokio::spawn(
            async move {
                if let Err(e) = connection::drive(stream, config, handlers).await {
                    tracing::info!("Connection lost: {e:?}");
                }
            }
            .instrument(tracing::info_span!("connection", peer = %address)),
        );
    }
}
