use clap::Parser;
use minecraft_pe_bridge::{
    config::{Args, GatewayConfig},
    gateway,
    translation::HandlerTable,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from(Args::parse());
    let listener = gateway::bind(&config).await?;

    tracing::info!("Started");

    gateway::run(listener, Arc::new(config), Arc::new(HandlerTable::new())).await?;

    Ok(())
}
