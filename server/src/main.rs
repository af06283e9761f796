use anyhow::Result;
use clap::Parser;
use server::auth::Authenticator;
use server::config::ServerConfig;
use server::http::{self, AppState};
use server::storage::{self, StorageConfig};
use std::sync::Arc;
use tracing::{Level, info};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();
    let config = ServerConfig::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    config.validate()?;
    info!("Starting product catalog server");

    // Initialize storage backend
    let storage_config = StorageConfig::parse(&config.store_url)?;
    info!("Using store: {}", config.store_url);
    let stores = storage::open(storage_config)?;

    let authenticator = Authenticator::new(stores.api_keys.clone());
    let added = authenticator.provision(&config.api_keys).await?;
    if added > 0 {
        info!("Provisioned {} api keys from configuration", added);
    }

    let state = Arc::new(AppState {
        products: stores.products,
        authenticator,
        limits: config.read_limits(),
    });

    http::start_server(state, &config).await?;

    info!("Product catalog server stopped");
    Ok(())
}
