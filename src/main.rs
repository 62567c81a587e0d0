use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use dlx_ledger::{Config, NoopVerifier, build_state, init_router, init_store};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let store = init_store(&config).await?;
    let state = build_state(&config, store, Arc::new(NoopVerifier));

    tokio::spawn(
        Arc::clone(&state.reconciler).run_every(config.reconcile_interval()),
    );

    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;
    let app = init_router(state);

    info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
