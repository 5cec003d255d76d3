use tracing::info;

use archevault_server::config::Config;
use archevault_server::{app, build_state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "archevault=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    let state = build_state(&config)?;
    info!("Database ready at {}", config.db_path.display());

    let addr = config.addr()?;
    info!("Archevault server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}
