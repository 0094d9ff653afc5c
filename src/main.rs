use quiz_portal::{build_state, config::Config, routes::build_router};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env();
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    match config.data_dir.as_ref() {
        Some(dir) => tracing::info!(data_dir = %dir.display(), "persisting to local snapshot"),
        None => tracing::warn!("QUIZ_DATA_DIR is not set, running in memory only"),
    }

    let state = build_state(config).await?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("quiz portal listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
