use anyhow::Context;

use bizgate_api::{AppConfig, build_app};
use bizgate_infra::{InMemoryIdentityStore, PostgresIdentityStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bizgate_observability::init();

    let config = AppConfig::from_env()?;

    let app = match &config.database_url {
        Some(url) => {
            let store = PostgresIdentityStore::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to DATABASE_URL")?;
            store.migrate().await.context("failed to apply migrations")?;
            tracing::info!("using postgres identity store");
            build_app(&config, store).await?
        }
        None => {
            tracing::warn!("DATABASE_URL not set; identity data lives in memory only");
            build_app(&config, InMemoryIdentityStore::new()).await?
        }
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
