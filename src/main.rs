use std::sync::Arc;
use std::time::Duration;

use cinematch_api::api::{create_router, AppState};
use cinematch_api::config::Config;
use cinematch_api::db::{create_pool, create_redis_client, Cache, PgStore};
use cinematch_api::services::catalog::TmdbProvider;
use cinematch_api::services::generator::OpenAiGenerator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cinematch_api=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let timeout = Duration::from_secs(config.provider_timeout_secs);

    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database pool ready, migrations applied");

    let redis_client = create_redis_client(&config.redis_url)?;
    let (cache, cache_writer) = Cache::new(redis_client).await;

    let store = Arc::new(PgStore::new(pool));
    let catalog = Arc::new(TmdbProvider::new(
        config.tmdb_api_key.clone(),
        config.tmdb_api_url.clone(),
        timeout,
        cache,
    ));
    let generator = Arc::new(OpenAiGenerator::new(
        config.generator_api_key.clone(),
        config.generator_api_url.clone(),
        config.generator_model.clone(),
        timeout,
    ));

    let state = AppState::new(store, generator, catalog, config.region.clone());
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Server listening");

    axum::serve(listener, app).await?;

    cache_writer.shutdown().await;
    Ok(())
}
