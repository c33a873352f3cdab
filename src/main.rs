use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use movie_match::{
    create_router,
    db::{create_pool, create_redis_client, Cache, MatchStore, MemoryStore, PgStore},
    services::catalog::{CatalogProvider, StoreCatalog, TmdbCatalog},
    AppState, Config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "movie_match=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    let store: Arc<dyn MatchStore> = match &config.database_url {
        Some(database_url) => {
            let pool = create_pool(database_url).await?;
            tracing::info!("Using PostgreSQL store");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store; data is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    let (catalog, cache_handle) = match &config.tmdb_api_key {
        Some(api_key) => {
            let redis_client = create_redis_client(&config.redis_url)?;
            let (cache, cache_handle) = Cache::new(redis_client).await;
            let catalog: Arc<dyn CatalogProvider> = Arc::new(TmdbCatalog::new(
                cache,
                api_key.clone(),
                config.tmdb_api_url.clone(),
                config.tmdb_image_base_url.clone(),
            ));
            (catalog, Some(cache_handle))
        }
        None => {
            tracing::info!("TMDB_API_KEY not set, serving item details from the items table");
            let catalog: Arc<dyn CatalogProvider> = Arc::new(StoreCatalog::new(store.clone()));
            (catalog, None)
        }
    };

    let (state, notifier_handle) = AppState::new(store, catalog, &config);
    let app = create_router(state, config.request_timeout());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Draining notifications");
    notifier_handle.shutdown().await;
    if let Some(cache_handle) = cache_handle {
        cache_handle.shutdown().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
