use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use anirec_api::{
    api::{create_router, AppState},
    config::Config,
    db::{create_redis_client, Cache, CacheWriterHandle, RedisStore},
    services::{
        providers::{AniListProvider, CacheTtls, CatalogueProvider, FixtureProvider},
        recommendations::{Recommender, SystemClock},
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let settings = config.pipeline_settings()?;

    let (cache, writer) = create_cache(&config)?;
    let provider = create_provider(&config, cache.clone())?;

    spawn_vocabulary_refresh(
        provider.clone(),
        Duration::from_secs(config.vocabulary_refresh_secs),
    );

    let recommender = Recommender::new(provider.clone(), Arc::new(SystemClock), settings);
    let app = create_router(AppState::new(provider, recommender, cache));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, metric = ?settings.metric, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(writer) = writer {
        writer.shutdown().await;
    }
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Redis when configured, otherwise an in-process store
fn create_cache(config: &Config) -> anyhow::Result<(Cache, Option<CacheWriterHandle>)> {
    match &config.redis_url {
        Some(url) => {
            let client = create_redis_client(url)?;
            let (store, writer) = RedisStore::new(client);
            tracing::info!("Using Redis cache");
            Ok((Cache::new(Arc::new(store)), Some(writer)))
        }
        None => {
            tracing::info!("REDIS_URL not set, using in-memory cache");
            Ok((Cache::in_memory(), None))
        }
    }
}

fn create_provider(config: &Config, cache: Cache) -> anyhow::Result<Arc<dyn CatalogueProvider>> {
    if let Some(path) = &config.catalogue_fixture {
        return Ok(Arc::new(FixtureProvider::from_file(path)?));
    }

    let ttls = CacheTtls {
        user: config.user_cache_ttl_secs,
        catalogue: config.catalogue_cache_ttl_secs,
        vocabulary: config.vocabulary_cache_ttl_secs,
    };
    let provider = AniListProvider::new(
        config.anilist_api_url.clone(),
        Duration::from_secs(config.provider_timeout_secs),
        cache,
        ttls,
    )?;
    tracing::info!(url = %config.anilist_api_url, "Using AniList provider");
    Ok(Arc::new(provider))
}

/// Reloads genre and NSFW tag vocabularies on a fixed period, starting immediately
fn spawn_vocabulary_refresh(provider: Arc<dyn CatalogueProvider>, period: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
        loop {
            interval.tick().await;
            match provider.refresh_vocabulary().await {
                Ok(()) => tracing::info!(provider = provider.name(), "Vocabulary refreshed"),
                Err(e) => tracing::warn!(error = %e, "Vocabulary refresh failed"),
            }
        }
    });
}

/// Wait for SIGTERM or SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
