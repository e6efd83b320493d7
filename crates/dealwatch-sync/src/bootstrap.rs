use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dealwatch_adapters::{
    CatalogApiConfig, CatalogSource, FacebookPlatform, FixtureCatalogSource, HttpCatalogSource, InstagramPlatform,
    MetaConfig, PlatformRegistry, PushRelayConfig, RedditConfig, RedditPlatform, TelegramConfig, TelegramPlatform,
    TwilioConfig, TwitterConfig, TwitterPlatform, WebPushRelayChannel, WhatsAppChannel,
};
use dealwatch_storage::{
    HttpClient, HttpClientConfig, IntervalPacer, JsonFileListingStore, JsonFileSubscriberDirectory, ListingStore,
    MemoryListingStore, MemorySubscriberDirectory, PgStore, SubscriberDirectory,
};
use tracing::info;

use crate::broadcast::BroadcastOrchestrator;
use crate::config::{load_categories, CatalogKind, StoreKind, SyncConfig};
use crate::notify::NotificationFanout;
use crate::orchestrator::SyncOrchestrator;

/// Every long-lived component, wired from one `SyncConfig`.
#[derive(Clone)]
pub struct AppContext {
    pub config: SyncConfig,
    pub store: Arc<dyn ListingStore>,
    pub fanout: Arc<NotificationFanout>,
    pub broadcaster: Arc<BroadcastOrchestrator>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("orchestrator", &self.orchestrator)
            .finish()
    }
}

type Stores = (Arc<dyn ListingStore>, Arc<dyn SubscriberDirectory>);

async fn open_stores(config: &SyncConfig) -> Result<Stores> {
    match config.store {
        StoreKind::Memory => {
            let listings: Arc<dyn ListingStore> = Arc::new(MemoryListingStore::new());
            let subscribers: Arc<dyn SubscriberDirectory> = Arc::new(MemorySubscriberDirectory::default());
            Ok((listings, subscribers))
        }
        StoreKind::File => {
            tokio::fs::create_dir_all(&config.data_dir)
                .await
                .with_context(|| format!("creating {}", config.data_dir.display()))?;
            let listings = JsonFileListingStore::open(config.data_dir.join("listings.json"))
                .await
                .context("opening listing file")?;
            let subscribers = JsonFileSubscriberDirectory::open(config.data_dir.join("subscribers.json"))
                .await
                .context("opening subscriber file")?;
            let listings: Arc<dyn ListingStore> = Arc::new(listings);
            let subscribers: Arc<dyn SubscriberDirectory> = Arc::new(subscribers);
            Ok((listings, subscribers))
        }
        StoreKind::Postgres => {
            let pg = PgStore::connect(&config.database_url, 5)
                .await
                .context("connecting to postgres")?;
            let pg = Arc::new(pg);
            let listings: Arc<dyn ListingStore> = pg.clone();
            let subscribers: Arc<dyn SubscriberDirectory> = pg;
            Ok((listings, subscribers))
        }
    }
}

fn http_client(config: &SyncConfig, base: HttpClientConfig) -> Result<Arc<HttpClient>> {
    let client = HttpClient::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
        ..base
    })?;
    Ok(Arc::new(client))
}

/// Social adapters from the environment; missing credentials leave a platform unconfigured.
pub fn platforms_from_env(http: Arc<HttpClient>, config: &SyncConfig) -> PlatformRegistry {
    let meta = MetaConfig::from_env();
    let batch_pacer = || Arc::new(IntervalPacer::new(config.batch_pacing));
    PlatformRegistry::new()
        .with(Arc::new(TelegramPlatform::new(http.clone(), TelegramConfig::from_env())))
        .with(Arc::new(RedditPlatform::new(http.clone(), RedditConfig::from_env())))
        .with(Arc::new(FacebookPlatform::new(http.clone(), meta.clone())))
        .with(Arc::new(InstagramPlatform::new(
            http.clone(),
            meta,
            batch_pacer(),
            Arc::new(IntervalPacer::new(config.media_poll_interval)),
        )))
        .with(Arc::new(TwitterPlatform::new(http, TwitterConfig::from_env(), batch_pacer())))
}

impl AppContext {
    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let (store, directory) = open_stores(&config).await?;

        // catalog reads may retry, publishing calls must not
        let fetch_http = http_client(&config, HttpClientConfig::default())?;
        let publish_http = http_client(&config, HttpClientConfig::default().without_retries())?;

        let catalog: Arc<dyn CatalogSource> = match config.catalog {
            CatalogKind::Fixture => Arc::new(FixtureCatalogSource::new(config.fixtures_dir.clone())),
            CatalogKind::Http => Arc::new(HttpCatalogSource::new(fetch_http, CatalogApiConfig::from_env())),
        };

        let fanout = Arc::new(NotificationFanout::new(
            directory,
            Arc::new(WebPushRelayChannel::new(publish_http.clone(), PushRelayConfig::from_env())),
            Arc::new(WhatsAppChannel::new(publish_http.clone(), TwilioConfig::from_env())),
            config.vapid_public_key.clone(),
        ));

        let registry = platforms_from_env(publish_http, &config);
        info!(configured = ?registry.configured(), "social platforms loaded");
        let broadcaster = Arc::new(BroadcastOrchestrator::new(
            registry,
            store.clone(),
            Arc::new(IntervalPacer::new(config.link_post_pacing)),
        ));

        let categories = load_categories(&config.categories_path).await?;
        let orchestrator = Arc::new(
            SyncOrchestrator::new(catalog, store.clone(), fanout.clone(), broadcaster.clone())
                .with_categories(categories)
                .with_category_pacer(Arc::new(IntervalPacer::new(config.category_pacing)))
                .with_reports_dir(config.reports_dir.clone()),
        );

        info!(
            store = ?config.store,
            catalog = ?config.catalog,
            categories = orchestrator.categories().len(),
            "dealwatch context ready"
        );
        Ok(Self {
            config,
            store,
            fanout,
            broadcaster,
            orchestrator,
        })
    }

    pub async fn from_env() -> Result<Self> {
        Self::from_config(SyncConfig::from_env()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file_config(root: &std::path::Path) -> SyncConfig {
        let mut config = SyncConfig::from_env();
        config.store = StoreKind::File;
        config.data_dir = root.join("data");
        config.catalog = CatalogKind::Fixture;
        config.fixtures_dir = PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures/catalog"));
        config.categories_path = root.join("missing.yaml");
        config.category_pacing = Duration::ZERO;
        config.reports_dir = None;
        config
    }

    #[tokio::test]
    async fn file_backed_context_runs_against_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AppContext::from_config(file_config(dir.path())).await.unwrap();
        assert_eq!(ctx.orchestrator.categories().len(), 8);

        let outcome = ctx.orchestrator.run_once().await.unwrap();
        let stats = outcome.stats().expect("completed run");
        assert!(stats.created >= 1);
        assert!(dir.path().join("data").join("listings.json").exists());
        assert_eq!(ctx.store.list_active().await.unwrap().len(), stats.created);
    }
}
