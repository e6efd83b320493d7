use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dealwatch_core::{CategoryScan, ListingDraft};
use dealwatch_storage::HttpClient;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::{env_var, AdapterError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogQuery {
    pub category: String,
    pub search_index: String,
    pub keywords: String,
    pub min_discount: u32,
    pub max_price: Option<f64>,
    pub min_price: Option<f64>,
    pub page: u32,
}

impl CatalogQuery {
    pub fn for_category(scan: &CategoryScan) -> Self {
        Self {
            category: scan.name.clone(),
            search_index: scan.search_index.clone(),
            keywords: scan.keywords.clone(),
            min_discount: scan.min_discount,
            max_price: None,
            min_price: None,
            page: 1,
        }
    }

    /// Discount floor and price bounds, the filters every source applies.
    pub fn accepts(&self, draft: &ListingDraft) -> bool {
        if draft.discount_percentage() < self.min_discount {
            return false;
        }
        if self.min_price.is_some_and(|min| draft.current_price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| draft.current_price > max) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogPage {
    pub listings: Vec<ListingDraft>,
    pub total_count: usize,
}

impl CatalogPage {
    pub fn empty() -> Self {
        Self::default()
    }

    fn filtered(query: &CatalogQuery, drafts: impl IntoIterator<Item = ListingDraft>) -> Self {
        let listings: Vec<ListingDraft> = drafts
            .into_iter()
            .map(|mut d| {
                if d.category.is_empty() {
                    d.category = query.category.clone();
                }
                d
            })
            .filter(|d| query.accepts(d))
            .collect();
        Self {
            total_count: listings.len(),
            listings,
        }
    }
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &CatalogQuery) -> Result<CatalogPage, AdapterError>;
}

/// In-memory catalog keyed by category; contents can be swapped between runs.
#[derive(Debug, Default)]
pub struct StaticCatalogSource {
    by_category: RwLock<BTreeMap<String, Vec<ListingDraft>>>,
    calls: AtomicUsize,
}

impl StaticCatalogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: &str, drafts: Vec<ListingDraft>) -> Self {
        self.by_category
            .get_mut()
            .insert(category.to_string(), drafts);
        self
    }

    pub async fn replace(&self, category: &str, drafts: Vec<ListingDraft>) {
        self.by_category
            .write()
            .await
            .insert(category.to_string(), drafts);
    }

    /// Number of `search` calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for StaticCatalogSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn search(&self, query: &CatalogQuery) -> Result<CatalogPage, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let drafts = self
            .by_category
            .read()
            .await
            .get(&query.category)
            .cloned()
            .unwrap_or_default();
        Ok(CatalogPage::filtered(query, drafts))
    }
}

/// Reads `<root>/<category>.json`, a JSON array of listing drafts.
#[derive(Debug, Clone)]
pub struct FixtureCatalogSource {
    root: PathBuf,
}

impl FixtureCatalogSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, category: &str) -> PathBuf {
        self.root.join(format!("{category}.json"))
    }
}

#[async_trait]
impl CatalogSource for FixtureCatalogSource {
    fn name(&self) -> &'static str {
        "fixture"
    }

    async fn search(&self, query: &CatalogQuery) -> Result<CatalogPage, AdapterError> {
        let path = self.path_for(&query.category);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no fixture for category");
                return Ok(CatalogPage::empty());
            }
            Err(source) => return Err(AdapterError::Io { path, source }),
        };
        let drafts: Vec<ListingDraft> = serde_json::from_slice(&bytes)?;
        Ok(CatalogPage::filtered(query, drafts))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub partner_tag: Option<String>,
}

impl CatalogApiConfig {
    pub fn from_env() -> Option<Self> {
        Some(Self {
            base_url: env_var("CATALOG_API_URL")?.trim_end_matches('/').to_string(),
            api_key: env_var("CATALOG_API_KEY"),
            partner_tag: env_var("CATALOG_PARTNER_TAG"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct DealsResponse {
    #[serde(default)]
    items: Vec<ListingDraft>,
    #[serde(default)]
    total_results: Option<usize>,
}

/// JSON deals API. Returns an empty page when unconfigured or when the
/// upstream call fails, so a catalog outage never aborts a sync run.
#[derive(Debug, Clone)]
pub struct HttpCatalogSource {
    http: Arc<HttpClient>,
    config: Option<CatalogApiConfig>,
}

impl HttpCatalogSource {
    pub fn new(http: Arc<HttpClient>, config: Option<CatalogApiConfig>) -> Self {
        Self { http, config }
    }

    async fn fetch(&self, config: &CatalogApiConfig, query: &CatalogQuery) -> Result<CatalogPage, AdapterError> {
        let url = format!("{}/deals", config.base_url);
        let mut params: Vec<(&str, String)> = vec![
            ("search_index", query.search_index.clone()),
            ("keywords", query.keywords.clone()),
            ("min_discount", query.min_discount.to_string()),
            ("page", query.page.to_string()),
        ];
        if let Some(min) = query.min_price {
            params.push(("min_price", format!("{min:.2}")));
        }
        if let Some(max) = query.max_price {
            params.push(("max_price", format!("{max:.2}")));
        }
        if let Some(tag) = &config.partner_tag {
            params.push(("partner_tag", tag.clone()));
        }

        let response = self
            .http
            .execute("catalog", |client| {
                let request = client.get(&url).query(&params);
                match &config.api_key {
                    Some(key) => request.bearer_auth(key),
                    None => request,
                }
            })
            .await?
            .error_for_status()?;
        let body: DealsResponse = response.json()?;
        let mut page = CatalogPage::filtered(query, body.items);
        if let Some(total) = body.total_results {
            page.total_count = total.max(page.listings.len());
        }
        Ok(page)
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn search(&self, query: &CatalogQuery) -> Result<CatalogPage, AdapterError> {
        let Some(config) = &self.config else {
            warn!(category = %query.category, "catalog api not configured, returning empty page");
            return Ok(CatalogPage::empty());
        };
        match self.fetch(config, query).await {
            Ok(page) => Ok(page),
            Err(err) => {
                warn!(category = %query.category, error = %err, "catalog search failed, returning empty page");
                Ok(CatalogPage::empty())
            }
        }
    }
}
