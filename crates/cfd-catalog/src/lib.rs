//! Catalog source contracts + bundled, file and HTTP catalog implementations.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use cfd_core::Campaign;
use cfd_storage::{sha256_hex, FetchError, HttpClientConfig, HttpFetcher, SnapshotStore};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cfd-catalog";

/// The mock catalog shipped with the crate, used when no other source is configured.
pub const BUNDLED_CATALOG_JSON: &str = include_str!("../fixtures/campaigns.json");

pub const BUNDLED_SOURCE_ID: &str = "bundled";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("reading catalog file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing catalog from {source_id}: {source}")]
    Parse {
        source_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// An immutable, fingerprinted catalog handed to the discovery engine.
#[derive(Debug, Clone)]
pub struct CatalogSnapshot {
    pub load_id: Uuid,
    pub source_id: String,
    pub loaded_at: DateTime<Utc>,
    pub fingerprint: String,
    /// Set when the live source failed and a cached body was served instead.
    pub stale: bool,
    pub campaigns: Arc<Vec<Campaign>>,
}

impl CatalogSnapshot {
    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}

/// Outcome of a catalog load, kept distinct so callers can render each case.
#[derive(Debug, Clone)]
pub enum CatalogState {
    Ready(CatalogSnapshot),
    Empty { source_id: String },
    Failed { source_id: String, reason: String },
}

impl CatalogState {
    pub fn snapshot(&self) -> Option<&CatalogSnapshot> {
        match self {
            CatalogState::Ready(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn load(&self) -> Result<CatalogSnapshot, CatalogError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Wrapped { campaigns: Vec<Campaign> },
    Bare(Vec<Campaign>),
}

/// Parse a catalog body (`{"campaigns": [...]}` or a bare array) into a snapshot.
pub fn parse_catalog_bytes(source_id: &str, bytes: &[u8]) -> Result<CatalogSnapshot, CatalogError> {
    let document: CatalogDocument =
        serde_json::from_slice(bytes).map_err(|source| CatalogError::Parse {
            source_id: source_id.to_string(),
            source,
        })?;
    let campaigns = match document {
        CatalogDocument::Wrapped { campaigns } => campaigns,
        CatalogDocument::Bare(campaigns) => campaigns,
    };
    Ok(CatalogSnapshot {
        load_id: Uuid::new_v4(),
        source_id: source_id.to_string(),
        loaded_at: Utc::now(),
        fingerprint: sha256_hex(bytes),
        stale: false,
        campaigns: Arc::new(sanitize_campaigns(campaigns)),
    })
}

/// Drop records the engine cannot rank: duplicate ids and negative or non-finite amounts.
pub fn sanitize_campaigns(campaigns: Vec<Campaign>) -> Vec<Campaign> {
    let mut seen = HashSet::with_capacity(campaigns.len());
    campaigns
        .into_iter()
        .filter(|c| {
            let amounts_ok = c.funding_goal.is_finite()
                && c.current_amount.is_finite()
                && c.funding_goal >= 0.0
                && c.current_amount >= 0.0;
            if !amounts_ok {
                warn!(id = %c.id, "dropping campaign with invalid funding amounts");
                return false;
            }
            if !seen.insert(c.id.clone()) {
                warn!(id = %c.id, "dropping campaign with duplicate id");
                return false;
            }
            true
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FixtureCatalog;

#[async_trait]
impl CatalogSource for FixtureCatalog {
    fn source_id(&self) -> &str {
        BUNDLED_SOURCE_ID
    }

    async fn load(&self) -> Result<CatalogSnapshot, CatalogError> {
        parse_catalog_bytes(BUNDLED_SOURCE_ID, BUNDLED_CATALOG_JSON.as_bytes())
    }
}

/// The bundled catalog, parsed synchronously.
pub fn bundled_catalog() -> Result<CatalogSnapshot, CatalogError> {
    parse_catalog_bytes(BUNDLED_SOURCE_ID, BUNDLED_CATALOG_JSON.as_bytes())
}

#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
    source_id: String,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let source_id = format!("file:{}", path.display());
        Self { path, source_id }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CatalogSource for FileCatalog {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn load(&self) -> Result<CatalogSnapshot, CatalogError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| CatalogError::Io {
                path: self.path.clone(),
                source,
            })?;
        parse_catalog_bytes(&self.source_id, &bytes)
    }
}

/// Remote JSON catalog with a last-known-good fallback from the snapshot cache.
#[derive(Debug)]
pub struct HttpCatalog {
    url: String,
    source_id: String,
    http: HttpFetcher,
    cache: Option<SnapshotStore>,
}

impl HttpCatalog {
    pub fn new(url: impl Into<String>, http: HttpFetcher, cache: Option<SnapshotStore>) -> Self {
        Self {
            url: url.into(),
            source_id: "remote".to_string(),
            http,
            cache,
        }
    }

    async fn load_live(&self, load_id: Uuid) -> Result<CatalogSnapshot, CatalogError> {
        let response = self.http.fetch_bytes(load_id, &self.url).await?;
        let mut snapshot = parse_catalog_bytes(&self.source_id, &response.body)?;
        snapshot.load_id = load_id;
        if let Some(cache) = &self.cache {
            if let Err(err) = cache
                .store_bytes(snapshot.loaded_at, &self.source_id, &response.body)
                .await
            {
                warn!(error = %err, "failed to cache catalog snapshot");
            }
        }
        Ok(snapshot)
    }

    async fn load_cached(&self) -> anyhow::Result<Option<CatalogSnapshot>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let Some(bytes) = cache.load_latest(&self.source_id).await? else {
            return Ok(None);
        };
        let mut snapshot = parse_catalog_bytes(&self.source_id, &bytes)
            .context("parsing cached catalog snapshot")?;
        snapshot.stale = true;
        Ok(Some(snapshot))
    }
}

#[async_trait]
impl CatalogSource for HttpCatalog {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn load(&self) -> Result<CatalogSnapshot, CatalogError> {
        let load_id = Uuid::new_v4();
        match self.load_live(load_id).await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => match self.load_cached().await {
                Ok(Some(snapshot)) => {
                    warn!(error = %err, fingerprint = %snapshot.fingerprint, "serving cached catalog");
                    Ok(snapshot)
                }
                Ok(None) => Err(err),
                Err(cache_err) => {
                    warn!(error = %cache_err, "catalog cache unavailable");
                    Err(err)
                }
            },
        }
    }
}

/// Load a catalog and classify the result for the caller.
pub async fn load_catalog(source: &dyn CatalogSource) -> CatalogState {
    match source.load().await {
        Ok(snapshot) if snapshot.is_empty() => {
            warn!(source_id = source.source_id(), "catalog is empty");
            CatalogState::Empty {
                source_id: source.source_id().to_string(),
            }
        }
        Ok(snapshot) => {
            info!(
                source_id = source.source_id(),
                load_id = %snapshot.load_id,
                campaigns = snapshot.len(),
                fingerprint = %snapshot.fingerprint,
                stale = snapshot.stale,
                "catalog loaded"
            );
            CatalogState::Ready(snapshot)
        }
        Err(err) => {
            warn!(source_id = source.source_id(), error = %err, "catalog load failed");
            CatalogState::Failed {
                source_id: source.source_id().to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub catalog_path: Option<PathBuf>,
    pub catalog_url: Option<String>,
    pub cache_dir: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_path: None,
            catalog_url: None,
            cache_dir: PathBuf::from("./cache/catalog"),
            user_agent: "cfd-bot/0.1".to_string(),
            http_timeout_secs: 20,
        }
    }
}

impl CatalogConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            catalog_path: std::env::var("CFD_CATALOG_PATH").ok().map(PathBuf::from),
            catalog_url: std::env::var("CFD_CATALOG_URL").ok(),
            cache_dir: std::env::var("CFD_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            user_agent: std::env::var("CFD_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("CFD_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
        }
    }
}

/// Pick a catalog source: URL first, then file path, then the bundled fixture.
pub fn source_from_config(config: &CatalogConfig) -> anyhow::Result<Box<dyn CatalogSource>> {
    if let Some(url) = &config.catalog_url {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let cache = SnapshotStore::new(config.cache_dir.clone());
        return Ok(Box::new(HttpCatalog::new(url.clone(), http, Some(cache))));
    }
    if let Some(path) = &config.catalog_path {
        return Ok(Box::new(FileCatalog::new(path.clone())));
    }
    Ok(Box::new(FixtureCatalog))
}
