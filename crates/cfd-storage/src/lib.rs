//! Catalog snapshot cache + HTTP fetch utilities.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "cfd-storage";

const SNAPSHOT_EXT: &str = "json";

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    /// True when the newest cached body already had this hash and nothing was written.
    pub deduplicated: bool,
}

/// On-disk cache of raw catalog bodies, one directory per catalog source.
///
/// Files are named `{stamp}_{sha256}.json`, so lexical order is load order and
/// the content hash can be read back from the name.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_relative_path(
        &self,
        fetched_at: DateTime<Utc>,
        source_id: &str,
        content_hash: &str,
    ) -> PathBuf {
        let stamp = fetched_at.format("%Y%m%d_%H%M%S");
        PathBuf::from(source_id).join(format!("{stamp}_{content_hash}.{SNAPSHOT_EXT}"))
    }

    /// Cache `bytes` for `source_id` unless the newest cached body is identical.
    pub async fn store_bytes(
        &self,
        fetched_at: DateTime<Utc>,
        source_id: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredSnapshot> {
        let content_hash = sha256_hex(bytes);

        if let Some(latest) = self.latest_snapshot(source_id).await? {
            if snapshot_hash(&latest) == Some(content_hash.as_str()) {
                debug!(source_id, hash = %content_hash, "catalog body unchanged; skipping cache write");
                let relative_path = latest
                    .strip_prefix(&self.root)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| latest.clone());
                return Ok(StoredSnapshot {
                    content_hash,
                    relative_path,
                    absolute_path: latest,
                    byte_size: bytes.len(),
                    deduplicated: true,
                });
            }
        }

        let relative_path = self.snapshot_relative_path(fetched_at, source_id, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let dir = self.root.join(source_id);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating cache directory {}", dir.display()))?;
        write_atomically(&dir, &absolute_path, bytes).await?;

        Ok(StoredSnapshot {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated: false,
        })
    }

    /// Most recently stored body for `source_id`, if any.
    pub async fn load_latest(&self, source_id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(path) = self.latest_snapshot(source_id).await? else {
            return Ok(None);
        };
        debug!(path = %path.display(), "loading cached catalog snapshot");
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("reading cached snapshot {}", path.display()))?;
        Ok(Some(bytes))
    }

    async fn latest_snapshot(&self, source_id: &str) -> anyhow::Result<Option<PathBuf>> {
        let dir = self.root.join(source_id);
        let exists = fs::try_exists(&dir)
            .await
            .with_context(|| format!("checking cache directory {}", dir.display()))?;
        if !exists {
            return Ok(None);
        }

        let mut entries = fs::read_dir(&dir)
            .await
            .with_context(|| format!("listing cache directory {}", dir.display()))?;
        let mut latest: Option<PathBuf> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .with_context(|| format!("listing cache directory {}", dir.display()))?
        {
            let path = entry.path();
            // temp files start with a dot
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || path.extension().map_or(true, |ext| ext != SNAPSHOT_EXT) {
                continue;
            }
            if latest.as_ref().map_or(true, |cur| path > *cur) {
                latest = Some(path);
            }
        }
        Ok(latest)
    }
}

fn snapshot_hash(path: &Path) -> Option<&str> {
    path.file_stem()?.to_str()?.rsplit_once('_').map(|(_, hash)| hash)
}

async fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let temp_path = dir.join(format!(".{}.tmp", Uuid::new_v4()));
    let written = async {
        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        fs::rename(&temp_path, target).await
    }
    .await;

    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| format!("writing cached snapshot {}", target.display()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

impl RetryDisposition {
    /// Server errors and throttling are worth another attempt.
    pub fn for_status(status: StatusCode) -> Self {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Self::Retryable
        } else {
            Self::NonRetryable
        }
    }

    pub fn for_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Self::Retryable
        } else {
            Self::NonRetryable
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `retry` (0-based): doubling from `base_delay`, capped.
    pub fn delay_for_attempt(&self, retry: usize) -> Duration {
        let exponent = u32::try_from(retry).unwrap_or(u32::MAX);
        let factor = 2u32.saturating_pow(exponent);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// The pause before the next attempt, or `None` once retries are spent.
    fn next_delay(&self, retry: usize, disposition: RetryDisposition) -> Option<Duration> {
        (disposition == RetryDisposition::Retryable && retry < self.max_retries)
            .then(|| self.delay_for_attempt(retry))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("catalog endpoint {url} answered {status}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            FetchError::Request(err) => RetryDisposition::for_error(err),
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(RetryDisposition::for_status)
                .unwrap_or(RetryDisposition::NonRetryable),
        }
    }
}

/// GETs catalog bodies, retrying transient failures per its [`BackoffPolicy`].
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = config.user_agent {
            builder = builder.user_agent(user_agent);
        }
        Ok(Self {
            client: builder.build().context("building catalog http client")?,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_bytes(&self, load_id: Uuid, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("catalog_fetch", %load_id, url);
        self.fetch_with_retries(url).instrument(span).await
    }

    async fn fetch_with_retries(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let mut retry = 0usize;
        loop {
            let err = match self.fetch_once(url).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };
            let Some(delay) = self.backoff.next_delay(retry, err.disposition()) else {
                return Err(err);
            };
            warn!(error = %err, retry, delay_ms = delay.as_millis() as u64, "retrying catalog fetch");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let body = resp.bytes().await?.to_vec();
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }
}
