use crate::config::{BackendKind, StorageConfig};
use crate::logfile::LogFileRepository;
use crate::memory::InMemoryRepository;
use crate::postgres::PostgresRepository;
use shortlink_core::{
    Generator, OwnedLink, OwnerId, Repository, ResolvedUrl, SaveOutcome, ShortCode,
    ShortLinkError, StorageError,
};
use shortlink_generator::RandomGenerator;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use url::Url;

type Result<T> = std::result::Result<T, ShortLinkError>;

/// The storage engine as seen by request handlers.
///
/// Wraps exactly one backend, chosen at construction, together with the
/// code generator it draws new codes from. Cloning is cheap and clones
/// share the backend.
///
/// Every operation can be cancelled by dropping its future; with an
/// operation timeout configured, overrunning operations are dropped and
/// reported as [`ShortLinkError::Cancelled`].
#[derive(Clone)]
pub struct ShortLinkStore {
    repository: Arc<dyn Repository>,
    generator: Arc<dyn Generator>,
    operation_timeout: Option<Duration>,
}

impl ShortLinkStore {
    /// Creates a store over an already constructed backend.
    pub fn new(repository: impl Repository, generator: impl Generator) -> Self {
        Self {
            repository: Arc::new(repository),
            generator: Arc::new(generator),
            operation_timeout: None,
        }
    }

    /// Builds the backend selected by `config` with a random code generator.
    pub async fn open(config: &StorageConfig) -> Result<Self> {
        let backend = config.backend_kind();
        info!(backend = %backend, "opening short link storage");

        let repository: Arc<dyn Repository> = match backend {
            BackendKind::Postgres { dsn } => Arc::new(
                PostgresRepository::connect(&dsn, config.max_connections, config.acquire_timeout)
                    .await?,
            ),
            BackendKind::LogFile { path } => {
                let repository = tokio::task::spawn_blocking(move || LogFileRepository::open(path))
                    .await
                    .map_err(|e| StorageError::Unavailable(format!("journal replay aborted: {e}")))??;
                Arc::new(repository)
            }
            BackendKind::Memory => Arc::new(InMemoryRepository::new()),
        };

        Ok(Self {
            repository,
            generator: Arc::new(RandomGenerator::new()),
            operation_timeout: config.operation_timeout,
        })
    }

    /// Sets the deadline applied to every operation.
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StorageError>>,
    {
        let result = match self.operation_timeout {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                warn!(operation, limit_ms = limit.as_millis() as u64, "storage operation timed out");
                ShortLinkError::Cancelled(format!("{operation} exceeded {}ms", limit.as_millis()))
            })?,
            None => fut.await,
        };
        result.map_err(ShortLinkError::from)
    }

    /// Shortens `original_url` for `owner`.
    ///
    /// If the owner already has a live link for the URL, its code is
    /// returned as [`SaveOutcome::Existing`] and nothing is written.
    pub async fn save_url(&self, original_url: &str, owner: &OwnerId) -> Result<SaveOutcome> {
        validate_url(original_url)?;

        let outcome = self
            .bounded(
                "save_url",
                self.repository
                    .save(original_url, owner, self.generator.as_ref()),
            )
            .await?;

        debug!(
            code = %outcome.code(),
            owner = %owner,
            conflict = outcome.is_conflict(),
            "saved url"
        );
        Ok(outcome)
    }

    /// Resolves a code regardless of owner. Deleted links still resolve,
    /// flagged with `deleted = true`.
    pub async fn get_url(&self, code: &ShortCode) -> Result<ResolvedUrl> {
        trace!(code = %code, "resolving short code");

        match self.bounded("get_url", self.repository.get(code)).await? {
            Some(record) => Ok(record.into()),
            None => Err(ShortLinkError::NotFound(code.to_string())),
        }
    }

    /// Lists the owner's live links in creation order.
    pub async fn list_owner_urls(&self, owner: &OwnerId) -> Result<Vec<OwnedLink>> {
        let links = self
            .bounded("list_owner_urls", self.repository.list_by_owner(owner))
            .await?;

        if links.is_empty() {
            return Err(ShortLinkError::NoRecordsForOwner(owner.to_string()));
        }
        Ok(links)
    }

    /// Soft-deletes the owner's links among `codes`; anything else is
    /// ignored. Returns how many links were newly deleted.
    pub async fn delete_urls(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<u64> {
        let deleted = self
            .bounded("delete_urls", self.repository.delete(codes, owner))
            .await?;

        debug!(owner = %owner, requested = codes.len(), deleted, "deleted urls");
        Ok(deleted)
    }

    /// Shortens several URLs for `owner` with the same dedup rules as
    /// [`save_url`](Self::save_url). Keys of the result are the input URLs.
    pub async fn save_batch_urls(
        &self,
        original_urls: &[String],
        owner: &OwnerId,
    ) -> Result<HashMap<String, ShortCode>> {
        for original_url in original_urls {
            validate_url(original_url)?;
        }

        let saved = self
            .bounded(
                "save_batch_urls",
                self.repository
                    .save_batch(original_urls, owner, self.generator.as_ref()),
            )
            .await?;

        debug!(owner = %owner, entries = saved.len(), "saved url batch");
        Ok(saved
            .into_iter()
            .map(|(original_url, outcome)| (original_url, outcome.into_code()))
            .collect())
    }

    /// Checks that the backend is reachable.
    pub async fn ping(&self) -> Result<()> {
        self.bounded("ping", self.repository.ping()).await
    }

    /// Releases backend resources. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        self.repository.close().await?;
        info!("short link storage closed");
        Ok(())
    }
}

/// Validates that the URL has a valid format (http or https, with a host).
fn validate_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(ShortLinkError::InvalidUrl("URL cannot be empty".to_string()));
    }

    let lower = url.to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        let scheme = lower.split(':').next().unwrap_or_default();
        return Err(ShortLinkError::InvalidUrl(format!(
            "URL scheme must be http or https: {}",
            scheme
        )));
    }

    let parsed = Url::parse(url)
        .map_err(|e| ShortLinkError::InvalidUrl(format!("invalid URL format {}: {}", url, e)))?;
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(ShortLinkError::InvalidUrl(format!("URL has no host: {}", url)));
    }

    Ok(())
}
