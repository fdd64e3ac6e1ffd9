use crate::error::StorageError;
use crate::generator::Generator;
use crate::owner::OwnerId;
use crate::shortcode::ShortCode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A stored short link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortLinkRecord {
    pub code: ShortCode,
    /// The original URL that was shortened.
    pub original_url: String,
    /// The owner the link is scoped to.
    pub owner_id: OwnerId,
    /// Soft-delete marker. Deleted records keep resolving but are reported as gone.
    pub deleted: bool,
}

/// Answer to a global lookup by short code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUrl {
    pub original_url: String,
    pub deleted: bool,
}

impl From<ShortLinkRecord> for ResolvedUrl {
    fn from(record: ShortLinkRecord) -> Self {
        Self {
            original_url: record.original_url,
            deleted: record.deleted,
        }
    }
}

/// A live link as listed for its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedLink {
    pub code: ShortCode,
    pub original_url: String,
}

/// What a save did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// A fresh code was minted and persisted.
    Created(ShortCode),
    /// The owner already had a live link for the URL; nothing was written.
    Existing(ShortCode),
}

impl SaveOutcome {
    pub fn code(&self) -> &ShortCode {
        match self {
            SaveOutcome::Created(code) | SaveOutcome::Existing(code) => code,
        }
    }

    pub fn into_code(self) -> ShortCode {
        match self {
            SaveOutcome::Created(code) | SaveOutcome::Existing(code) => code,
        }
    }

    /// Whether the save matched an existing live record instead of minting a code.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SaveOutcome::Existing(_))
    }
}

/// A read-only view of a repository.
#[async_trait]
pub trait ReadRepository: Send + Sync + 'static {
    /// Retrieves the record for a short code, deleted or not.
    /// Returns `None` if the code was never created.
    async fn get(&self, code: &ShortCode) -> Result<Option<ShortLinkRecord>>;

    /// Lists the live links of an owner in creation order.
    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<OwnedLink>>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()>;
}

/// The storage contract every backend implements.
///
/// Saves are deduplicated per owner: if `owner` already has a live record
/// for `original_url`, its code is returned as [`SaveOutcome::Existing`].
/// Otherwise codes are drawn from `generator` until one is free, at most
/// [`MAX_GENERATION_ATTEMPTS`](crate::MAX_GENERATION_ATTEMPTS) times.
#[async_trait]
pub trait Repository: ReadRepository {
    /// Saves a single URL for an owner.
    async fn save(
        &self,
        original_url: &str,
        owner: &OwnerId,
        generator: &dyn Generator,
    ) -> Result<SaveOutcome>;

    /// Saves several URLs for an owner, in input order.
    ///
    /// Transactional backends apply the whole batch or nothing.
    async fn save_batch(
        &self,
        original_urls: &[String],
        owner: &OwnerId,
        generator: &dyn Generator,
    ) -> Result<Vec<(String, SaveOutcome)>>;

    /// Soft-deletes the given codes owned by `owner`.
    /// Codes owned by someone else or already deleted are ignored.
    /// Returns how many records were newly marked deleted.
    async fn delete(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<u64>;

    /// Releases backend resources. Calling it twice is not an error.
    async fn close(&self) -> Result<()>;
}
