use async_trait::async_trait;
use parking_lot::Mutex;
use shortlink_core::repository::Result;
use shortlink_core::{
    Generator, OwnedLink, OwnerId, ReadRepository, Repository, SaveOutcome, ShortCode,
    ShortLinkRecord, StorageError, MAX_GENERATION_ATTEMPTS,
};
use std::collections::HashMap;
use tracing::{debug, trace};

/// Per-owner bookkeeping: creation order and the live `url -> code` index
/// used for deduplication.
#[derive(Debug, Default)]
struct OwnerIndex {
    codes: Vec<ShortCode>,
    live: HashMap<String, ShortCode>,
}

/// The whole in-memory state. Every method assumes the caller holds the lock.
#[derive(Debug, Default)]
pub(crate) struct MemoryState {
    records: HashMap<ShortCode, ShortLinkRecord>,
    owners: HashMap<OwnerId, OwnerIndex>,
    order: Vec<ShortCode>,
}

impl MemoryState {
    fn live_code(&self, owner: &OwnerId, original_url: &str) -> Option<&ShortCode> {
        self.owners
            .get(owner)
            .and_then(|index| index.live.get(original_url))
    }

    fn mint(&self, generator: &dyn Generator) -> Result<ShortCode> {
        for attempt in 1..=MAX_GENERATION_ATTEMPTS {
            let code = generator.generate();
            if !self.records.contains_key(&code) {
                return Ok(code);
            }
            debug!(code = %code, attempt, "generated short code already taken");
        }

        Err(StorageError::GenerationExhausted {
            attempts: MAX_GENERATION_ATTEMPTS,
        })
    }

    fn insert(&mut self, record: ShortLinkRecord) {
        let index = self.owners.entry(record.owner_id.clone()).or_default();
        index.codes.push(record.code.clone());
        if !record.deleted {
            index
                .live
                .entry(record.original_url.clone())
                .or_insert_with(|| record.code.clone());
        }
        self.order.push(record.code.clone());
        self.records.insert(record.code.clone(), record);
    }

    fn mark_deleted(&mut self, code: &ShortCode) {
        let Some(record) = self.records.get_mut(code) else {
            return;
        };
        record.deleted = true;

        if let Some(index) = self.owners.get_mut(&record.owner_id) {
            if index.live.get(&record.original_url) == Some(code) {
                index.live.remove(&record.original_url);
            }
        }
    }

    /// Dedup-or-create for one URL. `commit` runs after the new record is
    /// known and before it becomes visible; if it fails nothing changes.
    fn save<F>(
        &mut self,
        original_url: &str,
        owner: &OwnerId,
        generator: &dyn Generator,
        commit: &mut F,
    ) -> Result<SaveOutcome>
    where
        F: FnMut(&ShortLinkRecord) -> Result<()>,
    {
        if let Some(code) = self.live_code(owner, original_url) {
            trace!(code = %code, owner = %owner, "owner already shortened this url");
            return Ok(SaveOutcome::Existing(code.clone()));
        }

        let code = self.mint(generator)?;
        let record = ShortLinkRecord {
            code: code.clone(),
            original_url: original_url.to_owned(),
            owner_id: owner.clone(),
            deleted: false,
        };

        commit(&record)?;
        self.insert(record);
        Ok(SaveOutcome::Created(code))
    }

    fn delete<F>(&mut self, codes: &[ShortCode], owner: &OwnerId, commit: &mut F) -> Result<u64>
    where
        F: FnMut(&ShortLinkRecord) -> Result<()>,
    {
        let mut deleted = 0;

        for code in codes {
            let Some(record) = self.records.get(code) else {
                continue;
            };
            if record.deleted || &record.owner_id != owner {
                continue;
            }

            let tombstone = ShortLinkRecord {
                deleted: true,
                ..record.clone()
            };
            commit(&tombstone)?;
            self.mark_deleted(code);
            deleted += 1;
        }

        Ok(deleted)
    }

    /// Folds one persisted record into the state. Re-applying the same
    /// record is a no-op.
    fn apply(&mut self, record: ShortLinkRecord) {
        if !self.records.contains_key(&record.code) {
            self.insert(record);
            return;
        }

        let supersedes = self.records.get(&record.code).is_some_and(|existing| {
            record.deleted && !existing.deleted && existing.owner_id == record.owner_id
        });
        if supersedes {
            self.mark_deleted(&record.code);
        }
    }

    fn list(&self, owner: &OwnerId) -> Vec<OwnedLink> {
        let Some(index) = self.owners.get(owner) else {
            return Vec::new();
        };

        index
            .codes
            .iter()
            .filter_map(|code| self.records.get(code))
            .filter(|record| !record.deleted)
            .map(|record| OwnedLink {
                code: record.code.clone(),
                original_url: record.original_url.clone(),
            })
            .collect()
    }
}

/// In-memory implementation of the [`Repository`] trait.
///
/// A single mutex guards the whole state so the dedup check and the insert
/// happen as one step. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryRepository {
    /// Creates a new in-memory repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records, tombstones included.
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn save_with<F>(
        &self,
        original_url: &str,
        owner: &OwnerId,
        generator: &dyn Generator,
        mut commit: F,
    ) -> Result<SaveOutcome>
    where
        F: FnMut(&ShortLinkRecord) -> Result<()>,
    {
        self.state
            .lock()
            .save(original_url, owner, generator, &mut commit)
    }

    pub(crate) fn save_batch_with<F>(
        &self,
        original_urls: &[String],
        owner: &OwnerId,
        generator: &dyn Generator,
        mut commit: F,
    ) -> Result<Vec<(String, SaveOutcome)>>
    where
        F: FnMut(&ShortLinkRecord) -> Result<()>,
    {
        let mut saved = Vec::with_capacity(original_urls.len());
        for original_url in original_urls {
            // Each entry takes the lock on its own so other callers see the
            // batch land one entry at a time.
            let outcome = self
                .state
                .lock()
                .save(original_url, owner, generator, &mut commit)?;
            saved.push((original_url.clone(), outcome));
        }
        Ok(saved)
    }

    pub(crate) fn delete_with<F>(
        &self,
        codes: &[ShortCode],
        owner: &OwnerId,
        mut commit: F,
    ) -> Result<u64>
    where
        F: FnMut(&ShortLinkRecord) -> Result<()>,
    {
        self.state.lock().delete(codes, owner, &mut commit)
    }

    pub(crate) fn apply(&self, record: ShortLinkRecord) {
        self.state.lock().apply(record);
    }

    /// Runs `f` over every record in creation order while holding the lock.
    pub(crate) fn with_records<T>(
        &self,
        f: impl FnOnce(&mut dyn Iterator<Item = &ShortLinkRecord>) -> T,
    ) -> T {
        let state = self.state.lock();
        let mut records = state.order.iter().filter_map(|code| state.records.get(code));
        f(&mut records)
    }

    pub(crate) fn lookup(&self, code: &ShortCode) -> Option<ShortLinkRecord> {
        self.state.lock().records.get(code).cloned()
    }

    pub(crate) fn list(&self, owner: &OwnerId) -> Vec<OwnedLink> {
        self.state.lock().list(owner)
    }
}

fn no_commit(_: &ShortLinkRecord) -> Result<()> {
    Ok(())
}

#[async_trait]
impl ReadRepository for InMemoryRepository {
    async fn get(&self, code: &ShortCode) -> Result<Option<ShortLinkRecord>> {
        Ok(self.lookup(code))
    }

    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<OwnedLink>> {
        Ok(self.list(owner))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn save(
        &self,
        original_url: &str,
        owner: &OwnerId,
        generator: &dyn Generator,
    ) -> Result<SaveOutcome> {
        self.save_with(original_url, owner, generator, no_commit)
    }

    async fn save_batch(
        &self,
        original_urls: &[String],
        owner: &OwnerId,
        generator: &dyn Generator,
    ) -> Result<Vec<(String, SaveOutcome)>> {
        self.save_batch_with(original_urls, owner, generator, no_commit)
    }

    async fn delete(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<u64> {
        self.delete_with(codes, owner, no_commit)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shortlink_core::generator_fn;
    use shortlink_generator::SequenceGenerator;
    use std::sync::Arc;

    fn code(s: &str) -> ShortCode {
        ShortCode::new_unchecked(s)
    }

    fn owner(s: &str) -> OwnerId {
        OwnerId::from(s)
    }

    #[tokio::test]
    async fn save_and_get() {
        let repo = InMemoryRepository::new();
        let generator = SequenceGenerator::with_prefix("wh");

        let outcome = repo
            .save("https://example.com", &owner("user1"), &generator)
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Created(code("wh000000")));

        let record = repo.get(&code("wh000000")).await.unwrap().unwrap();
        assert_eq!(record.original_url, "https://example.com");
        assert_eq!(record.owner_id, owner("user1"));
        assert!(!record.deleted);
    }

    #[tokio::test]
    async fn get_nonexistent() {
        let repo = InMemoryRepository::new();

        assert!(repo.get(&code("nope1234")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_save_returns_existing_code() {
        let repo = InMemoryRepository::new();
        let generator = SequenceGenerator::with_prefix("wh");

        let first = repo
            .save("https://example.com", &owner("user1"), &generator)
            .await
            .unwrap();
        let second = repo
            .save("https://example.com", &owner("user1"), &generator)
            .await
            .unwrap();

        assert!(!first.is_conflict());
        assert!(second.is_conflict());
        assert_eq!(first.code(), second.code());
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn dedup_is_scoped_to_the_owner() {
        let repo = InMemoryRepository::new();
        let generator = SequenceGenerator::with_prefix("wh");

        let first = repo
            .save("https://example.com", &owner("user1"), &generator)
            .await
            .unwrap();
        let other = repo
            .save("https://example.com", &owner("user2"), &generator)
            .await
            .unwrap();

        assert!(!other.is_conflict());
        assert_ne!(first.code(), other.code());
    }

    #[tokio::test]
    async fn delete_only_touches_the_owners_records() {
        let repo = InMemoryRepository::new();
        let generator = SequenceGenerator::with_prefix("wh");

        let mine = repo
            .save("https://mine.example", &owner("user1"), &generator)
            .await
            .unwrap()
            .into_code();
        let theirs = repo
            .save("https://theirs.example", &owner("user2"), &generator)
            .await
            .unwrap()
            .into_code();

        let deleted = repo
            .delete(&[mine.clone(), theirs.clone()], &owner("user1"))
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(repo.get(&mine).await.unwrap().unwrap().deleted);
        assert!(!repo.get(&theirs).await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let repo = InMemoryRepository::new();
        let generator = SequenceGenerator::with_prefix("wh");
        let saved = repo
            .save("https://example.com", &owner("user1"), &generator)
            .await
            .unwrap()
            .into_code();

        assert_eq!(repo.delete(&[saved.clone()], &owner("user1")).await.unwrap(), 1);
        assert_eq!(repo.delete(&[saved.clone()], &owner("user1")).await.unwrap(), 0);
        assert_eq!(repo.delete(&[code("unknown0")], &owner("user1")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn deleted_links_are_hidden_from_listing() {
        let repo = InMemoryRepository::new();
        let generator = SequenceGenerator::with_prefix("wh");
        let user = owner("user1");

        let a = repo.save("https://a.example", &user, &generator).await.unwrap().into_code();
        let b = repo.save("https://b.example", &user, &generator).await.unwrap().into_code();
        repo.delete(&[a], &user).await.unwrap();

        let listed = repo.list_by_owner(&user).await.unwrap();
        assert_eq!(
            listed,
            vec![OwnedLink {
                code: b,
                original_url: "https://b.example".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn saving_a_deleted_url_mints_a_new_code() {
        let repo = InMemoryRepository::new();
        let generator = SequenceGenerator::with_prefix("wh");
        let user = owner("user1");

        let old = repo.save("https://example.com", &user, &generator).await.unwrap().into_code();
        repo.delete(&[old.clone()], &user).await.unwrap();

        let revived = repo.save("https://example.com", &user, &generator).await.unwrap();

        assert!(!revived.is_conflict());
        assert_ne!(revived.code(), &old);
        assert!(repo.get(&old).await.unwrap().unwrap().deleted);
        assert!(!repo.get(revived.code()).await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn taken_codes_are_redrawn() {
        let repo = InMemoryRepository::new();
        let first = SequenceGenerator::with_prefix("wh");
        repo.save("https://a.example", &owner("user1"), &first).await.unwrap();

        // Restarts at wh000000, which is taken; wh000001 is free.
        let second = SequenceGenerator::with_prefix("wh");
        let outcome = repo.save("https://b.example", &owner("user1"), &second).await.unwrap();

        assert_eq!(outcome, SaveOutcome::Created(code("wh000001")));
    }

    #[tokio::test]
    async fn generation_gives_up_after_bounded_attempts() {
        let repo = InMemoryRepository::new();
        let constant = generator_fn(|| ShortCode::new_unchecked("AbC12345"));
        repo.save("https://a.example", &owner("user1"), &constant).await.unwrap();

        let err = repo
            .save("https://b.example", &owner("user1"), &constant)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StorageError::GenerationExhausted {
                attempts: MAX_GENERATION_ATTEMPTS
            }
        ));
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn failed_commit_leaves_state_untouched() {
        let repo = InMemoryRepository::new();
        let generator = SequenceGenerator::with_prefix("wh");

        let err = repo
            .save_with("https://example.com", &owner("user1"), &generator, |_| {
                Err(StorageError::Io("disk full".to_string()))
            })
            .unwrap_err();

        assert!(matches!(err, StorageError::Io(_)));
        assert!(repo.is_empty());
        assert!(repo.list_by_owner(&owner("user1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_dedups_each_entry() {
        let repo = InMemoryRepository::new();
        let generator = SequenceGenerator::with_prefix("wh");
        let user = owner("user1");
        let existing = repo.save("https://a.example", &user, &generator).await.unwrap().into_code();

        let urls = vec![
            "https://a.example".to_string(),
            "https://b.example".to_string(),
            "https://b.example".to_string(),
        ];
        let saved = repo.save_batch(&urls, &user, &generator).await.unwrap();

        assert_eq!(saved.len(), 3);
        assert_eq!(saved[0].1, SaveOutcome::Existing(existing));
        assert!(!saved[1].1.is_conflict());
        assert_eq!(saved[2].1, SaveOutcome::Existing(saved[1].1.code().clone()));
    }

    #[tokio::test]
    async fn apply_is_idempotent() {
        let repo = InMemoryRepository::new();
        let created = ShortLinkRecord {
            code: code("AbC12345"),
            original_url: "https://example.com".to_string(),
            owner_id: owner("user1"),
            deleted: false,
        };
        let tombstone = ShortLinkRecord {
            deleted: true,
            ..created.clone()
        };

        repo.apply(created.clone());
        repo.apply(created.clone());
        repo.apply(tombstone.clone());
        repo.apply(tombstone);
        repo.apply(created);

        assert_eq!(repo.len(), 1);
        assert!(repo.get(&code("AbC12345")).await.unwrap().unwrap().deleted);
        assert!(repo.list_by_owner(&owner("user1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_saves_of_one_url_converge_on_one_code() {
        let repo = Arc::new(InMemoryRepository::new());
        let generator = Arc::new(SequenceGenerator::with_prefix("wh"));
        let mut handles = vec![];

        for _ in 0..16 {
            let repo = Arc::clone(&repo);
            let generator = Arc::clone(&generator);
            handles.push(tokio::spawn(async move {
                repo.save("https://example.com", &owner("user1"), generator.as_ref())
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        let mut codes = std::collections::HashSet::new();
        for handle in handles {
            let outcome = handle.await.unwrap();
            if !outcome.is_conflict() {
                created += 1;
            }
            codes.insert(outcome.into_code());
        }

        assert_eq!(created, 1);
        assert_eq!(codes.len(), 1);
        assert_eq!(repo.len(), 1);
    }
}
