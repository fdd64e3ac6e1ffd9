use async_trait::async_trait;
use shortlink_core::repository::Result;
use shortlink_core::{
    Generator, OwnedLink, OwnerId, ReadRepository, Repository, SaveOutcome, ShortCode,
    ShortLinkRecord, StorageError, MAX_GENERATION_ATTEMPTS,
};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use std::time::Duration;
use tracing::{debug, info, trace};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Stand-in for "no limit" on pool acquisition. sqlx always wants a
/// duration; callers that need a bound set one or rely on the facade deadline.
pub const UNBOUNDED_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

const STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Inserts a new row unless the owner already has a live row for the URL,
/// in which case that row's code comes back with `conflict = true`. No row
/// at all means the generated code itself is taken.
const UPSERT_SQL: &str = r#"
    WITH inserted AS (
        INSERT INTO short_links (code, original_url, owner_id)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        RETURNING code
    )
    SELECT code, FALSE AS conflict FROM inserted
    UNION ALL
    SELECT code, TRUE AS conflict
    FROM short_links
    WHERE owner_id = $3
      AND original_url = $2
      AND NOT deleted
      AND NOT EXISTS (SELECT 1 FROM inserted)
    LIMIT 1
"#;

/// PostgreSQL implementation of the repository contract.
///
/// Deduplication is arbitrated by the partial unique index on
/// `(owner_id, original_url) WHERE NOT deleted`; no application lock is
/// taken. Soft-deleted rows keep their code forever, so a code is never
/// handed out twice.
#[derive(Debug, Clone)]
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a repository from an existing pool. Migrations are not run.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool, applies pending migrations and returns the repository.
    ///
    /// With `acquire_timeout` unset, callers beyond `max_connections` wait
    /// for a connection instead of failing.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Option<Duration>,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout.unwrap_or(UNBOUNDED_ACQUIRE_TIMEOUT))
            .connect_lazy(database_url)
            .map_err(map_sqlx_error)?;

        // The first connection is made by the migration run; an unreachable
        // database fails here instead of waiting on the pool.
        let repository = Self::new(pool);
        tokio::time::timeout(STARTUP_TIMEOUT, repository.migrate())
            .await
            .map_err(|_| {
                StorageError::Unavailable(format!(
                    "database not reachable within {}s",
                    STARTUP_TIMEOUT.as_secs()
                ))
            })??;
        Ok(repository)
    }

    /// Applies pending schema migrations. Already applied ones are skipped.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Query(format!("failed to apply migrations: {e}")))?;
        info!("short link schema is up to date");
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

fn decode_record(row: &PgRow) -> Result<ShortLinkRecord> {
    let code: String = row.try_get("code").map_err(map_sqlx_error)?;
    let owner_id: String = row.try_get("owner_id").map_err(map_sqlx_error)?;

    Ok(ShortLinkRecord {
        code: ShortCode::new_unchecked(code),
        original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
        owner_id: OwnerId::new(owner_id),
        deleted: row.try_get("deleted").map_err(map_sqlx_error)?,
    })
}

/// Looks up the owner's live code for a URL with a fresh snapshot.
async fn live_code(
    conn: &mut PgConnection,
    original_url: &str,
    owner: &OwnerId,
) -> Result<Option<ShortCode>> {
    let row = sqlx::query(
        r#"
        SELECT code
        FROM short_links
        WHERE owner_id = $1
          AND original_url = $2
          AND NOT deleted
        "#,
    )
    .bind(owner.as_str())
    .bind(original_url)
    .fetch_optional(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    row.map(|row| row.try_get::<String, _>("code").map(ShortCode::new_unchecked))
        .transpose()
        .map_err(map_sqlx_error)
}

/// Runs the upsert with freshly generated codes until one sticks.
async fn save_on(
    conn: &mut PgConnection,
    original_url: &str,
    owner: &OwnerId,
    generator: &dyn Generator,
) -> Result<SaveOutcome> {
    for attempt in 1..=MAX_GENERATION_ATTEMPTS {
        let code = generator.generate();

        let row = sqlx::query(UPSERT_SQL)
            .bind(code.as_str())
            .bind(original_url)
            .bind(owner.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            // The upsert's snapshot predates a concurrent winner on the
            // (owner, url) index, so an empty result may not be a code clash.
            if let Some(existing) = live_code(conn, original_url, owner).await? {
                trace!(code = %existing, owner = %owner, "concurrent save won for this url");
                return Ok(SaveOutcome::Existing(existing));
            }
            debug!(code = %code, attempt, "generated short code already taken");
            continue;
        };

        let stored: String = row.try_get("code").map_err(map_sqlx_error)?;
        let conflict: bool = row.try_get("conflict").map_err(map_sqlx_error)?;
        let stored = ShortCode::new_unchecked(stored);

        return Ok(if conflict {
            trace!(code = %stored, owner = %owner, "owner already shortened this url");
            SaveOutcome::Existing(stored)
        } else {
            SaveOutcome::Created(stored)
        });
    }

    Err(StorageError::GenerationExhausted {
        attempts: MAX_GENERATION_ATTEMPTS,
    })
}

#[async_trait]
impl ReadRepository for PostgresRepository {
    async fn get(&self, code: &ShortCode) -> Result<Option<ShortLinkRecord>> {
        let row = sqlx::query(
            r#"
            SELECT code, original_url, owner_id, deleted
            FROM short_links
            WHERE code = $1
            "#,
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.as_ref().map(decode_record).transpose()
    }

    async fn list_by_owner(&self, owner: &OwnerId) -> Result<Vec<OwnedLink>> {
        let rows = sqlx::query(
            r#"
            SELECT code, original_url
            FROM short_links
            WHERE owner_id = $1
              AND NOT deleted
            ORDER BY id
            "#,
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.iter()
            .map(|row| {
                Ok(OwnedLink {
                    code: ShortCode::new_unchecked(
                        row.try_get::<String, _>("code").map_err(map_sqlx_error)?,
                    ),
                    original_url: row.try_get("original_url").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn save(
        &self,
        original_url: &str,
        owner: &OwnerId,
        generator: &dyn Generator,
    ) -> Result<SaveOutcome> {
        let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
        save_on(&mut conn, original_url, owner, generator).await
    }

    async fn save_batch(
        &self,
        original_urls: &[String],
        owner: &OwnerId,
        generator: &dyn Generator,
    ) -> Result<Vec<(String, SaveOutcome)>> {
        // Dropping `tx` without commit (error or cancellation) rolls back.
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut saved = Vec::with_capacity(original_urls.len());
        for original_url in original_urls {
            let outcome = save_on(&mut tx, original_url, owner, generator).await?;
            saved.push((original_url.clone(), outcome));
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(owner = %owner, entries = saved.len(), "committed short link batch");
        Ok(saved)
    }

    async fn delete(&self, codes: &[ShortCode], owner: &OwnerId) -> Result<u64> {
        if codes.is_empty() {
            return Ok(0);
        }

        let codes: Vec<String> = codes.iter().map(|c| c.as_str().to_owned()).collect();
        let result = sqlx::query(
            r#"
            UPDATE short_links
            SET deleted = TRUE
            WHERE code = ANY($1)
              AND owner_id = $2
              AND NOT deleted
            "#,
        )
        .bind(codes)
        .bind(owner.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
