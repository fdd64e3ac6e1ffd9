use clap::{Args, Parser, Subcommand};
use shortlink_core::{CoreError, OwnerId, ShortCode};
use shortlink_storage::config::DEFAULT_MAX_CONNECTIONS;
use shortlink_storage::StorageConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const DATABASE_DSN_ENV: &str = "DATABASE_DSN";
pub const FILE_STORAGE_PATH_ENV: &str = "FILE_STORAGE_PATH";
pub const BASE_URL_ENV: &str = "BASE_URL";
pub const OWNER_ENV: &str = "SHORTLINK_OWNER";
pub const TIMEOUT_ENV: &str = "SHORTLINK_TIMEOUT_MS";
pub const MAX_CONNECTIONS_ENV: &str = "SHORTLINK_MAX_CONNECTIONS";
pub const ACQUIRE_TIMEOUT_ENV: &str = "SHORTLINK_ACQUIRE_TIMEOUT_MS";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_OWNER: &str = "anonymous";

#[derive(Debug, Parser)]
#[command(name = "shortlink", about = "Create, resolve and delete short links")]
pub struct CLI {
    #[command(flatten)]
    pub storage: StorageArgs,

    /// Owner the links are created, listed and deleted for.
    #[arg(long, global = true, env = OWNER_ENV, default_value = DEFAULT_OWNER)]
    pub owner: String,

    /// Base URL short codes are appended to in the output.
    #[arg(long, global = true, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct StorageArgs {
    /// PostgreSQL connection string. Selects the database backend.
    #[arg(long, global = true, env = DATABASE_DSN_ENV)]
    pub database_dsn: Option<String>,

    /// Journal path. Selects the log-file backend when no DSN is given.
    #[arg(long, global = true, env = FILE_STORAGE_PATH_ENV)]
    pub file_storage_path: Option<PathBuf>,

    /// Per-operation deadline in milliseconds.
    #[arg(long = "timeout-ms", global = true, env = TIMEOUT_ENV)]
    pub timeout_ms: Option<u64>,

    #[arg(
        long,
        global = true,
        env = MAX_CONNECTIONS_ENV,
        default_value_t = DEFAULT_MAX_CONNECTIONS
    )]
    pub max_connections: u32,

    /// How long to wait for a pooled connection, in milliseconds. Waits
    /// indefinitely when unset.
    #[arg(long = "acquire-timeout-ms", global = true, env = ACQUIRE_TIMEOUT_ENV)]
    pub acquire_timeout_ms: Option<u64>,
}

impl StorageArgs {
    pub fn to_config(&self) -> StorageConfig {
        StorageConfig::builder()
            .database_dsn(self.database_dsn.clone())
            .file_storage_path(self.file_storage_path.clone())
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout_ms.map(Duration::from_millis))
            .operation_timeout(self.timeout_ms.map(Duration::from_millis))
            .build()
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten one or more URLs.
    Shorten {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print the URL behind a short code.
    Resolve {
        #[arg(value_parser = parse_code)]
        code: ShortCode,
    },
    /// List the owner's live links.
    List,
    /// Soft-delete short codes owned by the owner.
    Delete {
        #[arg(required = true, value_parser = parse_code)]
        codes: Vec<ShortCode>,
    },
    /// Check that the storage backend is reachable.
    Ping,
}

impl CLI {
    pub fn owner(&self) -> OwnerId {
        OwnerId::new(self.owner.clone())
    }
}

fn parse_code(value: &str) -> Result<ShortCode, CoreError> {
    ShortCode::new(value)
}
