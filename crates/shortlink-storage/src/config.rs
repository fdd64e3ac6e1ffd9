use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::Duration;
use typed_builder::TypedBuilder;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Which backend a [`StorageConfig`] resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Postgres { dsn: String },
    LogFile { path: PathBuf },
    Memory,
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Postgres { .. } => write!(f, "postgres"),
            BackendKind::LogFile { path } => write!(f, "log-file ({})", path.display()),
            BackendKind::Memory => write!(f, "in-memory"),
        }
    }
}

/// Storage settings, resolved once at startup.
#[derive(Debug, Clone, TypedBuilder)]
pub struct StorageConfig {
    /// PostgreSQL connection string. Takes precedence over everything else.
    #[builder(default, setter(into))]
    pub database_dsn: Option<String>,
    /// Journal path for the log-file backend.
    #[builder(default, setter(into))]
    pub file_storage_path: Option<PathBuf>,
    /// Upper bound on pooled database connections.
    #[builder(default = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,
    /// How long a caller waits for a free pooled connection. `None` waits
    /// until one frees up; the operation deadline still applies.
    #[builder(default, setter(into))]
    pub acquire_timeout: Option<Duration>,
    /// Deadline applied to every storage operation.
    #[builder(default, setter(into))]
    pub operation_timeout: Option<Duration>,
}

impl StorageConfig {
    /// Picks the backend: a DSN selects Postgres, else a path selects the
    /// log file, else memory. Blank values count as unset.
    pub fn backend_kind(&self) -> BackendKind {
        let dsn = self
            .database_dsn
            .as_deref()
            .map(str::trim)
            .filter(|dsn| !dsn.is_empty());
        if let Some(dsn) = dsn {
            return BackendKind::Postgres {
                dsn: dsn.to_owned(),
            };
        }

        let path = self
            .file_storage_path
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty());
        if let Some(path) = path {
            return BackendKind::LogFile { path: path.clone() };
        }

        BackendKind::Memory
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
