//! Storage backends for short links and the facade that picks one.

pub mod config;
pub mod logfile;
pub mod memory;
pub mod postgres;
pub mod store;

pub use config::{BackendKind, StorageConfig};
pub use logfile::{LinkEvent, LogFileRepository};
pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
pub use store::ShortLinkStore;

pub use shortlink_core::{
    OwnedLink, OwnerId, ReadRepository, Repository, ResolvedUrl, SaveOutcome, ShortCode,
    ShortLinkError, ShortLinkRecord, StorageError,
};
