//! Core types and traits for the shortlink storage engine.
//!
//! This crate provides the domain types shared by the code generators,
//! the storage backends and the facade that selects between them.

pub mod error;
pub mod generator;
pub mod owner;
pub mod repository;
pub mod shortcode;

pub use error::{CoreError, ShortLinkError, StorageError};
pub use generator::{generator_fn, FnGenerator, Generator, MAX_GENERATION_ATTEMPTS};
pub use owner::OwnerId;
pub use repository::{
    OwnedLink, ReadRepository, Repository, ResolvedUrl, SaveOutcome, ShortLinkRecord,
};
pub use shortcode::{ShortCode, ALPHABET, CODE_LENGTH};
