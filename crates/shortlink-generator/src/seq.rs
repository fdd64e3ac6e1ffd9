use shortlink_core::{Generator, ShortCode, CODE_LENGTH};
use std::sync::atomic::{AtomicU64, Ordering};

/// A short code generator using a sequential counter.
///
/// Produces codes like "wh000000", "wh000001": the prefix followed by the
/// counter, zero-padded so every code is [`CODE_LENGTH`] characters wide.
/// Counters that outgrow the padding produce longer codes.
#[derive(Debug)]
pub struct SequenceGenerator {
    counter: AtomicU64,
    prefix: String,
}

impl Clone for SequenceGenerator {
    fn clone(&self) -> Self {
        Self {
            counter: AtomicU64::new(self.counter.load(Ordering::SeqCst)),
            prefix: self.prefix.clone(),
        }
    }
}

impl SequenceGenerator {
    /// Creates a new sequence generator with a custom prefix.
    ///
    /// The prefix should be alphanumeric and shorter than [`CODE_LENGTH`].
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::with_offset(prefix, 0)
    }

    /// Creates a new sequence generator starting from a specific counter value.
    pub fn with_offset(prefix: impl Into<String>, offset: u64) -> Self {
        Self {
            counter: AtomicU64::new(offset),
            prefix: prefix.into(),
        }
    }
}

impl Generator for SequenceGenerator {
    fn generate(&self) -> ShortCode {
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        let width = CODE_LENGTH.saturating_sub(self.prefix.len());
        ShortCode::new_unchecked(format!("{}{:0width$}", self.prefix, count, width = width))
    }
}
