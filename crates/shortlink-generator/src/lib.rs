//! Short code generators.
//!
//! [`RandomGenerator`] is what the storage facade uses in production.
//! [`SequenceGenerator`] yields predictable codes for tests and tooling.

pub mod random;
pub mod seq;

pub use random::RandomGenerator;
pub use seq::SequenceGenerator;
pub use shortlink_core::Generator;
