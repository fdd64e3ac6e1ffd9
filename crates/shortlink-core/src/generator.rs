use crate::shortcode::ShortCode;

/// How many codes a backend draws before giving up on a save.
pub const MAX_GENERATION_ATTEMPTS: u32 = 3;

/// Trait for generating short codes.
///
/// Implementations are pure generators that don't interact with storage:
/// a generated code may already be taken, and the backend doing the insert
/// is the one that decides whether to draw again.
pub trait Generator: Send + Sync + 'static {
    /// Generates a candidate short code.
    fn generate(&self) -> ShortCode;
}

/// A [`Generator`] backed by a closure. See [`generator_fn`].
#[derive(Clone)]
pub struct FnGenerator<F> {
    f: F,
}

/// Wraps a closure into a [`Generator`].
///
/// ```
/// use shortlink_core::{generator_fn, Generator, ShortCode};
///
/// let generator = generator_fn(|| ShortCode::new_unchecked("AbC12345"));
/// assert_eq!(generator.generate().as_str(), "AbC12345");
/// ```
pub fn generator_fn<F>(f: F) -> FnGenerator<F>
where
    F: Fn() -> ShortCode + Send + Sync + 'static,
{
    FnGenerator { f }
}

impl<F> Generator for FnGenerator<F>
where
    F: Fn() -> ShortCode + Send + Sync + 'static,
{
    fn generate(&self) -> ShortCode {
        (self.f)()
    }
}

impl<G: Generator + ?Sized> Generator for std::sync::Arc<G> {
    fn generate(&self) -> ShortCode {
        (**self).generate()
    }
}
