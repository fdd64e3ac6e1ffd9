use shortlink_core::{Generator, ShortCode, ALPHABET, CODE_LENGTH};

/// Draws every character uniformly from the 62-character alphabet.
///
/// Stateless: each call uses the thread-local RNG.
#[derive(Debug, Clone, Copy)]
pub struct RandomGenerator {
    length: usize,
}

impl RandomGenerator {
    pub fn new() -> Self {
        Self {
            length: CODE_LENGTH,
        }
    }

    /// Generates a code of an arbitrary length.
    ///
    /// Codes that are not [`CODE_LENGTH`] long are rejected by
    /// [`ShortCode::new`], so this is only useful for tooling.
    pub fn with_length(length: usize) -> Self {
        Self { length }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for RandomGenerator {
    fn generate(&self) -> ShortCode {
        let code: String = std::iter::repeat_with(|| {
            ALPHABET[rand::random_range(0..ALPHABET.len())] as char
        })
        .take(self.length)
        .collect();
        ShortCode::new_unchecked(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_codes_have_the_expected_shape() {
        let generator = RandomGenerator::new();

        for _ in 0..1_000 {
            let code = generator.generate();
            assert_eq!(code.as_str().len(), CODE_LENGTH);
            assert!(code.as_str().bytes().all(|b| ALPHABET.contains(&b)));
            assert!(ShortCode::new(code.as_str()).is_ok());
        }
    }

    #[test]
    fn generated_codes_are_spread_out() {
        let generator = RandomGenerator::new();
        let codes: HashSet<_> = (0..1_000).map(|_| generator.generate()).collect();

        // 62^8 possibilities; a repeat in 1000 draws would point at a broken RNG.
        assert_eq!(codes.len(), 1_000);
    }

    #[test]
    fn custom_length() {
        let generator = RandomGenerator::with_length(12);
        assert_eq!(generator.generate().as_str().len(), 12);
    }

    #[test]
    fn generator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RandomGenerator>();
    }
}
