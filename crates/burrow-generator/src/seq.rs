use crate::Generator;
use burrow_core::ShortCode;
use std::sync::atomic::{AtomicU64, Ordering};

/// A deterministic short code generator using a sequential counter.
///
/// Produces codes like "bw000000", "bw000001", etc. The prefix must be
/// alphanumeric for the codes to stay within the short code alphabet.
///
/// An optional period wraps the counter, which makes the generator repeat
/// codes on purpose. Backends use that in tests to exercise collision retries.
#[derive(Debug)]
pub struct SeqGenerator {
    counter: AtomicU64,
    prefix: String,
    period: Option<u64>,
}

impl Clone for SeqGenerator {
    fn clone(&self) -> Self {
        Self {
            counter: AtomicU64::new(self.counter.load(Ordering::SeqCst)),
            prefix: self.prefix.clone(),
            period: self.period,
        }
    }
}

impl SeqGenerator {
    /// Creates a new sequential generator with a custom prefix.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self::with_offset(prefix, 0)
    }

    /// Creates a new sequential generator starting from a specific counter value.
    pub fn with_offset(prefix: impl Into<String>, offset: u64) -> Self {
        Self {
            counter: AtomicU64::new(offset),
            prefix: prefix.into(),
            period: None,
        }
    }

    /// Creates a generator that cycles through `period` distinct codes.
    pub fn with_period(prefix: impl Into<String>, period: u64) -> Self {
        Self {
            counter: AtomicU64::new(0),
            prefix: prefix.into(),
            period: Some(period.max(1)),
        }
    }
}

impl Generator for SeqGenerator {
    fn generate(&self) -> ShortCode {
        let mut count = self.counter.fetch_add(1, Ordering::SeqCst);
        if let Some(period) = self.period {
            count %= period;
        }
        ShortCode::new_unchecked(format!("{}{:06}", self.prefix, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_sequential_codes() {
        let generator = SeqGenerator::with_prefix("bw");

        assert_eq!(generator.generate().as_str(), "bw000000");
        assert_eq!(generator.generate().as_str(), "bw000001");
        assert_eq!(generator.generate().as_str(), "bw000002");
    }

    #[test]
    fn with_offset() {
        let generator = SeqGenerator::with_offset("bw", 1000);

        assert_eq!(generator.generate().as_str(), "bw001000");
        assert_eq!(generator.generate().as_str(), "bw001001");
    }

    #[test]
    fn with_period_repeats() {
        let generator = SeqGenerator::with_period("c", 2);

        assert_eq!(generator.generate().as_str(), "c000000");
        assert_eq!(generator.generate().as_str(), "c000001");
        assert_eq!(generator.generate().as_str(), "c000000");
    }

    #[test]
    fn clone_preserves_counter_state() {
        let generator = SeqGenerator::with_prefix("bw");
        generator.generate();
        generator.generate();

        let cloned = generator.clone();

        assert_eq!(generator.generate().as_str(), "bw000002");
        assert_eq!(cloned.generate().as_str(), "bw000002");
    }
}
