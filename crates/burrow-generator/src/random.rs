use crate::Generator;
use burrow_core::ShortCode;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// The 62-symbol alphabet short codes are drawn from.
pub const ALPHABET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Default length of generated codes, giving 62^8 (about 2.1e14) codes.
pub const DEFAULT_CODE_LENGTH: usize = 8;

/// Random fixed-length alphanumeric code generator.
///
/// Each instance owns its random source, so independent backends never share
/// state and tests can pin the sequence with [`RandomGenerator::seeded`].
#[derive(Debug)]
pub struct RandomGenerator {
    rng: Mutex<StdRng>,
    length: usize,
}

impl RandomGenerator {
    /// Creates a generator seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
            length: DEFAULT_CODE_LENGTH,
        }
    }

    /// Creates a generator with a fixed seed. Two generators with the same
    /// seed and length produce the same codes.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            length: DEFAULT_CODE_LENGTH,
        }
    }

    /// Overrides the code length.
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = length;
        self
    }

    pub fn length(&self) -> usize {
        self.length
    }

    /// Draws a random string of `length` symbols from [`ALPHABET`].
    pub fn random_string(&self, length: usize) -> String {
        let mut rng = self.rng.lock();
        (0..length)
            .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
            .collect()
    }
}

impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Generator for RandomGenerator {
    fn generate(&self) -> ShortCode {
        ShortCode::new_unchecked(self.random_string(self.length))
    }
}
