pub mod random;
pub mod seq;

pub use random::RandomGenerator;
pub use seq::SeqGenerator;

use burrow_core::ShortCode;

/// Trait for generating short codes.
///
/// Implementations are pure generators that don't interact with storage.
/// Uniqueness is the caller's responsibility: backends check every generated
/// code against what they already hold.
pub trait Generator: Send + Sync + 'static {
    /// Produces the next candidate short code.
    fn generate(&self) -> ShortCode;
}

impl<G: Generator + ?Sized> Generator for std::sync::Arc<G> {
    fn generate(&self) -> ShortCode {
        (**self).generate()
    }
}
