use typed_builder::TypedBuilder;

/// Default bound of the delete queue.
pub const DEFAULT_DELETE_QUEUE_CAPACITY: usize = 100;

/// Tunables of [`ShortenerService`](crate::ShortenerService).
#[derive(Debug, Clone, TypedBuilder)]
pub struct ShortenerSettings {
    /// How many delete requests may wait for the worker before producers
    /// block. Zero is raised to one.
    #[builder(default = DEFAULT_DELETE_QUEUE_CAPACITY)]
    pub delete_queue_capacity: usize,
}

impl Default for ShortenerSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = ShortenerSettings::default();
        assert_eq!(settings.delete_queue_capacity, 100);
    }

    #[test]
    fn builder_overrides_capacity() {
        let settings = ShortenerSettings::builder().delete_queue_capacity(4).build();
        assert_eq!(settings.delete_queue_capacity, 4);
    }
}
