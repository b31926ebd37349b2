use burrow_core::error::Result;
use burrow_core::{Lookup, ShortCode, StorageError, UrlRecord};
use burrow_generator::Generator;
use std::collections::{HashMap, HashSet};

/// How many candidate codes a backend draws before giving up on a create.
pub const MAX_GENERATE_ATTEMPTS: usize = 8;

/// In-memory index shared by the memory and journal backends.
///
/// Keeps the records keyed by short code plus a reverse `original_url -> code`
/// map so duplicate URLs are detected in O(1). Callers guard it with a single
/// reader/writer lock.
#[derive(Debug, Default)]
pub(crate) struct UrlIndex {
    by_code: HashMap<ShortCode, UrlRecord>,
    by_url: HashMap<String, ShortCode>,
}

impl UrlIndex {
    pub(crate) fn len(&self) -> usize {
        self.by_code.len()
    }

    pub(crate) fn code_for_url(&self, original_url: &str) -> Option<&ShortCode> {
        self.by_url.get(original_url)
    }

    pub(crate) fn lookup(&self, code: &ShortCode) -> Lookup {
        match self.by_code.get(code) {
            Some(record) if record.deleted => Lookup::Deleted,
            Some(record) => Lookup::Found(record.original_url.clone()),
            None => Lookup::NotFound,
        }
    }

    /// Draws codes from `generator` until one is not taken.
    pub(crate) fn allocate<G: Generator>(&self, generator: &G) -> Result<ShortCode> {
        for _ in 0..MAX_GENERATE_ATTEMPTS {
            let candidate = generator.generate();
            if !self.by_code.contains_key(&candidate) {
                return Ok(candidate);
            }
            tracing::debug!(code = %candidate, "generated short code collides, retrying");
        }
        Err(StorageError::CodeSpaceExhausted {
            attempts: MAX_GENERATE_ATTEMPTS,
        })
    }

    /// Inserts or replaces the record for its code. The last write wins,
    /// except that a deleted record never comes back to life.
    pub(crate) fn upsert(&mut self, mut record: UrlRecord) {
        if let Some(previous) = self.by_code.get(&record.short_code) {
            record.deleted |= previous.deleted;
            if previous.original_url != record.original_url
                && self.by_url.get(&previous.original_url) == Some(&record.short_code)
            {
                self.by_url.remove(&previous.original_url);
            }
        }
        self.by_url
            .insert(record.original_url.clone(), record.short_code.clone());
        self.by_code.insert(record.short_code.clone(), record);
    }

    pub(crate) fn list_by_owner(&self, owner_id: &str) -> Vec<UrlRecord> {
        self.by_code
            .values()
            .filter(|record| !record.deleted && record.is_owned_by(owner_id))
            .cloned()
            .collect()
    }

    /// Returns the live records among `codes` owned by `owner_id`, each once,
    /// already flagged as deleted. Nothing is changed.
    pub(crate) fn deletable(&self, owner_id: &str, codes: &[ShortCode]) -> Vec<UrlRecord> {
        let mut seen = HashSet::new();
        codes
            .iter()
            .filter(|code| seen.insert(*code))
            .filter_map(|code| self.by_code.get(code))
            .filter(|record| !record.deleted && record.is_owned_by(owner_id))
            .map(|record| UrlRecord {
                deleted: true,
                ..record.clone()
            })
            .collect()
    }

    pub(crate) fn mark_deleted(&mut self, codes: impl IntoIterator<Item = ShortCode>) {
        for code in codes {
            if let Some(record) = self.by_code.get_mut(&code) {
                record.deleted = true;
            }
        }
    }

    /// All records ordered by short code.
    pub(crate) fn snapshot(&self) -> Vec<UrlRecord> {
        let mut records: Vec<_> = self.by_code.values().cloned().collect();
        records.sort_by(|a, b| a.short_code.cmp(&b.short_code));
        records
    }
}

/// Builds the record for a freshly allocated code.
pub(crate) fn new_record(code: ShortCode, owner_id: &str, original_url: &str) -> UrlRecord {
    UrlRecord {
        id: uuid::Uuid::new_v4().to_string(),
        short_code: code,
        original_url: original_url.to_owned(),
        owner_id: owner(owner_id),
        deleted: false,
    }
}

/// An empty owner id means the record has no owner.
pub(crate) fn owner(owner_id: &str) -> Option<String> {
    (!owner_id.is_empty()).then(|| owner_id.to_owned())
}
