use dashmap::DashMap;

/// A completed upload, keyed by content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedUpload {
    pub object_key: String,
}

/// Fingerprint → completed-upload map. Append-only for the process
/// lifetime; a hit means the content is already in the object store and no
/// network call is needed.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: DashMap<String, CachedUpload>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, fingerprint: &str) -> Option<CachedUpload> {
        self.entries.get(fingerprint).map(|entry| entry.value().clone())
    }

    /// First writer wins; later inserts for the same fingerprint keep the
    /// original entry.
    pub fn insert(&self, fingerprint: &str, upload: CachedUpload) {
        self.entries
            .entry(fingerprint.to_string())
            .or_insert(upload);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
