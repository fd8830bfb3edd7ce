//! Session-scoped blob storage referenced by upload elements.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use uuid::Uuid;

/// Blob UUID → contents.
#[derive(Debug, Clone, Default)]
pub struct BlobStore {
    inner: Arc<DashMap<String, Bytes>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under a fresh UUID and return it.
    pub fn register(&self, data: Bytes) -> String {
        let uuid = Uuid::new_v4().to_string();
        self.inner.insert(uuid.clone(), data);
        uuid
    }

    pub fn get(&self, uuid: &str) -> Option<Bytes> {
        self.inner.get(uuid).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, uuid: &str) -> Option<Bytes> {
        self.inner.remove(uuid).map(|(_, data)| data)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
