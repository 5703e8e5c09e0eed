//! Object store external collaborator (§6, C7). Notifications carry an
//! `objectId` attribute with the absolute object name; the ingestor
//! also lists objects under `bucket/prefix` directly for backup
//! polling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub name: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects under `bucket/prefix`, most-recently-created last.
    async fn list(&self, bucket: &str, prefix: &str, since: DateTime<Utc>) -> Result<Vec<ObjectMeta>>;
    async fn get(&self, bucket: &str, name: &str) -> Result<Vec<u8>>;
}

/// In-memory double for tests: a flat map of `(bucket, name) -> bytes`
/// with creation order preserved via a parallel vec, so `list` can
/// honor `since` without needing real object timestamps.
#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: std::sync::Mutex<Vec<(String, String, Vec<u8>, DateTime<Utc>)>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, bucket: &str, name: &str, data: Vec<u8>, created: DateTime<Utc>) {
        self.objects
            .lock()
            .unwrap()
            .push((bucket.to_string(), name.to_string(), data, created));
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list(&self, bucket: &str, prefix: &str, since: DateTime<Utc>) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(b, name, _, created)| b == bucket && name.starts_with(prefix) && *created >= since)
            .map(|(_, name, _, _)| ObjectMeta { name: name.clone() })
            .collect())
    }

    async fn get(&self, bucket: &str, name: &str) -> Result<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        objects
            .iter()
            .find(|(b, n, _, _)| b == bucket && n == name)
            .map(|(_, _, data, _)| data.clone())
            .ok_or_else(|| crate::errors::SchedulerError::NotFound(format!("object {bucket}/{name}")))
    }
}
