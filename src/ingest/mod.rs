//! Result Ingestor (§4.7, C7): two independent streams discover result
//! files — an object-store pub/sub notification (primary) and a
//! periodic backup poll over `bucket/prefix` (catches whatever the
//! primary path dropped) — and both converge on the same `ingest`
//! routine per file.

pub mod processor;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;

use crate::errors::{Result, SchedulerError};
use crate::external::{ObjectStore, PubSubMessage, Subscription};
use crate::guard::SingleFlightGuard as PollGuard;
use crate::ingest::processor::FileProcessor;
use crate::store::SourceFileStore;

/// §6 ingestor flags: `pubSubFetchSize`/`MaxOutstandingMessages`
/// (default 10) and `filesProcessedInParallel`/`NumGoroutines`
/// (default 4). `backup_poll_scope` validation against the poll
/// interval (`BackupPollScope >= BackupPollInterval`) happens at
/// startup in `crate::config`.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub bucket: String,
    pub prefix: String,
    pub pubsub_fetch_size: usize,
    pub files_processed_in_parallel: usize,
    pub backup_poll_scope: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            pubsub_fetch_size: 10,
            files_processed_in_parallel: 4,
            backup_poll_scope: Duration::from_secs(4 * 3600),
        }
    }
}

/// Summary of one batch/poll, logged at `info!`.
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub seen: usize,
    pub ingested: usize,
    pub skipped_not_json: usize,
    pub failed: usize,
}

struct BusyGuard<'a> {
    busy: &'a AtomicUsize,
}

impl<'a> BusyGuard<'a> {
    fn enter(busy: &'a AtomicUsize) -> Self {
        busy.fetch_add(1, Ordering::Relaxed);
        Self { busy }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.fetch_sub(1, Ordering::Relaxed);
    }
}

pub struct Ingestor<O: ObjectStore> {
    object_store: Arc<O>,
    source_files: Arc<SourceFileStore>,
    primary: Arc<dyn FileProcessor>,
    tryjob: Option<Arc<dyn FileProcessor>>,
    busy: AtomicUsize,
    backup_guard: PollGuard,
}

impl<O: ObjectStore> Ingestor<O> {
    pub fn new(
        object_store: Arc<O>,
        source_files: Arc<SourceFileStore>,
        primary: Arc<dyn FileProcessor>,
        tryjob: Option<Arc<dyn FileProcessor>>,
    ) -> Self {
        Self { object_store, source_files, primary, tryjob, busy: AtomicUsize::new(0), backup_guard: PollGuard::new() }
    }

    /// Files currently mid-`process` — the `busy` gauge (§4.7).
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }

    /// The shared per-file routine both streams funnel into: extension
    /// filter, processor routing, fetch, process, mark ingested.
    /// Returns whether the file was actually processed (`false` for a
    /// non-`.json` file or one no processor claims — both acked, not
    /// errors).
    async fn ingest(&self, bucket: &str, name: &str, now: DateTime<Utc>) -> Result<bool> {
        if !name.ends_with(".json") {
            return Ok(false);
        }

        let processor: &Arc<dyn FileProcessor> = if self.primary.handles_file(name) {
            &self.primary
        } else if let Some(t) = self.tryjob.as_ref().filter(|t| t.handles_file(name)) {
            t
        } else {
            tracing::warn!(file = %name, "no processor claims this file, acknowledging without work");
            return Ok(false);
        };

        let _busy = BusyGuard::enter(&self.busy);
        let data = self.object_store.get(bucket, name).await?;
        processor.process(name, &data, now).await?;
        self.source_files.set_ingested(name, now).await?;
        Ok(true)
    }

    /// Pull and process up to `cfg.pubsub_fetch_size` notifications,
    /// concurrency bounded by `cfg.files_processed_in_parallel`
    /// (§4.7's `NumGoroutines`). Ack/Nack driven by
    /// [`SchedulerError::is_retryable`].
    pub async fn run_pubsub_batch<S: Subscription>(
        &self,
        subscription: &S,
        cfg: &IngestConfig,
        now: DateTime<Utc>,
    ) -> Result<IngestReport> {
        let messages = subscription.pull(cfg.pubsub_fetch_size).await?;
        let mut report = IngestReport { seen: messages.len(), ..Default::default() };

        let parallelism = cfg.files_processed_in_parallel.max(1);
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let outcomes: Vec<(PubSubMessage, Result<bool>)> = stream::iter(messages)
            .map(|message| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                    let name = object_name(&message);
                    let result = match &name {
                        Some(name) => self.ingest(&cfg.bucket, name, now).await,
                        None => Err(SchedulerError::InvalidSpec("notification missing objectId attribute".into())),
                    };
                    (message, result)
                }
            })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        for (message, result) in outcomes {
            match result {
                Ok(true) => {
                    subscription.ack(&message.id).await?;
                    report.ingested += 1;
                }
                Ok(false) => {
                    subscription.ack(&message.id).await?;
                    report.skipped_not_json += 1;
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(message_id = %message.id, error = %err, "ingest nacked for redelivery");
                    subscription.nack(&message.id).await?;
                    report.failed += 1;
                }
                Err(err) => {
                    tracing::error!(message_id = %message.id, error = %err, "ingest permanently failed, acking");
                    subscription.ack(&message.id).await?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Catches whatever the primary path dropped: list everything
    /// created within `backup_poll_scope` and ingest whatever
    /// `SourceFiles.WasIngested` hasn't already seen. Single-flight per
    /// ingestor (§5 "each long-running loop runs at most one iteration
    /// at a time").
    pub async fn backup_poll(&self, cfg: &IngestConfig, now: DateTime<Utc>) -> Result<Option<IngestReport>> {
        let Some(_permit) = self.backup_guard.try_enter() else {
            tracing::debug!(bucket = %cfg.bucket, "backup poll already in flight, skipping");
            return Ok(None);
        };
        self.run_backup_poll(cfg, now).await.map(Some)
    }

    async fn run_backup_poll(&self, cfg: &IngestConfig, now: DateTime<Utc>) -> Result<IngestReport> {
        let scope = chrono::Duration::from_std(cfg.backup_poll_scope).unwrap_or_else(|_| chrono::Duration::zero());
        let since = now - scope;
        let objects = self.object_store.list(&cfg.bucket, &cfg.prefix, since).await?;
        let mut report = IngestReport { seen: objects.len(), ..Default::default() };

        for object in objects {
            if self.source_files.was_ingested(&object.name).await? {
                continue;
            }
            match self.ingest(&cfg.bucket, &object.name, now).await {
                Ok(true) => report.ingested += 1,
                Ok(false) => report.skipped_not_json += 1,
                Err(err) => {
                    tracing::error!(file = %object.name, error = %err, "backup poll ingest failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            bucket = %cfg.bucket,
            seen = report.seen,
            ingested = report.ingested,
            failed = report.failed,
            "backup poll complete"
        );
        Ok(report)
    }
}

fn object_name(message: &PubSubMessage) -> Option<String> {
    message.attributes.get("objectId").cloned()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::ingest::processor::PrimaryBranchProcessor;
    use crate::store::ExpectationStore;
    use crate::store::entities::{expectation, expectation_delta, expectation_record, source_file};
    use crate::external::{InMemoryObjectStore, InMemoryPubSub};
    use sea_orm::{ConnectionTrait, Database, Schema};

    async fn test_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let builder = db.get_database_backend();
        let schema = Schema::new(builder);
        for stmt in [
            builder.build(&schema.create_table_from_entity(expectation::Entity)),
            builder.build(&schema.create_table_from_entity(expectation_record::Entity)),
            builder.build(&schema.create_table_from_entity(expectation_delta::Entity)),
            builder.build(&schema.create_table_from_entity(source_file::Entity)),
        ] {
            db.execute(stmt).await.unwrap();
        }
        db
    }

    fn file_bytes() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "user": "dm-bot",
            "triage_time": Utc::now(),
            "deltas": [{"grouping_id": "test/corpus", "digest": "abc123", "label": "positive"}],
        }))
        .unwrap()
    }

    fn cfg() -> IngestConfig {
        IngestConfig { bucket: "skia-gold".into(), prefix: "dm-json-v1".into(), ..Default::default() }
    }

    fn notification(object_id: &str) -> PubSubMessage {
        let mut attributes = HashMap::new();
        attributes.insert("objectId".to_string(), object_id.to_string());
        PubSubMessage { id: format!("msg-{object_id}"), attributes, data: Vec::new() }
    }

    #[tokio::test]
    async fn pubsub_path_ingests_and_marks_source_file() {
        let db = test_db().await;
        let expectations = Arc::new(ExpectationStore::new(db));
        let object_store = Arc::new(InMemoryObjectStore::new());
        let source_files = Arc::new(SourceFileStore::new(test_source_file_db().await));
        let primary = Arc::new(PrimaryBranchProcessor::new(expectations));
        let ingestor = Ingestor::new(object_store.clone(), source_files.clone(), primary, None);

        let now = Utc::now();
        object_store.put("skia-gold", "dm-json-v1/results.json", file_bytes(), now);

        let pubsub = InMemoryPubSub::new();
        pubsub.publish(notification("dm-json-v1/results.json")).await;

        let report = ingestor.run_pubsub_batch(&pubsub, &cfg(), now).await.unwrap();
        assert_eq!(report.ingested, 1);
        assert!(source_files.was_ingested("dm-json-v1/results.json").await.unwrap());
    }

    #[tokio::test]
    async fn missing_object_id_attribute_is_permanently_failed() {
        let db = test_db().await;
        let expectations = Arc::new(ExpectationStore::new(db));
        let object_store = Arc::new(InMemoryObjectStore::new());
        let source_files = Arc::new(SourceFileStore::new(test_source_file_db().await));
        let primary = Arc::new(PrimaryBranchProcessor::new(expectations));
        let ingestor = Ingestor::new(object_store, source_files, primary, None);

        let pubsub = InMemoryPubSub::new();
        pubsub.publish(PubSubMessage { id: "bad".into(), attributes: HashMap::new(), data: Vec::new() }).await;

        let report = ingestor.run_pubsub_batch(&pubsub, &cfg(), Utc::now()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.ingested, 0);
    }

    #[tokio::test]
    async fn backup_poll_skips_already_ingested_files() {
        let db = test_db().await;
        let expectations = Arc::new(ExpectationStore::new(db));
        let object_store = Arc::new(InMemoryObjectStore::new());
        let source_files = Arc::new(SourceFileStore::new(test_source_file_db().await));
        let primary = Arc::new(PrimaryBranchProcessor::new(expectations));
        let ingestor = Ingestor::new(object_store.clone(), source_files.clone(), primary, None);

        let now = Utc::now();
        object_store.put("skia-gold", "dm-json-v1/a.json", file_bytes(), now);
        object_store.put("skia-gold", "dm-json-v1/b.json", file_bytes(), now);
        source_files.set_ingested("dm-json-v1/a.json", now).await.unwrap();

        let report = ingestor.backup_poll(&cfg(), now).await.unwrap().unwrap();
        assert_eq!(report.seen, 2);
        assert_eq!(report.ingested, 1, "a.json was already ingested and must be skipped");
    }

    async fn test_source_file_db() -> sea_orm::DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        let builder = db.get_database_backend();
        let schema = Schema::new(builder);
        let stmt = builder.build(&schema.create_table_from_entity(source_file::Entity));
        db.execute(stmt).await.unwrap();
        db
    }
}
