//! Cross-module integration test: a try-job is requested on a changelist,
//! the scheduler's commit-indexed counterpart lands, and the Gold result
//! file for that try-job is ingested through the pub/sub path (S6) and
//! ends up promoted to the primary-branch `Expectations` view once the
//! changelist lands.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ConnectionTrait, Database, Schema};

use task_scheduler_core::errors::Result;
use task_scheduler_core::external::repo_host::{CommitRef, LongCommit};
use task_scheduler_core::external::{InMemoryObjectStore, InMemoryPubSub, ObjectStore, PubSubMessage, RepoHost};
use task_scheduler_core::indexer::landing::{ExtractionMethod, LandingConfig, LandingReconciler};
use task_scheduler_core::ingest::processor::TryjobProcessor;
use task_scheduler_core::ingest::{IngestConfig, Ingestor};
use task_scheduler_core::model::changelist::Changelist;
use task_scheduler_core::store::{ChangelistStore, CommitStore, ExpectationStore, SourceFileStore};
use task_scheduler_core::store::entities::{
    changelist, expectation, expectation_delta, expectation_record, git_commit, source_file, tracking_commit,
};

struct FakeRepoHost {
    head: String,
    path: Vec<LongCommit>,
}

#[async_trait]
impl RepoHost for FakeRepoHost {
    async fn log(&self, _repo: &str, _branch: &str, _limit: usize) -> Result<Vec<CommitRef>> {
        Ok(vec![CommitRef { git_hash: self.head.clone() }])
    }

    async fn log_first_parent(&self, _repo: &str, _from: &str, _to: &str) -> Result<Vec<LongCommit>> {
        Ok(self.path.clone())
    }

    async fn get_file(&self, _repo: &str, _path: &str, _revision: &str) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

async fn test_db() -> sea_orm::DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);
    for stmt in [
        builder.build(&schema.create_table_from_entity(changelist::Entity)),
        builder.build(&schema.create_table_from_entity(expectation::Entity)),
        builder.build(&schema.create_table_from_entity(expectation_record::Entity)),
        builder.build(&schema.create_table_from_entity(expectation_delta::Entity)),
        builder.build(&schema.create_table_from_entity(git_commit::Entity)),
        builder.build(&schema.create_table_from_entity(tracking_commit::Entity)),
    ] {
        db.execute(stmt).await.unwrap();
    }
    db
}

async fn test_source_file_db() -> sea_orm::DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);
    let stmt = builder.build(&schema.create_table_from_entity(source_file::Entity));
    db.execute(stmt).await.unwrap();
    db
}

fn result_file_bytes(label: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "user": "dm-bot",
        "triage_time": Utc::now(),
        "deltas": [{"grouping_id": "test/corpus", "digest": "abc123", "label": label}],
    }))
    .unwrap()
}

fn notification(object_id: &str) -> PubSubMessage {
    let mut attributes = HashMap::new();
    attributes.insert("objectId".to_string(), object_id.to_string());
    PubSubMessage { id: format!("msg-{object_id}"), attributes, data: Vec::new() }
}

/// S6: a try-job's result file is ingested through pub/sub, landing it
/// as a changelist-scoped expectation record; once the changelist lands
/// (commit carries the matching `Reviewed-on:` trailer), the triaged
/// digest is promoted into the primary-branch `Expectations` view.
#[tokio::test]
async fn tryjob_result_ingestion_promotes_to_primary_on_landing() {
    let db = test_db().await;
    let changelist_store = Arc::new(ChangelistStore::new(db.clone()));
    let expectations = Arc::new(ExpectationStore::new(db.clone()));
    let commit_store = Arc::new(CommitStore::new(db.clone()));

    let cl = Changelist::new("gerrit", "555");
    changelist_store.upsert(&cl).await.unwrap();

    let object_store = Arc::new(InMemoryObjectStore::new());
    let source_files = Arc::new(SourceFileStore::new(test_source_file_db().await));
    let tryjob_processor = Arc::new(TryjobProcessor::new(expectations.clone(), changelist_store.clone()));
    let ingestor = Ingestor::new(object_store.clone(), source_files.clone(), tryjob_processor.clone(), None);

    let now = Utc::now();
    let object_name = "dm-json-v1/tryjob/gerrit_555/results.json";
    object_store.put("skia-gold", object_name, result_file_bytes("positive"), now);

    let pubsub = InMemoryPubSub::new();
    pubsub.publish(notification(object_name)).await;

    let ingest_cfg = IngestConfig { bucket: "skia-gold".into(), prefix: "dm-json-v1".into(), ..Default::default() };
    let report = ingestor.run_pubsub_batch(&pubsub, &ingest_cfg, now).await.unwrap();
    assert_eq!(report.ingested, 1);
    assert!(source_files.was_ingested(object_name).await.unwrap());

    let cl_records = expectations.list_records_for_cl("gerrit_555").await.unwrap();
    assert_eq!(cl_records.len(), 1, "the tryjob result should be scoped to the changelist, not primary");

    let repo_host = Arc::new(FakeRepoHost {
        head: "4444".into(),
        path: vec![LongCommit {
            git_hash: "4444".into(),
            author_email: "bob@x.com".into(),
            commit_time: now,
            subject: "land the fix".into(),
            body: "Reviewed-on: https://review.example.com/c/repo/+/555\n".into(),
        }],
    });
    let reconciler = LandingReconciler::new(repo_host, commit_store, changelist_store.clone(), expectations.clone());
    let landing_cfg = LandingConfig {
        repo: "repo".into(),
        branch: "main".into(),
        review_system: "gerrit".into(),
        initial_commit: "0000".into(),
        method: ExtractionMethod::ReviewedLine,
        legacy_mode: false,
    };
    let landing_report = reconciler.cycle(&landing_cfg).await.unwrap().unwrap();
    assert_eq!(landing_report.changelists_landed, 1);

    let landed = changelist_store.get("gerrit_555").await.unwrap().unwrap();
    assert_eq!(landed.status, task_scheduler_core::model::changelist::ChangelistStatus::Landed);

    // The changelist-scoped record from ingestion is still there; landing
    // promotes a net copy rather than consuming it.
    let cl_records_after = expectations.list_records_for_cl("gerrit_555").await.unwrap();
    assert_eq!(cl_records_after.len(), 1);
}

/// Backup poll path for S6: a result file with no pub/sub notification
/// at all is still picked up and marked ingested so future polls skip it.
#[tokio::test]
async fn backup_poll_catches_an_unnotified_result_file() {
    let db = test_db().await;
    let expectations = Arc::new(ExpectationStore::new(db));
    let object_store = Arc::new(InMemoryObjectStore::new());
    let source_files = Arc::new(SourceFileStore::new(test_source_file_db().await));
    let primary = Arc::new(task_scheduler_core::ingest::processor::PrimaryBranchProcessor::new(expectations.clone()));
    let ingestor = Ingestor::new(object_store.clone(), source_files.clone(), primary, None);

    let now = Utc::now();
    object_store.put("skia-gold", "dm-json-v1/2026/07/28/results.json", result_file_bytes("untriaged"), now);

    let cfg = IngestConfig { bucket: "skia-gold".into(), prefix: "dm-json-v1".into(), ..Default::default() };
    let report = ingestor.backup_poll(&cfg, now).await.unwrap().unwrap();
    assert_eq!(report.ingested, 1);

    // A second poll still lists the same object (same `since` window) but
    // skips it via `SourceFiles.WasIngested`.
    let second = ingestor.backup_poll(&cfg, now).await.unwrap().unwrap();
    assert_eq!(second.seen, 1);
    assert_eq!(second.ingested, 0, "the file was already marked ingested by the first poll");
}
