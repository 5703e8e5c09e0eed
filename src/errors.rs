//! Error types for the task-scheduler-core crate.
//!
//! This module defines a unified error enumeration used across the
//! store, indexer, spec evaluator, blacklist, scheduler, try-job
//! intake, and ingestion components. It follows the taxonomy in the
//! design document: not-found / already-exists / concurrent-update are
//! distinguished from retryable and permanent I/O failures so that
//! callers can apply the right propagation policy (surface, retry
//! locally, or nack/ack a pub/sub message).

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the scheduler core.
pub enum SchedulerError {
    /// Row or entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate key on insert.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic-lock version mismatch on `dbModified`.
    #[error("concurrent update on {0}, retry with a fresh snapshot")]
    ConcurrentUpdate(String),

    /// Transient failure talking to an external collaborator; safe to
    /// retry / nack.
    #[error("retryable error: {0}")]
    Retryable(String),

    /// Non-retryable failure from an external service.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Malformed `tasks.json` or blacklist rule.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// Malformed or missing configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Dependency graph contains a cycle or references an unknown name.
    #[error("invalid task graph: {0}")]
    InvalidGraph(String),

    /// Underlying database error.
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Outbound HTTP request to an external collaborator failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid regular expression in a blacklist pattern or extraction
    /// rule.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl SchedulerError {
    /// True when this error is recoverable by naive redelivery (pub/sub
    /// nack) without operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::Retryable(_) | SchedulerError::ConcurrentUpdate(_))
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
