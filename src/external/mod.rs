//! External collaborator boundaries (§6): the repo host, farm API,
//! pub/sub broker, review system, and object store. Each is a trait so
//! the core components (scheduler, indexer, try-job intake, ingestor)
//! can be driven against in-memory doubles in tests; an HTTP-backed
//! implementation is provided where the real service is a REST API.

pub mod farm;
pub mod objectstore;
pub mod pubsub;
pub mod repo_host;
pub mod review;

pub use farm::{FarmApi, FarmOutcome, FarmTaskResult, HttpFarmApi, TriggerTaskRequest};
pub use objectstore::{InMemoryObjectStore, ObjectMeta, ObjectStore};
pub use pubsub::{InMemoryPubSub, PubSubMessage, Subscription};
pub use repo_host::{CommitRef, HttpRepoHost, LongCommit, RepoHost};
pub use review::{HttpReviewSystem, ReviewSystem, TryJobRequest};
