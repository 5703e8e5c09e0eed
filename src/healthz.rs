//! `/healthz` (§9 "Health"): an `axum` endpoint that starts returning
//! `200 OK` once every long-running loop has completed its first pass,
//! so a load balancer or orchestrator doesn't route traffic to a
//! process that's still warming its commit/spec caches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

#[derive(Clone, Default)]
pub struct HealthState {
    ready: Arc<AtomicBool>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/healthz", get(healthz)).with_state(state)
}

async fn healthz(axum::extract::State(state): axum::extract::State<HealthState>) -> (StatusCode, &'static str) {
    if state.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "warming up")
    }
}
