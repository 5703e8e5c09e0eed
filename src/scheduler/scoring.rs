//! Candidate scoring (§4.5 step 3).
//!
//! `score = priority × decay(age) × (1 + retryPenalty(attempt)) ×
//! jobForceBoost`, with ties broken by `(newest commit, lexicographically
//! smallest taskSpecName)`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A `(repo, revision, taskSpec)` triple the scheduler evaluated in a
/// tick, carrying everything `score` and the tie-break need.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub repo: String,
    pub revision: String,
    pub commit_id: String,
    pub task_spec_name: String,
    pub priority: f64,
    pub commit_time: DateTime<Utc>,
    pub attempt: u32,
    pub is_force: bool,
    /// Set when `is_force` is true: the forced job this candidate is
    /// exclusive to, distinguishing its `TaskKey` from the shared one
    /// non-forced jobs at the same revision use.
    pub forced_job_id: Option<Uuid>,
}

pub fn decay(score_decay_24h: f64, age_hours: f64) -> f64 {
    (score_decay_24h.ln() * age_hours / 24.0).exp()
}

pub fn retry_penalty(attempt: u32) -> f64 {
    -0.5 * attempt as f64
}

pub fn score(candidate: &Candidate, now: DateTime<Utc>, score_decay_24h: f64) -> f64 {
    let age_hours = (now - candidate.commit_time).num_seconds().max(0) as f64 / 3600.0;
    let job_force_boost = if candidate.is_force { 2.0 } else { 1.0 };
    candidate.priority * decay(score_decay_24h, age_hours) * (1.0 + retry_penalty(candidate.attempt)) * job_force_boost
}

/// Sort candidates descending by score, breaking ties by newest commit
/// then lexicographically smallest task-spec name (§4.5 step 3).
pub fn rank(candidates: &mut [Candidate], now: DateTime<Utc>, score_decay_24h: f64) {
    candidates.sort_by(|a, b| {
        let sa = score(a, now, score_decay_24h);
        let sb = score(b, now, score_decay_24h);
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.commit_id.cmp(&a.commit_id))
            .then_with(|| a.task_spec_name.cmp(&b.task_spec_name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, priority: f64, attempt: u32, is_force: bool, now: DateTime<Utc>) -> Candidate {
        Candidate {
            repo: "repo".into(),
            revision: "rev".into(),
            commit_id: "001000000001".into(),
            task_spec_name: name.into(),
            priority,
            commit_time: now,
            attempt,
            is_force,
            forced_job_id: None,
        }
    }

    #[test]
    fn higher_priority_scores_higher_all_else_equal() {
        let now = Utc::now();
        let low = candidate("a", 0.2, 0, false, now);
        let high = candidate("b", 0.8, 0, false, now);
        assert!(score(&high, now, 0.5) > score(&low, now, 0.5));
    }

    #[test]
    fn retry_penalty_reduces_score_with_higher_attempt() {
        let now = Utc::now();
        let first = candidate("a", 0.5, 0, false, now);
        let retried = candidate("a", 0.5, 2, false, now);
        assert!(score(&first, now, 0.5) > score(&retried, now, 0.5));
    }

    #[test]
    fn force_boost_doubles_score() {
        let now = Utc::now();
        let normal = candidate("a", 0.5, 0, false, now);
        let forced = candidate("a", 0.5, 0, true, now);
        assert!((score(&forced, now, 0.5) - 2.0 * score(&normal, now, 0.5)).abs() < 1e-9);
    }

    #[test]
    fn decay_reduces_score_with_age() {
        let now = Utc::now();
        let mut aged = candidate("a", 0.5, 0, false, now);
        aged.commit_time = now - chrono::Duration::hours(48);
        let fresh = candidate("a", 0.5, 0, false, now);
        assert!(score(&aged, now, 0.5) < score(&fresh, now, 0.5));
    }

    #[test]
    fn ties_break_by_newest_commit_then_name() {
        let now = Utc::now();
        let mut a = candidate("zzz", 0.5, 0, false, now);
        a.commit_id = "001000000001".into();
        let mut b = candidate("aaa", 0.5, 0, false, now);
        b.commit_id = "001000000002".into();
        let mut candidates = vec![a.clone(), b.clone()];
        rank(&mut candidates, now, 0.5);
        assert_eq!(candidates[0].commit_id, "001000000002", "newest commit wins the tie");
    }
}
