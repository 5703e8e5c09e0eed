//! Per-loop single-flight guard (§5 "Loops": "each long-running loop
//! runs at most one iteration at a time; overlapping ticks MUST be
//! prevented by a per-loop guard"). Re-exported as `scheduler::TickGuard`
//! and `indexer::CycleGuard` — same shape, different name per call site.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct SingleFlightGuard {
    running: AtomicBool,
}

/// Held while one iteration of the guarded loop is in flight; releases
/// the guard on drop so the next overlapping attempt can proceed.
pub struct GuardPermit<'a> {
    guard: &'a SingleFlightGuard,
}

impl Drop for GuardPermit<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::SeqCst);
    }
}

impl SingleFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to enter a new iteration. Returns `None` if one is
    /// already in flight — per §9 "Periodic tick vs. pub/sub trigger":
    /// a tick that would start while another is in progress is dropped,
    /// not queued.
    pub fn try_enter(&self) -> Option<GuardPermit<'_>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(GuardPermit { guard: self })
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_entry_is_rejected_while_first_is_held() {
        let guard = SingleFlightGuard::new();
        let first = guard.try_enter();
        assert!(first.is_some());
        assert!(guard.try_enter().is_none());
        drop(first);
        assert!(guard.try_enter().is_some());
    }
}
