//! Single-task-in-flight guard for actor ticks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Busy flag claimed with compare-and-swap.
#[derive(Debug, Default)]
pub struct TickGuard {
    busy: Arc<AtomicBool>,
}

/// Held by the running tick task; releases the guard on drop.
#[derive(Debug)]
pub struct TickPermit {
    busy: Arc<AtomicBool>,
}

impl TickGuard {
    /// Claims the guard, or returns `None` if the previous tick is still running.
    pub fn try_begin(&self) -> Option<TickPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickPermit {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for TickPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_claim_is_dropped() {
        let guard = TickGuard::default();
        let permit = guard.try_begin().unwrap();
        assert!(guard.is_busy());
        assert!(guard.try_begin().is_none());
        drop(permit);
        assert!(!guard.is_busy());
        assert!(guard.try_begin().is_some());
    }
}
