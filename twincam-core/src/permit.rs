//! Single-slot permission flag.
//!
//! Guards "only one of these may be outstanding" resources with an
//! atomic compare-and-swap instead of a lock, so that callers on
//! transport or timer threads never block.

use std::sync::atomic::{AtomicBool, Ordering};

/// A capacity-1 permit.
#[derive(Debug, Default)]
pub struct Permit {
    claimed: AtomicBool,
}

impl Permit {
    pub const fn new() -> Self {
        Self {
            claimed: AtomicBool::new(false),
        }
    }

    /// Atomically move from free to claimed.
    ///
    /// Returns `false` without waiting if the permit is already held.
    pub fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Free the permit. Returns `true` if it was held.
    pub fn release(&self) -> bool {
        self.claimed.swap(false, Ordering::AcqRel)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn claim_release_cycle() {
        let permit = Permit::new();
        assert!(!permit.is_claimed());
        assert!(permit.try_claim());
        assert!(!permit.try_claim());
        assert!(permit.is_claimed());
        assert!(permit.release());
        assert!(!permit.release());
        assert!(permit.try_claim());
    }

    #[test]
    fn only_one_thread_wins() {
        let permit = Arc::new(Permit::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let permit = Arc::clone(&permit);
                std::thread::spawn(move || permit.try_claim())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
