//! Skip-if-busy flag shared by the periodic loops

use std::sync::atomic::{AtomicBool, Ordering};

/// Held while a tick runs; dropping it releases the flag even if the tick
/// panics or its task is aborted.
pub struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    /// `None` when another holder is active
    pub fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BusyGuard { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_drop() {
        let flag = AtomicBool::new(false);
        let guard = BusyGuard::try_acquire(&flag);
        assert!(guard.is_some());
        assert!(BusyGuard::try_acquire(&flag).is_none());

        drop(guard);
        assert!(!flag.load(Ordering::SeqCst));
        assert!(BusyGuard::try_acquire(&flag).is_some());
    }
}
