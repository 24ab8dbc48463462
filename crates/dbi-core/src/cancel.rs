//! Cooperative cancellation shared by the session, the connection manager,
//! and whatever external trigger (signal handler, UI) stops a transfer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on how long a cancellable sleep goes without re-checking.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Shared "should exit" flag.
///
/// Checked at suspension points only: header reads, chunk boundaries, and
/// discovery backoff. A blocking transport call already in flight is never
/// interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `false` if the token was cancelled before the full duration
    /// elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_sleep_completes() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn test_sleep_returns_early_when_cancelled() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
