//! Interactive abort of long waits

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep between two checks of the token
const SLICE: Duration = Duration::from_millis(100);

/// Shared flag tripped by Ctrl+C
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that Ctrl+C trips
    pub fn with_ctrlc() -> Result<Self, ctrlc::Error> {
        let token = Self::new();
        let flag = token.cancelled.clone();

        ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        })?;

        Ok(token)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` unless cancelled first; returns false when cancelled
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
            thread::sleep(SLICE.min(deadline - now));
        }
    }
}
