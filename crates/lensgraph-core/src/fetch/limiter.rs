use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Paces requests to the upstream. One limiter is shared by every
/// concurrent caller, so the minimum interval holds across workers.
#[derive(Debug, Default)]
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    issued: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until `min_interval` has passed since the previous request,
    /// then claims the slot. Callers queue on the lock in arrival order.
    pub async fn acquire(&self, min_interval: Duration) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
        self.issued.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests issued through this limiter so far, retries included.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}
