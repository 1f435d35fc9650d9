//! Rate Governor (RG): in-process global rolling window plus a per-account
//! minimum inter-send delay. Both are worker-local shared structures, guarded
//! by exclusive sections around mutation.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

/// Global rolling 1-second send window, shared across all lanes in a worker
/// process.
pub struct GlobalWindow {
    timestamps: AsyncMutex<VecDeque<Instant>>,
    max_per_second: u32,
}

impl GlobalWindow {
    pub fn new(max_per_second: u32) -> Self {
        Self {
            timestamps: AsyncMutex::new(VecDeque::new()),
            max_per_second,
        }
    }

    /// Blocks until a send slot is free, then reserves it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.timestamps.lock().await;
                let now = Instant::now();
                while let Some(&front) = window.front() {
                    if now.duration_since(front) >= Duration::from_secs(1) {
                        window.pop_front();
                    } else {
                        break;
                    }
                }

                if (window.len() as u32) < self.max_per_second {
                    window.push_back(now);
                    None
                } else {
                    let oldest = *window.front().expect("window full implies non-empty");
                    Some(Duration::from_secs(1).saturating_sub(now.duration_since(oldest)))
                }
            };

            match wait {
                None => return,
                Some(d) => sleep(d).await,
            }
        }
    }
}

/// Minimum spacing between consecutive sends on the same account lane.
pub struct PerAccountPacer {
    last_send: DashMap<String, Instant>,
    min_delay: Duration,
}

impl PerAccountPacer {
    pub fn new(min_delay_ms: u64, messages_per_minute: u32) -> Self {
        let from_rate_ms = if messages_per_minute > 0 {
            60_000 / messages_per_minute as u64
        } else {
            min_delay_ms
        };
        Self {
            last_send: DashMap::new(),
            min_delay: Duration::from_millis(min_delay_ms.max(from_rate_ms)),
        }
    }

    /// Blocks until `min_delay` has elapsed since this account's last send,
    /// then records the send time.
    pub async fn acquire(&self, account_id: &str) {
        let wait = {
            match self.last_send.get(account_id) {
                Some(last) => {
                    let elapsed = last.elapsed();
                    if elapsed < self.min_delay {
                        Some(self.min_delay - elapsed)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        if let Some(d) = wait {
            sleep(d).await;
        }
        self.last_send.insert(account_id.to_string(), Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn global_window_admits_up_to_capacity_immediately() {
        let window = Arc::new(GlobalWindow::new(3));
        let start = Instant::now();
        window.acquire().await;
        window.acquire().await;
        window.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn global_window_blocks_beyond_capacity() {
        let window = Arc::new(GlobalWindow::new(1));
        window.acquire().await;

        let start = Instant::now();
        window.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn per_account_pacer_spaces_out_sends() {
        let pacer = PerAccountPacer::new(50, 0);
        let start = Instant::now();
        pacer.acquire("acct-1").await;
        pacer.acquire("acct-1").await;
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn per_account_pacer_is_independent_per_account() {
        let pacer = Arc::new(PerAccountPacer::new(200, 0));
        let counter = Arc::new(AtomicUsize::new(0));

        let start = Instant::now();
        let p1 = pacer.clone();
        let c1 = counter.clone();
        let h1 = tokio::spawn(async move {
            p1.acquire("acct-a").await;
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let p2 = pacer.clone();
        let c2 = counter.clone();
        let h2 = tokio::spawn(async move {
            p2.acquire("acct-b").await;
            c2.fetch_add(1, Ordering::SeqCst);
        });
        h1.await.unwrap();
        h2.await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[test]
    fn min_delay_uses_the_stricter_of_floor_and_rate() {
        let pacer = PerAccountPacer::new(3_500, 6);
        assert_eq!(pacer.min_delay, Duration::from_millis(10_000));

        let pacer = PerAccountPacer::new(3_500, 60);
        assert_eq!(pacer.min_delay, Duration::from_millis(3_500));
    }
}
