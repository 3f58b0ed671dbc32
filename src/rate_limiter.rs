//! The rate limiter.
//!
//! A process-wide singleton parameterised by per-operation buckets. Each
//! bucket tracks three sliding windows (1s / 60s / 3600s) as sorted
//! timestamp deques; admission waits until adding one more timestamp would
//! not exceed any configured threshold, then records it. Different `(op,
//! key)` pairs proceed fully in parallel; the same pair is serialized
//! through its own `tokio::sync::Mutex`.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Configured thresholds for one operation.
#[derive(Debug, Clone, Copy)]
pub struct BucketConfig {
    pub requests_per_second: u32,
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1,
            requests_per_minute: 20,
            requests_per_hour: 1000,
        }
    }
}

/// How a bucket's key is scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    PerConversation,
    PerUrl,
}

struct Windows {
    second: VecDeque<Instant>,
    minute: VecDeque<Instant>,
    hour: VecDeque<Instant>,
}

impl Windows {
    fn new() -> Self {
        Self {
            second: VecDeque::new(),
            minute: VecDeque::new(),
            hour: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        prune_before(&mut self.second, now - Duration::from_secs(1));
        prune_before(&mut self.minute, now - Duration::from_secs(60));
        prune_before(&mut self.hour, now - Duration::from_secs(3600));
    }

    /// How long the caller must wait before one more admission would stay
    /// within every configured window, given the current contents.
    fn required_wait(&self, cfg: &BucketConfig, now: Instant) -> Duration {
        let mut wait = Duration::ZERO;
        wait = wait.max(window_wait(&self.second, cfg.requests_per_second, Duration::from_secs(1), now));
        wait = wait.max(window_wait(&self.minute, cfg.requests_per_minute, Duration::from_secs(60), now));
        wait = wait.max(window_wait(&self.hour, cfg.requests_per_hour, Duration::from_secs(3600), now));
        wait
    }

    fn record(&mut self, now: Instant) {
        self.second.push_back(now);
        self.minute.push_back(now);
        self.hour.push_back(now);
    }
}

fn prune_before(deque: &mut VecDeque<Instant>, cutoff: Instant) {
    while let Some(&front) = deque.front() {
        if front < cutoff {
            deque.pop_front();
        } else {
            break;
        }
    }
}

/// If the window is already at its limit, how long until its oldest entry
/// ages out and admits one more.
fn window_wait(deque: &VecDeque<Instant>, limit: u32, window: Duration, now: Instant) -> Duration {
    if limit == 0 || (deque.len() as u32) < limit {
        return Duration::ZERO;
    }
    let oldest = deque[deque.len() - limit as usize];
    let expiry = oldest + window;
    expiry.saturating_duration_since(now)
}

struct BucketState {
    global: Mutex<Windows>,
    per_key: Mutex<HashMap<String, Windows>>,
}

/// The rate limiter. Construct once per adapter process and share by
/// reference; it never fails, it only delays.
pub struct RateLimiter {
    configs: HashMap<String, (Scope, BucketConfig)>,
    default_config: BucketConfig,
    state: Mutex<HashMap<String, BucketState>>,
}

impl RateLimiter {
    pub fn new(configs: HashMap<String, (Scope, BucketConfig)>) -> Self {
        Self {
            configs,
            default_config: BucketConfig::default(),
            state: Mutex::new(HashMap::new()),
        }
    }

    fn config_for(&self, op: &str) -> (Scope, BucketConfig) {
        self.configs
            .get(op)
            .copied()
            .unwrap_or((Scope::Global, self.default_config))
    }

    /// Wait until emitting one additional request for `op`/`scope_key`
    /// would not exceed any configured window, then record the admission.
    ///
    /// Cancellation-safe: if the caller's future is dropped while waiting,
    /// no timestamp is recorded and no lock is held past the await point.
    pub async fn limit_request(&self, op: &str, scope_key: Option<&str>) {
        let (scope, cfg) = self.config_for(op);

        {
            let mut state = self.state.lock().await;
            state.entry(op.to_string()).or_insert_with(|| BucketState {
                global: Mutex::new(Windows::new()),
                per_key: Mutex::new(HashMap::new()),
            });
        }

        loop {
            let now = Instant::now();
            let wait = {
                let state = self.state.lock().await;
                let bucket = state.get(op).expect("bucket initialized above");

                let mut global = bucket.global.lock().await;
                global.prune(now);
                let global_wait = global.required_wait(&cfg, now);

                let key_wait = match (scope, scope_key) {
                    (Scope::Global, _) => Duration::ZERO,
                    (_, Some(key)) => {
                        let mut per_key = bucket.per_key.lock().await;
                        let windows = per_key.entry(key.to_string()).or_insert_with(Windows::new);
                        windows.prune(now);
                        windows.required_wait(&cfg, now)
                    }
                    (_, None) => Duration::ZERO,
                };

                global_wait.max(key_wait)
            };

            if wait.is_zero() {
                let state = self.state.lock().await;
                let bucket = state.get(op).expect("bucket initialized above");
                let commit_now = Instant::now();
                bucket.global.lock().await.record(commit_now);
                if let (Scope::PerConversation | Scope::PerUrl, Some(key)) = (scope, scope_key) {
                    let mut per_key = bucket.per_key.lock().await;
                    per_key
                        .entry(key.to_string())
                        .or_insert_with(Windows::new)
                        .record(commit_now);
                }
                return;
            }

            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_immediately_under_limit() {
        let mut configs = HashMap::new();
        configs.insert(
            "send_message".to_string(),
            (
                Scope::Global,
                BucketConfig {
                    requests_per_second: 100,
                    requests_per_minute: 100,
                    requests_per_hour: 100,
                },
            ),
        );
        let limiter = RateLimiter::new(configs);
        let start = Instant::now();
        limiter.limit_request("send_message", None).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn delays_when_per_second_bucket_full() {
        let mut configs = HashMap::new();
        configs.insert(
            "send_message".to_string(),
            (
                Scope::Global,
                BucketConfig {
                    requests_per_second: 1,
                    requests_per_minute: 1000,
                    requests_per_hour: 1000,
                },
            ),
        );
        let limiter = RateLimiter::new(configs);
        limiter.limit_request("send_message", None).await;
        let start = Instant::now();
        limiter.limit_request("send_message", None).await;
        assert!(start.elapsed() >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn different_keys_do_not_block_each_other() {
        let mut configs = HashMap::new();
        configs.insert(
            "send_message".to_string(),
            (
                Scope::PerConversation,
                BucketConfig {
                    requests_per_second: 1,
                    requests_per_minute: 1000,
                    requests_per_hour: 1000,
                },
            ),
        );
        let limiter = RateLimiter::new(configs);
        limiter.limit_request("send_message", Some("conv-a")).await;
        let start = Instant::now();
        limiter.limit_request("send_message", Some("conv-b")).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
