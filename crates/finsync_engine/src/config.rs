//! Configuration for the sync engine.

use crate::gateway::FetchParams;
use finsync_model::CollectionType;
use rand::Rng;
use std::time::Duration;

/// Default number of deletion tombstones kept per collection.
pub const DEFAULT_TOMBSTONE_LIMIT: usize = 10_000;

/// Shortest heartbeat interval accepted; shorter intervals are raised to it.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for a sync session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Push channel endpoint (e.g. `wss://api.example.com/stream`).
    pub endpoint: String,
    /// Collections to hydrate, fetch and subscribe to.
    pub collections: Vec<CollectionType>,
    /// Parameters passed to every bulk fetch.
    pub fetch_params: FetchParams,
    /// Retry policy for failed bulk fetches.
    pub fetch_retry: RetryConfig,
    /// Reconnect policy of the push channel.
    pub reconnect: BackoffConfig,
    /// Heartbeat expectations of the push channel.
    pub heartbeat: HeartbeatConfig,
    /// Interval of the backstop refresh; `None` disables it.
    pub refresh_interval: Option<Duration>,
    /// Maximum delay between a committed mutation and its cache save.
    pub cache_debounce: Duration,
    /// Timeout for a single fetch request or channel connect.
    pub request_timeout: Duration,
    /// Maximum deletion tombstones kept per collection.
    pub tombstone_limit: usize,
}

impl SyncConfig {
    /// Creates a configuration for all collections with default policies.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            collections: CollectionType::ALL.to_vec(),
            fetch_params: FetchParams::default(),
            fetch_retry: RetryConfig::default(),
            reconnect: BackoffConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            refresh_interval: Some(Duration::from_secs(60)),
            cache_debounce: Duration::from_millis(500),
            request_timeout: Duration::from_secs(30),
            tombstone_limit: DEFAULT_TOMBSTONE_LIMIT,
        }
    }

    /// Restricts the session to the given collections.
    pub fn with_collections(mut self, collections: impl IntoIterator<Item = CollectionType>) -> Self {
        let mut collections: Vec<_> = collections.into_iter().collect();
        collections.sort();
        collections.dedup();
        self.collections = collections;
        self
    }

    /// Sets the bulk fetch parameters.
    pub fn with_fetch_params(mut self, params: FetchParams) -> Self {
        self.fetch_params = params;
        self
    }

    /// Sets the fetch retry policy.
    pub fn with_fetch_retry(mut self, retry: RetryConfig) -> Self {
        self.fetch_retry = retry;
        self
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: BackoffConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the heartbeat expectations.
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Sets the backstop refresh interval.
    pub fn with_refresh_interval(mut self, interval: Option<Duration>) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Sets how many deletion tombstones each collection keeps.
    ///
    /// The oldest tombstones are evicted first.
    pub fn with_tombstone_limit(mut self, limit: usize) -> Self {
        self.tombstone_limit = limit;
        self
    }

    /// Sets the cache save debounce.
    pub fn with_cache_debounce(mut self, debounce: Duration) -> Self {
        self.cache_debounce = debounce;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// How a backoff delay is randomized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the ceiling itself.
    None,
    /// Pick uniformly between zero and the ceiling.
    #[default]
    Full,
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Ceiling of the first delay.
    pub base_delay: Duration,
    /// Upper bound of every delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive ceilings.
    pub multiplier: f64,
    /// Randomization applied below the ceiling.
    pub jitter: Jitter,
}

impl BackoffConfig {
    /// Creates a backoff policy with full jitter and a multiplier of 2.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter: Jitter::Full,
        }
    }

    /// Sets the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter mode.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the ceiling for a 0-indexed failure count.
    pub fn ceiling_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);
        let max = self.max_delay.as_secs_f64();
        if secs.is_nan() || secs >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Samples a delay for a 0-indexed failure count.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling_for(attempt);
        match self.jitter {
            Jitter::None => ceiling,
            Jitter::Full => {
                let nanos = ceiling.as_nanos().min(u64::MAX as u128) as u64;
                Duration::from_nanos(rand::thread_rng().gen_range(0..=nanos))
            }
        }
    }

    /// Creates a stateful backoff sequence.
    pub fn build(&self) -> Backoff {
        Backoff {
            config: self.clone(),
            attempts: 0,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

/// A running backoff sequence.
///
/// Each call to [`Backoff::next_delay`] counts one failure; [`Backoff::reset`]
/// returns to the base delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    /// Returns the delay before the next attempt and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.config.delay_for(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        delay
    }

    /// Returns the ceiling the next call to `next_delay` will sample under.
    pub fn ceiling(&self) -> Duration {
        self.config.ceiling_for(self.attempts)
    }

    /// Returns the number of failures counted since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns to the base delay.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Retry policy for bounded operations such as bulk fetches.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay policy between attempts.
    pub backoff: BackoffConfig,
}

impl RetryConfig {
    /// Creates a retry policy with default delays.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: BackoffConfig::new(Duration::from_millis(200), Duration::from_secs(10)),
        }
    }

    /// Creates a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffConfig::new(Duration::ZERO, Duration::ZERO).with_jitter(Jitter::None),
        }
    }

    /// Sets the delay policy.
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        self.backoff.delay_for(attempt - 1)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Heartbeat expectations of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Expected interval between backend heartbeats.
    pub interval: Duration,
    /// Number of missed heartbeats before the channel degrades.
    pub missed_threshold: u32,
}

impl HeartbeatConfig {
    /// Creates heartbeat expectations.
    ///
    /// The interval is raised to [`MIN_HEARTBEAT_INTERVAL`] and the
    /// threshold to one.
    pub fn new(interval: Duration, missed_threshold: u32) -> Self {
        Self {
            interval: interval.max(MIN_HEARTBEAT_INTERVAL),
            missed_threshold: missed_threshold.max(1),
        }
    }

    /// Returns how long the channel may stay silent before degrading.
    ///
    /// Never zero, even for a hand-built config.
    pub fn silence_limit(&self) -> Duration {
        self.interval
            .max(MIN_HEARTBEAT_INTERVAL)
            .saturating_mul(self.missed_threshold.max(1))
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_heartbeat_interval_is_floored() {
        let heartbeat = HeartbeatConfig::new(Duration::ZERO, 0);
        assert_eq!(heartbeat.interval, MIN_HEARTBEAT_INTERVAL);
        assert_eq!(heartbeat.silence_limit(), MIN_HEARTBEAT_INTERVAL);

        let hand_built = HeartbeatConfig {
            interval: Duration::ZERO,
            missed_threshold: 0,
        };
        assert!(!hand_built.silence_limit().is_zero());
    }

    #[test]
    fn tombstone_limit_defaults() {
        let config = SyncConfig::new("wss://stream.example.com");
        assert_eq!(config.tombstone_limit, DEFAULT_TOMBSTONE_LIMIT);
        assert_eq!(config.with_tombstone_limit(16).tombstone_limit, 16);
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("wss://stream.example.com")
            .with_collections([CollectionType::Cards, CollectionType::Wallets, CollectionType::Cards])
            .with_refresh_interval(None)
            .with_request_timeout(Duration::from_secs(5));

        assert_eq!(config.endpoint, "wss://stream.example.com");
        assert_eq!(
            config.collections,
            vec![CollectionType::Wallets, CollectionType::Cards]
        );
        assert_eq!(config.refresh_interval, None);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn default_config_covers_all_collections() {
        let config = SyncConfig::default();
        assert_eq!(config.collections.len(), CollectionType::ALL.len());
        assert_eq!(config.refresh_interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let config = BackoffConfig::new(Duration::from_millis(100), Duration::from_millis(1000))
            .with_jitter(Jitter::None);
        let mut backoff = config.build();

        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay()).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1000),
                Duration::from_millis(1000),
            ]
        );
        assert_eq!(backoff.attempts(), 6);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn full_jitter_stays_under_ceiling() {
        let config = BackoffConfig::new(Duration::from_millis(50), Duration::from_secs(2));
        let mut backoff = config.build();
        for _ in 0..20 {
            let ceiling = backoff.ceiling();
            let delay = backoff.next_delay();
            assert!(delay <= ceiling);
            assert!(ceiling <= Duration::from_secs(2));
        }
    }

    #[test]
    fn ceiling_survives_huge_attempts() {
        let config = BackoffConfig::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(config.ceiling_for(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn retry_no_retry() {
        let config = RetryConfig::no_retry();
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10).with_backoff(
            BackoffConfig::new(Duration::from_secs(1), Duration::from_secs(5))
                .with_multiplier(10.0)
                .with_jitter(Jitter::None),
        );

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
    }

    #[test]
    fn heartbeat_silence_limit() {
        let heartbeat = HeartbeatConfig::new(Duration::from_secs(10), 3);
        assert_eq!(heartbeat.silence_limit(), Duration::from_secs(30));
        assert_eq!(HeartbeatConfig::new(Duration::from_secs(10), 0).missed_threshold, 1);
    }
}
