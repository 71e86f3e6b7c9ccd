//! Entity fixtures and test configurations.

use finsync_engine::{BackoffConfig, HeartbeatConfig, Jitter, RetryConfig, SyncConfig};
use finsync_model::{CollectionType, Credentials, Entity};
use serde_json::json;
use std::future::Future;
use std::time::Duration;

/// Endpoint used by every test configuration.
pub const TEST_ENDPOINT: &str = "ws://finsync.test/stream";

/// Default timeout for waiting on asynchronous effects in tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Creates a wallet entity.
pub fn wallet(id: &str, version: u64, balance: &str) -> Entity {
    Entity::new(id, version, json!({"balance": balance, "currency": "USD"}))
}

/// Creates a card entity.
pub fn card(id: &str, version: u64, status: &str) -> Entity {
    Entity::new(id, version, json!({"status": status, "last4": "4242"}))
}

/// Creates a transaction entity.
pub fn transaction(id: &str, version: u64, amount: &str) -> Entity {
    Entity::new(id, version, json!({"amount": amount, "state": "settled"}))
}

/// Creates a notification entity.
pub fn notification(id: &str, version: u64, read: bool) -> Entity {
    Entity::new(id, version, json!({"read": read, "title": "Payment received"}))
}

/// Returns test credentials.
pub fn credentials() -> Credentials {
    Credentials::new("test-token")
}

/// Deterministic reconnect backoff: 10ms, 20ms, 40ms, capped at 80ms.
pub fn fast_backoff() -> BackoffConfig {
    BackoffConfig::new(Duration::from_millis(10), Duration::from_millis(80)).with_jitter(Jitter::None)
}

/// Configuration for wallets only, with fast retries and no timers that
/// could fire during a test.
pub fn test_config() -> SyncConfig {
    test_config_for([CollectionType::Wallets])
}

/// Like [`test_config`], for the given collections.
pub fn test_config_for(collections: impl IntoIterator<Item = CollectionType>) -> SyncConfig {
    SyncConfig::new(TEST_ENDPOINT)
        .with_collections(collections)
        .with_reconnect(fast_backoff())
        .with_fetch_retry(
            RetryConfig::new(2).with_backoff(BackoffConfig::new(
                Duration::from_millis(5),
                Duration::from_millis(10),
            )),
        )
        .with_heartbeat(HeartbeatConfig::new(Duration::from_secs(3600), 1))
        .with_refresh_interval(None)
        .with_cache_debounce(Duration::from_millis(20))
        .with_request_timeout(Duration::from_secs(2))
}

/// Polls `condition` until it holds or `timeout` elapses.
///
/// Returns the final value of the condition.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Awaits `future`, panicking if it does not finish within [`WAIT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting for test condition")
}

/// Installs a test log subscriber honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixtures_carry_versions() {
        assert_eq!(wallet("w", 3, "1.00").version.get(), 3);
        assert_eq!(card("c", 1, "active").data["status"], "active");
    }

    #[test]
    fn test_config_disables_timers() {
        let config = test_config();
        assert_eq!(config.collections, vec![CollectionType::Wallets]);
        assert!(config.refresh_interval.is_none());
    }

    #[test]
    fn fast_backoff_is_deterministic() {
        let mut backoff = fast_backoff().build();
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
        assert_eq!(backoff.next_delay(), Duration::from_millis(20));
    }
}
