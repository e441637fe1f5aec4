//! Client configuration
//!
//! Every endpoint and tunable lives here so nothing is hardcoded at the
//! call sites. Values come from the builder or from `COMANDA_*`
//! environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Outbox drain cadence while online
const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(60);
/// Bound on a single HTTP request or delivery attempt
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Delivery attempts per pending order before it is terminal
const DEFAULT_MAX_RETRIES: u32 = 3;
/// First retry delay; doubles per recorded failure
const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(5);
/// Upper bound for the retry backoff
const DEFAULT_RETRY_MAX_DELAY: Duration = Duration::from_secs(60);
/// First reconnect delay for the change-event subscription
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);
/// Upper bound for the reconnect backoff
const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Client configuration
///
/// # Environment variables (`from_env`)
///
/// | Variable | Meaning | Default |
/// |----------|---------|---------|
/// | `COMANDA_API_URL` | Base URL of the ordering backend | `http://localhost:8080` |
/// | `COMANDA_EVENTS_ADDR` | `host:port` of the change-event stream | `localhost:9090` |
/// | `COMANDA_DATA_DIR` | Directory holding the local store files | `.` |
/// | `COMANDA_NAMESPACE` | Store file name stem | `comanda` |
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the ordering backend API
    pub api_base_url: String,
    /// Address of the change-event subscription (`host:port`)
    pub events_addr: String,
    /// Directory holding the store files
    pub data_dir: PathBuf,
    /// Store namespace; becomes `<ns>.redb` and `<ns>-cache.redb`
    pub namespace: String,
    /// Bound on a single HTTP request or delivery attempt
    pub request_timeout: Duration,
    /// Outbox drain cadence while online
    pub drain_interval: Duration,
    /// Delivery attempts per pending order before it is terminal
    pub max_retries: u32,
    /// First retry delay; doubles per recorded failure
    pub retry_base_delay: Duration,
    /// Upper bound for the retry backoff
    pub retry_max_delay: Duration,
    /// First reconnect delay for the event subscription
    pub reconnect_delay: Duration,
    /// Upper bound for the reconnect backoff
    pub reconnect_max_delay: Duration,
}

impl ClientConfig {
    pub fn new(
        api_base_url: impl Into<String>,
        events_addr: impl Into<String>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            events_addr: events_addr.into(),
            data_dir: data_dir.into(),
            namespace: "comanda".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            drain_interval: DEFAULT_DRAIN_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            retry_max_delay: DEFAULT_RETRY_MAX_DELAY,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
        }
    }

    /// Load configuration from the environment, falling back to local
    /// defaults for anything unset
    pub fn from_env() -> Self {
        let api_base_url =
            std::env::var("COMANDA_API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
        let events_addr =
            std::env::var("COMANDA_EVENTS_ADDR").unwrap_or_else(|_| "localhost:9090".to_string());
        let data_dir = std::env::var("COMANDA_DATA_DIR").unwrap_or_else(|_| ".".to_string());
        let namespace =
            std::env::var("COMANDA_NAMESPACE").unwrap_or_else(|_| "comanda".to_string());

        Self::new(api_base_url, events_addr, data_dir).with_namespace(namespace)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval = interval;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay = base;
        self.retry_max_delay = max;
        self
    }

    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_delay = base;
        self.reconnect_max_delay = max;
        self
    }

    /// Path of the main store file
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.redb", self.namespace))
    }

    /// Path of the cache router's private store file
    pub fn cache_store_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}-cache.redb", self.namespace))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080", "localhost:9090", ".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_paths_follow_namespace() {
        let config = ClientConfig::new("http://api", "events:9090", "/tmp/data")
            .with_namespace("table-7");
        assert_eq!(config.store_path(), PathBuf::from("/tmp/data/table-7.redb"));
        assert_eq!(
            config.cache_store_path(),
            PathBuf::from("/tmp/data/table-7-cache.redb")
        );
    }

    #[test]
    fn test_builders_override_defaults() {
        let config = ClientConfig::default()
            .with_max_retries(5)
            .with_retry_delays(Duration::from_secs(1), Duration::from_secs(8));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.retry_max_delay, Duration::from_secs(8));
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }
}
