//! Configuration for the connection layer
//!
//! Every field has a default, so a host only supplies what it wants to
//! override. JSON is the interchange format used by the FFI.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::backoff::BackoffPolicy;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatLinkConfig {
    /// Base URL of the REST API (e.g., "http://127.0.0.1:8000/api/v1")
    pub api_url: String,
    /// WebSocket endpoint; derived from `api_url` when absent
    pub socket_url: Option<String>,
    /// Poll scheduling and backoff
    pub polling: PollingConfig,
    /// WebSocket behaviour
    pub socket: SocketConfig,
    /// Capacity of the queue between transports and the supervisor (default: 1000)
    /// When full, domain events are dropped
    pub event_queue_size: usize,
    /// Capacity of each subscriber's queue (default: 256)
    pub subscriber_queue_size: usize,
    /// Poll the REST API while the socket is down (default: true)
    pub polling_fallback: bool,
    /// Timeout for REST requests in seconds (default: 30)
    pub request_timeout_secs: u64,
}

impl Default for ChatLinkConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000/api/v1".to_string(),
            socket_url: None,
            polling: PollingConfig::default(),
            socket: SocketConfig::default(),
            event_queue_size: 1000,
            subscriber_queue_size: 256,
            polling_fallback: true,
            request_timeout_secs: 30,
        }
    }
}

impl ChatLinkConfig {
    /// Create a configuration for the given API base URL
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::invalid_argument(format!("Invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Set an explicit WebSocket endpoint
    pub fn with_socket_url(mut self, url: impl Into<String>) -> Self {
        self.socket_url = Some(url.into());
        self
    }

    /// Replace the polling configuration
    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Replace the socket configuration
    pub fn with_socket(mut self, socket: SocketConfig) -> Self {
        self.socket = socket;
        self
    }

    /// Enable or disable the polling fallback
    pub fn with_polling_fallback(mut self, enabled: bool) -> Self {
        self.polling_fallback = enabled;
        self
    }

    /// WebSocket URL, converting the API URL's scheme when none was given
    pub fn ws_url(&self) -> String {
        if let Some(url) = &self.socket_url {
            return url.clone();
        }
        let ws_url = self
            .api_url
            .replace("https://", "wss://")
            .replace("http://", "ws://");
        format!("{}/ws/", ws_url.trim_end_matches('/'))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Check the configuration for values the transports cannot work with
    pub fn validate(&self) -> Result<()> {
        BackoffPolicy::new(&self.polling)?;
        if self.api_url.trim().is_empty() {
            return Err(Error::invalid_argument("api_url must not be empty"));
        }
        if self.event_queue_size == 0 || self.subscriber_queue_size == 0 {
            return Err(Error::invalid_argument("queue sizes must be positive"));
        }
        if self.socket.command_queue_size == 0 {
            return Err(Error::invalid_argument("command_queue_size must be positive"));
        }
        if self.socket.ping_interval_secs == 0 || self.socket.connect_timeout_secs == 0 {
            return Err(Error::invalid_argument("socket timings must be positive"));
        }
        Ok(())
    }
}

/// Poll scheduling parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval between polls while healthy, in milliseconds (default: 3000)
    pub base_interval_ms: u64,
    /// Upper bound for the backed-off interval, in milliseconds (default: 30000)
    pub max_interval_ms: u64,
    /// Growth factor applied per consecutive failure (default: 1.5)
    pub backoff_multiplier: f64,
    /// Consecutive failures before polling pauses (default: 5)
    pub max_retries: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            base_interval_ms: 3000,
            max_interval_ms: 30000,
            backoff_multiplier: 1.5,
            max_retries: 5,
        }
    }
}

/// WebSocket parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Ping interval in seconds (default: 30)
    pub ping_interval_secs: u64,
    /// Connection attempt timeout in seconds (default: 15)
    pub connect_timeout_secs: u64,
    /// Commands buffered while (re)connecting (default: 256)
    pub command_queue_size: usize,
    /// Reconnect after the connection drops (default: true)
    pub reconnect: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 30,
            connect_timeout_secs: 15,
            command_queue_size: 256,
            reconnect: true,
        }
    }
}
