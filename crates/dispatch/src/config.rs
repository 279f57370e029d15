use std::time::Duration;

use drawproxy_gateway::reconnect::ReconnectConfig;
use drawproxy_gateway::session::{DEFAULT_GATEWAY_URL, DEFAULT_INTENTS};
use drawproxy_gateway::SessionConfig;

use crate::selection::SelectMode;

/// Dispatch engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Gateway endpoint every session dials.
    pub gateway_url: String,
    pub gateway_intents: u64,
    pub hello_timeout: Duration,
    pub ready_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
    /// Strategy in force at startup; can be swapped at runtime.
    pub select_mode: SelectMode,
    /// Offset from UTC of the workers' daily quota boundary.
    pub quota_reset_utc_offset_minutes: i32,
    /// Grace period for closing every session on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            gateway_intents: DEFAULT_INTENTS,
            hello_timeout: Duration::from_secs(10),
            ready_timeout: Duration::from_secs(30),
            reconnect_initial: Duration::from_millis(1000),
            reconnect_max: Duration::from_millis(30_000),
            select_mode: SelectMode::BestWaitIdle,
            quota_reset_utc_offset_minutes: 480,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default                 |
    /// |----------------------------------|-------------------------|
    /// | `GATEWAY_URL`                    | Discord gateway v10     |
    /// | `GATEWAY_INTENTS`                | `513`                   |
    /// | `GATEWAY_HELLO_TIMEOUT_SECS`     | `10`                    |
    /// | `GATEWAY_READY_TIMEOUT_SECS`     | `30`                    |
    /// | `RECONNECT_INITIAL_MS`           | `1000`                  |
    /// | `RECONNECT_MAX_MS`               | `30000`                 |
    /// | `ACCOUNT_SELECT_MODE`            | `BestWaitIdle`          |
    /// | `QUOTA_RESET_UTC_OFFSET_MINUTES` | `480`                   |
    /// | `SHUTDOWN_TIMEOUT_SECS`          | `10`                    |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let gateway_url = std::env::var("GATEWAY_URL").unwrap_or(defaults.gateway_url);

        let gateway_intents: u64 = std::env::var("GATEWAY_INTENTS")
            .unwrap_or_else(|_| DEFAULT_INTENTS.to_string())
            .parse()
            .expect("GATEWAY_INTENTS must be a valid u64");

        let hello_timeout_secs: u64 = std::env::var("GATEWAY_HELLO_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("GATEWAY_HELLO_TIMEOUT_SECS must be a valid u64");

        let ready_timeout_secs: u64 = std::env::var("GATEWAY_READY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("GATEWAY_READY_TIMEOUT_SECS must be a valid u64");

        let reconnect_initial_ms: u64 = std::env::var("RECONNECT_INITIAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("RECONNECT_INITIAL_MS must be a valid u64");

        let reconnect_max_ms: u64 = std::env::var("RECONNECT_MAX_MS")
            .unwrap_or_else(|_| "30000".into())
            .parse()
            .expect("RECONNECT_MAX_MS must be a valid u64");

        let select_mode: SelectMode = std::env::var("ACCOUNT_SELECT_MODE")
            .unwrap_or_else(|_| "BestWaitIdle".into())
            .parse()
            .expect("ACCOUNT_SELECT_MODE must be BestWaitIdle, Random, Weighted or Polling");

        let quota_reset_utc_offset_minutes: i32 = std::env::var("QUOTA_RESET_UTC_OFFSET_MINUTES")
            .unwrap_or_else(|_| "480".into())
            .parse()
            .expect("QUOTA_RESET_UTC_OFFSET_MINUTES must be a valid i32");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        Self {
            gateway_url,
            gateway_intents,
            hello_timeout: Duration::from_secs(hello_timeout_secs),
            ready_timeout: Duration::from_secs(ready_timeout_secs),
            reconnect_initial: Duration::from_millis(reconnect_initial_ms),
            reconnect_max: Duration::from_millis(reconnect_max_ms),
            select_mode,
            quota_reset_utc_offset_minutes,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
        }
    }

    /// Session settings derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            gateway_url: self.gateway_url.clone(),
            intents: self.gateway_intents,
            hello_timeout: self.hello_timeout,
            ready_timeout: self.ready_timeout,
            close_timeout: self.shutdown_timeout,
            reconnect: ReconnectConfig {
                initial_delay: self.reconnect_initial,
                max_delay: self.reconnect_max,
                ..ReconnectConfig::default()
            },
        }
    }
}
