//! Delivery and transport configuration.

use std::time::Duration;

use cebroker_core::DEFAULT_HOP_CEILING;

/// Largest hop ceiling accepted by [`DeliveryConfig::validate`].
pub const MAX_HOP_CEILING: i32 = 255;

/// Default cap on response bodies read by the transport.
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Errors from validating configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("default hop ceiling must be between 1 and {MAX_HOP_CEILING}, got {0}")]
    HopCeiling(i32),
}

/// Settings consumed by the delivery engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Hop budget assumed for events that arrive without a hop extension.
    pub default_hop_ceiling: i32,
    /// Upper bound on the target dispatch in milliseconds. 0 means unbounded.
    /// The reply forward to the broker ingress is not covered.
    pub delivery_timeout_ms: u64,
    /// Hand failed deliveries to the target's retry queue instead of
    /// returning the error.
    pub retry_on_failure: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            default_hop_ceiling: DEFAULT_HOP_CEILING,
            delivery_timeout_ms: 0,
            retry_on_failure: false,
        }
    }
}

impl DeliveryConfig {
    /// The dispatch deadline, or `None` when unbounded.
    #[must_use]
    pub fn delivery_timeout(&self) -> Option<Duration> {
        (self.delivery_timeout_ms > 0).then(|| Duration::from_millis(self.delivery_timeout_ms))
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::HopCeiling`] if the ceiling is outside `1..=255`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_HOP_CEILING).contains(&self.default_hop_ceiling) {
            return Err(ConfigError::HopCeiling(self.default_hop_ceiling));
        }
        Ok(())
    }
}

/// HTTP client settings for [`HttpTransport`](crate::transport::HttpTransport).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum time to establish a TCP connection to a target or ingress.
    pub connect_timeout: Duration,
    /// Idle pooled connections are closed after this long.
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    /// Largest response body read from a target or ingress, in bytes.
    pub max_response_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

/// Command-line / environment surface for [`DeliveryConfig`].
///
/// Meant to be `#[command(flatten)]`-ed into a host binary's arguments.
#[derive(Debug, Clone, clap::Args)]
pub struct DeliveryArgs {
    /// Hop budget for events without a hop extension.
    #[arg(long, env = "DEFAULT_HOP_CEILING", default_value_t = DEFAULT_HOP_CEILING)]
    pub default_hop_ceiling: i32,

    /// Target dispatch timeout in milliseconds (0 = unbounded).
    #[arg(long, env = "DELIVERY_TIMEOUT_MS", default_value_t = 0)]
    pub delivery_timeout_ms: u64,

    /// Send failed deliveries to the target's retry queue.
    #[arg(long, env = "RETRY_ON_FAILURE")]
    pub retry_on_failure: bool,
}

impl From<DeliveryArgs> for DeliveryConfig {
    fn from(args: DeliveryArgs) -> Self {
        Self {
            default_hop_ceiling: args.default_hop_ceiling,
            delivery_timeout_ms: args.delivery_timeout_ms,
            retry_on_failure: args.retry_on_failure,
        }
    }
}
