//! DHT and lookup configuration.

use std::time::Duration;

use thiserror::Error;

use crate::{
    DEFAULT_ALPHA, DEFAULT_K, DEFAULT_LOOKUP_TIMEOUT_SECS, DEFAULT_MAX_STALE_COUNT,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_S, DEFAULT_TICK_INTERVAL_MS, MAX_BUCKET_SIZE,
};

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A count that must be positive is zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// A duration that must be positive is zero
    #[error("{0} must be a non-zero duration")]
    ZeroDuration(&'static str),

    /// A count exceeds its upper bound
    #[error("{field} of {value} exceeds the maximum of {max}")]
    TooLarge {
        /// Name of the setting
        field: &'static str,
        /// Configured value
        value: usize,
        /// Largest accepted value
        max: usize,
    },

    /// The per-request timeout exceeds the global lookup deadline
    #[error("request timeout {request:?} exceeds lookup timeout {lookup:?}")]
    RequestTimeoutTooLong {
        /// Per-request timeout
        request: Duration,
        /// Global lookup deadline
        lookup: Duration,
    },
}

/// Configuration of a closest-nodes lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupConfig {
    /// Time after which an unanswered query signals its peer as stale
    pub request_timeout: Duration,
    /// Time after which the lookup ends with whatever it has
    pub lookup_timeout: Duration,
    /// Maximum number of outstanding queries
    pub alpha: usize,
    /// Number of seed peers and maximum number of results
    pub result_size: usize,
    /// Interval between two ticks of the lookup loop
    pub tick_interval: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            lookup_timeout: Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS),
            alpha: DEFAULT_ALPHA,
            result_size: DEFAULT_S,
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
        }
    }
}

impl LookupConfig {
    /// Checks the configuration for values the lookup cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alpha == 0 {
            return Err(ConfigError::Zero("alpha"));
        }
        if self.result_size == 0 {
            return Err(ConfigError::Zero("result_size"));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("tick_interval"));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("request_timeout"));
        }
        if self.lookup_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("lookup_timeout"));
        }
        if self.request_timeout > self.lookup_timeout {
            return Err(ConfigError::RequestTimeoutTooLong {
                request: self.request_timeout,
                lookup: self.lookup_timeout,
            });
        }
        Ok(())
    }
}

/// Configuration for the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTableConfig {
    /// Bucket size (k), also the number of peers returned per query
    pub bucket_size: usize,
    /// Stale signals after which a peer is evicted
    pub max_stale_count: u32,
}

impl Default for RoutingTableConfig {
    fn default() -> Self {
        Self {
            bucket_size: DEFAULT_K,
            max_stale_count: DEFAULT_MAX_STALE_COUNT,
        }
    }
}

impl RoutingTableConfig {
    /// Checks the configuration for values the routing table cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_size == 0 {
            return Err(ConfigError::Zero("bucket_size"));
        }
        if self.bucket_size > MAX_BUCKET_SIZE {
            return Err(ConfigError::TooLarge {
                field: "bucket_size",
                value: self.bucket_size,
                max: MAX_BUCKET_SIZE,
            });
        }
        if self.max_stale_count == 0 {
            return Err(ConfigError::Zero("max_stale_count"));
        }
        Ok(())
    }
}

/// DHT service configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhtConfig {
    /// Lookup configuration
    pub lookup: LookupConfig,
    /// Routing table configuration
    pub routing: RoutingTableConfig,
}

impl DhtConfig {
    /// Validates both sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lookup.validate()?;
        self.routing.validate()
    }
}
