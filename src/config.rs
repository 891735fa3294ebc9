//! Configuration for the gateway
//!
//! Carries the active provider identity and default model (the resolution
//! target for requests without an explicit override) plus tuning for the
//! background log queue.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Identity of the active model backend.
///
/// The interceptor stamps these onto every [`CallRecord`](crate::CallRecord);
/// requests without a model override resolve to `default_model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name as recorded in call logs ("openai", "anthropic", ...)
    pub provider: String,

    /// Model used when a request carries no override
    pub default_model: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            default_model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Top-level gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Active provider identity
    pub provider: ProviderConfig,

    /// Capacity of the bounded call-log submission queue
    pub log_queue_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            log_queue_capacity: crate::sink::DEFAULT_LOG_QUEUE_CAPACITY,
        }
    }
}

/// Load configuration from environment variables
pub fn from_env() -> GatewayConfig {
    let mut config = GatewayConfig::default();

    if let Ok(provider) = std::env::var("GATEWAY_PROVIDER") {
        config.provider.provider = provider;
    }

    if let Ok(model) = std::env::var("GATEWAY_DEFAULT_MODEL") {
        config.provider.default_model = model;
    }

    if let Ok(capacity) = std::env::var("GATEWAY_LOG_QUEUE_CAPACITY") {
        if let Ok(capacity) = capacity.parse::<usize>() {
            config.log_queue_capacity = capacity;
        }
    }

    config
}

/// Load configuration from a TOML file
pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<GatewayConfig> {
    let contents = std::fs::read_to_string(path)?;
    toml::from_str(&contents).map_err(|e| GatewayError::Config(e.to_string()))
}
