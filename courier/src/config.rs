//! Orchestrator configuration
//!
//! Every field has a default, so hosts may deserialize a partial
//! configuration from their own settings. Durations are given in
//! milliseconds.
//!
//! ```
//! use std::time::Duration;
//! use courier::{BackoffStrategy, OrchestratorConfig};
//!
//! let config: OrchestratorConfig = serde_json::from_str(r#"{
//!     "base_url": "https://api.example.com/",
//!     "max_concurrent": 4,
//!     "default_retry_delay": 250,
//!     "backoff": "linear",
//!     "sweep_period": 10000
//! }"#).unwrap();
//!
//! assert_eq!(config.max_concurrent(), 4);
//! assert_eq!(config.default_retry_delay(), Duration::from_millis(250));
//! assert_eq!(config.backoff(), BackoffStrategy::Linear);
//! assert_eq!(config.default_retry_attempts(), 3);
//! ```

use std::time::Duration;

use courier_tokens::{SessionConfig, TokenCacheConfig, ValidationConfig, DEFAULT_STORE_KEY};
use serde::Deserialize;
use url::Url;

use crate::{
    gate::DEFAULT_MAX_CONCURRENT,
    response_cache::DEFAULT_CAPACITY,
    retry::{BackoffStrategy, DEFAULT_MAX_DELAY},
    RetryPolicy,
};

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use super::*;

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}

/// Configuration for an [`Orchestrator`][crate::Orchestrator]
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    base_url: Option<Url>,
    max_concurrent: usize,
    cache_capacity: usize,
    #[serde(deserialize_with = "millis::deserialize")]
    default_timeout: Duration,
    default_retry_attempts: u32,
    #[serde(deserialize_with = "millis::deserialize")]
    default_retry_delay: Duration,
    backoff: BackoffStrategy,
    #[serde(deserialize_with = "millis::deserialize")]
    max_retry_delay: Duration,
    cache_by_default: bool,
    #[serde(deserialize_with = "millis::deserialize")]
    default_cache_ttl: Duration,
    require_auth_by_default: bool,
    #[serde(deserialize_with = "millis::option::deserialize")]
    sweep_period: Option<Duration>,
    validation: ValidationConfig,
    token_cache: TokenCacheConfig,
    token_store_key: String,
}

impl Default for OrchestratorConfig {
    /// Default orchestrator configuration
    ///
    /// Allows six calls in flight and caches up to 50 `GET` responses for
    /// five minutes each. Attempts time out after 30 seconds and are made up
    /// to three times, backing off exponentially from one second up to 30
    /// seconds. Tokens are attached when valid but not required. No
    /// background sweeper is run.
    fn default() -> Self {
        Self {
            base_url: None,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            cache_capacity: DEFAULT_CAPACITY,
            default_timeout: Duration::from_secs(30),
            default_retry_attempts: 3,
            default_retry_delay: Duration::from_millis(1000),
            backoff: BackoffStrategy::Exponential,
            max_retry_delay: DEFAULT_MAX_DELAY,
            cache_by_default: true,
            default_cache_ttl: Duration::from_secs(300),
            require_auth_by_default: false,
            sweep_period: None,
            validation: ValidationConfig::default(),
            token_cache: TokenCacheConfig::default(),
            token_store_key: DEFAULT_STORE_KEY.to_owned(),
        }
    }
}

impl OrchestratorConfig {
    /// Resolves relative request URLs against `base_url`
    pub fn with_base_url(self, base_url: Url) -> Self {
        Self {
            base_url: Some(base_url),
            ..self
        }
    }

    /// Sets the number of calls allowed in flight at once
    pub fn with_max_concurrent(self, max_concurrent: usize) -> Self {
        Self {
            max_concurrent,
            ..self
        }
    }

    /// Sets the number of cached responses
    pub fn with_cache_capacity(self, cache_capacity: usize) -> Self {
        Self {
            cache_capacity,
            ..self
        }
    }

    /// Sets the per-attempt timeout used when a request does not set one
    pub fn with_default_timeout(self, default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            ..self
        }
    }

    /// Sets the attempts and base delay used when a request does not set them
    pub fn with_default_retry(self, attempts: u32, delay: Duration) -> Self {
        Self {
            default_retry_attempts: attempts,
            default_retry_delay: delay,
            ..self
        }
    }

    /// Sets how the delay grows between attempts
    pub fn with_backoff(self, backoff: BackoffStrategy) -> Self {
        Self { backoff, ..self }
    }

    /// Sets the cap on any single delay between attempts
    pub fn with_max_retry_delay(self, max_retry_delay: Duration) -> Self {
        Self {
            max_retry_delay,
            ..self
        }
    }

    /// Sets whether `GET` responses are cached when a request does not say
    pub fn with_cache_by_default(self, cache_by_default: bool) -> Self {
        Self {
            cache_by_default,
            ..self
        }
    }

    /// Sets the cache TTL used when a request does not set one
    pub fn with_default_cache_ttl(self, default_cache_ttl: Duration) -> Self {
        Self {
            default_cache_ttl,
            ..self
        }
    }

    /// Sets whether a valid token is required when a request does not say
    pub fn with_require_auth_by_default(self, require_auth_by_default: bool) -> Self {
        Self {
            require_auth_by_default,
            ..self
        }
    }

    /// Runs a background task purging expired responses every `period`
    pub fn with_sweep_period(self, period: Duration) -> Self {
        Self {
            sweep_period: Some(period),
            ..self
        }
    }

    /// Sets how attached tokens are validated
    pub fn with_validation(self, validation: ValidationConfig) -> Self {
        Self { validation, ..self }
    }

    /// Sets the bounds of the decoded-token cache
    pub fn with_token_cache(self, token_cache: TokenCacheConfig) -> Self {
        Self {
            token_cache,
            ..self
        }
    }

    /// Sets the key the attached token is persisted under
    pub fn with_token_store_key(self, token_store_key: impl Into<String>) -> Self {
        Self {
            token_store_key: token_store_key.into(),
            ..self
        }
    }

    /// The base for relative request URLs
    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    /// The number of calls allowed in flight at once
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// The number of cached responses
    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    /// The default per-attempt timeout
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// The default number of attempts
    pub fn default_retry_attempts(&self) -> u32 {
        self.default_retry_attempts
    }

    /// The default base delay between attempts
    pub fn default_retry_delay(&self) -> Duration {
        self.default_retry_delay
    }

    /// How the delay grows between attempts
    pub fn backoff(&self) -> BackoffStrategy {
        self.backoff
    }

    /// Whether `GET` responses are cached by default
    pub fn cache_by_default(&self) -> bool {
        self.cache_by_default
    }

    /// The default cache TTL
    pub fn default_cache_ttl(&self) -> Duration {
        self.default_cache_ttl
    }

    /// Whether a valid token is required by default
    pub fn require_auth_by_default(&self) -> bool {
        self.require_auth_by_default
    }

    /// The period of the background sweeper, if one is run
    pub fn sweep_period(&self) -> Option<Duration> {
        self.sweep_period
    }

    pub(crate) fn retry_policy(&self, attempts: u32, delay: Duration) -> RetryPolicy {
        RetryPolicy::new(attempts, delay)
            .with_strategy(self.backoff)
            .with_max_delay(self.max_retry_delay)
    }

    pub(crate) fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_validation(self.validation.clone())
            .with_cache(self.token_cache.clone())
            .with_store_key(self.token_store_key.clone())
    }
}
