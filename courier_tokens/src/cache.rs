//! Memoization of decoded claims

use std::{collections::HashMap, fmt, ops, sync::Arc};

use courier_clock::{Clock, DurationSecs, System, UnixTime};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::{codec, MalformedToken, TokenClaims};

/// Configuration for the bounds of a [`TokenCache`]
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TokenCacheConfig {
    capacity: usize,
    default_horizon: DurationSecs,
    eviction_fraction: f64,
}

impl Default for TokenCacheConfig {
    /// Default cache configuration
    ///
    /// Holds up to 100 tokens. Tokens without an `exp` claim are kept for an
    /// hour. When the capacity is exceeded, the 10% of entries closest to
    /// expiry are evicted.
    fn default() -> Self {
        Self {
            capacity: 100,
            default_horizon: DurationSecs(3600),
            eviction_fraction: 0.1,
        }
    }
}

impl TokenCacheConfig {
    /// Sets the maximum number of cached tokens
    pub fn with_capacity(self, capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            ..self
        }
    }

    /// Sets how long tokens without an `exp` claim are kept
    pub fn with_default_horizon(self, default_horizon: DurationSecs) -> Self {
        Self {
            default_horizon,
            ..self
        }
    }

    /// Sets the share of entries evicted once the capacity is exceeded
    pub fn with_eviction_fraction(self, eviction_fraction: f64) -> Self {
        Self {
            eviction_fraction: eviction_fraction.clamp(0.0, 1.0),
            ..self
        }
    }
}

/// Claims retained by a [`TokenCache`], with the time the entry lapses
#[derive(Debug, PartialEq)]
pub struct CachedClaims {
    claims: TokenClaims,
    expires_at: UnixTime,
}

impl CachedClaims {
    /// The decoded claims
    #[inline]
    pub fn claims(&self) -> &TokenClaims {
        &self.claims
    }

    /// When this entry stops being served from the cache
    ///
    /// This is the token's `exp` claim, or the cache's default horizon if the
    /// token does not expire.
    #[inline]
    pub fn expires_at(&self) -> UnixTime {
        self.expires_at
    }
}

impl ops::Deref for CachedClaims {
    type Target = TokenClaims;

    fn deref(&self) -> &Self::Target {
        &self.claims
    }
}

/// A bounded cache of decoded token claims keyed by the raw token
pub struct TokenCache<C = System> {
    entries: Mutex<HashMap<String, Arc<CachedClaims>>>,
    config: TokenCacheConfig,
    clock: C,
}

impl TokenCache<System> {
    /// Constructs a new cache using the system clock
    pub fn new(config: TokenCacheConfig) -> Self {
        Self::with_clock(config, System)
    }
}

impl Default for TokenCache<System> {
    fn default() -> Self {
        Self::new(TokenCacheConfig::default())
    }
}

impl<C> TokenCache<C> {
    /// Constructs a new cache using a custom clock
    pub fn with_clock(config: TokenCacheConfig, clock: C) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            clock,
        }
    }

    /// The number of tokens currently cached
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every cached token
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Drops a single token
    pub fn remove(&self, token: &str) {
        self.entries.lock().remove(token);
    }

    fn evict(&self, entries: &mut HashMap<String, Arc<CachedClaims>>) {
        let excess = entries.len().saturating_sub(self.config.capacity);
        if excess == 0 {
            return;
        }

        let fraction = (entries.len() as f64 * self.config.eviction_fraction).ceil() as usize;
        let count = fraction.max(excess);

        let mut by_expiry: Vec<(UnixTime, String)> = entries
            .iter()
            .map(|(k, v)| (v.expires_at, k.clone()))
            .collect();
        by_expiry.sort_unstable();

        for (_, key) in by_expiry.into_iter().take(count) {
            entries.remove(&key);
        }

        tracing::debug!(
            evicted = count,
            remaining = entries.len(),
            "token cache over capacity, evicted entries closest to expiry"
        );
    }
}

impl<C: Clock> TokenCache<C> {
    /// Returns the claims for `token`, decoding it if it is not cached
    ///
    /// # Errors
    ///
    /// Returns [`MalformedToken`] if the token cannot be decoded. Malformed
    /// tokens are never cached.
    pub fn get_or_decode(&self, token: &str) -> Result<Arc<CachedClaims>, MalformedToken> {
        let now = self.clock.now();

        {
            let mut entries = self.entries.lock();
            match entries.get(token) {
                Some(entry) if now <= entry.expires_at => {
                    tracing::trace!("token claims served from cache");
                    return Ok(Arc::clone(entry));
                }
                Some(_) => {
                    tracing::trace!("cached token claims lapsed, decoding again");
                    entries.remove(token);
                }
                None => {}
            }
        }

        let claims = codec::decode(token)?;
        let expires_at = claims
            .exp()
            .unwrap_or_else(|| now + self.config.default_horizon);
        let entry = Arc::new(CachedClaims { claims, expires_at });

        if now <= expires_at {
            let mut entries = self.entries.lock();
            entries.insert(token.to_owned(), Arc::clone(&entry));
            self.evict(&mut entries);
        }

        Ok(entry)
    }

    /// Removes every entry whose expiry has passed
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.expires_at);
        before - entries.len()
    }
}

impl<C: fmt::Debug> fmt::Debug for TokenCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("len", &self.len())
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish()
    }
}
