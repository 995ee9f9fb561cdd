use courier_clock::{Clock, DurationSecs, System, UnixTime};
use serde::{Deserialize, Serialize};

use crate::TokenClaims;

/// The lifetime of an attached token, derived from its claims
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLifetime {
    lifetime: DurationSecs,
    issued: UnixTime,
    stale: UnixTime,
    expiry: UnixTime,
}

/// A token's lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
    /// The token is fresh and valid
    Fresh,
    /// The token is valid, but should be replaced soon
    Stale,
    /// The token is no longer valid
    Expired,
}

impl TokenLifetime {
    /// Gets the token's lifetime
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }

    /// Gets the time that the token was issued
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time that the token will become stale
    #[inline]
    pub fn stale(&self) -> UnixTime {
        self.stale
    }

    /// Gets the time that the token will expire
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Gets the interval during which the token is valid
    #[inline]
    pub fn valid_interval(&self) -> std::ops::Range<UnixTime> {
        self.issued..self.expiry
    }

    /// Gets the token's lifetime status based on the current time
    /// as reported by the provided clock
    #[inline]
    pub fn token_status_with_clock<C: Clock>(&self, clock: &C) -> TokenStatus {
        self.token_status_at(clock.now())
    }

    /// Gets the token's lifetime status as of the provided time
    #[inline]
    pub fn token_status_at(&self, time: UnixTime) -> TokenStatus {
        if time < self.stale {
            TokenStatus::Fresh
        } else if time < self.expiry {
            TokenStatus::Stale
        } else {
            TokenStatus::Expired
        }
    }

    /// Gets a duration for how much longer the token would be fresh as of the
    /// provided time
    #[inline]
    pub fn until_stale_at(&self, time: UnixTime) -> DurationSecs {
        self.stale - time
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }
}

/// Configuration for determining how long a token should be considered fresh
#[derive(Clone, Debug)]
pub struct TokenLifetimeConfig<C = System> {
    freshness_period: f64,
    min_staleness_period: DurationSecs,
    default_lifetime: DurationSecs,
    clock: C,
}

impl Default for TokenLifetimeConfig {
    /// Default lifetime configuration
    ///
    /// Uses a freshness period of 75%, with a minimum stale period of 30 seconds, and using
    /// the system clock. Tokens without an `exp` claim are given a one hour lifetime.
    fn default() -> Self {
        Self {
            freshness_period: 0.75,
            min_staleness_period: DurationSecs(30),
            default_lifetime: DurationSecs(3600),
            clock: System,
        }
    }
}

impl TokenLifetimeConfig {
    /// Constructs a new lifetime configuration
    ///
    /// A token using this configuration will be considered stale when the `freshness_period`
    /// (represented as a ratio of the token's lifetime) has passed. The token will always
    /// be considered stale with at least `min_staleness_period` remaining.
    pub fn new(freshness_period: f64, min_staleness_period: DurationSecs) -> Self {
        Self {
            freshness_period,
            min_staleness_period,
            ..Self::default()
        }
    }
}

impl<C> TokenLifetimeConfig<C> {
    /// Sets a custom clock to be used
    pub fn with_clock<D>(self, clock: D) -> TokenLifetimeConfig<D> {
        TokenLifetimeConfig {
            freshness_period: self.freshness_period,
            min_staleness_period: self.min_staleness_period,
            default_lifetime: self.default_lifetime,
            clock,
        }
    }

    /// Sets the lifetime assumed for tokens that carry no `exp` claim
    pub fn with_default_lifetime(self, default_lifetime: DurationSecs) -> Self {
        Self {
            default_lifetime,
            ..self
        }
    }

    fn time_to_stale(&self, issued: UnixTime, expiry: UnixTime) -> UnixTime {
        let fresh_until = issued + (expiry - issued) * self.freshness_period;
        let latest = expiry - self.min_staleness_period;
        fresh_until.min(latest).max(issued)
    }
}

impl<C: Clock> TokenLifetimeConfig<C> {
    /// Derives the lifetime of a token from its claims
    ///
    /// The issue time is `iat` when present, otherwise now. The expiry is
    /// `exp` when present, otherwise the default lifetime after issue.
    pub fn lifetime_of(&self, claims: &TokenClaims) -> TokenLifetime {
        let issued = claims.iat().unwrap_or_else(|| self.clock.now());
        let expiry = claims
            .exp()
            .unwrap_or_else(|| issued + self.default_lifetime);

        TokenLifetime {
            lifetime: expiry - issued,
            issued,
            stale: self.time_to_stale(issued, expiry),
            expiry,
        }
    }
}
