//! Time and issuer checks over decoded claims
//!
//! Unlike a verifier that stops at the first problem, every check here is
//! evaluated and recorded so that callers can report all violations at once.
//!
//! ```
//! use courier_clock::{DurationSecs, UnixTime};
//! use courier_tokens::{Issuer, TokenClaims, ValidationConfig, Violation};
//!
//! let config = ValidationConfig::default()
//!     .with_tolerance(DurationSecs(0))
//!     .add_allowed_issuer(Issuer::from_static("https://auth.example.com"));
//!
//! let claims = TokenClaims::new()
//!     .with_expiration(UnixTime(999))
//!     .with_issuer("https://elsewhere.example.com");
//!
//! let validation = config.validate(&claims, UnixTime(1_000));
//! assert!(!validation.is_valid());
//! assert!(validation.is_expired());
//! assert_eq!(validation.violations(), [Violation::Expired, Violation::InvalidIssuer]);
//! ```

use std::fmt;

use courier_clock::{Clock, DurationSecs, UnixTime};
use serde::Deserialize;

use crate::{Issuer, TokenClaims};

/// Configuration for claim validation
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    tolerance: DurationSecs,
    allowed_issuers: Vec<Issuer>,
    max_age: Option<DurationSecs>,
}

impl Default for ValidationConfig {
    /// Default validation configuration
    ///
    /// Allows 60 seconds of clock skew, accepts any issuer, and places no
    /// limit on token age.
    fn default() -> Self {
        Self {
            tolerance: DurationSecs(60),
            allowed_issuers: Vec::new(),
            max_age: None,
        }
    }
}

impl ValidationConfig {
    /// Sets the clock-skew tolerance applied to `exp`, `iat`, and `nbf`
    pub fn with_tolerance(self, tolerance: DurationSecs) -> Self {
        Self { tolerance, ..self }
    }

    /// Adds an issuer to the allow-list, enabling issuer validation
    pub fn add_allowed_issuer(mut self, issuer: Issuer) -> Self {
        self.allowed_issuers.push(issuer);
        self
    }

    /// Adds issuers to the allow-list, enabling issuer validation
    pub fn extend_allowed_issuers<I: IntoIterator<Item = Issuer>>(mut self, issuers: I) -> Self {
        self.allowed_issuers.extend(issuers);
        self
    }

    /// Rejects tokens issued longer than `max_age` ago
    pub fn with_max_age(self, max_age: DurationSecs) -> Self {
        Self {
            max_age: Some(max_age),
            ..self
        }
    }

    /// The configured clock-skew tolerance
    pub fn tolerance(&self) -> DurationSecs {
        self.tolerance
    }

    /// Validates claims against the current time of `clock`
    pub fn validate_with_clock<C: Clock>(&self, claims: &TokenClaims, clock: &C) -> Validation {
        self.validate(claims, clock.now())
    }

    /// Validates claims as of `now`
    ///
    /// `is_expired` on the result reports whether `exp` has actually passed,
    /// while the [`Violation::Expired`] violation only appears once the
    /// tolerance has also elapsed.
    pub fn validate(&self, claims: &TokenClaims, now: UnixTime) -> Validation {
        let mut violations = Vec::new();

        if let Some(exp) = claims.exp() {
            if exp < now - self.tolerance {
                violations.push(Violation::Expired);
            }
        }

        if let Some(iat) = claims.iat() {
            if iat > now + self.tolerance {
                violations.push(Violation::IssuedInFuture);
            }
        }

        if let Some(nbf) = claims.nbf() {
            if nbf > now + self.tolerance {
                violations.push(Violation::NotYetValid);
            }
        }

        if !self.allowed_issuers.is_empty() {
            if let Some(iss) = claims.iss() {
                if !self.allowed_issuers.iter().any(|allowed| allowed == iss) {
                    violations.push(Violation::InvalidIssuer);
                }
            }
        }

        if let (Some(max_age), Some(iat)) = (self.max_age, claims.iat()) {
            if now - iat > max_age {
                violations.push(Violation::TooOld);
            }
        }

        Validation {
            is_expired: claims.exp().map_or(false, |exp| exp <= now),
            violations,
        }
    }
}

/// Validates claims as of `now` against `config`
#[inline]
pub fn validate(claims: &TokenClaims, now: UnixTime, config: &ValidationConfig) -> Validation {
    config.validate(claims, now)
}

/// A single failed check
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Violation {
    /// `exp` has passed, beyond the tolerance
    Expired,
    /// `iat` lies in the future, beyond the tolerance
    IssuedInFuture,
    /// `nbf` lies in the future, beyond the tolerance
    NotYetValid,
    /// `iss` is not in the allow-list
    InvalidIssuer,
    /// The token was issued longer ago than the configured maximum age
    TooOld,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Expired => "token expired",
            Self::IssuedInFuture => "token issued in the future",
            Self::NotYetValid => "token not yet valid",
            Self::InvalidIssuer => "invalid issuer",
            Self::TooOld => "token too old",
        })
    }
}

/// The outcome of validating a set of claims
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct Validation {
    is_expired: bool,
    violations: Vec<Violation>,
}

impl Validation {
    /// Whether no check failed
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// Whether `exp` is at or before the validation time
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired
    }

    /// Every failed check, in evaluation order
    #[inline]
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.violations.is_empty() {
            return f.write_str("valid");
        }

        for (idx, violation) in self.violations.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            fmt::Display::fmt(violation, f)?;
        }
        Ok(())
    }
}
