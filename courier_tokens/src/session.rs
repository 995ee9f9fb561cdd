use std::{error, fmt, sync::Arc, time::Duration};

use courier_clock::{Clock, DurationSecs, System};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    store::PersistentStore, AccessToken, AccessTokenRef, CachedClaims, MalformedToken,
    TokenCache, TokenCacheConfig, TokenLifetime, TokenLifetimeConfig, TokenStatus, Validation,
    ValidationConfig,
};

/// Key under which the attached token is persisted by default
pub const DEFAULT_STORE_KEY: &str = "courier.access_token";

/// Configuration for a [`TokenSession`]
#[derive(Clone, Debug)]
pub struct SessionConfig {
    validation: ValidationConfig,
    cache: TokenCacheConfig,
    lifetime: TokenLifetimeConfig,
    store_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            validation: ValidationConfig::default(),
            cache: TokenCacheConfig::default(),
            lifetime: TokenLifetimeConfig::default(),
            store_key: DEFAULT_STORE_KEY.to_owned(),
        }
    }
}

impl SessionConfig {
    /// Sets the claim validation rules
    pub fn with_validation(self, validation: ValidationConfig) -> Self {
        Self { validation, ..self }
    }

    /// Sets the bounds of the decoded-claims cache
    pub fn with_cache(self, cache: TokenCacheConfig) -> Self {
        Self { cache, ..self }
    }

    /// Sets how token freshness is judged
    pub fn with_lifetime(self, lifetime: TokenLifetimeConfig) -> Self {
        Self { lifetime, ..self }
    }

    /// Sets the key the attached token is persisted under
    pub fn with_store_key(self, store_key: impl Into<String>) -> Self {
        Self {
            store_key: store_key.into(),
            ..self
        }
    }
}

/// The bearer token currently attached to a session
#[derive(Debug)]
pub struct AttachedToken {
    token: AccessToken,
    claims: Arc<CachedClaims>,
    lifetime: TokenLifetime,
}

impl AttachedToken {
    /// The raw token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.token
    }

    /// The token's decoded claims
    #[inline]
    pub fn claims(&self) -> &CachedClaims {
        &self.claims
    }

    /// The token's lifetime
    #[inline]
    pub fn lifetime(&self) -> &TokenLifetime {
        &self.lifetime
    }
}

/// Why the attached token cannot be used
#[derive(Clone, Debug, Error)]
pub enum AuthorizeError {
    /// No token is attached
    #[error("no token attached")]
    Missing,

    /// The attached token failed validation
    #[error("attached token rejected: {0}")]
    Rejected(Validation),
}

/// Validity summary for a raw token
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenValidity {
    /// Whether every validation check passed
    pub is_valid: bool,
    /// Whether the token's `exp` has passed
    pub is_expired: bool,
    /// Time until the token lapses, zero once it has
    ///
    /// A token without an `exp` claim never lapses and reports
    /// [`Duration::MAX`].
    pub remaining: Duration,
}

/// Expiry information about the attached token, for session-activity monitors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TokenExpiry {
    /// The token's lifecycle status
    pub status: TokenStatus,
    /// Time until the token should be replaced
    pub until_stale: DurationSecs,
    /// Time until the token expires
    pub until_expired: DurationSecs,
}

/// Holder of the bearer token attached to outbound requests
///
/// Attaching a token decodes it once through a [`TokenCache`] and, when a
/// [`PersistentStore`] is configured, persists it so that it can be restored
/// after a restart. Interested parties can [`subscribe()`][Self::subscribe()]
/// to be told whenever the attached token changes.
pub struct TokenSession<C = System> {
    current: watch::Sender<Option<Arc<AttachedToken>>>,
    cache: TokenCache<C>,
    validation: ValidationConfig,
    lifetime: TokenLifetimeConfig<C>,
    store: Option<Arc<dyn PersistentStore>>,
    store_key: String,
    clock: C,
}

impl TokenSession<System> {
    /// Constructs a session using the system clock
    pub fn new(config: SessionConfig) -> Self {
        Self::with_clock(config, System)
    }
}

impl Default for TokenSession<System> {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl<C: Clone> TokenSession<C> {
    /// Constructs a session using a custom clock
    pub fn with_clock(config: SessionConfig, clock: C) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            current,
            cache: TokenCache::with_clock(config.cache, clock.clone()),
            validation: config.validation,
            lifetime: config.lifetime.with_clock(clock.clone()),
            store: None,
            store_key: config.store_key,
            clock,
        }
    }
}

impl<C> TokenSession<C> {
    /// Persists attached tokens to `store`
    pub fn with_store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The currently attached token, if any
    pub fn current(&self) -> Option<Arc<AttachedToken>> {
        self.current.borrow().clone()
    }

    /// Subscribes to changes of the attached token
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<AttachedToken>>> {
        self.current.subscribe()
    }

    /// The decoded-claims cache backing this session
    pub fn cache(&self) -> &TokenCache<C> {
        &self.cache
    }

    /// Detaches the current token and removes it from the persistent store
    pub async fn clear_token(&self) {
        if let Some(previous) = self.current.send_replace(None) {
            self.cache.remove(previous.token.as_str());
            tracing::debug!("access token cleared");
        }

        if let Some(store) = &self.store {
            self.forget_persisted(store.as_ref()).await;
        }
    }

    async fn forget_persisted(&self, store: &dyn PersistentStore) {
        if let Err(error) = store.remove(&self.store_key).await {
            tracing::warn!(
                key = %self.store_key,
                error = (&*error as &dyn error::Error),
                "unable to remove access token from store"
            );
        }
    }
}

impl<C: Clock> TokenSession<C> {
    /// Attaches a raw token to the session
    ///
    /// The token is attached even if it currently fails validation; it will
    /// simply not be sent until it validates. The validation outcome as of
    /// now is returned so callers can react immediately.
    ///
    /// # Errors
    ///
    /// Returns [`MalformedToken`] if the token cannot be decoded, in which
    /// case the previously attached token, if any, is left in place.
    pub async fn attach_token(
        &self,
        token: impl Into<AccessToken>,
    ) -> Result<Validation, MalformedToken> {
        let token = token.into();
        let validation = self.install(token.clone())?;

        if let Some(store) = &self.store {
            if let Err(error) = store.set(&self.store_key, token.as_str()).await {
                tracing::warn!(
                    key = %self.store_key,
                    error = (&*error as &dyn error::Error),
                    "unable to persist access token"
                );
            }
        }

        Ok(validation)
    }

    /// Re-attaches a token previously persisted to the store
    ///
    /// A persisted token that is malformed or no longer validates is removed
    /// from the store instead, and any token already attached stays attached.
    pub async fn restore_token(&self) -> Option<Arc<AttachedToken>> {
        let store = self.store.as_ref()?;

        let raw = match store.get(&self.store_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                tracing::warn!(
                    key = %self.store_key,
                    error = (&*error as &dyn error::Error),
                    "unable to read access token from store"
                );
                return None;
            }
        };

        match self.prepare(AccessToken::new(raw)) {
            Ok((attached, validation)) if validation.is_valid() => {
                self.publish(attached, &validation);
                tracing::debug!("restored persisted access token");
                return self.current();
            }
            Ok((_, validation)) => {
                tracing::info!(%validation, "persisted access token no longer valid, discarding");
            }
            Err(error) => {
                tracing::warn!(
                    error = (&error as &dyn error::Error),
                    "persisted access token is malformed, discarding"
                );
            }
        }

        self.forget_persisted(store.as_ref()).await;
        None
    }

    /// Returns the attached token if it may be sent right now
    ///
    /// The token is re-validated on every call, so a token that expired
    /// since it was attached is rejected.
    pub fn authorize(&self) -> Result<Arc<AttachedToken>, AuthorizeError> {
        let token = self.current().ok_or(AuthorizeError::Missing)?;
        let validation = self.validation.validate(token.claims.claims(), self.clock.now());

        if validation.is_valid() {
            Ok(token)
        } else {
            Err(AuthorizeError::Rejected(validation))
        }
    }

    /// Reports the validity of an arbitrary raw token
    ///
    /// # Errors
    ///
    /// Returns [`MalformedToken`] if the token cannot be decoded.
    pub fn token_validity(&self, token: &str) -> Result<TokenValidity, MalformedToken> {
        let claims = self.cache.get_or_decode(token)?;
        let now = self.clock.now();
        let validation = self.validation.validate(claims.claims(), now);

        Ok(TokenValidity {
            is_valid: validation.is_valid(),
            is_expired: validation.is_expired(),
            remaining: match claims.claims().exp() {
                Some(_) => (claims.expires_at() - now).into(),
                None => Duration::MAX,
            },
        })
    }

    /// Expiry information about the attached token
    pub fn token_expiry(&self) -> Option<TokenExpiry> {
        let token = self.current()?;
        let now = self.clock.now();

        Some(TokenExpiry {
            status: token.lifetime.token_status_at(now),
            until_stale: token.lifetime.until_stale_at(now),
            until_expired: token.lifetime.until_expired_at(now),
        })
    }

    fn install(&self, token: AccessToken) -> Result<Validation, MalformedToken> {
        let (attached, validation) = self.prepare(token)?;
        self.publish(attached, &validation);
        Ok(validation)
    }

    fn prepare(&self, token: AccessToken) -> Result<(AttachedToken, Validation), MalformedToken> {
        let claims = self.cache.get_or_decode(token.as_str())?;
        let validation = self.validation.validate(claims.claims(), self.clock.now());
        let lifetime = self.lifetime.lifetime_of(claims.claims());

        Ok((
            AttachedToken {
                token,
                claims,
                lifetime,
            },
            validation,
        ))
    }

    fn publish(&self, attached: AttachedToken, validation: &Validation) {
        tracing::debug!(
            token.issued = attached.lifetime.issued().0,
            token.stale = attached.lifetime.stale().0,
            token.expiry = attached.lifetime.expiry().0,
            %validation,
            "access token attached"
        );

        self.current.send_replace(Some(Arc::new(attached)));
    }
}

impl<C: fmt::Debug> fmt::Debug for TokenSession<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenSession")
            .field("current", &*self.current.borrow())
            .field("cache", &self.cache)
            .field("validation", &self.validation)
            .field("store", &self.store.as_ref().map(|_| &self.store_key))
            .field("clock", &self.clock)
            .finish()
    }
}
