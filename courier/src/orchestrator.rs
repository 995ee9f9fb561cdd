//! The single entry point for outbound calls

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use courier_clock::{Clock, System};
use courier_tokens::{
    store::PersistentStore, AccessToken, AttachedToken, AuthorizeError, MalformedToken,
    TokenExpiry, TokenSession, TokenValidity, Validation,
};
use http::{header, HeaderValue, Method};
use parking_lot::Mutex;
use predicates::{prelude::*, BoxPredicate};
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    auth::bearer_header,
    hooks::{AuthErrorSink, AuthFailure, Hooks, Interceptor},
    keyer,
    retry::{self, RetryDecision},
    stats::{Stats, StatsSnapshot},
    AttemptFailure, ClassifiedError, ConcurrencyGate, DedupKey, ErrorKind, OrchestratorConfig,
    OutboundRequest, RequestOptions, Response, ResponseCache, Transport, TransportError,
    TransportRequest,
};

type Outcome = Result<Response, ClassifiedError>;

fn aborted(retry_count: u32) -> ClassifiedError {
    ClassifiedError::new(ErrorKind::Aborted, "request aborted by caller").with_retry_count(retry_count)
}

/// Builder for an [`Orchestrator`]
pub struct OrchestratorBuilder<T, C = System> {
    transport: T,
    config: OrchestratorConfig,
    clock: C,
    store: Option<Arc<dyn PersistentStore>>,
    hooks: Hooks,
    predicate: Option<BoxPredicate<OutboundRequest>>,
}

impl<T, C> OrchestratorBuilder<T, C> {
    /// Replaces the configuration
    pub fn with_config(self, config: OrchestratorConfig) -> Self {
        Self { config, ..self }
    }

    /// Uses a custom clock for token validation
    pub fn with_clock<D>(self, clock: D) -> OrchestratorBuilder<T, D> {
        OrchestratorBuilder {
            transport: self.transport,
            config: self.config,
            clock,
            store: self.store,
            hooks: self.hooks,
            predicate: self.predicate,
        }
    }

    /// Persists the attached token to `store`
    pub fn with_store(self, store: Arc<dyn PersistentStore>) -> Self {
        Self {
            store: Some(store),
            ..self
        }
    }

    /// Notifies `sink` of authentication failures
    pub fn with_auth_sink<S>(mut self, sink: S) -> Self
    where
        S: AuthErrorSink + 'static,
    {
        self.hooks.set_auth_sink(Arc::new(sink));
        self
    }

    /// Appends an interceptor; interceptors run in the order they are added
    pub fn with_interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.hooks.push_interceptor(Arc::new(interceptor));
        self
    }

    /// Only attaches the token to requests accepted by `predicate`
    ///
    /// By default the token is attached to every request.
    pub fn with_auth_predicate<P>(self, predicate: P) -> Self
    where
        P: Predicate<OutboundRequest> + Send + Sync + 'static,
    {
        Self {
            predicate: Some(predicate.boxed()),
            ..self
        }
    }
}

impl<T, C> OrchestratorBuilder<T, C>
where
    T: Transport,
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Builds the orchestrator
    ///
    /// If a sweep period is configured, the background sweeper is spawned on
    /// the current tokio runtime.
    pub fn build(self) -> Orchestrator<T, C> {
        let mut session = TokenSession::with_clock(self.config.session_config(), self.clock);
        if let Some(store) = self.store {
            session = session.with_store(store);
        }

        let cache = Arc::new(ResponseCache::new(self.config.cache_capacity()));
        let sweeper = self.config.sweep_period().and_then(|period| {
            if tokio::runtime::Handle::try_current().is_ok() {
                Some(cache.spawn_sweeper(period))
            } else {
                tracing::warn!("no tokio runtime available, response cache sweeper not started");
                None
            }
        });

        Orchestrator {
            inner: Arc::new(Inner {
                transport: self.transport,
                gate: ConcurrencyGate::new(self.config.max_concurrent()),
                config: self.config,
                session,
                cache,
                in_flight: Mutex::new(HashMap::new()),
                hooks: self.hooks,
                predicate: self.predicate.unwrap_or_else(|| predicate::always().boxed()),
                stats: Stats::default(),
                sweeper,
            }),
        }
    }
}

impl<T, C> fmt::Debug for OrchestratorBuilder<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("config", &self.config)
            .field("store", &self.store.is_some())
            .field("hooks", &self.hooks)
            .field(
                "predicate",
                &self.predicate.as_ref().map(|p| p.to_string()),
            )
            .finish()
    }
}

/// Performs outbound calls with deduplication, caching, backpressure,
/// retries, and token attachment
///
/// Every piece of shared state belongs to the orchestrator instance, so
/// independent orchestrators, such as one per backend, never interfere.
/// Cloning an orchestrator yields another handle to the same state.
pub struct Orchestrator<T, C = System> {
    inner: Arc<Inner<T, C>>,
}

impl<T, C> Clone for Orchestrator<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> Orchestrator<T> {
    /// Constructs an orchestrator with the default configuration
    pub fn new(transport: T) -> Self {
        Self::builder(transport).build()
    }

    /// Starts building an orchestrator
    pub fn builder(transport: T) -> OrchestratorBuilder<T> {
        OrchestratorBuilder {
            transport,
            config: OrchestratorConfig::default(),
            clock: System,
            store: None,
            hooks: Hooks::default(),
            predicate: None,
        }
    }
}

impl<T, C> Orchestrator<T, C>
where
    T: Transport,
    C: Clock + Clone + Send + Sync + 'static,
{
    /// Performs a call
    ///
    /// `url` is resolved against the configured base URL, if any. While an
    /// identical call is in flight, further callers share its outcome rather
    /// than sending again.
    ///
    /// # Errors
    ///
    /// Returns the [`ClassifiedError`] the call ended with once retries are
    /// exhausted or a non-retryable failure occurs.
    pub async fn dispatch(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<Response, ClassifiedError> {
        let cancel = options.cancel.clone().unwrap_or_default();
        let request = self.inner.resolve(method, url, body.as_ref(), options)?;
        let key = keyer::key(request.method(), request.url().as_str(), body.as_ref());

        let (rx, leader) = {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(rx) = in_flight.get(&key) {
                self.inner.stats.dedup_join();
                tracing::debug!(
                    method = %request.method(),
                    url = %request.url(),
                    "joining identical request already in flight"
                );
                (rx.clone(), None)
            } else {
                if request.is_cacheable() {
                    if let Some(response) = self.inner.cache.get(&key) {
                        self.inner.stats.cache_hit();
                        tracing::debug!(
                            method = %request.method(),
                            url = %request.url(),
                            "response served from cache"
                        );
                        return Ok(response);
                    }
                }

                let (tx, rx) = watch::channel(None);
                in_flight.insert(key.clone(), rx.clone());
                (rx, Some(tx))
            }
        };

        let task = leader.map(|tx| self.inner.spawn_leader(key, request, tx, cancel.clone()));

        if let Some(outcome) = await_outcome(rx, &cancel).await {
            return outcome;
        }

        match task {
            Some(task) => match task.await {
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                _ => Err(ClassifiedError::new(
                    ErrorKind::Aborted,
                    "request task ended without an outcome",
                )),
            },
            None => Err(ClassifiedError::new(
                ErrorKind::Aborted,
                "shared request ended without an outcome",
            )),
        }
    }

    /// Performs a `GET` call
    ///
    /// # Errors
    ///
    /// See [`dispatch()`][Self::dispatch()].
    pub async fn get(&self, url: &str, options: RequestOptions) -> Result<Response, ClassifiedError> {
        self.dispatch(Method::GET, url, None, options).await
    }

    /// Performs a `POST` call with a JSON body
    ///
    /// # Errors
    ///
    /// See [`dispatch()`][Self::dispatch()].
    pub async fn post(
        &self,
        url: &str,
        body: Value,
        options: RequestOptions,
    ) -> Result<Response, ClassifiedError> {
        self.dispatch(Method::POST, url, Some(body), options).await
    }

    /// Attaches a bearer token to subsequent calls
    ///
    /// # Errors
    ///
    /// Returns [`MalformedToken`] if the token cannot be decoded.
    pub async fn attach_token(
        &self,
        token: impl Into<AccessToken>,
    ) -> Result<Validation, MalformedToken> {
        self.inner.session.attach_token(token).await
    }

    /// Detaches the bearer token and drops every cached response
    ///
    /// Cached responses may have been obtained with the detached token.
    /// Calls still in flight complete, but their responses are not cached.
    pub async fn clear_token(&self) {
        self.inner.session.clear_token().await;
        self.inner.cache.clear();
    }

    /// Re-attaches a previously persisted token, if it is still valid
    pub async fn restore_token(&self) -> Option<Arc<AttachedToken>> {
        self.inner.session.restore_token().await
    }

    /// Reports the validity of a raw token
    ///
    /// # Errors
    ///
    /// Returns [`MalformedToken`] if the token cannot be decoded.
    pub fn token_validity(&self, token: &str) -> Result<TokenValidity, MalformedToken> {
        self.inner.session.token_validity(token)
    }

    /// Expiry information about the attached token
    pub fn token_expiry(&self) -> Option<TokenExpiry> {
        self.inner.session.token_expiry()
    }
}

impl<T, C> Orchestrator<T, C> {
    /// The token session backing this orchestrator
    pub fn session(&self) -> &TokenSession<C> {
        &self.inner.session
    }

    /// The response cache backing this orchestrator
    pub fn response_cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// The configuration in use
    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// The number of distinct calls currently in flight
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Current counters, for diagnostics
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl<T, C> fmt::Debug for Orchestrator<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.inner.config)
            .field("gate", &self.inner.gate)
            .field("in_flight", &self.in_flight())
            .field("cached", &self.inner.cache.len())
            .field("hooks", &self.inner.hooks)
            .field("predicate", &self.inner.predicate.to_string())
            .field("stats", &self.stats())
            .finish()
    }
}

async fn await_outcome(
    mut rx: watch::Receiver<Option<Outcome>>,
    cancel: &CancellationToken,
) -> Option<Outcome> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Some(Err(aborted(0))),
        settled = rx.wait_for(Option::is_some) => settled.ok().and_then(|outcome| outcome.clone()),
    }
}

struct Inner<T, C> {
    transport: T,
    config: OrchestratorConfig,
    session: TokenSession<C>,
    gate: ConcurrencyGate,
    cache: Arc<ResponseCache>,
    in_flight: Mutex<HashMap<DedupKey, watch::Receiver<Option<Outcome>>>>,
    hooks: Hooks,
    predicate: BoxPredicate<OutboundRequest>,
    stats: Stats,
    sweeper: Option<JoinHandle<()>>,
}

impl<T, C> Drop for Inner<T, C> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Removes an in-flight entry however the owning task ends
struct InFlightEntry<'a> {
    in_flight: &'a Mutex<HashMap<DedupKey, watch::Receiver<Option<Outcome>>>>,
    key: &'a DedupKey,
}

impl Drop for InFlightEntry<'_> {
    fn drop(&mut self) {
        self.in_flight.lock().remove(self.key);
    }
}

impl<T, C> Inner<T, C>
where
    T: Transport,
    C: Clock + Send + Sync + 'static,
{
    fn resolve(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        options: RequestOptions,
    ) -> Result<OutboundRequest, ClassifiedError> {
        let resolved = match self.config.base_url() {
            Some(base) => base.join(url),
            None => Url::parse(url),
        }
        .map_err(|err| {
            ClassifiedError::new(ErrorKind::InvalidRequest, format!("invalid URL {url:?}: {err}"))
        })?;

        let body = body
            .map(|body| serde_json::to_vec(body).map(Bytes::from))
            .transpose()
            .map_err(|err| {
                ClassifiedError::new(
                    ErrorKind::InvalidRequest,
                    format!("body cannot be serialized: {err}"),
                )
            })?;

        Ok(OutboundRequest {
            method,
            url: resolved,
            body,
            headers: options.headers,
            timeout: options.timeout.unwrap_or(self.config.default_timeout()),
            retry_attempts: options
                .retry_attempts
                .unwrap_or(self.config.default_retry_attempts()),
            retry_delay: options
                .retry_delay
                .unwrap_or(self.config.default_retry_delay()),
            require_auth: options
                .require_auth
                .unwrap_or(self.config.require_auth_by_default()),
            use_cache: options.use_cache.unwrap_or(self.config.cache_by_default()),
            cache_ttl: options
                .cache_ttl
                .unwrap_or(self.config.default_cache_ttl()),
        })
    }

    fn spawn_leader(
        self: &Arc<Self>,
        key: DedupKey,
        request: OutboundRequest,
        tx: watch::Sender<Option<Outcome>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let entry = InFlightEntry {
                in_flight: &inner.in_flight,
                key: &key,
            };

            let generation = inner.cache.generation();
            let outcome = inner.perform(&request, &cancel).await;

            if let Ok(response) = &outcome {
                if request.is_cacheable()
                    && inner.cache.put_if_current(
                        generation,
                        key.clone(),
                        response.clone(),
                        request.cache_ttl(),
                    )
                {
                    tracing::trace!(url = %request.url(), "response cached");
                }
            }

            drop(entry);
            tx.send_replace(Some(outcome));
        })
    }

    async fn perform(&self, request: &OutboundRequest, cancel: &CancellationToken) -> Outcome {
        let outcome = self.attempt_with_retry(request, cancel).await;
        if let Err(error) = &outcome {
            self.stats.failure();
            tracing::debug!(
                method = %request.method(),
                url = %request.url(),
                kind = %error.kind(),
                retries = error.retry_count(),
                "request failed"
            );
            self.hooks.on_error(error);
        }
        outcome
    }

    async fn attempt_with_retry(
        &self,
        request: &OutboundRequest,
        cancel: &CancellationToken,
    ) -> Outcome {
        let _slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(aborted(0)),
            slot = self.gate.acquire() => slot,
        };

        let mut retry = self
            .config
            .retry_policy(request.retry_attempts(), request.retry_delay())
            .start();

        loop {
            let mut attempt = self
                .prepare_attempt(request)
                .map_err(|error| error.with_retry_count(retry.retry_count()))?;
            self.hooks.before_dispatch(&mut attempt);

            tracing::trace!(
                attempt = retry.attempt(),
                method = %request.method(),
                url = %request.url(),
                "sending request"
            );

            let failure = match self.send(attempt.clone(), request.timeout(), cancel).await {
                Ok(response) => {
                    self.hooks.after_response(&attempt, &response);
                    if response.is_success() {
                        return Ok(response);
                    }
                    AttemptFailure::Status(response)
                }
                Err(error) => AttemptFailure::Transport(error),
            };

            if let Some(status) = failure.status().filter(|_| failure.is_auth_rejection()) {
                self.hooks.auth_failure(AuthFailure::Rejected {
                    url: request.url().clone(),
                    status,
                });
            }

            let kind = failure.kind();
            let retry_after = match &failure {
                AttemptFailure::Status(response) => retry::retry_after(response.headers()),
                AttemptFailure::Transport(_) => None,
            };

            match retry.on_failure(kind, retry_after) {
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        attempt = retry.attempt() - 1,
                        delay_ms = delay.as_millis() as u64,
                        status = failure.status().map(|s| s.as_u16()),
                        %kind,
                        url = %request.url(),
                        "request failed, will retry"
                    );
                    self.stats.retry();

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return Err(aborted(retry.retry_count().saturating_sub(1)));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::GiveUp | RetryDecision::Exhausted => {
                    return Err(failure.into_error(retry.retry_count()));
                }
            }
        }
    }

    async fn send(
        &self,
        attempt: TransportRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Response, TransportError> {
        self.stats.transport_call();
        let exchange = tokio::time::timeout(
            timeout,
            self.transport.send(attempt, timeout, cancel.clone()),
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Aborted),
            result = exchange => result.unwrap_or(Err(TransportError::Timeout)),
        }
    }

    fn prepare_attempt(&self, request: &OutboundRequest) -> Result<TransportRequest, ClassifiedError> {
        let mut headers = request.headers().clone();

        if request.body().is_some() && !headers.contains_key(header::CONTENT_TYPE) {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
        }

        if !headers.contains_key(header::AUTHORIZATION) {
            if let Some(value) = self.authorization(request)? {
                headers.insert(header::AUTHORIZATION, value);
            }
        }

        Ok(
            TransportRequest::new(request.method().clone(), request.url().clone())
                .with_headers(headers)
                .with_body(request.body().cloned()),
        )
    }

    fn authorization(
        &self,
        request: &OutboundRequest,
    ) -> Result<Option<HeaderValue>, ClassifiedError> {
        if !self.predicate.eval(request) {
            if request.require_auth() {
                self.hooks.auth_failure(AuthFailure::MissingToken {
                    url: request.url().clone(),
                });
                return Err(ClassifiedError::new(
                    ErrorKind::MissingToken,
                    format!("a token may not be sent to {}", request.url()),
                ));
            }
            return Ok(None);
        }

        match self.session.authorize() {
            Ok(token) => bearer_header(token.access_token()).map(Some).map_err(|_| {
                ClassifiedError::new(
                    ErrorKind::MalformedToken,
                    "attached token is not a valid header value",
                )
            }),
            Err(AuthorizeError::Missing) if request.require_auth() => {
                self.hooks.auth_failure(AuthFailure::MissingToken {
                    url: request.url().clone(),
                });
                Err(ClassifiedError::new(
                    ErrorKind::MissingToken,
                    "no token attached",
                ))
            }
            Err(AuthorizeError::Missing) => Ok(None),
            Err(AuthorizeError::Rejected(validation)) => {
                let kind =
                    ErrorKind::from_validation(&validation).unwrap_or(ErrorKind::MalformedToken);
                let message = format!("attached token rejected: {validation}");
                self.hooks.auth_failure(AuthFailure::InvalidToken {
                    url: request.url().clone(),
                    validation,
                });

                if request.require_auth() {
                    Err(ClassifiedError::new(kind, message))
                } else {
                    tracing::warn!(%kind, url = %request.url(), "sending request without the invalid token");
                    Ok(None)
                }
            }
        }
    }
}
