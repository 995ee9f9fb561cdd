//! Requests as seen by callers, and the responses they get back

use std::time::Duration;

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{ClassifiedError, ErrorKind};

/// Per-call options
///
/// Anything left unset falls back to the orchestrator's configuration.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry_attempts: Option<u32>,
    pub(crate) retry_delay: Option<Duration>,
    pub(crate) require_auth: Option<bool>,
    pub(crate) use_cache: Option<bool>,
    pub(crate) cache_ttl: Option<Duration>,
    pub(crate) cancel: Option<CancellationToken>,
}

impl RequestOptions {
    /// Constructs options that defer everything to the orchestrator
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header to send with the request
    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Bounds how long each attempt may take
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    /// Sets the total number of attempts, including the first
    pub fn with_retry_attempts(self, retry_attempts: u32) -> Self {
        Self {
            retry_attempts: Some(retry_attempts),
            ..self
        }
    }

    /// Sets the base delay between attempts
    pub fn with_retry_delay(self, retry_delay: Duration) -> Self {
        Self {
            retry_delay: Some(retry_delay),
            ..self
        }
    }

    /// Fails the request rather than sending it without a valid token
    pub fn with_require_auth(self, require_auth: bool) -> Self {
        Self {
            require_auth: Some(require_auth),
            ..self
        }
    }

    /// Enables or disables the response cache for this `GET`
    pub fn with_cache(self, use_cache: bool) -> Self {
        Self {
            use_cache: Some(use_cache),
            ..self
        }
    }

    /// Sets how long a successful response stays cached
    pub fn with_cache_ttl(self, cache_ttl: Duration) -> Self {
        Self {
            cache_ttl: Some(cache_ttl),
            ..self
        }
    }

    /// Allows the caller to abort the request
    pub fn with_cancellation(self, cancel: CancellationToken) -> Self {
        Self {
            cancel: Some(cancel),
            ..self
        }
    }
}

/// A fully resolved outbound request
///
/// Built from a caller's [`RequestOptions`] and the orchestrator's defaults.
/// It is never modified once constructed.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub(crate) method: Method,
    pub(crate) url: Url,
    pub(crate) body: Option<Bytes>,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Duration,
    pub(crate) retry_attempts: u32,
    pub(crate) retry_delay: Duration,
    pub(crate) require_auth: bool,
    pub(crate) use_cache: bool,
    pub(crate) cache_ttl: Duration,
}

impl OutboundRequest {
    /// The request method
    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The absolute request URL
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The serialized JSON body, if any
    #[inline]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Headers provided by the caller
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// How long each attempt may take
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Total number of attempts allowed
    #[inline]
    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    /// Base delay between attempts
    #[inline]
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Whether a valid token is mandatory
    #[inline]
    pub fn require_auth(&self) -> bool {
        self.require_auth
    }

    /// Whether a successful response may be served from, and stored in, the cache
    #[inline]
    pub fn is_cacheable(&self) -> bool {
        self.use_cache && self.method == Method::GET
    }

    /// How long a successful response stays cached
    #[inline]
    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }
}

/// A response received from the transport
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Response {
    /// Constructs an empty response with the given status
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Adds a header
    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Replaces the headers
    pub fn with_headers(self, headers: HeaderMap) -> Self {
        Self { headers, ..self }
    }

    /// Replaces the body
    pub fn with_body(self, body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            ..self
        }
    }

    /// Replaces the body with serialized JSON and sets the content type
    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_header(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        )
        .with_body(value.to_string())
    }

    /// The response status
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Whether the status is in the 2xx range
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The response headers
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The raw response body
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Parses the body as JSON
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::MalformedResponse`] if the body is not valid
    /// JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClassifiedError> {
        serde_json::from_slice(&self.body).map_err(|err| {
            ClassifiedError::new(
                ErrorKind::MalformedResponse,
                format!("response body is not valid JSON: {err}"),
            )
            .with_status(self.status)
        })
    }

    /// Reads the body as UTF-8 text
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::MalformedResponse`] if the body is not UTF-8.
    pub fn text(&self) -> Result<&str, ClassifiedError> {
        std::str::from_utf8(&self.body).map_err(|err| {
            ClassifiedError::new(
                ErrorKind::MalformedResponse,
                format!("response body is not valid UTF-8: {err}"),
            )
            .with_status(self.status)
        })
    }
}
