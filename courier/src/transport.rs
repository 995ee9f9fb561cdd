//! The seam between the orchestrator and the network

use std::{error, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::Response;

/// A single attempt, ready to be sent
#[derive(Clone, Debug)]
pub struct TransportRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl TransportRequest {
    /// Constructs an attempt without headers or body
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Replaces the headers
    pub fn with_headers(self, headers: HeaderMap) -> Self {
        Self { headers, ..self }
    }

    /// Replaces the body
    pub fn with_body(self, body: Option<Bytes>) -> Self {
        Self { body, ..self }
    }

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

    /// The headers to send
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the headers to send
    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The body to send
    #[inline]
    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// A failure to complete an exchange with the server
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection failed or broke
    #[error("network failure")]
    Network(#[source] Box<dyn error::Error + Send + Sync + 'static>),

    /// The attempt did not finish in time
    #[error("attempt timed out")]
    Timeout,

    /// The attempt was cancelled
    #[error("attempt aborted")]
    Aborted,
}

/// Sends a request and returns whatever the server answered
///
/// Any status, including errors, is a successful exchange as far as the
/// transport is concerned. The orchestrator enforces `timeout` and `cancel`
/// around every call, so implementations may use them to release resources
/// early but are not required to.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Performs one exchange
    async fn send(
        &self,
        request: TransportRequest,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Response, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(
        &self,
        request: TransportRequest,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Response, TransportError> {
        (**self).send(request, timeout, cancel).await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(
        &self,
        request: TransportRequest,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<Response, TransportError> {
        (**self).send(request, timeout, cancel).await
    }
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "reqwest")]
mod reqwest_transport {
    use super::*;

    /// A [`Transport`] backed by a [`reqwest::Client`]
    ///
    /// Reaching `https://` URLs requires a TLS backend: the `default-tls`
    /// feature (on by default) or `rustls-tls`. Without either, every
    /// HTTPS attempt fails as a network error.
    #[derive(Clone, Debug, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        /// Wraps an existing client
        pub fn new(client: reqwest::Client) -> Self {
            Self { client }
        }
    }

    impl From<reqwest::Client> for ReqwestTransport {
        fn from(client: reqwest::Client) -> Self {
            Self::new(client)
        }
    }

    fn map_error(error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(Box::new(error))
        }
    }

    #[async_trait]
    impl Transport for ReqwestTransport {
        async fn send(
            &self,
            request: TransportRequest,
            timeout: Duration,
            cancel: CancellationToken,
        ) -> Result<Response, TransportError> {
            let TransportRequest {
                method,
                url,
                headers,
                body,
            } = request;

            let mut builder = self
                .client
                .request(method, url)
                .headers(headers)
                .timeout(timeout);
            if let Some(body) = body {
                builder = builder.body(body);
            }

            let exchange = async {
                let response = builder.send().await.map_err(map_error)?;
                let status = response.status();
                let headers = response.headers().clone();
                let body = response.bytes().await.map_err(map_error)?;

                Ok(Response::new(status).with_headers(headers).with_body(body))
            };

            tokio::select! {
                _ = cancel.cancelled() => Err(TransportError::Aborted),
                result = exchange => result,
            }
        }
    }
}
