//! Failure taxonomy and retry decisions

use std::{error::Error as _, fmt};

use courier_tokens::{Validation, Violation};
use http::StatusCode;
use thiserror::Error;

use crate::{Response, TransportError};

/// The kind of failure a request ended with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The transport could not complete the exchange
    NetworkError,
    /// The caller aborted the request
    Aborted,
    /// The server answered with a 5xx status
    ServerError,
    /// The server answered with 429
    RateLimited,
    /// The server answered with a 4xx status other than 429, or with a
    /// status that is neither success nor error
    ClientError,
    /// The response body could not be parsed
    MalformedResponse,
    /// An attempt did not complete in time
    Timeout,
    /// The attached token could not be decoded
    MalformedToken,
    /// The attached token has expired
    TokenExpired,
    /// The attached token is not valid yet
    TokenNotYetValid,
    /// The attached token was issued by an issuer that is not allowed
    InvalidIssuer,
    /// The attached token was issued too long ago
    TokenTooOld,
    /// A token is required but none may be sent
    MissingToken,
    /// The request could not be built, such as when the URL does not parse
    InvalidRequest,
}

impl ErrorKind {
    /// Whether a failure of this kind is worth another attempt
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::ServerError | Self::RateLimited | Self::Timeout
        )
    }

    /// Classifies a non-success response status
    pub fn from_status(status: StatusCode) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            Self::RateLimited
        } else if status.is_server_error() {
            Self::ServerError
        } else {
            Self::ClientError
        }
    }

    /// Classifies a transport failure
    pub fn from_transport(error: &TransportError) -> Self {
        match error {
            TransportError::Network(_) => Self::NetworkError,
            TransportError::Timeout => Self::Timeout,
            TransportError::Aborted => Self::Aborted,
        }
    }

    /// Classifies a failed token validation by its first violation
    ///
    /// Returns `None` if the validation passed.
    pub fn from_validation(validation: &Validation) -> Option<Self> {
        validation.violations().first().map(|violation| match violation {
            Violation::Expired => Self::TokenExpired,
            Violation::IssuedInFuture | Violation::NotYetValid => Self::TokenNotYetValid,
            Violation::InvalidIssuer => Self::InvalidIssuer,
            Violation::TooOld => Self::TokenTooOld,
        })
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NetworkError => "network error",
            Self::Aborted => "aborted",
            Self::ServerError => "server error",
            Self::RateLimited => "rate limited",
            Self::ClientError => "client error",
            Self::MalformedResponse => "malformed response",
            Self::Timeout => "timed out",
            Self::MalformedToken => "malformed token",
            Self::TokenExpired => "token expired",
            Self::TokenNotYetValid => "token not yet valid",
            Self::InvalidIssuer => "invalid issuer",
            Self::TokenTooOld => "token too old",
            Self::MissingToken => "missing token",
            Self::InvalidRequest => "invalid request",
        })
    }
}

/// A single failed attempt, before classification
#[derive(Debug)]
pub enum AttemptFailure {
    /// The transport failed
    Transport(TransportError),
    /// The server answered with a non-success status
    Status(Response),
}

impl AttemptFailure {
    /// The kind of this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(error) => ErrorKind::from_transport(error),
            Self::Status(response) => ErrorKind::from_status(response.status()),
        }
    }

    /// The response status, if the server answered
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Transport(_) => None,
            Self::Status(response) => Some(response.status()),
        }
    }

    /// Whether the server rejected the request's credentials
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self.status(),
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
        )
    }

    /// Converts this failure into the error surfaced to callers
    pub fn into_error(self, retry_count: u32) -> ClassifiedError {
        let kind = self.kind();
        match self {
            Self::Transport(error) => {
                let mut message = error.to_string();
                let mut source = error.source();
                while let Some(cause) = source {
                    message.push_str(": ");
                    message.push_str(&cause.to_string());
                    source = cause.source();
                }
                ClassifiedError::new(kind, message).with_retry_count(retry_count)
            }
            Self::Status(response) => {
                ClassifiedError::new(kind, format!("server responded {}", response.status()))
                    .with_retry_count(retry_count)
                    .with_response(response)
            }
        }
    }
}

/// The terminal error for a request
///
/// Clonable so that every caller sharing a deduplicated request receives
/// the same error.
#[derive(Clone, Debug, Error)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    message: String,
    retry_count: u32,
    last_status: Option<StatusCode>,
    response: Option<Response>,
}

impl ClassifiedError {
    /// Constructs an error of the given kind
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_count: 0,
            last_status: None,
            response: None,
        }
    }

    /// Records how many retries preceded this error
    pub fn with_retry_count(self, retry_count: u32) -> Self {
        Self {
            retry_count,
            ..self
        }
    }

    /// Records the last status received
    pub fn with_status(self, status: StatusCode) -> Self {
        Self {
            last_status: Some(status),
            ..self
        }
    }

    /// Attaches the last response received, recording its status
    pub fn with_response(self, response: Response) -> Self {
        Self {
            last_status: Some(response.status()),
            response: Some(response),
            ..self
        }
    }

    /// The kind of failure
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether the failure kind is retryable
    ///
    /// An error surfaced by the orchestrator has already exhausted its
    /// attempts, so this describes the failure rather than inviting a retry.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Human-readable description
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Number of retries made before giving up
    #[inline]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// The last response status, if the server answered
    #[inline]
    pub fn last_status(&self) -> Option<StatusCode> {
        self.last_status
    }

    /// The last response, if the server answered with an error status
    #[inline]
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }
}
