//! Caller-supplied hooks around dispatch

use std::{
    any::Any,
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

use courier_tokens::Validation;
use http::StatusCode;
use url::Url;

use crate::{ClassifiedError, Response, TransportRequest};

/// Observes, and may adjust, requests as they are dispatched
///
/// Hooks run synchronously in registration order. A hook that panics is
/// logged and skipped; the remaining hooks still run.
pub trait Interceptor: Send + Sync {
    /// Called before every attempt, after credentials are attached
    fn before_dispatch(&self, request: &mut TransportRequest) {
        let _ = request;
    }

    /// Called with every response received, whatever its status
    fn after_response(&self, request: &TransportRequest, response: &Response) {
        let _ = (request, response);
    }

    /// Called once with the terminal error of a failed request
    fn on_error(&self, error: &ClassifiedError) {
        let _ = error;
    }
}

/// Why the auth-error sink was notified
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum AuthFailure {
    /// The server answered 401 or 403
    Rejected {
        /// The URL that was rejected
        url: Url,
        /// The status received
        status: StatusCode,
    },
    /// The attached token failed validation
    InvalidToken {
        /// The URL the request was bound for
        url: Url,
        /// The failed validation
        validation: Validation,
    },
    /// A token was required, but none could be sent
    MissingToken {
        /// The URL the request was bound for
        url: Url,
    },
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { url, status } => write!(f, "{url} responded {status}"),
            Self::InvalidToken { url, validation } => {
                write!(f, "token for {url} is invalid: {validation}")
            }
            Self::MissingToken { url } => write!(f, "no token available for {url}"),
        }
    }
}

/// Receives authentication failures, typically to prompt a new sign-in
pub trait AuthErrorSink: Send + Sync {
    /// Handles a single failure
    fn on_auth_error(&self, failure: &AuthFailure);
}

impl<F> AuthErrorSink for F
where
    F: Fn(&AuthFailure) + Send + Sync,
{
    fn on_auth_error(&self, failure: &AuthFailure) {
        self(failure)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}

fn guarded(stage: &'static str, index: usize, hook: impl FnOnce()) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(hook)) {
        tracing::warn!(
            stage,
            hook = index,
            panic = panic_message(&*payload),
            "hook panicked, skipping"
        );
    }
}

/// The ordered hooks registered with an orchestrator
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    interceptors: Vec<Arc<dyn Interceptor>>,
    auth_sink: Option<Arc<dyn AuthErrorSink>>,
}

impl Hooks {
    pub(crate) fn push_interceptor(&mut self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.push(interceptor);
    }

    pub(crate) fn set_auth_sink(&mut self, sink: Arc<dyn AuthErrorSink>) {
        self.auth_sink = Some(sink);
    }

    pub(crate) fn before_dispatch(&self, request: &mut TransportRequest) {
        for (index, interceptor) in self.interceptors.iter().enumerate() {
            guarded("before_dispatch", index, || {
                interceptor.before_dispatch(request)
            });
        }
    }

    pub(crate) fn after_response(&self, request: &TransportRequest, response: &Response) {
        for (index, interceptor) in self.interceptors.iter().enumerate() {
            guarded("after_response", index, || {
                interceptor.after_response(request, response)
            });
        }
    }

    pub(crate) fn on_error(&self, error: &ClassifiedError) {
        for (index, interceptor) in self.interceptors.iter().enumerate() {
            guarded("on_error", index, || interceptor.on_error(error));
        }
    }

    pub(crate) fn auth_failure(&self, failure: AuthFailure) {
        tracing::info!(%failure, "authentication failure");
        if let Some(sink) = &self.auth_sink {
            guarded("auth_sink", 0, || sink.on_auth_error(&failure));
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("interceptors", &self.interceptors.len())
            .field("auth_sink", &self.auth_sink.is_some())
            .finish()
    }
}
