//! Deciding whether, and how, a token is attached to a request
//!
//! A token is only attached when the orchestrator's attachment predicate
//! accepts the request. Predicates compose with the combinators from
//! [`predicates`]:
//!
//! ```
//! use courier::{ExactHostMatch, HttpsOnly};
//! use predicates::prelude::*;
//!
//! let predicate = HttpsOnly.and(ExactHostMatch::new("api.example.com")).boxed();
//! # let _ = predicate;
//! ```

use std::fmt;

use bytes::{BufMut, BytesMut};
use courier_tokens::AccessTokenRef;
use http::{header::InvalidHeaderValue, HeaderValue};
use predicates::{reflection, Predicate};

use crate::OutboundRequest;

/// Builds an `Authorization: Bearer` value, marked sensitive
pub fn bearer_header(token: &AccessTokenRef) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    let mut value = HeaderValue::from_maybe_shared(header_value.freeze())?;
    value.set_sensitive(true);
    Ok(value)
}

/// Only attach a token if the request is being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<OutboundRequest> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &OutboundRequest) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &OutboundRequest) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}

/// Only attach a token if the request is being sent to the exact host specified
#[derive(Clone, Debug)]
pub struct ExactHostMatch {
    host: String,
}

impl ExactHostMatch {
    /// Construct a new predicate from a host string
    pub fn new<S>(host: S) -> Self
    where
        S: ToString,
    {
        Self {
            host: host.to_string(),
        }
    }
}

impl Predicate<OutboundRequest> for ExactHostMatch {
    #[inline]
    fn eval(&self, req: &OutboundRequest) -> bool {
        req.url().host_str() == Some(&self.host)
    }

    fn find_case(&self, expected: bool, req: &OutboundRequest) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "host",
                    req.url().host_str().unwrap_or("<no host>").to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for ExactHostMatch {}
impl fmt::Display for ExactHostMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("host == ")?;
        f.write_str(&self.host)
    }
}
