//! Bearer-token lifecycle for outbound request clients
//!
//! A client that attaches bearer tokens to its requests needs to know a few
//! things about the token it holds: when it expires, whether it has become
//! stale, and whether it is acceptable to send at all. This crate answers
//! those questions without verifying signatures, leaving that to the server
//! that issued the token.
//!
//! Raw tokens are decoded by [`decode()`] into [`TokenClaims`], checked by a
//! [`ValidationConfig`], and memoized in a bounded [`TokenCache`]. A
//! [`TokenSession`] ties these together, holding the currently attached token
//! and optionally persisting it to a [`PersistentStore`][store::PersistentStore]
//! so that it survives restarts.
//!
//! ```
//! use courier_clock::{DurationSecs, TestClock, UnixTime};
//! use courier_tokens::{SessionConfig, TokenClaims, TokenSession};
//!
//! # tokio_test_block_on(async {
//! let clock = TestClock::new(UnixTime(1_000));
//! let session = TokenSession::with_clock(SessionConfig::default(), clock.clone());
//!
//! let token = TokenClaims::new()
//!     .with_issued_at(UnixTime(1_000))
//!     .with_expiration(UnixTime(1_000) + DurationSecs(3600))
//!     .to_unsigned_token();
//!
//! let validation = session.attach_token(token).await?;
//! assert!(validation.is_valid());
//! assert!(session.authorize().is_ok());
//! # Ok::<_, courier_tokens::MalformedToken>(())
//! # }).unwrap();
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod braids;
mod cache;
mod codec;
mod lifetime;
mod session;
pub mod store;
mod validator;

pub use braids::*;
pub use cache::{CachedClaims, TokenCache, TokenCacheConfig};
pub use codec::{decode, Audiences, MalformedToken, OneOrMany, Segment, TokenClaims};
pub use lifetime::{TokenLifetime, TokenLifetimeConfig, TokenStatus};
pub use session::{
    AttachedToken, AuthorizeError, SessionConfig, TokenExpiry, TokenSession, TokenValidity,
    DEFAULT_STORE_KEY,
};
pub use validator::{validate, Validation, ValidationConfig, Violation};
