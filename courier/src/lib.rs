//! Resilient orchestration of outbound requests
//!
//! An [`Orchestrator`] is the one place an application makes outbound calls
//! through. For every call it:
//!
//! * shares the outcome of an identical call already in flight, rather than
//!   sending it twice;
//! * serves recent successful `GET` responses from a [`ResponseCache`];
//! * bounds the number of calls in flight with a [`ConcurrencyGate`];
//! * retries transient failures according to a [`RetryPolicy`];
//! * attaches the session's bearer token, but only while it validates.
//!
//! Failures surface as a single [`ClassifiedError`] whose [`ErrorKind`]
//! tells callers what went wrong without inspecting transport details.
//!
//! ```no_run
//! use courier::{Orchestrator, OrchestratorConfig, ReqwestTransport, RequestOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::builder(ReqwestTransport::default())
//!     .with_config(OrchestratorConfig::default().with_base_url("https://api.example.com/".parse()?))
//!     .build();
//!
//! let _validation = orchestrator.attach_token(std::env::var("API_TOKEN")?).await?;
//!
//! let units: serde_json::Value = orchestrator
//!     .get("/units", RequestOptions::new())
//!     .await?
//!     .json()?;
//! # let _ = units;
//! # Ok(())
//! # }
//! ```
//!
//! The network itself is abstracted behind the [`Transport`] trait. With the
//! default `reqwest` feature, [`ReqwestTransport`] provides an implementation
//! backed by [`reqwest`].

#![cfg_attr(docsrs, feature(doc_cfg))]
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

pub mod auth;
mod classify;
mod config;
pub mod gate;
mod hooks;
pub mod keyer;
mod orchestrator;
mod request;
pub mod response_cache;
pub mod retry;
mod stats;
mod transport;

pub use auth::{ExactHostMatch, HttpsOnly};
pub use classify::{AttemptFailure, ClassifiedError, ErrorKind};
pub use config::OrchestratorConfig;
pub use gate::{ConcurrencyGate, SlotPermit};
pub use hooks::{AuthErrorSink, AuthFailure, Interceptor};
pub use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
pub use keyer::{DedupKey, DedupKeyRef};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use request::{OutboundRequest, RequestOptions, Response};
pub use response_cache::ResponseCache;
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy, RetryState};
pub use stats::StatsSnapshot;
#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
pub use transport::{Transport, TransportError, TransportRequest};
