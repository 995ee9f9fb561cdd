#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use courier::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, Response, StatusCode, Transport,
    TransportError, TransportRequest,
};
use courier_clock::{DurationSecs, UnixTime};
use courier_tokens::TokenClaims;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

pub const BASE_URL: &str = "https://api.example.com/";
pub const NOW: UnixTime = UnixTime(1_700_000_000);

/// One scripted reaction of the transport
#[derive(Clone, Debug)]
pub enum Step {
    Respond(Response),
    NetworkError,
    Hang,
}

impl Step {
    pub fn json(value: Value) -> Self {
        Self::Respond(Response::new(StatusCode::OK).with_json(&value))
    }

    pub fn status(status: u16) -> Self {
        Self::Respond(Response::new(
            StatusCode::from_u16(status).expect("valid status"),
        ))
    }
}

/// A transport answering from per-path scripts
///
/// Each path replays its steps in order, repeating the last one forever.
/// Unscripted paths answer 404.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    seen: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, path: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .insert(path.to_owned(), steps.into_iter().collect());
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<TransportRequest> {
        self.seen.lock().clone()
    }

    fn next_step(&self, path: &str) -> Step {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(path) {
            Some(steps) if steps.len() > 1 => steps.pop_front().expect("non-empty script"),
            Some(steps) => steps
                .front()
                .cloned()
                .unwrap_or_else(|| Step::status(404)),
            None => Step::status(404),
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: TransportRequest,
        _timeout: Duration,
        _cancel: CancellationToken,
    ) -> Result<Response, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        let _active = ActiveGuard(&self.active);

        let step = self.next_step(request.url().path());
        self.seen.lock().push(request);

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match step {
            Step::Respond(response) => Ok(response),
            Step::NetworkError => Err(TransportError::Network("connection reset".into())),
            Step::Hang => std::future::pending().await,
        }
    }
}

pub fn config() -> OrchestratorConfig {
    OrchestratorConfig::default().with_base_url(Url::parse(BASE_URL).expect("valid base URL"))
}

pub fn builder(transport: &Arc<ScriptedTransport>) -> OrchestratorBuilder<Arc<ScriptedTransport>> {
    Orchestrator::builder(Arc::clone(transport)).with_config(config())
}

pub fn orchestrator(transport: &Arc<ScriptedTransport>) -> Orchestrator<Arc<ScriptedTransport>> {
    builder(transport).build()
}

pub fn token(issued: UnixTime, expires: UnixTime) -> String {
    TokenClaims::new()
        .with_issued_at(issued)
        .with_expiration(expires)
        .with_subject("tester")
        .to_unsigned_token()
}

pub fn fresh_token() -> String {
    token(NOW, NOW + DurationSecs(3600))
}
