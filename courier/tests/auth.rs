mod common;

use std::sync::Arc;

use color_eyre::Result;
use common::*;
use courier::{
    header, AuthFailure, ErrorKind, HeaderValue, HttpsOnly, Orchestrator, RequestOptions,
};
use courier_clock::{DurationSecs, TestClock};
use courier_tokens::{
    store::{InMemoryStore, PersistentStore},
    TokenStatus, DEFAULT_STORE_KEY,
};
use parking_lot::Mutex;
use serde_json::json;

type Failures = Arc<Mutex<Vec<AuthFailure>>>;

fn recording_sink() -> (Failures, impl Fn(&AuthFailure) + Send + Sync + 'static) {
    let failures = Failures::default();
    let sink = Arc::clone(&failures);
    (failures, move |failure: &AuthFailure| {
        sink.lock().push(failure.clone())
    })
}

fn authorization(transport: &ScriptedTransport) -> Vec<Option<String>> {
    transport
        .seen()
        .iter()
        .map(|request| {
            request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned)
        })
        .collect()
}

mod when_a_valid_token_is_attached {
    use super::*;

    #[tokio::test]
    async fn every_attempt_carries_it() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::json(json!([]))]);
        let orchestrator = builder(&transport).with_clock(TestClock::new(NOW)).build();
        let token = fresh_token();

        let validation = orchestrator.attach_token(token.clone()).await?;
        assert!(validation.is_valid());

        orchestrator
            .get("/units", RequestOptions::new().with_require_auth(true))
            .await?;

        assert_eq!(authorization(&transport), [Some(format!("Bearer {token}"))]);
        Ok(())
    }

    #[tokio::test]
    async fn a_caller_supplied_header_wins() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::json(json!([]))]);
        let orchestrator = builder(&transport).with_clock(TestClock::new(NOW)).build();
        let _validation = orchestrator.attach_token(fresh_token()).await?;

        orchestrator
            .get(
                "/units",
                RequestOptions::new()
                    .with_header(header::AUTHORIZATION, HeaderValue::from_static("Basic Zm9v")),
            )
            .await?;

        assert_eq!(authorization(&transport), [Some("Basic Zm9v".to_owned())]);
        Ok(())
    }

    #[tokio::test]
    async fn expiry_is_reported_as_the_clock_advances() -> Result<()> {
        let transport = ScriptedTransport::new();
        let clock = TestClock::new(NOW);
        let orchestrator = builder(&transport).with_clock(clock.clone()).build();

        assert_eq!(orchestrator.token_expiry(), None);
        let _validation = orchestrator.attach_token(fresh_token()).await?;

        let expiry = orchestrator.token_expiry().expect("token attached");
        assert_eq!(expiry.status, TokenStatus::Fresh);
        assert_eq!(expiry.until_expired, DurationSecs(3600));

        clock.set(NOW + DurationSecs(3000));
        let expiry = orchestrator.token_expiry().expect("token attached");
        assert_eq!(expiry.status, TokenStatus::Stale);
        assert_eq!(expiry.until_expired, DurationSecs(600));

        clock.set(NOW + DurationSecs(4000));
        let expiry = orchestrator.token_expiry().expect("token attached");
        assert_eq!(expiry.status, TokenStatus::Expired);
        assert_eq!(expiry.until_expired, DurationSecs(0));
        Ok(())
    }

    #[tokio::test]
    async fn plain_http_is_refused_by_an_https_only_predicate() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::json(json!([]))]);
        let (failures, sink) = recording_sink();
        let orchestrator = builder(&transport)
            .with_clock(TestClock::new(NOW))
            .with_auth_predicate(HttpsOnly)
            .with_auth_sink(sink)
            .build();
        let _validation = orchestrator.attach_token(fresh_token()).await?;

        orchestrator
            .get("http://insecure.example.com/units", RequestOptions::new())
            .await?;
        assert_eq!(authorization(&transport), [None]);

        let err = orchestrator
            .get(
                "http://insecure.example.com/units",
                RequestOptions::new()
                    .with_require_auth(true)
                    .with_cache(false),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingToken);
        assert_eq!(transport.calls(), 1);
        assert!(matches!(
            failures.lock().as_slice(),
            [AuthFailure::MissingToken { .. }]
        ));
        Ok(())
    }
}

mod when_no_usable_token_is_attached {
    use super::*;

    #[tokio::test]
    async fn required_auth_fails_before_sending() {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::json(json!([]))]);
        let (failures, sink) = recording_sink();
        let orchestrator = builder(&transport).with_auth_sink(sink).build();

        let err = orchestrator
            .get("/units", RequestOptions::new().with_require_auth(true))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::MissingToken);
        assert_eq!(transport.calls(), 0);
        assert_eq!(failures.lock().len(), 1);
    }

    #[tokio::test]
    async fn optional_auth_sends_without_a_header() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::json(json!([]))]);
        let (failures, sink) = recording_sink();
        let orchestrator = builder(&transport).with_auth_sink(sink).build();

        orchestrator.get("/units", RequestOptions::new()).await?;

        assert_eq!(authorization(&transport), [None]);
        assert!(failures.lock().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn an_expired_token_is_never_sent() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::json(json!([]))]);
        let (failures, sink) = recording_sink();
        let orchestrator = builder(&transport)
            .with_clock(TestClock::new(NOW))
            .with_auth_sink(sink)
            .build();

        let validation = orchestrator
            .attach_token(token(NOW - DurationSecs(7200), NOW - DurationSecs(3600)))
            .await?;
        assert!(validation.is_expired());

        let err = orchestrator
            .get("/units", RequestOptions::new().with_require_auth(true))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenExpired);
        assert_eq!(transport.calls(), 0);

        orchestrator.get("/units", RequestOptions::new()).await?;
        assert_eq!(authorization(&transport), [None]);

        let failures = failures.lock();
        assert_eq!(failures.len(), 2);
        assert!(failures
            .iter()
            .all(|failure| matches!(failure, AuthFailure::InvalidToken { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn a_token_from_the_future_is_not_yet_valid() -> Result<()> {
        let transport = ScriptedTransport::new();
        let orchestrator = builder(&transport).with_clock(TestClock::new(NOW)).build();

        let validation = orchestrator
            .attach_token(token(NOW + DurationSecs(3600), NOW + DurationSecs(7200)))
            .await?;
        assert!(!validation.is_valid());

        let err = orchestrator
            .get("/units", RequestOptions::new().with_require_auth(true))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenNotYetValid);
        assert_eq!(transport.calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn a_token_that_lapses_stops_being_sent() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::json(json!([]))]);
        let clock = TestClock::new(NOW);
        let orchestrator = builder(&transport).with_clock(clock.clone()).build();
        let options = || RequestOptions::new().with_require_auth(true).with_cache(false);

        let _validation = orchestrator.attach_token(fresh_token()).await?;
        orchestrator.get("/units", options()).await?;

        clock.set(NOW + DurationSecs(7200));
        let err = orchestrator.get("/units", options()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TokenExpired);
        assert_eq!(transport.calls(), 1);
        Ok(())
    }
}

mod when_the_server_rejects_the_token {
    use super::*;

    #[tokio::test]
    async fn the_sink_is_told_and_nothing_is_retried() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::status(401)]);
        let (failures, sink) = recording_sink();
        let orchestrator = builder(&transport)
            .with_clock(TestClock::new(NOW))
            .with_auth_sink(sink)
            .build();
        let _validation = orchestrator.attach_token(fresh_token()).await?;

        let err = orchestrator
            .get("/units", RequestOptions::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ClientError);
        assert_eq!(transport.calls(), 1);
        assert!(matches!(
            failures.lock().as_slice(),
            [AuthFailure::Rejected { status, .. }] if status.as_u16() == 401
        ));
        Ok(())
    }
}

mod when_tokens_are_persisted {
    use super::*;

    #[tokio::test]
    async fn a_new_orchestrator_restores_the_token() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::json(json!([]))]);
        let store = Arc::new(InMemoryStore::new());
        let token = fresh_token();

        let first = builder(&transport)
            .with_clock(TestClock::new(NOW))
            .with_store(store.clone())
            .build();
        let _validation = first.attach_token(token.clone()).await?;
        assert_eq!(
            store.get(DEFAULT_STORE_KEY).await.map_err(|e| color_eyre::eyre::eyre!(e))?,
            Some(token.clone())
        );

        let second = builder(&transport)
            .with_clock(TestClock::new(NOW))
            .with_store(store.clone())
            .build();
        let restored = second.restore_token().await.expect("token restored");
        assert_eq!(restored.access_token().as_str(), token);

        second
            .get("/units", RequestOptions::new().with_require_auth(true))
            .await?;
        assert_eq!(authorization(&transport), [Some(format!("Bearer {token}"))]);
        Ok(())
    }

    #[tokio::test]
    async fn an_expired_persisted_token_is_discarded() -> Result<()> {
        let transport = ScriptedTransport::new();
        let store = Arc::new(InMemoryStore::new());
        store
            .set(
                DEFAULT_STORE_KEY,
                &token(NOW - DurationSecs(7200), NOW - DurationSecs(3600)),
            )
            .await
            .map_err(|e| color_eyre::eyre::eyre!(e))?;

        let orchestrator = builder(&transport)
            .with_clock(TestClock::new(NOW))
            .with_store(store.clone())
            .build();

        assert!(orchestrator.restore_token().await.is_none());
        assert!(orchestrator.session().current().is_none());
        assert_eq!(
            store.get(DEFAULT_STORE_KEY).await.map_err(|e| color_eyre::eyre::eyre!(e))?,
            None
        );
        Ok(())
    }

    #[tokio::test]
    async fn clearing_the_token_forgets_it_and_cached_responses() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::json(json!([]))]);
        let store = Arc::new(InMemoryStore::new());
        let orchestrator = builder(&transport)
            .with_clock(TestClock::new(NOW))
            .with_store(store.clone())
            .build();
        let _validation = orchestrator.attach_token(fresh_token()).await?;
        orchestrator.get("/units", RequestOptions::new()).await?;
        assert_eq!(orchestrator.response_cache().len(), 1);

        orchestrator.clear_token().await;

        assert!(orchestrator.session().current().is_none());
        assert!(orchestrator.response_cache().is_empty());
        assert_eq!(
            store.get(DEFAULT_STORE_KEY).await.map_err(|e| color_eyre::eyre::eyre!(e))?,
            None
        );
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn responses_in_flight_when_the_token_is_cleared_are_not_cached() -> Result<()> {
    let transport = ScriptedTransport::new();
    transport.script("/me", [Step::json(json!({ "name": "tester" }))]);
    transport.set_latency(std::time::Duration::from_millis(100));
    let orchestrator = builder(&transport).with_clock(TestClock::new(NOW)).build();
    let _validation = orchestrator.attach_token(fresh_token()).await?;

    let (response, ()) = tokio::join!(
        orchestrator.get("/me", RequestOptions::new()),
        async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            orchestrator.clear_token().await;
        },
    );
    response?;

    assert!(orchestrator.response_cache().is_empty());

    orchestrator.get("/me", RequestOptions::new()).await?;
    assert_eq!(transport.calls(), 2);
    assert_eq!(
        authorization(&transport),
        [Some(format!("Bearer {}", fresh_token())), None]
    );
    Ok(())
}

#[tokio::test]
async fn orchestrators_do_not_share_tokens() -> Result<()> {
    let transport = ScriptedTransport::new();
    transport.script("/units", [Step::json(json!([]))]);
    let first: Orchestrator<_, _> = builder(&transport).with_clock(TestClock::new(NOW)).build();
    let second = builder(&transport).with_clock(TestClock::new(NOW)).build();

    let _validation = first.attach_token(fresh_token()).await?;
    second.get("/units", RequestOptions::new()).await?;

    assert!(second.session().current().is_none());
    assert_eq!(authorization(&transport), [None]);
    Ok(())
}
