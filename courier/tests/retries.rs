mod common;

use std::time::Duration;

use color_eyre::Result;
use common::*;
use courier::{
    header, BackoffStrategy, ErrorKind, HeaderValue, RequestOptions, Response, StatusCode,
};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

mod when_the_failure_is_permanent {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn not_found_is_attempted_once() {
        let transport = ScriptedTransport::new();
        transport.script("/units/9", [Step::status(404)]);
        let orchestrator = orchestrator(&transport);

        let err = orchestrator
            .get("/units/9", RequestOptions::new().with_retry_attempts(5))
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 1);
        assert_eq!(err.kind(), ErrorKind::ClientError);
        assert!(!err.is_retryable());
        assert_eq!(err.retry_count(), 0);
        assert_eq!(err.last_status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(
            err.response().map(Response::status),
            Some(StatusCode::NOT_FOUND)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn a_single_attempt_is_never_retried() {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::status(503)]);
        let orchestrator = orchestrator(&transport);

        let err = orchestrator
            .get("/units", RequestOptions::new().with_retry_attempts(1))
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 1);
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert_eq!(err.retry_count(), 0);
    }
}

mod when_the_failure_is_transient {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn network_errors_are_retried() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.script(
            "/units",
            [Step::NetworkError, Step::json(json!({ "units": [] }))],
        );
        let orchestrator = orchestrator(&transport);

        orchestrator.get("/units", RequestOptions::new()).await?;

        assert_eq!(transport.calls(), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_network_errors_keep_their_kind() {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::NetworkError]);
        let orchestrator = orchestrator(&transport);

        let err = orchestrator
            .get("/units", RequestOptions::new().with_retry_attempts(2))
            .await
            .unwrap_err();

        assert_eq!(transport.calls(), 2);
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert_eq!(err.last_status(), None);
        assert!(err.message().contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_and_are_retried() {
        let transport = ScriptedTransport::new();
        transport.script("/reports", [Step::Hang]);
        let orchestrator = orchestrator(&transport);
        let start = Instant::now();

        let err = orchestrator
            .get(
                "/reports",
                RequestOptions::new()
                    .with_timeout(Duration::from_secs(5))
                    .with_retry_attempts(2)
                    .with_retry_delay(Duration::from_secs(1)),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(transport.calls(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_replaces_the_computed_delay() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.script(
            "/scans",
            [
                Step::Respond(
                    Response::new(StatusCode::TOO_MANY_REQUESTS)
                        .with_header(header::RETRY_AFTER, HeaderValue::from_static("3")),
                ),
                Step::json(json!({ "scan": "queued" })),
            ],
        );
        let orchestrator = orchestrator(&transport);
        let start = Instant::now();

        orchestrator
            .post("/scans", json!({ "target": "a" }), RequestOptions::new())
            .await?;

        assert_eq!(transport.calls(), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn configured_backoff_strategy_is_used() -> Result<()> {
        let transport = ScriptedTransport::new();
        transport.script(
            "/scans",
            [
                Step::status(500),
                Step::status(502),
                Step::status(503),
                Step::json(json!({ "scan": "queued" })),
            ],
        );
        let orchestrator = builder(&transport)
            .with_config(
                config()
                    .with_backoff(BackoffStrategy::Linear)
                    .with_default_retry(4, Duration::from_millis(500)),
            )
            .build();
        let start = Instant::now();

        orchestrator
            .post("/scans", json!({ "target": "a" }), RequestOptions::new())
            .await?;

        // 0.5s + 1s + 1.5s
        assert_eq!(start.elapsed(), Duration::from_millis(3_000));
        assert_eq!(transport.calls(), 4);
        Ok(())
    }
}

mod when_the_caller_gives_up {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn an_attempt_in_progress_is_aborted() {
        let transport = ScriptedTransport::new();
        transport.script("/reports", [Step::Hang]);
        let orchestrator = orchestrator(&transport);
        let cancel = CancellationToken::new();

        let (outcome, ()) = tokio::join!(
            orchestrator.get(
                "/reports",
                RequestOptions::new().with_cancellation(cancel.clone())
            ),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.cancel();
            },
        );

        let err = outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert!(!err.is_retryable());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn a_pending_retry_is_abandoned() {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::status(503)]);
        let orchestrator = orchestrator(&transport);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let (outcome, ()) = tokio::join!(
            orchestrator.get(
                "/units",
                RequestOptions::new()
                    .with_retry_delay(Duration::from_secs(10))
                    .with_cancellation(cancel.clone())
            ),
            async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                cancel.cancel();
            },
        );

        assert_eq!(outcome.unwrap_err().kind(), ErrorKind::Aborted);
        assert_eq!(transport.calls(), 1);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn an_already_cancelled_call_never_reaches_the_transport() {
        let transport = ScriptedTransport::new();
        transport.script("/units", [Step::json(json!([]))]);
        let orchestrator = orchestrator(&transport);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .get("/units", RequestOptions::new().with_cancellation(cancel))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Aborted);
        assert_eq!(transport.calls(), 0);
    }
}
