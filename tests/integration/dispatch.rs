//! Dispatch loop scenarios
//!
//! Covers the happy path, retry and failover behavior, the retry decision
//! matrix, cancellation, terminal error shaping and telemetry completeness.

use std::time::Duration;

use switchyard::channel::ChannelStatus;
use switchyard::error::AppError;
use switchyard::health::HealthStatus;
use switchyard::ChannelSource;

use crate::common::{channel, relay_request, with_priority, TestStack};
use crate::mocks::{auth_error, ok_response, status_error};

#[tokio::test]
async fn test_happy_path_single_channel() {
    let stack = TestStack::new(vec![channel(1)], 0);
    stack.seed_health_status(1, HealthStatus::Healthy).await;

    let outcome = stack.dispatcher.handle(relay_request()).await;

    let response = outcome.result.expect("dispatch should succeed");
    assert_eq!(response.status_code, 200);
    assert_eq!(outcome.channel_id, Some(1));
    assert_eq!(outcome.channel_name.as_deref(), Some("channel-1"));
    assert!(!outcome.generation_id.is_empty());

    let row = stack.health.get(1).await;
    assert_eq!(row.success_count, 1);
    assert_eq!(row.failure_count, 0);
    assert_eq!(row.consecutive_fails, 0);
    assert_eq!(row.status, HealthStatus::Healthy);

    stack.telemetry.flush().await;
    let rows = stack.telemetry_repo.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].attempt, 0);
    assert_eq!(rows[0].status_code, 200);
    assert_eq!(rows[0].channel_id, 1);
    assert_eq!(rows[0].prompt_tokens, 11);
    assert_eq!(rows[0].completion_tokens, 22);
    assert_eq!(rows[0].generation_id, outcome.generation_id);
    assert_eq!(rows[0].user_id, 42);
    assert_eq!(rows[0].token_id, 7);
    assert_eq!(rows[0].api_path, "/v1/chat/completions");
}

#[tokio::test]
async fn test_latency_flows_into_health_and_telemetry() {
    let stack = TestStack::new(vec![channel(1)], 0);
    stack.upstream.set_delay(Duration::from_millis(30));

    let outcome = stack.dispatcher.handle(relay_request()).await;
    assert!(outcome.result.is_ok());
    assert!(outcome.last_latency_ms >= 30);

    assert!(stack.health.get(1).await.avg_latency >= 30);

    stack.telemetry.flush().await;
    assert!(stack.telemetry_repo.rows()[0].latency_ms >= 30);
}

#[tokio::test]
async fn test_retry_after_5xx_succeeds_on_second_channel() {
    // Priority forces the first pick onto channel 1
    let stack = TestStack::new(
        vec![
            with_priority(channel(1), 2),
            with_priority(channel(2), 1),
        ],
        2,
    );
    stack.upstream.script(1, Err(status_error(502)));

    let outcome = stack.dispatcher.handle(relay_request()).await;

    assert!(outcome.result.is_ok());
    assert_eq!(outcome.channel_id, Some(2));
    assert_eq!(stack.upstream.invocations(), vec![1, 2]);

    stack.telemetry.flush().await;
    let rows = stack.telemetry_repo.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!((rows[0].attempt, rows[0].channel_id, rows[0].status_code), (0, 1, 502));
    assert_eq!((rows[1].attempt, rows[1].channel_id, rows[1].status_code), (1, 2, 200));
    // One generation spans both attempts
    assert_eq!(rows[0].generation_id, rows[1].generation_id);

    let failed = stack.health.get(1).await;
    assert_eq!(failed.failure_count, 1);
    assert_eq!(failed.consecutive_fails, 1);
    let succeeded = stack.health.get(2).await;
    assert_eq!(succeeded.success_count, 1);
}

#[tokio::test]
async fn test_no_retry_on_400() {
    let stack = TestStack::new(vec![channel(1), channel(2)], 2);
    stack.upstream.script(1, Err(status_error(400)));
    stack.upstream.script(2, Err(status_error(400)));

    let outcome = stack.dispatcher.handle(relay_request()).await;

    let err = outcome.result.expect_err("400 must surface");
    assert_eq!(err.status_code().as_u16(), 400);
    assert_eq!(stack.upstream.invocations().len(), 1);

    stack.telemetry.flush().await;
    assert_eq!(stack.telemetry_repo.rows().len(), 1);
}

#[tokio::test]
async fn test_retry_budget_zero_single_attempt() {
    let stack = TestStack::new(vec![channel(1), channel(2)], 0);
    stack.upstream.script(1, Err(status_error(500)));
    stack.upstream.script(2, Err(status_error(500)));

    let outcome = stack.dispatcher.handle(relay_request()).await;

    let err = outcome.result.expect_err("500 must surface");
    assert_eq!(err.status_code().as_u16(), 500);
    assert_eq!(stack.upstream.invocations().len(), 1);
}

#[tokio::test]
async fn test_pinned_channel_never_retries() {
    let stack = TestStack::new(vec![channel(1), channel(2)], 3);
    stack.upstream.script(1, Err(status_error(500)));

    let mut request = relay_request();
    request.specific_channel_id = Some(1);
    let outcome = stack.dispatcher.handle(request).await;

    let err = outcome.result.expect_err("pinned failure must surface");
    assert_eq!(err.status_code().as_u16(), 500);
    assert_eq!(stack.upstream.invocations(), vec![1]);
}

#[tokio::test]
async fn test_pinned_disabled_channel_rejected() {
    let mut disabled = channel(1);
    disabled.status = ChannelStatus::ManualDisabled;
    let stack = TestStack::new(vec![disabled], 0);

    let mut request = relay_request();
    request.specific_channel_id = Some(1);
    let outcome = stack.dispatcher.handle(request).await;

    assert!(matches!(outcome.result, Err(AppError::ChannelDisabled)));
    assert!(stack.upstream.invocations().is_empty());

    stack.telemetry.flush().await;
    assert!(stack.telemetry_repo.rows().is_empty());
}

#[tokio::test]
async fn test_terminal_429_message_rewritten() {
    let stack = TestStack::new(vec![channel(1)], 0);
    stack.upstream.script(
        1,
        Err(switchyard::upstream::UpstreamError {
            status_code: 429,
            code: Some("rate_limit_exceeded".to_string()),
            kind: Some("requests".to_string()),
            message: "Rate limit reached for gpt-4o".to_string(),
            param: None,
        }),
    );

    let outcome = stack.dispatcher.handle(relay_request()).await;

    match outcome.result {
        Err(AppError::Upstream(err)) => {
            assert_eq!(err.status_code, 429);
            assert!(err.message.contains("saturated"), "message: {}", err.message);
            assert!(
                err.message.contains("(request id: req-test)"),
                "message: {}",
                err.message
            );
        }
        other => panic!("expected upstream error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_terminal_error_keeps_original_status_and_latency() {
    let stack = TestStack::new(
        vec![with_priority(channel(1), 2), with_priority(channel(2), 1)],
        1,
    );
    stack.upstream.script(1, Err(status_error(503)));
    stack.upstream.script(2, Err(status_error(502)));

    let outcome = stack.dispatcher.handle(relay_request()).await;

    // Last attempt was on channel 2 with a 502
    let err = outcome.result.expect_err("all attempts failed");
    assert_eq!(err.status_code().as_u16(), 502);
    assert_eq!(outcome.channel_id, Some(2));
}

#[tokio::test]
async fn test_retry_never_redispatches_to_failed_channel() {
    let stack = TestStack::new(vec![channel(1), channel(2)], 3);
    for id in [1, 2] {
        stack.upstream.script(id, Err(status_error(502)));
        stack.upstream.script(id, Err(status_error(502)));
    }

    let outcome = stack.dispatcher.handle(relay_request()).await;
    assert!(outcome.result.is_err());

    let invocations = stack.upstream.invocations();
    assert!(invocations.len() >= 2);
    for pair in invocations.windows(2) {
        assert_ne!(pair[0], pair[1], "retried on the channel that just failed");
    }
}

#[tokio::test]
async fn test_telemetry_rows_match_invocations() {
    let stack = TestStack::new(vec![channel(1), channel(2)], 3);
    for id in [1, 2] {
        stack.upstream.script(id, Err(status_error(502)));
    }

    let outcome = stack.dispatcher.handle(relay_request()).await;
    assert!(outcome.result.is_ok());

    stack.telemetry.flush().await;
    let rows = stack.telemetry_repo.rows();
    let invocations = stack.upstream.invocations();
    assert_eq!(rows.len(), invocations.len());
    for (index, row) in rows.iter().enumerate() {
        assert_eq!(row.attempt as usize, index);
        assert_eq!(row.channel_id, invocations[index]);
        assert_eq!(row.generation_id, rows[0].generation_id);
    }
}

#[tokio::test]
async fn test_cancellation_abandons_attempt() {
    let stack = TestStack::new(vec![channel(1)], 3);
    stack.upstream.set_delay(Duration::from_millis(300));

    let request = relay_request();
    let cancel = request.cancel.clone();
    let dispatcher = stack.dispatcher.clone();
    let handle = tokio::spawn(async move { dispatcher.handle(request).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    cancel.cancel();
    let outcome = handle.await.unwrap();

    assert!(matches!(outcome.result, Err(AppError::Cancelled)));
    // No retry after cancellation
    assert_eq!(stack.upstream.invocations(), vec![1]);

    stack.telemetry.flush().await;
    let rows = stack.telemetry_repo.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status_code, 499);

    // No response was observed, so health carries no verdict
    let row = stack.health.get(1).await;
    assert_eq!(row.success_count, 0);
    assert_eq!(row.failure_count, 0);
}

#[tokio::test]
async fn test_auth_failure_auto_disables_channel() {
    let stack = TestStack::new(
        vec![with_priority(channel(1), 2), with_priority(channel(2), 1)],
        2,
    );
    stack.upstream.script(1, Err(auth_error()));
    stack.upstream.script(2, Ok(ok_response()));

    let outcome = stack.dispatcher.handle(relay_request()).await;
    assert!(outcome.result.is_ok());
    assert_eq!(outcome.channel_id, Some(2));

    // The classifier runs off the hot path; wait for it to land
    let mut disabled = false;
    for _ in 0..100 {
        let ch = stack.source.by_id(1).await.unwrap().unwrap();
        if ch.status == ChannelStatus::AutoDisabled {
            disabled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(disabled, "auth failure did not auto-disable the channel");

    // Subsequent selections exclude the disabled channel
    for _ in 0..10 {
        let outcome = stack.dispatcher.handle(relay_request()).await;
        assert_eq!(outcome.channel_id, Some(2));
    }
}
