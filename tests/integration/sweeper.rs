//! Sweeper scenarios: evidence aging, auto-disable and health cleanup

use switchyard::channel::ChannelStatus;
use switchyard::health::HealthStatus;
use switchyard::ChannelSource;

use crate::common::{channel, relay_request, TestStack};
use crate::mocks::auth_error;

#[tokio::test]
async fn test_chronic_failures_disable_and_exclude() {
    let stack = TestStack::new(vec![channel(3), channel(4)], 0);

    // Channel 3 accumulates five classifiable failures
    for _ in 0..5 {
        stack.health.on_failure(3, "invalid_api_key").await;
    }
    assert_eq!(stack.health.get(3).await.status, HealthStatus::Unhealthy);

    stack.sweeper().sweep_once().await;

    let disabled = stack.source.by_id(3).await.unwrap().unwrap();
    assert_eq!(disabled.status, ChannelStatus::AutoDisabled);

    // Subsequent dispatches exclude the disabled channel
    for _ in 0..10 {
        let outcome = stack.dispatcher.handle(relay_request()).await;
        assert_eq!(outcome.channel_id, Some(4));
    }
}

#[tokio::test]
async fn test_stale_window_then_auto_disable_cycle() {
    // A channel that went unhealthy and then sat idle past the stale
    // window is aged to unknown instead of disabled.
    let stack = TestStack::new(vec![channel(1)], 0);

    for _ in 0..5 {
        stack.health.on_failure(1, "server_error").await;
    }
    stack.clock.advance(301);
    stack.sweeper().sweep_once().await;

    // Aged out: back to unknown, still enabled
    assert_eq!(stack.health.get(1).await.status, HealthStatus::Unknown);
    let ch = stack.source.by_id(1).await.unwrap().unwrap();
    assert_eq!(ch.status, ChannelStatus::Enabled);

    // Fresh failures inside the window disable it on the next sweep
    for _ in 0..5 {
        stack.health.on_failure(1, "server_error").await;
    }
    stack.sweeper().sweep_once().await;
    let ch = stack.source.by_id(1).await.unwrap().unwrap();
    assert_eq!(ch.status, ChannelStatus::AutoDisabled);
}

#[tokio::test]
async fn test_end_to_end_auth_failures_then_sweep() {
    // Repeated auth failures through the dispatch path push channel 3 to
    // five consecutive fails; the sweeper then takes it out of rotation.
    let stack = TestStack::new(vec![channel(3)], 0);
    for _ in 0..5 {
        stack.upstream.script(3, Err(auth_error()));
    }

    for _ in 0..5 {
        let outcome = stack.dispatcher.handle(relay_request()).await;
        // Single channel: every attempt fails terminally
        assert!(outcome.result.is_err());
        // The async classifier may already have disabled it; stop early
        let ch = stack.source.by_id(3).await.unwrap().unwrap();
        if ch.status != ChannelStatus::Enabled {
            break;
        }
    }

    stack.sweeper().sweep_once().await;
    let ch = stack.source.by_id(3).await.unwrap().unwrap();
    assert_eq!(ch.status, ChannelStatus::AutoDisabled);
}

#[tokio::test]
async fn test_cleanup_deletes_aged_rows() {
    let stack = TestStack::new(vec![channel(1), channel(2)], 0);

    stack.health.on_success(1, 50).await;
    stack.clock.advance(40 * 86_400);
    stack.health.on_success(2, 50).await;

    let deleted = stack.health.cleanup_older_than(30).await;
    assert_eq!(deleted, 1);

    // Channel 1 re-enters with a fresh row on next observation
    let recreated = stack.health.get(1).await;
    assert_eq!(recreated.status, HealthStatus::Unknown);
    assert_eq!(recreated.success_count, 0);
    // Channel 2's recent row survived
    assert_eq!(stack.health.get(2).await.success_count, 1);
}
