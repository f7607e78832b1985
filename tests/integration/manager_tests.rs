//! Manager lifecycle tests over the in-memory transport
//!
//! All tests run on a paused clock, so backoff, watchdog and heartbeat
//! timings are exact virtual durations.

use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

use execstream::connection::{
    ChannelHandler, ConnectionEvent, ConnectionManager, ConnectionPhase, ManagerConfig,
    ReconnectPolicy,
};
use execstream::transport::{channel_transport, ChannelListener, RemoteEnd};
use execstream::visibility::{visibility_channel, Visibility};
use execstream::{ConnectionError, Endpoint};

const EVENT_WAIT: Duration = Duration::from_secs(600);

fn config(base_ms: u64, max_attempts: u32) -> ManagerConfig {
    let endpoint = Endpoint::parse("ws://stream.test/ws/execution").unwrap();
    let mut config = ManagerConfig::new(endpoint);
    config.reconnect = ReconnectPolicy {
        base_interval: Duration::from_millis(base_ms),
        max_delay: Duration::from_secs(30),
        max_attempts,
    };
    config
}

async fn next_event(events: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    tokio::time::timeout(EVENT_WAIT, events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

/// Skip events until one matches
async fn wait_for(
    events: &mut UnboundedReceiver<ConnectionEvent>,
    matches: impl Fn(&ConnectionEvent) -> bool,
) -> ConnectionEvent {
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

async fn accept_next(listener: &mut ChannelListener) -> RemoteEnd {
    listener
        .next_attempt()
        .await
        .expect("connector dropped")
        .accept()
}

fn assert_delay(waited: Duration, expected_ms: u64) {
    let waited_ms = waited.as_millis() as u64;
    assert!(
        waited_ms >= expected_ms && waited_ms <= expected_ms + 5,
        "waited {waited_ms}ms, expected {expected_ms}ms"
    );
}

#[tokio::test(start_paused = true)]
async fn test_open_sends_subscribe_with_correlators() {
    let endpoint = Endpoint::parse("ws://stream.test/ws/execution")
        .unwrap()
        .with_user_id("user-7")
        .with_conversation_id("conv-42");
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();

    let manager = ConnectionManager::spawn(ManagerConfig::new(endpoint), connector, handler);
    assert!(manager.is_connecting());

    let attempt = listener.next_attempt().await.unwrap();
    assert_eq!(attempt.query("user_id").as_deref(), Some("user-7"));
    assert_eq!(attempt.query("conversation_id").as_deref(), Some("conv-42"));
    let mut remote = attempt.accept();

    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
    assert!(manager.is_connected());
    assert_eq!(
        remote.recv_json().await,
        Some(json!({ "type": "subscribe", "channel": "conversation", "id": "conv-42" }))
    );

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_control_frames_never_reach_the_caller() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config(1000, 5), connector, handler);

    let remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    remote.send_json(&json!({ "type": "step", "n": 1 }));
    remote.send_json(&json!({ "type": "pong" }));
    remote.send_json(&json!({ "type": "connection_established", "session_id": "s-1" }));
    remote.send_text("not json");
    remote.send_text(r#"["no","type"]"#);
    remote.send_json(&json!({ "type": "step", "n": 2 }));
    remote.send_json(&json!({ "type": "done", "payload": { "ok": true } }));

    let mut delivered: Vec<Value> = Vec::new();
    while delivered.len() < 3 {
        match next_event(&mut events).await {
            ConnectionEvent::Message(frame) => delivered.push(frame),
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(
        delivered,
        vec![
            json!({ "type": "step", "n": 1 }),
            json!({ "type": "step", "n": 2 }),
            json!({ "type": "done", "payload": { "ok": true } }),
        ]
    );
    assert!(manager.is_connected());
    assert_eq!(manager.error(), None);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_then_gives_up() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config(2000, 3), connector, handler);

    listener.next_attempt().await.unwrap().refuse("connection refused");
    let mut refused_at = Instant::now();

    for (expected_ms, attempts) in [(2000, 1), (4000, 2), (8000, 3)] {
        let attempt = listener.next_attempt().await.unwrap();
        assert_delay(refused_at.elapsed(), expected_ms);
        assert_eq!(manager.reconnect_attempts(), attempts);
        assert!(manager.is_connecting());

        attempt.refuse("connection refused");
        refused_at = Instant::now();
    }

    let fatal = wait_for(&mut events, |e| {
        matches!(e, ConnectionEvent::Error(err) if err.is_fatal())
    })
    .await;
    assert_eq!(
        fatal,
        ConnectionEvent::Error(ConnectionError::RetriesExhausted { attempts: 3, max: 3 })
    );

    let status = manager.status();
    assert_eq!(status.phase, ConnectionPhase::Disconnected);
    assert_eq!(status.reconnect_attempts, 3);
    assert!(status.error.unwrap().is_fatal());

    // Terminal: no further attempts on their own
    let idle = tokio::time::timeout(Duration::from_secs(3600), listener.next_attempt()).await;
    assert!(idle.is_err());

    // Manual retry starts over
    manager.reconnect();
    let asked_at = Instant::now();
    let _remote = accept_next(&mut listener).await;
    assert_delay(asked_at.elapsed(), 100);
    wait_for(&mut events, |e| *e == ConnectionEvent::Connected).await;
    assert_eq!(manager.reconnect_attempts(), 0);
    assert_eq!(manager.error(), None);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_server_close_reconnects_and_resets_counter() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config(1500, 5), connector, handler);

    let remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    remote.close(1011, "server restart");
    let closed_at = Instant::now();
    match next_event(&mut events).await {
        ConnectionEvent::Disconnected(reason) => {
            assert_eq!(reason.code, 1011);
            assert!(reason.clean);
        }
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert_eq!(manager.reconnect_attempts(), 1);

    let _remote = accept_next(&mut listener).await;
    assert_delay(closed_at.elapsed(), 1500);
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
    assert_eq!(manager.reconnect_attempts(), 0);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_then_abnormal_close() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config(1000, 5), connector, handler);

    let remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    remote.fail("connection reset");
    assert_eq!(
        next_event(&mut events).await,
        ConnectionEvent::Error(ConnectionError::Transport("connection reset".into()))
    );
    match next_event(&mut events).await {
        ConnectionEvent::Disconnected(reason) => {
            assert_eq!(reason.code, 1006);
            assert!(!reason.clean);
        }
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert!(manager.error().is_some());

    let _remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
    assert_eq!(manager.error(), None);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_disconnect_suppresses_reconnect() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config(1000, 5), connector, handler);

    let mut remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    manager.disconnect();
    match next_event(&mut events).await {
        ConnectionEvent::Disconnected(reason) => {
            assert_eq!(reason.code, 1000);
            assert!(reason.clean);
        }
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert_eq!(remote.recv().await, None);
    assert!(remote.is_client_closed());

    // Neither time nor foregrounding brings it back
    manager.resume();
    let idle = tokio::time::timeout(Duration::from_secs(600), listener.next_attempt()).await;
    assert!(idle.is_err());
    assert_eq!(manager.status().phase, ConnectionPhase::Disconnected);
    assert_eq!(manager.reconnect_attempts(), 0);

    // Explicit reconnect clears the flag
    manager.reconnect();
    let _remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_pending_retry() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config(5000, 5), connector, handler);

    let remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
    drop(remote);
    wait_for(&mut events, |e| matches!(e, ConnectionEvent::Disconnected(_))).await;
    assert_eq!(manager.reconnect_attempts(), 1);

    // Backoff timer is pending; disconnect must clear it
    manager.disconnect();
    let idle = tokio::time::timeout(Duration::from_secs(60), listener.next_attempt()).await;
    assert!(idle.is_err());

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_silent_transport_is_declared_stale() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config(1000, 5), connector, handler);

    let mut remote = accept_next(&mut listener).await;
    let opened_at = Instant::now();
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    // Pings at 30s and 60s go unanswered
    for tick in [30_000, 60_000] {
        assert_eq!(remote.recv_json().await, Some(json!({ "type": "ping" })));
        assert_delay(opened_at.elapsed(), tick);
    }

    // The 90s tick finds 90s of silence, over the 75s threshold
    match next_event(&mut events).await {
        ConnectionEvent::Disconnected(reason) => {
            assert!(!reason.clean);
            assert_eq!(reason.code, 1006);
            assert!(reason.reason.contains("no pong"), "{reason}");
        }
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert_delay(opened_at.elapsed(), 90_000);
    assert_eq!(remote.recv().await, None);

    let _remote = accept_next(&mut listener).await;
    assert_delay(opened_at.elapsed(), 91_000);
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pongs_keep_connection_alive() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config(1000, 5), connector, handler);

    let mut remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    let responder = tokio::spawn(async move {
        let mut pings = 0u32;
        while let Some(frame) = remote.recv_json().await {
            if frame["type"] == "ping" {
                pings += 1;
                remote.send_json(&json!({ "type": "pong" }));
            }
        }
        pings
    });

    // Ticks at 30s..=600s, all answered
    tokio::time::sleep(Duration::from_secs(615)).await;
    assert!(manager.is_connected());
    assert!(listener.try_next_attempt().is_none());
    assert!(events.try_recv().is_err());

    manager.shutdown().await;
    let pings = responder.await.unwrap();
    assert_eq!(pings, 20);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_abandons_hung_attempt() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config(1000, 5), connector, handler);

    // Never answered
    let hung = listener.next_attempt().await.unwrap();
    let started_at = Instant::now();

    match next_event(&mut events).await {
        ConnectionEvent::Disconnected(reason) => {
            assert!(!reason.clean);
            assert!(reason.reason.contains("timeout"), "{reason}");
        }
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert_delay(started_at.elapsed(), 10_000);
    assert_eq!(manager.reconnect_attempts(), 1);

    // A late answer to the abandoned attempt goes nowhere
    let late = hung.accept();
    assert!(late.is_client_closed());

    let _remote = accept_next(&mut listener).await;
    assert_delay(started_at.elapsed(), 11_000);
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_visibility_recovers_after_exhaustion() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let (notifier, watcher) = visibility_channel();
    let manager =
        ConnectionManager::spawn_with_visibility(config(1000, 1), connector, handler, watcher);

    listener.next_attempt().await.unwrap().refuse("offline");
    listener.next_attempt().await.unwrap().refuse("offline");
    wait_for(&mut events, |e| {
        matches!(e, ConnectionEvent::Error(err) if err.is_fatal())
    })
    .await;
    assert_eq!(manager.reconnect_attempts(), 1);

    notifier.set(Visibility::Hidden);
    let idle = tokio::time::timeout(Duration::from_secs(60), listener.next_attempt()).await;
    assert!(idle.is_err());

    notifier.set(Visibility::Visible);
    let shown_at = Instant::now();
    let _remote = accept_next(&mut listener).await;
    assert_delay(shown_at.elapsed(), 100);
    wait_for(&mut events, |e| *e == ConnectionEvent::Connected).await;
    assert_eq!(manager.reconnect_attempts(), 0);

    // Visible while connected is a no-op
    notifier.set(Visibility::Hidden);
    notifier.set(Visibility::Visible);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(listener.try_next_attempt().is_none());
    assert!(manager.is_connected());

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_while_connected_starts_fresh() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config(1000, 5), connector, handler);

    let mut remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    manager.reconnect();
    let asked_at = Instant::now();
    match next_event(&mut events).await {
        ConnectionEvent::Disconnected(reason) => {
            assert_eq!(reason.code, 1000);
            assert!(reason.clean);
        }
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert_eq!(remote.recv().await, None);
    assert!(remote.is_client_closed());
    assert_eq!(manager.reconnect_attempts(), 0);

    let _remote = accept_next(&mut listener).await;
    assert_delay(asked_at.elapsed(), 100);
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
    assert!(manager.is_connected());

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_zero_heartbeat_interval_keeps_manager_alive() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let mut cfg = config(1000, 5);
    cfg.heartbeat_interval = Duration::ZERO;
    cfg.stale_threshold = Duration::ZERO;
    let manager = ConnectionManager::spawn(cfg, connector, handler);

    let mut remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);
    assert_eq!(remote.recv_json().await, Some(json!({ "type": "ping" })));

    manager.disconnect();
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected(reason) if reason.code == 1000
    ));
    assert!(!manager.is_connected());

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_sends_only_while_connected() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let mut cfg = config(1000, 5);
    cfg.enabled = false;
    let manager = ConnectionManager::spawn(cfg, connector, handler);

    assert_eq!(manager.status().phase, ConnectionPhase::Disconnected);
    manager.send_message(&json!({ "type": "input", "text": "lost" }));
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(listener.try_next_attempt().is_none());

    manager.set_enabled(true);
    let mut remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    manager.send_message(&json!({ "type": "input", "text": "kept" }));
    assert_eq!(
        remote.recv_json().await,
        Some(json!({ "type": "input", "text": "kept" }))
    );

    manager.set_enabled(false);
    wait_for(&mut events, |e| matches!(e, ConnectionEvent::Disconnected(_))).await;
    assert_eq!(remote.recv().await, None);

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_tears_down_and_closes_events() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config(1000, 5), connector, handler);

    let mut remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    manager.shutdown().await;
    assert!(matches!(
        next_event(&mut events).await,
        ConnectionEvent::Disconnected(reason) if reason.code == 1000
    ));
    assert_eq!(events.recv().await, None);
    assert_eq!(remote.recv().await, None);
}

#[tokio::test(start_paused = true)]
async fn test_drop_stops_the_manager() {
    let (connector, mut listener) = channel_transport();
    let (handler, mut events) = ChannelHandler::new();
    let manager = ConnectionManager::spawn(config(1000, 5), connector, handler);

    let mut remote = accept_next(&mut listener).await;
    assert_eq!(next_event(&mut events).await, ConnectionEvent::Connected);

    drop(manager);
    assert_eq!(remote.recv().await, None);
    wait_for(&mut events, |e| matches!(e, ConnectionEvent::Disconnected(_))).await;
    assert_eq!(events.recv().await, None);
}
