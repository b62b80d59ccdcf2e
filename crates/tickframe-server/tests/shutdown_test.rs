//! Shutdown coordination: every engine task is joined, clients observe the
//! shutdown close code and nothing runs after `stop` returns.

mod common;

use std::{sync::atomic::Ordering, time::Duration};

use common::{RECV_TIMEOUT, connect, eventually, start_server, test_config, wait_for_clients};
use tickframe_server::{DisconnectCause, Envelope, HasConnection, SendError, ServerError, close_code};

#[tokio::test]
async fn stop_joins_every_task() {
    let (server, _recorder, addr) = start_server(test_config());

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connect(&addr).await);
    }
    wait_for_clients(&server, 3).await;
    assert!(server.active_tasks() >= 5, "accept loop, tick loop and three connections");

    server.stop().await;

    assert_eq!(server.active_tasks(), 0);
    assert_eq!(server.client_count(), 0);
    assert!(!server.is_running());
    assert!(server.local_addr().is_none());
}

#[tokio::test]
async fn clients_observe_shutdown_code() {
    let (server, recorder, addr) = start_server(test_config());

    let client = connect(&addr).await;
    wait_for_clients(&server, 1).await;
    let id = server.clients()[0].connection_id();

    server.stop().await;

    let err = tokio::time::timeout(RECV_TIMEOUT, client.closed()).await.unwrap();
    match err {
        quinn::ConnectionError::ApplicationClosed(close) => {
            assert_eq!(close.error_code.into_inner(), u64::from(close_code::SHUTDOWN));
        },
        other => panic!("expected application close, got {other}"),
    }

    // on_disconnect ran before stop returned
    assert_eq!(recorder.disconnect_cause(id), Some(DisconnectCause::Shutdown));
}

#[tokio::test]
async fn ticks_cease_after_stop() {
    let (server, recorder, _addr) = start_server(test_config());
    eventually("a few ticks", || recorder.ticks.load(Ordering::SeqCst) >= 3).await;

    server.stop().await;
    let after_stop = recorder.ticks.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.ticks.load(Ordering::SeqCst), after_stop);
}

#[tokio::test]
async fn stop_is_idempotent_and_concurrent_safe() {
    let (server, _recorder, addr) = start_server(test_config());
    let _client = connect(&addr).await;
    wait_for_clients(&server, 1).await;

    let other = server.clone();
    tokio::join!(server.stop(), other.stop());
    server.stop().await;

    assert_eq!(server.active_tasks(), 0);
}

#[tokio::test]
async fn stopped_server_never_restarts() {
    let (server, _recorder, _addr) = start_server(test_config());
    server.stop().await;

    assert!(matches!(server.start(), Err(ServerError::Stopped)));
}

#[tokio::test]
async fn sends_after_stop_report_shutting_down() {
    let (server, _recorder, _addr) = start_server(test_config());
    server.stop().await;

    let err = server.broadcast(&Envelope::empty("late")).unwrap_err();
    assert!(matches!(err, SendError::ShuttingDown));
    assert!(err.is_benign());
}

#[tokio::test]
async fn stop_waits_for_in_flight_handlers() {
    let (server, recorder, addr) = start_server(test_config());

    let client = connect(&addr).await;
    wait_for_clients(&server, 1).await;

    client.send(&Envelope::empty("slow")).await.unwrap();
    eventually("slow handler started", || recorder.slow_started.load(Ordering::SeqCst)).await;
    assert!(!recorder.slow_finished.load(Ordering::SeqCst));

    server.stop().await;

    assert!(recorder.slow_finished.load(Ordering::SeqCst));
    assert_eq!(server.active_tasks(), 0);
}

#[tokio::test]
async fn handler_can_request_stop() {
    let (server, _recorder, addr) = start_server(test_config());

    let client = connect(&addr).await;
    wait_for_clients(&server, 1).await;

    client.send(&Envelope::empty("shutdown")).await.unwrap();
    tokio::time::timeout(RECV_TIMEOUT, server.stopped()).await.unwrap();
    assert!(!server.is_running());

    server.stop().await;
    assert_eq!(server.active_tasks(), 0);
}

#[tokio::test]
async fn connections_during_shutdown_are_not_registered() {
    let (server, recorder, addr) = start_server(test_config());
    server.request_stop();

    let attempt = tickframe_client::ClientConfig {
        connect_timeout: Duration::from_millis(500),
        ..tickframe_client::ClientConfig::development(addr.as_str())
    };
    // The endpoint may still complete a handshake, but nothing registers
    let _ = tickframe_client::connect(&attempt).await;

    server.stop().await;
    assert_eq!(recorder.connects.load(Ordering::SeqCst), 0);
    assert_eq!(server.client_count(), 0);
}
