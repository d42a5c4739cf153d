//! Draining shutdown versus immediate kill.

mod common;

use std::sync::Arc;
use std::time::Duration;

use switchboard::services::messages::*;
use switchboard::services::room;
use switchboard::{
    CallError, ErrorCode, LocalBus, RoomName, RoomTopic, RpcError, ServerOption, format_room_topic,
};
use tokio::sync::Semaphore;

use common::init_tracing;

/// Room handler whose `DeleteRoom` waits until the test opens the gate.
struct Gated {
    gate: Arc<Semaphore>,
}

#[switchboard::async_trait]
impl room::Handler for Gated {
    async fn delete_room(
        &self,
        _request: DeleteRoomRequest,
    ) -> Result<DeleteRoomResponse, CallError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| CallError::transport("gate closed"))?;
        Ok(DeleteRoomResponse {})
    }

    async fn send_data(&self, _request: SendDataRequest) -> Result<SendDataResponse, CallError> {
        Err(CallError::application(ErrorCode::Unimplemented, "send_data"))
    }

    async fn update_room_metadata(
        &self,
        _request: UpdateRoomMetadataRequest,
    ) -> Result<RoomInfo, CallError> {
        Err(CallError::application(
            ErrorCode::Unimplemented,
            "update_room_metadata",
        ))
    }
}

const IN_FLIGHT: usize = 3;

fn lobby() -> RoomTopic {
    format_room_topic(&RoomName::new("lobby").expect("room"))
}

struct Harness {
    bus: LocalBus,
    gate: Arc<Semaphore>,
    server: Arc<room::Server<Gated>>,
    calls: Vec<tokio::task::JoinHandle<switchboard::RpcResult<DeleteRoomResponse>>>,
}

/// Start a gated server and park `IN_FLIGHT` calls inside it.
async fn harness(options: &[ServerOption]) -> Harness {
    init_tracing();
    let bus = LocalBus::new();
    let gate = Arc::new(Semaphore::new(0));
    let server = Arc::new(
        room::Server::new(
            Gated {
                gate: Arc::clone(&gate),
            },
            &bus,
            options,
        )
        .expect("server"),
    );
    server
        .register_all_topics(&lobby())
        .await
        .expect("register all");

    let client = room::Client::new(&bus, &[]).expect("client");
    let calls = (0..IN_FLIGHT)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .delete_room(
                        &lobby(),
                        DeleteRoomRequest {
                            room: "lobby".to_string(),
                        },
                    )
                    .await
            })
        })
        .collect();

    while server.rpc().in_flight() < IN_FLIGHT {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    Harness {
        bus,
        gate,
        server,
        calls,
    }
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_calls() {
    let h = harness(&[]).await;

    let shutdown = {
        let server = Arc::clone(&h.server);
        tokio::spawn(async move { server.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!shutdown.is_finished(), "shutdown returned before drain");
    assert_eq!(h.bus.subscription_count(), 0, "new requests are refused");

    h.gate.add_permits(IN_FLIGHT);
    shutdown.await.expect("join").expect("drained");
    assert_eq!(h.server.rpc().in_flight(), 0);
    for call in h.calls {
        call.await.expect("join").expect("call completed");
    }
    assert_eq!(h.server.rpc().registration_count(), 0);
}

#[tokio::test]
async fn test_concurrent_shutdowns_both_wait_for_drain() {
    let h = harness(&[]).await;

    let spawn_shutdown = || {
        let server = Arc::clone(&h.server);
        tokio::spawn(async move { server.shutdown().await })
    };
    let first = spawn_shutdown();
    let second = spawn_shutdown();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!first.is_finished());
    assert!(!second.is_finished(), "second shutdown returned before drain");

    h.gate.add_permits(IN_FLIGHT);
    first.await.expect("join").expect("first drained");
    second.await.expect("join").expect("second drained");
    assert_eq!(h.server.rpc().in_flight(), 0);
}

#[tokio::test]
async fn test_shutdown_after_kill_waits_for_aborted_calls() {
    let h = harness(&[]).await;
    h.server.kill();
    h.server.shutdown().await.expect("aborted calls release");
    assert_eq!(h.server.rpc().in_flight(), 0);
}

#[tokio::test]
async fn test_kill_abandons_in_flight_calls() {
    let h = harness(&[]).await;

    h.server.kill();
    assert!(h.server.rpc().is_closed());
    assert_eq!(h.bus.subscription_count(), 0);

    for call in h.calls {
        let err = call.await.expect("join").expect_err("abandoned");
        assert!(matches!(err.as_call(), Some(CallError::Transport { .. })));
    }
    assert_eq!(h.server.rpc().in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_drain_overrun_force_closes() {
    let h = harness(&[ServerOption::DrainTimeout(Duration::from_secs(5))]).await;

    let err = h.server.shutdown().await.expect_err("drain overruns");
    match err {
        RpcError::Shutdown { in_flight, bound } => {
            assert_eq!(in_flight, IN_FLIGHT);
            assert_eq!(bound, Duration::from_secs(5));
        }
        other => panic!("unexpected error: {other}"),
    }
    for call in h.calls {
        assert!(call.await.expect("join").is_err());
    }
}

#[tokio::test]
async fn test_closed_server_refuses_registration() {
    let h = harness(&[]).await;
    h.server.kill();
    let err = h
        .server
        .register_all_topics(&lobby())
        .await
        .expect_err("closed");
    assert!(matches!(err, RpcError::Registration { .. }));
    h.server.shutdown().await.expect("shutdown after kill succeeds");
}
