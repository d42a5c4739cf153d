//! End-to-end tests of the generated service facades over the local bus.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use switchboard::services::messages::*;
use switchboard::services::{
    keepalive, new_typed_participant_client, new_typed_participant_server, participant,
    room_manager,
};
use switchboard::{
    CallError, CallErrorKind, CallMetrics, CallRole, ClientParams, ErrorCode, LocalBus,
    MetricsObserver, NodeId, ParticipantIdentity, ParticipantTopic, RoomName, RpcConfig, RpcError,
    format_node_topic, format_participant_topic,
};

use common::{FaultyBus, init_tracing};

#[derive(Default)]
struct Participants {
    removed: Mutex<Vec<String>>,
}

#[switchboard::async_trait]
impl participant::Handler for Participants {
    async fn remove_participant(
        &self,
        request: RoomParticipantIdentity,
    ) -> Result<RemoveParticipantResponse, CallError> {
        self.removed.lock().push(request.identity);
        Ok(RemoveParticipantResponse {})
    }

    async fn mute_published_track(
        &self,
        request: MuteRoomTrackRequest,
    ) -> Result<MuteRoomTrackResponse, CallError> {
        if request.track_sid.is_empty() {
            return Err(CallError::invalid_argument("track_sid is required"));
        }
        Ok(MuteRoomTrackResponse {
            track_sid: request.track_sid,
            muted: request.muted,
        })
    }

    async fn update_participant(
        &self,
        request: UpdateParticipantRequest,
    ) -> Result<ParticipantInfo, CallError> {
        Ok(ParticipantInfo {
            sid: format!("PA_{}", request.identity),
            identity: request.identity,
            name: request.name,
            metadata: request.metadata,
            attributes: request.attributes,
        })
    }

    async fn update_subscriptions(
        &self,
        _request: UpdateSubscriptionsRequest,
    ) -> Result<UpdateSubscriptionsResponse, CallError> {
        Ok(UpdateSubscriptionsResponse {})
    }

    async fn forward_participant(
        &self,
        _request: ForwardParticipantRequest,
    ) -> Result<ForwardParticipantResponse, CallError> {
        Err(CallError::application(
            ErrorCode::Unimplemented,
            "forwarding is disabled",
        ))
    }
}

fn alice() -> ParticipantTopic {
    format_participant_topic(
        &RoomName::new("lobby").expect("room"),
        &ParticipantIdentity::new("alice").expect("identity"),
    )
}

fn identity() -> RoomParticipantIdentity {
    RoomParticipantIdentity {
        room: "lobby".to_string(),
        identity: "alice".to_string(),
    }
}

#[tokio::test]
async fn test_participant_round_trip() {
    init_tracing();
    let bus = LocalBus::new();
    let params = ClientParams::new(RpcConfig::default(), Arc::new(bus.clone()));

    let server = new_typed_participant_server(Participants::default(), &bus, &[]).expect("server");
    server
        .register_all_topics(&alice())
        .await
        .expect("register all");
    assert_eq!(server.rpc().registration_count(), 5);
    assert_eq!(bus.subscription_count(), 5);

    let client = new_typed_participant_client(&params).expect("client");
    client
        .remove_participant(&alice(), identity())
        .await
        .expect("remove");
    assert_eq!(*server.handler().removed.lock(), vec!["alice".to_string()]);

    let mut attributes = BTreeMap::new();
    attributes.insert("role".to_string(), "host".to_string());
    let info = client
        .update_participant(
            &alice(),
            UpdateParticipantRequest {
                room: "lobby".to_string(),
                identity: "alice".to_string(),
                metadata: "{}".to_string(),
                name: "Alice".to_string(),
                attributes: attributes.clone(),
            },
        )
        .await
        .expect("update");
    assert_eq!(info.sid, "PA_alice");
    assert_eq!(info.attributes, attributes);
}

#[tokio::test]
async fn test_application_errors_are_terminal() {
    let bus = LocalBus::new();
    let server = participant::Server::new(Participants::default(), &bus, &[]).expect("server");
    server
        .register_all_topics(&alice())
        .await
        .expect("register all");
    let client = participant::Client::new(&bus, &[]).expect("client");

    let err = client
        .mute_published_track(
            &alice(),
            MuteRoomTrackRequest {
                room: "lobby".to_string(),
                identity: "alice".to_string(),
                track_sid: String::new(),
                muted: true,
            },
        )
        .await
        .expect_err("validation failure");
    let call = err.as_call().expect("call error");
    assert_eq!(call.kind(), CallErrorKind::Terminal);
    assert!(matches!(
        call,
        CallError::Application {
            code: ErrorCode::InvalidArgument,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unregistered_topic_is_unavailable() {
    let bus = LocalBus::new();
    let server = participant::Server::new(Participants::default(), &bus, &[]).expect("server");
    server
        .register_all_topics(&alice())
        .await
        .expect("register all");
    let client = participant::Client::new(&bus, &[]).expect("client");

    let bob = format_participant_topic(
        &RoomName::new("lobby").expect("room"),
        &ParticipantIdentity::new("bob").expect("identity"),
    );
    let err = client
        .remove_participant(&bob, identity())
        .await
        .expect_err("nobody subscribed");
    assert!(err.is_retryable());

    server
        .deregister_all_topics(&alice())
        .await
        .expect("deregister all");
    assert_eq!(server.rpc().registration_count(), 0);
    assert_eq!(bus.subscription_count(), 0);
    assert!(client
        .remove_participant(&alice(), identity())
        .await
        .is_err());
}

#[tokio::test]
async fn test_single_method_registration() {
    let bus = LocalBus::new();
    let server = participant::Server::new(Participants::default(), &bus, &[]).expect("server");
    server
        .register_topic(participant::Method::RemoveParticipant, &alice())
        .expect("register");
    assert!(server.rpc().is_registered("RemoveParticipant", &alice()));

    let err = server
        .register_topic(participant::Method::RemoveParticipant, &alice())
        .expect_err("duplicate");
    assert!(matches!(err, RpcError::Registration { .. }));

    server
        .deregister_topic(participant::Method::RemoveParticipant, &alice())
        .expect("deregister");
    server
        .deregister_topic(participant::Method::RemoveParticipant, &alice())
        .expect("deregistering twice is harmless");
    assert_eq!(bus.subscription_count(), 0);
}

#[tokio::test]
async fn test_register_all_rolls_back_on_failure() {
    init_tracing();
    let bus = FaultyBus::new();
    bus.fail_register("UpdateParticipant");
    let server = participant::Server::new(Participants::default(), &bus, &[]).expect("server");

    let err = server
        .register_all_topics(&alice())
        .await
        .expect_err("third registration fails");
    assert!(matches!(
        err,
        RpcError::Registration { ref method, .. } if method == "UpdateParticipant"
    ));
    assert_eq!(server.rpc().registration_count(), 0);
    assert_eq!(bus.local().subscription_count(), 0);
    assert_eq!(
        bus.log(),
        vec![
            "+RemoveParticipant",
            "+MutePublishedTrack",
            "+UpdateParticipant",
            "-MutePublishedTrack",
            "-RemoveParticipant",
        ]
    );

    // a failed bulk registration can be retried once the fault clears
    bus.heal();
    server
        .register_all_topics(&alice())
        .await
        .expect("register all");
    assert_eq!(server.rpc().registration_count(), 5);
}

#[tokio::test]
async fn test_deregister_all_attempts_every_method() {
    init_tracing();
    let bus = FaultyBus::new();
    let server = participant::Server::new(Participants::default(), &bus, &[]).expect("server");
    server
        .register_all_topics(&alice())
        .await
        .expect("register all");

    bus.fail_deregister("RemoveParticipant");
    bus.fail_deregister("UpdateParticipant");
    let err = server
        .deregister_all_topics(&alice())
        .await
        .expect_err("two deregistrations fail");
    match err {
        RpcError::Deregistration { failures } => assert_eq!(failures.len(), 2),
        other => panic!("unexpected error: {other}"),
    }
    let removed = bus
        .log()
        .into_iter()
        .filter(|entry| entry.starts_with('-'))
        .count();
    assert_eq!(removed, 5);
    assert_eq!(server.rpc().registration_count(), 2);
    assert!(server.rpc().is_registered("RemoveParticipant", &alice()));
    assert!(server.rpc().is_registered("UpdateParticipant", &alice()));
    assert_eq!(bus.local().subscription_count(), 2);
}

#[tokio::test]
async fn test_failed_deregister_all_can_be_retried() {
    init_tracing();
    let bus = FaultyBus::new();
    let server = participant::Server::new(Participants::default(), &bus, &[]).expect("server");
    server
        .register_all_topics(&alice())
        .await
        .expect("register all");
    let client = participant::Client::new(bus.local(), &[]).expect("client");

    bus.fail_deregister("RemoveParticipant");
    bus.fail_deregister("MutePublishedTrack");
    bus.fail_deregister("UpdateParticipant");
    assert!(server.deregister_all_topics(&alice()).await.is_err());
    client
        .remove_participant(&alice(), identity())
        .await
        .expect("still subscribed");

    bus.heal();
    server
        .deregister_all_topics(&alice())
        .await
        .expect("retry clears the rest");
    assert_eq!(server.rpc().registration_count(), 0);
    assert_eq!(bus.local().subscription_count(), 0);
    let err = client
        .remove_participant(&alice(), identity())
        .await
        .expect_err("no longer subscribed");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_bulk_registration_on_disjoint_topics_is_independent() {
    init_tracing();
    let bus = FaultyBus::new();
    let bob = format_participant_topic(
        &RoomName::new("lobby").expect("room"),
        &ParticipantIdentity::new("bob").expect("identity"),
    );
    bus.fail_register_on("UpdateSubscriptions", &bob);
    let server = participant::Server::new(Participants::default(), &bus, &[]).expect("server");

    let alice_topic = alice();
    let (for_alice, for_bob) = tokio::join!(
        server.register_all_topics(&alice_topic),
        server.register_all_topics(&bob),
    );
    for_alice.expect("alice registers");
    assert!(matches!(for_bob, Err(RpcError::Registration { .. })));

    assert_eq!(server.rpc().registration_count(), 5);
    assert_eq!(bus.local().subscription_count(), 5);
    for &method in participant::Method::ALL {
        assert!(server.rpc().is_registered(method.name(), &alice()));
        assert!(!server.rpc().is_registered(method.name(), &bob));
    }

    let client = participant::Client::new(bus.local(), &[]).expect("client");
    client
        .remove_participant(&alice(), identity())
        .await
        .expect("alice still served");
}

#[tokio::test]
async fn test_observer_sees_each_call_once() {
    let bus = LocalBus::new();
    let metrics = CallMetrics::new();
    let observer: Arc<dyn MetricsObserver> = metrics.clone();
    let params = ClientParams::new(RpcConfig::recommended(), Arc::new(bus.clone()))
        .with_observer(Arc::clone(&observer));

    let server = participant::Server::new(
        Participants::default(),
        &bus,
        &params.server_options(),
    )
    .expect("server");
    server
        .register_all_topics(&alice())
        .await
        .expect("register all");
    let client = new_typed_participant_client(&params).expect("client");

    client
        .remove_participant(&alice(), identity())
        .await
        .expect("remove");
    assert!(client
        .forward_participant(
            &alice(),
            ForwardParticipantRequest {
                room: "lobby".to_string(),
                identity: "alice".to_string(),
                destination_room: "stage".to_string(),
            },
        )
        .await
        .is_err());

    let client_side = metrics.snapshot(CallRole::Client);
    assert_eq!(client_side.requests, 2);
    assert_eq!(client_side.failures, 1);
    let server_side = metrics.snapshot(CallRole::Server);
    assert_eq!(server_side.requests, 2);
    assert_eq!(server_side.failures, 1);
}

#[tokio::test]
async fn test_closed_client_rejects_calls() {
    let bus = LocalBus::new();
    let client = participant::Client::new(&bus, &[]).expect("client");
    client.close();
    client.close();
    let err = client
        .remove_participant(&alice(), identity())
        .await
        .expect_err("closed");
    assert_eq!(err.as_call(), Some(&CallError::Closed));
    assert_eq!(bus.stats().clients_closed, 1);
}

struct Node {
    id: &'static str,
}

#[switchboard::async_trait]
impl keepalive::Handler for Node {
    async fn ping(&self, request: KeepalivePing) -> Result<KeepalivePong, CallError> {
        Ok(KeepalivePong {
            node_id: self.id.to_string(),
            timestamp_ms: request.timestamp_ms,
        })
    }
}

#[tokio::test]
async fn test_multi_target_collects_every_reply() {
    let bus = LocalBus::new();
    let topic = format_node_topic(&NodeId::new("cluster").expect("node"));
    let a = keepalive::Server::new(Node { id: "a" }, &bus, &[]).expect("server");
    let b = keepalive::Server::new(Node { id: "b" }, &bus, &[]).expect("server");
    a.register_all_topics(&topic).await.expect("register");
    b.register_all_topics(&topic).await.expect("register");

    let client = keepalive::Client::new(&bus, &[]).expect("client");
    let mut nodes: Vec<String> = client
        .ping(
            &topic,
            KeepalivePing {
                node_id: "probe".to_string(),
                timestamp_ms: 42,
            },
        )
        .await
        .expect("fan out")
        .into_iter()
        .map(|reply| reply.expect("pong").node_id)
        .collect();
    nodes.sort();
    assert_eq!(nodes, vec!["a".to_string(), "b".to_string()]);

    b.kill();
    let replies = client
        .ping(
            &topic,
            KeepalivePing {
                node_id: "probe".to_string(),
                timestamp_ms: 43,
            },
        )
        .await
        .expect("fan out");
    assert_eq!(replies.len(), 1);
}

struct Media;

#[switchboard::async_trait]
impl room_manager::Handler for Media {
    async fn create_room(&self, request: CreateRoomRequest) -> Result<RoomInfo, CallError> {
        Ok(RoomInfo {
            sid: format!("RM_{}", request.name),
            name: request.name,
            metadata: request.metadata,
            num_participants: 0,
        })
    }
}

#[tokio::test]
async fn test_affinity_method_routes_to_a_node() {
    let bus = LocalBus::new();
    let topic = format_node_topic(&NodeId::new("media-1").expect("node"));
    let server = room_manager::Server::new(Media, &bus, &[]).expect("server");
    server.register_all_topics(&topic).await.expect("register");

    let client = room_manager::Client::new(&bus, &[]).expect("client");
    let room = client
        .create_room(
            &topic,
            CreateRoomRequest {
                name: "lobby".to_string(),
                empty_timeout_secs: 0,
                max_participants: 0,
                metadata: String::new(),
            },
        )
        .await
        .expect("create");
    assert_eq!(room.sid, "RM_lobby");
}
