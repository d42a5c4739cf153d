//! Built-in services and their topic bindings.
//!
//! Every service here is generated by [`rpc_service!`](crate::rpc_service)
//! from one declaration. Which topic type a service is addressed by is part
//! of that declaration and is listed in [`SERVICE_BINDINGS`]:
//!
//! | Service | Addressed by |
//! |---|---|
//! | `Participant` | [`ParticipantTopic`] |
//! | `Room` | [`RoomTopic`] |
//! | `AgentDispatchInternal` | [`RoomTopic`] |
//! | `RoomManager` | [`NodeTopic`] |
//! | `Keepalive` | [`NodeTopic`] |

pub mod messages;

use std::collections::HashSet;

use crate::descriptor::{MethodDescriptor, Role, ServiceDescriptor};
use crate::duplex::Duplex;
use crate::error::{RpcError, RpcResult};
use crate::policy::{ClientOption, ClientParams, ServerOption};
use crate::substrate::MessageBus;
use crate::topic::{NodeTopic, ParticipantTopic, RoomTopic};

use messages::*;

crate::rpc_service! {
    /// Session-level operations on one participant.
    pub mod participant: Participant<ParticipantTopic> {
        unary RemoveParticipant =>
            fn remove_participant(RoomParticipantIdentity) -> RemoveParticipantResponse;
        unary MutePublishedTrack =>
            fn mute_published_track(MuteRoomTrackRequest) -> MuteRoomTrackResponse;
        unary UpdateParticipant =>
            fn update_participant(UpdateParticipantRequest) -> ParticipantInfo;
        unary UpdateSubscriptions =>
            fn update_subscriptions(UpdateSubscriptionsRequest) -> UpdateSubscriptionsResponse;
        unary ForwardParticipant =>
            fn forward_participant(ForwardParticipantRequest) -> ForwardParticipantResponse;
    }
}

crate::rpc_service! {
    /// Operations on a whole room, served by the node hosting it.
    pub mod room: Room<RoomTopic> {
        unary DeleteRoom => fn delete_room(DeleteRoomRequest) -> DeleteRoomResponse;
        unary SendData => fn send_data(SendDataRequest) -> SendDataResponse;
        unary UpdateRoomMetadata => fn update_room_metadata(UpdateRoomMetadataRequest) -> RoomInfo;
    }
}

crate::rpc_service! {
    /// Agent dispatch bookkeeping for a room.
    pub mod agent_dispatch_internal: AgentDispatchInternal<RoomTopic> {
        unary CreateDispatch => fn create_dispatch(AgentDispatch) -> AgentDispatch;
        unary DeleteDispatch => fn delete_dispatch(DeleteAgentDispatchRequest) -> AgentDispatch;
        unary ListDispatch =>
            fn list_dispatch(ListAgentDispatchRequest) -> ListAgentDispatchResponse;
    }
}

crate::rpc_service! {
    /// Room creation on a media node.
    pub mod room_manager: RoomManager<NodeTopic> {
        affinity CreateRoom => fn create_room(CreateRoomRequest) -> RoomInfo;
    }
}

crate::rpc_service! {
    /// Node liveness; every node answers and every node asks.
    pub mod keepalive: Keepalive<NodeTopic> {
        multi Ping => fn ping(KeepalivePing) -> KeepalivePong;
    }
}

/// Participant client bound to [`ParticipantTopic`].
pub type TypedParticipantClient = participant::Client;
/// Participant server bound to [`ParticipantTopic`].
pub type TypedParticipantServer<S> = participant::Server<S>;
/// Room client bound to [`RoomTopic`].
pub type TypedRoomClient = room::Client;
/// Room server bound to [`RoomTopic`].
pub type TypedRoomServer<S> = room::Server<S>;
/// Agent dispatch client bound to [`RoomTopic`].
pub type TypedAgentDispatchInternalClient = agent_dispatch_internal::Client;
/// Agent dispatch server bound to [`RoomTopic`].
pub type TypedAgentDispatchInternalServer<S> = agent_dispatch_internal::Server<S>;
/// Room manager client bound to [`NodeTopic`].
pub type TypedRoomManagerClient = room_manager::Client;
/// Room manager server bound to [`NodeTopic`].
pub type TypedRoomManagerServer<S> = room_manager::Server<S>;

/// Open a participant client.
pub fn new_typed_participant_client(params: &ClientParams) -> RpcResult<TypedParticipantClient> {
    participant::Client::new(params.bus(), &params.options())
}

/// Open a participant server.
pub fn new_typed_participant_server<S: participant::Handler>(
    handler: S,
    bus: &dyn MessageBus,
    options: &[ServerOption],
) -> RpcResult<TypedParticipantServer<S>> {
    participant::Server::new(handler, bus, options)
}

/// Open a room client.
pub fn new_typed_room_client(params: &ClientParams) -> RpcResult<TypedRoomClient> {
    room::Client::new(params.bus(), &params.options())
}

/// Open a room server.
pub fn new_typed_room_server<S: room::Handler>(
    handler: S,
    bus: &dyn MessageBus,
    options: &[ServerOption],
) -> RpcResult<TypedRoomServer<S>> {
    room::Server::new(handler, bus, options)
}

/// Open an agent dispatch client.
pub fn new_typed_agent_dispatch_internal_client(
    params: &ClientParams,
) -> RpcResult<TypedAgentDispatchInternalClient> {
    agent_dispatch_internal::Client::new(params.bus(), &params.options())
}

/// Open an agent dispatch server.
pub fn new_typed_agent_dispatch_internal_server<S: agent_dispatch_internal::Handler>(
    handler: S,
    bus: &dyn MessageBus,
    options: &[ServerOption],
) -> RpcResult<TypedAgentDispatchInternalServer<S>> {
    agent_dispatch_internal::Server::new(handler, bus, options)
}

/// Open a room manager client.
pub fn new_typed_room_manager_client(
    bus: &dyn MessageBus,
    options: &[ClientOption],
) -> RpcResult<TypedRoomManagerClient> {
    room_manager::Client::new(bus, options)
}

/// Open a room manager server.
pub fn new_typed_room_manager_server<S: room_manager::Handler>(
    handler: S,
    bus: &dyn MessageBus,
    options: &[ServerOption],
) -> RpcResult<TypedRoomManagerServer<S>> {
    room_manager::Server::new(handler, bus, options)
}

/// Keepalive client and server sharing one bus.
pub type KeepalivePubSub<S> = Duplex<keepalive::Client, keepalive::Server<S>>;

/// Open the keepalive channel: a client that pings and a server that answers.
///
/// If the server cannot be opened, the client is closed before the error
/// is returned.
pub fn new_keepalive_pubsub<S: keepalive::Handler>(
    params: &ClientParams,
    handler: S,
) -> RpcResult<KeepalivePubSub<S>> {
    Duplex::connect(
        || keepalive::Client::new(params.bus(), &params.options()),
        || keepalive::Server::new(handler, params.bus(), &params.server_options()),
    )
}

/// Kind of topic a service is addressed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Addressing {
    /// Room name plus participant identity.
    Participant,
    /// Room name.
    Room,
    /// Node identifier.
    Node,
}

/// One service's method table and addressing.
#[derive(Debug, Clone, Copy)]
pub struct ServiceBinding {
    /// Service name.
    pub service: &'static str,
    /// Method table.
    pub methods: &'static [MethodDescriptor],
    /// Topic kind the service is addressed by.
    pub addressing: Addressing,
}

impl ServiceBinding {
    /// Build a descriptor for one end of this service.
    pub fn descriptor(&self, role: Role) -> RpcResult<ServiceDescriptor> {
        ServiceDescriptor::new(self.service, self.methods, role)
    }
}

/// Every built-in service.
pub const SERVICE_BINDINGS: &[ServiceBinding] = &[
    ServiceBinding {
        service: participant::SERVICE_NAME,
        methods: participant::METHODS,
        addressing: Addressing::Participant,
    },
    ServiceBinding {
        service: room::SERVICE_NAME,
        methods: room::METHODS,
        addressing: Addressing::Room,
    },
    ServiceBinding {
        service: agent_dispatch_internal::SERVICE_NAME,
        methods: agent_dispatch_internal::METHODS,
        addressing: Addressing::Room,
    },
    ServiceBinding {
        service: room_manager::SERVICE_NAME,
        methods: room_manager::METHODS,
        addressing: Addressing::Node,
    },
    ServiceBinding {
        service: keepalive::SERVICE_NAME,
        methods: keepalive::METHODS,
        addressing: Addressing::Node,
    },
];

/// Check a binding table: unique service names and valid method tables.
pub fn validate_service_bindings(bindings: &[ServiceBinding]) -> RpcResult<()> {
    let mut seen = HashSet::with_capacity(bindings.len());
    for binding in bindings {
        if !seen.insert(binding.service) {
            return Err(RpcError::configuration(format!(
                "service {} is bound twice",
                binding.service
            )));
        }
        binding.descriptor(Role::Server)?;
    }
    Ok(())
}
