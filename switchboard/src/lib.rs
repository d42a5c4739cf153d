//! # Switchboard
//!
//! Typed RPC facades over a generic publish/subscribe bus.
//!
//! This crate provides:
//! - **Topic addressing**: deterministic routing keys built from room,
//!   participant and node identifiers
//! - **Method registry**: frozen per-service method tables with call shapes
//! - **Bulk registration**: register every method of a server under a topic
//!   as one unit, with rollback
//! - **Call policy**: retry, per-attempt timeout, backoff, buffering and
//!   observability hooks composed from one configuration record
//! - **Facade generation**: [`rpc_service!`] emits a typed client, server
//!   and handler trait per service
//! - **Duplex composition**: a client and server owned as one handle
//!
//! The bus itself is abstracted by [`MessageBus`]; [`LocalBus`] is the
//! in-process implementation.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// =============================================================================
// Modules
// =============================================================================

/// Generic typed client.
pub mod client;

/// Payload codecs.
pub mod codec;

/// Call policy configuration record.
pub mod config;

/// Service and method descriptors.
pub mod descriptor;

/// Client plus server handles.
pub mod duplex;

/// Error types.
pub mod error;

/// In-process bus.
pub mod local;

/// Facade generation macros.
pub mod macros;

/// Call policy composition.
pub mod policy;

/// Bulk registration.
pub mod registerer;

/// Generic typed server.
pub mod server;

/// Built-in services.
pub mod services;

/// Bus contracts.
pub mod substrate;

/// Topic addressing.
pub mod topic;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use async_trait::async_trait;

pub use client::RpcClient;
pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use config::RpcConfig;
pub use descriptor::{InstanceId, MethodDescriptor, Role, ServiceDescriptor};
pub use duplex::{Closeable, Duplex};
pub use error::{CallError, CallErrorKind, ErrorCode, RpcError, RpcResult};
pub use local::{ConnectionStats, LocalBus};
pub use policy::{
    CallInfo, CallLogger, CallMetrics, CallPolicy, CallRole, ClientOption, ClientParams,
    MetricsObserver, RequestOptions, RetryOptions, RoleMetrics, ServerOption, ServerPolicy,
    client_options, server_options, with_client_observability, with_server_observability,
};
pub use registerer::{Registerer, RegistererSet, RegistrationSet};
pub use server::RpcServer;
pub use services::{
    Addressing, KeepalivePubSub, SERVICE_BINDINGS, ServiceBinding, new_keepalive_pubsub,
    validate_service_bindings,
};
pub use substrate::{
    ClientSettings, MessageBus, RawHandler, ServerSettings, TransportClient, TransportServer,
};
pub use topic::{
    DefaultTopicFormatter, NodeId, NodeTopic, ParticipantIdentity, ParticipantTopic, RoomName,
    RoomTopic, Topic, TopicFormatter, TopicKey, format_node_topic, format_participant_topic,
    format_room_topic,
};
