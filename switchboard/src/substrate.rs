//! The publish/subscribe substrate facades are built on.
//!
//! A [`MessageBus`] hands out per-service [`TransportClient`]s and
//! [`TransportServer`]s. Everything above this seam deals in typed messages;
//! everything below it deals in bytes, method names and [`TopicKey`]s.
//! [`LocalBus`](crate::LocalBus) is the in-process implementation.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::descriptor::ServiceDescriptor;
use crate::error::{CallError, RpcResult};
use crate::topic::TopicKey;

/// Byte-level request handler installed on a server subscription.
pub type RawHandler =
    Arc<dyn Fn(Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, CallError>> + Send + Sync>;

/// Substrate settings for a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientSettings {
    /// Reply buffer size; `None` uses the substrate default.
    pub channel_size: Option<usize>,
}

/// Substrate settings for a server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSettings {
    /// Request buffer size; `None` uses the substrate default.
    pub channel_size: Option<usize>,
}

/// Factory for service transports.
pub trait MessageBus: Send + Sync + 'static {
    /// Open the client side of a service.
    fn new_client(
        &self,
        descriptor: &ServiceDescriptor,
        settings: &ClientSettings,
    ) -> RpcResult<Box<dyn TransportClient>>;

    /// Open the server side of a service.
    fn new_server(
        &self,
        descriptor: &ServiceDescriptor,
        settings: &ServerSettings,
    ) -> RpcResult<Box<dyn TransportServer>>;
}

/// Byte-level request path of one client.
#[async_trait::async_trait]
pub trait TransportClient: Send + Sync {
    /// Send one request to one handler and wait for its reply.
    async fn request(
        &self,
        method: &'static str,
        topic: &TopicKey,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, CallError>;

    /// Send one request to every handler subscribed on the topic.
    ///
    /// The outer error covers failures before any handler was reached; the
    /// inner results are the per-handler outcomes.
    async fn request_multi(
        &self,
        method: &'static str,
        topic: &TopicKey,
        payload: Vec<u8>,
    ) -> Result<Vec<Result<Vec<u8>, CallError>>, CallError>;

    /// Release the client's resources. Idempotent.
    fn close(&self);
}

/// Byte-level subscription management of one server.
pub trait TransportServer: Send + Sync {
    /// Subscribe `handler` for `method` under `topic`.
    fn register_handler(
        &self,
        method: &'static str,
        topic: &TopicKey,
        handler: RawHandler,
    ) -> RpcResult<()>;

    /// Remove the subscription for `method` under `topic`.
    fn deregister_handler(&self, method: &'static str, topic: &TopicKey) -> RpcResult<()>;

    /// Stop accepting requests and drop every subscription.
    ///
    /// With `force`, requests already being handled are aborted as well.
    fn close(&self, force: bool);
}
