//! Generic typed server every facade server wraps.
//!
//! A server owns the [`RegistrationSet`] of its live subscriptions and
//! tracks requests in flight, so [`RpcServer::shutdown`] can drain them
//! before returning while [`RpcServer::kill`] abandons them.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::codec::{CodecError, JsonCodec, MessageCodec};
use crate::descriptor::{InstanceId, Role, ServiceDescriptor};
use crate::error::{CallError, RpcError, RpcResult};
use crate::policy::{CallInfo, ServerOption, ServerPolicy};
use crate::registerer::RegistrationSet;
use crate::substrate::{MessageBus, RawHandler, TransportServer};
use crate::topic::{Topic, TopicKey};

/// State shared between the server and its installed handlers.
struct HandlerContext<C> {
    service: &'static str,
    policy: ServerPolicy,
    codec: C,
    in_flight: watch::Sender<usize>,
}

/// Counts one request as in flight until dropped.
struct InFlightGuard<C>(Arc<HandlerContext<C>>);

impl<C> InFlightGuard<C> {
    fn new(ctx: Arc<HandlerContext<C>>) -> Self {
        ctx.in_flight.send_modify(|n| *n += 1);
        Self(ctx)
    }
}

impl<C> Drop for InFlightGuard<C> {
    fn drop(&mut self) {
        self.0.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

struct ServerInner<C> {
    descriptor: ServiceDescriptor,
    transport: Box<dyn TransportServer>,
    registrations: RegistrationSet,
    ctx: Arc<HandlerContext<C>>,
    closed: AtomicBool,
}

impl<C> Drop for ServerInner<C> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.registrations.drain();
            self.transport.close(true);
        }
    }
}

/// Server for one service, addressed by topic type `K`.
pub struct RpcServer<K: Topic, C: MessageCodec = JsonCodec> {
    inner: Arc<ServerInner<C>>,
    _topic: PhantomData<fn(K)>,
}

impl<K: Topic> RpcServer<K, JsonCodec> {
    /// Open a JSON server for `descriptor` on `bus`.
    pub fn new(
        descriptor: ServiceDescriptor,
        bus: &dyn MessageBus,
        options: &[ServerOption],
    ) -> RpcResult<Self> {
        Self::with_codec(descriptor, bus, options, JsonCodec)
    }
}

impl<K: Topic, C: MessageCodec> RpcServer<K, C> {
    /// Open a server with an explicit codec.
    pub fn with_codec(
        descriptor: ServiceDescriptor,
        bus: &dyn MessageBus,
        options: &[ServerOption],
        codec: C,
    ) -> RpcResult<Self> {
        let policy = ServerPolicy::from_options(options);
        let descriptor = match policy.node_id() {
            Some(node) => descriptor.with_instance_id(InstanceId::for_node(Role::Server, node)),
            None => descriptor,
        };
        let transport = bus.new_server(&descriptor, &policy.server_settings())?;
        tracing::debug!(
            service = descriptor.name(),
            instance = %descriptor.instance_id(),
            "server opened"
        );
        let (in_flight, _) = watch::channel(0usize);
        Ok(Self {
            inner: Arc::new(ServerInner {
                ctx: Arc::new(HandlerContext {
                    service: descriptor.name(),
                    policy,
                    codec,
                    in_flight,
                }),
                descriptor,
                transport,
                registrations: RegistrationSet::new(),
                closed: AtomicBool::new(false),
            }),
            _topic: PhantomData,
        })
    }

    /// The service descriptor.
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.inner.descriptor
    }

    /// The composed server policy.
    pub fn policy(&self) -> &ServerPolicy {
        &self.inner.ctx.policy
    }

    /// Number of live (method, topic) subscriptions.
    pub fn registration_count(&self) -> usize {
        self.inner.registrations.len()
    }

    /// Whether `method` is subscribed under `topic`.
    pub fn is_registered(&self, method: &'static str, topic: &K) -> bool {
        self.inner.registrations.contains(method, &topic.topic_key())
    }

    /// Requests currently being handled.
    pub fn in_flight(&self) -> usize {
        *self.inner.ctx.in_flight.borrow()
    }

    /// Whether the server was shut down or killed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Subscribe `handler` for `method` under `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Configuration`] if the service does not declare
    /// `method`, and [`RpcError::Registration`] if the pair is already
    /// registered, the server is closed, or the substrate refuses.
    pub fn register_handler<Req, Resp, F, Fut>(
        &self,
        method: &'static str,
        topic: &K,
        handler: F,
    ) -> RpcResult<()>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, CallError>> + Send + 'static,
    {
        let descriptor = *self.inner.descriptor.require_method(method)?;
        let key = topic.topic_key();
        if self.is_closed() {
            return Err(RpcError::registration(method, key, "server is closed"));
        }
        if !self.inner.registrations.insert(method, key.clone()) {
            return Err(RpcError::registration(method, key, "already registered"));
        }

        let raw = wrap_handler(
            Arc::clone(&self.inner.ctx),
            method,
            descriptor.multi_target,
            key.clone(),
            handler,
        );
        if let Err(err) = self.inner.transport.register_handler(method, &key, raw) {
            self.inner.registrations.remove(method, &key);
            return Err(err);
        }
        tracing::debug!(
            service = self.inner.descriptor.name(),
            method,
            topic = %key,
            "handler registered"
        );
        Ok(())
    }

    /// Remove the subscription for `method` under `topic`.
    ///
    /// Removing a pair that is not registered succeeds without touching
    /// the substrate. The pair stays recorded until the substrate confirms
    /// the unsubscribe, so a failed call can be retried.
    pub fn deregister_handler(&self, method: &'static str, topic: &K) -> RpcResult<()> {
        let key = topic.topic_key();
        if !self.inner.registrations.contains(method, &key) {
            return Ok(());
        }
        self.inner.transport.deregister_handler(method, &key)?;
        self.inner.registrations.remove(method, &key);
        tracing::debug!(
            service = self.inner.descriptor.name(),
            method,
            topic = %key,
            "handler deregistered"
        );
        Ok(())
    }

    /// Stop accepting requests, wait for in-flight ones, then close.
    ///
    /// Waiting is bounded by the policy's drain timeout. On overrun the
    /// server is force-closed and [`RpcError::Shutdown`] is returned.
    /// Calling this on a server that is already closing (or was killed)
    /// still waits for the remaining requests under the same bound.
    pub async fn shutdown(&self) -> RpcResult<()> {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.registrations.drain();
            self.inner.transport.close(false);
        }

        let bound = self.inner.ctx.policy.drain_timeout();
        let mut in_flight = self.inner.ctx.in_flight.subscribe();
        let drained = matches!(
            tokio::time::timeout(bound, in_flight.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        );
        if drained {
            tracing::debug!(service = self.inner.descriptor.name(), "server drained");
            return Ok(());
        }

        let remaining = *in_flight.borrow();
        tracing::warn!(
            service = self.inner.descriptor.name(),
            in_flight = remaining,
            bound_ms = u64::try_from(bound.as_millis()).unwrap_or(u64::MAX),
            "drain exceeded bound, force closing"
        );
        self.inner.transport.close(true);
        Err(RpcError::Shutdown {
            in_flight: remaining,
            bound,
        })
    }

    /// Close immediately, abandoning in-flight requests.
    pub fn kill(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.registrations.drain();
        self.inner.transport.close(true);
        tracing::debug!(
            service = self.inner.descriptor.name(),
            abandoned = self.in_flight(),
            "server killed"
        );
    }
}

fn wrap_handler<C, Req, Resp, F, Fut>(
    ctx: Arc<HandlerContext<C>>,
    method: &'static str,
    multi: bool,
    topic: TopicKey,
    handler: F,
) -> RawHandler
where
    C: MessageCodec,
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, CallError>> + Send + 'static,
{
    let handler = Arc::new(handler);
    let topic = Arc::new(topic);
    Arc::new(move |payload: Vec<u8>| {
        let guard = InFlightGuard::new(Arc::clone(&ctx));
        let handler = Arc::clone(&handler);
        let topic = Arc::clone(&topic);
        async move {
            let ctx = &guard.0;
            let started = Instant::now();
            let result = match ctx.codec.decode::<Req>(&payload) {
                Ok(request) => handler(request).await.and_then(|response| {
                    ctx.codec
                        .encode(&response)
                        .map_err(CodecError::into_response_error)
                }),
                Err(err) => Err(err.into_request_error()),
            };
            let info = CallInfo {
                service: ctx.service,
                method,
                topic: &topic,
                multi,
            };
            ctx.policy
                .observe(&info, started.elapsed(), result.as_ref().err());
            drop(guard);
            result
        }
        .boxed()
    })
}

impl<K: Topic, C: MessageCodec> fmt::Debug for RpcServer<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcServer")
            .field("service", &self.inner.descriptor.name())
            .field("instance", &self.inner.descriptor.instance_id())
            .field("registrations", &self.registration_count())
            .field("in_flight", &self.in_flight())
            .field("closed", &self.is_closed())
            .finish()
    }
}
