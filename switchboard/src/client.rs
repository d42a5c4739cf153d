//! Generic typed client every facade client wraps.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::codec::{CodecError, JsonCodec, MessageCodec};
use crate::descriptor::{InstanceId, Role, ServiceDescriptor};
use crate::error::{CallError, RpcError, RpcResult};
use crate::policy::{CallInfo, CallPolicy, ClientOption, RequestOptions};
use crate::substrate::{MessageBus, TransportClient};
use crate::topic::Topic;

struct ClientInner<C> {
    descriptor: ServiceDescriptor,
    transport: Box<dyn TransportClient>,
    policy: CallPolicy,
    codec: C,
    closed: AtomicBool,
}

impl<C> ClientInner<C> {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.transport.close();
            tracing::debug!(
                service = self.descriptor.name(),
                instance = %self.descriptor.instance_id(),
                "client closed"
            );
        }
    }
}

impl<C> Drop for ClientInner<C> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Client for one service, addressed by topic type `K`.
///
/// Clones share the underlying transport; closing any clone closes them all.
/// The transport is also closed when the last clone is dropped.
pub struct RpcClient<K: Topic, C: MessageCodec = JsonCodec> {
    inner: Arc<ClientInner<C>>,
    request: RequestOptions,
    _topic: PhantomData<fn(K)>,
}

impl<K: Topic> RpcClient<K, JsonCodec> {
    /// Open a JSON client for `descriptor` on `bus`.
    pub fn new(
        descriptor: ServiceDescriptor,
        bus: &dyn MessageBus,
        options: &[ClientOption],
    ) -> RpcResult<Self> {
        Self::with_codec(descriptor, bus, options, JsonCodec)
    }
}

impl<K: Topic, C: MessageCodec> RpcClient<K, C> {
    /// Open a client with an explicit codec.
    pub fn with_codec(
        descriptor: ServiceDescriptor,
        bus: &dyn MessageBus,
        options: &[ClientOption],
        codec: C,
    ) -> RpcResult<Self> {
        let policy = CallPolicy::from_options(options);
        let descriptor = match policy.node_id() {
            Some(node) => descriptor.with_instance_id(InstanceId::for_node(Role::Client, node)),
            None => descriptor,
        };
        let transport = bus.new_client(&descriptor, &policy.client_settings())?;
        tracing::debug!(
            service = descriptor.name(),
            instance = %descriptor.instance_id(),
            options = options.len(),
            "client opened"
        );
        Ok(Self {
            inner: Arc::new(ClientInner {
                descriptor,
                transport,
                policy,
                codec,
                closed: AtomicBool::new(false),
            }),
            request: RequestOptions::default(),
            _topic: PhantomData,
        })
    }

    /// The service descriptor.
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.inner.descriptor
    }

    /// The composed call policy.
    pub fn policy(&self) -> &CallPolicy {
        &self.inner.policy
    }

    /// A handle sharing this client whose calls use `options`.
    pub fn with_request_options(&self, options: RequestOptions) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            request: options,
            _topic: PhantomData,
        }
    }

    /// Whether the client was closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close the client. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    fn check_method(&self, method: &'static str, multi: bool) -> RpcResult<()> {
        let descriptor = self.inner.descriptor.require_method(method)?;
        if descriptor.multi_target != multi {
            return Err(RpcError::configuration(format!(
                "method {method} of {} is {}",
                self.inner.descriptor.name(),
                if descriptor.multi_target {
                    "multi-target"
                } else {
                    "single-target"
                }
            )));
        }
        if self.is_closed() {
            return Err(CallError::Closed.into());
        }
        Ok(())
    }

    /// Call a single-target method and wait for its reply.
    ///
    /// Retries, timeouts and hooks follow the client's policy and any
    /// request overrides.
    pub async fn request_single<Req, Resp>(
        &self,
        method: &'static str,
        topic: &K,
        request: &Req,
    ) -> RpcResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.check_method(method, false)?;
        let payload = self
            .inner
            .codec
            .encode(request)
            .map_err(CodecError::into_request_error)?;
        let key = topic.topic_key();
        let retry = self.inner.policy.effective_retry(&self.request);
        let transport = &self.inner.transport;
        let key_ref = &key;

        let started = Instant::now();
        let result = retry
            .run(method, self.request.deadline, move |_| {
                transport.request(method, key_ref, payload.clone())
            })
            .await
            .and_then(|bytes| {
                self.inner
                    .codec
                    .decode::<Resp>(&bytes)
                    .map_err(CodecError::into_response_error)
            });

        let info = CallInfo {
            service: self.inner.descriptor.name(),
            method,
            topic: &key,
            multi: false,
        };
        self.inner
            .policy
            .observe(&info, started.elapsed(), result.as_ref().err());
        result.map_err(RpcError::from)
    }

    /// Call a multi-target method and collect every handler's reply.
    ///
    /// The outer error covers the request as a whole; each element carries
    /// one handler's outcome.
    pub async fn request_multi<Req, Resp>(
        &self,
        method: &'static str,
        topic: &K,
        request: &Req,
    ) -> RpcResult<Vec<RpcResult<Resp>>>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.check_method(method, true)?;
        let payload = self
            .inner
            .codec
            .encode(request)
            .map_err(CodecError::into_request_error)?;
        let key = topic.topic_key();
        let retry = self.inner.policy.effective_retry(&self.request);
        let transport = &self.inner.transport;
        let key_ref = &key;

        let started = Instant::now();
        let result = retry
            .run(method, self.request.deadline, move |_| {
                transport.request_multi(method, key_ref, payload.clone())
            })
            .await;

        let info = CallInfo {
            service: self.inner.descriptor.name(),
            method,
            topic: &key,
            multi: true,
        };
        self.inner
            .policy
            .observe(&info, started.elapsed(), result.as_ref().err());

        let replies = result?
            .into_iter()
            .map(|reply| {
                reply
                    .and_then(|bytes| {
                        self.inner
                            .codec
                            .decode::<Resp>(&bytes)
                            .map_err(CodecError::into_response_error)
                    })
                    .map_err(RpcError::from)
            })
            .collect();
        Ok(replies)
    }
}

impl<K: Topic, C: MessageCodec> Clone for RpcClient<K, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            request: self.request,
            _topic: PhantomData,
        }
    }
}

impl<K: Topic, C: MessageCodec> fmt::Debug for RpcClient<K, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("service", &self.inner.descriptor.name())
            .field("instance", &self.inner.descriptor.instance_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
