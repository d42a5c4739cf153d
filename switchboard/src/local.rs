//! In-process message bus.
//!
//! [`LocalBus`] routes requests between clients and servers of the same
//! process. Each delivered request runs on its own tokio task; each server
//! bounds its queued plus running requests by its channel size and rejects
//! the excess as [`CallError::Unavailable`]. Several servers may subscribe
//! the same (method, topic): single-target calls pick one of them (round
//! robin, or least loaded for affinity methods) and multi-target calls reach
//! all of them. A client that sets a channel size bounds its outstanding
//! requests the same way; without one it is unbounded.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};
use tokio::task::JoinHandle;

use crate::descriptor::{MethodDescriptor, ServiceDescriptor};
use crate::error::{CallError, RpcError, RpcResult};
use crate::substrate::{
    ClientSettings, MessageBus, RawHandler, ServerSettings, TransportClient, TransportServer,
};
use crate::topic::TopicKey;

/// Inbound capacity of a server that does not set a channel size.
pub const DEFAULT_CHANNEL_SIZE: usize = 100;

/// Open and close counts of a [`LocalBus`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Clients opened.
    pub clients_opened: usize,
    /// Clients closed.
    pub clients_closed: usize,
    /// Servers opened.
    pub servers_opened: usize,
    /// Servers closed.
    pub servers_closed: usize,
}

impl ConnectionStats {
    /// Clients and servers opened but not yet closed.
    pub fn open_connections(&self) -> usize {
        (self.clients_opened + self.servers_opened)
            .saturating_sub(self.clients_closed + self.servers_closed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    service: &'static str,
    method: &'static str,
    topic: TopicKey,
}

#[derive(Clone)]
struct Subscription {
    handler: RawHandler,
    server: Arc<ServerState>,
}

struct ServerState {
    id: u64,
    permits: Arc<Semaphore>,
    load: AtomicUsize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ServerState {
    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    fn abort_all(&self) -> usize {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        let mut aborted = 0;
        for task in tasks {
            if !task.is_finished() {
                task.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

/// Decrements a server's load when the request task ends, aborted or not.
struct LoadGuard(Arc<ServerState>);

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.0.load.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
struct Counters {
    clients_opened: AtomicUsize,
    clients_closed: AtomicUsize,
    servers_opened: AtomicUsize,
    servers_closed: AtomicUsize,
}

#[derive(Default)]
struct BusInner {
    routes: RwLock<HashMap<RouteKey, Vec<Subscription>>>,
    next_server: AtomicU64,
    round_robin: AtomicUsize,
    counters: Counters,
}

impl BusInner {
    fn subscribers(&self, key: &RouteKey) -> Vec<Subscription> {
        self.routes
            .read()
            .get(key)
            .map(|subs| {
                subs.iter()
                    .filter(|s| !s.server.closed.load(Ordering::Acquire))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn unsubscribe_server(&self, server: u64) -> usize {
        let mut routes = self.routes.write();
        let mut removed = 0;
        routes.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| s.server.id != server);
            removed += before - subs.len();
            !subs.is_empty()
        });
        removed
    }
}

/// In-process [`MessageBus`].
///
/// Cloning yields another handle onto the same bus.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<BusInner>,
}

impl LocalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open and close counts so far.
    pub fn stats(&self) -> ConnectionStats {
        let c = &self.inner.counters;
        ConnectionStats {
            clients_opened: c.clients_opened.load(Ordering::Acquire),
            clients_closed: c.clients_closed.load(Ordering::Acquire),
            servers_opened: c.servers_opened.load(Ordering::Acquire),
            servers_closed: c.servers_closed.load(Ordering::Acquire),
        }
    }

    /// Number of live (service, method, topic, server) subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.routes.read().values().map(Vec::len).sum()
    }
}

impl MessageBus for LocalBus {
    fn new_client(
        &self,
        descriptor: &ServiceDescriptor,
        settings: &ClientSettings,
    ) -> RpcResult<Box<dyn TransportClient>> {
        let replies = settings
            .channel_size
            .filter(|&size| size > 0)
            .map(|size| Arc::new(Semaphore::new(size)));
        self.inner
            .counters
            .clients_opened
            .fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(LocalClient {
            bus: Arc::clone(&self.inner),
            service: descriptor.name(),
            methods: descriptor.methods().to_vec(),
            replies,
            closed: AtomicBool::new(false),
        }))
    }

    fn new_server(
        &self,
        descriptor: &ServiceDescriptor,
        settings: &ServerSettings,
    ) -> RpcResult<Box<dyn TransportServer>> {
        let capacity = settings
            .channel_size
            .filter(|&size| size > 0)
            .unwrap_or(DEFAULT_CHANNEL_SIZE);
        let id = self.inner.next_server.fetch_add(1, Ordering::AcqRel);
        self.inner
            .counters
            .servers_opened
            .fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(LocalServer {
            bus: Arc::clone(&self.inner),
            service: descriptor.name(),
            state: Arc::new(ServerState {
                id,
                permits: Arc::new(Semaphore::new(capacity)),
                load: AtomicUsize::new(0),
                tasks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }))
    }
}

struct LocalClient {
    bus: Arc<BusInner>,
    service: &'static str,
    methods: Vec<MethodDescriptor>,
    replies: Option<Arc<Semaphore>>,
    closed: AtomicBool,
}

impl LocalClient {
    fn route(&self, method: &'static str, topic: &TopicKey) -> Result<RouteKey, CallError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CallError::Closed);
        }
        Ok(RouteKey {
            service: self.service,
            method,
            topic: topic.clone(),
        })
    }

    /// Reserve a reply slot for one outstanding request.
    fn reserve(&self) -> Result<Option<OwnedSemaphorePermit>, CallError> {
        self.replies
            .as_ref()
            .map(|replies| {
                Arc::clone(replies)
                    .try_acquire_owned()
                    .map_err(|_| CallError::unavailable("client reply buffer is full"))
            })
            .transpose()
    }

    fn no_handler(key: &RouteKey) -> CallError {
        CallError::unavailable(format!(
            "no handler for {}.{} on {}",
            key.service, key.method, key.topic
        ))
    }

    fn affinity(&self, method: &str) -> bool {
        self.methods
            .iter()
            .any(|m| m.name == method && m.affinity_enabled)
    }
}

async fn deliver(sub: Subscription, payload: Vec<u8>) -> Result<Vec<u8>, CallError> {
    let permit = Arc::clone(&sub.server.permits)
        .try_acquire_owned()
        .map_err(|_| CallError::unavailable("server inbound buffer is full"))?;
    sub.server.load.fetch_add(1, Ordering::AcqRel);
    let load = LoadGuard(Arc::clone(&sub.server));

    let (reply_tx, reply_rx) = oneshot::channel();
    let handling = (sub.handler)(payload);
    let task = tokio::spawn(async move {
        let _permit = permit;
        let _load = load;
        let _ = reply_tx.send(handling.await);
    });
    sub.server.track(task);

    reply_rx
        .await
        .unwrap_or_else(|_| Err(CallError::transport("handler abandoned the request")))
}

#[async_trait::async_trait]
impl TransportClient for LocalClient {
    async fn request(
        &self,
        method: &'static str,
        topic: &TopicKey,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, CallError> {
        let key = self.route(method, topic)?;
        let _slot = self.reserve()?;
        let subs = self.bus.subscribers(&key);
        let chosen = if self.affinity(method) {
            subs.into_iter()
                .min_by_key(|s| s.server.load.load(Ordering::Acquire))
        } else if subs.is_empty() {
            None
        } else {
            let n = self.bus.round_robin.fetch_add(1, Ordering::Relaxed);
            let index = n % subs.len();
            subs.into_iter().nth(index)
        };
        let sub = chosen.ok_or_else(|| Self::no_handler(&key))?;
        tracing::trace!(
            service = key.service,
            method,
            topic = %key.topic,
            server = sub.server.id,
            "delivering request"
        );
        deliver(sub, payload).await
    }

    async fn request_multi(
        &self,
        method: &'static str,
        topic: &TopicKey,
        payload: Vec<u8>,
    ) -> Result<Vec<Result<Vec<u8>, CallError>>, CallError> {
        let key = self.route(method, topic)?;
        let _slot = self.reserve()?;
        let subs = self.bus.subscribers(&key);
        if subs.is_empty() {
            return Err(Self::no_handler(&key));
        }
        tracing::trace!(
            service = key.service,
            method,
            topic = %key.topic,
            targets = subs.len(),
            "fanning out request"
        );
        Ok(join_all(subs.into_iter().map(|sub| deliver(sub, payload.clone()))).await)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.bus
                .counters
                .clients_closed
                .fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Drop for LocalClient {
    fn drop(&mut self) {
        TransportClient::close(self);
    }
}

struct LocalServer {
    bus: Arc<BusInner>,
    service: &'static str,
    state: Arc<ServerState>,
}

impl TransportServer for LocalServer {
    fn register_handler(
        &self,
        method: &'static str,
        topic: &TopicKey,
        handler: RawHandler,
    ) -> RpcResult<()> {
        if self.state.closed.load(Ordering::Acquire) {
            return Err(RpcError::registration(method, topic.clone(), "server is closed"));
        }
        let key = RouteKey {
            service: self.service,
            method,
            topic: topic.clone(),
        };
        let mut routes = self.bus.routes.write();
        let subs = routes.entry(key).or_default();
        if subs.iter().any(|s| s.server.id == self.state.id) {
            return Err(RpcError::registration(
                method,
                topic.clone(),
                "already subscribed",
            ));
        }
        subs.push(Subscription {
            handler,
            server: Arc::clone(&self.state),
        });
        Ok(())
    }

    fn deregister_handler(&self, method: &'static str, topic: &TopicKey) -> RpcResult<()> {
        let key = RouteKey {
            service: self.service,
            method,
            topic: topic.clone(),
        };
        let mut routes = self.bus.routes.write();
        if let Some(subs) = routes.get_mut(&key) {
            subs.retain(|s| s.server.id != self.state.id);
            if subs.is_empty() {
                routes.remove(&key);
            }
        }
        Ok(())
    }

    fn close(&self, force: bool) {
        if !self.state.closed.swap(true, Ordering::AcqRel) {
            let removed = self.bus.unsubscribe_server(self.state.id);
            self.bus
                .counters
                .servers_closed
                .fetch_add(1, Ordering::AcqRel);
            tracing::debug!(
                service = self.service,
                server = self.state.id,
                subscriptions = removed,
                "local server closed"
            );
        }
        if force {
            let aborted = self.state.abort_all();
            if aborted > 0 {
                tracing::debug!(
                    service = self.service,
                    server = self.state.id,
                    aborted,
                    "aborted in-flight requests"
                );
            }
        }
    }
}

impl Drop for LocalServer {
    fn drop(&mut self) {
        TransportServer::close(self, false);
    }
}
