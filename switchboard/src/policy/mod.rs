//! Call policy composition.
//!
//! An [`RpcConfig`] plus optional logging and metrics hooks is turned into an
//! ordered option list ([`client_options`], [`server_options`]). Options are
//! appended only when they differ from the substrate default, so an
//! all-default configuration produces an empty list. The list is then folded
//! into an immutable [`CallPolicy`] or [`ServerPolicy`] that every call on a
//! facade shares.
//!
//! ```
//! use std::time::Duration;
//! use switchboard::{client_options, CallPolicy, RpcConfig};
//!
//! assert!(client_options(&RpcConfig::default(), None, None).is_empty());
//!
//! let options = client_options(&RpcConfig::recommended(), None, None);
//! let policy = CallPolicy::from_options(&options);
//! assert_eq!(policy.retry().max_attempts, 3);
//! assert_eq!(policy.retry().backoff, Duration::from_secs(2));
//! ```

mod observer;
mod retry;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RpcConfig;
use crate::error::CallError;
use crate::substrate::{ClientSettings, MessageBus, ServerSettings};
use crate::topic::NodeId;

pub use observer::{CallInfo, CallLogger, CallMetrics, CallRole, MetricsObserver, RoleMetrics};
pub use retry::RetryOptions;

/// Default bound on draining in-flight calls during server shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// One client-side policy option.
#[derive(Clone)]
pub enum ClientOption {
    /// Reply buffer capacity.
    ChannelSize(usize),
    /// Observer invoked once per call.
    Metrics(Arc<dyn MetricsObserver>),
    /// Structured logger invoked once per call.
    Logger(CallLogger),
    /// Retry, timeout and backoff settings.
    Retries(RetryOptions),
    /// Pin the client's instance id to a node.
    ClientId(NodeId),
}

/// One server-side policy option.
#[derive(Clone)]
pub enum ServerOption {
    /// Inbound request buffer capacity.
    ChannelSize(usize),
    /// Observer invoked once per handled request.
    Metrics(Arc<dyn MetricsObserver>),
    /// Structured logger invoked once per handled request.
    Logger(CallLogger),
    /// Bound on draining in-flight requests during shutdown.
    DrainTimeout(Duration),
    /// Pin the server's instance id to a node.
    ServerId(NodeId),
}

impl fmt::Debug for ClientOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientOption::ChannelSize(size) => f.debug_tuple("ChannelSize").field(size).finish(),
            ClientOption::Metrics(_) => f.write_str("Metrics(..)"),
            ClientOption::Logger(logger) => f.debug_tuple("Logger").field(logger).finish(),
            ClientOption::Retries(retry) => f.debug_tuple("Retries").field(retry).finish(),
            ClientOption::ClientId(node) => f.debug_tuple("ClientId").field(node).finish(),
        }
    }
}

impl fmt::Debug for ServerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerOption::ChannelSize(size) => f.debug_tuple("ChannelSize").field(size).finish(),
            ServerOption::Metrics(_) => f.write_str("Metrics(..)"),
            ServerOption::Logger(logger) => f.debug_tuple("Logger").field(logger).finish(),
            ServerOption::DrainTimeout(bound) => {
                f.debug_tuple("DrainTimeout").field(bound).finish()
            }
            ServerOption::ServerId(node) => f.debug_tuple("ServerId").field(node).finish(),
        }
    }
}

/// Compose the client option list for a configuration.
///
/// Order: channel size, metrics, logger, retries. Each is present only when
/// it overrides the default.
pub fn client_options(
    config: &RpcConfig,
    logger: Option<&CallLogger>,
    observer: Option<&Arc<dyn MetricsObserver>>,
) -> Vec<ClientOption> {
    let mut options = Vec::new();
    if config.buffer_size != 0 {
        options.push(ClientOption::ChannelSize(config.buffer_size));
    }
    if let Some(observer) = observer {
        options.push(ClientOption::Metrics(Arc::clone(observer)));
    }
    if let Some(logger) = logger {
        options.push(ClientOption::Logger(logger.clone()));
    }
    if config.has_retry_policy() {
        options.push(ClientOption::Retries(RetryOptions::new(
            config.max_attempts,
            config.timeout,
            config.backoff,
        )));
    }
    options
}

/// Compose the server option list for a configuration.
///
/// Order: channel size, then the observability options.
pub fn server_options(
    config: &RpcConfig,
    logger: Option<&CallLogger>,
    observer: Option<&Arc<dyn MetricsObserver>>,
) -> Vec<ServerOption> {
    let mut options = Vec::new();
    if config.buffer_size != 0 {
        options.push(ServerOption::ChannelSize(config.buffer_size));
    }
    options.extend(with_server_observability(logger, observer));
    options
}

/// Client observability options: metrics first, then logging.
pub fn with_client_observability(
    logger: Option<&CallLogger>,
    observer: Option<&Arc<dyn MetricsObserver>>,
) -> Vec<ClientOption> {
    let mut options = Vec::new();
    if let Some(observer) = observer {
        options.push(ClientOption::Metrics(Arc::clone(observer)));
    }
    if let Some(logger) = logger {
        options.push(ClientOption::Logger(logger.clone()));
    }
    options
}

/// Server observability options: metrics first, then logging.
pub fn with_server_observability(
    logger: Option<&CallLogger>,
    observer: Option<&Arc<dyn MetricsObserver>>,
) -> Vec<ServerOption> {
    let mut options = Vec::new();
    if let Some(observer) = observer {
        options.push(ServerOption::Metrics(Arc::clone(observer)));
    }
    if let Some(logger) = logger {
        options.push(ServerOption::Logger(logger.clone()));
    }
    options
}

/// Everything a typed client constructor needs.
#[derive(Clone)]
pub struct ClientParams {
    /// Policy configuration.
    pub config: RpcConfig,
    /// Bus the client connects through.
    pub bus: Arc<dyn MessageBus>,
    /// Optional structured logger.
    pub logger: Option<CallLogger>,
    /// Optional metrics observer.
    pub observer: Option<Arc<dyn MetricsObserver>>,
    /// Node the facades built from these parameters belong to.
    pub node_id: Option<NodeId>,
}

impl ClientParams {
    /// Parameters with no logging or metrics.
    pub fn new(config: RpcConfig, bus: Arc<dyn MessageBus>) -> Self {
        Self {
            config,
            bus,
            logger: None,
            observer: None,
            node_id: None,
        }
    }

    /// Attach a logger.
    pub fn with_logger(mut self, logger: CallLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Attach a metrics observer.
    pub fn with_observer(mut self, observer: Arc<dyn MetricsObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Pin client and server instance ids to `node`.
    pub fn with_node_id(mut self, node: NodeId) -> Self {
        self.node_id = Some(node);
        self
    }

    /// The bus.
    pub fn bus(&self) -> &dyn MessageBus {
        self.bus.as_ref()
    }

    /// Client option list for these parameters.
    ///
    /// A node id, when set, is appended after the composed options.
    pub fn options(&self) -> Vec<ClientOption> {
        let mut options =
            client_options(&self.config, self.logger.as_ref(), self.observer.as_ref());
        if let Some(node) = &self.node_id {
            options.push(ClientOption::ClientId(node.clone()));
        }
        options
    }

    /// Server option list for a server sharing these parameters.
    pub fn server_options(&self) -> Vec<ServerOption> {
        let mut options =
            server_options(&self.config, self.logger.as_ref(), self.observer.as_ref());
        if let Some(node) = &self.node_id {
            options.push(ServerOption::ServerId(node.clone()));
        }
        options
    }
}

impl fmt::Debug for ClientParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientParams")
            .field("config", &self.config)
            .field("logger", &self.logger)
            .field("observer", &self.observer.is_some())
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

/// Per-call overrides of a client's policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestOptions {
    /// Replaces the per-attempt timeout.
    pub timeout: Option<Duration>,
    /// Replaces the retry settings.
    pub retries: Option<RetryOptions>,
    /// No attempt starts after this instant.
    pub deadline: Option<Instant>,
}

impl RequestOptions {
    /// Override the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the retry settings.
    pub fn with_retries(mut self, retries: RetryOptions) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Set a deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Clone, Default)]
struct Hooks {
    observer: Option<Arc<dyn MetricsObserver>>,
    logger: Option<CallLogger>,
}

impl Hooks {
    fn observe(
        &self,
        role: CallRole,
        info: &CallInfo<'_>,
        elapsed: Duration,
        error: Option<&CallError>,
    ) {
        if let Some(observer) = &self.observer {
            observer.on_call(role, info, elapsed, error);
        }
        if let Some(logger) = &self.logger {
            logger.log_call(role, info, elapsed, error);
        }
    }
}

/// Immutable client-side policy shared by every call on one client.
#[derive(Clone, Default)]
pub struct CallPolicy {
    channel_size: Option<usize>,
    retry: RetryOptions,
    hooks: Hooks,
    node_id: Option<NodeId>,
}

impl CallPolicy {
    /// Fold an option list into a policy. Later options override earlier ones.
    pub fn from_options(options: &[ClientOption]) -> Self {
        let mut policy = Self::default();
        for option in options {
            match option {
                ClientOption::ChannelSize(size) => policy.channel_size = Some(*size),
                ClientOption::Metrics(observer) => {
                    policy.hooks.observer = Some(Arc::clone(observer))
                }
                ClientOption::Logger(logger) => policy.hooks.logger = Some(logger.clone()),
                ClientOption::Retries(retry) => policy.retry = *retry,
                ClientOption::ClientId(node) => policy.node_id = Some(node.clone()),
            }
        }
        policy
    }

    /// Retry settings.
    pub fn retry(&self) -> RetryOptions {
        self.retry
    }

    /// Reply buffer capacity, if overridden.
    pub fn channel_size(&self) -> Option<usize> {
        self.channel_size
    }

    /// Node the client's instance id is pinned to, if any.
    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    /// Retry settings after applying per-call overrides.
    pub fn effective_retry(&self, request: &RequestOptions) -> RetryOptions {
        let mut retry = request.retries.unwrap_or(self.retry);
        if let Some(timeout) = request.timeout {
            retry.timeout = timeout;
        }
        retry
    }

    /// Substrate settings derived from this policy.
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            channel_size: self.channel_size,
        }
    }

    /// Report one completed call to the configured hooks.
    pub fn observe(&self, info: &CallInfo<'_>, elapsed: Duration, error: Option<&CallError>) {
        self.hooks.observe(CallRole::Client, info, elapsed, error);
    }
}

impl fmt::Debug for CallPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPolicy")
            .field("channel_size", &self.channel_size)
            .field("retry", &self.retry)
            .field("observer", &self.hooks.observer.is_some())
            .field("logger", &self.hooks.logger)
            .field("node_id", &self.node_id)
            .finish()
    }
}

/// Immutable server-side policy shared by every handler on one server.
#[derive(Clone)]
pub struct ServerPolicy {
    channel_size: Option<usize>,
    drain_timeout: Duration,
    hooks: Hooks,
    node_id: Option<NodeId>,
}

impl Default for ServerPolicy {
    fn default() -> Self {
        Self {
            channel_size: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            hooks: Hooks::default(),
            node_id: None,
        }
    }
}

impl ServerPolicy {
    /// Fold an option list into a policy. Later options override earlier ones.
    pub fn from_options(options: &[ServerOption]) -> Self {
        let mut policy = Self::default();
        for option in options {
            match option {
                ServerOption::ChannelSize(size) => policy.channel_size = Some(*size),
                ServerOption::Metrics(observer) => {
                    policy.hooks.observer = Some(Arc::clone(observer))
                }
                ServerOption::Logger(logger) => policy.hooks.logger = Some(logger.clone()),
                ServerOption::DrainTimeout(bound) => policy.drain_timeout = *bound,
                ServerOption::ServerId(node) => policy.node_id = Some(node.clone()),
            }
        }
        policy
    }

    /// Bound on draining in-flight requests.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Inbound buffer capacity, if overridden.
    pub fn channel_size(&self) -> Option<usize> {
        self.channel_size
    }

    /// Node the server's instance id is pinned to, if any.
    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    /// Substrate settings derived from this policy.
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            channel_size: self.channel_size,
        }
    }

    /// Report one handled request to the configured hooks.
    pub fn observe(&self, info: &CallInfo<'_>, elapsed: Duration, error: Option<&CallError>) {
        self.hooks.observe(CallRole::Server, info, elapsed, error);
    }
}

impl fmt::Debug for ServerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPolicy")
            .field("channel_size", &self.channel_size)
            .field("drain_timeout", &self.drain_timeout)
            .field("observer", &self.hooks.observer.is_some())
            .field("logger", &self.hooks.logger)
            .field("node_id", &self.node_id)
            .finish()
    }
}
