//! Metrics and logging hooks invoked once per call.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::CallError;
use crate::topic::TopicKey;

/// Which side observed a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallRole {
    /// A client issuing a request, retries included.
    Client,
    /// A server handling one request.
    Server,
}

/// Metadata describing one observed call.
#[derive(Debug, Clone)]
pub struct CallInfo<'a> {
    /// Service name.
    pub service: &'static str,
    /// Method name.
    pub method: &'static str,
    /// Topic the call was addressed to.
    pub topic: &'a TopicKey,
    /// Whether the call fanned out to every handler.
    pub multi: bool,
}

/// Receives the outcome of every call.
pub trait MetricsObserver: Send + Sync {
    /// Called once per completed call with its latency and failure, if any.
    fn on_call(
        &self,
        role: CallRole,
        info: &CallInfo<'_>,
        elapsed: Duration,
        error: Option<&CallError>,
    );
}

/// Counter snapshot for one role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleMetrics {
    /// Completed calls.
    pub requests: u64,
    /// Calls that ended in an error.
    pub failures: u64,
    /// Sum of call latencies.
    pub total_latency: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    failures: AtomicU64,
    latency_micros: AtomicU64,
}

impl Counters {
    fn record(&self, elapsed: Duration, failed: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.fetch_add(micros, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RoleMetrics {
        RoleMetrics {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            total_latency: Duration::from_micros(self.latency_micros.load(Ordering::Relaxed)),
        }
    }
}

/// Lock-free counting observer.
#[derive(Debug, Default)]
pub struct CallMetrics {
    client: Counters,
    server: Counters,
}

impl CallMetrics {
    /// Create an observer with zeroed counters.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Current counters for one role.
    pub fn snapshot(&self, role: CallRole) -> RoleMetrics {
        match role {
            CallRole::Client => self.client.snapshot(),
            CallRole::Server => self.server.snapshot(),
        }
    }
}

impl MetricsObserver for CallMetrics {
    fn on_call(
        &self,
        role: CallRole,
        _info: &CallInfo<'_>,
        elapsed: Duration,
        error: Option<&CallError>,
    ) {
        let counters = match role {
            CallRole::Client => &self.client,
            CallRole::Server => &self.server,
        };
        counters.record(elapsed, error.is_some());
    }
}

/// Structured call logger.
///
/// Emits one `tracing` event per completed call: `debug` on success,
/// `warn` on failure.
#[derive(Clone)]
pub struct CallLogger {
    component: Arc<str>,
}

impl CallLogger {
    /// Create a logger tagging events with `component`.
    pub fn new(component: impl AsRef<str>) -> Self {
        Self {
            component: Arc::from(component.as_ref()),
        }
    }

    /// The component tag.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Log one completed call.
    pub fn log_call(
        &self,
        role: CallRole,
        info: &CallInfo<'_>,
        elapsed: Duration,
        error: Option<&CallError>,
    ) {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match error {
            None => tracing::debug!(
                component = %self.component,
                role = ?role,
                service = info.service,
                method = info.method,
                topic = %info.topic,
                multi = info.multi,
                elapsed_ms,
                "call completed"
            ),
            Some(error) => tracing::warn!(
                component = %self.component,
                role = ?role,
                service = info.service,
                method = info.method,
                topic = %info.topic,
                multi = info.multi,
                elapsed_ms,
                error = %error,
                "call failed"
            ),
        }
    }
}

impl fmt::Debug for CallLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallLogger")
            .field("component", &self.component)
            .finish()
    }
}
