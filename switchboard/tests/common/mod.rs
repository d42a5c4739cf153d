//! Shared support for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use switchboard::{
    ClientSettings, LocalBus, MessageBus, RawHandler, RpcError, RpcResult, ServerSettings,
    ServiceDescriptor, Topic, TopicKey, TransportClient, TransportServer,
};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct Faults {
    fail_new_server: AtomicBool,
    fail_register: Mutex<HashSet<&'static str>>,
    fail_register_on: Mutex<HashSet<(&'static str, TopicKey)>>,
    fail_deregister: Mutex<HashSet<&'static str>>,
    log: Mutex<Vec<String>>,
}

/// [`LocalBus`] wrapper that injects subscription failures.
#[derive(Clone, Default)]
pub struct FaultyBus {
    local: LocalBus,
    faults: Arc<Faults>,
}

impl FaultyBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped bus, for stats and subscription counts.
    pub fn local(&self) -> &LocalBus {
        &self.local
    }

    /// Make every following `new_server` fail.
    pub fn fail_new_server(&self) {
        self.faults.fail_new_server.store(true, Ordering::SeqCst);
    }

    /// Make subscribing `method` fail.
    pub fn fail_register(&self, method: &'static str) {
        self.faults.fail_register.lock().insert(method);
    }

    /// Make subscribing `method` under one topic fail.
    pub fn fail_register_on(&self, method: &'static str, topic: &impl Topic) {
        self.faults
            .fail_register_on
            .lock()
            .insert((method, topic.topic_key()));
    }

    /// Make unsubscribing `method` fail, leaving the subscription live.
    pub fn fail_deregister(&self, method: &'static str) {
        self.faults.fail_deregister.lock().insert(method);
    }

    /// Clear every injected subscribe and unsubscribe failure.
    pub fn heal(&self) {
        self.faults.fail_register.lock().clear();
        self.faults.fail_register_on.lock().clear();
        self.faults.fail_deregister.lock().clear();
    }

    /// Every subscribe (`+Method`) and unsubscribe (`-Method`) seen so far.
    pub fn log(&self) -> Vec<String> {
        self.faults.log.lock().clone()
    }
}

impl MessageBus for FaultyBus {
    fn new_client(
        &self,
        descriptor: &ServiceDescriptor,
        settings: &ClientSettings,
    ) -> RpcResult<Box<dyn TransportClient>> {
        self.local.new_client(descriptor, settings)
    }

    fn new_server(
        &self,
        descriptor: &ServiceDescriptor,
        settings: &ServerSettings,
    ) -> RpcResult<Box<dyn TransportServer>> {
        if self.faults.fail_new_server.load(Ordering::SeqCst) {
            return Err(RpcError::configuration("injected server failure"));
        }
        Ok(Box::new(FaultyServer {
            inner: self.local.new_server(descriptor, settings)?,
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct FaultyServer {
    inner: Box<dyn TransportServer>,
    faults: Arc<Faults>,
}

impl TransportServer for FaultyServer {
    fn register_handler(
        &self,
        method: &'static str,
        topic: &TopicKey,
        handler: RawHandler,
    ) -> RpcResult<()> {
        self.faults.log.lock().push(format!("+{method}"));
        let refused = self.faults.fail_register.lock().contains(method)
            || self
                .faults
                .fail_register_on
                .lock()
                .contains(&(method, topic.clone()));
        if refused {
            return Err(RpcError::registration(method, topic.clone(), "injected"));
        }
        self.inner.register_handler(method, topic, handler)
    }

    fn deregister_handler(&self, method: &'static str, topic: &TopicKey) -> RpcResult<()> {
        self.faults.log.lock().push(format!("-{method}"));
        if self.faults.fail_deregister.lock().contains(method) {
            return Err(RpcError::registration(method, topic.clone(), "injected"));
        }
        self.inner.deregister_handler(method, topic)
    }

    fn close(&self, force: bool) {
        self.inner.close(force);
    }
}
