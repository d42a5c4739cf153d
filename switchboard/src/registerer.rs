//! Bulk registration of a server's methods under one topic.
//!
//! [`RegistererSet::register_all`] applies every registration in declared
//! order and rolls back on the first failure, leaving zero registrations
//! from that call behind. Rollback is best-effort: a deregistration failing
//! during rollback is logged and skipped, and the original error is
//! returned. [`RegistererSet::deregister_all`] always attempts every
//! deregistration and aggregates the failures, so teardown makes progress
//! and can be retried.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::error::{RpcError, RpcResult};
use crate::topic::{Topic, TopicKey};

/// A (register, deregister) operation pair for one method.
#[async_trait::async_trait]
pub trait Registerer<K: Topic>: Send + Sync {
    /// Name of the method this pair (de)registers.
    fn method(&self) -> &'static str;

    /// Subscribe the method under `topic`.
    async fn register(&self, topic: &K) -> RpcResult<()>;

    /// Unsubscribe the method from `topic`.
    async fn deregister(&self, topic: &K) -> RpcResult<()>;
}

/// Ordered group of [`Registerer`]s applied as a unit.
pub struct RegistererSet<'a, K: Topic> {
    registerers: Vec<Box<dyn Registerer<K> + 'a>>,
}

impl<'a, K: Topic> Default for RegistererSet<'a, K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, K: Topic> RegistererSet<'a, K> {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            registerers: Vec::new(),
        }
    }

    /// Append a registerer.
    pub fn push(&mut self, registerer: impl Registerer<K> + 'a) {
        self.registerers.push(Box::new(registerer));
    }

    /// Number of registerers.
    pub fn len(&self) -> usize {
        self.registerers.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.registerers.is_empty()
    }

    /// Register every method under `topic`.
    ///
    /// On failure at position `k`, positions `0..k` are deregistered in
    /// reverse order before the original error is returned.
    pub async fn register_all(&self, topic: &K) -> RpcResult<()> {
        for (k, registerer) in self.registerers.iter().enumerate() {
            if let Err(err) = registerer.register(topic).await {
                let key = topic.topic_key();
                tracing::debug!(
                    method = registerer.method(),
                    topic = %key,
                    error = %err,
                    rollback = k,
                    "bulk registration failed, rolling back"
                );
                for done in self.registerers[..k].iter().rev() {
                    if let Err(rollback_err) = done.deregister(topic).await {
                        tracing::warn!(
                            method = done.method(),
                            topic = %key,
                            error = %rollback_err,
                            "rollback deregistration failed"
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Deregister every method from `topic`, attempting all of them.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Deregistration`] carrying every individual
    /// failure in declaration order.
    pub async fn deregister_all(&self, topic: &K) -> RpcResult<()> {
        let mut failures = Vec::new();
        for registerer in &self.registerers {
            if let Err(err) = registerer.deregister(topic).await {
                tracing::warn!(
                    method = registerer.method(),
                    topic = %topic.topic_key(),
                    error = %err,
                    "deregistration failed"
                );
                failures.push(err);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RpcError::Deregistration { failures })
        }
    }
}

/// Live (method, topic) subscriptions of one server instance.
#[derive(Debug, Default)]
pub struct RegistrationSet {
    entries: Mutex<HashSet<(&'static str, TopicKey)>>,
}

impl RegistrationSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pair. Returns `false` if it was already present.
    pub fn insert(&self, method: &'static str, topic: TopicKey) -> bool {
        self.entries.lock().insert((method, topic))
    }

    /// Forget a pair. Returns `false` if it was absent.
    pub fn remove(&self, method: &'static str, topic: &TopicKey) -> bool {
        self.entries.lock().remove(&(method, topic.clone()))
    }

    /// Whether a pair is recorded.
    pub fn contains(&self, method: &'static str, topic: &TopicKey) -> bool {
        self.entries.lock().contains(&(method, topic.clone()))
    }

    /// Number of recorded pairs.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no pair is recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove and return every pair.
    pub fn drain(&self) -> Vec<(&'static str, TopicKey)> {
        self.entries.lock().drain().collect()
    }
}
