//! Service and method descriptors.
//!
//! A [`ServiceDescriptor`] is the immutable metadata a facade is built
//! from: the service name, a per-instance identifier, and the static table of
//! [`MethodDescriptor`]s. Both client and server ends of a service build
//! their descriptor from the same method table, so they agree on names and
//! call shapes by construction.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use rand::distr::Alphanumeric;

use crate::error::{RpcError, RpcResult};
use crate::topic::NodeId;

/// Call-shape metadata for one method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    /// Method name, unique within its service.
    pub name: &'static str,
    /// Whether the request fans out to every subscribed handler.
    pub multi_target: bool,
    /// Whether the bus should prefer the least-loaded handler.
    pub affinity_enabled: bool,
    /// Whether the caller waits for a reply.
    pub require_response: bool,
    /// Whether exactly one request maps to the reply (no streaming).
    pub single_request: bool,
}

impl MethodDescriptor {
    /// A unary method: one request, one handler, one reply.
    pub const fn unary(name: &'static str) -> Self {
        Self {
            name,
            multi_target: false,
            affinity_enabled: false,
            require_response: true,
            single_request: true,
        }
    }

    /// A multi-target method: one request, a reply from every handler.
    pub const fn multi(name: &'static str) -> Self {
        Self {
            multi_target: true,
            ..Self::unary(name)
        }
    }

    /// Enable affinity routing on this method.
    pub const fn with_affinity(self) -> Self {
        Self {
            affinity_enabled: true,
            ..self
        }
    }
}

/// Which end of a service a descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Issues requests.
    Client,
    /// Handles requests.
    Server,
}

impl Role {
    fn prefix(self) -> &'static str {
        match self {
            Role::Client => "CLI",
            Role::Server => "SRV",
        }
    }
}

/// Unique identifier of one client or server instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(String);

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

impl InstanceId {
    /// Generate a fresh identifier for the given role.
    ///
    /// Identifiers combine a process-wide sequence number with a random
    /// suffix, so they stay unique across processes sharing a bus.
    pub fn generate(role: Role) -> Self {
        let seq = NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed);
        let suffix: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        Self(format!("{}_{seq}{suffix}", role.prefix()))
    }

    /// Identifier pinned to a node, for node-addressed facades.
    ///
    /// Unlike [`InstanceId::generate`], two instances built for the same
    /// node and role share this identifier.
    pub fn for_node(role: Role, node: &NodeId) -> Self {
        Self(format!("{}_{node}", role.prefix()))
    }

    /// The identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable metadata for one client or server instance of a service.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    name: &'static str,
    instance_id: InstanceId,
    role: Role,
    methods: Vec<MethodDescriptor>,
}

impl ServiceDescriptor {
    /// Build a descriptor, validating the method table.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Configuration`] if the service name is empty, the
    /// table is empty, a method name is empty, or a name appears twice.
    pub fn new(name: &'static str, methods: &[MethodDescriptor], role: Role) -> RpcResult<Self> {
        if name.is_empty() {
            return Err(RpcError::configuration("service name must not be empty"));
        }
        if methods.is_empty() {
            return Err(RpcError::configuration(format!(
                "service {name} declares no methods"
            )));
        }
        let mut seen = HashSet::with_capacity(methods.len());
        for method in methods {
            if method.name.is_empty() {
                return Err(RpcError::configuration(format!(
                    "service {name} has a method with an empty name"
                )));
            }
            if !seen.insert(method.name) {
                return Err(RpcError::configuration(format!(
                    "service {name} declares method {} twice",
                    method.name
                )));
            }
        }
        Ok(Self {
            name,
            instance_id: InstanceId::generate(role),
            role,
            methods: methods.to_vec(),
        })
    }

    /// Replace the generated instance identifier.
    pub fn with_instance_id(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = instance_id;
        self
    }

    /// Service name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// This instance's identifier.
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// Which end this descriptor describes.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Method table in declaration order.
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Look up a method by name, failing if the service does not declare it.
    pub fn require_method(&self, name: &str) -> RpcResult<&MethodDescriptor> {
        self.method(name).ok_or_else(|| {
            RpcError::configuration(format!("service {} has no method {name}", self.name))
        })
    }
}
