//! Macros generating typed service facades.
//!
//! - [`rpc_messages!`]: message structs with the derives the codec needs
//! - [`rpc_service!`]: a module holding a service's method table, handler
//!   trait, typed client and typed server, all driven by one declaration
//!
//! ```
//! use switchboard::{format_room_topic, rpc_messages, rpc_service, LocalBus, RoomName, RoomTopic};
//!
//! rpc_messages! {
//!     pub struct EchoRequest {
//!         pub text: String,
//!     }
//!
//!     pub struct EchoReply {
//!         pub text: String,
//!     }
//! }
//!
//! rpc_service! {
//!     /// Echoes text back.
//!     pub mod echo: Echo<RoomTopic> {
//!         unary Say => fn say(EchoRequest) -> EchoReply;
//!     }
//! }
//!
//! struct Parrot;
//!
//! #[switchboard::async_trait]
//! impl echo::Handler for Parrot {
//!     async fn say(&self, request: EchoRequest) -> Result<EchoReply, switchboard::CallError> {
//!         Ok(EchoReply { text: request.text })
//!     }
//! }
//!
//! fn main() {
//!     let rt = tokio::runtime::Builder::new_current_thread()
//!         .enable_all()
//!         .build()
//!         .unwrap();
//!     rt.block_on(async {
//!         let bus = LocalBus::new();
//!         let topic = format_room_topic(&RoomName::new("lobby").unwrap());
//!
//!         let server = echo::Server::new(Parrot, &bus, &[]).unwrap();
//!         server.register_all_topics(&topic).await.unwrap();
//!
//!         let client = echo::Client::new(&bus, &[]).unwrap();
//!         let reply = client.say(&topic, EchoRequest { text: "hi".into() }).await.unwrap();
//!         assert_eq!(reply.text, "hi");
//!     });
//! }
//! ```

/// Define message types with the derives payloads need.
///
/// Adds `#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]` to
/// each struct. The invoking crate must depend on `serde`.
#[macro_export]
macro_rules! rpc_messages {
    (
        $(
            $(#[$meta:meta])*
            $vis:vis struct $name:ident {
                $(
                    $(#[$field_meta:meta])*
                    $field_vis:vis $field:ident : $ty:ty
                ),* $(,)?
            }
        )*
    ) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
            $vis struct $name {
                $(
                    $(#[$field_meta])*
                    $field_vis $field : $ty,
                )*
            }
        )*
    };
}

/// Define a service and generate its typed facade.
///
/// ```text
/// rpc_service! {
///     pub mod <module>: <ServiceName><<TopicType>> {
///         <shape> <MethodName> => fn <handler_fn>(<Request>) -> <Response>;
///         ...
///     }
/// }
/// ```
///
/// `<shape>` is one of:
/// - `unary`: one handler answers
/// - `affinity`: one handler answers, the least-loaded one preferred
/// - `multi`: every handler on the topic answers
///
/// The generated module contains:
/// - `SERVICE_NAME` and `METHODS`, the frozen method table
/// - `Method`, an enum over the methods
/// - `Handler`, the async trait a server implementation provides
/// - `Client`, with one async method per service method plus `close`
/// - `Server<S: Handler>`, with `register_topic` / `deregister_topic` per
///   method, `register_all_topics` / `deregister_all_topics`, `shutdown`
///   and `kill`
///
/// Request and response types are resolved relative to the module the macro
/// is invoked in.
#[macro_export]
macro_rules! rpc_service {
    (@descriptor unary $variant:ident) => {
        $crate::MethodDescriptor::unary(stringify!($variant))
    };
    (@descriptor affinity $variant:ident) => {
        $crate::MethodDescriptor::unary(stringify!($variant)).with_affinity()
    };
    (@descriptor multi $variant:ident) => {
        $crate::MethodDescriptor::multi(stringify!($variant))
    };

    (@client unary $variant:ident $fn_name:ident ($req:ty) -> $resp:ty, $topic:ty) => {
        #[doc = concat!("Call `", stringify!($variant), "` on the handler addressed by `topic`.")]
        pub async fn $fn_name(&self, topic: &$topic, request: $req) -> $crate::RpcResult<$resp> {
            self.rpc.request_single(stringify!($variant), topic, &request).await
        }
    };
    (@client affinity $variant:ident $fn_name:ident ($req:ty) -> $resp:ty, $topic:ty) => {
        $crate::rpc_service!(@client unary $variant $fn_name ($req) -> $resp, $topic);
    };
    (@client multi $variant:ident $fn_name:ident ($req:ty) -> $resp:ty, $topic:ty) => {
        #[doc = concat!(
            "Call `", stringify!($variant), "` on every handler subscribed under `topic`."
        )]
        pub async fn $fn_name(
            &self,
            topic: &$topic,
            request: $req,
        ) -> $crate::RpcResult<::std::vec::Vec<$crate::RpcResult<$resp>>> {
            self.rpc.request_multi(stringify!($variant), topic, &request).await
        }
    };

    (
        $(#[$meta:meta])*
        $vis:vis mod $module:ident : $service:ident < $topic:ty > {
            $(
                $(#[$method_meta:meta])*
                $kind:ident $variant:ident => fn $fn_name:ident ( $req:ty ) -> $resp:ty ;
            )+
        }
    ) => {
        $(#[$meta])*
        #[allow(dead_code)]
        $vis mod $module {
            #[allow(unused_imports)]
            use super::*;

            /// Service name on the bus.
            pub const SERVICE_NAME: &str = stringify!($service);

            /// Method table, in declaration order.
            pub const METHODS: &[$crate::MethodDescriptor] = &[
                $( $crate::rpc_service!(@descriptor $kind $variant) ),+
            ];

            /// Methods of this service.
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum Method {
                $(
                    #[doc = concat!("`", stringify!($variant), "`.")]
                    $(#[$method_meta])*
                    $variant,
                )+
            }

            impl Method {
                /// Every method, in declaration order.
                pub const ALL: &'static [Method] = &[ $( Method::$variant ),+ ];

                /// Method name on the bus.
                pub fn name(self) -> &'static str {
                    match self {
                        $( Method::$variant => stringify!($variant), )+
                    }
                }
            }

            /// Server-side implementation of this service.
            #[$crate::async_trait]
            pub trait Handler: Send + Sync + 'static {
                $(
                    #[doc = concat!("Handle `", stringify!($variant), "`.")]
                    $(#[$method_meta])*
                    async fn $fn_name(
                        &self,
                        request: $req,
                    ) -> ::std::result::Result<$resp, $crate::CallError>;
                )+
            }

            /// Typed client.
            #[derive(Debug, Clone)]
            pub struct Client {
                rpc: $crate::RpcClient<$topic>,
            }

            impl Client {
                /// Open a client on `bus`.
                pub fn new(
                    bus: &dyn $crate::MessageBus,
                    options: &[$crate::ClientOption],
                ) -> $crate::RpcResult<Self> {
                    let descriptor = $crate::ServiceDescriptor::new(
                        SERVICE_NAME,
                        METHODS,
                        $crate::Role::Client,
                    )?;
                    Ok(Self {
                        rpc: $crate::RpcClient::new(descriptor, bus, options)?,
                    })
                }

                /// A handle sharing this client whose calls use `options`.
                pub fn with_request_options(&self, options: $crate::RequestOptions) -> Self {
                    Self {
                        rpc: self.rpc.with_request_options(options),
                    }
                }

                /// The underlying generic client.
                pub fn rpc(&self) -> &$crate::RpcClient<$topic> {
                    &self.rpc
                }

                $(
                    $crate::rpc_service!(@client $kind $variant $fn_name ($req) -> $resp, $topic);
                )+

                /// Close the client. Idempotent.
                pub fn close(&self) {
                    self.rpc.close();
                }
            }

            impl $crate::Closeable for Client {
                fn close(&self) {
                    Client::close(self);
                }
            }

            /// Typed server dispatching to a [`Handler`].
            pub struct Server<S: Handler> {
                rpc: $crate::RpcServer<$topic>,
                handler: ::std::sync::Arc<S>,
            }

            impl<S: Handler> Server<S> {
                /// Open a server on `bus`.
                ///
                /// No method is subscribed until a topic is registered.
                pub fn new(
                    handler: S,
                    bus: &dyn $crate::MessageBus,
                    options: &[$crate::ServerOption],
                ) -> $crate::RpcResult<Self> {
                    Self::from_arc(::std::sync::Arc::new(handler), bus, options)
                }

                /// Open a server on `bus` around a shared handler.
                pub fn from_arc(
                    handler: ::std::sync::Arc<S>,
                    bus: &dyn $crate::MessageBus,
                    options: &[$crate::ServerOption],
                ) -> $crate::RpcResult<Self> {
                    let descriptor = $crate::ServiceDescriptor::new(
                        SERVICE_NAME,
                        METHODS,
                        $crate::Role::Server,
                    )?;
                    Ok(Self {
                        rpc: $crate::RpcServer::new(descriptor, bus, options)?,
                        handler,
                    })
                }

                /// The underlying generic server.
                pub fn rpc(&self) -> &$crate::RpcServer<$topic> {
                    &self.rpc
                }

                /// The handler implementation.
                pub fn handler(&self) -> &S {
                    &self.handler
                }

                /// Subscribe one method under `topic`.
                pub fn register_topic(
                    &self,
                    method: Method,
                    topic: &$topic,
                ) -> $crate::RpcResult<()> {
                    match method {
                        $(
                            Method::$variant => {
                                let handler = ::std::sync::Arc::clone(&self.handler);
                                self.rpc.register_handler(
                                    stringify!($variant),
                                    topic,
                                    move |request: $req| {
                                        let handler = ::std::sync::Arc::clone(&handler);
                                        async move { handler.$fn_name(request).await }
                                    },
                                )
                            }
                        )+
                    }
                }

                /// Unsubscribe one method from `topic`.
                pub fn deregister_topic(
                    &self,
                    method: Method,
                    topic: &$topic,
                ) -> $crate::RpcResult<()> {
                    self.rpc.deregister_handler(method.name(), topic)
                }

                /// Subscribe every method under `topic`, rolling back on failure.
                pub async fn register_all_topics(&self, topic: &$topic) -> $crate::RpcResult<()> {
                    self.registerers().register_all(topic).await
                }

                /// Unsubscribe every method from `topic`, attempting all of them.
                pub async fn deregister_all_topics(&self, topic: &$topic) -> $crate::RpcResult<()> {
                    self.registerers().deregister_all(topic).await
                }

                fn registerers(&self) -> $crate::RegistererSet<'_, $topic> {
                    let mut set = $crate::RegistererSet::new();
                    for &method in Method::ALL {
                        set.push(MethodRegisterer { server: self, method });
                    }
                    set
                }

                /// Drain in-flight requests, then close.
                pub async fn shutdown(&self) -> $crate::RpcResult<()> {
                    self.rpc.shutdown().await
                }

                /// Close immediately, abandoning in-flight requests.
                pub fn kill(&self) {
                    self.rpc.kill();
                }
            }

            impl<S: Handler> $crate::Closeable for Server<S> {
                fn close(&self) {
                    self.kill();
                }
            }

            impl<S: Handler> ::std::fmt::Debug for Server<S> {
                fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                    f.debug_struct("Server").field("rpc", &self.rpc).finish()
                }
            }

            struct MethodRegisterer<'a, S: Handler> {
                server: &'a Server<S>,
                method: Method,
            }

            #[$crate::async_trait]
            impl<'a, S: Handler> $crate::Registerer<$topic> for MethodRegisterer<'a, S> {
                fn method(&self) -> &'static str {
                    self.method.name()
                }

                async fn register(&self, topic: &$topic) -> $crate::RpcResult<()> {
                    self.server.register_topic(self.method, topic)
                }

                async fn deregister(&self, topic: &$topic) -> $crate::RpcResult<()> {
                    self.server.deregister_topic(self.method, topic)
                }
            }
        }
    };
}
