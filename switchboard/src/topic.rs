//! Topic addressing: deterministic routing keys derived from domain identifiers.
//!
//! Client and server derive the same [`TopicKey`] independently, so there is no
//! directory lookup on the call path. Formatting is a pure function of its
//! inputs and never fails: the identifier newtypes ([`RoomName`],
//! [`ParticipantIdentity`], [`NodeId`]) are validated when constructed.
//!
//! # Participant topics
//!
//! A participant topic joins the room name and the identity with `_`. Each
//! identifier is escaped first (`%` becomes `%25`, `_` becomes `%5F`), so
//! the joined string contains exactly one raw `_` and the mapping is
//! injective. Identifiers without `%` or `_` keep their plain
//! `room_identity` form.
//!
//! ```
//! use switchboard::{format_participant_topic, ParticipantIdentity, RoomName};
//!
//! let room = RoomName::new("lobby").unwrap();
//! let alice = ParticipantIdentity::new("alice").unwrap();
//! assert_eq!(format_participant_topic(&room, &alice).as_str(), "lobby_alice");
//!
//! let odd = ParticipantIdentity::new("a_b").unwrap();
//! assert_eq!(format_participant_topic(&room, &odd).as_str(), "lobby_a%5Fb");
//! ```

use std::fmt;

use crate::error::{RpcError, RpcResult};

/// Routing address reaching one handler instance.
///
/// An ordered list of segments; two keys route to the same place exactly
/// when their segment lists are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TopicKey(Vec<String>);

impl TopicKey {
    /// Create a key from its segments.
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Create a single-segment key.
    pub fn single(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    /// The key's segments in order.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether the key has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// A domain key that resolves to a [`TopicKey`].
///
/// Each service is bound to one implementor, which keeps callers from
/// addressing a room-keyed service with a participant key.
pub trait Topic: Clone + Send + Sync + 'static {
    /// The routing key for this value.
    fn topic_key(&self) -> TopicKey;
}

impl Topic for TopicKey {
    fn topic_key(&self) -> TopicKey {
        self.clone()
    }
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Create a ", $what, ", rejecting empty input.")]
            pub fn new(value: impl Into<String>) -> RpcResult<Self> {
                let value = value.into();
                if value.is_empty() {
                    return Err(RpcError::configuration(concat!($what, " must not be empty")));
                }
                Ok(Self(value))
            }

            /// The raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(
    /// Name of a room.
    RoomName,
    "room name"
);
identifier!(
    /// Identity of a participant within a room.
    ParticipantIdentity,
    "participant identity"
);
identifier!(
    /// Identifier of a node process.
    NodeId,
    "node id"
);

macro_rules! topic_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            /// The formatted topic string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Topic for $name {
            fn topic_key(&self) -> TopicKey {
                TopicKey::single(self.0.clone())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

topic_type!(
    /// Topic addressing one participant session.
    ParticipantTopic
);
topic_type!(
    /// Topic addressing a whole room.
    RoomTopic
);
topic_type!(
    /// Topic addressing a node process.
    NodeTopic
);

const JOIN: char = '_';

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            c => out.push(c),
        }
    }
    out
}

fn unescape(escaped: &str) -> String {
    escaped.replace("%5F", "_").replace("%25", "%")
}

impl ParticipantTopic {
    /// Decode the raw room name and identity this topic was formatted from.
    ///
    /// Returns `None` for strings that no formatter produces.
    pub fn parts(&self) -> Option<(String, String)> {
        let (room, identity) = self.0.split_once(JOIN)?;
        if identity.contains(JOIN) {
            return None;
        }
        Some((unescape(room), unescape(identity)))
    }
}

/// Format the topic addressing one participant session.
pub fn format_participant_topic(
    room: &RoomName,
    identity: &ParticipantIdentity,
) -> ParticipantTopic {
    let mut topic = escape(room.as_str());
    topic.push(JOIN);
    topic.push_str(&escape(identity.as_str()));
    ParticipantTopic(topic)
}

/// Format the topic addressing a room.
pub fn format_room_topic(room: &RoomName) -> RoomTopic {
    RoomTopic(room.as_str().to_string())
}

/// Format the topic addressing a node.
pub fn format_node_topic(node: &NodeId) -> NodeTopic {
    NodeTopic(node.as_str().to_string())
}

/// Source of participant and room topics.
///
/// Callers that address sessions hold one of these rather than calling the
/// free functions, so a deployment can change addressing in one place.
pub trait TopicFormatter: Send + Sync {
    /// Topic for a participant session.
    fn participant_topic(&self, room: &RoomName, identity: &ParticipantIdentity)
    -> ParticipantTopic;

    /// Topic for a room.
    fn room_topic(&self, room: &RoomName) -> RoomTopic;
}

/// [`TopicFormatter`] backed by [`format_participant_topic`] and [`format_room_topic`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTopicFormatter;

impl TopicFormatter for DefaultTopicFormatter {
    fn participant_topic(
        &self,
        room: &RoomName,
        identity: &ParticipantIdentity,
    ) -> ParticipantTopic {
        format_participant_topic(room, identity)
    }

    fn room_topic(&self, room: &RoomName) -> RoomTopic {
        format_room_topic(room)
    }
}
