//! Request and response payloads of the built-in services.

use std::collections::BTreeMap;

crate::rpc_messages! {
    /// Identifies one participant in one room.
    pub struct RoomParticipantIdentity {
        /// Room name.
        pub room: String,
        /// Participant identity.
        pub identity: String,
    }

    /// Reply to a participant removal.
    pub struct RemoveParticipantResponse {}

    /// Mute or unmute one published track.
    pub struct MuteRoomTrackRequest {
        /// Room name.
        pub room: String,
        /// Participant identity.
        pub identity: String,
        /// Track identifier.
        pub track_sid: String,
        /// Whether the track is muted.
        pub muted: bool,
    }

    /// Track state after a mute request.
    pub struct MuteRoomTrackResponse {
        /// Track identifier.
        pub track_sid: String,
        /// Whether the track is muted.
        pub muted: bool,
    }

    /// Change a participant's metadata, name or attributes.
    pub struct UpdateParticipantRequest {
        /// Room name.
        pub room: String,
        /// Participant identity.
        pub identity: String,
        /// Application metadata.
        #[serde(default)]
        pub metadata: String,
        /// Display name.
        #[serde(default)]
        pub name: String,
        /// Key/value attributes.
        #[serde(default)]
        pub attributes: BTreeMap<String, String>,
    }

    /// Participant state as seen by the room.
    pub struct ParticipantInfo {
        /// Server-assigned identifier.
        pub sid: String,
        /// Participant identity.
        pub identity: String,
        /// Display name.
        pub name: String,
        /// Application metadata.
        pub metadata: String,
        /// Key/value attributes.
        pub attributes: BTreeMap<String, String>,
    }

    /// Subscribe or unsubscribe a participant from tracks.
    pub struct UpdateSubscriptionsRequest {
        /// Room name.
        pub room: String,
        /// Participant identity.
        pub identity: String,
        /// Tracks to change.
        pub track_sids: Vec<String>,
        /// Subscribe when true, unsubscribe when false.
        pub subscribe: bool,
    }

    /// Reply to a subscription update.
    pub struct UpdateSubscriptionsResponse {}

    /// Move a participant's media into another room.
    pub struct ForwardParticipantRequest {
        /// Room name.
        pub room: String,
        /// Participant identity.
        pub identity: String,
        /// Room receiving the forwarded media.
        pub destination_room: String,
    }

    /// Reply to a forward request.
    pub struct ForwardParticipantResponse {}

    /// Tear down a room.
    pub struct DeleteRoomRequest {
        /// Room name.
        pub room: String,
    }

    /// Reply to a room deletion.
    pub struct DeleteRoomResponse {}

    /// Broadcast a data packet to a room.
    pub struct SendDataRequest {
        /// Room name.
        pub room: String,
        /// Opaque payload.
        pub data: Vec<u8>,
        /// Optional application topic.
        #[serde(default)]
        pub topic: Option<String>,
        /// Recipients; empty means everyone.
        #[serde(default)]
        pub destination_identities: Vec<String>,
    }

    /// Reply to a data broadcast.
    pub struct SendDataResponse {}

    /// Replace a room's metadata.
    pub struct UpdateRoomMetadataRequest {
        /// Room name.
        pub room: String,
        /// Application metadata.
        pub metadata: String,
    }

    /// Room state.
    pub struct RoomInfo {
        /// Server-assigned identifier.
        pub sid: String,
        /// Room name.
        pub name: String,
        /// Application metadata.
        pub metadata: String,
        /// Participants currently in the room.
        pub num_participants: u32,
    }

    /// An agent dispatched into a room.
    pub struct AgentDispatch {
        /// Dispatch identifier.
        pub id: String,
        /// Agent to dispatch.
        pub agent_name: String,
        /// Room name.
        pub room: String,
        /// Application metadata.
        #[serde(default)]
        pub metadata: String,
    }

    /// Remove one dispatch from a room.
    pub struct DeleteAgentDispatchRequest {
        /// Dispatch identifier.
        pub dispatch_id: String,
        /// Room name.
        pub room: String,
    }

    /// List a room's dispatches, optionally filtered by id.
    pub struct ListAgentDispatchRequest {
        /// Room name.
        pub room: String,
        /// Dispatch identifier.
        #[serde(default)]
        pub dispatch_id: Option<String>,
    }

    /// Dispatches matching a list request.
    pub struct ListAgentDispatchResponse {
        /// Matching dispatches.
        pub agent_dispatches: Vec<AgentDispatch>,
    }

    /// Create a room on the node that receives the request.
    pub struct CreateRoomRequest {
        /// Room name.
        pub name: String,
        /// Seconds an empty room lives; 0 uses the node default.
        #[serde(default)]
        pub empty_timeout_secs: u32,
        /// Participant cap; 0 means unlimited.
        #[serde(default)]
        pub max_participants: u32,
        /// Application metadata.
        #[serde(default)]
        pub metadata: String,
    }

    /// Liveness probe published by a node.
    pub struct KeepalivePing {
        /// Node identifier.
        pub node_id: String,
        /// Send time in Unix milliseconds.
        pub timestamp_ms: u64,
    }

    /// Answer to a liveness probe.
    pub struct KeepalivePong {
        /// Node identifier.
        pub node_id: String,
        /// Send time in Unix milliseconds.
        pub timestamp_ms: u64,
    }
}
