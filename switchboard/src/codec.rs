//! Payload serialization between typed messages and bus bytes.
//!
//! Facades are generic over a [`MessageCodec`]; [`JsonCodec`] is the default.
//! Codec failures never cross the bus as codec errors: a request that cannot
//! be encoded or decoded becomes [`CallError::MalformedRequest`], a reply that
//! cannot be decoded becomes [`CallError::MalformedResponse`].

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::CallError;

/// Error from a codec operation.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The message could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The bytes could not be deserialized.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl CodecError {
    /// Map into the call error for the request side.
    pub fn into_request_error(self) -> CallError {
        CallError::MalformedRequest {
            message: self.to_string(),
        }
    }

    /// Map into the call error for the response side.
    pub fn into_response_error(self) -> CallError {
        CallError::MalformedResponse {
            message: self.to_string(),
        }
    }
}

/// Serialization format used for request and response payloads.
///
/// Both ends of a service must agree on the codec.
pub trait MessageCodec: Clone + Send + Sync + 'static {
    /// Serialize a message.
    fn encode<T: Serialize + ?Sized>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Deserialize a message.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON payloads via serde_json.
#[derive(Clone, Default, Debug, Copy)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct MuteTrack {
        room: String,
        track_sid: String,
        muted: bool,
    }

    #[test]
    fn test_json_wire_shape() {
        let codec = JsonCodec;
        let bytes = codec
            .encode(&MuteTrack {
                room: "lobby".to_string(),
                track_sid: "TR_1".to_string(),
                muted: true,
            })
            .expect("encode");
        assert_eq!(
            bytes,
            br#"{"room":"lobby","track_sid":"TR_1","muted":true}"#.to_vec()
        );
    }

    #[test]
    fn test_decode_failure_maps_to_call_errors() {
        let codec = JsonCodec;
        let err = codec
            .decode::<MuteTrack>(b"{\"room\":")
            .expect_err("truncated payload");
        assert!(matches!(err, CodecError::Decode(_)));
        assert!(err.to_string().starts_with("decode error"));

        let err = codec.decode::<MuteTrack>(b"[]").expect_err("wrong shape");
        assert!(matches!(
            err.into_response_error(),
            CallError::MalformedResponse { .. }
        ));
    }
}
