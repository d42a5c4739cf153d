//! Error types for facade construction, registration and calls.
//!
//! Errors fall into four families:
//! - [`RpcError::Configuration`]: bad descriptors or identifiers, fatal at construction
//! - [`RpcError::Registration`] / [`RpcError::Deregistration`]: subscribe/unsubscribe failures
//! - [`RpcError::Call`]: a [`CallError`], either retryable or terminal
//! - [`RpcError::Shutdown`]: a drain that overran its bound

use std::fmt;
use std::time::Duration;

use crate::topic::TopicKey;

/// Result type for switchboard operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors surfaced by clients, servers and the composition layer.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// A descriptor, identifier or configuration value is invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// What was wrong.
        message: String,
    },

    /// A single subscribe or unsubscribe operation failed.
    #[error("registration of {method} on {topic} failed: {reason}")]
    Registration {
        /// Method being (de)registered.
        method: String,
        /// Topic the method was being (de)registered under.
        topic: TopicKey,
        /// Substrate-provided failure reason.
        reason: String,
    },

    /// One or more deregistrations of a bulk deregister failed.
    ///
    /// Every deregistration was still attempted.
    #[error("{} deregistration(s) failed", .failures.len())]
    Deregistration {
        /// The individual failures, in declaration order.
        failures: Vec<RpcError>,
    },

    /// A call failed.
    #[error(transparent)]
    Call(#[from] CallError),

    /// Draining in-flight calls took longer than the server's bound.
    ///
    /// The server was force-closed before this was returned.
    #[error("drain of {in_flight} in-flight call(s) exceeded {bound:?}")]
    Shutdown {
        /// Calls still running when the bound expired.
        in_flight: usize,
        /// The drain bound.
        bound: Duration,
    },
}

impl RpcError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        RpcError::Configuration {
            message: message.into(),
        }
    }

    /// Create a registration error.
    pub fn registration(
        method: impl Into<String>,
        topic: TopicKey,
        reason: impl Into<String>,
    ) -> Self {
        RpcError::Registration {
            method: method.into(),
            topic,
            reason: reason.into(),
        }
    }

    /// The call error, if this is one.
    pub fn as_call(&self) -> Option<&CallError> {
        match self {
            RpcError::Call(err) => Some(err),
            _ => None,
        }
    }

    /// Whether the error belongs to the retryable class.
    pub fn is_retryable(&self) -> bool {
        self.as_call().is_some_and(CallError::is_retryable)
    }
}

/// Retry classification of a [`CallError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    /// Transport or timeout class; eligible for another attempt.
    Retryable,
    /// Handler or request failure; never retried.
    Terminal,
}

/// Application error codes a handler can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The addressed entity does not exist.
    NotFound,
    /// The request was rejected by validation.
    InvalidArgument,
    /// The entity already exists.
    AlreadyExists,
    /// The caller may not perform this operation.
    PermissionDenied,
    /// The system is not in a state that allows the operation.
    FailedPrecondition,
    /// The handler failed internally.
    Internal,
    /// The handler does not implement the operation.
    Unimplemented,
    /// Anything else.
    Unknown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::FailedPrecondition => "failed_precondition",
            ErrorCode::Internal => "internal",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Errors a single call can end with.
///
/// A call that exhausted its retries returns the last attempt's error
/// unchanged, so callers see the same shape whether one or N attempts ran.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The attempt did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// No handler could take the request.
    #[error("unavailable: {message}")]
    Unavailable {
        /// Why no handler was reachable.
        message: String,
    },

    /// The substrate failed while carrying the request or reply.
    #[error("transport error: {message}")]
    Transport {
        /// Substrate failure details.
        message: String,
    },

    /// The handler returned an application error.
    #[error("{code}: {message}")]
    Application {
        /// Error code chosen by the handler.
        code: ErrorCode,
        /// Human-readable message.
        message: String,
    },

    /// The request could not be encoded or decoded.
    #[error("malformed request: {message}")]
    MalformedRequest {
        /// Codec failure details.
        message: String,
    },

    /// The reply could not be decoded.
    #[error("malformed response: {message}")]
    MalformedResponse {
        /// Codec failure details.
        message: String,
    },

    /// The client was closed.
    #[error("client closed")]
    Closed,
}

impl CallError {
    /// Create an application error.
    pub fn application(code: ErrorCode, message: impl Into<String>) -> Self {
        CallError::Application {
            code,
            message: message.into(),
        }
    }

    /// Create an application `NotFound` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::application(ErrorCode::NotFound, message)
    }

    /// Create an application `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::application(ErrorCode::InvalidArgument, message)
    }

    /// Create an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        CallError::Unavailable {
            message: message.into(),
        }
    }

    /// Create a `Transport` error.
    pub fn transport(message: impl Into<String>) -> Self {
        CallError::Transport {
            message: message.into(),
        }
    }

    /// Retry classification of this error.
    pub fn kind(&self) -> CallErrorKind {
        match self {
            CallError::Timeout | CallError::Unavailable { .. } | CallError::Transport { .. } => {
                CallErrorKind::Retryable
            }
            CallError::Application { .. }
            | CallError::MalformedRequest { .. }
            | CallError::MalformedResponse { .. }
            | CallError::Closed => CallErrorKind::Terminal,
        }
    }

    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind() == CallErrorKind::Retryable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_kinds() {
        assert!(CallError::Timeout.is_retryable());
        assert!(CallError::unavailable("no handler").is_retryable());
        assert!(CallError::transport("broken pipe").is_retryable());
        assert_eq!(
            CallError::not_found("no such room").kind(),
            CallErrorKind::Terminal
        );
        assert!(!CallError::Closed.is_retryable());
        assert!(
            !CallError::MalformedRequest {
                message: "eof".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_rpc_error_display() {
        let err = RpcError::registration("DeleteRoom", TopicKey::single("lobby"), "denied");
        assert!(err.to_string().contains("DeleteRoom"));
        assert!(err.to_string().contains("lobby"));

        let err = RpcError::Deregistration {
            failures: vec![
                RpcError::configuration("a"),
                RpcError::configuration("b"),
            ],
        };
        assert_eq!(err.to_string(), "2 deregistration(s) failed");

        let err: RpcError = CallError::application(ErrorCode::NotFound, "gone").into();
        assert_eq!(err.to_string(), "not_found: gone");
    }

    #[test]
    fn test_rpc_error_retryable_only_for_retryable_calls() {
        assert!(RpcError::from(CallError::Timeout).is_retryable());
        assert!(!RpcError::from(CallError::Closed).is_retryable());
        assert!(!RpcError::configuration("bad").is_retryable());
    }
}
