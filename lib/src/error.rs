use thiserror::Error;

/// Local failures to understand a ring parameter, an address or a message
/// line. These never mean that a peer is down.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("ring width must be between 1 and 160 bits, got {0}")]
    RingWidth(u32),

    #[error("empty message")]
    Empty,

    #[error("unknown message kind: {0}")]
    UnknownKind(String),

    #[error("{kind} expects {expected} argument(s), got {got}")]
    Arity {
        kind: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("malformed identifier: {0:?}")]
    MalformedIdentifier(String),

    #[error("malformed address: {0:?}")]
    MalformedAddress(String),

    #[error("invalid value token: {0:?}")]
    InvalidValue(String),

    #[error("identifier {0} is outside the ring")]
    IdentifierOutOfRange(String),

    #[error("unexpected response to {kind}: {line:?}")]
    UnexpectedResponse { kind: &'static str, line: String },
}
