//! Error types used throughout the networking crate.

use thiserror::Error;

/// Fatal to the connection: the codec never mutates connection state itself,
/// it only reports what went wrong so the caller can disconnect and, where
/// relevant, apply a misbehavior penalty.
#[derive(Clone, Debug, Error)]
pub enum CodecError {
    #[error("frame magic {found:#010x} does not match configured network {expected:#010x}")]
    WrongMagic { expected: u32, found: u32 },
    #[error("command field is not valid ASCII-then-NUL")]
    BadCommand,
    #[error("frame length {0} exceeds MAX_PROTOCOL_MESSAGE_LENGTH")]
    OversizedFrame(u32),
    #[error("payload checksum mismatch")]
    BadChecksum,
    #[error("zero-length payload is not permitted for command {0:?}")]
    UnexpectedEmptyPayload(String),
    #[error("non-canonical varint encoding")]
    NonCanonicalVarint,
    #[error("varint {0} exceeds MAX_SIZE")]
    VarintTooLarge(u64),
    #[error("container count {count} exceeds bound {bound} for {what}")]
    CountExceedsBound {
        what: &'static str,
        count: u64,
        bound: u64,
    },
    #[error("truncated payload while decoding {0}")]
    Truncated(&'static str),
    #[error("string exceeds max length {max}")]
    StringTooLong { max: usize },
    #[error("receive buffer exceeded {0} bytes before a full frame arrived")]
    RecvFlood(usize),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        CodecError::Io(e.to_string())
    }
}

/// Errors raised while driving a single peer connection.
#[derive(Clone, Debug, Error)]
pub enum PeerError {
    #[error("connection already started")]
    AlreadyStarted,
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("message received before VERSION handshake")]
    PreVerackMessage,
    #[error("protocol version {0} below minimum supported")]
    ObsoleteVersion(i32),
    #[error("peer nonce collides with our own (self-connection)")]
    SelfConnection,
    #[error("transport closed: {0}")]
    TransportClosed(String),
}

/// Errors surfaced by the address book.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AddrManError {
    #[error("address has port 0 or an all-zero IP")]
    InvalidAddress,
    #[error("no address available to select")]
    NoCandidates,
}

/// Resource/environment errors: logged, never fed into peer scoring.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("saved genesis hash does not match configured genesis")]
    GenesisMismatch,
}
