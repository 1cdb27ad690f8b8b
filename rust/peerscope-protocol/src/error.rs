use thiserror::Error;

/// Errors raised while converting between [`crate::Value`]s, domain
/// identifiers and Rust types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A value did not have the kind the caller asked for.
    #[error("Expected {expected} value, got {actual}")]
    UnexpectedKind {
        /// The kind that was expected
        expected: &'static str,
        /// The kind that was found
        actual: &'static str,
    },

    /// An extension value carried a tag that no codec is registered for.
    #[error("Unknown value extension: {0}")]
    UnknownExtension(String),

    /// A textual or binary identifier failed validation.
    #[error("Invalid {kind}: {reason}")]
    InvalidIdentifier {
        /// Which identifier was being parsed
        kind: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// The user supplied nothing where an identifier was required.
    #[error("Please enter a {0}")]
    Empty(&'static str),

    /// A number does not fit the target type.
    #[error("Integer out of range: {0}")]
    OutOfRange(String),

    /// DAG-CBOR has no encoding for infinities and NaN.
    #[error("Non-finite float: {0}")]
    NonFinite(String),

    /// A Rust value could not be turned into a [`crate::Value`].
    #[error("Serialization failed: {0}")]
    Serialize(String),

    /// A [`crate::Value`] could not be turned into the requested Rust type.
    #[error("Deserialization failed: {0}")]
    Deserialize(String),
}

/// Errors raised while framing or unframing the RPC byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A frame's transport encoding (base64) was malformed.
    #[error("Malformed frame encoding: {0}")]
    FrameEncoding(String),

    /// A message length prefix could not be read.
    #[error("Malformed length prefix")]
    LengthPrefix,

    /// A message is larger than the configured limit.
    #[error("Message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge {
        /// Declared or actual size of the message
        size: u64,
        /// Configured maximum message size
        limit: usize,
    },

    /// A message could not be encoded.
    #[error("Failed to encode message: {0}")]
    Encode(String),

    /// A complete message body could not be decoded.
    #[error("Failed to decode message: {0}")]
    Decode(String),
}
