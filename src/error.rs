//! Error types for the session engine.

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during protocol operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Wire data is too short, truncated or otherwise garbled
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),

    /// Key material does not have the expected length
    #[error("invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyDataLength { expected: usize, actual: usize },

    /// Serialized key carries an unsupported type tag
    #[error("invalid key type")]
    InvalidKeyType,

    /// Message was produced by an older protocol version
    #[error("legacy ciphertext version {0}")]
    LegacyCiphertextVersion(u8),

    /// Message was produced by a newer or unknown protocol version
    #[error("unrecognized message version {0}")]
    UnrecognizedMessageVersion(u8),

    /// Signed prekey signature does not verify
    #[error("invalid signature")]
    InvalidSignature,

    /// Message MAC does not match
    #[error("message verification failed")]
    MessageVerificationFailed,

    /// Ciphertext could not be decrypted or unpadded
    #[error("decryption failed")]
    DecryptionFailed,

    /// DH key agreement produced a non-contributory output
    #[error("key agreement failed")]
    KeyAgreementFailed,

    /// Remote identity does not match the pinned one
    #[error("untrusted identity")]
    UntrustedIdentity,

    /// Message key for this counter was already consumed or never cached
    #[error("duplicated message with counter {index}")]
    DuplicatedMessage { index: u32 },

    /// Counter jumps too far ahead of the receiver chain
    #[error("message counter {counter} exceeds future message limit from chain index {index}")]
    FutureMessageLimitExceeded { index: u32, counter: u32 },

    /// No session state could decrypt the message
    #[error("invalid message: no session state could decrypt it")]
    InvalidMessage,

    /// No session is stored for the address
    #[error("session not found")]
    SessionNotFound,

    /// Store holds no key with the requested id
    #[error("no key with identifier {0}")]
    InvalidKeyIdentifier(Uuid),

    /// Internal invariant was broken
    #[error("internal error: {0}")]
    Internal(&'static str),

    /// Underlying cryptographic primitive rejected its input
    #[error("cryptographic error")]
    CryptoError,

    /// Serialization failed
    #[error("serialization error")]
    SerializationError,

    /// Deserialization failed
    #[error("deserialization error")]
    DeserializationError,

    /// Storage operation failed
    #[error("storage error")]
    StorageError,
}

impl Error {
    /// Whether this error reports a replayed or already-consumed message.
    ///
    /// Session-level decrypt stops probing archived states on these.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicatedMessage { .. })
    }
}

impl From<ed25519_dalek::SignatureError> for Error {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        Error::InvalidSignature
    }
}

impl From<prost::DecodeError> for Error {
    fn from(_: prost::DecodeError) -> Self {
        Error::MalformedMessage("protobuf decoding failed")
    }
}

impl From<base64::DecodeError> for Error {
    fn from(_: base64::DecodeError) -> Self {
        Error::MalformedMessage("invalid base64")
    }
}

impl From<serde_json::Error> for Error {
    fn from(_: serde_json::Error) -> Self {
        Error::DeserializationError
    }
}
