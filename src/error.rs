use std::io;

/// Errors from length-prefixed frame parsing and encoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: u32, max: u32 },

    #[error("truncated frame: expected {expected} bytes, stream closed after {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from attestation records and constraint matching.
#[derive(Debug, thiserror::Error)]
pub enum AttestError {
    #[error("malformed attestation: {0}")]
    Malformed(String),

    #[error("constraint syntax error: {0}")]
    ConstraintSyntax(String),

    /// Carries the rendered record so an operator can see what was offered.
    #[error("constraint violation: {reason} (attestation: {attestation})")]
    ConstraintViolation { reason: String, attestation: String },

    #[error("attestation signed by untrusted authority {0}")]
    UntrustedAuthority(String),
}

/// Errors from mail envelope encryption and decryption.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("mail encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("mail authentication failed: envelope is invalid, tampered, or not addressed to us")]
    AuthenticationFailure,

    #[error("replay detected on topic {topic:?}: sequence {received}, last accepted {last}")]
    ReplayDetected {
        topic: String,
        received: u64,
        last: u64,
    },

    #[error("topic mismatch: expected {expected:?}, got {actual:?}")]
    TopicMismatch { expected: String, actual: String },

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("non-contributory key exchange: peer sent small-subgroup or identity point")]
    NonContributoryKey,

    #[error("HKDF expand failed: invalid length")]
    HkdfExpandFailed,

    #[error("sequence space exhausted for topic {0:?}")]
    SequenceExhausted(String),
}

/// Errors from the client session state machine and connection setup.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session closed")]
    Closed,

    #[error("invalid session state: expected {expected}, currently {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("attestation timeout")]
    Timeout,

    #[error("connection write queue full")]
    QueueFull,

    #[error("connection failed: {0}")]
    ConnectFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised at the isolated-node boundary.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    #[error("node outbox closed")]
    OutboxClosed,

    #[error("mail rejected: {0}")]
    Rejected(#[from] CryptoError),
}

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Attestation(#[from] AttestError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether the error rejects a single envelope but leaves the session usable.
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            Error::Crypto(
                CryptoError::AuthenticationFailure
                    | CryptoError::ReplayDetected { .. }
                    | CryptoError::TopicMismatch { .. }
            )
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
