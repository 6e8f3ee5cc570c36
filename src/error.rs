use std::io;
use std::path::PathBuf;

/// Transport-level failures of the length-prefixed channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("message of {len} bytes exceeds the {max} byte limit")]
    MessageTooLarge { len: usize, max: usize },

    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("timed out waiting for the peer")]
    Timeout,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("user {0} already exists")]
    AlreadyExists(String),

    #[error("user {0} not found")]
    NotFound(String),

    #[error("username must not be empty")]
    EmptyUsername,

    #[error("public value must lie in (1, N)")]
    InvalidPublicValue,

    #[error("failed to persist registry to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Errors surfaced by the server side of the protocol.
///
/// The `Display` strings are sent verbatim to the peer in `error` records.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("user {0} not found")]
    UnknownUser(String),

    #[error("session not found")]
    SessionNotFound,

    #[error("{field} out of range")]
    InvalidRange { field: &'static str },

    #[error("unexpected {0} for the current round")]
    OutOfOrder(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("modulus must be at least {min} bits, got {bits}")]
    TooSmall { bits: u64, min: u64 },

    #[error("modulus factors must be distinct odd primes")]
    InvalidFactors,

    #[error("modulus must be odd and greater than 3")]
    InvalidModulus,
}

/// Errors of the client role. Transport failures are wrapped, server-side
/// refusals are reported through the outcome types instead.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection attempt to {0} timed out")]
    ConnectTimeout(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("server rejected request: {0}")]
    Rejected(String),

    #[error("no saved key for user {0}")]
    MissingKey(String),

    #[error("saved key for {username} is not invertible modulo the server modulus")]
    IncompatibleKey { username: String },

    #[error("failed to write key file {path}: {source}")]
    KeyStore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Params(#[from] ParamError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ClientError {
    /// The connection is unusable after this error and has to be reopened.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, ClientError::Channel(_))
    }

    pub(crate) fn unexpected(expected: &str, got: &impl std::fmt::Debug) -> Self {
        ClientError::ProtocolViolation(format!("expected {expected}, got {got:?}"))
    }
}
