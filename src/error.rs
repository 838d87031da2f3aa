//! Error types for TuneVault
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are categorized by the layer that raised them so the download
//! pipeline can decide whether a failure is fatal for a task or only degrades
//! a best-effort feature.
//!
//! ## Categories
//!
//! - `CodecError` - malformed ciphertext or text encoding
//! - `TransportError` - HTTP status, timeout, empty body, connection failures
//! - `ProtocolError` - backend-reported failure or unexpected JSON shape
//! - `Staging` - private temp storage I/O
//! - `TagWrite` - unsupported or corrupt audio container while tagging
//! - `Destination` - commit-time I/O against the caller's destination

use thiserror::Error;

/// Result type alias using our TuneVaultError type
pub type Result<T> = std::result::Result<T, TuneVaultError>;

/// Cipher codec failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Hex input with an odd number of digits
    #[error("hex input has odd length {0}")]
    OddLength(usize),

    /// Hex input containing a non-hex character
    #[error("invalid hex character {character:?} at index {index}")]
    InvalidHexCharacter { character: char, index: usize },

    /// Base64 input that cannot be decoded
    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    /// Ciphertext that is not a whole number of cipher blocks
    #[error("ciphertext length {0} is not a multiple of the block size")]
    BlockMisaligned(usize),

    /// PKCS#7 padding did not validate after decryption
    #[error("padding validation failed")]
    BadPadding,

    /// Decrypted bytes were requested as text but are not UTF-8
    #[error("decrypted payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Transport-level failures of a single HTTP call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Server answered with a status other than 200
    #[error("{endpoint} responded with HTTP {status}")]
    Status { status: u16, endpoint: String },

    /// Server answered 200 without a body
    #[error("{endpoint} returned an empty body")]
    EmptyBody { endpoint: String },

    /// Connect or read timeout elapsed
    #[error("{endpoint} timed out")]
    Timeout { endpoint: String },

    /// Connection-level failure (DNS, TLS, reset)
    #[error("network failure: {message}")]
    Network { message: String },
}

/// Backend-reported failure or unexpected response shape
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Envelope `code` was not 200
    #[error("backend returned code {code}: {message}")]
    Backend { code: i64, message: String },

    /// A required field is absent; `index` locates the offending list entry
    #[error("missing field `{field}`{}", .index.map(|i| format!(" in entry {i}")).unwrap_or_default())]
    MissingField { field: String, index: Option<usize> },

    /// Body is not parseable JSON
    #[error("malformed JSON: {0}")]
    MalformedJson(String),
}

/// Main error type for TuneVault
#[derive(Error, Debug)]
pub enum TuneVaultError {
    // ===== Protocol layer =====

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // ===== Download pipeline =====

    /// Staging area I/O failed
    #[error("Staging error: {0}")]
    Staging(String),

    /// Tags could not be written into the staged audio file
    #[error("Tag write error: {0}")]
    TagWrite(String),

    /// Writing into the caller's destination failed
    #[error("Destination error: {0}")]
    Destination(String),

    // ===== Orchestration =====

    /// Operation not valid for the task's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Unknown task or record
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    /// Operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<reqwest::Error> for TuneVaultError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err
            .url()
            .map(|u| u.path().to_string())
            .unwrap_or_default();

        if err.is_timeout() {
            return TransportError::Timeout { endpoint }.into();
        }
        if let Some(status) = err.status() {
            return TransportError::Status {
                status: status.as_u16(),
                endpoint,
            }
            .into();
        }
        TransportError::Network {
            message: err.to_string(),
        }
        .into()
    }
}

impl From<serde_json::Error> for TuneVaultError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::MalformedJson(err.to_string()).into()
    }
}

impl From<lofty::error::LoftyError> for TuneVaultError {
    fn from(err: lofty::error::LoftyError) -> Self {
        TuneVaultError::TagWrite(err.to_string())
    }
}

// Helper methods for creating common errors
impl TuneVaultError {
    /// Create a RecordNotFound error with a resource name
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        TuneVaultError::RecordNotFound(resource.into())
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        TuneVaultError::InvalidInput(message.into())
    }

    /// Create an InvalidState error with a message
    pub fn invalid_state<S: Into<String>>(message: S) -> Self {
        TuneVaultError::InvalidState(message.into())
    }

    /// Create a Staging error with a message
    pub fn staging<S: Into<String>>(message: S) -> Self {
        TuneVaultError::Staging(message.into())
    }

    /// Create a Destination error with a message
    pub fn destination<S: Into<String>>(message: S) -> Self {
        TuneVaultError::Destination(message.into())
    }

    /// Create a MissingField protocol error
    pub fn missing_field<S: Into<String>>(field: S, index: Option<usize>) -> Self {
        ProtocolError::MissingField {
            field: field.into(),
            index,
        }
        .into()
    }

    /// Check if error is transient and a fresh attempt might succeed
    ///
    /// Retries are never automatic; this only informs the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TuneVaultError::Transport(TransportError::Timeout { .. })
                | TuneVaultError::Transport(TransportError::Network { .. })
                | TuneVaultError::Transport(TransportError::Status {
                    status: 500..=599,
                    ..
                })
        )
    }

    /// Check if error came from the request/response protocol layer
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            TuneVaultError::Codec(_) | TuneVaultError::Transport(_) | TuneVaultError::Protocol(_)
        )
    }

    /// Check if error is related to file/disk operations
    pub fn is_file_error(&self) -> bool {
        matches!(
            self,
            TuneVaultError::Staging(_) | TuneVaultError::Destination(_) | TuneVaultError::IoError(_)
        )
    }

    /// Check if this is a cancellation rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TuneVaultError::Cancelled)
    }

    /// One-line reason suitable for recording on a failed task
    pub fn user_message(&self) -> String {
        let message = match self {
            TuneVaultError::Transport(TransportError::Timeout { .. }) => {
                "The server took too long to respond. Please try again.".to_string()
            }
            TuneVaultError::Transport(TransportError::Status { status: 401 | 403, .. }) => {
                "Your session was rejected. Please log in again.".to_string()
            }
            TuneVaultError::Protocol(ProtocolError::Backend { code, message }) => {
                if message.is_empty() {
                    format!("The service refused the request (code {code}).")
                } else {
                    format!("The service refused the request: {message}")
                }
            }
            TuneVaultError::TagWrite(reason) => {
                format!("Could not write tags: {reason}")
            }
            TuneVaultError::Destination(reason) => {
                format!("Could not save to the destination: {reason}")
            }
            _ => self.to_string(),
        };

        // Task reasons are displayed on a single line
        message.lines().next().unwrap_or_default().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_retryable() {
        let err: TuneVaultError = TransportError::Timeout {
            endpoint: "/eapi/song/lyric/v1".to_string(),
        }
        .into();
        assert!(err.is_retryable());
        assert!(err.is_protocol_error());
    }

    #[test]
    fn test_client_status_not_retryable() {
        let err: TuneVaultError = TransportError::Status {
            status: 404,
            endpoint: "/eapi/v1/album/1".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_missing_field_message() {
        let err = TuneVaultError::missing_field("simpleSongData", Some(3));
        assert_eq!(
            err.to_string(),
            "Protocol error: missing field `simpleSongData` in entry 3"
        );
    }

    #[test]
    fn test_user_message_is_single_line() {
        let err = TuneVaultError::Destination("disk full\nerrno 28".to_string());
        assert_eq!(
            err.user_message(),
            "Could not save to the destination: disk full"
        );
    }
}
