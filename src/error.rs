//! Error types for the gateway.
//!
//! One enum covers the whole taxonomy. Validation and admission failures are
//! handled synchronously in the request path; transport and auth failures are
//! handled inside the lifecycle manager's event loop and never reach the
//! originating HTTP request. The only asynchronous failure surfaced to a
//! caller is the pairing timeout, via the waiter race in the gateway.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Phone number failed validation. Rejected before any side effect.
    #[error("invalid phone number: {0}")]
    InvalidPhoneNumber(String),

    /// The global session cap is reached. An expected outcome, reported with
    /// counts, not logged as a failure.
    #[error("session limit reached: {current}/{limit}")]
    AdmissionRejected { current: usize, limit: usize },

    /// Connection open/send failure from the transport layer. Retried per the
    /// backoff policy inside the lifecycle manager.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote side invalidated our credentials. Terminal, never retried.
    #[error("authentication terminated: {0}")]
    AuthTerminated(String),

    /// No pairing code was produced within the wait window.
    #[error("pairing code generation timed out")]
    PairingTimeout,

    /// The pairing-code request itself failed.
    #[error("pairing failed: {0}")]
    Pairing(String),

    /// Status-file or credential-directory I/O failure. Does not corrupt the
    /// in-memory session store.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Unknown session id.
    #[error("Session not found")]
    SessionNotFound,
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}
