//! Session domain.
//!
//! A session is one tracked linkage attempt/connection for a single phone
//! number. The store is the in-memory source of truth for which sessions
//! exist; the per-session credential directory is the crash-safe one.

pub mod manager;
pub mod pairing;
pub mod persist;
pub mod store;

pub use manager::{CreatedSession, RetryPolicy, SessionManager};
pub use pairing::{PairingOutcome, PairingWaiters, format_pairing_code};
pub use persist::SessionDirs;
pub use store::SessionStore;

use crate::transport::SessionHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Externally-observable lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, transport attempt in flight.
    Pending,
    /// Unregistered credentials; waiting for the pairing-code request.
    AwaitingCode,
    /// Code produced; waiting for the user to enter it on their phone.
    AwaitingLink,
    Connected,
    Error,
    /// Terminal. Only reached on the way out of the store.
    Closed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AwaitingCode => "awaiting_code",
            Self::AwaitingLink => "awaiting_link",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of tracking. Mutated only by the lifecycle manager; everyone
/// else reads snapshots.
#[derive(Clone)]
pub struct SessionRecord {
    pub session_id: String,
    pub phone_number: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
    /// Consecutive reconnect attempts since the last successful connect.
    pub retry_count: u32,
    /// Present only between code generation and link/expiry.
    pub pairing_code: Option<String>,
    pub last_error: Option<String>,
    /// Exclusive ownership of the live protocol connection, if any.
    pub handle: Option<Arc<dyn SessionHandle>>,
}

impl SessionRecord {
    pub fn new(session_id: String, phone_number: String) -> Self {
        Self {
            session_id,
            phone_number,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
            connected_at: None,
            retry_count: 0,
            pairing_code: None,
            last_error: None,
            handle: None,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            phone_number: self.phone_number.clone(),
            status: self.status,
            created_at: self.created_at,
            connected_at: self.connected_at,
            code: self.pairing_code.clone(),
            error: self.last_error.clone(),
        }
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("session_id", &self.session_id)
            .field("phone_number", &self.phone_number)
            .field("status", &self.status)
            .field("retry_count", &self.retry_count)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

/// Read-only view handed to the HTTP layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub phone_number: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary fields for the session list endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub phone_number: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<DateTime<Utc>>,
}

impl From<&SessionSnapshot> for SessionSummary {
    fn from(snap: &SessionSnapshot) -> Self {
        Self {
            session_id: snap.session_id.clone(),
            phone_number: snap.phone_number.clone(),
            status: snap.status,
            created_at: snap.created_at,
            connected_at: snap.connected_at,
        }
    }
}

/// Derive a stable session id from the phone number and creation time.
pub fn derive_session_id(phone_number: &str, at: DateTime<Utc>) -> String {
    format!("session_{}_{}", phone_number, at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::AwaitingLink).expect("serialize");
        assert_eq!(json, "\"awaiting_link\"");
    }

    #[test]
    fn test_session_id_shape() {
        let at = Utc::now();
        let id = derive_session_id("919876543210", at);
        assert!(id.starts_with("session_919876543210_"));
        assert!(
            id.trim_start_matches("session_919876543210_")
                .chars()
                .all(|c| c.is_ascii_digit())
        );
    }

    #[test]
    fn test_snapshot_omits_absent_fields() {
        let record = SessionRecord::new("session_1_1".into(), "15550104477".into());
        let json = serde_json::to_value(record.snapshot()).expect("serialize");
        assert!(json.get("code").is_none());
        assert!(json.get("connectedAt").is_none());
        assert_eq!(json["status"], "pending");
        assert_eq!(json["phoneNumber"], "15550104477");
    }
}
