//! Transport abstraction over the WhatsApp protocol library.
//!
//! The wire protocol, encryption, and socket lifecycle live entirely inside
//! the external library; this module defines the narrow seam the lifecycle
//! manager drives. [`memory`] is a scripted in-process implementation used by
//! the test suite and by local development; `wa` (behind the `whatsapp-web`
//! feature) adapts the whatsapp-rust stack.

pub mod memory;
#[cfg(feature = "whatsapp-web")]
pub mod wa;

pub use memory::MemoryTransport;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be opened.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A request over an open connection failed.
    #[error("request failed: {0}")]
    Request(String),
}

/// Why a connection went away. Decides retry versus terminal teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote side invalidated the credentials ("logged out"). Terminal:
    /// the credential directory must be deleted and no reconnect scheduled.
    AuthTerminated,
    /// Anything else: network drop, stream error, server restart.
    Transient(String),
}

/// An inbound message, group update, or status update, passed through to the
/// message-handling layer untouched.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Sender as a digit string (JID user part).
    pub sender: String,
    /// Chat JID the event belongs to (DM or group).
    pub chat: String,
    pub text: Option<String>,
    pub kind: InboundKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    Message,
    GroupUpdate,
    StatusUpdate,
}

/// Events a live connection pushes to its session's event loop.
///
/// The transport guarantees per-connection ordering; the manager consumes one
/// session's events from a single task and must not reorder them.
#[derive(Debug)]
pub enum ConnectionEvent {
    Connecting,
    Open,
    Close { reason: DisconnectReason },
    Message(InboundMessage),
}

/// A live protocol connection. One per session, exclusively owned by the
/// session's record.
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Ask the server for a pairing code for `phone_number`. Only valid while
    /// the connection is in its pre-registration state.
    async fn request_pairing_code(&self, phone_number: &str)
    -> Result<String, TransportError>;

    /// Send a plain text message to a JID.
    async fn send_text(&self, to_jid: &str, body: &str) -> Result<(), TransportError>;

    /// Follow a newsletter/channel by JID.
    async fn follow_newsletter(&self, jid: &str) -> Result<(), TransportError>;

    /// Tear down the socket. Idempotent.
    async fn close(&self);
}

/// What [`Transport::connect`] hands back.
pub struct Connection {
    pub handle: Arc<dyn SessionHandle>,
    pub events: mpsc::UnboundedReceiver<ConnectionEvent>,
    /// Whether the loaded credential state is already registered with the
    /// server. Unregistered connections need the pairing flow.
    pub registered: bool,
}

/// Factory for protocol connections, one per session.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection for `phone_number`, loading/creating credential
    /// state under `creds_dir`.
    async fn connect(
        &self,
        phone_number: &str,
        creds_dir: &Path,
    ) -> Result<Connection, TransportError>;
}
