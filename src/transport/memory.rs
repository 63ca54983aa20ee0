//! In-process transport.
//!
//! A scripted stand-in for the protocol library: hands out a configurable
//! pairing code, and lets callers inject `Open`/`Close` events to drive a
//! session through its lifecycle. The test suite runs entirely on this
//! transport; `serve` falls back to it when the `whatsapp-web` feature is
//! compiled out.

use super::{
    Connection, ConnectionEvent, DisconnectReason, SessionHandle, Transport, TransportError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Scripted behavior applied to every connection this transport opens.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Raw code handed out by `request_pairing_code`.
    pub code: String,
    /// Delay before the code is returned.
    pub code_delay: Duration,
    /// Make `request_pairing_code` fail.
    pub fail_pairing: bool,
    /// Make `connect` itself fail.
    pub fail_connect: bool,
    /// Credential state reported at connect time.
    pub registered: bool,
    /// Emit `Open` immediately after connect (registered sessions).
    pub auto_open: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            code: "WGTE1234".to_string(),
            code_delay: Duration::ZERO,
            fail_pairing: false,
            fail_connect: false,
            registered: false,
            auto_open: false,
        }
    }
}

struct Link {
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

/// Scripted in-process transport. One instance serves many sessions; links
/// are keyed by phone number, latest connection wins.
pub struct MemoryTransport {
    config: MemoryConfig,
    links: Mutex<HashMap<String, Link>>,
    connects: Mutex<HashMap<String, usize>>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
    followed: Arc<Mutex<Vec<String>>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            config,
            links: Mutex::new(HashMap::new()),
            connects: Mutex::new(HashMap::new()),
            sent: Arc::new(Mutex::new(Vec::new())),
            followed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Push an event into the live connection for `phone`. Returns false if
    /// no connection is live or its event loop is gone.
    pub fn emit(&self, phone: &str, event: ConnectionEvent) -> bool {
        let links = self.links.lock().unwrap_or_else(|e| e.into_inner());
        match links.get(phone) {
            Some(link) => link.events.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate the user completing the link: emit `Open`.
    pub fn open(&self, phone: &str) -> bool {
        self.emit(phone, ConnectionEvent::Open)
    }

    /// Simulate a dropped connection.
    pub fn drop_connection(&self, phone: &str, reason: DisconnectReason) -> bool {
        self.emit(phone, ConnectionEvent::Close { reason })
    }

    /// How many times `connect` was called for `phone`.
    pub fn connect_count(&self, phone: &str) -> usize {
        let connects = self.connects.lock().unwrap_or_else(|e| e.into_inner());
        connects.get(phone).copied().unwrap_or(0)
    }

    /// Messages sent through any handle, in order, as `(jid, body)`.
    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Newsletter JIDs followed through any handle.
    pub fn followed_newsletters(&self) -> Vec<String> {
        self.followed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(
        &self,
        phone_number: &str,
        _creds_dir: &Path,
    ) -> Result<Connection, TransportError> {
        {
            let mut connects = self.connects.lock().unwrap_or_else(|e| e.into_inner());
            *connects.entry(phone_number.to_string()).or_insert(0) += 1;
        }

        if self.config.fail_connect {
            return Err(TransportError::Connect("scripted connect failure".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ConnectionEvent::Connecting);
        if self.config.registered && self.config.auto_open {
            let _ = tx.send(ConnectionEvent::Open);
        }

        {
            let mut links = self.links.lock().unwrap_or_else(|e| e.into_inner());
            links.insert(
                phone_number.to_string(),
                Link { events: tx.clone() },
            );
        }

        let handle = Arc::new(MemoryHandle {
            code: self.config.code.clone(),
            code_delay: self.config.code_delay,
            fail_pairing: self.config.fail_pairing,
            events: tx,
            sent: self.sent.clone(),
            followed: self.followed.clone(),
            closed: AtomicBool::new(false),
        });

        Ok(Connection {
            handle,
            events: rx,
            registered: self.config.registered,
        })
    }
}

struct MemoryHandle {
    code: String,
    code_delay: Duration,
    fail_pairing: bool,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
    followed: Arc<Mutex<Vec<String>>>,
    closed: AtomicBool,
}

#[async_trait]
impl SessionHandle for MemoryHandle {
    async fn request_pairing_code(
        &self,
        _phone_number: &str,
    ) -> Result<String, TransportError> {
        if !self.code_delay.is_zero() {
            tokio::time::sleep(self.code_delay).await;
        }
        if self.fail_pairing {
            return Err(TransportError::Request(
                "pairing rejected by server".into(),
            ));
        }
        Ok(self.code.clone())
    }

    async fn send_text(&self, to_jid: &str, body: &str) -> Result<(), TransportError> {
        let mut sent = self.sent.lock().unwrap_or_else(|e| e.into_inner());
        sent.push((to_jid.to_string(), body.to_string()));
        Ok(())
    }

    async fn follow_newsletter(&self, jid: &str) -> Result<(), TransportError> {
        let mut followed = self.followed.lock().unwrap_or_else(|e| e.into_inner());
        followed.push(jid.to_string());
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(ConnectionEvent::Close {
                reason: DisconnectReason::Transient("closed by gateway".into()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_counts_attempts() {
        let transport = MemoryTransport::new();
        let dir = std::env::temp_dir();
        let _ = transport.connect("15550104477", &dir).await;
        let _ = transport.connect("15550104477", &dir).await;
        assert_eq!(transport.connect_count("15550104477"), 2);
        assert_eq!(transport.connect_count("19998887777"), 0);
    }

    #[tokio::test]
    async fn test_scripted_pairing_code() {
        let transport = MemoryTransport::with_config(MemoryConfig {
            code: "ABCD1234".into(),
            ..Default::default()
        });
        let conn = transport
            .connect("15550104477", &std::env::temp_dir())
            .await
            .expect("connect");
        let code = conn
            .handle
            .request_pairing_code("15550104477")
            .await
            .expect("code");
        assert_eq!(code, "ABCD1234");
        assert!(!conn.registered);
    }

    #[tokio::test]
    async fn test_emit_reaches_live_connection() {
        let transport = MemoryTransport::new();
        let mut conn = transport
            .connect("15550104477", &std::env::temp_dir())
            .await
            .expect("connect");
        assert!(transport.open("15550104477"));
        // First event is always Connecting.
        assert!(matches!(
            conn.events.recv().await,
            Some(ConnectionEvent::Connecting)
        ));
        assert!(matches!(conn.events.recv().await, Some(ConnectionEvent::Open)));
    }
}
