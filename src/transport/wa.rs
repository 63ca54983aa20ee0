//! WhatsApp transport adapter.
//!
//! Bridges the whatsapp-rust bot to the [`Transport`] seam: one `Bot` per
//! session, its event callback feeding the session's ordered event channel.
//! Compiled behind the `whatsapp-web` feature.

use super::{
    Connection, ConnectionEvent, DisconnectReason, InboundKind, InboundMessage, SessionHandle,
    Transport, TransportError,
};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

use wacore::types::events::Event;
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust::store::SqliteStore;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

/// Extract plain text from a WhatsApp message (simple text or extended text).
fn extract_text(msg: &waproto::whatsapp::Message) -> Option<String> {
    if let Some(ref conv) = msg.conversation
        && !conv.is_empty()
    {
        return Some(conv.clone());
    }
    if let Some(ref ext) = msg.extended_text_message
        && let Some(ref text) = ext.text
    {
        return Some(text.clone());
    }
    None
}

/// Transport backed by the whatsapp-rust stack. Each session gets its own
/// bot, transport socket, and sqlite device store inside its credential
/// directory.
pub struct WaTransport;

impl Default for WaTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl WaTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WaTransport {
    async fn connect(
        &self,
        phone_number: &str,
        creds_dir: &Path,
    ) -> Result<Connection, TransportError> {
        let db_path = creds_dir.join("session.db");
        let backend = SqliteStore::new(db_path.to_string_lossy().as_ref())
            .await
            .map_err(|e| TransportError::Connect(format!("failed to open device store: {e}")))?;
        let backend = Arc::new(backend);

        let registered = backend
            .device_exists()
            .await
            .map_err(|e| TransportError::Connect(format!("couldn't check device state: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();

        let event_tx = tx.clone();
        let bot = Bot::builder()
            .with_backend(backend)
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new())
            .on_event(move |event, _client| {
                let tx = event_tx.clone();
                async move {
                    match event {
                        Event::Connected(_) => {
                            let _ = tx.send(ConnectionEvent::Open);
                        }
                        Event::PairSuccess(_) => {
                            tracing::info!("wa: pairing successful");
                        }
                        Event::LoggedOut(_) => {
                            let _ = tx.send(ConnectionEvent::Close {
                                reason: DisconnectReason::AuthTerminated,
                            });
                        }
                        Event::Disconnected(_) => {
                            let _ = tx.send(ConnectionEvent::Close {
                                reason: DisconnectReason::Transient("stream closed".into()),
                            });
                        }
                        Event::Message(msg, info) => {
                            let sender = info.source.sender.to_string();
                            let sender = sender
                                .split('@')
                                .next()
                                .unwrap_or(&sender)
                                .to_string();
                            let _ = tx.send(ConnectionEvent::Message(InboundMessage {
                                sender,
                                chat: info.source.chat.to_string(),
                                text: extract_text(&msg),
                                kind: InboundKind::Message,
                            }));
                        }
                        other => {
                            tracing::debug!("wa: unhandled event: {:?}", other);
                        }
                    }
                }
            })
            .build()
            .await
            .map_err(|e| TransportError::Connect(format!("failed to build bot: {e}")))?;

        let client = bot.client();

        let mut bot = bot;
        let run_handle = tokio::spawn(async move {
            match bot.run().await {
                Ok(handle) => {
                    if let Err(e) = handle.await {
                        tracing::error!("wa: bot task error: {e:?}");
                    }
                }
                Err(e) => {
                    tracing::error!("wa: bot run error: {e}");
                }
            }
        });

        let _ = tx.send(ConnectionEvent::Connecting);
        tracing::info!("wa: transport connected for {phone_number}");

        Ok(Connection {
            handle: Arc::new(WaHandle {
                client,
                run_handle: Mutex::new(Some(run_handle)),
            }),
            events: rx,
            registered,
        })
    }
}

struct WaHandle {
    client: Arc<Client>,
    run_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[async_trait]
impl SessionHandle for WaHandle {
    async fn request_pairing_code(
        &self,
        phone_number: &str,
    ) -> Result<String, TransportError> {
        self.client
            .request_pairing_code(phone_number)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn send_text(&self, to_jid: &str, body: &str) -> Result<(), TransportError> {
        let jid = to_jid
            .parse()
            .map_err(|_| TransportError::Request(format!("invalid JID: {to_jid}")))?;
        let msg = waproto::whatsapp::Message {
            conversation: Some(body.to_string()),
            ..Default::default()
        };
        self.client
            .send_message(jid, msg)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn follow_newsletter(&self, jid: &str) -> Result<(), TransportError> {
        // Not exposed by the current client surface.
        tracing::debug!("wa: newsletter follow unsupported; skipping {jid}");
        Ok(())
    }

    async fn close(&self) {
        if let Some(handle) = self.run_handle.lock().await.take() {
            handle.abort();
        }
    }
}
