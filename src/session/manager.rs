//! Session Lifecycle Manager
//!
//! Creates one protocol connection per linked phone number, drives its event
//! stream through the status machine, applies the retry budget on transport
//! drops, and deletes state on terminal failure or explicit removal.
//!
//! Reconnection is push-driven: the transport's close event schedules the
//! next attempt as a timer task, and the session's absence from the store
//! cancels it — deleting a session between scheduling and firing is normal,
//! not an error. Each session's events are consumed by a single task, so one
//! session's state machine is effectively single-threaded even though the
//! process runs many sessions at once.

use super::pairing::{PairingOutcome, PairingWaiters, format_pairing_code};
use super::persist::{ErrorStatusFile, PairingStatusFile, SessionDirs};
use super::store::SessionStore;
use super::{SessionRecord, SessionStatus, derive_session_id};
use crate::error::{GatewayError, Result};
use crate::transport::{
    ConnectionEvent, DisconnectReason, InboundMessage, SessionHandle, Transport,
};
use crate::utils::normalize_phone;
use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Reconnect policy for transient transport drops.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Consecutive attempts before the session is dropped and its
    /// credentials deleted.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Callback invoked for every inbound message event on a connected session.
/// The message-command business logic lives behind this seam.
pub type MessageHandler = Arc<dyn Fn(Arc<dyn SessionHandle>, InboundMessage) + Send + Sync>;

/// A freshly admitted session, ready to start.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: String,
    pub phone_number: String,
}

pub struct SessionManager {
    store: Arc<SessionStore>,
    dirs: SessionDirs,
    transport: Arc<dyn Transport>,
    waiters: Arc<PairingWaiters>,
    retry: RetryPolicy,
    /// Wait before requesting a pairing code; the transport needs time to
    /// reach a stable pre-registration state or the request fails.
    pairing_delay: Duration,
    newsletters: Vec<String>,
    connect_notice: bool,
    on_message: MessageHandler,
}

impl SessionManager {
    pub fn new(
        store: Arc<SessionStore>,
        dirs: SessionDirs,
        transport: Arc<dyn Transport>,
        waiters: Arc<PairingWaiters>,
    ) -> Self {
        Self {
            store,
            dirs,
            transport,
            waiters,
            retry: RetryPolicy::default(),
            pairing_delay: Duration::from_secs(3),
            newsletters: Vec::new(),
            connect_notice: true,
            on_message: Arc::new(|_handle, msg| {
                tracing::debug!("inbound message from {} (unhandled)", msg.sender);
            }),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pairing_delay(mut self, delay: Duration) -> Self {
        self.pairing_delay = delay;
        self
    }

    /// Newsletter JIDs every freshly connected session follows.
    pub fn with_newsletters(mut self, newsletters: Vec<String>) -> Self {
        self.newsletters = newsletters;
        self
    }

    pub fn with_connect_notice(mut self, enabled: bool) -> Self {
        self.connect_notice = enabled;
        self
    }

    pub fn with_message_handler(mut self, handler: MessageHandler) -> Self {
        self.on_message = handler;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn dirs(&self) -> &SessionDirs {
        &self.dirs
    }

    /// Validate the phone number and claim a store slot. No side effects at
    /// all on a validation failure; the admission check and the insertion are
    /// one atomic step on the store.
    pub async fn admit(&self, raw_phone: &str) -> Result<CreatedSession> {
        let phone_number = normalize_phone(raw_phone)?;
        let session_id = derive_session_id(&phone_number, Utc::now());
        let record = SessionRecord::new(session_id.clone(), phone_number.clone());
        self.store.try_insert(record).await?;
        tracing::info!("new pairing request for {phone_number} ({session_id})");
        Ok(CreatedSession {
            session_id,
            phone_number,
        })
    }

    /// Kick off the connect flow for an admitted session in the background.
    pub fn spawn_start(self: Arc<Self>, created: &CreatedSession) -> JoinHandle<()> {
        let session_id = created.session_id.clone();
        let phone_number = created.phone_number.clone();
        tokio::spawn(self.attempt(session_id, phone_number))
    }

    /// One connection attempt: connect, wire events, schedule pairing. A
    /// transport failure here flows into the same close policy as a dropped
    /// connection. Boxed so the retry path can re-enter it from a timer task.
    fn attempt(self: Arc<Self>, session_id: String, phone_number: String) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if let Err(e) = self.clone().connect(&session_id, &phone_number).await {
                tracing::error!("[{session_id}] connection attempt failed: {e}");
                self.waiters
                    .resolve(&session_id, PairingOutcome::Failed(e.to_string()))
                    .await;
                self.handle_close(
                    &session_id,
                    &phone_number,
                    DisconnectReason::Transient(e.to_string()),
                )
                .await;
            }
        })
    }

    async fn connect(self: Arc<Self>, session_id: &str, phone_number: &str) -> Result<()> {
        // Idempotent: a live handle means another caller already won.
        if let Some(record) = self.store.get(session_id).await
            && record.handle.is_some()
        {
            tracing::warn!("[{session_id}] session already active");
            return Ok(());
        }
        // Store-absence means the session was deleted while this attempt was
        // queued; treat it as cancellation.
        if !self.store.contains(session_id).await {
            tracing::debug!("[{session_id}] gone before connect; attempt cancelled");
            return Ok(());
        }

        let creds_dir = self.dirs.ensure(session_id)?;
        let connection = self
            .transport
            .connect(phone_number, &creds_dir)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let handle = connection.handle.clone();
        self.store
            .update(session_id, |record| record.handle = Some(handle))
            .await;

        // One event task per session keeps that session's events strictly
        // ordered; the loop ends at the close event and a reconnect starts a
        // fresh one.
        let mgr = self.clone();
        let sid = session_id.to_string();
        let phone = phone_number.to_string();
        let mut events = connection.events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !mgr.clone().handle_event(&sid, &phone, event).await {
                    break;
                }
            }
        });

        if !connection.registered {
            self.store
                .update(session_id, |record| {
                    record.status = SessionStatus::AwaitingCode;
                })
                .await;
            self.clone().schedule_pairing_request(
                session_id.to_string(),
                phone_number.to_string(),
                connection.handle,
            );
        }

        Ok(())
    }

    /// Returns false when the event loop should stop.
    async fn handle_event(
        self: Arc<Self>,
        session_id: &str,
        phone_number: &str,
        event: ConnectionEvent,
    ) -> bool {
        match event {
            ConnectionEvent::Connecting => {
                tracing::info!("[{session_id}] connecting");
                true
            }
            ConnectionEvent::Open => {
                self.handle_open(session_id).await;
                true
            }
            ConnectionEvent::Message(msg) => {
                if let Some(handle) = self.store.handle(session_id).await {
                    (self.on_message)(handle, msg);
                }
                true
            }
            ConnectionEvent::Close { reason } => {
                self.handle_close(session_id, phone_number, reason).await;
                false
            }
        }
    }

    async fn handle_open(&self, session_id: &str) {
        tracing::info!("[{session_id}] connected");
        let now = Utc::now();
        self.store
            .update(session_id, |record| {
                record.status = SessionStatus::Connected;
                record.connected_at = Some(now);
                record.retry_count = 0;
            })
            .await;

        if let Err(e) = self.dirs.mark_connected(session_id, now) {
            tracing::error!("[{session_id}] failed to update status file: {e}");
        }

        // Follow-up actions are best-effort; a failure never touches the
        // session's state.
        let Some(record) = self.store.get(session_id).await else {
            return;
        };
        let Some(handle) = record.handle else {
            return;
        };
        for jid in &self.newsletters {
            match handle.follow_newsletter(jid).await {
                Ok(()) => tracing::info!("[{session_id}] followed newsletter {jid}"),
                Err(e) => tracing::warn!("[{session_id}] newsletter follow failed for {jid}: {e}"),
            }
        }
        if self.connect_notice {
            let jid = format!("{}@s.whatsapp.net", record.phone_number);
            let body = format!("Bot connected successfully.\nSession: {session_id}");
            if let Err(e) = handle.send_text(&jid, &body).await {
                tracing::debug!("[{session_id}] connect notice not sent: {e}");
            }
        }
    }

    async fn handle_close(
        self: Arc<Self>,
        session_id: &str,
        phone_number: &str,
        reason: DisconnectReason,
    ) {
        // The dead handle leaves the record first so pollers never see a
        // closed connection as live.
        self.store
            .update(session_id, |record| record.handle = None)
            .await;

        match reason {
            DisconnectReason::AuthTerminated => {
                tracing::warn!("[{session_id}] logged out; deleting credentials");
                if let Err(e) = self.dirs.delete(session_id) {
                    tracing::error!("[{session_id}] failed to delete credentials: {e}");
                }
                self.store.remove(session_id).await;
            }
            DisconnectReason::Transient(why) => {
                let Some(record) = self.store.get(session_id).await else {
                    // Deleted concurrently; nothing to do.
                    return;
                };

                if record.retry_count >= self.retry.max_retries {
                    tracing::warn!(
                        "[{session_id}] retry budget exhausted ({}); dropping session",
                        self.retry.max_retries
                    );
                    self.store
                        .update(session_id, |r| r.status = SessionStatus::Closed)
                        .await;
                    if let Err(e) = self.dirs.delete(session_id) {
                        tracing::error!("[{session_id}] failed to delete credentials: {e}");
                    }
                    self.store.remove(session_id).await;
                    return;
                }

                let next_attempt = record.retry_count + 1;
                self.store
                    .update(session_id, |r| {
                        r.retry_count = next_attempt;
                        r.status = SessionStatus::Pending;
                    })
                    .await;
                tracing::info!(
                    "[{session_id}] connection closed ({why}); reconnecting, attempt {next_attempt}/{}",
                    self.retry.max_retries
                );

                let mgr = self.clone();
                let sid = session_id.to_string();
                let phone = phone_number.to_string();
                tokio::spawn(async move {
                    tokio::time::sleep(mgr.retry.backoff).await;
                    // Deletion while we slept cancels the reconnect.
                    if !mgr.store.contains(&sid).await {
                        tracing::debug!("[{sid}] deleted during backoff; reconnect cancelled");
                        return;
                    }
                    mgr.attempt(sid, phone).await;
                });
            }
        }
    }

    fn schedule_pairing_request(
        self: Arc<Self>,
        session_id: String,
        phone_number: String,
        handle: Arc<dyn SessionHandle>,
    ) {
        let mgr = self;
        tokio::spawn(async move {
            tokio::time::sleep(mgr.pairing_delay).await;
            if !mgr.store.contains(&session_id).await {
                return;
            }

            tracing::info!("[{session_id}] requesting pairing code for {phone_number}");
            match handle.request_pairing_code(&phone_number).await {
                Ok(raw) => {
                    let code = format_pairing_code(&raw);
                    tracing::info!("[{session_id}] pairing code: {code}");
                    mgr.store
                        .update(&session_id, |record| {
                            record.status = SessionStatus::AwaitingLink;
                            record.pairing_code = Some(code.clone());
                        })
                        .await;

                    let file = PairingStatusFile {
                        session_id: session_id.clone(),
                        phone_number: phone_number.clone(),
                        code: code.clone(),
                        timestamp: Utc::now().timestamp_millis(),
                        status: SessionStatus::Pending,
                        connected_at: None,
                    };
                    if let Err(e) = mgr.dirs.write_pairing(&session_id, &file) {
                        tracing::error!("[{session_id}] failed to persist pairing status: {e}");
                    }

                    mgr.waiters
                        .resolve(&session_id, PairingOutcome::Code(code.clone()))
                        .await;

                    // Best-effort: surface the code on the phone too. New
                    // sessions usually can't send yet; that's fine.
                    let jid = format!("{phone_number}@s.whatsapp.net");
                    let body = format!(
                        "WhatsApp pairing code: {code}\nEnter it under Settings > Linked Devices > Link a Device."
                    );
                    if let Err(e) = handle.send_text(&jid, &body).await {
                        tracing::debug!("[{session_id}] pairing notice not sent: {e}");
                    }
                }
                Err(e) => {
                    tracing::error!("[{session_id}] pairing code request failed: {e}");
                    mgr.store
                        .update(&session_id, |record| {
                            record.status = SessionStatus::Error;
                            record.last_error = Some(e.to_string());
                        })
                        .await;

                    let file = ErrorStatusFile {
                        session_id: session_id.clone(),
                        phone_number: phone_number.clone(),
                        error: e.to_string(),
                        timestamp: Utc::now().timestamp_millis(),
                        status: SessionStatus::Error,
                    };
                    if let Err(we) = mgr.dirs.write_error(&session_id, &file) {
                        tracing::error!("[{session_id}] failed to persist error status: {we}");
                    }

                    mgr.waiters
                        .resolve(&session_id, PairingOutcome::Failed(e.to_string()))
                        .await;
                }
            }
        });
    }

    /// Close the live transport handle and remove the store entry. Deleting
    /// the credential directory stays with the caller, so it can report a
    /// partial failure without that being a lifecycle concern.
    pub async fn close(&self, session_id: &str) -> Result<()> {
        let Some(record) = self.store.remove(session_id).await else {
            return Err(GatewayError::SessionNotFound);
        };
        if let Some(handle) = record.handle {
            handle.close().await;
        }
        tracing::info!("[{session_id}] session closed");
        Ok(())
    }

    /// Delete stale session directories, independent of in-memory state.
    pub fn cleanup_stale(&self, max_age: Duration) -> Result<usize> {
        let removed = self.dirs.sweep_stale(max_age)?;
        if removed > 0 {
            tracing::info!("cleaned {removed} stale session director(y/ies)");
        }
        Ok(removed)
    }

    /// Run the stale sweep on a fixed interval until aborted.
    pub fn spawn_cleanup_task(
        self: Arc<Self>,
        interval: Duration,
        max_age: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; that initial sweep is wanted.
            loop {
                ticker.tick().await;
                if let Err(e) = self.cleanup_stale(max_age) {
                    tracing::warn!("stale-session sweep failed: {e}");
                }
            }
        })
    }

    /// Rebuild store entries from on-disk status files. The status file is
    /// the authoritative record; the in-memory store is a cache that a
    /// restart can reconstruct. Returns how many entries were restored.
    pub async fn reconcile(&self) -> Result<usize> {
        let mut restored = 0;
        for session_id in self.dirs.scan()? {
            if self.store.contains(&session_id).await {
                continue;
            }
            if let Some(pairing) = self.dirs.read_pairing(&session_id)? {
                let mut record =
                    SessionRecord::new(session_id.clone(), pairing.phone_number.clone());
                record.status = pairing.status;
                record.pairing_code = Some(pairing.code);
                if let Some(at) = Utc.timestamp_millis_opt(pairing.timestamp).single() {
                    record.created_at = at;
                }
                record.connected_at = pairing
                    .connected_at
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
                self.store.insert(record).await;
                restored += 1;
            } else if let Some(error) = self.dirs.read_error(&session_id)? {
                let mut record =
                    SessionRecord::new(session_id.clone(), error.phone_number.clone());
                record.status = SessionStatus::Error;
                record.last_error = Some(error.error);
                if let Some(at) = Utc.timestamp_millis_opt(error.timestamp).single() {
                    record.created_at = at;
                }
                self.store.insert(record).await;
                restored += 1;
            }
            // A directory with neither file holds only credential state; the
            // stale sweep will reap it if nothing claims it.
        }
        if restored > 0 {
            tracing::info!("restored {restored} session(s) from disk");
        }
        Ok(restored)
    }

    /// Close every live connection and empty the store. Called on shutdown.
    pub async fn shutdown(&self) {
        let records = self.store.drain().await;
        if records.is_empty() {
            return;
        }
        tracing::info!("closing {} session(s)", records.len());
        for record in records {
            if let Some(handle) = record.handle {
                handle.close().await;
            }
        }
    }
}
