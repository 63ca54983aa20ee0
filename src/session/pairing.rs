//! Pairing code delivery.
//!
//! Code generation happens out-of-band from the HTTP request that triggered
//! it: the connect flow produces the code seconds later, on its own task. A
//! single-fire oneshot per session bridges the two — the handler registers
//! before the session starts, then races the receiver against its timeout.
//! Whichever side loses the race finds the registry entry already gone and
//! does nothing.

use std::collections::HashMap;
use tokio::sync::{Mutex, oneshot};

/// What the connect flow reports back to a waiting pairing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    /// Formatted, human-readable code.
    Code(String),
    Failed(String),
}

/// Single-fire waiter registry keyed by session id.
#[derive(Default)]
pub struct PairingWaiters {
    inner: Mutex<HashMap<String, oneshot::Sender<PairingOutcome>>>,
}

impl PairingWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a waiter for `session_id`. A second registration for the same
    /// id replaces the first, closing its channel.
    pub async fn register(&self, session_id: &str) -> oneshot::Receiver<PairingOutcome> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(session_id.to_string(), tx);
        rx
    }

    /// Deliver the outcome to the waiter, if one is still installed. The
    /// entry is removed either way; returns whether anyone was listening.
    pub async fn resolve(&self, session_id: &str, outcome: PairingOutcome) -> bool {
        let Some(tx) = self.inner.lock().await.remove(session_id) else {
            return false;
        };
        tx.send(outcome).is_ok()
    }

    /// Drop the waiter without delivering. The timeout path calls this so a
    /// late outcome becomes a no-op.
    pub async fn forget(&self, session_id: &str) {
        self.inner.lock().await.remove(session_id);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Hyphenate a raw pairing code into 4-character groups for display:
/// `"ABCD1234"` becomes `"ABCD-1234"`. A short final group stays as-is.
pub fn format_pairing_code(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    chars
        .chunks(4)
        .map(|group| group.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}
