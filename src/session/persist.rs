//! Credential Persistence
//!
//! Each session owns one directory under the sessions root: the transport's
//! own credential files (opaque here) plus exactly one of `pairing.json` or
//! `error.json`. The status file is the hand-off between the async connect
//! flow and HTTP polling, and the ground truth after a crash — writes go
//! through a temp file and an atomic rename so a poller never observes a
//! half-written file.

use super::SessionStatus;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PAIRING_FILE: &str = "pairing.json";
pub const ERROR_FILE: &str = "error.json";

/// Contents of `pairing.json`. The `code` field survives every later
/// mutation; only `status` and `connectedAt` change once the link completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingStatusFile {
    pub session_id: String,
    pub phone_number: String,
    pub code: String,
    /// Unix milliseconds at code generation.
    pub timestamp: i64,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<i64>,
}

/// Contents of `error.json`. Mutually exclusive with `pairing.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorStatusFile {
    pub session_id: String,
    pub phone_number: String,
    pub error: String,
    pub timestamp: i64,
    pub status: SessionStatus,
}

/// Filesystem namespace for per-session state, partitioned by session id so
/// no cross-session locking is needed.
#[derive(Debug, Clone)]
pub struct SessionDirs {
    root: PathBuf,
}

impl SessionDirs {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Create the session's directory (and the root) if missing.
    pub fn ensure(&self, session_id: &str) -> io::Result<PathBuf> {
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Delete the session's directory and everything in it. Missing is fine.
    pub fn delete(&self, session_id: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.session_dir(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.session_dir(session_id).is_dir()
    }

    /// Write `pairing.json`, removing any `error.json` so at most one status
    /// file exists per session.
    pub fn write_pairing(&self, session_id: &str, file: &PairingStatusFile) -> Result<()> {
        let dir = self.ensure(session_id)?;
        write_atomic(&dir.join(PAIRING_FILE), &serde_json::to_vec_pretty(file)?)?;
        remove_if_exists(&dir.join(ERROR_FILE))?;
        Ok(())
    }

    /// Write `error.json`, removing any `pairing.json`.
    pub fn write_error(&self, session_id: &str, file: &ErrorStatusFile) -> Result<()> {
        let dir = self.ensure(session_id)?;
        write_atomic(&dir.join(ERROR_FILE), &serde_json::to_vec_pretty(file)?)?;
        remove_if_exists(&dir.join(PAIRING_FILE))?;
        Ok(())
    }

    pub fn read_pairing(&self, session_id: &str) -> Result<Option<PairingStatusFile>> {
        read_json(&self.session_dir(session_id).join(PAIRING_FILE))
    }

    pub fn read_error(&self, session_id: &str) -> Result<Option<ErrorStatusFile>> {
        read_json(&self.session_dir(session_id).join(ERROR_FILE))
    }

    /// Flip the persisted pairing record to `connected`, preserving the
    /// original `code` for later polling. The only mutation `pairing.json`
    /// ever sees after being written. No-op when the file is absent (the
    /// session was already registered and never paired this run).
    pub fn mark_connected(&self, session_id: &str, at: DateTime<Utc>) -> Result<()> {
        let Some(mut file) = self.read_pairing(session_id)? else {
            return Ok(());
        };
        file.status = SessionStatus::Connected;
        file.connected_at = Some(at.timestamp_millis());
        write_atomic(
            &self.session_dir(session_id).join(PAIRING_FILE),
            &serde_json::to_vec_pretty(&file)?,
        )?;
        Ok(())
    }

    /// Session ids present on disk, whatever the in-memory store thinks.
    pub fn scan(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.path().is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                ids.push(name.to_string());
            }
        }
        Ok(ids)
    }

    /// Delete session directories whose last modification is older than
    /// `max_age`, unconditionally — this covers directories a previous
    /// process left behind. Returns how many were removed.
    pub fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        let mut removed = 0;
        let now = std::time::SystemTime::now();
        for id in self.scan()? {
            let dir = self.session_dir(&id);
            let Ok(modified) = fs::metadata(&dir).and_then(|m| m.modified()) else {
                continue;
            };
            if let Ok(age) = now.duration_since(modified)
                && age >= max_age
            {
                match fs::remove_dir_all(&dir) {
                    Ok(()) => {
                        tracing::info!("cleaned stale session directory {id}");
                        removed += 1;
                    }
                    Err(e) => {
                        tracing::warn!("failed to clean stale directory {id}: {e}");
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// Same-directory temp file plus rename keeps the replace atomic on the
/// filesystems that matter.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pairing(session_id: &str) -> PairingStatusFile {
        PairingStatusFile {
            session_id: session_id.to_string(),
            phone_number: "919876543210".to_string(),
            code: "ABCD-1234".to_string(),
            timestamp: Utc::now().timestamp_millis(),
            status: SessionStatus::Pending,
            connected_at: None,
        }
    }

    fn error(session_id: &str) -> ErrorStatusFile {
        ErrorStatusFile {
            session_id: session_id.to_string(),
            phone_number: "919876543210".to_string(),
            error: "pairing rejected by server".to_string(),
            timestamp: Utc::now().timestamp_millis(),
            status: SessionStatus::Error,
        }
    }

    #[test]
    fn test_status_files_are_mutually_exclusive() {
        let tmp = TempDir::new().expect("tempdir");
        let dirs = SessionDirs::new(tmp.path());

        dirs.write_pairing("s1", &pairing("s1")).expect("write");
        assert!(dirs.session_dir("s1").join(PAIRING_FILE).exists());
        assert!(!dirs.session_dir("s1").join(ERROR_FILE).exists());

        dirs.write_error("s1", &error("s1")).expect("write");
        assert!(!dirs.session_dir("s1").join(PAIRING_FILE).exists());
        assert!(dirs.session_dir("s1").join(ERROR_FILE).exists());

        dirs.write_pairing("s1", &pairing("s1")).expect("write");
        assert!(dirs.session_dir("s1").join(PAIRING_FILE).exists());
        assert!(!dirs.session_dir("s1").join(ERROR_FILE).exists());
    }

    #[test]
    fn test_mark_connected_preserves_code() {
        let tmp = TempDir::new().expect("tempdir");
        let dirs = SessionDirs::new(tmp.path());
        dirs.write_pairing("s1", &pairing("s1")).expect("write");

        dirs.mark_connected("s1", Utc::now()).expect("mark");
        let file = dirs
            .read_pairing("s1")
            .expect("read")
            .expect("file present");
        assert_eq!(file.code, "ABCD-1234");
        assert_eq!(file.status, SessionStatus::Connected);
        assert!(file.connected_at.is_some());
    }

    #[test]
    fn test_mark_connected_without_pairing_file_is_noop() {
        let tmp = TempDir::new().expect("tempdir");
        let dirs = SessionDirs::new(tmp.path());
        dirs.ensure("s1").expect("ensure");
        dirs.mark_connected("s1", Utc::now()).expect("noop");
        assert!(dirs.read_pairing("s1").expect("read").is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let tmp = TempDir::new().expect("tempdir");
        let dirs = SessionDirs::new(tmp.path());
        dirs.ensure("s1").expect("ensure");
        dirs.delete("s1").expect("first delete");
        dirs.delete("s1").expect("second delete is fine");
        assert!(!dirs.exists("s1"));
    }

    #[test]
    fn test_scan_and_sweep() {
        let tmp = TempDir::new().expect("tempdir");
        let dirs = SessionDirs::new(tmp.path());
        dirs.ensure("s1").expect("ensure");
        dirs.ensure("s2").expect("ensure");

        let mut ids = dirs.scan().expect("scan");
        ids.sort();
        assert_eq!(ids, vec!["s1".to_string(), "s2".to_string()]);

        // Nothing is older than an hour yet.
        let removed = dirs
            .sweep_stale(Duration::from_secs(60 * 60))
            .expect("sweep");
        assert_eq!(removed, 0);

        // A zero threshold removes everything.
        let removed = dirs.sweep_stale(Duration::ZERO).expect("sweep");
        assert_eq!(removed, 2);
        assert!(dirs.scan().expect("scan").is_empty());
    }
}
