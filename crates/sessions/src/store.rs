//! The durable session store.
//!
//! Layout under the session directory, one set per session id
//! (url-encoded in the filename):
//! - `<id>.json` — snapshot, written via temp-file + atomic rename
//! - `<id>.jsonl` — append-only event log, replayed onto the snapshot
//! - `<id>.full.jsonl` — optional full-history rollups
//! - `<id>.lock` — advisory lock holding the owner pid
//!
//! Readers may read without the lock but must tolerate observing a
//! snapshot plus a partial log tail; every mutating operation takes the
//! per-session lock.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use drost_domain::config::{HistoryLimits, LockSettings};
use drost_domain::error::{Error, Result};
use drost_domain::message::HistoryMessage;

use crate::history::{trim_history_collect, TrimReport};
use crate::lock::SessionLock;
use crate::record::{SessionLogRecord, SessionRecord, LOG_MESSAGE_APPENDED};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionStore {
    dir: PathBuf,
    lock_settings: LockSettings,
    history_limits: HistoryLimits,
}

/// Non-fatal problem observed while loading a session.
#[derive(Debug, Clone)]
pub struct LoadDiagnostic {
    pub code: &'static str,
    pub message: String,
}

/// Cheap per-session index entry.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndexEntry {
    pub session_id: String,
    pub active_provider_id: String,
    pub last_activity_at: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub messages: usize,
}

impl SessionStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        lock_settings: LockSettings,
        history_limits: HistoryLimits,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        tracing::info!(path = %dir.display(), "session store ready");
        Ok(Self {
            dir,
            lock_settings,
            history_limits,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn history_limits(&self) -> &HistoryLimits {
        &self.history_limits
    }

    // ── Paths ─────────────────────────────────────────────────────────

    fn snapshot_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", encode_id(id)))
    }
    fn log_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", encode_id(id)))
    }
    fn lock_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", encode_id(id)))
    }
    fn full_log_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.full.jsonl", encode_id(id)))
    }

    /// Acquire this session's advisory lock.
    pub fn lock(&self, id: &str) -> Result<SessionLock> {
        SessionLock::acquire(&self.lock_path(id), &self.lock_settings)
    }

    // ── Load ──────────────────────────────────────────────────────────

    /// Read the snapshot and replay the log tail onto it.
    ///
    /// Returns a usable record when possible; problems surface as
    /// diagnostics (`malformed_snapshot` quarantines the bad file,
    /// `truncated_log` stops replay at the last valid line).
    pub fn load(&self, id: &str) -> Result<(Option<SessionRecord>, Vec<LoadDiagnostic>)> {
        let mut diagnostics = Vec::new();
        let snap_path = self.snapshot_path(id);

        let mut record: Option<SessionRecord> = None;
        if snap_path.exists() {
            let raw = std::fs::read_to_string(&snap_path)?;
            match serde_json::from_str::<SessionRecord>(&raw) {
                Ok(rec) => record = Some(rec),
                Err(e) => {
                    let quarantine = self.dir.join(format!(
                        "{}.malformed.{}",
                        encode_id(id),
                        Utc::now().timestamp_millis()
                    ));
                    let _ = std::fs::rename(&snap_path, &quarantine);
                    tracing::warn!(
                        session_id = id,
                        quarantine = %quarantine.display(),
                        error = %e,
                        "quarantined malformed snapshot"
                    );
                    diagnostics.push(LoadDiagnostic {
                        code: "malformed_snapshot",
                        message: format!("{e}; quarantined to {}", quarantine.display()),
                    });
                }
            }
        }

        // Replay the log tail newer than the snapshot revision.
        let log_path = self.log_path(id);
        if log_path.exists() {
            if let Some(rec) = record.as_mut() {
                let raw = std::fs::read_to_string(&log_path)?;
                for line in raw.lines() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let entry: SessionLogRecord = match serde_json::from_str(line) {
                        Ok(e) => e,
                        Err(e) => {
                            diagnostics.push(LoadDiagnostic {
                                code: "truncated_log",
                                message: format!("stopping replay at invalid line: {e}"),
                            });
                            break;
                        }
                    };
                    if entry.revision <= rec.revision {
                        continue;
                    }
                    if entry.kind == LOG_MESSAGE_APPENDED {
                        match serde_json::from_value::<HistoryMessage>(entry.payload.clone()) {
                            Ok(msg) => rec.history.push(msg),
                            Err(e) => {
                                diagnostics.push(LoadDiagnostic {
                                    code: "truncated_log",
                                    message: format!("unreplayable message event: {e}"),
                                });
                                break;
                            }
                        }
                    }
                    rec.revision = entry.revision;
                }
            }
        }

        Ok((record, diagnostics))
    }

    // ── Save ──────────────────────────────────────────────────────────

    /// Trim history to the configured budget, then persist the snapshot
    /// atomically and clear the (now folded-in) event log.
    pub fn save(&self, record: &mut SessionRecord) -> Result<TrimReport> {
        let _lock = self.lock(&record.session_id)?;
        self.save_locked(record)
    }

    /// Save under an already-held lock.
    pub fn save_locked(&self, record: &mut SessionRecord) -> Result<TrimReport> {
        let (report, dropped) =
            trim_history_collect(&mut record.history, &self.history_limits);
        // Trimmed messages leave the snapshot but survive in the
        // full-history rollup.
        for message in &dropped {
            self.append_full_rollup(&record.session_id, serde_json::to_value(message)?)?;
        }
        record.updated_at = Utc::now();

        let path = self.snapshot_path(&record.session_id);
        let json = serde_json::to_string_pretty(record)?;
        write_atomic(&path, json.as_bytes())?;

        // The snapshot now covers every logged revision; reset the log.
        let log_path = self.log_path(&record.session_id);
        if log_path.exists() {
            File::create(&log_path)?;
        }

        Ok(report)
    }

    // ── Event log ─────────────────────────────────────────────────────

    /// Append one event record. `sync` forces an fsync — callers pass
    /// true on policy boundaries (end of turn).
    pub fn append_event(
        &self,
        id: &str,
        kind: &str,
        payload: serde_json::Value,
        revision: u64,
        sync: bool,
    ) -> Result<()> {
        let entry = SessionLogRecord {
            timestamp: Utc::now(),
            kind: kind.to_owned(),
            payload,
            revision,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(id))?;
        file.write_all(line.as_bytes())?;
        if sync {
            file.sync_data()?;
        }
        Ok(())
    }

    /// Append a full-history rollup line (`<id>.full.jsonl`).
    pub fn append_full_rollup(&self, id: &str, payload: serde_json::Value) -> Result<()> {
        let mut line = serde_json::to_string(&serde_json::json!({
            "timestamp": Utc::now(),
            "payload": payload,
        }))?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.full_log_path(id))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    // ── Index / delete / rename ───────────────────────────────────────

    pub fn list_index(&self) -> Result<Vec<SessionIndexEntry>> {
        let mut entries = Vec::new();
        for dirent in std::fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if stem.contains(".malformed.") || stem.ends_with(".full") {
                continue;
            }
            let raw = match std::fs::read_to_string(dirent.path()) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if let Ok(rec) = serde_json::from_str::<SessionRecord>(&raw) {
                entries.push(SessionIndexEntry {
                    session_id: rec.session_id,
                    active_provider_id: rec.active_provider_id,
                    last_activity_at: rec.metadata.last_activity_at,
                    title: rec.metadata.title,
                    messages: rec.history.len(),
                });
            }
        }
        entries.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(entries)
    }

    pub fn exists(&self, id: &str) -> bool {
        self.snapshot_path(id).exists()
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        if !self.exists(id) {
            return Err(Error::NotFound(format!("session '{id}'")));
        }
        {
            let _lock = self.lock(id)?;
            for path in [
                self.snapshot_path(id),
                self.log_path(id),
                self.full_log_path(id),
            ] {
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
            }
        }
        tracing::info!(session_id = id, "session deleted");
        Ok(())
    }

    pub fn rename(&self, from: &str, to: &str, overwrite: bool) -> Result<()> {
        if !self.exists(from) {
            return Err(Error::NotFound(format!("session '{from}'")));
        }
        if self.exists(to) && !overwrite {
            return Err(Error::Conflict(format!("session '{to}' already exists")));
        }

        let _from_lock = self.lock(from)?;
        let _to_lock = self.lock(to)?;

        let (record, _) = self.load(from)?;
        let mut record =
            record.ok_or_else(|| Error::NotFound(format!("session '{from}'")))?;
        record.session_id = to.to_owned();
        record.touch();

        let json = serde_json::to_string_pretty(&record)?;
        write_atomic(&self.snapshot_path(to), json.as_bytes())?;

        for (src, dst) in [
            (self.log_path(from), self.log_path(to)),
            (self.full_log_path(from), self.full_log_path(to)),
        ] {
            if src.exists() {
                std::fs::rename(&src, &dst)?;
            }
        }
        std::fs::remove_file(self.snapshot_path(from))?;
        Ok(())
    }

    // ── Export / import / archive ─────────────────────────────────────

    pub fn export(&self, id: &str) -> Result<SessionRecord> {
        let (record, _) = self.load(id)?;
        record.ok_or_else(|| Error::NotFound(format!("session '{id}'")))
    }

    pub fn import(&self, mut record: SessionRecord, overwrite: bool) -> Result<()> {
        if self.exists(&record.session_id) && !overwrite {
            return Err(Error::Conflict(format!(
                "session '{}' already exists",
                record.session_id
            )));
        }
        self.save(&mut record)?;
        Ok(())
    }

    /// Move a session's files into the `archive/` subdirectory.
    pub fn archive(&self, id: &str) -> Result<()> {
        if !self.exists(id) {
            return Err(Error::NotFound(format!("session '{id}'")));
        }
        let archive_dir = self.dir.join("archive");
        std::fs::create_dir_all(&archive_dir)?;

        let _lock = self.lock(id)?;
        for path in [
            self.snapshot_path(id),
            self.log_path(id),
            self.full_log_path(id),
        ] {
            if path.exists() {
                let dest = archive_dir.join(path.file_name().unwrap_or_default());
                std::fs::rename(&path, &dest)?;
            }
        }
        tracing::info!(session_id = id, "session archived");
        Ok(())
    }

    /// Total bytes used by live (non-archived) session files.
    pub fn total_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for dirent in std::fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            if dirent.file_type()?.is_file() {
                total += dirent.metadata()?.len();
            }
        }
        Ok(total)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Percent-encode a session id for use as a filename. Everything
/// outside `[A-Za-z0-9_-]` is encoded, so ids can never traverse paths.
pub fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'_' | b'-' => out.push(byte as char),
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// Write bytes via a temp sibling + atomic rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_data()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drost_domain::config::HistoryLimits;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SessionStore {
        SessionStore::new(dir.path(), LockSettings::default(), HistoryLimits::default()).unwrap()
    }

    #[test]
    fn encode_id_escapes_separators() {
        assert_eq!(encode_id("tg-42"), "tg-42");
        assert_eq!(encode_id("a/b"), "a%2Fb");
        assert_eq!(encode_id(".."), "%2E%2E");
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut rec = SessionRecord::new("s1", "p1");
        rec.history.push(HistoryMessage::user("ping"));
        rec.history.push(HistoryMessage::assistant("pong"));
        rec.touch();
        store.save(&mut rec).unwrap();

        let (loaded, diags) = store.load("s1").unwrap();
        let loaded = loaded.unwrap();
        assert!(diags.is_empty());
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded.active_provider_id, "p1");
        assert_eq!(loaded.revision, rec.revision);
    }

    #[test]
    fn log_tail_replays_onto_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut rec = SessionRecord::new("s1", "p1");
        rec.touch(); // revision 1
        store.save(&mut rec).unwrap();

        // Two events after the snapshot, as a crashed writer would leave.
        store
            .append_event(
                "s1",
                LOG_MESSAGE_APPENDED,
                serde_json::to_value(HistoryMessage::user("hi")).unwrap(),
                2,
                false,
            )
            .unwrap();
        store
            .append_event(
                "s1",
                LOG_MESSAGE_APPENDED,
                serde_json::to_value(HistoryMessage::assistant("hello")).unwrap(),
                3,
                true,
            )
            .unwrap();

        let (loaded, diags) = store.load("s1").unwrap();
        let loaded = loaded.unwrap();
        assert!(diags.is_empty());
        assert_eq!(loaded.revision, 3);
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded.history[1].content, "hello");
    }

    #[test]
    fn invalid_log_tail_stops_replay_with_diagnostic() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut rec = SessionRecord::new("s1", "p1");
        rec.touch();
        store.save(&mut rec).unwrap();

        store
            .append_event(
                "s1",
                LOG_MESSAGE_APPENDED,
                serde_json::to_value(HistoryMessage::user("ok")).unwrap(),
                2,
                false,
            )
            .unwrap();
        // A torn write at the end of the log.
        let log = dir.path().join("s1.jsonl");
        let mut f = OpenOptions::new().append(true).open(&log).unwrap();
        f.write_all(b"{\"timestamp\":\"2026-01-").unwrap();

        let (loaded, diags) = store.load("s1").unwrap();
        let loaded = loaded.unwrap();
        assert_eq!(loaded.history.len(), 1);
        assert!(diags.iter().any(|d| d.code == "truncated_log"));
    }

    #[test]
    fn malformed_snapshot_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(dir.path().join("s1.json"), "{not json").unwrap();

        let (loaded, diags) = store.load("s1").unwrap();
        assert!(loaded.is_none());
        assert!(diags.iter().any(|d| d.code == "malformed_snapshot"));
        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".malformed."));
        assert!(quarantined);
    }

    #[test]
    fn export_import_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut rec = SessionRecord::new("s1", "p1");
        rec.pending_provider_id = Some("p2".into());
        rec.history.push(HistoryMessage::user("a"));
        rec.touch();
        store.save(&mut rec).unwrap();

        let exported = store.export("s1").unwrap();
        store.delete("s1").unwrap();
        store.import(exported.clone(), false).unwrap();

        let back = store.export("s1").unwrap();
        assert_eq!(back.history, exported.history);
        assert_eq!(back.metadata.created_at, exported.metadata.created_at);
        assert_eq!(back.active_provider_id, exported.active_provider_id);
        assert_eq!(back.pending_provider_id, exported.pending_provider_id);
    }

    #[test]
    fn import_without_overwrite_conflicts() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut rec = SessionRecord::new("s1", "p1");
        store.save(&mut rec).unwrap();

        let err = store.import(rec.clone(), false).unwrap_err();
        assert_eq!(err.code(), "conflict");
        assert!(store.import(rec, true).is_ok());
    }

    #[test]
    fn rename_moves_all_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut rec = SessionRecord::new("s1", "p1");
        store.save(&mut rec).unwrap();
        store
            .append_event("s1", "note", serde_json::json!({}), 1, false)
            .unwrap();

        store.rename("s1", "s2", false).unwrap();
        assert!(!store.exists("s1"));
        let renamed = store.export("s2").unwrap();
        assert_eq!(renamed.session_id, "s2");
    }

    #[test]
    fn rename_conflict_without_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut a = SessionRecord::new("a", "p1");
        let mut b = SessionRecord::new("b", "p1");
        store.save(&mut a).unwrap();
        store.save(&mut b).unwrap();

        let err = store.rename("a", "b", false).unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn trimmed_history_rolls_into_full_log() {
        let dir = TempDir::new().unwrap();
        let limits = HistoryLimits {
            max_messages: Some(2),
            max_characters: None,
        };
        let store =
            SessionStore::new(dir.path(), LockSettings::default(), limits).unwrap();

        let mut rec = SessionRecord::new("s1", "p1");
        for i in 0..3 {
            rec.history.push(HistoryMessage::user(format!("u{i}")));
            rec.history.push(HistoryMessage::assistant(format!("a{i}")));
        }
        rec.touch();
        let report = store.save(&mut rec).unwrap();

        assert!(report.trimmed);
        assert_eq!(rec.history.len(), 2);
        assert_eq!(rec.history[1].content, "a2");

        let rollup = std::fs::read_to_string(dir.path().join("s1.full.jsonl")).unwrap();
        assert_eq!(rollup.lines().count(), 4);
        assert!(rollup.contains("u0"));
        assert!(rollup.contains("a1"));
    }

    #[test]
    fn archive_moves_files_out_of_index() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut rec = SessionRecord::new("s1", "p1");
        store.save(&mut rec).unwrap();

        store.archive("s1").unwrap();
        assert!(!store.exists("s1"));
        assert!(dir.path().join("archive").join("s1.json").exists());
        assert!(store.list_index().unwrap().is_empty());
    }
}
