//! Background retention sweep.
//!
//! Enforces `{max_age_days, max_sessions, max_total_bytes,
//! archive_after_idle_ms}` against the session store. Selection is by
//! oldest `lastActivityAt`; `archive_first` archives instead of
//! deleting; a session with a turn in progress is never touched.

use std::sync::Arc;

use chrono::Utc;

use drost_domain::config::RetentionSettings;
use drost_domain::error::Result;

use crate::store::SessionStore;

pub type ProtectedFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Default, Clone)]
pub struct SweepReport {
    pub archived: Vec<String>,
    pub deleted: Vec<String>,
}

pub struct RetentionSweeper {
    store: Arc<SessionStore>,
    policy: RetentionSettings,
}

impl RetentionSweeper {
    pub fn new(store: Arc<SessionStore>, policy: RetentionSettings) -> Self {
        Self { store, policy }
    }

    /// Run one sweep pass.
    pub fn run_once(&self, protected: &ProtectedFn) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let now = Utc::now();

        // Idle archive pass.
        if let Some(idle_ms) = self.policy.archive_after_idle_ms {
            for entry in self.oldest_first()? {
                if protected(&entry.session_id) {
                    continue;
                }
                let idle = (now - entry.last_activity_at).num_milliseconds().max(0) as u64;
                if idle > idle_ms {
                    self.store.archive(&entry.session_id)?;
                    report.archived.push(entry.session_id);
                }
            }
        }

        // Age limit.
        if let Some(days) = self.policy.max_age_days {
            for entry in self.oldest_first()? {
                if protected(&entry.session_id) {
                    continue;
                }
                let age_days = (now - entry.last_activity_at).num_days().max(0) as u64;
                if age_days > days {
                    self.evict(&entry.session_id, &mut report)?;
                }
            }
        }

        // Session-count limit.
        if let Some(max) = self.policy.max_sessions {
            let mut entries = self.oldest_first()?;
            while entries.len() > max {
                let entry = entries.remove(0);
                if protected(&entry.session_id) {
                    continue;
                }
                self.evict(&entry.session_id, &mut report)?;
            }
        }

        // Byte-budget limit.
        if let Some(max_bytes) = self.policy.max_total_bytes {
            let mut entries = self.oldest_first()?;
            while self.store.total_bytes()? > max_bytes && !entries.is_empty() {
                let entry = entries.remove(0);
                if protected(&entry.session_id) {
                    continue;
                }
                self.evict(&entry.session_id, &mut report)?;
            }
        }

        if !report.archived.is_empty() || !report.deleted.is_empty() {
            tracing::info!(
                archived = report.archived.len(),
                deleted = report.deleted.len(),
                "retention sweep evicted sessions"
            );
        }
        Ok(report)
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn(self: Arc<Self>, protected: ProtectedFn) -> tokio::task::JoinHandle<()> {
        let interval_ms = self.policy.sweep_interval_ms.max(1_000);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            // The first tick fires immediately; skip it so startup isn't
            // racing session hydration.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once(&protected) {
                    tracing::warn!(error = %e, "retention sweep failed");
                }
            }
        })
    }

    fn oldest_first(&self) -> Result<Vec<crate::store::SessionIndexEntry>> {
        let mut entries = self.store.list_index()?;
        entries.sort_by(|a, b| a.last_activity_at.cmp(&b.last_activity_at));
        Ok(entries)
    }

    fn evict(&self, session_id: &str, report: &mut SweepReport) -> Result<()> {
        if self.policy.archive_first {
            self.store.archive(session_id)?;
            report.archived.push(session_id.to_owned());
        } else {
            self.store.delete(session_id)?;
            report.deleted.push(session_id.to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SessionRecord;
    use drost_domain::config::{HistoryLimits, LockSettings};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Arc<SessionStore> {
        Arc::new(
            SessionStore::new(dir.path(), LockSettings::default(), HistoryLimits::default())
                .unwrap(),
        )
    }

    fn save_with_age(store: &SessionStore, id: &str, age_days: i64) {
        let mut rec = SessionRecord::new(id, "p1");
        store.save(&mut rec).unwrap();
        // Rewrite the snapshot with a back-dated activity timestamp.
        let mut rec = store.export(id).unwrap();
        rec.metadata.last_activity_at = Utc::now() - chrono::Duration::days(age_days);
        let json = serde_json::to_string_pretty(&rec).unwrap();
        std::fs::write(
            store.dir().join(format!("{id}.json")),
            json,
        )
        .unwrap();
    }

    fn unprotected() -> ProtectedFn {
        Arc::new(|_| false)
    }

    #[test]
    fn age_limit_archives_old_sessions() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        save_with_age(&store, "old", 30);
        save_with_age(&store, "fresh", 0);

        let policy = RetentionSettings {
            max_age_days: Some(7),
            ..Default::default()
        };
        let sweeper = RetentionSweeper::new(store.clone(), policy);
        let report = sweeper.run_once(&unprotected()).unwrap();

        assert_eq!(report.archived, vec!["old".to_string()]);
        assert!(store.exists("fresh"));
        assert!(!store.exists("old"));
    }

    #[test]
    fn session_count_limit_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        save_with_age(&store, "a", 3);
        save_with_age(&store, "b", 2);
        save_with_age(&store, "c", 1);

        let policy = RetentionSettings {
            max_sessions: Some(2),
            archive_first: false,
            ..Default::default()
        };
        let sweeper = RetentionSweeper::new(store.clone(), policy);
        let report = sweeper.run_once(&unprotected()).unwrap();

        assert_eq!(report.deleted, vec!["a".to_string()]);
        assert!(store.exists("b") && store.exists("c"));
    }

    #[test]
    fn in_progress_sessions_are_protected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        save_with_age(&store, "busy", 30);

        let policy = RetentionSettings {
            max_age_days: Some(7),
            ..Default::default()
        };
        let sweeper = RetentionSweeper::new(store.clone(), policy);
        let protected: ProtectedFn = Arc::new(|id| id == "busy");
        let report = sweeper.run_once(&protected).unwrap();

        assert!(report.archived.is_empty());
        assert!(store.exists("busy"));
    }
}
