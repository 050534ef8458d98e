//! Session lifecycle: ensure / create / continuity, plus the
//! in-memory turn-in-progress flags.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use drost_domain::error::{Error, Result};
use drost_domain::message::HistoryMessage;
use drost_domain::Role;
use drost_providers::ProviderManager;
use drost_sessions::retention::ProtectedFn;
use drost_sessions::{OriginIdentity, SessionRecord, SessionStore};

#[derive(Debug, Default, Clone)]
pub struct EnsureOptions {
    pub title: Option<String>,
    pub origin: Option<OriginIdentity>,
}

#[derive(Debug, Default, Clone)]
pub struct CreateOptions {
    pub channel: Option<String>,
    pub title: Option<String>,
    pub from_session_id: Option<String>,
    pub origin: Option<OriginIdentity>,
}

pub struct SessionRuntime {
    store: Arc<SessionStore>,
    providers: Arc<ProviderManager>,
    turn_flags: Mutex<HashSet<String>>,
}

impl SessionRuntime {
    pub fn new(store: Arc<SessionStore>, providers: Arc<ProviderManager>) -> Self {
        Self {
            store,
            providers,
            turn_flags: Mutex::new(HashSet::new()),
        }
    }

    // ── Turn flags ────────────────────────────────────────────────────

    pub fn begin_turn(&self, session_id: &str) {
        self.turn_flags.lock().insert(session_id.to_owned());
    }

    pub fn end_turn(&self, session_id: &str) {
        self.turn_flags.lock().remove(session_id);
    }

    pub fn turn_in_progress(&self, session_id: &str) -> bool {
        self.turn_flags.lock().contains(session_id)
    }

    /// Retention guard: a session with a turn in progress is protected.
    pub fn protected_fn(self: &Arc<Self>) -> ProtectedFn {
        let runtime = self.clone();
        Arc::new(move |session_id| runtime.turn_in_progress(session_id))
    }

    // ── Ensure / create ───────────────────────────────────────────────

    /// Load the session or allocate it with the default provider, merge
    /// metadata, and persist immediately. Idempotent.
    pub fn ensure_session(&self, session_id: &str, opts: EnsureOptions) -> Result<SessionRecord> {
        if session_id.is_empty() {
            return Err(Error::InvalidRequest("session id must not be empty".into()));
        }

        let (existing, diagnostics) = self.store.load(session_id)?;
        for d in &diagnostics {
            tracing::warn!(session_id, code = d.code, message = %d.message, "session load diagnostic");
        }

        let mut record = match existing {
            Some(record) => record,
            None => {
                let provider = self.providers.default_provider_id()?;
                tracing::info!(session_id, provider_id = %provider, "session created");
                SessionRecord::new(session_id, provider)
            }
        };

        let mut dirty = record.revision == 0;
        if record.metadata.title.is_none() && opts.title.is_some() {
            record.metadata.title = opts.title;
            dirty = true;
        }
        if record.metadata.origin.is_none() && opts.origin.is_some() {
            record.metadata.origin = opts.origin;
            dirty = true;
        }
        if dirty {
            record.touch();
            self.store.save(&mut record)?;
        }
        Ok(record)
    }

    /// Mint a new session with a unique timestamped id. When
    /// `from_session_id` resolves, a best-effort continuity job copies
    /// a summary of the source into the new session's opening message.
    pub fn create_session(self: &Arc<Self>, opts: CreateOptions) -> Result<SessionRecord> {
        let channel = opts
            .channel
            .clone()
            .or_else(|| opts.origin.as_ref().map(|o| o.channel.clone()))
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "session".into());
        let slug: String = channel
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();

        let stamp = Utc::now().format("%Y%m%d-%H%M%S-%3f");
        let base = format!("{slug}-{stamp}");
        let mut session_id = base.clone();
        let mut n = 1;
        while self.store.exists(&session_id) {
            session_id = format!("{base}-{n}");
            n += 1;
        }

        let record = self.ensure_session(
            &session_id,
            EnsureOptions {
                title: opts.title,
                origin: opts.origin,
            },
        )?;

        if let Some(source_id) = opts.from_session_id {
            if source_id != session_id && self.store.exists(&source_id) {
                self.spawn_continuity_job(source_id, session_id);
            }
        }
        Ok(record)
    }

    /// Fire-and-forget: append one carry-over summary message to the
    /// target, at most once.
    fn spawn_continuity_job(self: &Arc<Self>, source_id: String, target_id: String) {
        let runtime = self.clone();
        tokio::spawn(async move {
            if let Err(e) = runtime.run_continuity(&source_id, &target_id) {
                tracing::warn!(
                    source = %source_id,
                    target = %target_id,
                    error = %e,
                    "continuity job failed"
                );
            }
        });
    }

    fn run_continuity(&self, source_id: &str, target_id: &str) -> Result<()> {
        let (source, _) = self.store.load(source_id)?;
        let Some(source) = source else {
            return Ok(());
        };
        // Nothing worth carrying over without assistant content.
        if source.last_assistant_text().is_none() {
            return Ok(());
        }

        let (target, _) = self.store.load(target_id)?;
        let Some(mut target) = target else {
            return Ok(());
        };
        let marker = format!("[continued from {source_id}]");
        if target
            .history
            .iter()
            .any(|m| m.content.starts_with(&marker))
        {
            return Ok(());
        }

        let tail: Vec<String> = source
            .history
            .iter()
            .rev()
            .filter(|m| m.role != Role::System)
            .take(4)
            .map(|m| format!("{:?}: {}", m.role, truncate(&m.content, 200)))
            .collect();
        let mut summary = tail;
        summary.reverse();

        target.history.push(HistoryMessage::system(format!(
            "{marker} recent exchange:\n{}",
            summary.join("\n")
        )));
        target.touch();
        self.store.save(&mut target)?;
        tracing::info!(source = source_id, target = target_id, "continuity summary appended");
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_owned()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drost_domain::config::{
        HistoryLimits, LockSettings, ProviderProfile, ProvidersConfig,
    };
    use drost_providers::StaticTokenResolver;
    use tempfile::TempDir;

    fn runtime(dir: &TempDir) -> Arc<SessionRuntime> {
        let store = Arc::new(
            SessionStore::new(dir.path(), LockSettings::default(), HistoryLimits::default())
                .unwrap(),
        );
        let cfg = ProvidersConfig {
            profiles: vec![ProviderProfile {
                id: "p1".into(),
                kind: "echo".into(),
                adapter_id: "echo".into(),
                model: "echo-1".into(),
                base_url: None,
                auth_profile_id: String::new(),
            }],
            ..Default::default()
        };
        let providers = Arc::new(ProviderManager::new(
            &cfg,
            false,
            Arc::new(StaticTokenResolver::default()),
        ));
        Arc::new(SessionRuntime::new(store, providers))
    }

    #[test]
    fn ensure_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let rt = runtime(&dir);

        let first = rt
            .ensure_session(
                "s1",
                EnsureOptions {
                    title: Some("hello".into()),
                    origin: None,
                },
            )
            .unwrap();
        let second = rt.ensure_session("s1", EnsureOptions::default()).unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(second.metadata.title.as_deref(), Some("hello"));
        assert_eq!(second.metadata.created_at, first.metadata.created_at);
        assert!(second.history.is_empty());
    }

    #[test]
    fn ensure_rejects_empty_id() {
        let dir = TempDir::new().unwrap();
        let rt = runtime(&dir);
        let err = rt.ensure_session("", EnsureOptions::default()).unwrap_err();
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn create_mints_channel_stamped_ids() {
        let dir = TempDir::new().unwrap();
        let rt = runtime(&dir);
        let rec = rt
            .create_session(CreateOptions {
                channel: Some("Telegram".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(rec.session_id.starts_with("telegram-"));
        assert_eq!(rec.active_provider_id, "p1");
    }

    #[tokio::test]
    async fn continuity_appends_summary_at_most_once() {
        let dir = TempDir::new().unwrap();
        let rt = runtime(&dir);

        // A source with an assistant reply.
        let mut source = rt.ensure_session("old", EnsureOptions::default()).unwrap();
        source.history.push(HistoryMessage::user("hi"));
        source.history.push(HistoryMessage::assistant("hello!"));
        source.touch();
        rt.store.save(&mut source).unwrap();

        let target = rt.ensure_session("new", EnsureOptions::default()).unwrap();
        rt.run_continuity("old", &target.session_id).unwrap();
        rt.run_continuity("old", &target.session_id).unwrap();

        let (reloaded, _) = rt.store.load("new").unwrap();
        let reloaded = reloaded.unwrap();
        let markers = reloaded
            .history
            .iter()
            .filter(|m| m.content.contains("[continued from old]"))
            .count();
        assert_eq!(markers, 1);
    }

    #[test]
    fn turn_flags_track_progress() {
        let dir = TempDir::new().unwrap();
        let rt = runtime(&dir);
        assert!(!rt.turn_in_progress("s1"));
        rt.begin_turn("s1");
        assert!(rt.turn_in_progress("s1"));
        rt.end_turn("s1");
        assert!(!rt.turn_in_progress("s1"));
    }
}
