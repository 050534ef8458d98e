//! Per-session orchestration lanes.
//!
//! Each session owns a lane: a queue of pending turn submissions and at
//! most one active turn, drained by a single task per session so turns
//! within a session never overlap. The lane mode shapes concurrent
//! submissions: `queue` runs them FIFO, `interrupt` cancels the active
//! turn and rejects queued ones, `collect` coalesces submissions into
//! one debounced turn whose events fan out to every caller. `steer` and
//! `steer_backlog` are aliases of `interrupt` and `queue`.
//!
//! Non-default lane configurations are snapshotted to
//! `.drost/orchestration-lanes.json` on every change; in-flight queue
//! contents are memory-only.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use drost_domain::config::{DropPolicy, LaneMode, OrchestrationConfig};
use drost_domain::error::{Error, Result};
use drost_domain::event::StreamEvent;
use drost_domain::runtime_event::GatewayRuntimeEvent;
use drost_domain::CancelToken;

use crate::events::EventHub;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn runner contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Streaming callback for one submission's observable events.
pub type OnEvent = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session_id: String,
    pub provider_id: String,
    pub response: String,
}

/// Executes one serialized turn. Implemented by the turn executor.
#[async_trait::async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run_turn(
        &self,
        session_id: &str,
        input: &str,
        on_event: OnEvent,
        cancel: CancelToken,
    ) -> Result<TurnOutcome>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lane config + persistence
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneConfig {
    pub mode: LaneMode,
    pub cap: usize,
    pub drop_policy: DropPolicy,
    pub collect_debounce_ms: u64,
}

impl From<&OrchestrationConfig> for LaneConfig {
    fn from(cfg: &OrchestrationConfig) -> Self {
        Self {
            mode: cfg.mode,
            cap: cfg.cap,
            drop_policy: cfg.drop_policy,
            collect_debounce_ms: cfg.collect_debounce_ms,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaneSnapshotFile {
    version: u32,
    updated_at: DateTime<Utc>,
    lanes: Vec<LaneSnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LaneSnapshotEntry {
    session_id: String,
    #[serde(flatten)]
    config: LaneConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lane internals
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A waiter's failure travels as `(code, message)` so one failure can
/// resolve several collected waiters.
type WaiterResult = std::result::Result<TurnOutcome, (String, String)>;

struct Pending {
    input: String,
    on_event: OnEvent,
    tx: oneshot::Sender<WaiterResult>,
}

#[derive(Default)]
struct LaneState {
    queue: VecDeque<Pending>,
    active: Option<CancelToken>,
    draining: bool,
    debounce_pending: bool,
}

struct Lane {
    session_id: String,
    cfg: Mutex<LaneConfig>,
    state: Mutex<LaneState>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LaneScheduler {
    runner: Arc<dyn TurnRunner>,
    hub: Arc<EventHub>,
    defaults: LaneConfig,
    snapshot_path: PathBuf,
    lanes: Mutex<HashMap<String, Arc<Lane>>>,
    overrides: Mutex<BTreeMap<String, LaneConfig>>,
}

impl LaneScheduler {
    pub fn new(
        runner: Arc<dyn TurnRunner>,
        hub: Arc<EventHub>,
        orchestration: &OrchestrationConfig,
        state_dir: PathBuf,
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(&state_dir)?;
        let snapshot_path = state_dir.join("orchestration-lanes.json");

        let overrides = if snapshot_path.exists() {
            let raw = std::fs::read_to_string(&snapshot_path)?;
            match serde_json::from_str::<LaneSnapshotFile>(&raw) {
                Ok(file) => file
                    .lanes
                    .into_iter()
                    .map(|e| (e.session_id, e.config))
                    .collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring unreadable lane snapshot");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        Ok(Arc::new(Self {
            runner,
            hub,
            defaults: LaneConfig::from(orchestration),
            snapshot_path,
            lanes: Mutex::new(HashMap::new()),
            overrides: Mutex::new(overrides),
        }))
    }

    fn lane(&self, session_id: &str) -> Arc<Lane> {
        let mut lanes = self.lanes.lock();
        lanes
            .entry(session_id.to_owned())
            .or_insert_with(|| {
                let cfg = self
                    .overrides
                    .lock()
                    .get(session_id)
                    .cloned()
                    .unwrap_or_else(|| self.defaults.clone());
                Arc::new(Lane {
                    session_id: session_id.to_owned(),
                    cfg: Mutex::new(cfg),
                    state: Mutex::new(LaneState::default()),
                })
            })
            .clone()
    }

    /// Reconfigure one session's lane and persist the override set.
    pub fn configure_lane(&self, session_id: &str, config: LaneConfig) -> Result<()> {
        *self.lane(session_id).cfg.lock() = config.clone();
        {
            let mut overrides = self.overrides.lock();
            if config == self.defaults {
                overrides.remove(session_id);
            } else {
                overrides.insert(session_id.to_owned(), config);
            }
        }
        self.persist_overrides()
    }

    pub fn lane_config(&self, session_id: &str) -> LaneConfig {
        self.lane(session_id).cfg.lock().clone()
    }

    pub fn queue_len(&self, session_id: &str) -> usize {
        self.lane(session_id).state.lock().queue.len()
    }

    fn persist_overrides(&self) -> Result<()> {
        let overrides = self.overrides.lock();
        let file = LaneSnapshotFile {
            version: 1,
            updated_at: Utc::now(),
            lanes: overrides
                .iter()
                .map(|(session_id, config)| LaneSnapshotEntry {
                    session_id: session_id.clone(),
                    config: config.clone(),
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        std::fs::write(&self.snapshot_path, json)?;
        Ok(())
    }

    // ── Submission ────────────────────────────────────────────────────

    /// Submit a turn and wait for its outcome under the lane's policy.
    pub async fn submit(
        self: &Arc<Self>,
        session_id: &str,
        input: impl Into<String>,
        on_event: OnEvent,
    ) -> Result<TurnOutcome> {
        let lane = self.lane(session_id);
        let cfg = lane.cfg.lock().clone();
        let mode = cfg.mode.effective();

        let (tx, rx) = oneshot::channel();
        let pending = Pending {
            input: input.into(),
            on_event,
            tx,
        };

        {
            let mut st = lane.state.lock();

            match mode {
                LaneMode::Interrupt => {
                    // Drain the queue, rejecting queued turns, and cancel
                    // the active turn.
                    for dropped in st.queue.drain(..) {
                        let _ = dropped.tx.send(Err((
                            "interrupted".into(),
                            "interrupted by a newer submission".into(),
                        )));
                        self.hub.publish(GatewayRuntimeEvent::LaneDropped {
                            session_id: session_id.to_owned(),
                            reason: "interrupted".into(),
                        });
                    }
                    if let Some(active) = &st.active {
                        active.cancel();
                    }
                    st.queue.push_back(pending);
                }
                LaneMode::Queue | LaneMode::Collect => {
                    if st.queue.len() >= cfg.cap {
                        match cfg.drop_policy {
                            DropPolicy::New => {
                                drop(st);
                                self.hub.publish(GatewayRuntimeEvent::LaneDropped {
                                    session_id: session_id.to_owned(),
                                    reason: "cap exceeded (new)".into(),
                                });
                                return Err(Error::Busy(format!(
                                    "lane cap {} reached for session '{session_id}'",
                                    cfg.cap
                                )));
                            }
                            DropPolicy::Old | DropPolicy::Summarize => {
                                if let Some(oldest) = st.queue.pop_front() {
                                    let _ = oldest.tx.send(Err((
                                        "busy".into(),
                                        format!(
                                            "dropped from lane: cap {} exceeded",
                                            cfg.cap
                                        ),
                                    )));
                                    self.hub.publish(GatewayRuntimeEvent::LaneDropped {
                                        session_id: session_id.to_owned(),
                                        reason: "cap exceeded (old)".into(),
                                    });
                                }
                            }
                        }
                    }
                    st.queue.push_back(pending);
                }
                // `effective()` never returns the aliases.
                LaneMode::Steer | LaneMode::SteerBacklog => unreachable!(),
            }

            self.hub.publish(GatewayRuntimeEvent::LaneAdmitted {
                session_id: session_id.to_owned(),
                queued: st.queue.len(),
            });

            // Kick the drain task.
            if mode == LaneMode::Collect {
                if !st.draining && !st.debounce_pending {
                    st.debounce_pending = true;
                    let scheduler = self.clone();
                    let lane = lane.clone();
                    let debounce = cfg.collect_debounce_ms;
                    tokio::spawn(async move {
                        tokio::time::sleep(std::time::Duration::from_millis(debounce)).await;
                        let start = {
                            let mut st = lane.state.lock();
                            st.debounce_pending = false;
                            if !st.draining && !st.queue.is_empty() {
                                st.draining = true;
                                true
                            } else {
                                false
                            }
                        };
                        if start {
                            scheduler.drain(lane).await;
                        }
                    });
                }
            } else if !st.draining {
                st.draining = true;
                let scheduler = self.clone();
                let lane = lane.clone();
                tokio::spawn(async move {
                    scheduler.drain(lane).await;
                });
            }
        }

        match rx.await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err((code, message))) => Err(Error::from_code(&code, message)),
            Err(_) => Err(Error::Stopping("lane abandoned the waiter".into())),
        }
    }

    /// Single drain task per lane: pops submissions (all of them in
    /// collect mode) and runs them through the turn runner in order.
    async fn drain(self: Arc<Self>, lane: Arc<Lane>) {
        loop {
            let (batch, cancel, _mode) = {
                let mode = lane.cfg.lock().mode.effective();
                let mut st = lane.state.lock();
                if st.queue.is_empty() {
                    st.draining = false;
                    st.active = None;
                    return;
                }
                let batch: Vec<Pending> = if mode == LaneMode::Collect {
                    st.queue.drain(..).collect()
                } else {
                    vec![st.queue.pop_front().expect("queue checked non-empty")]
                };
                let cancel = CancelToken::new();
                st.active = Some(cancel.clone());
                (batch, cancel, mode)
            };

            // Coalesced input: queued inputs joined by blank lines.
            let input = batch
                .iter()
                .map(|p| p.input.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");

            // Events fan out to every collected caller.
            let sinks: Vec<OnEvent> = batch.iter().map(|p| p.on_event.clone()).collect();
            let fan_out: OnEvent = Arc::new(move |event| {
                for sink in &sinks {
                    sink(event);
                }
            });

            self.hub.publish(GatewayRuntimeEvent::LaneStarted {
                session_id: lane.session_id.clone(),
            });

            let result = self
                .runner
                .run_turn(&lane.session_id, &input, fan_out, cancel)
                .await;

            self.hub.publish(GatewayRuntimeEvent::LaneCompleted {
                session_id: lane.session_id.clone(),
                ok: result.is_ok(),
            });

            match result {
                Ok(outcome) => {
                    for p in batch {
                        let _ = p.tx.send(Ok(outcome.clone()));
                    }
                }
                Err(e) => {
                    let code = e.code().to_owned();
                    let message = e.to_string();
                    for p in batch {
                        let _ = p.tx.send(Err((code.clone(), message.clone())));
                    }
                }
            }

            let mut st = lane.state.lock();
            st.active = None;
            if st.queue.is_empty() {
                st.draining = false;
                return;
            }
        }
    }

    /// Reject all queued turns and cancel active ones. Used on stop.
    pub fn cancel_all(&self, reason: &str) {
        let lanes: Vec<Arc<Lane>> = self.lanes.lock().values().cloned().collect();
        for lane in lanes {
            let mut st = lane.state.lock();
            for dropped in st.queue.drain(..) {
                let _ = dropped
                    .tx
                    .send(Err(("stopping".into(), reason.to_owned())));
            }
            if let Some(active) = &st.active {
                active.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Records inputs and sleeps a configurable time per turn.
    struct RecordingRunner {
        delay_ms: u64,
        calls: Mutex<Vec<String>>,
        counter: AtomicUsize,
    }

    impl RecordingRunner {
        fn new(delay_ms: u64) -> Self {
            Self {
                delay_ms,
                calls: Mutex::new(Vec::new()),
                counter: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl TurnRunner for RecordingRunner {
        async fn run_turn(
            &self,
            session_id: &str,
            input: &str,
            _on_event: OnEvent,
            cancel: CancelToken,
        ) -> Result<TurnOutcome> {
            self.calls.lock().push(input.to_owned());
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            let mut waited = 0;
            while waited < self.delay_ms {
                if cancel.is_cancelled() {
                    return Err(Error::Interrupted("interrupted".into()));
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                waited += 5;
            }
            if cancel.is_cancelled() {
                return Err(Error::Interrupted("interrupted".into()));
            }
            Ok(TurnOutcome {
                session_id: session_id.to_owned(),
                provider_id: "p1".into(),
                response: format!("r{n}:{input}"),
            })
        }
    }

    fn scheduler(
        runner: Arc<RecordingRunner>,
        cfg: OrchestrationConfig,
        dir: &TempDir,
    ) -> Arc<LaneScheduler> {
        LaneScheduler::new(
            runner,
            Arc::new(EventHub::new()),
            &cfg,
            dir.path().to_path_buf(),
        )
        .unwrap()
    }

    fn no_events() -> OnEvent {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn queue_mode_runs_in_submission_order() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new(10));
        let lanes = scheduler(runner.clone(), OrchestrationConfig::default(), &dir);

        let a = {
            let lanes = lanes.clone();
            tokio::spawn(async move { lanes.submit("s1", "first", no_events()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let b = {
            let lanes = lanes.clone();
            tokio::spawn(async move { lanes.submit("s1", "second", no_events()).await })
        };

        let ra = a.await.unwrap().unwrap();
        let rb = b.await.unwrap().unwrap();
        assert!(ra.response.contains("first"));
        assert!(rb.response.contains("second"));
        assert_eq!(*runner.calls.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn interrupt_mode_cancels_active_and_runs_new() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new(100));
        let mut cfg = OrchestrationConfig::default();
        cfg.mode = LaneMode::Interrupt;
        cfg.cap = 4;
        let lanes = scheduler(runner.clone(), cfg, &dir);

        let a = {
            let lanes = lanes.clone();
            tokio::spawn(async move { lanes.submit("s1", "slow A", no_events()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let b = lanes.submit("s1", "B", no_events()).await.unwrap();

        let ra = a.await.unwrap();
        assert_eq!(ra.unwrap_err().code(), "interrupted");
        assert!(b.response.contains("B"));
    }

    #[tokio::test]
    async fn collect_mode_coalesces_and_shares_result() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new(5));
        let mut cfg = OrchestrationConfig::default();
        cfg.mode = LaneMode::Collect;
        cfg.collect_debounce_ms = 30;
        let lanes = scheduler(runner.clone(), cfg, &dir);

        let a = {
            let lanes = lanes.clone();
            tokio::spawn(async move { lanes.submit("s1", "one", no_events()).await })
        };
        let b = {
            let lanes = lanes.clone();
            tokio::spawn(async move { lanes.submit("s1", "two", no_events()).await })
        };

        let ra = a.await.unwrap().unwrap();
        let rb = b.await.unwrap().unwrap();
        // One coalesced turn, same result for both callers.
        assert_eq!(ra.response, rb.response);
        assert_eq!(runner.calls.lock().len(), 1);
        assert_eq!(runner.calls.lock()[0], "one\n\ntwo");
    }

    #[tokio::test]
    async fn queue_cap_old_policy_rejects_head() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new(80));
        let mut cfg = OrchestrationConfig::default();
        cfg.cap = 1;
        cfg.drop_policy = DropPolicy::Old;
        let lanes = scheduler(runner.clone(), cfg, &dir);

        // Fills the active slot.
        let active = {
            let lanes = lanes.clone();
            tokio::spawn(async move { lanes.submit("s1", "active", no_events()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Fills the queue (cap 1).
        let queued = {
            let lanes = lanes.clone();
            tokio::spawn(async move { lanes.submit("s1", "queued", no_events()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // Overflows: the queued head is rejected, this one takes its place.
        let newest = lanes.submit("s1", "newest", no_events()).await.unwrap();

        assert!(active.await.unwrap().is_ok());
        let dropped = queued.await.unwrap().unwrap_err();
        assert_eq!(dropped.code(), "busy");
        assert!(newest.response.contains("newest"));
    }

    #[tokio::test]
    async fn queue_cap_new_policy_rejects_submitter() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new(80));
        let mut cfg = OrchestrationConfig::default();
        cfg.cap = 1;
        cfg.drop_policy = DropPolicy::New;
        let lanes = scheduler(runner.clone(), cfg, &dir);

        let active = {
            let lanes = lanes.clone();
            tokio::spawn(async move { lanes.submit("s1", "active", no_events()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let _queued = {
            let lanes = lanes.clone();
            tokio::spawn(async move { lanes.submit("s1", "queued", no_events()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let err = lanes.submit("s1", "rejected", no_events()).await.unwrap_err();
        assert_eq!(err.code(), "busy");
        let _ = active.await.unwrap();
    }

    #[tokio::test]
    async fn steer_aliases_behave_like_interrupt() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new(100));
        let mut cfg = OrchestrationConfig::default();
        cfg.mode = LaneMode::Steer;
        let lanes = scheduler(runner.clone(), cfg, &dir);

        let a = {
            let lanes = lanes.clone();
            tokio::spawn(async move { lanes.submit("s1", "A", no_events()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let b = lanes.submit("s1", "B", no_events()).await.unwrap();

        assert_eq!(a.await.unwrap().unwrap_err().code(), "interrupted");
        assert!(b.response.contains("B"));
    }

    #[tokio::test]
    async fn lane_overrides_persist_and_reload() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new(0));
        let lanes = scheduler(runner.clone(), OrchestrationConfig::default(), &dir);

        let custom = LaneConfig {
            mode: LaneMode::Collect,
            cap: 2,
            drop_policy: DropPolicy::New,
            collect_debounce_ms: 50,
        };
        lanes.configure_lane("s1", custom.clone()).unwrap();

        let raw =
            std::fs::read_to_string(dir.path().join("orchestration-lanes.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["version"], 1);
        assert_eq!(v["lanes"][0]["sessionId"], "s1");
        assert_eq!(v["lanes"][0]["mode"], "collect");

        // A fresh scheduler restores the override.
        let reloaded = scheduler(runner, OrchestrationConfig::default(), &dir);
        assert_eq!(reloaded.lane_config("s1"), custom);
    }

    #[tokio::test]
    async fn cancel_all_rejects_waiters_with_stopping() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new(200));
        let lanes = scheduler(runner, OrchestrationConfig::default(), &dir);

        let active = {
            let lanes = lanes.clone();
            tokio::spawn(async move { lanes.submit("s1", "long", no_events()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let queued = {
            let lanes = lanes.clone();
            tokio::spawn(async move { lanes.submit("s1", "waiting", no_events()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        lanes.cancel_all("gateway stopping");

        assert_eq!(active.await.unwrap().unwrap_err().code(), "interrupted");
        assert_eq!(queued.await.unwrap().unwrap_err().code(), "stopping");
    }
}
