//! Runtime event hub and observability sinks.
//!
//! The hub keeps a bounded in-memory ring (last 500 events) for
//! control-API subscribers and appends every event synchronously to the
//! on-disk sink — the sink is never allowed to drop, SSE clients are.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use drost_domain::error::Result;
use drost_domain::runtime_event::GatewayRuntimeEvent;

const RING_CAPACITY: usize = 500;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEventRecord {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: GatewayRuntimeEvent,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSONL sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only JSONL file writer.
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn append<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// The three append-only observability streams under
/// `.drost/observability/`.
pub struct ObservabilitySinks {
    pub enabled: bool,
    pub runtime_events: JsonlSink,
    pub tool_traces: JsonlSink,
    pub usage_events: JsonlSink,
}

impl ObservabilitySinks {
    pub fn new(state_dir: &Path, enabled: bool) -> Result<Self> {
        let dir = state_dir.join("observability");
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            enabled,
            runtime_events: JsonlSink::new(dir.join("runtime-events.jsonl")),
            tool_traces: JsonlSink::new(dir.join("tool-traces.jsonl")),
            usage_events: JsonlSink::new(dir.join("usage-events.jsonl")),
        })
    }

    pub fn tool_trace<T: serde::Serialize>(&self, value: &T) {
        if self.enabled {
            if let Err(e) = self.tool_traces.append(value) {
                tracing::warn!(error = %e, "tool trace append failed");
            }
        }
    }

    pub fn usage_event<T: serde::Serialize>(&self, value: &T) {
        if self.enabled {
            if let Err(e) = self.usage_events.append(value) {
                tracing::warn!(error = %e, "usage event append failed");
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event hub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EventHub {
    ring: Mutex<VecDeque<RuntimeEventRecord>>,
    seq: AtomicU64,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<RuntimeEventRecord>>>,
    /// Synchronous on-disk sink; never dropped when set.
    sink: Mutex<Option<JsonlSink>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            ring: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            seq: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
        }
    }

    pub fn set_sink(&self, sink: JsonlSink) {
        *self.sink.lock() = Some(sink);
    }

    /// Publish an event: ring, disk sink, live subscribers, tracing.
    pub fn publish(&self, event: GatewayRuntimeEvent) {
        event.emit();
        let record = RuntimeEventRecord {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            timestamp: Utc::now(),
            event,
        };

        {
            let mut ring = self.ring.lock();
            if ring.len() == RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(record.clone());
        }

        if let Some(sink) = self.sink.lock().as_ref() {
            if let Err(e) = sink.append(&record) {
                tracing::warn!(error = %e, "runtime event sink append failed");
            }
        }

        // Prune subscribers whose receiver is gone.
        self.subscribers
            .lock()
            .retain(|tx| tx.send(record.clone()).is_ok());
    }

    /// Current ring contents, oldest first.
    pub fn snapshot(&self) -> Vec<RuntimeEventRecord> {
        self.ring.lock().iter().cloned().collect()
    }

    /// Snapshot plus a live receiver that sees each later event once.
    pub fn subscribe(
        &self,
    ) -> (
        Vec<RuntimeEventRecord>,
        mpsc::UnboundedReceiver<RuntimeEventRecord>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        // Hold the ring lock while registering so no event lands between
        // the snapshot and the subscription.
        let ring = self.ring.lock();
        let snapshot = ring.iter().cloned().collect();
        self.subscribers.lock().push(tx);
        (snapshot, rx)
    }
}
