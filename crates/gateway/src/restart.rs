//! Restart policy: intents, budget, pluggable approval, and the
//! persisted restart history.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use drost_domain::config::{RestartBudget, RestartPolicyConfig};
use drost_domain::error::Result;
use drost_domain::runtime_event::RestartIntent;

/// History file keeps the most recent records only.
const HISTORY_CAP: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartRecord {
    pub timestamp: DateTime<Utc>,
    pub intent: RestartIntent,
}

#[derive(Debug, Clone)]
pub struct RestartRequest {
    pub intent: RestartIntent,
    pub reason: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartDecision {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub dry_run: bool,
}

impl RestartDecision {
    pub fn allowed(dry_run: bool) -> Self {
        Self {
            ok: true,
            code: None,
            message: None,
            dry_run,
        }
    }

    pub fn blocked(code: &str, message: impl Into<String>, dry_run: bool) -> Self {
        Self {
            ok: false,
            code: Some(code.to_owned()),
            message: Some(message.into()),
            dry_run,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    Approve,
    Deny,
    RequireHuman,
}

/// Pluggable approval gate. The default approves everything; hosts may
/// wire a human-in-the-loop implementation.
pub trait RestartApprover: Send + Sync {
    fn approve(&self, request: &RestartRequest) -> Approval;
}

pub struct ApproveAll;

impl RestartApprover for ApproveAll {
    fn approve(&self, _request: &RestartRequest) -> Approval {
        Approval::Approve
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A budgeted intent is blocked once `max_restarts` matching records
/// fall inside the window. An empty intent list budgets every intent.
pub fn check_budget(
    budget: &RestartBudget,
    history: &[RestartRecord],
    intent: RestartIntent,
    now: DateTime<Utc>,
) -> std::result::Result<(), String> {
    if !budget.intents.is_empty() && !budget.intents.contains(&intent) {
        return Ok(());
    }
    let window_start = now - Duration::milliseconds(budget.window_ms as i64);
    let in_window = history
        .iter()
        .filter(|r| r.timestamp >= window_start)
        .filter(|r| budget.intents.is_empty() || budget.intents.contains(&r.intent))
        .count();
    if in_window >= budget.max_restarts {
        Err(format!(
            "{in_window} restarts in the last {}ms (max {})",
            budget.window_ms, budget.max_restarts
        ))
    } else {
        Ok(())
    }
}

/// Evaluate the whole policy (budget + approval). The git checkpoint is
/// handled by the caller since it has side effects.
pub fn evaluate_policy(
    policy: &RestartPolicyConfig,
    approver: &dyn RestartApprover,
    history: &[RestartRecord],
    request: &RestartRequest,
    now: DateTime<Utc>,
) -> RestartDecision {
    if let Some(budget) = &policy.budget {
        if let Err(message) = check_budget(budget, history, request.intent, now) {
            return RestartDecision::blocked("budget_exceeded", message, request.dry_run);
        }
    }
    match approver.approve(request) {
        Approval::Approve => RestartDecision::allowed(request.dry_run),
        Approval::Deny => {
            RestartDecision::blocked("approval_denied", "restart denied", request.dry_run)
        }
        Approval::RequireHuman => RestartDecision::blocked(
            "approval_required",
            "restart requires approval",
            request.dry_run,
        ),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `.drost/restart-history.json`: a bounded JSON array of records.
pub struct RestartHistory {
    path: PathBuf,
    records: Vec<RestartRecord>,
}

impl RestartHistory {
    pub fn load(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join("restart-history.json");
        let records = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(Self { path, records })
    }

    pub fn records(&self) -> &[RestartRecord] {
        &self.records
    }

    pub fn record(&mut self, intent: RestartIntent) -> Result<()> {
        self.records.push(RestartRecord {
            timestamp: Utc::now(),
            intent,
        });
        if self.records.len() > HISTORY_CAP {
            let excess = self.records.len() - HISTORY_CAP;
            self.records.drain(..excess);
        }
        let json = serde_json::to_string_pretty(&self.records)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
