//! Supervisor lifecycle: restart policy, hot reload, degraded starts.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{start, test_config};
use drost_domain::config::RestartBudget;
use drost_domain::runtime_event::{GatewayState, RestartIntent};
use drost_gateway::restart::RestartRequest;
use drost_gateway::{SupervisorOptions, RESTART_EXIT_CODE};
use drost_providers::scripted::FailingAdapter;
use serde_json::json;
use tempfile::TempDir;

fn seed_restart_history(workspace: &std::path::Path, offsets_sec: &[i64]) {
    let state_dir = workspace.join(".drost");
    std::fs::create_dir_all(&state_dir).unwrap();
    let now = Utc::now();
    let records: Vec<_> = offsets_sec
        .iter()
        .map(|s| {
            json!({
                "timestamp": now - Duration::seconds(*s),
                "intent": "self_mod",
            })
        })
        .collect();
    std::fs::write(
        state_dir.join("restart-history.json"),
        serde_json::to_string_pretty(&records).unwrap(),
    )
    .unwrap();
}

#[tokio::test]
async fn restart_budget_blocks_third_self_mod() {
    let ws = TempDir::new().unwrap();
    seed_restart_history(ws.path(), &[30, 0]);

    let mut config = test_config(ws.path());
    config.restart_policy.budget = Some(RestartBudget {
        max_restarts: 2,
        window_ms: 60_000,
        intents: vec![RestartIntent::SelfMod],
    });

    let supervisor = start(config, SupervisorOptions::default()).await;
    assert_eq!(supervisor.state(), GatewayState::Running);

    let decision = supervisor
        .request_restart(RestartRequest {
            intent: RestartIntent::SelfMod,
            reason: None,
            dry_run: false,
        })
        .await;

    assert!(!decision.ok);
    assert_eq!(decision.code.as_deref(), Some("budget_exceeded"));
    // Gateway state unchanged.
    assert_eq!(supervisor.state(), GatewayState::Running);

    supervisor.stop().await;
}

#[tokio::test]
async fn manual_restart_stops_and_signals_exit_42() {
    let ws = TempDir::new().unwrap();
    let supervisor = start(test_config(ws.path()), SupervisorOptions::default()).await;
    let mut exit_rx = supervisor.subscribe_exit();

    let decision = supervisor
        .request_restart(RestartRequest {
            intent: RestartIntent::Manual,
            reason: Some("test".into()),
            dry_run: false,
        })
        .await;

    assert!(decision.ok);
    assert_eq!(supervisor.state(), GatewayState::Stopped);
    exit_rx.changed().await.unwrap();
    assert_eq!(*exit_rx.borrow(), Some(RESTART_EXIT_CODE));

    // The restart was recorded for the next generation's budget.
    let raw =
        std::fs::read_to_string(ws.path().join(".drost/restart-history.json")).unwrap();
    assert!(raw.contains("manual"));
}

#[tokio::test]
async fn dry_run_restart_has_no_side_effects() {
    let ws = TempDir::new().unwrap();
    let supervisor = start(test_config(ws.path()), SupervisorOptions::default()).await;

    let decision = supervisor
        .request_restart(RestartRequest {
            intent: RestartIntent::Manual,
            reason: None,
            dry_run: true,
        })
        .await;

    assert!(decision.ok);
    assert!(decision.dry_run);
    assert_eq!(supervisor.state(), GatewayState::Running);
    assert!(supervisor.subscribe_exit().borrow().is_none());

    supervisor.stop().await;
}

#[tokio::test]
async fn reload_classifies_hot_and_restart_required() {
    let ws = TempDir::new().unwrap();
    let supervisor = start(test_config(ws.path()), SupervisorOptions::default()).await;

    let report = supervisor
        .reload_config(&json!({
            "health": { "enabled": false, "port": 4999 },
            "tools": { "directory": "./new-tools" }
        }))
        .await
        .unwrap();

    assert!(!report.ok);
    assert!(report.restart_required);
    assert_eq!(report.applied, vec!["health"]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].path, "tools.directory");
    assert_eq!(report.rejected[0].reason, "restart_required");

    // The hot section took effect; the cold one did not.
    let cfg = supervisor.config();
    assert_eq!(cfg.health.port, 4999);
    assert!(cfg.tools.directory.is_none());

    supervisor.stop().await;
}

#[tokio::test]
async fn failing_probe_degrades_but_serves() {
    let ws = TempDir::new().unwrap();
    let mut config = test_config(ws.path());
    config.providers.profiles.push({
        let mut p = common::echo_profile("down", "m");
        p.adapter_id = "down-adapter".into();
        p
    });

    let mut opts = SupervisorOptions::default();
    opts.adapters
        .push(Arc::new(FailingAdapter::new("down-adapter", "unreachable")));

    let supervisor = start(config, opts).await;
    assert_eq!(supervisor.state(), GatewayState::Degraded);
    assert!(supervisor
        .degraded_reasons()
        .iter()
        .any(|r| r.contains("down")));

    // Still serving: a turn against the healthy provider works.
    let handle = supervisor.handle().unwrap();
    let (on_event, _) = common::collector();
    let outcome = handle.run_session_turn("s1", "hi", on_event).await.unwrap();
    assert_eq!(outcome.response, "echo: hi");

    supervisor.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent() {
    let ws = TempDir::new().unwrap();
    let supervisor = start(test_config(ws.path()), SupervisorOptions::default()).await;

    supervisor.stop().await;
    assert_eq!(supervisor.state(), GatewayState::Stopped);
    supervisor.stop().await;
    assert_eq!(supervisor.state(), GatewayState::Stopped);
}

#[tokio::test]
async fn runtime_events_cover_the_lifecycle() {
    let ws = TempDir::new().unwrap();
    let supervisor = start(test_config(ws.path()), SupervisorOptions::default()).await;
    let hub = supervisor.hub();

    let handle = supervisor.handle().unwrap();
    let (on_event, _) = common::collector();
    handle.run_session_turn("s1", "hi", on_event).await.unwrap();
    supervisor.stop().await;

    let kinds: Vec<String> = hub
        .snapshot()
        .iter()
        .map(|r| {
            serde_json::to_value(r).unwrap()["event"]
                .as_str()
                .unwrap()
                .to_owned()
        })
        .collect();
    for expected in [
        "gateway_started",
        "lane_admitted",
        "lane_started",
        "lane_completed",
        "session_turn",
        "gateway_stopped",
    ] {
        assert!(kinds.iter().any(|k| k == expected), "missing {expected}");
    }

    // The synchronous sink mirrors the ring.
    let sink = std::fs::read_to_string(
        ws.path().join(".drost/observability/runtime-events.jsonl"),
    )
    .unwrap();
    assert!(sink.contains("gateway_started"));
    assert!(sink.contains("session_turn"));
}
