//! Orchestration lane scenarios against the full gateway.

mod common;

use common::{collector, echo_profile, start, test_config};
use drost_domain::config::{DropPolicy, LaneMode};
use drost_gateway::lanes::LaneConfig;
use drost_gateway::SupervisorOptions;
use tempfile::TempDir;

#[tokio::test]
async fn interrupt_lane_cancels_active_turn() {
    let ws = TempDir::new().unwrap();
    let mut config = test_config(ws.path());
    // The echo adapter sleeps ~100ms per emission for this model.
    config.providers.profiles = vec![echo_profile("p1", "echo-slow")];
    config.orchestration.mode = LaneMode::Interrupt;
    config.orchestration.cap = 4;

    let supervisor = start(config, SupervisorOptions::default()).await;
    let handle = supervisor.handle().unwrap();

    let (events_a, _) = collector();
    let handle_a = handle.clone();
    let turn_a = tokio::spawn(async move {
        handle_a.run_session_turn("s1", "turn A", events_a).await
    });

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let (events_b, _) = collector();
    let turn_b = handle.run_session_turn("s1", "turn B", events_b).await;

    // A's waiter rejects with "interrupted"; B completes.
    let a_err = turn_a.await.unwrap().unwrap_err();
    assert_eq!(a_err.code(), "interrupted");
    let b = turn_b.unwrap();
    assert_eq!(b.response, "echo: turn B");

    // Only B's user/assistant pair made it into history.
    let record = handle.app.store.export("s1").unwrap();
    let contents: Vec<&str> = record.history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["turn B", "echo: turn B"]);

    supervisor.stop().await;
}

#[tokio::test]
async fn queue_lane_serializes_turns_in_order() {
    let ws = TempDir::new().unwrap();
    let supervisor = start(test_config(ws.path()), SupervisorOptions::default()).await;
    let handle = supervisor.handle().unwrap();

    let first = {
        let handle = handle.clone();
        let (on_event, _) = collector();
        tokio::spawn(async move { handle.run_session_turn("s1", "one", on_event).await })
    };
    let second = {
        let handle = handle.clone();
        let (on_event, _) = collector();
        tokio::spawn(async move { handle.run_session_turn("s1", "two", on_event).await })
    };

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let record = handle.app.store.export("s1").unwrap();
    let contents: Vec<&str> = record.history.iter().map(|m| m.content.as_str()).collect();
    // Both exchanges present, in submission order.
    assert_eq!(
        contents,
        vec!["one", "echo: one", "two", "echo: two"]
    );

    supervisor.stop().await;
}

#[tokio::test]
async fn collect_lane_coalesces_inputs() {
    let ws = TempDir::new().unwrap();
    let mut config = test_config(ws.path());
    config.orchestration.mode = LaneMode::Collect;
    config.orchestration.collect_debounce_ms = 40;

    let supervisor = start(config, SupervisorOptions::default()).await;
    let handle = supervisor.handle().unwrap();

    let a = {
        let handle = handle.clone();
        let (on_event, _) = collector();
        tokio::spawn(async move { handle.run_session_turn("s1", "first", on_event).await })
    };
    let b = {
        let handle = handle.clone();
        let (on_event, _) = collector();
        tokio::spawn(async move { handle.run_session_turn("s1", "second", on_event).await })
    };

    let ra = a.await.unwrap().unwrap();
    let rb = b.await.unwrap().unwrap();

    // One coalesced turn; every caller gets the same result.
    assert_eq!(ra.response, rb.response);
    assert_eq!(ra.response, "echo: first\n\nsecond");

    let record = handle.app.store.export("s1").unwrap();
    assert_eq!(record.history.len(), 2);
    assert_eq!(record.history[0].content, "first\n\nsecond");

    supervisor.stop().await;
}

#[tokio::test]
async fn lane_overrides_survive_restart_of_scheduler() {
    let ws = TempDir::new().unwrap();
    let supervisor = start(test_config(ws.path()), SupervisorOptions::default()).await;
    let handle = supervisor.handle().unwrap();

    let custom = LaneConfig {
        mode: LaneMode::Interrupt,
        cap: 2,
        drop_policy: DropPolicy::New,
        collect_debounce_ms: 10,
    };
    handle.app.lanes.configure_lane("s1", custom.clone()).unwrap();
    supervisor.stop().await;

    // A new supervisor generation restores the lane override from disk.
    let supervisor = start(test_config(ws.path()), SupervisorOptions::default()).await;
    let handle = supervisor.handle().unwrap();
    assert_eq!(handle.app.lanes.lane_config("s1"), custom);
    assert_eq!(
        handle.app.lanes.lane_config("other").mode,
        LaneMode::Queue
    );

    supervisor.stop().await;
}

#[tokio::test]
async fn run_channel_turn_resolves_identity_to_session() {
    let ws = TempDir::new().unwrap();
    let supervisor = start(test_config(ws.path()), SupervisorOptions::default()).await;
    let handle = supervisor.handle().unwrap();

    let identity = drost_sessions::OriginIdentity {
        channel: "telegram".into(),
        workspace_id: None,
        chat_id: Some("42".into()),
        user_id: Some("alice".into()),
        thread_id: None,
    };

    let (on_event, _) = collector();
    let first = handle
        .run_channel_turn(&identity, "hello", on_event)
        .await
        .unwrap();
    assert_eq!(first.session_id, "telegram:42:alice");
    assert_eq!(first.response, "echo: hello");

    // Same identity lands in the same session.
    let (on_event, _) = collector();
    let second = handle
        .run_channel_turn(&identity, "again", on_event)
        .await
        .unwrap();
    assert_eq!(second.session_id, first.session_id);

    let record = handle.app.store.export(&first.session_id).unwrap();
    assert_eq!(record.history.len(), 4);
    assert_eq!(
        record.metadata.origin.as_ref().unwrap().chat_id.as_deref(),
        Some("42")
    );

    supervisor.stop().await;
}

#[tokio::test]
async fn independent_sessions_run_concurrently() {
    let ws = TempDir::new().unwrap();
    let mut config = test_config(ws.path());
    config.providers.profiles = vec![echo_profile("p1", "echo-slow")];

    let supervisor = start(config, SupervisorOptions::default()).await;
    let handle = supervisor.handle().unwrap();

    let started = std::time::Instant::now();
    let turns: Vec<_> = (0..3)
        .map(|i| {
            let handle = handle.clone();
            let (on_event, _) = collector();
            tokio::spawn(async move {
                handle
                    .run_session_turn(&format!("s{i}"), "go", on_event)
                    .await
            })
        })
        .collect();
    for turn in turns {
        turn.await.unwrap().unwrap();
    }

    // Three slow turns (~300ms each) overlapping, not serialized.
    assert!(started.elapsed() < std::time::Duration::from_millis(800));

    supervisor.stop().await;
}
