//! Shared fixtures for gateway integration tests.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use drost_domain::config::{Config, ProviderProfile};
use drost_domain::event::StreamEvent;
use drost_gateway::{OnEvent, Supervisor, SupervisorOptions};

/// A config pointing at a temp workspace with servers disabled; tests
/// drive the gateway through its in-process handle.
pub fn test_config(workspace: &Path) -> Config {
    let mut config = Config::default();
    config.workspace.dir = workspace.to_path_buf();
    config.health.enabled = false;
    config.control_api.enabled = false;
    config.providers.profiles = vec![echo_profile("p1", "echo-1")];
    config
}

pub fn echo_profile(id: &str, model: &str) -> ProviderProfile {
    ProviderProfile {
        id: id.into(),
        kind: "echo".into(),
        adapter_id: "echo".into(),
        model: model.into(),
        base_url: None,
        auth_profile_id: String::new(),
    }
}

pub async fn start(config: Config, opts: SupervisorOptions) -> Arc<Supervisor> {
    let supervisor = Supervisor::new(config, opts);
    supervisor.start().await.expect("supervisor start");
    supervisor
}

/// An `OnEvent` sink that records every observable event.
pub fn collector() -> (OnEvent, Arc<Mutex<Vec<StreamEvent>>>) {
    let seen: Arc<Mutex<Vec<StreamEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let on_event: OnEvent = Arc::new(move |event| sink.lock().push(event.clone()));
    (on_event, seen)
}

/// Texts of the observable `response.delta` events, in emission order.
pub fn delta_texts(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            drost_domain::event::StreamPayload::ResponseDelta { text } => Some(text.clone()),
            _ => None,
        })
        .collect()
}
