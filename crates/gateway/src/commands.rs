//! Slash-command dispatch for channel adapters.
//!
//! Commands are strings beginning with `/`. Anything else returns
//! `handled: false` and the adapter forwards the input as a normal
//! turn.

use drost_domain::runtime_event::RestartIntent;
use drost_sessions::identity_slug;

use crate::channels::{CommandRequest, CommandResult};
use crate::restart::RestartRequest;
use crate::runtime::session::CreateOptions;
use crate::state::GatewayHandle;

const HELP: &str = "\
/status — gateway and session status
/new [title] — start a fresh session for this chat
/provider <id> — switch this session's provider (applies next turn)
/session — show the current session id
/sessions — list recent sessions
/tools — list available tools
/tool <name> <json> — invoke a tool directly
/restart — request a gateway restart
/help — this text";

pub async fn dispatch(gateway: &GatewayHandle, request: &CommandRequest) -> CommandResult {
    let input = request.input.trim();
    if !input.starts_with('/') {
        return CommandResult::default();
    }

    let mut parts = input.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or("").trim();

    let slug = identity_slug(&request.identity);
    let session_id = match gateway.app.identity.resolve(&request.identity) {
        Ok(id) => id,
        Err(e) => return failure(format!("cannot resolve session: {e}")),
    };

    match command {
        "/help" => handled_text(HELP),

        "/status" => {
            let (state, degraded) = match gateway.supervisor() {
                Ok(sup) => (format!("{:?}", sup.state()).to_lowercase(), sup.degraded_reasons()),
                Err(_) => ("stopping".to_owned(), Vec::new()),
            };
            let provider = gateway
                .app
                .store
                .load(&session_id)
                .ok()
                .and_then(|(r, _)| r)
                .map(|r| r.active_provider_id)
                .unwrap_or_else(|| "-".into());
            let mut text = format!(
                "state: {state}\nsession: {session_id}\nprovider: {provider}"
            );
            if !degraded.is_empty() {
                text.push_str(&format!("\ndegraded: {}", degraded.join("; ")));
            }
            handled_text(text)
        }

        "/new" => {
            let title = if rest.is_empty() {
                None
            } else {
                Some(rest.to_owned())
            };
            match gateway.app.sessions.create_session(CreateOptions {
                channel: Some(request.identity.channel.clone()),
                title,
                from_session_id: Some(session_id),
                origin: Some(request.identity.clone()),
            }) {
                Ok(record) => {
                    if let Err(e) = gateway.app.identity.assign(&slug, &record.session_id) {
                        return failure(format!("session created but not linked: {e}"));
                    }
                    CommandResult {
                        handled: true,
                        text: Some(format!("new session: {}", record.session_id)),
                        action: Some("new_session".into()),
                        session_id: Some(record.session_id),
                        ok: Some(true),
                    }
                }
                Err(e) => failure(format!("cannot create session: {e}")),
            }
        }

        "/provider" => {
            if rest.is_empty() {
                let available = gateway.app.providers.profile_ids().join(", ");
                return handled_text(format!("usage: /provider <id>\navailable: {available}"));
            }
            match gateway.switch_provider(&session_id, rest) {
                Ok(()) => handled_text(format!(
                    "provider '{rest}' queued; applies at the next turn"
                )),
                Err(e) => failure(format!("switch failed: {e}")),
            }
        }

        "/session" => CommandResult {
            handled: true,
            text: Some(session_id.clone()),
            action: None,
            session_id: Some(session_id),
            ok: Some(true),
        },

        "/sessions" => match gateway.app.store.list_index() {
            Ok(index) => {
                let lines: Vec<String> = index
                    .iter()
                    .take(10)
                    .map(|e| {
                        format!(
                            "{} ({} messages, last {})",
                            e.session_id,
                            e.messages,
                            e.last_activity_at.format("%Y-%m-%d %H:%M")
                        )
                    })
                    .collect();
                handled_text(if lines.is_empty() {
                    "no sessions".to_owned()
                } else {
                    lines.join("\n")
                })
            }
            Err(e) => failure(format!("cannot list sessions: {e}")),
        },

        "/tools" => handled_text(gateway.app.tools.names().join(", ")),

        "/tool" => {
            let mut tool_parts = rest.splitn(2, char::is_whitespace);
            let name = tool_parts.next().unwrap_or_default();
            if name.is_empty() {
                return handled_text("usage: /tool <name> <json-input>");
            }
            let raw_input = tool_parts.next().unwrap_or("{}");
            let input: serde_json::Value = match serde_json::from_str(raw_input) {
                Ok(v) => v,
                Err(e) => return failure(format!("input is not JSON: {e}")),
            };
            let ctx = drost_tools::ToolContext {
                workspace_dir: gateway.app.config().workspace.dir.clone(),
                mutable_roots: drost_tools::sandbox::canonical_mutable_roots(
                    &gateway.app.config().workspace.dir,
                    &gateway.app.config().workspace.mutable_roots,
                ),
                session_id: session_id.clone(),
                provider_id: "command".into(),
            };
            match gateway.app.tools.invoke(name, input, &ctx).await {
                Ok(output) => handled_text(
                    serde_json::to_string_pretty(&output).unwrap_or_default(),
                ),
                Err(e) => failure(format!("{}: {}", e.code, e.message)),
            }
        }

        "/restart" => match gateway.supervisor() {
            Ok(sup) => {
                let decision = sup
                    .request_restart(RestartRequest {
                        intent: RestartIntent::Manual,
                        reason: Some(format!("requested from channel '{slug}'")),
                        dry_run: false,
                    })
                    .await;
                CommandResult {
                    handled: true,
                    text: Some(if decision.ok {
                        "restarting".to_owned()
                    } else {
                        format!(
                            "restart blocked: {}",
                            decision.code.as_deref().unwrap_or("unknown")
                        )
                    }),
                    action: Some("restart".into()),
                    session_id: None,
                    ok: Some(decision.ok),
                }
            }
            Err(e) => failure(format!("restart unavailable: {e}")),
        },

        other => handled_text(format!("unknown command '{other}' — try /help")),
    }
}

fn handled_text(text: impl Into<String>) -> CommandResult {
    CommandResult {
        handled: true,
        text: Some(text.into()),
        action: None,
        session_id: None,
        ok: Some(true),
    }
}

fn failure(text: String) -> CommandResult {
    CommandResult {
        handled: true,
        text: Some(text),
        action: None,
        session_id: None,
        ok: Some(false),
    }
}
