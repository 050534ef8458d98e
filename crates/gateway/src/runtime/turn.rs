//! The turn executor.
//!
//! One turn: promote any pending provider switch, run the beforeTurn
//! hook, append the user message, stream the provider's normalized
//! events through the delta folder (emitting only net-new suffixes),
//! dispatch tool calls, record the assistant reply, run afterTurn, and
//! persist. Hook failures degrade the gateway but never fail the turn;
//! provider failures terminate the turn with `provider.error` followed
//! by `response.completed` carrying whatever text accumulated.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use drost_domain::error::{Error, Result};
use drost_domain::event::{DeltaFolder, StreamEvent, StreamPayload};
use drost_domain::message::{HistoryMessage, ImageRef, InputImage};
use drost_domain::runtime_event::GatewayRuntimeEvent;
use drost_domain::CancelToken;
use drost_providers::traits::{EmitSink, ImageResolver, ToolDispatcher, ToolOutcome};
use drost_providers::ProviderManager;
use drost_sessions::record::LOG_MESSAGE_APPENDED;
use drost_sessions::{MediaStore, SessionStore};
use drost_tools::{ToolContext, ToolRegistry};

use crate::events::{EventHub, ObservabilitySinks};
use crate::hooks::AgentHooks;
use crate::lanes::{OnEvent, TurnOutcome, TurnRunner};
use crate::runtime::session::{EnsureOptions, SessionRuntime};
use crate::state::DegradedReasons;

pub struct TurnExecutor {
    store: Arc<SessionStore>,
    sessions: Arc<SessionRuntime>,
    providers: Arc<ProviderManager>,
    tools: Arc<ToolRegistry>,
    hub: Arc<EventHub>,
    sinks: Arc<ObservabilitySinks>,
    degraded: Arc<DegradedReasons>,
    hooks: Arc<dyn AgentHooks>,
    media: Arc<MediaStore>,
    workspace_dir: PathBuf,
    mutable_roots: Vec<PathBuf>,
    provider_timeout: Duration,
}

/// Mutable state threaded through one turn's event stream.
#[derive(Default)]
struct TurnState {
    folder: DeltaFolder,
    assistant: Option<String>,
    usage: Option<(u64, u64, u64)>,
}

impl TurnExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SessionStore>,
        sessions: Arc<SessionRuntime>,
        providers: Arc<ProviderManager>,
        tools: Arc<ToolRegistry>,
        hub: Arc<EventHub>,
        sinks: Arc<ObservabilitySinks>,
        degraded: Arc<DegradedReasons>,
        hooks: Arc<dyn AgentHooks>,
        media: Arc<MediaStore>,
        workspace_dir: PathBuf,
        mutable_roots: Vec<PathBuf>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            store,
            sessions,
            providers,
            tools,
            hub,
            sinks,
            degraded,
            hooks,
            media,
            workspace_dir,
            mutable_roots,
            provider_timeout,
        }
    }
}

/// Clears the turn-in-progress flag on every exit path.
struct TurnFlagGuard {
    sessions: Arc<SessionRuntime>,
    session_id: String,
}

impl Drop for TurnFlagGuard {
    fn drop(&mut self) {
        self.sessions.end_turn(&self.session_id);
    }
}

#[async_trait::async_trait]
impl TurnRunner for TurnExecutor {
    async fn run_turn(
        &self,
        session_id: &str,
        input: &str,
        on_event: OnEvent,
        cancel: CancelToken,
    ) -> Result<TurnOutcome> {
        let started = Instant::now();

        // 1. Resolve the session; promote any pending provider switch
        //    before any event is emitted.
        let mut record = self
            .sessions
            .ensure_session(session_id, EnsureOptions::default())?;

        let pending = self
            .providers
            .take_pending(session_id)
            .or_else(|| record.pending_provider_id.take());
        if let Some(next) = pending {
            self.providers.profile(&next)?;
            record.active_provider_id = next;
            record.pending_provider_id = None;
            record.touch();
            self.store.save(&mut record)?;
        }
        let provider_id = record.active_provider_id.clone();

        // 2. beforeTurn may rewrite the input; failure degrades only.
        let input = match self.hooks.before_turn(session_id, input.to_owned()).await {
            Ok(rewritten) => rewritten,
            Err(e) => {
                self.degraded
                    .push(format!("agent.beforeTurn failed: {e}"));
                input.to_owned()
            }
        };

        // 3. Append the user message, raise the turn flag.
        let user_message = HistoryMessage::user(&input);
        record.history.push(user_message.clone());
        record.touch();
        self.store.append_event(
            session_id,
            LOG_MESSAGE_APPENDED,
            serde_json::to_value(&user_message)?,
            record.revision,
            false,
        )?;
        self.sessions.begin_turn(session_id);
        let _flag = TurnFlagGuard {
            sessions: self.sessions.clone(),
            session_id: session_id.to_owned(),
        };

        // 4. Drive the provider with the folding event adapter.
        let state = Arc::new(Mutex::new(TurnState::default()));
        let sink = self.event_sink(session_id, record.revision, state.clone(), on_event.clone());

        let dispatcher = Arc::new(RegistryDispatcher {
            registry: self.tools.clone(),
            ctx: ToolContext {
                workspace_dir: self.workspace_dir.clone(),
                mutable_roots: self.mutable_roots.clone(),
                session_id: session_id.to_owned(),
                provider_id: provider_id.clone(),
            },
        });
        let images = Arc::new(MediaImageResolver {
            media: self.media.clone(),
        });

        let run = self.providers.run_turn(
            session_id,
            &provider_id,
            record.history.clone(),
            Vec::new(),
            self.tools.names(),
            cancel.clone(),
            sink.clone(),
            dispatcher,
            images,
        );
        let run_result = tokio::time::timeout(self.provider_timeout, run).await;

        // Interrupted with nothing recorded: roll the user message back
        // so an interrupted submission leaves no half-exchange behind.
        if cancel.is_cancelled() && state.lock().assistant.is_none() {
            record.history.pop();
            record.touch();
            self.store.save(&mut record)?;
            return Err(Error::Interrupted("turn interrupted".into()));
        }

        match run_result {
            Err(_elapsed) => {
                // Adapter exceeded the turn budget: terminal for this
                // turn, completed with the accumulated text.
                let partial = state.lock().folder.merged().to_owned();
                sink(
                    &provider_id,
                    StreamPayload::ProviderError {
                        code: "unreachable".into(),
                        message: format!(
                            "provider timed out after {}ms",
                            self.provider_timeout.as_millis()
                        ),
                    },
                );
                sink(
                    &provider_id,
                    StreamPayload::ResponseCompleted {
                        text: partial,
                        stop_reason: Some("provider_error".into()),
                    },
                );
            }
            Ok(Err(e)) if matches!(e, Error::MissingAuth(_)) || e.is_transport() => {
                // Transport failures already emitted provider.error per
                // attempt inside the manager; missing_auth has not.
                let partial = state.lock().folder.merged().to_owned();
                if matches!(e, Error::MissingAuth(_)) {
                    sink(
                        &provider_id,
                        StreamPayload::ProviderError {
                            code: e.code().into(),
                            message: e.to_string(),
                        },
                    );
                }
                sink(
                    &provider_id,
                    StreamPayload::ResponseCompleted {
                        text: partial,
                        stop_reason: Some("provider_error".into()),
                    },
                );
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(_used_provider)) => {}
        }

        // 5. Record the assistant reply.
        let (assistant_text, usage) = {
            let mut st = state.lock();
            let text = st
                .assistant
                .take()
                .unwrap_or_else(|| st.folder.merged().to_owned());
            (text, st.usage.take())
        };
        if !assistant_text.is_empty() {
            let message = HistoryMessage::assistant(&assistant_text);
            record.history.push(message.clone());
            record.touch();
            self.store.append_event(
                session_id,
                LOG_MESSAGE_APPENDED,
                serde_json::to_value(&message)?,
                record.revision,
                true,
            )?;
        }

        // 6. afterTurn, persist, observability.
        if let Err(e) = self.hooks.after_turn(session_id, &assistant_text).await {
            self.degraded.push(format!("agent.afterTurn failed: {e}"));
        }

        self.store.save(&mut record)?;

        if let Some((input_tokens, output_tokens, total_tokens)) = usage {
            self.sinks.usage_event(&serde_json::json!({
                "timestamp": chrono::Utc::now(),
                "sessionId": session_id,
                "providerId": provider_id,
                "inputTokens": input_tokens,
                "outputTokens": output_tokens,
                "totalTokens": total_tokens,
            }));
        }
        self.hub.publish(GatewayRuntimeEvent::SessionTurn {
            session_id: session_id.to_owned(),
            provider_id: provider_id.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            input_chars: input.chars().count(),
            output_chars: assistant_text.chars().count(),
        });

        Ok(TurnOutcome {
            session_id: session_id.to_owned(),
            provider_id,
            response: assistant_text,
        })
    }
}

impl TurnExecutor {
    /// Build the per-turn event adapter: folds deltas to net-new
    /// suffixes, mirrors tool events into the session log and trace
    /// sink, and captures the final assistant text.
    fn event_sink(
        &self,
        session_id: &str,
        revision: u64,
        state: Arc<Mutex<TurnState>>,
        on_event: OnEvent,
    ) -> EmitSink {
        let store = self.store.clone();
        let sinks = self.sinks.clone();
        let session_id = session_id.to_owned();

        Arc::new(move |provider_id: &str, payload: StreamPayload| {
            let forward = |payload: StreamPayload| {
                on_event(&StreamEvent::now(&session_id, provider_id, payload));
            };

            match payload {
                StreamPayload::ResponseDelta { text } => {
                    let suffix = state.lock().folder.push(&text);
                    if let Some(suffix) = suffix {
                        forward(StreamPayload::ResponseDelta { text: suffix });
                    }
                }
                StreamPayload::ResponseCompleted { text, stop_reason } => {
                    let final_text = {
                        let mut st = state.lock();
                        let t = if text.is_empty() {
                            st.folder.merged().to_owned()
                        } else {
                            text
                        };
                        st.assistant = Some(t.clone());
                        t
                    };
                    forward(StreamPayload::ResponseCompleted {
                        text: final_text,
                        stop_reason,
                    });
                }
                StreamPayload::UsageUpdated {
                    input_tokens,
                    output_tokens,
                    total_tokens,
                } => {
                    state.lock().usage = Some((input_tokens, output_tokens, total_tokens));
                    forward(StreamPayload::UsageUpdated {
                        input_tokens,
                        output_tokens,
                        total_tokens,
                    });
                }
                StreamPayload::ToolCallStarted {
                    call_id,
                    name,
                    input,
                } => {
                    let payload = StreamPayload::ToolCallStarted {
                        call_id,
                        name,
                        input,
                    };
                    if let Err(e) = store.append_event(
                        &session_id,
                        payload.kind(),
                        serde_json::to_value(&payload).unwrap_or_default(),
                        revision,
                        false,
                    ) {
                        tracing::warn!(error = %e, "tool event log append failed");
                    }
                    forward(payload);
                }
                StreamPayload::ToolCallCompleted {
                    call_id,
                    name,
                    ok,
                    code,
                    duration_ms,
                } => {
                    let payload = StreamPayload::ToolCallCompleted {
                        call_id,
                        name,
                        ok,
                        code,
                        duration_ms,
                    };
                    if let Err(e) = store.append_event(
                        &session_id,
                        payload.kind(),
                        serde_json::to_value(&payload).unwrap_or_default(),
                        revision,
                        false,
                    ) {
                        tracing::warn!(error = %e, "tool event log append failed");
                    }
                    sinks.tool_trace(&serde_json::json!({
                        "timestamp": chrono::Utc::now(),
                        "sessionId": session_id,
                        "providerId": provider_id,
                        "event": payload,
                    }));
                    forward(payload);
                }
                StreamPayload::ProviderError { code, message } => {
                    tracing::warn!(session_id = %session_id, code = %code, "provider error on stream");
                    forward(StreamPayload::ProviderError { code, message });
                }
            }
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider-facing glue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Routes adapter tool calls into the registry's validate/execute
/// pipeline.
struct RegistryDispatcher {
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
}

#[async_trait::async_trait]
impl ToolDispatcher for RegistryDispatcher {
    async fn run_tool(&self, name: &str, input: serde_json::Value) -> ToolOutcome {
        match self.registry.invoke(name, input, &self.ctx).await {
            Ok(output) => ToolOutcome {
                ok: true,
                output,
                code: None,
                message: None,
            },
            Err(e) => ToolOutcome {
                ok: false,
                output: serde_json::to_value(&e.issues).unwrap_or_default(),
                code: Some(e.code),
                message: Some(e.message),
            },
        }
    }
}

/// Lazily resolves persisted image references from the media store.
struct MediaImageResolver {
    media: Arc<MediaStore>,
}

#[async_trait::async_trait]
impl ImageResolver for MediaImageResolver {
    async fn resolve_input_image(&self, image: &ImageRef) -> Result<InputImage> {
        use base64::Engine;
        let bytes = self.media.resolve(image)?;
        Ok(InputImage {
            mime_type: image.mime_type.clone(),
            data_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }
}
