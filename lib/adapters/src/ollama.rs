//! Self-hosted adapter over the Ollama chat API.
//!
//! The self-hosted model has no native tool-calling channel, so the protocol
//! is hand-rolled in two phases. The plan phase asks the model for a JSON
//! decision object and retries once on unparseable output. A `final`
//! decision streams its message and terminates the turn. A `tool` decision
//! executes the tool, then a second, separate streaming call summarizes the
//! result in natural language.
//!
//! Availability is empirical, not heartbeat-based: it flips false on any
//! plan/summary call failure and true on the next success.

use crate::adapter::{AdapterStatus, ChatAdapter, EmitFn, InboundMessage, Turn, push_partial};
use crate::anthropic::map_http_error;
use crate::config::OllamaConfig;
use crate::dispatch::{DEFAULT_ACTION, ToolCatalog, ToolDispatcher, dispatch_checked};
use crate::error::{AdapterError, ProviderError};
use crate::history::{SELF_HOSTED_HISTORY_CAP, trim_history};
use crate::normalize;
use crate::sse::LineBuffer;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use switchboard_core::Result;
use switchboard_session::{BridgeEvent, BridgeSession, SessionStore};
use tracing::{debug, instrument, warn};

/// Runtime-mode id of the self-hosted adapter.
pub const OLLAMA_ADAPTER_ID: &str = "ollama";

/// Total plan attempts: the initial call plus one retry on unparseable
/// output.
const PLAN_ATTEMPTS: usize = 2;

/// One request against the self-hosted chat API.
#[derive(Debug, Clone)]
pub struct LocalChatRequest {
    /// Model identifier.
    pub model: String,
    /// Plain `{role, content}` chat messages.
    pub messages: Vec<JsonValue>,
    /// Constrain the completion to a JSON object (plan phase only).
    pub force_json: bool,
}

/// Wire client for the self-hosted chat API.
#[async_trait]
pub trait LocalChatApi: Send + Sync {
    /// Runs one non-streaming completion and returns its text.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be made or is rejected.
    async fn complete(&self, request: LocalChatRequest)
    -> std::result::Result<String, ProviderError>;

    /// Streams one completion as text fragments.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be made or is rejected.
    async fn stream_chat(
        &self,
        request: LocalChatRequest,
    ) -> std::result::Result<BoxStream<'static, std::result::Result<String, ProviderError>>, ProviderError>;
}

/// The plan phase's structured choice.
#[derive(Debug, Clone, PartialEq)]
enum Plan {
    /// Invoke a tool, then summarize its result.
    Tool {
        tool: String,
        action: String,
        parameters: JsonValue,
    },
    /// Answer directly with the given message.
    Final { message: String },
}

#[derive(Debug, Deserialize)]
struct PlanWire {
    decision: String,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    parameters: Option<JsonValue>,
    #[serde(default)]
    final_message: Option<String>,
}

/// Parses a plan response. The model is instructed to emit bare JSON but
/// routinely wraps it in prose or code fences, so the outermost object is
/// cut out before parsing.
fn parse_plan(raw: &str) -> std::result::Result<Plan, String> {
    let start = raw.find('{').ok_or("no JSON object in plan response")?;
    let end = raw.rfind('}').ok_or("no JSON object in plan response")?;
    if end < start {
        return Err("no JSON object in plan response".to_string());
    }

    let wire: PlanWire =
        serde_json::from_str(&raw[start..=end]).map_err(|err| err.to_string())?;

    match wire.decision.as_str() {
        "tool" => {
            let tool = wire.tool.filter(|t| !t.is_empty());
            let tool = tool.ok_or("tool decision named no tool")?;
            Ok(Plan::Tool {
                tool,
                action: wire.action.unwrap_or_else(|| DEFAULT_ACTION.to_string()),
                parameters: wire.parameters.unwrap_or_else(|| json!({})),
            })
        }
        "final" => Ok(Plan::Final {
            message: wire.final_message.unwrap_or_default(),
        }),
        other => Err(format!("unknown decision '{other}'")),
    }
}

/// Self-hosted plan/execute/summarize adapter.
pub struct OllamaAdapter {
    store: Arc<SessionStore>,
    dispatcher: Arc<dyn ToolDispatcher>,
    catalog: Arc<ToolCatalog>,
    client: Arc<dyn LocalChatApi>,
    model: String,
    /// Empirical health: flipped by plan/summary outcomes, not conversation
    /// state.
    available: AtomicBool,
}

impl OllamaAdapter {
    /// Creates the adapter from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        dispatcher: Arc<dyn ToolDispatcher>,
        catalog: Arc<ToolCatalog>,
        client: Arc<dyn LocalChatApi>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            catalog,
            client,
            model: model.into(),
            available: AtomicBool::new(true),
        }
    }

    /// Creates the adapter from configuration. The self-hosted instance
    /// needs no credentials, so this never produces an unconfigured adapter.
    #[must_use]
    pub fn from_config(
        config: &OllamaConfig,
        store: Arc<SessionStore>,
        dispatcher: Arc<dyn ToolDispatcher>,
        catalog: Arc<ToolCatalog>,
    ) -> Self {
        let client = Arc::new(OllamaClient::new(&config.base_url));
        Self::new(store, dispatcher, catalog, client, config.model.clone())
    }

    fn plan_system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You decide how to answer the user's latest message. Available tools:\n",
        );
        for def in self.catalog.definitions() {
            prompt.push_str(&format!("- {}: {}\n", def.name, def.description));
        }
        prompt.push_str(
            "Respond with only a JSON object. To call a tool: \
             {\"decision\":\"tool\",\"tool\":\"<name>\",\"action\":\"<action>\",\"parameters\":{}}. \
             To answer directly: {\"decision\":\"final\",\"final_message\":\"<answer>\"}.",
        );
        prompt
    }

    fn mark(&self, healthy: bool) {
        self.available.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChatAdapter for OllamaAdapter {
    fn id(&self) -> &'static str {
        OLLAMA_ADAPTER_ID
    }

    fn status(&self) -> AdapterStatus {
        if self.available.load(Ordering::SeqCst) {
            AdapterStatus::available(format!("model {}", self.model))
        } else {
            AdapterStatus::unavailable("last plan or summary call failed")
        }
    }

    #[instrument(skip(self, session, message, emit), fields(session_id = %session.id))]
    async fn process_message(
        &self,
        session: &BridgeSession,
        message: &InboundMessage,
        emit: Option<&EmitFn>,
    ) -> Result<Turn, AdapterError> {
        let mut history = self.store.history(session.id, OLLAMA_ADAPTER_ID);
        history.push(json!({ "role": "user", "content": message.content }));

        // Plan phase: bounded retry on unparseable output, fail-fast on a
        // provider error.
        let mut plan_messages = vec![json!({ "role": "system", "content": self.plan_system_prompt() })];
        plan_messages.extend(history.iter().cloned());
        let plan_request = LocalChatRequest {
            model: self.model.clone(),
            messages: plan_messages,
            force_json: true,
        };

        let mut plan: Option<(Plan, String)> = None;
        for attempt in 1..=PLAN_ATTEMPTS {
            let raw = self
                .client
                .complete(plan_request.clone())
                .await
                .map_err(|err| {
                    self.mark(false);
                    AdapterError::Provider(err)
                })?;

            match parse_plan(&raw) {
                Ok(decision) => {
                    plan = Some((decision, raw));
                    break;
                }
                Err(reason) => {
                    warn!(attempt, %reason, "plan response was unparseable");
                }
            }
        }

        let Some((plan, raw_plan)) = plan else {
            self.mark(false);
            return Err(AdapterError::Protocol {
                reason: format!("plan response was unparseable after {PLAN_ATTEMPTS} attempts"),
            }
            .into());
        };

        let (tool, action, parameters) = match plan {
            Plan::Final { message: content } => {
                // No further calls: stream the planned answer as-is.
                push_partial(
                    &self.store,
                    session,
                    emit,
                    BridgeEvent::stream_delta(content.clone()),
                );
                history.push(json!({ "role": "assistant", "content": content }));
                trim_history(&mut history, SELF_HOSTED_HISTORY_CAP, |_| false);
                self.store
                    .store_history(session.id, OLLAMA_ADAPTER_ID, history);
                self.mark(true);
                return Ok(Turn::terminal(BridgeEvent::assistant(content, None)));
            }
            Plan::Tool {
                tool,
                action,
                parameters,
            } => (tool, action, parameters),
        };

        debug!(tool = %tool, action = %action, "plan chose a tool");
        history.push(json!({ "role": "assistant", "content": raw_plan.trim() }));

        push_partial(
            &self.store,
            session,
            emit,
            BridgeEvent::status(&tool, &action, Some(json!({ "state": "running" }))),
        );

        let result = dispatch_checked(
            self.dispatcher.as_ref(),
            &tool,
            &action,
            &parameters,
            session.user_id,
        )
        .await;

        push_partial(
            &self.store,
            session,
            emit,
            BridgeEvent::tool_result(&tool, &action, result.clone()),
        );

        history.push(json!({
            "role": "user",
            "content": format!(
                "Tool {tool}.{action} returned: {}",
                normalize::display_text(&result)
            ),
        }));

        // Summary phase: a second, separate streaming call.
        let mut summary_messages = history.clone();
        summary_messages.push(json!({
            "role": "user",
            "content": "Summarize the tool result above for the user in natural language. \
                        Respond with the summary only.",
        }));
        let summary_request = LocalChatRequest {
            model: self.model.clone(),
            messages: summary_messages,
            force_json: false,
        };

        let mut stream = self
            .client
            .stream_chat(summary_request)
            .await
            .map_err(|err| {
                self.mark(false);
                AdapterError::Provider(err)
            })?;

        let mut summary = String::new();
        while let Some(fragment) = stream.next().await {
            let text = fragment.map_err(|err| {
                self.mark(false);
                AdapterError::Provider(err)
            })?;
            if !text.is_empty() {
                summary.push_str(&text);
                push_partial(&self.store, session, emit, BridgeEvent::stream_delta(text));
            }
        }

        if summary.trim().is_empty() {
            summary = normalize::display_text(&result);
        }

        history.push(json!({ "role": "assistant", "content": summary }));
        trim_history(&mut history, SELF_HOSTED_HISTORY_CAP, |_| false);
        self.store
            .store_history(session.id, OLLAMA_ADAPTER_ID, history);
        self.mark(true);

        let hint = normalize::voice_hint(&result);
        Ok(Turn::terminal(BridgeEvent::assistant(summary, hint)))
    }
}

// ---------------------------------------------------------------------------
// HTTP wire client
// ---------------------------------------------------------------------------

/// reqwest-backed client for a local Ollama instance.
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    /// Creates a client for the given instance.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn body(request: &LocalChatRequest, stream: bool) -> JsonValue {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": stream,
        });
        if request.force_json {
            body["format"] = json!("json");
        }
        body
    }
}

#[async_trait]
impl LocalChatApi for OllamaClient {
    async fn complete(
        &self,
        request: LocalChatRequest,
    ) -> std::result::Result<String, ProviderError> {
        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&Self::body(&request, false))
            .send()
            .await
            .map_err(|err| ProviderError::RequestFailed {
                reason: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(map_http_error("ollama", response).await);
        }

        let parsed: JsonValue =
            response
                .json()
                .await
                .map_err(|err| ProviderError::ResponseParseFailed {
                    reason: err.to_string(),
                })?;

        parsed["message"]["content"]
            .as_str()
            .map(std::string::ToString::to_string)
            .ok_or_else(|| ProviderError::ResponseParseFailed {
                reason: "chat response carried no message content".to_string(),
            })
    }

    async fn stream_chat(
        &self,
        request: LocalChatRequest,
    ) -> std::result::Result<BoxStream<'static, std::result::Result<String, ProviderError>>, ProviderError>
    {
        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(&Self::body(&request, true))
            .send()
            .await
            .map_err(|err| ProviderError::RequestFailed {
                reason: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(map_http_error("ollama", response).await);
        }

        let bytes = response.bytes_stream().boxed();
        let stream = futures::stream::try_unfold(
            (bytes, LineBuffer::default(), VecDeque::new()),
            |(mut bytes, mut lines, mut pending)| async move {
                loop {
                    if let Some(fragment) = pending.pop_front() {
                        return Ok(Some((fragment, (bytes, lines, pending))));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            for line in lines.push(&chunk) {
                                if line.trim().is_empty() {
                                    continue;
                                }
                                let parsed: JsonValue =
                                    serde_json::from_str(&line).map_err(|err| {
                                        ProviderError::ResponseParseFailed {
                                            reason: err.to_string(),
                                        }
                                    })?;
                                if let Some(text) = parsed["message"]["content"].as_str() {
                                    if !text.is_empty() {
                                        pending.push_back(text.to_string());
                                    }
                                }
                            }
                        }
                        Some(Err(err)) => {
                            return Err(ProviderError::RequestFailed {
                                reason: err.to_string(),
                            });
                        }
                        None => return Ok(None),
                    }
                }
            },
        );

        Ok(stream.boxed())
    }
}
