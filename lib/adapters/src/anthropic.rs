//! Native tool-use adapter over the Anthropic Messages API.
//!
//! The provider streams content blocks: text deltas, tool-use blocks whose
//! JSON input arrives as `input_json_delta` fragments, and a stop reason.
//! The turn loop streams text live, executes requested tools through the
//! dispatcher, feeds results back keyed by the provider's call id, and
//! repeats until the provider marks the turn complete.

use crate::adapter::{AdapterStatus, ChatAdapter, EmitFn, InboundMessage, Turn, push_partial};
use crate::config::AnthropicConfig;
use crate::dispatch::{DEFAULT_ACTION, ToolCatalog, ToolDispatcher, dispatch_checked};
use crate::error::{AdapterError, ProviderError};
use crate::history::{CLOUD_HISTORY_CAP, trim_history};
use crate::normalize;
use crate::sse::{LineBuffer, sse_data};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::collections::VecDeque;
use std::sync::Arc;
use switchboard_core::Result;
use switchboard_session::{BridgeEvent, BridgeSession, SessionStore};
use tracing::{debug, instrument, warn};

/// Runtime-mode id of the native tool-use adapter.
pub const ANTHROPIC_ADAPTER_ID: &str = "anthropic";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Upper bound on call-tool-and-continue rounds within one turn.
const MAX_TOOL_ROUNDS: usize = 8;

/// One model turn request against the Messages API.
#[derive(Debug, Clone)]
pub struct MessagesRequest {
    /// Model identifier.
    pub model: String,
    /// Optional system prompt.
    pub system: Option<String>,
    /// Provider-native message records.
    pub messages: Vec<JsonValue>,
    /// Tool definitions in provider format.
    pub tools: Vec<JsonValue>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

/// Decoded streaming events of the Messages API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagesEvent {
    /// A text fragment.
    TextDelta { text: String },
    /// A tool-use block opened.
    ToolUseStart { id: String, name: String },
    /// A fragment of the current tool-use block's JSON input.
    InputJsonDelta { partial_json: String },
    /// The current content block closed.
    BlockStop,
    /// Turn-level metadata, carrying the stop reason when known.
    TurnDelta { stop_reason: Option<String> },
    /// The turn finished streaming.
    Done,
}

/// Streaming wire client for the Messages API.
#[async_trait]
pub trait MessagesApi: Send + Sync {
    /// Streams one model turn as decoded wire events.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be made or is rejected.
    async fn stream_turn(
        &self,
        request: MessagesRequest,
    ) -> std::result::Result<BoxStream<'static, std::result::Result<MessagesEvent, ProviderError>>, ProviderError>;
}

/// Accumulator for one tool-use block while its input streams in.
#[derive(Debug, Default)]
struct ToolUseBuffer {
    id: String,
    name: String,
    input: String,
}

/// Native tool-use adapter.
pub struct AnthropicAdapter {
    store: Arc<SessionStore>,
    dispatcher: Arc<dyn ToolDispatcher>,
    catalog: Arc<ToolCatalog>,
    client: Option<Arc<dyn MessagesApi>>,
    model: String,
    max_tokens: u32,
}

impl AnthropicAdapter {
    /// Creates the adapter from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        dispatcher: Arc<dyn ToolDispatcher>,
        catalog: Arc<ToolCatalog>,
        client: Arc<dyn MessagesApi>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            store,
            dispatcher,
            catalog,
            client: Some(client),
            model: model.into(),
            max_tokens,
        }
    }

    /// Creates the adapter from configuration. A missing API key leaves the
    /// adapter constructed but unavailable.
    #[must_use]
    pub fn from_config(
        config: &AnthropicConfig,
        store: Arc<SessionStore>,
        dispatcher: Arc<dyn ToolDispatcher>,
        catalog: Arc<ToolCatalog>,
    ) -> Self {
        let client = config.api_key.as_ref().map(|key| {
            Arc::new(AnthropicClient::new(key, &config.base_url)) as Arc<dyn MessagesApi>
        });
        Self {
            store,
            dispatcher,
            catalog,
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    fn provider_tools(&self) -> Vec<JsonValue> {
        self.catalog
            .definitions()
            .iter()
            .map(|def| {
                json!({
                    "name": def.name,
                    "description": def.description,
                    "input_schema": def.input_schema,
                })
            })
            .collect()
    }
}

/// Extracts the text carried by an assistant message's content blocks.
fn text_from_blocks(blocks: &[JsonValue]) -> String {
    blocks
        .iter()
        .filter_map(|block| {
            (block["type"] == "text").then(|| block["text"].as_str().unwrap_or_default())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// True for records that must not open a history: a user message carrying
/// tool results whose tool call was trimmed away.
fn opens_with_tool_result(record: &JsonValue) -> bool {
    record["role"] == "user"
        && record["content"]
            .as_array()
            .is_some_and(|blocks| blocks.iter().any(|b| b["type"] == "tool_result"))
}

#[async_trait]
impl ChatAdapter for AnthropicAdapter {
    fn id(&self) -> &'static str {
        ANTHROPIC_ADAPTER_ID
    }

    fn status(&self) -> AdapterStatus {
        match self.client {
            Some(_) => AdapterStatus::available(format!("model {}", self.model)),
            None => AdapterStatus::unavailable("ANTHROPIC_API_KEY is not set"),
        }
    }

    #[instrument(skip(self, session, message, emit), fields(session_id = %session.id))]
    async fn process_message(
        &self,
        session: &BridgeSession,
        message: &InboundMessage,
        emit: Option<&EmitFn>,
    ) -> Result<Turn, AdapterError> {
        let client = self.client.as_ref().ok_or_else(|| {
            AdapterError::Provider(ProviderError::InvalidConfig {
                reason: "ANTHROPIC_API_KEY is not set".to_string(),
            })
        })?;

        let mut history = self.store.history(session.id, ANTHROPIC_ADAPTER_ID);
        history.push(json!({ "role": "user", "content": message.content }));

        let mut collected_text = String::new();
        let mut last_tool_result: Option<JsonValue> = None;
        let mut final_blocks: Vec<JsonValue> = Vec::new();

        for round in 0..MAX_TOOL_ROUNDS {
            let request = MessagesRequest {
                model: self.model.clone(),
                system: None,
                messages: history.clone(),
                tools: self.provider_tools(),
                max_tokens: self.max_tokens,
            };

            let mut stream = client
                .stream_turn(request)
                .await
                .map_err(AdapterError::Provider)?;

            let mut round_text = String::new();
            let mut calls: Vec<ToolUseBuffer> = Vec::new();
            let mut current: Option<ToolUseBuffer> = None;
            let mut stop_reason: Option<String> = None;

            while let Some(event) = stream.next().await {
                match event.map_err(AdapterError::Provider)? {
                    MessagesEvent::TextDelta { text } => {
                        round_text.push_str(&text);
                        push_partial(&self.store, session, emit, BridgeEvent::stream_delta(text));
                    }
                    MessagesEvent::ToolUseStart { id, name } => {
                        current = Some(ToolUseBuffer {
                            id,
                            name,
                            input: String::new(),
                        });
                    }
                    MessagesEvent::InputJsonDelta { partial_json } => {
                        if let Some(call) = current.as_mut() {
                            call.input.push_str(&partial_json);
                        }
                    }
                    MessagesEvent::BlockStop => {
                        if let Some(call) = current.take() {
                            calls.push(call);
                        }
                    }
                    MessagesEvent::TurnDelta { stop_reason: sr } => {
                        if sr.is_some() {
                            stop_reason = sr;
                        }
                    }
                    MessagesEvent::Done => break,
                }
            }

            // Rebuild the assistant message from what was streamed.
            let mut blocks = Vec::new();
            if !round_text.is_empty() {
                blocks.push(json!({ "type": "text", "text": round_text }));
            }
            for call in &calls {
                let input: JsonValue =
                    serde_json::from_str(&call.input).unwrap_or_else(|_| json!({}));
                blocks.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": input,
                }));
            }
            history.push(json!({ "role": "assistant", "content": blocks }));

            if !round_text.is_empty() {
                if !collected_text.is_empty() {
                    collected_text.push_str("\n\n");
                }
                collected_text.push_str(&round_text);
            }

            if calls.is_empty() {
                final_blocks = blocks;
                debug!(round, stop_reason = ?stop_reason, "turn complete");
                break;
            }

            let mut results = Vec::new();
            for call in &calls {
                let input: JsonValue =
                    serde_json::from_str(&call.input).unwrap_or_else(|err| {
                        warn!(tool = %call.name, error = %err, "tool input was not valid JSON");
                        json!({})
                    });
                let action = input["action"].as_str().unwrap_or(DEFAULT_ACTION).to_string();
                let parameters = input.get("parameters").cloned().unwrap_or_else(|| json!({}));

                push_partial(
                    &self.store,
                    session,
                    emit,
                    BridgeEvent::status(&call.name, &action, Some(json!({ "state": "running" }))),
                );

                let result = dispatch_checked(
                    self.dispatcher.as_ref(),
                    &call.name,
                    &action,
                    &parameters,
                    session.user_id,
                )
                .await;

                push_partial(
                    &self.store,
                    session,
                    emit,
                    BridgeEvent::tool_result(&call.name, &action, result.clone()),
                );

                results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": call.id,
                    "content": normalize::display_text(&result),
                }));
                last_tool_result = Some(result);
            }
            history.push(json!({ "role": "user", "content": results }));

            if round + 1 == MAX_TOOL_ROUNDS {
                return Err(AdapterError::Protocol {
                    reason: format!("tool loop did not converge after {MAX_TOOL_ROUNDS} rounds"),
                }
                .into());
            }
        }

        // Prefer the streamed text; fall back to the structured final text.
        let content = if collected_text.is_empty() {
            text_from_blocks(&final_blocks)
        } else {
            collected_text
        };
        let hint = last_tool_result.as_ref().and_then(normalize::voice_hint);

        trim_history(&mut history, CLOUD_HISTORY_CAP, opens_with_tool_result);
        self.store
            .store_history(session.id, ANTHROPIC_ADAPTER_ID, history);

        Ok(Turn::terminal(BridgeEvent::assistant(content, hint)))
    }
}

// ---------------------------------------------------------------------------
// HTTP wire client
// ---------------------------------------------------------------------------

/// reqwest-backed Messages API client.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    /// Creates a client for the given credentials.
    #[must_use]
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MessagesApi for AnthropicClient {
    async fn stream_turn(
        &self,
        request: MessagesRequest,
    ) -> std::result::Result<BoxStream<'static, std::result::Result<MessagesEvent, ProviderError>>, ProviderError>
    {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": request.messages,
            "stream": true,
        });
        if let Some(system) = request.system {
            body["system"] = json!(system);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::RequestFailed {
                reason: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(map_http_error("anthropic", response).await);
        }

        let bytes = response.bytes_stream().boxed();
        let stream = futures::stream::try_unfold(
            (bytes, LineBuffer::default(), VecDeque::new()),
            |(mut bytes, mut lines, mut pending)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Ok(Some((event, (bytes, lines, pending))));
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            for line in lines.push(&chunk) {
                                let Some(data) = sse_data(&line) else { continue };
                                if let Some(event) = decode_sse_payload(data)? {
                                    pending.push_back(event);
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

/// Maps a non-success HTTP response to a provider error.
pub(crate) async fn map_http_error(provider: &str, response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let retry_after_secs = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<JsonValue>(&body)
        .ok()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .map(std::string::ToString::to_string)
        })
        .unwrap_or(body);

    if status.as_u16() == 429 {
        return ProviderError::RateLimited { retry_after_secs };
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return ProviderError::InvalidConfig { reason: message };
    }
    if status.is_server_error() {
        return ProviderError::ProviderUnavailable {
            provider: provider.to_string(),
            reason: message,
        };
    }
    ProviderError::RequestFailed {
        reason: format!("{status}: {message}"),
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SsePayload {
    MessageStart,
    ContentBlockStart { content_block: WireBlock },
    ContentBlockDelta { delta: WireDelta },
    ContentBlockStop,
    MessageDelta { delta: WireMessageDelta },
    MessageStop,
    Ping,
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text,
    ToolUse { id: String, name: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

fn decode_sse_payload(data: &str) -> std::result::Result<Option<MessagesEvent>, ProviderError> {
    let payload: SsePayload =
        serde_json::from_str(data).map_err(|err| ProviderError::ResponseParseFailed {
            reason: err.to_string(),
        })?;

    Ok(match payload {
        SsePayload::ContentBlockStart {
            content_block: WireBlock::ToolUse { id, name },
        } => Some(MessagesEvent::ToolUseStart { id, name }),
        SsePayload::ContentBlockDelta {
            delta: WireDelta::TextDelta { text },
        } => Some(MessagesEvent::TextDelta { text }),
        SsePayload::ContentBlockDelta {
            delta: WireDelta::InputJsonDelta { partial_json },
        } => Some(MessagesEvent::InputJsonDelta { partial_json }),
        SsePayload::ContentBlockStop => Some(MessagesEvent::BlockStop),
        SsePayload::MessageDelta { delta } => Some(MessagesEvent::TurnDelta {
            stop_reason: delta.stop_reason,
        }),
        SsePayload::MessageStop => Some(MessagesEvent::Done),
        _ => None,
    })
}
