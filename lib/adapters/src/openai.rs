//! Function-calling adapter over the OpenAI Chat Completions API.
//!
//! The same loop shape as the native tool-use adapter, but the wire protocol
//! fragments each tool call's name and arguments across multiple stream
//! chunks, keyed by call index. Fragments are buffered per index and parsed
//! as JSON only once the stream signals completion; partial JSON is never
//! parsed speculatively.

use crate::adapter::{AdapterStatus, ChatAdapter, EmitFn, InboundMessage, Turn, push_partial};
use crate::anthropic::map_http_error;
use crate::config::OpenAiConfig;
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
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use switchboard_core::Result;
use switchboard_session::{BridgeEvent, BridgeSession, SessionStore};
use tracing::{debug, instrument, warn};

/// Runtime-mode id of the function-calling adapter.
pub const OPENAI_ADAPTER_ID: &str = "openai";

/// Upper bound on call-tool-and-continue rounds within one turn.
const MAX_TOOL_ROUNDS: usize = 8;

/// One model turn request against the Chat Completions API.
#[derive(Debug, Clone)]
pub struct ChatCompletionsRequest {
    /// Model identifier.
    pub model: String,
    /// Provider-native message records.
    pub messages: Vec<JsonValue>,
    /// Tool definitions in provider format.
    pub tools: Vec<JsonValue>,
}

/// One decoded streaming chunk of the Chat Completions API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunk {
    /// Choice deltas; the bridge only ever requests one choice.
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// A single choice within a chunk.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkChoice {
    /// Incremental content for this choice.
    #[serde(default)]
    pub delta: ChunkDelta,
    /// Set on the final chunk of the choice.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental message content.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    /// Text fragment.
    #[serde(default)]
    pub content: Option<String>,
    /// Tool-call fragments, keyed by call index.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallFragment>,
}

/// A fragment of one tool call.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallFragment {
    /// Index of the call this fragment belongs to.
    pub index: usize,
    /// Call id; present only on the first fragment of a call.
    #[serde(default)]
    pub id: Option<String>,
    /// Function name/argument fragments.
    #[serde(default)]
    pub function: FunctionFragment,
}

/// Name and argument fragments of a function call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionFragment {
    /// Function name fragment.
    #[serde(default)]
    pub name: Option<String>,
    /// Argument JSON fragment.
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Streaming wire client for the Chat Completions API.
#[async_trait]
pub trait ChatCompletionsApi: Send + Sync {
    /// Streams one model turn as decoded chunks.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be made or is rejected.
    async fn stream_chat(
        &self,
        request: ChatCompletionsRequest,
    ) -> std::result::Result<BoxStream<'static, std::result::Result<ChatChunk, ProviderError>>, ProviderError>;
}

/// Per-index accumulator for one tool call, flushed only once the stream
/// signals completion.
#[derive(Debug, Default)]
struct CallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

/// Function-calling adapter.
pub struct OpenAiAdapter {
    store: Arc<SessionStore>,
    dispatcher: Arc<dyn ToolDispatcher>,
    catalog: Arc<ToolCatalog>,
    client: Option<Arc<dyn ChatCompletionsApi>>,
    model: String,
}

impl OpenAiAdapter {
    /// Creates the adapter from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        dispatcher: Arc<dyn ToolDispatcher>,
        catalog: Arc<ToolCatalog>,
        client: Arc<dyn ChatCompletionsApi>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            catalog,
            client: Some(client),
            model: model.into(),
        }
    }

    /// Creates the adapter from configuration. A missing API key leaves the
    /// adapter constructed but unavailable.
    #[must_use]
    pub fn from_config(
        config: &OpenAiConfig,
        store: Arc<SessionStore>,
        dispatcher: Arc<dyn ToolDispatcher>,
        catalog: Arc<ToolCatalog>,
    ) -> Self {
        let client = config.api_key.as_ref().map(|key| {
            Arc::new(OpenAiClient::new(key, &config.base_url)) as Arc<dyn ChatCompletionsApi>
        });
        Self {
            store,
            dispatcher,
            catalog,
            client,
            model: config.model.clone(),
        }
    }

    fn provider_tools(&self) -> Vec<JsonValue> {
        self.catalog
            .definitions()
            .iter()
            .map(|def| {
                json!({
                    "type": "function",
                    "function": {
                        "name": def.name,
                        "description": def.description,
                        "parameters": def.input_schema,
                    }
                })
            })
            .collect()
    }
}

/// Parses a buffered argument payload into `(action, parameters)`.
/// Malformed JSON degrades to the default action rather than aborting the
/// turn.
fn parse_arguments(tool: &str, arguments: &str) -> (String, JsonValue) {
    match serde_json::from_str::<JsonValue>(arguments) {
        Ok(parsed) => {
            let action = parsed["action"]
                .as_str()
                .unwrap_or(DEFAULT_ACTION)
                .to_string();
            let parameters = parsed.get("parameters").cloned().unwrap_or_else(|| json!({}));
            (action, parameters)
        }
        Err(err) => {
            warn!(tool, error = %err, "tool arguments were not valid JSON");
            (DEFAULT_ACTION.to_string(), json!({}))
        }
    }
}

/// True for records that must not open a history: a tool result whose call
/// was trimmed away.
fn opens_with_tool_message(record: &JsonValue) -> bool {
    record["role"] == "tool"
}

#[async_trait]
impl ChatAdapter for OpenAiAdapter {
    fn id(&self) -> &'static str {
        OPENAI_ADAPTER_ID
    }

    fn status(&self) -> AdapterStatus {
        match self.client {
            Some(_) => AdapterStatus::available(format!("model {}", self.model)),
            None => AdapterStatus::unavailable("OPENAI_API_KEY is not set"),
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
                reason: "OPENAI_API_KEY is not set".to_string(),
            })
        })?;

        let mut history = self.store.history(session.id, OPENAI_ADAPTER_ID);
        history.push(json!({ "role": "user", "content": message.content }));

        let mut collected_text = String::new();
        let mut last_tool_result: Option<JsonValue> = None;

        for round in 0..MAX_TOOL_ROUNDS {
            let request = ChatCompletionsRequest {
                model: self.model.clone(),
                messages: history.clone(),
                tools: self.provider_tools(),
            };

            let mut stream = client
                .stream_chat(request)
                .await
                .map_err(AdapterError::Provider)?;

            let mut round_text = String::new();
            let mut accumulators: BTreeMap<usize, CallAccumulator> = BTreeMap::new();
            let mut finish_reason: Option<String> = None;

            while let Some(chunk) = stream.next().await {
                for choice in chunk.map_err(AdapterError::Provider)?.choices {
                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            round_text.push_str(&text);
                            push_partial(
                                &self.store,
                                session,
                                emit,
                                BridgeEvent::stream_delta(text),
                            );
                        }
                    }
                    for fragment in choice.delta.tool_calls {
                        let call = accumulators.entry(fragment.index).or_default();
                        if let Some(id) = fragment.id {
                            call.id = id;
                        }
                        if let Some(name) = fragment.function.name {
                            call.name.push_str(&name);
                        }
                        if let Some(arguments) = fragment.function.arguments {
                            call.arguments.push_str(&arguments);
                        }
                    }
                    if choice.finish_reason.is_some() {
                        finish_reason = choice.finish_reason;
                    }
                }
            }

            if !round_text.is_empty() {
                if !collected_text.is_empty() {
                    collected_text.push_str("\n\n");
                }
                collected_text.push_str(&round_text);
            }

            if accumulators.is_empty() {
                history.push(json!({ "role": "assistant", "content": round_text }));
                debug!(round, finish_reason = ?finish_reason, "turn complete");

                let hint = last_tool_result.as_ref().and_then(normalize::voice_hint);
                trim_history(&mut history, CLOUD_HISTORY_CAP, opens_with_tool_message);
                self.store
                    .store_history(session.id, OPENAI_ADAPTER_ID, history);

                return Ok(Turn::terminal(BridgeEvent::assistant(collected_text, hint)));
            }

            // The assistant message keeps its tool_calls array so a later
            // trim keeps the pair together.
            let tool_calls: Vec<JsonValue> = accumulators
                .values()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": { "name": call.name, "arguments": call.arguments },
                    })
                })
                .collect();
            history.push(json!({
                "role": "assistant",
                "content": if round_text.is_empty() { JsonValue::Null } else { json!(round_text) },
                "tool_calls": tool_calls,
            }));

            for call in accumulators.values() {
                let (action, parameters) = parse_arguments(&call.name, &call.arguments);

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

                history.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": normalize::display_text(&result),
                }));
                last_tool_result = Some(result);
            }

            if round + 1 == MAX_TOOL_ROUNDS {
                return Err(AdapterError::Protocol {
                    reason: format!("tool loop did not converge after {MAX_TOOL_ROUNDS} rounds"),
                }
                .into());
            }
        }

        unreachable!("tool loop returns from every path")
    }
}

// ---------------------------------------------------------------------------
// HTTP wire client
// ---------------------------------------------------------------------------

/// reqwest-backed Chat Completions client.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
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
impl ChatCompletionsApi for OpenAiClient {
    async fn stream_chat(
        &self,
        request: ChatCompletionsRequest,
    ) -> std::result::Result<BoxStream<'static, std::result::Result<ChatChunk, ProviderError>>, ProviderError>
    {
        let mut body = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": true,
        });
        if !request.tools.is_empty() {
            body["tools"] = json!(request.tools);
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::RequestFailed {
                reason: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(map_http_error("openai", response).await);
        }

        let bytes = response.bytes_stream().boxed();
        let stream = futures::stream::try_unfold(
            (bytes, LineBuffer::default(), VecDeque::new(), false),
            |(mut bytes, mut lines, mut pending, mut done)| async move {
                loop {
                    if let Some(chunk) = pending.pop_front() {
                        return Ok(Some((chunk, (bytes, lines, pending, done))));
                    }
                    if done {
                        return Ok(None);
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => {
                            for line in lines.push(&chunk) {
                                let Some(data) = sse_data(&line) else { continue };
                                if data == "[DONE]" {
                                    done = true;
                                    continue;
                                }
                                let chunk: ChatChunk =
                                    serde_json::from_str(data).map_err(|err| {
                                        ProviderError::ResponseParseFailed {
                                            reason: err.to_string(),
                                        }
                                    })?;
                                pending.push_back(chunk);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ToolDefinition;
    use crate::error::ToolError;
    use std::sync::Mutex;
    use switchboard_core::UserId;
    use switchboard_session::{EventPayload, SessionStore};

    fn chunk(json: JsonValue) -> ChatChunk {
        serde_json::from_value(json).expect("chunk")
    }

    struct ScriptedClient {
        turns: Mutex<VecDeque<Vec<ChatChunk>>>,
    }

    impl ScriptedClient {
        fn new(turns: Vec<Vec<ChatChunk>>) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(turns.into()),
            })
        }
    }

    #[async_trait]
    impl ChatCompletionsApi for ScriptedClient {
        async fn stream_chat(
            &self,
            _request: ChatCompletionsRequest,
        ) -> std::result::Result<
            BoxStream<'static, std::result::Result<ChatChunk, ProviderError>>,
            ProviderError,
        > {
            let chunks = self
                .turns
                .lock()
                .expect("lock")
                .pop_front()
                .expect("scripted turn");
            Ok(futures::stream::iter(chunks.into_iter().map(Ok)).boxed())
        }
    }

    struct RecordingDispatcher {
        calls: Mutex<Vec<(String, String, JsonValue)>>,
        result: JsonValue,
    }

    #[async_trait]
    impl ToolDispatcher for RecordingDispatcher {
        async fn execute_tool(
            &self,
            tool: &str,
            action: &str,
            parameters: &JsonValue,
            _user_id: UserId,
        ) -> std::result::Result<JsonValue, ToolError> {
            self.calls.lock().expect("lock").push((
                tool.to_string(),
                action.to_string(),
                parameters.clone(),
            ));
            Ok(self.result.clone())
        }
    }

    fn catalog() -> Arc<ToolCatalog> {
        let mut catalog = ToolCatalog::new();
        catalog.register(ToolDefinition::new("billing", "Billing operations"));
        Arc::new(catalog)
    }

    fn adapter_with(
        store: &Arc<SessionStore>,
        dispatcher: Arc<dyn ToolDispatcher>,
        client: Arc<dyn ChatCompletionsApi>,
    ) -> OpenAiAdapter {
        OpenAiAdapter::new(store.clone(), dispatcher, catalog(), client, "gpt-4o")
    }

    #[tokio::test]
    async fn reassembles_fragmented_arguments_by_index() {
        let client = ScriptedClient::new(vec![
            vec![
                chunk(json!({ "choices": [{ "delta": { "tool_calls": [
                    { "index": 0, "id": "call_1", "function": { "name": "billing" } }
                ]}}]})),
                chunk(json!({ "choices": [{ "delta": { "tool_calls": [
                    { "index": 0, "function": { "arguments": "{\"action\":\"invo" } }
                ]}}]})),
                chunk(json!({ "choices": [{ "delta": { "tool_calls": [
                    { "index": 0, "function": { "arguments": "ice_list\",\"parameters\":{\"month\":\"May\"}}" } }
                ]}}]})),
                chunk(json!({ "choices": [{ "delta": {}, "finish_reason": "tool_calls" }]})),
            ],
            vec![
                chunk(json!({ "choices": [{ "delta": { "content": "Two invoices in May." }}]})),
                chunk(json!({ "choices": [{ "delta": {}, "finish_reason": "stop" }]})),
            ],
        ]);
        let dispatcher = Arc::new(RecordingDispatcher {
            calls: Mutex::new(Vec::new()),
            result: json!({ "content": "2 invoices" }),
        });
        let store = Arc::new(SessionStore::new());
        let adapter = adapter_with(&store, dispatcher.clone(), client);
        let session = store.create_session(UserId::new(), OPENAI_ADAPTER_ID, None);

        let turn = adapter
            .process_message(&session, &InboundMessage::new("invoices for May"), None)
            .await
            .expect("turn");

        let calls = dispatcher.calls.lock().expect("lock");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "billing");
        assert_eq!(calls[0].1, "invoice_list");
        assert_eq!(calls[0].2["month"], "May");

        match &turn.events[0].payload {
            EventPayload::Message { content, .. } => assert_eq!(content, "Two invoices in May."),
            other => panic!("unexpected payload: {other:?}"),
        }

        // Tool message pairs with the assistant's tool_calls record.
        let history = store.history(session.id, OPENAI_ADAPTER_ID);
        let call_index = history
            .iter()
            .position(|r| r.get("tool_calls").is_some())
            .expect("tool_calls record");
        assert_eq!(history[call_index + 1]["role"], "tool");
        assert_eq!(history[call_index + 1]["tool_call_id"], "call_1");
    }

    #[tokio::test]
    async fn malformed_arguments_degrade_to_default_action() {
        let client = ScriptedClient::new(vec![
            vec![
                chunk(json!({ "choices": [{ "delta": { "tool_calls": [
                    { "index": 0, "id": "call_9", "function": { "name": "billing", "arguments": "{not json" } }
                ]}}]})),
                chunk(json!({ "choices": [{ "delta": {}, "finish_reason": "tool_calls" }]})),
            ],
            vec![
                chunk(json!({ "choices": [{ "delta": { "content": "Done." }}]})),
                chunk(json!({ "choices": [{ "delta": {}, "finish_reason": "stop" }]})),
            ],
        ]);
        let dispatcher = Arc::new(RecordingDispatcher {
            calls: Mutex::new(Vec::new()),
            result: json!("ok"),
        });
        let store = Arc::new(SessionStore::new());
        let adapter = adapter_with(&store, dispatcher.clone(), client);
        let session = store.create_session(UserId::new(), OPENAI_ADAPTER_ID, None);

        adapter
            .process_message(&session, &InboundMessage::new("bill things"), None)
            .await
            .expect("turn");

        let calls = dispatcher.calls.lock().expect("lock");
        assert_eq!(calls[0].1, DEFAULT_ACTION);
        assert_eq!(calls[0].2, json!({}));
    }

    #[tokio::test]
    async fn interleaved_calls_buffer_independently() {
        let client = ScriptedClient::new(vec![
            vec![
                chunk(json!({ "choices": [{ "delta": { "tool_calls": [
                    { "index": 0, "id": "call_a", "function": { "name": "billing", "arguments": "{\"action\":" } },
                    { "index": 1, "id": "call_b", "function": { "name": "billing", "arguments": "{\"action\":\"pay" } }
                ]}}]})),
                chunk(json!({ "choices": [{ "delta": { "tool_calls": [
                    { "index": 1, "function": { "arguments": "ment_status\"}" } },
                    { "index": 0, "function": { "arguments": "\"invoice_list\"}" } }
                ]}}]})),
                chunk(json!({ "choices": [{ "delta": {}, "finish_reason": "tool_calls" }]})),
            ],
            vec![
                chunk(json!({ "choices": [{ "delta": { "content": "Both done." }}]})),
                chunk(json!({ "choices": [{ "delta": {}, "finish_reason": "stop" }]})),
            ],
        ]);
        let dispatcher = Arc::new(RecordingDispatcher {
            calls: Mutex::new(Vec::new()),
            result: json!("ok"),
        });
        let store = Arc::new(SessionStore::new());
        let adapter = adapter_with(&store, dispatcher.clone(), client);
        let session = store.create_session(UserId::new(), OPENAI_ADAPTER_ID, None);

        adapter
            .process_message(&session, &InboundMessage::new("run both"), None)
            .await
            .expect("turn");

        let calls = dispatcher.calls.lock().expect("lock");
        let actions: Vec<&str> = calls.iter().map(|c| c.1.as_str()).collect();
        assert_eq!(actions, vec!["invoice_list", "payment_status"]);
    }

    #[tokio::test]
    async fn history_is_capped_without_orphans() {
        let store = Arc::new(SessionStore::new());
        let session = store.create_session(UserId::new(), OPENAI_ADAPTER_ID, None);

        let mut seeded: Vec<JsonValue> = Vec::new();
        for i in 0..20 {
            seeded.push(json!({ "role": "user", "content": format!("q{i}") }));
            seeded.push(json!({ "role": "assistant", "content": null, "tool_calls": [
                { "id": format!("call_{i}"), "type": "function",
                  "function": { "name": "billing", "arguments": "{}" } }
            ]}));
            seeded.push(json!({ "role": "tool", "tool_call_id": format!("call_{i}"), "content": "ok" }));
        }
        store.store_history(session.id, OPENAI_ADAPTER_ID, seeded);

        let client = ScriptedClient::new(vec![vec![
            chunk(json!({ "choices": [{ "delta": { "content": "Fresh." }}]})),
            chunk(json!({ "choices": [{ "delta": {}, "finish_reason": "stop" }]})),
        ]]);
        let adapter = adapter_with(
            &store,
            Arc::new(RecordingDispatcher {
                calls: Mutex::new(Vec::new()),
                result: json!("ok"),
            }),
            client,
        );

        adapter
            .process_message(&session, &InboundMessage::new("newest"), None)
            .await
            .expect("turn");

        let history = store.history(session.id, OPENAI_ADAPTER_ID);
        assert!(history.len() <= CLOUD_HISTORY_CAP);
        assert_ne!(history.first().expect("head")["role"], "tool");
        assert_eq!(history.last().expect("tail")["content"], "Fresh.");
    }

    #[tokio::test]
    async fn status_reports_missing_credentials() {
        let store = Arc::new(SessionStore::new());
        let adapter = OpenAiAdapter::from_config(
            &OpenAiConfig::default(),
            store,
            Arc::new(RecordingDispatcher {
                calls: Mutex::new(Vec::new()),
                result: json!("ok"),
            }),
            catalog(),
        );

        let status = adapter.status();
        assert!(!status.available);
        assert!(status.detail.contains("OPENAI_API_KEY"));
        assert_eq!(adapter.status(), adapter.status());
    }
}
