//! The keyword-routed local adapter: the zero-dependency fallback.
//!
//! No model call. The message is parsed into a routed intent by the external
//! keyword matcher, the tool dispatcher is invoked once, and the result is
//! wrapped as a single terminal message event. No loop, no streaming, no
//! stored history.

use crate::adapter::{AdapterStatus, ChatAdapter, EmitFn, InboundMessage, Turn};
use crate::dispatch::{ToolDispatcher, dispatch_checked};
use crate::error::AdapterError;
use crate::intent::IntentParser;
use crate::normalize;
use async_trait::async_trait;
use std::sync::Arc;
use switchboard_core::Result;
use switchboard_session::{BridgeEvent, BridgeSession};
use tracing::{debug, instrument};

/// Runtime-mode id of the local adapter.
pub const LOCAL_ADAPTER_ID: &str = "local";

/// Keyword-routed adapter.
pub struct KeywordAdapter {
    parser: Arc<dyn IntentParser>,
    dispatcher: Arc<dyn ToolDispatcher>,
}

impl KeywordAdapter {
    /// Creates the adapter from its collaborators.
    #[must_use]
    pub fn new(parser: Arc<dyn IntentParser>, dispatcher: Arc<dyn ToolDispatcher>) -> Self {
        Self { parser, dispatcher }
    }
}

#[async_trait]
impl ChatAdapter for KeywordAdapter {
    fn id(&self) -> &'static str {
        LOCAL_ADAPTER_ID
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus::available("keyword routing, no model required")
    }

    #[instrument(skip(self, session, message, _emit), fields(session_id = %session.id))]
    async fn process_message(
        &self,
        session: &BridgeSession,
        message: &InboundMessage,
        _emit: Option<&EmitFn>,
    ) -> Result<Turn, AdapterError> {
        let intent = self
            .parser
            .parse_and_route(&message.content, session.user_id)
            .await
            .map_err(|e| AdapterError::Protocol {
                reason: e.to_string(),
            })?;

        debug!(
            tool = %intent.tool,
            action = %intent.action,
            confidence = intent.confidence,
            "routed intent"
        );

        let result = dispatch_checked(
            self.dispatcher.as_ref(),
            &intent.tool,
            &intent.action,
            &intent.parameters,
            session.user_id,
        )
        .await;

        let content = normalize::display_text(&result);
        let hint = normalize::voice_hint(&result);
        Ok(Turn::terminal(BridgeEvent::assistant(content, hint)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{IntentError, ToolError};
    use crate::intent::RoutedIntent;
    use serde_json::{Value as JsonValue, json};
    use std::sync::Mutex;
    use switchboard_core::UserId;
    use switchboard_session::{EventPayload, MessageRole, SessionStore};

    struct FixedParser {
        intent: RoutedIntent,
    }

    #[async_trait]
    impl IntentParser for FixedParser {
        async fn parse_and_route(
            &self,
            _text: &str,
            _user_id: UserId,
        ) -> std::result::Result<RoutedIntent, IntentError> {
            Ok(self.intent.clone())
        }
    }

    struct RecordingDispatcher {
        calls: Mutex<Vec<(String, String)>>,
        result: JsonValue,
    }

    #[async_trait]
    impl ToolDispatcher for RecordingDispatcher {
        async fn execute_tool(
            &self,
            tool: &str,
            action: &str,
            _parameters: &JsonValue,
            _user_id: UserId,
        ) -> std::result::Result<JsonValue, ToolError> {
            self.calls
                .lock()
                .expect("lock")
                .push((tool.to_string(), action.to_string()));
            Ok(self.result.clone())
        }
    }

    #[tokio::test]
    async fn routes_message_to_single_tool_call() {
        let parser = Arc::new(FixedParser {
            intent: RoutedIntent {
                tool: "pipeline".to_string(),
                action: "stats".to_string(),
                parameters: json!({}),
                confidence: 0.92,
            },
        });
        let dispatcher = Arc::new(RecordingDispatcher {
            calls: Mutex::new(Vec::new()),
            result: json!({ "content": [{ "type": "text", "text": "12 open deals" }] }),
        });
        let adapter = KeywordAdapter::new(parser, dispatcher.clone());

        let store = SessionStore::new();
        let session = store.create_session(UserId::new(), LOCAL_ADAPTER_ID, None);
        let turn = adapter
            .process_message(&session, &InboundMessage::new("show my pipeline stats"), None)
            .await
            .expect("turn");

        assert_eq!(dispatcher.calls.lock().expect("lock").as_slice(), &[(
            "pipeline".to_string(),
            "stats".to_string()
        )]);
        assert_eq!(turn.events.len(), 1);
        match &turn.events[0].payload {
            EventPayload::Message { role, content, .. } => {
                assert_eq!(*role, MessageRole::Assistant);
                assert_eq!(content, "12 open deals");
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn status_is_stable() {
        let parser = Arc::new(FixedParser {
            intent: RoutedIntent {
                tool: "pipeline".to_string(),
                action: "stats".to_string(),
                parameters: json!({}),
                confidence: 1.0,
            },
        });
        let dispatcher = Arc::new(RecordingDispatcher {
            calls: Mutex::new(Vec::new()),
            result: json!("ok"),
        });
        let adapter = KeywordAdapter::new(parser, dispatcher);

        assert_eq!(adapter.status(), adapter.status());
        assert!(adapter.status().available);
    }
}
