//! End-to-end turns through `ConversationDriver` with a scripted provider and
//! scripted tool servers.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatrelay_core::{
    ConversationDriver, FirstRound, RESPONSE_SEPARATOR, RelayError, Transcript, TurnOptions,
    TurnState,
};
use chatrelay_mcp::jsonrpc::JsonRpcResponse;
use chatrelay_mcp::transport::BoxFuture;
use chatrelay_mcp::{Connector, McpClient, McpError, McpTransport, ToolServerConfig};
use chatrelay_types::{
    ApiError, ChatCompletionRequest, ChatCompletionResponse, ChatDelta, ChatMessage, ChatProvider,
    Choice, DeltaStream, Role, ToolCall,
};
use futures_util::stream;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

/// Answers `complete` with a fixed assistant message and `stream` with fixed
/// deltas, optionally never finishing the stream.
struct MockProvider {
    first: ChatMessage,
    deltas: Vec<&'static str>,
    hang_after_deltas: bool,
    requests: Mutex<Vec<ChatCompletionRequest>>,
    stream_calls: AtomicUsize,
}

impl MockProvider {
    fn new(first: ChatMessage, deltas: Vec<&'static str>) -> Self {
        Self {
            first,
            deltas,
            hang_after_deltas: false,
            requests: Mutex::new(Vec::new()),
            stream_calls: AtomicUsize::new(0),
        }
    }

    fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl ChatProvider for MockProvider {
    fn complete<'a>(
        &'a self,
        request: &'a ChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ChatCompletionResponse, ApiError>> + Send + 'a>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            Ok(ChatCompletionResponse {
                id: Some("chatcmpl-test".into()),
                model: Some(request.model.clone()),
                choices: vec![Choice {
                    index: 0,
                    message: self.first.clone(),
                    finish_reason: None,
                }],
            })
        })
    }

    fn stream<'a>(
        &'a self,
        request: &'a ChatCompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream, ApiError>> + Send + 'a>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request.clone());
            self.stream_calls.fetch_add(1, Ordering::SeqCst);
            let deltas = stream::iter(
                self.deltas
                    .iter()
                    .map(|text| {
                        Ok::<_, ApiError>(ChatDelta {
                            content: Some(text.to_string()),
                            ..Default::default()
                        })
                    })
                    .collect::<Vec<_>>(),
            );
            let stream: DeltaStream = if self.hang_after_deltas {
                Box::pin(futures_util::StreamExt::chain(deltas, stream::pending()))
            } else {
                Box::pin(deltas)
            };
            Ok(stream)
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Scripted tool servers
// ---------------------------------------------------------------------------

/// Tool behavior is chosen by name: `fail` answers with a JSON-RPC error,
/// `flaky` with an `isError` result, `slow` sleeps for a minute, anything
/// else echoes its arguments.
struct ScriptedTransport {
    endpoint: String,
    tools: Vec<Value>,
    closes: Arc<AtomicUsize>,
}

impl McpTransport for ScriptedTransport {
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Option<Value>,
    ) -> BoxFuture<'a, Result<JsonRpcResponse, McpError>> {
        Box::pin(async move {
            let params = params.unwrap_or_default();
            let result = match method {
                "initialize" => json!({"protocolVersion": "2024-11-05"}),
                "tools/list" => json!({"tools": self.tools}),
                "tools/call" => match params["name"].as_str().unwrap_or("") {
                    "fail" => {
                        return Ok(serde_json::from_value(json!({
                            "jsonrpc": "2.0", "id": 1,
                            "error": {"code": -32000, "message": "backend exploded"}
                        }))?);
                    }
                    "flaky" => json!({
                        "content": [{"type": "text", "text": "quota exceeded"}],
                        "isError": true
                    }),
                    "slow" => {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        json!({"content": []})
                    }
                    name => json!({
                        "content": [{"type": "text", "text": format!("{name}:{}", params["arguments"])}]
                    }),
                },
                other => return Err(McpError::Protocol(format!("unexpected method {other}"))),
            };
            Ok(serde_json::from_value(
                json!({"jsonrpc": "2.0", "id": 1, "result": result}),
            )?)
        })
    }

    fn notify<'a>(
        &'a self,
        _method: &'a str,
        _params: Option<Value>,
    ) -> BoxFuture<'a, Result<(), McpError>> {
        Box::pin(async { Ok(()) })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.closes.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Default)]
struct ScriptedConnector {
    tools: HashMap<String, Vec<&'static str>>,
    failing: Vec<&'static str>,
    closes: Mutex<HashMap<String, Arc<AtomicUsize>>>,
}

impl ScriptedConnector {
    fn with_tools(server: &str, tools: &[&'static str]) -> Self {
        let mut map = HashMap::new();
        map.insert(server.to_string(), tools.to_vec());
        Self {
            tools: map,
            ..Default::default()
        }
    }

    fn close_count(&self, server: &str) -> usize {
        self.closes
            .lock()
            .unwrap()
            .get(server)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

impl Connector for ScriptedConnector {
    fn connect<'a>(
        &'a self,
        server_id: &'a str,
        config: &'a ToolServerConfig,
    ) -> BoxFuture<'a, Result<McpClient, McpError>> {
        Box::pin(async move {
            if self.failing.iter().any(|s| *s == server_id) {
                return Err(McpError::Network {
                    endpoint: config.endpoint(),
                    message: "connection refused".into(),
                });
            }
            let closes = Arc::new(AtomicUsize::new(0));
            self.closes
                .lock()
                .unwrap()
                .insert(server_id.to_string(), Arc::clone(&closes));
            let tools = self
                .tools
                .get(server_id)
                .map(|names| {
                    names
                        .iter()
                        .map(|name| json!({"name": name, "inputSchema": {"type": "object"}}))
                        .collect()
                })
                .unwrap_or_default();
            let transport = ScriptedTransport {
                endpoint: config.endpoint(),
                tools,
                closes,
            };
            let client = McpClient::with_transport(server_id, Arc::new(transport));
            client.initialize().await?;
            Ok(client)
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn servers(ids: &[&str]) -> Vec<(String, ToolServerConfig)> {
    ids.iter()
        .map(|id| {
            (
                id.to_string(),
                ToolServerConfig::streamable_http(format!("http://{id}.test/mcp")),
            )
        })
        .collect()
}

fn calling(calls: &[(&str, &str, &str)]) -> ChatMessage {
    let mut message = ChatMessage::assistant("");
    message.content = None;
    message.tool_calls = Some(
        calls
            .iter()
            .map(|(id, name, args)| ToolCall::new(*id, *name, *args))
            .collect(),
    );
    message
}

fn driver(provider: &Arc<MockProvider>, connector: &Arc<ScriptedConnector>) -> ConversationDriver {
    let provider: Arc<dyn ChatProvider> = provider.clone();
    let connector: Arc<dyn Connector> = connector.clone();
    ConversationDriver::new(provider, TurnOptions::new("gpt-4o")).with_connector(connector)
}

fn history() -> Transcript {
    Transcript::new(vec![ChatMessage::user("What is 2 + 2?")])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn answer_without_tool_calls_short_circuits() {
    let provider = Arc::new(MockProvider::new(ChatMessage::assistant("4"), vec![]));
    let connector = Arc::new(ScriptedConnector::with_tools("calc", &["add"]));

    let first = driver(&provider, &connector)
        .start(&servers(&["calc"]), history(), CancellationToken::new())
        .await
        .unwrap();

    match first {
        FirstRound::Answered { text, transcript } => {
            assert_eq!(text, "4");
            assert_eq!(transcript.len(), 2);
            assert_eq!(transcript.messages()[1].role, Role::Assistant);
        }
        other => panic!("Expected Answered, got: {other:?}"),
    }
    assert_eq!(connector.close_count("calc"), 1, "released before returning");
    assert_eq!(provider.stream_calls.load(Ordering::SeqCst), 0);

    let requests = provider.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].tool_choice.as_deref(), Some("auto"));
    let tools = requests[0].tools.as_ref().unwrap();
    assert_eq!(tools[0].function.name, "add");
    assert_eq!(tools[0].function.description, "No description provided");
}

#[tokio::test]
async fn empty_catalog_offers_no_tools() {
    let provider = Arc::new(MockProvider::new(ChatMessage::assistant("hello"), vec![]));
    let connector = Arc::new(ScriptedConnector::default());

    driver(&provider, &connector)
        .start(&[], history(), CancellationToken::new())
        .await
        .unwrap();

    let requests = provider.requests();
    assert!(requests[0].tools.is_none());
    assert!(requests[0].tool_choice.is_none());
}

#[tokio::test]
async fn tool_calls_run_in_order_and_failures_stay_inline() {
    let provider = Arc::new(MockProvider::new(
        calling(&[
            ("call_1", "add", r#"{"a":2,"b":2}"#),
            ("call_2", "fail", "{}"),
            ("call_3", "echo", r#"{"text":"done"}"#),
        ]),
        vec!["The answer", " is 4."],
    ));
    let connector = Arc::new(ScriptedConnector::with_tools("calc", &["add", "fail", "echo"]));

    let first = driver(&provider, &connector)
        .start(&servers(&["calc"]), history(), CancellationToken::new())
        .await
        .unwrap();
    let round = match first {
        FirstRound::ToolCalls(round) => round,
        other => panic!("Expected ToolCalls, got: {other:?}"),
    };
    assert_eq!(round.state(), TurnState::ExecutingTools);
    assert_eq!(round.calls().len(), 3);
    assert_eq!(connector.close_count("calc"), 0);

    let mut output = Vec::new();
    let transcript = round.run(|chunk| output.push(chunk)).await.unwrap();
    let text = output.concat();

    // user, assistant(tool_calls), three tool results, final assistant
    let messages = transcript.messages();
    assert_eq!(messages.len(), 6);
    let tool_messages: Vec<&ChatMessage> =
        messages.iter().filter(|m| m.role == Role::Tool).collect();
    assert_eq!(tool_messages.len(), 3);
    assert_eq!(
        tool_messages
            .iter()
            .map(|m| m.tool_call_id.as_deref().unwrap())
            .collect::<Vec<_>>(),
        vec!["call_1", "call_2", "call_3"]
    );
    assert!(!tool_messages[0].text().unwrap().starts_with("Error:"));
    assert!(tool_messages[1].text().unwrap().starts_with("Error:"));
    assert!(
        tool_messages[1].text().unwrap().contains("backend exploded"),
        "got: {:?}",
        tool_messages[1].text()
    );
    assert!(!tool_messages[2].text().unwrap().starts_with("Error:"));
    assert_eq!(messages[5].text(), Some("The answer is 4."));

    let add = text.find("🔧 **Calling Tool**: add").unwrap();
    let fail = text.find("🔧 **Calling Tool**: fail").unwrap();
    let echo = text.find("🔧 **Calling Tool**: echo").unwrap();
    let separator = text.find(RESPONSE_SEPARATOR).unwrap();
    assert!(add < fail && fail < echo && echo < separator);
    assert!(text.contains("📝 **Arguments**: {\n  \"a\": 2,\n  \"b\": 2\n}\n\n"));
    assert!(text.contains("❌ **Tool Error**: "));
    assert_eq!(text.matches("✅ **Tool Result**:").count(), 2);
    assert!(text.ends_with(&format!("{RESPONSE_SEPARATOR}The answer is 4.")));

    let requests = provider.requests();
    assert_eq!(requests.len(), 2, "at most two rounds");
    assert!(requests[1].tools.is_none());
    assert!(requests[1].tool_choice.is_none());
    assert_eq!(requests[1].messages.len(), 5);
    assert_eq!(connector.close_count("calc"), 1);
}

#[tokio::test]
async fn malformed_arguments_are_reported_without_invoking() {
    let provider = Arc::new(MockProvider::new(
        calling(&[("call_1", "echo", "{not json")]),
        vec!["ok"],
    ));
    let connector = Arc::new(ScriptedConnector::with_tools("s", &["echo"]));

    let FirstRound::ToolCalls(round) = driver(&provider, &connector)
        .start(&servers(&["s"]), history(), CancellationToken::new())
        .await
        .unwrap()
    else {
        panic!("Expected tool calls");
    };

    let mut text = String::new();
    let transcript = round.run(|chunk| text.push_str(&chunk)).await.unwrap();

    assert!(text.contains("📝 **Arguments**: {not json\n\n"), "got: {text}");
    assert!(text.contains("❌ **Tool Error**: Invalid tool arguments"));
    let tool_message = &transcript.messages()[2];
    assert_eq!(tool_message.role, Role::Tool);
    assert!(tool_message.text().unwrap().starts_with("Error: Invalid tool arguments"));
}

#[tokio::test]
async fn tool_reported_error_is_an_error_segment() {
    let provider = Arc::new(MockProvider::new(
        calling(&[("call_1", "flaky", "{}")]),
        vec!["sorry"],
    ));
    let connector = Arc::new(ScriptedConnector::with_tools("s", &["flaky"]));

    let FirstRound::ToolCalls(round) = driver(&provider, &connector)
        .start(&servers(&["s"]), history(), CancellationToken::new())
        .await
        .unwrap()
    else {
        panic!("Expected tool calls");
    };

    let mut text = String::new();
    let transcript = round.run(|chunk| text.push_str(&chunk)).await.unwrap();
    assert!(text.contains("❌ **Tool Error**: quota exceeded\n\n"));
    assert_eq!(transcript.messages()[2].text(), Some("Error: quota exceeded"));
}

#[tokio::test]
async fn connect_failure_aborts_and_releases_earlier_servers() {
    let provider = Arc::new(MockProvider::new(ChatMessage::assistant("unused"), vec![]));
    let connector = Arc::new(ScriptedConnector {
        failing: vec!["b"],
        ..Default::default()
    });

    let err = driver(&provider, &connector)
        .start(&servers(&["a", "b", "c"]), history(), CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        RelayError::Mcp(McpError::Connect { endpoint, .. }) => {
            assert_eq!(endpoint, "http://b.test/mcp");
        }
        other => panic!("Expected Connect error, got: {other:?}"),
    }
    assert_eq!(err.status_code(), 500);
    assert_eq!(connector.close_count("a"), 1);
    assert_eq!(connector.close_count("c"), 0);
    assert!(provider.requests().is_empty());
}

#[tokio::test]
async fn cancelling_the_second_round_drains_connections() {
    let mut provider = MockProvider::new(calling(&[("call_1", "echo", "{}")]), vec!["partial"]);
    provider.hang_after_deltas = true;
    let provider = Arc::new(provider);
    let connector = Arc::new(ScriptedConnector::with_tools("s", &["echo"]));
    let cancel = CancellationToken::new();

    let FirstRound::ToolCalls(round) = driver(&provider, &connector)
        .start(&servers(&["s"]), history(), cancel.clone())
        .await
        .unwrap()
    else {
        panic!("Expected tool calls");
    };

    let trigger = cancel.clone();
    let result = round
        .run(move |chunk| {
            if chunk == "partial" {
                trigger.cancel();
            }
        })
        .await;

    assert!(matches!(result, Err(RelayError::Cancelled)), "got: {result:?}");
    assert_eq!(connector.close_count("s"), 1);
}

#[tokio::test]
async fn dropping_a_running_round_closes_connections_in_background() {
    let provider = Arc::new(MockProvider::new(
        calling(&[("call_1", "slow", "{}")]),
        vec!["never"],
    ));
    let connector = Arc::new(ScriptedConnector::with_tools("s", &["slow"]));

    let FirstRound::ToolCalls(round) = driver(&provider, &connector)
        .start(&servers(&["s"]), history(), CancellationToken::new())
        .await
        .unwrap()
    else {
        panic!("Expected tool calls");
    };

    let timed_out = tokio::time::timeout(Duration::from_millis(50), round.run(|_| {})).await;
    assert!(timed_out.is_err());

    for _ in 0..50 {
        if connector.close_count("s") > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(connector.close_count("s"), 1);
    assert_eq!(provider.stream_calls.load(Ordering::SeqCst), 0);
}
