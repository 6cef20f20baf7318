//! Client for OpenAI-compatible chat completion endpoints.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::auth::{resolver_from_config, CredentialResolver};
use crate::config::Config;
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::super::conversation::Conversation;
use super::super::message::{Message, ToolCallRequest};
use super::{ChatCompletionResponse, LlmClient, LlmResponse, StreamAccumulator, Turn, Usage};

/// Header carrying the conversation's correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Chat completion client for any server speaking the OpenAI wire format.
pub struct OpenAiCompatibleClient {
    base_url: String,
    model: String,
    extra_params: Map<String, Value>,
    custom_headers: HeaderMap,
    resolver: Box<dyn CredentialResolver>,
    client: Client,
    stream: bool,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        resolver: Box<dyn CredentialResolver>,
    ) -> Result<Self> {
        let base_url = base_url.into();
        url::Url::parse(&base_url)
            .map_err(|e| Error::Config(format!("Invalid base URL {:?}: {}", base_url, e)))?;

        Ok(Self {
            base_url,
            model: model.into(),
            extra_params: Map::new(),
            custom_headers: HeaderMap::new(),
            resolver,
            client: build_http_client(DEFAULT_TIMEOUT)?,
            stream: false,
        })
    }

    /// Build a client from configuration, including its credential resolver.
    pub fn from_config(config: &Config) -> Result<Self> {
        let resolver = resolver_from_config(config)?;
        Ok(Self::new(&config.llm.base_url, &config.llm.model, resolver)?
            .with_timeout(config.timeout()?)?
            .with_custom_headers(&config.llm.custom_headers)?
            .with_extra_params(config.llm.extra_params.clone())
            .with_streaming(config.llm.stream))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = build_http_client(timeout)?;
        Ok(self)
    }

    /// Headers sent on every request. They override anything set by the
    /// credential resolver, `Authorization` included.
    pub fn with_custom_headers(mut self, headers: &BTreeMap<String, String>) -> Result<Self> {
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::Config(format!("Invalid header name {:?}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("Invalid value for header {}: {}", name, e)))?;
            self.custom_headers.insert(name, value);
        }
        Ok(self)
    }

    /// Extra top-level fields merged into every request body.
    pub fn with_extra_params(mut self, params: Map<String, Value>) -> Self {
        self.extra_params = params;
        self
    }

    /// Request server-sent events from [`LlmClient::complete_streaming`].
    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_payload(&self, messages: &[Message], tools: &[ToolDefinition], stream: bool) -> Value {
        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.model));
        payload.insert(
            "messages".to_string(),
            Value::Array(messages.iter().map(message_to_json).collect()),
        );

        for (key, value) in &self.extra_params {
            payload.insert(key.clone(), value.clone());
        }
        payload.insert("stream".to_string(), json!(stream));

        if !tools.is_empty() {
            let declared: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters
                        }
                    })
                })
                .collect();
            payload.insert("tools".to_string(), Value::Array(declared));
            payload.insert("tool_choice".to_string(), json!("auto"));
        }

        Value::Object(payload)
    }

    fn parse_response(&self, response: ChatCompletionResponse) -> Result<LlmResponse> {
        let usage = response.usage.as_ref().map(Usage::from).unwrap_or_default();

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("Malformed response: no choices".to_string()))?;

        let calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, tc)| ToolCallRequest {
                id: tc.id.filter(|id| !id.is_empty()).unwrap_or_else(|| format!("call_{}", i)),
                arguments: parse_arguments(&tc.function.name, tc.function.arguments),
                name: tc.function.name,
            })
            .collect();

        let turn = Turn::from_parts(choice.message.content, calls)?;
        let finish_reason = choice.finish_reason.unwrap_or_else(|| match &turn {
            Turn::Text(_) => "stop".to_string(),
            Turn::ToolCalls { .. } => "tool_calls".to_string(),
        });

        Ok(LlmResponse {
            turn,
            finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(
        &self,
        conversation: &Conversation,
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse> {
        let response = self.send(conversation, tools, false).await?;
        self.read_completion(response).await
    }

    async fn complete_streaming(
        &self,
        conversation: &Conversation,
        tools: &[ToolDefinition],
        on_text: &(dyn for<'s> Fn(&'s str) + Send + Sync),
    ) -> Result<LlmResponse> {
        if !self.stream {
            return self.complete(conversation, tools).await;
        }

        let mut response = self.send(conversation, tools, true).await?;

        let event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);
        if !event_stream {
            debug!("Server answered a streaming request with a complete response");
            return self.read_completion(response).await;
        }

        let mut stream = StreamAccumulator::new();
        while let Some(bytes) = response.chunk().await.map_err(request_error)? {
            for text in stream.feed(&bytes)? {
                on_text(&text);
            }
            if stream.is_done() {
                break;
            }
        }
        for text in stream.flush()? {
            on_text(&text);
        }

        let parsed = stream.finish()?;
        log_completion(&parsed);
        Ok(parsed)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

impl OpenAiCompatibleClient {
    /// POST the conversation and return the response once its status is 2xx.
    async fn send(&self, conversation: &Conversation, tools: &[ToolDefinition], stream: bool) -> Result<Response> {
        let payload = self.build_payload(conversation.messages(), tools, stream);

        let request = self
            .client
            .post(self.endpoint())
            .header(CORRELATION_HEADER, conversation.correlation_id())
            .json(&payload)
            .build()
            .map_err(|e| Error::Provider(format!("Failed to build request: {}", e)))?;

        let mut request = self.resolver.apply(request).await?;
        for (name, value) in &self.custom_headers {
            request.headers_mut().insert(name.clone(), value.clone());
        }

        debug!(
            "POST {} ({} messages, {} tools, stream {}, correlation id {})",
            request.url(),
            conversation.len(),
            tools.len(),
            stream,
            conversation.correlation_id()
        );

        let response = self.client.execute(request).await.map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!("HTTP {}: {}", status, body)));
        }
        Ok(response)
    }

    async fn read_completion(&self, response: Response) -> Result<LlmResponse> {
        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Malformed response: {}", e)))?;

        let parsed = self.parse_response(completion)?;
        log_completion(&parsed);
        Ok(parsed)
    }
}

fn log_completion(parsed: &LlmResponse) {
    debug!(
        "Completion finished ({}), {} tool calls, {} tokens",
        parsed.finish_reason,
        parsed.turn.tool_calls().len(),
        parsed.usage.total_tokens
    );
}

fn request_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Provider(format!("Request timed out: {}", e))
    } else {
        Error::Provider(format!("Request failed: {}", e))
    }
}

fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))
}

fn message_to_json(message: &Message) -> Value {
    let mut value = json!({
        "role": message.role.as_str(),
        "content": message.content.as_ref().map(|c| c.to_text()),
    });

    if !message.tool_calls.is_empty() {
        value["tool_calls"] = message
            .tool_calls
            .iter()
            .map(|tc| {
                json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string()
                    }
                })
            })
            .collect();
    }
    if let Some(id) = &message.tool_call_id {
        value["tool_call_id"] = json!(id);
    }
    if let Some(name) = &message.name {
        value["name"] = json!(name);
    }
    value
}

/// Decode tool arguments; anything that is not a JSON object becomes `{}`.
pub(super) fn parse_arguments(tool: &str, raw: Value) -> Value {
    match raw {
        Value::Object(_) => raw,
        Value::String(text) if text.trim().is_empty() => json!({}),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => {
                warn!("Unparseable arguments for {}: {}", tool, text);
                json!({})
            }
        },
        _ => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::message::{Content, ToolResult};
    use crate::auth::StaticKeyResolver;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn text_completion(text: &str) -> Value {
        json!({
            "choices": [{
                "message": {"role": "assistant", "content": text},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        })
    }

    fn client(server: &MockServer, api_key: Option<&str>) -> OpenAiCompatibleClient {
        let resolver = StaticKeyResolver::new(api_key.map(String::from));
        OpenAiCompatibleClient::new(format!("{}/v1/", server.uri()), "test-model", Box::new(resolver)).unwrap()
    }

    fn sample_tools() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a file".to_string(),
            parameters: json!({"type": "object", "properties": {"file_path": {"type": "string"}}}),
        }]
    }

    #[tokio::test]
    async fn test_sends_auth_and_correlation_headers() {
        let server = MockServer::start().await;
        let conversation = Conversation::new("sys");

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(header(CORRELATION_HEADER, conversation.correlation_id()))
            .and(body_partial_json(json!({"model": "test-model", "stream": false, "tool_choice": "auto"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_completion("hi")))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server, Some("sk-test"))
            .complete(&conversation, &sample_tools())
            .await
            .unwrap();

        assert_eq!(response.turn, Turn::Text("hi".to_string()));
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_custom_headers_override_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Custom abc"))
            .and(header("x-team", "tools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_completion("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Custom abc".to_string());
        headers.insert("X-Team".to_string(), "tools".to_string());

        let client = client(&server, Some("sk-test")).with_custom_headers(&headers).unwrap();
        client.complete(&Conversation::default(), &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_extra_params_and_no_tools() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"temperature": 0.2, "max_tokens": 256})))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_completion("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let mut params = Map::new();
        params.insert("temperature".to_string(), json!(0.2));
        params.insert("max_tokens".to_string(), json!(256));

        let client = client(&server, None).with_extra_params(params);
        let payload = client.build_payload(&[], &[], false);
        assert!(payload.get("tools").is_none());
        assert!(payload.get("tool_choice").is_none());

        client.complete(&Conversation::default(), &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [
                            {"id": "call_a", "type": "function",
                             "function": {"name": "read_file", "arguments": "{\"file_path\": \"a.txt\"}"}},
                            {"id": "call_b", "type": "function",
                             "function": {"name": "list_directory", "arguments": "not json"}}
                        ]
                    },
                    "finish_reason": "tool_calls"
                }]
            })))
            .mount(&server)
            .await;

        let response = client(&server, None).complete(&Conversation::default(), &[]).await.unwrap();
        let calls = response.turn.tool_calls();

        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments, json!({"file_path": "a.txt"}));
        assert_eq!(calls[1].name, "list_directory");
        assert_eq!(calls[1].arguments, json!({}));
        assert_eq!(response.finish_reason, "tool_calls");
    }

    #[tokio::test]
    async fn test_non_success_status_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client(&server, None).complete(&Conversation::default(), &[]).await.unwrap_err();
        match err {
            Error::Provider(message) => {
                assert!(message.contains("503"));
                assert!(message.contains("overloaded"));
            }
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_and_empty_responses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_completion("")))
            .mount(&server)
            .await;

        let client = client(&server, None);
        let conversation = Conversation::default();

        let err = client.complete(&conversation, &[]).await.unwrap_err();
        assert!(matches!(err, Error::Provider(_)));

        let err = client.complete(&conversation, &[]).await.unwrap_err();
        assert!(err.to_string().contains("no assistant text"));
    }

    #[tokio::test]
    async fn test_timeout_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(text_completion("late"))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = client(&server, None).with_timeout(Duration::from_millis(100)).unwrap();
        let err = client.complete(&Conversation::default(), &[]).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    fn sse(events: &[Value]) -> String {
        let mut body: String = events.iter().map(|e| format!("data: {}\n\n", e)).collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[tokio::test]
    async fn test_streaming_text_reaches_callback() {
        let server = MockServer::start().await;
        let body = sse(&[
            json!({"choices": [{"delta": {"role": "assistant", "content": "Hello"}}]}),
            json!({"choices": [{"delta": {"content": ", world"}, "finish_reason": "stop"}]}),
        ]);
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .expect(1)
            .mount(&server)
            .await;

        let chunks = std::sync::Mutex::new(Vec::new());
        let response = client(&server, None)
            .with_streaming(true)
            .complete_streaming(&Conversation::default(), &[], &|text: &str| {
                chunks.lock().unwrap().push(text.to_string())
            })
            .await
            .unwrap();

        assert_eq!(response.turn, Turn::Text("Hello, world".to_string()));
        assert_eq!(response.finish_reason, "stop");
        assert_eq!(*chunks.lock().unwrap(), vec!["Hello".to_string(), ", world".to_string()]);
    }

    #[tokio::test]
    async fn test_streaming_tool_calls() {
        let server = MockServer::start().await;
        let body = sse(&[
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "type": "function",
                 "function": {"name": "read_file", "arguments": "{\"file_path\":"}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": " \"a.txt\"}"}}
            ]}, "finish_reason": "tool_calls"}]}),
        ]);
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let response = client(&server, None)
            .with_streaming(true)
            .complete_streaming(&Conversation::default(), &sample_tools(), &|_: &str| {})
            .await
            .unwrap();

        let calls = response.turn.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments, json!({"file_path": "a.txt"}));
    }

    #[tokio::test]
    async fn test_streaming_falls_back_to_plain_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_completion("whole")))
            .mount(&server)
            .await;

        let response = client(&server, None)
            .with_streaming(true)
            .complete_streaming(&Conversation::default(), &[], &|_: &str| {})
            .await
            .unwrap();
        assert_eq!(response.turn, Turn::Text("whole".to_string()));
    }

    #[tokio::test]
    async fn test_streaming_disabled_sends_stream_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_completion("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let seen = std::sync::Mutex::new(0);
        client(&server, None)
            .complete_streaming(&Conversation::default(), &[], &|_: &str| *seen.lock().unwrap() += 1)
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_streaming_malformed_event_is_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("data: {broken\n\n", "text/event-stream"))
            .mount(&server)
            .await;

        let err = client(&server, None)
            .with_streaming(true)
            .complete_streaming(&Conversation::default(), &[], &|_: &str| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Malformed stream chunk"));
    }

    #[test]
    fn test_message_serialization() {
        let call = ToolCallRequest {
            id: "call_1".to_string(),
            name: "read_file".to_string(),
            arguments: json!({"file_path": "a.txt"}),
        };
        let assistant = message_to_json(&Message::assistant_with_tools(None, vec![call.clone()]));
        assert_eq!(assistant["content"], Value::Null);
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], json!("{\"file_path\":\"a.txt\"}"));

        let result = ToolResult::success(&call, Content::Structured(json!({"content": "x"})));
        let tool = message_to_json(&Message::tool_result(&result));
        assert_eq!(tool["role"], json!("tool"));
        assert_eq!(tool["tool_call_id"], json!("call_1"));
        assert_eq!(tool["name"], json!("read_file"));
        assert!(tool["content"].as_str().unwrap().contains("\"content\""));
    }

    #[test]
    fn test_invalid_custom_header_is_config_error() {
        let resolver = StaticKeyResolver::new(None);
        let mut headers = BTreeMap::new();
        headers.insert("bad header".to_string(), "x".to_string());

        let result = OpenAiCompatibleClient::new("http://localhost", "m", Box::new(resolver))
            .unwrap()
            .with_custom_headers(&headers);
        assert!(matches!(result.err(), Some(Error::Config(_))));
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        let result = OpenAiCompatibleClient::new("not a url", "m", Box::new(StaticKeyResolver::new(None)));
        assert!(matches!(result.err(), Some(Error::Config(_))));
    }
}
