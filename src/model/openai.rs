//! OpenAI-compatible chat completions client.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Decision, DecisionProvider, DecisionRequest, ModelError};
use crate::config::ModelSettings;
use crate::types::{Message, Role, ToolCallRequest, ToolDefinition};

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<SecretString>,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Result<Self, ModelError> {
        Self::build(
            base_url.into(),
            model.into(),
            None,
            0.7,
            Duration::from_secs(120),
        )
    }

    pub fn from_settings(settings: &ModelSettings) -> Result<Self, ModelError> {
        Self::build(
            settings.base_url.clone(),
            settings.model.clone(),
            settings.api_key.clone(),
            settings.temperature,
            Duration::from_secs(settings.timeout_secs),
        )
    }

    fn build(
        base_url: String,
        model: String,
        api_key: Option<SecretString>,
        temperature: f32,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
            temperature,
            timeout,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(key.into()));
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn body<'a>(&'a self, request: &'a DecisionRequest) -> ChatRequest<'a> {
        let tools: Vec<WireTool<'a>> = request.tools.iter().map(WireTool::from).collect();
        ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: request.messages.iter().map(WireMessage::from).collect(),
            tool_choice: (!tools.is_empty()).then_some("auto"),
            tools,
        }
    }

    async fn error_from(response: reqwest::Response) -> ModelError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error.message)
            .unwrap_or(text);

        match status {
            401 | 403 => ModelError::Unauthorized { status, message },
            429 => ModelError::RateLimited { retry_after },
            _ => ModelError::Api { status, message },
        }
    }
}

#[async_trait]
impl DecisionProvider for OpenAiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn decide(&self, request: &DecisionRequest) -> Result<Decision, ModelError> {
        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Requesting decision"
        );

        let mut builder = self.http.post(self.endpoint()).json(&self.body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(self.timeout)
            } else {
                ModelError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("no choices in response".into()))?;

        let calls = choice
            .message
            .tool_calls
            .into_iter()
            .map(|call| {
                ToolCallRequest::new(
                    call.id,
                    call.function.name,
                    parse_arguments(&call.function.arguments),
                )
            })
            .collect();

        Ok(Decision::from_parts(
            choice.message.content.unwrap_or_default(),
            calls,
        ))
    }
}

/// Unparseable argument text is kept as a string so validation can reject it.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: Role,
    content: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(message: &'a Message) -> Self {
        let tool_calls = message.has_tool_calls().then(|| {
            message
                .tool_calls
                .iter()
                .flatten()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: "function".into(),
                    function: WireFunctionCall {
                        name: call.tool_name.clone(),
                        arguments: match &call.arguments {
                            Value::String(raw) => raw.clone(),
                            other => other.to_string(),
                        },
                    },
                })
                .collect()
        });
        Self {
            role: message.role,
            content: &message.content,
            tool_calls,
            tool_call_id: message.tool_call_id.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

impl<'a> From<&'a ToolDefinition> for WireTool<'a> {
    fn from(def: &'a ToolDefinition) -> Self {
        Self {
            kind: "function",
            function: WireFunction {
                name: &def.name,
                description: &def.description,
                parameters: &def.parameters,
            },
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> DecisionRequest {
        DecisionRequest::new(
            vec![Message::user("how full is the disk?")],
            vec![ToolDefinition::new(
                "exec_shell",
                "Run a command",
                json!({"type": "object", "properties": {"command": {"type": "string"}}, "required": ["command"]}),
            )],
        )
    }

    fn client(server: &MockServer) -> OpenAiClient {
        OpenAiClient::new(server.uri(), "test-model")
            .unwrap()
            .with_api_key("sk-test")
    }

    #[tokio::test]
    async fn test_answer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "test-model", "tool_choice": "auto"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Disk is 40% full."}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let decision = client(&server).decide(&request()).await.unwrap();
        assert_eq!(decision, Decision::Answer("Disk is 40% full.".into()));
    }

    #[tokio::test]
    async fn test_tool_calls_and_malformed_arguments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "c1", "type": "function", "function": {"name": "exec_shell", "arguments": "{\"command\":\"df -h\"}"}},
                    {"id": "c2", "type": "function", "function": {"name": "exec_shell", "arguments": "{not json"}}
                ]}}]
            })))
            .mount(&server)
            .await;

        let decision = client(&server).decide(&request()).await.unwrap();
        let calls = decision.tool_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments, json!({"command": "df -h"}));
        assert_eq!(calls[1].arguments, Value::String("{not json".into()));
        assert_eq!(decision.content(), "");
    }

    #[tokio::test]
    async fn test_rate_limit_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "2")
                    .set_body_json(json!({"error": {"message": "slow down"}})),
            )
            .mount(&server)
            .await;

        let err = client(&server).decide(&request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_unauthorized_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": {"message": "bad key"}})),
            )
            .mount(&server)
            .await;

        let err = client(&server).decide(&request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.is_unauthorized());
        assert!(err.to_string().contains("bad key"));
    }

    #[tokio::test]
    async fn test_server_error_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client(&server).decide(&request()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("502"));
    }

    #[test]
    fn test_wire_message_tool_calls() {
        let msg = Message::assistant_tool_calls(
            "",
            vec![ToolCallRequest::new("c1", "list_files", json!({"path": "/tmp"}))],
        );
        let wire = serde_json::to_value(WireMessage::from(&msg)).unwrap();
        assert_eq!(wire["tool_calls"][0]["type"], "function");
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{\"path\":\"/tmp\"}");

        let result = Message::tool_result("c1", "{}");
        let wire = serde_json::to_value(WireMessage::from(&result)).unwrap();
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "c1");
        assert!(wire.get("tool_calls").is_none());
    }
}
