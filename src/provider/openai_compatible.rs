//! Streaming adapter for OpenAI-compatible Chat Completions endpoints.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{ConvoyError, Result};
use crate::types::{Role, ToolCall, Usage};

use super::http::{bearer_headers, parse_sse_line, shared_client, status_to_error, SseLine};
use super::{ModelProvider, ProviderMessage, ProviderRequest, ProviderResponse, StreamEvent};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Any endpoint speaking the Chat Completions streaming protocol.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    name: String,
    default_base_url: Option<String>,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: impl Into<String>, default_base_url: Option<String>) -> Self {
        Self {
            name: name.into(),
            default_base_url,
        }
    }

    pub fn openai() -> Self {
        Self::new("openai", Some(OPENAI_BASE_URL.to_string()))
    }

    pub fn openrouter() -> Self {
        Self::new("openrouter", Some(OPENROUTER_BASE_URL.to_string()))
    }

    pub fn gemini() -> Self {
        Self::new("gemini", Some(GEMINI_BASE_URL.to_string()))
    }

    fn base_url(&self, request: &ProviderRequest) -> Result<String> {
        request
            .credentials
            .base_url
            .clone()
            .or_else(|| self.default_base_url.clone())
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                ConvoyError::Configuration(format!("No base URL configured for '{}'", self.name))
            })
    }

    fn build_request_body(&self, request: &ProviderRequest) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), request.model_id.clone().into());
        body.insert(
            "messages".into(),
            request.messages.iter().map(message_to_openai).collect(),
        );
        body.insert("stream".into(), true.into());
        body.insert("stream_options".into(), json!({ "include_usage": true }));

        if let Some(max) = request.settings.max_tokens {
            body.insert("max_tokens".into(), max.into());
        }
        if let Some(temp) = request.settings.temperature {
            body.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = request.settings.top_p {
            body.insert("top_p".into(), top_p.into());
        }
        if let Some(effort) = request.settings.reasoning_effort {
            body.insert("reasoning_effort".into(), effort.to_string().into());
        }

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body.insert("tools".into(), tools.into());
        }

        Value::Object(body)
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatibleProvider {
    fn provider_name(&self) -> &str {
        &self.name
    }

    async fn stream_message(
        &self,
        request: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url(request)?);
        let body = self.build_request_body(request);

        debug!(
            provider = %self.name,
            model = %request.model_id,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "chat completions stream"
        );

        let resp = shared_client()?
            .post(&url)
            .headers(bearer_headers(request.credentials.api_key.as_deref()))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut acc = StreamAccumulator::default();
            let mut buffer: Vec<u8> = Vec::new();
            futures::pin_mut!(byte_stream);

            'read: while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(ConvoyError::Network(e));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&raw);
                    match parse_sse_line(line.trim()) {
                        Some(SseLine::Done) => break 'read,
                        Some(SseLine::Data(data)) => match serde_json::from_str::<ChatChunk>(data) {
                            Ok(parsed) => {
                                if let Some(error) = parsed.error.as_ref() {
                                    yield Err(ConvoyError::Stream(stream_error_message(error)));
                                    return;
                                }
                                for event in acc.apply(parsed) {
                                    yield Ok(event);
                                }
                            }
                            Err(e) => debug!(error = %e, "skipping unparseable stream chunk"),
                        },
                        None => {}
                    }
                }
            }

            yield Ok(StreamEvent::Done(acc.finish()));
        };

        Ok(Box::pin(stream))
    }
}

fn stream_error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string())
}

fn message_to_openai(msg: &ProviderMessage) -> Value {
    match msg.role {
        Role::System => json!({ "role": "system", "content": msg.text }),
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.text,
        }),
        Role::User if msg.attachments.is_empty() => json!({ "role": "user", "content": msg.text }),
        Role::User => {
            let mut parts = vec![json!({ "type": "text", "text": msg.text })];
            for attachment in &msg.attachments {
                if attachment.is_image() {
                    parts.push(json!({
                        "type": "image_url",
                        "image_url": {
                            "url": format!("data:{};base64,{}", attachment.mime_type, attachment.data)
                        }
                    }));
                } else if let Some(text) = attachment.decoded_text() {
                    parts.push(json!({
                        "type": "text",
                        "text": format!("[Attachment: {}]\n{text}", attachment.name),
                    }));
                }
            }
            json!({ "role": "user", "content": parts })
        }
        Role::Assistant => {
            let mut out = Map::new();
            out.insert("role".into(), "assistant".into());
            out.insert(
                "content".into(),
                if msg.text.is_empty() {
                    Value::Null
                } else {
                    Value::String(msg.text.clone())
                },
            );
            if !msg.tool_calls.is_empty() {
                let calls: Vec<Value> = msg.tool_calls.iter().map(tool_call_to_openai).collect();
                out.insert("tool_calls".into(), calls.into());
            }
            Value::Object(out)
        }
    }
}

fn tool_call_to_openai(call: &ToolCall) -> Value {
    let mut value = json!({
        "id": call.id,
        "type": "function",
        "function": {
            "name": call.name,
            "arguments": call.arguments,
        }
    });
    if let (Some(signature), Some(obj)) = (&call.thought_signature, value.as_object_mut()) {
        obj.insert(
            "extra_content".into(),
            json!({ "google": { "thought_signature": signature } }),
        );
    }
    value
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
    thought_signature: Option<String>,
    announced: bool,
}

/// Folds stream chunks into display events and the final response.
#[derive(Default)]
struct StreamAccumulator {
    text: String,
    calls: BTreeMap<u64, PartialToolCall>,
    usage: Option<Usage>,
}

impl StreamAccumulator {
    fn apply(&mut self, chunk: ChatChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
                reasoning_tokens: usage
                    .completion_tokens_details
                    .and_then(|d| d.reasoning_tokens),
            });
        }

        for choice in chunk.choices {
            let Some(delta) = choice.delta else { continue };
            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                self.text.push_str(&text);
                events.push(StreamEvent::TextDelta(text));
            }
            for tc in delta.tool_calls {
                let partial = self.calls.entry(tc.index).or_default();
                if let Some(id) = tc.id.filter(|id| !id.is_empty()) {
                    partial.id = id;
                }
                let mut piece = None;
                if let Some(function) = tc.function {
                    if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                        partial.name = name;
                    }
                    if let Some(args) = function.arguments.filter(|a| !a.is_empty()) {
                        partial.arguments.push_str(&args);
                        piece = Some(args);
                    }
                }
                if let Some(signature) = tc
                    .extra_content
                    .and_then(|e| e.google)
                    .and_then(|g| g.thought_signature)
                {
                    partial.thought_signature = Some(signature);
                }

                if !partial.announced && !partial.id.is_empty() && !partial.name.is_empty() {
                    partial.announced = true;
                    events.push(StreamEvent::ToolCallStarted {
                        id: partial.id.clone(),
                        name: partial.name.clone(),
                    });
                    if !partial.arguments.is_empty() {
                        events.push(StreamEvent::ToolCallArgumentsDelta {
                            id: partial.id.clone(),
                            delta: partial.arguments.clone(),
                        });
                    }
                } else if partial.announced {
                    if let Some(delta) = piece {
                        events.push(StreamEvent::ToolCallArgumentsDelta {
                            id: partial.id.clone(),
                            delta,
                        });
                    }
                }
            }
        }

        events
    }

    fn finish(self) -> ProviderResponse {
        let tool_calls = self
            .calls
            .into_iter()
            .filter(|(_, p)| !p.name.is_empty())
            .map(|(index, p)| ToolCall {
                id: if p.id.is_empty() {
                    format!("call_{index}")
                } else {
                    p.id
                },
                name: p.name,
                arguments: p.arguments,
                server_name: String::new(),
                thought_signature: p.thought_signature,
            })
            .collect();
        ProviderResponse {
            text: self.text,
            tool_calls,
            usage: self.usage,
        }
    }
}

// Chat Completions stream chunk types (internal)

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<ChunkUsage>,
    error: Option<Value>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u64,
    id: Option<String>,
    function: Option<ChunkFunction>,
    extra_content: Option<ExtraContent>,
}

#[derive(Deserialize)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ExtraContent {
    google: Option<GoogleExtra>,
}

#[derive(Deserialize)]
struct GoogleExtra {
    thought_signature: Option<String>,
}

#[derive(Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
    completion_tokens_details: Option<CompletionTokensDetails>,
}

#[derive(Deserialize)]
struct CompletionTokensDetails {
    reasoning_tokens: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::types::GenerationSettings;
    use pretty_assertions::assert_eq;

    fn chunk(value: Value) -> ChatChunk {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn accumulator_assembles_tool_calls_by_index() {
        let mut acc = StreamAccumulator::default();
        let first = acc.apply(chunk(json!({
            "choices": [{ "delta": { "tool_calls": [{
                "index": 0, "id": "call_a",
                "function": { "name": "read_file", "arguments": "{\"pa" },
                "extra_content": { "google": { "thought_signature": "sig-1" } }
            }]}}]
        })));
        assert_eq!(
            first,
            vec![
                StreamEvent::ToolCallStarted { id: "call_a".into(), name: "read_file".into() },
                StreamEvent::ToolCallArgumentsDelta { id: "call_a".into(), delta: "{\"pa".into() },
            ]
        );
        let second = acc.apply(chunk(json!({
            "choices": [{ "delta": { "tool_calls": [{
                "index": 0, "function": { "arguments": "th\":\"a\"}" }
            }]}}]
        })));
        assert_eq!(
            second,
            vec![StreamEvent::ToolCallArgumentsDelta {
                id: "call_a".into(),
                delta: "th\":\"a\"}".into()
            }]
        );
        acc.apply(chunk(json!({
            "choices": [],
            "usage": { "prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7 }
        })));

        let response = acc.finish();
        assert_eq!(response.tool_calls.len(), 1);
        let call = &response.tool_calls[0];
        assert_eq!(call.arguments, r#"{"path":"a"}"#);
        assert_eq!(call.thought_signature.as_deref(), Some("sig-1"));
        assert_eq!(response.usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn accumulator_collects_text() {
        let mut acc = StreamAccumulator::default();
        acc.apply(chunk(json!({ "choices": [{ "delta": { "content": "Hel" } }] })));
        acc.apply(chunk(json!({ "choices": [{ "delta": { "content": "lo" } }] })));
        assert_eq!(acc.finish().text, "Hello");
    }

    #[test]
    fn request_body_echoes_tool_calls_with_signature() {
        let provider = OpenAiCompatibleProvider::gemini();
        let call = ToolCall::new("c1", "run_command", r#"{"command":"ls"}"#)
            .with_thought_signature("opaque");
        let mut assistant = ProviderMessage::system("");
        assistant.role = Role::Assistant;
        assistant.tool_calls = vec![call];

        let request = ProviderRequest {
            model_id: "gemini-2.5-flash".into(),
            messages: vec![
                ProviderMessage::system("be brief"),
                assistant,
                ProviderMessage::tool_result("c1", "run_command", "out"),
            ],
            tools: Vec::new(),
            credentials: Credentials::default(),
            settings: GenerationSettings::builder().temperature(0.2).build(),
        };
        let body = provider.build_request_body(&request);

        assert_eq!(body["temperature"], 0.2);
        assert!(body.get("tools").is_none());
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[1]["content"], Value::Null);
        assert_eq!(
            messages[1]["tool_calls"][0]["extra_content"]["google"]["thought_signature"],
            "opaque"
        );
        assert_eq!(messages[2], json!({ "role": "tool", "tool_call_id": "c1", "content": "out" }));
    }

    #[test]
    fn missing_base_url_is_a_configuration_error() {
        let provider = OpenAiCompatibleProvider::new("local", None);
        let request = ProviderRequest {
            model_id: "m".into(),
            messages: Vec::new(),
            tools: Vec::new(),
            credentials: Credentials::default(),
            settings: GenerationSettings::default(),
        };
        assert!(matches!(
            provider.base_url(&request),
            Err(ConvoyError::Configuration(_))
        ));
    }
}
