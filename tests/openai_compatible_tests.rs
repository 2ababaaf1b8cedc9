//! Chat Completions adapter against a mock HTTP server.

use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use convoy::agent_loop::RunStatus;
use convoy::config::{ConvoyConfig, Credentials};
use convoy::engine::ChatEngine;
use convoy::error::ConvoyError;
use convoy::provider::{
    ModelProvider, OpenAiCompatibleProvider, ProviderMessage, ProviderRequest, StreamEvent,
};
use convoy::thread::Thread;
use convoy::types::{GenerationSettings, Message, ModelRef, Role};

fn sse(chunks: &[serde_json::Value]) -> String {
    let mut body: String = chunks.iter().map(|c| format!("data: {c}\n\n")).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn request(server: &MockServer) -> ProviderRequest {
    ProviderRequest {
        model_id: "gpt-test".into(),
        messages: vec![
            ProviderMessage::system("Be brief."),
            ProviderMessage::from(&Message::user("hi")),
        ],
        tools: Vec::new(),
        credentials: Credentials {
            api_key: Some("test-key".into()),
            base_url: Some(server.uri()),
        },
        settings: GenerationSettings::default(),
    }
}

async fn collect(
    provider: &OpenAiCompatibleProvider,
    request: &ProviderRequest,
) -> Vec<StreamEvent> {
    let stream = provider.stream_message(request).await.unwrap();
    stream.map(|e| e.unwrap()).collect().await
}

#[tokio::test]
async fn streams_text_and_usage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "gpt-test", "stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse(&[
                    json!({"choices": [{"delta": {"content": "Hel"}}]}),
                    json!({"choices": [{"delta": {"content": "lo"}}]}),
                    json!({"choices": [], "usage": {"prompt_tokens": 7, "completion_tokens": 2, "total_tokens": 9}}),
                ])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::new("openai-compatible", None);
    let events = collect(&provider, &request(&server)).await;

    assert_eq!(
        events[..2],
        [
            StreamEvent::TextDelta("Hel".into()),
            StreamEvent::TextDelta("lo".into())
        ]
    );
    let Some(StreamEvent::Done(response)) = events.last() else {
        panic!("stream did not end with Done: {events:?}");
    };
    assert_eq!(response.text, "Hello");
    assert_eq!(response.usage.as_ref().unwrap().total_tokens, 9);
}

#[tokio::test]
async fn assembles_fragmented_tool_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "function": {"name": "read_file", "arguments": "{\"pa"}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "th\":\"a.txt\"}"}}
            ]}}]}),
        ])))
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::new("openai-compatible", None);
    let events = collect(&provider, &request(&server)).await;

    assert!(events.contains(&StreamEvent::ToolCallStarted {
        id: "call_a".into(),
        name: "read_file".into(),
    }));
    let Some(StreamEvent::Done(response)) = events.last() else {
        panic!("stream did not end with Done");
    };
    assert_eq!(response.tool_calls.len(), 1);
    assert_eq!(response.tool_calls[0].arguments, r#"{"path":"a.txt"}"#);
}

#[tokio::test]
async fn unauthorized_maps_to_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"error": {"message": "bad api key"}})),
        )
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::new("openai-compatible", None);
    let err = match provider.stream_message(&request(&server)).await {
        Ok(_) => panic!("expected an error"),
        Err(err) => err,
    };
    assert!(matches!(err, ConvoyError::Authentication(ref m) if m == "bad api key"));
}

#[tokio::test]
async fn in_stream_error_chunk_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            json!({"choices": [{"delta": {"content": "par"}}]}),
            json!({"error": {"message": "overloaded"}}),
        ])))
        .mount(&server)
        .await;

    let provider = OpenAiCompatibleProvider::new("openai-compatible", None);
    let stream = provider.stream_message(&request(&server)).await.unwrap();
    let events: Vec<_> = stream.collect().await;
    assert!(matches!(events.last(), Some(Err(ConvoyError::Stream(m))) if m == "overloaded"));
}

#[tokio::test]
async fn engine_round_trip_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            json!({"choices": [{"delta": {"content": "Hi there"}}]}),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let config = ConvoyConfig::new();
    config.set_base_url("openai-compatible", server.uri());
    config.set_api_key("openai-compatible", "test-key".into());
    let engine = ChatEngine::new(config);
    let thread = engine
        .create_thread(Thread::new(ModelRef::new("openai-compatible", "gpt-test")))
        .await
        .unwrap();

    engine.send_message(thread, Message::user("hello")).await.unwrap();
    let result = engine.wait(thread).await.unwrap();
    assert_eq!(result.status, RunStatus::Done);

    let snapshot = engine.thread(thread).await.unwrap();
    let reply = snapshot.last_message().unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.text, "Hi there");

    let received = &server.received_requests().await.unwrap()[0];
    let body: serde_json::Value = serde_json::from_slice(&received.body).unwrap();
    assert_eq!(body["tools"][0]["function"]["name"], "web_fetch");
    assert_eq!(body["messages"][0]["role"], "system");
}
