//! HTTP-level tests for the completion client against a mock server

use agentic_chat::ai::types::ChatCompletionRequest;
use agentic_chat::{
    ChatCompletion, ChatError, ChatSession, CompletionClient, Message, SessionConfig,
    StreamFragment, ToolRegistry,
};
use mockito::Matcher;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn client(server: &mockito::ServerGuard, api_key: Option<&str>) -> CompletionClient {
    CompletionClient::new(
        format!("{}/v1", server.url()),
        api_key.map(str::to_string),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn request<'a>(messages: &'a [Message]) -> ChatCompletionRequest<'a> {
    ChatCompletionRequest {
        model: "test-model",
        messages,
        temperature: 0.3,
        max_tokens: 256,
        stream: false,
        tools: &[],
    }
}

#[tokio::test]
async fn test_complete_parses_response() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::PartialJson(json!({
            "model": "test-model",
            "max_tokens": 256,
            "messages": [{ "role": "user", "content": "Hello" }]
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "id": "chatcmpl-1",
                "model": "test-model",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": "Hi there!" },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12 }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let messages = vec![Message::user("Hello")];
    let completion = client(&server, Some("secret"))
        .complete(&request(&messages), &CancellationToken::new())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(completion.message.content, "Hi there!");
    assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
    assert_eq!(completion.usage.total_tokens, 12);
}

#[tokio::test]
async fn test_tool_calls_without_ids_get_fallback_ids() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(
            json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": "",
                        "tool_calls": [
                            { "type": "function", "function": { "name": "list_directory", "arguments": "{\"path\":\".\"}" } },
                            { "id": "given", "type": "function", "function": { "name": "read_file", "arguments": "{}" } }
                        ]
                    },
                    "finish_reason": "tool_calls"
                }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let messages = vec![Message::user("What is here?")];
    let completion = client(&server, None)
        .complete(&request(&messages), &CancellationToken::new())
        .await
        .unwrap();

    let calls = &completion.message.tool_calls;
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].id, "call_0");
    assert_eq!(calls[0].name(), "list_directory");
    assert_eq!(calls[1].id, "given");
}

#[tokio::test]
async fn test_no_key_sends_no_authorization() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body(
            json!({
                "choices": [{ "message": { "role": "assistant", "content": "ok" } }]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let messages = vec![Message::user("Hello")];
    let completion = client(&server, None)
        .complete(&request(&messages), &CancellationToken::new())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(completion.message.content, "ok");
}

#[tokio::test]
async fn test_non_success_status_is_api_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(404)
        .with_body("model not found")
        .create_async()
        .await;

    let messages = vec![Message::user("Hello")];
    let err = client(&server, None)
        .complete(&request(&messages), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ChatError::Api { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, "model not found");
        }
        other => panic!("expected API error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_empty_choices() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(r#"{"choices": []}"#)
        .create_async()
        .await;

    let messages = vec![Message::user("Hello")];
    let err = client(&server, None)
        .complete(&request(&messages), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::EmptyResponse));
}

#[tokio::test]
async fn test_invalid_json_is_decode_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body("<html>proxy error</html>")
        .create_async()
        .await;

    let messages = vec![Message::user("Hello")];
    let err = client(&server, None)
        .complete(&request(&messages), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Decode(_)));
}

#[tokio::test]
async fn test_stream_skips_malformed_frame() {
    let body = concat!(
        ": connected\n\n",
        "data: {\"choices\":[{\"delta\":{\"reasoning\":\"thinking...\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"cont\n\n",
        "data: [DONE]\n\n",
    );

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("accept", "text/event-stream")
        .match_body(Matcher::PartialJson(json!({ "stream": true })))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let messages = vec![Message::user("Hello")];
    let mut fragments = Vec::new();
    let mut sink = |f: StreamFragment| fragments.push(f);
    let completion = client(&server, None)
        .complete_stream(&request(&messages), &CancellationToken::new(), &mut sink)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(completion.message.content, "Hello");
    assert_eq!(
        fragments,
        vec![
            StreamFragment::Thinking("thinking...".into()),
            StreamFragment::Content("Hel".into()),
            StreamFragment::Content("lo".into()),
        ]
    );
}

#[tokio::test]
async fn test_list_models() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/v1/models")
        .with_status(200)
        .with_body(
            json!({
                "data": [
                    { "id": "openai/gpt-oss-20b" },
                    { "name": "qwen2.5-7b" },
                    { "id": "" }
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let models = client(&server, None).list_models().await.unwrap();
    assert_eq!(models, vec!["openai/gpt-oss-20b", "qwen2.5-7b"]);
}

#[tokio::test]
async fn test_session_over_http() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v1/chat/completions")
        .with_status(200)
        .with_body(
            json!({
                "choices": [{
                    "message": { "role": "assistant", "content": "Paris." },
                    "finish_reason": "stop"
                }],
                "usage": { "prompt_tokens": 20, "completion_tokens": 2, "total_tokens": 22 }
            })
            .to_string(),
        )
        .create_async()
        .await;

    let session = ChatSession::new(
        Arc::new(client(&server, None)),
        Arc::new(ToolRegistry::empty()),
        &SessionConfig::default(),
    );

    let response = session
        .send_message("Capital of France?", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.content, "Paris.");
    assert!(!response.used_tools);
    assert_eq!(response.usage.total_tokens, 22);
    assert_eq!(session.history().await.len(), 2);
}
