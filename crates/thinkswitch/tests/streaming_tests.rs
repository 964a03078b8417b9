//! Integration tests for streamed completions
//!
//! Covers event reframing across arbitrary chunk boundaries, the model-name
//! rewrite on data events, the watermark flush, and the end-to-end streaming
//! path through the router.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

use thinkswitch::config::{Config, ModelsConfig, ProxyConfig};
use thinkswitch::proxy::{AppState, ReframeStream, SseReframer, create_router, rewrite_event};
use thinkswitch::registry::ModelRegistry;

const SERVED: &str = "Qwen/Qwen3.5-35B-A3B";

fn sse_body() -> String {
    [
        r#"data: {"id":"c1","model":"Qwen/Qwen3.5-35B-A3B","choices":[{"delta":{"role":"assistant"}}]}"#,
        r#"data: {"id":"c1","model":"Qwen/Qwen3.5-35B-A3B","choices":[{"delta":{"content":"Hel"}}]}"#,
        r#"data: {"id":"c1","model":"Qwen/Qwen3.5-35B-A3B","choices":[{"delta":{"content":"lo"}}]}"#,
        "data: [DONE]",
    ]
    .iter()
    .map(|event| format!("{event}\n\n"))
    .collect()
}

fn expected_body(virtual_model: &str) -> String {
    sse_body().replace(SERVED, virtual_model)
}

/// Run `chunks` through a reframing stream and concatenate the output
async fn reframe(chunks: Vec<&'static str>, watermark: usize) -> String {
    let inner = stream::iter(
        chunks
            .into_iter()
            .map(|c| Ok::<_, std::io::Error>(Bytes::from(c))),
    );
    let frames: Vec<Bytes> = ReframeStream::new(inner, SseReframer::new("qwen-think", watermark))
        .map(|frame| frame.unwrap())
        .collect()
        .await;
    frames
        .iter()
        .map(|b| String::from_utf8(b.to_vec()).unwrap())
        .collect()
}

// =============================================================================
// Reframing Tests
// =============================================================================

mod reframing_tests {
    use super::*;

    #[tokio::test]
    async fn test_whole_body_in_one_chunk() {
        let body: &'static str = Box::leak(sse_body().into_boxed_str());
        assert_eq!(reframe(vec![body], 8192).await, expected_body("qwen-think"));
    }

    #[tokio::test]
    async fn test_every_split_point_gives_same_output() {
        let body: &'static str = Box::leak(sse_body().into_boxed_str());
        let expected = expected_body("qwen-think");
        for split in 1..body.len() {
            let (a, b) = body.split_at(split);
            assert_eq!(reframe(vec![a, b], 8192).await, expected, "split at {split}");
        }
    }

    #[tokio::test]
    async fn test_delimiter_split_across_chunks() {
        let out = reframe(
            vec![r#"data: {"model":"Qwen/Qwen3.5-35B-A3B"}"#, "\n", "\n", "data: [DONE]\n\n"],
            8192,
        )
        .await;
        assert_eq!(out, "data: {\"model\":\"qwen-think\"}\n\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn test_unterminated_tail_flushed_verbatim() {
        let out = reframe(
            vec!["data: {\"model\":\"a\"}\n\n", "data: {\"model\":\"b\"}"],
            8192,
        )
        .await;
        assert_eq!(out, "data: {\"model\":\"qwen-think\"}\n\ndata: {\"model\":\"b\"}");
    }

    #[tokio::test]
    async fn test_oversized_event_flushed_raw() {
        let out = reframe(
            vec![
                "data: {\"model\":\"Qwen\",",
                "\"content\":\"a very long partial event\"",
                "}\n\ndata: {\"model\":\"Qwen\"}\n\n",
            ],
            16,
        )
        .await;
        assert_eq!(
            out,
            "data: {\"model\":\"Qwen\",\"content\":\"a very long partial event\"}\n\ndata: {\"model\":\"qwen-think\"}\n\n"
        );
    }

    #[tokio::test]
    async fn test_backend_error_ends_stream_after_flush() {
        let inner = stream::iter(vec![
            Ok(Bytes::from("data: {\"model\":\"x\"}\n\ndata: {\"mo")),
            Err(std::io::Error::other("connection reset")),
            Ok(Bytes::from("del\":\"never\"}\n\n")),
        ]);
        let frames: Vec<_> = ReframeStream::new(inner, SseReframer::new("qwen-fast", 8192))
            .collect()
            .await;

        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0].as_ref().unwrap(),
            &Bytes::from("data: {\"model\":\"qwen-fast\"}\n\n")
        );
        assert_eq!(frames[1].as_ref().unwrap(), &Bytes::from("data: {\"mo"));
    }

    #[test]
    fn test_rewrite_event_leaves_non_data_events() {
        for event in [
            ": keep-alive\n\n",
            "event: ping\n\n",
            "data: [DONE]\n\n",
            "data: not json\n\n",
            "data: [1,2]\n\n",
            "data: {\"id\":\"no-model\"}\n\n",
        ] {
            assert_eq!(
                rewrite_event(Bytes::from(event), "qwen-think"),
                Bytes::from(event),
                "event {event:?}"
            );
        }
    }
}

// =============================================================================
// End-to-end Streaming Tests
// =============================================================================

mod router_streaming_tests {
    use super::*;

    fn create_test_app(backend_url: &str) -> axum::Router {
        let models = ModelsConfig {
            served_model: SERVED.to_string(),
            thinking_general: "qwen-think".to_string(),
            thinking_coding: "qwen-code".to_string(),
            instruct_general: "qwen-fast".to_string(),
            instruct_reasoning: "qwen-reason".to_string(),
        };
        let config = Config {
            proxy: ProxyConfig {
                backend_url: backend_url.to_string(),
                ..Default::default()
            },
            models,
            ..Default::default()
        };
        let registry = Arc::new(ModelRegistry::from_config(&config.models).unwrap());
        create_router(Arc::new(AppState::from_config(&config, registry).unwrap()))
    }

    #[tokio::test]
    async fn test_streamed_completion_is_relabelled() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/v1/chat/completions"))
            .and(matchers::body_partial_json(json!({"model": SERVED, "stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(sse_body(), "text/event-stream"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let router = create_test_app(&mock_server.uri());
        let request = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .body(Body::from(
                json!({"model": "qwen-code", "stream": true, "messages": []}).to_string(),
            ))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert!(response.headers().get("content-length").is_none());

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(bytes.to_vec()).unwrap(),
            expected_body("qwen-code")
        );
    }

    #[tokio::test]
    async fn test_streamed_instant_answer_is_not_content_repaired() {
        let mock_server = MockServer::start().await;
        let body = "data: {\"model\":\"Qwen/Qwen3.5-35B-A3B\",\"choices\":[{\"delta\":{\"reasoning_content\":\"hi\"}}]}\n\n";
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let router = create_test_app(&mock_server.uri());
        let request = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .body(Body::from(json!({"model": "qwen-fast", "stream": true}).to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(bytes.to_vec()).unwrap(),
            "data: {\"model\":\"qwen-fast\",\"choices\":[{\"delta\":{\"reasoning_content\":\"hi\"}}]}\n\n"
        );
    }
}
