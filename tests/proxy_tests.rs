//! End-to-end tests of `POST /v1/messages` against an in-process mock upstream.

mod common;

use common::{MockUpstream, TestServer, UpstreamReply, PROVIDER_KEY};
use http::StatusCode;
use serde_json::{json, Value};

fn completion(body: Value) -> UpstreamReply {
    UpstreamReply::Json {
        status: StatusCode::OK,
        body,
    }
}

#[tokio::test]
async fn root_reports_health() {
    let server = TestServer::start("http://127.0.0.1:9/v1/chat/completions", "").await;
    let resp = server.get("/").await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v: Value = resp.json().await.unwrap();
    assert_eq!(v["health"], "ok");
}

#[tokio::test]
async fn simple_round_trip() {
    let upstream = MockUpstream::start(completion(json!({
        "id": "x",
        "model": "m",
        "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
        "usage": {"prompt_tokens": 5, "completion_tokens": 2}
    })))
    .await;
    let server = TestServer::start(&upstream.url, "").await;

    let resp = server
        .post_messages(
            &json!({
                "model": "m",
                "max_tokens": 0,
                "messages": [{"role": "user", "content": "hi"}]
            }),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v: Value = resp.json().await.unwrap();

    let seen = upstream.last_request();
    assert_eq!(seen.body["max_tokens"], 1024);
    assert_eq!(
        seen.body["messages"],
        json!([{"role": "user", "content": "hi"}])
    );
    assert!(seen.body.get("stream").is_none());
    assert_eq!(
        seen.authorization.as_deref(),
        Some(format!("Bearer {PROVIDER_KEY}").as_str())
    );

    assert_eq!(v["id"], "x");
    assert_eq!(v["type"], "message");
    assert_eq!(v["role"], "assistant");
    assert_eq!(v["content"], json!([{"type": "text", "text": "hello"}]));
    assert_eq!(v["stop_reason"], "end_turn");
    assert_eq!(v["stop_sequence"], Value::Null);
    assert_eq!(
        v["usage"],
        json!({"input_tokens": 5, "output_tokens": 2, "cache_read_input_tokens": 0})
    );
}

#[tokio::test]
async fn tool_round_trip() {
    let upstream = MockUpstream::start(completion(json!({
        "id": "chatcmpl-1",
        "model": "m",
        "choices": [{
            "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_9",
                    "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"city\":\"Oslo\"}"}
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {
            "prompt_tokens": 30,
            "completion_tokens": 7,
            "prompt_tokens_details": {"cached_tokens": 10}
        }
    })))
    .await;
    let server = TestServer::start(&upstream.url, "").await;

    let resp = server
        .post_messages(
            &json!({
                "model": "m",
                "max_tokens": 200,
                "system": [{"type": "text", "text": "be brief"}],
                "tools": [{
                    "name": "get_weather",
                    "description": "weather by city",
                    "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
                }],
                "tool_choice": {"type": "tool", "name": "get_weather"},
                "messages": [
                    {"role": "user", "content": "weather?"},
                    {"role": "assistant", "content": [
                        {"type": "tool_use", "id": "call_1", "name": "get_weather", "input": {"city": "Paris"}}
                    ]},
                    {"role": "user", "content": [
                        {"type": "tool_result", "tool_use_id": "call_1", "content": "sunny"},
                        {"type": "text", "text": "and Oslo?"}
                    ]}
                ]
            }),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v: Value = resp.json().await.unwrap();

    let body = upstream.last_request().body;
    assert_eq!(body["max_tokens"], 200);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages[0], json!({"role": "system", "content": "be brief"}));
    assert_eq!(messages[2]["role"], "assistant");
    assert_eq!(messages[2]["tool_calls"][0]["id"], "call_1");
    assert_eq!(
        messages[2]["tool_calls"][0]["function"]["arguments"],
        "{\"city\":\"Paris\"}"
    );
    assert_eq!(
        messages[3],
        json!({"role": "tool", "tool_call_id": "call_1", "content": "sunny"})
    );
    assert_eq!(messages[4], json!({"role": "user", "content": "and Oslo?"}));
    assert_eq!(body["tools"][0]["type"], "function");
    assert_eq!(body["tools"][0]["function"]["name"], "get_weather");
    assert_eq!(
        body["tool_choice"],
        json!({"type": "function", "function": {"name": "get_weather"}})
    );

    assert_eq!(v["stop_reason"], "tool_use");
    assert_eq!(
        v["content"],
        json!([{"type": "tool_use", "id": "call_9", "name": "get_weather", "input": {"city": "Oslo"}}])
    );
    assert_eq!(
        v["usage"],
        json!({"input_tokens": 20, "output_tokens": 7, "cache_read_input_tokens": 10})
    );
}

#[tokio::test]
async fn upstream_error_status_is_passed_through() {
    let upstream = MockUpstream::start(UpstreamReply::Json {
        status: StatusCode::TOO_MANY_REQUESTS,
        body: json!({"error": {"message": "slow down"}}),
    })
    .await;
    let server = TestServer::start(&upstream.url, "").await;

    let resp = server
        .post_messages(
            &json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]}),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        resp.headers()[http::header::CONTENT_TYPE],
        "application/json"
    );
    let v: Value = resp.json().await.unwrap();
    assert_eq!(v, json!({"error": {"message": "slow down"}}));
}

#[tokio::test]
async fn unparseable_upstream_reply_is_bad_gateway() {
    let upstream = MockUpstream::start(UpstreamReply::Raw {
        status: StatusCode::OK,
        body: "<html>oops</html>".into(),
    })
    .await;
    let server = TestServer::start(&upstream.url, "").await;

    let resp = server
        .post_messages(
            &json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]}),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let v: Value = resp.json().await.unwrap();
    assert_eq!(v["error"]["code"], "invalid_upstream_json");
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let server = TestServer::start("http://127.0.0.1:9/v1/chat/completions", "").await;
    let resp = server
        .post_messages(
            &json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]}),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let v: Value = resp.json().await.unwrap();
    assert_eq!(v["error"]["code"], "upstream_request_failed");
}

#[tokio::test]
async fn inbound_auth_gate() {
    let upstream = MockUpstream::start(completion(json!({
        "id": "x",
        "model": "m",
        "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}]
    })))
    .await;
    let server = TestServer::start(&upstream.url, "s3cret").await;
    let body = json!({"model": "m", "messages": [{"role": "user", "content": "hi"}]});

    let resp = server.post_messages(&body, &[]).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let v: Value = resp.json().await.unwrap();
    assert_eq!(
        v,
        json!({"error": {"type": "proxy_error", "code": "unauthorized", "message": "unauthorized"}})
    );
    assert!(upstream.requests().is_empty());

    let resp = server
        .post_messages(&body, &[("authorization", "Bearer s3cret")])
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server
        .post_messages(&body, &[("x-api-key", "s3cret")])
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // The inbound secret is never forwarded.
    for seen in upstream.requests() {
        assert_eq!(
            seen.authorization.as_deref(),
            Some(format!("Bearer {PROVIDER_KEY}").as_str())
        );
    }
}

#[tokio::test]
async fn malformed_requests_are_rejected_before_forwarding() {
    let upstream = MockUpstream::start(completion(json!({}))).await;
    let server = TestServer::start(&upstream.url, "").await;

    let resp = server.post_raw("{\"model\": ").await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v: Value = resp.json().await.unwrap();
    assert_eq!(v["error"]["code"], "invalid_json");

    let resp = server
        .post_messages(&json!({"messages": []}), &[])
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v: Value = resp.json().await.unwrap();
    assert_eq!(v["error"]["code"], "missing_model");

    let resp = server
        .post_messages(
            &json!({"model": "m", "messages": [{"role": "user", "content": {"text": "hi"}}]}),
            &[],
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v: Value = resp.json().await.unwrap();
    assert_eq!(v["error"]["code"], "request_conversion_failed");

    assert!(upstream.requests().is_empty());
}
