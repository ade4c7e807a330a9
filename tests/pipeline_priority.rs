// tests/pipeline_priority.rs
//
// End-to-end ordering of the decision pipeline through POST /chat:
// rate limit > abuse > special situations > keyword shortcuts > backend.

use std::sync::Arc;

use serde_json::json;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _;

use antiscam_assistant::api;
use antiscam_assistant::conversation::{ConversationBackend, DisabledBackend, MockBackend};
use antiscam_assistant::picker::FixedPicker;
use antiscam_assistant::store::ConfigStore;

const BODY_LIMIT: usize = 1024 * 1024;

fn router_with(backend: Arc<dyn ConversationBackend>) -> Router {
    let state = api::build_state(
        Arc::new(ConfigStore::in_memory()),
        Arc::new(FixedPicker(0)),
        backend,
    );
    api::create_router(state)
}

fn chat(user_id: &str, message: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "user_id": user_id, "message": message }).to_string(),
        ))
        .expect("build POST /chat")
}

async fn read_json(resp: shuttle_axum::axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    serde_json::from_slice(&bytes).expect("parse json body")
}

#[tokio::test]
async fn abuse_outranks_crisis_detection() {
    let app = router_with(Arc::new(MockBackend::new("ai")));
    // Sensitive word and a crisis phrase in the same message: the abuse
    // verdict is terminal before special situations ever run.
    let resp = app
        .oneshot(chat("u1", "白痴，我不想活了"))
        .await
        .expect("oneshot /chat");
    let v = read_json(resp).await;
    assert_eq!(v["outcome"], "blocked");
}

#[tokio::test]
async fn crisis_outranks_keyword_smalltalk() {
    let app = router_with(Arc::new(MockBackend::new("ai")));
    let resp = app
        .oneshot(chat("u1", "你好，我真的不想活了"))
        .await
        .expect("oneshot /chat");
    let v = read_json(resp).await;
    assert_eq!(v["outcome"], "emergency_handled");
    assert!(v["response"].as_str().expect("response").contains("1925"));
}

#[tokio::test]
async fn session_limit_rate_limits_subsequent_chats() {
    let app = router_with(Arc::new(MockBackend::new("ai")));

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/usage/config")
                .body(Body::empty())
                .expect("build GET"),
        )
        .await
        .expect("oneshot GET config");
    let mut cfg = read_json(resp).await;
    cfg["session_limit"] = json!(1);
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/usage/config")
                .header("content-type", "application/json")
                .body(Body::from(cfg.to_string()))
                .expect("build POST"),
        )
        .await
        .expect("oneshot POST config");
    assert_eq!(resp.status(), StatusCode::OK);

    let first = read_json(
        app.clone()
            .oneshot(chat("u1", "請幫我看這段文字"))
            .await
            .expect("oneshot first chat"),
    )
    .await;
    assert_eq!(first["outcome"], "ai_handled");

    let second = read_json(
        app.oneshot(chat("u1", "請再幫我看一段文字"))
            .await
            .expect("oneshot second chat"),
    )
    .await;
    assert_eq!(second["outcome"], "rate_limited");
    assert!(second["response"].as_str().expect("response").contains("165"));
}

#[tokio::test]
async fn emergency_keyword_bypasses_rate_limit() {
    let app = router_with(Arc::new(MockBackend::new("ai")));

    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/usage/config")
                .body(Body::empty())
                .expect("build GET"),
        )
        .await
        .expect("oneshot GET config");
    let mut cfg = read_json(resp).await;
    cfg["session_limit"] = json!(1);
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/usage/config")
                .header("content-type", "application/json")
                .body(Body::from(cfg.to_string()))
                .expect("build POST"),
        )
        .await
        .expect("oneshot POST config");

    app.clone()
        .oneshot(chat("u1", "請幫我看這段文字"))
        .await
        .expect("oneshot first chat");

    // Limit is exhausted, but the crisis wording must still get through.
    let v = read_json(
        app.oneshot(chat("u1", "救命，我剛剛被騙了"))
            .await
            .expect("oneshot emergency chat"),
    )
    .await;
    assert_eq!(v["outcome"], "emergency_handled");
}

#[tokio::test]
async fn backend_failure_degrades_to_apology() {
    let app = router_with(Arc::new(DisabledBackend));
    let v = read_json(
        app.oneshot(chat("u1", "請幫我看這段文字"))
            .await
            .expect("oneshot /chat"),
    )
    .await;
    assert_eq!(v["outcome"], "error");
    assert!(v["response"].as_str().expect("response").contains("165"));
}

#[tokio::test]
async fn scam_verdict_rides_along_with_backend_reply() {
    let app = router_with(Arc::new(MockBackend::new("請小心這則訊息")));
    let v = read_json(
        app.oneshot(chat(
            "u1",
            "恭喜您成為本月幸運兒，抽中百萬大獎！請先支付手續費領取獎品。",
        ))
        .await
        .expect("oneshot /chat"),
    )
    .await;
    assert_eq!(v["outcome"], "ai_handled");
    assert_eq!(v["is_scam"], true);
    assert_eq!(v["scam_info"]["id"], "prize_or_lottery_scam");
}
