//! Peer directory and cookie auth.

use crate::*;

#[tokio::test]
async fn unauthorized_register_is_rejected_without_side_effects() {
    let reg = TestRegistry::start().await.unwrap();

    let form = [("peer_id", "a"), ("ip", "127.0.0.1"), ("port", "5001")];
    let (status, body) = reg.post_as("/peer/register", &form, None).await.unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, serde_json::json!({ "ok": false, "error": "Unauthorized" }));

    let (status, _) = reg
        .post_as("/peer/register", &form, Some("auth=false"))
        .await
        .unwrap();
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(reg.registry.peer_count(), 0);
}

#[tokio::test]
async fn register_returns_directory_and_keeps_latest_endpoint() {
    let reg = TestRegistry::start().await.unwrap();

    let body = reg.register("a", "5001").await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["peers"]["a"]["port"], 5001);

    reg.register("b", "5002").await.unwrap();
    let body = reg.register("a", "6001").await.unwrap();
    let peers = body["peers"].as_object().unwrap();
    assert_eq!(peers.len(), 2);
    assert_eq!(peers["a"]["port"], 6001);
    assert_eq!(peers["a"]["ip"], "127.0.0.1");

    let rec = reg.registry.peer("a").unwrap();
    assert_eq!(rec.port, 6001);
}

#[tokio::test]
async fn register_validates_fields() {
    let reg = TestRegistry::start().await.unwrap();

    let (status, body) = reg
        .post("/peer/register", &[("peer_id", "a"), ("ip", "127.0.0.1")])
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "Missing peer_id/ip/port");

    let (status, body) = reg
        .post(
            "/peer/register",
            &[("peer_id", "a"), ("ip", "127.0.0.1"), ("port", "http")],
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "port must be int");
    assert_eq!(reg.registry.peer_count(), 0);
}

#[tokio::test]
async fn login_needs_no_cookie_and_hands_one_out() {
    let reg = TestRegistry::start().await.unwrap();

    let (status, cookie, body) = reg.login().await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(cookie.as_deref(), Some("auth=true; Path=/"));
}

#[tokio::test]
async fn cookie_may_share_the_header_with_others() {
    let reg = TestRegistry::start().await.unwrap();

    let (status, _) = reg
        .post_as(
            "/channel/create",
            &[("name", "room")],
            Some("theme=dark; auth=true"),
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
}
