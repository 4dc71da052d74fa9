//! Channel membership, posting and sync-after-seq.

use crate::*;

#[tokio::test]
async fn join_creates_missing_channel_with_joiner_only() {
    let reg = TestRegistry::start().await.unwrap();

    let body = reg.join("fresh", "a").await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(body["members"], serde_json::json!(["a"]));
    // "a" never registered, so it has no endpoint
    assert!(body["peers"].as_object().unwrap().is_empty());

    assert!(reg.sync("fresh", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn join_is_idempotent_and_lists_registered_members() {
    let reg = TestRegistry::start().await.unwrap();
    reg.register("a", "5001").await.unwrap();
    reg.register("b", "5002").await.unwrap();

    let (status, _) = reg.post("/channel/create", &[("name", "room")]).await.unwrap();
    assert_eq!(status, StatusCode::OK);

    reg.join("room", "a").await.unwrap();
    reg.join("room", "ghost").await.unwrap();
    let first = reg.join("room", "b").await.unwrap();
    let second = reg.join("room", "b").await.unwrap();

    assert_eq!(first["members"], second["members"]);
    assert_eq!(first["members"], serde_json::json!(["a", "b", "ghost"]));

    // unregistered members are left out of the endpoint map
    let peers = second["peers"].as_object().unwrap();
    assert_eq!(peers.len(), 2);
    assert_eq!(peers["a"]["port"], 5001);
    assert_eq!(peers["b"]["port"], 5002);
}

#[tokio::test]
async fn seq_is_global_and_gapless_across_channels() {
    let reg = TestRegistry::start().await.unwrap();
    reg.join("x", "a").await.unwrap();
    reg.join("y", "b").await.unwrap();

    let mut assigned = Vec::new();
    for i in 0..6 {
        let channel = if i % 2 == 0 { "x" } else { "y" };
        assigned.push(reg.send(channel, "a", &format!("m{i}")).await.unwrap());
    }
    assert_eq!(assigned, vec![1, 2, 3, 4, 5, 6]);

    assert_eq!(seqs(&reg.sync("x", 0).await.unwrap()), vec![1, 3, 5]);
    assert_eq!(seqs(&reg.sync("y", 0).await.unwrap()), vec![2, 4, 6]);
}

#[tokio::test]
async fn sync_returns_only_newer_messages_in_order() {
    let reg = TestRegistry::start().await.unwrap();
    reg.join("room", "a").await.unwrap();
    for text in ["one", "two", "three"] {
        reg.send("room", "a", text).await.unwrap();
    }

    let after_one = reg.sync("room", 1).await.unwrap();
    assert_eq!(seqs(&after_one), vec![2, 3]);
    assert_eq!(after_one[0]["from"], "a");
    assert_eq!(after_one[0]["text"], "two");
    assert!(after_one[0]["ts"].as_f64().unwrap() > 0.0);

    assert!(reg.sync("room", 3).await.unwrap().is_empty());
    assert!(reg.sync("nowhere", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn sync_accepts_query_string_on_get() {
    let reg = TestRegistry::start().await.unwrap();
    reg.join("room", "a").await.unwrap();
    reg.send("room", "a", "hi").await.unwrap();
    reg.send("room", "a", "again").await.unwrap();

    let (status, body) = reg.get("/sync?name=room&after=1").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(seqs(body["messages"].as_array().unwrap()), vec![2]);
}

#[tokio::test]
async fn negative_after_returns_the_whole_log() {
    let reg = TestRegistry::start().await.unwrap();
    reg.join("room", "a").await.unwrap();
    reg.send("room", "a", "first").await.unwrap();

    let (status, body) = reg
        .post("/sync", &[("name", "room"), ("after", "-1")])
        .await
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seqs(body["messages"].as_array().unwrap()), vec![1]);

    let (status, body) = reg
        .post("/sync", &[("name", "room"), ("after", "soon")])
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "after must be int");
}

#[tokio::test]
async fn body_without_content_type_is_still_a_form() {
    let reg = TestRegistry::start().await.unwrap();
    reg.join("room", "a").await.unwrap();
    reg.send("room", "a", "hi").await.unwrap();

    let (status, body) = reg.post_untyped("/sync", "name=room&after=0").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seqs(body["messages"].as_array().unwrap()), vec![1]);

    // no fields at all: unknown channel "" syncs to an empty list
    let (status, body) = reg.post_untyped("/sync", "").await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"], serde_json::json!([]));
}

#[tokio::test]
async fn post_to_unknown_channel_is_not_found() {
    let reg = TestRegistry::start().await.unwrap();

    let (status, body) = reg
        .post(
            "/message",
            &[("name", "nowhere"), ("peer_id", "a"), ("text", "hi")],
        )
        .await
        .unwrap();
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Channel not found");

    // a failed post burns no seq
    reg.join("room", "a").await.unwrap();
    assert_eq!(reg.send("room", "a", "first").await.unwrap(), 1);
}

#[tokio::test]
async fn missing_fields_are_bad_requests() {
    let reg = TestRegistry::start().await.unwrap();

    let (status, body) = reg.post("/channel/create", &[]).await.unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing name");

    let (status, body) = reg.post("/channel/join", &[("name", "room")]).await.unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing name/peer_id");

    let (status, body) = reg
        .post("/sync", &[("name", "room"), ("after", "later")])
        .await
        .unwrap();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
}

#[tokio::test]
async fn concurrent_posts_never_share_a_seq() {
    let reg = std::sync::Arc::new(TestRegistry::start().await.unwrap());
    reg.join("room", "a").await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..32 {
        let reg = reg.clone();
        tasks.push(tokio::spawn(async move {
            reg.send("room", "a", &format!("m{i}")).await.unwrap()
        }));
    }
    let mut assigned = Vec::new();
    for t in tasks {
        assigned.push(t.await.unwrap());
    }
    assigned.sort_unstable();
    assert_eq!(assigned, (1..=32).collect::<Vec<u64>>());
    assert_eq!(seqs(&reg.sync("room", 0).await.unwrap()), assigned);
}
