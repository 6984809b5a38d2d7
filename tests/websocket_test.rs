//! WebSocket lifecycle tests: handshake, messaging, limits, reconnects

mod common;

use std::time::Duration;

use common::{Frame, PartyTest};
use partyd::Config;
use serde_json::json;

fn config(edit: impl FnOnce(&mut Config)) -> Config {
    let mut config = Config::default();
    edit(&mut config);
    config
}

#[tokio::test]
async fn test_handshake_without_token_is_closed() {
    let party = PartyTest::start().await.unwrap();
    let mut ws = party.connect_ws(None).await.unwrap();
    assert_eq!(ws.recv_close().await.unwrap(), Some(4000));
}

#[tokio::test]
async fn test_handshake_with_unknown_token_is_closed() {
    let party = PartyTest::start().await.unwrap();
    let mut ws = party.connect_ws(Some("deadbeef")).await.unwrap();
    assert_eq!(ws.recv_close().await.unwrap(), Some(4001));
}

#[tokio::test]
async fn test_dice_roll_reaches_roller() {
    let party = PartyTest::start().await.unwrap();
    let gm = party.create_session().await.unwrap();
    let mut ws = party.connect_ws(Some(&gm.token)).await.unwrap();

    ws.send("roll_dice", json!({ "dice": "2d6+1", "reason": "damage" }))
        .await
        .unwrap();
    let event = ws.recv_event("dice_result").await.unwrap();
    let payload = &event["payload"];
    assert_eq!(payload["player_id"], gm.player_id.as_str());
    assert_eq!(payload["reason"], "damage");
    let rolls = payload["rolls"].as_array().unwrap();
    let sum: i64 = rolls.iter().map(|r| r.as_i64().unwrap()).sum();
    assert_eq!(payload["total"].as_i64().unwrap(), sum + 1);
}

#[tokio::test]
async fn test_join_and_chat_are_broadcast() {
    let party = PartyTest::start().await.unwrap();
    let gm = party.create_session().await.unwrap();
    let alice = party.join(&gm.code, "alice").await.unwrap();

    let mut gm_ws = party.connect_ws(Some(&gm.token)).await.unwrap();
    let mut alice_ws = party.connect_ws(Some(&alice.token)).await.unwrap();

    let joined = gm_ws.recv_event("player_joined").await.unwrap();
    assert_eq!(joined["payload"]["player_id"], alice.player_id.as_str());
    assert_eq!(joined["payload"]["is_gm"], false);

    alice_ws
        .send("chat", json!({ "message": "hello table" }))
        .await
        .unwrap();
    for ws in [&mut gm_ws, &mut alice_ws] {
        let chat = ws.recv_event("chat").await.unwrap();
        assert_eq!(chat["payload"]["player_name"], "alice");
        assert_eq!(chat["payload"]["message"], "hello table");
    }
}

#[tokio::test]
async fn test_rooms_do_not_leak_events() {
    let party = PartyTest::start().await.unwrap();
    let gm1 = party.create_session().await.unwrap();
    let gm2 = party.create_session().await.unwrap();

    let mut ws1 = party.connect_ws(Some(&gm1.token)).await.unwrap();
    let mut ws2 = party.connect_ws(Some(&gm2.token)).await.unwrap();

    ws1.send("chat", json!({ "message": "room one only" }))
        .await
        .unwrap();
    ws1.recv_event("chat").await.unwrap();
    assert!(ws2.is_quiet(Duration::from_millis(200)).await);
}

#[tokio::test]
async fn test_malformed_message_keeps_connection() {
    let party = PartyTest::start().await.unwrap();
    let gm = party.create_session().await.unwrap();
    let mut ws = party.connect_ws(Some(&gm.token)).await.unwrap();

    ws.send_text("{not json").await.unwrap();
    let error = ws.recv_event("error").await.unwrap();
    assert_eq!(error["payload"]["message"], "Invalid JSON");

    ws.send("roll_dice", json!({ "dice": "nonsense" })).await.unwrap();
    ws.recv_event("error").await.unwrap();

    // Unknown types are ignored, not answered
    ws.send("teleport", json!({})).await.unwrap();
    ws.send("roll_dice", json!({ "dice": "1d4" })).await.unwrap();
    let next = ws.recv_json().await.unwrap();
    assert_eq!(next["type"], "dice_result");
}

#[tokio::test]
async fn test_huge_dice_modifier_is_rejected() {
    let party = PartyTest::start().await.unwrap();
    let gm = party.create_session().await.unwrap();
    let mut ws = party.connect_ws(Some(&gm.token)).await.unwrap();

    ws.send("roll_dice", json!({ "dice": "1d20+2147483647" }))
        .await
        .unwrap();
    ws.recv_event("error").await.unwrap();

    ws.send("roll_dice", json!({ "dice": "1d20+3" })).await.unwrap();
    let event = ws.recv_event("dice_result").await.unwrap();
    assert_eq!(event["payload"]["modifier"], 3);
}

#[tokio::test]
async fn test_oversized_message_is_rejected() {
    let party = PartyTest::with_config(config(|c| c.max_message_bytes = 128))
        .await
        .unwrap();
    let gm = party.create_session().await.unwrap();
    let mut ws = party.connect_ws(Some(&gm.token)).await.unwrap();

    let padding = "x".repeat(512);
    ws.send("chat", json!({ "message": padding })).await.unwrap();
    let error = ws.recv_event("error").await.unwrap();
    assert_eq!(error["payload"]["message"], "Message too large");

    ws.send("chat", json!({ "message": "short" })).await.unwrap();
    ws.recv_event("chat").await.unwrap();
}

#[tokio::test]
async fn test_repeated_failures_close_connection() {
    let party = PartyTest::with_config(config(|c| c.max_consecutive_failures = 3))
        .await
        .unwrap();
    let gm = party.create_session().await.unwrap();
    let mut ws = party.connect_ws(Some(&gm.token)).await.unwrap();

    for _ in 0..3 {
        ws.send_text("garbage").await.unwrap();
    }
    let mut errors = 0;
    let code = loop {
        match ws.next_frame().await.unwrap() {
            Frame::Event(event) if event["type"] == "error" => errors += 1,
            Frame::Event(_) => {}
            Frame::Closed(code) => break code,
        }
    };
    assert_eq!(errors, 3);
    assert_eq!(code, Some(4003));
}

#[tokio::test]
async fn test_new_connection_supersedes_old() {
    let party = PartyTest::start().await.unwrap();
    let gm = party.create_session().await.unwrap();

    let mut first = party.connect_ws(Some(&gm.token)).await.unwrap();
    let mut second = party.connect_ws(Some(&gm.token)).await.unwrap();
    assert_eq!(first.recv_close().await.unwrap(), Some(4002));

    second
        .send("roll_dice", json!({ "dice": "1d20" }))
        .await
        .unwrap();
    second.recv_event("dice_result").await.unwrap();

    // The superseded socket's teardown must not start a grace period
    tokio::time::sleep(Duration::from_millis(100)).await;
    let record = party.player_record(&gm.token, &gm.player_id).await.unwrap();
    assert!(record["left_at"].is_null());
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let party = PartyTest::with_config(config(|c| c.idle_timeout_ms = 200))
        .await
        .unwrap();
    let gm = party.create_session().await.unwrap();
    let mut ws = party.connect_ws(Some(&gm.token)).await.unwrap();

    assert_eq!(ws.recv_close().await.unwrap(), Some(4004));
}

#[tokio::test]
async fn test_keepalive_ping_is_sent() {
    let party = PartyTest::with_config(config(|c| c.ping_interval_ms = 100))
        .await
        .unwrap();
    let gm = party.create_session().await.unwrap();
    let mut ws = party.connect_ws(Some(&gm.token)).await.unwrap();

    ws.recv_event("ping").await.unwrap();
    ws.send("pong", json!({})).await.unwrap();
    ws.recv_event("ping").await.unwrap();
}

#[tokio::test]
async fn test_abrupt_disconnect_leaves_after_grace() {
    let party = PartyTest::with_config(config(|c| c.grace_period_ms = 300))
        .await
        .unwrap();
    let gm = party.create_session().await.unwrap();
    let alice = party.join(&gm.code, "alice").await.unwrap();

    let mut gm_ws = party.connect_ws(Some(&gm.token)).await.unwrap();
    let mut alice_ws = party.connect_ws(Some(&alice.token)).await.unwrap();
    gm_ws.recv_event("player_joined").await.unwrap();

    alice_ws.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let record = party.player_record(&gm.token, &alice.player_id).await.unwrap();
    assert!(record["left_at"].is_null());

    let left = gm_ws.recv_event("player_left").await.unwrap();
    assert_eq!(left["payload"]["player_id"], alice.player_id.as_str());
    let record = party.player_record(&gm.token, &alice.player_id).await.unwrap();
    assert!(!record["left_at"].is_null());
}

#[tokio::test]
async fn test_reconnect_within_grace_never_leaves() {
    let party = PartyTest::with_config(config(|c| c.grace_period_ms = 300))
        .await
        .unwrap();
    let gm = party.create_session().await.unwrap();
    let alice = party.join(&gm.code, "alice").await.unwrap();

    let mut alice_ws = party.connect_ws(Some(&alice.token)).await.unwrap();
    alice_ws.close().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let _again = party.connect_ws(Some(&alice.token)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    let record = party.player_record(&gm.token, &alice.player_id).await.unwrap();
    assert!(record["left_at"].is_null());
}

#[tokio::test]
async fn test_explicit_leave_is_immediate() {
    let party = PartyTest::start().await.unwrap();
    let gm = party.create_session().await.unwrap();
    let alice = party.join(&gm.code, "alice").await.unwrap();

    let mut gm_ws = party.connect_ws(Some(&gm.token)).await.unwrap();
    let mut alice_ws = party.connect_ws(Some(&alice.token)).await.unwrap();
    gm_ws.recv_event("player_joined").await.unwrap();

    alice_ws.send("leave", json!({})).await.unwrap();
    assert_eq!(alice_ws.recv_close().await.unwrap(), Some(1000));

    gm_ws.recv_event("player_left").await.unwrap();
    let record = party.player_record(&gm.token, &alice.player_id).await.unwrap();
    assert!(!record["left_at"].is_null());
}
