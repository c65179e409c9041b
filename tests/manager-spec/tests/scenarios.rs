// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Black-box scenario tests against a real router, Postgres, and NATS.
//! Mirrors the cli crate's `skip_unless_docker!()` pattern: without
//! `MANAGER_INTEGRATION_TESTS` these are a no-op, not a failure.

use beach_manager_spec::{build, skip_unless_integration, USER_BEARER};
use serde_json::json;
use uuid::Uuid;

async fn register_session(
    server: &axum_test::TestServer,
    origin_session_id: &str,
) -> serde_json::Value {
    server
        .post("/sessions/register")
        .add_header("authorization", USER_BEARER)
        .json(&json!({
            "origin_session_id": origin_session_id,
            "harness_kind": "terminal",
        }))
        .await
        .json::<serde_json::Value>()
}

/// Scenario A (happy path): register, attach, acquire a lease, queue an
/// action, drain it over the HTTP fallback poll, and ack it. This only
/// exercises the http_fallback transport leg of dual delivery — there is no
/// real WebRTC peer in this harness to drive the fast-path leg end to end.
#[tokio::test]
async fn scenario_a_happy_path() {
    skip_unless_integration!();
    let h = build().await;

    let origin = format!("scenario-a-{}", Uuid::new_v4());
    let registered = register_session(&h.server, &origin).await;
    let session_id = registered["session"]["id"].as_str().expect("session id");

    let beach_id = format!("beach-{}", Uuid::new_v4());
    // Every call here rides USER_BEARER, which resolves to subject
    // "dev-bypass" under AUTH_BYPASS; the fake directory must record
    // ownership under that same subject.
    h.directory.set_owner(Uuid::parse_str(session_id).expect("uuid"), "dev-bypass").await;

    h.server
        .post(&format!("/private-beaches/{beach_id}/sessions/attach"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"session_ids": [session_id]}))
        .await
        .assert_status(axum::http::StatusCode::OK);

    let lease: serde_json::Value = h
        .server
        .post(&format!("/sessions/{session_id}/controller/lease"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"ttl_secs": 3600}))
        .await
        .json();
    let lease_token = lease["id"].as_str().expect("lease id");

    let queued: serde_json::Value = h
        .server
        .post(&format!("/sessions/{session_id}/actions"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({
            "controller_token": lease_token,
            "actions": [{"id": "a1", "type": "keypress", "payload": {"key": "x"}}],
        }))
        .await
        .json();
    assert_eq!(queued["accepted_ids"], json!(["a1"]));
    assert!(queued["rejected"].as_array().expect("rejected array").is_empty());

    let polled: serde_json::Value = h
        .server
        .get(&format!("/sessions/{session_id}/actions/poll"))
        .add_header("authorization", USER_BEARER)
        .await
        .json();
    let actions = polled.as_array().expect("poll array");
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["id"], json!("a1"));

    h.server
        .post(&format!("/sessions/{session_id}/actions/ack"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"acks": [{"id": "a1", "status": "applied", "applied_at": chrono::Utc::now()}]}))
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);

    let pending: serde_json::Value = h
        .server
        .get(&format!("/sessions/{session_id}/actions/pending"))
        .add_header("authorization", USER_BEARER)
        .await
        .json();
    assert_eq!(pending["depth"], json!(0));
}

/// Scenario B (fast-path gated): a session whose `transport_mode` has
/// already flipped to `fast_path` but with no live data channel must be
/// refused with `fast_path_not_ready`, not silently routed to the broker.
#[tokio::test]
async fn scenario_b_fast_path_gated() {
    skip_unless_integration!();
    let h = build().await;

    let origin = format!("scenario-b-{}", Uuid::new_v4());
    let registered = register_session(&h.server, &origin).await;
    let session_id_str = registered["session"]["id"].as_str().expect("session id");
    let session_id = Uuid::parse_str(session_id_str).expect("uuid");

    let beach_id = format!("beach-{}", Uuid::new_v4());
    h.directory.set_owner(session_id, "dev-bypass").await;
    h.server
        .post(&format!("/private-beaches/{beach_id}/sessions/attach"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"session_ids": [session_id_str]}))
        .await
        .assert_status(axum::http::StatusCode::OK);

    h.sessions
        .set_transport_mode(session_id, beach_manager::session::TransportMode::FastPath)
        .await
        .expect("flip transport mode");

    let lease: serde_json::Value = h
        .server
        .post(&format!("/sessions/{session_id_str}/controller/lease"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"ttl_secs": 3600}))
        .await
        .json();
    let lease_token = lease["id"].as_str().expect("lease id");

    let resp = h
        .server
        .post(&format!("/sessions/{session_id_str}/actions"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({
            "controller_token": lease_token,
            "actions": [{"id": "b1", "type": "keypress", "payload": {}}],
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::PRECONDITION_FAILED);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], json!("fast_path_not_ready"));
}

/// Scenario C (wrong-target lease): a lease minted for one session must be
/// rejected with `target_mismatch` when presented against a different one.
#[tokio::test]
async fn scenario_c_wrong_target_lease() {
    skip_unless_integration!();
    let h = build().await;

    let s3 = register_session(&h.server, &format!("scenario-c-s3-{}", Uuid::new_v4())).await;
    let s3_id = s3["session"]["id"].as_str().expect("s3 id").to_owned();
    let s4 = register_session(&h.server, &format!("scenario-c-s4-{}", Uuid::new_v4())).await;
    let s4_id = s4["session"]["id"].as_str().expect("s4 id").to_owned();

    let beach_id = format!("beach-{}", Uuid::new_v4());
    h.directory.set_owner(Uuid::parse_str(&s3_id).expect("uuid"), "dev-bypass").await;
    h.directory.set_owner(Uuid::parse_str(&s4_id).expect("uuid"), "dev-bypass").await;
    h.server
        .post(&format!("/private-beaches/{beach_id}/sessions/attach"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"session_ids": [s3_id, s4_id]}))
        .await
        .assert_status(axum::http::StatusCode::OK);

    let lease3: serde_json::Value = h
        .server
        .post(&format!("/sessions/{s3_id}/controller/lease"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"ttl_secs": 3600}))
        .await
        .json();
    let lease3_token = lease3["id"].as_str().expect("lease3 id");

    let resp = h
        .server
        .post(&format!("/sessions/{s4_id}/actions"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({
            "controller_token": lease3_token,
            "actions": [{"id": "c1", "type": "keypress", "payload": {}}],
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::CONFLICT);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], json!("target_mismatch"));

    let events: serde_json::Value = h
        .server
        .get(&format!("/sessions/{s4_id}/controller-events"))
        .add_header("authorization", USER_BEARER)
        .await
        .json();
    let events = events.as_array().expect("events array");
    assert!(events.iter().any(|e| e["event_type"] == json!("gate_drop")));
}

/// Scenario D (dual delivery and ack): queuing `[d1, d2]` dual-writes both to
/// the broker regardless of fast-path availability, and acks may arrive out
/// of order (`d2` then `d1`) and still each clear their own broker entry,
/// leaving pending depth at 0. This harness has no real WebRTC peer, so it
/// only exercises the broker leg of the dual write — the `mgr-actions`
/// sequencing (`n`, `n+1`) is covered by `fastpath/wire.rs`'s own unit tests.
#[tokio::test]
async fn scenario_d_dual_delivery_and_ack() {
    skip_unless_integration!();
    let h = build().await;

    let origin = format!("scenario-d-{}", Uuid::new_v4());
    let registered = register_session(&h.server, &origin).await;
    let session_id = registered["session"]["id"].as_str().expect("session id").to_owned();

    let beach_id = format!("beach-{}", Uuid::new_v4());
    h.directory.set_owner(Uuid::parse_str(&session_id).expect("uuid"), "dev-bypass").await;
    h.server
        .post(&format!("/private-beaches/{beach_id}/sessions/attach"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"session_ids": [session_id]}))
        .await
        .assert_status(axum::http::StatusCode::OK);

    let lease: serde_json::Value = h
        .server
        .post(&format!("/sessions/{session_id}/controller/lease"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"ttl_secs": 3600}))
        .await
        .json();
    let lease_token = lease["id"].as_str().expect("lease id");

    let queued: serde_json::Value = h
        .server
        .post(&format!("/sessions/{session_id}/actions"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({
            "controller_token": lease_token,
            "actions": [
                {"id": "d1", "type": "keypress", "payload": {}},
                {"id": "d2", "type": "keypress", "payload": {}},
            ],
        }))
        .await
        .json();
    assert_eq!(queued["accepted_ids"], json!(["d1", "d2"]));

    let polled: serde_json::Value = h
        .server
        .get(&format!("/sessions/{session_id}/actions/poll"))
        .add_header("authorization", USER_BEARER)
        .await
        .json();
    let actions = polled.as_array().expect("poll array");
    let ids: Vec<&str> = actions.iter().map(|a| a["id"].as_str().expect("action id")).collect();
    assert_eq!(ids, vec!["d1", "d2"]);

    // Ack out of order: d2 first, then d1.
    h.server
        .post(&format!("/sessions/{session_id}/actions/ack"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"acks": [{"id": "d2", "status": "applied", "applied_at": chrono::Utc::now()}]}))
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);

    h.server
        .post(&format!("/sessions/{session_id}/actions/ack"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"acks": [{"id": "d1", "status": "applied", "applied_at": chrono::Utc::now()}]}))
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);

    let pending: serde_json::Value = h
        .server
        .get(&format!("/sessions/{session_id}/actions/pending"))
        .add_header("authorization", USER_BEARER)
        .await
        .json();
    assert_eq!(pending["depth"], json!(0));
}

/// Scenario E (attach by code): a publish token minted for one session must
/// never be accepted to publish state for a different one.
#[tokio::test]
async fn scenario_e_attach_by_code_scopes_publish_token() {
    skip_unless_integration!();
    let h = build().await;

    let s6 = register_session(&h.server, &format!("scenario-e-s6-{}", Uuid::new_v4())).await;
    let s6_id_str = s6["session"]["id"].as_str().expect("s6 id").to_owned();
    let s6_id = Uuid::parse_str(&s6_id_str).expect("uuid");
    let s7 = register_session(&h.server, &format!("scenario-e-s7-{}", Uuid::new_v4())).await;
    let s7_id_str = s7["session"]["id"].as_str().expect("s7 id").to_owned();

    h.directory.set_code(s6_id, "ABCDEF").await;

    let beach_id = "PB1";
    h.server
        .post(&format!("/private-beaches/{beach_id}/sessions/attach-by-code"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"session_id": s6_id_str, "code": "ABCDEF"}))
        .await
        .assert_status(axum::http::StatusCode::OK);

    let handshake: serde_json::Value = h
        .server
        .get(&format!("/sessions/{s6_id_str}/handshake"))
        .add_header("authorization", USER_BEARER)
        .await
        .json();
    let token = handshake["idle_publish_token"]["token"].as_str().expect("token").to_owned();

    h.server
        .post(&format!("/sessions/{s6_id_str}/state"))
        .add_header("authorization", format!("Bearer {token}"))
        .json(&json!({"snapshot_ref": "s1"}))
        .await
        .assert_status(axum::http::StatusCode::ACCEPTED);

    let resp = h
        .server
        .post(&format!("/sessions/{s7_id_str}/state"))
        .add_header("authorization", format!("Bearer {token}"))
        .json(&json!({"snapshot_ref": "s1"}))
        .await;
    resp.assert_status(axum::http::StatusCode::FORBIDDEN);
}

/// Scenario F (queue overflow): the 501st pending action for a session is
/// rejected with `queue_over_limit`, and the session accepts again only
/// after draining below the low-water mark.
#[tokio::test]
async fn scenario_f_queue_overflow() {
    skip_unless_integration!();
    let h = build().await;

    let origin = format!("scenario-f-{}", Uuid::new_v4());
    let registered = register_session(&h.server, &origin).await;
    let session_id = registered["session"]["id"].as_str().expect("session id").to_owned();

    let beach_id = format!("beach-{}", Uuid::new_v4());
    h.directory.set_owner(Uuid::parse_str(&session_id).expect("uuid"), "dev-bypass").await;
    h.server
        .post(&format!("/private-beaches/{beach_id}/sessions/attach"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"session_ids": [session_id]}))
        .await
        .assert_status(axum::http::StatusCode::OK);

    let lease: serde_json::Value = h
        .server
        .post(&format!("/sessions/{session_id}/controller/lease"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({"ttl_secs": 3600}))
        .await
        .json();
    let lease_token = lease["id"].as_str().expect("lease id").to_owned();

    // Queue one-by-one to dodge the per-lease rate limiter's burst cap while
    // still reaching the 500-deep backpressure ceiling.
    let mut queued = 0usize;
    for i in 0..500 {
        let action_id = format!("f{i}");
        let resp = h
            .server
            .post(&format!("/sessions/{session_id}/actions"))
            .add_header("authorization", USER_BEARER)
            .json(&json!({
                "controller_token": lease_token,
                "actions": [{"id": action_id, "type": "keypress", "payload": {}}],
            }))
            .await;
        if resp.status_code() == axum::http::StatusCode::OK {
            queued += 1;
        }
    }
    assert_eq!(queued, 500, "expected all 500 actions under the ceiling to be accepted");

    let resp = h
        .server
        .post(&format!("/sessions/{session_id}/actions"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({
            "controller_token": lease_token,
            "actions": [{"id": "f500", "type": "keypress", "payload": {}}],
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = resp.json();
    assert_eq!(body["error"], json!("queue_over_limit"));

    // Drain below the 400 low-water mark.
    for _ in 0..150 {
        let polled: serde_json::Value = h
            .server
            .get(&format!("/sessions/{session_id}/actions/poll?max=1"))
            .add_header("authorization", USER_BEARER)
            .await
            .json();
        let actions = polled.as_array().expect("poll array");
        if let Some(action) = actions.first() {
            let id = action["id"].as_str().expect("action id").to_owned();
            h.server
                .post(&format!("/sessions/{session_id}/actions/ack"))
                .add_header("authorization", USER_BEARER)
                .json(&json!({"acks": [{"id": id, "status": "applied", "applied_at": chrono::Utc::now()}]}))
                .await
                .assert_status(axum::http::StatusCode::NO_CONTENT);
        }
    }

    let resp = h
        .server
        .post(&format!("/sessions/{session_id}/actions"))
        .add_header("authorization", USER_BEARER)
        .json(&json!({
            "controller_token": lease_token,
            "actions": [{"id": "f501", "type": "keypress", "payload": {}}],
        }))
        .await;
    resp.assert_status(axum::http::StatusCode::OK);
}
