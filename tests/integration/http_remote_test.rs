//! HTTP remote collaborator against a mock server

use crate::common::*;
use crate::{assert_clean, assert_err, assert_ok};
use gigsync::shared::action::ActionRecord;
use gigsync::shared::entity::{EntityType, Tagged};
use gigsync::shared::error::SyncError;
use gigsync::sync::http::HttpRemote;
use gigsync::sync::{PushBatch, RemoteClient, SyncService};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_push_sends_batch_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/push"))
        .and(header("Authorization", "Bearer secret"))
        .and(body_partial_json(json!({ "entity": "trip" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accepted": [{ "local_id": 1, "canonical": { "row_id": 12 } }],
            "rejected": [{ "local_id": 2, "reason": "bad date" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let remote = HttpRemote::new(server.uri()).with_token("secret");
    let mut batch = PushBatch::new(Uuid::new_v4(), EntityType::Trip);
    let mut first = trip("Uber", 1);
    first.set_id(1);
    let mut second = trip("Uber", 2);
    second.set_id(2);
    batch.push(first.wrap());
    batch.push(second.wrap());

    let result = assert_ok!(remote.push(batch).await);
    assert_eq!(result.accepted[0].canonical.row_id, Some(12));
    assert_eq!(result.rejected[0].reason, "bad date");
}

#[tokio::test]
async fn test_pull_forwards_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sync/pull"))
        .and(query_param("cursor", "c-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [],
            "cursor": "c-5"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let remote = HttpRemote::new(format!("{}/", server.uri()));
    let result = assert_ok!(remote.pull(Some("c-4".to_string())).await);
    assert!(result.records.is_empty());
    assert_eq!(result.cursor.as_deref(), Some("c-5"));
}

#[tokio::test]
async fn test_server_error_is_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sync/pull"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let remote = HttpRemote::new(server.uri());
    assert_err!(remote.pull(None).await, SyncError::Transport(_));
}

#[tokio::test]
async fn test_malformed_body_is_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sync/pull"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let remote = HttpRemote::new(server.uri());
    assert_err!(remote.pull(None).await, SyncError::Transport(_));
}

#[tokio::test]
async fn test_full_cycle_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/push"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "accepted": [{ "local_id": 1, "canonical": { "row_id": 30 } }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sync/pull"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [{
                "row_id": 31,
                "record": {
                    "type": "region",
                    "record": { "region": "North", "action_time": "2024-01-01T00:00:00Z" }
                }
            }],
            "cursor": "c-1"
        })))
        .mount(&server)
        .await;

    let db = memory_db();
    assert_ok!(db.trips().add(trip("Uber", 1)).await);
    let sync = SyncService::new(
        Arc::clone(&db),
        Arc::new(HttpRemote::new(server.uri())),
        fast_settings(),
    );

    let report = assert_ok!(sync.force_sync().await.expect("no cycle running"));
    assert_eq!(report.pushed, 1);
    assert_eq!(report.pulled, 1);

    let pushed = db.trips().get(1).await.unwrap();
    assert_clean!(pushed);
    assert_eq!(pushed.row_id(), Some(30));
    let regions = db.regions().list().await;
    assert_eq!(regions[0].region, "North");
    assert_eq!(regions[0].row_id(), Some(31));
}
