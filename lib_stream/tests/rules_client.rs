//! # Rules Client Integration Tests
//!
//! Request shapes and response handling of `RulesClient` against the in-process
//! server from `support`.

mod support;

use lib_stream::retrieve::{ApiClient, RulesClient};
use reqwest::Method;
use serde_json::json;

use support::{MockServer, Reply};

#[tokio::test]
async fn add_rule_posts_value_and_tag() {
    let server = MockServer::start(vec![Reply::json(
        201,
        json!({
            "data": [{"id": "1522", "value": "cat has:images", "tag": "cats"}],
            "meta": {"summary": {"created": 1}}
        }),
    )])
    .await;
    let client = RulesClient::new(&server.url("/2/rules"), "secret").unwrap();

    let response = client.add_rule("cat has:images", "cats").await.unwrap();

    assert!(response.success);
    let body = response.data.unwrap();
    assert_eq!(body.rules()[0].id.as_deref(), Some("1522"));

    let request = &server.requests()[0];
    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/2/rules");
    assert_eq!(request.header("Authorization"), Some("Bearer secret"));
    assert_eq!(request.header("Content-Type"), Some("application/json"));
    assert_eq!(
        request.json(),
        json!({"add": [{"value": "cat has:images", "tag": "cats"}]})
    );
}

#[tokio::test]
async fn get_rules_lists_installed_rules() {
    let server = MockServer::start(vec![Reply::json(
        200,
        json!({
            "data": [
                {"id": "1", "value": "dog", "tag": "dogs"},
                {"id": "2", "value": "cat", "tag": "cats"}
            ],
            "meta": {"result_count": 2}
        }),
    )])
    .await;
    let client = RulesClient::new(&server.url("/2/rules"), "secret").unwrap();

    let response = client.get_rules().await.unwrap();

    let tags: Vec<_> = response
        .data
        .as_ref()
        .unwrap()
        .rules()
        .iter()
        .filter_map(|r| r.tag.clone())
        .collect();
    assert_eq!(tags, vec!["dogs", "cats"]);
    assert_eq!(server.requests()[0].method, "GET");
    assert!(server.requests()[0].body.is_empty());
}

#[tokio::test]
async fn delete_rules_posts_ids_and_surfaces_api_errors() {
    let server = MockServer::start(vec![Reply::json(
        200,
        json!({
            "errors": [{"message": "Rule does not exist", "value": "404"}],
            "meta": {"summary": {"deleted": 0, "not_deleted": 1}}
        }),
    )])
    .await;
    let client = RulesClient::new(&server.url("/2/rules"), "secret").unwrap();

    let response = client.delete_rules(&["404".to_string()]).await.unwrap();

    let body = response.data.unwrap();
    assert!(body.rules().is_empty());
    assert_eq!(body.errors.unwrap()[0]["message"], "Rule does not exist");
    assert_eq!(
        server.requests()[0].json(),
        json!({"delete": {"ids": ["404"]}})
    );
}

#[tokio::test]
async fn failure_status_is_returned_not_raised() {
    let server = MockServer::start(vec![Reply::json(
        401,
        json!({"title": "Unauthorized", "status": 401}),
    )])
    .await;
    let client = RulesClient::new(&server.url("/2/rules"), "bad").unwrap();

    let response = client.get_rules().await.unwrap();

    assert!(!response.success);
    assert_eq!(response.status, 401);
    assert!(response.data.is_none());
    assert!(response.error_body.unwrap().contains("Unauthorized"));
}

#[tokio::test]
async fn api_client_joins_relative_paths() {
    let server = MockServer::start(vec![Reply::json(200, json!({"ok": true}))]).await;
    let client = ApiClient::new(&server.url("/api/"), None).unwrap();

    let response = client
        .request::<serde_json::Value, ()>(Method::GET, "v1/items?page=2", None, None)
        .await
        .unwrap();

    assert_eq!(response.data.unwrap()["ok"], true);
    let request = &server.requests()[0];
    assert_eq!(request.path, "/api/v1/items?page=2");
    assert_eq!(request.header("Authorization"), None);
}
