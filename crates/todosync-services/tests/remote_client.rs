//! Integration tests for RemoteClient using wiremock.
//!
//! These tests verify the wire contract of the task list API against a mock
//! HTTP server.

use std::sync::Arc;
use std::time::Duration;

use todosync_services::remote::REVISION_HEADER;
use todosync_services::{Importance, RemoteClient, RemoteError, RemoteSettings, StaticToken, Task, TaskId};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to create a wire element
fn element(id: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "text": text,
        "importance": "important",
        "done": false,
        "created_at": 1_700_000_000,
        "changed_at": 1_700_000_100,
        "last_updated_by": "other-device"
    })
}

fn client_for(server: &MockServer) -> RemoteClient {
    RemoteClient::new(
        RemoteSettings {
            base_url: server.uri(),
            device_id: "laptop".to_string(),
            request_timeout: Duration::from_secs(5),
        },
        Arc::new(StaticToken::new("secret")),
    )
    .unwrap()
}

#[tokio::test]
async fn test_list_success() {
    let mock_server = MockServer::start().await;
    let id = TaskId::new().to_string();

    Mock::given(method("GET"))
        .and(path("/list"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "list": [element(&id, "Buy milk")],
            "revision": 12
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let tasks = client.list().await.unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id.to_string(), id);
    assert_eq!(tasks[0].text, "Buy milk");
    assert_eq!(tasks[0].importance, Importance::High);
    assert_eq!(tasks[0].created_at.timestamp(), 1_700_000_000);
    assert_eq!(tasks[0].category.name, "No category");
    assert_eq!(client.revision(), 12);
}

#[tokio::test]
async fn test_list_drops_invalid_elements() {
    let mock_server = MockServer::start().await;
    let id = TaskId::new().to_string();

    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "list": [
                element("not-a-uuid", "Broken id"),
                element(&id, "Valid"),
                element(&TaskId::new().to_string(), "   "),
                {"id": TaskId::new().to_string(), "text": "No created_at"}
            ],
            "revision": 2
        })))
        .mount(&mock_server)
        .await;

    let tasks = client_for(&mock_server).list().await.unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].text, "Valid");
}

#[tokio::test]
async fn test_get_single_task() {
    let mock_server = MockServer::start().await;
    let id = TaskId::new();

    Mock::given(method("GET"))
        .and(path(format!("/list/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "element": element(&id.to_string(), "Single"),
            "revision": 4
        })))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let task = client.get(id).await.unwrap().unwrap();

    assert_eq!(task.id, id);
    assert_eq!(task.text, "Single");
    assert_eq!(client.revision(), 4);
}

#[tokio::test]
async fn test_mutations_carry_revision_header() {
    let mock_server = MockServer::start().await;
    let task = Task::new("Write report", Importance::Normal).unwrap();
    let item_path = format!("/list/{}", task.id);

    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok", "list": [], "revision": 5
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/list"))
        .and(header(REVISION_HEADER, "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok", "revision": 6
        })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("PUT"))
        .and(path(item_path.as_str()))
        .and(header(REVISION_HEADER, "6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok", "revision": 7
        })))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(item_path.as_str()))
        .and(header(REVISION_HEADER, "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok", "revision": 8
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    client.list().await.unwrap();
    client.add(&task).await.unwrap();
    client.update(&task).await.unwrap();
    client.delete(task.id).await.unwrap();

    assert_eq!(client.revision(), 8);
}

#[tokio::test]
async fn test_add_encodes_element() {
    let mock_server = MockServer::start().await;
    let task = Task::new("Encode me", Importance::Normal).unwrap().with_color("#FF0000");

    Mock::given(method("POST"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok", "revision": 1
        })))
        .mount(&mock_server)
        .await;

    client_for(&mock_server).add(&task).await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let sent = &body["element"];
    assert_eq!(sent["id"], task.id.to_string());
    assert_eq!(sent["text"], "Encode me");
    assert_eq!(sent["color"], "#FF0000");
    assert_eq!(sent["last_updated_by"], "laptop");
    assert_eq!(sent["created_at"], task.created_at.timestamp());
    // Never modified: changed_at mirrors created_at
    assert_eq!(sent["changed_at"], task.created_at.timestamp());
    // Normal importance is left out
    assert!(sent.get("importance").is_none());
}

#[tokio::test]
async fn test_replace_all_returns_server_list() {
    let mock_server = MockServer::start().await;
    let local = Task::new("Local", Importance::Low).unwrap();
    let remote_id = TaskId::new().to_string();

    Mock::given(method("PATCH"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok",
            "list": [element(&remote_id, "From server")],
            "revision": 30
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let merged = client.replace_all(std::slice::from_ref(&local)).await.unwrap();

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].text, "From server");
    assert_eq!(client.revision(), 30);

    let requests = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["list"][0]["id"], local.id.to_string());
    assert_eq!(body["list"][0]["importance"], "low");
}

#[tokio::test]
async fn test_missing_revision_keeps_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok", "list": [], "revision": 9
        })))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok", "list": []
        })))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    client.list().await.unwrap();
    client.list().await.unwrap();

    assert_eq!(client.revision(), 9);
}

#[tokio::test]
async fn test_status_mapping() {
    let cases = [
        (400, RemoteError::BadRequest),
        (401, RemoteError::AuthError),
        (404, RemoteError::NotFound),
        (500, RemoteError::ServerError(500)),
        (503, RemoteError::ServerError(503)),
        (418, RemoteError::UnexpectedStatus(418)),
    ];

    for (status, expected) in cases {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/list"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&mock_server)
            .await;

        let result = client_for(&mock_server).list().await;
        assert_eq!(result.unwrap_err(), expected, "status {}", status);
    }
}

#[tokio::test]
async fn test_non_json_body_is_unexpected_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&mock_server)
        .await;

    let result = client_for(&mock_server).list().await;
    assert_eq!(result.unwrap_err(), RemoteError::UnexpectedResponse);
}

#[tokio::test]
async fn test_empty_token_is_auth_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let client = RemoteClient::new(
        RemoteSettings {
            base_url: mock_server.uri(),
            device_id: "laptop".to_string(),
            request_timeout: Duration::from_secs(5),
        },
        Arc::new(StaticToken::new("")),
    )
    .unwrap();

    assert_eq!(client.list().await.unwrap_err(), RemoteError::AuthError);
}
