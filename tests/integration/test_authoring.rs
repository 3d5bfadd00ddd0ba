//! End-to-end tests for the authoring API.
//!
//! Each test starts the real HTTP server on an ephemeral port, backed by the
//! real HTTP gateway pointed at a wiremock remote platform, and drives it with
//! a reqwest client.

use std::net::SocketAddr;
use std::sync::Arc;

use lessonforge_orchestrator::{create_router, AppState, Config, CourseId, HierarchyStore};
use lessonforge_remote::HttpGateway;
use reqwest::StatusCode;
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A running server with its store and client.
struct TestApp {
    base: String,
    client: reqwest::Client,
    store: Arc<HierarchyStore>,
}

impl TestApp {
    async fn spawn(remote: &MockServer) -> Self {
        let mut config = Config::default();
        config.remote.base_url = remote.uri();
        config.remote.timeout_secs = 5;
        config.sync.max_attempts = 2;
        config.sync.initial_backoff_ms = 1;
        config.sync.call_timeout_secs = 5;

        let store = Arc::new(HierarchyStore::new());
        let gateway = HttpGateway::new(config.gateway_config()).expect("Failed to build gateway");
        let state = AppState::build(Arc::clone(&store), Arc::new(gateway), &config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr: SocketAddr = listener.local_addr().expect("Failed to get local addr");
        let router = create_router(state);
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("Server failed");
        });

        Self {
            base: format!("http://{addr}/api"),
            client: reqwest::Client::new(),
            store,
        }
    }

    async fn call(&self, method: reqwest::Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = self
            .client
            .request(method, format!("{}{uri}", self.base))
            .header("x-user-id", "alice")
            .header("x-remote-token", "Bearer e2e-token");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.expect("Request failed");
        let status = response.status();
        let text = response.text().await.expect("Failed to read body");
        let value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).expect("Body is not JSON")
        };
        (status, value)
    }

    async fn post(&self, uri: &str, body: Value) -> Value {
        let (status, value) = self.call(reqwest::Method::POST, uri, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "POST {uri} -> {value}");
        value["value"].clone()
    }

    /// Creates a course with one section, one lesson and one text step.
    async fn seed_tree(&self) -> (String, String, String, String) {
        let course = self.post("/courses", json!({"title": "Rust 101"})).await;
        let course_id = course["id"].as_str().unwrap().to_string();
        let section = self
            .post(&format!("/courses/{course_id}/sections"), json!({"title": "Basics"}))
            .await;
        let section_id = section["id"].as_str().unwrap().to_string();
        let lesson = self
            .post(&format!("/sections/{section_id}/lessons"), json!({"title": "Ownership"}))
            .await;
        let lesson_id = lesson["id"].as_str().unwrap().to_string();
        let step = self
            .post(
                &format!("/lessons/{lesson_id}/steps"),
                json!({"statement": "<p>Values have one owner</p>", "variant": {"kind": "text"}}),
            )
            .await;
        let step_id = step["id"].as_str().unwrap().to_string();
        (course_id, section_id, lesson_id, step_id)
    }
}

fn created(key: &str, id: u64) -> ResponseTemplate {
    ResponseTemplate::new(201).set_body_json(json!({ key: [{"id": id}] }))
}

/// Mounts the remote endpoints needed to publish a one-of-each tree.
async fn mount_publish_mocks(remote: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/courses"))
        .and(header("authorization", "Bearer e2e-token"))
        .respond_with(created("courses", 11))
        .expect(1)
        .mount(remote)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/sections"))
        .and(body_partial_json(json!({"section": {"course": 11, "position": 1}})))
        .respond_with(created("sections", 21))
        .expect(1)
        .mount(remote)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/lessons"))
        .respond_with(created("lessons", 31))
        .expect(1)
        .mount(remote)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/units"))
        .and(query_param("lesson", "31"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"units": []})))
        .mount(remote)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/units"))
        .and(body_partial_json(json!({"unit": {"section": 21, "lesson": 31}})))
        .respond_with(created("units", 41))
        .expect(1)
        .mount(remote)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/step-sources"))
        .and(body_partial_json(json!({"stepSource": {"lesson": 31, "position": 1}})))
        .respond_with(created("step-sources", 51))
        .expect(1)
        .mount(remote)
        .await;
}

#[tokio::test]
async fn test_health_endpoint() {
    let remote = MockServer::start().await;
    let app = TestApp::spawn(&remote).await;

    let (status, body) = app.call(reqwest::Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_publish_tree_links_every_entity() {
    let remote = MockServer::start().await;
    mount_publish_mocks(&remote).await;
    let app = TestApp::spawn(&remote).await;
    let (course_id, _, _, _) = app.seed_tree().await;

    let (status, report) = app
        .call(
            reqwest::Method::POST,
            &format!("/courses/{course_id}/publish-tree"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{report}");
    let remote_ids: Vec<u64> = report["linked"]
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["remoteId"].as_u64().unwrap())
        .collect();
    assert_eq!(remote_ids, vec![11, 21, 31, 51]);

    // A second run finds everything linked and calls nothing new
    let (status, _) = app
        .call(
            reqwest::Method::POST,
            &format!("/courses/{course_id}/publish-tree"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, outline) = app
        .call(reqwest::Method::GET, &format!("/courses/{course_id}/outline"), None)
        .await;
    let lesson = &outline["sections"][0]["lessons"][0]["lesson"];
    assert_eq!(lesson["remoteId"], 31);
    assert_eq!(lesson["remoteUnitId"], 41);
    assert_eq!(lesson["sync"]["status"], "remote_linked");
}

#[tokio::test]
async fn test_remote_rejection_is_reported() {
    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/courses"))
        .respond_with(ResponseTemplate::new(400).set_body_string("title is too long"))
        .expect(1)
        .mount(&remote)
        .await;
    let app = TestApp::spawn(&remote).await;
    let course = app.post("/courses", json!({"title": "Rust 101"})).await;
    let id = course["id"].as_str().unwrap();

    let (status, body) = app
        .call(reqwest::Method::POST, &format!("/courses/{id}/publish"), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("title is too long"));

    let (_, course) = app
        .call(reqwest::Method::GET, &format!("/courses/{id}"), None)
        .await;
    assert_eq!(course["sync"]["status"], "remote_failed");
    assert!(course["remoteId"].is_null());
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/courses"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&remote)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/courses"))
        .respond_with(created("courses", 12))
        .expect(1)
        .mount(&remote)
        .await;
    let app = TestApp::spawn(&remote).await;
    let course = app.post("/courses", json!({"title": "Rust 101"})).await;
    let id = course["id"].as_str().unwrap();

    let (status, linked) = app
        .call(reqwest::Method::POST, &format!("/courses/{id}/publish"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(linked["remoteId"], 12);
}

#[tokio::test]
async fn test_refresh_pulls_remote_block() {
    let remote = MockServer::start().await;
    mount_publish_mocks(&remote).await;
    Mock::given(method("GET"))
        .and(path("/api/step-sources/51"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "step-sources": [{
                "id": 51,
                "lesson": 31,
                "position": 1,
                "block": {
                    "text": "<p>Pick one</p>",
                    "source": {"options": [{"text": "move", "is_correct": true}, {"text": "copy"}]}
                }
            }]
        })))
        .mount(&remote)
        .await;
    let app = TestApp::spawn(&remote).await;
    let (course_id, _, _, step_id) = app.seed_tree().await;
    app.call(
        reqwest::Method::POST,
        &format!("/courses/{course_id}/publish-tree"),
        None,
    )
    .await;

    let (status, step) = app
        .call(reqwest::Method::POST, &format!("/steps/{step_id}/refresh"), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{step}");
    assert_eq!(step["statement"], "<p>Pick one</p>");
    assert_eq!(step["variant"]["kind"], "choice");
    assert_eq!(step["variant"]["payload"]["options"][0]["isCorrect"], true);
    assert_eq!(step["position"], 1);
}

#[tokio::test]
async fn test_delete_removes_remote_children_first() {
    let remote = MockServer::start().await;
    mount_publish_mocks(&remote).await;
    for target in [
        "/api/step-sources/51",
        "/api/units/41",
        "/api/lessons/31",
        "/api/sections/21",
        "/api/courses/11",
    ] {
        Mock::given(method("DELETE"))
            .and(path(target))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&remote)
            .await;
    }
    let app = TestApp::spawn(&remote).await;
    let (course_id, _, _, _) = app.seed_tree().await;
    app.call(
        reqwest::Method::POST,
        &format!("/courses/{course_id}/publish-tree"),
        None,
    )
    .await;

    let (status, body) = app
        .call(reqwest::Method::DELETE, &format!("/courses/{course_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["warnings"], json!([]));

    let deletes: Vec<String> = remote
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.method.as_str() == "DELETE")
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(
        deletes,
        vec![
            "/api/step-sources/51",
            "/api/units/41",
            "/api/lessons/31",
            "/api/sections/21",
            "/api/courses/11",
        ]
    );
    assert!(app.store.list_courses().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_inserts_stay_contiguous() {
    let remote = MockServer::start().await;
    let app = TestApp::spawn(&remote).await;
    let course = app.post("/courses", json!({"title": "Rust 101"})).await;
    let id = course["id"].as_str().unwrap().to_string();

    let uri = format!("/courses/{id}/sections");
    let requests = (0..16).map(|i| {
        app.call(
            reqwest::Method::POST,
            &uri,
            Some(json!({"title": format!("Section {i}"), "position": 1})),
        )
    });
    for (status, body) in futures::future::join_all(requests).await {
        assert_eq!(status, StatusCode::CREATED, "{body}");
    }

    let (_, sections) = app.call(reqwest::Method::GET, &uri, None).await;
    let positions: Vec<u64> = sections
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["position"].as_u64().unwrap())
        .collect();
    assert_eq!(positions, (1..=16).collect::<Vec<u64>>());
}

#[tokio::test]
async fn test_snapshot_survives_restart() {
    let remote = MockServer::start().await;
    mount_publish_mocks(&remote).await;
    let app = TestApp::spawn(&remote).await;
    let (course_id, _, _, _) = app.seed_tree().await;
    app.call(
        reqwest::Method::POST,
        &format!("/courses/{course_id}/publish-tree"),
        None,
    )
    .await;

    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let state_path = dir.path().join("state.json");
    app.store.save(&state_path).await.expect("Failed to save");

    let restored = HierarchyStore::load(&state_path).await.expect("Failed to load");
    let course_id: CourseId = course_id.parse().expect("Invalid course id");
    let before = app.store.outline(course_id).await.expect("Missing outline");
    let after = restored.outline(course_id).await.expect("Missing outline");
    assert_eq!(before, after);
    assert_eq!(after.sections[0].lessons[0].lesson.remote_unit_id.map(|id| id.0), Some(41));
}
