#![allow(clippy::unwrap_used)]

use std::time::Duration;

use lessonforge_codec::RemoteBlock;
use lessonforge_remote::{
    CourseFields, Credential, GatewayConfig, HttpGateway, LessonFields, RemoteError, RemoteId,
    RemotePlatform, SectionFields, StepFields, UnitFields,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway(server: &MockServer) -> HttpGateway {
    HttpGateway::new(GatewayConfig {
        base_url: server.uri(),
        timeout: Duration::from_millis(500),
    })
    .unwrap()
}

fn cred() -> Credential {
    Credential::new("test-token")
}

// ── Create ──────────────────────────────────────────────────────

#[tokio::test]
async fn create_course_sends_bearer_and_reads_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/courses"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({"course": {"title": "Rust 101"}})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"courses": [{"id": 11}]})))
        .expect(1)
        .mount(&server)
        .await;

    let id = gateway(&server)
        .create_course(
            &cred(),
            &CourseFields {
                title: "Rust 101".into(),
                description: String::new(),
            },
        )
        .await
        .unwrap();

    assert_eq!(id, RemoteId(11));
}

#[tokio::test]
async fn create_section_wraps_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/sections"))
        .and(body_partial_json(
            json!({"section": {"course": 11, "title": "Basics", "position": 2}}),
        ))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"sections": [{"id": 21}]})))
        .mount(&server)
        .await;

    let id = gateway(&server)
        .create_section(
            &cred(),
            &SectionFields {
                course: RemoteId(11),
                title: "Basics".into(),
                description: String::new(),
                position: 2,
            },
        )
        .await
        .unwrap();

    assert_eq!(id, RemoteId(21));
}

#[tokio::test]
async fn create_step_uses_step_source_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/step-sources"))
        .and(body_partial_json(json!({
            "stepSource": {"lesson": 31, "position": 1, "block": {"text": "<p>Hi</p>"}}
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({"step-sources": [{"id": 41}]})),
        )
        .mount(&server)
        .await;

    let id = gateway(&server)
        .create_step(
            &cred(),
            &StepFields {
                lesson: RemoteId(31),
                position: 1,
                block: RemoteBlock {
                    text: "<p>Hi</p>".into(),
                    ..Default::default()
                },
            },
        )
        .await
        .unwrap();

    assert_eq!(id, RemoteId(41));
}

#[tokio::test]
async fn create_with_empty_envelope_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/lessons"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"lessons": []})))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .create_lesson(&cred(), &LessonFields { title: "L".into() })
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::InvalidResponse(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn create_with_empty_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/units"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .create_unit(
            &cred(),
            &UnitFields {
                section: RemoteId(1),
                lesson: RemoteId(2),
                position: 1,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::InvalidResponse(_)));
}

// ── Status classification ───────────────────────────────────────

#[tokio::test]
async fn client_error_is_validation_with_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/lessons"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string(r#"{"title":["This field is required."]}"#),
        )
        .mount(&server)
        .await;

    let err = gateway(&server)
        .create_lesson(&cred(), &LessonFields { title: String::new() })
        .await
        .unwrap_err();

    match err {
        RemoteError::Validation { status, detail } => {
            assert_eq!(status, 400);
            assert!(detail.contains("This field is required."));
        }
        other => unreachable!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/courses/11"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = gateway(&server)
        .update_course(
            &cred(),
            RemoteId(11),
            &CourseFields {
                title: "T".into(),
                description: String::new(),
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Server { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/step-sources/5"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"step-sources": []}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = gateway(&server)
        .get_step(&cred(), RemoteId(5))
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteError::Timeout));
}

#[tokio::test]
async fn unreachable_host_is_transport_failure() {
    let gateway = HttpGateway::new(GatewayConfig {
        base_url: "http://127.0.0.1:1".into(),
        timeout: Duration::from_millis(500),
    })
    .unwrap();

    let err = gateway
        .delete_lesson(&cred(), RemoteId(1))
        .await
        .unwrap_err();

    assert!(err.is_transient());
}

// ── Lists and reads ─────────────────────────────────────────────

#[tokio::test]
async fn list_units_filters_by_lesson() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/units"))
        .and(query_param("lesson", "31"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": {"page": 1},
            "units": [{"id": 51, "section": 21, "lesson": 31, "position": 3}]
        })))
        .mount(&server)
        .await;

    let units = gateway(&server)
        .list_units(&cred(), RemoteId(31))
        .await
        .unwrap();

    assert_eq!(units.len(), 1);
    assert_eq!(units[0].id, RemoteId(51));
    assert_eq!(units[0].section, RemoteId(21));
    assert_eq!(units[0].position, 3);
}

#[tokio::test]
async fn list_without_array_is_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/sections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"meta": {}})))
        .mount(&server)
        .await;

    let sections = gateway(&server)
        .list_sections(&cred(), RemoteId(11))
        .await
        .unwrap();

    assert!(sections.is_empty());
}

#[tokio::test]
async fn get_step_returns_block() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/step-sources/41"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "step-sources": [{
                "id": 41,
                "lesson": 31,
                "position": 2,
                "block": {
                    "text": "<p>Order these</p>",
                    "source": {"options": [{"text": "a"}, {"text": "b"}], "is_html_enabled": true}
                }
            }]
        })))
        .mount(&server)
        .await;

    let step = gateway(&server)
        .get_step(&cred(), RemoteId(41))
        .await
        .unwrap();

    assert_eq!(step.lesson, RemoteId(31));
    assert_eq!(step.position, 2);
    let decoded = lessonforge_codec::decode(&step.block).unwrap();
    assert_eq!(decoded.variant.kind(), lessonforge_codec::StepKind::Sorting);
}

// ── Delete ──────────────────────────────────────────────────────

#[tokio::test]
async fn delete_of_missing_entity_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/units/9"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    gateway(&server)
        .delete_unit(&cred(), RemoteId(9))
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_step_hits_step_source() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/step-sources/41"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    gateway(&server)
        .delete_step(&cred(), RemoteId(41))
        .await
        .unwrap();
}
