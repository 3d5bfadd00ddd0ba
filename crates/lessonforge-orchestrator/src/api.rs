//! HTTP API for authoring and publishing courses.
//!
//! # Endpoints
//!
//! - `GET /api/health` - Liveness probe
//! - `GET|POST /api/courses` - List or create courses
//! - `GET|PATCH|DELETE /api/courses/:id` - Read, edit or delete a course
//! - `GET /api/courses/:id/outline` - Whole course tree in order
//! - `GET|POST /api/courses/:id/sections` - List or create sections
//! - `GET|PATCH|DELETE /api/sections/:id`, `POST /api/sections/:id/move`
//! - `GET|POST /api/sections/:id/lessons` - List or create lessons
//! - `GET|PATCH|DELETE /api/lessons/:id`, `POST /api/lessons/:id/move`
//! - `GET|POST /api/lessons/:id/steps` - List or create steps
//! - `GET|PATCH|DELETE /api/steps/:id`, `POST /api/steps/:id/move`
//! - `POST /api/steps/:id/refresh` - Pull the remote block into the step
//! - `POST /api/{courses,sections,lessons,steps}/:id/publish` - Publish one entity
//! - `POST /api/courses/:id/publish-tree` - Publish a whole course
//!
//! The caller is identified by the `x-user-id` header and authenticates to
//! the remote platform with `x-remote-token`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lessonforge_orchestrator::{create_router, AppState, Config, HierarchyStore};
//! use lessonforge_remote::HttpGateway;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let gateway = HttpGateway::new(config.gateway_config())?;
//! let state = AppState::build(Arc::new(HierarchyStore::new()), Arc::new(gateway), &config);
//!
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use lessonforge_remote::{Credential, RemotePlatform};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::context::RequestContext;
use crate::error::ForgeError;
use crate::model::{
    Course, CourseId, CourseOutline, CoursePatch, EntityRef, Lesson, LessonId, LessonPatch,
    MoveRequest, NewCourse, NewLesson, NewSection, NewStep, Section, SectionId, SectionPatch, Step,
    StepId, StepPatch,
};
use crate::publish::{LinkedEntity, RetryPolicy, SyncOrchestrator, TreeReport};
use crate::service::{AuthoringService, Outcome};
use crate::store::{HierarchyStore, Removed};
use crate::Config;

// ============================================================================
// Response Types
// ============================================================================

/// Response body for the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"`.
    pub status: String,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
    /// Whether resending the same request may succeed.
    pub retryable: bool,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Authoring operations.
    pub service: AuthoringService,
    /// Credential used when a request sends no token header.
    pub fallback_credential: Option<Credential>,
    /// Cancelled on shutdown; every publish runs under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Creates a new `AppState` around an existing service.
    #[must_use]
    pub fn new(service: AuthoringService, fallback_credential: Option<Credential>) -> Self {
        Self {
            service,
            fallback_credential,
            shutdown: CancellationToken::new(),
        }
    }

    /// Wires store, platform and configuration together.
    #[must_use]
    pub fn build(
        store: Arc<HierarchyStore>,
        platform: Arc<dyn RemotePlatform>,
        config: &Config,
    ) -> Self {
        let sync = SyncOrchestrator::new(store, platform, RetryPolicy::from(&config.sync));
        Self::new(
            AuthoringService::new(Arc::new(sync)),
            config.remote.credential(),
        )
    }

    fn cancel_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Maps an error to the HTTP status returned for it.
#[must_use]
pub const fn status_for(err: &ForgeError) -> StatusCode {
    match err {
        ForgeError::NotFound { .. } => StatusCode::NOT_FOUND,
        ForgeError::PositionConflict { .. }
        | ForgeError::Busy { .. }
        | ForgeError::RemoteIdConflict { .. }
        | ForgeError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        ForgeError::DependencyNotReady { .. } => StatusCode::PRECONDITION_FAILED,
        ForgeError::Validation { .. }
        | ForgeError::InvalidStep { .. }
        | ForgeError::PositionOutOfRange { .. }
        | ForgeError::RemoteValidationFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ForgeError::MissingCredential => StatusCode::UNAUTHORIZED,
        ForgeError::RemoteTransportFailure { .. } | ForgeError::RemoteProtocol { .. } => {
            StatusCode::BAD_GATEWAY
        }
        ForgeError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ForgeError::UnknownStepVariant { .. }
        | ForgeError::ConfigParseError { .. }
        | ForgeError::ConfigValidationError { .. }
        | ForgeError::StateFileCorrupted { .. }
        | ForgeError::Io(_)
        | ForgeError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Internal error type for API handlers.
#[derive(Debug)]
struct ApiError(ForgeError);

impl From<ForgeError> for ApiError {
    fn from(err: ForgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(status = status.as_u16(), error = %self.0, "Request failed");
        }

        let body = Json(ErrorResponse {
            error: self.0.to_string(),
            retryable: self.0.is_retryable_by_caller(),
        });
        (status, body).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;
type Created<T> = (StatusCode, Json<Outcome<T>>);

fn created<T>(outcome: Outcome<T>) -> Created<T> {
    (StatusCode::CREATED, Json(outcome))
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// # Returns
///
/// An axum `Router` configured with:
/// - All API routes under `/api`
/// - CORS middleware for development
/// - Tracing middleware for request logging
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handle_health))
        // Courses
        .route("/courses", get(list_courses).post(create_course))
        .route(
            "/courses/:id",
            get(get_course).patch(update_course).delete(delete_course),
        )
        .route("/courses/:id/outline", get(course_outline))
        .route("/courses/:id/sections", get(list_sections).post(create_section))
        .route("/courses/:id/publish", post(publish_course))
        .route("/courses/:id/publish-tree", post(publish_course_tree))
        // Sections
        .route(
            "/sections/:id",
            get(get_section).patch(update_section).delete(delete_section),
        )
        .route("/sections/:id/move", post(move_section))
        .route("/sections/:id/lessons", get(list_lessons).post(create_lesson))
        .route("/sections/:id/publish", post(publish_section))
        // Lessons
        .route(
            "/lessons/:id",
            get(get_lesson).patch(update_lesson).delete(delete_lesson),
        )
        .route("/lessons/:id/move", post(move_lesson))
        .route("/lessons/:id/steps", get(list_steps).post(create_step))
        .route("/lessons/:id/publish", post(publish_lesson))
        // Steps
        .route(
            "/steps/:id",
            get(get_step).patch(update_step).delete(delete_step),
        )
        .route("/steps/:id/move", post(move_step))
        .route("/steps/:id/refresh", post(refresh_step))
        .route("/steps/:id/publish", post(publish_step));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /api/health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

// ----------------------------------------------------------------------------
// Courses
// ----------------------------------------------------------------------------

async fn list_courses(State(state): State<Arc<AppState>>) -> Json<Vec<Course>> {
    Json(state.service.store().list_courses().await)
}

/// Handler for `POST /api/courses`.
async fn create_course(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Json(request): Json<NewCourse>,
) -> ApiResult<Created<Course>> {
    request.validate()?;
    let outcome = state
        .service
        .create_course(&ctx, &request, &state.cancel_token())
        .await?;
    info!(course = %outcome.value.id, owner = %ctx.user_id, "Course created");
    Ok(created(outcome))
}

async fn get_course(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourseId>,
) -> ApiResult<Json<Course>> {
    Ok(Json(state.service.store().get_course(id).await?))
}

async fn update_course(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<CourseId>,
    Json(patch): Json<CoursePatch>,
) -> ApiResult<Json<Outcome<Course>>> {
    patch.validate()?;
    let outcome = state
        .service
        .update_course(&ctx, id, &patch, &state.cancel_token())
        .await?;
    Ok(Json(outcome))
}

/// Handler for `DELETE /api/courses/:id`.
///
/// Removes the whole tree locally, then best-effort remotely.
async fn delete_course(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<CourseId>,
) -> ApiResult<Json<Outcome<Removed>>> {
    let outcome = state
        .service
        .delete(&ctx, id.into(), &state.cancel_token())
        .await?;
    info!(course = %id, removed = outcome.value.len(), "Course deleted");
    Ok(Json(outcome))
}

async fn course_outline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourseId>,
) -> ApiResult<Json<CourseOutline>> {
    Ok(Json(state.service.store().outline(id).await?))
}

async fn publish_course(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<CourseId>,
) -> ApiResult<Json<LinkedEntity>> {
    publish(&state, &ctx, id.into()).await
}

/// Handler for `POST /api/courses/:id/publish-tree`.
async fn publish_course_tree(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<CourseId>,
) -> ApiResult<Json<TreeReport>> {
    let report = state
        .service
        .sync()
        .publish_course_tree(&ctx, id, &state.cancel_token())
        .await?;
    Ok(Json(report))
}

// ----------------------------------------------------------------------------
// Sections
// ----------------------------------------------------------------------------

async fn list_sections(
    State(state): State<Arc<AppState>>,
    Path(id): Path<CourseId>,
) -> ApiResult<Json<Vec<Section>>> {
    Ok(Json(state.service.store().list_sections(id).await?))
}

async fn create_section(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(course): Path<CourseId>,
    Json(request): Json<NewSection>,
) -> ApiResult<Created<Section>> {
    request.validate()?;
    let outcome = state
        .service
        .create_section(&ctx, course, &request, &state.cancel_token())
        .await?;
    info!(section = %outcome.value.id, %course, position = outcome.value.position(), "Section created");
    Ok(created(outcome))
}

async fn get_section(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SectionId>,
) -> ApiResult<Json<Section>> {
    Ok(Json(state.service.store().get_section(id).await?))
}

async fn update_section(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<SectionId>,
    Json(patch): Json<SectionPatch>,
) -> ApiResult<Json<Outcome<Section>>> {
    patch.validate()?;
    let outcome = state
        .service
        .update_section(&ctx, id, &patch, &state.cancel_token())
        .await?;
    Ok(Json(outcome))
}

async fn move_section(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<SectionId>,
    Json(request): Json<MoveRequest>,
) -> ApiResult<Json<Outcome<Section>>> {
    let outcome = state
        .service
        .move_section(&ctx, id, request.position, &state.cancel_token())
        .await?;
    Ok(Json(outcome))
}

async fn delete_section(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<SectionId>,
) -> ApiResult<Json<Outcome<Removed>>> {
    let outcome = state
        .service
        .delete(&ctx, id.into(), &state.cancel_token())
        .await?;
    info!(section = %id, removed = outcome.value.len(), "Section deleted");
    Ok(Json(outcome))
}

async fn publish_section(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<SectionId>,
) -> ApiResult<Json<LinkedEntity>> {
    publish(&state, &ctx, id.into()).await
}

// ----------------------------------------------------------------------------
// Lessons
// ----------------------------------------------------------------------------

async fn list_lessons(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SectionId>,
) -> ApiResult<Json<Vec<Lesson>>> {
    Ok(Json(state.service.store().list_lessons(id).await?))
}

async fn create_lesson(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(section): Path<SectionId>,
    Json(request): Json<NewLesson>,
) -> ApiResult<Created<Lesson>> {
    request.validate()?;
    let outcome = state
        .service
        .create_lesson(&ctx, section, &request, &state.cancel_token())
        .await?;
    info!(lesson = %outcome.value.id, %section, position = outcome.value.position(), "Lesson created");
    Ok(created(outcome))
}

async fn get_lesson(
    State(state): State<Arc<AppState>>,
    Path(id): Path<LessonId>,
) -> ApiResult<Json<Lesson>> {
    Ok(Json(state.service.store().get_lesson(id).await?))
}

async fn update_lesson(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<LessonId>,
    Json(patch): Json<LessonPatch>,
) -> ApiResult<Json<Outcome<Lesson>>> {
    patch.validate()?;
    let outcome = state
        .service
        .update_lesson(&ctx, id, &patch, &state.cancel_token())
        .await?;
    Ok(Json(outcome))
}

async fn move_lesson(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<LessonId>,
    Json(request): Json<MoveRequest>,
) -> ApiResult<Json<Outcome<Lesson>>> {
    let outcome = state
        .service
        .move_lesson(&ctx, id, request.position, &state.cancel_token())
        .await?;
    Ok(Json(outcome))
}

async fn delete_lesson(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<LessonId>,
) -> ApiResult<Json<Outcome<Removed>>> {
    let outcome = state
        .service
        .delete(&ctx, id.into(), &state.cancel_token())
        .await?;
    info!(lesson = %id, removed = outcome.value.len(), "Lesson deleted");
    Ok(Json(outcome))
}

async fn publish_lesson(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<LessonId>,
) -> ApiResult<Json<LinkedEntity>> {
    publish(&state, &ctx, id.into()).await
}

// ----------------------------------------------------------------------------
// Steps
// ----------------------------------------------------------------------------

async fn list_steps(
    State(state): State<Arc<AppState>>,
    Path(id): Path<LessonId>,
) -> ApiResult<Json<Vec<Step>>> {
    Ok(Json(state.service.store().list_steps(id).await?))
}

async fn create_step(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(lesson): Path<LessonId>,
    Json(request): Json<NewStep>,
) -> ApiResult<Created<Step>> {
    request.validate()?;
    let outcome = state
        .service
        .create_step(&ctx, lesson, &request, &state.cancel_token())
        .await?;
    info!(
        step = %outcome.value.id,
        %lesson,
        kind = %outcome.value.variant.kind(),
        position = outcome.value.position(),
        "Step created"
    );
    Ok(created(outcome))
}

async fn get_step(
    State(state): State<Arc<AppState>>,
    Path(id): Path<StepId>,
) -> ApiResult<Json<Step>> {
    Ok(Json(state.service.store().get_step(id).await?))
}

async fn update_step(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<StepId>,
    Json(patch): Json<StepPatch>,
) -> ApiResult<Json<Outcome<Step>>> {
    patch.validate()?;
    let outcome = state
        .service
        .update_step(&ctx, id, &patch, &state.cancel_token())
        .await?;
    Ok(Json(outcome))
}

async fn move_step(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<StepId>,
    Json(request): Json<MoveRequest>,
) -> ApiResult<Json<Outcome<Step>>> {
    let outcome = state
        .service
        .move_step(&ctx, id, request.position, &state.cancel_token())
        .await?;
    Ok(Json(outcome))
}

async fn delete_step(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<StepId>,
) -> ApiResult<Json<Outcome<Removed>>> {
    let outcome = state
        .service
        .delete(&ctx, id.into(), &state.cancel_token())
        .await?;
    Ok(Json(outcome))
}

/// Handler for `POST /api/steps/:id/refresh`.
///
/// Replaces the local statement and payload with the remote block.
async fn refresh_step(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<StepId>,
) -> ApiResult<Json<Step>> {
    let step = state
        .service
        .sync()
        .refresh_step(&ctx, id, &state.cancel_token())
        .await?;
    Ok(Json(step))
}

async fn publish_step(
    State(state): State<Arc<AppState>>,
    ctx: RequestContext,
    Path(id): Path<StepId>,
) -> ApiResult<Json<LinkedEntity>> {
    publish(&state, &ctx, id.into()).await
}

async fn publish(
    state: &AppState,
    ctx: &RequestContext,
    entity: EntityRef,
) -> ApiResult<Json<LinkedEntity>> {
    let remote_id = state
        .service
        .sync()
        .publish(ctx, entity, &state.cancel_token())
        .await?;
    info!(%entity, %remote_id, "Publish request finished");
    Ok(Json(LinkedEntity { entity, remote_id }))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::{
        body::Body,
        http::{Method, Request},
    };
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use super::*;
    use crate::context::{TOKEN_HEADER, USER_HEADER};
    use crate::testing::{fast_retry, FakePlatform};

    fn test_router(platform: &Arc<FakePlatform>) -> Router {
        let sync = SyncOrchestrator::new(
            Arc::new(HierarchyStore::new()),
            Arc::clone(platform) as Arc<dyn RemotePlatform>,
            fast_retry(),
        );
        create_router(AppState::new(AuthoringService::new(Arc::new(sync)), None))
    }

    async fn send(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_HEADER, "alice")
            .header(TOKEN_HEADER, "secret");
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(router: &Router, uri: &str, body: Value) -> String {
        let (status, value) = send(router, Method::POST, uri, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{value}");
        value["value"]["id"].as_str().unwrap().to_string()
    }

    // ------------------------------------------------------------------------
    // Status mapping
    // ------------------------------------------------------------------------

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ForgeError::busy("course x")),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&ForgeError::dependency_not_ready("a", "b")),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            status_for(&ForgeError::RemoteValidationFailure {
                status: 400,
                detail: "x".into()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&ForgeError::RemoteTransportFailure {
                message: "x".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&ForgeError::cancelled("step y")),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&ForgeError::UnknownStepVariant { detail: "x".into() }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    // ------------------------------------------------------------------------
    // Endpoint tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_health() {
        let router = test_router(&FakePlatform::new());
        let (status, body) = send(&router, Method::GET, "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_course_crud() {
        let router = test_router(&FakePlatform::new());
        let id = create(&router, "/api/courses", json!({"title": "Rust"})).await;

        let (status, body) = send(&router, Method::GET, &format!("/api/courses/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["owner"], "alice");
        assert_eq!(body["sync"]["status"], "local_only");

        let (status, body) = send(
            &router,
            Method::PATCH,
            &format!("/api/courses/{id}"),
            Some(json!({"description": "Systems programming"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"]["description"], "Systems programming");
        assert_eq!(body["warnings"], json!([]));

        let (status, _) = send(&router, Method::DELETE, &format!("/api/courses/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&router, Method::GET, &format!("/api/courses/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("course not found"));
    }

    #[tokio::test]
    async fn test_blank_title_is_rejected() {
        let router = test_router(&FakePlatform::new());
        let (status, body) =
            send(&router, Method::POST, "/api/courses", Some(json!({"title": " "}))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn test_section_ordering_over_http() {
        let router = test_router(&FakePlatform::new());
        let course = create(&router, "/api/courses", json!({"title": "Rust"})).await;
        let sections = format!("/api/courses/{course}/sections");

        create(&router, &sections, json!({"title": "A"})).await;
        create(&router, &sections, json!({"title": "B"})).await;
        let x = create(&router, &sections, json!({"title": "X", "position": 2})).await;

        let (_, body) = send(&router, Method::GET, &sections, None).await;
        let order: Vec<(&str, u64)> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|s| (s["title"].as_str().unwrap(), s["position"].as_u64().unwrap()))
            .collect();
        assert_eq!(order, vec![("A", 1), ("X", 2), ("B", 3)]);

        let (status, body) = send(
            &router,
            Method::POST,
            &format!("/api/sections/{x}/move"),
            Some(json!({"position": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["value"]["position"], 3);

        send(&router, Method::DELETE, &format!("/api/sections/{x}"), None).await;
        let (_, body) = send(&router, Method::GET, &sections, None).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
        assert_eq!(body[1]["title"], "B");
        assert_eq!(body[1]["position"], 2);
    }

    #[tokio::test]
    async fn test_unknown_parent_is_404() {
        let router = test_router(&FakePlatform::new());
        let uri = format!("/api/sections/{}/lessons", SectionId::new());
        let (status, _) = send(&router, Method::POST, &uri, Some(json!({"title": "L"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_publish_order_is_enforced() {
        let platform = FakePlatform::new();
        let router = test_router(&platform);
        let course = create(&router, "/api/courses", json!({"title": "Rust"})).await;
        let section = create(
            &router,
            &format!("/api/courses/{course}/sections"),
            json!({"title": "Basics"}),
        )
        .await;

        let (status, body) = send(
            &router,
            Method::POST,
            &format!("/api/sections/{section}/publish"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert!(body["error"].as_str().unwrap().contains("not published yet"));
        assert!(platform.calls().is_empty());

        let (status, body) = send(
            &router,
            Method::POST,
            &format!("/api/courses/{course}/publish"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entity"]["kind"], "course");
        assert_eq!(body["remoteId"], 101);
    }

    #[tokio::test]
    async fn test_publish_without_token() {
        let router = test_router(&FakePlatform::new());
        let course = create(&router, "/api/courses", json!({"title": "Rust"})).await;

        let request = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/courses/{course}/publish"))
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_with_publish_and_tree() {
        let platform = FakePlatform::new();
        let router = test_router(&platform);
        let course = create(
            &router,
            "/api/courses",
            json!({"title": "Rust", "publish": true}),
        )
        .await;
        let section = create(
            &router,
            &format!("/api/courses/{course}/sections"),
            json!({"title": "Basics"}),
        )
        .await;
        let lesson = create(
            &router,
            &format!("/api/sections/{section}/lessons"),
            json!({"title": "Ownership"}),
        )
        .await;
        let (status, body) = send(
            &router,
            Method::POST,
            &format!("/api/lessons/{lesson}/steps"),
            Some(json!({
                "statement": "<p>Pick</p>",
                "variant": {"kind": "choice", "payload": {"options": [{"text": "a", "isCorrect": true}]}},
                "publish": true
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["value"]["sync"]["status"], "local_only");
        assert_eq!(body["warnings"].as_array().unwrap().len(), 1);

        let (status, report) = send(
            &router,
            Method::POST,
            &format!("/api/courses/{course}/publish-tree"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["linked"].as_array().unwrap().len(), 4);
        assert_eq!(report["failed"], json!([]));
        assert_eq!(platform.count("create_course"), 1);

        let (_, outline) = send(
            &router,
            Method::GET,
            &format!("/api/courses/{course}/outline"),
            None,
        )
        .await;
        let step = &outline["sections"][0]["lessons"][0]["steps"][0];
        assert_eq!(step["sync"]["status"], "remote_linked");
        assert_eq!(step["variant"]["kind"], "choice");
    }

    #[tokio::test]
    async fn test_refresh_unpublished_step() {
        let router = test_router(&FakePlatform::new());
        let course = create(&router, "/api/courses", json!({"title": "Rust"})).await;
        let section = create(
            &router,
            &format!("/api/courses/{course}/sections"),
            json!({"title": "S"}),
        )
        .await;
        let lesson = create(
            &router,
            &format!("/api/sections/{section}/lessons"),
            json!({"title": "L"}),
        )
        .await;
        let step = create(
            &router,
            &format!("/api/lessons/{lesson}/steps"),
            json!({"statement": "hi", "variant": {"kind": "text"}}),
        )
        .await;

        let (status, _) = send(
            &router,
            Method::POST,
            &format!("/api/steps/{step}/refresh"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
