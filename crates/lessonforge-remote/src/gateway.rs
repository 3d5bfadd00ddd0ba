//! HTTP implementation of [`RemotePlatform`].
//!
//! Requests wrap the entity in a singular key (`{"section": {...}}`) and
//! responses return a plural array (`{"sections": [{...}]}`), the way the
//! platform's REST API does.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::{
    CourseFields, Credential, LessonFields, RemoteError, RemoteId, RemotePlatform, RemoteResult,
    RemoteSection, RemoteStep, RemoteUnit, SectionFields, StepFields, UnitFields,
};

/// Connection settings for [`HttpGateway`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Platform root, e.g. `https://stepik.org`.
    pub base_url: String,
    /// Per-request timeout enforced by the HTTP client.
    pub timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://stepik.org".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Remote platform client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
}

impl HttpGateway {
    /// Creates a gateway.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] if the HTTP client cannot be built.
    pub fn new(config: GatewayConfig) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Returns the platform root this gateway talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ==================== Generic exchanges ====================

    async fn create<B: Serialize + Sync>(
        &self,
        cred: &Credential,
        path: &str,
        body: &B,
        key: &str,
    ) -> RemoteResult<RemoteId> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(cred.expose())
            .json(body)
            .send()
            .await?;
        let envelope = read_envelope(handle_response(response).await?).await?;

        let item = first_in(&envelope, key)?;
        let id = item
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| RemoteError::InvalidResponse(format!("{key}[0] has no numeric id")))?;

        debug!(path, id, "Remote entity created");
        Ok(RemoteId(id))
    }

    async fn update<B: Serialize + Sync>(
        &self,
        cred: &Credential,
        path: &str,
        body: &B,
    ) -> RemoteResult<()> {
        let response = self
            .client
            .put(self.url(path))
            .bearer_auth(cred.expose())
            .json(body)
            .send()
            .await?;
        handle_response(response).await?;
        Ok(())
    }

    async fn remove(&self, cred: &Credential, path: &str) -> RemoteResult<()> {
        let response = self
            .client
            .delete(self.url(path))
            .bearer_auth(cred.expose())
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(path, "Remote entity already gone");
            return Ok(());
        }
        handle_response(response).await?;
        Ok(())
    }

    async fn list<T: DeserializeOwned>(
        &self,
        cred: &Credential,
        path: &str,
        query: &[(&str, String)],
        key: &str,
    ) -> RemoteResult<Vec<T>> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(cred.expose())
            .query(query)
            .send()
            .await?;
        let envelope = read_envelope(handle_response(response).await?).await?;

        match envelope.get(key) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(items) => serde_json::from_value(items.clone())
                .map_err(|e| RemoteError::InvalidResponse(format!("malformed {key}: {e}"))),
        }
    }
}

/// Maps a non-success status to the matching [`RemoteError`].
async fn handle_response(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status.is_client_error() {
        warn!(status = status.as_u16(), "Remote platform rejected request");
        Err(RemoteError::Validation {
            status: status.as_u16(),
            detail: body,
        })
    } else if status.is_server_error() {
        Err(RemoteError::Server {
            status: status.as_u16(),
            message: body,
        })
    } else {
        Err(RemoteError::InvalidResponse(format!(
            "unexpected status {status}"
        )))
    }
}

async fn read_envelope(response: Response) -> RemoteResult<Value> {
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Err(RemoteError::InvalidResponse("empty response body".into()));
    }
    serde_json::from_str(&text)
        .map_err(|e| RemoteError::InvalidResponse(format!("response is not JSON: {e}")))
}

/// Returns the first element of the array stored under `key`.
fn first_in<'a>(envelope: &'a Value, key: &str) -> RemoteResult<&'a Value> {
    envelope
        .get(key)
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .ok_or_else(|| RemoteError::InvalidResponse(format!("response has no {key}")))
}

#[async_trait]
impl RemotePlatform for HttpGateway {
    #[instrument(skip(self, cred, fields), fields(title = %fields.title))]
    async fn create_course(
        &self,
        cred: &Credential,
        fields: &CourseFields,
    ) -> RemoteResult<RemoteId> {
        self.create(cred, "/api/courses", &json!({ "course": fields }), "courses")
            .await
    }

    #[instrument(skip(self, cred, fields))]
    async fn update_course(
        &self,
        cred: &Credential,
        id: RemoteId,
        fields: &CourseFields,
    ) -> RemoteResult<()> {
        self.update(cred, &format!("/api/courses/{id}"), &json!({ "course": fields }))
            .await
    }

    #[instrument(skip(self, cred))]
    async fn delete_course(&self, cred: &Credential, id: RemoteId) -> RemoteResult<()> {
        self.remove(cred, &format!("/api/courses/{id}")).await
    }

    #[instrument(skip(self, cred, fields), fields(course = %fields.course, position = fields.position))]
    async fn create_section(
        &self,
        cred: &Credential,
        fields: &SectionFields,
    ) -> RemoteResult<RemoteId> {
        self.create(cred, "/api/sections", &json!({ "section": fields }), "sections")
            .await
    }

    #[instrument(skip(self, cred, fields))]
    async fn update_section(
        &self,
        cred: &Credential,
        id: RemoteId,
        fields: &SectionFields,
    ) -> RemoteResult<()> {
        self.update(
            cred,
            &format!("/api/sections/{id}"),
            &json!({ "section": fields }),
        )
        .await
    }

    #[instrument(skip(self, cred))]
    async fn delete_section(&self, cred: &Credential, id: RemoteId) -> RemoteResult<()> {
        self.remove(cred, &format!("/api/sections/{id}")).await
    }

    #[instrument(skip(self, cred))]
    async fn list_sections(
        &self,
        cred: &Credential,
        course: RemoteId,
    ) -> RemoteResult<Vec<RemoteSection>> {
        self.list(
            cred,
            "/api/sections",
            &[("course", course.to_string())],
            "sections",
        )
        .await
    }

    #[instrument(skip(self, cred, fields), fields(title = %fields.title))]
    async fn create_lesson(
        &self,
        cred: &Credential,
        fields: &LessonFields,
    ) -> RemoteResult<RemoteId> {
        self.create(cred, "/api/lessons", &json!({ "lesson": fields }), "lessons")
            .await
    }

    #[instrument(skip(self, cred, fields))]
    async fn update_lesson(
        &self,
        cred: &Credential,
        id: RemoteId,
        fields: &LessonFields,
    ) -> RemoteResult<()> {
        self.update(cred, &format!("/api/lessons/{id}"), &json!({ "lesson": fields }))
            .await
    }

    #[instrument(skip(self, cred))]
    async fn delete_lesson(&self, cred: &Credential, id: RemoteId) -> RemoteResult<()> {
        self.remove(cred, &format!("/api/lessons/{id}")).await
    }

    #[instrument(skip(self, cred, fields), fields(section = %fields.section, lesson = %fields.lesson))]
    async fn create_unit(&self, cred: &Credential, fields: &UnitFields) -> RemoteResult<RemoteId> {
        self.create(cred, "/api/units", &json!({ "unit": fields }), "units")
            .await
    }

    #[instrument(skip(self, cred, fields))]
    async fn update_unit(
        &self,
        cred: &Credential,
        id: RemoteId,
        fields: &UnitFields,
    ) -> RemoteResult<()> {
        self.update(cred, &format!("/api/units/{id}"), &json!({ "unit": fields }))
            .await
    }

    #[instrument(skip(self, cred))]
    async fn delete_unit(&self, cred: &Credential, id: RemoteId) -> RemoteResult<()> {
        self.remove(cred, &format!("/api/units/{id}")).await
    }

    #[instrument(skip(self, cred))]
    async fn list_units(
        &self,
        cred: &Credential,
        lesson: RemoteId,
    ) -> RemoteResult<Vec<RemoteUnit>> {
        self.list(cred, "/api/units", &[("lesson", lesson.to_string())], "units")
            .await
    }

    #[instrument(skip(self, cred, fields), fields(lesson = %fields.lesson, position = fields.position))]
    async fn create_step(&self, cred: &Credential, fields: &StepFields) -> RemoteResult<RemoteId> {
        self.create(
            cred,
            "/api/step-sources",
            &json!({ "stepSource": fields }),
            "step-sources",
        )
        .await
    }

    #[instrument(skip(self, cred, fields))]
    async fn update_step(
        &self,
        cred: &Credential,
        id: RemoteId,
        fields: &StepFields,
    ) -> RemoteResult<()> {
        self.update(
            cred,
            &format!("/api/step-sources/{id}"),
            &json!({ "stepSource": fields }),
        )
        .await
    }

    #[instrument(skip(self, cred))]
    async fn delete_step(&self, cred: &Credential, id: RemoteId) -> RemoteResult<()> {
        self.remove(cred, &format!("/api/step-sources/{id}")).await
    }

    #[instrument(skip(self, cred))]
    async fn get_step(&self, cred: &Credential, id: RemoteId) -> RemoteResult<RemoteStep> {
        let response = self
            .client
            .get(self.url(&format!("/api/step-sources/{id}")))
            .bearer_auth(cred.expose())
            .send()
            .await?;
        let envelope = read_envelope(handle_response(response).await?).await?;

        let item = first_in(&envelope, "step-sources")?;
        serde_json::from_value(item.clone())
            .map_err(|e| RemoteError::InvalidResponse(format!("malformed step: {e}")))
    }
}
