//! LessonForge remote platform gateway
//!
//! The remote course-hosting platform models the same hierarchy as the local
//! store, with one extra level: a *unit* binds a lesson into a section at a
//! position. This crate exposes that API as the [`RemotePlatform`] trait and
//! implements it over HTTP in [`HttpGateway`].
//!
//! Every call takes the caller's [`Credential`] explicitly; the gateway holds
//! no per-user state.

mod gateway;

pub use gateway::{GatewayConfig, HttpGateway};

use async_trait::async_trait;
use lessonforge_codec::RemoteBlock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors returned by remote platform calls.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The request never produced an HTTP response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The request exceeded its deadline.
    #[error("remote call timed out")]
    Timeout,

    /// The platform answered with a 5xx status.
    #[error("remote server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// The platform rejected the request with a 4xx status.
    #[error("remote rejected request ({status}): {detail}")]
    Validation {
        /// HTTP status code.
        status: u16,
        /// Response body describing the problem.
        detail: String,
    },

    /// The response could not be understood.
    #[error("invalid remote response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Returns `true` if repeating the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::Server { .. })
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Result alias for remote calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier assigned by the remote platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub u64);

impl RemoteId {
    /// Returns the raw numeric id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bearer token for the remote platform. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wraps a raw token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for use in an `Authorization` header.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

// ============================================================================
// Request and response shapes
// ============================================================================

/// Fields sent when creating or updating a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseFields {
    /// Course title.
    pub title: String,
    /// Course description.
    pub description: String,
}

/// Fields sent when creating or updating a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionFields {
    /// Remote id of the owning course.
    pub course: RemoteId,
    /// Section title.
    pub title: String,
    /// Section description.
    pub description: String,
    /// 1-based position within the course.
    pub position: u32,
}

/// Fields sent when creating or updating a lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonFields {
    /// Lesson title.
    pub title: String,
}

/// Fields sent when creating or updating a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFields {
    /// Remote id of the section.
    pub section: RemoteId,
    /// Remote id of the lesson.
    pub lesson: RemoteId,
    /// 1-based position within the section.
    pub position: u32,
}

/// Fields sent when creating or updating a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFields {
    /// Remote id of the lesson.
    pub lesson: RemoteId,
    /// 1-based position within the lesson.
    pub position: u32,
    /// Encoded step block.
    pub block: RemoteBlock,
}

/// A section as listed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSection {
    /// Section id.
    pub id: RemoteId,
    /// Owning course id.
    pub course: RemoteId,
    /// Section title.
    #[serde(default)]
    pub title: String,
    /// Position within the course.
    #[serde(default)]
    pub position: u32,
}

/// A unit as listed by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUnit {
    /// Unit id.
    pub id: RemoteId,
    /// Section the unit belongs to.
    pub section: RemoteId,
    /// Lesson the unit binds.
    pub lesson: RemoteId,
    /// Position within the section.
    #[serde(default)]
    pub position: u32,
}

/// A step as fetched from the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStep {
    /// Step id.
    pub id: RemoteId,
    /// Lesson the step belongs to.
    pub lesson: RemoteId,
    /// Position within the lesson.
    #[serde(default)]
    pub position: u32,
    /// Step block.
    #[serde(default)]
    pub block: RemoteBlock,
}

// ============================================================================
// Platform trait
// ============================================================================

/// Operations offered by the remote platform.
///
/// Implementations perform exactly one HTTP exchange per call; retries and
/// deadlines are the caller's concern.
#[async_trait]
pub trait RemotePlatform: Send + Sync {
    /// Creates a course.
    async fn create_course(&self, cred: &Credential, fields: &CourseFields)
        -> RemoteResult<RemoteId>;
    /// Updates a course.
    async fn update_course(
        &self,
        cred: &Credential,
        id: RemoteId,
        fields: &CourseFields,
    ) -> RemoteResult<()>;
    /// Deletes a course.
    async fn delete_course(&self, cred: &Credential, id: RemoteId) -> RemoteResult<()>;

    /// Creates a section.
    async fn create_section(
        &self,
        cred: &Credential,
        fields: &SectionFields,
    ) -> RemoteResult<RemoteId>;
    /// Updates a section.
    async fn update_section(
        &self,
        cred: &Credential,
        id: RemoteId,
        fields: &SectionFields,
    ) -> RemoteResult<()>;
    /// Deletes a section.
    async fn delete_section(&self, cred: &Credential, id: RemoteId) -> RemoteResult<()>;
    /// Lists the sections of a course. A missing list means none.
    async fn list_sections(
        &self,
        cred: &Credential,
        course: RemoteId,
    ) -> RemoteResult<Vec<RemoteSection>>;

    /// Creates a lesson.
    async fn create_lesson(&self, cred: &Credential, fields: &LessonFields)
        -> RemoteResult<RemoteId>;
    /// Updates a lesson.
    async fn update_lesson(
        &self,
        cred: &Credential,
        id: RemoteId,
        fields: &LessonFields,
    ) -> RemoteResult<()>;
    /// Deletes a lesson.
    async fn delete_lesson(&self, cred: &Credential, id: RemoteId) -> RemoteResult<()>;

    /// Creates a unit binding a lesson into a section.
    async fn create_unit(&self, cred: &Credential, fields: &UnitFields) -> RemoteResult<RemoteId>;
    /// Updates a unit.
    async fn update_unit(
        &self,
        cred: &Credential,
        id: RemoteId,
        fields: &UnitFields,
    ) -> RemoteResult<()>;
    /// Deletes a unit.
    async fn delete_unit(&self, cred: &Credential, id: RemoteId) -> RemoteResult<()>;
    /// Lists the units that bind a lesson. A missing list means none.
    async fn list_units(&self, cred: &Credential, lesson: RemoteId)
        -> RemoteResult<Vec<RemoteUnit>>;

    /// Creates a step.
    async fn create_step(&self, cred: &Credential, fields: &StepFields) -> RemoteResult<RemoteId>;
    /// Updates a step.
    async fn update_step(
        &self,
        cred: &Credential,
        id: RemoteId,
        fields: &StepFields,
    ) -> RemoteResult<()>;
    /// Deletes a step.
    async fn delete_step(&self, cred: &Credential, id: RemoteId) -> RemoteResult<()>;
    /// Fetches a step with its block.
    async fn get_step(&self, cred: &Credential, id: RemoteId) -> RemoteResult<RemoteStep>;
}
