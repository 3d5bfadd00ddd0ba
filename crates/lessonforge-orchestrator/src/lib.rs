//! LessonForge Orchestrator
//!
//! Keeps the Course, Section, Lesson and Step hierarchy with contiguous
//! sibling positions, publishes it to the remote learning platform in
//! dependency order, and serves both over HTTP.

pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod model;
pub mod position;
pub mod publish;
pub mod service;
pub mod store;
pub mod sync_state;

#[cfg(test)]
mod testing;

pub use api::{create_router, status_for, AppState, ErrorResponse, HealthResponse};
pub use config::{Config, RemoteConfig, SyncConfig, CONFIG_FILE_NAME, TOKEN_ENV_VAR};
pub use context::{RequestContext, ANONYMOUS, TOKEN_HEADER, USER_HEADER};
pub use error::{ForgeError, Result};
pub use model::{
    Course, CourseId, CourseOutline, CoursePatch, EntityKind, EntityRef, Lesson, LessonId,
    LessonOutline, LessonPatch, MoveRequest, NewCourse, NewLesson, NewSection, NewStep, Section,
    SectionId, SectionOutline, SectionPatch, Step, StepId, StepPatch,
};
pub use position::{PositionManager, ScopeKey, ScopeLevel};
pub use publish::{Claim, LinkedEntity, RetryPolicy, SyncOrchestrator, SyncWarning, TreeReport};
pub use service::{AuthoringService, Outcome};
pub use store::{HierarchyStore, Lineage, Placed, Removed};
pub use sync_state::{SyncState, SyncStatus};
