//! Course hierarchy records and request DTOs.
//!
//! Records are handed out as clones; the only way to change a stored record
//! is through [`HierarchyStore`](crate::HierarchyStore). A record's position
//! is readable through `position()` but writable only inside this crate.

use chrono::{DateTime, Utc};
use lessonforge_codec::StepVariant;
use lessonforge_remote::RemoteId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ForgeError, Result};
use crate::sync_state::SyncState;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generates a new time-ordered id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

entity_id!(
    /// Identifies a course.
    CourseId
);
entity_id!(
    /// Identifies a section.
    SectionId
);
entity_id!(
    /// Identifies a lesson.
    LessonId
);
entity_id!(
    /// Identifies a step.
    StepId
);

/// The four entity kinds of the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A course.
    Course,
    /// A section of a course.
    Section,
    /// A lesson of a section.
    Lesson,
    /// A step of a lesson.
    Step,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Course => write!(f, "course"),
            Self::Section => write!(f, "section"),
            Self::Lesson => write!(f, "lesson"),
            Self::Step => write!(f, "step"),
        }
    }
}

/// A typed reference to any entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntityRef {
    /// A course.
    Course(CourseId),
    /// A section.
    Section(SectionId),
    /// A lesson.
    Lesson(LessonId),
    /// A step.
    Step(StepId),
}

impl EntityRef {
    /// Returns the kind of the referenced entity.
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Course(_) => EntityKind::Course,
            Self::Section(_) => EntityKind::Section,
            Self::Lesson(_) => EntityKind::Lesson,
            Self::Step(_) => EntityKind::Step,
        }
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        match self {
            Self::Course(id) => id.0,
            Self::Section(id) => id.0,
            Self::Lesson(id) => id.0,
            Self::Step(id) => id.0,
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.uuid())
    }
}

impl From<CourseId> for EntityRef {
    fn from(id: CourseId) -> Self {
        Self::Course(id)
    }
}

impl From<SectionId> for EntityRef {
    fn from(id: SectionId) -> Self {
        Self::Section(id)
    }
}

impl From<LessonId> for EntityRef {
    fn from(id: LessonId) -> Self {
        Self::Lesson(id)
    }
}

impl From<StepId> for EntityRef {
    fn from(id: StepId) -> Self {
        Self::Step(id)
    }
}

// ============================================================================
// Records
// ============================================================================

/// A course, the root of the hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    /// Course id.
    pub id: CourseId,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// User who created the course.
    pub owner: String,
    /// Remote course id once published.
    pub remote_id: Option<RemoteId>,
    /// Publication state.
    pub sync: SyncState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last local change.
    pub updated_at: DateTime<Utc>,
}

/// A section of a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    /// Section id.
    pub id: SectionId,
    /// Owning course.
    pub course_id: CourseId,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    pub(crate) position: u32,
    /// Remote section id once published.
    pub remote_id: Option<RemoteId>,
    /// Publication state.
    pub sync: SyncState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last local change.
    pub updated_at: DateTime<Utc>,
}

/// A lesson of a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    /// Lesson id.
    pub id: LessonId,
    /// Owning section.
    pub section_id: SectionId,
    /// Title.
    pub title: String,
    pub(crate) position: u32,
    /// Remote lesson id once created.
    pub remote_id: Option<RemoteId>,
    /// Remote unit binding the lesson into its section.
    pub remote_unit_id: Option<RemoteId>,
    /// Publication state.
    pub sync: SyncState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last local change.
    pub updated_at: DateTime<Utc>,
}

/// A step of a lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Step id.
    pub id: StepId,
    /// Owning lesson.
    pub lesson_id: LessonId,
    pub(crate) position: u32,
    /// Statement HTML shown above the exercise.
    pub statement: String,
    /// Kind and payload.
    pub variant: StepVariant,
    /// Remote step id once published.
    pub remote_id: Option<RemoteId>,
    /// Publication state.
    pub sync: SyncState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last local change.
    pub updated_at: DateTime<Utc>,
}

macro_rules! positioned {
    ($($record:ident),*) => {
        $(
            impl $record {
                /// 1-based position among siblings.
                #[must_use]
                pub const fn position(&self) -> u32 {
                    self.position
                }
            }
        )*
    };
}

positioned!(Section, Lesson, Step);

// ============================================================================
// Requests
// ============================================================================

fn require_title(title: &str, kind: EntityKind) -> Result<()> {
    if title.trim().is_empty() {
        return Err(ForgeError::validation(
            format!("{kind} title must not be empty"),
            "Provide a non-empty \"title\"",
        ));
    }
    Ok(())
}

/// Request body to create a course.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCourse {
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Publish right after creating.
    #[serde(default)]
    pub publish: bool,
}

impl NewCourse {
    /// Checks the request before it reaches the store.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::Validation` if the title is blank.
    pub fn validate(&self) -> Result<()> {
        require_title(&self.title, EntityKind::Course)
    }
}

/// Request body to create a section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSection {
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Desired position; appended when absent.
    #[serde(default)]
    pub position: Option<u32>,
    /// Publish right after creating.
    #[serde(default)]
    pub publish: bool,
}

impl NewSection {
    /// Checks the request before it reaches the store.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::Validation` if the title is blank.
    pub fn validate(&self) -> Result<()> {
        require_title(&self.title, EntityKind::Section)
    }
}

/// Request body to create a lesson.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLesson {
    /// Title.
    pub title: String,
    /// Desired position; appended when absent.
    #[serde(default)]
    pub position: Option<u32>,
    /// Publish right after creating.
    #[serde(default)]
    pub publish: bool,
}

impl NewLesson {
    /// Checks the request before it reaches the store.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::Validation` if the title is blank.
    pub fn validate(&self) -> Result<()> {
        require_title(&self.title, EntityKind::Lesson)
    }
}

/// Request body to create a step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStep {
    /// Statement HTML.
    #[serde(default)]
    pub statement: String,
    /// Kind and payload.
    pub variant: StepVariant,
    /// Desired position; appended when absent.
    #[serde(default)]
    pub position: Option<u32>,
    /// Publish right after creating.
    #[serde(default)]
    pub publish: bool,
}

impl NewStep {
    /// Checks the request before it reaches the store.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::InvalidStep` if the payload is inconsistent.
    pub fn validate(&self) -> Result<()> {
        self.variant.validate()?;
        Ok(())
    }
}

/// Partial update of a course.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoursePatch {
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update of a section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionPatch {
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Partial update of a lesson.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonPatch {
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
}

/// Partial update of a step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPatch {
    /// New statement.
    #[serde(default)]
    pub statement: Option<String>,
    /// New kind and payload.
    #[serde(default)]
    pub variant: Option<StepVariant>,
}

macro_rules! titled_patch {
    ($patch:ident, $kind:expr) => {
        impl $patch {
            /// Checks the request before it reaches the store.
            ///
            /// # Errors
            ///
            /// Returns `ForgeError::Validation` if a new title is blank.
            pub fn validate(&self) -> Result<()> {
                match &self.title {
                    Some(title) => require_title(title, $kind),
                    None => Ok(()),
                }
            }
        }
    };
}

titled_patch!(CoursePatch, EntityKind::Course);
titled_patch!(SectionPatch, EntityKind::Section);
titled_patch!(LessonPatch, EntityKind::Lesson);

impl StepPatch {
    /// Checks the request before it reaches the store.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::InvalidStep` if a new payload is inconsistent.
    pub fn validate(&self) -> Result<()> {
        if let Some(variant) = &self.variant {
            variant.validate()?;
        }
        Ok(())
    }
}

/// Request body to move an entity among its siblings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    /// Target position; clamped to the sibling range.
    pub position: u32,
}

// ============================================================================
// Outline
// ============================================================================

/// A course with all of its descendants, each level ordered by position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseOutline {
    /// The course.
    pub course: Course,
    /// Its sections.
    pub sections: Vec<SectionOutline>,
}

/// A section with its lessons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionOutline {
    /// The section.
    pub section: Section,
    /// Its lessons.
    pub lessons: Vec<LessonOutline>,
}

/// A lesson with its steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonOutline {
    /// The lesson.
    pub lesson: Lesson,
    /// Its steps.
    pub steps: Vec<Step>,
}
