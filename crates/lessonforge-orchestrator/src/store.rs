//! In-memory course hierarchy with JSON snapshot persistence.
//!
//! All ordering goes through [`PositionManager`]. Locks are always taken
//! parent scope first, then child scopes, then the table lock, and the table
//! lock is never held across an `.await`.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use lessonforge_codec::StepVariant;
use lessonforge_remote::RemoteId;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{ForgeError, Result};
use crate::model::{
    Course, CourseId, CourseOutline, CoursePatch, EntityKind, EntityRef, Lesson, LessonId,
    LessonOutline, LessonPatch, NewCourse, NewLesson, NewSection, NewStep, Section, SectionId,
    SectionOutline, SectionPatch, Step, StepId, StepPatch,
};
use crate::position::{is_contiguous, PositionManager, Reassignment, ScopeKey, ScopeTxn, Slot};
use crate::sync_state::SyncState;

const SNAPSHOT_VERSION: u32 = 1;

// ============================================================================
// Sibling helpers
// ============================================================================

trait Sibling: Clone {
    type Id: Ord + Copy + Into<EntityRef>;

    fn key(id: Uuid) -> Self::Id;
    fn parent(&self) -> Uuid;
    fn slot(&self) -> Slot;
    fn place(&mut self, position: u32, at: DateTime<Utc>);
}

macro_rules! sibling {
    ($record:ident, $id:ident, $parent:ident) => {
        impl Sibling for $record {
            type Id = $id;

            fn key(id: Uuid) -> $id {
                $id(id)
            }

            fn parent(&self) -> Uuid {
                self.$parent.0
            }

            fn slot(&self) -> Slot {
                Slot {
                    id: self.id.0,
                    position: self.position,
                }
            }

            fn place(&mut self, position: u32, at: DateTime<Utc>) {
                self.position = position;
                self.updated_at = at;
            }
        }
    };
}

sibling!(Section, SectionId, course_id);
sibling!(Lesson, LessonId, section_id);
sibling!(Step, StepId, lesson_id);

fn slots_in<R: Sibling>(rows: &BTreeMap<R::Id, R>, parent: Uuid) -> Vec<Slot> {
    rows.values()
        .filter(|row| row.parent() == parent)
        .map(Sibling::slot)
        .collect()
}

fn ordered<R: Sibling>(rows: &BTreeMap<R::Id, R>, parent: Uuid) -> Vec<R> {
    let mut children: Vec<R> = rows
        .values()
        .filter(|row| row.parent() == parent)
        .cloned()
        .collect();
    children.sort_by_key(|row| row.slot().position);
    children
}

/// Applies `changes` and returns the siblings that actually moved.
fn reassign<R: Sibling>(
    rows: &mut BTreeMap<R::Id, R>,
    changes: &[Reassignment],
) -> Vec<EntityRef> {
    let now = Utc::now();
    let mut shifted = Vec::with_capacity(changes.len());
    for change in changes.iter().filter(|c| c.from != c.to) {
        if let Some(row) = rows.get_mut(&R::key(change.id)) {
            row.place(change.to, now);
            shifted.push(R::key(change.id).into());
        }
    }
    shifted
}

fn remove_at<R: Sibling>(
    rows: &mut BTreeMap<R::Id, R>,
    txn: &mut ScopeTxn,
    parent: Uuid,
    position: u32,
) -> Result<(Option<R>, Vec<EntityRef>)> {
    let slots = slots_in(rows, parent);
    let (removed, shifts) = txn.delete_at(&slots, position)?;
    let row = rows.remove(&R::key(removed));
    let shifted = reassign(rows, &shifts);
    Ok((row, shifted))
}

/// Removes every child of `parent`, last position first. Returned in position order.
fn drain<R: Sibling>(
    rows: &mut BTreeMap<R::Id, R>,
    txn: &mut ScopeTxn,
    parent: Uuid,
) -> Result<Vec<R>> {
    let mut removed = Vec::new();
    loop {
        let count = u32::try_from(slots_in(rows, parent).len()).unwrap_or(u32::MAX);
        if count == 0 {
            break;
        }
        match remove_at(rows, txn, parent, count)? {
            (Some(row), _) => removed.push(row),
            (None, _) => break,
        }
    }
    removed.reverse();
    Ok(removed)
}

// ============================================================================
// Tables
// ============================================================================

#[derive(Debug, Default, Clone)]
struct Tables {
    courses: BTreeMap<CourseId, Course>,
    sections: BTreeMap<SectionId, Section>,
    lessons: BTreeMap<LessonId, Lesson>,
    steps: BTreeMap<StepId, Step>,
}

impl Tables {
    fn course(&self, id: CourseId) -> Result<&Course> {
        self.courses
            .get(&id)
            .ok_or_else(|| ForgeError::not_found(EntityKind::Course, id))
    }

    fn section(&self, id: SectionId) -> Result<&Section> {
        self.sections
            .get(&id)
            .ok_or_else(|| ForgeError::not_found(EntityKind::Section, id))
    }

    fn lesson(&self, id: LessonId) -> Result<&Lesson> {
        self.lessons
            .get(&id)
            .ok_or_else(|| ForgeError::not_found(EntityKind::Lesson, id))
    }

    fn step(&self, id: StepId) -> Result<&Step> {
        self.steps
            .get(&id)
            .ok_or_else(|| ForgeError::not_found(EntityKind::Step, id))
    }

    fn link_of(&self, entity: EntityRef) -> Result<(SyncState, Option<RemoteId>)> {
        Ok(match entity {
            EntityRef::Course(id) => {
                let r = self.course(id)?;
                (r.sync.clone(), r.remote_id)
            }
            EntityRef::Section(id) => {
                let r = self.section(id)?;
                (r.sync.clone(), r.remote_id)
            }
            EntityRef::Lesson(id) => {
                let r = self.lesson(id)?;
                (r.sync.clone(), r.remote_id)
            }
            EntityRef::Step(id) => {
                let r = self.step(id)?;
                (r.sync.clone(), r.remote_id)
            }
        })
    }

    fn sync_mut(&mut self, entity: EntityRef) -> Result<&mut SyncState> {
        let missing = || ForgeError::not_found(entity.kind(), entity.uuid());
        match entity {
            EntityRef::Course(id) => self.courses.get_mut(&id).map(|r| &mut r.sync),
            EntityRef::Section(id) => self.sections.get_mut(&id).map(|r| &mut r.sync),
            EntityRef::Lesson(id) => self.lessons.get_mut(&id).map(|r| &mut r.sync),
            EntityRef::Step(id) => self.steps.get_mut(&id).map(|r| &mut r.sync),
        }
        .ok_or_else(missing)
    }

    fn remote_slot(&mut self, entity: EntityRef) -> Result<&mut Option<RemoteId>> {
        let missing = || ForgeError::not_found(entity.kind(), entity.uuid());
        match entity {
            EntityRef::Course(id) => self.courses.get_mut(&id).map(|r| &mut r.remote_id),
            EntityRef::Section(id) => self.sections.get_mut(&id).map(|r| &mut r.remote_id),
            EntityRef::Lesson(id) => self.lessons.get_mut(&id).map(|r| &mut r.remote_id),
            EntityRef::Step(id) => self.steps.get_mut(&id).map(|r| &mut r.remote_id),
        }
        .ok_or_else(missing)
    }

    fn lesson_ids_of(&self, section: SectionId) -> Vec<LessonId> {
        ordered(&self.lessons, section.0)
            .into_iter()
            .map(|l| l.id)
            .collect()
    }

    fn section_ids_of(&self, course: CourseId) -> Vec<SectionId> {
        ordered(&self.sections, course.0)
            .into_iter()
            .map(|s| s.id)
            .collect()
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            courses: self.courses.values().cloned().collect(),
            sections: self.sections.values().cloned().collect(),
            lessons: self.lessons.values().cloned().collect(),
            steps: self.steps.values().cloned().collect(),
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> std::result::Result<Self, String> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(format!("unsupported snapshot version {}", snapshot.version));
        }

        let mut tables = Self::default();
        tables.courses = snapshot.courses.into_iter().map(|c| (c.id, c)).collect();

        for section in snapshot.sections {
            if !tables.courses.contains_key(&section.course_id) {
                return Err(format!("section {} references missing course {}", section.id, section.course_id));
            }
            tables.sections.insert(section.id, section);
        }
        for lesson in snapshot.lessons {
            if !tables.sections.contains_key(&lesson.section_id) {
                return Err(format!("lesson {} references missing section {}", lesson.id, lesson.section_id));
            }
            tables.lessons.insert(lesson.id, lesson);
        }
        for step in snapshot.steps {
            if !tables.lessons.contains_key(&step.lesson_id) {
                return Err(format!("step {} references missing lesson {}", step.id, step.lesson_id));
            }
            tables.steps.insert(step.id, step);
        }

        for id in tables.courses.keys() {
            if !is_contiguous(&slots_in(&tables.sections, id.0)) {
                return Err(format!("sections of course {id} are not contiguous"));
            }
        }
        for id in tables.sections.keys() {
            if !is_contiguous(&slots_in(&tables.lessons, id.0)) {
                return Err(format!("lessons of section {id} are not contiguous"));
            }
        }
        for id in tables.lessons.keys() {
            if !is_contiguous(&slots_in(&tables.steps, id.0)) {
                return Err(format!("steps of lesson {id} are not contiguous"));
            }
        }

        Ok(tables)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    version: u32,
    saved_at: DateTime<Utc>,
    #[serde(default)]
    courses: Vec<Course>,
    #[serde(default)]
    sections: Vec<Section>,
    #[serde(default)]
    lessons: Vec<Lesson>,
    #[serde(default)]
    steps: Vec<Step>,
}

// ============================================================================
// Public result types
// ============================================================================

/// Everything a cascading delete removed, each list in position order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Removed {
    /// Removed courses (at most one).
    pub courses: Vec<Course>,
    /// Removed sections.
    pub sections: Vec<Section>,
    /// Removed lessons.
    pub lessons: Vec<Lesson>,
    /// Removed steps.
    pub steps: Vec<Step>,
    /// Surviving siblings of the deleted entity that moved up to close the gap.
    pub shifted: Vec<EntityRef>,
}

impl Removed {
    /// Total number of removed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.courses.len() + self.sections.len() + self.lessons.len() + self.steps.len()
    }

    /// Returns `true` if nothing was removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if any removed entity was linked to the remote platform.
    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.courses.iter().any(|c| c.remote_id.is_some())
            || self.sections.iter().any(|s| s.remote_id.is_some())
            || self
                .lessons
                .iter()
                .any(|l| l.remote_id.is_some() || l.remote_unit_id.is_some())
            || self.steps.iter().any(|s| s.remote_id.is_some())
    }
}

/// A created or moved record plus the siblings its new position displaced.
#[derive(Debug, Clone, PartialEq)]
pub struct Placed<T> {
    /// The record at its new position.
    pub record: T,
    /// Records whose position changed, in no particular order.
    pub shifted: Vec<EntityRef>,
}

/// The ancestors and descendants of an entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lineage {
    /// Parents up to the course, nearest first.
    pub ancestors: Vec<EntityRef>,
    /// Every entity below, in no particular order.
    pub descendants: Vec<EntityRef>,
}

// ============================================================================
// HierarchyStore
// ============================================================================

/// The local course hierarchy.
#[derive(Debug, Default)]
pub struct HierarchyStore {
    tables: RwLock<Tables>,
    positions: PositionManager,
}

impl HierarchyStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------------
    // Courses
    // ------------------------------------------------------------------------

    /// Creates a course owned by `owner`.
    pub async fn create_course(&self, owner: &str, request: &NewCourse) -> Result<Course> {
        request.validate()?;
        let now = Utc::now();
        let course = Course {
            id: CourseId::new(),
            title: request.title.clone(),
            description: request.description.clone(),
            owner: owner.to_string(),
            remote_id: None,
            sync: SyncState::new(),
            created_at: now,
            updated_at: now,
        };

        self.tables
            .write()
            .await
            .courses
            .insert(course.id, course.clone());
        info!(course = %course.id, owner, "Created course");
        Ok(course)
    }

    /// Returns a course.
    pub async fn get_course(&self, id: CourseId) -> Result<Course> {
        self.tables.read().await.course(id).cloned()
    }

    /// Returns all courses, oldest first.
    pub async fn list_courses(&self) -> Vec<Course> {
        let tables = self.tables.read().await;
        let mut courses: Vec<Course> = tables.courses.values().cloned().collect();
        courses.sort_by_key(|c| (c.created_at, c.id));
        courses
    }

    /// Updates the title or description of a course.
    pub async fn update_course(&self, id: CourseId, patch: &CoursePatch) -> Result<Course> {
        patch.validate()?;
        let mut tables = self.tables.write().await;
        let course = tables
            .courses
            .get_mut(&id)
            .ok_or_else(|| ForgeError::not_found(EntityKind::Course, id))?;
        if let Some(title) = &patch.title {
            course.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            course.description.clone_from(description);
        }
        course.updated_at = Utc::now();
        Ok(course.clone())
    }

    /// Deletes a course and everything below it.
    pub async fn delete_course(&self, id: CourseId) -> Result<Removed> {
        let mut sections_txn = self.positions.begin(ScopeKey::sections_of(id)).await;

        let section_ids = {
            let tables = self.tables.read().await;
            tables.course(id)?;
            tables.section_ids_of(id)
        };
        let mut lesson_txns = Vec::with_capacity(section_ids.len());
        for section in &section_ids {
            lesson_txns.push((*section, self.positions.begin(ScopeKey::lessons_of(*section)).await));
        }
        let lesson_ids: Vec<LessonId> = {
            let tables = self.tables.read().await;
            section_ids
                .iter()
                .flat_map(|s| tables.lesson_ids_of(*s))
                .collect()
        };
        let mut step_txns = Vec::with_capacity(lesson_ids.len());
        for lesson in &lesson_ids {
            step_txns.push((*lesson, self.positions.begin(ScopeKey::steps_of(*lesson)).await));
        }

        let mut tables = self.tables.write().await;
        let course = tables.course(id)?.clone();
        sections_txn.check(&slots_in(&tables.sections, id.0))?;
        check_scopes(&tables, &lesson_txns, &step_txns)?;

        let mut removed = Removed::default();
        for (lesson, txn) in &mut step_txns {
            removed.steps.extend(drain(&mut tables.steps, txn, lesson.0)?);
        }
        for (section, txn) in &mut lesson_txns {
            removed.lessons.extend(drain(&mut tables.lessons, txn, section.0)?);
        }
        removed.sections = drain(&mut tables.sections, &mut sections_txn, id.0)?;
        tables.courses.remove(&id);
        removed.courses.push(course);
        drop(tables);

        self.positions.forget(ScopeKey::sections_of(id));
        self.forget_children(&section_ids, &lesson_ids);
        info!(course = %id, removed = removed.len(), "Deleted course");
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Sections
    // ------------------------------------------------------------------------

    /// Creates a section at the requested position, or last.
    pub async fn create_section(&self, course_id: CourseId, request: &NewSection) -> Result<Section> {
        Ok(self.insert_section(course_id, request).await?.record)
    }

    /// Creates a section and reports the siblings it pushed down.
    pub async fn insert_section(
        &self,
        course_id: CourseId,
        request: &NewSection,
    ) -> Result<Placed<Section>> {
        request.validate()?;
        let mut txn = self.positions.begin(ScopeKey::sections_of(course_id)).await;
        let mut tables = self.tables.write().await;
        tables.course(course_id)?;

        let slots = slots_in(&tables.sections, course_id.0);
        let (position, shifts) = txn.insert_at(&slots, request.position.unwrap_or(u32::MAX))?;
        let shifted = reassign(&mut tables.sections, &shifts);

        let now = Utc::now();
        let section = Section {
            id: SectionId::new(),
            course_id,
            title: request.title.clone(),
            description: request.description.clone(),
            position,
            remote_id: None,
            sync: SyncState::new(),
            created_at: now,
            updated_at: now,
        };
        tables.sections.insert(section.id, section.clone());
        debug!(section = %section.id, course = %course_id, position, "Created section");
        Ok(Placed {
            record: section,
            shifted,
        })
    }

    /// Returns a section.
    pub async fn get_section(&self, id: SectionId) -> Result<Section> {
        self.tables.read().await.section(id).cloned()
    }

    /// Returns the sections of a course by position.
    pub async fn list_sections(&self, course_id: CourseId) -> Result<Vec<Section>> {
        let tables = self.tables.read().await;
        tables.course(course_id)?;
        Ok(ordered(&tables.sections, course_id.0))
    }

    /// Updates the title or description of a section.
    pub async fn update_section(&self, id: SectionId, patch: &SectionPatch) -> Result<Section> {
        patch.validate()?;
        let mut tables = self.tables.write().await;
        let section = tables
            .sections
            .get_mut(&id)
            .ok_or_else(|| ForgeError::not_found(EntityKind::Section, id))?;
        if let Some(title) = &patch.title {
            section.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            section.description.clone_from(description);
        }
        section.updated_at = Utc::now();
        Ok(section.clone())
    }

    /// Moves a section within its course.
    pub async fn move_section(&self, id: SectionId, to: u32) -> Result<Section> {
        Ok(self.reorder_section(id, to).await?.record)
    }

    /// Moves a section and reports every sibling whose position changed, itself included.
    pub async fn reorder_section(&self, id: SectionId, to: u32) -> Result<Placed<Section>> {
        let course_id = self.get_section(id).await?.course_id;
        let mut txn = self.positions.begin(ScopeKey::sections_of(course_id)).await;
        let mut tables = self.tables.write().await;
        let from = tables.section(id)?.position;

        let slots = slots_in(&tables.sections, course_id.0);
        let (_, changes) = txn.move_to(&slots, from, to)?;
        let shifted = reassign(&mut tables.sections, &changes);
        Ok(Placed {
            record: tables.section(id)?.clone(),
            shifted,
        })
    }

    /// Deletes a section and everything below it, compacting its course.
    pub async fn delete_section(&self, id: SectionId) -> Result<Removed> {
        let course_id = self.get_section(id).await?.course_id;
        let mut sections_txn = self.positions.begin(ScopeKey::sections_of(course_id)).await;
        let mut lesson_txns = vec![(id, self.positions.begin(ScopeKey::lessons_of(id)).await)];

        let lesson_ids = self.tables.read().await.lesson_ids_of(id);
        let mut step_txns = Vec::with_capacity(lesson_ids.len());
        for lesson in &lesson_ids {
            step_txns.push((*lesson, self.positions.begin(ScopeKey::steps_of(*lesson)).await));
        }

        let mut tables = self.tables.write().await;
        let position = tables.section(id)?.position;
        sections_txn.check(&slots_in(&tables.sections, course_id.0))?;
        check_scopes(&tables, &lesson_txns, &step_txns)?;

        let mut removed = Removed::default();
        for (lesson, txn) in &mut step_txns {
            removed.steps.extend(drain(&mut tables.steps, txn, lesson.0)?);
        }
        for (section, txn) in &mut lesson_txns {
            removed.lessons.extend(drain(&mut tables.lessons, txn, section.0)?);
        }
        let (section, shifted) =
            remove_at(&mut tables.sections, &mut sections_txn, course_id.0, position)?;
        removed.sections.extend(section);
        removed.shifted = shifted;
        drop(tables);

        self.forget_children(&[id], &lesson_ids);
        info!(section = %id, removed = removed.len(), "Deleted section");
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Lessons
    // ------------------------------------------------------------------------

    /// Creates a lesson at the requested position, or last.
    pub async fn create_lesson(&self, section_id: SectionId, request: &NewLesson) -> Result<Lesson> {
        Ok(self.insert_lesson(section_id, request).await?.record)
    }

    /// Creates a lesson and reports the siblings it pushed down.
    pub async fn insert_lesson(
        &self,
        section_id: SectionId,
        request: &NewLesson,
    ) -> Result<Placed<Lesson>> {
        request.validate()?;
        let mut txn = self.positions.begin(ScopeKey::lessons_of(section_id)).await;
        let mut tables = self.tables.write().await;
        tables.section(section_id)?;

        let slots = slots_in(&tables.lessons, section_id.0);
        let (position, shifts) = txn.insert_at(&slots, request.position.unwrap_or(u32::MAX))?;
        let shifted = reassign(&mut tables.lessons, &shifts);

        let now = Utc::now();
        let lesson = Lesson {
            id: LessonId::new(),
            section_id,
            title: request.title.clone(),
            position,
            remote_id: None,
            remote_unit_id: None,
            sync: SyncState::new(),
            created_at: now,
            updated_at: now,
        };
        tables.lessons.insert(lesson.id, lesson.clone());
        debug!(lesson = %lesson.id, section = %section_id, position, "Created lesson");
        Ok(Placed {
            record: lesson,
            shifted,
        })
    }

    /// Returns a lesson.
    pub async fn get_lesson(&self, id: LessonId) -> Result<Lesson> {
        self.tables.read().await.lesson(id).cloned()
    }

    /// Returns the lessons of a section by position.
    pub async fn list_lessons(&self, section_id: SectionId) -> Result<Vec<Lesson>> {
        let tables = self.tables.read().await;
        tables.section(section_id)?;
        Ok(ordered(&tables.lessons, section_id.0))
    }

    /// Updates the title of a lesson.
    pub async fn update_lesson(&self, id: LessonId, patch: &LessonPatch) -> Result<Lesson> {
        patch.validate()?;
        let mut tables = self.tables.write().await;
        let lesson = tables
            .lessons
            .get_mut(&id)
            .ok_or_else(|| ForgeError::not_found(EntityKind::Lesson, id))?;
        if let Some(title) = &patch.title {
            lesson.title.clone_from(title);
        }
        lesson.updated_at = Utc::now();
        Ok(lesson.clone())
    }

    /// Moves a lesson within its section.
    pub async fn move_lesson(&self, id: LessonId, to: u32) -> Result<Lesson> {
        Ok(self.reorder_lesson(id, to).await?.record)
    }

    /// Moves a lesson and reports every sibling whose position changed, itself included.
    pub async fn reorder_lesson(&self, id: LessonId, to: u32) -> Result<Placed<Lesson>> {
        let section_id = self.get_lesson(id).await?.section_id;
        let mut txn = self.positions.begin(ScopeKey::lessons_of(section_id)).await;
        let mut tables = self.tables.write().await;
        let from = tables.lesson(id)?.position;

        let slots = slots_in(&tables.lessons, section_id.0);
        let (_, changes) = txn.move_to(&slots, from, to)?;
        let shifted = reassign(&mut tables.lessons, &changes);
        Ok(Placed {
            record: tables.lesson(id)?.clone(),
            shifted,
        })
    }

    /// Deletes a lesson and its steps, compacting its section.
    pub async fn delete_lesson(&self, id: LessonId) -> Result<Removed> {
        let section_id = self.get_lesson(id).await?.section_id;
        let mut lessons_txn = self.positions.begin(ScopeKey::lessons_of(section_id)).await;
        let mut steps_txn = self.positions.begin(ScopeKey::steps_of(id)).await;

        let mut tables = self.tables.write().await;
        let position = tables.lesson(id)?.position;
        steps_txn.check(&slots_in(&tables.steps, id.0))?;
        lessons_txn.check(&slots_in(&tables.lessons, section_id.0))?;

        let mut removed = Removed {
            steps: drain(&mut tables.steps, &mut steps_txn, id.0)?,
            ..Removed::default()
        };
        let (lesson, shifted) =
            remove_at(&mut tables.lessons, &mut lessons_txn, section_id.0, position)?;
        removed.lessons.extend(lesson);
        removed.shifted = shifted;
        drop(tables);

        self.positions.forget(ScopeKey::steps_of(id));
        info!(lesson = %id, removed = removed.len(), "Deleted lesson");
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------------

    /// Creates a step at the requested position, or last.
    pub async fn create_step(&self, lesson_id: LessonId, request: &NewStep) -> Result<Step> {
        Ok(self.insert_step(lesson_id, request).await?.record)
    }

    /// Creates a step and reports the siblings it pushed down.
    pub async fn insert_step(
        &self,
        lesson_id: LessonId,
        request: &NewStep,
    ) -> Result<Placed<Step>> {
        request.validate()?;
        let mut txn = self.positions.begin(ScopeKey::steps_of(lesson_id)).await;
        let mut tables = self.tables.write().await;
        tables.lesson(lesson_id)?;

        let slots = slots_in(&tables.steps, lesson_id.0);
        let (position, shifts) = txn.insert_at(&slots, request.position.unwrap_or(u32::MAX))?;
        let shifted = reassign(&mut tables.steps, &shifts);

        let now = Utc::now();
        let step = Step {
            id: StepId::new(),
            lesson_id,
            position,
            statement: request.statement.clone(),
            variant: request.variant.clone(),
            remote_id: None,
            sync: SyncState::new(),
            created_at: now,
            updated_at: now,
        };
        tables.steps.insert(step.id, step.clone());
        debug!(step = %step.id, lesson = %lesson_id, kind = %step.variant.kind(), position, "Created step");
        Ok(Placed {
            record: step,
            shifted,
        })
    }

    /// Returns a step.
    pub async fn get_step(&self, id: StepId) -> Result<Step> {
        self.tables.read().await.step(id).cloned()
    }

    /// Returns the steps of a lesson by position.
    pub async fn list_steps(&self, lesson_id: LessonId) -> Result<Vec<Step>> {
        let tables = self.tables.read().await;
        tables.lesson(lesson_id)?;
        Ok(ordered(&tables.steps, lesson_id.0))
    }

    /// Updates the statement or variant of a step.
    pub async fn update_step(&self, id: StepId, patch: &StepPatch) -> Result<Step> {
        patch.validate()?;
        let mut tables = self.tables.write().await;
        let step = tables
            .steps
            .get_mut(&id)
            .ok_or_else(|| ForgeError::not_found(EntityKind::Step, id))?;
        if let Some(statement) = &patch.statement {
            step.statement.clone_from(statement);
        }
        if let Some(variant) = &patch.variant {
            step.variant = variant.clone();
        }
        step.updated_at = Utc::now();
        Ok(step.clone())
    }

    /// Moves a step within its lesson.
    pub async fn move_step(&self, id: StepId, to: u32) -> Result<Step> {
        Ok(self.reorder_step(id, to).await?.record)
    }

    /// Moves a step and reports every sibling whose position changed, itself included.
    pub async fn reorder_step(&self, id: StepId, to: u32) -> Result<Placed<Step>> {
        let lesson_id = self.get_step(id).await?.lesson_id;
        let mut txn = self.positions.begin(ScopeKey::steps_of(lesson_id)).await;
        let mut tables = self.tables.write().await;
        let from = tables.step(id)?.position;

        let slots = slots_in(&tables.steps, lesson_id.0);
        let (_, changes) = txn.move_to(&slots, from, to)?;
        let shifted = reassign(&mut tables.steps, &changes);
        Ok(Placed {
            record: tables.step(id)?.clone(),
            shifted,
        })
    }

    /// Deletes a step, compacting its lesson.
    pub async fn delete_step(&self, id: StepId) -> Result<Removed> {
        let lesson_id = self.get_step(id).await?.lesson_id;
        let mut txn = self.positions.begin(ScopeKey::steps_of(lesson_id)).await;
        let mut tables = self.tables.write().await;
        let position = tables.step(id)?.position;

        let (step, shifted) = remove_at(&mut tables.steps, &mut txn, lesson_id.0, position)?;
        let removed = Removed {
            steps: step.into_iter().collect(),
            shifted,
            ..Removed::default()
        };
        debug!(step = %id, lesson = %lesson_id, "Deleted step");
        Ok(removed)
    }

    /// Replaces a step's content with what was fetched from the platform.
    pub async fn replace_variant(
        &self,
        id: StepId,
        statement: String,
        variant: StepVariant,
    ) -> Result<Step> {
        let mut tables = self.tables.write().await;
        let step = tables
            .steps
            .get_mut(&id)
            .ok_or_else(|| ForgeError::not_found(EntityKind::Step, id))?;
        step.statement = statement;
        step.variant = variant;
        step.updated_at = Utc::now();
        Ok(step.clone())
    }

    // ------------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------------

    /// Returns the whole course tree, every level ordered by position.
    pub async fn outline(&self, course_id: CourseId) -> Result<CourseOutline> {
        let tables = self.tables.read().await;
        let course = tables.course(course_id)?.clone();

        let sections = ordered(&tables.sections, course_id.0)
            .into_iter()
            .map(|section| {
                let lessons = ordered(&tables.lessons, section.id.0)
                    .into_iter()
                    .map(|lesson| LessonOutline {
                        steps: ordered(&tables.steps, lesson.id.0),
                        lesson,
                    })
                    .collect();
                SectionOutline { section, lessons }
            })
            .collect();

        Ok(CourseOutline { course, sections })
    }

    /// Returns the ancestors and descendants of an entity.
    pub async fn lineage(&self, entity: EntityRef) -> Result<Lineage> {
        let tables = self.tables.read().await;
        let mut lineage = Lineage::default();
        let mut lessons = Vec::new();
        let mut step_parents = Vec::new();

        match entity {
            EntityRef::Course(id) => {
                tables.course(id)?;
                for section in tables.section_ids_of(id) {
                    lineage.descendants.push(section.into());
                    lessons.extend(tables.lesson_ids_of(section));
                }
            }
            EntityRef::Section(id) => {
                lineage.ancestors.push(tables.section(id)?.course_id.into());
                lessons = tables.lesson_ids_of(id);
            }
            EntityRef::Lesson(id) => {
                let section = tables.section(tables.lesson(id)?.section_id)?;
                lineage.ancestors = vec![section.id.into(), section.course_id.into()];
                step_parents.push(id);
            }
            EntityRef::Step(id) => {
                let lesson = tables.lesson(tables.step(id)?.lesson_id)?;
                let section = tables.section(lesson.section_id)?;
                lineage.ancestors = vec![
                    lesson.id.into(),
                    section.id.into(),
                    section.course_id.into(),
                ];
            }
        }

        lineage
            .descendants
            .extend(lessons.iter().map(|l| EntityRef::from(*l)));
        step_parents.extend(lessons);
        for lesson in step_parents {
            lineage.descendants.extend(
                slots_in(&tables.steps, lesson.0)
                    .into_iter()
                    .map(|slot| EntityRef::Step(StepId(slot.id))),
            );
        }

        Ok(lineage)
    }

    // ------------------------------------------------------------------------
    // Sync bookkeeping
    // ------------------------------------------------------------------------

    /// Returns the sync state of an entity.
    pub async fn sync_state(&self, entity: EntityRef) -> Result<SyncState> {
        Ok(self.tables.read().await.link_of(entity)?.0)
    }

    /// Applies a state transition to an entity and returns the new state.
    pub async fn transition<F>(&self, entity: EntityRef, f: F) -> Result<SyncState>
    where
        F: FnOnce(&mut SyncState) -> Result<()>,
    {
        let mut tables = self.tables.write().await;
        let state = tables.sync_mut(entity)?;
        f(state)?;
        debug!(%entity, status = %state.status, "Sync state changed");
        Ok(state.clone())
    }

    /// Returns the remote id recorded for an entity.
    pub async fn remote_id(&self, entity: EntityRef) -> Result<Option<RemoteId>> {
        Ok(self.tables.read().await.link_of(entity)?.1)
    }

    /// Records the remote id of an entity.
    ///
    /// Linking the id that is already recorded is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::RemoteIdConflict` if a different id is recorded.
    pub async fn link_remote(&self, entity: EntityRef, remote: RemoteId) -> Result<()> {
        let mut tables = self.tables.write().await;
        let slot = tables.remote_slot(entity)?;
        match *slot {
            Some(existing) if existing == remote => Ok(()),
            Some(existing) => {
                warn!(%entity, %existing, attempted = %remote, "Refusing to relink remote id");
                Err(ForgeError::remote_id_conflict(entity, existing, remote))
            }
            None => {
                *slot = Some(remote);
                info!(%entity, remote_id = %remote, "Linked remote id");
                Ok(())
            }
        }
    }

    /// Records the remote unit binding a lesson into its section.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::RemoteIdConflict` if a different unit is recorded.
    pub async fn link_unit(&self, lesson: LessonId, unit: RemoteId) -> Result<()> {
        let mut tables = self.tables.write().await;
        let record = tables
            .lessons
            .get_mut(&lesson)
            .ok_or_else(|| ForgeError::not_found(EntityKind::Lesson, lesson))?;
        match record.remote_unit_id {
            Some(existing) if existing == unit => Ok(()),
            Some(existing) => Err(ForgeError::remote_id_conflict(
                format!("unit of lesson {lesson}"),
                existing,
                unit,
            )),
            None => {
                record.remote_unit_id = Some(unit);
                debug!(%lesson, unit = %unit, "Linked remote unit");
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Writes the store to `path` as pretty JSON, replacing it atomically.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.tables.read().await.snapshot();
        let json = serde_json::to_string_pretty(&snapshot)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;

        info!(
            path = %path.display(),
            courses = snapshot.courses.len(),
            steps = snapshot.steps.len(),
            "Saved snapshot"
        );
        Ok(())
    }

    /// Restores a store from `path`. A missing file yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::StateFileCorrupted` if the file cannot be parsed
    /// or breaks the hierarchy's structure.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No snapshot found, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot: Snapshot = serde_json::from_str(&content)
            .map_err(|e| ForgeError::state_corrupted(path, e.to_string()))?;
        let tables =
            Tables::from_snapshot(snapshot).map_err(|message| ForgeError::state_corrupted(path, message))?;

        info!(path = %path.display(), courses = tables.courses.len(), "Loaded snapshot");
        Ok(Self {
            tables: RwLock::new(tables),
            positions: PositionManager::new(),
        })
    }

    fn forget_children(&self, sections: &[SectionId], lessons: &[LessonId]) {
        for section in sections {
            self.positions.forget(ScopeKey::lessons_of(*section));
        }
        for lesson in lessons {
            self.positions.forget(ScopeKey::steps_of(*lesson));
        }
    }
}

/// Verifies every child scope a cascade touches before any row is removed.
fn check_scopes(
    tables: &Tables,
    lessons: &[(SectionId, ScopeTxn)],
    steps: &[(LessonId, ScopeTxn)],
) -> Result<()> {
    for (section, txn) in lessons {
        txn.check(&slots_in(&tables.lessons, section.0))?;
    }
    for (lesson, txn) in steps {
        txn.check(&slots_in(&tables.steps, lesson.0))?;
    }
    Ok(())
}
