//! Local authoring with best-effort remote mirroring.
//!
//! Local changes always go through. Whatever the remote platform says about
//! them afterwards comes back as [`SyncWarning`]s next to the value.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::RequestContext;
use crate::error::Result;
use crate::model::{
    Course, CourseId, CoursePatch, EntityRef, Lesson, LessonId, LessonPatch, NewCourse, NewLesson,
    NewSection, NewStep, Section, SectionId, SectionPatch, Step, StepId, StepPatch,
};
use crate::publish::{SyncOrchestrator, SyncWarning};
use crate::store::{HierarchyStore, Removed};

/// A mutation result plus the remote problems it ran into.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome<T> {
    /// The local result.
    pub value: T,
    /// Remote problems that did not fail the request.
    pub warnings: Vec<SyncWarning>,
}

impl<T> Outcome<T> {
    /// An outcome without warnings.
    pub const fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    /// An outcome with the given warnings.
    pub const fn with_warnings(value: T, warnings: Vec<SyncWarning>) -> Self {
        Self { value, warnings }
    }
}

/// Creates, edits, moves and deletes content, mirroring linked entities.
#[derive(Debug, Clone)]
pub struct AuthoringService {
    sync: Arc<SyncOrchestrator>,
}

impl AuthoringService {
    /// Creates a service on top of an orchestrator.
    #[must_use]
    pub const fn new(sync: Arc<SyncOrchestrator>) -> Self {
        Self { sync }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<HierarchyStore> {
        self.sync.store()
    }

    /// The underlying orchestrator.
    #[must_use]
    pub const fn sync(&self) -> &Arc<SyncOrchestrator> {
        &self.sync
    }

    // ------------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------------

    /// Creates a course owned by the caller, publishing it if asked.
    pub async fn create_course(
        &self,
        ctx: &RequestContext,
        request: &NewCourse,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Course>> {
        let course = self.store().create_course(&ctx.user_id, request).await?;
        if !request.publish {
            return Ok(Outcome::clean(course));
        }
        let warnings = self.publish_quietly(ctx, course.id.into(), cancel).await;
        Ok(Outcome::with_warnings(
            self.store().get_course(course.id).await?,
            warnings,
        ))
    }

    /// Creates a section, publishing it if asked.
    ///
    /// Linked siblings pushed down by the insert are mirrored too.
    pub async fn create_section(
        &self,
        ctx: &RequestContext,
        course: CourseId,
        request: &NewSection,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Section>> {
        let placed = self.store().insert_section(course, request).await?;
        let mut warnings = self.push_shifted(ctx, &placed.shifted, cancel).await;
        let section = placed.record;
        if !request.publish {
            return Ok(Outcome::with_warnings(section, warnings));
        }
        warnings.extend(self.publish_quietly(ctx, section.id.into(), cancel).await);
        Ok(Outcome::with_warnings(
            self.store().get_section(section.id).await?,
            warnings,
        ))
    }

    /// Creates a lesson, publishing it if asked.
    ///
    /// Linked siblings pushed down by the insert are mirrored too.
    pub async fn create_lesson(
        &self,
        ctx: &RequestContext,
        section: SectionId,
        request: &NewLesson,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Lesson>> {
        let placed = self.store().insert_lesson(section, request).await?;
        let mut warnings = self.push_shifted(ctx, &placed.shifted, cancel).await;
        let lesson = placed.record;
        if !request.publish {
            return Ok(Outcome::with_warnings(lesson, warnings));
        }
        warnings.extend(self.publish_quietly(ctx, lesson.id.into(), cancel).await);
        Ok(Outcome::with_warnings(
            self.store().get_lesson(lesson.id).await?,
            warnings,
        ))
    }

    /// Creates a step, publishing it if asked.
    ///
    /// Linked siblings pushed down by the insert are mirrored too.
    pub async fn create_step(
        &self,
        ctx: &RequestContext,
        lesson: LessonId,
        request: &NewStep,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Step>> {
        let placed = self.store().insert_step(lesson, request).await?;
        let mut warnings = self.push_shifted(ctx, &placed.shifted, cancel).await;
        let step = placed.record;
        if !request.publish {
            return Ok(Outcome::with_warnings(step, warnings));
        }
        warnings.extend(self.publish_quietly(ctx, step.id.into(), cancel).await);
        Ok(Outcome::with_warnings(
            self.store().get_step(step.id).await?,
            warnings,
        ))
    }

    // ------------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------------

    /// Updates a course and mirrors it if linked.
    pub async fn update_course(
        &self,
        ctx: &RequestContext,
        id: CourseId,
        patch: &CoursePatch,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Course>> {
        let course = self.store().update_course(id, patch).await?;
        let warnings = self.push_quietly(ctx, id.into(), cancel).await;
        Ok(Outcome::with_warnings(course, warnings))
    }

    /// Updates a section and mirrors it if linked.
    pub async fn update_section(
        &self,
        ctx: &RequestContext,
        id: SectionId,
        patch: &SectionPatch,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Section>> {
        let section = self.store().update_section(id, patch).await?;
        let warnings = self.push_quietly(ctx, id.into(), cancel).await;
        Ok(Outcome::with_warnings(section, warnings))
    }

    /// Updates a lesson and mirrors it if linked.
    pub async fn update_lesson(
        &self,
        ctx: &RequestContext,
        id: LessonId,
        patch: &LessonPatch,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Lesson>> {
        let lesson = self.store().update_lesson(id, patch).await?;
        let warnings = self.push_quietly(ctx, id.into(), cancel).await;
        Ok(Outcome::with_warnings(lesson, warnings))
    }

    /// Updates a step and mirrors it if linked.
    pub async fn update_step(
        &self,
        ctx: &RequestContext,
        id: StepId,
        patch: &StepPatch,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Step>> {
        let step = self.store().update_step(id, patch).await?;
        let warnings = self.push_quietly(ctx, id.into(), cancel).await;
        Ok(Outcome::with_warnings(step, warnings))
    }

    // ------------------------------------------------------------------------
    // Move
    // ------------------------------------------------------------------------

    /// Moves a section and mirrors every linked sibling whose position changed.
    pub async fn move_section(
        &self,
        ctx: &RequestContext,
        id: SectionId,
        to: u32,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Section>> {
        let placed = self.store().reorder_section(id, to).await?;
        let warnings = self.push_shifted(ctx, &placed.shifted, cancel).await;
        Ok(Outcome::with_warnings(placed.record, warnings))
    }

    /// Moves a lesson and mirrors every linked sibling whose position changed.
    pub async fn move_lesson(
        &self,
        ctx: &RequestContext,
        id: LessonId,
        to: u32,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Lesson>> {
        let placed = self.store().reorder_lesson(id, to).await?;
        let warnings = self.push_shifted(ctx, &placed.shifted, cancel).await;
        Ok(Outcome::with_warnings(placed.record, warnings))
    }

    /// Moves a step and mirrors every linked sibling whose position changed.
    pub async fn move_step(
        &self,
        ctx: &RequestContext,
        id: StepId,
        to: u32,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Step>> {
        let placed = self.store().reorder_step(id, to).await?;
        let warnings = self.push_shifted(ctx, &placed.shifted, cancel).await;
        Ok(Outcome::with_warnings(placed.record, warnings))
    }

    // ------------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------------

    /// Deletes an entity and its subtree, then removes the remote copies and
    /// mirrors the linked siblings that moved up.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::Busy` if the entity, an ancestor or a descendant
    /// is being published.
    pub async fn delete(
        &self,
        ctx: &RequestContext,
        entity: EntityRef,
        cancel: &CancellationToken,
    ) -> Result<Outcome<Removed>> {
        let removed = {
            let _claim = self.sync.claim(entity).await?;
            match entity {
                EntityRef::Course(id) => self.store().delete_course(id).await?,
                EntityRef::Section(id) => self.store().delete_section(id).await?,
                EntityRef::Lesson(id) => self.store().delete_lesson(id).await?,
                EntityRef::Step(id) => self.store().delete_step(id).await?,
            }
        };

        let mut warnings = self.sync.delete_remote(ctx, &removed, cancel).await;
        warnings.extend(self.push_shifted(ctx, &removed.shifted, cancel).await);
        debug!(%entity, removed = removed.len(), warnings = warnings.len(), "Delete finished");
        Ok(Outcome::with_warnings(removed, warnings))
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    async fn publish_quietly(
        &self,
        ctx: &RequestContext,
        entity: EntityRef,
        cancel: &CancellationToken,
    ) -> Vec<SyncWarning> {
        match self.sync.publish(ctx, entity, cancel).await {
            Ok(_) => Vec::new(),
            Err(err) => vec![SyncWarning::new(entity, &err)],
        }
    }

    async fn push_quietly(
        &self,
        ctx: &RequestContext,
        entity: EntityRef,
        cancel: &CancellationToken,
    ) -> Vec<SyncWarning> {
        match self.sync.push_update(ctx, entity, cancel).await {
            Ok(_) => Vec::new(),
            Err(err) => vec![SyncWarning::new(entity, &err)],
        }
    }

    /// Mirrors the new position of every linked entity in `shifted`.
    async fn push_shifted(
        &self,
        ctx: &RequestContext,
        shifted: &[EntityRef],
        cancel: &CancellationToken,
    ) -> Vec<SyncWarning> {
        let mut warnings = Vec::new();
        for entity in shifted {
            warnings.extend(self.push_quietly(ctx, *entity, cancel).await);
        }
        warnings
    }
}
