//! Mirrors the local hierarchy onto the remote platform.
//!
//! Every publish follows the same pattern:
//! 1. Return the cached remote id if the entity is already linked
//! 2. Check that the parent is linked (no remote call, no state change otherwise)
//! 3. Enter `RemotePending` and issue the remote calls, recording each
//!    returned id as soon as it arrives
//! 4. Settle into `RemoteLinked`, `RemoteFailed`, or a resumable `RemotePending`
//!
//! Transient failures are retried with exponential backoff. Cancellation is
//! observed before every call and while backing off; a call already sent is
//! never abandoned halfway.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use lessonforge_codec::{decode, encode};
use lessonforge_remote::{
    CourseFields, Credential, LessonFields, RemoteId, RemotePlatform, RemoteResult,
    SectionFields, StepFields, UnitFields,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::SyncConfig;
use crate::context::RequestContext;
use crate::error::{ForgeError, Result};
use crate::model::{CourseId, EntityRef, LessonId, SectionId, Step, StepId};
use crate::store::{HierarchyStore, Removed};
use crate::sync_state::SyncState;

// ============================================================================
// Retry policy
// ============================================================================

/// How often and how patiently remote calls are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Deadline for a single call.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for RetryPolicy {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): `initial * 2^(attempt-1)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff.saturating_mul(1 << exponent)
    }
}

// ============================================================================
// Reports
// ============================================================================

/// A remote problem that did not fail the local operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncWarning {
    /// Entity the problem concerns.
    pub entity: EntityRef,
    /// What went wrong.
    pub message: String,
}

impl SyncWarning {
    /// Creates a warning from an error.
    #[must_use]
    pub fn new(entity: EntityRef, error: &ForgeError) -> Self {
        Self {
            entity,
            message: error.to_string(),
        }
    }
}

/// An entity and the remote id it is linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedEntity {
    /// Local entity.
    pub entity: EntityRef,
    /// Remote id.
    pub remote_id: RemoteId,
}

/// Result of publishing a whole course tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeReport {
    /// Entities linked after the run, in publish order.
    pub linked: Vec<LinkedEntity>,
    /// Entities whose publish failed.
    pub failed: Vec<SyncWarning>,
    /// Descendants of failed entities that were not attempted.
    pub skipped: Vec<EntityRef>,
}

impl TreeReport {
    /// Returns `true` if every entity of the tree is linked.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

// ============================================================================
// In-flight registry
// ============================================================================

#[derive(Debug, Default)]
struct InFlight {
    claimed: Mutex<HashSet<EntityRef>>,
}

/// Exclusive hold on an entity and its subtree. Released on drop.
#[derive(Debug)]
pub struct Claim<'a> {
    registry: &'a InFlight,
    entity: EntityRef,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.registry
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.entity);
    }
}

// ============================================================================
// SyncOrchestrator
// ============================================================================

/// Publishes entities and keeps their remote links.
pub struct SyncOrchestrator {
    store: Arc<HierarchyStore>,
    platform: Arc<dyn RemotePlatform>,
    retry: RetryPolicy,
    in_flight: InFlight,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("retry", &self.retry)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Creates an orchestrator over `store` talking to `platform`.
    #[must_use]
    pub fn new(
        store: Arc<HierarchyStore>,
        platform: Arc<dyn RemotePlatform>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            platform,
            retry,
            in_flight: InFlight::default(),
        }
    }

    /// The store this orchestrator links.
    #[must_use]
    pub const fn store(&self) -> &Arc<HierarchyStore> {
        &self.store
    }

    /// Claims `entity` until the returned guard drops.
    ///
    /// A claim overlaps any other claim on the same entity, an ancestor or a
    /// descendant.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::Busy` if the entity, an ancestor or a descendant
    /// is already claimed.
    pub async fn claim(&self, entity: EntityRef) -> Result<Claim<'_>> {
        let lineage = self.store.lineage(entity).await?;
        let mut claimed = self
            .in_flight
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let overlaps = claimed.contains(&entity)
            || lineage
                .ancestors
                .iter()
                .chain(&lineage.descendants)
                .any(|e| claimed.contains(e));
        if overlaps {
            debug!(%entity, "Entity is in flight");
            return Err(ForgeError::busy(entity));
        }

        claimed.insert(entity);
        Ok(Claim {
            registry: &self.in_flight,
            entity,
        })
    }

    /// Returns `true` if a publish or delete currently holds `entity` itself.
    #[must_use]
    pub fn is_in_flight(&self, entity: EntityRef) -> bool {
        self.in_flight
            .claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&entity)
    }

    // ------------------------------------------------------------------------
    // Publishing
    // ------------------------------------------------------------------------

    /// Publishes any entity.
    pub async fn publish(
        &self,
        ctx: &RequestContext,
        entity: EntityRef,
        cancel: &CancellationToken,
    ) -> Result<RemoteId> {
        match entity {
            EntityRef::Course(id) => self.publish_course(ctx, id, cancel).await,
            EntityRef::Section(id) => self.publish_section(ctx, id, cancel).await,
            EntityRef::Lesson(id) => self.publish_lesson(ctx, id, cancel).await,
            EntityRef::Step(id) => self.publish_step(ctx, id, cancel).await,
        }
    }

    /// Publishes a course.
    pub async fn publish_course(
        &self,
        ctx: &RequestContext,
        id: CourseId,
        cancel: &CancellationToken,
    ) -> Result<RemoteId> {
        let _claim = self.claim(id.into()).await?;
        self.course_claimed(ctx, id, cancel).await
    }

    /// Publishes a section. Its course must be linked.
    pub async fn publish_section(
        &self,
        ctx: &RequestContext,
        id: SectionId,
        cancel: &CancellationToken,
    ) -> Result<RemoteId> {
        let _claim = self.claim(id.into()).await?;
        self.section_claimed(ctx, id, cancel).await
    }

    /// Publishes a lesson and binds it into its section. The section must be linked.
    ///
    /// A lesson created remotely whose unit binding failed resumes from the
    /// recorded lesson id and first looks for an existing unit.
    pub async fn publish_lesson(
        &self,
        ctx: &RequestContext,
        id: LessonId,
        cancel: &CancellationToken,
    ) -> Result<RemoteId> {
        let _claim = self.claim(id.into()).await?;
        self.lesson_claimed(ctx, id, cancel).await
    }

    /// Publishes a step. Its lesson must be linked.
    pub async fn publish_step(
        &self,
        ctx: &RequestContext,
        id: StepId,
        cancel: &CancellationToken,
    ) -> Result<RemoteId> {
        let _claim = self.claim(id.into()).await?;
        self.step_claimed(ctx, id, cancel).await
    }

    /// Publishes a course and everything below it in position order.
    ///
    /// A failed entity's subtree is skipped while its siblings continue.
    ///
    /// # Errors
    ///
    /// Fails only if the course itself cannot be published or the run is
    /// cancelled; everything else is reported in the [`TreeReport`].
    #[instrument(skip(self, ctx, cancel), fields(course = %id))]
    pub async fn publish_course_tree(
        &self,
        ctx: &RequestContext,
        id: CourseId,
        cancel: &CancellationToken,
    ) -> Result<TreeReport> {
        let _claim = self.claim(id.into()).await?;
        let mut report = TreeReport::default();

        let remote_id = self.course_claimed(ctx, id, cancel).await?;
        report.linked.push(LinkedEntity {
            entity: id.into(),
            remote_id,
        });

        let outline = self.store.outline(id).await?;
        for section in outline.sections {
            let entity = EntityRef::from(section.section.id);
            match self.section_claimed(ctx, section.section.id, cancel).await {
                Ok(remote_id) => report.linked.push(LinkedEntity { entity, remote_id }),
                Err(err) => {
                    abort_if_cancelled(&err)?;
                    report.failed.push(SyncWarning::new(entity, &err));
                    for lesson in &section.lessons {
                        report.skipped.push(lesson.lesson.id.into());
                        report
                            .skipped
                            .extend(lesson.steps.iter().map(|s| EntityRef::from(s.id)));
                    }
                    continue;
                }
            }

            for lesson in section.lessons {
                let entity = EntityRef::from(lesson.lesson.id);
                match self.lesson_claimed(ctx, lesson.lesson.id, cancel).await {
                    Ok(remote_id) => report.linked.push(LinkedEntity { entity, remote_id }),
                    Err(err) => {
                        abort_if_cancelled(&err)?;
                        report.failed.push(SyncWarning::new(entity, &err));
                        report
                            .skipped
                            .extend(lesson.steps.iter().map(|s| EntityRef::from(s.id)));
                        continue;
                    }
                }

                for step in lesson.steps {
                    let entity = EntityRef::from(step.id);
                    match self.step_claimed(ctx, step.id, cancel).await {
                        Ok(remote_id) => report.linked.push(LinkedEntity { entity, remote_id }),
                        Err(err) => {
                            abort_if_cancelled(&err)?;
                            report.failed.push(SyncWarning::new(entity, &err));
                        }
                    }
                }
            }
        }

        info!(
            linked = report.linked.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Published course tree"
        );
        Ok(report)
    }

    async fn course_claimed(
        &self,
        ctx: &RequestContext,
        id: CourseId,
        cancel: &CancellationToken,
    ) -> Result<RemoteId> {
        let entity = EntityRef::from(id);
        let course = self.store.get_course(id).await?;
        if let Some(remote) = linked(&course.sync, course.remote_id) {
            debug!(%entity, remote_id = %remote, "Already linked");
            return Ok(remote);
        }

        let cred = ctx.credential()?;
        self.store.transition(entity, SyncState::begin_publish).await?;

        let result: Result<RemoteId> = async {
            if let Some(remote) = course.remote_id {
                return Ok(remote);
            }
            let fields = &CourseFields {
                title: course.title.clone(),
                description: course.description.clone(),
            };
            let platform = &*self.platform;
            let remote = self
                .call(entity, "create_course", cancel, move || {
                    platform.create_course(cred, fields)
                })
                .await?;
            self.store.link_remote(entity, remote).await?;
            Ok(remote)
        }
        .await;

        self.settle(entity, result).await
    }

    async fn section_claimed(
        &self,
        ctx: &RequestContext,
        id: SectionId,
        cancel: &CancellationToken,
    ) -> Result<RemoteId> {
        let entity = EntityRef::from(id);
        let section = self.store.get_section(id).await?;
        if let Some(remote) = linked(&section.sync, section.remote_id) {
            debug!(%entity, remote_id = %remote, "Already linked");
            return Ok(remote);
        }

        let course = self.store.get_course(section.course_id).await?;
        let Some(course_remote) = linked(&course.sync, course.remote_id) else {
            return Err(ForgeError::dependency_not_ready(
                entity,
                EntityRef::from(course.id),
            ));
        };

        let cred = ctx.credential()?;
        self.store.transition(entity, SyncState::begin_publish).await?;

        let platform = &*self.platform;
        let result: Result<RemoteId> = async {
            if let Some(remote) = section.remote_id {
                return Ok(remote);
            }

            // an earlier attempt may have created it without hearing back
            if section.sync.attempts > 0 {
                let existing = self
                    .call(entity, "list_sections", cancel, move || {
                        platform.list_sections(cred, course_remote)
                    })
                    .await?
                    .into_iter()
                    .find(|s| s.position == section.position() && s.title == section.title);
                if let Some(existing) = existing {
                    debug!(%entity, remote_id = %existing.id, "Reusing existing section");
                    self.store.link_remote(entity, existing.id).await?;
                    return Ok(existing.id);
                }
            }

            let fields = &SectionFields {
                course: course_remote,
                title: section.title.clone(),
                description: section.description.clone(),
                position: section.position(),
            };
            let remote = self
                .call(entity, "create_section", cancel, move || {
                    platform.create_section(cred, fields)
                })
                .await?;
            self.store.link_remote(entity, remote).await?;
            Ok(remote)
        }
        .await;

        self.settle(entity, result).await
    }

    async fn lesson_claimed(
        &self,
        ctx: &RequestContext,
        id: LessonId,
        cancel: &CancellationToken,
    ) -> Result<RemoteId> {
        let entity = EntityRef::from(id);
        let lesson = self.store.get_lesson(id).await?;
        if let Some(remote) = linked(&lesson.sync, lesson.remote_id) {
            debug!(%entity, remote_id = %remote, "Already linked");
            return Ok(remote);
        }

        let section = self.store.get_section(lesson.section_id).await?;
        let Some(section_remote) = linked(&section.sync, section.remote_id) else {
            return Err(ForgeError::dependency_not_ready(
                entity,
                EntityRef::from(section.id),
            ));
        };

        let cred = ctx.credential()?;
        self.store.transition(entity, SyncState::begin_publish).await?;
        let platform = &*self.platform;

        let result: Result<RemoteId> = async {
            let lesson_remote = match lesson.remote_id {
                Some(remote) => {
                    debug!(%entity, remote_id = %remote, "Resuming from recorded lesson");
                    remote
                }
                None => {
                    let fields = &LessonFields {
                        title: lesson.title.clone(),
                    };
                    let remote = self
                        .call(entity, "create_lesson", cancel, move || {
                            platform.create_lesson(cred, fields)
                        })
                        .await?;
                    self.store.link_remote(entity, remote).await?;
                    remote
                }
            };

            if lesson.remote_unit_id.is_none() {
                let existing = self
                    .call(entity, "list_units", cancel, move || {
                        platform.list_units(cred, lesson_remote)
                    })
                    .await?
                    .into_iter()
                    .find(|unit| unit.section == section_remote);

                let unit = if let Some(unit) = existing {
                    debug!(%entity, unit = %unit.id, "Reusing existing unit");
                    unit.id
                } else {
                    let fields = &UnitFields {
                        section: section_remote,
                        lesson: lesson_remote,
                        position: lesson.position(),
                    };
                    self.call(entity, "create_unit", cancel, move || {
                        platform.create_unit(cred, fields)
                    })
                    .await?
                };
                self.store.link_unit(id, unit).await?;
            }

            Ok(lesson_remote)
        }
        .await;

        self.settle(entity, result).await
    }

    async fn step_claimed(
        &self,
        ctx: &RequestContext,
        id: StepId,
        cancel: &CancellationToken,
    ) -> Result<RemoteId> {
        let entity = EntityRef::from(id);
        let step = self.store.get_step(id).await?;
        if let Some(remote) = linked(&step.sync, step.remote_id) {
            debug!(%entity, remote_id = %remote, "Already linked");
            return Ok(remote);
        }

        let lesson = self.store.get_lesson(step.lesson_id).await?;
        let Some(lesson_remote) = linked(&lesson.sync, lesson.remote_id) else {
            return Err(ForgeError::dependency_not_ready(
                entity,
                EntityRef::from(lesson.id),
            ));
        };

        let cred = ctx.credential()?;
        let block = encode(&step.statement, &step.variant)?;
        self.store.transition(entity, SyncState::begin_publish).await?;

        let result: Result<RemoteId> = async {
            if let Some(remote) = step.remote_id {
                return Ok(remote);
            }
            let fields = &StepFields {
                lesson: lesson_remote,
                position: step.position(),
                block,
            };
            let platform = &*self.platform;
            let remote = self
                .call(entity, "create_step", cancel, move || {
                    platform.create_step(cred, fields)
                })
                .await?;
            self.store.link_remote(entity, remote).await?;
            Ok(remote)
        }
        .await;

        self.settle(entity, result).await
    }

    // ------------------------------------------------------------------------
    // Keeping linked entities current
    // ------------------------------------------------------------------------

    /// Mirrors the current local fields of a linked entity to the platform.
    ///
    /// Returns `false` without any call if the entity is not linked.
    pub async fn push_update(
        &self,
        ctx: &RequestContext,
        entity: EntityRef,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let _claim = self.claim(entity).await?;
        let platform = &*self.platform;

        match entity {
            EntityRef::Course(id) => {
                let course = self.store.get_course(id).await?;
                let Some(remote) = linked(&course.sync, course.remote_id) else {
                    return Ok(false);
                };
                let cred = ctx.credential()?;
                let fields = &CourseFields {
                    title: course.title,
                    description: course.description,
                };
                self.call(entity, "update_course", cancel, move || {
                    platform.update_course(cred, remote, fields)
                })
                .await?;
            }
            EntityRef::Section(id) => {
                let section = self.store.get_section(id).await?;
                let Some(remote) = linked(&section.sync, section.remote_id) else {
                    return Ok(false);
                };
                let course = self.store.get_course(section.course_id).await?;
                let Some(course_remote) = course.remote_id else {
                    return Ok(false);
                };
                let cred = ctx.credential()?;
                let fields = &SectionFields {
                    course: course_remote,
                    position: section.position(),
                    title: section.title,
                    description: section.description,
                };
                self.call(entity, "update_section", cancel, move || {
                    platform.update_section(cred, remote, fields)
                })
                .await?;
            }
            EntityRef::Lesson(id) => {
                let lesson = self.store.get_lesson(id).await?;
                let Some(remote) = linked(&lesson.sync, lesson.remote_id) else {
                    return Ok(false);
                };
                let cred = ctx.credential()?;
                let fields = &LessonFields {
                    title: lesson.title.clone(),
                };
                self.call(entity, "update_lesson", cancel, move || {
                    platform.update_lesson(cred, remote, fields)
                })
                .await?;

                let section = self.store.get_section(lesson.section_id).await?;
                if let (Some(unit), Some(section_remote)) = (lesson.remote_unit_id, section.remote_id) {
                    let fields = &UnitFields {
                        section: section_remote,
                        lesson: remote,
                        position: lesson.position(),
                    };
                    self.call(entity, "update_unit", cancel, move || {
                        platform.update_unit(cred, unit, fields)
                    })
                    .await?;
                }
            }
            EntityRef::Step(id) => {
                let step = self.store.get_step(id).await?;
                let Some(remote) = linked(&step.sync, step.remote_id) else {
                    return Ok(false);
                };
                let lesson = self.store.get_lesson(step.lesson_id).await?;
                let Some(lesson_remote) = lesson.remote_id else {
                    return Ok(false);
                };
                let cred = ctx.credential()?;
                let fields = &StepFields {
                    lesson: lesson_remote,
                    position: step.position(),
                    block: encode(&step.statement, &step.variant)?,
                };
                self.call(entity, "update_step", cancel, move || {
                    platform.update_step(cred, remote, fields)
                })
                .await?;
            }
        }

        debug!(%entity, "Pushed update");
        Ok(true)
    }

    /// Replaces a linked step's local content with its remote block.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::UnknownStepVariant` if the remote block matches no
    /// known step kind; the local step is left untouched.
    pub async fn refresh_step(
        &self,
        ctx: &RequestContext,
        id: StepId,
        cancel: &CancellationToken,
    ) -> Result<Step> {
        let entity = EntityRef::from(id);
        let _claim = self.claim(entity).await?;

        let step = self.store.get_step(id).await?;
        let Some(remote) = step.remote_id else {
            return Err(ForgeError::validation(
                format!("{entity} has no remote copy"),
                "Publish the step before refreshing it",
            ));
        };

        let cred = ctx.credential()?;
        let platform = &*self.platform;
        let fetched = self
            .call(entity, "get_step", cancel, move || platform.get_step(cred, remote))
            .await?;
        let decoded = decode(&fetched.block)?;

        info!(%entity, remote_id = %remote, kind = %decoded.variant.kind(), "Refreshed step from remote");
        self.store
            .replace_variant(id, decoded.statement, decoded.variant)
            .await
    }

    /// Deletes the remote copies of everything a local delete removed,
    /// children first. Failures are returned as warnings.
    pub async fn delete_remote(
        &self,
        ctx: &RequestContext,
        removed: &Removed,
        cancel: &CancellationToken,
    ) -> Vec<SyncWarning> {
        let targets = remote_targets(removed);
        if targets.is_empty() {
            return Vec::new();
        }

        let cred = match ctx.credential() {
            Ok(cred) => cred,
            Err(err) => {
                warn!(entities = targets.len(), "No credential for remote deletion");
                return targets
                    .iter()
                    .map(|(entity, _)| SyncWarning::new(*entity, &err))
                    .collect();
            }
        };

        let mut warnings = Vec::new();
        for (entity, target) in targets {
            if let Err(err) = self.delete_target(cred, entity, target, cancel).await {
                warn!(%entity, error = %err, "Remote delete failed");
                warnings.push(SyncWarning::new(entity, &err));
            }
        }
        warnings
    }

    async fn delete_target(
        &self,
        cred: &Credential,
        entity: EntityRef,
        target: RemoteTarget,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let platform = &*self.platform;
        match target {
            RemoteTarget::Step(id) => {
                self.call(entity, "delete_step", cancel, move || platform.delete_step(cred, id))
                    .await
            }
            RemoteTarget::Unit(id) => {
                self.call(entity, "delete_unit", cancel, move || platform.delete_unit(cred, id))
                    .await
            }
            RemoteTarget::Lesson(id) => {
                self.call(entity, "delete_lesson", cancel, move || {
                    platform.delete_lesson(cred, id)
                })
                .await
            }
            RemoteTarget::Section(id) => {
                self.call(entity, "delete_section", cancel, move || {
                    platform.delete_section(cred, id)
                })
                .await
            }
            RemoteTarget::Course(id) => {
                self.call(entity, "delete_course", cancel, move || {
                    platform.delete_course(cred, id)
                })
                .await
            }
        }
    }

    // ------------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------------

    /// Runs one remote call under the retry policy.
    async fn call<T, F, Fut>(
        &self,
        entity: EntityRef,
        op: &'static str,
        cancel: &CancellationToken,
        mut f: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(ForgeError::cancelled(entity));
            }

            let result = match tokio::time::timeout(self.retry.call_timeout, f()).await {
                Ok(result) => result.map_err(ForgeError::from),
                Err(_) => Err(ForgeError::RemoteTransportFailure {
                    message: format!(
                        "{op} timed out after {}ms",
                        self.retry.call_timeout.as_millis()
                    ),
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(%entity, op, attempt, ?delay, error = %err, "Transient remote failure, retrying");
                    tokio::select! {
                        () = cancel.cancelled() => return Err(ForgeError::cancelled(entity)),
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Moves a pending entity to its final state for this attempt.
    async fn settle(&self, entity: EntityRef, result: Result<RemoteId>) -> Result<RemoteId> {
        match result {
            Ok(remote) => {
                self.store.transition(entity, SyncState::link).await?;
                info!(%entity, remote_id = %remote, "Published");
                Ok(remote)
            }
            Err(err) => {
                let message = err.to_string();
                // recorded progress keeps the entity resumable
                let progressed = matches!(self.store.remote_id(entity).await, Ok(Some(_)));
                let recorded = if progressed {
                    self.store
                        .transition(entity, |s| s.stall(message))
                        .await
                } else {
                    self.store.transition(entity, |s| s.fail(message)).await
                };
                if let Err(e) = recorded {
                    warn!(%entity, error = %e, "Could not record publish failure");
                }
                warn!(%entity, progressed, error = %err, "Publish failed");
                Err(err)
            }
        }
    }
}

fn linked(sync: &SyncState, remote: Option<RemoteId>) -> Option<RemoteId> {
    remote.filter(|_| sync.status.is_linked())
}

fn abort_if_cancelled(err: &ForgeError) -> Result<()> {
    match err {
        ForgeError::Cancelled { entity } => Err(ForgeError::Cancelled {
            entity: entity.clone(),
        }),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Copy)]
enum RemoteTarget {
    Step(RemoteId),
    Unit(RemoteId),
    Lesson(RemoteId),
    Section(RemoteId),
    Course(RemoteId),
}

fn remote_targets(removed: &Removed) -> Vec<(EntityRef, RemoteTarget)> {
    let mut targets = Vec::new();
    for step in &removed.steps {
        if let Some(id) = step.remote_id {
            targets.push((step.id.into(), RemoteTarget::Step(id)));
        }
    }
    for lesson in &removed.lessons {
        if let Some(id) = lesson.remote_unit_id {
            targets.push((lesson.id.into(), RemoteTarget::Unit(id)));
        }
    }
    for lesson in &removed.lessons {
        if let Some(id) = lesson.remote_id {
            targets.push((lesson.id.into(), RemoteTarget::Lesson(id)));
        }
    }
    for section in &removed.sections {
        if let Some(id) = section.remote_id {
            targets.push((section.id.into(), RemoteTarget::Section(id)));
        }
    }
    for course in &removed.courses {
        if let Some(id) = course.remote_id {
            targets.push((course.id.into(), RemoteTarget::Course(id)));
        }
    }
    targets
}
