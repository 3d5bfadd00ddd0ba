//! In-memory remote platform for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use lessonforge_remote::{
    CourseFields, Credential, LessonFields, RemoteError, RemoteId, RemotePlatform, RemoteResult,
    RemoteSection, RemoteStep, RemoteUnit, SectionFields, StepFields, UnitFields,
};

use crate::context::RequestContext;
use crate::publish::{RetryPolicy, SyncOrchestrator};
use crate::store::HierarchyStore;

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    calls: Vec<&'static str>,
    failures: HashMap<&'static str, VecDeque<RemoteError>>,
    delays: HashMap<&'static str, VecDeque<Duration>>,
    rejected_titles: HashSet<String>,
    lose_unit_response: bool,
    lose_section_response: bool,
    sections: Vec<RemoteSection>,
    units: Vec<RemoteUnit>,
    steps: HashMap<RemoteId, RemoteStep>,
}

/// Records every call and hands out increasing ids starting at 101.
#[derive(Debug, Default)]
pub struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: RemoteError) {
        self.state().failures.entry(op).or_default().push_back(err);
    }

    /// Makes the next call of `op` take `delay` before answering.
    pub fn delay_next(&self, op: &'static str, delay: Duration) {
        self.state().delays.entry(op).or_default().push_back(delay);
    }

    /// Rejects sections created with this title.
    pub fn reject_title(&self, title: &str) {
        self.state().rejected_titles.insert(title.to_string());
    }

    /// Creates units but reports a server error back.
    pub fn lose_unit_response(&self, lose: bool) {
        self.state().lose_unit_response = lose;
    }

    /// Creates sections but reports a server error back.
    pub fn lose_section_response(&self, lose: bool) {
        self.state().lose_section_response = lose;
    }

    /// Seeds a step returned by `get_step`.
    pub fn put_step(&self, step: RemoteStep) {
        self.state().steps.insert(step.id, step);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == op).count()
    }

    async fn enter(&self, op: &'static str) -> RemoteResult<()> {
        let delay = {
            let mut state = self.state();
            state.calls.push(op);
            state.delays.get_mut(op).and_then(VecDeque::pop_front)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.state().failures.get_mut(op).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn create(&self, op: &'static str) -> RemoteResult<RemoteId> {
        self.enter(op).await?;
        let mut state = self.state();
        state.next_id += 1;
        Ok(RemoteId(100 + state.next_id))
    }
}

#[async_trait]
impl RemotePlatform for FakePlatform {
    async fn create_course(&self, _: &Credential, _: &CourseFields) -> RemoteResult<RemoteId> {
        self.create("create_course").await
    }

    async fn update_course(&self, _: &Credential, _: RemoteId, _: &CourseFields) -> RemoteResult<()> {
        self.enter("update_course").await
    }

    async fn delete_course(&self, _: &Credential, _: RemoteId) -> RemoteResult<()> {
        self.enter("delete_course").await
    }

    async fn create_section(&self, _: &Credential, fields: &SectionFields) -> RemoteResult<RemoteId> {
        if self.state().rejected_titles.contains(&fields.title) {
            self.enter("create_section").await?;
            return Err(RemoteError::Validation {
                status: 400,
                detail: format!("title '{}' is not allowed", fields.title),
            });
        }
        let id = self.create("create_section").await?;
        let mut state = self.state();
        state.sections.push(RemoteSection {
            id,
            course: fields.course,
            title: fields.title.clone(),
            position: fields.position,
        });
        if state.lose_section_response {
            return Err(RemoteError::Server {
                status: 502,
                message: "bad gateway".into(),
            });
        }
        Ok(id)
    }

    async fn update_section(&self, _: &Credential, _: RemoteId, _: &SectionFields) -> RemoteResult<()> {
        self.enter("update_section").await
    }

    async fn delete_section(&self, _: &Credential, _: RemoteId) -> RemoteResult<()> {
        self.enter("delete_section").await
    }

    async fn list_sections(&self, _: &Credential, course: RemoteId) -> RemoteResult<Vec<RemoteSection>> {
        self.enter("list_sections").await?;
        Ok(self
            .state()
            .sections
            .iter()
            .filter(|s| s.course == course)
            .cloned()
            .collect())
    }

    async fn create_lesson(&self, _: &Credential, _: &LessonFields) -> RemoteResult<RemoteId> {
        self.create("create_lesson").await
    }

    async fn update_lesson(&self, _: &Credential, _: RemoteId, _: &LessonFields) -> RemoteResult<()> {
        self.enter("update_lesson").await
    }

    async fn delete_lesson(&self, _: &Credential, _: RemoteId) -> RemoteResult<()> {
        self.enter("delete_lesson").await
    }

    async fn create_unit(&self, _: &Credential, fields: &UnitFields) -> RemoteResult<RemoteId> {
        let id = self.create("create_unit").await?;
        let mut state = self.state();
        state.units.push(RemoteUnit {
            id,
            section: fields.section,
            lesson: fields.lesson,
            position: fields.position,
        });
        if state.lose_unit_response {
            return Err(RemoteError::Server {
                status: 502,
                message: "bad gateway".into(),
            });
        }
        Ok(id)
    }

    async fn update_unit(&self, _: &Credential, _: RemoteId, _: &UnitFields) -> RemoteResult<()> {
        self.enter("update_unit").await
    }

    async fn delete_unit(&self, _: &Credential, _: RemoteId) -> RemoteResult<()> {
        self.enter("delete_unit").await
    }

    async fn list_units(&self, _: &Credential, lesson: RemoteId) -> RemoteResult<Vec<RemoteUnit>> {
        self.enter("list_units").await?;
        Ok(self
            .state()
            .units
            .iter()
            .filter(|u| u.lesson == lesson)
            .copied()
            .collect())
    }

    async fn create_step(&self, _: &Credential, _: &StepFields) -> RemoteResult<RemoteId> {
        self.create("create_step").await
    }

    async fn update_step(&self, _: &Credential, _: RemoteId, _: &StepFields) -> RemoteResult<()> {
        self.enter("update_step").await
    }

    async fn delete_step(&self, _: &Credential, _: RemoteId) -> RemoteResult<()> {
        self.enter("delete_step").await
    }

    async fn get_step(&self, _: &Credential, id: RemoteId) -> RemoteResult<RemoteStep> {
        self.enter("get_step").await?;
        self.state()
            .steps
            .get(&id)
            .cloned()
            .ok_or_else(|| RemoteError::Validation {
                status: 404,
                detail: format!("step {id} not found"),
            })
    }
}

/// Retries quickly so tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        call_timeout: Duration::from_secs(5),
    }
}

pub fn orchestrator(platform: &Arc<FakePlatform>, retry: RetryPolicy) -> SyncOrchestrator {
    SyncOrchestrator::new(
        Arc::new(HierarchyStore::new()),
        Arc::clone(platform) as Arc<dyn RemotePlatform>,
        retry,
    )
}

pub fn ctx() -> RequestContext {
    RequestContext::new("alice", Some(Credential::new("token")))
}
