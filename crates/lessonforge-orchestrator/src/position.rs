//! Gap-free sibling ordering.
//!
//! Siblings under one parent form a *scope* whose positions are always
//! exactly `1..=N`. Planning is pure: the `plan_*` functions take the current
//! slots and return the position changes to apply. [`PositionManager`] adds
//! per-scope mutual exclusion and a ledger of the last known sibling count,
//! so a write that bypassed the scope lock shows up as a
//! [`ForgeError::PositionConflict`] instead of silently corrupting order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ForgeError, Result};
use crate::model::{CourseId, LessonId, SectionId};

// ============================================================================
// Scopes
// ============================================================================

/// Hierarchy level of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeLevel {
    /// Sections of a course.
    Sections,
    /// Lessons of a section.
    Lessons,
    /// Steps of a lesson.
    Steps,
}

/// Identifies one set of siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    /// Level of the children.
    pub level: ScopeLevel,
    /// Id of the parent.
    pub parent: Uuid,
}

impl ScopeKey {
    /// Sections of a course.
    #[must_use]
    pub const fn sections_of(course: CourseId) -> Self {
        Self {
            level: ScopeLevel::Sections,
            parent: course.0,
        }
    }

    /// Lessons of a section.
    #[must_use]
    pub const fn lessons_of(section: SectionId) -> Self {
        Self {
            level: ScopeLevel::Lessons,
            parent: section.0,
        }
    }

    /// Steps of a lesson.
    #[must_use]
    pub const fn steps_of(lesson: LessonId) -> Self {
        Self {
            level: ScopeLevel::Steps,
            parent: lesson.0,
        }
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level {
            ScopeLevel::Sections => write!(f, "sections of course {}", self.parent),
            ScopeLevel::Lessons => write!(f, "lessons of section {}", self.parent),
            ScopeLevel::Steps => write!(f, "steps of lesson {}", self.parent),
        }
    }
}

/// A sibling and its current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    /// Sibling id.
    pub id: Uuid,
    /// Current position.
    pub position: u32,
}

/// A position change produced by a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reassignment {
    /// Sibling to update.
    pub id: Uuid,
    /// Position before.
    pub from: u32,
    /// Position after.
    pub to: u32,
}

fn count_of(slots: &[Slot]) -> u32 {
    u32::try_from(slots.len()).unwrap_or(u32::MAX)
}

// ============================================================================
// Pure planning
// ============================================================================

/// Returns `true` if the positions are exactly `1..=N` without duplicates.
#[must_use]
pub fn is_contiguous(slots: &[Slot]) -> bool {
    let count = slots.len();
    let mut seen = vec![false; count];
    for slot in slots {
        let Some(index) = (slot.position as usize).checked_sub(1) else {
            return false;
        };
        match seen.get_mut(index) {
            Some(flag) if !*flag => *flag = true,
            _ => return false,
        }
    }
    true
}

/// Plans inserting a new sibling at `desired`, clamped to `1..=N+1`.
///
/// Returns the final position of the new sibling and the shifts of the
/// existing ones.
#[must_use]
pub fn plan_insert(slots: &[Slot], desired: u32) -> (u32, Vec<Reassignment>) {
    let count = count_of(slots);
    let position = desired.clamp(1, count.saturating_add(1));

    let shifts = slots
        .iter()
        .filter(|s| s.position >= position)
        .map(|s| Reassignment {
            id: s.id,
            from: s.position,
            to: s.position + 1,
        })
        .collect();

    (position, shifts)
}

/// Plans removing the sibling at `position`.
///
/// Returns the removed sibling's id and the shifts of those after it.
///
/// # Errors
///
/// Returns `ForgeError::PositionOutOfRange` if no sibling holds `position`.
pub fn plan_delete(slots: &[Slot], position: u32) -> Result<(Uuid, Vec<Reassignment>)> {
    let Some(removed) = slots.iter().find(|s| s.position == position) else {
        return Err(ForgeError::PositionOutOfRange {
            position,
            count: count_of(slots),
        });
    };

    let shifts = slots
        .iter()
        .filter(|s| s.position > position)
        .map(|s| Reassignment {
            id: s.id,
            from: s.position,
            to: s.position - 1,
        })
        .collect();

    Ok((removed.id, shifts))
}

/// Plans moving the sibling at `from` to `to`, clamped to `1..=N`.
///
/// Moving to the current position plans nothing. Otherwise the result
/// includes the moved sibling itself.
///
/// # Errors
///
/// Returns `ForgeError::PositionOutOfRange` if no sibling holds `from`.
pub fn plan_move(slots: &[Slot], from: u32, to: u32) -> Result<(u32, Vec<Reassignment>)> {
    let count = count_of(slots);
    let Some(moved) = slots.iter().find(|s| s.position == from) else {
        return Err(ForgeError::PositionOutOfRange {
            position: from,
            count,
        });
    };
    let to = to.clamp(1, count.max(1));

    if to == from {
        return Ok((from, Vec::new()));
    }

    let mut changes: Vec<Reassignment> = if to > from {
        slots
            .iter()
            .filter(|s| s.position > from && s.position <= to)
            .map(|s| Reassignment {
                id: s.id,
                from: s.position,
                to: s.position - 1,
            })
            .collect()
    } else {
        slots
            .iter()
            .filter(|s| s.position >= to && s.position < from)
            .map(|s| Reassignment {
                id: s.id,
                from: s.position,
                to: s.position + 1,
            })
            .collect()
    };
    changes.push(Reassignment {
        id: moved.id,
        from,
        to,
    });

    Ok((to, changes))
}

// ============================================================================
// PositionManager
// ============================================================================

#[derive(Debug, Default)]
struct ScopeLedger {
    /// Sibling count after the last committed operation, unknown until first use.
    recorded_max: Option<u32>,
}

/// Serializes ordering operations per scope.
///
/// Scopes are independent: transactions on different scopes never wait for
/// each other.
#[derive(Debug, Default)]
pub struct PositionManager {
    scopes: Mutex<HashMap<ScopeKey, Arc<AsyncMutex<ScopeLedger>>>>,
}

impl PositionManager {
    /// Creates a manager with no known scopes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a transaction on `scope`, waiting for any other transaction on it.
    pub async fn begin(&self, scope: ScopeKey) -> ScopeTxn {
        let cell = {
            let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(scopes.entry(scope).or_default())
        };
        ScopeTxn {
            scope,
            ledger: cell.lock_owned().await,
        }
    }

    /// Drops the ledger of a scope whose parent no longer exists.
    pub fn forget(&self, scope: ScopeKey) {
        let mut scopes = self.scopes.lock().unwrap_or_else(PoisonError::into_inner);
        if scopes.remove(&scope).is_some() {
            debug!(%scope, "Forgot scope ledger");
        }
    }

    /// Number of scopes with a ledger.
    #[must_use]
    pub fn tracked_scopes(&self) -> usize {
        self.scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive access to one scope. Released on drop.
#[derive(Debug)]
pub struct ScopeTxn {
    scope: ScopeKey,
    ledger: OwnedMutexGuard<ScopeLedger>,
}

impl ScopeTxn {
    /// The scope this transaction holds.
    #[must_use]
    pub const fn scope(&self) -> ScopeKey {
        self.scope
    }

    /// Checks `slots` against the ledger without changing anything.
    ///
    /// Returns the sibling count.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::PositionConflict` if the count differs from the
    /// recorded one or the positions are not exactly `1..=N`.
    pub fn check(&self, slots: &[Slot]) -> Result<u32> {
        let count = count_of(slots);
        if let Some(recorded) = self.ledger.recorded_max {
            if recorded != count {
                warn!(scope = %self.scope, recorded, count, "Sibling count changed outside the scope lock");
                return Err(ForgeError::position_conflict(self.scope));
            }
        }
        if !is_contiguous(slots) {
            warn!(scope = %self.scope, count, "Sibling positions are not contiguous");
            return Err(ForgeError::position_conflict(self.scope));
        }
        Ok(count)
    }

    /// Plans an insert and records the new sibling count.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::PositionConflict` if `slots` disagree with the ledger.
    pub fn insert_at(&mut self, slots: &[Slot], desired: u32) -> Result<(u32, Vec<Reassignment>)> {
        let count = self.check(slots)?;
        let plan = plan_insert(slots, desired);
        self.ledger.recorded_max = Some(count + 1);
        Ok(plan)
    }

    /// Plans a delete and records the new sibling count.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::PositionConflict` if `slots` disagree with the ledger,
    /// or `ForgeError::PositionOutOfRange` if `position` is not held.
    pub fn delete_at(&mut self, slots: &[Slot], position: u32) -> Result<(Uuid, Vec<Reassignment>)> {
        let count = self.check(slots)?;
        let plan = plan_delete(slots, position)?;
        self.ledger.recorded_max = Some(count - 1);
        Ok(plan)
    }

    /// Plans a move. The sibling count is unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::PositionConflict` if `slots` disagree with the ledger,
    /// or `ForgeError::PositionOutOfRange` if `from` is not held.
    pub fn move_to(
        &mut self,
        slots: &[Slot],
        from: u32,
        to: u32,
    ) -> Result<(u32, Vec<Reassignment>)> {
        let count = self.check(slots)?;
        let plan = plan_move(slots, from, to)?;
        self.ledger.recorded_max = Some(count);
        Ok(plan)
    }
}
