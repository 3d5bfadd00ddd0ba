//! Remote synchronisation state for a single entity.
//!
//! Every course, section, lesson and step carries a [`SyncState`] that
//! records how far its publication got and why it stopped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ForgeError, Result};

// ============================================================================
// SyncStatus
// ============================================================================

/// Publication status of an entity.
///
/// The status transitions through these states:
/// - `LocalOnly` -> `RemotePending` -> `RemoteLinked`
/// - From `RemotePending`:
///   - `RemoteFailed` (the platform rejected a call, or retries ran out)
///   - `RemotePending` again (partial progress was recorded and can be resumed)
/// - `RemoteFailed` and a stalled `RemotePending` re-enter `RemotePending` on retry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Never published.
    #[default]
    LocalOnly,
    /// A publish started and has not reached the platform fully.
    RemotePending,
    /// The entity exists remotely and its remote id is recorded.
    RemoteLinked,
    /// The last publish attempt failed.
    RemoteFailed,
}

impl SyncStatus {
    /// Returns `true` if the entity is fully published.
    ///
    /// # Examples
    ///
    /// ```
    /// use lessonforge_orchestrator::SyncStatus;
    ///
    /// assert!(SyncStatus::RemoteLinked.is_linked());
    /// assert!(!SyncStatus::RemotePending.is_linked());
    /// ```
    #[must_use]
    pub const fn is_linked(&self) -> bool {
        matches!(self, Self::RemoteLinked)
    }

    /// Returns `true` if a publish may start from this status.
    #[must_use]
    pub const fn can_begin_publish(&self) -> bool {
        matches!(
            self,
            Self::LocalOnly | Self::RemotePending | Self::RemoteFailed
        )
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalOnly => write!(f, "local_only"),
            Self::RemotePending => write!(f, "remote_pending"),
            Self::RemoteLinked => write!(f, "remote_linked"),
            Self::RemoteFailed => write!(f, "remote_failed"),
        }
    }
}

// ============================================================================
// SyncState
// ============================================================================

/// Sync bookkeeping stored on each entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    /// Current status.
    pub status: SyncStatus,

    /// Detail of the last failure, cleared once linked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Number of publish attempts started.
    #[serde(default)]
    pub attempts: u32,

    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    /// Creates the state of a freshly created entity.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: SyncStatus::LocalOnly,
            last_error: None,
            attempts: 0,
            updated_at: Utc::now(),
        }
    }

    /// Enters `RemotePending` for a new attempt.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::InvalidStateTransition` if the entity is already linked.
    pub fn begin_publish(&mut self) -> Result<()> {
        if !self.status.can_begin_publish() {
            return Err(ForgeError::invalid_transition(
                self.status,
                SyncStatus::RemotePending,
            ));
        }
        self.status = SyncStatus::RemotePending;
        self.attempts = self.attempts.saturating_add(1);
        self.touch();
        Ok(())
    }

    /// Marks the entity as linked.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::InvalidStateTransition` unless the entity is pending.
    pub fn link(&mut self) -> Result<()> {
        self.require_pending(SyncStatus::RemoteLinked)?;
        self.status = SyncStatus::RemoteLinked;
        self.last_error = None;
        self.touch();
        Ok(())
    }

    /// Records a failed attempt.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::InvalidStateTransition` unless the entity is pending.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.require_pending(SyncStatus::RemoteFailed)?;
        self.status = SyncStatus::RemoteFailed;
        self.last_error = Some(error.into());
        self.touch();
        Ok(())
    }

    /// Records an interrupted attempt that made resumable progress.
    ///
    /// The entity stays `RemotePending` so the next publish resumes it.
    ///
    /// # Errors
    ///
    /// Returns `ForgeError::InvalidStateTransition` unless the entity is pending.
    pub fn stall(&mut self, error: impl Into<String>) -> Result<()> {
        self.require_pending(SyncStatus::RemotePending)?;
        self.last_error = Some(error.into());
        self.touch();
        Ok(())
    }

    fn require_pending(&self, to: SyncStatus) -> Result<()> {
        if self.status == SyncStatus::RemotePending {
            Ok(())
        } else {
            Err(ForgeError::invalid_transition(self.status, to))
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
