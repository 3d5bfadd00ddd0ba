//! Error types for the LessonForge orchestrator.
//!
//! Covers configuration loading, the local hierarchy store, sibling ordering,
//! remote synchronisation and snapshot persistence.

use std::path::PathBuf;

use lessonforge_codec::CodecError;
use lessonforge_remote::{RemoteError, RemoteId};

use crate::model::EntityKind;

/// A specialized `Result` type for orchestrator operations.
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Errors that can occur while authoring or publishing content.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your lessonforge.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Ordering Errors
    // ========================================================================
    /// Sibling positions changed underneath a transaction.
    #[error("Position conflict in {scope}: sibling positions changed concurrently, retry the request")]
    PositionConflict {
        /// The scope whose ledger disagreed with the stored rows.
        scope: String,
    },

    /// A position outside `1..=count` was addressed.
    #[error("Position {position} is out of range (scope has {count} entries)")]
    PositionOutOfRange {
        /// The requested position.
        position: u32,
        /// Number of siblings in the scope.
        count: u32,
    },

    // ========================================================================
    // Store Errors
    // ========================================================================
    /// The entity does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of the missing entity.
        kind: EntityKind,
        /// Identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation failed: {message}\n\nSuggestion: {suggestion}")]
    Validation {
        /// What was wrong.
        message: String,
        /// How to fix it.
        suggestion: String,
    },

    /// A step payload was rejected before storing.
    #[error("Invalid step: {message}")]
    InvalidStep {
        /// What was wrong.
        message: String,
    },

    // ========================================================================
    // Sync Errors
    // ========================================================================
    /// The parent has not been published yet.
    #[error("Cannot publish {entity}: {dependency} is not published yet\n\nSuggestion: Publish the parent first")]
    DependencyNotReady {
        /// Entity that was asked to publish.
        entity: String,
        /// Parent that has no remote id.
        dependency: String,
    },

    /// A remote block matched none of the known step shapes.
    #[error("Unknown step variant: {detail}")]
    UnknownStepVariant {
        /// Description of the unrecognized shape.
        detail: String,
    },

    /// The remote platform could not be reached, timed out or failed with 5xx.
    #[error("Remote platform unavailable: {message}")]
    RemoteTransportFailure {
        /// Underlying failure.
        message: String,
    },

    /// The remote platform rejected the request.
    #[error("Remote platform rejected the request ({status}): {detail}")]
    RemoteValidationFailure {
        /// HTTP status returned by the platform.
        status: u16,
        /// Platform's explanation.
        detail: String,
    },

    /// The remote platform answered with something unreadable.
    #[error("Unexpected remote response: {message}")]
    RemoteProtocol {
        /// What could not be understood.
        message: String,
    },

    /// No credential for the remote platform was supplied or configured.
    #[error("No remote credential available\n\nSuggestion: Send an x-remote-token header or set LESSONFORGE_REMOTE_TOKEN")]
    MissingCredential,

    /// An entity is already linked to a different remote id.
    #[error("{entity} is already linked to remote id {existing}, refusing to relink to {attempted}")]
    RemoteIdConflict {
        /// Entity being linked.
        entity: String,
        /// Remote id already recorded.
        existing: RemoteId,
        /// Remote id that was offered.
        attempted: RemoteId,
    },

    /// The entity is being published by another request.
    #[error("{entity} is busy: a publish is in progress")]
    Busy {
        /// Entity that is in flight.
        entity: String,
    },

    /// The publish was cancelled before it finished.
    #[error("Publishing {entity} was cancelled")]
    Cancelled {
        /// Entity whose publish was cancelled.
        entity: String,
    },

    // ========================================================================
    // State Persistence Errors
    // ========================================================================
    /// Snapshot file contains malformed JSON.
    #[error("Corrupted state file '{path}': {message}\n\nSuggestion: Remove the state file to start fresh, or restore from backup")]
    StateFileCorrupted {
        /// Path to the corrupted state file.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid sync state transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },
}

impl ForgeError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `PositionConflict` error.
    #[must_use]
    pub fn position_conflict(scope: impl std::fmt::Display) -> Self {
        Self::PositionConflict {
            scope: scope.to_string(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(kind: EntityKind, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Creates a new `Validation` error.
    #[must_use]
    pub fn validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `DependencyNotReady` error.
    #[must_use]
    pub fn dependency_not_ready(
        entity: impl std::fmt::Display,
        dependency: impl std::fmt::Display,
    ) -> Self {
        Self::DependencyNotReady {
            entity: entity.to_string(),
            dependency: dependency.to_string(),
        }
    }

    /// Creates a new `RemoteIdConflict` error.
    #[must_use]
    pub fn remote_id_conflict(
        entity: impl std::fmt::Display,
        existing: RemoteId,
        attempted: RemoteId,
    ) -> Self {
        Self::RemoteIdConflict {
            entity: entity.to_string(),
            existing,
            attempted,
        }
    }

    /// Creates a new `Busy` error.
    #[must_use]
    pub fn busy(entity: impl std::fmt::Display) -> Self {
        Self::Busy {
            entity: entity.to_string(),
        }
    }

    /// Creates a new `Cancelled` error.
    #[must_use]
    pub fn cancelled(entity: impl std::fmt::Display) -> Self {
        Self::Cancelled {
            entity: entity.to_string(),
        }
    }

    /// Creates a new `StateFileCorrupted` error.
    #[must_use]
    pub fn state_corrupted(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StateFileCorrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Returns `true` if repeating the same remote call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteTransportFailure { .. })
    }

    /// Returns `true` if the client may simply resend the request.
    #[must_use]
    pub const fn is_retryable_by_caller(&self) -> bool {
        matches!(
            self,
            Self::PositionConflict { .. }
                | Self::Busy { .. }
                | Self::Cancelled { .. }
                | Self::RemoteTransportFailure { .. }
        )
    }
}

impl From<RemoteError> for ForgeError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transport(_) | RemoteError::Timeout | RemoteError::Server { .. } => {
                Self::RemoteTransportFailure {
                    message: err.to_string(),
                }
            }
            RemoteError::Validation { status, detail } => {
                Self::RemoteValidationFailure { status, detail }
            }
            RemoteError::InvalidResponse(message) => Self::RemoteProtocol { message },
        }
    }
}

impl From<CodecError> for ForgeError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnknownStepVariant { .. } => Self::UnknownStepVariant {
                detail: err.to_string(),
            },
            CodecError::MalformedSource { .. } => Self::RemoteProtocol {
                message: err.to_string(),
            },
            CodecError::InvalidPayload { .. } => Self::InvalidStep {
                message: err.to_string(),
            },
            CodecError::Serialization(e) => Self::Json(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ForgeError::not_found(EntityKind::Section, "0190-abc");
        let msg = err.to_string();
        assert!(msg.contains("section not found"));
        assert!(msg.contains("0190-abc"));

        let err = ForgeError::dependency_not_ready("section 1", "course 2");
        assert!(err.to_string().contains("Suggestion"));
    }

    #[test]
    fn test_from_remote_error() {
        let err: ForgeError = RemoteError::Timeout.into();
        assert!(matches!(err, ForgeError::RemoteTransportFailure { .. }));
        assert!(err.is_transient());

        let err: ForgeError = RemoteError::Validation {
            status: 400,
            detail: "title required".into(),
        }
        .into();
        assert!(matches!(
            err,
            ForgeError::RemoteValidationFailure { status: 400, .. }
        ));
        assert!(!err.is_transient());

        let err: ForgeError = RemoteError::InvalidResponse("empty".into()).into();
        assert!(matches!(err, ForgeError::RemoteProtocol { .. }));
    }

    #[test]
    fn test_from_codec_error() {
        let err: ForgeError = CodecError::unknown("source keys [foo]").into();
        assert!(matches!(err, ForgeError::UnknownStepVariant { .. }));
        assert!(err.to_string().contains("foo"));
    }

    #[test]
    fn test_retryable_by_caller() {
        assert!(ForgeError::position_conflict("steps of lesson x").is_retryable_by_caller());
        assert!(ForgeError::busy("course y").is_retryable_by_caller());
        assert!(!ForgeError::MissingCredential.is_retryable_by_caller());
        assert!(!ForgeError::not_found(EntityKind::Step, "z").is_retryable_by_caller());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ForgeError = io_err.into();
        assert!(matches!(err, ForgeError::Io(_)));
    }
}
