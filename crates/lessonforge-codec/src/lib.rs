//! LessonForge step block codec
//!
//! Translates between the canonical local [`StepVariant`] and the remote
//! platform's block format. The platform does not label blocks with a type;
//! [`classify`] recognizes the kind from the shape of the `source` object.
//!
//! # Example
//!
//! ```rust
//! use lessonforge_codec::{decode, encode, SortingBlock, StepVariant};
//!
//! let variant = StepVariant::Sorting(SortingBlock {
//!     options: vec!["a".into(), "b".into(), "c".into()],
//!     is_html_enabled: true,
//! });
//!
//! let block = encode("<p>Put in order</p>", &variant).unwrap();
//! let decoded = decode(&block).unwrap();
//! assert_eq!(decoded.variant, variant);
//! assert!(decoded.preview.is_none());
//! ```

mod decode;
mod encode;
pub mod markup;
mod variant;
mod wire;

pub use decode::{classify, decode, decode_value, DecodedBlock};
pub use encode::encode;
pub use variant::{
    BlankComponent, BlankKind, BlankOption, ChemicalBlock, ChoiceBlock, ChoiceOption, CodeBlock,
    CodeTestCase, DatasetBlock, FillBlanksBlock, FreeAnswerBlock, MatchingBlock, MatchingPair,
    MathBlock, NumberBlock, NumericAnswer, NumericalTest, PuzzleBlock, RandomTasksBlock,
    SchulteBlock, SortingBlock, SqlBlock, StepKind, StepVariant, StringBlock, TableBlock,
    TableRow, VideoBlock, VideoSource, DEFAULT_GRID_SIZE, DEFAULT_MEMORY_LIMIT_MB,
    DEFAULT_SAMPLE_SIZE, DEFAULT_TIME_LIMIT_SECS,
};
pub use wire::RemoteBlock;

use thiserror::Error;

/// Errors raised while translating step blocks.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The remote block's shape matches none of the known kinds.
    #[error("unknown step variant: no known block shape matches {shape}")]
    UnknownStepVariant {
        /// Description of the shape that was seen (source keys or type).
        shape: String,
    },

    /// The shape was recognized but the source could not be read.
    #[error("malformed {kind} block: {message}")]
    MalformedSource {
        /// The recognized kind.
        kind: StepKind,
        /// What was wrong.
        message: String,
    },

    /// A local payload fails structural validation.
    #[error("invalid {kind} payload: {message}")]
    InvalidPayload {
        /// Kind of the offending variant.
        kind: StepKind,
        /// What was wrong.
        message: String,
    },

    /// JSON conversion failed.
    #[error("block serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CodecError {
    /// Creates an `UnknownStepVariant` error.
    #[must_use]
    pub fn unknown(shape: impl Into<String>) -> Self {
        Self::UnknownStepVariant {
            shape: shape.into(),
        }
    }

    /// Creates a `MalformedSource` error.
    #[must_use]
    pub fn malformed(kind: StepKind, message: impl Into<String>) -> Self {
        Self::MalformedSource {
            kind,
            message: message.into(),
        }
    }

    /// Creates an `InvalidPayload` error.
    #[must_use]
    pub fn invalid_payload(kind: StepKind, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            kind,
            message: message.into(),
        }
    }
}
