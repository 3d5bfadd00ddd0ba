//! Remote block wire shapes.
//!
//! The platform sends a block as `{"text": ..., "video": ..., "source": ...}`
//! with no explicit type field. The structs here mirror the per-kind
//! `source` objects field for field (snake_case, as the platform spells
//! them). Missing fields fall back to the platform defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::variant::{DEFAULT_GRID_SIZE, DEFAULT_MEMORY_LIMIT_MB, DEFAULT_SAMPLE_SIZE, DEFAULT_TIME_LIMIT_SECS};

/// A step block as exchanged with the remote platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteBlock {
    /// Statement HTML.
    #[serde(default)]
    pub text: String,
    /// Video descriptor, present only for video steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Value>,
    /// Kind-specific source object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Value>,
}

const fn yes() -> bool {
    true
}

const fn sample_size() -> u32 {
    DEFAULT_SAMPLE_SIZE
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct WireVideo {
    #[serde(default)]
    pub urls: Vec<WireVideoUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct WireVideoUrl {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub quality: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct ChoiceSource {
    #[serde(default)]
    pub options: Vec<ChoiceSourceOption>,
    #[serde(default)]
    pub is_multiple_choice: bool,
    #[serde(default)]
    pub is_always_correct: bool,
    #[serde(default = "sample_size")]
    pub sample_size: u32,
    #[serde(default)]
    pub preserve_order: bool,
    #[serde(default = "yes")]
    pub is_html_enabled: bool,
    #[serde(default)]
    pub is_options_feedback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChoiceSourceOption {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SortingSource {
    #[serde(default)]
    pub options: Vec<TextItem>,
    #[serde(default = "yes")]
    pub is_html_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TextItem {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MatchingSource {
    #[serde(default)]
    pub pairs: Vec<WirePair>,
    #[serde(default = "yes")]
    pub preserve_firsts_order: bool,
    #[serde(default = "yes")]
    pub is_html_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WirePair {
    #[serde(default)]
    pub first: String,
    #[serde(default)]
    pub second: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TableSource {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<TableColumn>,
    #[serde(default)]
    pub rows: Vec<WireTableRow>,
    #[serde(default)]
    pub options: TableOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TableColumn {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireTableRow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub columns: Vec<TableCell>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TableCell {
    #[serde(default)]
    pub choice: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TableOptions {
    #[serde(default)]
    pub is_checkbox: bool,
    #[serde(default)]
    pub is_randomize_rows: bool,
    #[serde(default)]
    pub is_randomize_columns: bool,
    #[serde(default = "sample_size")]
    pub sample_size: u32,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            is_checkbox: false,
            is_randomize_rows: false,
            is_randomize_columns: false,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FillBlanksSource {
    #[serde(default)]
    pub components: Vec<WireComponent>,
    #[serde(default)]
    pub is_case_sensitive: bool,
    #[serde(default)]
    pub is_detailed_feedback: bool,
    #[serde(default)]
    pub is_partially_correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireComponent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub options: Vec<WireBlankOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireBlankOption {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

/// The platform sends numeric answers as decimal strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NumberSource {
    #[serde(default)]
    pub options: Vec<NumberOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NumberOption {
    pub answer: String,
    #[serde(default)]
    pub max_error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MathSource {
    #[serde(default)]
    pub answer: String,
    pub numerical_test: WireNumericalTest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireNumericalTest {
    pub z_re_min: f64,
    pub z_re_max: f64,
    #[serde(default)]
    pub z_im_min: f64,
    #[serde(default)]
    pub z_im_max: f64,
    pub max_error: f64,
    #[serde(default)]
    pub integer_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StringSource {
    pub pattern: String,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub use_re: bool,
    #[serde(default)]
    pub match_substring: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FreeAnswerSource {
    #[serde(default)]
    pub is_attachments_enabled: bool,
    #[serde(default = "yes")]
    pub is_html_enabled: bool,
    #[serde(default)]
    pub manual_scoring: bool,
}

const fn time_limit() -> u32 {
    DEFAULT_TIME_LIMIT_SECS
}

const fn memory_limit() -> u32 {
    DEFAULT_MEMORY_LIMIT_MB
}

const fn one() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CodeSource {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub templates_data: String,
    /// Pairs of `[input, output]`.
    #[serde(default)]
    pub test_cases: Vec<(String, String)>,
    #[serde(default = "time_limit")]
    pub execution_time_limit: u32,
    #[serde(default = "memory_limit")]
    pub execution_memory_limit: u32,
    #[serde(default = "one")]
    pub samples_count: u32,
    #[serde(default)]
    pub are_all_tests_run: bool,
    #[serde(default)]
    pub are_all_tests_scored: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SqlSource {
    #[serde(default)]
    pub sql_code: String,
    pub solve_sql: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DatasetSource {
    #[serde(default)]
    pub code: String,
    pub is_file_disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RandomTasksSource {
    pub task: String,
    pub solve: String,
    #[serde(default)]
    pub max_error: f64,
    #[serde(default = "one")]
    pub combinations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ChemicalSource {
    pub expression: String,
    #[serde(default)]
    pub template: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PuzzleSource {
    #[serde(default)]
    pub words: Vec<TextItem>,
}

const fn grid_size() -> u32 {
    DEFAULT_GRID_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SchulteSource {
    #[serde(default = "grid_size")]
    pub grid_size: u32,
    #[serde(default = "yes")]
    pub is_random: bool,
}
