//! Canonical local step variants.
//!
//! Every step stores exactly one [`StepVariant`]. The payload structs carry
//! the defaults the remote platform applies when a field is omitted, so a
//! REST client may send a partial payload and still get a complete block.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::CodecError;

// ============================================================================
// StepKind
// ============================================================================

/// The eighteen step kinds, without payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    /// Plain HTML text.
    Text,
    /// Video with one or more renditions.
    Video,
    /// Single or multiple choice quiz.
    Choice,
    /// Put options into the right order.
    Sorting,
    /// Match left items to right items.
    Matching,
    /// Grid of row/column checkmarks.
    Table,
    /// Text with inline inputs and drop-downs.
    FillBlanks,
    /// Numeric answer with tolerance.
    Number,
    /// Symbolic math formula answer.
    Math,
    /// Free text compared against a pattern.
    #[serde(rename = "string")]
    StringAnswer,
    /// Essay answer, optionally peer or manually scored.
    FreeAnswer,
    /// Programming exercise with test cases.
    Code,
    /// SQL query exercise.
    Sql,
    /// Generated dataset to be processed offline.
    Dataset,
    /// Randomized parametric task.
    RandomTasks,
    /// Chemical equation answer.
    Chemical,
    /// Arrange words into a sentence or expression.
    Puzzle,
    /// Schulte table attention exercise.
    Schulte,
}

impl StepKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 18] = [
        Self::Text,
        Self::Video,
        Self::Choice,
        Self::Sorting,
        Self::Matching,
        Self::Table,
        Self::FillBlanks,
        Self::Number,
        Self::Math,
        Self::StringAnswer,
        Self::FreeAnswer,
        Self::Code,
        Self::Sql,
        Self::Dataset,
        Self::RandomTasks,
        Self::Chemical,
        Self::Puzzle,
        Self::Schulte,
    ];

    /// The platform's name for this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Video => "video",
            Self::Choice => "choice",
            Self::Sorting => "sorting",
            Self::Matching => "matching",
            Self::Table => "table",
            Self::FillBlanks => "fill-blanks",
            Self::Number => "number",
            Self::Math => "math",
            Self::StringAnswer => "string",
            Self::FreeAnswer => "free-answer",
            Self::Code => "code",
            Self::Sql => "sql",
            Self::Dataset => "dataset",
            Self::RandomTasks => "random-tasks",
            Self::Chemical => "chemical",
            Self::Puzzle => "puzzle",
            Self::Schulte => "schulte",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// StepVariant
// ============================================================================

/// A step's kind together with its kind-specific payload.
///
/// Serialized adjacently tagged: `{"kind": "choice", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum StepVariant {
    /// Plain text; the statement is the whole content.
    Text,
    /// Video rendition list.
    Video(VideoBlock),
    /// Choice quiz.
    Choice(ChoiceBlock),
    /// Sorting quiz.
    Sorting(SortingBlock),
    /// Matching quiz.
    Matching(MatchingBlock),
    /// Table quiz.
    Table(TableBlock),
    /// Fill-in-the-blanks quiz.
    FillBlanks(FillBlanksBlock),
    /// Numeric answer quiz.
    Number(NumberBlock),
    /// Math formula quiz.
    Math(MathBlock),
    /// String pattern quiz.
    #[serde(rename = "string")]
    StringAnswer(StringBlock),
    /// Free answer.
    FreeAnswer(FreeAnswerBlock),
    /// Programming exercise.
    Code(CodeBlock),
    /// SQL exercise.
    Sql(SqlBlock),
    /// Dataset exercise.
    Dataset(DatasetBlock),
    /// Randomized task.
    RandomTasks(RandomTasksBlock),
    /// Chemical equation.
    Chemical(ChemicalBlock),
    /// Word puzzle.
    Puzzle(PuzzleBlock),
    /// Schulte table.
    Schulte(SchulteBlock),
}

impl StepVariant {
    /// Returns the kind tag of this variant.
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        match self {
            Self::Text => StepKind::Text,
            Self::Video(_) => StepKind::Video,
            Self::Choice(_) => StepKind::Choice,
            Self::Sorting(_) => StepKind::Sorting,
            Self::Matching(_) => StepKind::Matching,
            Self::Table(_) => StepKind::Table,
            Self::FillBlanks(_) => StepKind::FillBlanks,
            Self::Number(_) => StepKind::Number,
            Self::Math(_) => StepKind::Math,
            Self::StringAnswer(_) => StepKind::StringAnswer,
            Self::FreeAnswer(_) => StepKind::FreeAnswer,
            Self::Code(_) => StepKind::Code,
            Self::Sql(_) => StepKind::Sql,
            Self::Dataset(_) => StepKind::Dataset,
            Self::RandomTasks(_) => StepKind::RandomTasks,
            Self::Chemical(_) => StepKind::Chemical,
            Self::Puzzle(_) => StepKind::Puzzle,
            Self::Schulte(_) => StepKind::Schulte,
        }
    }

    /// Checks structural sanity of the payload before it is stored.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidPayload`] describing the first problem found.
    pub fn validate(&self) -> Result<(), CodecError> {
        let kind = self.kind();
        let fail = |message: &str| Err(CodecError::invalid_payload(kind, message));

        match self {
            Self::Text | Self::FreeAnswer(_) | Self::Sql(_) | Self::Dataset(_) => Ok(()),
            Self::Video(video) => {
                if video.urls.is_empty() {
                    return fail("video needs at least one url");
                }
                Ok(())
            }
            Self::Choice(choice) => {
                if choice.options.is_empty() {
                    return fail("choice needs at least one option");
                }
                if choice.sample_size == 0 {
                    return fail("sampleSize must be greater than 0");
                }
                if !choice.is_always_correct && !choice.options.iter().any(|o| o.is_correct) {
                    return fail("at least one option must be marked correct");
                }
                Ok(())
            }
            Self::Sorting(sorting) => {
                if sorting.options.len() < 2 {
                    return fail("sorting needs at least two options");
                }
                Ok(())
            }
            Self::Matching(matching) => {
                if matching.pairs.is_empty() {
                    return fail("matching needs at least one pair");
                }
                Ok(())
            }
            Self::Table(table) => {
                if table.columns.is_empty() || table.rows.is_empty() {
                    return fail("table needs at least one row and one column");
                }
                if let Some(row) = table.rows.iter().find(|r| r.cells.len() != table.columns.len())
                {
                    return Err(CodecError::invalid_payload(
                        kind,
                        format!(
                            "row '{}' has {} cells but the table has {} columns",
                            row.name,
                            row.cells.len(),
                            table.columns.len()
                        ),
                    ));
                }
                Ok(())
            }
            Self::FillBlanks(blanks) => {
                if !blanks
                    .components
                    .iter()
                    .any(|c| c.kind != BlankKind::Text)
                {
                    return fail("fill-blanks needs at least one input or select component");
                }
                Ok(())
            }
            Self::Number(number) => {
                if number.answers.is_empty() {
                    return fail("number needs at least one accepted answer");
                }
                if number
                    .answers
                    .iter()
                    .any(|a| !a.answer.is_finite() || !a.max_error.is_finite())
                {
                    return fail("answers must be finite numbers");
                }
                if number.answers.iter().any(|a| a.max_error < 0.0) {
                    return fail("maxError must not be negative");
                }
                Ok(())
            }
            Self::Math(math) => {
                if math.answer.trim().is_empty() {
                    return fail("math answer must not be empty");
                }
                let test = &math.numerical_test;
                if ![test.z_re_min, test.z_re_max, test.z_im_min, test.z_im_max, test.max_error]
                    .iter()
                    .all(|v| v.is_finite())
                {
                    return fail("numerical test bounds must be finite numbers");
                }
                Ok(())
            }
            Self::StringAnswer(string) => {
                if string.pattern.is_empty() {
                    return fail("pattern must not be empty");
                }
                Ok(())
            }
            Self::Code(code) => {
                if code.test_cases.is_empty() {
                    return fail("code needs at least one test case");
                }
                if code.execution_time_limit == 0 || code.execution_memory_limit == 0 {
                    return fail("execution limits must be greater than 0");
                }
                // `::` starts a language header in the platform's template data
                if let Some(language) = code
                    .templates
                    .iter()
                    .find(|(_, body)| body.lines().any(|line| line.starts_with("::")))
                    .map(|(language, _)| language)
                {
                    return Err(CodecError::invalid_payload(
                        kind,
                        format!("template '{language}' has a line starting with '::'"),
                    ));
                }
                Ok(())
            }
            Self::RandomTasks(tasks) => {
                if tasks.task.trim().is_empty() || tasks.solve.trim().is_empty() {
                    return fail("random-tasks needs both a task and a solver");
                }
                if !tasks.max_error.is_finite() {
                    return fail("maxError must be a finite number");
                }
                Ok(())
            }
            Self::Chemical(chemical) => {
                if chemical.expression.trim().is_empty() {
                    return fail("expression must not be empty");
                }
                Ok(())
            }
            Self::Puzzle(puzzle) => {
                if puzzle.words.is_empty() {
                    return fail("puzzle needs at least one word");
                }
                Ok(())
            }
            Self::Schulte(schulte) => {
                if !(2..=10).contains(&schulte.grid_size) {
                    return fail("gridSize must be between 2 and 10");
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// Defaults
// ============================================================================

/// Default number of options shown to a learner in sampled quizzes.
pub const DEFAULT_SAMPLE_SIZE: u32 = 4;

/// Default execution time limit for code steps, in seconds.
pub const DEFAULT_TIME_LIMIT_SECS: u32 = 5;

/// Default execution memory limit for code steps, in megabytes.
pub const DEFAULT_MEMORY_LIMIT_MB: u32 = 256;

/// Default Schulte grid size.
pub const DEFAULT_GRID_SIZE: u32 = 5;

// ============================================================================
// Payloads
// ============================================================================

/// Video step payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoBlock {
    /// Available renditions.
    pub urls: Vec<VideoSource>,
    /// Optional poster image URL.
    pub thumbnail: Option<String>,
}

/// A single video rendition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoSource {
    /// Rendition URL.
    pub url: String,
    /// Quality label, e.g. `720`.
    pub quality: String,
}

/// Choice quiz payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct ChoiceBlock {
    /// Options in authoring order.
    pub options: Vec<ChoiceOption>,
    /// Whether several options may be selected.
    pub is_multiple_choice: bool,
    /// Whether any answer is accepted (surveys).
    pub is_always_correct: bool,
    /// How many options are sampled for each attempt.
    pub sample_size: u32,
    /// Keep authoring order instead of shuffling.
    pub preserve_order: bool,
    /// Render option text as HTML.
    pub is_html_enabled: bool,
    /// Show per-option feedback.
    pub is_options_feedback: bool,
}

impl Default for ChoiceBlock {
    fn default() -> Self {
        Self {
            options: Vec::new(),
            is_multiple_choice: false,
            is_always_correct: false,
            sample_size: DEFAULT_SAMPLE_SIZE,
            preserve_order: false,
            is_html_enabled: true,
            is_options_feedback: false,
        }
    }
}

/// A single choice option.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChoiceOption {
    /// Option text.
    pub text: String,
    /// Whether selecting it is correct.
    pub is_correct: bool,
    /// Feedback shown when the option is picked.
    pub feedback: String,
}

impl ChoiceOption {
    /// Creates an option without feedback.
    #[must_use]
    pub fn new(text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            text: text.into(),
            is_correct,
            feedback: String::new(),
        }
    }
}

/// Sorting quiz payload. Options are stored in the correct order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SortingBlock {
    /// Options in correct order.
    pub options: Vec<String>,
    /// Render option text as HTML.
    pub is_html_enabled: bool,
}

impl Default for SortingBlock {
    fn default() -> Self {
        Self {
            options: Vec::new(),
            is_html_enabled: true,
        }
    }
}

/// Matching quiz payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MatchingBlock {
    /// Correct pairs.
    pub pairs: Vec<MatchingPair>,
    /// Keep the left column in authoring order.
    pub preserve_firsts_order: bool,
    /// Render item text as HTML.
    pub is_html_enabled: bool,
}

impl Default for MatchingBlock {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            preserve_firsts_order: true,
            is_html_enabled: true,
        }
    }
}

/// One left/right pair of a matching quiz.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MatchingPair {
    /// Left item.
    pub first: String,
    /// Right item.
    pub second: String,
}

/// Table quiz payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableBlock {
    /// Caption of the row header column.
    pub description: String,
    /// Column headers.
    pub columns: Vec<String>,
    /// Rows with one checkmark cell per column.
    pub rows: Vec<TableRow>,
    /// Allow several checks per row.
    pub is_checkbox: bool,
    /// Shuffle rows for each attempt.
    pub is_randomize_rows: bool,
    /// Shuffle columns for each attempt.
    pub is_randomize_columns: bool,
    /// How many rows are sampled for each attempt.
    pub sample_size: u32,
}

impl Default for TableBlock {
    fn default() -> Self {
        Self {
            description: String::new(),
            columns: Vec::new(),
            rows: Vec::new(),
            is_checkbox: false,
            is_randomize_rows: false,
            is_randomize_columns: false,
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

/// A table row and its correct cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TableRow {
    /// Row header.
    pub name: String,
    /// Correctness of each cell, one per column.
    pub cells: Vec<bool>,
}

/// Fill-in-the-blanks payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FillBlanksBlock {
    /// Text fragments and blanks in reading order.
    pub components: Vec<BlankComponent>,
    /// Compare typed answers case-sensitively.
    pub is_case_sensitive: bool,
    /// Report which blanks are wrong.
    pub is_detailed_feedback: bool,
    /// Give partial credit.
    pub is_partially_correct: bool,
}

/// A component of a fill-blanks step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlankComponent {
    /// Component kind.
    pub kind: BlankKind,
    /// Literal text for [`BlankKind::Text`]; ignored otherwise.
    #[serde(default)]
    pub text: String,
    /// Accepted answers (input) or drop-down entries (select).
    #[serde(default)]
    pub options: Vec<BlankOption>,
}

/// Kind of fill-blanks component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlankKind {
    /// Static text.
    Text,
    /// Free text input.
    Input,
    /// Drop-down list.
    Select,
}

/// An answer option of a blank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlankOption {
    /// Option text.
    pub text: String,
    /// Whether it is accepted.
    pub is_correct: bool,
}

/// Numeric answer payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NumberBlock {
    /// Accepted answers with tolerances.
    pub answers: Vec<NumericAnswer>,
}

/// An accepted numeric answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NumericAnswer {
    /// Expected value.
    pub answer: f64,
    /// Absolute tolerance.
    pub max_error: f64,
}

/// Math formula payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MathBlock {
    /// Reference formula.
    pub answer: String,
    /// Numerical comparison settings.
    pub numerical_test: NumericalTest,
}

/// Range and tolerance used to compare formulas numerically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NumericalTest {
    /// Real part lower bound.
    pub z_re_min: f64,
    /// Real part upper bound.
    pub z_re_max: f64,
    /// Imaginary part lower bound.
    pub z_im_min: f64,
    /// Imaginary part upper bound.
    pub z_im_max: f64,
    /// Allowed error.
    pub max_error: f64,
    /// Sample integers only.
    pub integer_only: bool,
}

impl Default for NumericalTest {
    fn default() -> Self {
        Self {
            z_re_min: 2.0,
            z_re_max: 3.0,
            z_im_min: 0.0,
            z_im_max: 0.0,
            max_error: 1e-6,
            integer_only: false,
        }
    }
}

/// String answer payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StringBlock {
    /// Expected answer or regular expression.
    pub pattern: String,
    /// Compare case-sensitively.
    pub case_sensitive: bool,
    /// Treat `pattern` as a regular expression.
    pub use_re: bool,
    /// Accept answers containing the pattern.
    pub match_substring: bool,
}

/// Free answer payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FreeAnswerBlock {
    /// Learners may attach files.
    pub is_attachments_enabled: bool,
    /// Answers are rich text.
    pub is_html_enabled: bool,
    /// A reviewer scores answers by hand.
    pub manual_scoring: bool,
}

impl Default for FreeAnswerBlock {
    fn default() -> Self {
        Self {
            is_attachments_enabled: false,
            is_html_enabled: true,
            manual_scoring: false,
        }
    }
}

/// Programming exercise payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodeBlock {
    /// Language of the reference solution.
    pub language: String,
    /// Reference solution.
    pub reference_code: String,
    /// Starter code per language.
    pub templates: BTreeMap<String, String>,
    /// Input/output test cases.
    pub test_cases: Vec<CodeTestCase>,
    /// Time limit in seconds.
    pub execution_time_limit: u32,
    /// Memory limit in megabytes.
    pub execution_memory_limit: u32,
    /// How many leading test cases are shown as samples.
    pub samples_count: u32,
    /// Run every test even after a failure.
    pub are_all_tests_run: bool,
    /// Score each test separately.
    pub are_all_tests_scored: bool,
}

impl Default for CodeBlock {
    fn default() -> Self {
        Self {
            language: "python3".to_string(),
            reference_code: String::new(),
            templates: BTreeMap::new(),
            test_cases: Vec::new(),
            execution_time_limit: DEFAULT_TIME_LIMIT_SECS,
            execution_memory_limit: DEFAULT_MEMORY_LIMIT_MB,
            samples_count: 1,
            are_all_tests_run: false,
            are_all_tests_scored: false,
        }
    }
}

/// A code test case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CodeTestCase {
    /// Standard input.
    pub input: String,
    /// Expected standard output.
    pub output: String,
}

impl CodeTestCase {
    /// Creates a test case.
    #[must_use]
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

/// SQL exercise payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SqlBlock {
    /// Schema and fixture script run before the learner's query.
    pub sql_code: String,
    /// Reference query.
    pub solve_sql: String,
}

/// Dataset exercise payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatasetBlock {
    /// Generator and checker script.
    pub generator_code: String,
    /// Hide the download link and show the dataset inline.
    pub is_file_disabled: bool,
}

/// Randomized task payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RandomTasksBlock {
    /// Task template with placeholders.
    pub task: String,
    /// Solver expression.
    pub solve: String,
    /// Allowed error.
    pub max_error: f64,
    /// Number of parameter combinations.
    pub combinations: u32,
}

impl Default for RandomTasksBlock {
    fn default() -> Self {
        Self {
            task: String::new(),
            solve: String::new(),
            max_error: 0.0,
            combinations: 1,
        }
    }
}

/// Chemical equation payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChemicalBlock {
    /// Reference equation.
    pub expression: String,
    /// Species offered as building blocks.
    pub template: Vec<String>,
}

/// Word puzzle payload. Words are stored in the correct order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PuzzleBlock {
    /// Words in correct order.
    pub words: Vec<String>,
}

/// Schulte table payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchulteBlock {
    /// Grid edge length.
    pub grid_size: u32,
    /// Shuffle numbers for each attempt.
    pub is_random: bool,
}

impl Default for SchulteBlock {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            is_random: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_unique() {
        let mut names: Vec<_> = StepKind::ALL.iter().map(StepKind::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 18);
    }

    #[test]
    fn test_kind_serde_matches_as_str() {
        for kind in StepKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_choice_defaults() {
        let choice = ChoiceBlock::default();
        assert_eq!(choice.sample_size, 4);
        assert!(choice.is_html_enabled);
        assert!(!choice.is_multiple_choice);
    }

    #[test]
    fn test_partial_payload_gets_defaults() {
        let json = r#"{"kind": "choice", "payload": {"options": [{"text": "a", "isCorrect": true}]}}"#;
        let variant: StepVariant = serde_json::from_str(json).unwrap();
        let StepVariant::Choice(choice) = variant else {
            unreachable!("expected choice");
        };
        assert_eq!(choice.sample_size, DEFAULT_SAMPLE_SIZE);
        assert!(choice.is_html_enabled);
        assert_eq!(choice.options[0].feedback, "");
    }

    #[test]
    fn test_text_variant_serialization() {
        let json = serde_json::to_string(&StepVariant::Text).unwrap();
        assert_eq!(json, r#"{"kind":"text"}"#);
        let string = StepVariant::StringAnswer(StringBlock::default());
        assert!(serde_json::to_string(&string).unwrap().contains(r#""kind":"string""#));
    }

    #[test]
    fn test_validate_choice_requires_correct_option() {
        let choice = StepVariant::Choice(ChoiceBlock {
            options: vec![ChoiceOption::new("a", false), ChoiceOption::new("b", false)],
            ..Default::default()
        });
        let err = choice.validate().unwrap_err();
        assert!(err.to_string().contains("marked correct"));

        let survey = StepVariant::Choice(ChoiceBlock {
            options: vec![ChoiceOption::new("a", false)],
            is_always_correct: true,
            ..Default::default()
        });
        assert!(survey.validate().is_ok());
    }

    #[test]
    fn test_validate_table_cell_matrix() {
        let table = StepVariant::Table(TableBlock {
            columns: vec!["yes".into(), "no".into(), "maybe".into()],
            rows: vec![TableRow {
                name: "row".into(),
                cells: vec![true, false],
            }],
            ..Default::default()
        });
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("2 cells"));
    }

    #[test]
    fn test_validate_fill_blanks_needs_blank() {
        let blanks = StepVariant::FillBlanks(FillBlanksBlock {
            components: vec![BlankComponent {
                kind: BlankKind::Text,
                text: "only text".into(),
                options: vec![],
            }],
            ..Default::default()
        });
        assert!(blanks.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_numbers() {
        let number = |answer: f64, max_error: f64| {
            StepVariant::Number(NumberBlock {
                answers: vec![NumericAnswer { answer, max_error }],
            })
        };
        assert!(number(3.5, 0.1).validate().is_ok());
        for bad in [number(f64::NAN, 0.1), number(1.0, f64::INFINITY)] {
            let err = bad.validate().unwrap_err();
            assert!(err.to_string().contains("finite"));
        }

        let mut math = MathBlock {
            answer: "x^2".into(),
            ..Default::default()
        };
        assert!(StepVariant::Math(math.clone()).validate().is_ok());
        math.numerical_test.z_re_max = f64::INFINITY;
        assert!(StepVariant::Math(math).validate().is_err());

        let tasks = RandomTasksBlock {
            task: "{a} + {b}".into(),
            solve: "a + b".into(),
            max_error: f64::NEG_INFINITY,
            ..Default::default()
        };
        assert!(StepVariant::RandomTasks(tasks).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_template_header_lines() {
        let mut code = CodeBlock {
            test_cases: vec![CodeTestCase::new("1", "1")],
            ..Default::default()
        };
        code.templates
            .insert("cpp".into(), "int main() {\n  std::cout << 1;\n}".into());
        assert!(StepVariant::Code(code.clone()).validate().is_ok());

        code.templates
            .insert("cpp".into(), "int main() {\n::std::cout << 1;\n}".into());
        let err = StepVariant::Code(code).validate().unwrap_err();
        assert!(err.to_string().contains("template 'cpp'"));
    }

    #[test]
    fn test_validate_accepts_text() {
        assert!(StepVariant::Text.validate().is_ok());
    }
}
