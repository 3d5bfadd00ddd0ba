//! Remote block → local variant.
//!
//! Blocks carry no type field, so the kind is recognized from the shape of
//! `source`. Shapes are tested in a fixed order and the first match wins:
//!
//! | order | evidence                                   | kind           |
//! |-------|--------------------------------------------|----------------|
//! | 1     | `video` is an object                       | video          |
//! | 2     | `source` absent, null or `{}`              | text           |
//! | 3     | `rows` and `columns`                       | table          |
//! | 4     | `pairs`                                    | matching       |
//! | 5     | `components`                               | fill-blanks    |
//! | 6     | `numerical_test`                           | math           |
//! | 7     | `test_cases`                               | code           |
//! | 8     | `solve_sql`                                | sql            |
//! | 9     | `is_file_disabled`                         | dataset        |
//! | 10    | `task` and `solve`                         | random-tasks   |
//! | 11    | `expression`                               | chemical       |
//! | 12    | `words`                                    | puzzle         |
//! | 13    | `grid_size`                                | schulte        |
//! | 14    | `pattern`                                  | string         |
//! | 15    | `manual_scoring`                           | free-answer    |
//! | 16    | `options` array                            | choice, number or sorting |
//!
//! Within an `options` array, `is_multiple_choice` or an `is_correct` item
//! means choice, an `answer`/`max_error` item means number, and a bare
//! `text` item means sorting.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::markup::strip_html;
use crate::variant::{
    BlankComponent, BlankKind, BlankOption, ChemicalBlock, ChoiceBlock, ChoiceOption, CodeBlock,
    CodeTestCase, DatasetBlock, FillBlanksBlock, FreeAnswerBlock, MatchingBlock, MatchingPair,
    MathBlock, NumberBlock, NumericAnswer, NumericalTest, PuzzleBlock, RandomTasksBlock,
    SchulteBlock, SortingBlock, SqlBlock, StepKind, StepVariant, StringBlock, TableBlock,
    TableRow, VideoBlock, VideoSource,
};
use crate::wire::{
    ChemicalSource, ChoiceSource, CodeSource, DatasetSource, FillBlanksSource, FreeAnswerSource,
    MatchingSource, MathSource, NumberSource, PuzzleSource, RandomTasksSource, RemoteBlock,
    SchulteSource, SortingSource, SqlSource, StringSource, TableSource, WireVideo,
};
use crate::CodecError;

/// A decoded remote block.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBlock {
    /// Statement HTML, unchanged.
    pub statement: String,
    /// Recognized variant with its payload.
    pub variant: StepVariant,
    /// Plain-text rendering of the statement, for text steps only.
    pub preview: Option<String>,
}

// ============================================================================
// Classification
// ============================================================================

/// Recognizes the kind of a remote block from its shape.
///
/// # Errors
///
/// Returns [`CodecError::UnknownStepVariant`] if no known shape matches.
pub fn classify(block: &RemoteBlock) -> Result<StepKind, CodecError> {
    if block.video.as_ref().is_some_and(Value::is_object) {
        return Ok(StepKind::Video);
    }

    let source = match &block.source {
        None | Some(Value::Null) => return Ok(StepKind::Text),
        Some(source) => source,
    };
    let Some(fields) = source.as_object() else {
        return Err(CodecError::unknown(format!(
            "source of type {}",
            json_type(source)
        )));
    };
    if fields.is_empty() {
        return Ok(StepKind::Text);
    }

    let has = |key: &str| fields.contains_key(key);

    let kind = if has("rows") && has("columns") {
        StepKind::Table
    } else if has("pairs") {
        StepKind::Matching
    } else if has("components") {
        StepKind::FillBlanks
    } else if has("numerical_test") {
        StepKind::Math
    } else if has("test_cases") {
        StepKind::Code
    } else if has("solve_sql") {
        StepKind::Sql
    } else if has("is_file_disabled") {
        StepKind::Dataset
    } else if has("task") && has("solve") {
        StepKind::RandomTasks
    } else if has("expression") {
        StepKind::Chemical
    } else if has("words") {
        StepKind::Puzzle
    } else if has("grid_size") {
        StepKind::Schulte
    } else if has("pattern") {
        StepKind::StringAnswer
    } else if has("manual_scoring") {
        StepKind::FreeAnswer
    } else if let Some(kind) = classify_options(fields) {
        kind
    } else {
        return Err(CodecError::unknown(describe_keys(fields)));
    };

    Ok(kind)
}

fn classify_options(fields: &Map<String, Value>) -> Option<StepKind> {
    let options = fields.get("options")?.as_array()?;

    if fields.contains_key("is_multiple_choice") {
        return Some(StepKind::Choice);
    }

    match options.first() {
        None if fields.contains_key("is_html_enabled") => Some(StepKind::Sorting),
        None => Some(StepKind::Number),
        Some(Value::Object(item)) => {
            if item.contains_key("is_correct") {
                Some(StepKind::Choice)
            } else if item.contains_key("answer") || item.contains_key("max_error") {
                Some(StepKind::Number)
            } else if item.contains_key("text") {
                Some(StepKind::Sorting)
            } else {
                None
            }
        }
        Some(_) => None,
    }
}

fn describe_keys(fields: &Map<String, Value>) -> String {
    let mut keys: Vec<&str> = fields.keys().map(String::as_str).collect();
    keys.sort_unstable();
    format!("source keys [{}]", keys.join(", "))
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes a remote block into a statement and a local variant.
///
/// # Errors
///
/// Returns [`CodecError::UnknownStepVariant`] if the shape is not recognized
/// and [`CodecError::MalformedSource`] if it is recognized but unreadable.
pub fn decode(block: &RemoteBlock) -> Result<DecodedBlock, CodecError> {
    let kind = classify(block)?;

    let variant = match kind {
        StepKind::Text => StepVariant::Text,
        StepKind::Video => {
            let video: WireVideo = read(kind, block.video.as_ref())?;
            StepVariant::Video(VideoBlock {
                urls: video
                    .urls
                    .into_iter()
                    .map(|u| VideoSource {
                        url: u.url,
                        quality: u.quality,
                    })
                    .collect(),
                thumbnail: video.thumbnail,
            })
        }
        StepKind::Choice => {
            let s: ChoiceSource = read(kind, block.source.as_ref())?;
            StepVariant::Choice(ChoiceBlock {
                options: s
                    .options
                    .into_iter()
                    .map(|o| ChoiceOption {
                        text: o.text,
                        is_correct: o.is_correct,
                        feedback: o.feedback,
                    })
                    .collect(),
                is_multiple_choice: s.is_multiple_choice,
                is_always_correct: s.is_always_correct,
                sample_size: s.sample_size,
                preserve_order: s.preserve_order,
                is_html_enabled: s.is_html_enabled,
                is_options_feedback: s.is_options_feedback,
            })
        }
        StepKind::Sorting => {
            let s: SortingSource = read(kind, block.source.as_ref())?;
            StepVariant::Sorting(SortingBlock {
                options: s.options.into_iter().map(|o| o.text).collect(),
                is_html_enabled: s.is_html_enabled,
            })
        }
        StepKind::Matching => {
            let s: MatchingSource = read(kind, block.source.as_ref())?;
            StepVariant::Matching(MatchingBlock {
                pairs: s
                    .pairs
                    .into_iter()
                    .map(|p| MatchingPair {
                        first: p.first,
                        second: p.second,
                    })
                    .collect(),
                preserve_firsts_order: s.preserve_firsts_order,
                is_html_enabled: s.is_html_enabled,
            })
        }
        StepKind::Table => {
            let s: TableSource = read(kind, block.source.as_ref())?;
            StepVariant::Table(TableBlock {
                description: s.description,
                columns: s.columns.into_iter().map(|c| c.name).collect(),
                rows: s
                    .rows
                    .into_iter()
                    .map(|r| TableRow {
                        name: r.name,
                        cells: r.columns.into_iter().map(|c| c.choice).collect(),
                    })
                    .collect(),
                is_checkbox: s.options.is_checkbox,
                is_randomize_rows: s.options.is_randomize_rows,
                is_randomize_columns: s.options.is_randomize_columns,
                sample_size: s.options.sample_size,
            })
        }
        StepKind::FillBlanks => {
            let s: FillBlanksSource = read(kind, block.source.as_ref())?;
            let components = s
                .components
                .into_iter()
                .map(|c| {
                    Ok(BlankComponent {
                        kind: parse_blank_kind(&c.kind)?,
                        text: c.text,
                        options: c
                            .options
                            .into_iter()
                            .map(|o| BlankOption {
                                text: o.text,
                                is_correct: o.is_correct,
                            })
                            .collect(),
                    })
                })
                .collect::<Result<Vec<_>, CodecError>>()?;
            StepVariant::FillBlanks(FillBlanksBlock {
                components,
                is_case_sensitive: s.is_case_sensitive,
                is_detailed_feedback: s.is_detailed_feedback,
                is_partially_correct: s.is_partially_correct,
            })
        }
        StepKind::Number => {
            let s: NumberSource = read(kind, block.source.as_ref())?;
            let answers = s
                .options
                .into_iter()
                .map(|o| {
                    Ok(NumericAnswer {
                        answer: parse_number(&o.answer, "answer")?,
                        max_error: if o.max_error.trim().is_empty() {
                            0.0
                        } else {
                            parse_number(&o.max_error, "max_error")?
                        },
                    })
                })
                .collect::<Result<Vec<_>, CodecError>>()?;
            StepVariant::Number(NumberBlock { answers })
        }
        StepKind::Math => {
            let s: MathSource = read(kind, block.source.as_ref())?;
            let t = s.numerical_test;
            StepVariant::Math(MathBlock {
                answer: s.answer,
                numerical_test: NumericalTest {
                    z_re_min: t.z_re_min,
                    z_re_max: t.z_re_max,
                    z_im_min: t.z_im_min,
                    z_im_max: t.z_im_max,
                    max_error: t.max_error,
                    integer_only: t.integer_only,
                },
            })
        }
        StepKind::StringAnswer => {
            let s: StringSource = read(kind, block.source.as_ref())?;
            StepVariant::StringAnswer(StringBlock {
                pattern: s.pattern,
                case_sensitive: s.case_sensitive,
                use_re: s.use_re,
                match_substring: s.match_substring,
            })
        }
        StepKind::FreeAnswer => {
            let s: FreeAnswerSource = read(kind, block.source.as_ref())?;
            StepVariant::FreeAnswer(FreeAnswerBlock {
                is_attachments_enabled: s.is_attachments_enabled,
                is_html_enabled: s.is_html_enabled,
                manual_scoring: s.manual_scoring,
            })
        }
        StepKind::Code => {
            let s: CodeSource = read(kind, block.source.as_ref())?;
            StepVariant::Code(CodeBlock {
                language: s.language,
                reference_code: s.code,
                templates: parse_templates(&s.templates_data),
                test_cases: s
                    .test_cases
                    .into_iter()
                    .map(|(input, output)| CodeTestCase { input, output })
                    .collect(),
                execution_time_limit: s.execution_time_limit,
                execution_memory_limit: s.execution_memory_limit,
                samples_count: s.samples_count,
                are_all_tests_run: s.are_all_tests_run,
                are_all_tests_scored: s.are_all_tests_scored,
            })
        }
        StepKind::Sql => {
            let s: SqlSource = read(kind, block.source.as_ref())?;
            StepVariant::Sql(SqlBlock {
                sql_code: s.sql_code,
                solve_sql: s.solve_sql,
            })
        }
        StepKind::Dataset => {
            let s: DatasetSource = read(kind, block.source.as_ref())?;
            StepVariant::Dataset(DatasetBlock {
                generator_code: s.code,
                is_file_disabled: s.is_file_disabled,
            })
        }
        StepKind::RandomTasks => {
            let s: RandomTasksSource = read(kind, block.source.as_ref())?;
            StepVariant::RandomTasks(RandomTasksBlock {
                task: s.task,
                solve: s.solve,
                max_error: s.max_error,
                combinations: s.combinations,
            })
        }
        StepKind::Chemical => {
            let s: ChemicalSource = read(kind, block.source.as_ref())?;
            StepVariant::Chemical(ChemicalBlock {
                expression: s.expression,
                template: s.template,
            })
        }
        StepKind::Puzzle => {
            let s: PuzzleSource = read(kind, block.source.as_ref())?;
            StepVariant::Puzzle(PuzzleBlock {
                words: s.words.into_iter().map(|w| w.text).collect(),
            })
        }
        StepKind::Schulte => {
            let s: SchulteSource = read(kind, block.source.as_ref())?;
            StepVariant::Schulte(SchulteBlock {
                grid_size: s.grid_size,
                is_random: s.is_random,
            })
        }
    };

    let preview = matches!(variant, StepVariant::Text).then(|| strip_html(&block.text));

    Ok(DecodedBlock {
        statement: block.text.clone(),
        variant,
        preview,
    })
}

/// Decodes a block given as raw JSON.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the value is not a block object,
/// otherwise the same errors as [`decode`].
pub fn decode_value(value: &Value) -> Result<DecodedBlock, CodecError> {
    let block: RemoteBlock = serde_json::from_value(value.clone())?;
    decode(&block)
}

fn read<T: DeserializeOwned>(kind: StepKind, value: Option<&Value>) -> Result<T, CodecError> {
    let value = value.cloned().unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| CodecError::malformed(kind, e.to_string()))
}

fn parse_blank_kind(name: &str) -> Result<BlankKind, CodecError> {
    match name {
        "text" => Ok(BlankKind::Text),
        "input" => Ok(BlankKind::Input),
        "select" => Ok(BlankKind::Select),
        other => Err(CodecError::malformed(
            StepKind::FillBlanks,
            format!("unknown component type '{other}'"),
        )),
    }
}

fn parse_number(text: &str, field: &str) -> Result<f64, CodecError> {
    text.trim().parse::<f64>().map_err(|_| {
        CodecError::malformed(StepKind::Number, format!("{field} '{text}' is not a number"))
    })
}

/// Parses `templates_data`: a `::<language>` line opens a template and the
/// lines up to the next header form its body. Text before the first header
/// is ignored.
pub(crate) fn parse_templates(data: &str) -> BTreeMap<String, String> {
    let mut templates = BTreeMap::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in data.lines() {
        if let Some(language) = line.strip_prefix("::") {
            if let Some((name, body)) = current.take() {
                templates.insert(name, body.join("\n"));
            }
            current = Some((language.trim().to_string(), Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((name, body)) = current {
        templates.insert(name, body.join("\n"));
    }

    templates
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::encode::encode;
    use serde_json::json;

    fn block(source: Value) -> RemoteBlock {
        RemoteBlock {
            text: "<p>Q</p>".into(),
            video: None,
            source: Some(source),
        }
    }

    fn one_of_each() -> Vec<StepVariant> {
        let mut code = CodeBlock {
            reference_code: "print(sum(map(int, input().split())))".into(),
            test_cases: vec![CodeTestCase::new("1 2", "3"), CodeTestCase::new("5 5", "10")],
            samples_count: 2,
            ..Default::default()
        };
        code.templates.insert("python3".into(), "# write here\n".into());
        code.templates.insert("java".into(), "class Main {\n}".into());

        vec![
            StepVariant::Text,
            StepVariant::Video(VideoBlock {
                urls: vec![VideoSource {
                    url: "https://cdn.example.com/v/720.mp4".into(),
                    quality: "720".into(),
                }],
                thumbnail: Some("https://cdn.example.com/v/thumb.jpg".into()),
            }),
            StepVariant::Choice(ChoiceBlock {
                options: vec![
                    ChoiceOption::new("red", false),
                    ChoiceOption::new("green", true),
                    ChoiceOption::new("blue", false),
                ],
                ..Default::default()
            }),
            StepVariant::Sorting(SortingBlock {
                options: vec!["a".into(), "b".into(), "c".into()],
                is_html_enabled: true,
            }),
            StepVariant::Matching(MatchingBlock {
                pairs: vec![
                    MatchingPair {
                        first: "H2O".into(),
                        second: "water".into(),
                    },
                    MatchingPair {
                        first: "NaCl".into(),
                        second: "salt".into(),
                    },
                ],
                ..Default::default()
            }),
            StepVariant::Table(TableBlock {
                description: "Animal".into(),
                columns: vec!["mammal".into(), "bird".into(), "fish".into()],
                rows: vec![
                    TableRow {
                        name: "cat".into(),
                        cells: vec![true, false, false],
                    },
                    TableRow {
                        name: "owl".into(),
                        cells: vec![false, true, false],
                    },
                ],
                is_checkbox: true,
                ..Default::default()
            }),
            StepVariant::FillBlanks(FillBlanksBlock {
                components: vec![
                    BlankComponent {
                        kind: BlankKind::Text,
                        text: "2 + 2 = ".into(),
                        options: vec![],
                    },
                    BlankComponent {
                        kind: BlankKind::Input,
                        text: String::new(),
                        options: vec![BlankOption {
                            text: "4".into(),
                            is_correct: true,
                        }],
                    },
                    BlankComponent {
                        kind: BlankKind::Select,
                        text: String::new(),
                        options: vec![
                            BlankOption {
                                text: "yes".into(),
                                is_correct: true,
                            },
                            BlankOption {
                                text: "no".into(),
                                is_correct: false,
                            },
                        ],
                    },
                ],
                is_partially_correct: true,
                ..Default::default()
            }),
            StepVariant::Number(NumberBlock {
                answers: vec![NumericAnswer {
                    answer: 2.75,
                    max_error: 0.005,
                }],
            }),
            StepVariant::Math(MathBlock {
                answer: "x^2 + 2*x".into(),
                numerical_test: NumericalTest::default(),
            }),
            StepVariant::StringAnswer(StringBlock {
                pattern: "^colou?r$".into(),
                use_re: true,
                ..Default::default()
            }),
            StepVariant::FreeAnswer(FreeAnswerBlock {
                manual_scoring: true,
                ..Default::default()
            }),
            StepVariant::Code(code),
            StepVariant::Sql(SqlBlock {
                sql_code: "CREATE TABLE t (x INT);".into(),
                solve_sql: "SELECT x FROM t;".into(),
            }),
            StepVariant::Dataset(DatasetBlock {
                generator_code: "def generate(): return []".into(),
                is_file_disabled: true,
            }),
            StepVariant::RandomTasks(RandomTasksBlock {
                task: "Compute {a} + {b}".into(),
                solve: "a + b".into(),
                max_error: 0.0,
                combinations: 10,
            }),
            StepVariant::Chemical(ChemicalBlock {
                expression: "2H2 + O2 = 2H2O".into(),
                template: vec!["H2".into(), "O2".into()],
            }),
            StepVariant::Puzzle(PuzzleBlock {
                words: vec!["Rust".into(), "is".into(), "fast".into()],
            }),
            StepVariant::Schulte(SchulteBlock::default()),
        ]
    }

    #[test]
    fn test_round_trip_every_kind() {
        let variants = one_of_each();
        let kinds: Vec<_> = variants.iter().map(StepVariant::kind).collect();
        assert_eq!(kinds, StepKind::ALL.to_vec());

        for variant in variants {
            let encoded = encode("<p>Statement</p>", &variant).unwrap();
            assert_eq!(classify(&encoded).unwrap(), variant.kind());

            let decoded = decode(&encoded).unwrap();
            assert_eq!(decoded.statement, "<p>Statement</p>");
            assert_eq!(decoded.variant, variant, "round trip of {}", variant.kind());
        }
    }

    #[test]
    fn test_sorting_from_platform_json() {
        let decoded = decode(&block(json!({
            "options": [{"text": "a"}, {"text": "b"}, {"text": "c"}],
            "is_html_enabled": true
        })))
        .unwrap();

        assert_eq!(
            decoded.variant,
            StepVariant::Sorting(SortingBlock {
                options: vec!["a".into(), "b".into(), "c".into()],
                is_html_enabled: true,
            })
        );
        assert!(decoded.preview.is_none());
    }

    #[test]
    fn test_text_preview() {
        let decoded = decode(&RemoteBlock {
            text: "<h2>Welcome</h2><p>Let&#39;s begin</p>".into(),
            video: None,
            source: Some(json!({})),
        })
        .unwrap();

        assert_eq!(decoded.variant, StepVariant::Text);
        assert_eq!(decoded.preview.as_deref(), Some("Welcome Let's begin"));
    }

    #[test]
    fn test_null_source_is_text() {
        let value = json!({"text": "hello", "source": null});
        let decoded = decode_value(&value).unwrap();
        assert_eq!(decoded.variant, StepVariant::Text);
    }

    #[test]
    fn test_unknown_shape() {
        let err = decode(&block(json!({"foo": 1, "bar": [2]}))).unwrap_err();
        assert!(matches!(err, CodecError::UnknownStepVariant { .. }));
        assert!(err.to_string().contains("[bar, foo]"));

        let err = classify(&block(json!("just a string"))).unwrap_err();
        assert!(err.to_string().contains("source of type string"));
    }

    #[test]
    fn test_options_of_scalars_are_unknown() {
        let err = classify(&block(json!({"options": ["a", "b"]}))).unwrap_err();
        assert!(matches!(err, CodecError::UnknownStepVariant { .. }));
    }

    #[test]
    fn test_precedence_resolves_ambiguous_shapes() {
        // pairs outranks components
        let kind = classify(&block(json!({"pairs": [], "components": []}))).unwrap();
        assert_eq!(kind, StepKind::Matching);

        // test_cases outranks is_file_disabled
        let kind = classify(&block(json!({"test_cases": [], "is_file_disabled": false}))).unwrap();
        assert_eq!(kind, StepKind::Code);

        // a video object outranks any source
        let mut b = block(json!({"pattern": "x"}));
        b.video = Some(json!({"urls": []}));
        assert_eq!(classify(&b).unwrap(), StepKind::Video);
    }

    #[test]
    fn test_options_disambiguation() {
        let choice = classify(&block(json!({"options": [{"text": "a", "is_correct": true}]})));
        assert_eq!(choice.unwrap(), StepKind::Choice);

        let number = classify(&block(json!({"options": [{"answer": "1", "max_error": "0"}]})));
        assert_eq!(number.unwrap(), StepKind::Number);

        let empty_choice = classify(&block(json!({"options": [], "is_multiple_choice": true})));
        assert_eq!(empty_choice.unwrap(), StepKind::Choice);

        let empty_sorting = classify(&block(json!({"options": [], "is_html_enabled": true})));
        assert_eq!(empty_sorting.unwrap(), StepKind::Sorting);

        let empty_number = classify(&block(json!({"options": []})));
        assert_eq!(empty_number.unwrap(), StepKind::Number);
    }

    #[test]
    fn test_partial_source_gets_platform_defaults() {
        let decoded = decode(&block(json!({
            "options": [{"text": "yes", "is_correct": true}, {"text": "no"}]
        })))
        .unwrap();

        let StepVariant::Choice(choice) = decoded.variant else {
            unreachable!("expected choice");
        };
        assert_eq!(choice.sample_size, 4);
        assert!(choice.is_html_enabled);
        assert!(!choice.options[1].is_correct);
    }

    #[test]
    fn test_malformed_number() {
        let err = decode(&block(json!({"options": [{"answer": "pi", "max_error": "0"}]})))
            .unwrap_err();
        assert!(matches!(
            err,
            CodecError::MalformedSource {
                kind: StepKind::Number,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_blank_type_is_malformed() {
        let err = decode(&block(json!({
            "components": [{"type": "slider", "text": ""}]
        })))
        .unwrap_err();
        assert!(err.to_string().contains("slider"));
    }

    #[test]
    fn test_parse_templates() {
        let templates = parse_templates("preamble\n::python3\nx = 1\n\ny = 2\n::c\nint main() {}\n");
        assert_eq!(templates.len(), 2);
        assert_eq!(templates["python3"], "x = 1\n\ny = 2");
        assert_eq!(templates["c"], "int main() {}");
        assert!(parse_templates("").is_empty());
    }
}
