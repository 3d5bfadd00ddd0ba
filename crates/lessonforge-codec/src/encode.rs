//! Local variant → remote block.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::variant::{BlankKind, StepVariant};
use crate::wire::{
    ChemicalSource, ChoiceSource, ChoiceSourceOption, CodeSource, DatasetSource, FillBlanksSource,
    FreeAnswerSource, MatchingSource, MathSource, NumberOption, NumberSource, PuzzleSource,
    RandomTasksSource, RemoteBlock, SchulteSource, SortingSource, SqlSource, StringSource,
    TableCell, TableColumn, TableOptions, TableSource, TextItem, WireBlankOption, WireComponent,
    WireNumericalTest, WirePair, WireTableRow, WireVideo, WireVideoUrl,
};
use crate::CodecError;

/// Encodes a statement and variant into the platform's block format.
///
/// Every variant maps to exactly one source shape; the match below is
/// exhaustive, so a new kind cannot be added without an encoder.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the source cannot be converted to JSON.
pub fn encode(statement: &str, variant: &StepVariant) -> Result<RemoteBlock, CodecError> {
    let mut block = RemoteBlock {
        text: statement.to_string(),
        video: None,
        source: None,
    };

    match variant {
        StepVariant::Text => {}
        StepVariant::Video(video) => {
            block.video = Some(to_value(&WireVideo {
                urls: video
                    .urls
                    .iter()
                    .map(|u| WireVideoUrl {
                        url: u.url.clone(),
                        quality: u.quality.clone(),
                    })
                    .collect(),
                thumbnail: video.thumbnail.clone(),
            })?);
        }
        StepVariant::Choice(choice) => {
            block.source = Some(to_value(&ChoiceSource {
                options: choice
                    .options
                    .iter()
                    .map(|o| ChoiceSourceOption {
                        text: o.text.clone(),
                        is_correct: o.is_correct,
                        feedback: o.feedback.clone(),
                    })
                    .collect(),
                is_multiple_choice: choice.is_multiple_choice,
                is_always_correct: choice.is_always_correct,
                sample_size: choice.sample_size,
                preserve_order: choice.preserve_order,
                is_html_enabled: choice.is_html_enabled,
                is_options_feedback: choice.is_options_feedback,
            })?);
        }
        StepVariant::Sorting(sorting) => {
            block.source = Some(to_value(&SortingSource {
                options: text_items(&sorting.options),
                is_html_enabled: sorting.is_html_enabled,
            })?);
        }
        StepVariant::Matching(matching) => {
            block.source = Some(to_value(&MatchingSource {
                pairs: matching
                    .pairs
                    .iter()
                    .map(|p| WirePair {
                        first: p.first.clone(),
                        second: p.second.clone(),
                    })
                    .collect(),
                preserve_firsts_order: matching.preserve_firsts_order,
                is_html_enabled: matching.is_html_enabled,
            })?);
        }
        StepVariant::Table(table) => {
            block.source = Some(to_value(&TableSource {
                description: table.description.clone(),
                columns: table
                    .columns
                    .iter()
                    .map(|name| TableColumn { name: name.clone() })
                    .collect(),
                rows: table
                    .rows
                    .iter()
                    .map(|row| WireTableRow {
                        name: row.name.clone(),
                        columns: row
                            .cells
                            .iter()
                            .map(|&choice| TableCell { choice })
                            .collect(),
                    })
                    .collect(),
                options: TableOptions {
                    is_checkbox: table.is_checkbox,
                    is_randomize_rows: table.is_randomize_rows,
                    is_randomize_columns: table.is_randomize_columns,
                    sample_size: table.sample_size,
                },
            })?);
        }
        StepVariant::FillBlanks(blanks) => {
            block.source = Some(to_value(&FillBlanksSource {
                components: blanks
                    .components
                    .iter()
                    .map(|c| WireComponent {
                        kind: blank_kind_name(c.kind).to_string(),
                        text: c.text.clone(),
                        options: c
                            .options
                            .iter()
                            .map(|o| WireBlankOption {
                                text: o.text.clone(),
                                is_correct: o.is_correct,
                            })
                            .collect(),
                    })
                    .collect(),
                is_case_sensitive: blanks.is_case_sensitive,
                is_detailed_feedback: blanks.is_detailed_feedback,
                is_partially_correct: blanks.is_partially_correct,
            })?);
        }
        StepVariant::Number(number) => {
            block.source = Some(to_value(&NumberSource {
                options: number
                    .answers
                    .iter()
                    .map(|a| NumberOption {
                        answer: a.answer.to_string(),
                        max_error: a.max_error.to_string(),
                    })
                    .collect(),
            })?);
        }
        StepVariant::Math(math) => {
            let test = &math.numerical_test;
            block.source = Some(to_value(&MathSource {
                answer: math.answer.clone(),
                numerical_test: WireNumericalTest {
                    z_re_min: test.z_re_min,
                    z_re_max: test.z_re_max,
                    z_im_min: test.z_im_min,
                    z_im_max: test.z_im_max,
                    max_error: test.max_error,
                    integer_only: test.integer_only,
                },
            })?);
        }
        StepVariant::StringAnswer(string) => {
            block.source = Some(to_value(&StringSource {
                pattern: string.pattern.clone(),
                case_sensitive: string.case_sensitive,
                use_re: string.use_re,
                match_substring: string.match_substring,
            })?);
        }
        StepVariant::FreeAnswer(free) => {
            block.source = Some(to_value(&FreeAnswerSource {
                is_attachments_enabled: free.is_attachments_enabled,
                is_html_enabled: free.is_html_enabled,
                manual_scoring: free.manual_scoring,
            })?);
        }
        StepVariant::Code(code) => {
            block.source = Some(to_value(&CodeSource {
                code: code.reference_code.clone(),
                language: code.language.clone(),
                templates_data: format_templates(&code.templates),
                test_cases: code
                    .test_cases
                    .iter()
                    .map(|t| (t.input.clone(), t.output.clone()))
                    .collect(),
                execution_time_limit: code.execution_time_limit,
                execution_memory_limit: code.execution_memory_limit,
                samples_count: code.samples_count,
                are_all_tests_run: code.are_all_tests_run,
                are_all_tests_scored: code.are_all_tests_scored,
            })?);
        }
        StepVariant::Sql(sql) => {
            block.source = Some(to_value(&SqlSource {
                sql_code: sql.sql_code.clone(),
                solve_sql: sql.solve_sql.clone(),
            })?);
        }
        StepVariant::Dataset(dataset) => {
            block.source = Some(to_value(&DatasetSource {
                code: dataset.generator_code.clone(),
                is_file_disabled: dataset.is_file_disabled,
            })?);
        }
        StepVariant::RandomTasks(tasks) => {
            block.source = Some(to_value(&RandomTasksSource {
                task: tasks.task.clone(),
                solve: tasks.solve.clone(),
                max_error: tasks.max_error,
                combinations: tasks.combinations,
            })?);
        }
        StepVariant::Chemical(chemical) => {
            block.source = Some(to_value(&ChemicalSource {
                expression: chemical.expression.clone(),
                template: chemical.template.clone(),
            })?);
        }
        StepVariant::Puzzle(puzzle) => {
            block.source = Some(to_value(&PuzzleSource {
                words: text_items(&puzzle.words),
            })?);
        }
        StepVariant::Schulte(schulte) => {
            block.source = Some(to_value(&SchulteSource {
                grid_size: schulte.grid_size,
                is_random: schulte.is_random,
            })?);
        }
    }

    Ok(block)
}

fn to_value<T: Serialize>(source: &T) -> Result<Value, CodecError> {
    Ok(serde_json::to_value(source)?)
}

fn text_items(texts: &[String]) -> Vec<TextItem> {
    texts
        .iter()
        .map(|text| TextItem { text: text.clone() })
        .collect()
}

pub(crate) const fn blank_kind_name(kind: BlankKind) -> &'static str {
    match kind {
        BlankKind::Text => "text",
        BlankKind::Input => "input",
        BlankKind::Select => "select",
    }
}

/// Renders templates in the platform's `templates_data` form:
/// `::<language>` on its own line followed by the template body.
pub(crate) fn format_templates(templates: &BTreeMap<String, String>) -> String {
    let mut data = String::new();
    for (language, body) in templates {
        data.push_str("::");
        data.push_str(language);
        data.push('\n');
        data.push_str(body);
        data.push('\n');
    }
    data
}
