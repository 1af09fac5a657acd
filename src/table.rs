//! Flat-file adapters: the tab-separated score table, the ratio CSV handed
//! from `compress` to `correlate`, and the CSV result tables.

use std::fmt::Write as _;
use std::path::Path;

use crate::calculator::compute_ratio;
use crate::error::InputError;
use crate::model::{
    AverageScores, CompressionResult, CorrelationResult, PartitionFailure, ScoreDistribution,
    ScoreRecord,
};

pub const KEY_COLUMN: &str = "File";
pub const ORIGINAL_SIZE_COLUMN: &str = "Original Size";
pub const MEASURED_SIZE_COLUMN: &str = "Measured Size";
pub const RATIO_COLUMN: &str = "Ratio";

/// Older ratio tables name the measured size after the algorithm.
const MEASURED_SIZE_ALIASES: [&str; 3] = [MEASURED_SIZE_COLUMN, "Diff Size", "Gzip Size"];

#[derive(Debug, Clone)]
pub struct ScoreTableLayout<'a> {
    pub document_column: &'a str,
    pub system_column: &'a str,
    pub score_columns: &'a [String],
}

fn malformed(path: &Path, line: usize, message: impl Into<String>) -> InputError {
    InputError::Malformed {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

fn column_index(
    header: &[String],
    name: &str,
    path: &Path,
    line: usize,
) -> Result<usize, InputError> {
    header
        .iter()
        .position(|column| column == name)
        .ok_or_else(|| malformed(path, line, format!("missing column `{name}`")))
}

/// Non-blank lines with their 1-based line numbers.
fn content_lines(raw: &str) -> impl Iterator<Item = (usize, &str)> {
    raw.lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line))
        .filter(|(_, line)| !line.trim().is_empty())
}

fn parse_optional_score(
    cell: Option<&str>,
    path: &Path,
    line: usize,
    column: &str,
) -> Result<Option<f64>, InputError> {
    let Some(cell) = cell.map(str::trim) else {
        return Ok(None);
    };
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    cell.parse::<f64>()
        .map(Some)
        .map_err(|_| malformed(path, line, format!("`{column}` is not a number: {cell:?}")))
}

pub fn parse_score_table(
    path: &Path,
    raw: &str,
    layout: &ScoreTableLayout<'_>,
) -> Result<Vec<ScoreRecord>, InputError> {
    let mut lines = content_lines(raw);
    let (header_line, header) = lines
        .next()
        .ok_or_else(|| malformed(path, 1, "score table is empty"))?;
    let header: Vec<String> = header.split('\t').map(|cell| cell.trim().to_string()).collect();

    let document_index = column_index(&header, layout.document_column, path, header_line)?;
    let system_index = column_index(&header, layout.system_column, path, header_line)?;
    let score_indexes = layout
        .score_columns
        .iter()
        .map(|column| column_index(&header, column, path, header_line))
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::new();
    for (line, text) in lines {
        let cells: Vec<&str> = text.split('\t').collect();
        let required = |index: usize, column: &str| {
            cells
                .get(index)
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty())
                .map(ToOwned::to_owned)
                .ok_or_else(|| malformed(path, line, format!("missing `{column}` value")))
        };

        let document = required(document_index, layout.document_column)?;
        let system = required(system_index, layout.system_column)?;
        let scores = score_indexes
            .iter()
            .zip(layout.score_columns)
            .map(|(&index, column)| {
                parse_optional_score(cells.get(index).copied(), path, line, column)
            })
            .collect::<Result<Vec<_>, _>>()?;

        records.push(ScoreRecord {
            document,
            system,
            scores,
        });
    }

    Ok(records)
}

/// Splits one CSV record, honouring double-quoted fields.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut row = fields
        .into_iter()
        .map(|field| csv_field(field.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    row.push('\n');
    row
}

/// Reads `(key, ratio)` pairs. When both size columns are present the ratio
/// is recomputed from them, so the rounded `Ratio` column never feeds the
/// correlation.
pub fn parse_ratio_table(path: &Path, raw: &str) -> Result<Vec<(String, f64)>, InputError> {
    let mut lines = content_lines(raw);
    let (header_line, header) = lines
        .next()
        .ok_or_else(|| malformed(path, 1, "ratio table is empty"))?;
    let header: Vec<String> = split_csv_line(header)
        .into_iter()
        .map(|cell| cell.trim().to_string())
        .collect();

    let key_index = column_index(&header, KEY_COLUMN, path, header_line)?;
    let ratio_index = header.iter().position(|column| column == RATIO_COLUMN);
    let original_index = header.iter().position(|column| column == ORIGINAL_SIZE_COLUMN);
    let measured_index = header
        .iter()
        .position(|column| MEASURED_SIZE_ALIASES.contains(&column.as_str()));

    let sizes = original_index.zip(measured_index);
    let missing_ratio = || {
        malformed(
            path,
            header_line,
            format!("needs `{RATIO_COLUMN}` or both size columns"),
        )
    };
    if sizes.is_none() && ratio_index.is_none() {
        return Err(missing_ratio());
    }

    let mut entries = Vec::new();
    for (line, text) in lines {
        let cells = split_csv_line(text);
        let cell = |index: usize| {
            cells
                .get(index)
                .map(|value| value.trim())
                .unwrap_or_default()
        };

        let key = cell(key_index);
        if key.is_empty() {
            return Err(malformed(path, line, format!("missing `{KEY_COLUMN}` value")));
        }

        let ratio = match (sizes, ratio_index) {
            (Some((original, measured)), _) => {
                let parse_size = |index: usize| {
                    cell(index).parse::<usize>().map_err(|_| {
                        malformed(path, line, format!("invalid size {:?}", cell(index)))
                    })
                };
                compute_ratio(parse_size(original)?, parse_size(measured)?)
            }
            (None, Some(index)) => cell(index)
                .parse::<f64>()
                .map_err(|_| malformed(path, line, format!("invalid ratio {:?}", cell(index))))?,
            (None, None) => return Err(missing_ratio()),
        };

        entries.push((key.to_string(), ratio));
    }

    Ok(entries)
}

pub fn render_ratio_table(results: &[CompressionResult]) -> String {
    let mut out = csv_row([
        KEY_COLUMN,
        ORIGINAL_SIZE_COLUMN,
        MEASURED_SIZE_COLUMN,
        RATIO_COLUMN,
    ]);
    for result in results {
        out.push_str(&csv_row([
            result.key.clone(),
            result.original_size.to_string(),
            result.measured_size.to_string(),
            format!("{:.2}", result.ratio),
        ]));
    }
    out
}

/// Tab-separated rendering for the terminal.
pub fn render_ratio_report(results: &[CompressionResult]) -> String {
    let mut out =
        format!("{KEY_COLUMN}\t{ORIGINAL_SIZE_COLUMN}\t{MEASURED_SIZE_COLUMN}\t{RATIO_COLUMN}\n");
    for result in results {
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{:.2}",
            result.key, result.original_size, result.measured_size, result.ratio
        );
    }
    out
}

pub fn render_correlation_table(
    results: &[CorrelationResult],
    system_column: Option<&str>,
    with_abs: bool,
) -> String {
    let mut header = Vec::new();
    if let Some(system_column) = system_column {
        header.push(system_column);
    }
    header.extend(["Score Type", "Correlation", "P-value"]);
    if with_abs {
        header.push("Abs Correlation");
    }

    let mut out = csv_row(header);
    for result in results {
        let mut row = Vec::new();
        if system_column.is_some() {
            row.push(result.system.clone().unwrap_or_default());
        }
        row.push(result.score_type.clone());
        row.push(result.correlation.to_string());
        row.push(result.p_value.to_string());
        if with_abs {
            row.push(result.abs_correlation().to_string());
        }
        out.push_str(&csv_row(row));
    }
    out
}

/// Every variant in one table; rows keep whatever order they were given.
pub fn render_summary_table(results: &[CorrelationResult], system_column: &str) -> String {
    let mut out = csv_row([
        "Variant",
        system_column,
        "Score Type",
        "Correlation",
        "P-value",
        "Abs Correlation",
        "Documents",
        "Samples",
    ]);
    for result in results {
        out.push_str(&csv_row([
            result.variant.as_str().to_string(),
            result.system.clone().unwrap_or_default(),
            result.score_type.clone(),
            result.correlation.to_string(),
            result.p_value.to_string(),
            result.abs_correlation().to_string(),
            result.documents.to_string(),
            result.samples.to_string(),
        ]));
    }
    out
}

pub fn render_average_scores(
    averages: &[AverageScores],
    document_column: &str,
    score_types: &[String],
) -> String {
    let header = std::iter::once(document_column).chain(score_types.iter().map(String::as_str));
    let mut out = csv_row(header);
    for average in averages {
        let row = std::iter::once(average.document.clone()).chain(
            average
                .scores
                .iter()
                .map(|score| score.map(|value| value.to_string()).unwrap_or_default()),
        );
        out.push_str(&csv_row(row));
    }
    out
}

pub fn render_distributions(distributions: &[ScoreDistribution], system_column: &str) -> String {
    let mut out = csv_row([system_column, "Score Type", "Count", "Mean", "Std"]);
    for entry in distributions {
        out.push_str(&csv_row([
            entry.system.clone(),
            entry.score_type.clone(),
            entry.count.to_string(),
            entry.mean.to_string(),
            entry.std_dev.map(|value| value.to_string()).unwrap_or_default(),
        ]));
    }
    out
}

pub fn render_failures(failures: &[PartitionFailure], system_column: &str) -> String {
    let mut out = csv_row(["Variant", system_column, "Score Type", "Error", "Reason"]);
    for failure in failures {
        out.push_str(&csv_row([
            failure.variant.as_str().to_string(),
            failure.system.clone().unwrap_or_default(),
            failure.score_type.clone(),
            failure.error.kind().to_string(),
            failure.error.to_string(),
        ]));
    }
    out
}
