use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, warn};

use crate::cli::{CorrelateArgs, CorrelationMode, SortKey};
use crate::engine::{self, EngineConfig, EngineReport, index_ratios};
use crate::model::{CorrelateRunReport, CorrelateSettings, ScoreRecord};
use crate::table::{
    ScoreTableLayout, parse_ratio_table, parse_score_table, render_average_scores,
    render_correlation_table, render_distributions, render_failures, render_summary_table,
};
use crate::util::{hash_input, now_utc_string, read_utf8, write_json_pretty, write_text};

const PER_SYSTEM_FILE: &str = "correlation_results.csv";
const POOLED_FILE: &str = "overall_correlation_results.csv";
const AGGREGATE_FILE: &str = "average_correlation_results.csv";
const AVERAGE_SCORES_FILE: &str = "average_scores.csv";
const SUMMARY_FILE: &str = "correlation_summary.csv";
const DISTRIBUTIONS_FILE: &str = "score_distributions.csv";
const FAILURES_FILE: &str = "skipped_partitions.csv";
const REPORT_FILE: &str = "correlation_report.json";

pub fn run(args: CorrelateArgs) -> Result<()> {
    correlate(&args)?;
    Ok(())
}

pub fn engine_config(args: &CorrelateArgs) -> EngineConfig {
    let mut config = EngineConfig::new(args.score_columns.clone());
    config.sentinel = (!args.keep_sentinel).then(|| args.sentinel.clone());
    config.modes = args.modes.clone();
    config.sort_by = args.sort_by;
    config.non_finite = args.non_finite;
    config
}

/// Replaces a key by capture group 1 of `pattern`, or by the whole match
/// when the pattern has no group. Keys that do not match are kept.
pub fn extract_key(pattern: &Regex, key: &str) -> String {
    pattern
        .captures(key)
        .and_then(|captures| captures.get(1).or_else(|| captures.get(0)))
        .map(|found| found.as_str().to_string())
        .unwrap_or_else(|| key.to_string())
}

pub fn correlate(args: &CorrelateArgs) -> Result<EngineReport> {
    info!(
        scores = %args.scores_path.display(),
        ratios = %args.ratios_path.display(),
        "starting correlation"
    );

    let layout = ScoreTableLayout {
        document_column: &args.document_column,
        system_column: &args.system_column,
        score_columns: &args.score_columns,
    };
    let mut scores = parse_score_table(
        &args.scores_path,
        &read_utf8(&args.scores_path)?,
        &layout,
    )?;
    let mut ratio_entries = parse_ratio_table(&args.ratios_path, &read_utf8(&args.ratios_path)?)?;
    info!(
        score_rows = scores.len(),
        ratio_rows = ratio_entries.len(),
        "loaded inputs"
    );

    if let Some(pattern) = &args.key_pattern {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("failed to compile key pattern: {pattern}"))?;
        rekey(&pattern, &mut scores, &mut ratio_entries);
    }

    let ratios = index_ratios(ratio_entries)?;
    let config = engine_config(args);
    let report = engine::run(&config, &scores, &ratios);

    let outputs = write_outputs(args, &config, &report)?;

    let report_path = args
        .report_path
        .clone()
        .unwrap_or_else(|| default_report_path(&args.output_dir));
    let run_report = CorrelateRunReport {
        manifest_version: 1,
        generated_at: now_utc_string(),
        scores: hash_input(&args.scores_path)?,
        ratios: hash_input(&args.ratios_path)?,
        settings: CorrelateSettings {
            score_types: config.score_types.clone(),
            sentinel: config.sentinel.clone(),
            modes: config
                .modes
                .iter()
                .map(|mode| mode.as_str().to_string())
                .collect(),
            sort_by: config.sort_by.as_str().to_string(),
            non_finite: config.non_finite.as_str().to_string(),
            key_pattern: args.key_pattern.clone(),
        },
        join: report.join.clone(),
        results: report.consolidated(config.sort_by),
        distributions: report.distributions.clone(),
        failures: report.failures.clone(),
        outputs: outputs
            .iter()
            .map(|path| path.display().to_string())
            .collect(),
    };
    write_json_pretty(&report_path, &run_report)?;
    info!(path = %report_path.display(), "wrote correlation report");

    if report.failures.is_empty() {
        info!("all partitions produced results");
    } else {
        warn!(
            failed = report.failures.len(),
            path = %args.output_dir.join(FAILURES_FILE).display(),
            "some partitions were skipped"
        );
    }

    Ok(report)
}

fn rekey(pattern: &Regex, scores: &mut [ScoreRecord], ratios: &mut [(String, f64)]) {
    for record in scores.iter_mut() {
        record.document = extract_key(pattern, &record.document);
    }
    for (key, _) in ratios.iter_mut() {
        *key = extract_key(pattern, key);
    }
}

fn write_outputs(
    args: &CorrelateArgs,
    config: &EngineConfig,
    report: &EngineReport,
) -> Result<Vec<PathBuf>> {
    let with_abs = config.sort_by == SortKey::AbsCorrelation;
    let dir = args.output_dir.as_path();
    let mut written = Vec::new();
    let mut emit = |name: &str, contents: String| -> Result<()> {
        let path = dir.join(name);
        write_text(&path, &contents)?;
        info!(path = %path.display(), "wrote table");
        written.push(path);
        Ok(())
    };

    if config.modes.contains(&CorrelationMode::PerSystem) {
        emit(
            PER_SYSTEM_FILE,
            render_correlation_table(
                &report.per_system,
                Some(args.system_column.as_str()),
                with_abs,
            ),
        )?;
    }
    if config.modes.contains(&CorrelationMode::Pooled) {
        emit(
            POOLED_FILE,
            render_correlation_table(&report.pooled, None, with_abs),
        )?;
    }
    if config.modes.contains(&CorrelationMode::Aggregate) {
        // The aggregate table always carries the ranking column.
        emit(
            AGGREGATE_FILE,
            render_correlation_table(&report.aggregate, None, true),
        )?;
        emit(
            AVERAGE_SCORES_FILE,
            render_average_scores(&report.averages, &args.document_column, &config.score_types),
        )?;
    }

    let ranked = report.consolidated(SortKey::AbsCorrelation);
    emit(SUMMARY_FILE, render_summary_table(&ranked, &args.system_column))?;
    emit(
        DISTRIBUTIONS_FILE,
        render_distributions(&report.distributions, &args.system_column),
    )?;
    emit(
        FAILURES_FILE,
        render_failures(&report.failures, &args.system_column),
    )?;

    Ok(written)
}

pub fn default_report_path(output_dir: &Path) -> PathBuf {
    output_dir.join(REPORT_FILE)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cli::NonFinitePolicy;
    use crate::error::{InputError, PartitionError};

    const SCORES: &str = "\
Document\tLLM\tCHRF Score\tBLEU Score\tBERT Score\tBLEURT Score
zh/T01n0001.tsv\tSysA\t40\t10\t0.80\t0.50
zh/T01n0002.tsv\tSysA\t42\t12\t0.82\t0.40
zh/T01n0003.tsv\tSysA\t47\t15\t0.85\t0.45
zh/T01n0001.tsv\tSysB\t35\t9\t0.78\t0.30
zh/T01n0002.tsv\tSysB\t\t14\t0.80\t0.35
zh/T01n0003.tsv\tSysB\t38\t11\t0.79\t0.42
all_files.tsv\tSysA\t43\t12\t0.82\t0.45
";

    const RATIOS: &str = "\
File,Original Size,Measured Size,Ratio
T01n0003.tsv,300,100,3.00
T01n0002.tsv,200,100,2.00
T01n0001.tsv,150,100,1.50
";

    fn args(dir: &Path) -> CorrelateArgs {
        CorrelateArgs {
            scores_path: dir.join("scores.tsv"),
            ratios_path: dir.join("compression_ratios.csv"),
            output_dir: dir.join("out"),
            report_path: None,
            document_column: "Document".to_string(),
            system_column: "LLM".to_string(),
            score_columns: crate::cli::DEFAULT_SCORE_TYPES.map(String::from).to_vec(),
            sentinel: "all_files.tsv".to_string(),
            keep_sentinel: false,
            modes: vec![
                CorrelationMode::PerSystem,
                CorrelationMode::Pooled,
                CorrelationMode::Aggregate,
            ],
            sort_by: SortKey::AbsCorrelation,
            non_finite: NonFinitePolicy::Exclude,
            key_pattern: Some(r"(T\d+n\d+)".to_string()),
        }
    }

    fn seed(dir: &Path) {
        fs::write(dir.join("scores.tsv"), SCORES).unwrap();
        fs::write(dir.join("compression_ratios.csv"), RATIOS).unwrap();
    }

    #[test]
    fn extract_key_prefers_first_group() {
        let grouped = Regex::new(r"/(T\d+n\d+)").unwrap();
        assert_eq!(extract_key(&grouped, "zh/T02n0099_x.tsv"), "T02n0099");
        assert_eq!(extract_key(&grouped, "all_files.tsv"), "all_files.tsv");

        let whole = Regex::new(r"T\d+n\d+").unwrap();
        assert_eq!(extract_key(&whole, "T02n0099.tsv"), "T02n0099");
    }

    #[test]
    fn correlate_writes_every_table_and_reports_failures() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let args = args(dir.path());

        let report = correlate(&args).unwrap();

        assert_eq!(report.join.sentinel_rows_dropped, 1);
        assert_eq!(report.join.documents.len(), 3);
        assert_eq!(report.per_system.len(), 8);
        assert_eq!(report.pooled.len(), 4);
        assert_eq!(report.aggregate.len(), 4);
        assert!(report.failures.is_empty());

        for name in [
            PER_SYSTEM_FILE,
            POOLED_FILE,
            AGGREGATE_FILE,
            AVERAGE_SCORES_FILE,
            SUMMARY_FILE,
            DISTRIBUTIONS_FILE,
            FAILURES_FILE,
            REPORT_FILE,
        ] {
            assert!(args.output_dir.join(name).exists(), "missing {name}");
        }

        let per_system = fs::read_to_string(args.output_dir.join(PER_SYSTEM_FILE)).unwrap();
        assert!(per_system.starts_with("LLM,Score Type,Correlation,P-value,Abs Correlation\n"));

        let averages = fs::read_to_string(args.output_dir.join(AVERAGE_SCORES_FILE)).unwrap();
        assert!(averages.contains("T01n0002,42,"));

        let report_json: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(default_report_path(&args.output_dir)).unwrap(),
        )
        .unwrap();
        assert_eq!(report_json["settings"]["sort_by"], "abs-correlation");
        assert_eq!(report_json["results"].as_array().unwrap().len(), 16);
    }

    #[test]
    fn partition_failures_are_listed_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());
        let mut args = args(dir.path());
        args.modes = vec![CorrelationMode::PerSystem];
        fs::write(
            dir.path().join("scores.tsv"),
            format!("{SCORES}zh/T09n0009.tsv\tSysC\t1\t1\t1\t1\n"),
        )
        .unwrap();

        let report = correlate(&args).unwrap();
        assert_eq!(report.per_system.len(), 8);
        assert_eq!(report.failures.len(), 4);
        assert!(
            report
                .failures
                .iter()
                .all(|failure| failure.error == PartitionError::EmptyPartition)
        );

        let skipped = fs::read_to_string(args.output_dir.join(FAILURES_FILE)).unwrap();
        assert_eq!(skipped.lines().count(), 5);
        assert!(!args.output_dir.join(POOLED_FILE).exists());
    }

    #[test]
    fn missing_score_table_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = correlate(&args(dir.path())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InputError>(),
            Some(InputError::MissingInput { .. })
        ));
    }
}
