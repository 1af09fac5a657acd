use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, info, warn};

use crate::cli::{CorrelationMode, NonFinitePolicy, SortKey};
use crate::error::{InputError, PartitionError};
use crate::model::{
    AverageScores, CorrelationResult, JoinSummary, JoinedDocument, MergedRecord,
    PartitionFailure, ScoreDistribution, ScoreRecord, Variant,
};
use crate::stats::{mean, pearson, sample_std_dev};

pub const DEFAULT_SENTINEL: &str = "all_files.tsv";
const MIN_DOCUMENTS: usize = 2;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub score_types: Vec<String>,
    /// Document key of the corpus-wide summary row; `None` keeps every row.
    pub sentinel: Option<String>,
    pub modes: Vec<CorrelationMode>,
    pub sort_by: SortKey,
    pub non_finite: NonFinitePolicy,
}

impl EngineConfig {
    pub fn new(score_types: Vec<String>) -> Self {
        Self {
            score_types,
            sentinel: Some(DEFAULT_SENTINEL.to_string()),
            modes: vec![
                CorrelationMode::PerSystem,
                CorrelationMode::Pooled,
                CorrelationMode::Aggregate,
            ],
            sort_by: SortKey::Input,
            non_finite: NonFinitePolicy::Exclude,
        }
    }

    fn runs(&self, mode: CorrelationMode) -> bool {
        self.modes.contains(&mode)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineReport {
    pub join: JoinSummary,
    pub per_system: Vec<CorrelationResult>,
    pub pooled: Vec<CorrelationResult>,
    pub aggregate: Vec<CorrelationResult>,
    pub averages: Vec<AverageScores>,
    pub distributions: Vec<ScoreDistribution>,
    pub failures: Vec<PartitionFailure>,
}

impl EngineReport {
    /// Every variant in one list, ranked by |r| when requested.
    pub fn consolidated(&self, sort_by: SortKey) -> Vec<CorrelationResult> {
        let mut all: Vec<CorrelationResult> = self
            .per_system
            .iter()
            .chain(&self.pooled)
            .chain(&self.aggregate)
            .cloned()
            .collect();
        if sort_by == SortKey::AbsCorrelation {
            rank_by_abs_correlation(&mut all);
        }
        all
    }
}

#[derive(Debug, Clone, Default)]
pub struct Joined {
    pub records: Vec<MergedRecord>,
    /// Systems seen in the filtered score table, in first-seen order.
    pub systems: Vec<String>,
    pub summary: JoinSummary,
}

/// Builds the document -> ratio lookup. A key listed twice must carry the
/// same ratio both times.
pub fn index_ratios<I>(entries: I) -> Result<BTreeMap<String, f64>, InputError>
where
    I: IntoIterator<Item = (String, f64)>,
{
    let mut index = BTreeMap::new();
    for (key, ratio) in entries {
        match index.get(&key) {
            Some(&first) if first != ratio => {
                return Err(InputError::ConflictingRatio {
                    key,
                    first,
                    second: ratio,
                });
            }
            Some(_) => {}
            None => {
                index.insert(key, ratio);
            }
        }
    }
    Ok(index)
}

pub fn filter_sentinel<'a>(
    scores: &'a [ScoreRecord],
    sentinel: Option<&str>,
) -> Vec<&'a ScoreRecord> {
    scores
        .iter()
        .filter(|record| sentinel.is_none_or(|sentinel| record.document != sentinel))
        .collect()
}

pub fn join(
    scores: &[ScoreRecord],
    ratios: &BTreeMap<String, f64>,
    sentinel: Option<&str>,
) -> Joined {
    let kept = filter_sentinel(scores, sentinel);

    let mut systems = Vec::new();
    let mut seen_systems = HashSet::new();
    let mut score_documents = BTreeSet::new();
    let mut joined_documents = BTreeMap::new();
    let mut records = Vec::with_capacity(kept.len());

    for record in &kept {
        if seen_systems.insert(record.system.as_str()) {
            systems.push(record.system.clone());
        }
        score_documents.insert(record.document.as_str());

        let Some(&ratio) = ratios.get(&record.document) else {
            continue;
        };
        joined_documents.insert(record.document.clone(), ratio);
        records.push(MergedRecord {
            document: record.document.clone(),
            system: record.system.clone(),
            scores: record.scores.clone(),
            ratio,
        });
    }

    let unmatched_score_documents: Vec<String> = score_documents
        .iter()
        .filter(|document| !ratios.contains_key(**document))
        .map(|document| document.to_string())
        .collect();
    let unmatched_ratio_documents: Vec<String> = ratios
        .keys()
        .filter(|key| !score_documents.contains(key.as_str()))
        .cloned()
        .collect();
    let non_finite_ratio_documents: Vec<String> = joined_documents
        .iter()
        .filter(|(_, ratio)| !ratio.is_finite())
        .map(|(document, _)| document.clone())
        .collect();

    let summary = JoinSummary {
        score_rows: scores.len(),
        sentinel_rows_dropped: scores.len() - kept.len(),
        merged_rows: records.len(),
        documents: joined_documents
            .into_iter()
            .map(|(document, ratio)| JoinedDocument { document, ratio })
            .collect(),
        unmatched_score_documents,
        unmatched_ratio_documents,
        non_finite_ratio_documents,
    };

    info!(
        score_rows = summary.score_rows,
        sentinel_rows_dropped = summary.sentinel_rows_dropped,
        merged_rows = summary.merged_rows,
        documents = summary.documents.len(),
        systems = systems.len(),
        "joined scores with ratios"
    );
    if !summary.unmatched_score_documents.is_empty() || !summary.unmatched_ratio_documents.is_empty()
    {
        debug!(
            score_only = ?summary.unmatched_score_documents,
            ratio_only = ?summary.unmatched_ratio_documents,
            "documents dropped by the join"
        );
    }

    Joined {
        records,
        systems,
        summary,
    }
}

/// Mean of every score type across systems, one row per document, ordered
/// by document key.
pub fn average_scores(
    scores: &[ScoreRecord],
    score_types: usize,
    sentinel: Option<&str>,
) -> Vec<AverageScores> {
    let mut grouped: BTreeMap<&str, Vec<&ScoreRecord>> = BTreeMap::new();
    for record in filter_sentinel(scores, sentinel) {
        grouped
            .entry(record.document.as_str())
            .or_default()
            .push(record);
    }

    grouped
        .into_iter()
        .map(|(document, rows)| {
            let scores = (0..score_types)
                .map(|index| {
                    let values: Vec<f64> = rows
                        .iter()
                        .filter_map(|row| row.scores.get(index).copied().flatten())
                        .collect();
                    mean(&values)
                })
                .collect();
            AverageScores {
                document: document.to_string(),
                systems: rows.len(),
                scores,
            }
        })
        .collect()
}

/// Stable sort by `|r|` descending; NaN coefficients go last.
pub fn rank_by_abs_correlation(results: &mut [CorrelationResult]) {
    results.sort_by(|a, b| {
        let (a, b) = (a.abs_correlation(), b.abs_correlation());
        a.is_nan().cmp(&b.is_nan()).then_with(|| b.total_cmp(&a))
    });
}

struct Sample<'a> {
    document: &'a str,
    score: Option<f64>,
    ratio: f64,
}

struct Fit {
    correlation: f64,
    p_value: f64,
    documents: usize,
    samples: usize,
}

fn correlate_samples(
    samples: &[Sample<'_>],
    non_finite: NonFinitePolicy,
) -> Result<Fit, PartitionError> {
    let scored: Vec<&Sample<'_>> = samples
        .iter()
        .filter(|sample| sample.score.is_some_and(f64::is_finite))
        .collect();
    if scored.is_empty() {
        return Err(PartitionError::EmptyPartition);
    }

    let usable: Vec<&Sample<'_>> = scored
        .into_iter()
        .filter(|sample| non_finite == NonFinitePolicy::Retain || sample.ratio.is_finite())
        .collect();

    let documents = usable
        .iter()
        .map(|sample| sample.document)
        .collect::<HashSet<_>>()
        .len();
    if documents < MIN_DOCUMENTS {
        return Err(PartitionError::InsufficientData {
            documents,
            samples: usable.len(),
            reason: format!("needs at least {MIN_DOCUMENTS} distinct documents"),
        });
    }

    let scores: Vec<f64> = usable
        .iter()
        .filter_map(|sample| sample.score)
        .collect();
    let ratios: Vec<f64> = usable.iter().map(|sample| sample.ratio).collect();

    let fit = pearson(&scores, &ratios).ok_or_else(|| PartitionError::InsufficientData {
        documents,
        samples: usable.len(),
        reason: "score or ratio values are constant".to_string(),
    })?;

    Ok(Fit {
        correlation: fit.r,
        p_value: fit.p_value,
        documents,
        samples: usable.len(),
    })
}

struct Collector<'a> {
    config: &'a EngineConfig,
    failures: Vec<PartitionFailure>,
}

impl Collector<'_> {
    fn record(
        &mut self,
        variant: Variant,
        system: Option<&str>,
        score_index: usize,
        samples: &[Sample<'_>],
        out: &mut Vec<CorrelationResult>,
    ) {
        let config = self.config;
        let score_type = &config.score_types[score_index];
        match correlate_samples(samples, config.non_finite) {
            Ok(fit) => out.push(CorrelationResult {
                variant,
                system: system.map(ToOwned::to_owned),
                score_type: score_type.clone(),
                correlation: fit.correlation,
                p_value: fit.p_value,
                documents: fit.documents,
                samples: fit.samples,
            }),
            Err(error) => self.fail(variant, system, score_type, error),
        }
    }

    fn fail(
        &mut self,
        variant: Variant,
        system: Option<&str>,
        score_type: &str,
        error: PartitionError,
    ) {
        let failure = PartitionFailure {
            variant,
            system: system.map(ToOwned::to_owned),
            score_type: score_type.to_string(),
            error,
        };
        warn!(partition = %failure.label(), reason = %failure.error, "partition skipped");
        self.failures.push(failure);
    }
}

fn merged_samples<'a>(
    records: impl Iterator<Item = &'a MergedRecord>,
    score_index: usize,
) -> Vec<Sample<'a>> {
    records
        .map(|record| Sample {
            document: record.document.as_str(),
            score: record.scores.get(score_index).copied().flatten(),
            ratio: record.ratio,
        })
        .collect()
}

fn distributions(joined: &Joined, score_types: &[String]) -> Vec<ScoreDistribution> {
    let mut out = Vec::new();
    for system in &joined.systems {
        for (index, score_type) in score_types.iter().enumerate() {
            let values: Vec<f64> = joined
                .records
                .iter()
                .filter(|record| &record.system == system)
                .filter_map(|record| record.scores.get(index).copied().flatten())
                .filter(|value| value.is_finite())
                .collect();
            // Score types with no values here are reported as EmptyPartition
            // failures by the per-system pass.
            let Some(mean) = mean(&values) else {
                continue;
            };
            out.push(ScoreDistribution {
                system: system.clone(),
                score_type: score_type.clone(),
                count: values.len(),
                mean,
                std_dev: sample_std_dev(&values),
            });
        }
    }
    out
}

/// Runs every enabled correlation variant. Partition-level failures are
/// collected in the report; nothing here aborts the run.
pub fn run(
    config: &EngineConfig,
    scores: &[ScoreRecord],
    ratios: &BTreeMap<String, f64>,
) -> EngineReport {
    let sentinel = config.sentinel.as_deref();
    let joined = join(scores, ratios, sentinel);

    if config.non_finite == NonFinitePolicy::Exclude
        && !joined.summary.non_finite_ratio_documents.is_empty()
    {
        info!(
            documents = joined.summary.non_finite_ratio_documents.len(),
            "excluding non-finite ratios from correlation input"
        );
    }

    let mut collector = Collector {
        config,
        failures: Vec::new(),
    };
    let mut report = EngineReport::default();

    if config.runs(CorrelationMode::PerSystem) {
        for system in &joined.systems {
            let rows: Vec<&MergedRecord> = joined
                .records
                .iter()
                .filter(|record| &record.system == system)
                .collect();
            for index in 0..config.score_types.len() {
                if rows.is_empty() {
                    let score_type = &config.score_types[index];
                    collector.fail(
                        Variant::PerSystem,
                        Some(system.as_str()),
                        score_type,
                        PartitionError::EmptyPartition,
                    );
                    continue;
                }
                let samples = merged_samples(rows.iter().copied(), index);
                collector.record(
                    Variant::PerSystem,
                    Some(system.as_str()),
                    index,
                    &samples,
                    &mut report.per_system,
                );
            }
        }
    }

    if config.runs(CorrelationMode::Pooled) {
        for index in 0..config.score_types.len() {
            let samples = merged_samples(joined.records.iter(), index);
            collector.record(Variant::Pooled, None, index, &samples, &mut report.pooled);
        }
    }

    if config.runs(CorrelationMode::Aggregate) {
        report.averages = average_scores(scores, config.score_types.len(), sentinel);
        for index in 0..config.score_types.len() {
            let samples: Vec<Sample<'_>> = report
                .averages
                .iter()
                .filter_map(|average| {
                    ratios.get(&average.document).map(|&ratio| Sample {
                        document: average.document.as_str(),
                        score: average.scores.get(index).copied().flatten(),
                        ratio,
                    })
                })
                .collect();
            collector.record(Variant::Aggregate, None, index, &samples, &mut report.aggregate);
        }
    }

    if config.sort_by == SortKey::AbsCorrelation {
        rank_by_abs_correlation(&mut report.per_system);
        rank_by_abs_correlation(&mut report.pooled);
        rank_by_abs_correlation(&mut report.aggregate);
    }

    report.distributions = distributions(&joined, &config.score_types);
    report.failures = collector.failures;
    report.join = joined.summary;

    info!(
        per_system = report.per_system.len(),
        pooled = report.pooled.len(),
        aggregate = report.aggregate.len(),
        failed = report.failures.len(),
        "correlation complete"
    );

    report
}
