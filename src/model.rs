use serde::Serialize;

use crate::error::PartitionError;

#[derive(Debug, Clone, PartialEq)]
pub struct CompressionResult {
    pub key: String,
    pub original_size: usize,
    pub reference_size: Option<usize>,
    pub measured_size: usize,
    pub ratio: f64,
}

/// One (document, system) row of the score table. `scores` is aligned with
/// the configured score types; a blank cell is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRecord {
    pub document: String,
    pub system: String,
    pub scores: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub document: String,
    pub system: String,
    pub scores: Vec<Option<f64>>,
    pub ratio: f64,
}

/// Per-document mean of each score type across systems.
#[derive(Debug, Clone, PartialEq)]
pub struct AverageScores {
    pub document: String,
    pub systems: usize,
    pub scores: Vec<Option<f64>>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    PerSystem,
    Pooled,
    Aggregate,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerSystem => "per_system",
            Self::Pooled => "pooled",
            Self::Aggregate => "aggregate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationResult {
    pub variant: Variant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub score_type: String,
    pub correlation: f64,
    pub p_value: f64,
    pub documents: usize,
    pub samples: usize,
}

impl CorrelationResult {
    pub fn abs_correlation(&self) -> f64 {
        self.correlation.abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreDistribution {
    pub system: String,
    pub score_type: String,
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; undefined below two values.
    pub std_dev: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionFailure {
    pub variant: Variant,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub score_type: String,
    pub error: PartitionError,
}

impl PartitionFailure {
    pub fn label(&self) -> String {
        match &self.system {
            Some(system) => format!("{}:{}:{}", self.variant.as_str(), system, self.score_type),
            None => format!("{}:{}", self.variant.as_str(), self.score_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinedDocument {
    pub document: String,
    pub ratio: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinSummary {
    pub score_rows: usize,
    pub sentinel_rows_dropped: usize,
    pub merged_rows: usize,
    pub documents: Vec<JoinedDocument>,
    pub unmatched_score_documents: Vec<String>,
    pub unmatched_ratio_documents: Vec<String>,
    pub non_finite_ratio_documents: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputHash {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompressRunManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub mode: String,
    pub codec: String,
    pub level: u32,
    pub corpus_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<InputHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_size: Option<usize>,
    pub document_count: usize,
    pub infinite_ratio_count: usize,
    pub output_path: String,
    pub documents: Vec<InputHash>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelateSettings {
    pub score_types: Vec<String>,
    pub sentinel: Option<String>,
    pub modes: Vec<String>,
    pub sort_by: String,
    pub non_finite: String,
    pub key_pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelateRunReport {
    pub manifest_version: u32,
    pub generated_at: String,
    pub scores: InputHash,
    pub ratios: InputHash,
    pub settings: CorrelateSettings,
    pub join: JoinSummary,
    pub results: Vec<CorrelationResult>,
    pub distributions: Vec<ScoreDistribution>,
    pub failures: Vec<PartitionFailure>,
    pub outputs: Vec<String>,
}
