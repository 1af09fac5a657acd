use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Run-fatal failures raised while reading inputs.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("input is not valid UTF-8: {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("required input is missing: {path}")]
    MissingInput { path: PathBuf },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}:{line}: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("document {key} carries conflicting ratios {first} and {second}")]
    ConflictingRatio { key: String, first: f64, second: f64 },
}

/// Failures scoped to one (system, score type) partition. Sibling
/// partitions keep computing.
#[derive(Debug, Error, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionError {
    #[error("insufficient data ({documents} documents, {samples} samples): {reason}")]
    InsufficientData {
        documents: usize,
        samples: usize,
        reason: String,
    },

    #[error("no rows survived the join")]
    EmptyPartition,
}

impl PartitionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => "insufficient_data",
            Self::EmptyPartition => "empty_partition",
        }
    }
}
