use std::io::{self, Write};
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::error::InputError;
use crate::model::CompressionResult;
use crate::util::read_utf8;

pub const DEFAULT_LEVEL: u32 = 9;

/// Gzip with a fixed level. Ratios are only comparable between results
/// produced by the same codec instance.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct GzipCodec {
    level: u32,
}

impl GzipCodec {
    pub fn new(level: u32) -> Self {
        Self {
            level: level.min(9),
        }
    }

    pub fn name(&self) -> &'static str {
        "gzip"
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn compressed_len(&self, payload: &[u8]) -> io::Result<usize> {
        let mut encoder = GzEncoder::new(
            Vec::with_capacity(payload.len() / 2 + 32),
            Compression::new(self.level),
        );
        encoder.write_all(payload)?;
        Ok(encoder.finish()?.len())
    }
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self::new(DEFAULT_LEVEL)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub key: String,
    pub payload: String,
}

impl Document {
    pub fn from_raw(key: impl Into<String>, raw: &str) -> Self {
        Self {
            key: key.into(),
            payload: extract_payload(raw),
        }
    }

    pub fn load(path: &Path) -> Result<Self, InputError> {
        let key = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToOwned::to_owned)
            .ok_or_else(|| InputError::Malformed {
                path: path.to_path_buf(),
                line: 0,
                message: "document file name is not valid UTF-8".to_string(),
            })?;
        let raw = read_utf8(path)?;
        Ok(Self::from_raw(key, &raw))
    }

    pub fn original_size(&self) -> usize {
        self.payload.len()
    }
}

/// Keeps the first tab-separated field of every line, joined with `\n`.
///
/// Line terminators are stripped before splitting, so a line without a tab
/// contributes its text only. Splitting terminated lines instead would keep
/// the trailing `\n` on such lines and count one more byte for each.
pub fn extract_payload(raw: &str) -> String {
    raw.lines()
        .map(|line| line.split('\t').next().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reference corpus shared read-only by every document of a run. The
/// compressed size is computed once, here.
#[derive(Debug, Clone)]
pub struct ReferenceContext {
    text: String,
    compressed_size: usize,
}

impl ReferenceContext {
    pub fn new(text: String, codec: &GzipCodec) -> io::Result<Self> {
        let compressed_size = codec.compressed_len(text.as_bytes())?;
        Ok(Self {
            text,
            compressed_size,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn compressed_size(&self) -> usize {
        self.compressed_size
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Algorithm<'a> {
    ReferenceRelative(&'a ReferenceContext),
    SelfRelative,
}

impl Algorithm<'_> {
    pub fn measure(&self, document: &Document, codec: &GzipCodec) -> io::Result<CompressionResult> {
        let original_size = document.original_size();

        let (reference_size, measured_size) = match self {
            Self::ReferenceRelative(reference) => {
                let mut joined =
                    Vec::with_capacity(reference.text().len() + document.payload.len());
                joined.extend_from_slice(reference.text().as_bytes());
                joined.extend_from_slice(document.payload.as_bytes());

                let joined_size = codec.compressed_len(&joined)?;
                let reference_size = reference.compressed_size();
                (Some(reference_size), reference_size.abs_diff(joined_size))
            }
            Self::SelfRelative => (None, codec.compressed_len(document.payload.as_bytes())?),
        };

        Ok(CompressionResult {
            key: document.key.clone(),
            original_size,
            reference_size,
            measured_size,
            ratio: compute_ratio(original_size, measured_size),
        })
    }
}

pub fn compute_ratio(original_size: usize, measured_size: usize) -> f64 {
    if measured_size == 0 {
        f64::INFINITY
    } else {
        original_size as f64 / measured_size as f64
    }
}

/// Descending ratio, ties by key.
pub fn sort_results(results: &mut [CompressionResult]) {
    results.sort_by(|a, b| b.ratio.total_cmp(&a.ratio).then_with(|| a.key.cmp(&b.key)));
}
