use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::calculator::{Algorithm, Document, GzipCodec, ReferenceContext, sort_results};
use crate::cli::{CompressArgs, CompressionMode};
use crate::model::{CompressRunManifest, CompressionResult};
use crate::table::{render_ratio_report, render_ratio_table};
use crate::util::{hash_input, now_utc_string, read_utf8, write_json_pretty, write_text};

pub fn run(args: CompressArgs) -> Result<()> {
    compress(&args)?;
    Ok(())
}

/// Computes, sorts and writes the ratio table; returns the sorted results.
pub fn compress(args: &CompressArgs) -> Result<Vec<CompressionResult>> {
    let codec = GzipCodec::new(args.level);

    info!(
        algorithm = args.algorithm.as_str(),
        corpus_dir = %args.corpus_dir.display(),
        codec = codec.name(),
        level = codec.level(),
        "starting compression"
    );

    let reference = match args.algorithm {
        CompressionMode::Reference => Some(load_reference(&args.reference_path, &codec)?),
        CompressionMode::SelfRelative => None,
    };
    let algorithm = match &reference {
        Some(context) => Algorithm::ReferenceRelative(context),
        None => Algorithm::SelfRelative,
    };

    let mut paths = discover_documents(&args.corpus_dir, &args.extension)?;
    paths.sort();
    if paths.is_empty() {
        bail!(
            "no *.{} documents found in {}",
            args.extension,
            args.corpus_dir.display()
        );
    }

    let mut results = Vec::with_capacity(paths.len());
    let mut hashes = Vec::with_capacity(paths.len());
    for path in &paths {
        let document = Document::load(path)?;
        let result = algorithm
            .measure(&document, &codec)
            .with_context(|| format!("failed to compress {}", path.display()))?;
        debug!(
            key = %result.key,
            original_size = result.original_size,
            measured_size = result.measured_size,
            ratio = result.ratio,
            "measured document"
        );
        results.push(result);
        hashes.push(hash_input(path)?);
    }

    sort_results(&mut results);

    write_text(&args.output_path, &render_ratio_table(&results))?;
    info!(path = %args.output_path.display(), documents = results.len(), "wrote ratio table");

    if args.print {
        print!("{}", render_ratio_report(&results));
    }

    let manifest = CompressRunManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        mode: args.algorithm.as_str().to_string(),
        codec: codec.name().to_string(),
        level: codec.level(),
        corpus_dir: args.corpus_dir.display().to_string(),
        reference: match args.algorithm {
            CompressionMode::Reference => Some(hash_input(&args.reference_path)?),
            CompressionMode::SelfRelative => None,
        },
        reference_size: reference.as_ref().map(ReferenceContext::compressed_size),
        document_count: results.len(),
        infinite_ratio_count: results.iter().filter(|result| result.ratio.is_infinite()).count(),
        output_path: args.output_path.display().to_string(),
        documents: hashes,
    };
    let manifest_path = args
        .manifest_path
        .clone()
        .unwrap_or_else(|| args.output_path.with_extension("manifest.json"));
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote compression manifest");

    Ok(results)
}

fn load_reference(path: &Path, codec: &GzipCodec) -> Result<ReferenceContext> {
    let text = read_utf8(path)?;
    let context = ReferenceContext::new(text, codec)
        .with_context(|| format!("failed to compress reference corpus {}", path.display()))?;
    info!(
        path = %path.display(),
        bytes = context.text().len(),
        compressed_size = context.compressed_size(),
        "loaded reference corpus"
    );
    Ok(context)
}

fn discover_documents(corpus_dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut documents = Vec::new();

    let entries = fs::read_dir(corpus_dir)
        .with_context(|| format!("failed to read {}", corpus_dir.display()))?;

    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", corpus_dir.display()))?;
        let path = entry.path();

        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(extension))
            .unwrap_or(false);

        if matches {
            documents.push(path);
        }
    }

    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InputError;

    fn args(dir: &Path, algorithm: CompressionMode) -> CompressArgs {
        CompressArgs {
            algorithm,
            corpus_dir: dir.join("zh"),
            extension: "tsv".to_string(),
            reference_path: dir.join("reference.txt"),
            level: 9,
            output_path: dir.join("out").join("compression_ratios.csv"),
            manifest_path: None,
            print: false,
        }
    }

    fn seed_corpus(dir: &Path) {
        let corpus = dir.join("zh");
        fs::create_dir_all(&corpus).unwrap();
        fs::write(corpus.join("d1.tsv"), "AAAA\tgloss\n").unwrap();
        fs::write(corpus.join("d2.tsv"), "XQZJ\tgloss\n").unwrap();
        fs::write(corpus.join("notes.txt"), "ignored").unwrap();
    }

    #[test]
    fn reference_run_writes_sorted_table_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        seed_corpus(dir.path());
        fs::write(dir.path().join("reference.txt"), "AAAA").unwrap();

        let args = args(dir.path(), CompressionMode::Reference);
        let results = compress(&args).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "d1.tsv");
        assert!(results.iter().all(|result| result.reference_size.is_some()));

        let table = fs::read_to_string(&args.output_path).unwrap();
        assert!(table.starts_with("File,Original Size,Measured Size,Ratio\n"));
        assert_eq!(table.lines().count(), 3);

        let manifest_path = dir.path().join("out").join("compression_ratios.manifest.json");
        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(manifest_path).unwrap()).unwrap();
        assert_eq!(manifest["mode"], "reference");
        assert_eq!(manifest["document_count"], 2);
        assert_eq!(manifest["documents"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn self_run_does_not_need_a_reference() {
        let dir = tempfile::tempdir().unwrap();
        seed_corpus(dir.path());

        let results = compress(&args(dir.path(), CompressionMode::SelfRelative)).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|result| result.reference_size.is_none()));
    }

    #[test]
    fn missing_reference_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        seed_corpus(dir.path());

        let err = compress(&args(dir.path(), CompressionMode::Reference)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InputError>(),
            Some(InputError::MissingInput { .. })
        ));
    }

    #[test]
    fn mis_encoded_document_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        seed_corpus(dir.path());
        fs::write(dir.path().join("zh").join("d3.tsv"), [0xC3, 0x28, b'\n']).unwrap();

        let err = compress(&args(dir.path(), CompressionMode::SelfRelative)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<InputError>(),
            Some(InputError::Decode { .. })
        ));
    }
}
