use anyhow::Result;
use tracing::info;

use crate::cli::PipelineArgs;
use crate::commands::{compress, correlate};

/// `compress` then `correlate`, handing the ratio table over on disk.
pub fn run(args: PipelineArgs) -> Result<()> {
    let PipelineArgs {
        compress: compress_args,
        correlate: mut correlate_args,
    } = args;

    let results = compress::compress(&compress_args)?;
    correlate_args.ratios_path = compress_args.output_path.clone();

    let report = correlate::correlate(&correlate_args)?;
    info!(
        documents = results.len(),
        joined_documents = report.join.documents.len(),
        failed_partitions = report.failures.len(),
        "pipeline completed"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cli::{
        CompressArgs, CompressionMode, CorrelateArgs, CorrelationMode, DEFAULT_SCORE_TYPES,
        NonFinitePolicy, SortKey,
    };

    #[test]
    fn pipeline_feeds_fresh_ratios_into_correlation() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let corpus = root.join("zh");
        fs::create_dir_all(&corpus).unwrap();
        fs::write(corpus.join("a.tsv"), "the cat sat on the mat\tx\n".repeat(8)).unwrap();
        fs::write(corpus.join("b.tsv"), "qwerty zxcv plmokn ijb uhv\tx\n").unwrap();
        fs::write(corpus.join("c.tsv"), "the cat sat\tx\nthe dog ran far away\ty\n").unwrap();
        fs::write(
            root.join("scores.tsv"),
            "Document\tLLM\tCHRF Score\tBLEU Score\tBERT Score\tBLEURT Score\n\
             a.tsv\tSysA\t50\t20\t0.9\t0.6\n\
             b.tsv\tSysA\t30\t8\t0.7\t0.2\n\
             c.tsv\tSysA\t41\t15\t0.8\t0.4\n\
             all_files.tsv\tSysA\t40\t14\t0.8\t0.4\n",
        )
        .unwrap();

        let args = PipelineArgs {
            compress: CompressArgs {
                algorithm: CompressionMode::SelfRelative,
                corpus_dir: corpus,
                extension: "tsv".to_string(),
                reference_path: root.join("unused.txt"),
                level: 9,
                output_path: root.join("out").join("ratios.csv"),
                manifest_path: None,
                print: false,
            },
            correlate: CorrelateArgs {
                scores_path: root.join("scores.tsv"),
                ratios_path: root.join("stale.csv"),
                output_dir: root.join("out"),
                report_path: None,
                document_column: "Document".to_string(),
                system_column: "LLM".to_string(),
                score_columns: DEFAULT_SCORE_TYPES.map(String::from).to_vec(),
                sentinel: "all_files.tsv".to_string(),
                keep_sentinel: false,
                modes: vec![CorrelationMode::Pooled],
                sort_by: SortKey::Input,
                non_finite: NonFinitePolicy::Exclude,
                key_pattern: None,
            },
        };

        run(args).unwrap();

        let pooled = fs::read_to_string(root.join("out").join("overall_correlation_results.csv"))
            .unwrap();
        assert_eq!(pooled.lines().count(), 5);
        assert!(root.join("out").join("correlation_report.json").exists());
    }
}
