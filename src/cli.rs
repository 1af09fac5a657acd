use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

pub const DEFAULT_SCORE_TYPES: [&str; 4] =
    ["CHRF Score", "BLEU Score", "BERT Score", "BLEURT Score"];

#[derive(Parser, Debug)]
#[command(
    name = "compressibility",
    version,
    about = "Document compressibility ratios and their correlation with translation quality scores"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Compress(CompressArgs),
    Correlate(CorrelateArgs),
    Pipeline(PipelineArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompressionMode {
    Reference,
    #[value(name = "self")]
    SelfRelative,
}

impl CompressionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::SelfRelative => "self",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CorrelationMode {
    PerSystem,
    Pooled,
    Aggregate,
}

impl CorrelationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerSystem => "per-system",
            Self::Pooled => "pooled",
            Self::Aggregate => "aggregate",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum SortKey {
    Input,
    AbsCorrelation,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::AbsCorrelation => "abs-correlation",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum NonFinitePolicy {
    Exclude,
    Retain,
}

impl NonFinitePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exclude => "exclude",
            Self::Retain => "retain",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct CompressArgs {
    #[arg(long, value_enum, default_value_t = CompressionMode::Reference)]
    pub algorithm: CompressionMode,

    #[arg(long, default_value = "zh")]
    pub corpus_dir: PathBuf,

    #[arg(long, default_value = "tsv")]
    pub extension: String,

    #[arg(long, default_value = "data/chn_refence_corpus.txt")]
    pub reference_path: PathBuf,

    #[arg(long, default_value_t = 9, value_parser = clap::value_parser!(u32).range(0..=9))]
    pub level: u32,

    #[arg(long, default_value = "compression_ratios.csv")]
    pub output_path: PathBuf,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub print: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CorrelateArgs {
    #[arg(long, default_value = "updated_merged_output.tsv")]
    pub scores_path: PathBuf,

    #[arg(long, default_value = "compression_ratios.csv")]
    pub ratios_path: PathBuf,

    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    #[arg(long, default_value = "Document")]
    pub document_column: String,

    #[arg(long, default_value = "LLM")]
    pub system_column: String,

    #[arg(long = "score-column", default_values_t = default_score_columns())]
    pub score_columns: Vec<String>,

    #[arg(long, default_value = "all_files.tsv")]
    pub sentinel: String,

    #[arg(long, default_value_t = false)]
    pub keep_sentinel: bool,

    #[arg(
        long = "mode",
        value_enum,
        default_values_t = [CorrelationMode::PerSystem, CorrelationMode::Pooled, CorrelationMode::Aggregate]
    )]
    pub modes: Vec<CorrelationMode>,

    #[arg(long, value_enum, default_value_t = SortKey::Input)]
    pub sort_by: SortKey,

    #[arg(long, value_enum, default_value_t = NonFinitePolicy::Exclude)]
    pub non_finite: NonFinitePolicy,

    #[arg(long)]
    pub key_pattern: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    #[command(flatten)]
    pub compress: CompressArgs,

    #[command(flatten)]
    pub correlate: CorrelateArgs,
}

fn default_score_columns() -> Vec<String> {
    DEFAULT_SCORE_TYPES.map(String::from).to_vec()
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn correlate_defaults_cover_all_modes_and_score_types() {
        let cli = Cli::parse_from(["compressibility", "correlate"]);
        let Commands::Correlate(args) = cli.command else {
            panic!("expected correlate");
        };
        assert_eq!(args.score_columns, DEFAULT_SCORE_TYPES);
        assert_eq!(args.modes.len(), 3);
        assert_eq!(args.sort_by, SortKey::Input);
        assert_eq!(args.non_finite, NonFinitePolicy::Exclude);
        assert!(!args.keep_sentinel);
    }

    #[test]
    fn compress_accepts_self_algorithm() {
        let cli = Cli::parse_from([
            "compressibility",
            "compress",
            "--algorithm",
            "self",
            "--level",
            "6",
        ]);
        let Commands::Compress(args) = cli.command else {
            panic!("expected compress");
        };
        assert_eq!(args.algorithm, CompressionMode::SelfRelative);
        assert_eq!(args.level, 6);
    }
}
