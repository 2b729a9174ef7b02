use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "hallusample",
    version,
    about = "Hallucination candidate selection and rule-based labeling for MT outputs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert fairseq-generate output into a record CSV.
    Parse(ParseArgs),
    /// Score, select and label records into a compact hallucination dataset.
    Build(BuildArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ParseArgs {
    /// fairseq-generate output file.
    #[arg(long = "gen")]
    pub gen_path: PathBuf,

    #[arg(long)]
    pub out: PathBuf,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputMode {
    Labeled,
    SelectionOnly,
}

impl OutputMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Labeled => "labeled",
            Self::SelectionOnly => "selection-only",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Record CSV produced by `parse` (id, src, ref, hyp, optional metric columns).
    #[arg(long)]
    pub parsed: PathBuf,

    #[arg(long)]
    pub out: PathBuf,

    /// Optional annotation CSV with columns `id`, `is_hallu`.
    #[arg(long)]
    pub annot: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,

    /// JSON file overriding the built-in metric registry.
    #[arg(long)]
    pub registry_path: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputMode::Labeled)]
    pub output_mode: OutputMode,

    #[arg(long, default_value_t = 250)]
    pub worst_k: usize,

    #[arg(long, default_value_t = 0.004)]
    pub tail_frac: f64,

    #[arg(long, default_value_t = 250)]
    pub tail_k: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 3)]
    pub tng_n: usize,

    #[arg(long, default_value_t = 3.0)]
    pub tng_thresh: f64,

    #[arg(long, default_value_t = -5.0, allow_hyphen_values = true)]
    pub seqlog_thresh: f64,

    #[arg(long, default_value_t = 0.3)]
    pub comet_thresh: f64,

    #[arg(long, default_value_t = 45.0)]
    pub chrf_thresh: f64,

    #[arg(long, default_value_t = false)]
    pub compute_chrf: bool,

    /// Precomputed COMET scores aligned to the record order.
    #[arg(long)]
    pub comet_scores: Option<PathBuf>,

    /// Model name the COMET scores were produced with; recorded in the manifest.
    #[arg(long)]
    pub comet_model: Option<String>,

    /// Attention matrices, one `{"attn": [[...]]}` entry per sentence index.
    #[arg(long)]
    pub attn: Option<PathBuf>,

    #[arg(long)]
    pub attn_eos_index: Option<usize>,

    #[arg(long, default_value_t = 0.05)]
    pub attn_ign_threshold: f64,
}
