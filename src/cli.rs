use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "royalty-ingest",
    version,
    about = "Royalty report and invoice ingestion tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect uploaded royalty files without committing anything.
    Analyze(AnalyzeArgs),
    /// Analyze, gate on artist decisions, then commit a batch of files.
    Import(ImportArgs),
    /// Match an invoice extraction against the artist catalog and stage it.
    InvoiceStage(InvoiceStageArgs),
    /// Confirm a staged expense entry into the ledger.
    InvoiceCreate(InvoiceCreateArgs),
    Status(StatusArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum SourcePlatform {
    Tunecore,
    Believe,
    Bandcamp,
    Squarespace,
    Groover,
    Submithub,
}

impl SourcePlatform {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tunecore => "tunecore",
            Self::Believe => "believe",
            Self::Bandcamp => "bandcamp",
            Self::Squarespace => "squarespace",
            Self::Groover => "groover",
            Self::Submithub => "submithub",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct AnalyzeArgs {
    #[arg(long, default_value = ".cache/royalty-ingest")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub source: SourcePlatform,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    /// Royalty CSV files to analyze.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    #[arg(long, default_value = ".cache/royalty-ingest")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub source: SourcePlatform,

    /// JSON map of ambiguous artist token -> bool (true = single artist).
    #[arg(long)]
    pub decisions_path: Option<PathBuf>,

    /// JSON map of filename -> column mapping overrides.
    #[arg(long)]
    pub mapping_path: Option<PathBuf>,

    /// Fallback period bounds for files whose period cannot be inferred.
    #[arg(long)]
    pub period_start: Option<chrono::NaiveDate>,

    #[arg(long)]
    pub period_end: Option<chrono::NaiveDate>,

    /// File names to mark skipped instead of committing.
    #[arg(long = "skip")]
    pub skip: Vec<String>,

    #[arg(long)]
    pub report_path: Option<PathBuf>,

    /// Royalty CSV files to import, in commit order.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct InvoiceStageArgs {
    #[arg(long, default_value = ".cache/royalty-ingest")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Extraction collaborator output (ExtractedInvoiceCandidate JSON).
    #[arg(long)]
    pub extraction_path: PathBuf,

    #[arg(long)]
    pub staged_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct InvoiceCreateArgs {
    #[arg(long, default_value = ".cache/royalty-ingest")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Staged expense entry JSON, with operator overrides applied.
    #[arg(long)]
    pub staged_path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = ".cache/royalty-ingest")]
    pub cache_root: PathBuf,

    #[arg(long)]
    pub db_path: Option<PathBuf>,
}
