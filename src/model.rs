use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The closed set of normalized attributes a revenue row can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    ArtistName,
    TrackTitle,
    ReleaseTitle,
    Isrc,
    Upc,
    Territory,
    Store,
    SaleType,
    Quantity,
    GrossAmount,
    Currency,
    PeriodStart,
    PeriodEnd,
}

impl CanonicalField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ArtistName => "artist_name",
            Self::TrackTitle => "track_title",
            Self::ReleaseTitle => "release_title",
            Self::Isrc => "isrc",
            Self::Upc => "upc",
            Self::Territory => "territory",
            Self::Store => "store",
            Self::SaleType => "sale_type",
            Self::Quantity => "quantity",
            Self::GrossAmount => "gross_amount",
            Self::Currency => "currency",
            Self::PeriodStart => "period_start",
            Self::PeriodEnd => "period_end",
        }
    }
}

/// One column of an operator-confirmed mapping. `target_field == None`
/// means the column is deliberately ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnRule {
    pub source_column: String,
    pub target_field: Option<CanonicalField>,
}

pub type ColumnMapping = Vec<ColumnRule>;

/// Reference to an earlier committed import covering the same
/// (source, period) triple. Advisory only, never a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorImportRef {
    pub import_id: String,
    pub filename: String,
    pub committed_at: String,
}

/// Outcome of inspecting one uploaded file: header, guessed mapping,
/// inferred period bounds and the ambiguous artist tokens found in the
/// preview window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub columns: Vec<String>,
    pub guessed_mapping: ColumnMapping,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub total_distinct_artists: usize,
    pub ambiguous_artist_tokens: Vec<String>,
    pub duplicate_of: Option<PriorImportRef>,
    pub preview_row_count: usize,
}

/// Per-file state machine driven by the orchestrator.
///
/// `Pending -> Analyzing -> (Ready | Error)`;
/// `Ready -> (Skipped | Committing)`; `Committing -> (Imported | Error)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Pending,
    Analyzing,
    Ready,
    Skipped,
    Committing,
    Imported,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Ready => "ready",
            Self::Skipped => "skipped",
            Self::Committing => "committing",
            Self::Imported => "imported",
            Self::Error => "error",
        }
    }
}

/// One row of canonical fields, produced only when the required fields
/// resolved to usable values after mapping and artist splitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRevenueRecord {
    pub source_row_number: i64,
    pub artist_name: String,
    pub track_title: Option<String>,
    pub release_title: Option<String>,
    pub isrc: Option<String>,
    pub upc: Option<String>,
    pub territory: Option<String>,
    pub store: Option<String>,
    pub sale_type: Option<String>,
    pub quantity: Option<i64>,
    pub gross_amount_cents: i64,
    pub currency: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

/// Immutable outcome of one file's commit attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileImportResult {
    pub file_id: String,
    pub file_name: String,
    pub success_row_count: usize,
    pub error_row_count: usize,
    pub status: FileStatus,
    pub error_detail: Option<String>,
}

/// Untrusted output of the external invoice extraction collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedInvoiceCandidate {
    pub filename: String,
    #[serde(default)]
    pub vendor_name: Option<String>,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub total_amount: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub date_hint: Option<NaiveDate>,
    #[serde(default)]
    pub artist_hint: Option<String>,
    #[serde(default)]
    pub category_hint: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

fn default_currency() -> String {
    "EUR".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpenseScope {
    Catalog,
    Release,
    Track,
}

impl ExpenseScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Catalog => "catalog",
            Self::Release => "release",
            Self::Track => "track",
        }
    }
}

/// Operator-editable fields layered over an extraction candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseOverrides {
    pub artist_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: String,
    pub category: Option<String>,
    pub scope: ExpenseScope,
    pub scope_id: Option<String>,
    pub effective_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub document_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum CreationState {
    NotCreated,
    Creating,
    Created(String),
    Failed(String),
}

/// An extraction result awaiting human confirmation. Exists only until the
/// operator confirms or discards it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedExpenseEntry {
    pub candidate: ExtractedInvoiceCandidate,
    pub overrides: ExpenseOverrides,
    pub creation: CreationState,
}

/// Immutable expense ledger row created from a confirmed staged entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub artist_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
    pub category: Option<String>,
    pub scope: ExpenseScope,
    pub scope_id: Option<String>,
    pub description: Option<String>,
    pub document_path: Option<String>,
    pub effective_date: NaiveDate,
    pub created_at: String,
}

/// Per-file section of the analysis report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAnalysisReport {
    pub file_name: String,
    pub status: FileStatus,
    pub analysis: Option<FileAnalysis>,
    pub error_detail: Option<String>,
}

/// Written by `analyze`, and by `import` when undecided artist tokens halt
/// the batch before commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at: String,
    pub source: String,
    pub files: Vec<FileAnalysisReport>,
    pub pending_decisions: Vec<String>,
    pub warnings: Vec<String>,
}

/// Written by `import` after the commit phase finishes iterating the batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRunReport {
    pub run_id: String,
    pub started_at: String,
    pub updated_at: String,
    pub source: String,
    pub db_path: String,
    pub results: Vec<FileImportResult>,
    pub warnings: Vec<String>,
}
