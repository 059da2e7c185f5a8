use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{NaiveDate, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::analyze::Analyzer;
use crate::disambiguation::DecisionSet;
use crate::error::{PipelineError, Result};
use crate::mapping;
use crate::model::{
    ColumnMapping, FileAnalysis, FileImportResult, FileStatus, NormalizedRevenueRecord,
    PriorImportRef,
};
use crate::normalize::normalize_row;
use crate::store::{ImportCommit, Store};
use crate::util::{decode_text, utc_compact_string};

/// Worker cap for the read-only analysis phase. The commit phase is
/// sequential by design.
pub const ANALYZE_WORKER_CAP: usize = 4;

/// One uploaded file inside an import session.
#[derive(Debug)]
pub struct FileEntry {
    pub file_id: String,
    pub path: PathBuf,
    pub file_name: String,
    pub status: FileStatus,
    pub analysis: Option<FileAnalysis>,
    pub error_detail: Option<String>,
    pub skip_requested: bool,
    pub mapping_override: Option<ColumnMapping>,
}

/// The set of files an operator uploads together. Session-only: nothing is
/// persisted until the commit phase, and the batch is dropped when the
/// session closes.
#[derive(Debug)]
pub struct ImportBatch {
    pub source: String,
    pub entries: Vec<FileEntry>,
}

impl ImportBatch {
    pub fn new(
        source: &str,
        files: &[PathBuf],
        skip: &[String],
        mapping_overrides: &HashMap<String, ColumnMapping>,
    ) -> Self {
        let stamp = format!(
            "{}-{:06}",
            utc_compact_string(Utc::now()),
            Utc::now().timestamp_subsec_micros()
        );

        let entries = files
            .iter()
            .enumerate()
            .map(|(index, path)| {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());

                FileEntry {
                    file_id: format!("imp-{stamp}-{index:03}"),
                    path: path.clone(),
                    file_name: file_name.clone(),
                    status: FileStatus::Pending,
                    analysis: None,
                    error_detail: None,
                    skip_requested: skip.contains(&file_name),
                    mapping_override: mapping_overrides.get(&file_name).cloned(),
                }
            })
            .collect();

        Self {
            source: source.to_string(),
            entries,
        }
    }

    /// Ambiguous artist tokens across the whole batch, deduplicated.
    pub fn ambiguous_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();
        for entry in &self.entries {
            if let Some(analysis) = &entry.analysis {
                for token in &analysis.ambiguous_artist_tokens {
                    if !tokens.contains(token) {
                        tokens.push(token.clone());
                    }
                }
            }
        }
        tokens
    }

    /// Advisory duplicate warnings for the report.
    pub fn duplicate_warnings(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let duplicate = entry.analysis.as_ref()?.duplicate_of.as_ref()?;
                Some(format!(
                    "{}: period already imported as {} ({})",
                    entry.file_name, duplicate.import_id, duplicate.filename
                ))
            })
            .collect()
    }
}

/// Outcome of one orchestration pass. Undecided artist tokens halt the
/// batch before anything is persisted.
#[derive(Debug)]
pub enum RunOutcome {
    DecisionsPending(Vec<String>),
    Completed(Vec<FileImportResult>),
}

/// Drives analysis, the disambiguation gate and the sequential commit
/// phase for one batch. Failures are isolated per file: no file-level error
/// ever touches another file's state.
pub struct Orchestrator<'a> {
    store: &'a mut Store,
    analyzer: Analyzer,
    /// Index of the file currently committing, for progress observation.
    pub current_import_index: Option<usize>,
    /// Fallback bounds for files whose period could not be inferred.
    pub fallback_period: (Option<NaiveDate>, Option<NaiveDate>),
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a mut Store) -> Result<Self> {
        Ok(Self {
            store,
            analyzer: Analyzer::new()?,
            current_import_index: None,
            fallback_period: (None, None),
        })
    }

    pub fn run(&mut self, batch: &mut ImportBatch, decisions: &mut DecisionSet) -> Result<RunOutcome> {
        self.analyze_batch(batch)?;

        decisions.absorb(batch.ambiguous_tokens());
        if !decisions.all_decided() {
            let pending = decisions.pending();
            info!(pending = pending.len(), "halting before commit: artist decisions required");
            return Ok(RunOutcome::DecisionsPending(pending));
        }

        let results = self.commit_batch(batch, decisions)?;
        Ok(RunOutcome::Completed(results))
    }

    /// Analysis phase: files are independent reads with no shared mutable
    /// state, so a small bounded worker pool fans them out. The duplicate
    /// probe runs afterwards on this thread, against the store.
    pub fn analyze_batch(&mut self, batch: &mut ImportBatch) -> Result<()> {
        let pending: Vec<usize> = batch
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.status == FileStatus::Pending)
            .map(|(index, _)| index)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        for &index in &pending {
            batch.entries[index].status = FileStatus::Analyzing;
        }

        let paths: Vec<(usize, PathBuf)> = pending
            .iter()
            .map(|&index| (index, batch.entries[index].path.clone()))
            .collect();

        let worker_count = paths.len().min(ANALYZE_WORKER_CAP);
        let cursor = AtomicUsize::new(0);
        let outcomes: Mutex<Vec<(usize, Result<FileAnalysis>)>> = Mutex::new(Vec::new());
        let analyzer = &self.analyzer;

        std::thread::scope(|scope| {
            for _ in 0..worker_count {
                scope.spawn(|| {
                    loop {
                        let slot = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some((index, path)) = paths.get(slot) else {
                            break;
                        };
                        let outcome = analyzer.analyze(path);
                        outcomes.lock().expect("analysis results lock").push((*index, outcome));
                    }
                });
            }
        });

        let results = outcomes.into_inner().expect("analysis results lock");
        for (index, outcome) in results {
            let entry = &mut batch.entries[index];
            match outcome {
                Ok(mut analysis) => {
                    analysis.duplicate_of =
                        self.probe_duplicate(&batch.source, &analysis)?;
                    if let Some(duplicate) = &analysis.duplicate_of {
                        warn!(
                            file = %entry.file_name,
                            prior_import = %duplicate.import_id,
                            "duplicate period detected; proceeding unless the operator skips"
                        );
                    }
                    entry.analysis = Some(analysis);
                    entry.status = FileStatus::Ready;
                }
                Err(err) => {
                    warn!(file = %entry.file_name, error = %err, "analysis failed");
                    entry.error_detail = Some(err.to_string());
                    entry.status = FileStatus::Error;
                }
            }
        }

        Ok(())
    }

    fn probe_duplicate(
        &self,
        source: &str,
        analysis: &FileAnalysis,
    ) -> Result<Option<PriorImportRef>> {
        let (Some(start), Some(end)) = (analysis.period_start, analysis.period_end) else {
            return Ok(None);
        };
        self.store.find_prior_import(source, start, end)
    }

    /// Commit phase: strictly sequential, in user-visible file order, and
    /// always finishes iterating the list. Every file gets exactly one
    /// result.
    fn commit_batch(
        &mut self,
        batch: &mut ImportBatch,
        decisions: &DecisionSet,
    ) -> Result<Vec<FileImportResult>> {
        let mut results = Vec::with_capacity(batch.entries.len());
        let source = batch.source.clone();

        for index in 0..batch.entries.len() {
            self.current_import_index = Some(index);
            let entry = &mut batch.entries[index];

            match entry.status {
                FileStatus::Error => {
                    results.push(result_for(entry, 0, 0));
                    continue;
                }
                FileStatus::Ready => {}
                // Analysis never left another state behind for this entry.
                _ => continue,
            }

            if entry.skip_requested {
                entry.status = FileStatus::Skipped;
                results.push(result_for(entry, 0, 0));
                info!(file = %entry.file_name, "skipped by operator");
                continue;
            }

            entry.status = FileStatus::Committing;
            info!(index, file = %entry.file_name, "committing file");

            let outcome = commit_one_file(
                self.store,
                &source,
                entry,
                decisions,
                self.fallback_period,
            );
            match outcome {
                Ok((success_rows, error_rows)) => {
                    entry.status = FileStatus::Imported;
                    info!(
                        file = %entry.file_name,
                        success_rows,
                        error_rows,
                        "file imported"
                    );
                    results.push(result_for(entry, success_rows, error_rows));
                }
                Err(err) => {
                    warn!(file = %entry.file_name, error = %err, "file commit failed");
                    entry.status = FileStatus::Error;
                    entry.error_detail = Some(err.to_string());
                    results.push(result_for(entry, 0, 0));
                }
            }
        }

        self.current_import_index = None;
        Ok(results)
    }
}

fn result_for(entry: &FileEntry, success_rows: usize, error_rows: usize) -> FileImportResult {
    FileImportResult {
        file_id: entry.file_id.clone(),
        file_name: entry.file_name.clone(),
        success_row_count: success_rows,
        error_row_count: error_rows,
        status: entry.status.clone(),
        error_detail: entry.error_detail.clone(),
    }
}

/// Materialize and persist one file. Row-level failures are counted, never
/// raised; everything returned as `Err` here marks the file `error` without
/// touching the rest of the batch.
fn commit_one_file(
    store: &mut Store,
    source: &str,
    entry: &FileEntry,
    decisions: &DecisionSet,
    fallback_period: (Option<NaiveDate>, Option<NaiveDate>),
) -> Result<(usize, usize)> {
    let Some(analysis) = entry.analysis.as_ref() else {
        return Err(PipelineError::Validation(format!(
            "{}: file was never analyzed",
            entry.file_name
        )));
    };

    let period_start = analysis.period_start.or(fallback_period.0);
    let period_end = analysis.period_end.or(fallback_period.1);
    let (Some(period_start), Some(period_end)) = (period_start, period_end) else {
        return Err(PipelineError::Validation("Period not detected".to_string()));
    };

    let mapping = match &entry.mapping_override {
        Some(overrides) => {
            mapping::apply_overrides(&entry.file_name, &analysis.guessed_mapping, overrides)?
        }
        None => analysis.guessed_mapping.clone(),
    };
    mapping::validate(&entry.file_name, &mapping, &analysis.columns)?;

    let bytes = fs::read(&entry.path).map_err(|err| PipelineError::Analysis {
        file: entry.file_name.clone(),
        reason: format!("unreadable file: {err}"),
    })?;
    let sha256 = sha256_hex(&bytes);
    let text = decode_text(&bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records: Vec<NormalizedRevenueRecord> = Vec::new();
    let mut error_rows = 0_usize;
    let mut success_rows = 0_usize;

    for (offset, row) in reader.records().enumerate() {
        let row_number = (offset + 2) as i64;
        let row = match row {
            Ok(row) => row,
            Err(_) => {
                error_rows += 1;
                continue;
            }
        };
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }

        match normalize_row(
            &mapping,
            &analysis.columns,
            &row,
            row_number,
            decisions,
            (period_start, period_end),
        ) {
            Ok(normalized) => {
                success_rows += 1;
                records.extend(normalized);
            }
            Err(_) => error_rows += 1,
        }
    }

    // Every imported identity lands in the catalog (append-only), so split
    // tokens and later invoice matching see the same artist set.
    for record in &records {
        store.ensure_artist(&record.artist_name)?;
    }

    store.commit_file(
        &ImportCommit {
            import_id: &entry.file_id,
            source,
            filename: &entry.file_name,
            sha256: &sha256,
            period_start,
            period_end,
            success_rows,
            error_rows,
        },
        &records,
    )?;

    Ok((success_rows, error_rows))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
