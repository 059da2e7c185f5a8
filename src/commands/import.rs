use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::cli::ImportArgs;
use crate::commands::resolve_db_path;
use crate::disambiguation::DecisionSet;
use crate::model::{AnalysisReport, BatchRunReport, ColumnMapping, FileAnalysisReport, FileStatus};
use crate::orchestrator::{ImportBatch, Orchestrator, RunOutcome};
use crate::store::Store;
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: ImportArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    let report_dir = args.cache_root.join("reports");
    ensure_directory(&report_dir)?;
    let db_path = resolve_db_path(&args.cache_root, &args.db_path);
    let mut store = Store::open(&db_path)?;

    let mut decisions = load_decisions(args.decisions_path.as_deref())?;
    let mapping_overrides = load_mapping_overrides(args.mapping_path.as_deref())?;

    info!(
        run_id = %run_id,
        source = args.source.as_str(),
        files = args.files.len(),
        "starting import"
    );

    let mut batch = ImportBatch::new(
        args.source.as_str(),
        &args.files,
        &args.skip,
        &mapping_overrides,
    );

    let mut orchestrator = Orchestrator::new(&mut store)?;
    orchestrator.fallback_period = (args.period_start, args.period_end);
    let outcome = orchestrator.run(&mut batch, &mut decisions)?;

    let report_path = args
        .report_path
        .clone()
        .unwrap_or_else(|| report_dir.join(format!("import_{}.json", utc_compact_string(started_ts))));

    match outcome {
        RunOutcome::DecisionsPending(pending) => {
            // Nothing was persisted; the operator supplies decisions and
            // reruns the same invocation.
            let report = AnalysisReport {
                generated_at: now_utc_string(),
                source: args.source.as_str().to_string(),
                files: batch
                    .entries
                    .iter()
                    .map(|entry| FileAnalysisReport {
                        file_name: entry.file_name.clone(),
                        status: entry.status.clone(),
                        analysis: entry.analysis.clone(),
                        error_detail: entry.error_detail.clone(),
                    })
                    .collect(),
                pending_decisions: pending.clone(),
                warnings: batch.duplicate_warnings(),
            };
            write_json_pretty(&report_path, &report)?;

            for token in &pending {
                warn!(token = %token, "artist decision required");
            }
            bail!(
                "{} artist decision(s) required before commit; see {}",
                pending.len(),
                report_path.display()
            );
        }
        RunOutcome::Completed(results) => {
            let imported = results
                .iter()
                .filter(|result| result.status == FileStatus::Imported)
                .count();
            let errored = results
                .iter()
                .filter(|result| result.status == FileStatus::Error)
                .count();

            let report = BatchRunReport {
                run_id: run_id.clone(),
                started_at,
                updated_at: now_utc_string(),
                source: args.source.as_str().to_string(),
                db_path: db_path.display().to_string(),
                results,
                warnings: batch.duplicate_warnings(),
            };
            write_json_pretty(&report_path, &report)?;

            info!(
                run_id = %run_id,
                imported,
                errored,
                report = %report_path.display(),
                "import finished"
            );
        }
    }

    Ok(())
}

fn load_decisions(path: Option<&Path>) -> Result<DecisionSet> {
    let mut decisions = DecisionSet::new();
    let Some(path) = path else {
        return Ok(decisions);
    };

    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read decisions file: {}", path.display()))?;
    let parsed: HashMap<String, bool> = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse decisions file: {}", path.display()))?;

    for (token, is_single_artist) in parsed {
        decisions.decide(&token, is_single_artist);
    }
    Ok(decisions)
}

fn load_mapping_overrides(path: Option<&Path>) -> Result<HashMap<String, ColumnMapping>> {
    let Some(path) = path else {
        return Ok(HashMap::new());
    };

    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read mapping file: {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("failed to parse mapping file: {}", path.display()))
}
