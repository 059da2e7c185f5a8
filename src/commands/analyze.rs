use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use tracing::info;

use crate::cli::AnalyzeArgs;
use crate::commands::resolve_db_path;
use crate::model::{AnalysisReport, FileAnalysisReport};
use crate::orchestrator::{ImportBatch, Orchestrator};
use crate::store::Store;
use crate::util::{ensure_directory, now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: AnalyzeArgs) -> Result<()> {
    let started_ts = Utc::now();
    let report_dir = args.cache_root.join("reports");
    ensure_directory(&report_dir)?;

    let db_path = resolve_db_path(&args.cache_root, &args.db_path);
    let mut store = Store::open(&db_path)?;

    info!(
        source = args.source.as_str(),
        files = args.files.len(),
        "starting analysis"
    );

    let mut batch = ImportBatch::new(args.source.as_str(), &args.files, &[], &HashMap::new());
    Orchestrator::new(&mut store)?.analyze_batch(&mut batch)?;

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
        pending_decisions: batch.ambiguous_tokens(),
        warnings: batch.duplicate_warnings(),
    };

    let report_path = args.report_path.clone().unwrap_or_else(|| {
        report_dir.join(format!("analysis_{}.json", utc_compact_string(started_ts)))
    });
    write_json_pretty(&report_path, &report)?;

    for warning in &report.warnings {
        info!(warning = %warning, "duplicate advisory");
    }
    info!(
        report = %report_path.display(),
        pending_decisions = report.pending_decisions.len(),
        "analysis complete"
    );

    Ok(())
}
