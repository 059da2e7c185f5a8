use std::fs;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::info;

use crate::cli::{InvoiceCreateArgs, InvoiceStageArgs};
use crate::commands::resolve_db_path;
use crate::invoice::{self, SubstringMatcher};
use crate::model::{ExtractedInvoiceCandidate, StagedExpenseEntry};
use crate::store::Store;
use crate::util::{ensure_directory, utc_compact_string, write_json_pretty};

pub fn stage(args: InvoiceStageArgs) -> Result<()> {
    let staged_dir = args.cache_root.join("staged");
    ensure_directory(&staged_dir)?;

    let db_path = resolve_db_path(&args.cache_root, &args.db_path);
    let store = Store::open(&db_path)?;
    let catalog = store.all_artists()?;

    let data = fs::read_to_string(&args.extraction_path).with_context(|| {
        format!(
            "failed to read extraction file: {}",
            args.extraction_path.display()
        )
    })?;
    let candidate: ExtractedInvoiceCandidate = serde_json::from_str(&data).with_context(|| {
        format!(
            "failed to parse extraction file: {}",
            args.extraction_path.display()
        )
    })?;

    info!(
        file = %candidate.filename,
        confidence = candidate.confidence_score,
        warnings = candidate.warnings.len(),
        "staging extraction"
    );

    let entry = invoice::stage(candidate, &catalog, &SubstringMatcher);

    let staged_path = args.staged_path.clone().unwrap_or_else(|| {
        staged_dir.join(format!("staged_{}.json", utc_compact_string(Utc::now())))
    });
    write_json_pretty(&staged_path, &entry)?;

    info!(
        staged = %staged_path.display(),
        artist_id = entry.overrides.artist_id.as_deref().unwrap_or("<unset>"),
        "entry staged; review and edit before invoice-create"
    );

    Ok(())
}

pub fn create(args: InvoiceCreateArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.cache_root, &args.db_path);
    let store = Store::open(&db_path)?;

    let data = fs::read_to_string(&args.staged_path)
        .with_context(|| format!("failed to read staged entry: {}", args.staged_path.display()))?;
    let entry: StagedExpenseEntry = serde_json::from_str(&data)
        .with_context(|| format!("failed to parse staged entry: {}", args.staged_path.display()))?;

    let (entry, outcome) = invoice::create(&store, entry);

    // The staged file carries the creation state either way, so rerunning
    // create on an already-confirmed entry is rejected.
    write_json_pretty(&args.staged_path, &entry)?;

    match outcome {
        Ok(ledger) => {
            info!(
                entry_id = %ledger.entry_id,
                amount_cents = ledger.amount_cents,
                currency = %ledger.currency,
                "ledger entry created"
            );
            Ok(())
        }
        Err(err) => bail!("ledger creation failed: {err}"),
    }
}
