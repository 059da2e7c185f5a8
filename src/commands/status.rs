use anyhow::Result;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::resolve_db_path;
use crate::store::Store;

pub fn run(args: StatusArgs) -> Result<()> {
    let db_path = resolve_db_path(&args.cache_root, &args.db_path);

    info!(cache_root = %args.cache_root.display(), "status requested");

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database missing; nothing imported yet");
        return Ok(());
    }

    let store = Store::open(&db_path)?;
    let artists = store.count("SELECT COUNT(*) FROM artists").unwrap_or(0);
    let records = store
        .count("SELECT COUNT(*) FROM revenue_records")
        .unwrap_or(0);
    let ledger = store
        .count("SELECT COUNT(*) FROM ledger_entries")
        .unwrap_or(0);

    info!(
        path = %db_path.display(),
        artists,
        revenue_records = records,
        ledger_entries = ledger,
        "database status"
    );

    for import in store.list_imports()? {
        info!(
            import_id = %import.import_id,
            source = %import.source,
            file = %import.filename,
            period_start = %import.period_start,
            period_end = %import.period_end,
            status = %import.status,
            success_rows = import.success_rows,
            error_rows = import.error_rows,
            committed_at = %import.committed_at,
            "import"
        );
    }

    Ok(())
}
