use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, Result};
use crate::model::{LedgerEntry, NormalizedRevenueRecord, PriorImportRef};
use crate::util::now_utc_string;

const DB_SCHEMA_VERSION: &str = "0.1.0";

/// Catalog artist row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artist {
    pub artist_id: String,
    pub name: String,
}

/// Everything persisted for one committed file besides its rows.
#[derive(Debug, Clone)]
pub struct ImportCommit<'a> {
    pub import_id: &'a str,
    pub source: &'a str,
    pub filename: &'a str,
    pub sha256: &'a str,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub success_rows: usize,
    pub error_rows: usize,
}

/// Committed import as shown by `status`.
#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub import_id: String,
    pub source: String,
    pub filename: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: String,
    pub success_rows: i64,
    pub error_rows: i64,
    pub committed_at: String,
}

/// SQLite-backed store for normalized revenue records, the artist catalog
/// and the expense ledger. All catalog writes are append-only.
pub struct Store {
    connection: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = Connection::open(path)?;
        let store = Self { connection };
        store.configure()?;
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory()?;
        let store = Self { connection };
        store.ensure_schema()?;
        Ok(store)
    }

    fn configure(&self) -> Result<()> {
        self.connection
            .pragma_update(None, "journal_mode", "WAL")?;
        self.connection
            .pragma_update(None, "synchronous", "NORMAL")?;
        self.connection
            .pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn ensure_schema(&self) -> Result<()> {
        self.connection.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS artists (
              artist_id TEXT PRIMARY KEY,
              name TEXT NOT NULL UNIQUE COLLATE NOCASE,
              created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS imports (
              import_id TEXT PRIMARY KEY,
              source TEXT NOT NULL,
              filename TEXT NOT NULL,
              sha256 TEXT NOT NULL,
              period_start TEXT NOT NULL,
              period_end TEXT NOT NULL,
              status TEXT NOT NULL,
              success_rows INTEGER NOT NULL,
              error_rows INTEGER NOT NULL,
              committed_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS revenue_records (
              record_id INTEGER PRIMARY KEY AUTOINCREMENT,
              import_id TEXT NOT NULL,
              source_row_number INTEGER NOT NULL,
              artist_name TEXT NOT NULL,
              track_title TEXT,
              release_title TEXT,
              isrc TEXT,
              upc TEXT,
              territory TEXT,
              store TEXT,
              sale_type TEXT,
              quantity INTEGER,
              gross_amount_cents INTEGER NOT NULL,
              currency TEXT NOT NULL,
              period_start TEXT NOT NULL,
              period_end TEXT NOT NULL,
              FOREIGN KEY(import_id) REFERENCES imports(import_id)
            );

            CREATE INDEX IF NOT EXISTS idx_revenue_records_import
              ON revenue_records(import_id);

            CREATE TABLE IF NOT EXISTS ledger_entries (
              entry_id TEXT PRIMARY KEY,
              artist_id TEXT,
              amount_cents INTEGER NOT NULL,
              currency TEXT NOT NULL,
              category TEXT,
              scope TEXT NOT NULL,
              scope_id TEXT,
              description TEXT,
              document_path TEXT,
              effective_date TEXT NOT NULL,
              created_at TEXT NOT NULL,
              FOREIGN KEY(artist_id) REFERENCES artists(artist_id)
            );
            ",
        )?;

        self.connection.execute(
            "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            [DB_SCHEMA_VERSION],
        )?;

        Ok(())
    }

    /// Earlier committed import for the same (source, period) triple, if
    /// any. Advisory: callers surface it as a warning, never a block.
    pub fn find_prior_import(
        &self,
        source: &str,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<Option<PriorImportRef>> {
        let prior = self
            .connection
            .query_row(
                "SELECT import_id, filename, committed_at FROM imports
                 WHERE source = ?1 AND period_start = ?2 AND period_end = ?3
                 ORDER BY committed_at DESC LIMIT 1",
                params![source, period_start, period_end],
                |row| {
                    Ok(PriorImportRef {
                        import_id: row.get(0)?,
                        filename: row.get(1)?,
                        committed_at: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(prior)
    }

    /// Persist one file's result and all of its normalized rows in a single
    /// transaction. A file may be committed at most once: a second attempt
    /// fails with `AlreadyCommitted` and has zero additional effect.
    pub fn commit_file(
        &mut self,
        commit: &ImportCommit<'_>,
        records: &[NormalizedRevenueRecord],
    ) -> Result<()> {
        let tx = self.connection.transaction()?;

        let already: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM imports WHERE import_id = ?1)",
            [commit.import_id],
            |row| row.get(0),
        )?;
        if already {
            return Err(PipelineError::AlreadyCommitted(commit.import_id.to_string()));
        }

        let status = if commit.error_rows == 0 {
            "completed"
        } else if commit.success_rows > 0 {
            "partial"
        } else {
            "failed"
        };

        tx.execute(
            "INSERT INTO imports(
               import_id, source, filename, sha256, period_start, period_end,
               status, success_rows, error_rows, committed_at
             ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                commit.import_id,
                commit.source,
                commit.filename,
                commit.sha256,
                commit.period_start,
                commit.period_end,
                status,
                commit.success_rows as i64,
                commit.error_rows as i64,
                now_utc_string(),
            ],
        )?;

        {
            let mut statement = tx.prepare(
                "INSERT INTO revenue_records(
                   import_id, source_row_number, artist_name, track_title,
                   release_title, isrc, upc, territory, store, sale_type,
                   quantity, gross_amount_cents, currency, period_start, period_end
                 ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            )?;

            for record in records {
                statement.execute(params![
                    commit.import_id,
                    record.source_row_number,
                    record.artist_name,
                    record.track_title,
                    record.release_title,
                    record.isrc,
                    record.upc,
                    record.territory,
                    record.store,
                    record.sale_type,
                    record.quantity,
                    record.gross_amount_cents,
                    record.currency,
                    record.period_start,
                    record.period_end,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    pub fn records_for_import(&self, import_id: &str) -> Result<Vec<NormalizedRevenueRecord>> {
        let mut statement = self.connection.prepare(
            "SELECT source_row_number, artist_name, track_title, release_title,
                    isrc, upc, territory, store, sale_type, quantity,
                    gross_amount_cents, currency, period_start, period_end
             FROM revenue_records WHERE import_id = ?1 ORDER BY record_id",
        )?;

        let rows = statement.query_map([import_id], |row| {
            Ok(NormalizedRevenueRecord {
                source_row_number: row.get(0)?,
                artist_name: row.get(1)?,
                track_title: row.get(2)?,
                release_title: row.get(3)?,
                isrc: row.get(4)?,
                upc: row.get(5)?,
                territory: row.get(6)?,
                store: row.get(7)?,
                sale_type: row.get(8)?,
                quantity: row.get(9)?,
                gross_amount_cents: row.get(10)?,
                currency: row.get(11)?,
                period_start: row.get(12)?,
                period_end: row.get(13)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn list_imports(&self) -> Result<Vec<ImportSummary>> {
        let mut statement = self.connection.prepare(
            "SELECT import_id, source, filename, period_start, period_end,
                    status, success_rows, error_rows, committed_at
             FROM imports ORDER BY committed_at DESC",
        )?;

        let rows = statement.query_map([], |row| {
            Ok(ImportSummary {
                import_id: row.get(0)?,
                source: row.get(1)?,
                filename: row.get(2)?,
                period_start: row.get(3)?,
                period_end: row.get(4)?,
                status: row.get(5)?,
                success_rows: row.get(6)?,
                error_rows: row.get(7)?,
                committed_at: row.get(8)?,
            })
        })?;

        let mut imports = Vec::new();
        for row in rows {
            imports.push(row?);
        }
        Ok(imports)
    }

    pub fn count(&self, sql: &str) -> Result<i64> {
        let count = self.connection.query_row(sql, [], |row| row.get(0))?;
        Ok(count)
    }

    // Artist catalog. Reads are shared with the analyzer and the invoice
    // matcher; the only writes are append-only creates.

    pub fn all_artists(&self) -> Result<Vec<Artist>> {
        let mut statement = self
            .connection
            .prepare("SELECT artist_id, name FROM artists ORDER BY name")?;

        let rows = statement.query_map([], |row| {
            Ok(Artist {
                artist_id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;

        let mut artists = Vec::new();
        for row in rows {
            artists.push(row?);
        }
        Ok(artists)
    }

    pub fn find_artist_by_name(&self, name: &str) -> Result<Option<Artist>> {
        let artist = self
            .connection
            .query_row(
                "SELECT artist_id, name FROM artists WHERE name = ?1 COLLATE NOCASE",
                [name],
                |row| {
                    Ok(Artist {
                        artist_id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;

        Ok(artist)
    }

    /// Append a new artist. Never overwrites: an existing name (case
    /// insensitive) is a catalog error.
    pub fn create_artist(&self, name: &str) -> Result<Artist> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(PipelineError::Catalog("artist name is empty".to_string()));
        }
        if self.find_artist_by_name(trimmed)?.is_some() {
            return Err(PipelineError::Catalog(format!(
                "artist already exists: {trimmed}"
            )));
        }

        let artist = Artist {
            artist_id: artist_id_for(trimmed),
            name: trimmed.to_string(),
        };
        self.connection.execute(
            "INSERT INTO artists(artist_id, name, created_at) VALUES(?1, ?2, ?3)",
            params![artist.artist_id, artist.name, now_utc_string()],
        )?;

        Ok(artist)
    }

    /// Find-or-create, used when a split token materializes new identities.
    pub fn ensure_artist(&self, name: &str) -> Result<Artist> {
        if let Some(artist) = self.find_artist_by_name(name.trim())? {
            return Ok(artist);
        }
        self.create_artist(name)
    }

    pub fn insert_ledger_entry(&self, entry: &LedgerEntry) -> Result<()> {
        self.connection.execute(
            "INSERT INTO ledger_entries(
               entry_id, artist_id, amount_cents, currency, category, scope,
               scope_id, description, document_path, effective_date, created_at
             ) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entry.entry_id,
                entry.artist_id,
                entry.amount_cents,
                entry.currency,
                entry.category,
                entry.scope.as_str(),
                entry.scope_id,
                entry.description,
                entry.document_path,
                entry.effective_date,
                entry.created_at,
            ],
        )?;

        Ok(())
    }
}

fn artist_id_for(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.to_lowercase().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("art-{}", &digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExpenseScope;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_record(artist: &str) -> NormalizedRevenueRecord {
        NormalizedRevenueRecord {
            source_row_number: 2,
            artist_name: artist.to_string(),
            track_title: Some("Song".to_string()),
            release_title: None,
            isrc: None,
            upc: None,
            territory: Some("FR".to_string()),
            store: None,
            sale_type: Some("Stream".to_string()),
            quantity: Some(10),
            gross_amount_cents: 150,
            currency: "EUR".to_string(),
            period_start: date(2024, 1, 1),
            period_end: date(2024, 1, 31),
        }
    }

    fn sample_commit(import_id: &str) -> ImportCommit<'_> {
        ImportCommit {
            import_id,
            source: "tunecore",
            filename: "report.csv",
            sha256: "abc123",
            period_start: date(2024, 1, 1),
            period_end: date(2024, 1, 31),
            success_rows: 1,
            error_rows: 0,
        }
    }

    #[test]
    fn commit_roundtrips_records() {
        let mut store = Store::open_in_memory().unwrap();
        let records = vec![sample_record("Alice"), sample_record("Bob")];
        store
            .commit_file(&sample_commit("imp-1"), &records)
            .unwrap();

        let read_back = store.records_for_import("imp-1").unwrap();
        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0].artist_name, "Alice");
        assert_eq!(read_back[0].gross_amount_cents, 150);
        assert_eq!(read_back[1].artist_name, "Bob");
        assert_eq!(read_back[0].period_start, date(2024, 1, 1));
    }

    #[test]
    fn recommit_is_rejected_with_zero_additional_effect() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .commit_file(&sample_commit("imp-1"), &[sample_record("Alice")])
            .unwrap();

        let err = store
            .commit_file(&sample_commit("imp-1"), &[sample_record("Bob")])
            .unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyCommitted(_)));

        let records = store.records_for_import("imp-1").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].artist_name, "Alice");
    }

    #[test]
    fn prior_import_probe_matches_source_and_period_only() {
        let mut store = Store::open_in_memory().unwrap();
        store
            .commit_file(&sample_commit("imp-1"), &[sample_record("Alice")])
            .unwrap();

        let hit = store
            .find_prior_import("tunecore", date(2024, 1, 1), date(2024, 1, 31))
            .unwrap();
        assert_eq!(hit.unwrap().import_id, "imp-1");

        let other_source = store
            .find_prior_import("bandcamp", date(2024, 1, 1), date(2024, 1, 31))
            .unwrap();
        assert!(other_source.is_none());

        let other_period = store
            .find_prior_import("tunecore", date(2024, 2, 1), date(2024, 2, 29))
            .unwrap();
        assert!(other_period.is_none());
    }

    #[test]
    fn artist_catalog_is_append_only() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.create_artist("Alice").unwrap();

        let err = store.create_artist("alice").unwrap_err();
        assert!(matches!(err, PipelineError::Catalog(_)));

        let found = store.find_artist_by_name("ALICE").unwrap().unwrap();
        assert_eq!(found.artist_id, alice.artist_id);

        let ensured = store.ensure_artist("Alice").unwrap();
        assert_eq!(ensured.artist_id, alice.artist_id);
        assert_eq!(store.all_artists().unwrap().len(), 1);
    }

    #[test]
    fn ledger_entries_persist() {
        let store = Store::open_in_memory().unwrap();
        let artist = store.create_artist("Alice").unwrap();

        let entry = LedgerEntry {
            entry_id: "exp-1".to_string(),
            artist_id: Some(artist.artist_id),
            amount_cents: 30000,
            currency: "EUR".to_string(),
            category: Some("mastering".to_string()),
            scope: ExpenseScope::Catalog,
            scope_id: None,
            description: None,
            document_path: None,
            effective_date: date(2024, 3, 4),
            created_at: now_utc_string(),
        };
        store.insert_ledger_entry(&entry).unwrap();

        assert_eq!(
            store.count("SELECT COUNT(*) FROM ledger_entries").unwrap(),
            1
        );
    }
}
