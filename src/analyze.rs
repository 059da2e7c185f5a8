use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use regex::Regex;

use crate::disambiguation;
use crate::error::{PipelineError, Result};
use crate::mapping;
use crate::model::{CanonicalField, FileAnalysis};
use crate::normalize::{month_bounds, parse_date, parse_period};
use crate::util::decode_text;

/// Bounded preview window: analysis reads the header plus at most this many
/// data rows, never the full file.
pub const PREVIEW_ROW_LIMIT: usize = 200;

/// Inspects one uploaded file: header, guessed mapping, period bounds and
/// ambiguous artist tokens. Pure file work; the duplicate-import probe runs
/// on the coordinating thread against the store.
#[derive(Debug)]
pub struct Analyzer {
    two_dates: Regex,
    year_month: Regex,
    compact_month: Regex,
}

impl Analyzer {
    pub fn new() -> Result<Self> {
        let build = |pattern: &str| {
            Regex::new(pattern).map_err(|err| PipelineError::Analysis {
                file: String::new(),
                reason: format!("failed to compile period regex: {err}"),
            })
        };

        Ok(Self {
            two_dates: build(r"(\d{4}-\d{2}-\d{2})\D{1,3}(\d{4}-\d{2}-\d{2})")?,
            year_month: build(r"(?:^|[^\d])(\d{4})[-_.](0[1-9]|1[0-2])(?:[^\d]|$)")?,
            compact_month: build(r"(?:^|[^\d])(\d{4})(0[1-9]|1[0-2])(?:[^\d]|$)")?,
        })
    }

    pub fn analyze(&self, path: &Path) -> Result<FileAnalysis> {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let bytes = fs::read(path).map_err(|err| PipelineError::Analysis {
            file: file_name.clone(),
            reason: format!("unreadable file: {err}"),
        })?;
        let text = decode_text(&bytes);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records = reader.records();
        let header = match records.next() {
            Some(Ok(record)) if record.iter().any(|cell| !cell.trim().is_empty()) => record,
            Some(Err(err)) => {
                return Err(PipelineError::Analysis {
                    file: file_name,
                    reason: format!("failed to parse header row: {err}"),
                });
            }
            _ => {
                return Err(PipelineError::Analysis {
                    file: file_name,
                    reason: "file has no header row".to_string(),
                });
            }
        };

        let columns: Vec<String> = header.iter().map(|cell| cell.trim().to_string()).collect();
        let guessed_mapping = mapping::guess_mapping(&columns);

        let artist_index = guessed_mapping
            .iter()
            .position(|rule| rule.target_field == Some(CanonicalField::ArtistName));
        let period_indices: Vec<usize> = columns
            .iter()
            .enumerate()
            .filter(|(_, column)| {
                let normalized = column.to_lowercase();
                normalized.contains("period") || normalized.contains("date")
            })
            .map(|(index, _)| index)
            .collect();

        let mut distinct_artists: HashSet<String> = HashSet::new();
        let mut ambiguous_tokens: BTreeSet<String> = BTreeSet::new();
        let mut min_start: Option<NaiveDate> = None;
        let mut max_end: Option<NaiveDate> = None;
        let mut preview_row_count = 0;

        for record in records.take(PREVIEW_ROW_LIMIT) {
            let record = match record {
                Ok(record) => record,
                // A malformed preview row is a row-level concern, not an
                // analysis failure.
                Err(_) => continue,
            };
            if record.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }
            preview_row_count += 1;

            if let Some(index) = artist_index
                && let Some(value) = record.get(index)
            {
                let value = value.trim();
                if !value.is_empty() {
                    distinct_artists.insert(value.to_string());
                    if disambiguation::is_ambiguous(value) {
                        ambiguous_tokens.insert(value.to_string());
                    }
                }
            }

            for &index in &period_indices {
                let Some(raw) = record.get(index) else { continue };
                if let Some((start, end)) = parse_period(raw) {
                    min_start = Some(min_start.map_or(start, |current| current.min(start)));
                    max_end = Some(max_end.map_or(end, |current| current.max(end)));
                } else if let Some(date) = parse_date(raw) {
                    min_start = Some(min_start.map_or(date, |current| current.min(date)));
                    max_end = Some(max_end.map_or(date, |current| current.max(date)));
                }
            }
        }

        let (period_start, period_end) = match self.period_from_filename(&file_name) {
            Some(bounds) => (Some(bounds.0), Some(bounds.1)),
            None => (min_start, max_end),
        };

        Ok(FileAnalysis {
            columns,
            guessed_mapping,
            period_start,
            period_end,
            total_distinct_artists: distinct_artists.len(),
            ambiguous_artist_tokens: ambiguous_tokens.into_iter().collect(),
            duplicate_of: None,
            preview_row_count,
        })
    }

    /// Period bounds from filename conventions: a pair of ISO dates,
    /// `YYYY-MM` (also `_` or `.` separated), or compact `YYYYMM`.
    fn period_from_filename(&self, file_name: &str) -> Option<(NaiveDate, NaiveDate)> {
        if let Some(captures) = self.two_dates.captures(file_name) {
            let start = parse_date(captures.get(1)?.as_str())?;
            let end = parse_date(captures.get(2)?.as_str())?;
            return Some((start, end));
        }

        for pattern in [&self.year_month, &self.compact_month] {
            if let Some(captures) = pattern.captures(file_name) {
                let year: i32 = captures.get(1)?.as_str().parse().ok()?;
                let month: u32 = captures.get(2)?.as_str().parse().ok()?;
                return month_bounds(year, month);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn analyze_reads_header_and_preview() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "report.csv",
            b"Artist,Song Title,Total Earned,Sales Period\n\
              Alice,One,1.00,2024-01\n\
              Alice & Bob,Two,2.00,2024-01\n\
              Carol feat Dan,Three,3.00,2024-01\n",
        );

        let analysis = Analyzer::new().unwrap().analyze(&path).unwrap();

        assert_eq!(analysis.columns.len(), 4);
        assert_eq!(
            analysis.guessed_mapping[0].target_field,
            Some(CanonicalField::ArtistName)
        );
        assert_eq!(analysis.preview_row_count, 3);
        assert_eq!(analysis.total_distinct_artists, 3);
        assert_eq!(
            analysis.ambiguous_artist_tokens,
            vec!["Alice & Bob".to_string(), "Carol feat Dan".to_string()]
        );
        assert_eq!(analysis.period_start, Some(date(2024, 1, 1)));
        assert_eq!(analysis.period_end, Some(date(2024, 1, 31)));
        assert!(analysis.duplicate_of.is_none());
    }

    #[test]
    fn empty_file_is_an_analysis_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "empty.csv", b"");

        let err = Analyzer::new().unwrap().analyze(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Analysis { .. }));
    }

    #[test]
    fn missing_file_is_an_analysis_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.csv");

        let err = Analyzer::new().unwrap().analyze(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Analysis { .. }));
    }

    #[test]
    fn filename_period_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "tunecore_2024-03.csv",
            b"Artist,Amount,Date\nAlice,1.00,2024-01-15\n",
        );

        let analysis = Analyzer::new().unwrap().analyze(&path).unwrap();
        assert_eq!(analysis.period_start, Some(date(2024, 3, 1)));
        assert_eq!(analysis.period_end, Some(date(2024, 3, 31)));
    }

    #[test]
    fn compact_filename_month_is_recognized() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "believe_202401.csv", b"Artist,Amount\nAlice,1.00\n");

        let analysis = Analyzer::new().unwrap().analyze(&path).unwrap();
        assert_eq!(analysis.period_start, Some(date(2024, 1, 1)));
        assert_eq!(analysis.period_end, Some(date(2024, 1, 31)));
    }

    #[test]
    fn undetectable_period_leaves_bounds_unset() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "report.csv", b"Artist,Amount\nAlice,1.00\n");

        let analysis = Analyzer::new().unwrap().analyze(&path).unwrap();
        assert_eq!(analysis.period_start, None);
        assert_eq!(analysis.period_end, None);
    }

    #[test]
    fn date_column_bounds_are_min_and_max() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "report.csv",
            b"Artist,Amount,Sale Date\n\
              Alice,1.00,2024-01-20\n\
              Bob,2.00,2024-01-05\n\
              Carol,3.00,2024-01-28\n",
        );

        let analysis = Analyzer::new().unwrap().analyze(&path).unwrap();
        assert_eq!(analysis.period_start, Some(date(2024, 1, 5)));
        assert_eq!(analysis.period_end, Some(date(2024, 1, 28)));
    }

    #[test]
    fn latin1_exports_still_analyze() {
        let dir = tempfile::tempdir().unwrap();
        // "Aimée" in Latin-1.
        let path = write_file(
            &dir,
            "report.csv",
            b"Artiste,Montant\nAim\xe9e,1.00\n",
        );

        let analysis = Analyzer::new().unwrap().analyze(&path).unwrap();
        assert_eq!(analysis.total_distinct_artists, 1);
    }
}
