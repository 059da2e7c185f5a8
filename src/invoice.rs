use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::model::{
    CreationState, ExpenseOverrides, ExpenseScope, ExtractedInvoiceCandidate, LedgerEntry,
    StagedExpenseEntry,
};
use crate::normalize::parse_amount_cents;
use crate::store::{Artist, Store};
use crate::util::now_utc_string;

/// Artist-name matching strategy. The substring heuristic below is the
/// default; stronger matchers (edit distance, phonetic) can replace it
/// without touching callers.
pub trait NameMatcher {
    fn match_artist(&self, hint: &str, catalog: &[Artist]) -> Option<Artist>;
}

/// Case-insensitive matching with three fallback strategies, tried in
/// order: exact, catalog name contained in the hint, hint contained in the
/// catalog name. The first strategy yielding exactly one hit wins; zero or
/// multiple hits across all strategies leave the artist unset for manual
/// selection.
pub struct SubstringMatcher;

impl NameMatcher for SubstringMatcher {
    fn match_artist(&self, hint: &str, catalog: &[Artist]) -> Option<Artist> {
        let hint = hint.trim().to_lowercase();
        if hint.is_empty() {
            return None;
        }

        let strategies: [&dyn Fn(&str) -> bool; 3] = [
            &|name: &str| name == hint,
            &|name: &str| hint.contains(name),
            &|name: &str| name.contains(hint.as_str()),
        ];

        for strategy in strategies {
            let mut hits = catalog
                .iter()
                .filter(|artist| strategy(&artist.name.to_lowercase()));
            if let Some(hit) = hits.next()
                && hits.next().is_none()
            {
                return Some(hit.clone());
            }
        }

        None
    }
}

/// Build a reviewable staged entry from one extraction result. Extraction
/// fields are untrusted hints: the amount is re-parsed, the artist is
/// resolved against the catalog, and `confidence_score` and `warnings` are
/// surfaced verbatim, never recomputed.
pub fn stage(
    candidate: ExtractedInvoiceCandidate,
    catalog: &[Artist],
    matcher: &dyn NameMatcher,
) -> StagedExpenseEntry {
    let matched = candidate
        .artist_hint
        .as_deref()
        .and_then(|hint| matcher.match_artist(hint, catalog));
    match (&matched, &candidate.artist_hint) {
        (Some(artist), _) => {
            info!(file = %candidate.filename, artist = %artist.name, "artist hint matched");
        }
        (None, Some(hint)) => {
            info!(file = %candidate.filename, hint = %hint, "artist hint unmatched; manual selection required");
        }
        (None, None) => {}
    }

    let amount_cents = candidate
        .total_amount
        .as_deref()
        .and_then(parse_amount_cents);
    if candidate.total_amount.is_some() && amount_cents.is_none() {
        warn!(file = %candidate.filename, "extracted amount did not parse; manual entry required");
    }

    let overrides = ExpenseOverrides {
        artist_id: matched.map(|artist| artist.artist_id),
        amount_cents,
        currency: candidate.currency.clone(),
        category: candidate.category_hint.clone(),
        scope: ExpenseScope::Catalog,
        scope_id: None,
        effective_date: candidate.date_hint,
        description: candidate
            .description
            .clone()
            .or_else(|| candidate.vendor_name.clone()),
        document_path: Some(candidate.filename.clone()),
    };

    StagedExpenseEntry {
        candidate,
        overrides,
        creation: CreationState::NotCreated,
    }
}

/// Confirm a staged entry into an immutable ledger row. Returns the updated
/// entry; a failed creation lands in `Failed` with the error attached and
/// is never retried automatically. Rerunning creation is an explicit
/// operator action.
pub fn create(store: &Store, mut entry: StagedExpenseEntry) -> (StagedExpenseEntry, Result<LedgerEntry>) {
    match &entry.creation {
        CreationState::Created(entry_id) => {
            let err = PipelineError::Validation(format!(
                "{}: already created as ledger entry {entry_id}",
                entry.candidate.filename
            ));
            return (entry, Err(err));
        }
        CreationState::Creating => {
            let err = PipelineError::Validation(format!(
                "{}: creation already in progress",
                entry.candidate.filename
            ));
            return (entry, Err(err));
        }
        CreationState::NotCreated | CreationState::Failed(_) => {}
    }

    entry.creation = CreationState::Creating;
    match create_inner(store, &entry) {
        Ok(ledger) => {
            info!(entry_id = %ledger.entry_id, amount_cents = ledger.amount_cents, "ledger entry created");
            entry.creation = CreationState::Created(ledger.entry_id.clone());
            (entry, Ok(ledger))
        }
        Err(err) => {
            warn!(file = %entry.candidate.filename, error = %err, "ledger creation failed");
            entry.creation = CreationState::Failed(err.to_string());
            (entry, Err(err))
        }
    }
}

fn create_inner(store: &Store, entry: &StagedExpenseEntry) -> Result<LedgerEntry> {
    let overrides = &entry.overrides;

    let Some(amount_cents) = overrides.amount_cents else {
        return Err(PipelineError::Validation(format!(
            "{}: amount is required",
            entry.candidate.filename
        )));
    };
    let Some(artist_id) = overrides.artist_id.clone() else {
        return Err(PipelineError::Validation(format!(
            "{}: artist is required",
            entry.candidate.filename
        )));
    };

    // Scope identifiers only make sense below catalog level.
    let scope_id = match overrides.scope {
        ExpenseScope::Catalog => None,
        ExpenseScope::Release | ExpenseScope::Track => overrides.scope_id.clone(),
    };

    let effective_date = overrides
        .effective_date
        .unwrap_or_else(|| Utc::now().date_naive());
    let created_at = now_utc_string();

    let ledger = LedgerEntry {
        entry_id: ledger_entry_id(&entry.candidate.filename, &artist_id, &created_at),
        artist_id: Some(artist_id),
        amount_cents,
        currency: overrides.currency.clone(),
        category: overrides.category.clone(),
        scope: overrides.scope,
        scope_id,
        description: overrides.description.clone(),
        document_path: overrides.document_path.clone(),
        effective_date,
        created_at,
    };

    store.insert_ledger_entry(&ledger)?;
    Ok(ledger)
}

fn ledger_entry_id(filename: &str, artist_id: &str, created_at: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update(artist_id.as_bytes());
    hasher.update(created_at.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("exp-{}", &digest[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn catalog(names: &[&str]) -> Vec<Artist> {
        names
            .iter()
            .map(|name| Artist {
                artist_id: format!("art-{}", name.to_lowercase().replace(' ', "-")),
                name: name.to_string(),
            })
            .collect()
    }

    fn candidate(artist_hint: Option<&str>, total_amount: Option<&str>) -> ExtractedInvoiceCandidate {
        ExtractedInvoiceCandidate {
            filename: "invoice-042.pdf".to_string(),
            vendor_name: Some("Mix Studio GmbH".to_string()),
            invoice_number: Some("2024-042".to_string()),
            total_amount: total_amount.map(str::to_string),
            currency: "EUR".to_string(),
            date_hint: NaiveDate::from_ymd_opt(2024, 3, 10),
            artist_hint: artist_hint.map(str::to_string),
            category_hint: Some("mixing".to_string()),
            description: None,
            confidence_score: 0.87,
            warnings: vec!["amount near page fold".to_string()],
        }
    }

    #[test]
    fn exact_match_wins_before_substring() {
        let catalog = catalog(&["Wailers", "The Wailers"]);
        let hit = SubstringMatcher
            .match_artist("the wailers", &catalog)
            .unwrap();
        assert_eq!(hit.name, "The Wailers");
    }

    #[test]
    fn catalog_name_inside_hint_is_the_second_strategy() {
        let catalog = catalog(&["Wailers", "Alice"]);
        let hit = SubstringMatcher
            .match_artist("The Wailers", &catalog)
            .unwrap();
        assert_eq!(hit.name, "Wailers");
    }

    #[test]
    fn hint_inside_catalog_name_is_the_third_strategy() {
        let catalog = catalog(&["The Midnight Ramblers", "Alice"]);
        let hit = SubstringMatcher
            .match_artist("Midnight Ramblers", &catalog)
            .unwrap();
        assert_eq!(hit.name, "The Midnight Ramblers");
    }

    #[test]
    fn multiple_hits_in_a_strategy_fall_through() {
        // Both contain the hint, so strategy three is ambiguous and the
        // artist stays unset.
        let catalog = catalog(&["Alice Blue", "Alice Green"]);
        assert!(SubstringMatcher.match_artist("Alice", &catalog).is_none());
    }

    #[test]
    fn zero_hits_leave_artist_unset() {
        let catalog = catalog(&["Wailers"]);
        assert!(SubstringMatcher.match_artist("Bob", &catalog).is_none());
    }

    #[test]
    fn stage_prefills_overrides_from_hints() {
        let catalog = catalog(&["Wailers"]);
        let entry = stage(
            candidate(Some("The Wailers"), Some("1.234,56 €")),
            &catalog,
            &SubstringMatcher,
        );

        assert_eq!(entry.overrides.artist_id.as_deref(), Some("art-wailers"));
        assert_eq!(entry.overrides.amount_cents, Some(123_456));
        assert_eq!(entry.overrides.currency, "EUR");
        assert_eq!(entry.overrides.category.as_deref(), Some("mixing"));
        assert_eq!(entry.overrides.scope, ExpenseScope::Catalog);
        assert_eq!(
            entry.overrides.effective_date,
            NaiveDate::from_ymd_opt(2024, 3, 10)
        );
        assert_eq!(
            entry.overrides.description.as_deref(),
            Some("Mix Studio GmbH")
        );
        assert_eq!(entry.creation, CreationState::NotCreated);
        // Extraction confidence and warnings pass through untouched.
        assert_eq!(entry.candidate.confidence_score, 0.87);
        assert_eq!(entry.candidate.warnings.len(), 1);
    }

    #[test]
    fn create_requires_amount_and_artist() {
        let store = Store::open_in_memory().unwrap();
        let entry = stage(candidate(None, None), &[], &SubstringMatcher);

        let (entry, outcome) = create(&store, entry);
        assert!(matches!(outcome, Err(PipelineError::Validation(_))));
        assert!(matches!(entry.creation, CreationState::Failed(_)));
        assert_eq!(
            store.count("SELECT COUNT(*) FROM ledger_entries").unwrap(),
            0
        );
    }

    #[test]
    fn create_persists_one_ledger_entry() {
        let store = Store::open_in_memory().unwrap();
        let artist = store.create_artist("Wailers").unwrap();
        let catalog = store.all_artists().unwrap();

        let entry = stage(
            candidate(Some("The Wailers"), Some("500.00")),
            &catalog,
            &SubstringMatcher,
        );
        let (entry, outcome) = create(&store, entry);

        let ledger = outcome.unwrap();
        assert_eq!(ledger.artist_id.as_deref(), Some(artist.artist_id.as_str()));
        assert_eq!(ledger.amount_cents, 50_000);
        assert_eq!(entry.creation, CreationState::Created(ledger.entry_id.clone()));
        assert_eq!(
            store.count("SELECT COUNT(*) FROM ledger_entries").unwrap(),
            1
        );
    }

    #[test]
    fn create_rejects_an_already_created_entry() {
        let store = Store::open_in_memory().unwrap();
        store.create_artist("Wailers").unwrap();
        let catalog = store.all_artists().unwrap();

        let entry = stage(
            candidate(Some("Wailers"), Some("10.00")),
            &catalog,
            &SubstringMatcher,
        );
        let (entry, _) = create(&store, entry);
        let (_, second) = create(&store, entry);

        assert!(matches!(second, Err(PipelineError::Validation(_))));
        assert_eq!(
            store.count("SELECT COUNT(*) FROM ledger_entries").unwrap(),
            1
        );
    }

    #[test]
    fn catalog_scope_drops_the_scope_id() {
        let store = Store::open_in_memory().unwrap();
        store.create_artist("Wailers").unwrap();
        let catalog = store.all_artists().unwrap();

        let mut entry = stage(
            candidate(Some("Wailers"), Some("10.00")),
            &catalog,
            &SubstringMatcher,
        );
        entry.overrides.scope = ExpenseScope::Catalog;
        entry.overrides.scope_id = Some("UPC123".to_string());

        let (_, outcome) = create(&store, entry);
        assert!(outcome.unwrap().scope_id.is_none());
    }

    #[test]
    fn failed_entry_can_be_rerun_after_operator_edits() {
        let store = Store::open_in_memory().unwrap();
        store.create_artist("Wailers").unwrap();
        let catalog = store.all_artists().unwrap();

        let entry = stage(candidate(Some("Wailers"), None), &catalog, &SubstringMatcher);
        let (mut entry, first) = create(&store, entry);
        assert!(first.is_err());

        entry.overrides.amount_cents = Some(2_500);
        let (entry, second) = create(&store, entry);
        assert!(second.is_ok());
        assert!(matches!(entry.creation, CreationState::Created(_)));
    }
}
