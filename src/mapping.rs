use crate::error::PipelineError;
use crate::model::{CanonicalField, ColumnMapping, ColumnRule};

/// Fixed, ordered keyword rules. Collisions resolve by position in this
/// table, not by specificity. French aliases mirror the exports the label
/// actually receives (Believe, Groover).
///
/// The bare keyword `type` is exact-match only so that names like
/// `amount_type` fall through to the `amount` rule instead of being
/// swallowed by `sale_type`.
const KEYWORD_RULES: &[(&[&str], CanonicalField)] = &[
    (&["artist", "artiste"], CanonicalField::ArtistName),
    (&["track", "song", "titre", "morceau"], CanonicalField::TrackTitle),
    (&["release", "album"], CanonicalField::ReleaseTitle),
    (&["isrc"], CanonicalField::Isrc),
    (&["upc", "ean"], CanonicalField::Upc),
    (&["country", "territory", "pays"], CanonicalField::Territory),
    (&["store", "platform", "plateforme"], CanonicalField::Store),
    (&["saletype", "type"], CanonicalField::SaleType),
    (&["quantity", "units", "quantite"], CanonicalField::Quantity),
    (
        &["amount", "earned", "revenue", "montant"],
        CanonicalField::GrossAmount,
    ),
    (&["currency", "devise"], CanonicalField::Currency),
    (&["periodstart", "startdate"], CanonicalField::PeriodStart),
    (&["periodend", "enddate"], CanonicalField::PeriodEnd),
];

/// Keywords that only match the whole normalized name, never a substring.
const EXACT_ONLY_KEYWORDS: &[&str] = &["type"];

/// Best-guess canonical field for a raw column name. Pure: always
/// overridable by the operator before commit, never blocking.
pub fn guess(column_name: &str) -> Option<CanonicalField> {
    let normalized = normalize_column_name(column_name);
    if normalized.is_empty() {
        return None;
    }

    for (keywords, field) in KEYWORD_RULES {
        for keyword in *keywords {
            let hit = if EXACT_ONLY_KEYWORDS.contains(keyword) {
                normalized == *keyword
            } else {
                normalized.contains(keyword)
            };
            if hit {
                return Some(*field);
            }
        }
    }

    None
}

/// Guess a full mapping for a header row. Unrecognized columns map to
/// `None` (ignored).
pub fn guess_mapping(columns: &[String]) -> ColumnMapping {
    columns
        .iter()
        .map(|column| ColumnRule {
            source_column: column.clone(),
            target_field: guess(column),
        })
        .collect()
}

/// Overlay operator overrides on a guessed mapping. An override for a column
/// the guess never saw is a mapping error; overridden columns keep their
/// position in the original header order.
pub fn apply_overrides(
    file_name: &str,
    guessed: &ColumnMapping,
    overrides: &ColumnMapping,
) -> Result<ColumnMapping, PipelineError> {
    let mut merged = guessed.clone();

    for rule in overrides {
        match merged
            .iter_mut()
            .find(|candidate| candidate.source_column == rule.source_column)
        {
            Some(candidate) => candidate.target_field = rule.target_field,
            None => {
                return Err(PipelineError::Mapping {
                    file: file_name.to_string(),
                    reason: format!("unknown column in override: {}", rule.source_column),
                });
            }
        }
    }

    Ok(merged)
}

/// Commit precondition: the mapping must cover exactly the columns seen at
/// analysis time.
pub fn validate(
    file_name: &str,
    mapping: &ColumnMapping,
    analysis_columns: &[String],
) -> Result<(), PipelineError> {
    for rule in mapping {
        if !analysis_columns.contains(&rule.source_column) {
            return Err(PipelineError::Mapping {
                file: file_name.to_string(),
                reason: format!("mapping references unknown column: {}", rule.source_column),
            });
        }
    }

    for column in analysis_columns {
        if !mapping.iter().any(|rule| &rule.source_column == column) {
            return Err(PipelineError::Mapping {
                file: file_name.to_string(),
                reason: format!("mapping does not cover column: {column}"),
            });
        }
    }

    Ok(())
}

fn normalize_column_name(column_name: &str) -> String {
    column_name
        .chars()
        .filter(|ch| !matches!(ch, '_' | '-') && !ch.is_whitespace())
        .flat_map(|ch| ch.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_is_pure_and_case_insensitive() {
        assert_eq!(guess("Artist Name"), Some(CanonicalField::ArtistName));
        assert_eq!(guess("Artist Name"), Some(CanonicalField::ArtistName));
        assert_eq!(guess("ARTISTE"), Some(CanonicalField::ArtistName));
        assert_eq!(guess("total_earned"), Some(CanonicalField::GrossAmount));
        assert_eq!(guess("Montant net"), Some(CanonicalField::GrossAmount));
        assert_eq!(guess("Pays"), Some(CanonicalField::Territory));
        assert_eq!(guess("# Units Sold"), Some(CanonicalField::Quantity));
        assert_eq!(guess("Devise"), Some(CanonicalField::Currency));
        assert_eq!(guess("Start Date"), Some(CanonicalField::PeriodStart));
        assert_eq!(guess("period_end"), Some(CanonicalField::PeriodEnd));
    }

    #[test]
    fn unmatched_columns_are_ignored() {
        assert_eq!(guess("random header"), None);
        assert_eq!(guess(""), None);
        assert_eq!(guess("___"), None);
    }

    #[test]
    fn earliest_rule_wins_on_collision() {
        // Contains both "track" (rule 2) and "release" (rule 3).
        assert_eq!(guess("release_track"), Some(CanonicalField::TrackTitle));
        // Contains both "artist" (rule 1) and "platform" (rule 7).
        assert_eq!(guess("platform_artist"), Some(CanonicalField::ArtistName));
    }

    #[test]
    fn amount_type_resolves_to_gross_amount() {
        // The bare "type" keyword is exact-only, so the amount rule wins.
        assert_eq!(guess("amount_type"), Some(CanonicalField::GrossAmount));
        assert_eq!(guess("type"), Some(CanonicalField::SaleType));
        assert_eq!(guess("Sale_Type"), Some(CanonicalField::SaleType));
    }

    #[test]
    fn guess_mapping_preserves_header_order() {
        let columns = vec![
            "Artist".to_string(),
            "Mystery".to_string(),
            "Total Earned".to_string(),
        ];
        let mapping = guess_mapping(&columns);

        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping[0].target_field, Some(CanonicalField::ArtistName));
        assert_eq!(mapping[1].target_field, None);
        assert_eq!(mapping[2].target_field, Some(CanonicalField::GrossAmount));
    }

    #[test]
    fn overrides_replace_guessed_targets() {
        let guessed = guess_mapping(&["Artist".to_string(), "Net".to_string()]);
        let overrides = vec![ColumnRule {
            source_column: "Net".to_string(),
            target_field: Some(CanonicalField::GrossAmount),
        }];

        let merged = apply_overrides("report.csv", &guessed, &overrides).unwrap();
        assert_eq!(merged[1].target_field, Some(CanonicalField::GrossAmount));
    }

    #[test]
    fn override_for_unknown_column_is_a_mapping_error() {
        let guessed = guess_mapping(&["Artist".to_string()]);
        let overrides = vec![ColumnRule {
            source_column: "No Such Column".to_string(),
            target_field: None,
        }];

        let err = apply_overrides("report.csv", &guessed, &overrides).unwrap_err();
        assert!(matches!(err, PipelineError::Mapping { .. }));
    }

    #[test]
    fn validate_rejects_unknown_and_missing_columns() {
        let columns = vec!["Artist".to_string(), "Amount".to_string()];
        let mut mapping = guess_mapping(&columns);
        assert!(validate("report.csv", &mapping, &columns).is_ok());

        mapping.push(ColumnRule {
            source_column: "Ghost".to_string(),
            target_field: None,
        });
        assert!(validate("report.csv", &mapping, &columns).is_err());

        mapping.pop();
        mapping.pop();
        assert!(validate("report.csv", &mapping, &columns).is_err());
    }
}
