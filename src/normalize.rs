use chrono::{Datelike, NaiveDate};

use crate::disambiguation::DecisionSet;
use crate::model::{CanonicalField, ColumnMapping, NormalizedRevenueRecord};

const DEFAULT_CURRENCY: &str = "EUR";

const MONTH_NAMES: &[(&str, u32)] = &[
    ("january", 1),
    ("february", 2),
    ("march", 3),
    ("april", 4),
    ("may", 5),
    ("june", 6),
    ("july", 7),
    ("august", 8),
    ("september", 9),
    ("october", 10),
    ("november", 11),
    ("december", 12),
    ("jan", 1),
    ("feb", 2),
    ("mar", 3),
    ("apr", 4),
    ("jun", 6),
    ("jul", 7),
    ("aug", 8),
    ("sep", 9),
    ("oct", 10),
    ("nov", 11),
    ("dec", 12),
];

/// Parse a money value into integer cents. Handles currency symbols,
/// thousands separators, decimal commas and parenthesized negatives.
/// Returns `None` for anything non-numeric.
pub fn parse_amount_cents(raw: &str) -> Option<i64> {
    let mut cleaned: String = raw
        .chars()
        .filter(|ch| !matches!(ch, '$' | '€' | '£') && !ch.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let mut negative = false;
    if cleaned.starts_with('(') && cleaned.ends_with(')') {
        negative = true;
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }
    if let Some(stripped) = cleaned.strip_prefix('-') {
        negative = !negative;
        cleaned = stripped.to_string();
    }

    let has_dot = cleaned.contains('.');
    let has_comma = cleaned.contains(',');

    let normalized = if has_dot && has_comma {
        // The rightmost separator is the decimal point.
        if cleaned.rfind('.') > cleaned.rfind(',') {
            cleaned.replace(',', "")
        } else {
            cleaned.replace('.', "").replace(',', ".")
        }
    } else if has_comma {
        // A single comma followed by exactly two digits is a decimal comma
        // (European exports); anything else is a thousands separator.
        let tail_len = cleaned.len() - cleaned.rfind(',').unwrap_or(0) - 1;
        if cleaned.matches(',').count() == 1 && tail_len == 2 {
            cleaned.replace(',', ".")
        } else {
            cleaned.replace(',', "")
        }
    } else {
        cleaned
    };

    let (int_part, frac_part) = match normalized.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (normalized.as_str(), ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|ch| ch.is_ascii_digit())
        || !frac_part.chars().all(|ch| ch.is_ascii_digit())
    {
        return None;
    }

    let whole: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };

    let mut frac = frac_part.to_string();
    frac.truncate(2);
    while frac.len() < 2 {
        frac.push('0');
    }
    let cents_part: i64 = frac.parse().ok()?;

    let cents = whole.checked_mul(100)?.checked_add(cents_part)?;
    Some(if negative { -cents } else { cents })
}

/// Parse a unit count, tolerating decimal exports like "1.0" and thousands
/// separators.
pub fn parse_quantity(raw: &str) -> Option<i64> {
    let cleaned = raw.replace(',', "");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return None;
    }

    let int_part = trimmed.split('.').next().unwrap_or(trimmed);
    let int_part = int_part.strip_prefix('+').unwrap_or(int_part);
    if int_part.is_empty() {
        return Some(0);
    }

    let (sign, digits) = match int_part.strip_prefix('-') {
        Some(rest) => (-1, rest),
        None => (1, int_part),
    };
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }

    digits.parse::<i64>().ok().map(|value| sign * value)
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    for format in ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }
    None
}

/// Parse a reporting-period string into inclusive bounds. Accepts
/// `YYYY-MM`, `Month YYYY`, and a pair of ISO dates.
pub fn parse_period(raw: &str) -> Option<(NaiveDate, NaiveDate)> {
    let trimmed = raw.trim();

    if let Some((year, month)) = trimmed
        .split_once('-')
        .and_then(|(y, m)| Some((y.parse::<i32>().ok()?, m.parse::<u32>().ok()?)))
        && trimmed.len() == 7
    {
        return month_bounds(year, month);
    }

    let lowered = trimmed.to_lowercase();
    for (name, month) in MONTH_NAMES {
        if contains_month_word(&lowered, name) {
            let year: i32 = lowered
                .split(|ch: char| !ch.is_ascii_digit())
                .find(|part| part.len() == 4)?
                .parse()
                .ok()?;
            return month_bounds(year, *month);
        }
    }

    let dates: Vec<NaiveDate> = trimmed
        .split(|ch: char| !(ch.is_ascii_digit() || ch == '-'))
        .filter_map(parse_date)
        .collect();
    if dates.len() >= 2 {
        return Some((dates[0], dates[1]));
    }

    None
}

pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((start, next.pred_opt()?))
}

fn contains_month_word(lowered: &str, name: &str) -> bool {
    lowered.split(|ch: char| !ch.is_ascii_alphabetic()).any(|word| word == name)
}

/// Materialize one raw CSV row into normalized records: apply the mapping,
/// validate required fields, split artist identities per the resolved
/// decisions. One record per identity, other fields unchanged.
pub fn normalize_row(
    mapping: &ColumnMapping,
    headers: &[String],
    row: &csv::StringRecord,
    row_number: i64,
    decisions: &DecisionSet,
    period: (NaiveDate, NaiveDate),
) -> Result<Vec<NormalizedRevenueRecord>, String> {
    let value_of = |field: CanonicalField| -> Option<String> {
        mapping
            .iter()
            .find(|rule| rule.target_field == Some(field))
            .and_then(|rule| headers.iter().position(|h| h == &rule.source_column))
            .and_then(|index| row.get(index))
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let artist_raw =
        value_of(CanonicalField::ArtistName).ok_or_else(|| "artist name is required".to_string())?;

    let amount_raw =
        value_of(CanonicalField::GrossAmount).ok_or_else(|| "gross amount is required".to_string())?;
    let gross_amount_cents = parse_amount_cents(&amount_raw)
        .ok_or_else(|| format!("non-numeric amount: {amount_raw}"))?;

    let quantity = value_of(CanonicalField::Quantity).and_then(|raw| parse_quantity(&raw));

    let (period_start, period_end) = {
        let row_start = value_of(CanonicalField::PeriodStart).and_then(|raw| parse_date(&raw));
        let row_end = value_of(CanonicalField::PeriodEnd).and_then(|raw| parse_date(&raw));
        match (row_start, row_end) {
            (Some(start), Some(end)) => (start, end),
            _ => period,
        }
    };

    let currency = value_of(CanonicalField::Currency)
        .map(|raw| raw.to_uppercase())
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

    let template = NormalizedRevenueRecord {
        source_row_number: row_number,
        artist_name: String::new(),
        track_title: value_of(CanonicalField::TrackTitle),
        release_title: value_of(CanonicalField::ReleaseTitle),
        isrc: value_of(CanonicalField::Isrc),
        upc: value_of(CanonicalField::Upc),
        territory: value_of(CanonicalField::Territory),
        store: value_of(CanonicalField::Store),
        sale_type: value_of(CanonicalField::SaleType),
        quantity,
        gross_amount_cents,
        currency,
        period_start,
        period_end,
    };

    Ok(decisions
        .identities_for(&artist_raw)
        .into_iter()
        .map(|identity| {
            let mut record = template.clone();
            record.artist_name = identity;
            record
        })
        .collect())
}
