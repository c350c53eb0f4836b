use crate::models::ScreenedRow;
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use std::collections::BTreeMap;

/// Groups rows (by reference) keyed by normalized security name, each group sorted by date.
pub fn group_rows_by_security(rows: &[ScreenedRow]) -> BTreeMap<String, Vec<&ScreenedRow>> {
    group_rows_with(rows, |row| normalize_security_name(&row.stock))
}

/// Shared implementation for grouping rows under a custom key; rows without a key are skipped.
pub fn group_rows_with<'a, F>(
    rows: &'a [ScreenedRow],
    mut key_selector: F,
) -> BTreeMap<String, Vec<&'a ScreenedRow>>
where
    F: FnMut(&ScreenedRow) -> Option<String>,
{
    let mut grouped: BTreeMap<String, Vec<&ScreenedRow>> = BTreeMap::new();
    for row in rows {
        let Some(key) = key_selector(row) else {
            continue;
        };
        grouped.entry(key).or_default().push(row);
    }
    for values in grouped.values_mut() {
        values.sort_by(|a, b| a.date.cmp(&b.date));
    }
    grouped
}

/// Normalizes a security name by trimming whitespace and uppercasing.
pub fn normalize_security_name(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Date `periods` trading days (weekdays) after `date`.
pub fn trading_date_after(date: NaiveDate, periods: u32) -> NaiveDate {
    let mut current = date;
    let mut remaining = periods;
    while remaining > 0 {
        current += Duration::days(1);
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            remaining -= 1;
        }
    }
    current
}

/// Date of a row's outcome at `horizon`, derived from the row date when not recorded.
pub fn horizon_date(row: &ScreenedRow, horizon: u32) -> NaiveDate {
    row.outcome(horizon)
        .and_then(|outcome| outcome.date)
        .unwrap_or_else(|| trading_date_after(row.date, horizon))
}
