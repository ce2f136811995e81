//! Lenient parsing of CSV cell values.
//!
//! Nothing here fails: unreadable amounts become 0 and unreadable dates
//! become `None`, leaving the caller to decide whether the row survives.

use chrono::NaiveDate;

/// Parse a monetary amount written with `.` or `,` as decimal separator.
///
/// When both separators appear, the right-most one is the decimal separator
/// and the other is a thousands separator (`1.234,56` and `1,234.56` are both
/// 1234.56). Spaces, non-breaking spaces and `€` are ignored. Negative,
/// non-finite or unreadable values yield 0.
pub fn parse_amount(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '€')
        .collect();

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (Some(_), None) => cleaned.replace(',', "."),
        _ => cleaned,
    };

    sanitize_amount(normalized.parse::<f64>().unwrap_or(0.0))
}

/// Clamp an amount into the stored domain: finite and non-negative.
pub fn sanitize_amount(amount: f64) -> f64 {
    if amount.is_finite() && amount > 0.0 {
        amount
    } else {
        0.0
    }
}

/// Parse a `DD/MM/YYYY` date. A trailing time part (`15/03/2024 20:00`) is
/// ignored.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let day_part = raw.split_whitespace().next()?;
    NaiveDate::parse_from_str(day_part, "%d/%m/%Y").ok()
}

/// Trimmed cell content, `None` when blank.
pub fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
