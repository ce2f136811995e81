//! Deterministic identifiers.
//!
//! Client and prestation ids are hashes of their natural keys, so importing
//! the same source twice lands on the same records without any lookup.

use chrono::NaiveDate;

/// Separator between natural-key components before hashing.
const KEY_SEPARATOR: &str = "\u{1f}";

/// Hex characters kept from the hash for client ids.
const CLIENT_ID_HEX_LEN: usize = 20;

/// Hex characters kept from the hash for prestation ids.
const PRESTATION_ID_HEX_LEN: usize = 24;

/// Colors handed out to clients that were imported without one.
const PALETTE: [&str; 8] = [
    "#1abc9c", "#3498db", "#9b59b6", "#e67e22", "#e74c3c", "#f1c40f", "#2ecc71", "#34495e",
];

/// Trim, lowercase and collapse whitespace runs.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable client id for a display name.
pub fn client_id(name: &str) -> String {
    let hash = blake3::hash(normalize_name(name).as_bytes());
    format!("client_{}", &hash.to_hex().as_str()[..CLIENT_ID_HEX_LEN])
}

/// Stable prestation id over
/// (client id, invoice number, day, amount, reference, description).
///
/// The amount enters the key exactly, so rows a fraction of a cent apart
/// stay distinct.
pub fn prestation_id(
    client_id: &str,
    invoice_number: Option<&str>,
    date: NaiveDate,
    amount: f64,
    reference: &str,
    description: &str,
) -> String {
    let key = [
        client_id.to_string(),
        invoice_number.unwrap_or_default().trim().to_string(),
        date.format("%Y-%m-%d").to_string(),
        (amount + 0.0).to_string(),
        reference.trim().to_string(),
        description.trim().to_string(),
    ]
    .join(KEY_SEPARATOR);

    let hash = blake3::hash(key.as_bytes());
    format!("prest_{}", &hash.to_hex().as_str()[..PRESTATION_ID_HEX_LEN])
}

/// Merge a primary email and its alternates into a sorted, deduplicated,
/// lowercased set. Blank entries are dropped.
pub fn normalize_emails<'a>(
    primary: Option<&'a str>,
    alternates: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let mut emails: Vec<String> = primary
        .into_iter()
        .chain(alternates)
        .map(|email| email.trim().to_lowercase())
        .filter(|email| !email.is_empty())
        .collect();
    emails.sort();
    emails.dedup();
    emails
}

/// Split a free-text list of emails on `;` or `,`.
pub fn split_emails(raw: &str) -> Vec<String> {
    raw.split([';', ','])
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(str::to_string)
        .collect()
}

/// Palette color picked from a client id.
pub fn default_color(client_id: &str) -> &'static str {
    let hash = blake3::hash(client_id.as_bytes());
    PALETTE[usize::from(hash.as_bytes()[0]) % PALETTE.len()]
}
