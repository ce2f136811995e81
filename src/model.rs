//! Data models for Clientele.
//!
//! Two record sets are managed: [`Client`]s and the [`Prestation`]s billed to
//! them. Everything under "derived" ([`ClientStats`], [`ClientSegmentation`])
//! is recomputed from prestations and never edited by hand.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Below this many days of inactivity a client is `actif`.
pub const ACTIVE_DAYS_LIMIT: i64 = 90;

/// Up to (and including) this many days of inactivity a client is `en_veille`.
pub const DORMANT_DAYS_LIMIT: i64 = 365;

/// Prestation count that makes a client VIP on its own.
pub const VIP_MIN_PRESTATIONS: u32 = 10;

/// Revenue that makes a client VIP on its own (caller's currency unit).
pub const VIP_MIN_REVENUE: f64 = 5000.0;

/// Prestation count that makes a currently active client VIP.
pub const VIP_MIN_ACTIVE_PRESTATIONS: u32 = 5;

/// Whole days since the last collaboration.
///
/// `Never` stands for "no collaboration at all" and behaves like +infinity:
/// it orders above every finite day count. Serialized as a number, or `null`
/// for `Never`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "Option<i64>", into = "Option<i64>")]
pub enum DaysInactive {
    Days(i64),
    Never,
}

impl DaysInactive {
    /// Numeric view, with `Never` as `f64::INFINITY`.
    pub fn as_f64(self) -> f64 {
        match self {
            DaysInactive::Days(days) => days as f64,
            DaysInactive::Never => f64::INFINITY,
        }
    }
}

impl From<Option<i64>> for DaysInactive {
    fn from(value: Option<i64>) -> Self {
        value.map_or(DaysInactive::Never, DaysInactive::Days)
    }
}

impl From<DaysInactive> for Option<i64> {
    fn from(value: DaysInactive) -> Self {
        match value {
            DaysInactive::Days(days) => Some(days),
            DaysInactive::Never => None,
        }
    }
}

/// Summary statistics over one client's prestations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStats {
    /// Date of the earliest prestation, absent without history.
    pub first_collaboration_at: Option<NaiveDate>,

    /// Date of the latest prestation, absent without history.
    pub last_collaboration_at: Option<NaiveDate>,

    pub total_prestations: u32,
    pub total_revenue: f64,

    /// `total_revenue / total_prestations`, unrounded.
    pub average_amount: f64,

    pub min_amount: f64,
    pub max_amount: f64,
    pub days_inactive: DaysInactive,
}

impl ClientStats {
    /// Statistics of a client that never had a prestation.
    pub fn empty() -> Self {
        Self {
            first_collaboration_at: None,
            last_collaboration_at: None,
            total_prestations: 0,
            total_revenue: 0.0,
            average_amount: 0.0,
            min_amount: 0.0,
            max_amount: 0.0,
            days_inactive: DaysInactive::Never,
        }
    }
}

/// Where a client stands in its relationship with the business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Collaborated within the last 90 days.
    Actif,

    /// Last collaboration between 90 and 365 days ago.
    EnVeille,

    /// Nothing for more than a year, or never.
    ARelancer,
}

/// VIP flag and lifecycle state derived from [`ClientStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSegmentation {
    pub vip: bool,
    pub lifecycle: Lifecycle,
}

impl ClientSegmentation {
    /// Classify a client from its statistics.
    ///
    /// # Thresholds
    ///
    /// - `actif`: days_inactive < 90
    /// - `en_veille`: 90 <= days_inactive <= 365
    /// - `a_relancer`: days_inactive > 365, or no prestation at all
    ///
    /// A client is VIP with at least 10 prestations, or at least 5000 of
    /// revenue, or at least 5 prestations while still `actif`.
    pub fn from_stats(stats: &ClientStats) -> Self {
        let active = stats.days_inactive < DaysInactive::Days(ACTIVE_DAYS_LIMIT);

        let lifecycle = if stats.total_prestations == 0 {
            Lifecycle::ARelancer
        } else if active {
            Lifecycle::Actif
        } else if stats.days_inactive <= DaysInactive::Days(DORMANT_DAYS_LIMIT) {
            Lifecycle::EnVeille
        } else {
            Lifecycle::ARelancer
        };

        let vip = stats.total_prestations >= VIP_MIN_PRESTATIONS
            || stats.total_revenue >= VIP_MIN_REVENUE
            || (active && stats.total_prestations >= VIP_MIN_ACTIVE_PRESTATIONS);

        Self { vip, lifecycle }
    }
}

/// How a prestation entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrestationSource {
    Imported,
    Manual,
}

impl PrestationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrestationSource::Imported => "imported",
            PrestationSource::Manual => "manual",
        }
    }

    /// Unknown tags read back from storage are treated as imported.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "manual" => PrestationSource::Manual,
            _ => PrestationSource::Imported,
        }
    }
}

/// A single billable service performed for a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prestation {
    /// Hash of the natural key, see [`crate::keys::prestation_id`].
    pub id: String,
    pub client_id: String,
    pub client_name: String,
    pub date: NaiveDate,

    /// Always finite and non-negative.
    pub amount: f64,
    pub invoice_number: Option<String>,
    pub reference: String,
    pub description: String,
    pub source: PrestationSource,
}

/// A client as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    /// Hash of the normalized name, see [`crate::keys::client_id`].
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub color: String,
    pub email: Option<String>,
    pub alternate_emails: Vec<String>,

    /// Normalized primary + alternate emails, used for matching.
    pub emails: Vec<String>,
    pub stats: ClientStats,
    pub segmentation: ClientSegmentation,
}

/// Merge-write payload for a client.
///
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientUpsert {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub color: Option<String>,
    pub email: Option<String>,
    pub alternate_emails: Option<Vec<String>>,
    pub stats: Option<ClientStats>,
    pub segmentation: Option<ClientSegmentation>,
}

impl ClientUpsert {
    /// Payload carrying only the identity of a client.
    pub fn named(id: String, name: String) -> Self {
        Self {
            id,
            name,
            address: None,
            notes: None,
            color: None,
            email: None,
            alternate_emails: None,
            stats: None,
            segmentation: None,
        }
    }
}

/// Counts returned by a successful CSV import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportReport {
    pub clients_upserted: usize,
    pub prestations_upserted: usize,
    pub clients_segmented: usize,

    /// Rows dropped for missing names or unparseable dates.
    pub rows_skipped: usize,
    pub batches_committed: usize,
}

/// Outcome of a read-only duplicate scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub groups: usize,
    pub duplicates_removable: usize,
    pub total_records: usize,
}

/// Outcome of a duplicate cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanReport {
    pub deleted: usize,

    /// Prestations remaining after cleanup.
    pub kept: usize,
}

/// Request body for POST /import.
#[derive(Debug, Clone, Deserialize)]
pub struct ImportRequest {
    pub clients_csv: String,
    pub prestations_csv: String,
}

/// Request body for POST /prestations.
#[derive(Debug, Clone, Deserialize)]
pub struct ManualPrestation {
    pub client_name: String,
    pub date: NaiveDate,
    pub amount: f64,
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub reference: String,
    #[serde(default)]
    pub description: String,
}

/// Request body for POST /prestations/:id/transfer.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    pub client_id: String,
}

/// Response for GET /clients/:id.
#[derive(Debug, Clone, Serialize)]
pub struct ClientDetail {
    pub client: Client,
    pub prestations: Vec<Prestation>,
}

/// Response for POST /clients/refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshResponse {
    pub clients_segmented: usize,
}
