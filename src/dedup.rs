//! Duplicate prestation detection and cleanup.
//!
//! Two prestations are duplicates when they share client id, client name,
//! day and exact amount. Invoice number, reference and description are
//! deliberately left out of this key even though they feed the record id, so
//! a service re-entered with a different invoice number is still caught.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

use crate::aggregation::refresh_client;
use crate::model::{CleanReport, DuplicateReport, Prestation};
use crate::storage::{Storage, WriteOp};

/// One set of duplicates: the record to keep and the redundant ones.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateGroup {
    pub keep: Prestation,
    pub delete: Vec<Prestation>,
}

/// All duplicate groups found in a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicatePlan {
    pub groups: Vec<DuplicateGroup>,
    pub total_records: usize,
}

impl DuplicatePlan {
    /// Number of records that cleanup would remove.
    pub fn removable(&self) -> usize {
        self.groups.iter().map(|group| group.delete.len()).sum()
    }

    pub fn report(&self) -> DuplicateReport {
        DuplicateReport {
            groups: self.groups.len(),
            duplicates_removable: self.removable(),
            total_records: self.total_records,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DuplicateKey {
    client_id: String,
    client_name: String,
    date: NaiveDate,
    amount_bits: u64,
}

impl DuplicateKey {
    fn of(prestation: &Prestation) -> Self {
        Self {
            client_id: prestation.client_id.clone(),
            client_name: prestation.client_name.clone(),
            date: prestation.date,
            // -0.0 and 0.0 are the same amount
            amount_bits: (prestation.amount + 0.0).to_bits(),
        }
    }
}

/// Group duplicates, keeping the first record of each group in input order.
///
/// Groups come out in the order their first record appears.
pub fn plan_duplicates(prestations: &[Prestation]) -> DuplicatePlan {
    let mut order: Vec<DuplicateKey> = Vec::new();
    let mut members: HashMap<DuplicateKey, Vec<&Prestation>> = HashMap::new();

    for prestation in prestations {
        let key = DuplicateKey::of(prestation);
        let group = members.entry(key.clone()).or_default();
        if group.is_empty() {
            order.push(key);
        }
        group.push(prestation);
    }

    let groups = order
        .into_iter()
        .filter_map(|key| {
            let group = members.remove(&key)?;
            let (keep, rest) = group.split_first()?;
            (!rest.is_empty()).then(|| DuplicateGroup {
                keep: (*keep).clone(),
                delete: rest.iter().map(|p| (*p).clone()).collect(),
            })
        })
        .collect();

    DuplicatePlan {
        groups,
        total_records: prestations.len(),
    }
}

/// Scan stored prestations for duplicates without modifying anything.
pub async fn detect(storage: &Storage) -> anyhow::Result<DuplicateReport> {
    let prestations = storage.list_prestations().await?;
    let report = plan_duplicates(&prestations).report();

    info!(
        groups = report.groups,
        removable = report.duplicates_removable,
        total = report.total_records,
        "Duplicate scan finished"
    );

    Ok(report)
}

/// Delete every redundant duplicate, then refresh the affected clients.
///
/// Running it again right away deletes nothing.
pub async fn clean(storage: &Storage, now: DateTime<Utc>) -> anyhow::Result<CleanReport> {
    let prestations = storage.list_prestations().await?;
    let plan = plan_duplicates(&prestations);

    let mut affected: HashSet<String> = HashSet::new();
    let mut writer = storage.writer();
    for group in &plan.groups {
        affected.insert(group.keep.client_id.clone());
        for duplicate in &group.delete {
            writer
                .push(WriteOp::DeletePrestation(duplicate.id.clone()))
                .await?;
        }
    }
    let summary = writer.finish().await?;

    for client_id in &affected {
        refresh_client(storage, client_id, now).await?;
    }

    let report = CleanReport {
        deleted: summary.writes,
        kept: plan.total_records - summary.writes,
    };

    info!(
        deleted = report.deleted,
        kept = report.kept,
        clients_refreshed = affected.len(),
        "Duplicate cleanup finished"
    );

    Ok(report)
}
