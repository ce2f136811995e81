//! Aggregation logic for client statistics and segmentation.
//!
//! [`compute_stats`] is the pure reduction of one client's prestations.
//! The async helpers below apply it to stored clients and write the results
//! back; stats and segmentation are always replaced wholesale.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use tracing::info;

use crate::model::{ClientSegmentation, ClientStats, ClientUpsert, DaysInactive, Prestation};
use crate::parse::sanitize_amount;
use crate::storage::{Storage, WriteOp};

const SECONDS_PER_DAY: i64 = 86_400;

/// Reduce a client's `(date, amount)` records into [`ClientStats`].
///
/// Records may come in any order. Amounts that are not finite or are
/// negative count as 0 instead of poisoning the totals. With no records the
/// result is [`ClientStats::empty`].
///
/// # Arguments
///
/// * `records` - Date and amount of every prestation of one client
/// * `now` - Reference timestamp for `days_inactive`
pub fn compute_stats(
    records: impl IntoIterator<Item = (NaiveDate, f64)>,
    now: DateTime<Utc>,
) -> ClientStats {
    let mut records: Vec<(NaiveDate, f64)> = records
        .into_iter()
        .map(|(date, amount)| (date, sanitize_amount(amount)))
        .collect();

    records.sort_by_key(|(date, _)| *date);

    let (Some(&(first, _)), Some(&(last, _))) = (records.first(), records.last()) else {
        return ClientStats::empty();
    };

    let total_prestations = records.len() as u32;
    let total_revenue: f64 = records.iter().map(|(_, amount)| amount).sum();
    let min_amount = records
        .iter()
        .map(|(_, amount)| *amount)
        .fold(f64::INFINITY, f64::min);
    let max_amount = records
        .iter()
        .map(|(_, amount)| *amount)
        .fold(f64::NEG_INFINITY, f64::max);

    ClientStats {
        first_collaboration_at: Some(first),
        last_collaboration_at: Some(last),
        total_prestations,
        total_revenue,
        average_amount: total_revenue / f64::from(total_prestations),
        min_amount,
        max_amount,
        days_inactive: DaysInactive::Days(days_since(last, now)),
    }
}

/// Whole days elapsed from the start of `day` (UTC) to `now`, floored.
pub fn days_since(day: NaiveDate, now: DateTime<Utc>) -> i64 {
    let start = day.and_time(NaiveTime::MIN).and_utc();
    (now - start).num_seconds().div_euclid(SECONDS_PER_DAY)
}

/// Stats and segmentation for a set of prestations.
pub fn client_metrics(
    prestations: &[Prestation],
    now: DateTime<Utc>,
) -> (ClientStats, ClientSegmentation) {
    let stats = compute_stats(prestations.iter().map(|p| (p.date, p.amount)), now);
    let segmentation = ClientSegmentation::from_stats(&stats);
    (stats, segmentation)
}

/// Recompute and store the stats of one client from its stored prestations.
///
/// Returns `false` when the client does not exist.
pub async fn refresh_client(
    storage: &Storage,
    client_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let Some(client) = storage.get_client(client_id).await? else {
        return Ok(false);
    };

    let prestations = storage.list_client_prestations(client_id).await?;
    let (stats, segmentation) = client_metrics(&prestations, now);

    let mut upsert = ClientUpsert::named(client.id, client.name);
    upsert.stats = Some(stats);
    upsert.segmentation = Some(segmentation);
    storage.upsert_client(&upsert).await?;

    Ok(true)
}

/// Recompute the stats of every stored client.
///
/// Writes go through bounded batches. Returns the number of clients segmented.
pub async fn refresh_all_clients(storage: &Storage, now: DateTime<Utc>) -> anyhow::Result<usize> {
    let clients = storage.list_clients().await?;

    let mut by_client: HashMap<String, Vec<Prestation>> = HashMap::new();
    for prestation in storage.list_prestations().await? {
        by_client
            .entry(prestation.client_id.clone())
            .or_default()
            .push(prestation);
    }

    let mut writer = storage.writer();
    for client in &clients {
        let owned = by_client.get(&client.id).map(Vec::as_slice).unwrap_or_default();
        let (stats, segmentation) = client_metrics(owned, now);

        let mut upsert = ClientUpsert::named(client.id.clone(), client.name.clone());
        upsert.stats = Some(stats);
        upsert.segmentation = Some(segmentation);
        writer.push(WriteOp::UpsertClient(upsert)).await?;
    }
    let summary = writer.finish().await?;

    info!(
        clients = clients.len(),
        batches = summary.batches,
        "Client segmentation refreshed"
    );

    Ok(clients.len())
}
