//! Hand edits of prestations.
//!
//! Every edit leaves the derived metrics of the touched clients up to date.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::aggregation::refresh_client;
use crate::keys::{client_id, prestation_id};
use crate::model::{ClientUpsert, ManualPrestation, Prestation, PrestationSource};
use crate::parse::{non_empty, sanitize_amount};
use crate::storage::Storage;

/// Record a prestation entered by hand.
///
/// The client is created from the given name if it does not exist yet.
/// The prestation id follows the same natural key as imported rows, so a
/// later import of the same service merges into it.
pub async fn record_manual_prestation(
    storage: &Storage,
    entry: &ManualPrestation,
    now: DateTime<Utc>,
) -> anyhow::Result<Prestation> {
    let client_name = entry.client_name.trim();
    if client_name.is_empty() {
        anyhow::bail!("client name is required");
    }

    let owner_id = client_id(client_name);
    if storage.get_client(&owner_id).await?.is_none() {
        storage
            .upsert_client(&ClientUpsert::named(
                owner_id.clone(),
                client_name.to_string(),
            ))
            .await?;
    }

    let amount = sanitize_amount(entry.amount);
    let invoice_number = entry.invoice_number.as_deref().and_then(non_empty);
    let prestation = Prestation {
        id: prestation_id(
            &owner_id,
            invoice_number.as_deref(),
            entry.date,
            amount,
            &entry.reference,
            &entry.description,
        ),
        client_id: owner_id.clone(),
        client_name: client_name.to_string(),
        date: entry.date,
        amount,
        invoice_number,
        reference: entry.reference.trim().to_string(),
        description: entry.description.trim().to_string(),
        source: PrestationSource::Manual,
    };

    storage.upsert_prestation(&prestation).await?;
    refresh_client(storage, &owner_id, now).await?;

    info!(
        prestation_id = %prestation.id,
        client_id = %owner_id,
        "Manual prestation recorded"
    );

    Ok(prestation)
}

/// Move a prestation to another existing client.
///
/// Returns `None` if either the prestation or the target client is unknown.
pub async fn transfer_prestation(
    storage: &Storage,
    prestation_id: &str,
    target_client_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<Prestation>> {
    let Some(prestation) = storage.get_prestation(prestation_id).await? else {
        return Ok(None);
    };
    let Some(target) = storage.get_client(target_client_id).await? else {
        return Ok(None);
    };

    if prestation.client_id == target.id {
        return Ok(Some(prestation));
    }

    storage
        .reassign_prestation(prestation_id, &target.id, &target.name)
        .await?;
    refresh_client(storage, &prestation.client_id, now).await?;
    refresh_client(storage, &target.id, now).await?;

    info!(
        prestation_id,
        from = %prestation.client_id,
        to = %target.id,
        "Prestation transferred"
    );

    storage.get_prestation(prestation_id).await
}

/// Delete a prestation and refresh its former owner.
///
/// Returns `false` if the prestation did not exist.
pub async fn delete_prestation(
    storage: &Storage,
    prestation_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let Some(prestation) = storage.get_prestation(prestation_id).await? else {
        return Ok(false);
    };

    storage.delete_prestation(prestation_id).await?;
    refresh_client(storage, &prestation.client_id, now).await?;

    info!(prestation_id, client_id = %prestation.client_id, "Prestation deleted");

    Ok(true)
}
