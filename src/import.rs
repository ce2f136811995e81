//! CSV import of clients and prestations.
//!
//! An import reads two tables, a clients table and a prestations table, whose
//! columns are located by header name (case-insensitive). Rows become typed
//! [`ClientRow`] / [`PrestationRow`] records, clients referenced only by
//! prestations are synthesized, every touched client's stats are recomputed
//! from its stored prestations merged with the imported ones, and everything
//! is merge-upserted through bounded write batches.
//!
//! Ids are derived from content (see [`crate::keys`]), so importing the same
//! files again rewrites the same records instead of creating new ones.
//!
//! # States
//!
//! `Idle -> Parsing -> Importing -> Done`, with `Error` reachable from
//! `Parsing` and `Importing`. A pipeline only runs from `Idle`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregation::client_metrics;
use crate::error::{ImportError, Result};
use crate::keys::{client_id, prestation_id, split_emails};
use crate::model::{ClientUpsert, ImportReport, Prestation, PrestationSource};
use crate::parse::{non_empty, parse_amount, parse_date};
use crate::storage::{Storage, WriteOp};

pub const CLIENTS_TABLE: &str = "clients";
pub const PRESTATIONS_TABLE: &str = "prestations";

// Clients table headers
const COL_NAME: &str = "nom";
const COL_ADDRESS: &str = "adresse";
const COL_EMAIL: &str = "email";
const COL_ALTERNATE_EMAILS: &str = "emails_secondaires";
const COL_NOTES: &str = "notes";
const COL_COLOR: &str = "couleur";

// Prestations table headers
const COL_CLIENT: &str = "client";
const COL_DATE: &str = "date";
const COL_AMOUNT: &str = "montant";
const COL_INVOICE: &str = "numero_facture";
const COL_REFERENCE: &str = "reference";
const COL_DESCRIPTION: &str = "description";

/// Lifecycle of a [`CsvImportPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportState {
    Idle,
    Parsing,
    Importing,
    Done,
    Error,
}

/// A clients table row after column resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRow {
    pub name: String,
    pub address: Option<String>,
    pub email: Option<String>,
    pub alternate_emails: Vec<String>,
    pub notes: Option<String>,
    pub color: Option<String>,
}

/// A prestations table row after column resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct PrestationRow {
    pub client_name: String,
    pub date: NaiveDate,
    pub amount: f64,
    pub invoice_number: Option<String>,
    pub reference: String,
    pub description: String,
    pub address: Option<String>,
}

/// Rows kept from one table and how many were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTable<T> {
    pub rows: Vec<T>,
    pub skipped: usize,
}

/// Header name to column position, keys lowercased.
struct HeaderIndex {
    table: &'static str,
    positions: HashMap<String, usize>,
}

impl HeaderIndex {
    fn new(table: &'static str, headers: &StringRecord) -> Self {
        let mut positions = HashMap::new();
        for (position, header) in headers.iter().enumerate() {
            let name = header.trim_start_matches('\u{feff}').trim().to_lowercase();
            // First occurrence wins on repeated headers
            positions.entry(name).or_insert(position);
        }
        Self { table, positions }
    }

    fn required(&self, column: &str) -> Result<usize> {
        self.optional(column)
            .ok_or_else(|| ImportError::MissingColumn {
                table: self.table,
                column: column.to_string(),
            })
    }

    fn optional(&self, column: &str) -> Option<usize> {
        self.positions.get(column).copied()
    }
}

/// Cell at an optional column, `""` when the column or cell is absent.
fn cell(record: &StringRecord, column: Option<usize>) -> &str {
    column.and_then(|index| record.get(index)).unwrap_or("")
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map_or(0, |position| position.line())
}

struct ClientColumns {
    name: usize,
    address: Option<usize>,
    email: Option<usize>,
    alternate_emails: Option<usize>,
    notes: Option<usize>,
    color: Option<usize>,
}

impl ClientColumns {
    fn resolve(index: &HeaderIndex) -> Result<Self> {
        Ok(Self {
            name: index.required(COL_NAME)?,
            address: index.optional(COL_ADDRESS),
            email: index.optional(COL_EMAIL),
            alternate_emails: index.optional(COL_ALTERNATE_EMAILS),
            notes: index.optional(COL_NOTES),
            color: index.optional(COL_COLOR),
        })
    }

    fn read(&self, record: &StringRecord) -> Option<ClientRow> {
        let name = non_empty(cell(record, Some(self.name)))?;
        Some(ClientRow {
            name,
            address: non_empty(cell(record, self.address)),
            email: non_empty(cell(record, self.email)),
            alternate_emails: split_emails(cell(record, self.alternate_emails)),
            notes: non_empty(cell(record, self.notes)),
            color: non_empty(cell(record, self.color)),
        })
    }
}

struct PrestationColumns {
    client: usize,
    date: usize,
    amount: usize,
    invoice_number: Option<usize>,
    reference: Option<usize>,
    description: Option<usize>,
    address: Option<usize>,
}

impl PrestationColumns {
    fn resolve(index: &HeaderIndex) -> Result<Self> {
        Ok(Self {
            client: index.required(COL_CLIENT)?,
            date: index.required(COL_DATE)?,
            amount: index.required(COL_AMOUNT)?,
            invoice_number: index.optional(COL_INVOICE),
            reference: index.optional(COL_REFERENCE),
            description: index.optional(COL_DESCRIPTION),
            address: index.optional(COL_ADDRESS),
        })
    }

    fn read(&self, record: &StringRecord) -> Option<PrestationRow> {
        let client_name = non_empty(cell(record, Some(self.client)))?;
        let date = parse_date(cell(record, Some(self.date)))?;
        Some(PrestationRow {
            client_name,
            date,
            amount: parse_amount(cell(record, Some(self.amount))),
            invoice_number: non_empty(cell(record, self.invoice_number)),
            reference: cell(record, self.reference).trim().to_string(),
            description: cell(record, self.description).trim().to_string(),
            address: non_empty(cell(record, self.address)),
        })
    }
}

fn reader(text: &str) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes())
}

/// Parse the clients table. Rows without a name are dropped.
///
/// Fails if the `nom` column is missing.
pub fn parse_clients(text: &str) -> Result<ParsedTable<ClientRow>> {
    let mut rdr = reader(text);
    let index = HeaderIndex::new(CLIENTS_TABLE, rdr.headers()?);
    let columns = ClientColumns::resolve(&index)?;

    let mut table = ParsedTable {
        rows: Vec::new(),
        skipped: 0,
    };
    for record in rdr.records() {
        let record = record?;
        match columns.read(&record) {
            Some(row) => table.rows.push(row),
            None => {
                debug!(table = CLIENTS_TABLE, line = line_of(&record), "Nameless client row dropped");
                table.skipped += 1;
            }
        }
    }

    Ok(table)
}

/// Parse the prestations table. Rows without a client name or with an
/// unreadable date are skipped.
///
/// Fails if the `client`, `date` or `montant` column is missing.
pub fn parse_prestations(text: &str) -> Result<ParsedTable<PrestationRow>> {
    let mut rdr = reader(text);
    let index = HeaderIndex::new(PRESTATIONS_TABLE, rdr.headers()?);
    let columns = PrestationColumns::resolve(&index)?;

    let mut table = ParsedTable {
        rows: Vec::new(),
        skipped: 0,
    };
    for record in rdr.records() {
        let record = record?;
        match columns.read(&record) {
            Some(row) => table.rows.push(row),
            None => {
                debug!(
                    table = PRESTATIONS_TABLE,
                    line = line_of(&record),
                    "Prestation row skipped"
                );
                table.skipped += 1;
            }
        }
    }

    Ok(table)
}

/// Everything an import will write, fully computed in memory.
#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    /// One entry per client, stats and segmentation always set.
    pub clients: Vec<ClientUpsert>,

    /// One entry per distinct prestation id.
    pub prestations: Vec<Prestation>,
}

impl ImportPlan {
    /// Build the records of an import from parsed rows.
    ///
    /// Client rows naming the same client are merged, later non-empty values
    /// winning. Repeated prestation rows collapse onto one id.
    pub fn build(
        clients: Vec<ClientRow>,
        prestations: Vec<PrestationRow>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut plan = ImportPlan::default();
        let mut client_slots: HashMap<String, usize> = HashMap::new();

        for row in clients {
            let id = client_id(&row.name);
            match client_slots.get(&id) {
                Some(&slot) => merge_client_row(&mut plan.clients[slot], row),
                None => {
                    client_slots.insert(id.clone(), plan.clients.len());
                    let mut upsert = ClientUpsert::named(id, String::new());
                    merge_client_row(&mut upsert, row);
                    plan.clients.push(upsert);
                }
            }
        }

        let mut seen_prestations: HashMap<String, usize> = HashMap::new();
        for row in prestations {
            let owner_id = client_id(&row.client_name);

            if !client_slots.contains_key(&owner_id) {
                client_slots.insert(owner_id.clone(), plan.clients.len());
                let mut upsert = ClientUpsert::named(owner_id.clone(), row.client_name.clone());
                upsert.address = row.address.clone();
                plan.clients.push(upsert);
            }

            let id = prestation_id(
                &owner_id,
                row.invoice_number.as_deref(),
                row.date,
                row.amount,
                &row.reference,
                &row.description,
            );
            let prestation = Prestation {
                id: id.clone(),
                client_id: owner_id,
                client_name: row.client_name,
                date: row.date,
                amount: row.amount,
                invoice_number: row.invoice_number,
                reference: row.reference,
                description: row.description,
                source: PrestationSource::Imported,
            };

            match seen_prestations.get(&id) {
                Some(&slot) => plan.prestations[slot] = prestation,
                None => {
                    seen_prestations.insert(id, plan.prestations.len());
                    plan.prestations.push(prestation);
                }
            }
        }

        segment_clients(&mut plan.clients, &plan.prestations, now);
        plan
    }

    /// Recompute client metrics over `stored` prestations merged with the
    /// imported ones.
    ///
    /// Imported prestations replace stored ones with the same id. A client
    /// that loses a stored prestation to an imported row owned by someone
    /// else joins the plan so its metrics are rewritten too.
    pub fn rebase(&mut self, stored: Vec<Prestation>, now: DateTime<Utc>) {
        let incoming: HashMap<&str, &Prestation> = self
            .prestations
            .iter()
            .map(|prestation| (prestation.id.as_str(), prestation))
            .collect();
        let mut touched: HashSet<String> =
            self.clients.iter().map(|client| client.id.clone()).collect();

        let mut records = Vec::with_capacity(stored.len() + self.prestations.len());
        for prestation in stored {
            match incoming.get(prestation.id.as_str()) {
                Some(imported) => {
                    if imported.client_id != prestation.client_id
                        && touched.insert(prestation.client_id.clone())
                    {
                        self.clients.push(ClientUpsert::named(
                            prestation.client_id,
                            prestation.client_name,
                        ));
                    }
                }
                None => records.push(prestation),
            }
        }
        records.extend(self.prestations.iter().cloned());

        segment_clients(&mut self.clients, &records, now);
    }
}

/// Set stats and segmentation of every client from the records it owns.
fn segment_clients(clients: &mut [ClientUpsert], records: &[Prestation], now: DateTime<Utc>) {
    let mut owned: HashMap<&str, Vec<Prestation>> = HashMap::new();
    for prestation in records {
        owned
            .entry(prestation.client_id.as_str())
            .or_default()
            .push(prestation.clone());
    }

    for client in clients {
        let records = owned
            .get(client.id.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let (stats, segmentation) = client_metrics(records, now);
        client.stats = Some(stats);
        client.segmentation = Some(segmentation);
    }
}

fn merge_client_row(upsert: &mut ClientUpsert, row: ClientRow) {
    upsert.name = row.name;
    if row.address.is_some() {
        upsert.address = row.address;
    }
    if row.notes.is_some() {
        upsert.notes = row.notes;
    }
    if row.color.is_some() {
        upsert.color = row.color;
    }
    if row.email.is_some() {
        upsert.email = row.email;
    }
    if !row.alternate_emails.is_empty() {
        upsert
            .alternate_emails
            .get_or_insert_with(Vec::new)
            .extend(row.alternate_emails);
    }
}

/// Runs one import, tracking its state.
pub struct CsvImportPipeline<'a> {
    storage: &'a Storage,
    state: ImportState,
}

impl<'a> CsvImportPipeline<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            state: ImportState::Idle,
        }
    }

    pub fn state(&self) -> ImportState {
        self.state
    }

    /// Return to `Idle` so the pipeline can run again.
    pub fn reset(&mut self) {
        self.state = ImportState::Idle;
    }

    /// Parse both tables, compute stats against what is already stored and
    /// upsert everything.
    ///
    /// A missing required column or an unreadable file aborts during
    /// parsing, before any write. A failing batch aborts during importing;
    /// batches committed before it stay applied.
    ///
    /// # Arguments
    ///
    /// * `clients_csv` - Clients table, header row first
    /// * `prestations_csv` - Prestations table, header row first
    /// * `now` - Reference timestamp for `days_inactive`
    pub async fn run(
        &mut self,
        clients_csv: &str,
        prestations_csv: &str,
        now: DateTime<Utc>,
    ) -> Result<ImportReport> {
        if self.state != ImportState::Idle {
            return Err(ImportError::NotIdle(self.state));
        }

        self.state = ImportState::Parsing;
        let (clients, prestations) = parse_clients(clients_csv)
            .and_then(|clients| Ok((clients, parse_prestations(prestations_csv)?)))
            .map_err(|e| self.fail(e))?;

        self.state = ImportState::Importing;
        let rows_skipped = clients.skipped + prestations.skipped;
        let mut plan = ImportPlan::build(clients.rows, prestations.rows, now);
        let stored = self
            .storage
            .list_prestations()
            .await
            .map_err(|e| self.fail(ImportError::Storage(e)))?;
        plan.rebase(stored, now);

        let batches_committed = write_plan(self.storage, &plan)
            .await
            .map_err(|e| self.fail(ImportError::Storage(e)))?;

        self.state = ImportState::Done;
        let report = ImportReport {
            clients_upserted: plan.clients.len(),
            prestations_upserted: plan.prestations.len(),
            clients_segmented: plan.clients.len(),
            rows_skipped,
            batches_committed,
        };

        info!(
            clients = report.clients_upserted,
            prestations = report.prestations_upserted,
            skipped = report.rows_skipped,
            batches = report.batches_committed,
            "CSV import finished"
        );

        Ok(report)
    }

    fn fail(&mut self, error: ImportError) -> ImportError {
        warn!(state = ?self.state, error = %error, "CSV import failed");
        self.state = ImportState::Error;
        error
    }
}

/// Write clients first, then prestations, in bounded batches.
/// Returns the number of committed batches.
async fn write_plan(storage: &Storage, plan: &ImportPlan) -> anyhow::Result<usize> {
    let mut writer = storage.writer();
    for client in &plan.clients {
        writer.push(WriteOp::UpsertClient(client.clone())).await?;
    }
    for prestation in &plan.prestations {
        writer.push(WriteOp::UpsertPrestation(prestation.clone())).await?;
    }
    Ok(writer.finish().await?.batches)
}

/// Run a one-off import with a fresh pipeline.
pub async fn import_csv(
    storage: &Storage,
    clients_csv: &str,
    prestations_csv: &str,
    now: DateTime<Utc>,
) -> Result<ImportReport> {
    CsvImportPipeline::new(storage)
        .run(clients_csv, prestations_csv, now)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClientStats, DaysInactive, Lifecycle, ManualPrestation};
    use crate::records::{record_manual_prestation, transfer_prestation};
    use crate::storage::StorageConfig;
    use chrono::TimeZone;

    const CLIENTS_CSV: &str = "nom,nombre_prestations\nJean Dupont,0\n";
    const PRESTATIONS_CSV: &str =
        "client,date,montant,adresse\nACME Corp,15/03/2024,1200,\"3 rue des Lilas, Lyon\"\n";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_headers_match_case_insensitively() {
        let table = parse_clients("\u{feff}NOM , Adresse,EMAIL\nJean,Paris,J@x.fr\n").unwrap();

        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].name, "Jean");
        assert_eq!(table.rows[0].address.as_deref(), Some("Paris"));
        assert_eq!(table.rows[0].email.as_deref(), Some("J@x.fr"));
    }

    #[test]
    fn test_missing_required_column_fails() {
        let err = parse_prestations("client,montant\nA,10\n").unwrap_err();

        assert!(matches!(
            &err,
            ImportError::MissingColumn { table: PRESTATIONS_TABLE, column } if column == "date"
        ));
        assert!(err.to_string().contains("'date'"));
    }

    #[test]
    fn test_empty_clients_file_fails() {
        assert!(matches!(
            parse_clients(""),
            Err(ImportError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let table = parse_prestations(
            "client,date,montant\n,15/03/2024,10\nA,2024-03-15,10\nA,16/03/2024,abc\nA\n",
        )
        .unwrap();

        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].amount, 0.0);
        assert_eq!(table.skipped, 3);

        let clients = parse_clients("nom,notes\n,orphan note\nB,\n").unwrap();
        assert_eq!(clients.rows.len(), 1);
        assert_eq!(clients.skipped, 1);
    }

    #[test]
    fn test_quoted_fields_and_comma_decimals() {
        let table = parse_prestations(
            "Client,Date,Montant,Description\n\"Dupont, Jean\",01/02/2024,\"1 250,50\",\"Mariage, soirée\"\n",
        )
        .unwrap();

        assert_eq!(table.rows[0].client_name, "Dupont, Jean");
        assert_eq!(table.rows[0].amount, 1250.5);
        assert_eq!(table.rows[0].description, "Mariage, soirée");
    }

    #[test]
    fn test_plan_synthesizes_orphan_clients() {
        let clients = parse_clients(CLIENTS_CSV).unwrap().rows;
        let prestations = parse_prestations(PRESTATIONS_CSV).unwrap().rows;

        let plan = ImportPlan::build(clients, prestations, now());

        assert_eq!(plan.clients.len(), 2);
        assert_eq!(plan.prestations.len(), 1);

        let jean = &plan.clients[0];
        assert_eq!(jean.name, "Jean Dupont");
        assert_eq!(jean.stats, Some(ClientStats::empty()));
        assert_eq!(jean.segmentation.unwrap().lifecycle, Lifecycle::ARelancer);
        assert!(!jean.segmentation.unwrap().vip);

        let acme = &plan.clients[1];
        assert_eq!(acme.name, "ACME Corp");
        assert_eq!(acme.address.as_deref(), Some("3 rue des Lilas, Lyon"));
        let stats = acme.stats.as_ref().unwrap();
        assert_eq!(stats.total_prestations, 1);
        assert_eq!(stats.total_revenue, 1200.0);
        // 15/03/2024 -> 01/06/2024
        assert_eq!(stats.days_inactive, DaysInactive::Days(78));
        assert_eq!(acme.segmentation.unwrap().lifecycle, Lifecycle::Actif);
    }

    #[test]
    fn test_plan_merges_repeated_rows() {
        let clients = parse_clients(
            "nom,email,emails_secondaires\nJean Dupont,jean@x.fr,\njean  DUPONT,,j.d@x.fr\n",
        )
        .unwrap()
        .rows;
        let prestations = parse_prestations(
            "client,date,montant\nJean Dupont,01/01/2024,100\nJean Dupont,01/01/2024,100\n",
        )
        .unwrap()
        .rows;

        let plan = ImportPlan::build(clients, prestations, now());

        assert_eq!(plan.clients.len(), 1);
        assert_eq!(plan.clients[0].email.as_deref(), Some("jean@x.fr"));
        assert_eq!(
            plan.clients[0].alternate_emails,
            Some(vec!["j.d@x.fr".to_string()])
        );
        assert_eq!(plan.prestations.len(), 1);
        assert_eq!(plan.clients[0].stats.as_ref().unwrap().total_prestations, 1);
    }

    #[tokio::test]
    async fn test_import_scenario() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();

        let report = import_csv(&storage, CLIENTS_CSV, PRESTATIONS_CSV, now())
            .await
            .unwrap();

        assert_eq!(report.clients_upserted, 2);
        assert_eq!(report.prestations_upserted, 1);
        assert_eq!(report.clients_segmented, 2);
        assert_eq!(report.batches_committed, 1);

        let jean = storage
            .get_client(&client_id("Jean Dupont"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(jean.stats, ClientStats::empty());
        assert_eq!(jean.segmentation.lifecycle, Lifecycle::ARelancer);

        let acme = storage
            .get_client(&client_id("ACME Corp"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(acme.stats.total_prestations, 1);
        assert_eq!(acme.stats.total_revenue, 1200.0);
        assert_eq!(acme.address.as_deref(), Some("3 rue des Lilas, Lyon"));
    }

    #[tokio::test]
    async fn test_import_is_idempotent() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let prestations = "client,date,montant,numero_facture\n\
                           ACME Corp,15/03/2024,1200,F-1\n\
                           ACME Corp,20/04/2024,\"300,50\",F-2\n\
                           Jean Dupont,01/05/2024,90,\n";

        let first = import_csv(&storage, CLIENTS_CSV, prestations, now())
            .await
            .unwrap();
        let clients_after_first = storage.list_clients().await.unwrap();
        let prestations_after_first = storage.list_prestations().await.unwrap();

        let second = import_csv(&storage, CLIENTS_CSV, prestations, now())
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(storage.list_clients().await.unwrap(), clients_after_first);
        assert_eq!(
            storage.list_prestations().await.unwrap(),
            prestations_after_first
        );
        assert_eq!(prestations_after_first.len(), 3);
    }

    #[tokio::test]
    async fn test_import_respects_batch_bound() {
        let config = StorageConfig {
            max_batch_writes: 2,
        };
        let storage = Storage::with_config("sqlite::memory:", config).await.unwrap();
        let prestations = "client,date,montant\nA,01/01/2024,1\nB,02/01/2024,2\nC,03/01/2024,3\n";

        let report = import_csv(&storage, "nom\n", prestations, now())
            .await
            .unwrap();

        // 3 clients + 3 prestations in batches of 2
        assert_eq!(report.batches_committed, 3);
        assert_eq!(storage.count_prestations().await.unwrap(), 3);
        assert_eq!(storage.list_clients().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_incremental_import_counts_stored_prestations() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();

        import_csv(
            &storage,
            "nom\n",
            "client,date,montant\nACME Corp,15/03/2024,1200\nACME Corp,16/03/2024,800\n",
            now(),
        )
        .await
        .unwrap();
        import_csv(
            &storage,
            "nom\n",
            "client,date,montant\nACME Corp,20/05/2024,100\n",
            now(),
        )
        .await
        .unwrap();

        let acme = storage
            .get_client(&client_id("ACME Corp"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(storage.count_prestations().await.unwrap(), 3);
        assert_eq!(acme.stats.total_prestations, 3);
        assert_eq!(acme.stats.total_revenue, 2100.0);
        assert_eq!(
            acme.stats.first_collaboration_at,
            NaiveDate::from_ymd_opt(2024, 3, 15)
        );
        assert_eq!(
            acme.stats.last_collaboration_at,
            NaiveDate::from_ymd_opt(2024, 5, 20)
        );
    }

    #[tokio::test]
    async fn test_clients_only_import_keeps_manual_prestations() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let entry = ManualPrestation {
            client_name: "Jean Dupont".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            amount: 3000.0,
            invoice_number: None,
            reference: String::new(),
            description: String::new(),
        };
        record_manual_prestation(&storage, &entry, now()).await.unwrap();

        import_csv(&storage, "nom\nJean Dupont\n", "client,date,montant\n", now())
            .await
            .unwrap();

        let jean = storage
            .get_client(&client_id("Jean Dupont"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(jean.stats.total_prestations, 1);
        assert_eq!(jean.stats.total_revenue, 3000.0);
        assert_eq!(jean.segmentation.lifecycle, Lifecycle::Actif);
    }

    #[tokio::test]
    async fn test_reimport_after_transfer_refreshes_previous_owner() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        import_csv(&storage, "nom\nPaul Durand\n", PRESTATIONS_CSV, now())
            .await
            .unwrap();

        let acme_id = client_id("ACME Corp");
        let paul_id = client_id("Paul Durand");
        let moved = storage.list_client_prestations(&acme_id).await.unwrap();
        transfer_prestation(&storage, &moved[0].id, &paul_id, now())
            .await
            .unwrap()
            .unwrap();

        // The source row moves the prestation back to ACME
        let report = import_csv(&storage, "nom\n", PRESTATIONS_CSV, now())
            .await
            .unwrap();
        assert_eq!(report.clients_segmented, 2);

        let paul = storage.get_client(&paul_id).await.unwrap().unwrap();
        assert_eq!(paul.name, "Paul Durand");
        assert_eq!(paul.stats, ClientStats::empty());

        let acme = storage.get_client(&acme_id).await.unwrap().unwrap();
        assert_eq!(acme.stats.total_prestations, 1);
    }

    #[tokio::test]
    async fn test_sub_cent_amounts_are_distinct_prestations() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();

        let report = import_csv(
            &storage,
            "nom\n",
            "client,date,montant\nA,15/03/2024,\"10,001\"\nA,15/03/2024,\"10,004\"\n",
            now(),
        )
        .await
        .unwrap();

        assert_eq!(report.prestations_upserted, 2);
        assert_eq!(storage.count_prestations().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pipeline_states() {
        let storage = Storage::new("sqlite::memory:").await.unwrap();
        let mut pipeline = CsvImportPipeline::new(&storage);
        assert_eq!(pipeline.state(), ImportState::Idle);

        let err = pipeline
            .run("name\nJean\n", PRESTATIONS_CSV, now())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::MissingColumn { .. }));
        assert_eq!(pipeline.state(), ImportState::Error);
        assert!(storage.list_clients().await.unwrap().is_empty());

        // Must be reset before running again
        let err = pipeline
            .run(CLIENTS_CSV, PRESTATIONS_CSV, now())
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::NotIdle(ImportState::Error)));

        pipeline.reset();
        pipeline
            .run(CLIENTS_CSV, PRESTATIONS_CSV, now())
            .await
            .unwrap();
        assert_eq!(pipeline.state(), ImportState::Done);
    }
}
